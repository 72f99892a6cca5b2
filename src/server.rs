//! Matching server - the single-threaded event engine.
//!
//! [`EngineCore`] is the synchronous state machine: one client message in,
//! an ordered burst of server messages out. [`spawn`] runs it on a
//! dedicated thread between the two SPSC queues. All outputs caused by one
//! input are enqueued before any output of the next input, so consumers
//! observe a causal stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::info;

use crate::book::OrderBook;
use crate::messages::{
    Ack, AckStatus, ClientMessage, L2Update, MsgType, NewOrder, Order, ServerMessage, Side,
    TopOfBook, Trade,
};
use crate::pnl::PnlEngine;
use crate::spsc;

/// Messages drained from the input queue per engine-loop iteration.
const BATCH_SIZE: usize = 1024;

/// Idle back-off when an iteration found no work.
const IDLE_SLEEP: Duration = Duration::from_micros(100);

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub symbol: String,
    pub instrument_id: u32,
    /// Order pool slots. Exhaustion is fatal; size generously.
    pub pool_capacity: u32,
    pub in_capacity: usize,
    pub out_capacity: usize,
    /// Users whose PnL is tracked and streamed on the feed.
    pub tracked_users: Vec<u64>,
    /// Pin the engine thread to the last CPU core.
    pub pin_engine_thread: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: "SIM".into(),
            instrument_id: 1,
            pool_capacity: 1 << 20,
            in_capacity: 4096,
            out_capacity: 4096,
            tracked_users: vec![1, 9999],
            pin_engine_thread: false,
        }
    }
}

/// The engine state machine: order book, PnL engines for tracked users,
/// resting-order attribution, and the last emitted top of book.
pub struct EngineCore {
    book: OrderBook,
    instrument_id: u32,
    pnl: Vec<PnlEngine>,
    /// Resting order id -> owning user id, for trade attribution. Entries
    /// are inserted on rest and erased on cancel or fill-to-zero.
    order_user: FxHashMap<u64, u64>,
    last_tob: TopOfBook,
    trades_scratch: Vec<Trade>,
}

impl EngineCore {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            book: OrderBook::new(cfg.symbol.clone(), cfg.pool_capacity),
            instrument_id: cfg.instrument_id,
            pnl: cfg.tracked_users.iter().map(|&u| PnlEngine::new(u)).collect(),
            order_user: FxHashMap::default(),
            last_tob: TopOfBook::default(),
            trades_scratch: Vec::with_capacity(8),
        }
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    /// Hash of the resting book state, for replay tests.
    pub fn state_hash(&self) -> u64 {
        self.book.state_hash()
    }

    /// Process one client message, returning every output it causes in
    /// emission order: trade-driven PNL updates, trades in match order, the
    /// ACK, the TOB diff with its mid-driven PNL updates, then L2 diffs.
    pub fn apply(&mut self, msg: &ClientMessage) -> Vec<ServerMessage> {
        let mut out = Vec::new();

        let prev_bids = self.book.snapshot_bids();
        let prev_asks = self.book.snapshot_asks();

        match *msg {
            ClientMessage::NewOrder(m) => self.apply_new_order(&m, &mut out),
            ClientMessage::Cancel(c) => {
                let ok = self.book.cancel_order(c.order_id);
                if ok {
                    self.order_user.remove(&c.order_id);
                }
                out.push(ServerMessage::Ack(Ack {
                    status: if ok { AckStatus::Ok } else { AckStatus::Error },
                    kind: MsgType::Cancel,
                    order_id: c.order_id,
                }));
            }
        }

        // TOB diff; a changed top drives the reference mid for PnL marking.
        let tob = self.book.top_of_book();
        if tob != self.last_tob {
            self.last_tob = tob;
            out.push(ServerMessage::TopOfBook(tob));
            if let Some(mid) = tob.mid() {
                for pnl in &mut self.pnl {
                    pnl.on_midprice(mid);
                    out.push(ServerMessage::Pnl(pnl.snapshot()));
                }
            }
        }

        // L2 diffs, bids then asks.
        let new_bids = self.book.snapshot_bids();
        let new_asks = self.book.snapshot_asks();
        diff_side(&prev_bids, &new_bids, Side::Buy, &mut out);
        diff_side(&prev_asks, &new_asks, Side::Sell, &mut out);

        out
    }

    fn apply_new_order(&mut self, m: &NewOrder, out: &mut Vec<ServerMessage>) {
        let order = Order {
            order_id: 0,
            user_id: m.user_id,
            instrument_id: self.instrument_id,
            side: m.side,
            price: m.price,
            quantity: m.quantity,
            timestamp: 0,
        };

        let mut trades = std::mem::take(&mut self.trades_scratch);
        let assigned = self.book.submit_limit_order(&order, &mut trades);
        if assigned != 0 {
            self.order_user.insert(assigned, m.user_id);
        }

        // PnL attribution per trade, per tracked user. The incoming side
        // gives the first guess; the resting-order map overrides it for
        // whichever side of the trade was a resting order.
        for tr in &trades {
            for pnl in &mut self.pnl {
                let user = pnl.user_id();
                let mut is_buy = false;
                let mut is_sell = false;
                if m.user_id == user {
                    if m.side == Side::Buy {
                        is_buy = true;
                    } else {
                        is_sell = true;
                    }
                }
                if let Some(&owner) = self.order_user.get(&tr.buy_order_id) {
                    if owner == user {
                        is_buy = true;
                        is_sell = false;
                    }
                }
                if let Some(&owner) = self.order_user.get(&tr.sell_order_id) {
                    if owner == user {
                        is_sell = true;
                        is_buy = false;
                    }
                }
                if is_buy || is_sell {
                    pnl.on_trade(is_buy, tr.price, tr.quantity);
                    out.push(ServerMessage::Pnl(pnl.snapshot()));
                }
            }
        }

        for tr in &trades {
            out.push(ServerMessage::Trade(*tr));
        }
        out.push(ServerMessage::Ack(Ack {
            status: AckStatus::Ok,
            kind: MsgType::NewOrder,
            order_id: assigned,
        }));

        // Attribution entries for resting orders the trades swept to zero
        // are dead now that attribution is done.
        for tr in &trades {
            for id in [tr.buy_order_id, tr.sell_order_id] {
                if !self.book.contains(id) {
                    self.order_user.remove(&id);
                }
            }
        }

        self.trades_scratch = trades;
    }
}

/// Emit one L2 update per price whose aggregate quantity changed between
/// two side snapshots: new and changed levels first in side-natural order,
/// then removals (quantity zero).
fn diff_side(before: &[(f64, u64)], after: &[(f64, u64)], side: Side, out: &mut Vec<ServerMessage>) {
    let mut prev: FxHashMap<u64, u64> =
        before.iter().map(|&(p, q)| (p.to_bits(), q)).collect();
    for &(price, quantity) in after {
        match prev.remove(&price.to_bits()) {
            Some(old) if old == quantity => {}
            _ => out.push(ServerMessage::L2(L2Update { side, price, quantity })),
        }
    }
    for &(price, _) in before {
        if prev.contains_key(&price.to_bits()) {
            out.push(ServerMessage::L2(L2Update { side, price, quantity: 0 }));
        }
    }
}

// ============================================================================
// Threaded server
// ============================================================================

/// Submission handle: the single producer of the input queue.
pub struct OrderGate {
    orders: spsc::Producer<ClientMessage>,
}

impl OrderGate {
    /// Non-blocking enqueue. `false` means the input queue is full; the
    /// caller decides between dropping and retrying.
    pub fn submit(&mut self, msg: ClientMessage) -> bool {
        self.orders.push(msg).is_ok()
    }

    pub fn submit_new_order(&mut self, m: NewOrder) -> bool {
        self.submit(ClientMessage::NewOrder(m))
    }

    pub fn submit_cancel(&mut self, order_id: u64) -> bool {
        self.submit(ClientMessage::Cancel(crate::messages::CancelRequest { order_id }))
    }
}

/// Feed handle: the single consumer of the output queue.
pub struct FeedReader {
    feed: spsc::Consumer<ServerMessage>,
}

impl FeedReader {
    /// Non-blocking dequeue of the next server message.
    pub fn next(&mut self) -> Option<ServerMessage> {
        self.feed.pop()
    }
}

/// Owns the engine thread. Dropping it stops the loop and joins.
pub struct MatchingServer {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MatchingServer {
    /// Signal the engine loop to stop at its next iteration boundary and
    /// join it. Queued outputs may remain undrained.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MatchingServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the engine thread with bounded SPSC queues on both sides.
pub fn spawn(cfg: EngineConfig) -> (MatchingServer, OrderGate, FeedReader) {
    let (in_tx, in_rx) = spsc::channel(cfg.in_capacity);
    let (out_tx, out_rx) = spsc::channel(cfg.out_capacity);
    let running = Arc::new(AtomicBool::new(true));

    let loop_running = Arc::clone(&running);
    let thread = std::thread::Builder::new()
        .name("simex-engine".into())
        .spawn(move || engine_loop(cfg, in_rx, out_tx, loop_running))
        .expect("spawn engine thread");

    (
        MatchingServer { running, thread: Some(thread) },
        OrderGate { orders: in_tx },
        FeedReader { feed: out_rx },
    )
}

fn engine_loop(
    cfg: EngineConfig,
    mut input: spsc::Consumer<ClientMessage>,
    mut output: spsc::Producer<ServerMessage>,
    running: Arc<AtomicBool>,
) {
    if cfg.pin_engine_thread {
        pin_to_last_core();
    }

    let symbol = cfg.symbol.clone();
    let mut core = EngineCore::new(&cfg);
    info!(symbol = %symbol, "matching engine started");

    while running.load(Ordering::Acquire) {
        let mut processed = 0;
        while processed < BATCH_SIZE {
            let Some(msg) = input.pop() else { break };
            processed += 1;
            for m in core.apply(&msg) {
                // Output-queue pressure is a consumer-side violation; spin
                // rather than drop a trade or an ack.
                let mut m = m;
                loop {
                    match output.push(m) {
                        Ok(()) => break,
                        Err(back) => {
                            m = back;
                            std::hint::spin_loop();
                        }
                    }
                }
            }
        }
        if processed == 0 {
            std::thread::sleep(IDLE_SLEEP);
        }
    }

    info!(symbol = %symbol, "matching engine stopped");
}

/// Pin the current thread to the last available core; typically the
/// quietest one.
fn pin_to_last_core() {
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if let Some(last) = core_ids.last() {
            core_affinity::set_for_current(*last);
        }
    }
}
