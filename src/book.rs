//! Order book - price-time priority limit order book.
//!
//! Bids and asks are ordered maps from price to an intrusive FIFO of
//! pool-resident orders, so iteration starts at the best price on either
//! side. A side index from order id to `(side, price, pool slot)` makes
//! cancellation O(1). Prices are exact IEEE-754 values; clients are
//! responsible for quantizing to a tick.

use std::cmp::Reverse;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;

use crate::level::PriceLevel;
use crate::messages::{Order, Side, TopOfBook, Trade};
use crate::pool::{OrderPool, NIL};

type BidKey = Reverse<OrderedFloat<f64>>;
type AskKey = OrderedFloat<f64>;

#[inline]
fn bid_key(price: f64) -> BidKey {
    Reverse(OrderedFloat(price))
}

#[inline]
fn ask_key(price: f64) -> AskKey {
    OrderedFloat(price)
}

/// Lookup record for a resting order: which side, which level, which slot.
#[derive(Clone, Copy, Debug)]
struct OrderRef {
    side: Side,
    price: f64,
    idx: u32,
}

/// In-memory limit order book for a single instrument.
pub struct OrderBook {
    symbol: String,
    bids: BTreeMap<BidKey, PriceLevel>,
    asks: BTreeMap<AskKey, PriceLevel>,
    order_index: FxHashMap<u64, OrderRef>,

    next_order_id: u64,
    next_trade_id: u64,
    next_timestamp: u64,

    pool: OrderPool,
}

impl OrderBook {
    /// Create an empty book. The symbol identifies the instrument only; it
    /// does not affect matching.
    pub fn new(symbol: impl Into<String>, pool_capacity: u32) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            order_index: FxHashMap::default(),
            next_order_id: 1,
            next_trade_id: 1,
            next_timestamp: 1,
            pool: OrderPool::new(pool_capacity),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Number of resting orders.
    pub fn len(&self) -> usize {
        self.order_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order_index.is_empty()
    }

    /// Whether `order_id` is resting in the book.
    pub fn contains(&self, order_id: u64) -> bool {
        self.order_index.contains_key(&order_id)
    }

    #[inline]
    fn allocate_order_id(&mut self) -> u64 {
        let id = self.next_order_id;
        self.next_order_id += 1;
        id
    }

    #[inline]
    fn allocate_trade_id(&mut self) -> u64 {
        let id = self.next_trade_id;
        self.next_trade_id += 1;
        id
    }

    #[inline]
    fn allocate_timestamp(&mut self) -> u64 {
        let ts = self.next_timestamp;
        self.next_timestamp += 1;
        ts
    }

    // ========================================================================
    // Submission and matching
    // ========================================================================

    /// Submit a limit order. Immediate matches are appended to `out_trades`
    /// (cleared first); any residual quantity rests at the limit price.
    ///
    /// Returns the assigned order id when the order rests, 0 otherwise
    /// (zero-quantity no-op or complete immediate fill).
    pub fn submit_limit_order(&mut self, order: &Order, out_trades: &mut Vec<Trade>) -> u64 {
        out_trades.clear();
        if order.quantity == 0 {
            return 0;
        }

        let mut incoming = *order;
        if incoming.order_id == 0 {
            incoming.order_id = self.allocate_order_id();
        }
        if incoming.timestamp == 0 {
            incoming.timestamp = self.allocate_timestamp();
        }

        match incoming.side {
            Side::Buy => self.match_buy(&mut incoming, out_trades),
            Side::Sell => self.match_sell(&mut incoming, out_trades),
        }

        if incoming.quantity > 0 {
            self.rest(&incoming);
            incoming.order_id
        } else {
            0
        }
    }

    /// Cross an incoming buy against the best asks while marketable.
    fn match_buy(&mut self, incoming: &mut Order, out_trades: &mut Vec<Trade>) {
        while incoming.quantity > 0 {
            let Some((&key, level)) = self.asks.first_key_value() else {
                break;
            };
            let ask_price = key.into_inner();
            if ask_price > incoming.price {
                break;
            }

            let mut level = *level;
            let mut idx = level.head;
            while idx != NIL && incoming.quantity > 0 {
                let next = self.pool[idx].next;
                let fill = incoming.quantity.min(self.pool[idx].quantity);
                let trade_id = self.allocate_trade_id();
                let resting = &mut self.pool[idx];
                out_trades.push(Trade {
                    trade_id,
                    buy_order_id: incoming.order_id,
                    sell_order_id: resting.order_id,
                    buy_user_id: incoming.user_id,
                    sell_user_id: resting.user_id,
                    price: ask_price,
                    quantity: fill,
                    instrument_id: incoming.instrument_id,
                });

                incoming.quantity -= fill;
                resting.quantity -= fill;
                if resting.quantity == 0 {
                    let done = resting.order_id;
                    self.order_index.remove(&done);
                    level.unlink(&mut self.pool, idx);
                    self.pool.release(idx);
                }
                idx = next;
            }

            if level.is_empty() {
                self.asks.remove(&key);
            } else {
                self.asks.insert(key, level);
            }
        }
    }

    /// Cross an incoming sell against the best bids while marketable.
    fn match_sell(&mut self, incoming: &mut Order, out_trades: &mut Vec<Trade>) {
        while incoming.quantity > 0 {
            let Some((&key, level)) = self.bids.first_key_value() else {
                break;
            };
            let bid_price = key.0.into_inner();
            if bid_price < incoming.price {
                break;
            }

            let mut level = *level;
            let mut idx = level.head;
            while idx != NIL && incoming.quantity > 0 {
                let next = self.pool[idx].next;
                let fill = incoming.quantity.min(self.pool[idx].quantity);
                let trade_id = self.allocate_trade_id();
                let resting = &mut self.pool[idx];
                out_trades.push(Trade {
                    trade_id,
                    buy_order_id: resting.order_id,
                    sell_order_id: incoming.order_id,
                    buy_user_id: resting.user_id,
                    sell_user_id: incoming.user_id,
                    price: bid_price,
                    quantity: fill,
                    instrument_id: incoming.instrument_id,
                });

                incoming.quantity -= fill;
                resting.quantity -= fill;
                if resting.quantity == 0 {
                    let done = resting.order_id;
                    self.order_index.remove(&done);
                    level.unlink(&mut self.pool, idx);
                    self.pool.release(idx);
                }
                idx = next;
            }

            if level.is_empty() {
                self.bids.remove(&key);
            } else {
                self.bids.insert(key, level);
            }
        }
    }

    /// Rest residual quantity at its limit price, at the tail of the level.
    fn rest(&mut self, order: &Order) {
        let idx = self.pool.allocate();
        let slot = &mut self.pool[idx];
        slot.order_id = order.order_id;
        slot.user_id = order.user_id;
        slot.side = order.side;
        slot.price = order.price;
        slot.quantity = order.quantity;
        slot.timestamp = order.timestamp;

        match order.side {
            Side::Buy => {
                let level = self.bids.entry(bid_key(order.price)).or_default();
                level.push_back(&mut self.pool, idx);
            }
            Side::Sell => {
                let level = self.asks.entry(ask_key(order.price)).or_default();
                level.push_back(&mut self.pool, idx);
            }
        }

        self.order_index.insert(
            order.order_id,
            OrderRef { side: order.side, price: order.price, idx },
        );
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel a resting order by id. Returns false (with no side effects)
    /// if the id is unknown, or if its recorded price level is missing from
    /// the map, which would indicate an internal inconsistency.
    pub fn cancel_order(&mut self, order_id: u64) -> bool {
        let Some(&r) = self.order_index.get(&order_id) else {
            return false;
        };

        match r.side {
            Side::Buy => {
                let key = bid_key(r.price);
                // A missing level would mean the index is stale; answer
                // not-found without touching any state.
                let Some(level) = self.bids.get_mut(&key) else {
                    return false;
                };
                level.unlink(&mut self.pool, r.idx);
                self.pool.release(r.idx);
                if level.is_empty() {
                    self.bids.remove(&key);
                }
            }
            Side::Sell => {
                let key = ask_key(r.price);
                let Some(level) = self.asks.get_mut(&key) else {
                    return false;
                };
                level.unlink(&mut self.pool, r.idx);
                self.pool.release(r.idx);
                if level.is_empty() {
                    self.asks.remove(&key);
                }
            }
        }

        self.order_index.remove(&order_id);
        true
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Best bid/ask with aggregate quantity at each best level.
    pub fn top_of_book(&self) -> TopOfBook {
        let mut tob = TopOfBook::default();
        if let Some((&key, level)) = self.bids.first_key_value() {
            tob.has_bid = true;
            tob.bid_price = key.0.into_inner();
            tob.bid_quantity = level.total_quantity(&self.pool);
        }
        if let Some((&key, level)) = self.asks.first_key_value() {
            tob.has_ask = true;
            tob.ask_price = key.into_inner();
            tob.ask_quantity = level.total_quantity(&self.pool);
        }
        tob
    }

    /// Bid levels as `(price, aggregate quantity)`, best (highest) first.
    pub fn snapshot_bids(&self) -> Vec<(f64, u64)> {
        let mut out = Vec::with_capacity(self.bids.len());
        for (key, level) in &self.bids {
            let sum = level.total_quantity(&self.pool);
            if sum > 0 {
                out.push((key.0.into_inner(), sum));
            }
        }
        out
    }

    /// Ask levels as `(price, aggregate quantity)`, best (lowest) first.
    pub fn snapshot_asks(&self) -> Vec<(f64, u64)> {
        let mut out = Vec::with_capacity(self.asks.len());
        for (key, level) in &self.asks {
            let sum = level.total_quantity(&self.pool);
            if sum > 0 {
                out.push((key.into_inner(), sum));
            }
        }
        out
    }

    /// Hash of the resting state: every level's price and its FIFO of
    /// `(order_id, quantity)` pairs, both sides. Identical streams produce
    /// identical hashes; a submit-then-cancel round trip leaves it unchanged.
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for (key, level) in &self.bids {
            key.0.into_inner().to_bits().hash(&mut hasher);
            let mut idx = level.head;
            while idx != NIL {
                self.pool[idx].order_id.hash(&mut hasher);
                self.pool[idx].quantity.hash(&mut hasher);
                idx = self.pool[idx].next;
            }
        }
        u64::MAX.hash(&mut hasher); // side separator
        for (key, level) in &self.asks {
            key.into_inner().to_bits().hash(&mut hasher);
            let mut idx = level.head;
            while idx != NIL {
                self.pool[idx].order_id.hash(&mut hasher);
                self.pool[idx].quantity.hash(&mut hasher);
                idx = self.pool[idx].next;
            }
        }
        hasher.finish()
    }

    /// Walk every structure and panic on any broken invariant: each indexed
    /// order is active, linked into exactly the level its ref names, on the
    /// stated side; no empty level is present in a map; link chains are
    /// consistent in both directions. Test support.
    pub fn assert_consistent(&self) {
        let mut linked = 0usize;
        for (side, levels) in [
            (Side::Buy, self.bids.iter().map(|(k, l)| (k.0.into_inner(), l)).collect::<Vec<_>>()),
            (Side::Sell, self.asks.iter().map(|(k, l)| (k.into_inner(), l)).collect::<Vec<_>>()),
        ] {
            for (price, level) in levels {
                assert!(!level.is_empty(), "empty level in map at {price}");
                let mut idx = level.head;
                let mut prev = NIL;
                while idx != NIL {
                    let node = &self.pool[idx];
                    assert!(node.active, "inactive node linked at {price}");
                    assert_eq!(node.prev, prev, "broken back link at {price}");
                    assert_eq!(node.side, side, "node on wrong side at {price}");
                    assert_eq!(node.price, price, "node at wrong level");
                    let r = self
                        .order_index
                        .get(&node.order_id)
                        .expect("linked order missing from index");
                    assert_eq!(r.idx, idx, "index points at wrong slot");
                    linked += 1;
                    prev = idx;
                    idx = node.next;
                }
                assert_eq!(level.tail, prev, "tail does not match last node");
            }
        }
        assert_eq!(linked, self.order_index.len(), "index size != linked orders");
        assert_eq!(linked, self.pool.in_use(), "pool in_use != linked orders");
    }
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook")
            .field("symbol", &self.symbol)
            .field("bid_levels", &self.bids.len())
            .field("ask_levels", &self.asks.len())
            .field("orders", &self.order_index.len())
            .finish()
    }
}
