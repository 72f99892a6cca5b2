//! Message types flowing between clients, the matching engine, and the feed.
//!
//! Client messages arrive over the input queue; server messages leave over
//! the output queue in causal order. The wire layouts for all of these live
//! in [`crate::wire`].

/// Order side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    Buy = 0,
    Sell = 1,
}

impl Side {
    /// Returns the opposite side.
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Wire encoding (0 = buy, 1 = sell).
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse the wire encoding.
    #[inline]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Side::Buy),
            1 => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Wire message type tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    NewOrder = 1,
    Cancel = 2,
    Trade = 3,
    Ack = 4,
    TopOfBook = 5,
    L2Update = 6,
    PnlUpdate = 7,
}

impl MsgType {
    #[inline]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(MsgType::NewOrder),
            2 => Some(MsgType::Cancel),
            3 => Some(MsgType::Trade),
            4 => Some(MsgType::Ack),
            5 => Some(MsgType::TopOfBook),
            6 => Some(MsgType::L2Update),
            7 => Some(MsgType::PnlUpdate),
            _ => None,
        }
    }
}

// ============================================================================
// Client -> Engine
// ============================================================================

/// Submit a new limit order. The engine assigns the order id.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NewOrder {
    pub user_id: u64,
    pub side: Side,
    pub price: f64,
    pub quantity: u64,
}

/// Cancel a resting order by id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CancelRequest {
    pub order_id: u64,
}

/// Input messages drained by the engine loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClientMessage {
    NewOrder(NewOrder),
    Cancel(CancelRequest),
}

// ============================================================================
// Engine internal
// ============================================================================

/// An order as the book sees it. `order_id == 0` and `timestamp == 0` mean
/// "engine assigns".
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Order {
    pub order_id: u64,
    pub user_id: u64,
    pub instrument_id: u32,
    pub side: Side,
    pub price: f64,
    pub quantity: u64,
    pub timestamp: u64,
}

// ============================================================================
// Engine -> World
// ============================================================================

/// An execution between an incoming order and a resting order. The price is
/// always the resting (maker) price.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trade {
    pub trade_id: u64,
    pub buy_order_id: u64,
    pub sell_order_id: u64,
    pub buy_user_id: u64,
    pub sell_user_id: u64,
    pub price: f64,
    pub quantity: u64,
    pub instrument_id: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AckStatus {
    Ok = 0,
    Error = 1,
}

/// Acknowledgement of a client message. For NEW_ORDER, `order_id` is the
/// assigned id of the resting residual, or 0 when the order filled
/// completely (or was a zero-quantity no-op).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ack {
    pub status: AckStatus,
    pub kind: MsgType,
    pub order_id: u64,
}

/// Best bid and ask with aggregate resting quantity at each.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TopOfBook {
    pub has_bid: bool,
    pub bid_price: f64,
    pub bid_quantity: u64,
    pub has_ask: bool,
    pub ask_price: f64,
    pub ask_quantity: u64,
}

impl TopOfBook {
    /// Reference mid price: the two-sided midpoint when both sides are
    /// present, the single present side otherwise, `None` for an empty book.
    #[inline]
    pub fn mid(&self) -> Option<f64> {
        match (self.has_bid, self.has_ask) {
            (true, true) => Some(0.5 * (self.bid_price + self.ask_price)),
            (true, false) => Some(self.bid_price),
            (false, true) => Some(self.ask_price),
            (false, false) => None,
        }
    }
}

/// Change to the aggregate quantity at one price on one side. A quantity of
/// zero means the level is gone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct L2Update {
    pub side: Side,
    pub price: f64,
    pub quantity: u64,
}

/// Per-user PnL snapshot. `equity == realized + unrealized`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PnlUpdate {
    pub user_id: u32,
    pub realized: f64,
    pub unrealized: f64,
    pub position: f64,
    pub avg_price: f64,
    pub equity: f64,
}

/// Output messages pushed onto the feed queue, in causal order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ServerMessage {
    Trade(Trade),
    Ack(Ack),
    TopOfBook(TopOfBook),
    L2(L2Update),
    Pnl(PnlUpdate),
}
