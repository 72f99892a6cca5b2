//! # simex
//!
//! A single-instrument electronic trading simulator: a price-time priority
//! limit order book and matching engine, per-user mark-to-market PnL, and a
//! framed binary market-data/execution feed, plus the synthetic flow and
//! strategy clients that drive it.
//!
//! ## Design principles
//!
//! - **Single-writer engine**: one thread owns the book, pool, and PnL
//!   state exclusively; the two SPSC queues are the only shared state
//! - **Pool-backed intrusive queues**: resting orders live in a
//!   preallocated slab addressed by 32-bit indices, giving O(1) cancel and
//!   no per-order allocation
//! - **Causal feed**: every output caused by one input is emitted before
//!   any output of the next input
//!
//! ## Architecture
//!
//! ```text
//! [wire clients] --> [TCP intake] --> [SPSC in] --> [engine thread]
//!                                                        |
//! [wire clients] <-- [broadcast]  <-- [SPSC out] <-------+
//! ```

pub mod book;
pub mod bot;
pub mod bs;
pub mod config;
pub mod gbm;
pub mod level;
pub mod mc;
pub mod messages;
pub mod net;
pub mod pnl;
pub mod pool;
pub mod server;
pub mod sim;
pub mod spsc;
pub mod wire;

// Re-exports for convenience
pub use book::OrderBook;
pub use config::Config;
pub use messages::{
    Ack, AckStatus, CancelRequest, ClientMessage, L2Update, MsgType, NewOrder, Order, PnlUpdate,
    ServerMessage, Side, TopOfBook, Trade,
};
pub use net::{FeedServer, WireClient};
pub use pnl::PnlEngine;
pub use pool::{OrderPool, PoolIndex, NIL};
pub use server::{spawn, EngineConfig, EngineCore, FeedReader, MatchingServer, OrderGate};
