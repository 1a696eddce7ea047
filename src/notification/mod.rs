//! Notification fan-out.
//!
//! The `NotificationHub` owns one typed conduit per notification path. Producers (the sync engine,
//! the reorg coordinator and the push-notification monitor) publish into it; each backend consumer
//! owns the receiving side of its own conduits. Delivery is FIFO within a conduit and unordered
//! across conduits.

/// Typed channels with enabled flag and fixed capacity
pub mod conduit;
/// Hub construction and shutdown
pub mod hub;
/// Conduit payloads
pub mod types;

pub use conduit::{Conduit, ConduitError, Subscription};
pub use hub::{HubOptions, NotificationHub};
pub use types::{BlockConnected, NewMempoolTx, ReorgInstruction};
