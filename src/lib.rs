//! Chain index synchronization core.
//!
//! Pulls chain state from a single trusted chain-server, normalizes it, and keeps storage backends
//! consistent with the chain-server's view, including across reorganizations.
//!
//! - [`chain`]: chain-server client, push notifications and raw result types
//! - [`convert`]: raw results to canonical block and transaction shapes
//! - [`notification`]: the conduit hub distributing chain events to backend consumers
//! - [`sync`]: catch-up sync, reorg coordination, consumer loops and shutdown
//! - [`backend`]: the capabilities a storage backend provides, and an embedded implementation

pub mod backend;
pub mod chain;
pub mod config;
pub mod convert;
pub mod notification;
pub mod sync;
pub mod utils;
