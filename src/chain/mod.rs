//! Chain-server integration module
//!
//! This module provides the client, notification subscription and types for interacting with the
//! trusted chain-server. The chain-server is the sole source of truth: this service reads blocks,
//! headers and transactions from it and never validates them against consensus rules.

/// JSON-RPC client and the `ChainSource` abstraction
mod client;
/// Compact difficulty helpers
pub mod difficulty;
/// Websocket push notifications
pub mod notifications;
/// Type definitions for chain-server results
mod types;
/// API version negotiation
pub mod version;

pub use client::{
	CHAIN_SERVER_API_KEY, ChainServerClient, ChainSource, ConnectionConfig, DEFAULT_REQUEST_TIMEOUT,
	TlsMode, check_version, normalize_header,
};
pub use notifications::{NotificationFilter, PushNotification, subscribe_notifications};
pub use types::*;
pub use version::{REQUIRED_CHAIN_SERVER_API, Semver};
