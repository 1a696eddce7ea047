//! Synchronization and reorganization engine.
//!
//! This module drives backends from their last applied height to the chain-server's tip, detects
//! chain divergence and sequences rollback/reapply instructions, and runs the long-lived tasks that
//! connect push notifications to backend consumers:
//!
//! - `SyncEngine`: resumable, cancellable catch-up of one backend
//! - `ReorgCoordinator`: common-ancestor search and ordered reorg publication
//! - `ChainMonitor`: push notifications -> hub
//! - consumer loops: hub conduits -> backend
//!
//! Errors never abort the process from here; callers receive partial progress together with the
//! error and decide what to do.

/// Backend consumer loops
pub mod consumers;
/// Catch-up sync of one backend
pub mod engine;
/// Push notification producer
pub mod monitor;
/// Sync session progress accounting
pub mod progress_tracker;
/// Reorg detection and sequencing
pub mod reorg;
/// Shutdown signal and completion barrier
pub mod shutdown;
#[cfg(test)]
pub(crate) mod testing;

use crate::backend::BackendError;
use crate::chain::{ChainError, ChainHeight};
use crate::notification::ConduitError;

pub use consumers::{run_block_connected_consumer, run_mempool_consumer, run_reorg_consumer};
pub use engine::{SyncEngine, SyncOutcome};
pub use monitor::ChainMonitor;
pub use progress_tracker::{SyncProgressTracker, SyncStats};
pub use reorg::{ReorgCoordinator, ReorgEvent};
pub use shutdown::{CompletionBarrier, ShutdownSignal};

/// Error types for sync and reorg operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Failed to fetch block at height {height}: {source}")]
	Fetch {
		height: ChainHeight,
		#[source]
		source: ChainError,
	},

	#[error("Backend failed to apply block at height {height}: {source}")]
	BackendApply {
		height: ChainHeight,
		#[source]
		source: BackendError,
	},

	#[error("Reorg depth {depth} exceeds the supported maximum of {max}")]
	ReorgDepthExceeded { depth: u64, max: u64 },

	#[error("Publish error: {0}")]
	Publish(#[from] ConduitError),

	#[error("Chain error: {0}")]
	Chain(#[from] ChainError),

	#[error("Backend error: {0}")]
	Backend(#[from] BackendError),

	#[error("Interrupted by shutdown")]
	Interrupted,
}

impl SyncError {
	/// Conditions that must halt the process rather than be retried.
	pub fn is_fatal(&self) -> bool {
		matches!(self, SyncError::ReorgDepthExceeded { .. })
	}
}
