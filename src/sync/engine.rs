//! Catch-up synchronization of a single backend.
//!
//! `SyncEngine::sync` walks heights from where the backend left off to the chain-server's tip,
//! fetching and applying one block at a time. Progress is never rolled back: on failure the caller
//! gets the last applied height together with the error, and a later call resumes from there.

use super::SyncError;
use super::progress_tracker::{DEFAULT_PROGRESS_LOG_INTERVAL, SyncProgressTracker};
use crate::backend::SyncBackend;
use crate::chain::{ChainHeight, ChainSource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a sync run. `reached_height` is valid even when `error` is set.
#[derive(Debug)]
pub struct SyncOutcome {
	pub reached_height: ChainHeight,
	pub error: Option<SyncError>,
}

impl SyncOutcome {
	pub fn is_ok(&self) -> bool {
		self.error.is_none()
	}
}

#[derive(Debug, Clone)]
pub struct SyncEngine {
	progress_log_interval: u64,
}

impl Default for SyncEngine {
	fn default() -> Self {
		Self::new(DEFAULT_PROGRESS_LOG_INTERVAL)
	}
}

impl SyncEngine {
	pub fn new(progress_log_interval: u64) -> Self {
		Self {
			progress_log_interval,
		}
	}

	/// Drive `backend` from `max(start_height, last synced + 1)` to the chain-server tip.
	///
	/// `cancel` is checked after every applied block; a cancelled run stops without error.
	pub async fn sync<B, C>(
		&self,
		backend: &B,
		chain: &C,
		cancel: &CancellationToken,
		start_height: ChainHeight,
	) -> SyncOutcome
	where
		B: SyncBackend + ?Sized,
		C: ChainSource + ?Sized,
	{
		let last_synced = backend.last_synced_height().await;
		let from = start_height.max(last_synced + 1);
		let mut reached = from - 1;

		let tip = match chain.get_best_block().await {
			Ok((_, tip)) => tip,
			Err(e) => {
				return SyncOutcome {
					reached_height: reached,
					error: Some(SyncError::Chain(e)),
				};
			}
		};

		if from > tip {
			debug!("{} is current at height {} (tip {})", backend.name(), reached, tip);
			return SyncOutcome {
				reached_height: reached,
				error: None,
			};
		}

		info!("Syncing {} from height {} to {}", backend.name(), from, tip);
		let mut tracker = SyncProgressTracker::new(backend.name(), from, self.progress_log_interval);

		for height in from..=tip {
			let block = match chain
				.get_block_verbose_by_height(height, backend.wants_transactions())
				.await
			{
				Ok(block) => block,
				Err(source) => {
					warn!("{} sync stopped at {}: fetch failed", backend.name(), reached);
					return SyncOutcome {
						reached_height: reached,
						error: Some(SyncError::Fetch { height, source }),
					};
				}
			};

			if let Err(source) = backend.apply_block(&block).await {
				warn!("{} sync stopped at {}: apply failed", backend.name(), reached);
				return SyncOutcome {
					reached_height: reached,
					error: Some(SyncError::BackendApply { height, source }),
				};
			}

			reached = height;
			tracker.record_block(height, block.tx.len() + block.stx.len());
			tracker.log_progress(false, tip);

			if cancel.is_cancelled() {
				info!("{} sync interrupted at height {}", backend.name(), reached);
				break;
			}
		}

		tracker.log_progress(true, tip);
		tracker.validate_completion();
		SyncOutcome {
			reached_height: reached,
			error: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::{BackendError, MemoryBackend};
	use crate::sync::testing::MockChain;

	#[tokio::test]
	async fn fetch_error_reports_last_applied_height() {
		let chain = MockChain::linear("a", 50, 60);
		chain.fail_fetch_at(56);
		let backend = MemoryBackend::new("embedded");

		let outcome = SyncEngine::default()
			.sync(&backend, &chain, &CancellationToken::new(), 50)
			.await;
		assert_eq!(outcome.reached_height, 55);
		assert!(matches!(
			outcome.error,
			Some(SyncError::Fetch { height: 56, .. })
		));
		assert_eq!(backend.last_synced_height().await, 55);
	}

	#[tokio::test]
	async fn resumes_after_partial_progress() {
		let chain = MockChain::linear("a", 50, 60);
		chain.fail_fetch_at(56);
		let backend = MemoryBackend::new("embedded");
		let engine = SyncEngine::default();
		let cancel = CancellationToken::new();
		engine.sync(&backend, &chain, &cancel, 50).await;

		chain.clear_failure();
		let outcome = engine.sync(&backend, &chain, &cancel, 50).await;
		assert!(outcome.is_ok());
		assert_eq!(outcome.reached_height, 60);
	}

	#[tokio::test]
	async fn start_beyond_tip_returns_immediately() {
		let chain = MockChain::linear("a", 0, 10);
		let backend = MemoryBackend::new("embedded");
		let outcome = SyncEngine::default()
			.sync(&backend, &chain, &CancellationToken::new(), 20)
			.await;
		assert!(outcome.is_ok());
		assert_eq!(outcome.reached_height, 19);
		assert_eq!(backend.last_synced_height().await, -1);
	}

	#[tokio::test]
	async fn prior_height_wins_over_lower_start() {
		let chain = MockChain::linear("a", 0, 10);
		let backend = MemoryBackend::new("embedded");
		let engine = SyncEngine::default();
		let cancel = CancellationToken::new();
		engine.sync(&backend, &chain, &cancel, 0).await;

		let outcome = engine.sync(&backend, &chain, &cancel, 3).await;
		assert!(outcome.is_ok());
		assert_eq!(outcome.reached_height, 10);
	}

	#[tokio::test]
	async fn cancellation_stops_after_current_block() {
		let chain = MockChain::linear("a", 0, 10);
		let backend = MemoryBackend::new("embedded");
		let cancel = CancellationToken::new();
		cancel.cancel();

		let outcome = SyncEngine::default().sync(&backend, &chain, &cancel, 0).await;
		assert!(outcome.is_ok());
		assert_eq!(outcome.reached_height, 0);
	}

	#[tokio::test]
	async fn apply_error_keeps_progress() {
		let chain = MockChain::linear("a", 0, 5);
		let backend = MemoryBackend::new("embedded");
		let cancel = CancellationToken::new();
		SyncEngine::default().sync(&backend, &chain, &cancel, 0).await;

		// The chain-server switches to a fork the backend has not rolled back to.
		chain.extend("b", 3, 8);
		let outcome = SyncEngine::default().sync(&backend, &chain, &cancel, 0).await;
		assert_eq!(outcome.reached_height, 5);
		assert!(matches!(
			outcome.error,
			Some(SyncError::BackendApply {
				height: 6,
				source: BackendError::Apply { .. }
			})
		));
	}
}
