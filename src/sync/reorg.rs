//! Reorganization detection and sequencing.
//!
//! The coordinator compares the locally held chain with the chain-server's main chain, height by
//! height from the local tip down, until both agree on a block. Everything above that common
//! ancestor locally is orphaned; everything above it on the chain-server replaces it. The walk is
//! bounded: a fork deeper than `max_depth` is an error, never a silent resync.
//!
//! Applying an event only publishes instructions. Each backend performs its own rollback and
//! reapply from its reorg conduit.

use super::SyncError;
use crate::backend::LocalChain;
use crate::chain::{ChainHeight, ChainSource};
use crate::notification::{Conduit, NotificationHub, ReorgInstruction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default bound on the number of orphaned blocks.
pub const DEFAULT_MAX_REORG_DEPTH: u64 = 256;

/// A detected fork.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgEvent {
	pub ancestor_height: ChainHeight,
	pub ancestor_hash: String,
	/// Local blocks to undo, tip first.
	pub orphans: Vec<(ChainHeight, String)>,
	/// Chain-server blocks to apply, lowest first.
	pub replacements: Vec<(ChainHeight, String)>,
}

impl ReorgEvent {
	pub fn depth(&self) -> usize {
		self.orphans.len()
	}

	/// Instructions in delivery order: every rollback, then every apply.
	pub fn instructions(&self) -> impl Iterator<Item = ReorgInstruction> + '_ {
		let rollbacks = self
			.orphans
			.iter()
			.map(|(height, hash)| ReorgInstruction::Rollback {
				height: *height,
				hash: hash.clone(),
			});
		let applies = self
			.replacements
			.iter()
			.map(|(height, hash)| ReorgInstruction::Apply {
				height: *height,
				hash: hash.clone(),
			});
		rollbacks.chain(applies)
	}
}

#[derive(Debug, Clone)]
pub struct ReorgCoordinator {
	max_depth: u64,
}

impl Default for ReorgCoordinator {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_REORG_DEPTH)
	}
}

impl ReorgCoordinator {
	pub fn new(max_depth: u64) -> Self {
		Self { max_depth }
	}

	/// Find the fork between the local chain (tip at `local_tip`) and the chain-server's main chain
	/// (tip at `new_tip`). Returns `None` when the local tip is on the main chain.
	pub async fn detect<C, L>(
		&self,
		new_tip: ChainHeight,
		local_tip: ChainHeight,
		chain: &C,
		local: &L,
	) -> Result<Option<ReorgEvent>, SyncError>
	where
		C: ChainSource + ?Sized,
		L: LocalChain + ?Sized,
	{
		if local_tip < 0 {
			return Ok(None);
		}

		let mut orphans = Vec::new();
		let mut height = local_tip;
		let ancestor_hash = loop {
			if height < 0 {
				// Nothing in common all the way down.
				return Err(SyncError::ReorgDepthExceeded {
					depth: orphans.len() as u64,
					max: self.max_depth,
				});
			}

			let local_hash = local.local_block_hash(height).await?;
			let remote_hash = if height <= new_tip {
				match chain.get_block_hash(height).await {
					Ok(hash) => Some(hash),
					Err(e) if e.is_not_found() => None,
					Err(e) => return Err(SyncError::Chain(e)),
				}
			} else {
				None
			};

			match (local_hash, remote_hash) {
				(Some(local_hash), Some(remote_hash)) if local_hash == remote_hash => {
					break local_hash;
				}
				(Some(local_hash), _) => orphans.push((height, local_hash)),
				(None, _) => {
					return Err(SyncError::ReorgDepthExceeded {
						depth: orphans.len() as u64 + 1,
						max: self.max_depth,
					});
				}
			}

			if orphans.len() as u64 > self.max_depth {
				return Err(SyncError::ReorgDepthExceeded {
					depth: orphans.len() as u64,
					max: self.max_depth,
				});
			}
			height -= 1;
		};

		if orphans.is_empty() {
			return Ok(None);
		}

		let ancestor_height = height;
		let mut replacements = Vec::new();
		for height in ancestor_height + 1..=new_tip {
			replacements.push((height, chain.get_block_hash(height).await?));
		}

		info!(
			"Reorg detected: {} orphaned blocks above common ancestor {} at height {}, {} replacements",
			orphans.len(),
			ancestor_hash,
			ancestor_height,
			replacements.len()
		);
		Ok(Some(ReorgEvent {
			ancestor_height,
			ancestor_hash,
			orphans,
			replacements,
		}))
	}

	/// Publish `event` onto one reorg conduit: every rollback, then every apply.
	///
	/// Shutdown is checked before each publish; a publish in progress is abandoned on shutdown.
	pub async fn apply(
		&self,
		event: &ReorgEvent,
		conduit: &Conduit<ReorgInstruction>,
		cancel: &CancellationToken,
	) -> Result<(), SyncError> {
		if !conduit.is_enabled() {
			return Ok(());
		}

		for instruction in event.instructions() {
			if cancel.is_cancelled() {
				return Err(SyncError::Interrupted);
			}
			debug!("Publishing {:?} on {}", instruction, conduit.name());
			tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(SyncError::Interrupted),
				result = conduit.publish(instruction) => result?,
			}
		}
		Ok(())
	}

	/// Publish `event` to every enabled reorg conduit of the hub, one backend after another.
	pub async fn apply_all(
		&self,
		event: &ReorgEvent,
		hub: &NotificationHub,
		cancel: &CancellationToken,
	) -> Result<(), SyncError> {
		for conduit in hub.reorg_conduits() {
			if let Err(e) = self.apply(event, conduit, cancel).await {
				warn!("Reorg publication to {} failed: {}", conduit.name(), e);
				return Err(e);
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::{MemoryBackend, SyncBackend};
	use crate::sync::testing::{MockChain, hash_for};
	use std::sync::Arc;

	async fn local_chain(chain: &MockChain, from: ChainHeight, to: ChainHeight) -> MemoryBackend {
		let backend = MemoryBackend::new("embedded");
		for height in from..=to {
			backend.apply_block(&chain.block(height)).await.unwrap();
		}
		backend
	}

	async fn forked_at_98() -> (MockChain, MemoryBackend) {
		let chain = MockChain::linear("a", 90, 100);
		let backend = local_chain(&chain, 90, 100).await;
		chain.extend("b", 99, 102);
		(chain, backend)
	}

	#[tokio::test]
	async fn detects_fork_with_contiguous_lists() {
		let (chain, backend) = forked_at_98().await;

		let event = ReorgCoordinator::new(10)
			.detect(102, 100, &chain, &backend)
			.await
			.unwrap()
			.unwrap();

		assert_eq!(event.ancestor_height, 98);
		assert_eq!(event.ancestor_hash, hash_for("a", 98));
		assert_eq!(
			event.orphans,
			vec![(100, hash_for("a", 100)), (99, hash_for("a", 99))]
		);
		assert_eq!(
			event.replacements.iter().map(|(h, _)| *h).collect::<Vec<_>>(),
			vec![99, 100, 101, 102]
		);
		assert!(event.replacements.iter().all(|(h, hash)| *hash == hash_for("b", *h)));
	}

	#[tokio::test]
	async fn no_event_when_local_tip_is_on_main_chain() {
		let chain = MockChain::linear("a", 0, 20);
		let backend = local_chain(&chain, 0, 15).await;
		let detected = ReorgCoordinator::default()
			.detect(20, 15, &chain, &backend)
			.await
			.unwrap();
		assert_eq!(detected, None);
	}

	#[tokio::test]
	async fn deep_fork_is_an_error() {
		let (chain, backend) = forked_at_98().await;
		let result = ReorgCoordinator::new(1)
			.detect(102, 100, &chain, &backend)
			.await;
		assert!(matches!(
			result,
			Err(SyncError::ReorgDepthExceeded { depth: 2, max: 1 })
		));
	}

	#[tokio::test]
	async fn shorter_new_chain_orphans_blocks_above_its_tip() {
		let chain = MockChain::linear("a", 0, 10);
		let backend = local_chain(&chain, 0, 10).await;
		chain.extend("b", 9, 9);

		let event = ReorgCoordinator::default()
			.detect(9, 10, &chain, &backend)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(event.ancestor_height, 8);
		assert_eq!(event.orphans.len(), 2);
		assert_eq!(event.replacements, vec![(9, hash_for("b", 9))]);
	}

	#[tokio::test]
	async fn publishes_rollbacks_before_applies() {
		let (chain, backend) = forked_at_98().await;
		let coordinator = ReorgCoordinator::new(10);
		let event = coordinator
			.detect(102, 100, &chain, &backend)
			.await
			.unwrap()
			.unwrap();

		let conduit = Arc::new(Conduit::new("reorg_stake", 0, true));
		let mut sub = conduit.subscribe().unwrap();
		let publisher = {
			let conduit = conduit.clone();
			let event = event.clone();
			tokio::spawn(async move {
				coordinator
					.apply(&event, &conduit, &CancellationToken::new())
					.await
			})
		};

		let mut heights = Vec::new();
		for _ in 0..6 {
			let instruction = sub.recv().await.unwrap();
			let is_rollback = matches!(instruction, ReorgInstruction::Rollback { .. });
			heights.push((is_rollback, instruction.height()));
		}
		publisher.await.unwrap().unwrap();
		assert_eq!(
			heights,
			vec![
				(true, 100),
				(true, 99),
				(false, 99),
				(false, 100),
				(false, 101),
				(false, 102)
			]
		);
	}

	#[tokio::test]
	async fn cancelled_apply_publishes_nothing() {
		let (chain, backend) = forked_at_98().await;
		let coordinator = ReorgCoordinator::new(10);
		let event = coordinator
			.detect(102, 100, &chain, &backend)
			.await
			.unwrap()
			.unwrap();

		let conduit = Conduit::new("reorg_embedded", 8, true);
		let mut sub = conduit.subscribe().unwrap();
		let cancel = CancellationToken::new();
		cancel.cancel();
		assert!(matches!(
			coordinator.apply(&event, &conduit, &cancel).await,
			Err(SyncError::Interrupted)
		));
		conduit.close().unwrap();
		assert_eq!(sub.recv().await, None);
	}
}
