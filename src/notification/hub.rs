//! Process-wide notification hub.
//!
//! The hub is created once at startup and shared by reference with every producer and consumer.
//! Which conduits are live is decided here, from `HubOptions`; the rest stay disabled so that
//! publishing to them is a no-op.

use super::conduit::Conduit;
use super::types::{BlockConnected, NewMempoolTx, ReorgInstruction};
use crate::chain::ChainHeight;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Buffer of the block-connected conduits of non-blocking backends.
pub const BLOCK_CONNECTED_BUFFER: usize = 64;
/// Buffer of the node and database height status conduits.
pub const HEIGHT_BUFFER: usize = 64;
/// Buffer of the mempool monitor conduit.
pub const MEMPOOL_BUFFER: usize = 48;
/// Buffer of the explorer and secondary-store mempool conduits.
pub const EXPLORER_MEMPOOL_BUFFER: usize = 70;

/// Which notification paths are required.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubOptions {
	/// Feed the mempool monitor.
	pub monitor_mempool: bool,
	/// Feed the relational store and its mempool cache.
	pub enable_relational_store: bool,
	/// Feed the stake-specific store. Its conduits are always blocking.
	pub enable_stake_store: bool,
	/// Feed the general block-data collector.
	pub collect_block_data: bool,
	/// Buffer for the reorg conduits of lower-criticality backends; 0 keeps them blocking.
	pub reorg_buffer: usize,
}

pub struct NotificationHub {
	pub block_connected: Conduit<BlockConnected>,
	pub block_connected_embedded: Conduit<BlockConnected>,
	pub block_connected_relational: Conduit<BlockConnected>,
	pub block_connected_stake: Conduit<BlockConnected>,

	pub reorg_block_data: Conduit<ReorgInstruction>,
	pub reorg_embedded: Conduit<ReorgInstruction>,
	pub reorg_relational: Conduit<ReorgInstruction>,
	pub reorg_stake: Conduit<ReorgInstruction>,

	pub node_height: Conduit<ChainHeight>,
	pub db_height: Conduit<ChainHeight>,

	pub mempool_tx: Conduit<NewMempoolTx>,
	pub explorer_mempool_tx: Conduit<NewMempoolTx>,
	pub secondary_mempool_tx: Conduit<NewMempoolTx>,

	closed: AtomicBool,
}

impl NotificationHub {
	pub fn create(options: HubOptions) -> Self {
		let relational = options.enable_relational_store;
		let block_data = options.collect_block_data;
		let stake = options.enable_stake_store;
		let reorg_buffer = options.reorg_buffer;

		info!(
			"Creating notification hub (mempool: {}, relational: {}, stake: {}, block data: {})",
			options.monitor_mempool, relational, stake, block_data
		);

		Self {
			block_connected: Conduit::new("block_connected", BLOCK_CONNECTED_BUFFER, block_data),
			block_connected_embedded: Conduit::new(
				"block_connected_embedded",
				BLOCK_CONNECTED_BUFFER,
				true,
			),
			block_connected_relational: Conduit::new(
				"block_connected_relational",
				BLOCK_CONNECTED_BUFFER,
				relational,
			),
			block_connected_stake: Conduit::new("block_connected_stake", 0, stake),

			reorg_block_data: Conduit::new("reorg_block_data", reorg_buffer, block_data),
			reorg_embedded: Conduit::new("reorg_embedded", reorg_buffer, true),
			reorg_relational: Conduit::new("reorg_relational", reorg_buffer, relational),
			reorg_stake: Conduit::new("reorg_stake", 0, stake),

			node_height: Conduit::new("node_height", HEIGHT_BUFFER, true),
			db_height: Conduit::new("db_height", HEIGHT_BUFFER, true),

			mempool_tx: Conduit::new("mempool_tx", MEMPOOL_BUFFER, options.monitor_mempool),
			explorer_mempool_tx: Conduit::new(
				"explorer_mempool_tx",
				EXPLORER_MEMPOOL_BUFFER,
				true,
			),
			secondary_mempool_tx: Conduit::new(
				"secondary_mempool_tx",
				EXPLORER_MEMPOOL_BUFFER,
				relational,
			),

			closed: AtomicBool::new(false),
		}
	}

	/// Block-connected conduits in publication order.
	pub fn block_connected_conduits(&self) -> [&Conduit<BlockConnected>; 4] {
		[
			&self.block_connected,
			&self.block_connected_embedded,
			&self.block_connected_relational,
			&self.block_connected_stake,
		]
	}

	/// Reorg conduits in publication order.
	pub fn reorg_conduits(&self) -> [&Conduit<ReorgInstruction>; 4] {
		[
			&self.reorg_block_data,
			&self.reorg_embedded,
			&self.reorg_relational,
			&self.reorg_stake,
		]
	}

	pub fn mempool_conduits(&self) -> [&Conduit<NewMempoolTx>; 3] {
		[
			&self.mempool_tx,
			&self.explorer_mempool_tx,
			&self.secondary_mempool_tx,
		]
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Close every enabled conduit. Only the first call has any effect.
	pub fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}

		let mut results = Vec::new();
		results.extend(
			self.block_connected_conduits()
				.into_iter()
				.filter(|c| c.is_enabled())
				.map(|c| c.close()),
		);
		results.extend(
			self.reorg_conduits()
				.into_iter()
				.filter(|c| c.is_enabled())
				.map(|c| c.close()),
		);
		results.extend(
			[&self.node_height, &self.db_height]
				.into_iter()
				.filter(|c| c.is_enabled())
				.map(|c| c.close()),
		);
		results.extend(
			self.mempool_conduits()
				.into_iter()
				.filter(|c| c.is_enabled())
				.map(|c| c.close()),
		);

		for err in results.into_iter().filter_map(Result::err) {
			warn!("Conduit closed outside the hub: {}", err);
		}
		info!("Notification hub closed");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::notification::ConduitError;

	#[test]
	fn options_select_enabled_conduits() {
		let hub = NotificationHub::create(HubOptions::default());
		assert!(hub.block_connected_embedded.is_enabled());
		assert!(hub.explorer_mempool_tx.is_enabled());
		assert!(!hub.mempool_tx.is_enabled());
		assert!(!hub.reorg_relational.is_enabled());
		assert!(!hub.secondary_mempool_tx.is_enabled());
		assert!(!hub.block_connected_stake.is_enabled());

		let hub = NotificationHub::create(HubOptions {
			monitor_mempool: true,
			enable_relational_store: true,
			enable_stake_store: true,
			..Default::default()
		});
		assert!(hub.mempool_tx.is_enabled());
		assert_eq!(hub.mempool_tx.capacity(), MEMPOOL_BUFFER);
		assert!(hub.block_connected_relational.is_enabled());
		assert!(hub.secondary_mempool_tx.is_enabled());
		assert_eq!(hub.block_connected_stake.capacity(), 0);
	}

	#[test]
	fn stake_reorg_stays_blocking_with_reorg_buffer() {
		let hub = NotificationHub::create(HubOptions {
			enable_stake_store: true,
			reorg_buffer: 8,
			..Default::default()
		});
		assert_eq!(hub.reorg_embedded.capacity(), 8);
		assert_eq!(hub.reorg_stake.capacity(), 0);
	}

	#[tokio::test]
	async fn close_is_idempotent() {
		let hub = NotificationHub::create(HubOptions::default());
		hub.close();
		hub.close();
		assert!(hub.is_closed());
		assert_eq!(
			hub.node_height.publish(5).await,
			Err(ConduitError::Closed("node_height"))
		);
		// Disabled conduits stay inert after close.
		hub.mempool_tx
			.publish(NewMempoolTx {
				txid: "t".into(),
				amount: crate::utils::Amount::ZERO,
			})
			.await
			.unwrap();
	}
}
