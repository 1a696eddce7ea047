//! Push notification producer.
//!
//! The `ChainMonitor` holds the websocket subscription to the chain-server and turns its
//! notifications into hub messages: node height updates, reorg instructions when the reference
//! backend's chain diverges, block-connected announcements, and mempool transactions. The
//! subscription is re-established with exponential backoff whenever it drops.

use super::SyncError;
use super::reorg::ReorgCoordinator;
use crate::backend::{LocalChain, SyncBackend};
use crate::chain::{
	ChainError, ChainHeight, ChainSource, ConnectionConfig, NotificationFilter, PushNotification,
	subscribe_notifications,
};
use crate::notification::{BlockConnected, ConduitError, NewMempoolTx, NotificationHub};
use crate::utils::Amount;
use backoff::{ExponentialBackoff, future::retry};
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
	Reconnect,
	Stopped,
}

pub struct ChainMonitor<C: ?Sized, L: ?Sized> {
	chain: Arc<C>,
	/// Backend whose chain is compared against the chain-server for reorg detection.
	reference: Arc<L>,
	hub: Arc<NotificationHub>,
	coordinator: ReorgCoordinator,
	connection: ConnectionConfig,
	filter: NotificationFilter,
}

impl<C, L> ChainMonitor<C, L>
where
	C: ChainSource + ?Sized,
	L: LocalChain + SyncBackend + ?Sized,
{
	pub fn new(
		chain: Arc<C>,
		reference: Arc<L>,
		hub: Arc<NotificationHub>,
		coordinator: ReorgCoordinator,
		connection: ConnectionConfig,
	) -> Self {
		let filter = NotificationFilter {
			blocks: true,
			transactions: hub.mempool_conduits().iter().any(|c| c.is_enabled()),
		};
		Self {
			chain,
			reference,
			hub,
			coordinator,
			connection,
			filter,
		}
	}

	/// Process notifications until shutdown. Only a fatal error ends the loop early.
	pub async fn run(&self, cancel: CancellationToken) -> Result<(), SyncError> {
		loop {
			let policy = ExponentialBackoff {
				max_elapsed_time: None,
				..Default::default()
			};
			let connect = retry(policy, || async {
				subscribe_notifications(&self.connection, self.filter)
					.await
					.map_err(|e| {
						warn!("Notification subscription failed, retrying: {}", e);
						backoff::Error::transient(e)
					})
			});
			let mut stream = tokio::select! {
				_ = cancel.cancelled() => break,
				stream = connect => stream?,
			};
			info!("Listening for chain-server notifications");

			if self.drain(&mut stream, &cancel).await? == StreamEnd::Stopped {
				return Ok(());
			}
		}
		Ok(())
	}

	/// Handle notifications from `stream` until it fails, ends, or shutdown is requested.
	///
	/// Frames that fail to decode are skipped; only a transport or registration failure ends the
	/// subscription.
	async fn drain<S>(&self, stream: &mut S, cancel: &CancellationToken) -> Result<StreamEnd, SyncError>
	where
		S: Stream<Item = Result<PushNotification, ChainError>> + Unpin,
	{
		loop {
			let notification = tokio::select! {
				_ = cancel.cancelled() => return Ok(StreamEnd::Stopped),
				notification = stream.next() => notification,
			};
			match notification {
				Some(Ok(notification)) => {
					if let Err(e) = self.handle(notification, cancel).await {
						if e.is_fatal() {
							error!("Stopping chain monitor: {}", e);
							return Err(e);
						}
						if matches!(e, SyncError::Interrupted) {
							return Ok(StreamEnd::Stopped);
						}
						warn!("Failed to handle notification: {}", e);
					}
				}
				Some(Err(e @ (ChainError::WebSocket(_) | ChainError::Connection(_)))) => {
					warn!("Notification stream error: {}", e);
					return Ok(StreamEnd::Reconnect);
				}
				Some(Err(e)) => warn!("Skipping undecodable notification: {}", e),
				None => {
					warn!("Notification stream ended, reconnecting");
					return Ok(StreamEnd::Reconnect);
				}
			}
		}
	}

	/// Route one push notification into the hub.
	pub async fn handle(
		&self,
		notification: PushNotification,
		cancel: &CancellationToken,
	) -> Result<(), SyncError> {
		match notification {
			PushNotification::BlockConnected { height, .. } => {
				self.block_connected(height, cancel).await
			}
			PushNotification::BlockDisconnected {
				height,
				previous_hash,
			} => {
				// The following blockconnected drives reorg handling.
				debug!(
					"Block at height {} disconnected (parent {})",
					height, previous_hash
				);
				Ok(())
			}
			PushNotification::TxAccepted { txid, amount } => {
				self.mempool_tx(txid, amount);
				Ok(())
			}
		}
	}

	async fn block_connected(
		&self,
		height: ChainHeight,
		cancel: &CancellationToken,
	) -> Result<(), SyncError> {
		match self.hub.node_height.try_publish(height) {
			Ok(()) | Err(ConduitError::Disabled(_)) => {}
			Err(e) => debug!("Node height update not delivered: {}", e),
		}

		let hash = self.chain.get_block_hash(height).await?;
		debug!("Block connected: {} at height {}", hash, height);

		let local_tip = self.reference.last_synced_height().await;
		if let Some(event) = self
			.coordinator
			.detect(height, local_tip, &*self.chain, &*self.reference)
			.await?
		{
			self.coordinator.apply_all(&event, &self.hub, cancel).await?;
		}

		let announcement = BlockConnected { hash, height };
		for conduit in self.hub.block_connected_conduits() {
			if !conduit.is_enabled() {
				continue;
			}
			if cancel.is_cancelled() {
				return Err(SyncError::Interrupted);
			}
			tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(SyncError::Interrupted),
				result = conduit.publish(announcement.clone()) => result?,
			}
		}
		Ok(())
	}

	fn mempool_tx(&self, txid: String, amount: f64) {
		let amount = Amount::from_coin(amount).unwrap_or_else(|e| {
			warn!("Mempool transaction {} has invalid amount: {}", txid, e);
			Amount::ZERO
		});
		let message = NewMempoolTx { txid, amount };
		for conduit in self.hub.mempool_conduits() {
			match conduit.try_publish(message.clone()) {
				Ok(()) | Err(ConduitError::Disabled(_)) => {}
				Err(e) => warn!("Dropping mempool transaction {}: {}", message.txid, e),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::MemoryBackend;
	use crate::chain::TlsMode;
	use crate::notification::{HubOptions, ReorgInstruction};
	use crate::sync::testing::{MockChain, hash_for};
	use std::time::Duration;

	fn monitor(
		chain: Arc<MockChain>,
		backend: Arc<MemoryBackend>,
		hub: Arc<NotificationHub>,
	) -> ChainMonitor<MockChain, MemoryBackend> {
		let connection = ConnectionConfig {
			host: "127.0.0.1:9109".into(),
			user: "user".into(),
			pass: "pass".into(),
			tls: TlsMode::Disabled,
			pow_limit_bits: crate::chain::difficulty::MAINNET_POW_LIMIT_BITS,
			request_timeout: Duration::from_secs(1),
		};
		ChainMonitor::new(chain, backend, hub, ReorgCoordinator::new(10), connection)
	}

	#[tokio::test]
	async fn block_connected_publishes_height_and_announcement() {
		let chain = Arc::new(MockChain::linear("a", 0, 3));
		let backend = Arc::new(MemoryBackend::new("embedded"));
		backend.apply_block(&chain.block(0)).await.unwrap();
		let hub = Arc::new(NotificationHub::create(HubOptions::default()));
		let mut node_height = hub.node_height.subscribe().unwrap();
		let mut blocks = hub.block_connected_embedded.subscribe().unwrap();

		let monitor = monitor(chain, backend, hub.clone());
		monitor
			.handle(
				PushNotification::BlockConnected {
					height: 3,
					previous_hash: hash_for("a", 2),
				},
				&CancellationToken::new(),
			)
			.await
			.unwrap();

		assert_eq!(node_height.recv().await, Some(3));
		assert_eq!(
			blocks.recv().await,
			Some(BlockConnected {
				hash: hash_for("a", 3),
				height: 3,
			})
		);
	}

	#[tokio::test]
	async fn divergence_publishes_reorg_instructions() {
		let chain = Arc::new(MockChain::linear("a", 0, 5));
		let backend = Arc::new(MemoryBackend::new("embedded"));
		for height in 0..=5 {
			backend.apply_block(&chain.block(height)).await.unwrap();
		}
		chain.extend("b", 5, 6);
		let hub = Arc::new(NotificationHub::create(HubOptions {
			reorg_buffer: 16,
			..Default::default()
		}));
		let mut reorgs = hub.reorg_embedded.subscribe().unwrap();

		monitor(chain, backend, hub.clone())
			.handle(
				PushNotification::BlockConnected {
					height: 6,
					previous_hash: hash_for("b", 5),
				},
				&CancellationToken::new(),
			)
			.await
			.unwrap();

		assert_eq!(
			reorgs.recv().await,
			Some(ReorgInstruction::Rollback {
				height: 5,
				hash: hash_for("a", 5),
			})
		);
		assert_eq!(
			reorgs.recv().await,
			Some(ReorgInstruction::Apply {
				height: 5,
				hash: hash_for("b", 5),
			})
		);
		assert_eq!(reorgs.recv().await.map(|i| i.height()), Some(6));
	}

	#[tokio::test]
	async fn mempool_transactions_fan_out_to_enabled_conduits() {
		let chain = Arc::new(MockChain::linear("a", 0, 1));
		let backend = Arc::new(MemoryBackend::new("embedded"));
		let hub = Arc::new(NotificationHub::create(HubOptions {
			monitor_mempool: true,
			..Default::default()
		}));
		let mut mempool = hub.mempool_tx.subscribe().unwrap();
		let mut explorer = hub.explorer_mempool_tx.subscribe().unwrap();
		let mut secondary = hub.secondary_mempool_tx.subscribe().unwrap();

		let monitor = monitor(chain, backend, hub.clone());
		assert!(monitor.filter.transactions);
		monitor
			.handle(
				PushNotification::TxAccepted {
					txid: "beef".into(),
					amount: 1.5,
				},
				&CancellationToken::new(),
			)
			.await
			.unwrap();

		let expected = NewMempoolTx {
			txid: "beef".into(),
			amount: Amount::from_atoms(150_000_000),
		};
		assert_eq!(mempool.recv().await, Some(expected.clone()));
		assert_eq!(explorer.recv().await, Some(expected));
		assert_eq!(secondary.recv().await, None);
	}

	#[tokio::test]
	async fn undecodable_frame_keeps_the_subscription() {
		let chain = Arc::new(MockChain::linear("a", 0, 3));
		let backend = Arc::new(MemoryBackend::new("embedded"));
		backend.apply_block(&chain.block(0)).await.unwrap();
		let hub = Arc::new(NotificationHub::create(HubOptions::default()));
		let mut node_height = hub.node_height.subscribe().unwrap();

		let mut stream = futures_util::stream::iter(vec![
			Err(ChainError::InvalidInput("truncated header".into())),
			Ok(PushNotification::BlockConnected {
				height: 1,
				previous_hash: hash_for("a", 0),
			}),
		]);
		let end = monitor(chain, backend, hub.clone())
			.drain(&mut stream, &CancellationToken::new())
			.await
			.unwrap();

		assert_eq!(end, StreamEnd::Reconnect);
		assert_eq!(node_height.recv().await, Some(1));
	}

	#[tokio::test]
	async fn connection_failure_ends_the_subscription() {
		let chain = Arc::new(MockChain::linear("a", 0, 3));
		let backend = Arc::new(MemoryBackend::new("embedded"));
		let hub = Arc::new(NotificationHub::create(HubOptions::default()));
		let mut node_height = hub.node_height.subscribe().unwrap();

		let mut stream = futures_util::stream::iter(vec![
			Err(ChainError::Connection("registration failed".into())),
			Ok(PushNotification::BlockConnected {
				height: 1,
				previous_hash: hash_for("a", 0),
			}),
		]);
		let end = monitor(chain, backend, hub.clone())
			.drain(&mut stream, &CancellationToken::new())
			.await
			.unwrap();

		assert_eq!(end, StreamEnd::Reconnect);
		hub.close();
		assert_eq!(node_height.recv().await, None);
	}
}
