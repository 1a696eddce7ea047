//! Backend consumer loops.
//!
//! Each backend runs one task per conduit it owns. The block-connected consumer catches the backend
//! up to each announced block, discarding announcements at or below its own height since
//! cross-conduit ordering is not guaranteed. The reorg consumer executes rollback and apply
//! instructions in the order they arrive. Both report the backend's new height on the hub's
//! `db_height` conduit. The mempool consumer fetches and converts each announced transaction for
//! the explorer. Every loop ends when its conduit closes or shutdown is requested.

use super::engine::SyncEngine;
use crate::backend::{ReorgBackend, SyncBackend};
use crate::chain::{ChainHeight, ChainSource};
use crate::convert::{ConversionFilters, ResultConverter};
use crate::notification::{
	BlockConnected, ConduitError, NewMempoolTx, NotificationHub, ReorgInstruction, Subscription,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

fn report_height(hub: &NotificationHub, height: ChainHeight) {
	match hub.db_height.try_publish(height) {
		Ok(()) | Err(ConduitError::Disabled(_)) => {}
		Err(ConduitError::Full(name)) => debug!("Dropping height update, {} is full", name),
		Err(e) => debug!("Height update not delivered: {}", e),
	}
}

/// Receive the next message or `None` on shutdown or close.
async fn next<T>(subscription: &mut Subscription<T>, cancel: &CancellationToken) -> Option<T> {
	tokio::select! {
		biased;
		_ = cancel.cancelled() => None,
		message = subscription.recv() => message,
	}
}

/// Keep `backend` caught up with block-connected announcements.
pub async fn run_block_connected_consumer<B, C>(
	backend: Arc<B>,
	chain: Arc<C>,
	mut subscription: Subscription<BlockConnected>,
	hub: Arc<NotificationHub>,
	engine: SyncEngine,
	cancel: CancellationToken,
) where
	B: SyncBackend + ?Sized,
	C: ChainSource + ?Sized,
{
	if !subscription.is_active() {
		return;
	}
	info!("{} listening on {}", backend.name(), subscription.name());

	while let Some(announced) = next(&mut subscription, &cancel).await {
		let local = backend.last_synced_height().await;
		if announced.height <= local {
			debug!(
				"{} discarding stale block {} at height {} (local {})",
				backend.name(),
				announced.hash,
				announced.height,
				local
			);
			continue;
		}

		let outcome = engine.sync(&*backend, &*chain, &cancel, local + 1).await;
		if let Some(e) = &outcome.error {
			warn!(
				"{} failed to catch up to block {} at height {}: {}",
				backend.name(),
				announced.hash,
				announced.height,
				e
			);
		}
		if outcome.reached_height > local {
			report_height(&hub, outcome.reached_height);
		}
	}

	info!("{} block consumer stopped", backend.name());
}

/// Execute reorg instructions against `backend`.
pub async fn run_reorg_consumer<B, C>(
	backend: Arc<B>,
	chain: Arc<C>,
	mut subscription: Subscription<ReorgInstruction>,
	hub: Arc<NotificationHub>,
	cancel: CancellationToken,
) where
	B: ReorgBackend + ?Sized,
	C: ChainSource + ?Sized,
{
	if !subscription.is_active() {
		return;
	}
	info!("{} listening on {}", backend.name(), subscription.name());

	while let Some(instruction) = next(&mut subscription, &cancel).await {
		match instruction {
			ReorgInstruction::Rollback { height, hash } => {
				if let Err(e) = backend.rollback_block(&hash).await {
					error!(
						"{} failed to roll back block {} at height {}: {}",
						backend.name(),
						hash,
						height,
						e
					);
				}
			}
			ReorgInstruction::Apply { height, hash } => {
				let block = match chain
					.get_block_verbose(&hash, backend.wants_transactions())
					.await
				{
					Ok(block) => block,
					Err(e) => {
						error!("{} failed to fetch replacement block {}: {}", backend.name(), hash, e);
						continue;
					}
				};
				match backend.apply_block(&block).await {
					Ok(()) => report_height(&hub, height),
					Err(e) => error!(
						"{} failed to apply replacement block {} at height {}: {}",
						backend.name(),
						hash,
						height,
						e
					),
				}
			}
		}
	}

	info!("{} reorg consumer stopped", backend.name());
}

/// Convert announced mempool transactions, returning how many were converted.
pub async fn run_mempool_consumer<C>(
	chain: Arc<C>,
	converter: Arc<ResultConverter>,
	mut subscription: Subscription<NewMempoolTx>,
	cancel: CancellationToken,
) -> u64
where
	C: ChainSource + ?Sized,
{
	if !subscription.is_active() {
		return 0;
	}
	info!("Mempool consumer listening on {}", subscription.name());

	let filters = ConversionFilters {
		omit_script_asm: true,
		omit_script_sig: true,
		omit_spend_info: true,
	};
	let mut converted = 0;
	while let Some(announced) = next(&mut subscription, &cancel).await {
		let raw = match chain.get_transaction_verbose(&announced.txid).await {
			Ok(raw) => raw,
			Err(e) => {
				debug!("Mempool transaction {} unavailable: {}", announced.txid, e);
				continue;
			}
		};
		for tx in converter
			.convert_transactions(std::slice::from_ref(&raw), filters)
			.await
		{
			debug!(
				"Mempool transaction {}: {} inputs, {} outputs, value out {}, fees {}",
				tx.txid,
				tx.vin.len(),
				tx.vout.len(),
				tx.value_out,
				tx.fees
			);
			converted += 1;
		}
	}

	info!("Mempool consumer stopped after {} transactions", converted);
	converted
}
