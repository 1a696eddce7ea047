//! Lightweight embedded block index.
//!
//! `MemoryBackend` keeps the applied chain segment, every indexed output and its spend status in
//! memory, optionally snapshotting to disk through a `SnapshotRepository` so a restart resumes from
//! the last saved height. It implements every backend capability and is what the binary syncs.

use super::{
	AddressLookup, AddressSpend, BackendError, LocalChain, OutpointAddresses, ReorgBackend,
	SnapshotRepository, SyncBackend,
};
use crate::chain::{ChainHeight, TxRawResult, VerboseBlock};
use crate::utils::Amount;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredBlock {
	hash: String,
	previous_hash: String,
	/// Outpoints created by this block's transactions.
	created: Vec<(String, u32)>,
	/// Outpoints spent by this block's transactions.
	spent: Vec<(String, u32)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSpend {
	txid: String,
	vin_index: u32,
	height: ChainHeight,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredOutput {
	id: u64,
	addresses: Vec<String>,
	value: i64,
	spent_by: Option<StoredSpend>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexState {
	blocks: BTreeMap<ChainHeight, StoredBlock>,
	outputs: HashMap<String, BTreeMap<u32, StoredOutput>>,
	next_output_id: u64,
}

impl IndexState {
	fn tip(&self) -> Option<(ChainHeight, &StoredBlock)> {
		self.blocks.iter().next_back().map(|(h, b)| (*h, b))
	}

	fn index_transaction(
		&mut self,
		tx: &TxRawResult,
		height: ChainHeight,
		created: &mut Vec<(String, u32)>,
		spent: &mut Vec<(String, u32)>,
	) {
		for (vin_index, vin) in tx.vin.iter().enumerate() {
			if !vin.coinbase.is_empty() || !vin.stakebase.is_empty() {
				continue;
			}
			let Some(output) = self
				.outputs
				.get_mut(&vin.txid)
				.and_then(|outs| outs.get_mut(&vin.vout))
			else {
				debug!("Input {}:{} spends an unindexed output", vin.txid, vin.vout);
				continue;
			};
			output.spent_by = Some(StoredSpend {
				txid: tx.txid.clone(),
				vin_index: vin_index as u32,
				height,
			});
			spent.push((vin.txid.clone(), vin.vout));
		}

		for vout in &tx.vout {
			let value = Amount::from_coin(vout.value).unwrap_or_else(|e| {
				warn!("Output {}:{} has invalid value: {}", tx.txid, vout.n, e);
				Amount::ZERO
			});
			let id = self.next_output_id;
			self.next_output_id += 1;
			self.outputs.entry(tx.txid.clone()).or_default().insert(
				vout.n,
				StoredOutput {
					id,
					addresses: vout.script_pub_key.addresses.clone(),
					value: value.atoms(),
					spent_by: None,
				},
			);
			created.push((tx.txid.clone(), vout.n));
		}
	}
}

/// In-memory block index with optional snapshot persistence.
pub struct MemoryBackend {
	name: String,
	state: RwLock<IndexState>,
	repository: Option<Box<dyn SnapshotRepository + Send + Sync>>,
	/// Save a snapshot every this many applied blocks; 0 disables periodic snapshots.
	snapshot_interval: u64,
	applied_since_snapshot: AtomicU64,
}

impl MemoryBackend {
	pub fn new(name: &str) -> Self {
		Self {
			name: name.to_string(),
			state: RwLock::new(IndexState::default()),
			repository: None,
			snapshot_interval: 0,
			applied_since_snapshot: AtomicU64::new(0),
		}
	}

	/// Back the index with a snapshot repository.
	pub fn with_repository(
		mut self,
		repository: Box<dyn SnapshotRepository + Send + Sync>,
		snapshot_interval: u64,
	) -> Self {
		self.repository = Some(repository);
		self.snapshot_interval = snapshot_interval;
		self
	}

	fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, IndexState>, BackendError> {
		self.state
			.read()
			.map_err(|_| BackendError::Storage(format!("{} index lock poisoned", self.name)))
	}

	fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, IndexState>, BackendError> {
		self.state
			.write()
			.map_err(|_| BackendError::Storage(format!("{} index lock poisoned", self.name)))
	}

	/// Restore the index from the latest snapshot, returning its height.
	pub async fn restore(&self) -> Result<Option<ChainHeight>, BackendError> {
		let Some(repository) = &self.repository else {
			return Ok(None);
		};
		let Some((bytes, height)) = repository.load().await? else {
			info!("No {} snapshot found, starting from an empty index", self.name);
			return Ok(None);
		};

		let restored: IndexState = bincode::deserialize(&bytes)
			.map_err(|e| BackendError::Snapshot(format!("Failed to decode snapshot: {}", e)))?;
		let tip = restored.tip().map(|(h, _)| h).unwrap_or(-1);
		if tip != height {
			warn!(
				"{} snapshot metadata says height {} but index tip is {}",
				self.name, height, tip
			);
		}
		*self.write()? = restored;
		info!("Restored {} index at height {}", self.name, tip);
		Ok(Some(tip))
	}

	/// Save a snapshot of the index now.
	pub async fn persist(&self) -> Result<(), BackendError> {
		let Some(repository) = &self.repository else {
			return Ok(());
		};
		let (bytes, height) = {
			let state = self.read()?;
			let bytes = bincode::serialize(&*state)
				.map_err(|e| BackendError::Snapshot(format!("Failed to encode snapshot: {}", e)))?;
			(bytes, state.tip().map(|(h, _)| h).unwrap_or(-1))
		};
		repository.save(&bytes, height).await?;
		self.applied_since_snapshot.store(0, Ordering::SeqCst);
		Ok(())
	}

	/// Number of indexed outputs, spent or not.
	pub fn output_count(&self) -> usize {
		self.read()
			.map(|s| s.outputs.values().map(BTreeMap::len).sum())
			.unwrap_or(0)
	}
}

#[async_trait]
impl SyncBackend for MemoryBackend {
	fn name(&self) -> &str {
		&self.name
	}

	async fn last_synced_height(&self) -> ChainHeight {
		self.read()
			.ok()
			.and_then(|s| s.tip().map(|(h, _)| h))
			.unwrap_or(-1)
	}

	fn wants_transactions(&self) -> bool {
		true
	}

	async fn apply_block(&self, block: &VerboseBlock) -> Result<(), BackendError> {
		{
			let mut state = self.write()?;
			if let Some((tip_height, tip)) = state.tip() {
				if block.height != tip_height + 1 {
					return Err(BackendError::Apply {
						height: block.height,
						reason: format!("expected height {}", tip_height + 1),
					});
				}
				if block.previous_hash != tip.hash {
					return Err(BackendError::Apply {
						height: block.height,
						reason: format!(
							"parent {} does not match local tip {}",
							block.previous_hash, tip.hash
						),
					});
				}
			}

			let mut created = Vec::new();
			let mut spent = Vec::new();
			for tx in block.raw.raw_tx.iter().chain(block.raw.raw_stx.iter()) {
				state.index_transaction(tx, block.height, &mut created, &mut spent);
			}
			state.blocks.insert(
				block.height,
				StoredBlock {
					hash: block.hash.clone(),
					previous_hash: block.previous_hash.clone(),
					created,
					spent,
				},
			);
		}
		debug!("{} applied block {} at height {}", self.name, block.hash, block.height);

		let applied = self.applied_since_snapshot.fetch_add(1, Ordering::SeqCst) + 1;
		if self.snapshot_interval > 0 && applied >= self.snapshot_interval {
			// The block is committed either way; the next apply retries the snapshot.
			if let Err(e) = self.persist().await {
				warn!(
					"{} failed to snapshot at height {}: {}",
					self.name, block.height, e
				);
			}
		}
		Ok(())
	}
}

#[async_trait]
impl ReorgBackend for MemoryBackend {
	async fn rollback_block(&self, hash: &str) -> Result<(), BackendError> {
		let mut state = self.write()?;
		let (height, tip) = match state.tip() {
			Some((height, tip)) if tip.hash == hash => (height, tip.clone()),
			Some((_, tip)) => {
				return Err(BackendError::Rollback {
					hash: hash.to_string(),
					reason: format!("local tip is {}", tip.hash),
				});
			}
			None => return Err(BackendError::NotFound(hash.to_string())),
		};

		for (txid, vout) in &tip.spent {
			if let Some(output) = state.outputs.get_mut(txid).and_then(|o| o.get_mut(vout)) {
				output.spent_by = None;
			}
		}
		for (txid, vout) in &tip.created {
			if let Some(outputs) = state.outputs.get_mut(txid) {
				outputs.remove(vout);
				if outputs.is_empty() {
					state.outputs.remove(txid);
				}
			}
		}
		state.blocks.remove(&height);
		info!("{} rolled back block {} at height {}", self.name, hash, height);
		Ok(())
	}
}

#[async_trait]
impl LocalChain for MemoryBackend {
	async fn local_block_hash(&self, height: ChainHeight) -> Result<Option<String>, BackendError> {
		Ok(self.read()?.blocks.get(&height).map(|b| b.hash.clone()))
	}
}

#[async_trait]
impl AddressLookup for MemoryBackend {
	async fn retrieve_address_ids_by_outpoint(
		&self,
		txid: &str,
		vout: u32,
	) -> Result<OutpointAddresses, BackendError> {
		let state = self.read()?;
		let output = state
			.outputs
			.get(txid)
			.and_then(|o| o.get(&vout))
			.ok_or_else(|| BackendError::NotFound(format!("{}:{}", txid, vout)))?;
		Ok(OutpointAddresses {
			ids: vec![output.id; output.addresses.len()],
			addresses: output.addresses.clone(),
			value: Amount::from_atoms(output.value),
		})
	}

	async fn get_address_spend_by_funding_hash(
		&self,
		addresses: &[String],
		funding_txid: &str,
	) -> Result<Vec<AddressSpend>, BackendError> {
		let state = self.read()?;
		let Some(outputs) = state.outputs.get(funding_txid) else {
			return Ok(Vec::new());
		};
		Ok(outputs
			.iter()
			.filter(|(_, o)| o.addresses.iter().any(|a| addresses.contains(a)))
			.filter_map(|(n, o)| {
				o.spent_by.as_ref().map(|s| AddressSpend {
					funding_vout_index: *n,
					spending_vin_index: s.vin_index,
					spending_tx_hash: s.txid.clone(),
					block_height: s.height,
				})
			})
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::FileSnapshotRepository;
	use crate::chain::{BlockVerboseResult, RawScriptPubKey, RawVin, RawVout};

	fn tx(txid: &str, spends: &[(&str, u32)], outputs: &[(&str, f64)]) -> TxRawResult {
		TxRawResult {
			txid: txid.to_string(),
			vin: spends
				.iter()
				.map(|(t, n)| RawVin {
					txid: t.to_string(),
					vout: *n,
					..Default::default()
				})
				.collect(),
			vout: outputs
				.iter()
				.enumerate()
				.map(|(n, (addr, value))| RawVout {
					value: *value,
					n: n as u32,
					script_pub_key: RawScriptPubKey {
						addresses: vec![addr.to_string()],
						..Default::default()
					},
					..Default::default()
				})
				.collect(),
			..Default::default()
		}
	}

	fn block(height: ChainHeight, hash: &str, parent: &str, txs: Vec<TxRawResult>) -> VerboseBlock {
		VerboseBlock::from(BlockVerboseResult {
			hash: hash.to_string(),
			previous_hash: parent.to_string(),
			height,
			tx: txs.iter().map(|t| t.txid.clone()).collect(),
			raw_tx: txs,
			..Default::default()
		})
	}

	#[tokio::test]
	async fn applies_contiguous_blocks_only() {
		let backend = MemoryBackend::new("embedded");
		assert_eq!(backend.last_synced_height().await, -1);

		backend.apply_block(&block(10, "a", "z", vec![])).await.unwrap();
		backend.apply_block(&block(11, "b", "a", vec![])).await.unwrap();
		assert_eq!(backend.last_synced_height().await, 11);

		let gap = backend.apply_block(&block(13, "d", "b", vec![])).await;
		assert!(matches!(gap, Err(BackendError::Apply { height: 13, .. })));

		let wrong_parent = backend.apply_block(&block(12, "c", "x", vec![])).await;
		assert!(matches!(wrong_parent, Err(BackendError::Apply { .. })));
	}

	#[tokio::test]
	async fn indexes_outputs_and_spends() {
		let backend = MemoryBackend::new("embedded");
		backend
			.apply_block(&block(1, "h1", "h0", vec![tx("t1", &[], &[("addr1", 2.5), ("addr2", 1.0)])]))
			.await
			.unwrap();
		backend
			.apply_block(&block(2, "h2", "h1", vec![tx("t2", &[("t1", 0)], &[("addr3", 2.4)])]))
			.await
			.unwrap();

		let resolved = backend.retrieve_address_ids_by_outpoint("t1", 0).await.unwrap();
		assert_eq!(resolved.addresses, vec!["addr1"]);
		assert_eq!(resolved.value, Amount::from_atoms(250_000_000));

		let spends = backend
			.get_address_spend_by_funding_hash(&["addr1".into(), "addr2".into()], "t1")
			.await
			.unwrap();
		assert_eq!(
			spends,
			vec![AddressSpend {
				funding_vout_index: 0,
				spending_vin_index: 0,
				spending_tx_hash: "t2".into(),
				block_height: 2,
			}]
		);

		assert!(matches!(
			backend.retrieve_address_ids_by_outpoint("t9", 0).await,
			Err(BackendError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn rollback_undoes_tip_only() {
		let backend = MemoryBackend::new("embedded");
		backend
			.apply_block(&block(1, "h1", "h0", vec![tx("t1", &[], &[("addr1", 2.5)])]))
			.await
			.unwrap();
		backend
			.apply_block(&block(2, "h2", "h1", vec![tx("t2", &[("t1", 0)], &[("addr3", 2.4)])]))
			.await
			.unwrap();

		assert!(matches!(
			backend.rollback_block("h1").await,
			Err(BackendError::Rollback { .. })
		));

		backend.rollback_block("h2").await.unwrap();
		assert_eq!(backend.last_synced_height().await, 1);
		assert_eq!(backend.output_count(), 1);
		let spends = backend
			.get_address_spend_by_funding_hash(&["addr1".into()], "t1")
			.await
			.unwrap();
		assert!(spends.is_empty());
		assert_eq!(backend.local_block_hash(2).await.unwrap(), None);
		assert_eq!(backend.local_block_hash(1).await.unwrap().as_deref(), Some("h1"));
	}

	#[tokio::test]
	async fn snapshot_round_trip_resumes_height() {
		let dir = tempfile::tempdir().unwrap();
		let repo = || Box::new(FileSnapshotRepository::new(dir.path().to_path_buf(), "embedded"));

		let backend = MemoryBackend::new("embedded").with_repository(repo(), 2);
		backend.apply_block(&block(5, "a", "p", vec![])).await.unwrap();
		backend.apply_block(&block(6, "b", "a", vec![])).await.unwrap();

		let restored = MemoryBackend::new("embedded").with_repository(repo(), 2);
		assert_eq!(restored.restore().await.unwrap(), Some(6));
		assert_eq!(restored.last_synced_height().await, 6);
		assert_eq!(restored.local_block_hash(5).await.unwrap().as_deref(), Some("a"));
	}

	#[tokio::test]
	async fn failed_snapshot_keeps_the_applied_block() {
		let dir = tempfile::tempdir().unwrap();
		let not_a_dir = dir.path().join("occupied");
		std::fs::write(&not_a_dir, b"").unwrap();
		let backend = MemoryBackend::new("embedded").with_repository(
			Box::new(FileSnapshotRepository::new(not_a_dir, "embedded")),
			3,
		);
		let chain = crate::sync::testing::MockChain::linear("a", 0, 10);

		let outcome = crate::sync::SyncEngine::default()
			.sync(
				&backend,
				&chain,
				&tokio_util::sync::CancellationToken::new(),
				0,
			)
			.await;

		assert!(outcome.is_ok());
		assert_eq!(outcome.reached_height, 10);
		assert_eq!(backend.last_synced_height().await, outcome.reached_height);
	}
}
