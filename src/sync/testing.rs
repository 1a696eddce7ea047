//! In-crate chain-server double for engine tests.

use crate::chain::{
	BlockHeader, BlockVerboseResult, ChainError, ChainHeight, ChainSource, TxRawResult,
	VerboseBlock,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Chain-server serving a linear chain of empty blocks, optionally failing at one height.
#[derive(Default)]
pub(crate) struct MockChain {
	blocks: Mutex<BTreeMap<ChainHeight, VerboseBlock>>,
	fail_at: Mutex<Option<ChainHeight>>,
	mempool: Mutex<HashMap<String, TxRawResult>>,
}

pub(crate) fn hash_for(tag: &str, height: ChainHeight) -> String {
	format!("{}{}", tag, height)
}

fn make_block(height: ChainHeight, hash: String, previous_hash: String) -> VerboseBlock {
	VerboseBlock::from(BlockVerboseResult {
		hash,
		previous_hash,
		height,
		tx: vec![format!("tx{}", height)],
		..Default::default()
	})
}

impl MockChain {
	/// Chain of blocks `from..=to` hashed as `{tag}{height}`.
	pub(crate) fn linear(tag: &str, from: ChainHeight, to: ChainHeight) -> Self {
		let chain = Self::default();
		chain.extend(tag, from, to);
		chain
	}

	/// Append or replace blocks `from..=to`, linking the first to whatever sits at `from - 1`.
	pub(crate) fn extend(&self, tag: &str, from: ChainHeight, to: ChainHeight) {
		let mut blocks = self.blocks.lock().unwrap();
		blocks.retain(|h, _| *h < from);
		for height in from..=to {
			let previous = blocks
				.get(&(height - 1))
				.map(|b| b.hash.clone())
				.unwrap_or_else(|| hash_for(tag, height - 1));
			blocks.insert(height, make_block(height, hash_for(tag, height), previous));
		}
	}

	pub(crate) fn fail_fetch_at(&self, height: ChainHeight) {
		*self.fail_at.lock().unwrap() = Some(height);
	}

	pub(crate) fn add_mempool_tx(&self, tx: TxRawResult) {
		self.mempool.lock().unwrap().insert(tx.txid.clone(), tx);
	}

	pub(crate) fn clear_failure(&self) {
		*self.fail_at.lock().unwrap() = None;
	}

	pub(crate) fn block(&self, height: ChainHeight) -> VerboseBlock {
		self.blocks.lock().unwrap()[&height].clone()
	}
}

#[async_trait]
impl ChainSource for MockChain {
	async fn get_best_block(&self) -> Result<(String, ChainHeight), ChainError> {
		self.blocks
			.lock()
			.unwrap()
			.iter()
			.next_back()
			.map(|(h, b)| (b.hash.clone(), *h))
			.ok_or_else(|| ChainError::NotFound("empty chain".into()))
	}

	async fn get_block_hash(&self, height: ChainHeight) -> Result<String, ChainError> {
		if *self.fail_at.lock().unwrap() == Some(height) {
			return Err(ChainError::Connection("connection reset".into()));
		}
		self.blocks
			.lock()
			.unwrap()
			.get(&height)
			.map(|b| b.hash.clone())
			.ok_or_else(|| ChainError::NotFound(format!("height {}", height)))
	}

	async fn get_block_header_verbose(
		&self,
		hash: &str,
		current_height: ChainHeight,
		next_hash: Option<&str>,
	) -> Result<BlockHeader, ChainError> {
		let block = self.get_block_verbose(hash, false).await?;
		Ok(BlockHeader {
			hash: block.hash,
			previous_hash: block.previous_hash,
			height: block.height,
			confirmations: current_height - block.height,
			next_hash: next_hash.map(str::to_string),
			..Default::default()
		})
	}

	async fn get_block_verbose(
		&self,
		hash: &str,
		_include_tx_detail: bool,
	) -> Result<VerboseBlock, ChainError> {
		self.blocks
			.lock()
			.unwrap()
			.values()
			.find(|b| b.hash == hash)
			.cloned()
			.ok_or_else(|| ChainError::NotFound(hash.to_string()))
	}

	async fn get_transaction_verbose(&self, txid: &str) -> Result<TxRawResult, ChainError> {
		self.mempool
			.lock()
			.unwrap()
			.get(txid)
			.cloned()
			.ok_or_else(|| ChainError::NotFound(txid.to_string()))
	}
}
