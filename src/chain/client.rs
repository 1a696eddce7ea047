//!
//! JSON-RPC client for the trusted chain-server.
//!
//! This module provides an async client that negotiates the chain-server API version at connect
//! time and exposes typed accessors for blocks, headers, transactions and stake difficulty. Every
//! accessor returns its own `Result`; none of them is fatal to the caller, which decides whether to
//! retry or skip. Only `connect` produces startup-fatal errors.

use super::difficulty::{difficulty_ratio, format_bits, parse_bits};
use super::types::*;
use super::version::{REQUIRED_CHAIN_SERVER_API, Semver};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Key of the JSON-RPC API entry in the chain-server's `version` result.
pub const CHAIN_SERVER_API_KEY: &str = "lddldjsonrpcapi";

/// Timeout for a single RPC request unless configured otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport security for the chain-server connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
	/// Plain HTTP / WS.
	Disabled,
	/// HTTPS / WSS trusting the given PEM certificate.
	Certificate(Vec<u8>),
}

/// Connection settings for the chain-server.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
	/// `host:port` of the chain-server RPC listener.
	pub host: String,
	pub user: String,
	pub pass: String,
	pub tls: TlsMode,
	/// Compact proof-of-work limit used to compute difficulty ratios.
	pub pow_limit_bits: u32,
	pub request_timeout: Duration,
}

impl ConnectionConfig {
	fn scheme(&self, secure: &'static str, plain: &'static str) -> &'static str {
		match self.tls {
			TlsMode::Disabled => plain,
			TlsMode::Certificate(_) => secure,
		}
	}

	/// URL of the HTTP JSON-RPC endpoint.
	pub fn http_url(&self) -> String {
		format!("{}://{}", self.scheme("https", "http"), self.host)
	}

	/// URL of the websocket endpoint used for push notifications.
	pub fn ws_url(&self) -> String {
		format!("{}://{}/ws", self.scheme("wss", "ws"), self.host)
	}
}

/// JSON-RPC request envelope
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
	jsonrpc: &'static str,
	id: u64,
	method: &'a str,
	params: Value,
}

/// JSON-RPC error object
#[derive(Debug, Deserialize)]
struct JsonRpcError {
	code: i64,
	message: String,
}

/// JSON-RPC response envelope
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
	#[serde(default)]
	result: Value,
	#[serde(default)]
	error: Option<JsonRpcError>,
}

/// One entry of the chain-server's `version` result.
#[derive(Debug, Clone, Deserialize)]
struct VersionResult {
	major: u32,
	minor: u32,
	patch: u32,
}

/// Read-only access to chain data, as needed by the sync and reorg engines.
#[async_trait]
pub trait ChainSource: Send + Sync {
	/// Hash and height of the chain-server's current tip.
	async fn get_best_block(&self) -> Result<(String, ChainHeight), ChainError>;

	/// Hash of the main-chain block at `height`.
	async fn get_block_hash(&self, height: ChainHeight) -> Result<String, ChainError>;

	/// Normalized header of the block with `hash`.
	///
	/// `confirmations` is derived as `current_height - height`; `next_hash` is attached when given.
	async fn get_block_header_verbose(
		&self,
		hash: &str,
		current_height: ChainHeight,
		next_hash: Option<&str>,
	) -> Result<BlockHeader, ChainError>;

	/// Block with `hash`, optionally with full transaction detail.
	async fn get_block_verbose(
		&self,
		hash: &str,
		include_tx_detail: bool,
	) -> Result<VerboseBlock, ChainError>;

	/// Transaction with `txid`, mined or in the mempool, with verbose detail.
	async fn get_transaction_verbose(&self, txid: &str) -> Result<TxRawResult, ChainError>;

	/// Block at `height` on the chain-server's main chain.
	async fn get_block_verbose_by_height(
		&self,
		height: ChainHeight,
		include_tx_detail: bool,
	) -> Result<VerboseBlock, ChainError> {
		let hash = self.get_block_hash(height).await?;
		self.get_block_verbose(&hash, include_tx_detail).await
	}
}

/// Chain-server JSON-RPC client
#[derive(Debug)]
pub struct ChainServerClient {
	/// The underlying HTTP client for RPC calls.
	http_client: Client,
	config: ConnectionConfig,
	/// Monotonic request id.
	next_id: AtomicU64,
	/// API version advertised by the chain-server at connect time.
	version: Semver,
}

impl ChainServerClient {
	/// Connect to the chain-server and negotiate its API version.
	///
	/// # Returns
	/// The client and the negotiated version, or `ChainError::Connection` when the server is
	/// unreachable and `ChainError::VersionIncompatible` when it advertises an unsupported API.
	/// Both are fatal to startup; the half-built connection is dropped.
	pub async fn connect(config: ConnectionConfig) -> Result<(Self, Semver), ChainError> {
		match &config.tls {
			TlsMode::Disabled => debug!(
				"Attempting to connect to chain-server RPC {} as user {} (no TLS)",
				config.host, config.user
			),
			TlsMode::Certificate(_) => debug!(
				"Attempting to connect to chain-server RPC {} as user {} using pinned certificate",
				config.host, config.user
			),
		}

		let mut builder = Client::builder().timeout(config.request_timeout);
		if let TlsMode::Certificate(pem) = &config.tls {
			let certificate = reqwest::Certificate::from_pem(pem).map_err(|e| {
				ChainError::Connection(format!("Invalid chain-server certificate: {}", e))
			})?;
			builder = builder.add_root_certificate(certificate);
		}
		let http_client = builder.build().map_err(|e| {
			ChainError::Connection(format!("Failed to create HTTP client: {}", e))
		})?;

		let mut client = Self {
			http_client,
			config,
			next_id: AtomicU64::new(1),
			version: Semver::default(),
		};

		let versions: HashMap<String, VersionResult> =
			client.call("version", json!([])).await.map_err(|e| {
				error!("Unable to get RPC version: {}", e);
				match e {
					ChainError::Http(inner) => ChainError::Connection(format!(
						"Chain-server unreachable: {}",
						inner
					)),
					other => other,
				}
			})?;

		let advertised = advertised_version(&versions)?;
		check_version(REQUIRED_CHAIN_SERVER_API, advertised)?;
		client.version = advertised;

		info!(
			"Connected to chain-server {} (API version {})",
			client.config.host, advertised
		);
		Ok((client, advertised))
	}

	/// API version negotiated at connect time.
	pub fn version(&self) -> Semver {
		self.version
	}

	pub fn config(&self) -> &ConnectionConfig {
		&self.config
	}

	/// Execute a JSON-RPC call and deserialize its result.
	pub async fn call<T: DeserializeOwned>(
		&self,
		method: &str,
		params: Value,
	) -> Result<T, ChainError> {
		let request = JsonRpcRequest {
			jsonrpc: "1.0",
			id: self.next_id.fetch_add(1, Ordering::SeqCst),
			method,
			params,
		};

		let response = self
			.http_client
			.post(self.config.http_url())
			.basic_auth(&self.config.user, Some(&self.config.pass))
			.json(&request)
			.send()
			.await?;

		let status = response.status();
		let body: JsonRpcResponse = match response.json().await {
			Ok(body) => body,
			Err(e) if !status.is_success() => {
				return Err(ChainError::Connection(format!(
					"HTTP error {} calling {}: {}",
					status, method, e
				)));
			}
			Err(e) => return Err(e.into()),
		};

		if let Some(err) = body.error {
			return Err(classify_rpc_error(err.code, err.message));
		}

		Ok(serde_json::from_value(body.result)?)
	}

	/// Transactions touching `address`, most recent first, at most `count` of them.
	///
	/// An address unknown to the chain-server yields an empty list.
	pub async fn search_transactions_by_address(
		&self,
		address: &str,
		count: u32,
	) -> Result<Vec<TxRawResult>, ChainError> {
		// address, verbose, skip, count, vinextra, reverse
		let params = json!([address, 1, 0, count, 1, true]);
		match self.call("searchrawtransactions", params).await {
			Ok(txs) => Ok(txs),
			Err(e) if e.is_not_found() => {
				info!("No transactions found for address {}", address);
				Ok(Vec::new())
			}
			Err(e) => {
				warn!("searchrawtransactions failed for address {}: {}", address, e);
				Err(e)
			}
		}
	}

	/// Current and next stake difficulty merged with the estimated future difficulty.
	pub async fn get_stake_difficulty_and_estimates(&self) -> Result<StakeDiff, ChainError> {
		let difficulty: StakeDifficultyResult =
			self.call("getstakedifficulty", json!([])).await?;
		let estimates: EstimateStakeDiffResult = self.call("estimatestakediff", json!([])).await?;
		Ok(StakeDiff {
			difficulty,
			estimates,
		})
	}

	/// Header of the main-chain block at `height`.
	pub async fn get_block_header_verbose_by_height(
		&self,
		height: ChainHeight,
		current_height: ChainHeight,
	) -> Result<BlockHeader, ChainError> {
		let hash = self.get_block_hash(height).await?;
		self.get_block_header_verbose(&hash, current_height, None)
			.await
	}
}

#[async_trait]
impl ChainSource for ChainServerClient {
	async fn get_best_block(&self) -> Result<(String, ChainHeight), ChainError> {
		#[derive(Deserialize)]
		struct BestBlock {
			hash: String,
			height: ChainHeight,
		}

		let best: BestBlock = self.call("getbestblock", json!([])).await?;
		Ok((best.hash, best.height))
	}

	async fn get_block_hash(&self, height: ChainHeight) -> Result<String, ChainError> {
		if height < 0 {
			return Err(ChainError::InvalidInput(format!(
				"negative block height {}",
				height
			)));
		}
		self.call("getblockhash", json!([height]))
			.await
			.inspect_err(|e| debug!("getblockhash({}) failed: {}", height, e))
	}

	async fn get_block_header_verbose(
		&self,
		hash: &str,
		current_height: ChainHeight,
		next_hash: Option<&str>,
	) -> Result<BlockHeader, ChainError> {
		validate_hash(hash)?;
		let raw: RawBlockHeader = self.call("getblockheader", json!([hash, true])).await?;
		Ok(normalize_header(
			raw,
			current_height,
			next_hash,
			self.config.pow_limit_bits,
		))
	}

	async fn get_block_verbose(
		&self,
		hash: &str,
		include_tx_detail: bool,
	) -> Result<VerboseBlock, ChainError> {
		validate_hash(hash)?;
		let raw: BlockVerboseResult = self
			.call("getblock", json!([hash, true, include_tx_detail]))
			.await
			.inspect_err(|e| debug!("getblock({}) failed: {}", hash, e))?;
		Ok(VerboseBlock::from(raw))
	}

	async fn get_transaction_verbose(&self, txid: &str) -> Result<TxRawResult, ChainError> {
		validate_hash(txid)?;
		self.call("getrawtransaction", json!([txid, 1]))
			.await
			.inspect_err(|e| warn!("getrawtransaction failed for {}: {}", txid, e))
	}
}

/// Pick the JSON-RPC API version out of the `version` result.
fn advertised_version(versions: &HashMap<String, VersionResult>) -> Result<Semver, ChainError> {
	versions
		.get(CHAIN_SERVER_API_KEY)
		.map(|v| Semver::new(v.major, v.minor, v.patch))
		.ok_or_else(|| {
			ChainError::Connection(format!(
				"Chain-server version result lacks {}",
				CHAIN_SERVER_API_KEY
			))
		})
}

/// Fail with `VersionIncompatible` unless `advertised` satisfies `required`.
pub fn check_version(required: Semver, advertised: Semver) -> Result<(), ChainError> {
	if Semver::compatible(required, advertised) {
		Ok(())
	} else {
		Err(ChainError::VersionIncompatible {
			advertised: advertised.to_string(),
			required: required.to_string(),
		})
	}
}

/// Build the normalized header, deriving confirmations, bits formatting and difficulty.
pub fn normalize_header(
	raw: RawBlockHeader,
	current_height: ChainHeight,
	next_hash: Option<&str>,
	pow_limit_bits: u32,
) -> BlockHeader {
	let height = ChainHeight::from(raw.height);
	let bits = parse_bits(&raw.bits).unwrap_or_else(|| {
		warn!("Block {} has malformed bits {:?}", raw.hash, raw.bits);
		0
	});
	let next_hash = next_hash
		.map(str::to_string)
		.or_else(|| (!raw.next_hash.is_empty()).then_some(raw.next_hash));

	BlockHeader {
		confirmations: current_height - height,
		bits: format_bits(bits),
		difficulty: difficulty_ratio(bits, pow_limit_bits),
		hash: raw.hash,
		previous_hash: raw.previous_hash,
		height,
		version: raw.version,
		merkle_root: raw.merkle_root,
		stake_root: raw.stake_root,
		vote_bits: raw.vote_bits,
		final_state: raw.final_state,
		voters: raw.voters,
		fresh_stake: raw.fresh_stake,
		revocations: raw.revocations,
		pool_size: raw.pool_size,
		s_bits: raw.s_bits,
		size: raw.size,
		time: raw.time,
		nonce: raw.nonce,
		next_hash,
	}
}

/// Map chain-server error codes to the error taxonomy.
fn classify_rpc_error(code: i64, message: String) -> ChainError {
	// Shared by "no information for transaction" and "invalid address or key".
	const NO_INFORMATION: i64 = -5;
	const OUT_OF_RANGE: i64 = -1;

	match code {
		NO_INFORMATION => ChainError::NotFound(message),
		OUT_OF_RANGE if message.to_lowercase().contains("out of range") => {
			ChainError::NotFound(message)
		}
		_ => ChainError::Rpc { code, message },
	}
}

/// Block and transaction hashes are 32 bytes of hex.
fn validate_hash(hash: &str) -> Result<(), ChainError> {
	if hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit()) {
		Ok(())
	} else {
		Err(ChainError::InvalidInput(format!("invalid hash {}", hash)))
	}
}
