//! Service configuration.
//!
//! Loaded from a TOML file whose path is the first command-line argument or the
//! `CHAIN_INDEX_SYNC_CONFIG` environment variable. Chain-server credentials may be overridden from
//! the environment so they need not live in the file. Every field has a default.

use crate::chain::difficulty::MAINNET_POW_LIMIT_BITS;
use crate::chain::{ChainHeight, ConnectionConfig, TlsMode};
use crate::notification::HubOptions;
use crate::sync::progress_tracker::DEFAULT_PROGRESS_LOG_INTERVAL;
use crate::sync::reorg::DEFAULT_MAX_REORG_DEPTH;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_PATH_ENV: &str = "CHAIN_INDEX_SYNC_CONFIG";
pub const HOST_ENV: &str = "CHAIN_SERVER_HOST";
pub const USER_ENV: &str = "CHAIN_SERVER_USER";
pub const PASS_ENV: &str = "CHAIN_SERVER_PASS";

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Failed to read {path:?}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to parse configuration: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("Invalid configuration: {0}")]
	Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChainServerConfig {
	/// `host:port` of the chain-server RPC listener
	pub host: String,
	pub user: String,
	pub pass: String,
	/// PEM certificate of the chain-server, required unless `disable_tls`
	pub cert_path: PathBuf,
	pub disable_tls: bool,
	/// Compact proof-of-work limit of the network
	pub pow_limit_bits: u32,
	pub request_timeout_secs: u64,
}

impl Default for ChainServerConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1:9109".to_string(),
			user: String::new(),
			pass: String::new(),
			cert_path: PathBuf::from("rpc.cert"),
			disable_tls: false,
			pow_limit_bits: MAINNET_POW_LIMIT_BITS,
			request_timeout_secs: 30,
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HubConfig {
	pub monitor_mempool: bool,
	pub enable_relational_store: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
	pub start_height: ChainHeight,
	pub max_reorg_depth: u64,
	/// Blocks between progress logs
	pub progress_log_interval: u64,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			start_height: 0,
			max_reorg_depth: DEFAULT_MAX_REORG_DEPTH,
			progress_log_interval: DEFAULT_PROGRESS_LOG_INTERVAL,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
	pub data_dir: PathBuf,
	/// Blocks between snapshots of the embedded store; 0 saves only at shutdown
	pub snapshot_interval: u64,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			data_dir: PathBuf::from("data"),
			snapshot_interval: 1000,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
	pub chain_server: ChainServerConfig,
	pub hub: HubConfig,
	pub sync: SyncConfig,
	pub storage: StorageConfig,
	/// Default tracing filter directive, overridden by `RUST_LOG`
	pub log_level: String,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			chain_server: ChainServerConfig::default(),
			hub: HubConfig::default(),
			sync: SyncConfig::default(),
			storage: StorageConfig::default(),
			log_level: "info".to_string(),
		}
	}
}

impl Config {
	/// Load configuration from a TOML file.
	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		let config: Config = toml::from_str(&content)?;
		Ok(config)
	}

	/// Load from the path given on the command line or in the environment, falling back to
	/// defaults, then apply environment overrides and validate.
	pub fn load(cli_path: Option<PathBuf>) -> Result<Self, ConfigError> {
		let path = cli_path.or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
		let mut config = match path {
			Some(path) => Self::from_file(&path)?,
			None => Self::default(),
		};
		config.apply_overrides(|key| std::env::var(key).ok());
		config.validate()?;
		Ok(config)
	}

	/// Override chain-server settings from `lookup` (normally the environment).
	pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
		if let Some(host) = lookup(HOST_ENV) {
			self.chain_server.host = host;
		}
		if let Some(user) = lookup(USER_ENV) {
			self.chain_server.user = user;
		}
		if let Some(pass) = lookup(PASS_ENV) {
			self.chain_server.pass = pass;
		}
	}

	/// Validate the configuration.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.chain_server.host.is_empty() {
			return Err(ConfigError::Invalid("chain_server.host is empty".to_string()));
		}
		if self.chain_server.request_timeout_secs == 0 {
			return Err(ConfigError::Invalid(
				"chain_server.request_timeout_secs must be positive".to_string(),
			));
		}
		if self.sync.start_height < 0 {
			return Err(ConfigError::Invalid(format!(
				"sync.start_height must not be negative, got {}",
				self.sync.start_height
			)));
		}
		if self.sync.max_reorg_depth == 0 {
			return Err(ConfigError::Invalid(
				"sync.max_reorg_depth must be positive".to_string(),
			));
		}
		Ok(())
	}

	/// Chain-server connection settings, reading the certificate unless TLS is disabled.
	pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
		let server = &self.chain_server;
		let tls = if server.disable_tls {
			TlsMode::Disabled
		} else {
			let pem = std::fs::read(&server.cert_path).map_err(|source| ConfigError::Io {
				path: server.cert_path.clone(),
				source,
			})?;
			TlsMode::Certificate(pem)
		};
		debug!(
			"Chain-server connection: user {} at {} (TLS {})",
			server.user,
			server.host,
			if server.disable_tls { "disabled" } else { "enabled" }
		);
		Ok(ConnectionConfig {
			host: server.host.clone(),
			user: server.user.clone(),
			pass: server.pass.clone(),
			tls,
			pow_limit_bits: server.pow_limit_bits,
			request_timeout: Duration::from_secs(server.request_timeout_secs),
		})
	}

	pub fn hub_options(&self) -> HubOptions {
		HubOptions {
			monitor_mempool: self.hub.monitor_mempool,
			enable_relational_store: self.hub.enable_relational_store,
			..Default::default()
		}
	}
}
