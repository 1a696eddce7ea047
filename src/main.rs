use chain_index_sync::backend::{
	BackendError, FileSnapshotRepository, MemoryBackend, SyncBackend,
};
use chain_index_sync::chain::{ChainError, ChainServerClient, ChainSource};
use chain_index_sync::config::{Config, ConfigError};
use chain_index_sync::convert::{ResultConverter, SubsidyParams};
use chain_index_sync::notification::{ConduitError, NotificationHub};
use chain_index_sync::sync::{
	ChainMonitor, CompletionBarrier, ReorgCoordinator, ShutdownSignal, SyncEngine, SyncError,
	run_block_connected_consumer, run_mempool_consumer, run_reorg_consumer,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EMBEDDED_STORE: &str = "embedded";

#[derive(Debug, thiserror::Error)]
enum ServiceError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Chain(#[from] ChainError),

	#[error(transparent)]
	Backend(#[from] BackendError),

	#[error(transparent)]
	Conduit(#[from] ConduitError),

	#[error(transparent)]
	Sync(#[from] SyncError),
}

#[tokio::main]
async fn main() -> ExitCode {
	let config = match Config::load(std::env::args_os().nth(1).map(PathBuf::from)) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("Failed to load configuration: {}", e);
			return ExitCode::FAILURE;
		}
	};

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting chain index sync service");

	match run(config).await {
		Ok(height) => {
			info!("done at height {}", height);
			ExitCode::SUCCESS
		}
		Err(e) => {
			error!("Chain index sync failed: {}", e);
			ExitCode::FAILURE
		}
	}
}

async fn run(config: Config) -> Result<i64, ServiceError> {
	let connection = config.connection_config()?;
	let (client, version) = ChainServerClient::connect(connection.clone()).await?;
	info!("Negotiated chain-server API version {}", version);
	let client = Arc::new(client);

	let (tip_hash, tip_height) = client.get_best_block().await?;
	info!("Chain-server tip: {} at height {}", tip_hash, tip_height);

	let repository =
		FileSnapshotRepository::new(config.storage.data_dir.clone(), EMBEDDED_STORE);
	let backend = Arc::new(
		MemoryBackend::new(EMBEDDED_STORE)
			.with_repository(Box::new(repository), config.storage.snapshot_interval),
	);
	if let Some(height) = backend.restore().await? {
		info!("Resuming {} store from height {}", EMBEDDED_STORE, height);
	}

	let shutdown = ShutdownSignal::new();
	shutdown.arm_interrupt();
	let barrier = CompletionBarrier::new();
	let engine = SyncEngine::new(config.sync.progress_log_interval);

	let initial = {
		let backend = backend.clone();
		let client = client.clone();
		let engine = engine.clone();
		let token = shutdown.token();
		let start_height = config.sync.start_height;
		barrier.spawn(async move { engine.sync(&*backend, &*client, &token, start_height).await })
	};
	match initial.await {
		Ok(outcome) => match outcome.error {
			Some(e) => warn!(
				"Initial sync stopped at height {}: {}",
				outcome.reached_height, e
			),
			None => info!("Initial sync reached height {}", outcome.reached_height),
		},
		Err(e) => error!("Initial sync task failed: {}", e),
	}

	let hub = Arc::new(NotificationHub::create(config.hub_options()));
	let mut monitor_result = Ok(());

	if !shutdown.is_triggered() {
		barrier.spawn(run_block_connected_consumer(
			backend.clone(),
			client.clone(),
			hub.block_connected_embedded.subscribe()?,
			hub.clone(),
			engine.clone(),
			shutdown.token(),
		));
		barrier.spawn(run_reorg_consumer(
			backend.clone(),
			client.clone(),
			hub.reorg_embedded.subscribe()?,
			hub.clone(),
			shutdown.token(),
		));
		let converter = Arc::new(ResultConverter::new(
			backend.clone(),
			Arc::new(SubsidyParams::mainnet()),
		));
		barrier.spawn(run_mempool_consumer(
			client.clone(),
			converter,
			hub.explorer_mempool_tx.subscribe()?,
			shutdown.token(),
		));

		let monitor = ChainMonitor::new(
			client.clone(),
			backend.clone(),
			hub.clone(),
			ReorgCoordinator::new(config.sync.max_reorg_depth),
			connection,
		);
		monitor_result = monitor.run(shutdown.token()).await;
	}

	// The monitor only returns early on a fatal error; stop everything else too.
	shutdown.trigger();
	hub.close();
	barrier.wait().await;

	backend.persist().await?;
	monitor_result?;
	Ok(backend.last_synced_height().await)
}
