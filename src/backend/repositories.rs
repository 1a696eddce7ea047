use crate::backend::BackendError;
use crate::chain::ChainHeight;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Repository for block index snapshots
#[async_trait::async_trait]
pub trait SnapshotRepository {
	async fn save(&self, state: &[u8], height: ChainHeight) -> Result<(), BackendError>;
	async fn load(&self) -> Result<Option<(Vec<u8>, ChainHeight)>, BackendError>;
}

/// File-based implementation of SnapshotRepository
pub struct FileSnapshotRepository {
	data_dir: PathBuf,
	name: String,
}

impl FileSnapshotRepository {
	pub fn new(data_dir: PathBuf, name: &str) -> Self {
		Self {
			data_dir,
			name: name.to_string(),
		}
	}

	fn get_state_filename(&self) -> PathBuf {
		self.data_dir.join(format!("{}_snapshot.bin", self.name))
	}

	fn get_metadata_filename(&self) -> PathBuf {
		self.data_dir.join(format!("{}_snapshot.meta.json", self.name))
	}
}

/// Write through a temporary file so a crash never leaves a torn snapshot behind.
async fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), BackendError> {
	let tmp = path.with_extension("tmp");
	tokio::fs::write(&tmp, contents).await?;
	tokio::fs::rename(&tmp, path).await?;
	Ok(())
}

#[async_trait::async_trait]
impl SnapshotRepository for FileSnapshotRepository {
	async fn save(&self, state: &[u8], height: ChainHeight) -> Result<(), BackendError> {
		tokio::fs::create_dir_all(&self.data_dir).await?;

		// State first, so metadata never points past what is on disk
		let filename = self.get_state_filename();
		write_atomically(&filename, state).await?;

		let metadata = serde_json::json!({
			"sync_height": height,
			"timestamp": chrono::Utc::now().to_rfc3339(),
		});
		let metadata = serde_json::to_vec_pretty(&metadata)
			.map_err(|e| BackendError::Snapshot(format!("Failed to encode metadata: {}", e)))?;
		write_atomically(&self.get_metadata_filename(), &metadata).await?;

		info!("Saved {} snapshot to {:?} at height {}", self.name, filename, height);
		Ok(())
	}

	async fn load(&self) -> Result<Option<(Vec<u8>, ChainHeight)>, BackendError> {
		let filename = self.get_state_filename();
		if !filename.exists() {
			return Ok(None);
		}

		let mut height: ChainHeight = -1;
		match tokio::fs::read_to_string(self.get_metadata_filename()).await {
			Ok(meta_content) => {
				if let Some(h) = serde_json::from_str::<serde_json::Value>(&meta_content)
					.ok()
					.and_then(|m| m.get("sync_height").and_then(|h| h.as_i64()))
				{
					height = h;
				}
			}
			Err(e) => warn!("Snapshot metadata for {} unreadable: {}", self.name, e),
		}

		let state = tokio::fs::read(&filename).await?;
		info!(
			"Loaded {} snapshot from {:?} at height {}",
			self.name, filename, height
		);
		Ok(Some((state, height)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn save_then_load_returns_state_and_height() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FileSnapshotRepository::new(dir.path().join("nested").join("dir"), "embedded");

		assert!(repo.load().await.unwrap().is_none());

		repo.save(b"state-bytes", 42).await.unwrap();
		let (state, height) = repo.load().await.unwrap().unwrap();
		assert_eq!(state, b"state-bytes");
		assert_eq!(height, 42);
	}

	#[tokio::test]
	async fn missing_metadata_reports_unknown_height() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FileSnapshotRepository::new(dir.path().to_path_buf(), "embedded");
		repo.save(b"x", 7).await.unwrap();
		std::fs::remove_file(repo.get_metadata_filename()).unwrap();

		let (_, height) = repo.load().await.unwrap().unwrap();
		assert_eq!(height, -1);
	}
}
