//! Shutdown signalling for long-running sync tasks.
//!
//! `ShutdownSignal` is a single-transition flag shared by every task: the first external interrupt
//! trips it and later interrupts have no further effect. Tasks observe it cooperatively at their own
//! checkpoints. `CompletionBarrier` lets the process wait for outstanding sync tasks before it
//! persists state and exits.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

#[derive(Clone, Default)]
pub struct ShutdownSignal {
	token: CancellationToken,
	armed: Arc<AtomicBool>,
}

impl ShutdownSignal {
	pub fn new() -> Self {
		Self::default()
	}

	/// Token handed to tasks that need to observe shutdown.
	pub fn token(&self) -> CancellationToken {
		self.token.clone()
	}

	pub fn is_triggered(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Request shutdown. Only the first request has an effect.
	pub fn trigger(&self) {
		if !self.token.is_cancelled() {
			info!("Shutdown requested");
			self.token.cancel();
		}
	}

	/// Start listening for the process interrupt. Returns false if already armed.
	pub fn arm_interrupt(&self) -> bool {
		if self.armed.swap(true, Ordering::SeqCst) {
			return false;
		}

		let signal = self.clone();
		tokio::spawn(async move {
			tokio::select! {
				result = tokio::signal::ctrl_c() => match result {
					Ok(()) => {
						info!("Received interrupt, shutting down");
						signal.trigger();
					}
					Err(e) => error!("Failed to listen for interrupt: {}", e),
				},
				_ = signal.token.cancelled() => {}
			}
		});
		true
	}
}

/// Tracks outstanding sync tasks so shutdown can wait for them.
#[derive(Clone, Default)]
pub struct CompletionBarrier {
	tracker: TaskTracker,
}

impl CompletionBarrier {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
	where
		F: Future + Send + 'static,
		F::Output: Send + 'static,
	{
		self.tracker.spawn(task)
	}

	pub fn outstanding(&self) -> usize {
		self.tracker.len()
	}

	/// Stop accepting tasks and wait for the tracked ones to finish.
	pub async fn wait(&self) {
		self.tracker.close();
		self.tracker.wait().await;
	}
}
