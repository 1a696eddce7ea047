//! Typed notification conduits.
//!
//! A `Conduit<T>` is a named single-consumer channel with a fixed capacity and an enabled flag set at
//! construction. A capacity of zero makes it a rendezvous: `publish` returns only once the
//! subscriber has taken the message. A disabled conduit accepts publishes as no-ops and hands out
//! subscriptions that never deliver, so callers need no special-casing.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Error types for conduit operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConduitError {
	#[error("Conduit {0} is closed")]
	Closed(&'static str),

	#[error("Conduit {0} is full")]
	Full(&'static str),

	#[error("Conduit {0} is disabled")]
	Disabled(&'static str),

	#[error("Conduit {0} already has a subscriber")]
	AlreadySubscribed(&'static str),
}

struct Envelope<T> {
	message: T,
	/// Present on rendezvous conduits; fired once the subscriber takes the message.
	ack: Option<oneshot::Sender<()>>,
}

pub struct Conduit<T> {
	name: &'static str,
	capacity: usize,
	enabled: bool,
	sender: Mutex<Option<mpsc::Sender<Envelope<T>>>>,
	receiver: Mutex<Option<mpsc::Receiver<Envelope<T>>>>,
	closed: AtomicBool,
}

impl<T: Send> Conduit<T> {
	pub fn new(name: &'static str, capacity: usize, enabled: bool) -> Self {
		let (sender, receiver) = if enabled {
			// A rendezvous still needs one slot to hand the envelope over.
			let (tx, rx) = mpsc::channel(capacity.max(1));
			(Some(tx), Some(rx))
		} else {
			(None, None)
		};
		Self {
			name,
			capacity,
			enabled,
			sender: Mutex::new(sender),
			receiver: Mutex::new(receiver),
			closed: AtomicBool::new(false),
		}
	}

	pub fn disabled(name: &'static str) -> Self {
		Self::new(name, 0, false)
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	fn current_sender(&self) -> Result<mpsc::Sender<Envelope<T>>, ConduitError> {
		self.sender
			.lock()
			.ok()
			.and_then(|s| s.clone())
			.ok_or(ConduitError::Closed(self.name))
	}

	/// Publish a message, waiting for buffer space or, on a rendezvous conduit, for the subscriber
	/// to take it. Publishing to a disabled conduit returns immediately.
	pub async fn publish(&self, message: T) -> Result<(), ConduitError> {
		if !self.enabled {
			return Ok(());
		}
		let sender = self.current_sender()?;

		if self.capacity > 0 {
			return sender
				.send(Envelope { message, ack: None })
				.await
				.map_err(|_| ConduitError::Closed(self.name));
		}

		let (ack_tx, ack_rx) = oneshot::channel();
		sender
			.send(Envelope {
				message,
				ack: Some(ack_tx),
			})
			.await
			.map_err(|_| ConduitError::Closed(self.name))?;
		drop(sender);
		ack_rx.await.map_err(|_| ConduitError::Closed(self.name))
	}

	/// Publish without waiting. Rendezvous conduits only hand the message over; they do not wait
	/// for the subscriber to take it.
	pub fn try_publish(&self, message: T) -> Result<(), ConduitError> {
		if !self.enabled {
			return Err(ConduitError::Disabled(self.name));
		}
		let sender = self.current_sender()?;
		sender
			.try_send(Envelope { message, ack: None })
			.map_err(|e| match e {
				mpsc::error::TrySendError::Full(_) => ConduitError::Full(self.name),
				mpsc::error::TrySendError::Closed(_) => ConduitError::Closed(self.name),
			})
	}

	/// Take the receiving side. A disabled conduit yields a subscription that never delivers.
	pub fn subscribe(&self) -> Result<Subscription<T>, ConduitError> {
		if !self.enabled {
			return Ok(Subscription {
				name: self.name,
				receiver: None,
			});
		}
		let receiver = self
			.receiver
			.lock()
			.ok()
			.and_then(|mut r| r.take())
			.ok_or(ConduitError::AlreadySubscribed(self.name))?;
		Ok(Subscription {
			name: self.name,
			receiver: Some(receiver),
		})
	}

	/// Close the conduit. Messages already buffered are still delivered; later publishes fail.
	pub fn close(&self) -> Result<(), ConduitError> {
		if self.closed.swap(true, Ordering::SeqCst) {
			return Err(ConduitError::Closed(self.name));
		}
		if let Ok(mut sender) = self.sender.lock() {
			sender.take();
		}
		debug!("Closed conduit {}", self.name);
		Ok(())
	}
}

/// Receiving side of a conduit.
pub struct Subscription<T> {
	name: &'static str,
	receiver: Option<mpsc::Receiver<Envelope<T>>>,
}

impl<T> Subscription<T> {
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Whether this subscription can ever deliver.
	pub fn is_active(&self) -> bool {
		self.receiver.is_some()
	}

	/// Next message, or `None` once the conduit is closed and drained. Returns `None` immediately
	/// on a disabled conduit.
	pub async fn recv(&mut self) -> Option<T> {
		let envelope = self.receiver.as_mut()?.recv().await?;
		if let Some(ack) = envelope.ack {
			// The publisher may have stopped waiting; nothing to do then.
			let _ = ack.send(());
		}
		Some(envelope.message)
	}
}
