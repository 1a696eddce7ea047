//!
//! Push notifications from the chain-server.
//!
//! The chain-server pushes block and mempool events over its websocket endpoint once the client
//! registers for them with `notifyblocks` / `notifynewtransactions`. This module opens that
//! connection (authenticating with basic auth and trusting the pinned certificate) and exposes the
//! notifications as an async stream of typed `PushNotification` values.

use super::client::{ConnectionConfig, TlsMode};
use super::types::{ChainError, ChainHeight};
use base64::Engine;
use futures_util::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use std::pin::Pin;
use tokio_tungstenite::{
	Connector, connect_async_tls_with_config,
	tungstenite::{Message, client::IntoClientRequest},
};
use tracing::{debug, error, info};

/// Length of a serialized block header.
const BLOCK_HEADER_LEN: usize = 180;
/// Offset of the previous-block hash inside a serialized header.
const PREV_BLOCK_OFFSET: usize = 4;
/// Offset of the little-endian height inside a serialized header.
const HEIGHT_OFFSET: usize = 128;

/// Which push notifications to register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationFilter {
	pub blocks: bool,
	pub transactions: bool,
}

impl Default for NotificationFilter {
	fn default() -> Self {
		Self {
			blocks: true,
			transactions: false,
		}
	}
}

/// A decoded chain-server push notification.
#[derive(Debug, Clone, PartialEq)]
pub enum PushNotification {
	/// A block was attached to the chain-server's main chain.
	BlockConnected {
		height: ChainHeight,
		previous_hash: String,
	},
	/// A block was detached from the main chain during a reorganization.
	BlockDisconnected {
		height: ChainHeight,
		previous_hash: String,
	},
	/// A transaction entered the mempool.
	TxAccepted { txid: String, amount: f64 },
}

pub type NotificationStream =
	Pin<Box<dyn Stream<Item = Result<PushNotification, ChainError>> + Send>>;

#[derive(Debug, Deserialize)]
struct WsMessage {
	#[serde(default)]
	method: Option<String>,
	#[serde(default)]
	params: Vec<Value>,
	#[serde(default)]
	error: Option<Value>,
}

/// Subscribe to chain-server push notifications.
///
/// # Returns
/// A pinned async stream of notifications. The stream ends when the chain-server closes the
/// connection; callers reconnect as they see fit.
pub async fn subscribe_notifications(
	config: &ConnectionConfig,
	filter: NotificationFilter,
) -> Result<NotificationStream, ChainError> {
	debug!("Attempting WebSocket connection to: {}", config.ws_url());

	let mut request = config.ws_url().into_client_request()?;
	let credentials = base64::engine::general_purpose::STANDARD
		.encode(format!("{}:{}", config.user, config.pass));
	request.headers_mut().insert(
		"Authorization",
		format!("Basic {}", credentials).parse().map_err(|_| {
			ChainError::InvalidInput("Invalid authorization header value".to_string())
		})?,
	);

	let connector = match &config.tls {
		TlsMode::Disabled => None,
		TlsMode::Certificate(pem) => {
			let certificate = native_tls::Certificate::from_pem(pem).map_err(|e| {
				ChainError::Connection(format!("Invalid chain-server certificate: {}", e))
			})?;
			let tls = native_tls::TlsConnector::builder()
				.add_root_certificate(certificate)
				.build()
				.map_err(|e| ChainError::Connection(format!("TLS setup failed: {}", e)))?;
			Some(Connector::NativeTls(tls))
		}
	};

	let (ws_stream, response) =
		connect_async_tls_with_config(request, None, false, connector).await?;
	debug!(
		"WebSocket connection established, response status: {}",
		response.status()
	);
	let (mut ws_sender, ws_receiver) = ws_stream.split();

	let mut commands = Vec::new();
	if filter.blocks {
		commands.push(json!({"jsonrpc": "1.0", "id": 1, "method": "notifyblocks", "params": []}));
	}
	if filter.transactions {
		commands.push(
			json!({"jsonrpc": "1.0", "id": 2, "method": "notifynewtransactions", "params": [false]}),
		);
	}
	for command in commands {
		ws_sender.send(Message::Text(command.to_string())).await?;
	}
	info!(
		"Registered for chain-server notifications (blocks: {}, transactions: {})",
		filter.blocks, filter.transactions
	);

	let stream = ws_receiver.filter_map(|msg| async move {
		match msg {
			Ok(Message::Text(text)) => decode_notification(&text),
			Ok(Message::Close(_)) => {
				debug!("Chain-server closed the notification connection");
				None
			}
			// Ping/pong and binary frames carry no notifications.
			Ok(_) => None,
			Err(e) => Some(Err(ChainError::WebSocket(e))),
		}
	});

	Ok(Box::pin(stream))
}

/// Decode one websocket text frame.
///
/// Replies to our own registration commands are skipped unless they carry an error.
pub fn decode_notification(text: &str) -> Option<Result<PushNotification, ChainError>> {
	let message: WsMessage = match serde_json::from_str(text) {
		Ok(message) => message,
		Err(e) => return Some(Err(ChainError::Json(e))),
	};

	let Some(method) = message.method else {
		return message
			.error
			.filter(|e| !e.is_null())
			.map(|e| Err(ChainError::Connection(format!("Notification registration failed: {}", e))));
	};

	match method.as_str() {
		"blockconnected" | "blockdisconnected" => {
			let header_hex = message.params.first().and_then(Value::as_str).unwrap_or("");
			let decoded = decode_header(header_hex).map(|(height, previous_hash)| {
				if method == "blockconnected" {
					PushNotification::BlockConnected {
						height,
						previous_hash,
					}
				} else {
					PushNotification::BlockDisconnected {
						height,
						previous_hash,
					}
				}
			});
			if let Err(e) = &decoded {
				error!("Failed to decode {} header: {}", method, e);
			}
			Some(decoded)
		}
		"txaccepted" => {
			let txid = message.params.first().and_then(Value::as_str);
			let amount = message.params.get(1).and_then(Value::as_f64).unwrap_or(0.0);
			Some(
				txid.map(|txid| PushNotification::TxAccepted {
					txid: txid.to_string(),
					amount,
				})
				.ok_or_else(|| ChainError::InvalidInput("txaccepted without txid".to_string())),
			)
		}
		other => {
			debug!("Ignoring notification: {}", other);
			None
		}
	}
}

/// Extract the height and the display-order previous hash from a serialized header.
fn decode_header(header_hex: &str) -> Result<(ChainHeight, String), ChainError> {
	let bytes = hex::decode(header_hex)
		.map_err(|e| ChainError::InvalidInput(format!("header is not hex: {}", e)))?;
	if bytes.len() < BLOCK_HEADER_LEN {
		return Err(ChainError::InvalidInput(format!(
			"header is {} bytes, expected {}",
			bytes.len(),
			BLOCK_HEADER_LEN
		)));
	}

	let mut previous = bytes[PREV_BLOCK_OFFSET..PREV_BLOCK_OFFSET + 32].to_vec();
	previous.reverse();

	let mut height = [0u8; 4];
	height.copy_from_slice(&bytes[HEIGHT_OFFSET..HEIGHT_OFFSET + 4]);

	Ok((
		ChainHeight::from(u32::from_le_bytes(height)),
		hex::encode(previous),
	))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn header_hex(height: u32, previous_display: &str) -> String {
		let mut bytes = vec![0u8; BLOCK_HEADER_LEN];
		let mut previous = hex::decode(previous_display).unwrap();
		previous.reverse();
		bytes[PREV_BLOCK_OFFSET..PREV_BLOCK_OFFSET + 32].copy_from_slice(&previous);
		bytes[HEIGHT_OFFSET..HEIGHT_OFFSET + 4].copy_from_slice(&height.to_le_bytes());
		hex::encode(bytes)
	}

	#[test]
	fn decodes_block_connected() {
		let previous = format!("{}{}", "00".repeat(31), "ab");
		let text = json!({
			"jsonrpc": "1.0",
			"method": "blockconnected",
			"params": [header_hex(1234, &previous), []],
			"id": null
		})
		.to_string();

		let notification = decode_notification(&text).unwrap().unwrap();
		assert_eq!(
			notification,
			PushNotification::BlockConnected {
				height: 1234,
				previous_hash: previous,
			}
		);
	}

	#[test]
	fn decodes_block_disconnected() {
		let previous = "11".repeat(32);
		let text = json!({"method": "blockdisconnected", "params": [header_hex(9, &previous)]})
			.to_string();
		assert!(matches!(
			decode_notification(&text),
			Some(Ok(PushNotification::BlockDisconnected { height: 9, .. }))
		));
	}

	#[test]
	fn decodes_tx_accepted() {
		let text = json!({"method": "txaccepted", "params": ["beef", 1.25]}).to_string();
		assert_eq!(
			decode_notification(&text).unwrap().unwrap(),
			PushNotification::TxAccepted {
				txid: "beef".to_string(),
				amount: 1.25,
			}
		);
	}

	#[test]
	fn skips_command_replies_and_unknown_methods() {
		assert!(decode_notification(r#"{"result":null,"error":null,"id":1}"#).is_none());
		assert!(decode_notification(r#"{"method":"relevanttxaccepted","params":[]}"#).is_none());
	}

	#[test]
	fn surfaces_registration_errors() {
		let text = r#"{"result":null,"error":{"code":-1,"message":"denied"},"id":1}"#;
		assert!(matches!(
			decode_notification(text),
			Some(Err(ChainError::Connection(_)))
		));
	}

	#[test]
	fn rejects_truncated_headers() {
		let text = json!({"method": "blockconnected", "params": ["abcd"]}).to_string();
		assert!(matches!(
			decode_notification(&text),
			Some(Err(ChainError::InvalidInput(_)))
		));
	}
}
