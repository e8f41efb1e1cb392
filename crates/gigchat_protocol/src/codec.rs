#![forbid(unsafe_code)]

use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent};

/// Default maximum size of a single inbound event frame.
pub const DEFAULT_MAX_EVENT_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("event exceeds maximum size: len={len} max={max}")]
	EventTooLarge {
		len: usize,
		max: usize,
	},

	#[error("invalid event: {0}")]
	Invalid(#[from] serde_json::Error),
}

/// Decode and validate one inbound text frame.
///
/// Unknown event names, missing fields, and malformed room identifiers all
/// fail here, before any handler runs.
pub fn decode_client_event(text: &str, max_size: usize) -> Result<ClientEvent, ProtocolError> {
	if text.len() > max_size {
		return Err(ProtocolError::EventTooLarge {
			len: text.len(),
			max: max_size,
		});
	}

	Ok(serde_json::from_str(text)?)
}

/// Encode one outbound event as a text frame.
pub fn encode_server_event(event: &ServerEvent) -> Result<String, ProtocolError> {
	Ok(serde_json::to_string(event)?)
}
