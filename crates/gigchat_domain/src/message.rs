#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageId, ProposalId, UserId};

/// Sender identity snapshot taken at write time.
///
/// `id` is absent for system-generated notices; `name` is denormalized so
/// history stays readable if the user record changes later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSender {
	pub id: Option<UserId>,
	pub name: String,
}

/// One attachment of a chat message.
///
/// The file bytes live in the upload store; only the derived download URL
/// travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireAttachment {
	pub filename: String,
	pub url: String,
	pub mimetype: String,
	pub size: u64,
	#[serde(rename = "uploadedAt")]
	pub uploaded_at: DateTime<Utc>,
}

/// Normalized chat message as broadcast to room members and returned by the
/// history endpoint. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
	#[serde(rename = "_id")]
	pub id: MessageId,
	#[serde(rename = "proposalId")]
	pub proposal_id: ProposalId,
	pub message: String,
	pub sender: WireSender,
	pub attachments: Vec<WireAttachment>,
	#[serde(rename = "createdAt")]
	pub created_at: DateTime<Utc>,
	#[serde(rename = "updatedAt")]
	pub updated_at: DateTime<Utc>,
}

impl WireMessage {
	/// Whether the message satisfies the content invariant: non-empty body
	/// or at least one attachment.
	pub fn has_content(&self) -> bool {
		!self.message.trim().is_empty() || !self.attachments.is_empty()
	}
}
