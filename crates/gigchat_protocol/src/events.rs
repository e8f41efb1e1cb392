#![forbid(unsafe_code)]

use gigchat_domain::{ProposalId, Room, UserId, WireMessage};
use serde::{Deserialize, Serialize};

/// Events a client may send over the socket.
///
/// Payloads are validated while decoding (room names must parse), so
/// handlers never see a loosely-shaped object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
	JoinRoom {
		room: Room,
	},
	LeaveRoom {
		room: Room,
	},
	ChatMessage {
		room: Room,
		message: String,
	},
}

/// Events the server emits to clients.
///
/// `ChatMessage` is broadcast to a conversation room only after the message
/// is durably written. `ChatError` goes to a single sender, never to a room.
/// The business notifications are delivered to `user_<id>` private channels
/// at most once, with no retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
	ChatMessage(WireMessage),
	ChatError {
		message: String,
	},
	#[serde(rename_all = "camelCase")]
	UserJoined {
		user_id: UserId,
		username: String,
		room: Room,
	},
	#[serde(rename_all = "camelCase")]
	UserLeft {
		user_id: UserId,
		username: String,
		room: Room,
	},
	#[serde(rename_all = "camelCase")]
	ProposalAccepted {
		proposal_id: ProposalId,
	},
	#[serde(rename_all = "camelCase")]
	ContractGenerated {
		proposal_id: ProposalId,
	},
	#[serde(rename_all = "camelCase")]
	ContractSigned {
		proposal_id: ProposalId,
	},
	#[serde(rename_all = "camelCase")]
	DeliverablesUploaded {
		proposal_id: ProposalId,
	},
	#[serde(rename_all = "camelCase")]
	MilestoneCompleted {
		proposal_id: ProposalId,
		milestone: u32,
	},
	#[serde(rename_all = "camelCase")]
	PaymentReceived {
		proposal_id: ProposalId,
		amount: String,
	},
}

impl ServerEvent {
	/// Whether this event is an out-of-band business notification (as
	/// opposed to conversation traffic or a sender-only error).
	pub const fn is_notification(&self) -> bool {
		matches!(
			self,
			ServerEvent::ProposalAccepted { .. }
				| ServerEvent::ContractGenerated { .. }
				| ServerEvent::ContractSigned { .. }
				| ServerEvent::DeliverablesUploaded { .. }
				| ServerEvent::MilestoneCompleted { .. }
				| ServerEvent::PaymentReceived { .. }
		)
	}

	/// Stable event name as it appears in the wire tag.
	pub const fn name(&self) -> &'static str {
		match self {
			ServerEvent::ChatMessage(_) => "chatMessage",
			ServerEvent::ChatError { .. } => "chatError",
			ServerEvent::UserJoined { .. } => "userJoined",
			ServerEvent::UserLeft { .. } => "userLeft",
			ServerEvent::ProposalAccepted { .. } => "proposalAccepted",
			ServerEvent::ContractGenerated { .. } => "contractGenerated",
			ServerEvent::ContractSigned { .. } => "contractSigned",
			ServerEvent::DeliverablesUploaded { .. } => "deliverablesUploaded",
			ServerEvent::MilestoneCompleted { .. } => "milestoneCompleted",
			ServerEvent::PaymentReceived { .. } => "paymentReceived",
		}
	}
}
