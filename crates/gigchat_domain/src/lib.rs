#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod message;
mod secret;

pub use message::{WireAttachment, WireMessage, WireSender};
pub use secret::SecretString;

/// Errors for parsing identifiers and room names from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid id: {0}")]
	InvalidId(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

macro_rules! uuid_id {
	($(#[$doc:meta])* $name:ident) => {
		$(#[$doc])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub uuid::Uuid);

		impl $name {
			/// Create a new random id.
			pub fn new_v4() -> Self {
				Self(uuid::Uuid::new_v4())
			}

			pub fn as_uuid(&self) -> &uuid::Uuid {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				let s = s.trim();
				if s.is_empty() {
					return Err(ParseIdError::Empty);
				}
				uuid::Uuid::parse_str(s).map(Self).map_err(|_| ParseIdError::InvalidId(s.to_string()))
			}
		}
	};
}

uuid_id!(
	/// Identity of a marketplace user (client or freelancer).
	UserId
);
uuid_id!(
	/// Identity of a project posted by a client.
	ProjectId
);
uuid_id!(
	/// Identity of a proposal; a conversation is keyed 1:1 by this.
	ProposalId
);
uuid_id!(
	/// Server-assigned chat message identifier.
	MessageId
);

/// Role of an identity within one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
	/// The owner of the project the proposal targets.
	Client,
	/// The freelancer who submitted the proposal.
	Freelancer,
}

impl ParticipantRole {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			ParticipantRole::Client => "client",
			ParticipantRole::Freelancer => "freelancer",
		}
	}
}

impl fmt::Display for ParticipantRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Transport-level broadcast group address.
///
/// `proposal_<uuid>` names a conversation room with exactly two eligible
/// participants; `user_<uuid>` names the private notification channel of a
/// single identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
	Proposal(ProposalId),
	User(UserId),
}

impl Room {
	/// Prefix for conversation rooms.
	pub const PROPOSAL_PREFIX: &'static str = "proposal_";
	/// Prefix for private per-user channels.
	pub const USER_PREFIX: &'static str = "user_";

	/// Whether this room is a conversation (as opposed to a private channel).
	pub const fn is_conversation(&self) -> bool {
		matches!(self, Room::Proposal(_))
	}

	/// The conversation id, if this is a conversation room.
	pub fn proposal_id(&self) -> Option<ProposalId> {
		match self {
			Room::Proposal(id) => Some(*id),
			Room::User(_) => None,
		}
	}

	/// Parse a room name of the form `proposal_<uuid>` or `user_<uuid>`.
	pub fn parse(s: &str) -> Result<Self, ParseIdError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		if let Some(rest) = s.strip_prefix(Self::PROPOSAL_PREFIX) {
			return rest.parse::<ProposalId>().map(Room::Proposal);
		}
		if let Some(rest) = s.strip_prefix(Self::USER_PREFIX) {
			return rest.parse::<UserId>().map(Room::User);
		}

		Err(ParseIdError::InvalidFormat(
			"expected proposal_<id> or user_<id>".to_string(),
		))
	}
}

impl fmt::Display for Room {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Room::Proposal(id) => write!(f, "{}{}", Self::PROPOSAL_PREFIX, id),
			Room::User(id) => write!(f, "{}{}", Self::USER_PREFIX, id),
		}
	}
}

impl FromStr for Room {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Room::parse(s)
	}
}

impl Serialize for Room {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for Room {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Room::parse(&s).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn room_parse_roundtrip() {
		let pid = ProposalId::new_v4();
		let room = Room::Proposal(pid);
		let parsed: Room = room.to_string().parse().unwrap();
		assert_eq!(parsed, room);
		assert!(parsed.is_conversation());
		assert_eq!(parsed.proposal_id(), Some(pid));

		let uid = UserId::new_v4();
		let room = Room::User(uid);
		let parsed: Room = room.to_string().parse().unwrap();
		assert_eq!(parsed, room);
		assert!(!parsed.is_conversation());
	}

	#[test]
	fn room_rejects_malformed_names() {
		assert!(Room::parse("").is_err());
		assert!(Room::parse("lobby").is_err());
		assert!(Room::parse("proposal_").is_err());
		assert!(Room::parse("proposal_not-a-uuid").is_err());
		assert!(Room::parse("user_42").is_err());
	}

	#[test]
	fn room_serde_uses_string_form() {
		let room = Room::User(UserId::new_v4());
		let json = serde_json::to_string(&room).unwrap();
		assert_eq!(json, format!("\"{room}\""));
		let back: Room = serde_json::from_str(&json).unwrap();
		assert_eq!(back, room);
	}

	#[test]
	fn role_display() {
		assert_eq!(ParticipantRole::Client.to_string(), "client");
		assert_eq!(ParticipantRole::Freelancer.to_string(), "freelancer");
	}

	#[test]
	fn ids_reject_empty_and_garbage() {
		assert!("".parse::<UserId>().is_err());
		assert!("  ".parse::<ProposalId>().is_err());
		assert!("xyz".parse::<MessageId>().is_err());
	}
}
