#![forbid(unsafe_code)]

use std::sync::Arc;

use gigchat_domain::{ProposalId, Room, WireMessage};
use gigchat_protocol::ServerEvent;
use thiserror::Error;
use tracing::{debug, warn};

use crate::server::access::{self, AccessDenied};
use crate::server::auth::Session;
use crate::server::room_hub::RoomHub;
use crate::server::store::{Directory, MessageStore, NewAttachment, NewMessage};

/// Why a message was not accepted. Variants map onto the HTTP status the
/// fallback routes return; the socket path reports them as chat errors.
#[derive(Debug, Error)]
pub enum SendError {
	#[error("message cannot be empty")]
	EmptyMessage,
	#[error("proposal not found")]
	NotFound,
	#[error("not authorized for this conversation")]
	Forbidden,
	#[error("failed to persist message")]
	Persistence(#[source] anyhow::Error),
	#[error("participant lookup failed")]
	Lookup(#[source] anyhow::Error),
}

impl From<AccessDenied> for SendError {
	fn from(err: AccessDenied) -> Self {
		match err {
			AccessDenied::ProposalNotFound => SendError::NotFound,
			AccessDenied::NotParticipant => SendError::Forbidden,
			AccessDenied::Lookup(err) => SendError::Lookup(err),
		}
	}
}

/// The single path every chat message takes, whether it arrived over the
/// socket or the HTTP fallback: validate, authorize, persist, then broadcast.
/// Persistence strictly precedes broadcast so no connected client ever sees
/// a message that is absent from history.
#[derive(Clone)]
pub struct MessagePipeline {
	directory: Arc<dyn Directory>,
	store: Arc<dyn MessageStore>,
	hub: RoomHub,
}

impl MessagePipeline {
	pub fn new(directory: Arc<dyn Directory>, store: Arc<dyn MessageStore>, hub: RoomHub) -> Self {
		Self { directory, store, hub }
	}

	/// Accept one message into a conversation. Authorization runs on every
	/// call; a participant removed since their last send is refused here.
	pub async fn send(
		&self,
		session: &Session,
		proposal_id: ProposalId,
		text: &str,
		attachments: Vec<NewAttachment>,
	) -> Result<WireMessage, SendError> {
		let body = text.trim();
		if body.is_empty() && attachments.is_empty() {
			return Err(SendError::EmptyMessage);
		}

		let role = access::authorize(self.directory.as_ref(), proposal_id, session.user_id).await?;

		let stored = self
			.store
			.append(NewMessage {
				proposal_id,
				sender_id: Some(session.user_id),
				sender_name: session.display_name.clone(),
				body: body.to_string(),
				attachments,
			})
			.await
			.map_err(|err| {
				warn!(%proposal_id, error = %err, "message persistence failed, nothing broadcast");
				SendError::Persistence(err)
			})?;

		metrics::counter!("gigchat_messages_persisted_total").increment(1);
		debug!(%proposal_id, message_id = %stored.id, role = %role, "message persisted");

		self.hub
			.publish(Room::Proposal(proposal_id), &ServerEvent::ChatMessage(stored.clone()))
			.await;

		Ok(stored)
	}

	/// Full history of one conversation, oldest first. Access is re-checked
	/// here too; history is as sensitive as live traffic.
	pub async fn history(&self, session: &Session, proposal_id: ProposalId) -> Result<Vec<WireMessage>, SendError> {
		access::authorize(self.directory.as_ref(), proposal_id, session.user_id).await?;

		self.store.history(proposal_id).await.map_err(SendError::Lookup)
	}
}
