#![forbid(unsafe_code)]

use gigchat_domain::{ParticipantRole, ProposalId, UserId};
use thiserror::Error;

use crate::server::store::Directory;

/// Why a conversation access check did not grant a role. `ProposalNotFound`
/// and `NotParticipant` are deliberately distinct so callers can surface
/// 404-style and 403-style failures differently.
#[derive(Debug, Error)]
pub enum AccessDenied {
	#[error("proposal not found")]
	ProposalNotFound,
	#[error("not authorized for this conversation")]
	NotParticipant,
	#[error("participant lookup failed")]
	Lookup(#[source] anyhow::Error),
}

/// The single authorization choke point for conversation access.
///
/// Grants `Freelancer` if the identity is the proposal's freelancer, `Client`
/// if it owns the proposal's project, and denies everyone else. Called by the
/// socket join handler, the socket message handler, and the HTTP message
/// routes alike; read-only, and never cached across calls because the
/// underlying relationship can change after a join.
pub async fn authorize(
	directory: &dyn Directory,
	proposal_id: ProposalId,
	user_id: UserId,
) -> Result<ParticipantRole, AccessDenied> {
	let parties = directory
		.proposal_parties(proposal_id)
		.await
		.map_err(AccessDenied::Lookup)?;

	let Some(parties) = parties else {
		return Err(AccessDenied::ProposalNotFound);
	};

	if user_id == parties.freelancer {
		Ok(ParticipantRole::Freelancer)
	} else if user_id == parties.client {
		Ok(ParticipantRole::Client)
	} else {
		Err(AccessDenied::NotParticipant)
	}
}
