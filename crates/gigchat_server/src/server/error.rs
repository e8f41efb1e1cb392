#![forbid(unsafe_code)]

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::server::access::AccessDenied;
use crate::server::auth::AuthError;
use crate::server::pipeline::SendError;
use crate::server::uploads::UploadError;

/// HTTP-facing error taxonomy. Internal detail never crosses the wire; it is
/// logged here and collapsed to a generic 500 body.
#[derive(Debug, Error)]
pub enum ApiError {
	#[error("unauthorized")]
	Unauthorized,
	#[error("forbidden")]
	Forbidden,
	#[error("not found")]
	NotFound,
	#[error("{0}")]
	BadRequest(String),
	#[error("internal error")]
	Internal(#[source] anyhow::Error),
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let (status, message) = match self {
			ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
			ApiError::Forbidden => (StatusCode::FORBIDDEN, "not authorized for this conversation".to_string()),
			ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
			ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
			ApiError::Internal(err) => {
				error!(error = ?err, "internal error");
				(StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
			}
		};

		(status, Json(json!({ "error": message }))).into_response()
	}
}

impl From<AuthError> for ApiError {
	fn from(err: AuthError) -> Self {
		match err {
			AuthError::Lookup(err) => ApiError::Internal(err),
			AuthError::Missing
			| AuthError::Malformed
			| AuthError::BadSignature
			| AuthError::Expired
			| AuthError::UnknownUser => ApiError::Unauthorized,
		}
	}
}

impl From<AccessDenied> for ApiError {
	fn from(err: AccessDenied) -> Self {
		match err {
			AccessDenied::ProposalNotFound => ApiError::NotFound,
			AccessDenied::NotParticipant => ApiError::Forbidden,
			AccessDenied::Lookup(err) => ApiError::Internal(err),
		}
	}
}

impl From<SendError> for ApiError {
	fn from(err: SendError) -> Self {
		match err {
			SendError::EmptyMessage => ApiError::BadRequest("message cannot be empty".to_string()),
			SendError::NotFound => ApiError::NotFound,
			SendError::Forbidden => ApiError::Forbidden,
			SendError::Persistence(err) | SendError::Lookup(err) => ApiError::Internal(err),
		}
	}
}

impl From<UploadError> for ApiError {
	fn from(err: UploadError) -> Self {
		match err {
			UploadError::NotFound => ApiError::NotFound,
			UploadError::Io(err) => ApiError::Internal(err.into()),
			other => ApiError::BadRequest(other.to_string()),
		}
	}
}
