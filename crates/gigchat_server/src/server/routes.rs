#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use gigchat_domain::{ProposalId, SecretString, UserId, WireMessage};
use gigchat_protocol::ServerEvent;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::server::auth::{self, AuthError, Session, constant_time_eq};
use crate::server::connection::ws_handler;
use crate::server::error::ApiError;
use crate::server::notify::Notifier;
use crate::server::pipeline::MessagePipeline;
use crate::server::room_hub::RoomHub;
use crate::server::store::{Directory, NewAttachment};
use crate::server::uploads::{UploadError, UploadStore};

/// Readiness latch. Flipped once startup (config, storage, upload dir) has
/// completed; `/readyz` reports 503 until then.
#[derive(Debug, Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Release);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Acquire)
	}
}

#[derive(Clone)]
pub struct AppState {
	pub hmac_secret: SecretString,
	/// Shared secret for the internal notification ingress. `None` disables
	/// the endpoint entirely.
	pub service_token: Option<SecretString>,
	pub directory: Arc<dyn Directory>,
	pub pipeline: Arc<MessagePipeline>,
	pub hub: RoomHub,
	pub notifier: Notifier,
	pub uploads: Arc<UploadStore>,
	pub health: HealthState,
	pub next_conn_id: Arc<AtomicU64>,
}

pub fn build_router(state: AppState) -> Router {
	let cors = CorsLayer::new()
		.allow_origin(Any)
		.allow_methods([Method::GET, Method::POST, Method::OPTIONS])
		.allow_headers(Any);

	// Leave headroom above the per-file cap for multipart framing and the
	// optional message field.
	let body_limit = state.uploads.max_file_bytes() as usize * state.uploads.max_files() + 64 * 1024;

	Router::new()
		.route("/healthz", get(healthz))
		.route("/readyz", get(readyz))
		.route("/ws", get(ws_handler))
		.route("/api/messages/:proposal_id", get(get_history).post(post_message))
		.route("/api/messages/:proposal_id/upload", post(post_upload))
		.route("/uploads/:stored_name", get(get_upload))
		.route("/internal/events", post(post_internal_event))
		.layer(DefaultBodyLimit::max(body_limit))
		.layer(cors)
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
	Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn readyz(State(state): State<AppState>) -> Response {
	if state.health.is_ready() {
		(StatusCode::OK, Json(json!({ "ready": true }))).into_response()
	} else {
		(StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "ready": false }))).into_response()
	}
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
	headers
		.get(header::AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.strip_prefix("Bearer "))
		.map(str::trim)
		.filter(|v| !v.is_empty())
		.ok_or(AuthError::Missing)
}

async fn session_from_headers(state: &AppState, headers: &HeaderMap) -> Result<Session, ApiError> {
	let token = bearer_token(headers)?;
	Ok(auth::authenticate(state.directory.as_ref(), token, state.hmac_secret.expose()).await?)
}

fn parse_proposal_id(raw: &str) -> Result<ProposalId, ApiError> {
	raw.parse().map_err(|_| ApiError::BadRequest("invalid proposal id".to_string()))
}

async fn get_history(
	State(state): State<AppState>,
	Path(proposal_id): Path<String>,
	headers: HeaderMap,
) -> Result<Json<Vec<WireMessage>>, ApiError> {
	let session = session_from_headers(&state, &headers).await?;
	let proposal_id = parse_proposal_id(&proposal_id)?;

	let messages = state.pipeline.history(&session, proposal_id).await?;
	Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
struct SendMessageBody {
	message: String,
}

async fn post_message(
	State(state): State<AppState>,
	Path(proposal_id): Path<String>,
	headers: HeaderMap,
	Json(body): Json<SendMessageBody>,
) -> Result<(StatusCode, Json<WireMessage>), ApiError> {
	let session = session_from_headers(&state, &headers).await?;
	let proposal_id = parse_proposal_id(&proposal_id)?;

	let stored = state.pipeline.send(&session, proposal_id, &body.message, Vec::new()).await?;
	Ok((StatusCode::CREATED, Json(stored)))
}

async fn post_upload(
	State(state): State<AppState>,
	Path(proposal_id): Path<String>,
	headers: HeaderMap,
	mut multipart: Multipart,
) -> Result<(StatusCode, Json<WireMessage>), ApiError> {
	let session = session_from_headers(&state, &headers).await?;
	let proposal_id = parse_proposal_id(&proposal_id)?;

	let mut message = String::new();
	let mut attachments: Vec<NewAttachment> = Vec::new();

	while let Some(field) = multipart
		.next_field()
		.await
		.map_err(|e| ApiError::BadRequest(format!("multipart error: {e}")))?
	{
		let name = field.name().unwrap_or("").to_string();
		match name.as_str() {
			"message" => {
				message = field
					.text()
					.await
					.map_err(|e| ApiError::BadRequest(format!("failed to read message field: {e}")))?;
			}
			"files" => {
				if attachments.len() >= state.uploads.max_files() {
					return Err(UploadError::TooManyFiles {
						count: attachments.len() + 1,
						max: state.uploads.max_files(),
					}
					.into());
				}

				let filename = field.file_name().unwrap_or("attachment").to_string();
				let mimetype = field.content_type().unwrap_or("application/octet-stream").to_string();
				let data = field
					.bytes()
					.await
					.map_err(|e| ApiError::BadRequest(format!("failed to read file field: {e}")))?;

				attachments.push(state.uploads.store_file(&filename, &mimetype, &data).await?);
			}
			_ => {}
		}
	}

	if attachments.is_empty() {
		return Err(ApiError::BadRequest("missing 'files' field in multipart form".to_string()));
	}

	info!(%proposal_id, files = attachments.len(), "attachments uploaded");

	let stored = state.pipeline.send(&session, proposal_id, &message, attachments).await?;
	Ok((StatusCode::CREATED, Json(stored)))
}

async fn get_upload(State(state): State<AppState>, Path(stored_name): Path<String>) -> Result<Response, ApiError> {
	let bytes = state.uploads.read_file(&stored_name).await?;
	Ok((
		StatusCode::OK,
		[(header::CONTENT_TYPE, "application/octet-stream")],
		bytes,
	)
		.into_response())
}

/// Notification request from the marketplace application. The event payload
/// reuses the socket event encoding so a `proposalAccepted` posted here looks
/// identical to one observed on a private channel.
#[derive(Debug, Deserialize)]
struct NotifyRequest {
	users: Vec<UserId>,
	#[serde(flatten)]
	event: ServerEvent,
}

async fn post_internal_event(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(req): Json<NotifyRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
	let Some(expected) = state.service_token.as_ref() else {
		return Err(ApiError::NotFound);
	};

	let provided = bearer_token(&headers)?;
	if !constant_time_eq(provided.as_bytes(), expected.expose().as_bytes()) {
		return Err(ApiError::Unauthorized);
	}

	if req.users.is_empty() {
		return Err(ApiError::BadRequest("users list cannot be empty".to_string()));
	}

	if !state.notifier.notify(&req.users, &req.event).await {
		return Err(ApiError::BadRequest(format!(
			"event '{}' is not a deliverable notification",
			req.event.name()
		)));
	}

	Ok((StatusCode::ACCEPTED, Json(json!({ "delivered": req.users.len() }))))
}
