#![forbid(unsafe_code)]

use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use gigchat_domain::Room;
use gigchat_protocol::{ClientEvent, DEFAULT_MAX_EVENT_SIZE, ServerEvent, decode_client_event, encode_server_event};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::access;
use crate::server::auth::{self, AuthError, Session};
use crate::server::error::ApiError;
use crate::server::room_hub::{ConnId, JoinOutcome};
use crate::server::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
	/// Fallback credential slot for clients that cannot set headers during
	/// the websocket handshake.
	token: Option<String>,
}

/// Socket entry point. Authentication happens before the upgrade completes;
/// a bad credential is refused with a 401 and no socket is ever established.
pub async fn ws_handler(
	State(state): State<AppState>,
	Query(query): Query<WsQuery>,
	headers: HeaderMap,
	ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
	let token = bearer_token(&headers).or(query.token).ok_or(AuthError::Missing)?;
	let session = auth::authenticate(state.directory.as_ref(), &token, state.hmac_secret.expose()).await?;

	let conn_id = state.next_conn_id.fetch_add(1, Ordering::Relaxed);
	metrics::counter!("gigchat_connections_total").increment(1);
	info!(conn_id, user_id = %session.user_id, "socket authenticated");

	Ok(ws.on_upgrade(move |socket| run_connection(state, session, conn_id, socket)))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
	headers
		.get(axum::http::header::AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.strip_prefix("Bearer "))
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty())
}

async fn run_connection(state: AppState, session: Session, conn_id: ConnId, socket: WebSocket) {
	let (mut outgoing, mut incoming) = socket.split();
	let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.hub.member_queue_capacity());

	// Single writer per socket: everything this connection should see flows
	// through the channel, whether it came from a room or from its own
	// handler below.
	let writer = tokio::spawn(async move {
		while let Some(event) = rx.recv().await {
			let text = match encode_server_event(&event) {
				Ok(text) => text,
				Err(err) => {
					warn!(conn_id, error = %err, "failed to encode outbound event");
					continue;
				}
			};
			if outgoing.send(Message::Text(text)).await.is_err() {
				break;
			}
		}
	});

	while let Some(frame) = incoming.next().await {
		let Ok(frame) = frame else {
			break;
		};

		match frame {
			Message::Text(text) => {
				let event = match decode_client_event(&text, DEFAULT_MAX_EVENT_SIZE) {
					Ok(event) => event,
					Err(err) => {
						debug!(conn_id, error = %err, "rejected inbound event");
						send_error(&tx, "invalid event").await;
						continue;
					}
				};
				handle_event(&state, &session, conn_id, &tx, event).await;
			}
			Message::Close(_) => break,
			// Ping/pong are answered by the transport; binary frames are not
			// part of the protocol.
			Message::Binary(_) => send_error(&tx, "binary frames are not supported").await,
			Message::Ping(_) | Message::Pong(_) => {}
		}
	}

	// Membership dies with the connection. Conversation peers are told the
	// user left; private channels disappear silently.
	let left = state.hub.disconnect(conn_id).await;
	for room in left {
		if matches!(room, Room::Proposal(_)) {
			state
				.hub
				.publish(
					room,
					&ServerEvent::UserLeft {
						user_id: session.user_id,
						username: session.display_name.clone(),
						room,
					},
				)
				.await;
		}
	}

	writer.abort();
	info!(conn_id, user_id = %session.user_id, "socket closed");
}

async fn handle_event(
	state: &AppState,
	session: &Session,
	conn_id: ConnId,
	tx: &mpsc::Sender<ServerEvent>,
	event: ClientEvent,
) {
	match event {
		ClientEvent::JoinRoom { room } => handle_join(state, session, conn_id, tx, room).await,
		ClientEvent::LeaveRoom { room } => handle_leave(state, session, conn_id, room).await,
		ClientEvent::ChatMessage { room, message } => {
			let Room::Proposal(proposal_id) = room else {
				send_error(tx, "messages can only be sent to conversation rooms").await;
				return;
			};

			// Errors stay with the sender. Peers in the room never learn a
			// send was attempted.
			if let Err(err) = state.pipeline.send(session, proposal_id, &message, Vec::new()).await {
				send_error(tx, &err.to_string()).await;
			}
		}
	}
}

async fn handle_join(state: &AppState, session: &Session, conn_id: ConnId, tx: &mpsc::Sender<ServerEvent>, room: Room) {
	match room {
		Room::Proposal(proposal_id) => {
			if let Err(err) = access::authorize(state.directory.as_ref(), proposal_id, session.user_id).await {
				debug!(conn_id, %room, error = %err, "join refused");
				send_error(tx, &err.to_string()).await;
				return;
			}

			let outcome = state.hub.join(room, conn_id, tx.clone()).await;
			if outcome == JoinOutcome::Joined {
				state
					.hub
					.publish_to_others(
						room,
						conn_id,
						&ServerEvent::UserJoined {
							user_id: session.user_id,
							username: session.display_name.clone(),
							room,
						},
					)
					.await;
			}
		}
		Room::User(user_id) => {
			// A private channel belongs to exactly one identity.
			if user_id != session.user_id {
				send_error(tx, "cannot join another user's private channel").await;
				return;
			}
			state.hub.join(room, conn_id, tx.clone()).await;
		}
	}
}

async fn handle_leave(state: &AppState, session: &Session, conn_id: ConnId, room: Room) {
	let was_member = state.hub.leave(room, conn_id).await;
	if was_member && matches!(room, Room::Proposal(_)) {
		state
			.hub
			.publish(
				room,
				&ServerEvent::UserLeft {
					user_id: session.user_id,
					username: session.display_name.clone(),
					room,
				},
			)
			.await;
	}
}

async fn send_error(tx: &mpsc::Sender<ServerEvent>, message: &str) {
	let _ = tx
		.send(ServerEvent::ChatError {
			message: message.to_string(),
		})
		.await;
}
