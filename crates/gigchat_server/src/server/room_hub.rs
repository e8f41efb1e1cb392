#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gigchat_domain::Room;
use gigchat_protocol::ServerEvent;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Identifier of one live connection, assigned at accept time.
pub type ConnId = u64;

/// Configuration for `RoomHub`.
#[derive(Debug, Clone)]
pub struct RoomHubConfig {
	/// Maximum number of queued outbound events per connection.
	pub member_queue_capacity: usize,

	pub debug_logs: bool,
}

impl Default for RoomHubConfig {
	fn default() -> Self {
		Self {
			member_queue_capacity: 256,
			debug_logs: false,
		}
	}
}

/// Result of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
	Joined,
	/// The connection was already a member; joining again is a no-op.
	AlreadyJoined,
}

/// Process-local room membership and fan-out.
///
/// This is the only shared mutable state in the service. It is owned here
/// and mutated exclusively through `join` / `leave` / `disconnect`; all
/// mutation happens within one lock acquisition, never across an await on
/// I/O. Delivery is best-effort: a member whose queue is full misses the
/// event (counted, not retried).
#[derive(Debug, Clone)]
pub struct RoomHub {
	inner: Arc<Mutex<Inner>>,
	cfg: RoomHubConfig,
}

impl RoomHub {
	pub fn new(cfg: RoomHubConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Capacity connections should use for their outbound event channel.
	pub fn member_queue_capacity(&self) -> usize {
		self.cfg.member_queue_capacity
	}

	/// Add a connection to a room. Idempotent: a second join from the same
	/// connection changes nothing and reports `AlreadyJoined` so callers can
	/// suppress duplicate membership notifications.
	pub async fn join(&self, room: Room, conn_id: ConnId, tx: mpsc::Sender<ServerEvent>) -> JoinOutcome {
		let mut inner = self.inner.lock().await;

		let entry = inner.rooms.entry(room).or_default();
		if entry.members.contains_key(&conn_id) {
			return JoinOutcome::AlreadyJoined;
		}

		entry.members.insert(conn_id, tx);
		inner.rooms_by_conn.entry(conn_id).or_default().insert(room);

		if self.cfg.debug_logs {
			debug!(%room, conn_id, "room hub: joined");
		}

		JoinOutcome::Joined
	}

	/// Remove a connection from a room. Leaving a room never joined is a
	/// no-op; returns whether the connection was a member.
	pub async fn leave(&self, room: Room, conn_id: ConnId) -> bool {
		let mut inner = self.inner.lock().await;

		let Some(entry) = inner.rooms.get_mut(&room) else {
			return false;
		};

		let was_member = entry.members.remove(&conn_id).is_some();
		if entry.members.is_empty() {
			inner.rooms.remove(&room);
		}

		if let Some(rooms) = inner.rooms_by_conn.get_mut(&conn_id) {
			rooms.remove(&room);
			if rooms.is_empty() {
				inner.rooms_by_conn.remove(&conn_id);
			}
		}

		if was_member && self.cfg.debug_logs {
			debug!(%room, conn_id, "room hub: left");
		}

		was_member
	}

	/// Remove a connection from every room it joined. Returns the rooms it
	/// was a member of so the caller can emit departure notifications.
	pub async fn disconnect(&self, conn_id: ConnId) -> Vec<Room> {
		let mut inner = self.inner.lock().await;

		let Some(rooms) = inner.rooms_by_conn.remove(&conn_id) else {
			return Vec::new();
		};

		let mut left = Vec::with_capacity(rooms.len());
		for room in rooms {
			if let Some(entry) = inner.rooms.get_mut(&room) {
				if entry.members.remove(&conn_id).is_some() {
					left.push(room);
				}
				if entry.members.is_empty() {
					inner.rooms.remove(&room);
				}
			}
		}

		if self.cfg.debug_logs {
			debug!(conn_id, rooms = left.len(), "room hub: disconnected");
		}

		left
	}

	/// Deliver an event to every member of a room.
	pub async fn publish(&self, room: Room, event: &ServerEvent) {
		self.publish_filtered(room, None, event).await;
	}

	/// Deliver an event to every member of a room except one connection.
	/// Used for informational membership notices the actor should not echo.
	pub async fn publish_to_others(&self, room: Room, except: ConnId, event: &ServerEvent) {
		self.publish_filtered(room, Some(except), event).await;
	}

	async fn publish_filtered(&self, room: Room, except: Option<ConnId>, event: &ServerEvent) {
		let mut guard = self.inner.lock().await;
		let inner = &mut *guard;

		let Some(entry) = inner.rooms.get_mut(&room) else {
			return;
		};

		let mut closed: Vec<ConnId> = Vec::new();
		let mut dropped: u64 = 0;

		for (conn_id, tx) in entry.members.iter() {
			if Some(*conn_id) == except {
				continue;
			}

			match tx.try_send(event.clone()) {
				Ok(()) => {}
				Err(mpsc::error::TrySendError::Full(_)) => {
					dropped += 1;
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {
					closed.push(*conn_id);
				}
			}
		}

		for conn_id in closed {
			entry.members.remove(&conn_id);
			if let Some(rooms) = inner.rooms_by_conn.get_mut(&conn_id) {
				rooms.remove(&room);
				if rooms.is_empty() {
					inner.rooms_by_conn.remove(&conn_id);
				}
			}
		}

		if let Some(entry) = inner.rooms.get(&room)
			&& entry.members.is_empty()
		{
			inner.rooms.remove(&room);
		}

		if dropped > 0 {
			metrics::counter!("gigchat_broadcast_dropped_total").increment(dropped);
			if self.cfg.debug_logs {
				debug!(%room, dropped, event = event.name(), "room hub: dropped due to full member queues");
			}
		}
	}

	/// Whether a connection is currently a member of a room.
	pub async fn is_member(&self, room: Room, conn_id: ConnId) -> bool {
		let inner = self.inner.lock().await;
		inner.rooms.get(&room).is_some_and(|e| e.members.contains_key(&conn_id))
	}

	/// Current member count of a room.
	pub async fn member_count(&self, room: Room) -> usize {
		let inner = self.inner.lock().await;
		inner.rooms.get(&room).map(|e| e.members.len()).unwrap_or(0)
	}
}

#[derive(Debug, Default)]
struct Inner {
	rooms: HashMap<Room, RoomEntry>,
	rooms_by_conn: HashMap<ConnId, HashSet<Room>>,
}

#[derive(Debug, Default)]
struct RoomEntry {
	members: HashMap<ConnId, mpsc::Sender<ServerEvent>>,
}
