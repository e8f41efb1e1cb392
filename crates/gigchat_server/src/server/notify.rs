#![forbid(unsafe_code)]

use gigchat_domain::{Room, UserId};
use gigchat_protocol::ServerEvent;
use tracing::{debug, warn};

use crate::server::room_hub::RoomHub;

/// Fan-out of workflow notifications (proposal accepted, contract signed,
/// payments and so on) to users' private channels. Fire-and-forget: a user
/// with no live connection simply misses the event, and nothing is queued
/// for them.
#[derive(Clone)]
pub struct Notifier {
	hub: RoomHub,
}

impl Notifier {
	pub fn new(hub: RoomHub) -> Self {
		Self { hub }
	}

	/// Deliver one notification event to each listed user's private channel.
	/// Non-notification events (chat traffic, membership notices) are refused
	/// so marketplace callers cannot inject conversation events this way.
	pub async fn notify(&self, users: &[UserId], event: &ServerEvent) -> bool {
		if !event.is_notification() {
			warn!(event = event.name(), "refusing to deliver non-notification event");
			return false;
		}

		for user_id in users {
			self.hub.publish(Room::User(*user_id), event).await;
		}

		metrics::counter!("gigchat_notifications_total").increment(users.len() as u64);
		debug!(event = event.name(), recipients = users.len(), "notification delivered");
		true
	}
}
