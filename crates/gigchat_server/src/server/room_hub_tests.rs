#![forbid(unsafe_code)]

use std::time::Duration;

use gigchat_domain::{ProposalId, Room, UserId};
use gigchat_protocol::ServerEvent;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::server::room_hub::{JoinOutcome, RoomHub, RoomHubConfig};

fn hub() -> RoomHub {
	RoomHub::new(RoomHubConfig {
		member_queue_capacity: 16,
		debug_logs: false,
	})
}

fn chat_error(text: &str) -> ServerEvent {
	ServerEvent::ChatError {
		message: text.to_string(),
	}
}

async fn recv(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
	timeout(Duration::from_millis(250), rx.recv())
		.await
		.expect("expected an event within timeout")
		.expect("channel open")
}

#[tokio::test]
async fn join_is_idempotent() {
	let hub = hub();
	let room = Room::Proposal(ProposalId::new_v4());
	let (tx, _rx) = mpsc::channel(16);

	assert_eq!(hub.join(room, 1, tx.clone()).await, JoinOutcome::Joined);
	assert_eq!(hub.join(room, 1, tx).await, JoinOutcome::AlreadyJoined);
	assert_eq!(hub.member_count(room).await, 1);
}

#[tokio::test]
async fn events_stay_in_their_room() {
	let hub = hub();
	let room_a = Room::Proposal(ProposalId::new_v4());
	let room_b = Room::Proposal(ProposalId::new_v4());

	let (tx_a, mut rx_a) = mpsc::channel(16);
	let (tx_b, mut rx_b) = mpsc::channel(16);
	hub.join(room_a, 1, tx_a).await;
	hub.join(room_b, 2, tx_b).await;

	hub.publish(room_a, &chat_error("for-a")).await;

	let got = recv(&mut rx_a).await;
	assert_eq!(got, chat_error("for-a"));

	let unexpected = timeout(Duration::from_millis(50), rx_b.recv()).await;
	assert!(unexpected.is_err(), "member of room B received an event for room A");
}

#[tokio::test]
async fn private_channels_are_isolated_from_conversations() {
	let hub = hub();
	let conversation = Room::Proposal(ProposalId::new_v4());
	let private = Room::User(UserId::new_v4());

	let (tx, mut rx) = mpsc::channel(16);
	hub.join(private, 7, tx).await;

	hub.publish(conversation, &chat_error("conversation traffic")).await;

	let unexpected = timeout(Duration::from_millis(50), rx.recv()).await;
	assert!(
		unexpected.is_err(),
		"private-channel member received conversation traffic"
	);
}

#[tokio::test]
async fn publish_to_others_skips_the_actor() {
	let hub = hub();
	let room = Room::Proposal(ProposalId::new_v4());

	let (tx_1, mut rx_1) = mpsc::channel(16);
	let (tx_2, mut rx_2) = mpsc::channel(16);
	hub.join(room, 1, tx_1).await;
	hub.join(room, 2, tx_2).await;

	hub.publish_to_others(room, 1, &chat_error("joined")).await;

	assert_eq!(recv(&mut rx_2).await, chat_error("joined"));
	let unexpected = timeout(Duration::from_millis(50), rx_1.recv()).await;
	assert!(unexpected.is_err(), "actor received its own membership notice");
}

#[tokio::test]
async fn leave_is_noop_when_not_joined() {
	let hub = hub();
	let room = Room::Proposal(ProposalId::new_v4());
	let (tx, _rx) = mpsc::channel(16);

	assert!(!hub.leave(room, 1).await);

	hub.join(room, 1, tx).await;
	assert!(hub.leave(room, 1).await);
	assert!(!hub.leave(room, 1).await);
	assert_eq!(hub.member_count(room).await, 0);
}

#[tokio::test]
async fn disconnect_leaves_all_rooms() {
	let hub = hub();
	let room_a = Room::Proposal(ProposalId::new_v4());
	let room_b = Room::User(UserId::new_v4());
	let (tx, _rx) = mpsc::channel(16);

	hub.join(room_a, 1, tx.clone()).await;
	hub.join(room_b, 1, tx).await;

	let mut left = hub.disconnect(1).await;
	left.sort_by_key(|r| r.to_string());
	let mut expected = vec![room_a, room_b];
	expected.sort_by_key(|r| r.to_string());
	assert_eq!(left, expected);

	assert!(!hub.is_member(room_a, 1).await);
	assert!(!hub.is_member(room_b, 1).await);
	assert!(hub.disconnect(1).await.is_empty());
}

#[tokio::test]
async fn full_member_queue_drops_instead_of_blocking() {
	let hub = RoomHub::new(RoomHubConfig {
		member_queue_capacity: 1,
		debug_logs: false,
	});
	let room = Room::Proposal(ProposalId::new_v4());
	let (tx, mut rx) = mpsc::channel(1);
	hub.join(room, 1, tx).await;

	hub.publish(room, &chat_error("first")).await;
	hub.publish(room, &chat_error("second")).await;

	assert_eq!(recv(&mut rx).await, chat_error("first"));
	let nothing = timeout(Duration::from_millis(50), rx.recv()).await;
	assert!(nothing.is_err(), "second event should have been dropped");
}

#[tokio::test]
async fn closed_members_are_pruned_on_publish() {
	let hub = hub();
	let room = Room::Proposal(ProposalId::new_v4());
	let (tx, rx) = mpsc::channel(16);
	hub.join(room, 1, tx).await;
	drop(rx);

	hub.publish(room, &chat_error("anyone there")).await;
	assert_eq!(hub.member_count(room).await, 0);
}
