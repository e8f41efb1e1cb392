#![forbid(unsafe_code)]

use gigchat_domain::{ProjectId, ProposalId, UserId};
use tempfile::TempDir;

use crate::server::store::{Directory, MessageStore, NewAttachment, NewMessage, SqliteStore};
use crate::server::uploads::download_url;

async fn sqlite_store(dir: &TempDir) -> SqliteStore {
	let path = dir.path().join("gigchat-test.db");
	let url = format!("sqlite://{}?mode=rwc", path.display());
	SqliteStore::connect(&url).await.expect("connect sqlite")
}

struct Seed {
	client: UserId,
	freelancer: UserId,
	proposal: ProposalId,
}

async fn seed(store: &SqliteStore) -> Seed {
	let client = UserId::new_v4();
	let freelancer = UserId::new_v4();
	let project = ProjectId::new_v4();
	let proposal = ProposalId::new_v4();

	for (id, email, name) in [
		(client, "client@example.com", "Cora"),
		(freelancer, "freelancer@example.com", "Finn"),
	] {
		sqlx::query("INSERT INTO users (id, email, name) VALUES (?, ?, ?)")
			.bind(id.to_string())
			.bind(email)
			.bind(name)
			.execute(store.pool())
			.await
			.expect("insert user");
	}

	sqlx::query("INSERT INTO projects (id, owner_id, title) VALUES (?, ?, ?)")
		.bind(project.to_string())
		.bind(client.to_string())
		.bind("Logo redesign")
		.execute(store.pool())
		.await
		.expect("insert project");

	sqlx::query("INSERT INTO proposals (id, project_id, freelancer_id) VALUES (?, ?, ?)")
		.bind(proposal.to_string())
		.bind(project.to_string())
		.bind(freelancer.to_string())
		.execute(store.pool())
		.await
		.expect("insert proposal");

	Seed {
		client,
		freelancer,
		proposal,
	}
}

#[tokio::test]
async fn directory_resolves_users_and_parties() {
	let dir = TempDir::new().unwrap();
	let store = sqlite_store(&dir).await;
	let seed = seed(&store).await;

	let user = store.user_by_id(seed.client).await.expect("query").expect("found");
	assert_eq!(user.id, seed.client);
	assert_eq!(user.email, "client@example.com");
	assert_eq!(user.name, "Cora");

	assert!(store.user_by_id(UserId::new_v4()).await.expect("query").is_none());

	let parties = store.proposal_parties(seed.proposal).await.expect("query").expect("found");
	assert_eq!(parties.client, seed.client);
	assert_eq!(parties.freelancer, seed.freelancer);

	assert!(store.proposal_parties(ProposalId::new_v4()).await.expect("query").is_none());
}

#[tokio::test]
async fn append_and_history_roundtrip_with_attachments() {
	let dir = TempDir::new().unwrap();
	let store = sqlite_store(&dir).await;
	let seed = seed(&store).await;

	let stored = store
		.append(NewMessage {
			proposal_id: seed.proposal,
			sender_id: Some(seed.freelancer),
			sender_name: "Finn".to_string(),
			body: "draft attached".to_string(),
			attachments: vec![
				NewAttachment {
					filename: "draft-v1.pdf".to_string(),
					stored_name: "abc_draft-v1.pdf".to_string(),
					mimetype: "application/pdf".to_string(),
					size: 2048,
				},
				NewAttachment {
					filename: "palette.png".to_string(),
					stored_name: "def_palette.png".to_string(),
					mimetype: "image/png".to_string(),
					size: 512,
				},
			],
		})
		.await
		.expect("append");

	let history = store.history(seed.proposal).await.expect("history");
	assert_eq!(history.len(), 1);

	let msg = &history[0];
	assert_eq!(msg.id, stored.id);
	assert_eq!(msg.message, "draft attached");
	assert_eq!(msg.sender.id, Some(seed.freelancer));
	assert_eq!(msg.sender.name, "Finn");

	// Attachment order must survive the roundtrip.
	assert_eq!(msg.attachments.len(), 2);
	assert_eq!(msg.attachments[0].filename, "draft-v1.pdf");
	assert_eq!(msg.attachments[0].url, download_url("abc_draft-v1.pdf"));
	assert_eq!(msg.attachments[0].size, 2048);
	assert_eq!(msg.attachments[1].filename, "palette.png");
}

#[tokio::test]
async fn history_is_scoped_and_ordered() {
	let dir = TempDir::new().unwrap();
	let store = sqlite_store(&dir).await;
	let seed = seed(&store).await;
	let other_proposal = {
		let other = seed_another_proposal(&store, seed.client).await;
		store
			.append(NewMessage {
				proposal_id: other,
				sender_id: Some(seed.client),
				sender_name: "Cora".to_string(),
				body: "different conversation".to_string(),
				attachments: Vec::new(),
			})
			.await
			.expect("append");
		other
	};

	let mut ids = Vec::new();
	for i in 0..3 {
		let stored = store
			.append(NewMessage {
				proposal_id: seed.proposal,
				sender_id: Some(seed.freelancer),
				sender_name: "Finn".to_string(),
				body: format!("message {i}"),
				attachments: Vec::new(),
			})
			.await
			.expect("append");
		ids.push(stored.id);
	}

	let history = store.history(seed.proposal).await.expect("history");
	assert_eq!(history.iter().map(|m| m.id).collect::<Vec<_>>(), ids);
	for window in history.windows(2) {
		assert!(window[0].created_at <= window[1].created_at);
	}

	let other_history = store.history(other_proposal).await.expect("history");
	assert_eq!(other_history.len(), 1);
	assert_eq!(other_history[0].message, "different conversation");
}

async fn seed_another_proposal(store: &SqliteStore, client: UserId) -> ProposalId {
	let project = ProjectId::new_v4();
	let proposal = ProposalId::new_v4();
	let freelancer = UserId::new_v4();

	sqlx::query("INSERT INTO users (id, email, name) VALUES (?, ?, ?)")
		.bind(freelancer.to_string())
		.bind("second@example.com")
		.bind("Sana")
		.execute(store.pool())
		.await
		.expect("insert user");

	sqlx::query("INSERT INTO projects (id, owner_id, title) VALUES (?, ?, ?)")
		.bind(project.to_string())
		.bind(client.to_string())
		.bind("Copywriting")
		.execute(store.pool())
		.await
		.expect("insert project");

	sqlx::query("INSERT INTO proposals (id, project_id, freelancer_id) VALUES (?, ?, ?)")
		.bind(proposal.to_string())
		.bind(project.to_string())
		.bind(freelancer.to_string())
		.execute(store.pool())
		.await
		.expect("insert proposal");

	proposal
}
