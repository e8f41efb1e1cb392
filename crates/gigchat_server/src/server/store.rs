#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use gigchat_domain::{MessageId, ProposalId, UserId, WireAttachment, WireMessage, WireSender};
use tokio::sync::Mutex;

use crate::server::uploads::download_url;

/// A marketplace user as seen by the chat subsystem (read-only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
	pub id: UserId,
	pub email: String,
	pub name: String,
}

/// The two identities eligible for one conversation, resolved by following
/// proposal -> freelancer and proposal -> project -> owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposalParties {
	pub client: UserId,
	pub freelancer: UserId,
}

/// Attachment metadata recorded alongside a message. The file bytes live in
/// the upload store; only `stored_name` is persisted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
	pub filename: String,
	pub stored_name: String,
	pub mimetype: String,
	pub size: u64,
}

/// A message about to be written. The sender name is snapshotted at write
/// time so history survives later profile changes.
#[derive(Debug, Clone)]
pub struct NewMessage {
	pub proposal_id: ProposalId,
	pub sender_id: Option<UserId>,
	pub sender_name: String,
	pub body: String,
	pub attachments: Vec<NewAttachment>,
}

/// Read-only lookups against records owned by the marketplace collaborators
/// (users, projects, proposals). The chat subsystem never mutates these.
#[async_trait::async_trait]
pub trait Directory: Send + Sync {
	async fn user_by_id(&self, id: UserId) -> anyhow::Result<Option<UserRecord>>;

	async fn proposal_parties(&self, id: ProposalId) -> anyhow::Result<Option<ProposalParties>>;
}

/// Durable conversation history. `append` must complete before any broadcast
/// of the returned message (commit order).
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
	async fn append(&self, msg: NewMessage) -> anyhow::Result<WireMessage>;

	/// All messages of one conversation, ascending by creation time.
	/// No pagination; the fetch-all contract matches the current consumer.
	async fn history(&self, proposal_id: ProposalId) -> anyhow::Result<Vec<WireMessage>>;
}

fn normalize(msg: NewMessage, id: MessageId, now: DateTime<Utc>) -> WireMessage {
	WireMessage {
		id,
		proposal_id: msg.proposal_id,
		message: msg.body,
		sender: WireSender {
			id: msg.sender_id,
			name: msg.sender_name,
		},
		attachments: msg
			.attachments
			.into_iter()
			.map(|a| WireAttachment {
				filename: a.filename,
				url: download_url(&a.stored_name),
				mimetype: a.mimetype,
				size: a.size,
				uploaded_at: now,
			})
			.collect(),
		created_at: now,
		updated_at: now,
	}
}

/// In-memory store used when persistence is disabled and by the test suite.
#[derive(Default)]
pub struct MemoryStore {
	users: Mutex<HashMap<UserId, UserRecord>>,
	parties: Mutex<HashMap<ProposalId, ProposalParties>>,
	messages: Mutex<Vec<WireMessage>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn insert_user(&self, user: UserRecord) {
		self.users.lock().await.insert(user.id, user);
	}

	pub async fn insert_proposal(&self, id: ProposalId, parties: ProposalParties) {
		self.parties.lock().await.insert(id, parties);
	}
}

#[async_trait::async_trait]
impl Directory for MemoryStore {
	async fn user_by_id(&self, id: UserId) -> anyhow::Result<Option<UserRecord>> {
		Ok(self.users.lock().await.get(&id).cloned())
	}

	async fn proposal_parties(&self, id: ProposalId) -> anyhow::Result<Option<ProposalParties>> {
		Ok(self.parties.lock().await.get(&id).copied())
	}
}

#[async_trait::async_trait]
impl MessageStore for MemoryStore {
	async fn append(&self, msg: NewMessage) -> anyhow::Result<WireMessage> {
		let normalized = normalize(msg, MessageId::new_v4(), Utc::now());
		self.messages.lock().await.push(normalized.clone());
		Ok(normalized)
	}

	async fn history(&self, proposal_id: ProposalId) -> anyhow::Result<Vec<WireMessage>> {
		let guard = self.messages.lock().await;
		let mut out: Vec<WireMessage> = guard.iter().filter(|m| m.proposal_id == proposal_id).cloned().collect();
		out.sort_by_key(|m| m.created_at);
		Ok(out)
	}
}

/// Sqlite-backed store. The users/projects/proposals tables are written by
/// the marketplace application; this service only reads them.
#[derive(Clone)]
pub struct SqliteStore {
	pool: sqlx::SqlitePool,
}

impl SqliteStore {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		let pool = sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?;
		sqlx::migrate!("migrations/sqlite")
			.run(&pool)
			.await
			.context("run sqlite migrations")?;
		Ok(Self { pool })
	}

	#[cfg(test)]
	pub(crate) fn pool(&self) -> &sqlx::SqlitePool {
		&self.pool
	}
}

fn parse_uuid_col<T: FromStr>(value: &str, col: &str) -> anyhow::Result<T> {
	value.parse::<T>().map_err(|_| anyhow!("invalid {col} in database: {value}"))
}

fn timestamp_col(ms: i64, col: &str) -> anyhow::Result<DateTime<Utc>> {
	DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| anyhow!("invalid {col} in database: {ms}"))
}

#[async_trait::async_trait]
impl Directory for SqliteStore {
	async fn user_by_id(&self, id: UserId) -> anyhow::Result<Option<UserRecord>> {
		let row: Option<(String, String, String)> =
			sqlx::query_as("SELECT id, email, name FROM users WHERE id = ?")
				.bind(id.to_string())
				.fetch_optional(&self.pool)
				.await
				.context("select user")?;

		match row {
			Some((id, email, name)) => Ok(Some(UserRecord {
				id: parse_uuid_col(&id, "users.id")?,
				email,
				name,
			})),
			None => Ok(None),
		}
	}

	async fn proposal_parties(&self, id: ProposalId) -> anyhow::Result<Option<ProposalParties>> {
		let row: Option<(String, String)> = sqlx::query_as(
			"SELECT pr.owner_id, p.freelancer_id \
			FROM proposals p JOIN projects pr ON pr.id = p.project_id \
			WHERE p.id = ?",
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await
		.context("select proposal parties")?;

		match row {
			Some((owner, freelancer)) => Ok(Some(ProposalParties {
				client: parse_uuid_col(&owner, "projects.owner_id")?,
				freelancer: parse_uuid_col(&freelancer, "proposals.freelancer_id")?,
			})),
			None => Ok(None),
		}
	}
}

#[async_trait::async_trait]
impl MessageStore for SqliteStore {
	async fn append(&self, msg: NewMessage) -> anyhow::Result<WireMessage> {
		let id = MessageId::new_v4();
		let now = Utc::now();
		let now_ms = now.timestamp_millis();

		let mut tx = self.pool.begin().await.context("begin tx")?;

		sqlx::query(
			"INSERT INTO messages (id, proposal_id, sender_id, sender_name, body, created_at, updated_at) \
			VALUES (?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(id.to_string())
		.bind(msg.proposal_id.to_string())
		.bind(msg.sender_id.map(|u| u.to_string()))
		.bind(&msg.sender_name)
		.bind(&msg.body)
		.bind(now_ms)
		.bind(now_ms)
		.execute(&mut *tx)
		.await
		.context("insert message")?;

		for (ord, a) in msg.attachments.iter().enumerate() {
			sqlx::query(
				"INSERT INTO attachments (message_id, ord, filename, stored_name, mimetype, size, uploaded_at) \
				VALUES (?, ?, ?, ?, ?, ?, ?)",
			)
			.bind(id.to_string())
			.bind(ord as i64)
			.bind(&a.filename)
			.bind(&a.stored_name)
			.bind(&a.mimetype)
			.bind(a.size as i64)
			.bind(now_ms)
			.execute(&mut *tx)
			.await
			.context("insert attachment")?;
		}

		tx.commit().await.context("commit message")?;

		Ok(normalize(msg, id, now))
	}

	async fn history(&self, proposal_id: ProposalId) -> anyhow::Result<Vec<WireMessage>> {
		let rows: Vec<(String, Option<String>, String, String, i64, i64)> = sqlx::query_as(
			"SELECT id, sender_id, sender_name, body, created_at, updated_at \
			FROM messages WHERE proposal_id = ? ORDER BY created_at ASC, rowid ASC",
		)
		.bind(proposal_id.to_string())
		.fetch_all(&self.pool)
		.await
		.context("select messages")?;

		let attachment_rows: Vec<(String, String, String, String, i64, i64)> = sqlx::query_as(
			"SELECT a.message_id, a.filename, a.stored_name, a.mimetype, a.size, a.uploaded_at \
			FROM attachments a JOIN messages m ON m.id = a.message_id \
			WHERE m.proposal_id = ? ORDER BY a.message_id, a.ord",
		)
		.bind(proposal_id.to_string())
		.fetch_all(&self.pool)
		.await
		.context("select attachments")?;

		let mut attachments_by_message: HashMap<String, Vec<WireAttachment>> = HashMap::new();
		for (message_id, filename, stored_name, mimetype, size, uploaded_ms) in attachment_rows {
			attachments_by_message.entry(message_id).or_default().push(WireAttachment {
				filename,
				url: download_url(&stored_name),
				mimetype,
				size: size as u64,
				uploaded_at: timestamp_col(uploaded_ms, "attachments.uploaded_at")?,
			});
		}

		let mut out = Vec::with_capacity(rows.len());
		for (id, sender_id, sender_name, body, created_ms, updated_ms) in rows {
			let attachments = attachments_by_message.remove(&id).unwrap_or_default();
			out.push(WireMessage {
				id: parse_uuid_col(&id, "messages.id")?,
				proposal_id,
				message: body,
				sender: WireSender {
					id: sender_id.as_deref().map(|s| parse_uuid_col(s, "messages.sender_id")).transpose()?,
					name: sender_name,
				},
				attachments,
				created_at: timestamp_col(created_ms, "messages.created_at")?,
				updated_at: timestamp_col(updated_ms, "messages.updated_at")?,
			});
		}

		Ok(out)
	}
}
