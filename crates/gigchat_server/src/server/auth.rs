#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use gigchat_domain::UserId;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::server::store::Directory;

/// Connection-level authentication failures. Each variant maps to a
/// distinguishable rejection reason before the protocol handshake completes.
#[derive(Debug, Error)]
pub enum AuthError {
	#[error("missing bearer token")]
	Missing,
	#[error("malformed token")]
	Malformed,
	#[error("invalid token signature")]
	BadSignature,
	#[error("token expired")]
	Expired,
	#[error("unknown user")]
	UnknownUser,
	#[error("user lookup failed")]
	Lookup(#[source] anyhow::Error),
}

/// Claims carried by a `v1.<payload>.<sig>` access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
	/// User id the token was issued for.
	pub sub: String,
	pub email: String,
	pub name: String,
	/// Expiry, unix seconds.
	pub exp: u64,
}

/// Authenticated identity attached to one live connection. Created once at
/// handshake time and trusted by every later event handler; destroyed with
/// the connection.
#[derive(Debug, Clone)]
pub struct Session {
	pub user_id: UserId,
	pub email: String,
	pub display_name: String,
}

/// Verify an HMAC-SHA256 access token against the process-wide secret.
pub fn verify_hmac_token(token: &str, secret: &str) -> Result<AuthClaims, AuthError> {
	let parts = token.split('.').collect::<Vec<_>>();
	if parts.len() != 3 || parts[0] != "v1" {
		return Err(AuthError::Malformed);
	}

	let payload_b64 = parts[1];
	let sig_b64 = parts[2];

	let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| AuthError::Malformed)?;
	let expected_sig = sign(payload_b64.as_bytes(), secret.as_bytes());
	let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| AuthError::Malformed)?;

	if !constant_time_eq(&expected_sig, &provided_sig) {
		return Err(AuthError::BadSignature);
	}

	let claims: AuthClaims = serde_json::from_slice(&payload).map_err(|_| AuthError::Malformed)?;
	let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
	if claims.exp <= now {
		return Err(AuthError::Expired);
	}

	Ok(claims)
}

/// Mint a token for the given claims. Token issuance belongs to the
/// marketplace's auth service; this exists for tooling and tests that need
/// a credential signed with the same secret.
pub fn mint_hmac_token(claims: &AuthClaims, secret: &str) -> String {
	let payload = serde_json::to_vec(claims).unwrap_or_default();
	let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
	let sig = sign(payload_b64.as_bytes(), secret.as_bytes());
	format!("v1.{payload_b64}.{}", URL_SAFE_NO_PAD.encode(sig))
}

/// Full connection authentication: verify the token, then confirm the
/// referenced user still exists in the directory. A valid signature for a
/// deleted user is rejected, not trusted.
pub async fn authenticate(directory: &dyn Directory, token: &str, secret: &str) -> Result<Session, AuthError> {
	let claims = verify_hmac_token(token, secret)?;
	let user_id: UserId = claims.sub.parse().map_err(|_| AuthError::Malformed)?;

	let user = directory.user_by_id(user_id).await.map_err(AuthError::Lookup)?;
	let Some(user) = user else {
		return Err(AuthError::UnknownUser);
	};

	Ok(Session {
		user_id: user.id,
		email: user.email,
		display_name: user.name,
	})
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Vec<u8> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac key");
	mac.update(payload_b64);
	mac.finalize().into_bytes().to_vec()
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}

#[cfg(test)]
mod tests {
	use gigchat_domain::UserId;

	use super::*;
	use crate::server::store::{MemoryStore, UserRecord};

	const SECRET: &str = "test-secret";

	fn claims_for(user_id: UserId, exp_offset_secs: i64) -> AuthClaims {
		let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
		AuthClaims {
			sub: user_id.to_string(),
			email: "ada@example.com".to_string(),
			name: "Ada".to_string(),
			exp: (now + exp_offset_secs) as u64,
		}
	}

	#[test]
	fn verify_roundtrip() {
		let uid = UserId::new_v4();
		let token = mint_hmac_token(&claims_for(uid, 3600), SECRET);
		let claims = verify_hmac_token(&token, SECRET).expect("valid token");
		assert_eq!(claims.sub, uid.to_string());
	}

	#[test]
	fn rejects_malformed_bad_signature_and_expired_distinctly() {
		let uid = UserId::new_v4();

		assert!(matches!(verify_hmac_token("nope", SECRET), Err(AuthError::Malformed)));
		assert!(matches!(
			verify_hmac_token("v2.abc.def", SECRET),
			Err(AuthError::Malformed)
		));

		let token = mint_hmac_token(&claims_for(uid, 3600), SECRET);
		assert!(matches!(
			verify_hmac_token(&token, "other-secret"),
			Err(AuthError::BadSignature)
		));

		let expired = mint_hmac_token(&claims_for(uid, -10), SECRET);
		assert!(matches!(verify_hmac_token(&expired, SECRET), Err(AuthError::Expired)));
	}

	#[tokio::test]
	async fn authenticate_requires_existing_user() {
		let store = MemoryStore::new();
		let uid = UserId::new_v4();
		let token = mint_hmac_token(&claims_for(uid, 3600), SECRET);

		// Valid signature, but the user is gone.
		assert!(matches!(
			authenticate(&store, &token, SECRET).await,
			Err(AuthError::UnknownUser)
		));

		store
			.insert_user(UserRecord {
				id: uid,
				email: "ada@example.com".to_string(),
				name: "Ada".to_string(),
			})
			.await;

		let session = authenticate(&store, &token, SECRET).await.expect("authenticated");
		assert_eq!(session.user_id, uid);
		assert_eq!(session.display_name, "Ada");
	}
}
