#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use gigchat_domain::SecretString;
use serde::Deserialize;
use tracing::info;

/// Default config path: `~/.gigchat/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".gigchat").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config() -> anyhow::Result<ServerConfig> {
	let path = default_config_path()?;
	load_server_config_from_path(&path)
}

/// Same as `load_server_config` but with an explicit config path.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub uploads: UploadSettings,
	pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// HMAC secret for stateless access tokens. Required at startup.
	pub auth_hmac_secret: Option<SecretString>,
	/// Shared secret for the internal notification ingress. Leaving it unset
	/// disables `/internal/events`.
	pub service_token: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
	/// Directory attachment files are written to.
	pub dir: PathBuf,
	/// Per-file size cap in bytes.
	pub max_file_bytes: u64,
	/// Maximum files per message.
	pub max_files: usize,
}

impl Default for UploadSettings {
	fn default() -> Self {
		Self {
			dir: PathBuf::from("uploads"),
			max_file_bytes: 10 * 1024 * 1024,
			max_files: 5,
		}
	}
}

/// Persistence settings loaded by the server.
#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// Enable persistence. When off, history lives in memory and is lost on
	/// restart.
	pub enabled: bool,
	/// Database URL (sqlite:).
	pub database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	uploads: FileUploadSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	auth_hmac_secret: Option<String>,
	service_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileUploadSettings {
	dir: Option<String>,
	max_file_bytes: Option<u64>,
	max_files: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	enabled: Option<bool>,
	database_url: Option<String>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let upload_defaults = UploadSettings::default();

		Self {
			server: ServerSettings {
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				auth_hmac_secret: file
					.server
					.auth_hmac_secret
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				service_token: file
					.server
					.service_token
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
			},
			uploads: UploadSettings {
				dir: file
					.uploads
					.dir
					.filter(|s| !s.trim().is_empty())
					.map(PathBuf::from)
					.unwrap_or(upload_defaults.dir),
				max_file_bytes: file.uploads.max_file_bytes.filter(|v| *v > 0).unwrap_or(upload_defaults.max_file_bytes),
				max_files: file.uploads.max_files.filter(|v| *v > 0).unwrap_or(upload_defaults.max_files),
			},
			persistence: PersistenceSettings {
				enabled: file.persistence.enabled.unwrap_or(false),
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("GIGCHAT_AUTH_HMAC_SECRET") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.auth_hmac_secret = Some(SecretString::new(v));
			info!("server auth: auth_hmac_secret overridden by env");
		}
	}

	if let Ok(v) = std::env::var("GIGCHAT_SERVICE_TOKEN") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.service_token = Some(SecretString::new(v));
			info!("server auth: service_token overridden by env");
		}
	}

	if let Ok(v) = std::env::var("GIGCHAT_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("GIGCHAT_UPLOAD_DIR") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.uploads.dir = PathBuf::from(v);
			info!("uploads: dir overridden by env");
		}
	}

	if let Ok(v) = std::env::var("GIGCHAT_UPLOAD_MAX_FILE_BYTES")
		&& let Ok(bytes) = v.trim().parse::<u64>()
		&& bytes > 0
	{
		cfg.uploads.max_file_bytes = bytes;
		info!(bytes, "uploads: max_file_bytes overridden by env");
	}

	if let Ok(v) = std::env::var("GIGCHAT_UPLOAD_MAX_FILES")
		&& let Ok(count) = v.trim().parse::<usize>()
		&& count > 0
	{
		cfg.uploads.max_files = count;
		info!(count, "uploads: max_files overridden by env");
	}

	if let Ok(v) = std::env::var("GIGCHAT_PERSISTENCE_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.persistence.enabled = enabled;
		info!(enabled, "persistence: enabled overridden by env");
	}

	if let Ok(v) = std::env::var("GIGCHAT_PERSISTENCE_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = Some(v);
			info!("persistence: database_url overridden by env");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn file_config_fills_defaults() {
		let file: FileConfig = toml::from_str(
			r#"
			[server]
			auth_hmac_secret = "s3cr3t"

			[persistence]
			enabled = true
			database_url = "sqlite://gigchat.db"
			"#,
		)
		.expect("parse");

		let cfg = ServerConfig::from_file(file);
		assert!(cfg.server.auth_hmac_secret.is_some());
		assert!(cfg.server.service_token.is_none());
		assert_eq!(cfg.uploads.max_files, 5);
		assert_eq!(cfg.uploads.max_file_bytes, 10 * 1024 * 1024);
		assert!(cfg.persistence.enabled);
		assert_eq!(cfg.persistence.database_url.as_deref(), Some("sqlite://gigchat.db"));
	}

	#[test]
	fn blank_strings_are_treated_as_unset() {
		let file: FileConfig = toml::from_str(
			r#"
			[server]
			auth_hmac_secret = "   "
			service_token = ""

			[uploads]
			dir = ""
			"#,
		)
		.expect("parse");

		let cfg = ServerConfig::from_file(file);
		assert!(cfg.server.auth_hmac_secret.is_none());
		assert!(cfg.server.service_token.is_none());
		assert_eq!(cfg.uploads.dir, PathBuf::from("uploads"));
	}
}
