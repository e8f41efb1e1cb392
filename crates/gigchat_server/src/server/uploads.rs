#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

use crate::server::store::NewAttachment;

/// Route prefix under which stored files are served back.
pub const DOWNLOAD_PREFIX: &str = "/uploads/";

/// Public URL for a stored file, as embedded in message attachments.
pub fn download_url(stored_name: &str) -> String {
	format!("{DOWNLOAD_PREFIX}{stored_name}")
}

#[derive(Debug, Error)]
pub enum UploadError {
	#[error("file too large: {size} bytes (max {max})")]
	FileTooLarge { size: u64, max: u64 },
	#[error("too many files: {count} (max {max})")]
	TooManyFiles { count: usize, max: usize },
	#[error("empty file")]
	EmptyFile,
	#[error("invalid filename")]
	InvalidName,
	#[error("file not found")]
	NotFound,
	#[error("upload storage failed")]
	Io(#[from] std::io::Error),
}

/// Flat on-disk storage for message attachments. Files are written once under
/// a generated name and never mutated; the database keeps the metadata.
#[derive(Debug, Clone)]
pub struct UploadStore {
	base_path: PathBuf,
	max_file_bytes: u64,
	max_files: usize,
}

impl UploadStore {
	pub fn new(base_path: impl Into<PathBuf>, max_file_bytes: u64, max_files: usize) -> Result<Self, UploadError> {
		let base_path = base_path.into();
		std::fs::create_dir_all(&base_path)?;
		Ok(Self {
			base_path,
			max_file_bytes,
			max_files,
		})
	}

	/// Maximum number of files accepted per message.
	pub fn max_files(&self) -> usize {
		self.max_files
	}

	pub fn max_file_bytes(&self) -> u64 {
		self.max_file_bytes
	}

	/// Persist one uploaded file and return the attachment metadata to record
	/// with the message. The stored name carries a fresh UUID so concurrent
	/// uploads of the same filename never collide.
	pub async fn store_file(&self, filename: &str, mimetype: &str, data: &[u8]) -> Result<NewAttachment, UploadError> {
		let safe_name = sanitize_filename(filename)?;

		if data.is_empty() {
			return Err(UploadError::EmptyFile);
		}
		let size = data.len() as u64;
		if size > self.max_file_bytes {
			return Err(UploadError::FileTooLarge {
				size,
				max: self.max_file_bytes,
			});
		}

		let stored_name = format!("{}_{safe_name}", Uuid::new_v4());
		let path = self.base_path.join(&stored_name);
		tokio::fs::write(&path, data).await?;

		Ok(NewAttachment {
			filename: safe_name,
			stored_name,
			mimetype: mimetype.to_string(),
			size,
		})
	}

	/// Read a stored file back by its stored name.
	pub async fn read_file(&self, stored_name: &str) -> Result<Vec<u8>, UploadError> {
		let path = self.resolve(stored_name)?;
		match tokio::fs::read(&path).await {
			Ok(bytes) => Ok(bytes),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(UploadError::NotFound),
			Err(err) => Err(UploadError::Io(err)),
		}
	}

	/// Map a stored name to its on-disk path, refusing anything that could
	/// escape the base directory.
	fn resolve(&self, stored_name: &str) -> Result<PathBuf, UploadError> {
		if stored_name.is_empty()
			|| stored_name.contains('/')
			|| stored_name.contains('\\')
			|| stored_name.contains("..")
		{
			return Err(UploadError::InvalidName);
		}

		let path = self.base_path.join(stored_name);
		if path.parent() != Some(self.base_path.as_path()) {
			return Err(UploadError::InvalidName);
		}

		Ok(path)
	}
}

/// Keep only the final path component of a client-supplied filename and
/// reject names that still look like traversal attempts.
fn sanitize_filename(filename: &str) -> Result<String, UploadError> {
	let name = Path::new(filename)
		.file_name()
		.and_then(|n| n.to_str())
		.ok_or(UploadError::InvalidName)?;

	if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
		return Err(UploadError::InvalidName);
	}

	Ok(name.to_string())
}
