//! File-backed session and credential store for single-node deployments.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::SubjectId,
	session::SessionRecord,
	store::{CredentialStore, SessionStore, StoreError, StoreFuture},
	vault::CredentialRecord,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Snapshot {
	#[serde(default)]
	sessions: Vec<SessionRecord>,
	#[serde(default)]
	credentials: Vec<CredentialRecord>,
}

#[derive(Debug, Default)]
struct Tables {
	sessions: HashMap<String, SessionRecord>,
	credentials: HashMap<SubjectId, CredentialRecord>,
}
impl Tables {
	fn from_snapshot(snapshot: Snapshot) -> Self {
		Self {
			sessions: snapshot
				.sessions
				.into_iter()
				.map(|record| (record.token_hash.clone(), record))
				.collect(),
			credentials: snapshot
				.credentials
				.into_iter()
				.map(|record| (record.subject.clone(), record))
				.collect(),
		}
	}

	fn to_snapshot(&self) -> Snapshot {
		Snapshot {
			sessions: self.sessions.values().cloned().collect(),
			credentials: self.credentials.values().cloned().collect(),
		}
	}
}

/// Persists sessions and sealed credentials to a JSON file after each mutation.
///
/// Only token hashes and ciphertext are written; the file never holds a raw session token or
/// a plaintext refresh token.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Tables>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let tables = Tables::from_snapshot(Self::load_snapshot(&path)?);

		Ok(Self { path, inner: Arc::new(RwLock::new(tables)) })
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
		if !path.exists() {
			return Ok(Snapshot::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(Snapshot::default());
		}

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, tables: &Tables) -> Result<(), StoreError> {
		let serialized =
			serde_json::to_vec_pretty(&tables.to_snapshot()).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl SessionStore for FileStore {
	fn create(&self, record: SessionRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			guard.sessions.insert(record.token_hash.clone(), record);
			self.persist_locked(&guard)
		})
	}

	fn find<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, Option<SessionRecord>> {
		Box::pin(async move { Ok(self.inner.read().sessions.get(token_hash).cloned()) })
	}

	fn delete<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let removed = guard.sessions.remove(token_hash).is_some();

			if removed {
				self.persist_locked(&guard)?;
			}

			Ok(removed)
		})
	}

	fn purge_expired(&self, now: OffsetDateTime) -> StoreFuture<'_, usize> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let before = guard.sessions.len();

			guard.sessions.retain(|_, record| !record.is_expired_at(now));

			let removed = before - guard.sessions.len();

			if removed > 0 {
				self.persist_locked(&guard)?;
			}

			Ok(removed)
		})
	}
}
impl CredentialStore for FileStore {
	fn upsert(&self, record: CredentialRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			guard.credentials.insert(record.subject.clone(), record);
			self.persist_locked(&guard)
		})
	}

	fn find<'a>(&'a self, subject: &'a SubjectId) -> StoreFuture<'a, Option<CredentialRecord>> {
		Box::pin(async move { Ok(self.inner.read().credentials.get(subject).cloned()) })
	}

	fn delete<'a>(&'a self, subject: &'a SubjectId) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let removed = guard.credentials.remove(subject).is_some();

			if removed {
				self.persist_locked(&guard)?;
			}

			Ok(removed)
		})
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use time::macros::datetime;
	use tokio::runtime::Runtime;
	// self
	use super::*;
	use crate::{
		auth::Secret,
		session,
		vault::{self, EncryptionKey},
	};

	fn temp_path() -> PathBuf {
		let unique = format!(
			"household_trust_file_store_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[test]
	fn save_and_reload_round_trip() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");
		let subject = SubjectId::new("household-1").expect("Subject fixture should be valid.");
		let key = EncryptionKey::from_bytes([8; 32]);
		let token = session::generate_token();
		let token_hash = session::hash_token(token.expose());
		let sealed = vault::encrypt("1//refresh-token", &key).expect("Encryption should succeed.");

		rt.block_on(store.create(SessionRecord {
			token_hash: token_hash.clone(),
			subject: subject.clone(),
			actor: None,
			expires_at: datetime!(2030-01-01 0:00 UTC),
		}))
		.expect("Failed to save session to file store.");
		rt.block_on(store.upsert(CredentialRecord {
			subject: subject.clone(),
			credential: sealed,
			external_account_id: Some("UC123".into()),
			linked_by: None,
			linked_at: datetime!(2025-03-01 12:00 UTC),
		}))
		.expect("Failed to save credential to file store.");
		drop(store);

		let contents = fs::read_to_string(&path).expect("Snapshot should be readable.");

		assert!(!contents.contains(token.expose()));
		assert!(!contents.contains("1//refresh-token"));

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");
		let session = rt
			.block_on(SessionStore::find(&reopened, &token_hash))
			.expect("Failed to fetch session from file store.")
			.expect("File store lost session after reopen.");
		let credential = rt
			.block_on(CredentialStore::find(&reopened, &subject))
			.expect("Failed to fetch credential from file store.")
			.expect("File store lost credential after reopen.");

		assert_eq!(session.subject, subject);
		assert_eq!(
			vault::decrypt(&credential.credential, &key).expect("Reloaded credential should open."),
			Secret::new("1//refresh-token")
		);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[test]
	fn purge_persists_removals() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");
		let now = datetime!(2025-03-01 12:00 UTC);

		rt.block_on(store.create(SessionRecord {
			token_hash: "stale".into(),
			subject: SubjectId::new("household-1").expect("Subject fixture should be valid."),
			actor: None,
			expires_at: now - Duration::minutes(1),
		}))
		.expect("Failed to save session to file store.");

		assert_eq!(rt.block_on(store.purge_expired(now)).expect("Purge should succeed."), 1);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");

		assert!(
			rt.block_on(SessionStore::find(&reopened, "stale"))
				.expect("Lookup should succeed.")
				.is_none()
		);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}
}
