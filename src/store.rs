//! Persistence collaborator contracts and built-in store implementations.
//!
//! Three contracts live here: [`SessionStore`] for hashed device sessions, [`CredentialStore`]
//! for encrypted provider credentials, and [`SharedWindowStore`] for the rate limiter's shared
//! backend. [`MemoryStore`] satisfies all three; [`FileStore`] persists sessions and credentials
//! for single-node deployments.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*, auth::SubjectId, rate_limit::WindowAdmission, session::SessionRecord,
	vault::CredentialRecord,
};

/// Boxed future returned by every store contract.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence contract for device sessions, keyed by the token hash.
pub trait SessionStore
where
	Self: Send + Sync,
{
	/// Persists a newly issued session.
	fn create(&self, record: SessionRecord) -> StoreFuture<'_, ()>;

	/// Fetches the session stored under the hash, if present (expired rows included).
	fn find<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, Option<SessionRecord>>;

	/// Deletes the session stored under the hash. Returns whether a row was removed.
	fn delete<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, bool>;

	/// Removes every session that expired before `now`. Returns the number removed.
	fn purge_expired(&self, now: OffsetDateTime) -> StoreFuture<'_, usize>;
}

/// Persistence contract for encrypted provider credentials, one per subject.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Inserts or wholesale replaces the subject's credential.
	fn upsert(&self, record: CredentialRecord) -> StoreFuture<'_, ()>;

	/// Fetches the subject's credential, if linked.
	fn find<'a>(&'a self, subject: &'a SubjectId) -> StoreFuture<'a, Option<CredentialRecord>>;

	/// Deletes the subject's credential. Returns whether a row was removed.
	fn delete<'a>(&'a self, subject: &'a SubjectId) -> StoreFuture<'a, bool>;
}

/// External counter store shared by every instance of a horizontally scaled deployment.
///
/// `admit` must run as one atomic operation on the store side (for example a server-side
/// script), so two instances can never both observe "under limit" for the same key.
pub trait SharedWindowStore
where
	Self: Send + Sync,
{
	/// Prunes hits older than `now - window` under `key`, then records `now` if fewer than
	/// `max_requests` remain.
	fn admit<'a>(
		&'a self,
		key: &'a str,
		now: OffsetDateTime,
		window: Duration,
		max_requests: u32,
	) -> StoreFuture<'a, WindowAdmission>;
}

/// Error type produced by store implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// The backing store could not be reached.
	#[error("Storage unavailable: {message}.")]
	Unavailable {
		/// Human-readable error payload.
		message: String,
	},
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
