//! Thread-safe in-memory store for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::SubjectId,
	rate_limit::{SlidingWindow, WindowAdmission},
	session::SessionRecord,
	store::{CredentialStore, SessionStore, SharedWindowStore, StoreFuture},
	vault::CredentialRecord,
};

type SessionMap = Arc<RwLock<HashMap<String, SessionRecord>>>;
type CredentialMap = Arc<RwLock<HashMap<SubjectId, CredentialRecord>>>;
type WindowMap = Arc<Mutex<HashMap<String, SlidingWindow>>>;

/// Keeps sessions, credentials, and shared rate-limit windows in-process.
///
/// Clones share the same maps, so a clone handed to a second limiter behaves like a second
/// instance talking to the same external store.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
	sessions: SessionMap,
	credentials: CredentialMap,
	windows: WindowMap,
}
impl MemoryStore {
	/// Number of stored sessions, expired rows included.
	pub fn session_count(&self) -> usize {
		self.sessions.read().len()
	}

	/// Number of linked credentials.
	pub fn credential_count(&self) -> usize {
		self.credentials.read().len()
	}

	fn purge_now(map: &SessionMap, now: OffsetDateTime) -> usize {
		let mut guard = map.write();
		let before = guard.len();

		guard.retain(|_, record| !record.is_expired_at(now));

		before - guard.len()
	}

	fn admit_now(
		map: &WindowMap,
		key: &str,
		now: OffsetDateTime,
		window: Duration,
		max_requests: u32,
	) -> WindowAdmission {
		let mut guard = map.lock();
		let admission = guard.entry(key.to_owned()).or_default().admit(now, window, max_requests);

		// Expired windows on other keys are dropped opportunistically.
		guard.retain(|_, entry| !entry.is_idle(now));

		admission
	}
}
impl SessionStore for MemoryStore {
	fn create(&self, record: SessionRecord) -> StoreFuture<'_, ()> {
		let map = self.sessions.clone();

		Box::pin(async move {
			map.write().insert(record.token_hash.clone(), record);

			Ok(())
		})
	}

	fn find<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, Option<SessionRecord>> {
		Box::pin(async move { Ok(self.sessions.read().get(token_hash).cloned()) })
	}

	fn delete<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, bool> {
		Box::pin(async move { Ok(self.sessions.write().remove(token_hash).is_some()) })
	}

	fn purge_expired(&self, now: OffsetDateTime) -> StoreFuture<'_, usize> {
		Box::pin(async move { Ok(Self::purge_now(&self.sessions, now)) })
	}
}
impl CredentialStore for MemoryStore {
	fn upsert(&self, record: CredentialRecord) -> StoreFuture<'_, ()> {
		let map = self.credentials.clone();

		Box::pin(async move {
			map.write().insert(record.subject.clone(), record);

			Ok(())
		})
	}

	fn find<'a>(&'a self, subject: &'a SubjectId) -> StoreFuture<'a, Option<CredentialRecord>> {
		Box::pin(async move { Ok(self.credentials.read().get(subject).cloned()) })
	}

	fn delete<'a>(&'a self, subject: &'a SubjectId) -> StoreFuture<'a, bool> {
		Box::pin(async move { Ok(self.credentials.write().remove(subject).is_some()) })
	}
}
impl SharedWindowStore for MemoryStore {
	fn admit<'a>(
		&'a self,
		key: &'a str,
		now: OffsetDateTime,
		window: Duration,
		max_requests: u32,
	) -> StoreFuture<'a, WindowAdmission> {
		Box::pin(async move { Ok(Self::admit_now(&self.windows, key, now, window, max_requests)) })
	}
}
