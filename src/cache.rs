//! Small in-process TTL cache for repeated read-path lookups.
//!
//! Entries expire lazily: a read past `expires_at` evicts the entry and reports a miss.
//! [`EphemeralCache::cleanup`] sweeps the rest and is meant to run on a timer owned by the host.
//! The cache is consistent only within one process.

// self
use crate::_prelude::*;

/// Lifetime of cached video metadata.
pub const METADATA_TTL: Duration = Duration::hours(24);
/// Lifetime of a cached video list page.
pub const VIDEO_LIST_TTL: Duration = Duration::minutes(5);
/// Lifetime of a cached member or household lookup.
pub const LOOKUP_TTL: Duration = Duration::seconds(60);

/// Cache key for provider metadata of one video.
pub fn metadata_key(video_id: &str) -> String {
	format!("youtube:metadata:{video_id}")
}

/// Cache key for one page of a household's video list; `limit = None` means the full list.
pub fn video_list_key(household: &str, page: u32, limit: Option<u32>) -> String {
	match limit {
		Some(limit) => format!("videos:list:{household}:{page}:{limit}"),
		None => format!("videos:list:{household}:{page}:all"),
	}
}

/// Prefix shared by every list page of one household, for targeted invalidation.
pub fn video_list_prefix(household: &str) -> String {
	format!("videos:list:{household}:")
}

/// Cached value with its absolute expiry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry<V> {
	/// Cached value.
	pub value: V,
	/// Instant after which the entry is a miss.
	pub expires_at: OffsetDateTime,
}
impl<V> CacheEntry<V> {
	/// Returns `true` once `now` has passed the expiry.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		now > self.expires_at
	}
}

/// Concurrency-safe key/value cache with per-entry TTL.
#[derive(Debug)]
pub struct EphemeralCache<V> {
	entries: RwLock<HashMap<String, CacheEntry<V>>>,
}
impl<V> Default for EphemeralCache<V> {
	fn default() -> Self {
		Self { entries: RwLock::new(HashMap::new()) }
	}
}
impl<V> EphemeralCache<V>
where
	V: Clone,
{
	/// Creates an empty cache.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the live value under `key`.
	pub fn get(&self, key: &str) -> Option<V> {
		self.get_at(key, OffsetDateTime::now_utc())
	}

	/// Returns the value under `key` as of `now`, evicting it when expired.
	pub fn get_at(&self, key: &str, now: OffsetDateTime) -> Option<V> {
		{
			let guard = self.entries.read();

			match guard.get(key) {
				None => return None,
				Some(entry) if !entry.is_expired_at(now) => return Some(entry.value.clone()),
				Some(_) => {},
			}
		}

		let mut guard = self.entries.write();

		// Another writer may have refreshed the key between the two locks.
		match guard.get(key) {
			Some(entry) if !entry.is_expired_at(now) => Some(entry.value.clone()),
			Some(_) => {
				guard.remove(key);

				None
			},
			None => None,
		}
	}

	/// Stores `value` under `key` for `ttl`, replacing any previous entry.
	pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
		self.set_at(key, value, ttl, OffsetDateTime::now_utc());
	}

	/// Same as [`EphemeralCache::set`] with an explicit clock.
	///
	/// A lifetime reaching past the calendar range pins the expiry at its end.
	pub fn set_at(&self, key: impl Into<String>, value: V, ttl: Duration, now: OffsetDateTime) {
		let expires_at = now.saturating_add(ttl);

		self.entries.write().insert(key.into(), CacheEntry { value, expires_at });
	}

	/// Removes `key`. Returns whether an entry existed.
	pub fn delete(&self, key: &str) -> bool {
		self.entries.write().remove(key).is_some()
	}

	/// Removes every key starting with `prefix`. Returns the number removed.
	pub fn delete_prefix(&self, prefix: &str) -> usize {
		let mut guard = self.entries.write();
		let before = guard.len();

		guard.retain(|key, _| !key.starts_with(prefix));

		before - guard.len()
	}

	/// Drops every entry.
	pub fn clear(&self) {
		self.entries.write().clear();
	}

	/// Sweeps expired entries. Returns the number removed.
	pub fn cleanup(&self) -> usize {
		self.cleanup_at(OffsetDateTime::now_utc())
	}

	/// Same as [`EphemeralCache::cleanup`] with an explicit clock.
	pub fn cleanup_at(&self, now: OffsetDateTime) -> usize {
		let mut guard = self.entries.write();
		let before = guard.len();

		guard.retain(|_, entry| !entry.is_expired_at(now));

		before - guard.len()
	}

	/// Number of stored entries, expired ones included until swept.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Returns `true` when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::thread;
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	#[test]
	fn expired_read_evicts() {
		let cache = EphemeralCache::new();
		let now = datetime!(2025-03-01 12:00 UTC);

		cache.set_at("k", "v".to_owned(), Duration::milliseconds(100), now);

		assert_eq!(cache.get_at("k", now).as_deref(), Some("v"));
		assert_eq!(cache.get_at("k", now + Duration::milliseconds(100)).as_deref(), Some("v"));
		assert_eq!(cache.get_at("k", now + Duration::milliseconds(150)), None);
		assert!(cache.is_empty());
	}

	#[test]
	fn cleanup_sweeps_only_expired_entries() {
		let cache = EphemeralCache::new();
		let now = datetime!(2025-03-01 12:00 UTC);

		cache.set_at("short", 1, Duration::seconds(1), now);
		cache.set_at("long", 2, Duration::minutes(5), now);

		assert_eq!(cache.cleanup_at(now + Duration::seconds(2)), 1);
		assert_eq!(cache.len(), 1);
		assert_eq!(cache.get_at("long", now + Duration::seconds(2)), Some(2));
	}

	#[test]
	fn oversized_ttl_saturates() {
		let cache = EphemeralCache::new();
		let now = datetime!(2025-03-01 12:00 UTC);

		cache.set_at("forever", 1, Duration::MAX, now);

		assert_eq!(cache.get_at("forever", now + Duration::days(365)), Some(1));
	}

	#[test]
	fn delete_and_clear() {
		let cache = EphemeralCache::new();

		cache.set(video_list_key("h1", 1, Some(20)), 1, VIDEO_LIST_TTL);
		cache.set(video_list_key("h1", 2, None), 2, VIDEO_LIST_TTL);
		cache.set(video_list_key("h2", 1, Some(20)), 3, VIDEO_LIST_TTL);
		cache.set(metadata_key("dQw4w9WgXcQ"), 4, METADATA_TTL);

		assert_eq!(cache.delete_prefix(&video_list_prefix("h1")), 2);
		assert!(cache.delete("youtube:metadata:dQw4w9WgXcQ"));
		assert!(!cache.delete("youtube:metadata:dQw4w9WgXcQ"));
		assert_eq!(cache.get("videos:list:h2:1:20"), Some(3));

		cache.clear();

		assert!(cache.is_empty());
	}

	#[test]
	fn concurrent_writers_and_readers() {
		let cache = Arc::new(EphemeralCache::new());
		let handles = (0..8)
			.map(|worker| {
				let cache = cache.clone();

				thread::spawn(move || {
					for i in 0..100 {
						let key = format!("key-{}", i % 10);

						cache.set(key.clone(), worker, LOOKUP_TTL);

						assert!(cache.get(&key).is_some());
					}
				})
			})
			.collect::<Vec<_>>();

		for handle in handles {
			handle.join().expect("Cache worker thread should not panic.");
		}

		assert_eq!(cache.len(), 10);
	}
}
