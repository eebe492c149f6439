// std
use std::sync::Arc;
// crates.io
use time::Duration;
// self
use household_trust::cache::{EphemeralCache, METADATA_TTL, metadata_key};

#[tokio::test]
async fn entry_expires_after_its_ttl() {
	let cache = EphemeralCache::new();

	cache.set("k", "v".to_owned(), Duration::milliseconds(100));

	assert_eq!(cache.get("k").as_deref(), Some("v"));

	tokio::time::sleep(std::time::Duration::from_millis(150)).await;

	assert_eq!(cache.get("k"), None);
	assert!(cache.is_empty(), "An expired read should evict the entry.");
}

#[tokio::test]
async fn shared_cache_serves_concurrent_tasks() {
	let cache = Arc::new(EphemeralCache::new());
	let key = metadata_key("dQw4w9WgXcQ");

	cache.set(key.clone(), 42_u64, METADATA_TTL);

	let tasks = (0..16)
		.map(|_| {
			let cache = cache.clone();
			let key = key.clone();

			tokio::spawn(async move { cache.get(&key) })
		})
		.collect::<Vec<_>>();

	for task in tasks {
		assert_eq!(task.await.expect("Cache task should not panic."), Some(42));
	}

	assert_eq!(cache.cleanup(), 0);
}
