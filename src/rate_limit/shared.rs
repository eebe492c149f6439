//! Backend that delegates admission to a store shared across instances.

// self
use crate::{
	_prelude::*,
	rate_limit::{RateLimitBackend, RateLimitFuture, RateLimitKey, RateLimitPolicy},
	store::SharedWindowStore,
};

/// Distributed backend; consistent across every instance pointing at the same store.
pub struct SharedRateLimitBackend {
	store: Arc<dyn SharedWindowStore>,
	prefix: String,
}
impl SharedRateLimitBackend {
	const DEFAULT_PREFIX: &'static str = "ratelimit";

	/// Creates a backend using the default `ratelimit` key prefix.
	pub fn new(store: Arc<dyn SharedWindowStore>) -> Self {
		Self { store, prefix: Self::DEFAULT_PREFIX.into() }
	}

	/// Overrides the key prefix, e.g. to isolate deployments sharing one store.
	pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.prefix = prefix.into();

		self
	}

	fn store_key(&self, key: &RateLimitKey) -> String {
		format!("{}:{key}", self.prefix)
	}
}
impl RateLimitBackend for SharedRateLimitBackend {
	fn admit<'a>(
		&'a self,
		key: &'a RateLimitKey,
		policy: &'a RateLimitPolicy,
		now: OffsetDateTime,
	) -> RateLimitFuture<'a> {
		Box::pin(async move {
			let store_key = self.store_key(key);
			let admission = self
				.store
				.admit(&store_key, now, policy.window, policy.max_requests)
				.await?;

			Ok(admission)
		})
	}
}
impl Debug for SharedRateLimitBackend {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SharedRateLimitBackend").field("prefix", &self.prefix).finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		rate_limit::{PolicyClass, RateLimiter},
		store::MemoryStore,
	};

	#[tokio::test]
	async fn instances_sharing_a_store_share_counters() {
		let store = Arc::new(MemoryStore::default());
		let first = RateLimiter::shared(store.clone());
		let second = RateLimiter::shared(store);
		let policy = RateLimitPolicy::new(PolicyClass::Auth, 2, Duration::minutes(1));
		let now = macros::datetime!(2025-11-10 12:00 UTC);

		assert!(first.limit_at("X", &policy, now).await.expect("Store is reachable.").allowed);
		assert!(second.limit_at("X", &policy, now).await.expect("Store is reachable.").allowed);

		let denied = first
			.limit_at("X", &policy, now + Duration::seconds(1))
			.await
			.expect("Store is reachable.");

		assert!(!denied.allowed);
		assert_eq!(denied.retry_after_seconds, 59);
	}

	#[tokio::test]
	async fn prefixes_isolate_deployments() {
		let store = Arc::new(MemoryStore::default());
		let policy = RateLimitPolicy::new(PolicyClass::Auth, 1, Duration::minutes(1));
		let key = RateLimitKey::new(policy.class, "X");
		let now = macros::datetime!(2025-11-10 12:00 UTC);
		let blue = SharedRateLimitBackend::new(store.clone()).with_prefix("blue");
		let green = SharedRateLimitBackend::new(store).with_prefix("green");

		assert!(blue.admit(&key, &policy, now).await.expect("Store is reachable.").admitted);
		assert!(green.admit(&key, &policy, now).await.expect("Store is reachable.").admitted);
	}
}
