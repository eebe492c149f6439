//! Process-local sliding-window backend.

// self
use crate::{
	_prelude::*,
	rate_limit::{
		RateLimitBackend, RateLimitFuture, RateLimitKey, RateLimitPolicy, SlidingWindow,
		WindowAdmission,
	},
};

type WindowMap = Mutex<HashMap<RateLimitKey, Arc<Mutex<SlidingWindow>>>>;

/// In-process backend; windows live in this process only and vanish on restart.
///
/// Each identifier has its own lock, so the prune/decide/record sequence for one caller is
/// serialized without blocking unrelated callers.
#[derive(Debug, Default)]
pub struct MemoryRateLimitBackend {
	windows: WindowMap,
}
impl MemoryRateLimitBackend {
	/// Synchronous admission used by the async contract.
	pub fn admit_now(
		&self,
		key: &RateLimitKey,
		policy: &RateLimitPolicy,
		now: OffsetDateTime,
	) -> WindowAdmission {
		let window = self.window(key);
		let mut guard = window.lock();

		guard.admit(now, policy.window, policy.max_requests)
	}

	/// Drops identifiers whose windows are empty at `now`. Returns the number dropped.
	pub fn sweep(&self, now: OffsetDateTime) -> usize {
		let mut windows = self.windows.lock();
		let before = windows.len();

		// Clones are only handed out under the map lock, so a count of one means no caller
		// is mid-admission on this window.
		windows.retain(|_, window| Arc::strong_count(window) > 1 || !window.lock().is_idle(now));

		before - windows.len()
	}

	/// Number of identifiers currently tracked.
	pub fn tracked(&self) -> usize {
		self.windows.lock().len()
	}

	fn window(&self, key: &RateLimitKey) -> Arc<Mutex<SlidingWindow>> {
		let mut windows = self.windows.lock();

		windows.entry(key.clone()).or_default().clone()
	}
}
impl RateLimitBackend for MemoryRateLimitBackend {
	fn admit<'a>(
		&'a self,
		key: &'a RateLimitKey,
		policy: &'a RateLimitPolicy,
		now: OffsetDateTime,
	) -> RateLimitFuture<'a> {
		let admission = self.admit_now(key, policy, now);

		Box::pin(async move { Ok(admission) })
	}
}
