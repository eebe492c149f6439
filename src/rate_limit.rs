//! Sliding-window request throttling with interchangeable backends.
//!
//! [`RateLimiter`] is the only call-site facing type. It composes the identifier from the
//! policy class and the caller address, asks its [`RateLimitBackend`] for an admission, and
//! turns the answer into a [`RateLimitOutcome`]. The process-local backend keeps windows in
//! memory (lost on restart, consistent only within one process); the shared backend delegates
//! to a [`SharedWindowStore`] so every instance sees the same counters.

mod memory;
mod shared;

pub use memory::MemoryRateLimitBackend;
pub use shared::SharedRateLimitBackend;

// self
use crate::{
	_prelude::*,
	obs::{self, OpKind, OpOutcome, OpSpan},
	store::SharedWindowStore,
};

/// Boxed future returned by [`RateLimitBackend::admit`].
pub type RateLimitFuture<'a> = Pin<Box<dyn Future<Output = Result<WindowAdmission>> + 'a + Send>>;

/// Storage strategy behind a [`RateLimiter`].
pub trait RateLimitBackend
where
	Self: Send + Sync,
{
	/// Atomically prunes the window for `key` and records `now` when under the policy limit.
	fn admit<'a>(
		&'a self,
		key: &'a RateLimitKey,
		policy: &'a RateLimitPolicy,
		now: OffsetDateTime,
	) -> RateLimitFuture<'a>;
}

/// Endpoint sensitivity class; part of every limiter key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolicyClass {
	/// Read-only listing endpoints.
	Public,
	/// Authentication and linking endpoints.
	Auth,
	/// Video creation endpoints.
	VideoAdd,
	/// Caller-defined class. Its counters live under a separate `custom:` namespace, so a label
	/// equal to a built-in class name never shares a counter with that class.
	Custom(&'static str),
}
impl PolicyClass {
	/// Returns a stable label used in limiter keys.
	pub const fn as_str(self) -> &'static str {
		match self {
			PolicyClass::Public => "public",
			PolicyClass::Auth => "auth",
			PolicyClass::VideoAdd => "video-add",
			PolicyClass::Custom(label) => label,
		}
	}
}
impl Display for PolicyClass {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Throttling policy: at most `max_requests` admissions within any trailing `window`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
	/// Class the policy applies to.
	pub class: PolicyClass,
	/// Maximum admissions inside one window.
	pub max_requests: u32,
	/// Length of the trailing window.
	pub window: Duration,
}
impl RateLimitPolicy {
	/// Creates a policy for the provided class.
	pub fn new(class: PolicyClass, max_requests: u32, window: Duration) -> Self {
		Self { class, max_requests, window }
	}

	/// Listing endpoints: 100 requests per 15 minutes.
	pub fn public() -> Self {
		Self::new(PolicyClass::Public, 100, Duration::minutes(15))
	}

	/// Authentication endpoints: 10 requests per 15 minutes.
	pub fn auth() -> Self {
		Self::new(PolicyClass::Auth, 10, Duration::minutes(15))
	}

	/// Video creation: 20 requests per hour.
	pub fn video_add() -> Self {
		Self::new(PolicyClass::VideoAdd, 20, Duration::hours(1))
	}
}

/// Composite limiter key of policy class and caller identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);
impl RateLimitKey {
	/// Builds the key `{class}:{identifier}`, or `custom:{label}:{identifier}` for a custom class.
	pub fn new(class: PolicyClass, identifier: &str) -> Self {
		match class {
			PolicyClass::Custom(label) => Self(format!("custom:{label}:{identifier}")),
			builtin => Self(format!("{}:{identifier}", builtin.as_str())),
		}
	}

	/// Returns the key as a string slice.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Display for RateLimitKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

/// Caller address used as the limiter identifier.
///
/// Forwarding headers are only trustworthy behind a proxy that overwrites them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallerAddress(String);
impl CallerAddress {
	const UNKNOWN: &'static str = "unknown";

	/// Wraps an already-resolved address.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Resolves the caller from `x-forwarded-for` (first hop) or `x-real-ip`.
	pub fn from_headers(forwarded_for: Option<&str>, real_ip: Option<&str>) -> Self {
		let forwarded = forwarded_for
			.and_then(|value| value.split(',').next())
			.map(str::trim)
			.filter(|hop| !hop.is_empty());
		let real = real_ip.map(str::trim).filter(|ip| !ip.is_empty());

		Self(forwarded.or(real).unwrap_or(Self::UNKNOWN).to_owned())
	}

	/// Returns the address as a string slice.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

/// Raw answer from a backend after pruning and (maybe) recording a hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowAdmission {
	/// Whether the hit was recorded.
	pub admitted: bool,
	/// Hits inside the window after this call.
	pub count: u32,
	/// Oldest retained hit, if any.
	pub oldest: Option<OffsetDateTime>,
}

/// Result reported to the request-handling layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitOutcome {
	/// Whether the request may proceed.
	pub allowed: bool,
	/// Policy maximum.
	pub limit: u32,
	/// Admissions left in the current window.
	pub remaining: u32,
	/// Seconds until the oldest hit leaves the window; zero when allowed.
	pub retry_after_seconds: u64,
}
impl RateLimitOutcome {
	fn from_admission(
		admission: WindowAdmission,
		policy: &RateLimitPolicy,
		now: OffsetDateTime,
	) -> Self {
		let remaining = policy.max_requests.saturating_sub(admission.count);

		if admission.admitted {
			return Self {
				allowed: true,
				limit: policy.max_requests,
				remaining,
				retry_after_seconds: 0,
			};
		}

		let wait = match admission.oldest {
			Some(oldest) => oldest.saturating_add(policy.window) - now,
			None => policy.window,
		};

		Self {
			allowed: false,
			limit: policy.max_requests,
			remaining,
			retry_after_seconds: ceil_seconds(wait),
		}
	}
}

/// Per-identifier log of hit timestamps, kept sorted oldest first.
#[derive(Clone, Debug, Default)]
pub struct SlidingWindow {
	hits: VecDeque<OffsetDateTime>,
	span: Duration,
}
impl SlidingWindow {
	/// Prunes hits at or before `now - window`, then records `now` if under `max_requests`.
	pub fn admit(
		&mut self,
		now: OffsetDateTime,
		window: Duration,
		max_requests: u32,
	) -> WindowAdmission {
		self.span = window;
		self.prune(now);

		let admitted = self.hits.len() < max_requests as usize;

		if admitted {
			let at = self.hits.partition_point(|hit| *hit <= now);

			self.hits.insert(at, now);
		}

		WindowAdmission {
			admitted,
			count: u32::try_from(self.hits.len()).unwrap_or(u32::MAX),
			oldest: self.hits.front().copied(),
		}
	}

	/// Returns `true` once every recorded hit has aged out.
	pub fn is_idle(&mut self, now: OffsetDateTime) -> bool {
		self.prune(now);

		self.hits.is_empty()
	}

	fn prune(&mut self, now: OffsetDateTime) {
		let floor = now.saturating_sub(self.span);

		while self.hits.front().is_some_and(|hit| *hit <= floor) {
			self.hits.pop_front();
		}
	}
}

/// Backend-agnostic sliding-window limiter, shared by handlers through an `Arc`.
#[derive(Clone)]
pub struct RateLimiter {
	backend: Arc<dyn RateLimitBackend>,
}
impl RateLimiter {
	/// Wraps an arbitrary backend.
	pub fn new(backend: Arc<dyn RateLimitBackend>) -> Self {
		Self { backend }
	}

	/// Process-local limiter for single-instance deployments.
	pub fn in_memory() -> Self {
		Self::new(Arc::new(MemoryRateLimitBackend::default()))
	}

	/// Limiter backed by a store shared across instances.
	pub fn shared(store: Arc<dyn SharedWindowStore>) -> Self {
		Self::new(Arc::new(SharedRateLimitBackend::new(store)))
	}

	/// Consults the policy for `identifier` at the current instant.
	pub async fn limit(
		&self,
		identifier: &str,
		policy: &RateLimitPolicy,
	) -> Result<RateLimitOutcome> {
		self.limit_at(identifier, policy, OffsetDateTime::now_utc()).await
	}

	/// Consults the policy for `identifier` at an explicit instant.
	pub async fn limit_at(
		&self,
		identifier: &str,
		policy: &RateLimitPolicy,
		now: OffsetDateTime,
	) -> Result<RateLimitOutcome> {
		let span = OpSpan::new(OpKind::RateLimit, "limit");

		span.record_policy(policy.class);
		obs::record_op_outcome(OpKind::RateLimit, OpOutcome::Attempt);

		let key = RateLimitKey::new(policy.class, identifier);
		let result = span
			.instrument(self.backend.admit(&key, policy, now))
			.await
			.map(|admission| RateLimitOutcome::from_admission(admission, policy, now));

		match &result {
			Ok(outcome) if !outcome.allowed => {
				obs::record_op_outcome(OpKind::RateLimit, OpOutcome::Failure);
				obs::record_throttled(policy.class);
				obs::warn(OpKind::RateLimit, &format!("Throttled {key}."));
			},
			_ => obs::record_result(OpKind::RateLimit, &result),
		}

		result
	}

	/// Like [`RateLimiter::limit`], but turns a denial into [`Error::RateLimitExceeded`].
	pub async fn enforce(
		&self,
		caller: &CallerAddress,
		policy: &RateLimitPolicy,
	) -> Result<RateLimitOutcome> {
		self.enforce_at(caller, policy, OffsetDateTime::now_utc()).await
	}

	/// Like [`RateLimiter::enforce`] at an explicit instant.
	pub async fn enforce_at(
		&self,
		caller: &CallerAddress,
		policy: &RateLimitPolicy,
		now: OffsetDateTime,
	) -> Result<RateLimitOutcome> {
		let outcome = self.limit_at(caller.as_str(), policy, now).await?;

		if outcome.allowed {
			Ok(outcome)
		} else {
			Err(Error::RateLimitExceeded { retry_after_seconds: outcome.retry_after_seconds })
		}
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("RateLimiter(..)")
	}
}

fn ceil_seconds(duration: Duration) -> u64 {
	let millis = duration.whole_milliseconds().max(0);
	let seconds = (millis + 999) / 1_000;

	u64::try_from(seconds).unwrap_or(u64::MAX).max(1)
}
