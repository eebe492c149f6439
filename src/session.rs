//! Opaque device session tokens: issuance, validation, and revocation.
//!
//! The raw token only ever lives in the client's cookie. The server persists the lowercase hex
//! SHA-256 of it, so a leaked session table yields no usable tokens. Validation never tells an
//! unknown token apart from an expired one, and a storage failure reads as "not authenticated".

// crates.io
use rand::Rng;
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{ActorId, Secret, SubjectId},
	config::{self, Environment, SESSION_TTL_VAR, TrustConfig},
	error::ConfigError,
	obs::{self, OpKind, OpOutcome, OpSpan},
	store::{SessionStore, StoreFuture},
};

/// Cookie carrying the raw session token.
pub const SESSION_COOKIE_NAME: &str = "voobi_device_token";
/// Cookie carrying the unsigned actor identifier (development fallback only).
pub const ACTOR_COOKIE_NAME: &str = "voobi_parent_id_secure";
/// Default lifetime of a device session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::days(90);

const TOKEN_LEN: usize = 32;

/// Persisted session row; `token_hash` is the only trace of the raw token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
	/// Lowercase hex SHA-256 of the raw token.
	pub token_hash: String,
	/// Household the device is linked to.
	pub subject: SubjectId,
	/// Member who linked the device, if recorded.
	pub actor: Option<ActorId>,
	/// Instant after which the session is no longer valid.
	pub expires_at: OffsetDateTime,
}
impl SessionRecord {
	/// Returns `true` once `now` is strictly past the expiry.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		now > self.expires_at
	}
}

/// Identity resolved from a valid session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionIdentity {
	/// Household the device is linked to.
	pub subject: SubjectId,
	/// Member who linked the device, if known.
	pub actor: Option<ActorId>,
}

/// Resolves an actor's default subject for the cookie-only fallback.
pub trait FallbackResolver
where
	Self: Send + Sync,
{
	/// Returns the subject the actor belongs to by default, if the actor exists.
	fn default_subject<'a>(&'a self, actor: &'a ActorId) -> StoreFuture<'a, Option<SubjectId>>;
}

#[derive(Clone)]
enum SessionBackend {
	Persistent(Arc<dyn SessionStore>),
	CookieFallback(Arc<dyn FallbackResolver>),
}

/// Issues, validates, and revokes device sessions.
#[derive(Clone)]
pub struct SessionTokenService {
	backend: SessionBackend,
	ttl: Duration,
	environment: Environment,
}
impl SessionTokenService {
	/// Creates a service persisting hashed sessions in `store`.
	pub fn new(store: Arc<dyn SessionStore>, environment: Environment) -> Self {
		Self { backend: SessionBackend::Persistent(store), ttl: DEFAULT_SESSION_TTL, environment }
	}

	/// Creates a persistent service using the configured environment and session lifetime.
	pub fn from_config(config: &TrustConfig, store: Arc<dyn SessionStore>) -> Self {
		Self::new(store, config.environment).with_ttl(config.session_ttl)
	}

	/// Creates the development-only service that trusts an unsigned actor cookie.
	///
	/// This path exists for local setups without a session store. It refuses to start in
	/// production, and [`SessionTokenService::resolve`] re-checks the environment on every call.
	pub fn development_fallback(
		resolver: Arc<dyn FallbackResolver>,
		environment: Environment,
	) -> Result<Self, ConfigError> {
		if environment.is_production() {
			return Err(ConfigError::InsecureFallbackInProduction);
		}

		Ok(Self {
			backend: SessionBackend::CookieFallback(resolver),
			ttl: DEFAULT_SESSION_TTL,
			environment,
		})
	}

	/// Overrides the session lifetime.
	pub fn with_ttl(mut self, ttl: Duration) -> Self {
		self.ttl = ttl;

		self
	}

	/// Session lifetime applied at issuance and to cookie `Max-Age`.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Returns `true` when the service runs on the unsigned-cookie fallback.
	pub fn is_fallback(&self) -> bool {
		matches!(self.backend, SessionBackend::CookieFallback(_))
	}

	/// Issues a session for `subject` linked by `actor`; returns the raw token for the cookie.
	pub async fn issue(&self, subject: SubjectId, actor: ActorId) -> Result<Secret> {
		self.issue_at(subject, actor, OffsetDateTime::now_utc()).await
	}

	/// Issues a session as of `now`.
	pub async fn issue_at(
		&self,
		subject: SubjectId,
		actor: ActorId,
		now: OffsetDateTime,
	) -> Result<Secret> {
		const KIND: OpKind = OpKind::SessionIssue;

		let span = OpSpan::new(KIND, "issue");

		span.record_subject(&subject);
		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let token = generate_token();

				if let SessionBackend::Persistent(store) = &self.backend {
					let record = SessionRecord {
						token_hash: hash_token(token.expose()),
						subject,
						actor: Some(actor),
						expires_at: config::expiry_after(SESSION_TTL_VAR, now, self.ttl)?,
					};

					store.create(record).await?;
				}

				Ok(token)
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}

	/// Validates a presented raw token against the current clock.
	pub async fn validate(&self, raw_token: &str) -> Option<SessionIdentity> {
		self.validate_at(raw_token, OffsetDateTime::now_utc()).await
	}

	/// Validates a presented raw token as of `now`.
	///
	/// Unknown, expired, and unverifiable tokens all yield `None`.
	pub async fn validate_at(
		&self,
		raw_token: &str,
		now: OffsetDateTime,
	) -> Option<SessionIdentity> {
		const KIND: OpKind = OpKind::SessionValidate;

		let SessionBackend::Persistent(store) = &self.backend else {
			return None;
		};
		let span = OpSpan::new(KIND, "validate");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let identity = span
			.instrument(async move {
				let token_hash = hash_token(raw_token);

				match store.find(&token_hash).await {
					Ok(Some(record)) if !record.is_expired_at(now) =>
						Some(SessionIdentity { subject: record.subject, actor: record.actor }),
					Ok(_) => None,
					Err(e) => {
						obs::warn(KIND, &format!("Session lookup failed closed: {e}"));

						None
					},
				}
			})
			.await;
		let outcome = if identity.is_some() { OpOutcome::Success } else { OpOutcome::Failure };

		obs::record_op_outcome(KIND, outcome);

		identity
	}

	/// Resolves the caller's identity from request cookies.
	///
	/// With a session store, only the token cookie counts. Without one, the unsigned actor
	/// cookie is trusted, except in production where the answer is always `None`.
	pub async fn resolve(
		&self,
		token_cookie: Option<&str>,
		actor_cookie: Option<&str>,
	) -> Option<SessionIdentity> {
		match &self.backend {
			SessionBackend::Persistent(_) => self.validate(token_cookie?).await,
			SessionBackend::CookieFallback(resolver) => {
				if self.environment.is_production() {
					return None;
				}

				let actor = ActorId::new(actor_cookie?).ok()?;
				let lookup = resolver.default_subject(&actor).await;

				match lookup {
					Ok(subject) =>
						subject.map(|subject| SessionIdentity { subject, actor: Some(actor) }),
					Err(e) => {
						let message = format!("Fallback lookup failed closed: {e}");

						obs::warn(OpKind::SessionValidate, &message);

						None
					},
				}
			},
		}
	}

	/// Deletes the session for `raw_token`. Unknown or already-revoked tokens are a no-op.
	pub async fn revoke(&self, raw_token: &str) -> Result<()> {
		const KIND: OpKind = OpKind::SessionRevoke;

		let SessionBackend::Persistent(store) = &self.backend else {
			return Ok(());
		};
		let span = OpSpan::new(KIND, "revoke");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				store.delete(&hash_token(raw_token)).await?;

				Ok(())
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}

	/// Cookie that hands `token` to the client.
	pub fn session_cookie(&self, token: &Secret) -> SessionCookie {
		SessionCookie::new(SESSION_COOKIE_NAME, token.expose(), self.ttl, self.environment)
	}

	/// Cookie carrying the actor identifier for the fallback path.
	pub fn actor_cookie(&self, actor: &ActorId) -> SessionCookie {
		SessionCookie::new(ACTOR_COOKIE_NAME, actor.to_string(), self.ttl, self.environment)
	}

	/// Cookies that clear both session cookies on logout.
	pub fn logout_cookies(&self) -> [SessionCookie; 2] {
		[
			SessionCookie::cleared(SESSION_COOKIE_NAME, self.environment),
			SessionCookie::cleared(ACTOR_COOKIE_NAME, self.environment),
		]
	}
}
impl Debug for SessionTokenService {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionTokenService")
			.field("fallback", &self.is_fallback())
			.field("ttl", &self.ttl)
			.field("environment", &self.environment)
			.finish()
	}
}

/// `Set-Cookie` value for session transport: `HttpOnly`, `SameSite=Lax`, path `/`, and `Secure`
/// in production.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCookie {
	name: &'static str,
	value: String,
	max_age: Duration,
	secure: bool,
}
impl SessionCookie {
	/// Creates a cookie with the given lifetime.
	pub fn new(
		name: &'static str,
		value: impl Into<String>,
		max_age: Duration,
		environment: Environment,
	) -> Self {
		Self { name, value: value.into(), max_age, secure: environment.is_production() }
	}

	/// Creates an expiring cookie that removes `name` from the client.
	pub fn cleared(name: &'static str, environment: Environment) -> Self {
		Self::new(name, "", Duration::ZERO, environment)
	}

	/// Cookie name.
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Renders the `Set-Cookie` header value.
	pub fn to_header_value(&self) -> String {
		let mut header = format!(
			"{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
			self.name,
			self.value,
			self.max_age.whole_seconds().max(0)
		);

		if self.secure {
			header.push_str("; Secure");
		}

		header
	}
}
impl Debug for SessionCookie {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionCookie")
			.field("name", &self.name)
			.field("value", &"<redacted>")
			.field("max_age", &self.max_age)
			.field("secure", &self.secure)
			.finish()
	}
}

/// Generates a raw token of 32 random bytes, hex-encoded.
pub fn generate_token() -> Secret {
	let mut bytes = [0_u8; TOKEN_LEN];

	rand::rng().fill(&mut bytes);

	Secret::new(hex::encode(bytes))
}

/// One-way hash stored in place of the raw token.
pub fn hash_token(raw_token: &str) -> String {
	hex::encode(Sha256::digest(raw_token.as_bytes()))
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;
	use crate::{
		state::SigningSecret,
		store::{MemoryStore, StoreError},
		vault::EncryptionKey,
	};

	struct NoHouseholds;
	impl FallbackResolver for NoHouseholds {
		fn default_subject<'a>(&'a self, _: &'a ActorId) -> StoreFuture<'a, Option<SubjectId>> {
			Box::pin(async { Err(StoreError::Unavailable { message: "offline".into() }) })
		}
	}

	struct OfflineSessions;
	impl SessionStore for OfflineSessions {
		fn create(&self, _: SessionRecord) -> StoreFuture<'_, ()> {
			Box::pin(async { Err(StoreError::Unavailable { message: "offline".into() }) })
		}

		fn find<'a>(&'a self, _: &'a str) -> StoreFuture<'a, Option<SessionRecord>> {
			Box::pin(async { Err(StoreError::Unavailable { message: "offline".into() }) })
		}

		fn delete<'a>(&'a self, _: &'a str) -> StoreFuture<'a, bool> {
			Box::pin(async { Err(StoreError::Unavailable { message: "offline".into() }) })
		}

		fn purge_expired(&self, _: OffsetDateTime) -> StoreFuture<'_, usize> {
			Box::pin(async { Err(StoreError::Unavailable { message: "offline".into() }) })
		}
	}

	fn ids() -> (SubjectId, ActorId) {
		(
			SubjectId::new("household-1").expect("Subject fixture should be valid."),
			ActorId::new("member-1").expect("Actor fixture should be valid."),
		)
	}

	#[test]
	fn tokens_are_random_hex_and_hash_is_sha256_hex() {
		let first = generate_token();
		let second = generate_token();

		assert_eq!(first.expose().len(), TOKEN_LEN * 2);
		assert_ne!(first, second);
		assert_eq!(
			hash_token("abc"),
			"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
		);
		assert_ne!(hash_token(first.expose()), first.expose());
	}

	#[test]
	fn cookie_attributes_follow_environment() {
		let token = Secret::new("deadbeef");
		let cookie = |environment| {
			SessionCookie::new(SESSION_COOKIE_NAME, token.expose(), Duration::days(90), environment)
		};
		let dev = cookie(Environment::Development);
		let prod = cookie(Environment::Production);

		assert_eq!(
			dev.to_header_value(),
			"voobi_device_token=deadbeef; Path=/; Max-Age=7776000; HttpOnly; SameSite=Lax"
		);
		assert!(prod.to_header_value().ends_with("; Secure"));
		assert!(!format!("{prod:?}").contains("deadbeef"));
		assert!(
			SessionCookie::cleared(ACTOR_COOKIE_NAME, Environment::Development)
				.to_header_value()
				.contains("Max-Age=0")
		);
	}

	#[test]
	fn fallback_refuses_production() {
		let err = SessionTokenService::development_fallback(
			Arc::new(NoHouseholds),
			Environment::Production,
		)
		.expect_err("Fallback must not start in production.");

		assert_eq!(err, ConfigError::InsecureFallbackInProduction);
	}

	#[tokio::test]
	async fn fallback_fails_closed_on_resolver_error() {
		let service = SessionTokenService::development_fallback(
			Arc::new(NoHouseholds),
			Environment::Development,
		)
		.expect("Fallback should start in development.");

		assert!(service.is_fallback());
		assert_eq!(service.resolve(None, Some("member-1")).await, None);
		assert_eq!(service.resolve(None, Some("not valid")).await, None);
		assert_eq!(service.validate("anything").await, None);
		service.revoke("anything").await.expect("Fallback revoke is a no-op.");
	}

	#[tokio::test]
	async fn persistent_validation_fails_closed_when_storage_is_down() {
		let service = SessionTokenService::new(Arc::new(OfflineSessions), Environment::Production);

		assert_eq!(service.validate("0f".repeat(32).as_str()).await, None);
		assert_eq!(service.resolve(Some("token"), Some("member-1")).await, None);

		let (subject, actor) = ids();
		let err = service
			.issue(subject, actor)
			.await
			.expect_err("Issuing must surface the storage failure.");

		assert!(matches!(err, Error::Storage(StoreError::Unavailable { .. })));
	}

	#[tokio::test]
	async fn unrepresentable_session_expiry_is_rejected() {
		let store = MemoryStore::default();
		let service = SessionTokenService::new(Arc::new(store.clone()), Environment::Test)
			.with_ttl(Duration::days(4_000_000));
		let (subject, actor) = ids();
		let err = service
			.issue(subject, actor)
			.await
			.expect_err("A lifetime past the calendar range must not issue a session.");

		assert!(matches!(
			err,
			Error::Config(ConfigError::InvalidTtl { name: SESSION_TTL_VAR })
		));
		assert_eq!(store.session_count(), 0);
	}

	#[tokio::test]
	async fn configured_lifetime_reaches_record_and_cookie() {
		let store = MemoryStore::default();
		let config = TrustConfig::new(
			SigningSecret::new([2_u8; 32]).expect("Secret fixture should be valid."),
			EncryptionKey::from_bytes([4; 32]),
		)
		.with_environment(Environment::Production)
		.with_session_ttl(Duration::days(30));
		let service = SessionTokenService::from_config(&config, Arc::new(store.clone()));
		let now = datetime!(2025-03-01 12:00 UTC);
		let (subject, actor) = ids();
		let token = service.issue_at(subject, actor, now).await.expect("Issue should succeed.");
		let record = SessionStore::find(&store, &hash_token(token.expose()))
			.await
			.expect("Lookup should succeed.")
			.expect("Issued session should be stored.");

		assert_eq!(record.expires_at, now + Duration::days(30));
		assert_eq!(service.ttl(), Duration::days(30));

		let header = service.session_cookie(&token).to_header_value();

		assert!(header.contains("Max-Age=2592000"));
		assert!(header.ends_with("; Secure"));
	}
}
