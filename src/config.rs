//! Process configuration: secrets, lifetimes, and the runtime environment flag.
//!
//! Secrets have no defaults. [`TrustConfig::from_env`] fails fast when a secret is missing or
//! too short, so a misconfigured process stops at startup instead of signing or encrypting
//! with something guessable.

// self
use crate::{
	_prelude::*,
	error::ConfigError,
	session::DEFAULT_SESSION_TTL,
	state::{DEFAULT_STATE_TTL, SigningSecret},
	vault::EncryptionKey,
};

/// Environment variable holding the state-signing secret.
pub const STATE_SECRET_VAR: &str = "OAUTH_STATE_SECRET";
/// Environment variable holding the credential encryption key.
pub const ENCRYPTION_KEY_VAR: &str = "OAUTH_ENCRYPTION_KEY";
/// Environment variable holding the runtime environment label.
pub const ENVIRONMENT_VAR: &str = "APP_ENV";
/// Environment variable overriding the session lifetime in days.
pub const SESSION_TTL_VAR: &str = "SESSION_TTL_DAYS";
/// Environment variable overriding the state lifetime in minutes.
pub const STATE_TTL_VAR: &str = "OAUTH_STATE_TTL_MINUTES";
/// Environment variable listing allowed redirect origins, comma-separated.
pub const ALLOWED_ORIGINS_VAR: &str = "ALLOWED_REDIRECT_ORIGINS";

const MAX_SESSION_TTL_DAYS: i64 = 3_650;
const MAX_STATE_TTL_MINUTES: i64 = 1_440;

/// Runtime environment flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Environment {
	/// Local development.
	#[default]
	Development,
	/// Automated tests.
	Test,
	/// Production deployment.
	Production,
}
impl Environment {
	/// Returns `true` for [`Environment::Production`].
	pub const fn is_production(self) -> bool {
		matches!(self, Environment::Production)
	}
}
impl FromStr for Environment {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"production" | "prod" => Ok(Self::Production),
			"development" | "dev" | "" => Ok(Self::Development),
			"test" => Ok(Self::Test),
			_ => Err(ConfigError::InvalidEnvironment { value: s.to_owned() }),
		}
	}
}

/// Validated configuration shared by every component at startup.
#[derive(Clone, Debug)]
pub struct TrustConfig {
	/// HMAC key for continuation tokens.
	pub signing_secret: SigningSecret,
	/// AES-256 key for stored credentials.
	pub encryption_key: EncryptionKey,
	/// Runtime environment flag.
	pub environment: Environment,
	/// Lifetime of device sessions.
	pub session_ttl: Duration,
	/// Lifetime of continuation tokens.
	pub state_ttl: Duration,
	/// Redirect origins accepted in flow state; empty means any http(s) origin.
	pub allowed_origins: Vec<String>,
}
impl TrustConfig {
	/// Builds a configuration from already-validated secrets with default lifetimes.
	pub fn new(signing_secret: SigningSecret, encryption_key: EncryptionKey) -> Self {
		Self {
			signing_secret,
			encryption_key,
			environment: Environment::default(),
			session_ttl: DEFAULT_SESSION_TTL,
			state_ttl: DEFAULT_STATE_TTL,
			allowed_origins: Vec::new(),
		}
	}

	/// Reads the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Reads settings through `lookup`, which returns `None` for unset names.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let signing_secret = SigningSecret::new_named(
			STATE_SECRET_VAR,
			lookup(STATE_SECRET_VAR).unwrap_or_default(),
		)?;
		let encryption_key = EncryptionKey::parse_named(
			ENCRYPTION_KEY_VAR,
			&lookup(ENCRYPTION_KEY_VAR).unwrap_or_default(),
		)?;
		let environment = lookup(ENVIRONMENT_VAR)
			.map(|value| value.parse::<Environment>())
			.transpose()?
			.unwrap_or_default();
		let session_ttl = match lookup(SESSION_TTL_VAR) {
			Some(value) =>
				Duration::days(parse_bounded(SESSION_TTL_VAR, &value, MAX_SESSION_TTL_DAYS)?),
			None => DEFAULT_SESSION_TTL,
		};
		let state_ttl = match lookup(STATE_TTL_VAR) {
			Some(value) =>
				Duration::minutes(parse_bounded(STATE_TTL_VAR, &value, MAX_STATE_TTL_MINUTES)?),
			None => DEFAULT_STATE_TTL,
		};
		let allowed_origins = lookup(ALLOWED_ORIGINS_VAR)
			.map(|value| {
				value
					.split(',')
					.map(str::trim)
					.filter(|origin| !origin.is_empty())
					.map(str::to_owned)
					.collect()
			})
			.unwrap_or_default();

		Ok(Self {
			signing_secret,
			encryption_key,
			environment,
			session_ttl,
			state_ttl,
			allowed_origins,
		})
	}

	/// Overrides the environment flag.
	pub fn with_environment(mut self, environment: Environment) -> Self {
		self.environment = environment;

		self
	}

	/// Overrides the session lifetime.
	pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
		self.session_ttl = ttl;

		self
	}

	/// Overrides the continuation-token lifetime.
	pub fn with_state_ttl(mut self, ttl: Duration) -> Self {
		self.state_ttl = ttl;

		self
	}

	/// Replaces the redirect-origin allowlist.
	pub fn with_allowed_origins<I, S>(mut self, origins: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.allowed_origins = origins.into_iter().map(Into::into).collect();

		self
	}

	/// Startup assertion: the unsigned-cookie session fallback must never run in production.
	pub fn validate_startup(&self, session_fallback_enabled: bool) -> Result<(), ConfigError> {
		if session_fallback_enabled && self.environment.is_production() {
			return Err(ConfigError::InsecureFallbackInProduction);
		}

		Ok(())
	}
}

/// Returns `now + ttl`, or [`ConfigError::InvalidTtl`] under `name` when the instant is not
/// representable.
pub fn expiry_after(
	name: &'static str,
	now: OffsetDateTime,
	ttl: Duration,
) -> Result<OffsetDateTime, ConfigError> {
	now.checked_add(ttl).ok_or(ConfigError::InvalidTtl { name })
}

fn parse_bounded(name: &'static str, value: &str, max: i64) -> Result<i64, ConfigError> {
	match value.trim().parse::<i64>() {
		Ok(parsed) if (1..=max).contains(&parsed) => Ok(parsed),
		_ => Err(ConfigError::InvalidTtl { name }),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	const SECRET: &str = "state-secret-with-at-least-32-bytes!";

	fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map = pairs
			.iter()
			.map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
			.collect::<HashMap<_, _>>();

		move |name| map.get(name).cloned()
	}

	#[test]
	fn missing_secrets_fail_fast() {
		let err = TrustConfig::from_lookup(lookup_from(&[]))
			.expect_err("Missing signing secret must be rejected.");

		assert_eq!(err, ConfigError::MissingSecret { name: STATE_SECRET_VAR });

		let err = TrustConfig::from_lookup(lookup_from(&[(STATE_SECRET_VAR, SECRET)]))
			.expect_err("Missing encryption key must be rejected.");

		assert_eq!(err, ConfigError::MissingSecret { name: ENCRYPTION_KEY_VAR });

		let err = TrustConfig::from_lookup(lookup_from(&[
			(STATE_SECRET_VAR, SECRET),
			(ENCRYPTION_KEY_VAR, "short"),
		]))
		.expect_err("Short encryption key must be rejected.");

		assert_eq!(err, ConfigError::SecretTooShort { name: ENCRYPTION_KEY_VAR, min: 32 });
	}

	#[test]
	fn defaults_and_overrides_are_applied() {
		let hex_key = "ab".repeat(32);
		let config = TrustConfig::from_lookup(lookup_from(&[
			(STATE_SECRET_VAR, SECRET),
			(ENCRYPTION_KEY_VAR, hex_key.as_str()),
		]))
		.expect("Complete configuration should load.");

		assert_eq!(config.environment, Environment::Development);
		assert_eq!(config.session_ttl, Duration::days(90));
		assert_eq!(config.state_ttl, Duration::minutes(10));
		assert!(config.allowed_origins.is_empty());

		let config = TrustConfig::from_lookup(lookup_from(&[
			(STATE_SECRET_VAR, SECRET),
			(ENCRYPTION_KEY_VAR, hex_key.as_str()),
			(ENVIRONMENT_VAR, "Production"),
			(SESSION_TTL_VAR, "30"),
			(STATE_TTL_VAR, "5"),
			(ALLOWED_ORIGINS_VAR, "https://voobi.app, ,http://localhost:3000"),
		]))
		.expect("Complete configuration should load.");

		assert_eq!(config.environment, Environment::Production);
		assert_eq!(config.session_ttl, Duration::days(30));
		assert_eq!(config.state_ttl, Duration::minutes(5));
		assert_eq!(config.allowed_origins, ["https://voobi.app", "http://localhost:3000"]);
	}

	#[test]
	fn invalid_values_are_rejected() {
		let hex_key = "ab".repeat(32);
		let base = [(STATE_SECRET_VAR, SECRET), (ENCRYPTION_KEY_VAR, hex_key.as_str())];
		let with = |extra: (&'static str, &'static str)| {
			let mut pairs = base.to_vec();

			pairs.push(extra);

			TrustConfig::from_lookup(lookup_from(&pairs))
		};

		assert!(matches!(
			with((ENVIRONMENT_VAR, "staging")),
			Err(ConfigError::InvalidEnvironment { .. })
		));
		assert_eq!(
			with((SESSION_TTL_VAR, "0")).map(|_| ()),
			Err(ConfigError::InvalidTtl { name: SESSION_TTL_VAR })
		);
		assert_eq!(
			with((STATE_TTL_VAR, "ten")).map(|_| ()),
			Err(ConfigError::InvalidTtl { name: STATE_TTL_VAR })
		);
	}

	#[test]
	fn oversized_lifetimes_are_rejected() {
		let hex_key = "ab".repeat(32);
		let load = |extra: (&'static str, &'static str)| {
			let pairs = [(STATE_SECRET_VAR, SECRET), (ENCRYPTION_KEY_VAR, hex_key.as_str()), extra];

			TrustConfig::from_lookup(lookup_from(&pairs)).map(|config| config.session_ttl)
		};

		assert_eq!(
			load((SESSION_TTL_VAR, "999999999999999")),
			Err(ConfigError::InvalidTtl { name: SESSION_TTL_VAR })
		);
		assert_eq!(
			load((SESSION_TTL_VAR, "3651")),
			Err(ConfigError::InvalidTtl { name: SESSION_TTL_VAR })
		);
		assert_eq!(load((SESSION_TTL_VAR, "3650")), Ok(Duration::days(3_650)));
		assert_eq!(
			load((STATE_TTL_VAR, "1441")).map(|_| ()),
			Err(ConfigError::InvalidTtl { name: STATE_TTL_VAR })
		);
	}

	#[test]
	fn unrepresentable_expiry_is_a_configuration_error() {
		let now = OffsetDateTime::now_utc();

		assert_eq!(
			expiry_after(SESSION_TTL_VAR, now, Duration::days(4_000_000)),
			Err(ConfigError::InvalidTtl { name: SESSION_TTL_VAR })
		);
		assert_eq!(
			expiry_after(STATE_TTL_VAR, now, Duration::minutes(10)),
			Ok(now + Duration::minutes(10))
		);
	}

	#[test]
	fn startup_assertion_blocks_fallback_in_production() {
		let config = TrustConfig::new(
			SigningSecret::new(SECRET).expect("Secret fixture should be valid."),
			EncryptionKey::from_bytes([1; 32]),
		);

		config.validate_startup(true).expect("Fallback is tolerated outside production.");

		let config = config.with_environment(Environment::Production);

		config.validate_startup(false).expect("Production without fallback is fine.");
		assert_eq!(config.validate_startup(true), Err(ConfigError::InsecureFallbackInProduction));
	}
}
