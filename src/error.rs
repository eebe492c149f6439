//! Crate-level error types shared across codecs, the vault, sessions, and stores.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Generic message shown to end users for every connection-flow failure.
pub const GENERIC_CONNECTION_FAILURE: &str = "Could not complete connection. Please try again.";

/// Canonical error exposed by public APIs.
///
/// Token, signature, expiry, and decryption failures carry no diagnostic detail in their
/// [`Error::public_message`]; use the `Display` output only for server-side logs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem (missing or invalid secret, unsafe fallback).
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// Token structure could not be decoded.
	#[error("Token is malformed: {reason}.")]
	MalformedToken {
		/// Server-side description of the structural failure.
		reason: String,
	},
	/// Token signature does not match its payload.
	#[error("Token signature is invalid.")]
	InvalidSignature,
	/// Token signature is valid but the token is past its expiry.
	#[error("Token has expired.")]
	Expired,
	/// Token was issued for a different flow type.
	#[error("Token was issued for the {actual} flow, expected {expected}.")]
	FlowMismatch {
		/// Flow type the caller expected.
		expected: &'static str,
		/// Flow type carried by the token.
		actual: &'static str,
	},
	/// The resuming caller is not the actor the flow was started for.
	#[error("Resuming actor does not match the actor bound to the flow.")]
	ActorMismatch,
	/// Stored ciphertext is too short or cannot be decoded.
	#[error("Ciphertext is invalid.")]
	InvalidCiphertext,
	/// Authentication tag verification failed (tampered data or wrong key).
	#[error("Ciphertext failed authentication.")]
	DecryptionFailure,
	/// Stored credential can no longer be used and must be re-authorized.
	#[error("Stored credential has been revoked.")]
	CredentialRevoked,
	/// Unknown or expired session.
	#[error("Session not found.")]
	NotFound,
	/// Caller exceeded the throttling policy.
	#[error("Rate limit exceeded; retry in {retry_after_seconds} seconds.")]
	RateLimitExceeded {
		/// Seconds until a request would be admitted again.
		retry_after_seconds: u64,
	},
	/// External provider rejected or failed the authorization-code exchange.
	#[error("Authorization code exchange failed: {reason}.")]
	Exchange {
		/// Provider- or crate-supplied reason string.
		reason: String,
	},
}
impl Error {
	/// Builds a [`Error::MalformedToken`] from any displayable reason.
	pub fn malformed(reason: impl Display) -> Self {
		Self::MalformedToken { reason: reason.to_string() }
	}

	/// Returns the message that may be shown to an end user.
	///
	/// Only [`Error::RateLimitExceeded`] carries actionable detail.
	pub fn public_message(&self) -> String {
		match self {
			Self::RateLimitExceeded { retry_after_seconds } =>
				format!("Rate limit exceeded. Try again in {retry_after_seconds} seconds."),
			Self::NotFound => "Not authenticated.".into(),
			Self::Storage(_) | Self::Config(_) => "Service temporarily unavailable.".into(),
			_ => GENERIC_CONNECTION_FAILURE.into(),
		}
	}

	/// HTTP status code the boundary layer should answer with.
	pub fn status_code(&self) -> u16 {
		match self {
			Self::MalformedToken { .. }
			| Self::InvalidSignature
			| Self::Expired
			| Self::FlowMismatch { .. }
			| Self::Exchange { .. } => 400,
			Self::NotFound => 401,
			Self::ActorMismatch => 403,
			Self::CredentialRevoked => 404,
			Self::RateLimitExceeded { .. } => 429,
			Self::InvalidCiphertext | Self::DecryptionFailure => 500,
			Self::Storage(_) | Self::Config(_) => 503,
		}
	}

	/// Returns `true` for failures that mean the stored credential is dead.
	pub fn is_dead_credential(&self) -> bool {
		matches!(self, Self::InvalidCiphertext | Self::DecryptionFailure | Self::CredentialRevoked)
	}
}

/// Configuration and validation failures, raised at startup or at the point of use.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ConfigError {
	/// A required secret is not set.
	#[error("{name} must be set.")]
	MissingSecret {
		/// Environment variable or logical name of the secret.
		name: &'static str,
	},
	/// A secret is shorter than the supported minimum.
	#[error("{name} must be at least {min} characters (or 64 hex characters for 32 bytes).")]
	SecretTooShort {
		/// Environment variable or logical name of the secret.
		name: &'static str,
		/// Minimum accepted length.
		min: usize,
	},
	/// Runtime environment label is not recognized.
	#[error("Unknown runtime environment `{value}`.")]
	InvalidEnvironment {
		/// Raw label that failed to parse.
		value: String,
	},
	/// Redirect origin is not an http(s) origin or is not allowlisted.
	#[error("Redirect origin `{origin}` is not allowed.")]
	InvalidRedirectOrigin {
		/// Origin that failed validation.
		origin: String,
	},
	/// The unsigned-cookie session fallback was requested in production.
	#[error("The cookie-only session fallback cannot run in production.")]
	InsecureFallbackInProduction,
	/// A TTL setting is zero, negative, or unparsable.
	#[error("{name} must be a positive integer.")]
	InvalidTtl {
		/// Environment variable or logical name of the setting.
		name: &'static str,
	},
}
