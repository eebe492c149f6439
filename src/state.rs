//! Signed, self-contained continuation state for redirect-spanning OAuth flows.
//!
//! The provider redirect outlives the request that started it, so the flow context travels
//! inside the `state` parameter itself:
//!
//! ```text
//! base64url(JSON payload) "." lowercase-hex(HMAC-SHA256(JSON payload))
//! ```
//!
//! [`verify_at`] checks structure, then the signature (constant-time), then the strict payload
//! shape, and only then the expiry, so a forged token never learns whether it would have
//! expired.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use subtle::ConstantTimeEq;
// self
use crate::{
	_prelude::*,
	auth::{ActorId, SubjectId},
	error::ConfigError,
};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 16;
const MIN_SECRET_LEN: usize = 32;

/// Default lifetime of a continuation token.
pub const DEFAULT_STATE_TTL: Duration = Duration::minutes(10);

/// Flow variant bound into a token, so one flow's token cannot be replayed into another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowType {
	/// Linking a child's identity account to the household.
	#[serde(rename = "child-link")]
	ChildLink,
	/// Linking the household's video-provider account (yields a refresh token).
	#[serde(rename = "provider-link")]
	ProviderLink,
}
impl FlowType {
	/// Returns the wire label.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowType::ChildLink => "child-link",
			FlowType::ProviderLink => "provider-link",
		}
	}
}
impl Display for FlowType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// HMAC key for continuation tokens. Never printed.
#[derive(Clone)]
pub struct SigningSecret(Vec<u8>);
impl SigningSecret {
	/// Name reported in configuration errors when no other name is supplied.
	pub const DEFAULT_NAME: &'static str = "OAUTH_STATE_SECRET";

	/// Validates a secret of at least 32 bytes.
	pub fn new(raw: impl AsRef<[u8]>) -> Result<Self, ConfigError> {
		Self::new_named(Self::DEFAULT_NAME, raw)
	}

	/// Same as [`SigningSecret::new`], reporting errors under `name`.
	pub fn new_named(name: &'static str, raw: impl AsRef<[u8]>) -> Result<Self, ConfigError> {
		let raw = raw.as_ref();

		if raw.is_empty() {
			return Err(ConfigError::MissingSecret { name });
		}
		if raw.len() < MIN_SECRET_LEN {
			return Err(ConfigError::SecretTooShort { name, min: MIN_SECRET_LEN });
		}

		Ok(Self(raw.to_vec()))
	}

	fn mac(&self, bytes: &[u8]) -> Result<String> {
		let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.0)
			.map_err(|_| ConfigError::MissingSecret { name: Self::DEFAULT_NAME })?;

		mac.update(bytes);

		Ok(hex::encode(mac.finalize().into_bytes()))
	}
}
impl Debug for SigningSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("SigningSecret(<redacted>)")
	}
}

/// Flow context carried through the provider redirect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SignedStatePayload {
	/// Flow variant.
	#[serde(rename = "type")]
	pub kind: FlowType,
	/// Household the flow links for.
	pub subject_id: SubjectId,
	/// Member who started the flow; the completing caller must match.
	pub actor_id: ActorId,
	/// Random hex nonce.
	pub nonce: String,
	/// Expiry as Unix epoch milliseconds.
	pub expires_at: i64,
	/// Origin the callback must be served from, if not the configured application URL.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub redirect_origin: Option<String>,
}
impl SignedStatePayload {
	/// Creates a payload with a fresh nonce, valid up to and including `expires_at`.
	pub fn new(
		kind: FlowType,
		subject_id: SubjectId,
		actor_id: ActorId,
		expires_at: OffsetDateTime,
	) -> Self {
		Self {
			kind,
			subject_id,
			actor_id,
			nonce: generate_nonce(),
			expires_at: epoch_millis(expires_at),
			redirect_origin: None,
		}
	}

	/// Binds a normalized redirect origin into the payload.
	pub fn with_redirect_origin(mut self, origin: impl Into<String>) -> Self {
		self.redirect_origin = Some(origin.into());

		self
	}

	/// Returns `true` once `now` is strictly past the expiry.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		epoch_millis(now) > self.expires_at
	}
}

/// Serializes and signs `payload`.
pub fn sign(payload: &SignedStatePayload, secret: &SigningSecret) -> Result<String> {
	let json = serde_json::to_vec(payload).map_err(Error::malformed)?;
	let signature = secret.mac(&json)?;

	Ok(format!("{}.{signature}", URL_SAFE_NO_PAD.encode(&json)))
}

/// Verifies `token` against the current clock.
pub fn verify(token: &str, secret: &SigningSecret) -> Result<SignedStatePayload> {
	verify_at(token, secret, OffsetDateTime::now_utc())
}

/// Verifies `token` as of `now`.
///
/// Errors, in check order: [`Error::MalformedToken`] for a bad shape or encoding,
/// [`Error::InvalidSignature`], [`Error::MalformedToken`] for a payload that is not exactly
/// the expected structure, then [`Error::Expired`].
pub fn verify_at(
	token: &str,
	secret: &SigningSecret,
	now: OffsetDateTime,
) -> Result<SignedStatePayload> {
	let (encoded, signature) =
		token.split_once('.').ok_or_else(|| Error::malformed("missing separator"))?;

	if signature.contains('.') {
		return Err(Error::malformed("too many segments"));
	}

	let json = URL_SAFE_NO_PAD.decode(encoded).map_err(Error::malformed)?;
	let expected = secret.mac(&json)?;

	if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
		return Err(Error::InvalidSignature);
	}

	let payload: SignedStatePayload =
		serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_slice(&json))
			.map_err(Error::malformed)?;

	if payload.is_expired_at(now) {
		return Err(Error::Expired);
	}

	Ok(payload)
}

/// Verifies `token` as of `now` and requires it to belong to the `expected` flow.
pub fn verify_for(
	token: &str,
	secret: &SigningSecret,
	expected: FlowType,
	now: OffsetDateTime,
) -> Result<SignedStatePayload> {
	let payload = verify_at(token, secret, now)?;

	if payload.kind != expected {
		return Err(Error::FlowMismatch {
			expected: expected.as_str(),
			actual: payload.kind.as_str(),
		});
	}

	Ok(payload)
}

/// Normalizes `raw` to `scheme://host[:port]` and checks it against `allowed` (if non-empty).
pub fn normalize_redirect_origin(raw: &str, allowed: &[String]) -> Result<String, ConfigError> {
	let reject = || ConfigError::InvalidRedirectOrigin { origin: raw.to_owned() };
	let url = Url::parse(raw).map_err(|_| reject())?;

	if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
		return Err(reject());
	}

	let origin = url.origin().ascii_serialization();
	let allowlisted =
		allowed.is_empty() || allowed.iter().any(|entry| entry.trim_end_matches('/') == origin);

	if !allowlisted {
		return Err(reject());
	}

	Ok(origin)
}

/// Returns 16 random bytes, hex-encoded.
pub fn generate_nonce() -> String {
	let mut bytes = [0_u8; NONCE_LEN];

	rand::rng().fill(&mut bytes);

	hex::encode(bytes)
}

fn epoch_millis(instant: OffsetDateTime) -> i64 {
	i64::try_from(instant.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}
