//! Encryption of long-lived provider credentials before they reach storage.
//!
//! Credentials are sealed with AES-256-GCM using a fresh 16-byte IV per call and a 16-byte
//! authentication tag. The sealed layout is `iv || tag || ciphertext`; stores keep it as a
//! base64url string. Plaintext never leaves [`decrypt`] except wrapped in a [`Secret`].

// crates.io
use aes_gcm::{
	AesGcm, Key, KeyInit,
	aead::{self, AeadInPlace, consts::U16},
	aes::Aes256,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
// self
use crate::{
	_prelude::*,
	auth::{ActorId, Secret, SubjectId},
	error::ConfigError,
};

type CredentialCipher = AesGcm<Aes256, U16>;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const HEX_KEY_LEN: usize = KEY_LEN * 2;

/// 256-bit vault key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_LEN]);
impl EncryptionKey {
	/// Name reported in configuration errors when no other name is supplied.
	pub const DEFAULT_NAME: &'static str = "OAUTH_ENCRYPTION_KEY";

	/// Parses a 64-character hex string, or takes the first 32 bytes of a longer raw secret.
	pub fn parse(raw: &str) -> Result<Self, ConfigError> {
		Self::parse_named(Self::DEFAULT_NAME, raw)
	}

	/// Same as [`EncryptionKey::parse`], reporting errors under `name`.
	pub fn parse_named(name: &'static str, raw: &str) -> Result<Self, ConfigError> {
		if raw.is_empty() {
			return Err(ConfigError::MissingSecret { name });
		}
		if raw.len() == HEX_KEY_LEN {
			let mut key = [0_u8; KEY_LEN];

			if hex::decode_to_slice(raw, &mut key).is_ok() {
				return Ok(Self(key));
			}
		}
		if raw.len() < KEY_LEN {
			return Err(ConfigError::SecretTooShort { name, min: KEY_LEN });
		}

		let mut key = [0_u8; KEY_LEN];

		key.copy_from_slice(&raw.as_bytes()[..KEY_LEN]);

		Ok(Self(key))
	}

	/// Wraps raw key bytes.
	pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
		Self(bytes)
	}

	fn cipher(&self) -> CredentialCipher {
		CredentialCipher::new(Key::<CredentialCipher>::from_slice(&self.0))
	}
}
impl Debug for EncryptionKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("EncryptionKey(<redacted>)")
	}
}

/// Sealed credential bytes: `iv(16) || tag(16) || ciphertext`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EncryptedCredential(Vec<u8>);
impl EncryptedCredential {
	/// Wraps sealed bytes as read from storage.
	pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
		Self(bytes.into())
	}

	/// Decodes the base64url storage representation.
	pub fn from_storage_string(value: &str) -> Result<Self> {
		URL_SAFE_NO_PAD
			.decode(value.trim_end_matches('='))
			.map(Self)
			.map_err(|_| Error::InvalidCiphertext)
	}

	/// Encodes the sealed bytes for a text column.
	pub fn to_storage_string(&self) -> String {
		URL_SAFE_NO_PAD.encode(&self.0)
	}

	/// Returns the sealed bytes.
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}
}
impl TryFrom<String> for EncryptedCredential {
	type Error = Error;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::from_storage_string(&value)
	}
}
impl From<EncryptedCredential> for String {
	fn from(value: EncryptedCredential) -> Self {
		value.to_storage_string()
	}
}
impl Debug for EncryptedCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "EncryptedCredential({} bytes)", self.0.len())
	}
}

/// Seals `plaintext` under `key` with a fresh random IV.
pub fn encrypt(plaintext: &str, key: &EncryptionKey) -> Result<EncryptedCredential> {
	let mut iv = [0_u8; IV_LEN];

	rand::rng().fill(&mut iv);

	let mut buffer = plaintext.as_bytes().to_vec();
	let tag = key
		.cipher()
		.encrypt_in_place_detached(
			aead::Nonce::<CredentialCipher>::from_slice(&iv),
			b"",
			&mut buffer,
		)
		.map_err(|_| Error::InvalidCiphertext)?;
	let mut sealed = Vec::with_capacity(IV_LEN + TAG_LEN + buffer.len());

	sealed.extend_from_slice(&iv);
	sealed.extend_from_slice(&tag);
	sealed.extend_from_slice(&buffer);

	Ok(EncryptedCredential(sealed))
}

/// Opens a sealed credential.
///
/// Fails with [`Error::InvalidCiphertext`] when shorter than `iv + tag`, and with
/// [`Error::DecryptionFailure`] when the tag does not verify (tampering or wrong key).
pub fn decrypt(ciphertext: &EncryptedCredential, key: &EncryptionKey) -> Result<Secret> {
	let sealed = ciphertext.as_bytes();

	if sealed.len() < IV_LEN + TAG_LEN {
		return Err(Error::InvalidCiphertext);
	}

	let (iv, rest) = sealed.split_at(IV_LEN);
	let (tag, body) = rest.split_at(TAG_LEN);
	let mut buffer = body.to_vec();

	key.cipher()
		.decrypt_in_place_detached(
			aead::Nonce::<CredentialCipher>::from_slice(iv),
			b"",
			&mut buffer,
			aead::Tag::<CredentialCipher>::from_slice(tag),
		)
		.map_err(|_| Error::DecryptionFailure)?;

	String::from_utf8(buffer).map(Secret::new).map_err(|_| Error::DecryptionFailure)
}

/// Vault bound to one key, handed to flows at startup.
#[derive(Clone, Debug)]
pub struct CredentialVault {
	key: EncryptionKey,
}
impl CredentialVault {
	/// Creates a vault around `key`.
	pub fn new(key: EncryptionKey) -> Self {
		Self { key }
	}

	/// See [`encrypt`].
	pub fn encrypt(&self, plaintext: &Secret) -> Result<EncryptedCredential> {
		encrypt(plaintext.expose(), &self.key)
	}

	/// See [`decrypt`].
	pub fn decrypt(&self, ciphertext: &EncryptedCredential) -> Result<Secret> {
		decrypt(ciphertext, &self.key)
	}
}

/// Stored link between a subject and an external provider account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
	/// Owning household.
	pub subject: SubjectId,
	/// Sealed refresh token.
	pub credential: EncryptedCredential,
	/// Provider-side account identifier (e.g. a channel id), when known.
	pub external_account_id: Option<String>,
	/// Member who completed the link.
	pub linked_by: Option<ActorId>,
	/// Instant the link was written.
	pub linked_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn key(fill: u8) -> EncryptionKey {
		EncryptionKey::from_bytes([fill; KEY_LEN])
	}

	#[test]
	fn round_trip_restores_plaintext() {
		let key = key(7);

		for plaintext in ["", "1//0g-refresh-token", "ünïcödé ✓"] {
			let sealed = encrypt(plaintext, &key).expect("Encryption should succeed.");
			let opened = decrypt(&sealed, &key).expect("Decryption should succeed.");

			assert_eq!(opened.expose(), plaintext);
			assert_eq!(sealed.as_bytes().len(), IV_LEN + TAG_LEN + plaintext.len());
		}
	}

	#[test]
	fn wrong_key_fails_authentication() {
		let sealed = encrypt("refresh", &key(1)).expect("Encryption should succeed.");
		let err =
			decrypt(&sealed, &key(2)).expect_err("A different key must not open the credential.");

		assert!(matches!(err, Error::DecryptionFailure));
	}

	#[test]
	fn fresh_iv_per_call() {
		let key = key(3);
		let first = encrypt("same", &key).expect("Encryption should succeed.");
		let second = encrypt("same", &key).expect("Encryption should succeed.");

		assert_ne!(first, second);
		assert_ne!(first.as_bytes()[..IV_LEN], second.as_bytes()[..IV_LEN]);
		assert_eq!(decrypt(&first, &key).expect("First should open.").expose(), "same");
		assert_eq!(decrypt(&second, &key).expect("Second should open.").expose(), "same");
	}

	#[test]
	fn tampering_is_detected() {
		let key = key(4);
		let sealed = encrypt("refresh", &key).expect("Encryption should succeed.");

		for index in 0..sealed.as_bytes().len() {
			let mut bytes = sealed.as_bytes().to_vec();

			bytes[index] ^= 0x01;

			let err = decrypt(&EncryptedCredential::from_bytes(bytes), &key)
				.expect_err("Any flipped byte must fail authentication.");

			assert!(matches!(err, Error::DecryptionFailure));
		}
	}

	#[test]
	fn short_input_is_invalid_ciphertext() {
		let truncated = EncryptedCredential::from_bytes(vec![0_u8; IV_LEN + TAG_LEN - 1]);
		let err = decrypt(&truncated, &key(5)).expect_err("Truncated input must be rejected.");

		assert!(matches!(err, Error::InvalidCiphertext));
		assert!(matches!(
			EncryptedCredential::from_storage_string("not base64!"),
			Err(Error::InvalidCiphertext)
		));
	}

	#[test]
	fn storage_string_round_trips_through_serde() {
		let sealed = encrypt("refresh", &key(6)).expect("Encryption should succeed.");
		let json = serde_json::to_string(&sealed).expect("Sealed credential should serialize.");

		assert_eq!(json, format!("\"{}\"", sealed.to_storage_string()));

		let restored: EncryptedCredential =
			serde_json::from_str(&json).expect("Sealed credential should deserialize.");

		assert_eq!(restored, sealed);
	}

	#[test]
	fn key_parsing_accepts_hex_or_long_raw_secrets() {
		let hex_key = "00".repeat(KEY_LEN);
		let parsed = EncryptionKey::parse(&hex_key).expect("64 hex characters should parse.");

		assert_eq!(parsed, EncryptionKey::from_bytes([0; KEY_LEN]));

		let raw = "r".repeat(40);
		let parsed = EncryptionKey::parse(&raw).expect("Long raw secrets should be truncated.");

		assert_eq!(parsed, EncryptionKey::from_bytes([b'r'; KEY_LEN]));
		assert_eq!(
			EncryptionKey::parse(""),
			Err(ConfigError::MissingSecret { name: EncryptionKey::DEFAULT_NAME })
		);
		assert_eq!(
			EncryptionKey::parse("short"),
			Err(ConfigError::SecretTooShort { name: EncryptionKey::DEFAULT_NAME, min: KEY_LEN })
		);
	}

	#[test]
	fn key_debug_is_redacted() {
		assert_eq!(format!("{:?}", key(9)), "EncryptionKey(<redacted>)");
	}
}
