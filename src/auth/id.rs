//! Validated identifiers for the household (subject) and the acting member (actor).
//!
//! Both kinds share one representation and one rule set. The kind marker keeps a household id
//! from being passed where a member id is expected, which matters wherever a flow binds the two
//! together (continuation state, sessions, credential records).

// std
use std::{
	borrow::Borrow,
	cmp::Ordering,
	hash::{Hash, Hasher},
	marker::PhantomData,
	ops::Deref,
};
// crates.io
use serde::{Deserializer, Serializer, de::Error as _};
// self
use crate::_prelude::*;

const IDENTIFIER_MAX_LEN: usize = 128;

/// Household a flow, credential, or session belongs to.
pub type SubjectId = Identifier<Subject>;
/// Household member acting on behalf of a subject.
pub type ActorId = Identifier<Actor>;

/// Kind marker for an [`Identifier`].
pub trait IdentifierKind {
	/// Label used in errors and debug output.
	const LABEL: &'static str;
}

/// Marker for household identifiers.
#[derive(Debug)]
pub enum Subject {}
impl IdentifierKind for Subject {
	const LABEL: &'static str = "Subject";
}

/// Marker for member identifiers.
#[derive(Debug)]
pub enum Actor {}
impl IdentifierKind for Actor {
	const LABEL: &'static str = "Actor";
}

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier.
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier.
		kind: &'static str,
	},
	/// The identifier exceeded the allowed byte length.
	#[error("{kind} identifier exceeds {max} bytes.")]
	TooLong {
		/// Kind of identifier.
		kind: &'static str,
		/// Maximum permitted length.
		max: usize,
	},
}

/// Non-empty, whitespace-free identifier of at most 128 bytes, tagged with its kind.
pub struct Identifier<K> {
	value: String,
	kind: PhantomData<fn() -> K>,
}
impl<K> Identifier<K>
where
	K: IdentifierKind,
{
	/// Validates and wraps `value`.
	pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
		Self::try_from(value.as_ref().to_owned())
	}
}
impl<K> Identifier<K> {
	/// Returns the identifier as a string slice.
	pub fn as_str(&self) -> &str {
		&self.value
	}
}
impl<K> TryFrom<String> for Identifier<K>
where
	K: IdentifierKind,
{
	type Error = IdentifierError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		let kind = K::LABEL;

		if value.is_empty() {
			return Err(IdentifierError::Empty { kind });
		}
		if value.chars().any(char::is_whitespace) {
			return Err(IdentifierError::ContainsWhitespace { kind });
		}
		if value.len() > IDENTIFIER_MAX_LEN {
			return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
		}

		Ok(Self { value, kind: PhantomData })
	}
}
impl<K> FromStr for Identifier<K>
where
	K: IdentifierKind,
{
	type Err = IdentifierError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}
impl<K> From<Identifier<K>> for String {
	fn from(id: Identifier<K>) -> Self {
		id.value
	}
}
impl<K> Clone for Identifier<K> {
	fn clone(&self) -> Self {
		Self { value: self.value.clone(), kind: PhantomData }
	}
}
impl<K> PartialEq for Identifier<K> {
	fn eq(&self, other: &Self) -> bool {
		self.value == other.value
	}
}
impl<K> Eq for Identifier<K> {}
impl<K> PartialOrd for Identifier<K> {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl<K> Ord for Identifier<K> {
	fn cmp(&self, other: &Self) -> Ordering {
		self.value.cmp(&other.value)
	}
}
// Must hash like `str` for `Borrow<str>` lookups.
impl<K> Hash for Identifier<K> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.value.hash(state);
	}
}
impl<K> Deref for Identifier<K> {
	type Target = str;

	fn deref(&self) -> &Self::Target {
		&self.value
	}
}
impl<K> AsRef<str> for Identifier<K> {
	fn as_ref(&self) -> &str {
		&self.value
	}
}
impl<K> Borrow<str> for Identifier<K> {
	fn borrow(&self) -> &str {
		&self.value
	}
}
impl<K> Debug for Identifier<K>
where
	K: IdentifierKind,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}({})", K::LABEL, self.value)
	}
}
impl<K> Display for Identifier<K> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.value)
	}
}
impl<K> Serialize for Identifier<K> {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.value)
	}
}
impl<'de, K> Deserialize<'de> for Identifier<K>
where
	K: IdentifierKind,
{
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = String::deserialize(deserializer)?;

		Self::try_from(value).map_err(D::Error::custom)
	}
}
