//! Optional observability helpers for trust operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit `household_trust.op` spans carrying `op` and `stage`, plus the
//!   `subject` or `policy` the operation acted on, and warnings for fail-closed paths.
//! - Enable `metrics` for `household_trust_op_total` (by `op` and `outcome`),
//!   `household_trust_throttled_total` (by `policy`), and
//!   `household_trust_credential_revoked_total`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Trust operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// Starting a redirect-spanning link flow.
	LinkInitiate,
	/// Completing a link flow after the provider redirect.
	LinkComplete,
	/// Decrypting a stored credential for use.
	CredentialOpen,
	/// Issuing a device session.
	SessionIssue,
	/// Validating a presented session token.
	SessionValidate,
	/// Revoking a device session.
	SessionRevoke,
	/// Consulting the rate limiter.
	RateLimit,
}
impl OpKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::LinkInitiate => "link_initiate",
			OpKind::LinkComplete => "link_complete",
			OpKind::CredentialOpen => "credential_open",
			OpKind::SessionIssue => "session_issue",
			OpKind::SessionValidate => "session_validate",
			OpKind::SessionRevoke => "session_revoke",
			OpKind::RateLimit => "rate_limit",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller (or collapsed to a negative answer).
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Records the terminal outcome of a fallible operation.
pub fn record_result<T, E>(kind: OpKind, result: &Result<T, E>) {
	match result {
		Ok(_) => record_op_outcome(kind, OpOutcome::Success),
		Err(_) => record_op_outcome(kind, OpOutcome::Failure),
	}
}
