// self
use crate::{
	obs::{OpKind, OpOutcome},
	rate_limit::PolicyClass,
};

/// Counts attempts, successes, and failures per operation.
pub fn record_op_outcome(kind: OpKind, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	metrics::counter!(
		"household_trust_op_total",
		"op" => kind.as_str(),
		"outcome" => outcome.as_str()
	)
	.increment(1);
	#[cfg(not(feature = "metrics"))]
	let _ = (kind, outcome);
}

/// Counts a denied request, labeled by the policy class that denied it.
pub fn record_throttled(class: PolicyClass) {
	#[cfg(feature = "metrics")]
	metrics::counter!("household_trust_throttled_total", "policy" => class.as_str()).increment(1);
	#[cfg(not(feature = "metrics"))]
	let _ = class;
}

/// Counts a linked credential deleted because it no longer authenticates.
pub fn record_credential_revoked() {
	#[cfg(feature = "metrics")]
	metrics::counter!("household_trust_credential_revoked_total").increment(1);
}
