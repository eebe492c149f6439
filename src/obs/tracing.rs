// self
use crate::{_prelude::*, auth::SubjectId, obs::OpKind, rate_limit::PolicyClass};

/// Span around one trust operation.
///
/// The `subject` and `policy` fields start empty and are filled in once the operation knows
/// them; a link completion only learns its subject after the state token verifies.
#[derive(Clone, Debug)]
pub struct OpSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OpSpan {
	/// Opens a span tagged with the operation kind and call-site stage.
	pub fn new(kind: OpKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"household_trust.op",
				op = kind.as_str(),
				stage,
				subject = tracing::field::Empty,
				policy = tracing::field::Empty,
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Tags the span with the household the operation acts on.
	pub fn record_subject(&self, subject: &SubjectId) {
		#[cfg(feature = "tracing")]
		self.span.record("subject", subject.as_str());
		#[cfg(not(feature = "tracing"))]
		let _ = subject;
	}

	/// Tags the span with the rate-limit class being consulted.
	pub fn record_policy(&self, class: PolicyClass) {
		#[cfg(feature = "tracing")]
		self.span.record("policy", class.as_str());
		#[cfg(not(feature = "tracing"))]
		let _ = class;
	}

	/// Enters the span for a synchronous section.
	pub fn entered(self) -> OpSpanGuard {
		#[cfg(feature = "tracing")]
		{
			OpSpanGuard { _guard: self.span.entered() }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = self;

			OpSpanGuard {}
		}
	}

	/// Runs `fut` inside the span without holding an entered guard across `.await`.
	pub fn instrument<F>(&self, fut: F) -> impl Future<Output = F::Output>
	where
		F: Future,
	{
		#[cfg(feature = "tracing")]
		{
			tracing::Instrument::instrument(fut, self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Guard returned by [`OpSpan::entered`].
pub struct OpSpanGuard {
	#[cfg(feature = "tracing")]
	_guard: tracing::span::EnteredSpan,
}
impl Debug for OpSpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("OpSpanGuard(..)")
	}
}

/// Logs a fail-closed or degraded path. Messages must never carry secrets or raw tokens.
pub fn warn(kind: OpKind, message: &str) {
	#[cfg(feature = "tracing")]
	tracing::warn!(op = kind.as_str(), "{message}");
	#[cfg(not(feature = "tracing"))]
	let _ = (kind, message);
}
