//! Initiation and completion of redirect-spanning link flows.

// self
use crate::{
	_prelude::*,
	auth::{ActorId, SubjectId},
	config::{self, STATE_TTL_VAR},
	flows::LinkFlow,
	obs::{self, OpKind, OpOutcome, OpSpan},
	state::{self, FlowType, SignedStatePayload},
	vault::CredentialRecord,
};

/// Result of [`LinkFlow::initiate`]: the value to pass as the provider's `state` parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkInitiation {
	/// Signed continuation token.
	pub state: String,
	/// Instant after which the token is rejected.
	pub expires_at: OffsetDateTime,
	/// Normalized origin bound into the token, if one was requested.
	pub redirect_origin: Option<String>,
}

/// Result of a successful [`LinkFlow::complete`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkCompletion {
	/// Flow that was completed.
	pub flow: FlowType,
	/// Household the link belongs to.
	pub subject: SubjectId,
	/// Member who started and resumed the flow.
	pub actor: ActorId,
	/// Provider-side account identifier.
	pub external_account_id: Option<String>,
	/// Origin the caller should return the browser to.
	pub redirect_origin: Option<String>,
	/// Whether a sealed credential was written for the subject.
	pub credential_stored: bool,
}

impl LinkFlow {
	/// Starts a link flow at the current instant.
	pub fn initiate(
		&self,
		flow: FlowType,
		subject: SubjectId,
		actor: ActorId,
		redirect_origin: Option<&str>,
	) -> Result<LinkInitiation> {
		self.initiate_at(flow, subject, actor, redirect_origin, OffsetDateTime::now_utc())
	}

	/// Starts a link flow as of `now`.
	///
	/// `redirect_origin` is normalized to `scheme://host[:port]` and must be on the allowlist
	/// when one is configured.
	pub fn initiate_at(
		&self,
		flow: FlowType,
		subject: SubjectId,
		actor: ActorId,
		redirect_origin: Option<&str>,
		now: OffsetDateTime,
	) -> Result<LinkInitiation> {
		const KIND: OpKind = OpKind::LinkInitiate;

		let span = OpSpan::new(KIND, "initiate");

		span.record_subject(&subject);

		let _entered = span.entered();

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = self.sign_initiation(flow, subject, actor, redirect_origin, now);

		obs::record_result(KIND, &result);

		result
	}

	/// Completes a link flow at the current instant.
	pub async fn complete(
		&self,
		state_token: &str,
		code: &str,
		resuming_actor: &ActorId,
		expected: FlowType,
	) -> Result<LinkCompletion> {
		self.complete_at(state_token, code, resuming_actor, expected, OffsetDateTime::now_utc())
			.await
	}

	/// Completes a link flow as of `now`.
	///
	/// The state token is verified and bound to `resuming_actor` before the code is exchanged.
	/// A provider link must yield a refresh token, which is sealed and written wholesale over
	/// any previous credential for the subject.
	pub async fn complete_at(
		&self,
		state_token: &str,
		code: &str,
		resuming_actor: &ActorId,
		expected: FlowType,
		now: OffsetDateTime,
	) -> Result<LinkCompletion> {
		const KIND: OpKind = OpKind::LinkComplete;

		let span = OpSpan::new(KIND, "complete");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async {
				let payload = state::verify_for(state_token, &self.signing, expected, now)?;

				span.record_subject(&payload.subject_id);

				if payload.actor_id != *resuming_actor {
					return Err(Error::ActorMismatch);
				}

				let guard = self.subject_guard(&payload.subject_id);
				let _singleflight = guard.lock().await;
				let grant = self
					.exchanger
					.exchange(payload.kind, code, payload.redirect_origin.as_deref())
					.await?;
				let credential_stored = match payload.kind {
					FlowType::ProviderLink => {
						let refresh_token =
							grant.refresh_token.as_ref().ok_or_else(|| Error::Exchange {
								reason: "provider returned no refresh token".into(),
							})?;
						let record = CredentialRecord {
							subject: payload.subject_id.clone(),
							credential: self.vault.encrypt(refresh_token)?,
							external_account_id: grant.external_account_id.clone(),
							linked_by: Some(payload.actor_id.clone()),
							linked_at: now,
						};

						self.store.upsert(record).await?;

						true
					},
					FlowType::ChildLink => {
						if grant.external_account_id.is_none() {
							return Err(Error::Exchange {
								reason: "provider returned no account identifier".into(),
							});
						}

						false
					},
				};

				Ok(LinkCompletion {
					flow: payload.kind,
					subject: payload.subject_id,
					actor: payload.actor_id,
					external_account_id: grant.external_account_id,
					redirect_origin: payload.redirect_origin,
					credential_stored,
				})
			})
			.await;

		if let Err(e) = &result {
			obs::warn(KIND, &format!("Link completion rejected: {e}"));
		}

		obs::record_result(KIND, &result);

		result
	}

	fn sign_initiation(
		&self,
		flow: FlowType,
		subject: SubjectId,
		actor: ActorId,
		redirect_origin: Option<&str>,
		now: OffsetDateTime,
	) -> Result<LinkInitiation> {
		let redirect_origin = redirect_origin
			.map(|raw| state::normalize_redirect_origin(raw, &self.allowed_origins))
			.transpose()?;
		let expires_at = config::expiry_after(STATE_TTL_VAR, now, self.state_ttl)?;
		let mut payload = SignedStatePayload::new(flow, subject, actor, expires_at);

		if let Some(origin) = &redirect_origin {
			payload = payload.with_redirect_origin(origin.clone());
		}

		let state = state::sign(&payload, &self.signing)?;

		Ok(LinkInitiation { state, expires_at, redirect_origin })
	}
}
