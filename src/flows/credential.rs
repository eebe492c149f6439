//! Use and removal of linked credentials.
//!
//! A stored credential that no longer authenticates is dead: the link is deleted and the
//! household has to authorize again. Decryption is never retried.

// self
use crate::{
	_prelude::*,
	auth::{Secret, SubjectId},
	flows::LinkFlow,
	obs::{self, OpKind, OpOutcome, OpSpan},
	vault::EncryptedCredential,
};

impl LinkFlow {
	/// Opens the subject's refresh token for an outbound provider call.
	///
	/// Returns `Ok(None)` when nothing is linked. A credential that fails authentication or is
	/// structurally invalid is deleted and reported as [`Error::CredentialRevoked`]. The read and
	/// the delete run under the subject guard, and only the credential that failed is deleted.
	pub async fn open_credential(&self, subject: &SubjectId) -> Result<Option<Secret>> {
		const KIND: OpKind = OpKind::CredentialOpen;

		let span = OpSpan::new(KIND, "open_credential");

		span.record_subject(subject);

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let guard = self.subject_guard(subject);
				let _singleflight = guard.lock().await;
				let Some(record) = self.store.find(subject).await? else {
					return Ok(None);
				};

				match self.vault.decrypt(&record.credential) {
					Ok(secret) => Ok(Some(secret)),
					Err(e) if e.is_dead_credential() => {
						obs::warn(KIND, &format!("Stored credential for {subject} is dead: {e}"));

						self.discard_if_unchanged(subject, &record.credential).await
					},
					Err(e) => Err(e),
				}
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}

	/// Removes the subject's link. Returns whether a credential existed.
	pub async fn unlink(&self, subject: &SubjectId) -> Result<bool> {
		self.forget(subject).await
	}

	/// Marks a credential dead after the provider rejected it (for example `invalid_grant`).
	pub async fn revoke_credential(&self, subject: &SubjectId) -> Result<bool> {
		obs::warn(OpKind::CredentialOpen, &format!("Provider rejected credential for {subject}."));

		let removed = self.forget(subject).await?;

		if removed {
			obs::record_credential_revoked();
		}

		Ok(removed)
	}

	// Caller holds the subject guard.
	async fn discard_if_unchanged(
		&self,
		subject: &SubjectId,
		dead: &EncryptedCredential,
	) -> Result<Option<Secret>> {
		match self.store.find(subject).await? {
			Some(current) if current.credential != *dead =>
				self.vault.decrypt(&current.credential).map(Some),
			Some(_) => {
				self.store.delete(subject).await?;
				obs::record_credential_revoked();

				Err(Error::CredentialRevoked)
			},
			None => Err(Error::CredentialRevoked),
		}
	}

	async fn forget(&self, subject: &SubjectId) -> Result<bool> {
		let guard = self.subject_guard(subject);
		let _singleflight = guard.lock().await;

		Ok(self.store.delete(subject).await?)
	}
}
