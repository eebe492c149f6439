//! Two-phase account-link protocol spanning an external provider redirect.
//!
//! [`LinkFlow::initiate`] signs a time-boxed continuation token that travels through the
//! provider as the OAuth `state` parameter. [`LinkFlow::complete`] verifies that token, checks
//! the resuming caller against the bound actor, and only then exchanges the authorization code.
//! No flow state is kept in server memory between the two phases.

pub mod link;

mod credential;

pub use link::*;

// self
use crate::{
	_prelude::*,
	auth::{Secret, SubjectId},
	config::TrustConfig,
	state::{DEFAULT_STATE_TTL, FlowType, SigningSecret},
	store::CredentialStore,
	vault::CredentialVault,
};

/// Boxed future returned by [`CodeExchanger`].
pub type ExchangeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Grant returned by the provider for an authorization code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangedGrant {
	/// Long-lived credential, when the provider issued one.
	pub refresh_token: Option<Secret>,
	/// Provider-side account identifier (a channel id or identity subject).
	pub external_account_id: Option<String>,
}

/// Black-box authorization-code exchange against the external provider.
pub trait CodeExchanger
where
	Self: Send + Sync,
{
	/// Exchanges `code` for a grant. `redirect_origin` is the origin bound into the state, if
	/// any, so the exchanger can rebuild the exact redirect URI the provider saw.
	fn exchange<'a>(
		&'a self,
		flow: FlowType,
		code: &'a str,
		redirect_origin: Option<&'a str>,
	) -> ExchangeFuture<'a, ExchangedGrant>;
}

/// Coordinates link flows for every household served by the process.
///
/// Completions for the same subject are serialized, so two racing callbacks cannot interleave
/// their credential writes.
#[derive(Clone)]
pub struct LinkFlow {
	signing: SigningSecret,
	vault: CredentialVault,
	store: Arc<dyn CredentialStore>,
	exchanger: Arc<dyn CodeExchanger>,
	state_ttl: Duration,
	allowed_origins: Vec<String>,
	subject_guards: Arc<Mutex<HashMap<SubjectId, Arc<AsyncMutex<()>>>>>,
}
impl LinkFlow {
	/// Creates a flow from explicit parts with the default state lifetime and no origin
	/// allowlist.
	pub fn new(
		signing: SigningSecret,
		vault: CredentialVault,
		store: Arc<dyn CredentialStore>,
		exchanger: Arc<dyn CodeExchanger>,
	) -> Self {
		Self {
			signing,
			vault,
			store,
			exchanger,
			state_ttl: DEFAULT_STATE_TTL,
			allowed_origins: Vec::new(),
			subject_guards: Default::default(),
		}
	}

	/// Creates a flow from the process configuration.
	pub fn from_config(
		config: &TrustConfig,
		store: Arc<dyn CredentialStore>,
		exchanger: Arc<dyn CodeExchanger>,
	) -> Self {
		Self::new(
			config.signing_secret.clone(),
			CredentialVault::new(config.encryption_key.clone()),
			store,
			exchanger,
		)
		.with_state_ttl(config.state_ttl)
		.with_allowed_origins(config.allowed_origins.clone())
	}

	/// Overrides the continuation-token lifetime.
	pub fn with_state_ttl(mut self, ttl: Duration) -> Self {
		self.state_ttl = ttl;

		self
	}

	/// Replaces the redirect-origin allowlist.
	pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
		self.allowed_origins = origins;

		self
	}

	/// Continuation-token lifetime.
	pub fn state_ttl(&self) -> Duration {
		self.state_ttl
	}

	fn subject_guard(&self, subject: &SubjectId) -> Arc<AsyncMutex<()>> {
		let mut guards = self.subject_guards.lock();

		guards.entry(subject.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}
}
impl Debug for LinkFlow {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LinkFlow")
			.field("state_ttl", &self.state_ttl)
			.field("allowed_origins", &self.allowed_origins)
			.finish()
	}
}
