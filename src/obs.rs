//! Optional observability for the token lifecycle and the intermediary.
//!
//! # Feature Flags
//!
//! - `tracing` opens a `timeslip_auth.flow` span per operation with `flow`, `provider`, and
//!   `stage` fields, and fills its `outcome` field once the operation settles.
//! - `metrics` increments `timeslip_auth_flow_total{flow, provider, outcome}` for every attempt
//!   and settlement, and `timeslip_auth_refresh_total{provider, event}` for refresh flights.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::{_prelude::*, auth::ProviderId};

/// Operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Interactive authorization-code acquisition.
	Authorize,
	/// Authorization code to token exchange through the intermediary.
	CodeExchange,
	/// Refresh token exchange through the intermediary.
	Refresh,
	/// Authenticated API request.
	ApiRequest,
	/// Intermediary relaying an exchange to the provider.
	Relay,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Authorize => "authorize",
			FlowKind::CodeExchange => "code_exchange",
			FlowKind::Refresh => "refresh",
			FlowKind::ApiRequest => "api_request",
			FlowKind::Relay => "relay",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// How an observed operation settled.
///
/// Failures are split along the affordance the desktop shell offers for them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failed in a way the user can retry as is.
	Retryable,
	/// Failed because the session is gone; the user must reconnect.
	Reconnect,
	/// Any other failure (configuration, storage, denied consent).
	Failure,
}
impl FlowOutcome {
	/// Classifies an error returned by a client-side operation.
	pub fn for_error(error: &Error) -> Self {
		if error.requires_reconnect() {
			Self::Reconnect
		} else if error.is_retryable() {
			Self::Retryable
		} else {
			Self::Failure
		}
	}

	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Retryable => "retryable",
			FlowOutcome::Reconnect => "reconnect",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Labels of one observed operation against one provider.
#[derive(Clone, Copy, Debug)]
pub struct Flow<'a> {
	/// Operation kind.
	pub kind: FlowKind,
	/// Provider the operation talks to.
	pub provider: &'a ProviderId,
	/// Call site within the operation.
	pub stage: &'static str,
}
impl<'a> Flow<'a> {
	/// Labels `kind` at `stage` for `provider`.
	pub fn new(kind: FlowKind, provider: &'a ProviderId, stage: &'static str) -> Self {
		Self { kind, provider, stage }
	}

	/// Runs `fut` inside the flow span, counting the attempt and its classified outcome.
	pub(crate) async fn observe<T, F>(self, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		record_flow_outcome(&self, FlowOutcome::Attempt);

		let span = FlowSpan::new(&self);
		let result = span.instrument(fut).await;
		let outcome = match &result {
			Ok(_) => FlowOutcome::Success,
			Err(e) => {
				#[cfg(feature = "tracing")]
				::tracing::warn!(
					flow = self.kind.as_str(),
					provider = self.provider.as_ref(),
					stage = self.stage,
					error = %e,
					"Flow failed."
				);

				FlowOutcome::for_error(e)
			},
		};

		span.record_outcome(outcome);
		record_flow_outcome(&self, outcome);

		result
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn errors_are_classified_by_affordance() {
		assert_eq!(FlowOutcome::for_error(&Error::NotAuthenticated), FlowOutcome::Reconnect);
		assert_eq!(
			FlowOutcome::for_error(&Error::RefreshExchangeFailed {
				status: Some(502),
				detail: "bad gateway".into(),
			}),
			FlowOutcome::Retryable
		);
		assert_eq!(
			FlowOutcome::for_error(&Error::AuthorizationDenied { reason: "access_denied".into() }),
			FlowOutcome::Failure
		);
	}

	#[tokio::test]
	async fn observe_passes_results_through() {
		let provider = ProviderId::new("freeagent").expect("Provider fixture should be valid.");
		let flow = Flow::new(FlowKind::Refresh, &provider, "test");
		let ok = flow.observe(async { Ok::<_, Error>(7) }).await;

		assert_eq!(ok.expect("Successful flow should pass through."), 7);

		let err = flow
			.observe(async { Err::<(), _>(Error::NotAuthenticated) })
			.await
			.expect_err("Failing flow should pass through.");

		assert!(matches!(err, Error::NotAuthenticated));
	}
}
