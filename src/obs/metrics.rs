// self
use crate::{
	auth::ProviderId,
	obs::{Flow, FlowOutcome},
};

/// Steps of a single-flight refresh, counted per provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefreshEvent {
	/// A refresh exchange was sent to the intermediary.
	Attempt,
	/// The exchange produced a new persisted record.
	Success,
	/// The exchange or its persistence failed.
	Failure,
	/// A waiting caller took the record another flight had just installed.
	Reuse,
}
impl RefreshEvent {
	/// Returns a stable label suitable for metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RefreshEvent::Attempt => "attempt",
			RefreshEvent::Success => "success",
			RefreshEvent::Failure => "failure",
			RefreshEvent::Reuse => "reuse",
		}
	}
}

/// Counts one `flow` settlement in `timeslip_auth_flow_total`.
pub fn record_flow_outcome(flow: &Flow<'_>, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"timeslip_auth_flow_total",
			"flow" => flow.kind.as_str(),
			"provider" => flow.provider.as_ref().to_owned(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (flow, outcome);
	}
}

/// Counts one refresh step in `timeslip_auth_refresh_total`.
pub fn record_refresh_event(provider: &ProviderId, event: RefreshEvent) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"timeslip_auth_refresh_total",
			"provider" => provider.as_ref().to_owned(),
			"event" => event.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (provider, event);
	}
}
