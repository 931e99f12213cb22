// self
use crate::{
	_prelude::*,
	obs::{Flow, FlowOutcome},
};

/// Future type returned by [`FlowSpan::instrument`]; a passthrough when tracing is disabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Future type returned by [`FlowSpan::instrument`]; a passthrough when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// `timeslip_auth.flow` span for one authorize, exchange, refresh, request, or relay.
///
/// The `outcome` field starts empty and is filled by [`FlowSpan::record_outcome`], so a
/// subscriber sees the settlement on the span close event.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Opens the span for `flow`.
	pub fn new(flow: &Flow<'_>) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"timeslip_auth.flow",
				flow = flow.kind.as_str(),
				provider = flow.provider.as_ref(),
				stage = flow.stage,
				outcome = tracing::field::Empty,
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = flow;

			Self {}
		}
	}

	/// Fills the span's `outcome` field.
	pub fn record_outcome(&self, outcome: FlowOutcome) {
		#[cfg(feature = "tracing")]
		{
			self.span.record("outcome", outcome.as_str());
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = outcome;
		}
	}

	/// Instruments a future without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{auth::ProviderId, obs::FlowKind};

	#[tokio::test]
	async fn relay_span_wraps_future_and_takes_outcome() {
		let provider = ProviderId::new("freeagent").expect("Provider fixture should be valid.");
		let span = FlowSpan::new(&Flow::new(FlowKind::Relay, &provider, "relay_refresh"));
		let value = span.instrument(async { 42 }).await;

		span.record_outcome(FlowOutcome::Success);

		assert_eq!(value, 42);
	}
}
