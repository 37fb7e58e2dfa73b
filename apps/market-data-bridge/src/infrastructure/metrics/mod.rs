//! Prometheus Metrics
//!
//! Counters for every stage of the bridge: frames in, decode outcomes,
//! forwards out, heartbeats and reconnects. Rendered at `/metrics` on the
//! health server port.
//!
//! Recording functions are no-ops until [`init_metrics`] installs a recorder,
//! so library code and tests can call them freely.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::ports::ForwardFailureKind;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe all bridge metrics.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns [`BuildError`] if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Prometheus handle, if metrics were initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

fn register_metrics() {
    describe_counter!(
        "bridge_frames_received_total",
        "Data frames received from the upstream feed"
    );
    describe_counter!(
        "bridge_frames_skipped_total",
        "Frames without a price field"
    );
    describe_counter!(
        "bridge_decode_errors_total",
        "Frames dropped because they failed to decode, by reason"
    );
    describe_counter!(
        "bridge_read_errors_total",
        "Transient read errors on the feed connection"
    );
    describe_counter!(
        "bridge_forwards_total",
        "Forward attempts to the gRPC sink, by outcome"
    );
    describe_histogram!(
        "bridge_forward_duration_seconds",
        "Latency of one SendPrice call"
    );
    describe_counter!(
        "bridge_heartbeats_total",
        "Heartbeat pings, by outcome"
    );
    describe_counter!(
        "bridge_reconnects_total",
        "Session reconnect attempts"
    );
    describe_gauge!(
        "bridge_session_connected",
        "1 while a feed session is connected"
    );
}

/// Record a data frame received.
pub fn record_frame_received() {
    counter!("bridge_frames_received_total").increment(1);
}

/// Record a frame skipped for lack of a price.
pub fn record_frame_skipped() {
    counter!("bridge_frames_skipped_total").increment(1);
}

/// Record a frame dropped by the codec.
pub fn record_decode_error(reason: &'static str) {
    counter!("bridge_decode_errors_total", "reason" => reason).increment(1);
}

/// Record a transient read error.
pub fn record_read_error() {
    counter!("bridge_read_errors_total").increment(1);
}

/// Record the outcome and latency of one forward.
pub fn record_forward(outcome: Result<(), ForwardFailureKind>, duration: Duration) {
    counter!("bridge_forwards_total", "outcome" => forward_outcome(outcome)).increment(1);
    histogram!("bridge_forward_duration_seconds").record(duration.as_secs_f64());
}

/// Record one heartbeat ping.
pub fn record_heartbeat(sent: bool) {
    let outcome = if sent { "sent" } else { "failed" };
    counter!("bridge_heartbeats_total", "outcome" => outcome).increment(1);
}

/// Record a reconnect attempt.
pub fn record_reconnect() {
    counter!("bridge_reconnects_total").increment(1);
}

/// Set the connected gauge.
pub fn set_session_connected(connected: bool) {
    gauge!("bridge_session_connected").set(if connected { 1.0 } else { 0.0 });
}

const fn forward_outcome(outcome: Result<(), ForwardFailureKind>) -> &'static str {
    match outcome {
        Ok(()) => "ok",
        Err(kind) => kind.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_outcome_labels() {
        assert_eq!(forward_outcome(Ok(())), "ok");
        assert_eq!(forward_outcome(Err(ForwardFailureKind::Unreachable)), "unreachable");
        assert_eq!(forward_outcome(Err(ForwardFailureKind::RejectedByPeer)), "rejected");
        assert_eq!(forward_outcome(Err(ForwardFailureKind::Timeout)), "timeout");
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_frame_received();
        record_decode_error("malformed_price");
        record_forward(Ok(()), Duration::from_millis(3));
        set_session_connected(true);
    }
}
