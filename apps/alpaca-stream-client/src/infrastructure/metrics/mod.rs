//! Prometheus Metrics Module
//!
//! Exposes stream client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Batches received and bytes read from the stream
//! - **Records**: Records delivered to output queues by kind
//! - **Decode**: Rejected sub-messages, malformed batches, in-flight decode tasks
//! - **Transport**: Faults and failed sends
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP front end port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::RecordKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "alpaca_stream_frames_received_total",
        "Total batches received from the stream"
    );
    describe_counter!(
        "alpaca_stream_bytes_received_total",
        "Total batch bytes received from the stream"
    );
    describe_counter!(
        "alpaca_stream_records_delivered_total",
        "Total records delivered to output queues by kind"
    );
    describe_counter!(
        "alpaca_stream_sub_messages_rejected_total",
        "Total sub-messages dropped by the decoder by reason"
    );
    describe_counter!(
        "alpaca_stream_malformed_batches_total",
        "Total batches dropped because the outer structure was not a sequence"
    );
    describe_gauge!(
        "alpaca_stream_decode_tasks_in_flight",
        "Decode tasks currently running"
    );
    describe_counter!(
        "alpaca_stream_transport_faults_total",
        "Total transport faults while listening"
    );
    describe_counter!(
        "alpaca_stream_send_failures_total",
        "Total failed outbound sends by operation"
    );
    describe_counter!(
        "alpaca_stream_sink_failures_total",
        "Total records a sink failed to handle"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outbound operation label.
#[derive(Debug, Clone, Copy)]
pub enum SendOperation {
    /// Credential frame.
    Auth,
    /// Subscribe/unsubscribe command.
    Command,
    /// Closure frame.
    Close,
}

impl SendOperation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Command => "command",
            Self::Close => "close",
        }
    }
}

/// Record a batch received from the stream.
pub fn record_frame_received(bytes: usize) {
    counter!("alpaca_stream_frames_received_total").increment(1);
    counter!("alpaca_stream_bytes_received_total").increment(bytes as u64);
}

/// Record a record delivered to its output queue.
pub fn record_delivered(kind: RecordKind) {
    counter!(
        "alpaca_stream_records_delivered_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a sub-message dropped by the decoder.
pub fn record_sub_message_rejected(reason: &'static str) {
    counter!(
        "alpaca_stream_sub_messages_rejected_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a batch dropped as malformed.
pub fn record_malformed_batch() {
    counter!("alpaca_stream_malformed_batches_total").increment(1);
}

/// Track a decode task starting.
pub fn decode_task_started() {
    gauge!("alpaca_stream_decode_tasks_in_flight").increment(1.0);
}

/// Track a decode task finishing.
pub fn decode_task_finished() {
    gauge!("alpaca_stream_decode_tasks_in_flight").decrement(1.0);
}

/// Record a transport fault.
pub fn record_transport_fault() {
    counter!("alpaca_stream_transport_faults_total").increment(1);
}

/// Record a failed outbound send.
pub fn record_send_failure(operation: SendOperation) {
    counter!(
        "alpaca_stream_send_failures_total",
        "operation" => operation.as_str()
    )
    .increment(1);
}

/// Record a sink failure.
pub fn record_sink_failure(kind: RecordKind) {
    counter!(
        "alpaca_stream_sink_failures_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
