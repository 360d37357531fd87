//! Prometheus metrics
//!
//! All collectors register with the default registry on first use;
//! [`gather_metrics`] renders them in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Finished executions, labelled by outcome kind (text, image, error)
    pub static ref EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "kernelbox_executions_total",
        "Executions that reached a terminal outcome",
        &["kind"]
    )
    .expect("metric can be created");

    /// Wall time from submission to outcome, retries included
    pub static ref EXECUTION_DURATION: Histogram = register_histogram!(
        "kernelbox_execution_duration_seconds",
        "Time from submitting code to receiving its outcome",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]
    )
    .expect("metric can be created");

    /// Kernel restarts triggered by a lost connection
    pub static ref KERNEL_RESTARTS: IntCounter = register_int_counter!(
        "kernelbox_kernel_restarts_total",
        "Kernels relaunched after the connection closed mid-request"
    )
    .expect("metric can be created");

    /// Sandboxes currently running in this process
    pub static ref ACTIVE_SANDBOXES: IntGauge = register_int_gauge!(
        "kernelbox_active_sandboxes",
        "Sandboxes started or restored and not yet stopped"
    )
    .expect("metric can be created");

    /// Container start time, including gateway readiness
    pub static ref SANDBOX_START_DURATION: Histogram = register_histogram!(
        "kernelbox_sandbox_start_duration_seconds",
        "Time from container start to a connected kernel",
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .expect("metric can be created");

    /// Message bytes entering the compressor
    pub static ref DEFLATE_BYTES_IN: IntCounter = register_int_counter!(
        "kernelbox_deflate_bytes_in_total",
        "Uncompressed bytes handed to permessage-deflate"
    )
    .expect("metric can be created");

    /// Bytes leaving the compressor
    pub static ref DEFLATE_BYTES_OUT: IntCounter = register_int_counter!(
        "kernelbox_deflate_bytes_out_total",
        "Compressed bytes produced by permessage-deflate"
    )
    .expect("metric can be created");

    /// Bytes produced by the decompressor
    pub static ref INFLATE_BYTES_OUT: IntCounter = register_int_counter!(
        "kernelbox_inflate_bytes_out_total",
        "Decompressed bytes produced by permessage-deflate"
    )
    .expect("metric can be created");
}

/// Render every registered metric in the Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
