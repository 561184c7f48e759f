//! Metrics definitions for the chain follower.
//!
//! This module defines all metrics used throughout the library.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "metadata_decode_warnings_total",
        "Total number of tolerated failures while decoding runtime metadata"
    );
    describe_counter!(
        "metadata_decodes_total",
        "Total number of runtime metadata decode attempts"
    );
    describe_histogram!(
        "metadata_decode_duration_seconds",
        "Time taken to decode one metadata blob in seconds"
    );
    describe_counter!(
        "rpc_reconnects_total",
        "Total number of WebSocket reconnect attempts"
    );
    describe_counter!(
        "heads_received_total",
        "Total number of chain head notifications received"
    );
    describe_counter!(
        "block_fetch_retries_total",
        "Total number of chain_getBlock retries while a block was importing"
    );
    describe_counter!(
        "extrinsics_identified_total",
        "Total number of extrinsics identified, labelled by resolution"
    );
}

/// Record one metadata decode attempt.
///
/// # Arguments
/// * `outcome` - "ok" or "unparseable"
pub fn record_metadata_decode(outcome: &'static str) {
    counter!("metadata_decodes_total", "outcome" => outcome).increment(1);
}

/// Record tolerated metadata decode failures.
pub fn record_decode_warnings(count: u64) {
    counter!("metadata_decode_warnings_total").increment(count);
}

/// Record a WebSocket reconnect attempt.
pub fn record_reconnect() {
    counter!("rpc_reconnects_total").increment(1);
}

/// Record a received chain head notification.
pub fn record_head_received() {
    counter!("heads_received_total").increment(1);
}

/// Record a block fetch retry while the node was still importing.
pub fn record_block_fetch_retry() {
    counter!("block_fetch_retries_total").increment(1);
}

/// Record one identified extrinsic.
///
/// # Arguments
/// * `resolution` - "resolved" or the reason label of a degraded result
pub fn record_extrinsic_identified(resolution: &'static str) {
    counter!("extrinsics_identified_total", "resolution" => resolution).increment(1);
}

/// A timer that records the metadata decode duration when dropped.
pub struct DecodeTimer {
    start: Instant,
}

impl DecodeTimer {
    /// Start a new decode timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for DecodeTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DecodeTimer {
    fn drop(&mut self) {
        histogram!("metadata_decode_duration_seconds").record(self.start.elapsed().as_secs_f64());
    }
}
