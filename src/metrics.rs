//! Pipeline counters.
//!
//! Recording is always on; the values only leave the process when a
//! Prometheus listener is configured through `metrics.listen` or
//! `DROPWATCH_METRICS_ADDR`.

use ::metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

pub const ADMISSIONS_TOTAL: &str = "dropwatch_admissions_total";
pub const DISPATCH_TOTAL: &str = "dropwatch_dispatch_total";
pub const HANDLERS_LOADED: &str = "dropwatch_handlers_loaded";
pub const HANDLER_LOAD_ERRORS: &str = "dropwatch_handler_load_errors_total";
pub const RETRY_QUEUE_DEPTH: &str = "dropwatch_retry_queue_depth";

/// Install the Prometheus exporter. Must run inside the tokio runtime.
pub fn init_metrics(listen: Option<&str>) {
    let Some(addr_str) = listen else {
        return;
    };

    let addr = match addr_str.parse::<SocketAddr>() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(addr = %addr_str, error = %e, "invalid metrics address, exporter disabled");
            return;
        }
    };

    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
        Err(e) => warn!(error = %e, "failed to install Prometheus exporter"),
    }
}

pub fn record_admission(result: &'static str) {
    counter!(ADMISSIONS_TOTAL, "result" => result).increment(1);
}

pub fn record_dispatch(outcome: &'static str, handler: Option<&str>) {
    let handler = handler.unwrap_or("none").to_string();
    counter!(DISPATCH_TOTAL, "outcome" => outcome, "handler" => handler).increment(1);
}

pub fn record_registry(loaded: usize, errors: usize) {
    gauge!(HANDLERS_LOADED).set(loaded as f64);
    counter!(HANDLER_LOAD_ERRORS).increment(errors as u64);
}

pub fn record_retry_queue(depth: usize) {
    gauge!(RETRY_QUEUE_DEPTH).set(depth as f64);
}
