//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the fetch lifecycle:
//! - Attempts (every Pending entry, retries included)
//! - Retries, successes, final failures
//! - Gate blocks, timeouts and panicked chains
//! - Attempt chain duration
//!
//! Recording is cheap and always on; without an installed recorder the
//! `metrics` macros are no-ops.
//!
//! # Example
//!
//! ```rust,no_run
//! use composable_fetch_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Scrape http://0.0.0.0:9090/metrics, or render in-process:
//! if let Some(rendered) = server.render() {
//!     println!("{rendered}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics exporter.
///
/// Installs a global recorder and serves the fetch metrics in Prometheus
/// text format over HTTP on `addr`. The listener stops when the server is
/// dropped.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
    listener: Option<JoinHandle<()>>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address the scrape endpoint listens on (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            handle: None,
            listener: None,
        }
    }

    /// Describe the fetch metrics, install the Prometheus recorder and
    /// start the HTTP scrape listener.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built (e.g. the address is
    /// unavailable) or the recorder cannot be installed.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this
    /// logs a warning and succeeds without a handle or listener.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if let Err(e) = metrics::set_global_recorder(recorder) {
            let err_msg = e.to_string();
            if err_msg.contains("already initialized") {
                tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                return Ok(());
            }
            return Err(MetricsError::Install(err_msg));
        }

        let addr = self.addr;
        self.listener = Some(tokio::spawn(async move {
            if let Err(e) = exporter.await {
                tracing::error!(%addr, error = ?e, "Metrics listener stopped");
            }
        }));
        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics server listening");
        Ok(())
    }

    /// Address the scrape endpoint listens on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }

    /// Check if this server owns a running scrape listener
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|listener| !listener.is_finished())
    }
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "fetch_attempts_total",
        "Total number of Pending entries, retries included"
    );
    describe_counter!(
        "fetch_retries_total",
        "Total number of automatic retries"
    );
    describe_counter!(
        "fetch_successes_total",
        "Total number of attempt chains that succeeded"
    );
    describe_counter!(
        "fetch_failures_total",
        "Total number of attempt chains that failed after exhausting retries"
    );
    describe_counter!(
        "fetch_blocked_total",
        "Total number of fetch calls rejected by the request gate"
    );
    describe_counter!(
        "fetch_timeouts_total",
        "Total number of fetch calls rejected by their deadline"
    );
    describe_counter!(
        "fetch_panics_total",
        "Total number of attempt chains aborted by a panic"
    );
    describe_histogram!(
        "fetch_chain_duration_seconds",
        "Duration of an attempt chain from first Pending to settlement"
    );
}

/// Fetch lifecycle metrics recorder.
pub struct FetchMetrics;

impl FetchMetrics {
    /// Record a Pending entry.
    pub fn record_attempt() {
        counter!("fetch_attempts_total").increment(1);
    }

    /// Record an automatic retry.
    pub fn record_retry() {
        counter!("fetch_retries_total").increment(1);
    }

    /// Record a successful chain.
    pub fn record_success(duration: Duration) {
        counter!("fetch_successes_total").increment(1);
        histogram!("fetch_chain_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed chain.
    pub fn record_failure(duration: Duration) {
        counter!("fetch_failures_total").increment(1);
        histogram!("fetch_chain_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a gate rejection.
    pub fn record_blocked() {
        counter!("fetch_blocked_total").increment(1);
    }

    /// Record a deadline rejection.
    pub fn record_timeout() {
        counter!("fetch_timeouts_total").increment(1);
    }

    /// Record a chain aborted by a panic.
    pub fn record_panic() {
        counter!("fetch_panics_total").increment(1);
    }
}
