//! Metrics and tracing setup for the hrw proxy.
//!
//! Provides a global [`ProxyMetrics`] singleton backed by the `prometheus`
//! crate, plus an optional lightweight HTTP server for Prometheus scraping.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

/// Global metrics instance.
static METRICS: OnceLock<ProxyMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static ProxyMetrics {
    METRICS.get_or_init(ProxyMetrics::new)
}

/// All Prometheus metrics for an hrw proxy process.
pub struct ProxyMetrics {
    pub registry: Registry,

    // ── Client requests ──
    pub requests: IntCounterVec,
    pub request_latency_secs: HistogramVec,

    // ── Storage node calls ──
    pub storage_ops: IntCounterVec,
    pub storage_latency_secs: HistogramVec,

    // ── Key locks ──
    pub lock_conflicts: IntCounter,

    // ── Jobs ──
    pub balance_keys: IntCounterVec,
    pub rebuild_keys_merged: IntCounter,
    pub rebuild_names_rejected: IntCounter,
}

// Manual Debug impl because prometheus types don't derive Debug.
impl std::fmt::Debug for ProxyMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyMetrics").finish_non_exhaustive()
    }
}

/// Default histogram buckets (seconds) for request/storage latency.
const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0];

impl ProxyMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("hrw_requests_total", "Client requests, by method and status"),
            &["method", "status"],
        )
        .expect("requests counter vec");

        let request_latency_secs = HistogramVec::new(
            HistogramOpts::new(
                "hrw_request_latency_seconds",
                "Client request latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["method"],
        )
        .expect("request_latency_secs histogram");

        let storage_ops = IntCounterVec::new(
            Opts::new(
                "hrw_storage_ops_total",
                "Calls to storage nodes, by operation and outcome",
            ),
            &["op", "outcome"],
        )
        .expect("storage_ops counter vec");

        let storage_latency_secs = HistogramVec::new(
            HistogramOpts::new(
                "hrw_storage_latency_seconds",
                "Storage node call latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["op"],
        )
        .expect("storage_latency_secs histogram");

        let lock_conflicts = IntCounter::with_opts(Opts::new(
            "hrw_lock_conflicts_total",
            "Key lock acquisitions refused because the key was held",
        ))
        .expect("lock_conflicts counter");

        let balance_keys = IntCounterVec::new(
            Opts::new("hrw_balance_keys_total", "Keys processed by balance, by outcome"),
            &["outcome"],
        )
        .expect("balance_keys counter vec");

        let rebuild_keys_merged = IntCounter::with_opts(Opts::new(
            "hrw_rebuild_keys_merged_total",
            "Discovered objects merged into the index by rebuild",
        ))
        .expect("rebuild_keys_merged counter");
        let rebuild_names_rejected = IntCounter::with_opts(Opts::new(
            "hrw_rebuild_names_rejected_total",
            "Listed file names rebuild could not decode",
        ))
        .expect("rebuild_names_rejected counter");

        // Register all metrics
        registry
            .register(Box::new(requests.clone()))
            .expect("register requests");
        registry
            .register(Box::new(request_latency_secs.clone()))
            .expect("register request_latency_secs");
        registry
            .register(Box::new(storage_ops.clone()))
            .expect("register storage_ops");
        registry
            .register(Box::new(storage_latency_secs.clone()))
            .expect("register storage_latency_secs");
        registry
            .register(Box::new(lock_conflicts.clone()))
            .expect("register lock_conflicts");
        registry
            .register(Box::new(balance_keys.clone()))
            .expect("register balance_keys");
        registry
            .register(Box::new(rebuild_keys_merged.clone()))
            .expect("register rebuild_keys_merged");
        registry
            .register(Box::new(rebuild_names_rejected.clone()))
            .expect("register rebuild_names_rejected");

        Self {
            registry,
            requests,
            request_latency_secs,
            storage_ops,
            storage_latency_secs,
            lock_conflicts,
            balance_keys,
            rebuild_keys_merged,
            rebuild_names_rejected,
        }
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let m = metrics();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&m.registry.gather(), &mut buf)
        .expect("prometheus text encoding");
    String::from_utf8(buf).expect("prometheus output is valid UTF-8")
}

/// Helper: start a client request latency timer. Returns a guard that
/// records elapsed time on drop.
pub fn start_request_timer(method: &str) -> prometheus::HistogramTimer {
    metrics()
        .request_latency_secs
        .with_label_values(&[method])
        .start_timer()
}

/// Helper: start a storage call latency timer.
pub fn start_storage_timer(op: &str) -> prometheus::HistogramTimer {
    metrics()
        .storage_latency_secs
        .with_label_values(&[op])
        .start_timer()
}

/// Helper: count one storage call.
pub fn record_storage_op(op: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    metrics()
        .storage_ops
        .with_label_values(&[op, outcome])
        .inc();
}

/// Helper: count one finished client request.
pub fn record_request(method: &str, status: u16) {
    metrics()
        .requests
        .with_label_values(&[method, &status.to_string()])
        .inc();
}

// ────────────────────────── Metrics HTTP server ──────────────────────────

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

async fn metrics_handler(
    _req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let body = encode_metrics();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("valid HTTP response"))
}

/// Serve Prometheus metrics on the given address (`GET /metrics`).
///
/// This spawns a lightweight HTTP/1.1 server. Call from a `tokio::spawn`.
pub async fn serve_metrics(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::debug!("metrics connection error: {}", e);
            }
        });
    }
}

// ────────────────────────── Tests ──────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Histogram;

    #[test]
    fn test_metrics_init_and_increment() {
        let m = metrics();

        let before = m.lock_conflicts.get();
        m.lock_conflicts.inc();
        m.lock_conflicts.inc();
        assert_eq!(m.lock_conflicts.get(), before + 2);

        let put_201 = m.requests.with_label_values(&["PUT", "201"]);
        let before = put_201.get();
        record_request("PUT", 201);
        assert_eq!(put_201.get(), before + 1);

        let store_err = m.storage_ops.with_label_values(&["store", "error"]);
        let before = store_err.get();
        record_storage_op("store", false);
        record_storage_op("store", true);
        assert_eq!(store_err.get(), before + 1);
    }

    #[test]
    fn test_encode_metrics_format() {
        // Ensure at least one counter is incremented
        metrics().rebuild_keys_merged.inc();
        metrics()
            .balance_keys
            .with_label_values(&["rebalanced"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("hrw_rebuild_keys_merged_total"));
        assert!(output.contains("hrw_balance_keys_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_histogram_records() {
        let m = metrics();

        m.storage_latency_secs
            .with_label_values(&["test_probe"])
            .observe(0.005);
        m.storage_latency_secs
            .with_label_values(&["test_probe"])
            .observe(0.010);

        let h: Histogram = m.storage_latency_secs.with_label_values(&["test_probe"]);
        assert_eq!(h.get_sample_count(), 2);
        assert!((h.get_sample_sum() - 0.015).abs() < 1e-9);
    }

    #[test]
    fn test_timer_guard_observes_on_drop() {
        let h = metrics().request_latency_secs.with_label_values(&["TEST"]);
        let before = h.get_sample_count();
        {
            let _timer = start_request_timer("TEST");
        }
        assert_eq!(h.get_sample_count(), before + 1);
    }
}
