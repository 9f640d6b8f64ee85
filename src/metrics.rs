use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::ingest::ensure_metrics_described;

// A cycle is a listing page plus up to a few hundred detail fetches.
const CYCLE_BUCKETS_MS: &[f64] = &[
    100.0, 500.0, 1_000.0, 5_000.0, 15_000.0, 60_000.0, 180_000.0, 600_000.0,
];
const REQUEST_BUCKETS_MS: &[f64] = &[50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 20_000.0];

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and register the service's series.
    pub fn init(congress: u32) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Full("scan_cycle_ms".into()), CYCLE_BUCKETS_MS)?
            .set_buckets_for_metric(Matcher::Full("fetch_request_ms".into()), REQUEST_BUCKETS_MS)?
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;

        ensure_metrics_described();
        gauge!("watched_congress").set(f64::from(congress));

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` (Prometheus exposition format) and `/health`.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new()
            .route(
                "/metrics",
                get(move || {
                    let h = handle.clone();
                    async move { h.render() }
                }),
            )
            .route("/health", get(|| async { "ok" }))
    }

    /// Serve the router on `listen` until the process exits.
    pub async fn serve(&self, listen: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(listen).await?;
        tracing::info!(addr = %listener.local_addr()?, "metrics listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}
