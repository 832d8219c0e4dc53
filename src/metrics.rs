use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::PosterState;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Fails if another recorder is already global.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    use ::metrics::{describe_counter, describe_gauge, describe_histogram};
    describe_gauge!("poster_pool_size", "items in the retention pool");
    describe_gauge!("poster_candidates", "items ready to post");
    describe_gauge!("poster_blacklist_size", "permanently rejected ids");
    describe_gauge!("poster_posted_today", "posts since the last UTC day reset");
    describe_counter!("poster_posted_total", "successful posts");
    describe_counter!("poster_post_attempts_total", "post attempts by result");
    describe_counter!("poster_discovery_runs_total", "discovery passes");
    describe_counter!("poster_assess_errors_total", "accessibility checks that failed or timed out");
    describe_counter!("poster_timeouts_total", "external calls cut off by a deadline");
    describe_counter!("poster_persist_errors_total", "snapshot writes that failed");
    describe_counter!("enrich_errors_total", "per-item popularity lookups that failed");
    describe_counter!("ingest_events_total", "feed entries parsed");
    describe_counter!("ingest_malformed_total", "feed entries skipped as malformed");
    describe_counter!("ingest_provider_errors_total", "feed requests that failed");
    describe_histogram!("ingest_parse_ms", "feed parse time in milliseconds");
}

/// Mirror the state sizes into gauges.
pub fn record_state(state: &PosterState) {
    use ::metrics::gauge;
    gauge!("poster_pool_size").set(state.pool.len() as f64);
    gauge!("poster_candidates").set(state.candidates.len() as f64);
    gauge!("poster_blacklist_size").set(state.blacklist.len() as f64);
    gauge!("poster_posted_today").set(state.counters.posted_today.len() as f64);
}
