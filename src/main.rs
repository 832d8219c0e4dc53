//! Paper Auto-Poster: binary entrypoint.
//! Loads config, restores state, spawns the scheduler and serves the admin API.

use std::sync::Arc;

use chrono::Utc;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use paper_autoposter::metrics::Metrics;
use paper_autoposter::{api, AutoPoster, Collaborators, PosterConfig};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("poster=info,ingest=info,warn"));
    // The platform may have installed a subscriber already.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PosterConfig::load()?;
    let collaborators = Collaborators::from_config(&cfg)?;

    let now = Utc::now();
    let poster = Arc::new(AutoPoster::new(cfg, collaborators, now));
    match poster.restore(now).await {
        Ok(true) => {}
        Ok(false) => tracing::info!(target: "poster", "no saved state; starting fresh"),
        Err(e) => tracing::warn!(target: "poster", error = %e, "state restore failed; starting fresh"),
    }

    tokio::spawn(poster.clone().run());

    let mut router = api::router(poster);
    match Metrics::init() {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => tracing::warn!(target: "poster", error = %e, "metrics disabled"),
    }

    Ok(router.into())
}
