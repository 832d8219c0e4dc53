// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod assess;
pub mod candidates;
pub mod compose;
pub mod config;
pub mod gate;
pub mod ingest;
pub mod item;
pub mod llm;
pub mod metrics;
pub mod notify;
pub mod pool;
pub mod scheduler;
pub mod scoring;
pub mod state;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::PosterConfig;
pub use crate::gate::{Blocked, PostOutcome, Trigger};
pub use crate::item::Item;
pub use crate::scheduler::{AutoPoster, Collaborators};

use std::future::Future;
use std::time::Duration;

/// Run `fut` under a deadline; an elapsed deadline becomes an ordinary error.
pub(crate) async fn with_deadline<T, F>(limit: Duration, what: &str, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => {
            ::metrics::counter!("poster_timeouts_total").increment(1);
            Err(anyhow::anyhow!("{what} timed out after {}s", limit.as_secs_f64()))
        }
    }
}
