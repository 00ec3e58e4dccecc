use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::engine::Engine;
use crate::observability::{DATE_LOCKS_ACTIVE, DATE_LOCKS_EVICTED_TOTAL};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// One pass: drop per-date locks nobody holds. Returns how many went.
pub fn sweep(engine: &Engine) -> usize {
    let evicted = engine.locks.prune_idle();
    metrics::gauge!(DATE_LOCKS_ACTIVE).set(engine.locks.len() as f64);
    if evicted > 0 {
        metrics::counter!(DATE_LOCKS_EVICTED_TOTAL).increment(evicted as u64);
        debug!(evicted, remaining = engine.locks.len(), "evicted idle date locks");
    }
    evicted
}

/// Background task that periodically sweeps idle date locks.
pub async fn run_janitor(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep(&engine);
    }
}
