//! Background purge of expired keys
//!
//! Reads already hide expired entries; the sweeper bounds memory by
//! dropping them periodically. It runs independently of the request path.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::kv::MemoryKv;

/// Spawn a task that purges expired keys from `kv` every `interval`.
///
/// Returns the `JoinHandle`; abort it to stop sweeping.
pub fn spawn_sweeper(kv: Arc<MemoryKv>, interval: Duration) -> tokio::task::JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "starting expired-key sweeper");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately and the store starts empty
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep_cycle(&kv).await;
        }
    })
}

async fn sweep_cycle(kv: &MemoryKv) -> usize {
    let purged = kv.purge_expired().await;
    debug!(purged, "sweep cycle complete");
    purged
}
