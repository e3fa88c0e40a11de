use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use ventix_agent::ContextCache;

const MIN_EVICTION_PERIOD: Duration = Duration::from_secs(1);

/// Half the TTL, so an idle entry outlives its TTL by at most that much.
pub fn eviction_period(context: &ContextCache) -> Duration {
    context
        .settings()
        .ttl
        .to_std()
        .map(|ttl| ttl / 2)
        .unwrap_or(MIN_EVICTION_PERIOD)
        .max(MIN_EVICTION_PERIOD)
}

pub fn spawn_context_eviction(
    context: Arc<ContextCache>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the first immediate tick.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = context.evict_expired();
                    if evicted > 0 {
                        debug!(
                            event_name = "server.context.evicted",
                            evicted,
                            cached = context.cached_users(),
                            "expired conversation contexts evicted"
                        );
                    }
                }
                _ = shutdown.cancelled() => {
                    info!(event_name = "server.context.eviction_stopped", "context eviction task shutting down");
                    break;
                }
            }
        }
    })
}
