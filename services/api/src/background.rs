//! Background maintenance of the call registry.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use triage_core::CallRegistry;

/// How often ended calls are checked against the retention window.
/// `None` when retention is disabled.
pub fn prune_interval(retention: Duration) -> Option<Duration> {
    if retention.is_zero() {
        return None;
    }
    Some((retention / 2).clamp(Duration::from_secs(1), Duration::from_secs(60)))
}

/// Spawns the task that drops ended calls once their retention window has
/// passed. Returns `None` when retention is disabled.
pub fn spawn_pruner(registry: Arc<CallRegistry>) -> Option<JoinHandle<()>> {
    let period = prune_interval(registry.config().ended_retention)?;
    info!(period_secs = period.as_secs(), "Starting ended-call pruner");
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let purged = registry.purge_ended(Utc::now());
            debug!(purged, "Pruning pass complete");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::{AgentCatalog, RegistryConfig, pipeline::DetachedPipeline};

    #[test]
    fn test_prune_interval_is_clamped() {
        assert_eq!(prune_interval(Duration::ZERO), None);
        assert_eq!(
            prune_interval(Duration::from_millis(500)),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            prune_interval(Duration::from_secs(30)),
            Some(Duration::from_secs(15))
        );
        assert_eq!(
            prune_interval(Duration::from_secs(3600)),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_pruner_not_spawned_when_retention_disabled() {
        let registry = Arc::new(CallRegistry::new(
            Arc::new(AgentCatalog::builtin()),
            Arc::new(DetachedPipeline),
            RegistryConfig {
                max_concurrent_calls: 1,
                ended_retention: Duration::ZERO,
            },
        ));
        assert!(spawn_pruner(registry).is_none());
    }

    #[tokio::test]
    async fn test_pruner_removes_expired_calls() {
        let registry = Arc::new(CallRegistry::new(
            Arc::new(AgentCatalog::builtin()),
            Arc::new(DetachedPipeline),
            RegistryConfig {
                max_concurrent_calls: 4,
                ended_retention: Duration::from_millis(1),
            },
        ));
        let expired = registry.create(None).unwrap();
        registry.end(expired.call_id).unwrap();
        let live = registry.create(None).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The first tick fires immediately.
        let handle = spawn_pruner(registry.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(registry.get(expired.call_id).is_err());
        assert!(registry.get(live.call_id).is_ok());
        handle.abort();
    }
}
