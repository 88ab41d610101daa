use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

use super::engine::{QuotaEngine, QuotaResult};

// key: usage-reset-scheduler -> persist period rollovers for idle tenants
pub fn spawn(engine: Arc<QuotaEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = process_tick(&engine, Utc::now()).await {
                warn!(?err, "usage reset tick failed");
            }
        }
    })
}

// key: usage-reset-scheduler -> tick handler
pub async fn process_tick(engine: &QuotaEngine, now: DateTime<Utc>) -> QuotaResult<u64> {
    let rolled = engine.roll_over_due(now).await?;
    if rolled > 0 {
        info!(rolled, "usage periods rolled over");
    } else {
        debug!("no usage periods due for rollover");
    }
    Ok(rolled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::memory::InMemoryUsageStore;
    use crate::quota::models::{Plan, PlanLimitTable};
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn tick_rolls_over_only_elapsed_periods() {
        let store = Arc::new(InMemoryUsageStore::new());
        let engine = QuotaEngine::new(store.clone(), PlanLimitTable::default());
        let now = Utc::now();

        let mut stale = engine
            .provision_subscription("stale", Plan::Free, now - ChronoDuration::days(35))
            .await
            .unwrap();
        stale.current_podcast_count = 4;
        store.seed(stale);

        let mut fresh = engine
            .provision_subscription("fresh", Plan::Free, now - ChronoDuration::days(3))
            .await
            .unwrap();
        fresh.current_podcast_count = 2;
        store.seed(fresh);

        assert_eq!(process_tick(&engine, now).await.unwrap(), 1);
        assert_eq!(process_tick(&engine, now).await.unwrap(), 0);

        let stale = engine.get_subscription("stale").await.unwrap();
        assert_eq!(stale.current_podcast_count, 0);
        let fresh = engine.get_subscription("fresh").await.unwrap();
        assert_eq!(fresh.current_podcast_count, 2);
    }
}
