use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::models::{ConsumeDecision, Consumption, Enforcement, Subscription, UsageRecord};
use super::policy;
use super::store::{StoreError, StoreResult, UsageStore};

// key: usage-store-memory -> process local store for tests and local runs
/// Each subscription lives behind its DashMap shard lock; evaluation, increment
/// and record append all happen while the entry is held.
#[derive(Default)]
pub struct InMemoryUsageStore {
    subscriptions: DashMap<String, Subscription>,
    records: DashMap<Uuid, Vec<UsageRecord>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever the tenant had, counters included.
    pub fn seed(&self, subscription: Subscription) {
        self.subscriptions
            .insert(subscription.user_id.clone(), subscription);
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn find_subscription(&self, user_id: &str) -> StoreResult<Option<Subscription>> {
        Ok(self
            .subscriptions
            .get(user_id)
            .map(|entry| entry.value().clone()))
    }

    async fn apply_consumption(
        &self,
        user_id: &str,
        consumption: &Consumption,
        enforcement: Enforcement,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ConsumeDecision>> {
        let Some(mut entry) = self.subscriptions.get_mut(user_id) else {
            return Ok(None);
        };
        // the entry is only written back once every step has succeeded
        let mut subscription = entry.value().clone();

        if subscription.roll_over(now) {
            subscription.updated_at = now;
        }

        if enforcement == Enforcement::Enforce {
            let decision = policy::evaluate(&subscription, consumption);
            if !decision.allowed {
                *entry = subscription;
                return Ok(Some(ConsumeDecision::Denied(decision)));
            }
        }

        subscription.current_podcast_count = add_counter(
            subscription.current_podcast_count,
            consumption.podcasts,
            "podcast",
        )?;
        subscription.current_minutes_used = add_counter(
            subscription.current_minutes_used,
            consumption.minutes,
            "minutes",
        )?;
        subscription.updated_at = now;

        let record = consumption.podcast_id.as_deref().map(|podcast_id| {
            let record = UsageRecord::generation_minutes(
                subscription.id,
                podcast_id,
                consumption.minutes,
                now,
            );
            self.records
                .entry(subscription.id)
                .or_default()
                .push(record.clone());
            record
        });

        *entry = subscription.clone();
        Ok(Some(ConsumeDecision::Admitted {
            subscription,
            record,
        }))
    }

    async fn usage_records(
        &self,
        subscription_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<UsageRecord>> {
        let mut records: Vec<UsageRecord> = self
            .records
            .get(&subscription_id)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|record| since.map_or(true, |since| record.created_at >= since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn insert_subscription(
        &self,
        subscription: &Subscription,
    ) -> StoreResult<Option<Subscription>> {
        match self.subscriptions.entry(subscription.user_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(None),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(subscription.clone());
                Ok(Some(subscription.clone()))
            }
        }
    }

    async fn roll_over_due(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut rolled = 0;
        for mut entry in self.subscriptions.iter_mut() {
            let subscription = entry.value_mut();
            if subscription.roll_over(now) {
                subscription.updated_at = now;
                rolled += 1;
            }
        }
        Ok(rolled)
    }
}

fn add_counter(current: i32, amount: i32, counter: &'static str) -> StoreResult<i32> {
    current
        .checked_add(amount)
        .filter(|total| *total >= 0)
        .ok_or(StoreError::CounterOutOfRange(counter))
}
