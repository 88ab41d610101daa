use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use super::models::{
    ConsumeDecision, Consumption, Enforcement, LimitCheckResult, Plan, PlanLimitTable,
    Subscription, UsageRecord, UsageSummary,
};
use super::policy;
use super::store::{StoreError, UsageStore};

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("Subscription not found")]
    NotFound { user_id: String },
    #[error("usage store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
    #[error("usage store failure: {0}")]
    Store(#[source] StoreError),
    #[error("amount must be non-negative, got {0}")]
    InvalidAmount(i32),
    #[error("subscription already provisioned for {user_id}")]
    AlreadyProvisioned { user_id: String },
}

impl From<StoreError> for QuotaError {
    fn from(error: StoreError) -> Self {
        if error.is_transient() {
            QuotaError::StoreUnavailable(error)
        } else {
            QuotaError::Store(error)
        }
    }
}

pub type QuotaResult<T> = Result<T, QuotaError>;

// key: quota-engine -> admission decisions and usage accounting
/// Reads never write. A subscription whose reset date has passed is reported
/// with zeroed counters; the store persists that rollover on the next mutation
/// or scheduler tick.
///
/// `check_limits` followed by `increment_unit_count`/`track_usage` is the soft
/// two-call pattern and can overshoot under concurrency. `consume` and its
/// wrappers evaluate and commit under one store lock and never do.
#[derive(Clone)]
pub struct QuotaEngine {
    store: Arc<dyn UsageStore>,
    plans: PlanLimitTable,
}

impl QuotaEngine {
    pub fn new(store: Arc<dyn UsageStore>, plans: PlanLimitTable) -> Self {
        Self { store, plans }
    }

    pub async fn get_subscription(&self, user_id: &str) -> QuotaResult<Subscription> {
        let subscription = self
            .store
            .find_subscription(user_id)
            .await?
            .ok_or_else(|| QuotaError::NotFound {
                user_id: user_id.to_string(),
            })?;
        Ok(subscription.effective_at(Utc::now()))
    }

    pub async fn check_limits(&self, user_id: &str) -> QuotaResult<LimitCheckResult> {
        let subscription = self.get_subscription(user_id).await?;
        Ok(policy::check(&subscription))
    }

    /// Unconditional +1 on the podcast counter.
    pub async fn increment_unit_count(&self, user_id: &str) -> QuotaResult<()> {
        self.apply(user_id, &Consumption::podcast(), Enforcement::Unchecked)
            .await?;
        Ok(())
    }

    /// Unconditionally adds `minutes` and appends the matching usage record.
    pub async fn track_usage(
        &self,
        user_id: &str,
        minutes: i32,
        podcast_id: &str,
    ) -> QuotaResult<UsageRecord> {
        ensure_non_negative(minutes)?;
        match self
            .apply(
                user_id,
                &Consumption::minutes(minutes, podcast_id),
                Enforcement::Unchecked,
            )
            .await?
        {
            ConsumeDecision::Admitted {
                record: Some(record),
                ..
            } => Ok(record),
            other => Err(QuotaError::Store(StoreError::Corrupt(format!(
                "unchecked usage for {user_id} returned {other:?}"
            )))),
        }
    }

    pub async fn get_usage(&self, user_id: &str) -> QuotaResult<UsageSummary> {
        let subscription = self.get_subscription(user_id).await?;
        Ok(UsageSummary::from(&subscription))
    }

    /// Evaluates and commits `consumption` as one atomic store operation.
    pub async fn consume(
        &self,
        user_id: &str,
        consumption: &Consumption,
    ) -> QuotaResult<ConsumeDecision> {
        ensure_non_negative(consumption.podcasts)?;
        ensure_non_negative(consumption.minutes)?;
        let decision = self
            .apply(user_id, consumption, Enforcement::Enforce)
            .await?;
        if let ConsumeDecision::Denied(result) = &decision {
            info!(
                user_id,
                reason = result.reason.as_deref().unwrap_or_default(),
                podcasts = result.current.podcasts,
                minutes = result.current.minutes,
                "usage denied by quota"
            );
        }
        Ok(decision)
    }

    pub async fn admit_podcast(&self, user_id: &str) -> QuotaResult<ConsumeDecision> {
        self.consume(user_id, &Consumption::podcast()).await
    }

    pub async fn track_usage_within_limit(
        &self,
        user_id: &str,
        minutes: i32,
        podcast_id: &str,
    ) -> QuotaResult<ConsumeDecision> {
        self.consume(user_id, &Consumption::minutes(minutes, podcast_id))
            .await
    }

    pub async fn usage_history(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> QuotaResult<Vec<UsageRecord>> {
        let subscription = self.get_subscription(user_id).await?;
        Ok(self.store.usage_records(subscription.id, since).await?)
    }

    pub async fn provision_subscription(
        &self,
        user_id: &str,
        plan: Plan,
        now: DateTime<Utc>,
    ) -> QuotaResult<Subscription> {
        let subscription =
            Subscription::provision(user_id, plan, self.plans.limits_for(plan), now);
        let created = self
            .store
            .insert_subscription(&subscription)
            .await?
            .ok_or_else(|| QuotaError::AlreadyProvisioned {
                user_id: user_id.to_string(),
            })?;
        info!(
            user_id,
            subscription = %created.id,
            plan = %created.plan,
            "subscription provisioned"
        );
        Ok(created)
    }

    pub async fn roll_over_due(&self, now: DateTime<Utc>) -> QuotaResult<u64> {
        Ok(self.store.roll_over_due(now).await?)
    }

    async fn apply(
        &self,
        user_id: &str,
        consumption: &Consumption,
        enforcement: Enforcement,
    ) -> QuotaResult<ConsumeDecision> {
        self.store
            .apply_consumption(user_id, consumption, enforcement, Utc::now())
            .await
            .map_err(|error| {
                warn!(?error, user_id, "usage store rejected consumption");
                QuotaError::from(error)
            })?
            .ok_or_else(|| QuotaError::NotFound {
                user_id: user_id.to_string(),
            })
    }
}

fn ensure_non_negative(amount: i32) -> QuotaResult<()> {
    if amount < 0 {
        return Err(QuotaError::InvalidAmount(amount));
    }
    Ok(())
}
