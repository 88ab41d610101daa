use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::{ConsumeDecision, Consumption, Enforcement, Subscription, UsageRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("{0} counter out of range")]
    CounterOutOfRange(&'static str),
}

impl StoreError {
    /// Connection level failures that a caller may retry for read operations.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StoreError::Unavailable(error),
            other => StoreError::Database(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// key: usage-store -> persistence contract for the quota engine
/// `apply_consumption` is the only mutation of live counters. Implementations
/// must perform the pending period rollover, the optional limit evaluation, the
/// counter increments and the usage record append as one atomic unit.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn find_subscription(&self, user_id: &str) -> StoreResult<Option<Subscription>>;

    /// Returns `None` when the tenant has no subscription.
    async fn apply_consumption(
        &self,
        user_id: &str,
        consumption: &Consumption,
        enforcement: Enforcement,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ConsumeDecision>>;

    /// Newest first.
    async fn usage_records(
        &self,
        subscription_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<UsageRecord>>;

    /// Returns `None` when the tenant already has a subscription.
    async fn insert_subscription(
        &self,
        subscription: &Subscription,
    ) -> StoreResult<Option<Subscription>>;

    /// Persists the rollover of every subscription whose reset date has passed.
    async fn roll_over_due(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}
