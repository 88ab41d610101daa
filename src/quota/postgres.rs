use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::models::{
    ConsumeDecision, Consumption, Enforcement, Subscription, UsageKind, UsageRecord,
};
use super::policy;
use super::store::{StoreError, StoreResult, UsageStore};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan, status, current_period_start, \
    current_period_end, current_podcast_count, current_minutes_used, monthly_podcast_limit, \
    monthly_minutes_limit, usage_reset_date, created_at, updated_at";

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: String,
    plan: String,
    status: String,
    current_period_start: DateTime<Utc>,
    current_period_end: DateTime<Utc>,
    current_podcast_count: i32,
    current_minutes_used: i32,
    monthly_podcast_limit: i32,
    monthly_minutes_limit: i32,
    usage_reset_date: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SubscriptionRow {
    fn into_subscription(self) -> StoreResult<Subscription> {
        Ok(Subscription {
            id: self.id,
            plan: self.plan.parse().map_err(StoreError::Corrupt)?,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            user_id: self.user_id,
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            current_podcast_count: self.current_podcast_count,
            current_minutes_used: self.current_minutes_used,
            monthly_podcast_limit: self.monthly_podcast_limit,
            monthly_minutes_limit: self.monthly_minutes_limit,
            usage_reset_date: self.usage_reset_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct UsageRecordRow {
    id: Uuid,
    subscription_id: Uuid,
    podcast_id: String,
    amount: i32,
    usage_type: String,
    created_at: DateTime<Utc>,
}

impl UsageRecordRow {
    fn into_record(self) -> StoreResult<UsageRecord> {
        let kind: UsageKind = self.usage_type.parse().map_err(StoreError::Corrupt)?;
        Ok(UsageRecord {
            id: self.id,
            subscription_id: self.subscription_id,
            podcast_id: self.podcast_id,
            amount: self.amount,
            kind,
            created_at: self.created_at,
        })
    }
}

// key: usage-store-postgres -> row-locked counters plus usage ledger
#[derive(Clone)]
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_subscription(
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
    ) -> StoreResult<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        row.map(SubscriptionRow::into_subscription).transpose()
    }

    async fn persist_rollover(
        tx: &mut Transaction<'_, Postgres>,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions SET
                current_period_start = $2,
                current_period_end = $3,
                usage_reset_date = $4,
                current_podcast_count = 0,
                current_minutes_used = 0,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.usage_reset_date)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn find_subscription(&self, user_id: &str) -> StoreResult<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SubscriptionRow::into_subscription).transpose()
    }

    async fn apply_consumption(
        &self,
        user_id: &str,
        consumption: &Consumption,
        enforcement: Enforcement,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ConsumeDecision>> {
        let mut tx = self.pool.begin().await?;

        let Some(mut subscription) = Self::lock_subscription(&mut tx, user_id).await? else {
            return Ok(None);
        };

        if subscription.roll_over(now) {
            Self::persist_rollover(&mut tx, &subscription, now).await?;
            debug!(user_id, subscription = %subscription.id, "usage period rolled over");
        }

        if enforcement == Enforcement::Enforce {
            let decision = policy::evaluate(&subscription, consumption);
            if !decision.allowed {
                tx.commit().await?;
                return Ok(Some(ConsumeDecision::Denied(decision)));
            }
        }

        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            UPDATE subscriptions SET
                current_podcast_count = current_podcast_count + $2,
                current_minutes_used = current_minutes_used + $3,
                updated_at = $4
            WHERE id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(subscription.id)
        .bind(consumption.podcasts)
        .bind(consumption.minutes)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let subscription = row.into_subscription()?;

        let record = match consumption.podcast_id.as_deref() {
            Some(podcast_id) => {
                let row = sqlx::query_as::<_, UsageRecordRow>(
                    r#"
                    INSERT INTO usage_records (id, subscription_id, podcast_id, amount, usage_type, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    RETURNING id, subscription_id, podcast_id, amount, usage_type, created_at
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(subscription.id)
                .bind(podcast_id)
                .bind(consumption.minutes)
                .bind(UsageKind::GenerationMinutes.as_str())
                .bind(now)
                .fetch_one(&mut *tx)
                .await?;
                Some(row.into_record()?)
            }
            None => None,
        };

        tx.commit().await?;

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
        let rows = sqlx::query_as::<_, UsageRecordRow>(
            r#"
            SELECT id, subscription_id, podcast_id, amount, usage_type, created_at
            FROM usage_records
            WHERE subscription_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(subscription_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UsageRecordRow::into_record).collect()
    }

    async fn insert_subscription(
        &self,
        subscription: &Subscription,
    ) -> StoreResult<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            INSERT INTO subscriptions ({SUBSCRIPTION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(subscription.id)
        .bind(&subscription.user_id)
        .bind(subscription.plan.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.current_podcast_count)
        .bind(subscription.current_minutes_used)
        .bind(subscription.monthly_podcast_limit)
        .bind(subscription.monthly_minutes_limit)
        .bind(subscription.usage_reset_date)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SubscriptionRow::into_subscription).transpose()
    }

    async fn roll_over_due(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
            WHERE usage_reset_date <= $1
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut rolled = 0;
        for row in rows {
            let mut subscription = row.into_subscription()?;
            if subscription.roll_over(now) {
                Self::persist_rollover(&mut tx, &subscription, now).await?;
                rolled += 1;
            }
        }

        tx.commit().await?;
        Ok(rolled)
    }
}
