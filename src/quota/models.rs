use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// key: quota-plan -> subscription tiers, lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Plan {
    Free,
    Starter,
    Pro,
    Business,
}

impl Plan {
    pub const ALL: [Plan; 4] = [Plan::Free, Plan::Starter, Plan::Pro, Plan::Business];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "FREE",
            Plan::Starter => "STARTER",
            Plan::Pro => "PRO",
            Plan::Business => "BUSINESS",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FREE" => Ok(Plan::Free),
            "STARTER" => Ok(Plan::Starter),
            "PRO" => Ok(Plan::Pro),
            "BUSINESS" => Ok(Plan::Business),
            other => Err(format!("unknown plan '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Trialing => "TRIALING",
            SubscriptionStatus::PastDue => "PAST_DUE",
            SubscriptionStatus::Canceled => "CANCELED",
            SubscriptionStatus::Incomplete => "INCOMPLETE",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(SubscriptionStatus::Active),
            "TRIALING" => Ok(SubscriptionStatus::Trialing),
            "PAST_DUE" => Ok(SubscriptionStatus::PastDue),
            "CANCELED" => Ok(SubscriptionStatus::Canceled),
            "INCOMPLETE" => Ok(SubscriptionStatus::Incomplete),
            other => Err(format!("unknown subscription status '{other}'")),
        }
    }
}

/// Per-period allowance of podcasts and generation minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub podcasts: i32,
    pub minutes: i32,
}

impl PlanLimits {
    pub fn default_for(plan: Plan) -> Self {
        match plan {
            Plan::Free => PlanLimits {
                podcasts: 5,
                minutes: 25,
            },
            Plan::Starter => PlanLimits {
                podcasts: 50,
                minutes: 250,
            },
            Plan::Pro => PlanLimits {
                podcasts: 200,
                minutes: 1000,
            },
            Plan::Business => PlanLimits {
                podcasts: 999_999,
                minutes: 999_999,
            },
        }
    }
}

// key: quota-plan-table -> immutable plan to limits mapping
/// Built once at startup and handed to the engine. Every plan always resolves
/// to a value: overrides are layered on top of the built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanLimitTable {
    limits: HashMap<Plan, PlanLimits>,
}

impl PlanLimitTable {
    pub fn with_overrides(overrides: HashMap<Plan, PlanLimits>) -> Self {
        let mut limits: HashMap<Plan, PlanLimits> = Plan::ALL
            .iter()
            .map(|plan| (*plan, PlanLimits::default_for(*plan)))
            .collect();
        limits.extend(overrides);
        Self { limits }
    }

    pub fn limits_for(&self, plan: Plan) -> PlanLimits {
        self.limits
            .get(&plan)
            .copied()
            .unwrap_or_else(|| PlanLimits::default_for(plan))
    }
}

impl Default for PlanLimitTable {
    fn default() -> Self {
        Self::with_overrides(HashMap::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub podcasts: i32,
    pub minutes: i32,
}

// key: quota-subscription-model -> one row per tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: String,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub current_podcast_count: i32,
    pub current_minutes_used: i32,
    pub monthly_podcast_limit: i32,
    pub monthly_minutes_limit: i32,
    pub usage_reset_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// A fresh subscription for `user_id` carrying the plan's default limits and
    /// a one-month usage period starting at `now`.
    pub fn provision(user_id: &str, plan: Plan, limits: PlanLimits, now: DateTime<Utc>) -> Self {
        let period_end = next_reset_after(now);
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            plan,
            status: SubscriptionStatus::Active,
            current_period_start: now,
            current_period_end: period_end,
            current_podcast_count: 0,
            current_minutes_used: 0,
            monthly_podcast_limit: limits.podcasts,
            monthly_minutes_limit: limits.minutes,
            usage_reset_date: period_end,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn usage(&self) -> UsageCounters {
        UsageCounters {
            podcasts: self.current_podcast_count,
            minutes: self.current_minutes_used,
        }
    }

    pub fn limits(&self) -> PlanLimits {
        PlanLimits {
            podcasts: self.monthly_podcast_limit,
            minutes: self.monthly_minutes_limit,
        }
    }

    pub fn is_reset_due(&self, now: DateTime<Utc>) -> bool {
        self.usage_reset_date <= now
    }

    /// Advances the usage period when the reset date has elapsed, zeroing both
    /// counters. Limits stay as they are on the row. Returns whether anything
    /// changed.
    pub fn roll_over(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_reset_due(now) {
            return false;
        }

        let mut start = self.usage_reset_date;
        let mut end = next_reset_after(start);
        while end <= now {
            start = end;
            end = next_reset_after(start);
        }

        self.current_period_start = start;
        self.current_period_end = end;
        self.usage_reset_date = end;
        self.current_podcast_count = 0;
        self.current_minutes_used = 0;
        true
    }

    /// The subscription as it should be observed at `now`, without persisting
    /// a pending rollover.
    pub fn effective_at(mut self, now: DateTime<Utc>) -> Self {
        self.roll_over(now);
        self
    }
}

fn next_reset_after(from: DateTime<Utc>) -> DateTime<Utc> {
    from.checked_add_months(Months::new(1))
        .unwrap_or_else(|| from + Duration::days(30))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    GenerationMinutes,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::GenerationMinutes => "generation_minutes",
        }
    }
}

impl FromStr for UsageKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "generation_minutes" => Ok(UsageKind::GenerationMinutes),
            other => Err(format!("unknown usage type '{other}'")),
        }
    }
}

// key: quota-usage-record -> append-only audit event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub podcast_id: String,
    pub amount: i32,
    #[serde(rename = "type")]
    pub kind: UsageKind,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn generation_minutes(
        subscription_id: Uuid,
        podcast_id: &str,
        amount: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            podcast_id: podcast_id.to_string(),
            amount,
            kind: UsageKind::GenerationMinutes,
            created_at: now,
        }
    }
}

/// Outcome of an admission check. Denials carry a human readable reason naming
/// the exhausted limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitCheckResult {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub current: UsageCounters,
    pub limits: PlanLimits,
}

/// A metered action to apply against a subscription in one atomic step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumption {
    pub podcasts: i32,
    pub minutes: i32,
    /// Podcast the minutes belong to. When set, a usage record is appended.
    pub podcast_id: Option<String>,
}

impl Consumption {
    pub fn podcast() -> Self {
        Self {
            podcasts: 1,
            minutes: 0,
            podcast_id: None,
        }
    }

    pub fn minutes(minutes: i32, podcast_id: impl Into<String>) -> Self {
        Self {
            podcasts: 0,
            minutes,
            podcast_id: Some(podcast_id.into()),
        }
    }

    pub fn generation(podcast_id: impl Into<String>, minutes: i32) -> Self {
        Self {
            podcasts: 1,
            minutes,
            podcast_id: Some(podcast_id.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enforcement {
    /// Evaluate the limits under the same lock as the increment.
    Enforce,
    /// Increment unconditionally; admission is the caller's concern.
    Unchecked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeDecision {
    Admitted {
        subscription: Subscription,
        record: Option<UsageRecord>,
    },
    Denied(LimitCheckResult),
}

impl ConsumeDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, ConsumeDecision::Admitted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPeriodUsage {
    pub podcasts_used: i32,
    pub podcasts_limit: i32,
    pub minutes_used: i32,
    pub minutes_limit: i32,
    pub reset_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSnapshot {
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub current_period: CurrentPeriodUsage,
    pub subscription: SubscriptionSnapshot,
}

impl From<&Subscription> for UsageSummary {
    fn from(subscription: &Subscription) -> Self {
        Self {
            current_period: CurrentPeriodUsage {
                podcasts_used: subscription.current_podcast_count,
                podcasts_limit: subscription.monthly_podcast_limit,
                minutes_used: subscription.current_minutes_used,
                minutes_limit: subscription.monthly_minutes_limit,
                reset_date: subscription.usage_reset_date,
            },
            subscription: SubscriptionSnapshot {
                plan: subscription.plan,
                status: subscription.status,
                current_period_start: subscription.current_period_start,
                current_period_end: subscription.current_period_end,
            },
        }
    }
}
