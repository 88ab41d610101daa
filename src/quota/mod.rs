pub mod api;
pub mod engine;
pub mod memory;
pub mod models;
pub mod policy;
pub mod postgres;
pub mod scheduler;
pub mod store;

pub use api::{
    check_limits as quota_check_limits, get_subscription as quota_get_subscription,
    get_usage as quota_get_usage, record_generation as quota_record_generation,
    require_quota, usage_history as quota_usage_history, GenerationReceipt, GenerationRequest,
    HistoryQuery,
};
pub use engine::{QuotaEngine, QuotaError, QuotaResult};
pub use memory::InMemoryUsageStore;
pub use models::{
    ConsumeDecision, Consumption, Enforcement, LimitCheckResult, Plan, PlanLimitTable,
    PlanLimits, Subscription, SubscriptionStatus, UsageCounters, UsageKind, UsageRecord,
    UsageSummary,
};
pub use postgres::PgUsageStore;
pub use store::{StoreError, StoreResult, UsageStore};
