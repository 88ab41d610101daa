use chrono::Utc;
use clap::Parser;
use dotenvy::dotenv;
use podcast_backend::config;
use podcast_backend::quota::{PgUsageStore, Plan, QuotaEngine, QuotaError};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

/// Creates the subscription row for a tenant onboarded outside this service.
#[derive(Parser, Debug)]
#[command(name = "provision_subscription")]
#[command(about = "Provision a tenant subscription", long_about = None)]
struct Cli {
    /// Tenant (user) id
    user_id: String,
    /// FREE, STARTER, PRO or BUSINESS
    #[arg(default_value = "FREE")]
    plan: Plan,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let Cli { user_id, plan } = Cli::parse();

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(config::DATABASE_URL.as_str())
        .await?;
    let engine = QuotaEngine::new(
        Arc::new(PgUsageStore::new(pool)),
        config::plan_limits_from_env(),
    );

    match engine.provision_subscription(&user_id, plan, Utc::now()).await {
        Ok(subscription) => {
            println!(
                "provisioned {} on {} ({} podcasts, {} minutes) until {}",
                subscription.user_id,
                subscription.plan,
                subscription.monthly_podcast_limit,
                subscription.monthly_minutes_limit,
                subscription.usage_reset_date
            );
            Ok(())
        }
        Err(QuotaError::AlreadyProvisioned { .. }) => {
            eprintln!("{user_id} already has a subscription; nothing to do");
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}
