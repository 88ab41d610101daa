use axum::http::{header, HeaderValue, Method};
use axum::{routing::get, Extension};
use axum_prometheus::PrometheusMetricLayer;
use podcast_backend::config::{self, SessionProvider};
use podcast_backend::quota::{scheduler, PgUsageStore, QuotaEngine, UsageStore};
use podcast_backend::routes;
use podcast_backend::session::{DatabaseSessionResolver, JwtSessionResolver, SessionResolver};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if the session secret for the configured provider is missing
    let provider = *config::SESSION_PROVIDER;
    let session_secret = match provider {
        SessionProvider::Database => config::BETTER_AUTH_SECRET.clone(),
        SessionProvider::Jwt => config::JWT_SECRET.clone(),
    }
    .ok_or_else(|| format!("no session secret configured for provider {}", provider.as_str()))?;
    let plans = config::plan_limits_from_env();

    let pool = PgPoolOptions::new()
        .max_connections(*config::DATABASE_MAX_CONNECTIONS)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let store: Arc<dyn UsageStore> = Arc::new(PgUsageStore::new(pool.clone()));
    let engine = Arc::new(QuotaEngine::new(store, plans));
    let sessions: Arc<dyn SessionResolver> = match provider {
        SessionProvider::Database => Arc::new(DatabaseSessionResolver::new(
            pool.clone(),
            config::SESSION_COOKIE_NAME.as_str(),
            session_secret,
        )),
        SessionProvider::Jwt => Arc::new(JwtSessionResolver::new(&session_secret)),
    };
    tracing::info!(provider = provider.as_str(), "session provider configured");

    scheduler::spawn(
        engine.clone(),
        Duration::from_secs(*config::USAGE_RESET_SCAN_INTERVAL_SECS),
    );

    let cors = CorsLayer::new()
        .allow_origin(config::FRONTEND_URL.parse::<HeaderValue>()?)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = routes::router(engine, sessions)
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .layer(prometheus_layer)
        .layer(Extension(pool.clone()))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
