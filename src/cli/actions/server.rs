use crate::auth::{
    rate_limit::{CounterStore, FixedWindowLimiter, MemoryCounterStore, RedisCounterStore},
    store::PgAuthStore,
    AuthConfig, AuthService,
};
use crate::cli::actions::Action;
use crate::email::LogEmailSender;
use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use sqlx::{postgres::PgPoolOptions, Connection, PgPool};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn, Instrument};
use url::Url;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server {
        port,
        dsn,
        redis_url,
        jwt_secret,
        frontend_url,
    } = action;

    let frontend_url = Url::parse(&frontend_url).context("invalid frontend URL")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&dsn)
        .await
        .context("failed to connect to database")?;

    let counters: Arc<dyn CounterStore> = match redis_url {
        Some(url) => Arc::new(RedisCounterStore::connect(&url).await?),
        None => {
            // Counters do not survive restarts and are not shared between
            // instances in this mode.
            warn!("no counter store URL, rate limit counters are in-process");
            Arc::new(MemoryCounterStore::new())
        }
    };

    let config = AuthConfig::new(jwt_secret, frontend_url);
    let auth = Arc::new(AuthService::new(
        Arc::new(PgAuthStore::new(pool.clone())),
        FixedWindowLimiter::new(counters),
        Arc::new(LogEmailSender),
        config,
    ));

    let app = Router::new()
        .route("/health", get(health))
        .layer(Extension(pool))
        .layer(Extension(auth))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;

    info!(port, "listening");

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

// axum handler for health
async fn health(pool: Extension<PgPool>) -> impl IntoResponse {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let database = match pool.0.acquire().instrument(acquire_span).await {
        Ok(mut conn) => {
            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            match conn.ping().instrument(ping_span).await {
                Ok(()) => Ok(()),
                Err(error) => {
                    error!("Failed to ping database: {}", error);
                    Err(StatusCode::SERVICE_UNAVAILABLE)
                }
            }
        }
        Err(error) => {
            error!("Failed to acquire database connection: {}", error);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    };

    let body = Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "database": if database.is_ok() { "ok" } else { "error" },
    }));

    match database {
        Ok(()) => (StatusCode::OK, body),
        Err(status) => (status, body),
    }
}
