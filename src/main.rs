use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use gatehouse::core::auth::{
    AuthApiState, AuthService, CredentialVerifier, JwtService, auth_api_router,
};
use gatehouse::core::config::{Config, LogFormat};
use gatehouse::core::db::{AuthStores, create_pool_with_migrations};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    // Load application config from environment variables
    let config = Config::from_env().context("invalid configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    init_tracing(filter, config.log_format);

    if config.uses_dev_secret() {
        tracing::warn!("JWT_SECRET not set, using development secret");
    }

    tracing::info!(
        address = %config.server_address,
        database = config.has_database(),
        trust_proxy_headers = config.trust_proxy_headers,
        access_token_minutes = config.jwt.access_token_expiration_minutes,
        refresh_token_days = config.jwt.refresh_token_expiration_days,
        "Config loaded"
    );

    let stores = match &config.database {
        Some(db_config) => {
            let pool = create_pool_with_migrations(db_config)
                .await
                .context("failed to connect to database")?;
            tracing::info!("Connected to PostgreSQL, migrations applied");
            AuthStores::postgres(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores (data is lost on exit)");
            AuthStores::memory()
        }
    };

    if config.cleanup_interval_secs > 0 {
        spawn_cleanup(stores.clone(), Duration::from_secs(config.cleanup_interval_secs));
    }

    let auth_service = AuthService::new(
        stores,
        JwtService::new(config.jwt.clone()),
        CredentialVerifier::new(config.bcrypt_cost),
    )
    .with_login_throttle(config.max_login_attempts, config.login_attempt_window_minutes);

    let state = AuthApiState::new(auth_service).trust_proxy_headers(config.trust_proxy_headers);
    let app = auth_api_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.server_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server_address))?;
    tracing::info!("listening on http://{}", config.server_address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing(filter: EnvFilter, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Periodically purge expired sessions and refresh tokens
fn spawn_cleanup(stores: AuthStores, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // First tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            match stores.sessions.cleanup_expired().await {
                Ok(n) if n > 0 => tracing::info!(removed = n, "Expired sessions purged"),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Session cleanup failed"),
            }

            match stores.refresh_tokens.cleanup_expired().await {
                Ok(n) if n > 0 => tracing::info!(removed = n, "Expired refresh tokens purged"),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Refresh token cleanup failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
