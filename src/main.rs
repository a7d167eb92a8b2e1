mod config;
mod db;
mod error;
mod models;
mod routes;
mod services;
mod state;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")))
        .init();

    let config = config::AppConfig::from_env().expect("invalid configuration");
    let jwt = services::auth::JwtVerifier::from_config(&config.jwt).expect("invalid JWT key");

    let pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("database init failed");

    // Spawn background subscription expiry sweep.
    let _sweeper = config
        .subscription_sweeper_enabled
        .then(|| services::subscriptions::spawn_expiry_task(pool.clone(), config.subscription_sweep_secs));

    let port = config.port;
    let state = state::AppState::new(pool, config, jwt);
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "gymbook listening");
    axum::serve(listener, app).await.expect("server failed");
}
