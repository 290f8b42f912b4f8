mod config;
mod db;
mod error;
mod models;
mod routes;
mod scraping;

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use clap::Parser;
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::{Command, Config};
use crate::routes::AppState;
use crate::scraping::ScrapeRequest;
use crate::scraping::store::PgJobStore;

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, finishing in-flight requests");
}

async fn readyz(pool: PgPool) -> impl IntoResponse {
    let result: Result<(i32,), _> = sqlx::query_as("SELECT 1").fetch_one(&pool).await;
    match result {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
    }
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ausbildung_scraper=info,tower_http=info"));

    if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(&config.log_format);

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;

    if config.run_migrations {
        tracing::info!("Running database migrations...");
        db::run_migrations(&pool).await?;
        tracing::info!("Migrations complete");
    }

    let settings = config.scraping.settings();

    match config.resolved_command() {
        Command::Serve { listen_addr } => {
            let readyz_pool = pool.clone();
            let app = Router::new()
                .route("/healthz", get(healthz))
                .route("/readyz", get(move || readyz(readyz_pool.clone())))
                .merge(routes::api::router(AppState { pool, settings }))
                .layer(
                    ServiceBuilder::new()
                        .layer(TraceLayer::new_for_http())
                        .layer(CorsLayer::permissive()),
                );

            let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
            tracing::info!("Listening on {listen_addr}");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Command::Scrape(args) => {
            let request = ScrapeRequest::from(args);
            let store = Arc::new(PgJobStore::owned(pool));
            let summary = scraping::scrape(request, settings, store).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
