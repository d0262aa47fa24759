use anyhow::{Context, Result};
use chrono::Utc;
use reel_renderer::{router, AppState, Config, JobRegistry};
use std::{net::SocketAddr, sync::Arc};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Arc::new(Config::from_env());
    config.ensure_dirs().await.context("creating working directories")?;
    info!(
        upload_dir = %config.upload_dir.display(),
        output_dir = %config.output_dir.display(),
        jobs_file = %config.jobs_file.display(),
        "configuration loaded"
    );

    let registry = Arc::new(JobRegistry::restore(config.jobs_file.clone(), config.job_retention).await);
    registry.sweep(Utc::now()).await;
    spawn_sweeper(registry.clone(), config.sweep_interval);

    let state = AppState::new(config.clone(), registry).context("building http client")?;
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    info!(?addr, "reel renderer listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
    if json {
        tracing_subscriber::registry().with(fmt::layer().json()).with(filter).init();
    } else {
        tracing_subscriber::registry().with(fmt::layer().with_target(true)).with(filter).init();
    }
}

/// Expire old jobs even when nobody polls.
fn spawn_sweeper(registry: Arc<JobRegistry>, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            registry.sweep(Utc::now()).await;
        }
    });
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("ctrl-c handler unavailable, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
