use anyhow::{Context, Result};
use facematchd::{build_pipeline, build_router, engine, mailer, AppState, Config};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(directives.as_deref()))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facematchd starting");

    let config = Config::load()?;
    std::fs::create_dir_all(&config.temp_dir)
        .with_context(|| format!("creating temp dir {}", config.temp_dir.display()))?;
    if !config.gallery_root.is_dir() {
        tracing::warn!(
            root = %config.gallery_root.display(),
            "gallery root does not exist; every request will be rejected until it does"
        );
    }

    // Model is loaded once here and injected; fail fast if it is missing.
    let engine = engine::spawn_engine(&config.model_path_str(), config.distance_threshold)?;
    let dispatcher = mailer::dispatcher_from_config(&config);
    let pipeline = build_pipeline(&config, Arc::new(engine), dispatcher);

    let app = build_router(AppState::new(pipeline), config.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "facematchd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("facematchd shutting down");
    Ok(())
}

/// `RUST_LOG` directives as given, or `info` when unset or unparsable.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
