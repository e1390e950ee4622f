use std::sync::Arc;

use anyhow::Context;

use pdf_sessions::api::session_routes;
use pdf_sessions::config::ServiceConfig;
use pdf_sessions::service::SessionService;
use pdf_sessions::tools::CommandTransformer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env();
    let bind_addr = config.bind_addr;

    eprintln!("📄 PDF Sessions v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Storage: {}", config.storage_root.display());
    eprintln!(
        "   Session TTL: {}s (sweep every {}s)",
        config.session_ttl.as_secs(),
        config.sweep_interval.as_secs()
    );
    eprintln!("   Max concurrent jobs: {}", config.max_concurrent_jobs);

    // ── Service ──────────────────────────────────────────────────────────
    let transformer = Arc::new(CommandTransformer::new(config.toolchain.clone()));
    let service = SessionService::start(config, transformer)
        .await
        .context("Failed to start session service")?;

    // Spawn the expiry sweep
    let _reaper_handle = service.spawn_reaper();

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = session_routes(Arc::clone(&service));
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    eprintln!("   API: http://{}\n", bind_addr);
    tracing::info!(addr = %bind_addr, "Session API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await
        .context("Server error")?;

    Ok(())
}
