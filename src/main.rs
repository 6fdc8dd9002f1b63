use anyhow::Result;
use std::sync::Arc;

use cropdoc::config::Config;
use cropdoc::invoker::{interrupt_channel, InterruptTrigger};
use cropdoc::service::CropDiseaseService;
use cropdoc::{http, metrics};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting crop disease prediction service...");

    metrics::init_metrics();

    let config = Config::load()?;
    tracing::info!(
        model = %config.inference.model_path.display(),
        script = %config.inference.script,
        executable = %config.inference.executable,
        timeout = ?config.inference.timeout,
        "Inference configuration loaded"
    );

    // Raised on shutdown so in-flight inference processes are killed
    let (trigger, interrupt) = interrupt_channel();
    let service = CropDiseaseService::from_config(config.inference.clone())?.with_interrupt(interrupt);

    let app = http::router(Arc::new(service), config.max_upload_bytes);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(trigger))
        .await
        .map_err(|e| anyhow::anyhow!("API server error: {}", e))?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(trigger: InterruptTrigger) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, interrupting in-flight predictions");
    trigger.raise();
}
