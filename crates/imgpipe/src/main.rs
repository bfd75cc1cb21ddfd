use imgpipe::config::load_dotenv;
use imgpipe::{telemetry, Environment, Pipeline, Settings};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    load_dotenv();
    let settings = Settings::from_env()?;
    let environment = Environment::current();
    telemetry::init(settings.log_format, environment.default_log_level())?;

    tracing::info!(
        environment = %environment,
        workers = settings.worker_concurrency,
        ws_bind = %settings.ws_bind,
        "Starting imgpipe"
    );

    let pipeline = Pipeline::from_settings(settings)?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            tracing::info!("Shutdown signal received, draining in-flight jobs");
            shutdown.cancel();
        }
    });

    pipeline.run(shutdown).await?;
    tracing::info!("imgpipe stopped");
    Ok(())
}
