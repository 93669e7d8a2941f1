use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vitrine_core::{ContainerRuntime, DockerRuntime};
use vitrine_server::{config::Configuration, metrics, startup};

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize configuration and logging
    let configuration = Configuration::new()?;
    let _logging_guard = startup::init_logging(&configuration.logging_config())?;

    metrics::init_metrics();

    let docker_host = configuration.docker_host();
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::new(&docker_host)?);
    info!(docker_host = %docker_host, "container runtime configured");

    let components = startup::build(&configuration, runtime).await?;

    let shutdown = CancellationToken::new();
    startup::spawn_signal_listener(shutdown.clone());

    let cleanup_task = tokio::spawn(
        components
            .cleanup
            .clone()
            .run(configuration.cleanup_interval()?, shutdown.child_token()),
    );

    let server_address = configuration.server_address();
    let server_port = configuration.server_port()?;
    info!("Starting main server on {}:{}", server_address, server_port);
    let server = startup::main_server(components.app_state.clone(), server_address, server_port)?;
    let server_handle = server.handle();

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Main server error: {}", e);
            }
        }
        _ = shutdown.cancelled() => {
            info!("Main server shutting down gracefully");
            server_handle.stop(true).await;
        }
    }

    shutdown.cancel();
    if let Err(e) = cleanup_task.await {
        warn!(error = %e, "cleanup loop ended abnormally");
    }

    components.state.shutdown();
    if let Err(e) = components.session.close().await {
        warn!(error = %e, "failed to revoke session lease");
    }

    info!("Vitrine server stopped");
    Ok(())
}
