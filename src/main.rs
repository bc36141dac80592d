use paylink::{
    api::{AppState, Server},
    approval::ApprovalWorkflow,
    automation::AutomationGateway,
    channel::MemoryChannel,
    config::Config,
    registry::Registry,
    scheduler::Dispatcher,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The main entry point for the paylink service.
///
/// This function initializes logging, loads the configuration, opens the
/// registry, starts the job dispatcher in the background and serves the
/// HTTP API until interrupted.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging using tracing_subscriber.
    tracing_subscriber::fmt::init();

    // Load the application configuration from the TOML file.
    let config = Config::load("config/default.toml")?;
    info!(
        "paylink starting: api={}:{}, database={}, offset_cap={}, trusted_owners={}",
        config.api.host,
        config.api.port,
        config.database.url,
        config.payment.amount_offset_cap,
        config.automation.trusted_owners.len()
    );
    if config.automation.secret.is_empty() {
        warn!("No automation secret configured; POST /automation will reject every request");
    }

    // Open the record store; pending payments and timers survive restarts.
    let registry = Arc::new(Registry::connect(&config.database.url).await?);

    // The chat transport plugs in behind the MessageChannel trait.
    warn!("No chat transport configured, using the in-process channel");
    let channel = Arc::new(MemoryChannel::new());

    let workflow = Arc::new(ApprovalWorkflow::new(
        registry.clone(),
        channel,
        &config,
    ));

    // Start the job dispatcher in the background.
    let shutdown = CancellationToken::new();
    let dispatcher = Dispatcher::new(registry.clone(), workflow.clone(), &config.scheduler);
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown.clone()));
    info!("Job dispatcher started");

    let gateway = Arc::new(AutomationGateway::new(
        workflow.clone(),
        config.automation.trusted(),
    ));
    let state = AppState::new(
        gateway,
        registry.clone(),
        config.automation.secret.clone(),
    );
    let server = Server::new(config.api.clone(), state);

    tokio::select! {
        result = server.start() => {
            if let Err(e) = result {
                error!("API server error: {:?}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
    }

    shutdown.cancel();
    if let Err(e) = dispatcher_task.await {
        error!("Job dispatcher task failed: {:?}", e);
    }
    registry.close().await;
    info!("paylink stopped");
    Ok(())
}
