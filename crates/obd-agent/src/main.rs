//! OBD Telemetry Agent - Main Entry Point

use obd_agent::{run, AgentConfig};
use obd_poller::ShutdownHandle;
use telemetry::init_logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::load()?;
    init_logging(&config.logging)?;

    info!("=== OBD Telemetry Agent v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Adapter {:?} on {}", config.adapter.kind, config.adapter.device);

    let shutdown = ShutdownHandle::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.trigger();
        }
    });

    if let Err(e) = run(config, shutdown).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}
