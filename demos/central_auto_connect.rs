use lightlink::{
    ble::BleCentral, CentralController, LinkConfig, MemoryFlagStore, Result, SequencerConfig,
};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("💡 Lightlink Central Example");

    let config = LinkConfig::default();
    let (transport, events) = match BleCentral::new(config.clone()).await {
        Ok(opened) => opened,
        Err(e) => {
            error!("❌ Failed to open Bluetooth adapter: {}", e);
            return Err(e);
        }
    };
    let transport = Arc::new(transport);

    let controller = Arc::new(CentralController::new(
        transport.clone(),
        Arc::new(MemoryFlagStore::new()),
        &config,
        &SequencerConfig::default(),
    ));

    // Print every state change of the connection
    let mut states = controller.session().subscribe_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            info!("🔗 Session state: {}", *states.borrow_and_update());
        }
    });

    let runner = controller.clone();
    let driver = tokio::spawn(async move { runner.run(events).await });

    info!(
        "🔍 Scanning for {} ({} ms)...",
        config.service_uuid, config.scan_timeout_ms
    );
    let pump = transport.scan_for_timeout().await?;
    info!("✅ Scan finished, press Ctrl-C to exit");

    tokio::signal::ctrl_c().await.ok();
    info!("🛑 Stopping");

    pump.abort();
    driver.abort();

    for record in controller.scan_results().await {
        info!(
            "  {} {} ({} dBm)",
            record.address,
            record.display_name.as_deref().unwrap_or("-"),
            record.signal_strength
        );
    }

    Ok(())
}
