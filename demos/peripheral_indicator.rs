use async_trait::async_trait;
use bytes::Bytes;
use lightlink::{
    transport::GattResponder, CharacteristicRef, DeviceAddress, GattResponse, LinkConfig,
    PeripheralEvent, PeripheralSession, Result,
};
use std::time::Duration;
use tokio::{sync::mpsc, time::sleep};
use tracing::info;

/// Responder that only logs what would be sent back over the air
struct LoggingResponder;

#[async_trait]
impl GattResponder for LoggingResponder {
    async fn respond(&self, response: GattResponse) -> Result<()> {
        info!(
            "📤 Response #{} to {}: {:?} {:?}",
            response.request_id, response.peer, response.status, response.value
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("💡 Lightlink Peripheral Example");

    let config = LinkConfig::default();
    let session = PeripheralSession::new(&config);
    let definition = session.service_definition();
    info!(
        "📋 Serving service {} with {} characteristic(s)",
        definition.uuid,
        definition.characteristics.len()
    );

    let mut indicator = session.subscribe_indicator();
    tokio::spawn(async move {
        while indicator.changed().await.is_ok() {
            let state = *indicator.borrow_and_update();
            let [r, g, b] = state.rgb();
            info!("🚦 Indicator {} (#{:02X}{:02X}{:02X})", state, r, g, b);
        }
    });

    // Replay what a central running the command sequence would send
    let (tx, rx) = mpsc::unbounded_channel();
    let peer = DeviceAddress::from("AA:BB:CC:DD:EE:FF");
    let target: CharacteristicRef = config.target();

    tokio::spawn(async move {
        let script = [
            PeripheralEvent::ConnectionStateChange {
                peer: peer.clone(),
                success: true,
                connected: true,
            },
            PeripheralEvent::ReadRequest {
                peer: peer.clone(),
                request_id: 1,
                characteristic: target,
                offset: 0,
            },
            PeripheralEvent::WriteRequest {
                peer: peer.clone(),
                request_id: 2,
                characteristic: target,
                value: Bytes::from_static(b"RED"),
                response_needed: true,
            },
            PeripheralEvent::WriteRequest {
                peer: peer.clone(),
                request_id: 3,
                characteristic: target,
                value: Bytes::from_static(b"GREEN"),
                response_needed: true,
            },
            PeripheralEvent::ConnectionStateChange {
                peer,
                success: true,
                connected: false,
            },
        ];

        for event in script {
            if tx.send(event).is_err() {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    });

    session.run(rx, &LoggingResponder).await;

    info!("✅ Final indicator: {}", session.indicator());
    Ok(())
}
