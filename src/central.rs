use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::Result,
    gate::{AutoConnectGate, FlagStore},
    registry::ScanRegistry,
    session::CentralSession,
    transport::{CentralEvent, CentralTransport},
    types::{LinkConfig, ScanRecord, SequencerConfig},
};

/// Central role: scan registry, auto-connect gate and the connection session
///
/// Feed it transport events through [`handle_event`](Self::handle_event) or
/// hand it the receiving end of the transport's event channel with
/// [`run`](Self::run).
pub struct CentralController<T> {
    registry: Arc<Mutex<ScanRegistry>>,
    gate: Arc<AutoConnectGate>,
    session: CentralSession<T>,
    service_uuid: Uuid,
}

impl<T: CentralTransport + 'static> CentralController<T> {
    /// Create a controller over `transport`, persisting the gate in `store`
    pub fn new(
        transport: Arc<T>,
        store: Arc<dyn FlagStore>,
        config: &LinkConfig,
        sequencer: &SequencerConfig,
    ) -> Self {
        Self {
            registry: Arc::new(Mutex::new(ScanRegistry::new())),
            gate: Arc::new(AutoConnectGate::new(store, config.auto_connect_key.clone())),
            session: CentralSession::new(transport, config, sequencer),
            service_uuid: config.service_uuid,
        }
    }

    /// Connection session
    #[must_use]
    pub const fn session(&self) -> &CentralSession<T> {
        &self.session
    }

    /// Auto-connect gate
    #[must_use]
    pub fn gate(&self) -> &AutoConnectGate {
        &self.gate
    }

    /// Snapshot of the scan results in sighting order
    pub async fn scan_results(&self) -> Vec<ScanRecord> {
        self.registry.lock().await.list().to_vec()
    }

    /// Subscribe to scan-result revisions
    pub async fn subscribe_scan_results(&self) -> watch::Receiver<u64> {
        self.registry.lock().await.subscribe()
    }

    /// Route one transport event
    ///
    /// # Errors
    ///
    /// Returns the session error for link events or a refused auto-connect.
    pub async fn handle_event(&self, event: CentralEvent) -> Result<()> {
        match event {
            CentralEvent::Advertisement(record) => {
                let candidate = self.candidate(std::slice::from_ref(&record));
                self.registry.lock().await.upsert(record);
                self.maybe_connect(candidate).await
            }
            CentralEvent::AdvertisementBatch(records) => {
                let candidate = self.candidate(&records);
                self.registry.lock().await.upsert_batch(records);
                self.maybe_connect(candidate).await
            }
            CentralEvent::Restarted => {
                if self.gate.reopen() {
                    info!("Restart signal reopened auto-connect");
                }
                Ok(())
            }
            link => self.session.handle_event(link).await,
        }
    }

    /// Consume events until the transport closes its channel
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<CentralEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle_event(event).await {
                if e.is_absorbed() {
                    debug!("Central event absorbed: {}", e);
                } else {
                    warn!("Central event failed: {}", e);
                }
            }
        }

        info!("Central event channel closed");
    }

    fn candidate(&self, records: &[ScanRecord]) -> Option<ScanRecord> {
        records
            .iter()
            .find(|record| record.advertises(&self.service_uuid))
            .cloned()
    }

    async fn maybe_connect(&self, candidate: Option<ScanRecord>) -> Result<()> {
        let Some(record) = candidate else {
            return Ok(());
        };

        if !self.session.state().accepts_connect() {
            debug!("Session busy, leaving auto-connect gate untouched");
            return Ok(());
        }

        if !self.gate.try_consume() {
            return Ok(());
        }

        info!(
            "Auto-connecting to {} ({})",
            record.address,
            record.display_name.as_deref().unwrap_or("unnamed")
        );
        let result = self.session.connect(&record.address).await;
        if matches!(&result, Err(e) if e.is_absorbed()) {
            self.gate.reopen();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gate::MemoryFlagStore,
        transport::testing::{RecordingTransport, TransportRequest},
        types::{DeviceAddress, SessionState},
        TARGET_SERVICE_UUID,
    };
    use tokio_test::assert_ok;

    fn controller() -> (CentralController<RecordingTransport>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let controller = CentralController::new(
            transport.clone(),
            Arc::new(MemoryFlagStore::new()),
            &LinkConfig::default(),
            &SequencerConfig::default(),
        );
        (controller, transport)
    }

    fn heart_rate(address: &str) -> ScanRecord {
        ScanRecord::new(address, -60)
            .with_name("HR")
            .with_service(TARGET_SERVICE_UUID)
    }

    #[tokio::test]
    async fn test_first_matching_sighting_connects_once() {
        let (controller, transport) = controller();

        assert_ok!(
            controller
                .handle_event(CentralEvent::Advertisement(heart_rate("A")))
                .await
        );
        assert_ok!(
            controller
                .handle_event(CentralEvent::Advertisement(heart_rate("B")))
                .await
        );

        assert_eq!(
            transport.requests(),
            vec![TransportRequest::Connect(DeviceAddress::from("A"))]
        );
        assert_eq!(controller.scan_results().await.len(), 2);
        assert_eq!(controller.session().state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_unrelated_sightings_are_listed_not_connected() {
        let (controller, transport) = controller();

        assert_ok!(
            controller
                .handle_event(CentralEvent::Advertisement(ScanRecord::new("A", -70)))
                .await
        );

        assert!(transport.requests().is_empty());
        assert!(controller.gate().is_open());
        assert_eq!(controller.scan_results().await.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_updates_registry_and_connects() {
        let (controller, transport) = controller();
        let mut revisions = controller.subscribe_scan_results().await;

        assert_ok!(
            controller
                .handle_event(CentralEvent::AdvertisementBatch(vec![
                    ScanRecord::new("A", -70),
                    heart_rate("B"),
                    ScanRecord::new("A", -50),
                ]))
                .await
        );

        assert_ok!(revisions.changed().await);
        let results = controller.scan_results().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].signal_strength, -50);
        assert_eq!(
            transport.requests(),
            vec![TransportRequest::Connect(DeviceAddress::from("B"))]
        );
    }

    #[tokio::test]
    async fn test_restart_reopens_gate_for_next_sighting() {
        let (controller, transport) = controller();

        assert_ok!(
            controller
                .handle_event(CentralEvent::Advertisement(heart_rate("A")))
                .await
        );
        assert_ok!(
            controller
                .handle_event(CentralEvent::LinkDisconnected(DeviceAddress::from("A")))
                .await
        );
        assert_ok!(
            controller
                .handle_event(CentralEvent::Advertisement(heart_rate("A")))
                .await
        );
        assert_eq!(transport.requests().len(), 1);

        assert_ok!(controller.handle_event(CentralEvent::Restarted).await);
        assert_ok!(
            controller
                .handle_event(CentralEvent::Advertisement(heart_rate("A")))
                .await
        );
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_sighting_while_busy_keeps_reopened_gate() {
        let (controller, transport) = controller();

        assert_ok!(
            controller
                .handle_event(CentralEvent::Advertisement(heart_rate("A")))
                .await
        );
        assert_ok!(controller.handle_event(CentralEvent::Restarted).await);
        assert_ok!(
            controller
                .handle_event(CentralEvent::Advertisement(heart_rate("B")))
                .await
        );
        assert!(controller.gate().is_open());
        assert_eq!(controller.session().state(), SessionState::Connecting);

        assert_ok!(
            controller
                .handle_event(CentralEvent::LinkDisconnected(DeviceAddress::from("A")))
                .await
        );
        assert_ok!(
            controller
                .handle_event(CentralEvent::Advertisement(heart_rate("B")))
                .await
        );

        assert_eq!(
            transport.requests(),
            vec![
                TransportRequest::Connect(DeviceAddress::from("A")),
                TransportRequest::Connect(DeviceAddress::from("B")),
            ]
        );
        assert!(!controller.gate().is_open());
    }

    #[tokio::test]
    async fn test_consumed_gate_survives_new_controller() {
        let store: Arc<dyn FlagStore> = Arc::new(MemoryFlagStore::new());
        let transport = Arc::new(RecordingTransport::default());

        let first = CentralController::new(
            transport.clone(),
            store.clone(),
            &LinkConfig::default(),
            &SequencerConfig::default(),
        );
        assert_ok!(
            first
                .handle_event(CentralEvent::Advertisement(heart_rate("A")))
                .await
        );

        let second = CentralController::new(
            transport.clone(),
            store,
            &LinkConfig::default(),
            &SequencerConfig::default(),
        );
        assert_ok!(
            second
                .handle_event(CentralEvent::Advertisement(heart_rate("A")))
                .await
        );

        assert_eq!(transport.requests().len(), 1);
        assert_eq!(second.session().state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let (controller, transport) = controller();
        let (tx, rx) = mpsc::unbounded_channel();

        assert_ok!(tx.send(CentralEvent::Advertisement(heart_rate("A"))));
        assert_ok!(tx.send(CentralEvent::LinkConnected(DeviceAddress::from("A"))));
        drop(tx);

        controller.run(rx).await;

        assert_eq!(controller.session().state(), SessionState::Discovering);
        assert_eq!(transport.requests().len(), 2);
    }
}
