use bytes::Bytes;
use std::collections::HashSet;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::Result,
    indicator::IndicatorState,
    transport::{GattResponder, GattResponse, GattStatus, PeripheralEvent},
    types::{CharacteristicProperties, CharacteristicRef, DeviceAddress, LinkConfig},
};

/// Characteristic the peripheral publishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristicDefinition {
    /// Characteristic identifier
    pub uuid: Uuid,
    /// Capability flags
    pub properties: CharacteristicProperties,
}

/// Primary service the peripheral publishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattServiceDefinition {
    /// Service identifier
    pub uuid: Uuid,
    /// Characteristics in registration order
    pub characteristics: Vec<GattCharacteristicDefinition>,
}

struct PeripheralState {
    connected_peers: HashSet<DeviceAddress>,
    characteristic_value: Bytes,
}

/// Peripheral-role session
///
/// Tracks connected remote devices and serves the single target
/// characteristic. Every callback is serialized through one lock, so
/// requests from several peers arriving together cannot lose updates. The
/// indicator is republished on a [`watch`] channel under the same lock.
pub struct PeripheralSession {
    state: Mutex<PeripheralState>,
    indicator: watch::Sender<IndicatorState>,
    characteristic: CharacteristicRef,
}

impl PeripheralSession {
    /// Create a session serving the characteristic named in `config`
    #[must_use]
    pub fn new(config: &LinkConfig) -> Self {
        let (indicator, _) = watch::channel(IndicatorState::Neutral);
        Self {
            state: Mutex::new(PeripheralState {
                connected_peers: HashSet::new(),
                characteristic_value: Bytes::new(),
            }),
            indicator,
            characteristic: config.target(),
        }
    }

    /// Service the transport should register before advertising
    #[must_use]
    pub fn service_definition(&self) -> GattServiceDefinition {
        GattServiceDefinition {
            uuid: self.characteristic.service_id,
            characteristics: vec![GattCharacteristicDefinition {
                uuid: self.characteristic.characteristic_id,
                properties: CharacteristicProperties::all(),
            }],
        }
    }

    /// Current indicator state
    #[must_use]
    pub fn indicator(&self) -> IndicatorState {
        *self.indicator.borrow()
    }

    /// Subscribe to indicator changes
    #[must_use]
    pub fn subscribe_indicator(&self) -> watch::Receiver<IndicatorState> {
        self.indicator.subscribe()
    }

    /// Devices currently connected
    pub async fn connected_peers(&self) -> HashSet<DeviceAddress> {
        self.state.lock().await.connected_peers.clone()
    }

    /// Current characteristic value
    pub async fn characteristic_value(&self) -> Bytes {
        self.state.lock().await.characteristic_value.clone()
    }

    /// Apply a remote connection state change
    pub async fn on_connection_state_change(
        &self,
        peer: &DeviceAddress,
        success: bool,
        connected: bool,
    ) {
        let mut state = self.state.lock().await;

        if !success {
            warn!("Connection state change for {} failed, dropping peer", peer);
            state.connected_peers.remove(peer);
            return;
        }

        if connected {
            info!("Peer {} connected", peer);
            state.connected_peers.insert(peer.clone());
        } else {
            info!("Peer {} disconnected", peer);
            state.connected_peers.remove(peer);
            self.indicator.send_replace(IndicatorState::Neutral);
        }
    }

    /// Serve a read; offset slicing is left to the transport
    pub async fn on_read_request(&self, peer: &DeviceAddress, offset: u16) -> Bytes {
        let state = self.state.lock().await;
        debug!("Read from {} at offset {}", peer, offset);
        state.characteristic_value.clone()
    }

    /// Accept a write and update the indicator
    ///
    /// Returns the acknowledgement payload when `response_needed`.
    pub async fn on_write_request(
        &self,
        peer: &DeviceAddress,
        payload: Bytes,
        response_needed: bool,
    ) -> Option<Bytes> {
        let mut state = self.state.lock().await;

        let indicator = IndicatorState::from_payload(&payload);
        info!("Write from {} sets indicator {}", peer, indicator);

        state.characteristic_value = payload.clone();
        self.indicator.send_replace(indicator);

        response_needed.then_some(payload)
    }

    /// Apply a transport event, answering requests through `responder`
    ///
    /// # Errors
    ///
    /// Returns the responder error if a response could not be delivered.
    pub async fn handle_event(
        &self,
        event: PeripheralEvent,
        responder: &dyn GattResponder,
    ) -> Result<()> {
        match event {
            PeripheralEvent::ConnectionStateChange {
                peer,
                success,
                connected,
            } => {
                self.on_connection_state_change(&peer, success, connected)
                    .await;
                Ok(())
            }
            PeripheralEvent::ReadRequest {
                peer,
                request_id,
                characteristic,
                offset,
            } => {
                let (status, value) = if characteristic == self.characteristic {
                    (
                        GattStatus::Success,
                        self.on_read_request(&peer, offset).await,
                    )
                } else {
                    warn!("Read from {} for unknown {}", peer, characteristic);
                    (GattStatus::InvalidHandle, Bytes::new())
                };

                responder
                    .respond(GattResponse {
                        peer,
                        request_id,
                        status,
                        offset,
                        value,
                    })
                    .await
            }
            PeripheralEvent::WriteRequest {
                peer,
                request_id,
                characteristic,
                value,
                response_needed,
            } => {
                if characteristic != self.characteristic {
                    warn!("Write from {} for unknown {}", peer, characteristic);
                    if !response_needed {
                        return Ok(());
                    }
                    return responder
                        .respond(GattResponse {
                            peer,
                            request_id,
                            status: GattStatus::InvalidHandle,
                            offset: 0,
                            value: Bytes::new(),
                        })
                        .await;
                }

                match self.on_write_request(&peer, value, response_needed).await {
                    Some(ack) => {
                        responder
                            .respond(GattResponse {
                                peer,
                                request_id,
                                status: GattStatus::Success,
                                offset: 0,
                                value: ack,
                            })
                            .await
                    }
                    None => Ok(()),
                }
            }
        }
    }

    /// Consume events until the transport closes its channel
    pub async fn run(
        &self,
        mut events: mpsc::UnboundedReceiver<PeripheralEvent>,
        responder: &dyn GattResponder,
    ) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle_event(event, responder).await {
                warn!("Failed to answer peripheral request: {}", e);
            }
        }

        info!("Peripheral event channel closed");
    }
}
