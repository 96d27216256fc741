use async_trait::async_trait;
use btleplug::{
    api::{
        CharPropFlags, Central, CentralEvent as AdapterEvent, Characteristic, Manager as _,
        Peripheral as _, PeripheralProperties, ScanFilter, Service, WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::{LinkError, Result},
    transport::{CentralEvent, CentralTransport},
    types::{
        CharacteristicNode, CharacteristicProperties, CharacteristicRef, DeviceAddress,
        DiscoveredTopology, LinkConfig, ScanRecord, ServiceNode,
    },
};

/// Central transport backed by the host Bluetooth adapter
///
/// Requests return as soon as the work is spawned; results are posted to the
/// event channel handed out by [`BleCentral::new`].
pub struct BleCentral {
    adapter: Adapter,
    events: mpsc::UnboundedSender<CentralEvent>,
    peripherals: Arc<Mutex<HashMap<DeviceAddress, Peripheral>>>,
    connected: Arc<Mutex<Option<Peripheral>>>,
    config: LinkConfig,
}

impl BleCentral {
    /// Open the first Bluetooth adapter
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::DeviceNotFound`] if no Bluetooth adapters are available,
    /// or [`LinkError::Ble`] if the adapter cannot be initialized.
    pub async fn new(
        config: LinkConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CentralEvent>)> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(LinkError::DeviceNotFound)?;

        let (events, receiver) = mpsc::unbounded_channel();

        Ok((
            Self {
                adapter,
                events,
                peripherals: Arc::new(Mutex::new(HashMap::new())),
                connected: Arc::new(Mutex::new(None)),
                config,
            },
            receiver,
        ))
    }

    /// Start scanning and forwarding adapter events
    ///
    /// Every advertisement is forwarded; filtering on the target service is
    /// the controller's job so the scan list shows all nearby devices.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Ble`] if the scan cannot be started.
    pub async fn start_scan(&self) -> Result<JoinHandle<()>> {
        info!("Starting BLE scan");

        let mut adapter_events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();
        let events = self.events.clone();

        Ok(tokio::spawn(async move {
            while let Some(event) = adapter_events.next().await {
                let forwarded = match event {
                    AdapterEvent::DeviceDiscovered(id) | AdapterEvent::DeviceUpdated(id) => {
                        let Ok(peripheral) = adapter.peripheral(&id).await else {
                            continue;
                        };
                        let Ok(Some(properties)) = peripheral.properties().await else {
                            continue;
                        };

                        let record = scan_record(&properties);
                        peripherals
                            .lock()
                            .await
                            .insert(record.address.clone(), peripheral);
                        CentralEvent::Advertisement(record)
                    }
                    AdapterEvent::DeviceDisconnected(id) => {
                        let Ok(peripheral) = adapter.peripheral(&id).await else {
                            continue;
                        };
                        CentralEvent::LinkDisconnected(address_of(&peripheral))
                    }
                    other => {
                        debug!("Ignoring adapter event {:?}", other);
                        continue;
                    }
                };

                if events.send(forwarded).is_err() {
                    break;
                }
            }

            debug!("Adapter event stream finished");
        }))
    }

    /// Scan for the configured scan timeout, then stop
    ///
    /// The returned pump keeps forwarding adapter events (disconnects in
    /// particular) after the scan itself has stopped.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Ble`] if the scan cannot be started or stopped.
    pub async fn scan_for_timeout(&self) -> Result<JoinHandle<()>> {
        let pump = self.start_scan().await?;
        tokio::time::sleep(Duration::from_millis(self.config.scan_timeout_ms)).await;
        self.stop_scan().await?;
        Ok(pump)
    }

    /// Stop scanning
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Ble`] if the adapter rejects the request.
    pub async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        info!("BLE scan stopped");
        Ok(())
    }

    async fn current(&self) -> Result<Peripheral> {
        self.connected
            .lock()
            .await
            .clone()
            .ok_or_else(|| LinkError::precondition("no connected peripheral"))
    }

    async fn characteristic(
        &self,
        reference: &CharacteristicRef,
    ) -> Result<(Peripheral, Characteristic)> {
        let peripheral = self.current().await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| {
                c.service_uuid == reference.service_id && c.uuid == reference.characteristic_id
            })
            .ok_or_else(|| {
                LinkError::precondition(format!("characteristic {reference} not discovered"))
            })?;
        Ok((peripheral, characteristic))
    }
}

#[async_trait]
impl CentralTransport for BleCentral {
    async fn request_connect(&self, address: &DeviceAddress) -> Result<()> {
        let peripheral = self
            .peripherals
            .lock()
            .await
            .get(address)
            .cloned()
            .ok_or(LinkError::DeviceNotFound)?;

        *self.connected.lock().await = Some(peripheral.clone());

        let events = self.events.clone();
        let address = address.clone();
        let timeout_ms = self.config.connect_timeout_ms;

        tokio::spawn(async move {
            let event = match timeout(Duration::from_millis(timeout_ms), peripheral.connect()).await
            {
                Ok(Ok(())) => CentralEvent::LinkConnected(address),
                Ok(Err(e)) => CentralEvent::ConnectionFailed {
                    address,
                    reason: e.to_string(),
                },
                Err(_) => CentralEvent::ConnectionFailed {
                    address,
                    reason: LinkError::Timeout { timeout_ms }.to_string(),
                },
            };
            let _ = events.send(event);
        });

        Ok(())
    }

    async fn request_disconnect(&self) -> Result<()> {
        let Some(peripheral) = self.connected.lock().await.take() else {
            return Err(LinkError::precondition("no connected peripheral"));
        };

        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Disconnect failed: {}", e);
            }
            let _ = events.send(CentralEvent::LinkDisconnected(address_of(&peripheral)));
        });

        Ok(())
    }

    async fn request_service_discovery(&self) -> Result<()> {
        let peripheral = self.current().await?;
        let events = self.events.clone();

        tokio::spawn(async move {
            match peripheral.discover_services().await {
                Ok(()) => {
                    let topology = topology(&peripheral.services());
                    info!("Discovered {} service(s)", topology.services().len());
                    let _ = events.send(CentralEvent::ServicesDiscovered(topology));
                }
                Err(e) => {
                    error!("Service discovery failed: {}", e);
                    if let Err(e) = peripheral.disconnect().await {
                        warn!("Disconnect after failed discovery failed: {}", e);
                    }
                    let _ = events.send(CentralEvent::LinkDisconnected(address_of(&peripheral)));
                }
            }
        });

        Ok(())
    }

    async fn request_read(&self, characteristic: &CharacteristicRef) -> Result<()> {
        let (peripheral, target) = self.characteristic(characteristic).await?;
        let events = self.events.clone();
        let reference = *characteristic;

        tokio::spawn(async move {
            match peripheral.read(&target).await {
                Ok(value) => {
                    let _ = events.send(CentralEvent::CharacteristicValue {
                        characteristic: reference,
                        value: Bytes::from(value),
                    });
                }
                Err(e) => warn!("Read of {} failed: {}", reference, e),
            }
        });

        Ok(())
    }

    async fn request_write(&self, characteristic: &CharacteristicRef, value: Bytes) -> Result<()> {
        let (peripheral, target) = self.characteristic(characteristic).await?;
        debug!("Writing {:02X?} to {}", &value[..], characteristic);

        tokio::spawn(async move {
            if let Err(e) = peripheral
                .write(&target, &value, WriteType::WithResponse)
                .await
            {
                warn!("Write failed: {}", e);
            }
        });

        Ok(())
    }

    async fn request_subscribe(
        &self,
        characteristic: &CharacteristicRef,
        enabled: bool,
    ) -> Result<()> {
        let (peripheral, target) = self.characteristic(characteristic).await?;
        let reference = *characteristic;

        if !enabled {
            tokio::spawn(async move {
                if let Err(e) = peripheral.unsubscribe(&target).await {
                    warn!("Unsubscribe from {} failed: {}", reference, e);
                }
            });
            return Ok(());
        }

        let events = self.events.clone();
        tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Notification stream for {} unavailable: {}", reference, e);
                    return;
                }
            };
            if let Err(e) = peripheral.subscribe(&target).await {
                warn!("Subscribe to {} failed: {}", reference, e);
                return;
            }
            debug!("Subscribed to {}", reference);

            while let Some(data) = notifications.next().await {
                if data.uuid != reference.characteristic_id {
                    continue;
                }
                let event = CentralEvent::CharacteristicValue {
                    characteristic: reference,
                    value: Bytes::from(data.value),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        });

        Ok(())
    }
}

fn address_of(peripheral: &Peripheral) -> DeviceAddress {
    DeviceAddress::new(peripheral.address().to_string())
}

fn scan_record(properties: &PeripheralProperties) -> ScanRecord {
    let mut record = ScanRecord::new(
        properties.address.to_string(),
        properties.rssi.unwrap_or(0),
    );
    record.display_name.clone_from(&properties.local_name);
    record.advertised_service_ids = properties.services.iter().copied().collect();
    record
}

fn topology(services: &BTreeSet<Service>) -> DiscoveredTopology {
    DiscoveredTopology::new(
        services
            .iter()
            .map(|service| ServiceNode {
                service_id: service.uuid,
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|c| {
                        CharacteristicNode::new(c.uuid, service.uuid, properties(c.properties))
                    })
                    .collect(),
            })
            .collect(),
    )
}

fn properties(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TARGET_CHARACTERISTIC_UUID, TARGET_SERVICE_UUID};
    use btleplug::api::BDAddr;
    use uuid::Uuid;

    fn characteristic(uuid: Uuid, service_uuid: Uuid, flags: CharPropFlags) -> Characteristic {
        Characteristic {
            uuid,
            service_uuid,
            properties: flags,
            descriptors: BTreeSet::new(),
        }
    }

    #[test]
    fn test_property_flags_mapping() {
        let all = properties(CharPropFlags::READ | CharPropFlags::WRITE | CharPropFlags::NOTIFY);
        assert_eq!(all, CharacteristicProperties::all());

        let indicate_only = properties(CharPropFlags::INDICATE);
        assert!(indicate_only.notify);
        assert!(!indicate_only.read);
        assert!(!indicate_only.write);

        assert!(properties(CharPropFlags::WRITE_WITHOUT_RESPONSE).write);
    }

    #[test]
    fn test_topology_conversion_keeps_parent_service() {
        let services = BTreeSet::from([Service {
            uuid: TARGET_SERVICE_UUID,
            primary: true,
            characteristics: BTreeSet::from([characteristic(
                TARGET_CHARACTERISTIC_UUID,
                TARGET_SERVICE_UUID,
                CharPropFlags::READ | CharPropFlags::NOTIFY,
            )]),
        }]);

        let topology = topology(&services);
        let target = CharacteristicRef::new(TARGET_SERVICE_UUID, TARGET_CHARACTERISTIC_UUID);
        let node = crate::resolver::resolve(&topology, &target);

        assert!(node.is_some_and(|n| n.properties.read && !n.properties.write));
    }

    #[test]
    fn test_scan_record_from_properties() {
        let properties = PeripheralProperties {
            address: BDAddr::from([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
            local_name: Some("Polar H10".to_string()),
            rssi: Some(-58),
            services: vec![TARGET_SERVICE_UUID],
            ..PeripheralProperties::default()
        };

        let record = scan_record(&properties);
        assert_eq!(record.address.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(record.display_name.as_deref(), Some("Polar H10"));
        assert_eq!(record.signal_strength, -58);
        assert!(record.advertises(&TARGET_SERVICE_UUID));
    }
}
