use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};
use uuid::Uuid;

use crate::{AUTO_CONNECT_FLAG_KEY, TARGET_CHARACTERISTIC_UUID, TARGET_SERVICE_UUID};

/// Opaque device identifier as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Create a new device address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Borrow the address as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One advertisement sighting
///
/// Identity is the `address`; a re-sighting replaces the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Advertising device
    pub address: DeviceAddress,
    /// Advertised local name
    pub display_name: Option<String>,
    /// Signal strength (RSSI)
    pub signal_strength: i16,
    /// Advertised service identifiers
    pub advertised_service_ids: BTreeSet<Uuid>,
}

impl ScanRecord {
    /// Create a new scan record with no advertised services
    pub fn new(address: impl Into<DeviceAddress>, signal_strength: i16) -> Self {
        Self {
            address: address.into(),
            display_name: None,
            signal_strength,
            advertised_service_ids: BTreeSet::new(),
        }
    }

    /// Set the advertised local name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Add an advertised service identifier
    #[must_use]
    pub fn with_service(mut self, service_id: Uuid) -> Self {
        self.advertised_service_ids.insert(service_id);
        self
    }

    /// Check whether the record advertises the given service
    #[must_use]
    pub fn advertises(&self, service_id: &Uuid) -> bool {
        self.advertised_service_ids.contains(service_id)
    }
}

/// Capability flags of a characteristic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    /// Value can be read
    pub read: bool,
    /// Value can be written
    pub write: bool,
    /// Value changes can be notified
    pub notify: bool,
}

impl CharacteristicProperties {
    /// Read, write and notify
    #[must_use]
    pub const fn all() -> Self {
        Self {
            read: true,
            write: true,
            notify: true,
        }
    }
}

/// Reference to a characteristic by its `(service, characteristic)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicRef {
    /// Owning service
    pub service_id: Uuid,
    /// Characteristic identifier
    pub characteristic_id: Uuid,
}

impl CharacteristicRef {
    /// Create a new characteristic reference
    #[must_use]
    pub const fn new(service_id: Uuid, characteristic_id: Uuid) -> Self {
        Self {
            service_id,
            characteristic_id,
        }
    }
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service_id, self.characteristic_id)
    }
}

/// Discovered characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicNode {
    /// Characteristic identifier
    pub characteristic_id: Uuid,
    /// Identifier of the service that owns it
    pub parent_service_id: Uuid,
    /// Capability flags
    pub properties: CharacteristicProperties,
    /// Last known value
    pub value: Bytes,
}

impl CharacteristicNode {
    /// Create a characteristic node with an empty value
    #[must_use]
    pub const fn new(
        characteristic_id: Uuid,
        parent_service_id: Uuid,
        properties: CharacteristicProperties,
    ) -> Self {
        Self {
            characteristic_id,
            parent_service_id,
            properties,
            value: Bytes::new(),
        }
    }

    /// Reference usable with the transport
    #[must_use]
    pub const fn reference(&self) -> CharacteristicRef {
        CharacteristicRef::new(self.parent_service_id, self.characteristic_id)
    }
}

/// Discovered service with its characteristics in discovery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNode {
    /// Service identifier
    pub service_id: Uuid,
    /// Characteristics in discovery order
    pub characteristics: Vec<CharacteristicNode>,
}

/// Services of a remote peer in discovery order
///
/// Replaced wholesale on each discovery event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredTopology {
    services: Vec<ServiceNode>,
}

impl DiscoveredTopology {
    /// Create a topology from services in discovery order
    #[must_use]
    pub const fn new(services: Vec<ServiceNode>) -> Self {
        Self { services }
    }

    /// Services in discovery order
    #[must_use]
    pub fn services(&self) -> &[ServiceNode] {
        &self.services
    }

    /// Check whether nothing was discovered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Mutable access to the first characteristic matching `reference`
    pub fn characteristic_mut(
        &mut self,
        reference: &CharacteristicRef,
    ) -> Option<&mut CharacteristicNode> {
        self.services
            .iter_mut()
            .flat_map(|service| service.characteristics.iter_mut())
            .find(|node| node.reference() == *reference)
    }
}

/// Central connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No connection attempted yet
    Idle,
    /// Connect requested, waiting for the link
    Connecting,
    /// Link up, waiting for service discovery
    Discovering,
    /// Services resolved, reads and writes allowed
    Ready,
    /// Local disconnect requested
    Disconnecting,
    /// Link gone; a new connect may start
    Terminated,
}

impl SessionState {
    /// Whether a live session occupies the process
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Discovering | Self::Ready)
    }

    /// Whether a fresh `connect` is permitted
    #[must_use]
    pub const fn accepts_connect(self) -> bool {
        matches!(self, Self::Idle | Self::Terminated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Link configuration shared by both roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Service to connect to and resolve
    pub service_uuid: Uuid,
    /// Characteristic to read, subscribe and write
    pub characteristic_uuid: Uuid,
    /// Key of the persisted auto-connect flag
    pub auto_connect_key: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Scan timeout in milliseconds
    pub scan_timeout_ms: u64,
}

impl LinkConfig {
    /// Target characteristic reference
    #[must_use]
    pub const fn target(&self) -> CharacteristicRef {
        CharacteristicRef::new(self.service_uuid, self.characteristic_uuid)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service_uuid: TARGET_SERVICE_UUID,
            characteristic_uuid: TARGET_CHARACTERISTIC_UUID,
            auto_connect_key: AUTO_CONNECT_FLAG_KEY.to_string(),
            connect_timeout_ms: 10_000,
            scan_timeout_ms: 10_000,
        }
    }
}

/// Write-sequence timing, offsets measured from activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Offset of the `RED` write in milliseconds
    pub red_at_ms: u64,
    /// Offset of the `GREEN` write in milliseconds
    pub green_at_ms: u64,
    /// Offset of the disconnect in milliseconds
    pub disconnect_at_ms: u64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            red_at_ms: 1_000,
            green_at_ms: 2_000,
            disconnect_at_ms: 3_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(service: u128, characteristic: u128) -> CharacteristicNode {
        CharacteristicNode::new(
            Uuid::from_u128(characteristic),
            Uuid::from_u128(service),
            CharacteristicProperties::all(),
        )
    }

    #[test]
    fn test_scan_record_builder() {
        let record = ScanRecord::new("AA:BB:CC:DD:EE:FF", -60)
            .with_name("Indicator")
            .with_service(TARGET_SERVICE_UUID);

        assert_eq!(record.address.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(record.display_name.as_deref(), Some("Indicator"));
        assert!(record.advertises(&TARGET_SERVICE_UUID));
        assert!(!record.advertises(&TARGET_CHARACTERISTIC_UUID));
    }

    #[test]
    fn test_session_state_predicates() {
        assert!(SessionState::Idle.accepts_connect());
        assert!(SessionState::Terminated.accepts_connect());
        assert!(!SessionState::Ready.accepts_connect());
        assert!(!SessionState::Disconnecting.accepts_connect());

        assert!(SessionState::Connecting.is_live());
        assert!(SessionState::Discovering.is_live());
        assert!(SessionState::Ready.is_live());
        assert!(!SessionState::Disconnecting.is_live());
    }

    #[test]
    fn test_characteristic_mut_updates_value() {
        let mut topology = DiscoveredTopology::new(vec![ServiceNode {
            service_id: Uuid::from_u128(1),
            characteristics: vec![node(1, 10), node(1, 11)],
        }]);

        let reference = CharacteristicRef::new(Uuid::from_u128(1), Uuid::from_u128(11));
        if let Some(node) = topology.characteristic_mut(&reference) {
            node.value = Bytes::from_static(b"RED");
        }

        assert_eq!(
            topology.services()[0].characteristics[1].value,
            Bytes::from_static(b"RED")
        );
        assert!(topology.services()[0].characteristics[0].value.is_empty());
    }

    #[test]
    fn test_link_config_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.service_uuid, TARGET_SERVICE_UUID);
        assert_eq!(config.characteristic_uuid, TARGET_CHARACTERISTIC_UUID);
        assert_eq!(config.auto_connect_key, "IS_NEED_START_SCAN_KEY");
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.scan_timeout_ms, 10_000);
    }

    #[test]
    fn test_sequencer_config_defaults() {
        let config = SequencerConfig::default();
        assert_eq!(config.red_at_ms, 1_000);
        assert_eq!(config.green_at_ms, 2_000);
        assert_eq!(config.disconnect_at_ms, 3_000);
    }
}
