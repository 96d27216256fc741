//! Contracts between the core and the platform transport.
//!
//! Outbound requests are fire-and-forget: a successful return only means the
//! request was handed to the radio stack. Completions come back later as
//! [`CentralEvent`] / [`PeripheralEvent`] values on a typed channel, in the
//! order the transport observed them.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    error::Result,
    types::{CharacteristicRef, DeviceAddress, DiscoveredTopology, ScanRecord},
};

/// Requests the central role issues to its transport
#[async_trait]
pub trait CentralTransport: Send + Sync {
    /// Start connecting to `address`
    async fn request_connect(&self, address: &DeviceAddress) -> Result<()>;

    /// Tear the current link down
    async fn request_disconnect(&self) -> Result<()>;

    /// Start service discovery on the current link
    async fn request_service_discovery(&self) -> Result<()>;

    /// Read a characteristic; the value arrives as [`CentralEvent::CharacteristicValue`]
    async fn request_read(&self, characteristic: &CharacteristicRef) -> Result<()>;

    /// Write a characteristic
    async fn request_write(&self, characteristic: &CharacteristicRef, value: Bytes) -> Result<()>;

    /// Enable or disable change notifications for a characteristic
    async fn request_subscribe(&self, characteristic: &CharacteristicRef, enabled: bool)
        -> Result<()>;
}

/// Events the transport delivers to the central role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralEvent {
    /// Single advertisement sighting
    Advertisement(ScanRecord),
    /// Batched advertisement sightings
    AdvertisementBatch(Vec<ScanRecord>),
    /// Link-layer connection established
    LinkConnected(DeviceAddress),
    /// Link-layer connection dropped
    LinkDisconnected(DeviceAddress),
    /// Connection attempt failed
    ConnectionFailed {
        /// Device that could not be reached
        address: DeviceAddress,
        /// Transport-provided reason
        reason: String,
    },
    /// Service discovery completed
    ServicesDiscovered(DiscoveredTopology),
    /// Read response or notification
    CharacteristicValue {
        /// Characteristic the value belongs to
        characteristic: CharacteristicRef,
        /// Current value
        value: Bytes,
    },
    /// The consuming screen returned to the foreground
    Restarted,
}

/// Events the transport delivers to the peripheral role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    /// Remote connection state changed
    ConnectionStateChange {
        /// Remote device
        peer: DeviceAddress,
        /// Whether the transport reported success
        success: bool,
        /// New state is connected
        connected: bool,
    },
    /// Remote read of a characteristic
    ReadRequest {
        /// Remote device
        peer: DeviceAddress,
        /// Transport request handle to answer
        request_id: u32,
        /// Characteristic being read
        characteristic: CharacteristicRef,
        /// Read offset
        offset: u16,
    },
    /// Remote write of a characteristic
    WriteRequest {
        /// Remote device
        peer: DeviceAddress,
        /// Transport request handle to answer
        request_id: u32,
        /// Characteristic being written
        characteristic: CharacteristicRef,
        /// Written bytes
        value: Bytes,
        /// Whether the peer expects an acknowledgement
        response_needed: bool,
    },
}

/// ATT status carried by a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    /// Request served
    Success,
    /// No such attribute
    InvalidHandle,
}

/// Response to a peripheral read or write request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattResponse {
    /// Remote device
    pub peer: DeviceAddress,
    /// Request handle being answered
    pub request_id: u32,
    /// Outcome
    pub status: GattStatus,
    /// Offset of `value` within the attribute
    pub offset: u16,
    /// Response payload
    pub value: Bytes,
}

/// Sends responses from the peripheral role back through the transport
#[async_trait]
pub trait GattResponder: Send + Sync {
    /// Deliver a response
    async fn respond(&self, response: GattResponse) -> Result<()>;
}
