#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Lightlink 💡
//!
//! A Rust library for a two-role Bluetooth Low Energy link that drives a
//! remote indicator light.
//!
//! The **central** role scans for advertisers, auto-connects once to the
//! first device advertising the target service, discovers its services,
//! reads and subscribes to the target characteristic and then plays a timed
//! command sequence: write `RED`, write `GREEN`, disconnect.
//!
//! The **peripheral** role serves that characteristic. It tracks connected
//! devices, answers reads with the last written value and maps each write
//! onto a tri-state [`IndicatorState`] (red, green or neutral).
//!
//! Both roles are pure state machines driven by typed events. The radio is
//! abstracted behind [`CentralTransport`] and [`GattResponder`]; a
//! `btleplug` based central transport is provided in [`ble`].
//!
//! ## Link Details
//!
//! - **Service**: Heart Rate (`0000180D-0000-1000-8000-00805F9B34FB`)
//! - **Characteristic**: Body Sensor Location (`00002A38-0000-1000-8000-00805F9B34FB`),
//!   read | write | notify
//! - **Commands**: UTF-8 `RED` / `GREEN`, exact match; anything else is neutral
//! - **Sequence**: writes at +1s and +2s, disconnect at +3s after the link is
//!   ready, cancelled as soon as the link leaves the ready state
//!
//! ## Quick Start
//!
//! ```no_run
//! use lightlink::{
//!     ble::BleCentral, CentralController, LinkConfig, MemoryFlagStore, SequencerConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LinkConfig::default();
//!     let (transport, events) = BleCentral::new(config.clone()).await?;
//!     let transport = Arc::new(transport);
//!     transport.start_scan().await?;
//!
//!     let controller = CentralController::new(
//!         transport,
//!         Arc::new(MemoryFlagStore::new()),
//!         &config,
//!         &SequencerConfig::default(),
//!     );
//!     controller.run(events).await;
//!
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy central transport
pub mod ble;
/// Central role controller
pub mod central;
/// Error types and handling
pub mod error;
/// Persisted one-shot auto-connect latch
pub mod gate;
/// Indicator state and command payloads
pub mod indicator;
/// Peripheral role session
pub mod peripheral;
/// Scan result deduplication
pub mod registry;
/// Target characteristic lookup
pub mod resolver;
/// Timed command sequence
pub mod sequencer;
/// Central connection state machine
pub mod session;
/// Transport contracts and events
pub mod transport;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use central::CentralController;
pub use error::{LinkError, Result};
pub use gate::{AutoConnectGate, FlagStore, MemoryFlagStore};
pub use indicator::IndicatorState;
pub use peripheral::{GattServiceDefinition, PeripheralSession};
pub use registry::ScanRegistry;
pub use sequencer::CommandSequencer;
pub use session::CentralSession;
pub use transport::{
    CentralEvent, CentralTransport, GattResponder, GattResponse, GattStatus, PeripheralEvent,
};
pub use types::{
    CharacteristicRef, DeviceAddress, DiscoveredTopology, LinkConfig, ScanRecord,
    SequencerConfig, SessionState,
};

use uuid::Uuid;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service the central auto-connects to and the peripheral publishes
///
/// This is the Bluetooth SIG Heart Rate service. Only advertisements that
/// list it among their service identifiers trigger an automatic connection,
/// and the central resolves the target characteristic underneath it.
pub const TARGET_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Characteristic carrying the indicator commands
///
/// The Bluetooth SIG Body Sensor Location characteristic, repurposed: the
/// central reads it, subscribes to it and writes `RED` / `GREEN` to it; the
/// peripheral serves it with read, write and notify properties.
pub const TARGET_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_2a38_0000_1000_8000_0080_5f9b_34fb);

/// Key of the persisted auto-connect flag
///
/// A stored `true` means the one automatic connection attempt has been used;
/// a missing key reads as an open gate.
pub const AUTO_CONNECT_FLAG_KEY: &str = "IS_NEED_START_SCAN_KEY";
