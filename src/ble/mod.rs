//! BLE communication module.
//!
//! This module holds the transport abstraction gloves talk through, the
//! GATT identifier catalog, and the btleplug-backed transport.

pub mod btleplug_transport;
pub mod connection;
pub mod transport;
pub mod uuids;

pub use btleplug_transport::BtleplugTransport;
pub use connection::ConnectionState;
pub use transport::{
    BondedDevice, DeviceAddress, GattCharacteristic, GattService, GattTransport, LinkId,
    TransportError, TransportEvent, TransportResult,
};
pub use uuids::*;
