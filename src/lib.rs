// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # glove-ble
//!
//! A cross-platform Rust driver for wearable sensor gloves connected over
//! Bluetooth Low Energy.
//!
//! Each glove streams an orientation quaternion, raw acceleration and five
//! finger flex values. This crate discovers bonded gloves, brings each one
//! through its connection sequence, decodes the report stream and publishes
//! a snapshot per glove that can be read at any time.
//!
//! ## Features
//!
//! - **Glove Discovery**: Enumerate bonded devices advertising the glove service
//! - **Automatic Reconnect**: Dropped gloves keep their index and calibration
//! - **Handedness**: Finger order is normalized for left and right gloves
//! - **Orientation Math**: Euler angles, gravity and linear acceleration
//! - **Sensor Fusion**: Optional external engine combining compass and IMU data
//! - **Pluggable Transport**: Run against btleplug or any [`GattTransport`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use glove_ble::{BtleplugTransport, FusionBridge, GloveRegistry, RegistryConfig, Result, UuidCatalog};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // The transport reports results through this channel
//!     let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//!     let transport = Arc::new(BtleplugTransport::new(tx).await?);
//!
//!     let registry = Arc::new(GloveRegistry::new(
//!         transport,
//!         UuidCatalog::default(),
//!         FusionBridge::Unavailable,
//!         RegistryConfig::default(),
//!     ));
//!     registry.start(rx);
//!
//!     // Wait for gloves to connect
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     for index in 0..registry.count() {
//!         let state = registry.get(index)?;
//!         let euler = state.euler().to_degrees();
//!         println!(
//!             "Glove {}: roll {:.1} pitch {:.1} yaw {:.1}",
//!             index, euler.x, euler.y, euler.z
//!         );
//!     }
//!
//!     registry.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod fusion;
pub mod glove;
pub mod protocol;
pub mod registry;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::RegistryConfig;
pub use error::{Error, Result};
pub use fusion::{FusionBridge, SensorFusion};
pub use glove::{Glove, GloveOutcome};
pub use registry::{EventOutcome, GloveListener, GloveRegistry, GloveUpdate};

// Re-export commonly used types from submodules
pub use ble::btleplug_transport::BtleplugTransport;
pub use ble::connection::ConnectionState;
pub use ble::transport::{DeviceAddress, GattTransport, LinkId, TransportEvent};
pub use ble::uuids::UuidCatalog;
pub use data::{
    CalibrationFlags, FingerFlex, GloveState, Handedness, Quaternion, Vector3, FINGER_COUNT,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<GloveRegistry>();
        let _ = std::any::TypeId::of::<BtleplugTransport>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<GloveState>();
        let _ = std::any::TypeId::of::<Quaternion>();
        let _ = std::any::TypeId::of::<RegistryConfig>();
        let _ = std::any::TypeId::of::<FusionBridge>();
    }

    #[test]
    fn test_identity_orientation() {
        let state = GloveState::new(DeviceAddress::new("00:00"));
        assert_eq!(state.euler(), Vector3::ZERO);
        assert_eq!(state.gravity(), Vector3::new(0.0, 0.0, 1.0));
    }
}
