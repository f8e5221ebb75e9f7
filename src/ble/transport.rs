//! Abstract GATT transport.
//!
//! Gloves never talk to a radio directly. They issue fire-and-forget
//! requests through [`GattTransport`], and the transport reports results
//! later as [`TransportEvent`] values delivered to the registry.
//!
//! Every request carries a [`LinkId`] and every event echoes it, so results
//! that belong to an earlier connection attempt can be recognised and dropped.

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::Result;

/// Opaque, stable identifier of a physical BLE device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Create an address from its platform representation.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The platform representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identity of one connection attempt to a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkId {
    /// The device.
    pub address: DeviceAddress,
    /// Incremented on every connect and disconnect of the device.
    pub generation: u64,
}

impl LinkId {
    /// Create a link identity.
    pub fn new(address: DeviceAddress, generation: u64) -> Self {
        Self {
            address,
            generation,
        }
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.address, self.generation)
    }
}

/// A characteristic as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Supports reads.
    pub can_read: bool,
    /// Supports notifications.
    pub can_notify: bool,
}

impl GattCharacteristic {
    /// Create a characteristic description.
    pub fn new(uuid: Uuid, can_read: bool, can_notify: bool) -> Self {
        Self {
            uuid,
            can_read,
            can_notify,
        }
    }
}

/// A service as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics of the service.
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    /// Look up a characteristic by UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

/// A bonded device advertising the requested service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondedDevice {
    /// Device address.
    pub address: DeviceAddress,
    /// Services the device advertises.
    pub service_ids: Vec<Uuid>,
}

/// Failure reported by the transport for an asynchronous request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// Platform status code, if any.
    pub status: Option<i32>,
    /// Human readable reason.
    pub reason: String,
}

impl TransportError {
    /// Create an error with a reason and no status code.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            status: None,
            reason: reason.into(),
        }
    }

    /// Create an error carrying a platform status code.
    pub fn with_status(status: i32, reason: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {})", self.reason, status),
            None => f.write_str(&self.reason),
        }
    }
}

/// Result of an asynchronous transport request.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Events delivered by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Outcome of [`GattTransport::connect`].
    Connected {
        /// The link.
        link: LinkId,
        /// Success or failure.
        result: TransportResult<()>,
    },
    /// The link went down without being asked to.
    Disconnected {
        /// The link.
        link: LinkId,
    },
    /// Outcome of [`GattTransport::discover_services`].
    ServicesDiscovered {
        /// The link.
        link: LinkId,
        /// The discovered services.
        result: TransportResult<Vec<GattService>>,
    },
    /// Outcome of [`GattTransport::read_characteristic`].
    CharacteristicRead {
        /// The link.
        link: LinkId,
        /// Characteristic that was read.
        characteristic: Uuid,
        /// The value.
        result: TransportResult<Bytes>,
    },
    /// Outcome of [`GattTransport::write_descriptor`].
    DescriptorWritten {
        /// The link.
        link: LinkId,
        /// Characteristic owning the descriptor.
        characteristic: Uuid,
        /// Descriptor that was written.
        descriptor: Uuid,
        /// Success or failure.
        result: TransportResult<()>,
    },
    /// A notification from a subscribed characteristic.
    CharacteristicChanged {
        /// The link.
        link: LinkId,
        /// Service owning the characteristic.
        service: Uuid,
        /// Characteristic that changed.
        characteristic: Uuid,
        /// The new value.
        value: Bytes,
    },
}

impl TransportEvent {
    /// The link this event belongs to.
    pub fn link(&self) -> &LinkId {
        match self {
            Self::Connected { link, .. }
            | Self::Disconnected { link }
            | Self::ServicesDiscovered { link, .. }
            | Self::CharacteristicRead { link, .. }
            | Self::DescriptorWritten { link, .. }
            | Self::CharacteristicChanged { link, .. } => link,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "Connected",
            Self::Disconnected { .. } => "Disconnected",
            Self::ServicesDiscovered { .. } => "ServicesDiscovered",
            Self::CharacteristicRead { .. } => "CharacteristicRead",
            Self::DescriptorWritten { .. } => "DescriptorWritten",
            Self::CharacteristicChanged { .. } => "CharacteristicChanged",
        }
    }
}

/// GATT client capability provided by the platform.
///
/// Request methods return immediately; their results arrive later as
/// [`TransportEvent`]s carrying the same [`LinkId`]. Events must never be
/// delivered from inside a request method: gloves issue requests while
/// holding their own state lock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GattTransport: Send + Sync {
    /// Open a link. Answered by [`TransportEvent::Connected`].
    fn connect(&self, link: &LinkId);

    /// Discover services. Answered by [`TransportEvent::ServicesDiscovered`].
    fn discover_services(&self, link: &LinkId);

    /// Read a characteristic. Answered by [`TransportEvent::CharacteristicRead`].
    fn read_characteristic(&self, link: &LinkId, service: Uuid, characteristic: Uuid);

    /// Enable or disable local delivery of notifications for a characteristic.
    fn set_notification(
        &self,
        link: &LinkId,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<()>;

    /// Write a descriptor. Answered by [`TransportEvent::DescriptorWritten`].
    fn write_descriptor(
        &self,
        link: &LinkId,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Bytes,
    );

    /// Close a link. The link is retired at once and no
    /// [`TransportEvent::Disconnected`] is reported for it.
    fn disconnect(&self, link: &LinkId);

    /// List bonded devices that advertise `service`.
    async fn list_bonded_devices_advertising(&self, service: Uuid) -> Result<Vec<BondedDevice>>;
}
