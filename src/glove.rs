//! Glove connection.
//!
//! Represents a single glove and drives it through the connection state
//! machine: connect, discover services, subscribe to reports and read the
//! calibration flags, then decode every report notification into a new
//! [`GloveState`] snapshot.

use bytes::Bytes;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::connection::ConnectionState;
use crate::ble::transport::{
    DeviceAddress, GattService, GattTransport, LinkId, TransportError, TransportEvent,
};
use crate::ble::uuids::{UuidCatalog, ENABLE_NOTIFICATION_VALUE};
use crate::data::glove_state::{CalibrationFlags, GloveState};
use crate::fusion::FusionBridge;
use crate::protocol::report::{parse_calibration, parse_compass, PrimaryReport};

/// What handling a transport event did to a glove.
#[derive(Debug, Clone, PartialEq)]
pub enum GloveOutcome {
    /// The event was stale, out of order or carried a bad payload.
    Ignored,
    /// Connection state moved (or a pending step completed).
    StateChanged(ConnectionState),
    /// A new report was decoded while ready.
    Updated(Arc<GloveState>),
    /// The device lacks the glove service or a required characteristic.
    NotAGlove,
}

/// Requests issued after service discovery and not yet answered.
#[derive(Debug, Default, Clone, Copy)]
struct Pending {
    calibration_read: bool,
    report_subscription: bool,
    compass_subscription: bool,
}

impl Pending {
    fn is_empty(&self) -> bool {
        !(self.calibration_read || self.report_subscription || self.compass_subscription)
    }
}

/// Mutable machine state, guarded by one lock.
struct Machine {
    generation: u64,
    /// Service cache, kept across reconnects.
    services: Vec<GattService>,
    pending: Pending,
    /// Working copy of the published snapshot.
    current: GloveState,
}

impl Machine {
    fn state(&self) -> ConnectionState {
        self.current.connection_state
    }
}

/// A single glove and its connection state machine.
pub struct Glove {
    /// Device address.
    address: DeviceAddress,
    /// Identifier catalog.
    catalog: UuidCatalog,
    /// Transport used for all requests.
    transport: Arc<dyn GattTransport>,
    /// Shared fusion engine.
    fusion: Arc<RwLock<FusionBridge>>,
    /// Machine state.
    machine: Mutex<Machine>,
    /// Latest published snapshot.
    snapshot: RwLock<Arc<GloveState>>,
}

impl Glove {
    /// Create a disconnected glove.
    pub(crate) fn new(
        address: DeviceAddress,
        catalog: UuidCatalog,
        transport: Arc<dyn GattTransport>,
        fusion: Arc<RwLock<FusionBridge>>,
    ) -> Self {
        let initial = GloveState::new(address.clone());

        Self {
            address,
            catalog,
            transport,
            fusion,
            machine: Mutex::new(Machine {
                generation: 0,
                services: Vec::new(),
                pending: Pending::default(),
                current: initial.clone(),
            }),
            snapshot: RwLock::new(Arc::new(initial)),
        }
    }

    // === Identification ===

    /// Get the device address.
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Identity of the current (or last) connection attempt.
    pub fn link(&self) -> LinkId {
        LinkId::new(self.address.clone(), self.machine.lock().generation)
    }

    // === State ===

    /// Latest snapshot. Never blocks on I/O.
    pub fn state(&self) -> Arc<GloveState> {
        self.snapshot.read().clone()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.snapshot.read().connection_state
    }

    /// Calibration flags, once learned.
    pub fn calibration(&self) -> Option<CalibrationFlags> {
        self.snapshot.read().calibration
    }

    /// Check if the device was rejected as not being a glove.
    pub fn is_excluded(&self) -> bool {
        self.snapshot.read().excluded
    }

    // === Connection ===

    /// Start a connection attempt.
    ///
    /// Returns `false` without doing anything when the glove is already
    /// connected or connecting, or was excluded as not being a glove.
    pub fn connect(&self) -> bool {
        let mut m = self.machine.lock();

        if m.current.excluded {
            trace!("Not connecting {}: excluded", self.address);
            return false;
        }

        if m.state().is_active() {
            trace!("Not connecting {}: already {}", self.address, m.state());
            return false;
        }

        m.generation += 1;
        m.pending = Pending::default();
        let link = LinkId::new(self.address.clone(), m.generation);

        info!("Connecting to glove {}", link);
        self.set_state(&mut m, ConnectionState::Connecting);
        self.transport.connect(&link);

        true
    }

    /// Disconnect the glove.
    ///
    /// In-flight results of the current link are discarded when they arrive.
    pub fn disconnect(&self) {
        let mut m = self.machine.lock();

        if !m.state().is_active() {
            return;
        }

        let link = LinkId::new(self.address.clone(), m.generation);
        info!("Disconnecting from glove {}", link);

        self.drop_link(&mut m);
        self.transport.disconnect(&link);
    }

    /// Feed a transport event into the state machine.
    pub fn handle_event(&self, event: &TransportEvent) -> GloveOutcome {
        let mut m = self.machine.lock();

        let link = event.link();
        if link.address != self.address || link.generation != m.generation {
            trace!(
                "Dropping stale {} for {} (current generation {})",
                event.kind(),
                link,
                m.generation
            );
            return GloveOutcome::Ignored;
        }

        match event {
            TransportEvent::Connected { result, .. } => self.on_connected(&mut m, link, result),
            TransportEvent::Disconnected { .. } => {
                if !m.state().is_active() {
                    return GloveOutcome::Ignored;
                }
                info!("Glove {} disconnected", link);
                self.drop_link(&mut m);
                GloveOutcome::StateChanged(ConnectionState::Disconnected)
            }
            TransportEvent::ServicesDiscovered { result, .. } => {
                if m.state() != ConnectionState::ServicesDiscovering {
                    return GloveOutcome::Ignored;
                }
                match result {
                    Ok(services) => {
                        debug!("Discovered {} services on {}", services.len(), link);
                        m.services = services.clone();
                        self.on_services(&mut m, link)
                    }
                    Err(e) => self.fail(&mut m, link, "service discovery", e),
                }
            }
            TransportEvent::CharacteristicRead {
                characteristic,
                result,
                ..
            } => self.on_read(&mut m, link, characteristic, result),
            TransportEvent::DescriptorWritten {
                characteristic,
                descriptor,
                result,
                ..
            } => self.on_descriptor_written(&mut m, link, characteristic, descriptor, result),
            TransportEvent::CharacteristicChanged {
                characteristic,
                value,
                ..
            } => self.on_notification(&mut m, characteristic, value),
        }
    }

    // === Internal ===

    fn on_connected(
        &self,
        m: &mut Machine,
        link: &LinkId,
        result: &Result<(), TransportError>,
    ) -> GloveOutcome {
        if m.state() != ConnectionState::Connecting {
            return GloveOutcome::Ignored;
        }

        if let Err(e) = result {
            return self.fail(m, link, "connect", e);
        }

        if m.services.is_empty() {
            self.set_state(m, ConnectionState::ServicesDiscovering);
            self.transport.discover_services(link);
            GloveOutcome::StateChanged(ConnectionState::ServicesDiscovering)
        } else {
            debug!("Using cached services for {}", link);
            self.on_services(m, link)
        }
    }

    /// Validate the service table and issue the calibration read and subscriptions.
    fn on_services(&self, m: &mut Machine, link: &LinkId) -> GloveOutcome {
        let service_id = self.catalog.service_id();
        let report_id = self.catalog.report_characteristic_id();
        let compass_id = self.catalog.compass_characteristic_id();
        let calibration_id = self.catalog.calibration_characteristic_id();

        let service = m.services.iter().find(|s| s.uuid == service_id).cloned();
        let Some(service) = service else {
            return self.not_a_glove(m, link, "glove service missing");
        };

        let has_report = service
            .characteristic(&report_id)
            .map(|c| c.can_notify)
            .unwrap_or(false);
        let has_calibration = service.characteristic(&calibration_id).is_some();
        let has_compass = service
            .characteristic(&compass_id)
            .map(|c| c.can_notify)
            .unwrap_or(false);

        if !has_report {
            return self.not_a_glove(m, link, "report characteristic missing");
        }
        if !has_calibration {
            return self.not_a_glove(m, link, "calibration characteristic missing");
        }

        m.pending = Pending {
            calibration_read: m.current.calibration.is_none(),
            report_subscription: true,
            compass_subscription: has_compass,
        };
        self.set_state(m, ConnectionState::AwaitingCalibration);

        if m.pending.calibration_read {
            self.transport
                .read_characteristic(link, service_id, calibration_id);
        }

        if let Err(e) = self.subscribe(link, report_id) {
            return self.fail(m, link, "report subscription", &TransportError::new(e.to_string()));
        }

        if has_compass {
            if let Err(e) = self.subscribe(link, compass_id) {
                warn!("Compass unavailable on {}: {}", link, e);
                m.pending.compass_subscription = false;
            }
        }

        GloveOutcome::StateChanged(ConnectionState::AwaitingCalibration)
    }

    fn subscribe(&self, link: &LinkId, characteristic: Uuid) -> crate::Result<()> {
        let service_id = self.catalog.service_id();

        self.transport
            .set_notification(link, service_id, characteristic, true)?;
        self.transport.write_descriptor(
            link,
            service_id,
            characteristic,
            self.catalog.client_config_descriptor_id(),
            Bytes::from_static(&ENABLE_NOTIFICATION_VALUE),
        );

        Ok(())
    }

    fn on_read(
        &self,
        m: &mut Machine,
        link: &LinkId,
        characteristic: &Uuid,
        result: &Result<Bytes, TransportError>,
    ) -> GloveOutcome {
        if m.state() != ConnectionState::AwaitingCalibration
            || !m.pending.calibration_read
            || *characteristic != self.catalog.calibration_characteristic_id()
        {
            return GloveOutcome::Ignored;
        }

        let value = match result {
            Ok(value) => value,
            Err(e) => return self.fail(m, link, "calibration read", e),
        };

        match parse_calibration(value) {
            Ok(flags) => {
                info!("Glove {} is a {} hand glove", link, flags.handedness);
                m.current.calibration = Some(flags);
                m.pending.calibration_read = false;
                self.try_ready(m)
            }
            Err(e) => self.fail(m, link, "calibration read", &TransportError::new(e.to_string())),
        }
    }

    fn on_descriptor_written(
        &self,
        m: &mut Machine,
        link: &LinkId,
        characteristic: &Uuid,
        descriptor: &Uuid,
        result: &Result<(), TransportError>,
    ) -> GloveOutcome {
        if m.state() != ConnectionState::AwaitingCalibration
            || *descriptor != self.catalog.client_config_descriptor_id()
        {
            return GloveOutcome::Ignored;
        }

        if *characteristic == self.catalog.report_characteristic_id()
            && m.pending.report_subscription
        {
            if let Err(e) = result {
                return self.fail(m, link, "report subscription", e);
            }
            debug!("Report notifications enabled on {}", link);
            m.pending.report_subscription = false;
        } else if *characteristic == self.catalog.compass_characteristic_id()
            && m.pending.compass_subscription
        {
            match result {
                Ok(()) => debug!("Compass notifications enabled on {}", link),
                Err(e) => warn!("Compass subscription failed on {}: {}", link, e),
            }
            m.pending.compass_subscription = false;
        } else {
            return GloveOutcome::Ignored;
        }

        self.try_ready(m)
    }

    fn on_notification(&self, m: &mut Machine, characteristic: &Uuid, value: &Bytes) -> GloveOutcome {
        if m.state() != ConnectionState::Ready {
            trace!("Ignoring notification on {} while {}", self.address, m.state());
            return GloveOutcome::Ignored;
        }

        if *characteristic == self.catalog.report_characteristic_id() {
            let calibration = m.current.calibration.unwrap_or_default();
            let report = match PrimaryReport::parse(value, &calibration) {
                Ok(report) => report,
                Err(e) => {
                    debug!("Dropping report from {}: {}", self.address, e);
                    return GloveOutcome::Ignored;
                }
            };

            let quaternion = match m.current.compass {
                Some(mag) => self
                    .fusion
                    .read()
                    .fuse(report.acceleration, mag, report.quaternion)
                    .unwrap_or(report.quaternion),
                None => report.quaternion,
            };

            trace!(
                "Report from {}: q={:?} a={:?} fingers={:?}",
                self.address,
                quaternion,
                report.acceleration,
                report.fingers
            );

            m.current.quaternion = quaternion;
            m.current.acceleration = report.acceleration;
            m.current.fingers = report.fingers;
        } else if *characteristic == self.catalog.compass_characteristic_id() {
            match parse_compass(value) {
                Ok(compass) => m.current.compass = Some(compass),
                Err(e) => {
                    debug!("Dropping compass report from {}: {}", self.address, e);
                    return GloveOutcome::Ignored;
                }
            }
        } else {
            return GloveOutcome::Ignored;
        }

        m.current.packet_number += 1;
        m.current.updated_at = Some(Utc::now());
        GloveOutcome::Updated(self.publish(m))
    }

    fn try_ready(&self, m: &mut Machine) -> GloveOutcome {
        if m.state() == ConnectionState::AwaitingCalibration
            && m.current.calibration.is_some()
            && m.pending.is_empty()
        {
            info!("Glove {} ready", self.address);
            self.set_state(m, ConnectionState::Ready);
            return GloveOutcome::StateChanged(ConnectionState::Ready);
        }

        // Keep the snapshot in step with the calibration learned so far
        self.publish(m);
        GloveOutcome::StateChanged(m.state())
    }

    fn not_a_glove(&self, m: &mut Machine, link: &LinkId, reason: &str) -> GloveOutcome {
        info!("Device {} is not a glove: {}", self.address, reason);
        m.current.excluded = true;
        self.drop_link(m);
        self.transport.disconnect(link);
        GloveOutcome::NotAGlove
    }

    fn fail(
        &self,
        m: &mut Machine,
        link: &LinkId,
        operation: &str,
        error: &TransportError,
    ) -> GloveOutcome {
        warn!("Glove {} {} failed: {}", link, operation, error);
        self.drop_link(m);
        self.transport.disconnect(link);
        GloveOutcome::StateChanged(ConnectionState::Disconnected)
    }

    /// Retire the current link and return to Disconnected.
    fn drop_link(&self, m: &mut Machine) {
        m.generation += 1;
        m.pending = Pending::default();
        self.set_state(m, ConnectionState::Disconnected);
    }

    /// Update the connection state and publish a snapshot.
    fn set_state(&self, m: &mut Machine, new_state: ConnectionState) {
        let old_state = m.current.connection_state;
        m.current.connection_state = new_state;

        if old_state != new_state {
            debug!(
                "Glove {} state changed: {} -> {}",
                self.address, old_state, new_state
            );
        }

        self.publish(m);
    }

    fn publish(&self, m: &Machine) -> Arc<GloveState> {
        let snapshot = Arc::new(m.current.clone());
        *self.snapshot.write() = snapshot.clone();
        snapshot
    }
}

impl std::fmt::Debug for Glove {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Glove")
            .field("address", &self.address)
            .field("connection_state", &self.connection_state())
            .finish()
    }
}
