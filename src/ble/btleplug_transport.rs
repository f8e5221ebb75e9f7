//! [`GattTransport`] implementation on top of btleplug.
//!
//! Requests are spawned as tokio tasks on the runtime the transport was
//! created in, and their results are sent to the event channel handed to
//! [`BtleplugTransport::new`]. A background task watches the adapter's
//! event stream and reports links that drop.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{
    BondedDevice, DeviceAddress, GattCharacteristic, GattService, GattTransport, LinkId,
    TransportError, TransportEvent,
};
use crate::ble::uuids::{CLIENT_CHARACTERISTIC_CONFIG_UUID, ENABLE_NOTIFICATION_VALUE};
use crate::error::{Error, Result};

/// State shared with spawned request tasks.
struct Shared {
    /// Event sink.
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    /// Known peripherals by address.
    peripherals: RwLock<HashMap<DeviceAddress, Peripheral>>,
    /// Current link of each connected or connecting device.
    links: RwLock<HashMap<DeviceAddress, LinkId>>,
    /// Characteristics whose notifications are delivered.
    notifying: RwLock<HashSet<(DeviceAddress, Uuid)>>,
    /// Notification forwarding task per device.
    forwarders: Mutex<HashMap<DeviceAddress, JoinHandle<()>>>,
    /// Generation of the last requested disconnect the adapter has not yet reported.
    requested_disconnects: Mutex<HashMap<DeviceAddress, u64>>,
}

impl Shared {
    fn new(event_tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            event_tx,
            peripherals: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
            notifying: RwLock::new(HashSet::new()),
            forwarders: Mutex::new(HashMap::new()),
            requested_disconnects: Mutex::new(HashMap::new()),
        }
    }

    fn send(&self, event: TransportEvent) {
        if self.event_tx.send(event).is_err() {
            trace!("Transport event receiver dropped");
        }
    }

    fn peripheral(&self, address: &DeviceAddress) -> Option<Peripheral> {
        self.peripherals.read().get(address).cloned()
    }

    fn is_current(&self, link: &LinkId) -> bool {
        self.links.read().get(&link.address) == Some(link)
    }

    /// Forget `link` if it is still the current link of its device.
    fn retire(&self, link: &LinkId) {
        let mut links = self.links.write();
        if links.get(&link.address) == Some(link) {
            links.remove(&link.address);
        }
        drop(links);

        self.notifying.write().retain(|(a, _)| a != &link.address);
        if let Some(handle) = self.forwarders.lock().remove(&link.address) {
            handle.abort();
        }
    }

    /// Remember that the adapter will report `link` going down.
    fn request_disconnect(&self, link: &LinkId) {
        self.requested_disconnects
            .lock()
            .insert(link.address.clone(), link.generation);
    }

    /// Forget a requested disconnect the adapter will not report.
    fn cancel_disconnect(&self, link: &LinkId) {
        let mut requested = self.requested_disconnects.lock();
        if requested.get(&link.address) == Some(&link.generation) {
            requested.remove(&link.address);
        }
    }

    /// Resolve an adapter disconnect of `address` to the link that dropped.
    ///
    /// The adapter does not say which connection went down. When a disconnect
    /// was requested for an older link, the event belongs to that link and a
    /// newer link opened since then is left alone.
    fn dropped_link(&self, address: &DeviceAddress) -> Option<LinkId> {
        let requested = self.requested_disconnects.lock().remove(address);
        let current = self.links.read().get(address).cloned()?;

        match requested {
            Some(generation) if generation < current.generation => {
                debug!(
                    "Disconnect of {}#{} reported after {} opened",
                    address, generation, current
                );
                None
            }
            _ => Some(current),
        }
    }
}

/// btleplug-backed GATT transport.
pub struct BtleplugTransport {
    /// The BLE adapter.
    adapter: Adapter,
    /// Runtime request tasks are spawned on.
    runtime: Handle,
    /// Shared state.
    shared: Arc<Shared>,
    /// Whether a filtered scan is running.
    is_scanning: AtomicBool,
    /// Adapter event task.
    events_handle: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugTransport {
    /// Create a transport on the first Bluetooth adapter.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(event_tx: mpsc::UnboundedSender<TransportEvent>) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter, event_tx))
    }

    /// Create a transport on a specific adapter.
    ///
    /// Must be called within a tokio runtime.
    pub fn with_adapter(adapter: Adapter, event_tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        let shared = Arc::new(Shared::new(event_tx));

        let runtime = Handle::current();
        let events_handle = runtime.spawn(Self::watch_adapter(adapter.clone(), shared.clone()));

        Self {
            adapter,
            runtime,
            shared,
            is_scanning: AtomicBool::new(false),
            events_handle: Mutex::new(Some(events_handle)),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Stop the filtered scan started by discovery.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !self.is_scanning.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Stopping BLE scan");
        self.adapter.stop_scan().await?;
        Ok(())
    }

    /// Report links that drop without being asked to.
    async fn watch_adapter(adapter: Adapter, shared: Arc<Shared>) {
        let mut events = match adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to get adapter events: {}", e);
                return;
            }
        };

        while let Some(event) = events.next().await {
            match event {
                CentralEvent::DeviceDisconnected(id) => {
                    let address = DeviceAddress::new(id.to_string());

                    if let Some(link) = shared.dropped_link(&address) {
                        debug!("Device disconnected: {}", link);
                        shared.retire(&link);
                        shared.send(TransportEvent::Disconnected { link });
                    }
                }
                CentralEvent::DeviceConnected(id) => {
                    trace!("Device connected: {:?}", id);
                }
                _ => {}
            }
        }

        debug!("Adapter event stream ended");
    }

    /// Spawn the notification forwarder for `link`, replacing any earlier one.
    fn start_forwarding(runtime: &Handle, shared: &Arc<Shared>, peripheral: Peripheral, link: LinkId) {
        if !shared.is_current(&link) {
            return;
        }

        let address = link.address.clone();
        let handle = runtime.spawn(Self::forward_notifications(peripheral, link, shared.clone()));
        if let Some(old) = shared.forwarders.lock().insert(address, handle) {
            old.abort();
        }
    }

    /// Forward notifications of `peripheral` tagged with `link`.
    async fn forward_notifications(peripheral: Peripheral, link: LinkId, shared: Arc<Shared>) {
        let services_by_characteristic: HashMap<Uuid, Uuid> = peripheral
            .characteristics()
            .into_iter()
            .map(|c| (c.uuid, c.service_uuid))
            .collect();

        let mut notifications = match peripheral.notifications().await {
            Ok(n) => n,
            Err(e) => {
                error!("Failed to get notifications stream for {}: {}", link, e);
                return;
            }
        };

        while let Some(notification) = notifications.next().await {
            if !shared
                .notifying
                .read()
                .contains(&(link.address.clone(), notification.uuid))
            {
                continue;
            }

            let Some(service) = services_by_characteristic.get(&notification.uuid) else {
                trace!("Notification from unknown characteristic {}", notification.uuid);
                continue;
            };

            shared.send(TransportEvent::CharacteristicChanged {
                link: link.clone(),
                service: *service,
                characteristic: notification.uuid,
                value: Bytes::from(notification.value),
            });
        }

        debug!("Notification stream for {} ended", link);
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        service: Uuid,
        characteristic: Uuid,
    ) -> Option<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
    }

    fn missing_peripheral(&self, link: &LinkId) -> TransportError {
        warn!("No peripheral known for {}", link);
        TransportError::new(format!("unknown device {}", link.address))
    }
}

/// Read and notify support of a characteristic.
fn capabilities(properties: CharPropFlags) -> (bool, bool) {
    (
        properties.contains(CharPropFlags::READ),
        properties.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE),
    )
}

fn transport_error(e: btleplug::Error) -> TransportError {
    TransportError::new(e.to_string())
}

#[async_trait]
impl GattTransport for BtleplugTransport {
    fn connect(&self, link: &LinkId) {
        let link = link.clone();
        let shared = self.shared.clone();

        let Some(peripheral) = shared.peripheral(&link.address) else {
            let error = self.missing_peripheral(&link);
            shared.send(TransportEvent::Connected {
                link,
                result: Err(error),
            });
            return;
        };

        shared
            .links
            .write()
            .insert(link.address.clone(), link.clone());

        let runtime = self.runtime.clone();
        self.runtime.spawn(async move {
            debug!("Connecting to {}", link);
            let mut result = peripheral.connect().await.map_err(transport_error);

            // Gloves with a cached service table skip discovery on reconnect,
            // so the platform table is filled here.
            if result.is_ok() && peripheral.characteristics().is_empty() {
                result = peripheral.discover_services().await.map_err(transport_error);
            }

            match &result {
                Ok(()) => Self::start_forwarding(&runtime, &shared, peripheral, link.clone()),
                Err(_) => shared.retire(&link),
            }
            shared.send(TransportEvent::Connected { link, result });
        });
    }

    fn discover_services(&self, link: &LinkId) {
        let link = link.clone();
        let shared = self.shared.clone();

        let Some(peripheral) = shared.peripheral(&link.address) else {
            let error = self.missing_peripheral(&link);
            shared.send(TransportEvent::ServicesDiscovered {
                link,
                result: Err(error),
            });
            return;
        };

        self.runtime.spawn(async move {
            if peripheral.characteristics().is_empty() {
                if let Err(e) = peripheral.discover_services().await {
                    shared.send(TransportEvent::ServicesDiscovered {
                        link,
                        result: Err(transport_error(e)),
                    });
                    return;
                }
            }

            let mut services = Vec::new();

            for service in peripheral.services() {
                let characteristics = service
                    .characteristics
                    .iter()
                    .map(|c| {
                        debug!("Found characteristic: {} in service {}", c.uuid, service.uuid);
                        let (can_read, can_notify) = capabilities(c.properties);
                        GattCharacteristic::new(c.uuid, can_read, can_notify)
                    })
                    .collect();

                services.push(GattService {
                    uuid: service.uuid,
                    characteristics,
                });
            }

            shared.send(TransportEvent::ServicesDiscovered {
                link,
                result: Ok(services),
            });
        });
    }

    fn read_characteristic(&self, link: &LinkId, service: Uuid, characteristic: Uuid) {
        let link = link.clone();
        let shared = self.shared.clone();

        let Some(peripheral) = shared.peripheral(&link.address) else {
            let error = self.missing_peripheral(&link);
            shared.send(TransportEvent::CharacteristicRead {
                link,
                characteristic,
                result: Err(error),
            });
            return;
        };

        self.runtime.spawn(async move {
            let result = match Self::find_characteristic(&peripheral, service, characteristic) {
                Some(c) => peripheral
                    .read(&c)
                    .await
                    .map(Bytes::from)
                    .map_err(transport_error),
                None => Err(TransportError::new(format!(
                    "characteristic {} not found",
                    characteristic
                ))),
            };

            if let Ok(value) = &result {
                trace!("Read {} bytes from characteristic {}", value.len(), characteristic);
            }

            shared.send(TransportEvent::CharacteristicRead {
                link,
                characteristic,
                result,
            });
        });
    }

    fn set_notification(
        &self,
        link: &LinkId,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<()> {
        let peripheral = self
            .shared
            .peripheral(&link.address)
            .ok_or(Error::NotConnected)?;

        if !peripheral.services().iter().any(|s| s.uuid == service) {
            return Err(Error::ServiceNotFound {
                uuid: service.to_string(),
            });
        }

        let found = Self::find_characteristic(&peripheral, service, characteristic).ok_or_else(|| {
            Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            }
        })?;

        let (_, can_notify) = capabilities(found.properties);
        if enabled && !can_notify {
            return Err(Error::Transport {
                reason: format!("characteristic {} does not notify", characteristic),
            });
        }

        let key = (link.address.clone(), characteristic);
        if enabled {
            self.shared.notifying.write().insert(key);
        } else {
            self.shared.notifying.write().remove(&key);
        }

        Ok(())
    }

    fn write_descriptor(
        &self,
        link: &LinkId,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Bytes,
    ) {
        let link = link.clone();
        let shared = self.shared.clone();

        let peripheral = match shared.peripheral(&link.address) {
            Some(p) if descriptor == CLIENT_CHARACTERISTIC_CONFIG_UUID => p,
            Some(_) => {
                shared.send(TransportEvent::DescriptorWritten {
                    link,
                    characteristic,
                    descriptor,
                    result: Err(TransportError::new(format!(
                        "unsupported descriptor {}",
                        descriptor
                    ))),
                });
                return;
            }
            None => {
                let error = self.missing_peripheral(&link);
                shared.send(TransportEvent::DescriptorWritten {
                    link,
                    characteristic,
                    descriptor,
                    result: Err(error),
                });
                return;
            }
        };

        // The platform stack owns the client configuration descriptor, so
        // writing it maps onto subscribe/unsubscribe.
        self.runtime.spawn(async move {
            let result = match Self::find_characteristic(&peripheral, service, characteristic) {
                Some(c) if value.as_ref() == ENABLE_NOTIFICATION_VALUE => {
                    debug!("Subscribing to {} on {}", characteristic, link);
                    peripheral.subscribe(&c).await.map_err(transport_error)
                }
                Some(c) => {
                    debug!("Unsubscribing from {} on {}", characteristic, link);
                    peripheral.unsubscribe(&c).await.map_err(transport_error)
                }
                None => Err(TransportError::new(format!(
                    "characteristic {} not found",
                    characteristic
                ))),
            };

            shared.send(TransportEvent::DescriptorWritten {
                link,
                characteristic,
                descriptor,
                result,
            });
        });
    }

    fn disconnect(&self, link: &LinkId) {
        let link = link.clone();
        let shared = self.shared.clone();

        shared.retire(&link);

        let Some(peripheral) = shared.peripheral(&link.address) else {
            return;
        };

        self.runtime.spawn(async move {
            // A newer link reuses the physical connection, and a link that
            // never came up produces no adapter event.
            if shared.links.read().contains_key(&link.address)
                || !peripheral.is_connected().await.unwrap_or(false)
            {
                return;
            }

            debug!("Disconnecting from {}", link);
            shared.request_disconnect(&link);
            if let Err(e) = peripheral.disconnect().await {
                warn!("Error disconnecting {}: {}", link, e);
                shared.cancel_disconnect(&link);
            }
        });
    }

    async fn list_bonded_devices_advertising(&self, service: Uuid) -> Result<Vec<BondedDevice>> {
        if !self.is_scanning.swap(true, Ordering::SeqCst) {
            info!("Starting BLE scan for service {}", service);
            let filter = ScanFilter {
                services: vec![service],
            };
            if let Err(e) = self.adapter.start_scan(filter).await {
                self.is_scanning.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }

        let mut devices = Vec::new();

        for peripheral in self.adapter.peripherals().await? {
            let properties = match peripheral.properties().await {
                Ok(Some(p)) => p,
                _ => continue,
            };

            if !properties.services.contains(&service) {
                continue;
            }

            let address = DeviceAddress::new(peripheral.id().to_string());
            trace!(
                "Glove candidate {} ({:?})",
                address,
                properties.local_name
            );

            self.shared
                .peripherals
                .write()
                .insert(address.clone(), peripheral);

            devices.push(BondedDevice {
                address,
                service_ids: properties.services,
            });
        }

        Ok(devices)
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.events_handle.lock().take() {
            handle.abort();
        }
        for (_, handle) in self.shared.forwarders.lock().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities() {
        assert_eq!(capabilities(CharPropFlags::READ), (true, false));
        assert_eq!(capabilities(CharPropFlags::NOTIFY), (false, true));
        assert_eq!(capabilities(CharPropFlags::INDICATE), (false, true));
        assert_eq!(
            capabilities(CharPropFlags::READ | CharPropFlags::NOTIFY),
            (true, true)
        );
        assert_eq!(capabilities(CharPropFlags::WRITE), (false, false));
    }

    fn shared() -> Shared {
        let (tx, _rx) = mpsc::unbounded_channel();
        Shared::new(tx)
    }

    fn open(shared: &Shared, link: &LinkId) {
        shared
            .links
            .write()
            .insert(link.address.clone(), link.clone());
    }

    #[test]
    fn test_unrequested_drop_retires_current_link() {
        let shared = shared();
        let link = LinkId::new(DeviceAddress::new("AA:01"), 1);
        open(&shared, &link);

        assert_eq!(shared.dropped_link(&link.address), Some(link.clone()));
        assert_eq!(shared.dropped_link(&DeviceAddress::new("AA:02")), None);
    }

    #[test]
    fn test_requested_disconnect_spares_newer_link() {
        let shared = shared();
        let address = DeviceAddress::new("AA:01");
        let old = LinkId::new(address.clone(), 1);
        let new = LinkId::new(address.clone(), 3);

        open(&shared, &old);
        shared.retire(&old);
        shared.request_disconnect(&old);
        open(&shared, &new);

        // The late event belongs to the old link
        assert_eq!(shared.dropped_link(&address), None);
        assert!(shared.is_current(&new));

        // A later drop is the new link's own
        assert_eq!(shared.dropped_link(&address), Some(new));
    }

    #[test]
    fn test_cancelled_disconnect_is_forgotten() {
        let shared = shared();
        let address = DeviceAddress::new("AA:01");
        let old = LinkId::new(address.clone(), 1);
        let new = LinkId::new(address.clone(), 3);

        shared.request_disconnect(&old);
        shared.cancel_disconnect(&old);
        open(&shared, &new);

        assert_eq!(shared.dropped_link(&address), Some(new));
    }

    #[test]
    fn test_transport_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BtleplugTransport>();
    }
}
