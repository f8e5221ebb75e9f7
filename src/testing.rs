//! Test helpers shared by the glove and registry tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::ble::transport::{
    BondedDevice, DeviceAddress, GattCharacteristic, GattService, GattTransport, LinkId,
};
use crate::ble::uuids::UuidCatalog;
use crate::error::Result;

/// A request seen by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Connect(LinkId),
    DiscoverServices(LinkId),
    Read(LinkId, Uuid),
    SetNotification(LinkId, Uuid, bool),
    WriteDescriptor(LinkId, Uuid, Uuid, Bytes),
    Disconnect(LinkId),
}

/// Transport that records requests and never answers them.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    bonded: Mutex<Vec<BondedDevice>>,
    discovery_stalled: AtomicBool,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_bonded(&self, addresses: &[&str], service: Uuid) {
        *self.bonded.lock() = addresses
            .iter()
            .map(|a| BondedDevice {
                address: DeviceAddress::new(*a),
                service_ids: vec![service],
            })
            .collect();
    }

    /// Make device listing hang until the test ends.
    pub(crate) fn stall_discovery(&self) {
        self.discovery_stalled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock())
    }
}

#[async_trait]
impl GattTransport for RecordingTransport {
    fn connect(&self, link: &LinkId) {
        self.calls.lock().push(Call::Connect(link.clone()));
    }

    fn discover_services(&self, link: &LinkId) {
        self.calls.lock().push(Call::DiscoverServices(link.clone()));
    }

    fn read_characteristic(&self, link: &LinkId, _service: Uuid, characteristic: Uuid) {
        self.calls
            .lock()
            .push(Call::Read(link.clone(), characteristic));
    }

    fn set_notification(
        &self,
        link: &LinkId,
        _service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<()> {
        self.calls
            .lock()
            .push(Call::SetNotification(link.clone(), characteristic, enabled));
        Ok(())
    }

    fn write_descriptor(
        &self,
        link: &LinkId,
        _service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Bytes,
    ) {
        self.calls.lock().push(Call::WriteDescriptor(
            link.clone(),
            characteristic,
            descriptor,
            value,
        ));
    }

    fn disconnect(&self, link: &LinkId) {
        self.calls.lock().push(Call::Disconnect(link.clone()));
    }

    async fn list_bonded_devices_advertising(&self, service: Uuid) -> Result<Vec<BondedDevice>> {
        if self.discovery_stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        Ok(self
            .bonded
            .lock()
            .iter()
            .filter(|d| d.service_ids.contains(&service))
            .cloned()
            .collect())
    }
}

/// Services of a well-formed glove.
pub(crate) fn glove_services(catalog: &UuidCatalog, with_compass: bool) -> Vec<GattService> {
    let mut characteristics = vec![
        GattCharacteristic::new(catalog.report_characteristic_id(), false, true),
        GattCharacteristic::new(catalog.calibration_characteristic_id(), true, false),
    ];
    if with_compass {
        characteristics.push(GattCharacteristic::new(
            catalog.compass_characteristic_id(),
            false,
            true,
        ));
    }

    vec![GattService {
        uuid: catalog.service_id(),
        characteristics,
    }]
}

/// Report bytes for the identity orientation, 1 g on Z and fully bent fingers.
pub(crate) fn identity_report() -> Bytes {
    let mut data = vec![0u8; 19];
    data[0..2].copy_from_slice(&16384i16.to_le_bytes());
    data[12..14].copy_from_slice(&16384i16.to_le_bytes());
    for b in &mut data[14..19] {
        *b = 0xFF;
    }
    Bytes::from(data)
}
