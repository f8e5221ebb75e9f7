//! BLE Service and Characteristic UUIDs.
//!
//! Gloves expose a vendor service whose identifiers are 16-bit codes folded
//! into a 128-bit vendor base, the same way the Bluetooth SIG short form
//! expands `0xXXXX` into `0000XXXX-0000-1000-8000-00805f9b34fb`.

use uuid::Uuid;

/// Bluetooth SIG base UUID (`00000000-0000-1000-8000-00805f9b34fb`).
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb);

/// Default vendor base used by glove firmware.
pub const GLOVE_VENDOR_BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_3c7a_4f1e_9a51_7f4d2b6e8c01);

/// 16-bit code of the glove service.
pub const GLOVE_SERVICE_CODE: u16 = 0x1820;
/// 16-bit code of the primary report characteristic (Notify).
pub const REPORT_CHARACTERISTIC_CODE: u16 = 0x1821;
/// 16-bit code of the compass characteristic (Notify, optional).
pub const COMPASS_CHARACTERISTIC_CODE: u16 = 0x1822;
/// 16-bit code of the calibration flags characteristic (Read).
pub const CALIBRATION_CHARACTERISTIC_CODE: u16 = 0x1823;

/// Client Characteristic Configuration descriptor (standard BLE, 0x2902).
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// Value written to the client config descriptor to enable notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Place a 16-bit code into bits 96..112 of a base UUID.
pub const fn uuid_from_code(base: Uuid, code: u16) -> Uuid {
    let base = base.as_u128() & !(0xFFFF_u128 << 96);
    Uuid::from_u128(base | ((code as u128) << 96))
}

/// Immutable catalog of the identifiers a glove exposes.
///
/// Built once at startup and shared by the registry and every glove
/// connection; tests can inject a catalog with a different vendor base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UuidCatalog {
    vendor_base: Uuid,
}

impl UuidCatalog {
    /// Create a catalog over a vendor base UUID.
    pub const fn new(vendor_base: Uuid) -> Self {
        Self { vendor_base }
    }

    /// The vendor base this catalog expands codes against.
    pub fn vendor_base(&self) -> Uuid {
        self.vendor_base
    }

    /// Expand a 16-bit code against the vendor base.
    pub fn from_code(&self, code: u16) -> Uuid {
        uuid_from_code(self.vendor_base, code)
    }

    /// Glove service UUID.
    pub fn service_id(&self) -> Uuid {
        self.from_code(GLOVE_SERVICE_CODE)
    }

    /// Primary report characteristic UUID.
    pub fn report_characteristic_id(&self) -> Uuid {
        self.from_code(REPORT_CHARACTERISTIC_CODE)
    }

    /// Compass characteristic UUID.
    pub fn compass_characteristic_id(&self) -> Uuid {
        self.from_code(COMPASS_CHARACTERISTIC_CODE)
    }

    /// Calibration flags characteristic UUID.
    pub fn calibration_characteristic_id(&self) -> Uuid {
        self.from_code(CALIBRATION_CHARACTERISTIC_CODE)
    }

    /// Client characteristic configuration descriptor UUID.
    ///
    /// This is a SIG-assigned identifier and does not depend on the vendor base.
    pub fn client_config_descriptor_id(&self) -> Uuid {
        CLIENT_CHARACTERISTIC_CONFIG_UUID
    }

    /// Check if a service UUID is the glove service.
    pub fn is_glove_service(&self, uuid: &Uuid) -> bool {
        *uuid == self.service_id()
    }
}

impl Default for UuidCatalog {
    fn default() -> Self {
        Self::new(GLOVE_VENDOR_BASE_UUID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_from_code_matches_sig_short_form() {
        let cccd = uuid_from_code(BLUETOOTH_BASE_UUID, 0x2902);
        assert_eq!(cccd, CLIENT_CHARACTERISTIC_CONFIG_UUID);
        assert_eq!(cccd.to_string(), "00002902-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_catalog_ids() {
        let catalog = UuidCatalog::default();

        let service = catalog.service_id().to_string();
        assert!(service.starts_with("00001820-"), "unexpected {}", service);
        assert!(service.ends_with("7f4d2b6e8c01"), "unexpected {}", service);

        assert!(catalog
            .report_characteristic_id()
            .to_string()
            .starts_with("00001821-"));
        assert!(catalog
            .compass_characteristic_id()
            .to_string()
            .starts_with("00001822-"));
        assert!(catalog
            .calibration_characteristic_id()
            .to_string()
            .starts_with("00001823-"));
    }

    #[test]
    fn test_catalog_is_deterministic() {
        let a = UuidCatalog::default();
        let b = UuidCatalog::new(GLOVE_VENDOR_BASE_UUID);
        assert_eq!(a, b);
        assert_eq!(a.service_id(), b.service_id());
        assert_eq!(a.report_characteristic_id(), b.report_characteristic_id());
    }

    #[test]
    fn test_injected_vendor_base() {
        let catalog = UuidCatalog::new(BLUETOOTH_BASE_UUID);
        assert_eq!(
            catalog.service_id().to_string(),
            "00001820-0000-1000-8000-00805f9b34fb"
        );
        // Descriptor stays SIG-assigned
        assert_eq!(
            catalog.client_config_descriptor_id(),
            UuidCatalog::default().client_config_descriptor_id()
        );
    }

    #[test]
    fn test_is_glove_service() {
        let catalog = UuidCatalog::default();
        assert!(catalog.is_glove_service(&catalog.service_id()));
        assert!(!catalog.is_glove_service(&catalog.report_characteristic_id()));
        assert!(!catalog.is_glove_service(&CLIENT_CHARACTERISTIC_CONFIG_UUID));
    }
}
