//! Error types for the glove-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No glove is registered at the given ordinal index.
    #[error("Glove not found at index {index}")]
    GloveNotFound {
        /// The index that was looked up.
        index: usize,
    },

    /// No update arrived for the glove within the allowed time.
    #[error("Timed out waiting for glove {index}")]
    Timeout {
        /// Index of the glove that was waited on.
        index: usize,
    },

    /// Operation requires a connection but the glove is not connected.
    #[error("Glove not connected")]
    NotConnected,

    /// A transport request could not be issued or failed.
    #[error("Transport failure: {reason}")]
    Transport {
        /// Description of the failure.
        reason: String,
    },

    /// The device does not expose the glove service or its required characteristics.
    #[error("Device {address} is not a glove")]
    NotAGlove {
        /// Address of the rejected device.
        address: String,
    },

    /// Invalid data was received from the glove.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an [`Error::InvalidData`] from anything printable.
    pub(crate) fn invalid_data(context: impl Into<String>) -> Self {
        Self::InvalidData {
            context: context.into(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::GloveNotFound { index: 3 };
        assert_eq!(err.to_string(), "Glove not found at index 3");

        let err = Error::invalid_data("report too short");
        assert_eq!(err.to_string(), "Invalid data received: report too short");

        let err = Error::Timeout { index: 1 };
        assert_eq!(err.to_string(), "Timed out waiting for glove 1");
    }
}
