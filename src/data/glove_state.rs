//! Glove state snapshots.
//!
//! Contains the calibration flags read from the glove and the immutable
//! snapshot type published on every update.

use chrono::{DateTime, Utc};

use crate::ble::connection::ConnectionState;
use crate::ble::transport::DeviceAddress;
use crate::data::orientation::{self, Quaternion, Vector3};

/// Number of flex sensors on a glove.
pub const FINGER_COUNT: usize = 5;

/// Normalized finger flex values, thumb to pinky, each in `[0, 1]`.
pub type FingerFlex = [f32; FINGER_COUNT];

/// Which hand a glove is worn on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Handedness {
    /// Left hand.
    #[default]
    Left,
    /// Right hand.
    Right,
}

impl Handedness {
    /// Check if this is the right hand.
    pub fn is_right(&self) -> bool {
        matches!(self, Self::Right)
    }

    /// The opposite hand.
    pub fn mirrored(&self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

impl std::fmt::Display for Handedness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "Left"),
            Self::Right => write!(f, "Right"),
        }
    }
}

/// Calibration flags stored on the glove.
///
/// Read once per device. Handedness is a physical property of the glove, so
/// the flags are kept across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationFlags {
    /// Hand the glove is built for.
    pub handedness: Handedness,
    /// The raw flags byte, including reserved bits.
    pub raw: u8,
}

impl CalibrationFlags {
    /// Bit 0: handedness (0 = left, 1 = right).
    pub const HANDEDNESS_BIT: u8 = 0x01;

    /// Decode the flags byte. Reserved bits are kept in `raw` and otherwise ignored.
    pub fn from_raw(raw: u8) -> Self {
        let handedness = if raw & Self::HANDEDNESS_BIT != 0 {
            Handedness::Right
        } else {
            Handedness::Left
        };

        Self { handedness, raw }
    }

    /// Flags for a glove of the given hand with no other bits set.
    pub fn with_handedness(handedness: Handedness) -> Self {
        let raw = if handedness.is_right() {
            Self::HANDEDNESS_BIT
        } else {
            0
        };
        Self { handedness, raw }
    }
}

/// Snapshot of everything known about one glove.
///
/// Snapshots are immutable once published; the owning connection replaces
/// them wholesale.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GloveState {
    /// Address of the device.
    pub address: DeviceAddress,
    /// Current connection state.
    pub connection_state: ConnectionState,
    /// Orientation (fused when a fusion engine and compass sample are available).
    pub quaternion: Quaternion,
    /// Raw acceleration in g.
    pub acceleration: Vector3,
    /// Latest compass reading, if the glove has a compass.
    pub compass: Option<Vector3>,
    /// Finger flex, thumb to pinky.
    pub fingers: FingerFlex,
    /// Calibration flags, once learned.
    pub calibration: Option<CalibrationFlags>,
    /// Time of the last decoded report.
    pub updated_at: Option<DateTime<Utc>>,
    /// Number of notifications decoded since the device was registered.
    pub packet_number: u64,
    /// Set once the device turned out not to be a glove. Excluded devices
    /// keep their index but never connect again.
    pub excluded: bool,
}

impl GloveState {
    /// Initial snapshot for a newly registered device.
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            connection_state: ConnectionState::Disconnected,
            quaternion: Quaternion::IDENTITY,
            acceleration: Vector3::ZERO,
            compass: None,
            fingers: [0.0; FINGER_COUNT],
            calibration: None,
            updated_at: None,
            packet_number: 0,
            excluded: false,
        }
    }

    /// Handedness, once calibration has been read.
    pub fn handedness(&self) -> Option<Handedness> {
        self.calibration.map(|c| c.handedness)
    }

    /// Check if the glove is streaming reports.
    pub fn is_ready(&self) -> bool {
        self.connection_state.is_ready()
    }

    /// Roll/pitch/yaw in radians.
    pub fn euler(&self) -> Vector3 {
        orientation::to_euler(&self.quaternion)
    }

    /// Gravity estimate derived from orientation.
    pub fn gravity(&self) -> Vector3 {
        orientation::gravity(&self.quaternion)
    }

    /// Acceleration with gravity removed.
    pub fn linear_acceleration(&self) -> Vector3 {
        orientation::linear_acceleration(self.acceleration, self.gravity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_flags_from_raw() {
        assert_eq!(CalibrationFlags::from_raw(0x00).handedness, Handedness::Left);
        assert_eq!(CalibrationFlags::from_raw(0x01).handedness, Handedness::Right);
        // Reserved bits are ignored
        assert_eq!(CalibrationFlags::from_raw(0xFE).handedness, Handedness::Left);
        assert_eq!(CalibrationFlags::from_raw(0xFF).handedness, Handedness::Right);
        assert_eq!(CalibrationFlags::from_raw(0xFE).raw, 0xFE);
    }

    #[test]
    fn test_with_handedness() {
        let flags = CalibrationFlags::with_handedness(Handedness::Right);
        assert_eq!(flags, CalibrationFlags::from_raw(0x01));
        let flags = CalibrationFlags::with_handedness(Handedness::Left);
        assert_eq!(flags, CalibrationFlags::from_raw(0x00));
    }

    #[test]
    fn test_handedness_mirrored() {
        assert_eq!(Handedness::Left.mirrored(), Handedness::Right);
        assert_eq!(Handedness::Right.mirrored(), Handedness::Left);
        assert_eq!(format!("{}", Handedness::Right), "Right");
    }

    #[test]
    fn test_new_state() {
        let state = GloveState::new(DeviceAddress::new("AA:BB"));
        assert_eq!(state.connection_state, ConnectionState::Disconnected);
        assert_eq!(state.quaternion, Quaternion::IDENTITY);
        assert!(state.handedness().is_none());
        assert!(!state.is_ready());
        assert!(state.updated_at.is_none());
        assert_eq!(state.packet_number, 0);
        assert!(!state.excluded);
    }

    #[test]
    fn test_linear_acceleration_at_rest() {
        let mut state = GloveState::new(DeviceAddress::new("AA:BB"));
        state.acceleration = Vector3::new(0.0, 0.0, 1.0);
        assert_eq!(state.linear_acceleration(), Vector3::ZERO);
        assert_eq!(state.euler(), Vector3::ZERO);
    }
}
