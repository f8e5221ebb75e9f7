//! Glove report parsing.
//!
//! Decodes the payloads of the report, compass and calibration
//! characteristics. All values are little-endian fixed point.

use crate::data::glove_state::{CalibrationFlags, FingerFlex, Handedness, FINGER_COUNT};
use crate::data::orientation::{Quaternion, Vector3};
use crate::error::{Error, Result};

/// Fixed-point divisor of quaternion components.
pub const QUATERNION_DIVISOR: f32 = 16384.0;
/// Fixed-point divisor of acceleration components (g).
pub const ACCELERATION_DIVISOR: f32 = 16384.0;
/// Fixed-point divisor of compass components.
pub const COMPASS_DIVISOR: f32 = 32.0;
/// Divisor of finger flex bytes.
pub const FINGER_DIVISOR: f32 = 255.0;

/// Decoded primary report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimaryReport {
    /// Orientation.
    pub quaternion: Quaternion,
    /// Raw acceleration in g.
    pub acceleration: Vector3,
    /// Finger flex, thumb to pinky.
    pub fingers: FingerFlex,
}

impl PrimaryReport {
    /// Size of the primary report payload.
    pub const SIZE: usize = 19;

    const FINGERS_OFFSET: usize = 14;

    /// Parse a primary report notification.
    ///
    /// Layout:
    /// - Bytes 0-7: quaternion w, x, y, z (i16 / 16384)
    /// - Bytes 8-13: acceleration x, y, z (i16 / 16384, g)
    /// - Bytes 14-18: finger flex (u8 / 255)
    ///
    /// Finger channels are wired in mirrored order on left gloves, so for a
    /// left glove `fingers[i]` comes from byte `14 + (4 - i)`.
    pub fn parse(data: &[u8], calibration: &CalibrationFlags) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::invalid_data(format!(
                "Report too short: {} bytes (need at least {})",
                data.len(),
                Self::SIZE
            )));
        }

        let quaternion = Quaternion::new(
            read_i16(data, 0) as f32 / QUATERNION_DIVISOR,
            read_i16(data, 2) as f32 / QUATERNION_DIVISOR,
            read_i16(data, 4) as f32 / QUATERNION_DIVISOR,
            read_i16(data, 6) as f32 / QUATERNION_DIVISOR,
        );

        let acceleration = Vector3::new(
            read_i16(data, 8) as f32 / ACCELERATION_DIVISOR,
            read_i16(data, 10) as f32 / ACCELERATION_DIVISOR,
            read_i16(data, 12) as f32 / ACCELERATION_DIVISOR,
        );

        let mut fingers = [0.0; FINGER_COUNT];
        for (i, finger) in fingers.iter_mut().enumerate() {
            let offset = Self::FINGERS_OFFSET + channel_for_finger(i, calibration.handedness);
            *finger = data[offset] as f32 / FINGER_DIVISOR;
        }

        Ok(Self {
            quaternion,
            acceleration,
            fingers,
        })
    }

    /// Encode this report the way a glove of `handedness` sends it.
    ///
    /// Values are rounded to the nearest step and saturate at the range limits.
    pub fn to_bytes(&self, handedness: Handedness) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];

        let q = self.quaternion.to_array();
        for (i, value) in q.iter().enumerate() {
            write_i16(&mut out, i * 2, to_fixed(*value, QUATERNION_DIVISOR));
        }

        let a = self.acceleration.to_array();
        for (i, value) in a.iter().enumerate() {
            write_i16(&mut out, 8 + i * 2, to_fixed(*value, ACCELERATION_DIVISOR));
        }

        for (i, finger) in self.fingers.iter().enumerate() {
            let offset = Self::FINGERS_OFFSET + channel_for_finger(i, handedness);
            out[offset] = (finger.clamp(0.0, 1.0) * FINGER_DIVISOR).round() as u8;
        }

        out
    }
}

/// Parse a compass notification into a vector.
///
/// Layout: bytes 0-5 hold x, y, z as i16 / 32.
pub fn parse_compass(data: &[u8]) -> Result<Vector3> {
    if data.len() < 6 {
        return Err(Error::invalid_data(format!(
            "Compass report too short: {} bytes (need at least 6)",
            data.len()
        )));
    }

    Ok(Vector3::new(
        read_i16(data, 0) as f32 / COMPASS_DIVISOR,
        read_i16(data, 2) as f32 / COMPASS_DIVISOR,
        read_i16(data, 4) as f32 / COMPASS_DIVISOR,
    ))
}

/// Parse the calibration characteristic value. Only the first byte is used.
pub fn parse_calibration(data: &[u8]) -> Result<CalibrationFlags> {
    data.first()
        .map(|raw| CalibrationFlags::from_raw(*raw))
        .ok_or_else(|| Error::invalid_data("Calibration value is empty"))
}

/// Byte index (relative to the finger block) holding finger `i`.
fn channel_for_finger(i: usize, handedness: Handedness) -> usize {
    match handedness {
        Handedness::Right => i,
        Handedness::Left => FINGER_COUNT - 1 - i,
    }
}

fn read_i16(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}

fn write_i16(out: &mut [u8], offset: usize, value: i16) {
    out[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn to_fixed(value: f32, divisor: f32) -> i16 {
    (value * divisor)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn right() -> CalibrationFlags {
        CalibrationFlags::with_handedness(Handedness::Right)
    }

    fn left() -> CalibrationFlags {
        CalibrationFlags::with_handedness(Handedness::Left)
    }

    fn identity_report() -> Vec<u8> {
        let mut data = vec![0u8; PrimaryReport::SIZE];
        data[0..2].copy_from_slice(&16384i16.to_le_bytes());
        data[12..14].copy_from_slice(&16384i16.to_le_bytes());
        for b in &mut data[14..19] {
            *b = 0xFF;
        }
        data
    }

    #[test]
    fn test_parse_identity_report() {
        let report = PrimaryReport::parse(&identity_report(), &right()).unwrap();

        assert_eq!(report.quaternion, Quaternion::IDENTITY);
        assert_eq!(report.acceleration, Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(report.fingers, [1.0; 5]);
        assert_eq!(report.quaternion.to_euler(), Vector3::ZERO);
    }

    #[test]
    fn test_parse_negative_values() {
        let mut data = identity_report();
        data[2..4].copy_from_slice(&(-8192i16).to_le_bytes());
        data[8..10].copy_from_slice(&(-16384i16).to_le_bytes());

        let report = PrimaryReport::parse(&data, &right()).unwrap();
        assert_eq!(report.quaternion.x, -0.5);
        assert_eq!(report.acceleration.x, -1.0);
    }

    #[test]
    fn test_finger_order_right_hand() {
        let mut data = identity_report();
        data[14..19].copy_from_slice(&[0, 51, 102, 153, 204]);

        let report = PrimaryReport::parse(&data, &right()).unwrap();
        assert_eq!(report.fingers, [0.0, 0.2, 0.4, 0.6, 0.8]);
    }

    #[test]
    fn test_finger_order_left_hand() {
        let mut data = identity_report();
        data[14..19].copy_from_slice(&[0, 51, 102, 153, 204]);

        let report = PrimaryReport::parse(&data, &left()).unwrap();
        assert_eq!(report.fingers, [0.8, 0.6, 0.4, 0.2, 0.0]);
    }

    #[test]
    fn test_short_report_is_rejected() {
        let data = identity_report();
        let result = PrimaryReport::parse(&data[..18], &right());
        assert!(matches!(result, Err(Error::InvalidData { .. })));

        assert!(PrimaryReport::parse(&[], &right()).is_err());
    }

    #[test]
    fn test_long_report_ignores_trailing_bytes() {
        let mut data = identity_report();
        data.extend_from_slice(&[0xAA, 0xBB]);
        let report = PrimaryReport::parse(&data, &right()).unwrap();
        assert_eq!(report.quaternion, Quaternion::IDENTITY);
    }

    #[test]
    fn test_parse_compass() {
        let mut data = Vec::new();
        data.extend_from_slice(&32i16.to_le_bytes());
        data.extend_from_slice(&(-64i16).to_le_bytes());
        data.extend_from_slice(&16i16.to_le_bytes());

        let compass = parse_compass(&data).unwrap();
        assert_eq!(compass, Vector3::new(1.0, -2.0, 0.5));

        assert!(parse_compass(&data[..5]).is_err());
    }

    #[test]
    fn test_parse_calibration() {
        assert_eq!(
            parse_calibration(&[0x01]).unwrap().handedness,
            Handedness::Right
        );
        assert_eq!(
            parse_calibration(&[0x00, 0x01]).unwrap().handedness,
            Handedness::Left
        );
        assert!(parse_calibration(&[]).is_err());
    }

    #[test]
    fn test_to_bytes_matches_layout() {
        let report = PrimaryReport::parse(&identity_report(), &right()).unwrap();
        assert_eq!(report.to_bytes(Handedness::Right).to_vec(), identity_report());
    }

    proptest! {
        #[test]
        fn prop_fixed_point_round_trip(raw in proptest::array::uniform7(any::<i16>()), fingers in proptest::array::uniform5(any::<u8>())) {
            let mut data = Vec::with_capacity(PrimaryReport::SIZE);
            for value in raw {
                data.extend_from_slice(&value.to_le_bytes());
            }
            data.extend_from_slice(&fingers);

            let report = PrimaryReport::parse(&data, &right()).unwrap();
            let encoded = report.to_bytes(Handedness::Right);

            for i in 0..7 {
                let original = raw[i] as i32;
                let decoded = read_i16(&encoded, i * 2) as i32;
                prop_assert!((original - decoded).abs() <= 1, "field {}: {} vs {}", i, original, decoded);
            }
            prop_assert_eq!(&encoded[14..19], &fingers[..]);
        }

        #[test]
        fn prop_swapping_handedness_reverses_fingers(fingers in proptest::array::uniform5(any::<u8>())) {
            let mut data = identity_report();
            data[14..19].copy_from_slice(&fingers);

            let r = PrimaryReport::parse(&data, &right()).unwrap().fingers;
            let mut l = PrimaryReport::parse(&data, &left()).unwrap().fingers;
            l.reverse();
            prop_assert_eq!(r, l);

            for i in 0..5 {
                prop_assert_eq!(r[i], fingers[i] as f32 / FINGER_DIVISOR);
            }
        }
    }
}
