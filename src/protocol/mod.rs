//! Protocol module for parsing glove characteristic payloads.
//!
//! This module contains the decoders for:
//! - the primary report (quaternion, acceleration, finger flex)
//! - the compass report
//! - the calibration flags

pub mod report;

pub use report::{parse_calibration, parse_compass, PrimaryReport};
