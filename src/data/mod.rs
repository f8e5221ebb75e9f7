//! Data structures for glove data.
//!
//! This module contains the orientation types and math, and the snapshot
//! types published for each glove.

pub mod glove_state;
pub mod orientation;

pub use glove_state::{CalibrationFlags, FingerFlex, GloveState, Handedness, FINGER_COUNT};
pub use orientation::{gravity, linear_acceleration, to_euler, Quaternion, Vector3};
