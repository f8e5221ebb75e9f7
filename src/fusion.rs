//! Sensor fusion bridge.
//!
//! The fusion engine is an external component that combines accelerometer,
//! magnetometer and the glove's own quaternion into a stabilized
//! orientation. It may fail to load; in that case the bridge stays
//! [`FusionBridge::Unavailable`] for the life of the process and gloves report
//! the raw decoded quaternion.

use tracing::{debug, info, warn};

use crate::data::orientation::{Quaternion, Vector3};
use crate::error::Result;

/// External sensor fusion engine.
pub trait SensorFusion: Send + Sync {
    /// Fuse one sample.
    ///
    /// `accel` is in g, `mag` in compass units, `quaternion` is `[w, x, y, z]`.
    fn fuse(&self, accel: [f32; 3], mag: [f32; 3], quaternion: [f32; 4]) -> [f32; 4];

    /// Release engine resources.
    fn close(&self) {}
}

/// Handle to the fusion engine, or its explicit absence.
#[derive(Default)]
pub enum FusionBridge {
    /// The engine loaded successfully.
    Available(Box<dyn SensorFusion>),
    /// No engine; callers fall back to raw quaternions.
    #[default]
    Unavailable,
}

impl FusionBridge {
    /// Load the engine with `loader`.
    ///
    /// A loader error is logged and yields [`FusionBridge::Unavailable`].
    pub fn load<F>(loader: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn SensorFusion>>,
    {
        match loader() {
            Ok(engine) => {
                info!("Sensor fusion engine loaded");
                Self::Available(engine)
            }
            Err(e) => {
                warn!("Sensor fusion engine unavailable, using raw orientation: {}", e);
                Self::Unavailable
            }
        }
    }

    /// Wrap an already constructed engine.
    pub fn with_engine(engine: impl SensorFusion + 'static) -> Self {
        Self::Available(Box::new(engine))
    }

    /// Check if an engine is loaded.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    /// Fuse a sample, or `None` when no engine is loaded.
    pub fn fuse(&self, accel: Vector3, mag: Vector3, quaternion: Quaternion) -> Option<Quaternion> {
        match self {
            Self::Available(engine) => Some(Quaternion::from_array(engine.fuse(
                accel.to_array(),
                mag.to_array(),
                quaternion.to_array(),
            ))),
            Self::Unavailable => None,
        }
    }

    /// Close the engine. The bridge is unavailable afterwards.
    pub fn release(&mut self) {
        if let Self::Available(engine) = std::mem::take(self) {
            debug!("Releasing sensor fusion engine");
            engine.close();
        }
    }
}

impl std::fmt::Debug for FusionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available(_) => write!(f, "FusionBridge::Available"),
            Self::Unavailable => write!(f, "FusionBridge::Unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct Negate {
        closed: Arc<AtomicBool>,
    }

    impl SensorFusion for Negate {
        fn fuse(&self, _accel: [f32; 3], _mag: [f32; 3], q: [f32; 4]) -> [f32; 4] {
            [q[0], -q[1], -q[2], -q[3]]
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_load_failure_is_unavailable() {
        let bridge = FusionBridge::load(|| Err(Error::Internal("library missing".to_string())));
        assert!(!bridge.is_available());
        assert!(bridge
            .fuse(Vector3::ZERO, Vector3::ZERO, Quaternion::IDENTITY)
            .is_none());
    }

    #[test]
    fn test_fuse_with_engine() {
        let closed = Arc::new(AtomicBool::new(false));
        let bridge = FusionBridge::load(|| {
            Ok(Box::new(Negate {
                closed: closed.clone(),
            }))
        });
        assert!(bridge.is_available());

        let fused = bridge
            .fuse(
                Vector3::ZERO,
                Vector3::ZERO,
                Quaternion::new(0.5, 0.5, 0.5, 0.5),
            )
            .unwrap();
        assert_eq!(fused, Quaternion::new(0.5, -0.5, -0.5, -0.5));
    }

    #[test]
    fn test_release_closes_engine() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut bridge = FusionBridge::with_engine(Negate {
            closed: closed.clone(),
        });

        bridge.release();
        assert!(closed.load(Ordering::SeqCst));
        assert!(!bridge.is_available());

        // Releasing twice is harmless
        bridge.release();
    }
}
