//! Connection states of a glove.
//!
//! A glove walks these states in order while the transport brings it up:
//! connect, discover services, subscribe and read calibration, then stream.

/// Connection state for a glove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Not connected. Also the state after any failure.
    #[default]
    Disconnected,
    /// Waiting for the transport to report the link.
    Connecting,
    /// Waiting for service discovery to finish.
    ServicesDiscovering,
    /// Subscriptions and calibration read in flight.
    AwaitingCalibration,
    /// Streaming reports.
    Ready,
}

impl ConnectionState {
    /// Check if reports are being decoded.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if a connection attempt is in progress.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::ServicesDiscovering | Self::AwaitingCalibration
        )
    }

    /// Check if the transport link is up or being brought up.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::ServicesDiscovering => write!(f, "ServicesDiscovering"),
            Self::AwaitingCalibration => write!(f, "AwaitingCalibration"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}
