//! Service lifecycle states.

use serde::Serialize;

/// Current lifecycle state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ServiceState {
    /// Created, not configured yet
    Unconfigured = 0,
    /// Configuration accepted, bindings pending
    Configured = 1,
    /// Running and registered in the object-service registry
    Started = 2,
    /// Inside `updating()`
    Updating = 3,
    /// Rebinding a key to another object
    Swapping = 4,
    /// Stopped; may be configured or started again
    Stopped = 5,
}

impl ServiceState {
    /// Convert from u8
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Unconfigured,
            1 => Self::Configured,
            2 => Self::Started,
            3 => Self::Updating,
            4 => Self::Swapping,
            _ => Self::Stopped,
        }
    }

    /// Started, including the transient sub-states
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started | Self::Updating | Self::Swapping)
    }

    pub fn can_configure(&self) -> bool {
        matches!(self, Self::Unconfigured | Self::Stopped)
    }

    pub fn can_start(&self) -> bool {
        matches!(self, Self::Configured | Self::Stopped)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unconfigured => write!(f, "unconfigured"),
            Self::Configured => write!(f, "configured"),
            Self::Started => write!(f, "started"),
            Self::Updating => write!(f, "updating"),
            Self::Swapping => write!(f, "swapping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
