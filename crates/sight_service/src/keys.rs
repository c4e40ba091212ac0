//! Key declarations
//!
//! A key is a named role through which a service uses an object. Services
//! declare their keys up front; configuration binds objects to them.

use serde::{Deserialize, Serialize};

/// How a service uses the object bound to a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    /// Read-only
    Input,
    /// Read and write
    InOut,
    /// Produced by the service
    Output,
}

impl Access {
    /// Writers are exclusive per (object, key)
    pub fn is_writer(&self) -> bool {
        matches!(self, Access::InOut | Access::Output)
    }
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::Input => write!(f, "input"),
            Access::InOut => write!(f, "inout"),
            Access::Output => write!(f, "output"),
        }
    }
}

/// A key declared by a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDecl {
    pub key: String,
    pub access: Access,
    /// Optional keys may stay unbound at start
    pub optional: bool,
    /// Connect the bound object's `modified` signal to the `update` slot
    pub auto_connect: bool,
}

impl KeyDecl {
    fn new(key: impl Into<String>, access: Access) -> Self {
        Self {
            key: key.into(),
            access,
            // Outputs are produced while running, never bound up front
            optional: access == Access::Output,
            auto_connect: false,
        }
    }

    pub fn input(key: impl Into<String>) -> Self {
        Self::new(key, Access::Input)
    }

    pub fn inout(key: impl Into<String>) -> Self {
        Self::new(key, Access::InOut)
    }

    pub fn output(key: impl Into<String>) -> Self {
        Self::new(key, Access::Output)
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn auto_connect(mut self) -> Self {
        self.auto_connect = true;
        self
    }
}

/// Object signal to service slot wiring set up while the service runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConnection {
    pub key: String,
    pub signal: String,
    pub slot: String,
}

impl KeyConnection {
    pub fn new(key: impl Into<String>, signal: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            signal: signal.into(),
            slot: slot.into(),
        }
    }
}
