//! Type definitions for the bridge core

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a port descriptor.
///
/// A port is CREATED before it can be ATTACHED and must be DETACHED before
/// it can be DESTROYED. A DETACHED port may be attached again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortState {
    Created,
    Attached,
    Detached,
    Destroyed,
}

impl PortState {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            PortState::Created => "CREATED",
            PortState::Attached => "ATTACHED",
            PortState::Detached => "DETACHED",
            PortState::Destroyed => "DESTROYED",
        }
    }

    /// Returns true if the port can be attached from this state.
    pub fn can_attach(&self) -> bool {
        matches!(self, PortState::Created | PortState::Detached)
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeState {
    Uncreated,
    Active,
    Destroyed,
}

impl BridgeState {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Uncreated => "UNCREATED",
            BridgeState::Active => "ACTIVE",
            BridgeState::Destroyed => "DESTROYED",
        }
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receipt for a port registered with [`PortRegistry::create_port`].
///
/// [`PortRegistry::create_port`]: crate::PortRegistry::create_port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortHandle {
    name: String,
}

impl PortHandle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Port name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Snapshot of one port as tracked by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Port name
    pub name: String,
    /// Current state
    pub state: PortState,
    /// Bridge the port is attached to
    pub bridge: Option<String>,
    /// Index held while attached
    pub index: Option<u16>,
}
