//! Error types for bridge operations.
//!
//! All errors implement `std::error::Error` via `thiserror`.

use thiserror::Error;
use vale_fabric::FabricError;

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors returned by the port registry and the lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A port or bridge with this name already exists.
    #[error("Name '{name}' is already in use")]
    DuplicateName {
        /// The conflicting name.
        name: String,
    },

    /// No port or bridge with this name exists.
    #[error("'{name}' not found")]
    NotFound {
        /// The missing name.
        name: String,
    },

    /// The port is already attached to a bridge.
    #[error("Port '{port}' is already attached")]
    AlreadyAttached {
        /// The port name.
        port: String,
    },

    /// The port is not attached to the bridge it was detached from.
    #[error("Port '{port}' is not attached to bridge '{bridge}'")]
    NotAttached {
        /// The bridge name.
        bridge: String,
        /// The port name.
        port: String,
    },

    /// The port cannot be destroyed while attached.
    #[error("Port '{port}' is still attached")]
    PortAttached {
        /// The port name.
        port: String,
    },

    /// The bridge cannot be destroyed while ports are attached.
    #[error("Bridge '{bridge}' still has {attached} attached port(s)")]
    BridgeBusy {
        /// The bridge name.
        bridge: String,
        /// Number of ports still attached.
        attached: usize,
    },

    /// The presented control handle is not the bridge's current handle.
    #[error("Invalid control handle for bridge '{bridge}'")]
    InvalidHandle {
        /// The bridge name.
        bridge: String,
    },

    /// The fabric returned an index already held by another attached port.
    #[error("Fabric assigned index {index} on '{bridge}' which is already held by '{holder}'")]
    IndexConflict {
        /// The bridge name.
        bridge: String,
        /// The duplicated index.
        index: u16,
        /// The port already holding the index.
        holder: String,
    },

    /// The lifecycle controller was driven out of order.
    #[error("Operation '{operation}' not allowed in state {state}")]
    InvalidState {
        /// The rejected operation.
        operation: String,
        /// The current lifecycle state.
        state: String,
    },

    /// The fabric rejected the operation.
    #[error(transparent)]
    Fabric(#[from] FabricError),
}

impl BridgeError {
    /// Creates a duplicate name error.
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    /// Creates a not found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates an already attached error.
    pub fn already_attached(port: impl Into<String>) -> Self {
        Self::AlreadyAttached { port: port.into() }
    }

    /// Creates an invalid handle error.
    pub fn invalid_handle(bridge: impl Into<String>) -> Self {
        Self::InvalidHandle {
            bridge: bridge.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(operation: impl Into<String>, state: impl ToString) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// Returns the underlying fabric error, if any.
    pub fn fabric(&self) -> Option<&FabricError> {
        match self {
            BridgeError::Fabric(err) => Some(err),
            _ => None,
        }
    }
}
