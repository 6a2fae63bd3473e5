//! VALE bridge core.
//!
//! A software Ethernet bridge is built from three pieces:
//!
//! - [`PortRegistry`]: ground truth for port names, states and indices.
//!   Mutations are serialized and republish the bridge's live port table.
//! - Forwarding policies ([`RestrictedPolicy`], [`FloodPolicy`]): the
//!   per-frame decision the fabric invokes on the packet path.
//! - [`BridgeController`]: ordered startup and best-effort shutdown of one
//!   bridge, and sole owner of its control handle.
//!
//! The fabric itself (ring I/O, frame delivery) lives behind the
//! [`vale_fabric::Fabric`] trait.

pub mod audit;
pub mod config;
pub mod controller;
pub mod error;
pub mod policy;
pub mod registry;
pub mod types;

pub use config::{BridgeConfig, ConfigError, PolicyConfig, DEFAULT_CONFIG_PATH};
pub use controller::{
    BridgeController, LifecycleState, ShutdownFailure, ShutdownReport, ShutdownStep, StartupError,
    StartupStep,
};
pub use error::{BridgeError, BridgeResult};
pub use policy::{build_policy, FloodPolicy, PolicyKind, RestrictedPolicy};
pub use registry::PortRegistry;
pub use types::{BridgeState, PortHandle, PortInfo, PortState};
