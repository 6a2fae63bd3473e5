//! Control-path interface of the switch fabric.

use std::sync::Arc;

use crate::error::FabricResult;
use crate::policy::ForwardingPolicy;
use crate::table::LivePortTable;
use crate::types::{ControlHandle, PortIndex};

/// Operations the bridge core consumes from the packet-transport runtime.
///
/// Implementations own packet I/O and index assignment. Every call that
/// mutates a bridge takes the bridge's [`ControlHandle`] and must reject a
/// handle other than the one returned by [`create_bridge`](Self::create_bridge)
/// with [`FabricStatus::PermissionDenied`](crate::FabricStatus::PermissionDenied).
///
/// # Thread Safety
///
/// Fabrics are shared between the control plane and any number of
/// forwarding contexts, so implementations must be `Send + Sync`.
pub trait Fabric: Send + Sync {
    /// Creates a bridge in exclusive mode and returns its control handle.
    fn create_bridge(&self, name: &str) -> FabricResult<ControlHandle>;

    /// Allocates a persistent virtual port.
    fn create_port(&self, name: &str) -> FabricResult<()>;

    /// Releases a virtual port that is not attached anywhere.
    fn destroy_port(&self, name: &str) -> FabricResult<()>;

    /// Attaches a port and returns the lowest index free on the bridge.
    fn attach(&self, bridge: &str, port: &str, handle: &ControlHandle) -> FabricResult<PortIndex>;

    /// Detaches a port and returns the index it held.
    fn detach(&self, bridge: &str, port: &str, handle: &ControlHandle) -> FabricResult<PortIndex>;

    /// Installs the per-frame lookup for a bridge.
    ///
    /// `context` is the bridge's live port table; the fabric hands it to the
    /// policy on every lookup.
    fn install_policy(
        &self,
        bridge: &str,
        policy: Arc<dyn ForwardingPolicy>,
        context: LivePortTable,
        handle: &ControlHandle,
    ) -> FabricResult<()>;

    /// Destroys a bridge that has no attached ports.
    fn destroy_bridge(&self, bridge: &str, handle: &ControlHandle) -> FabricResult<()>;
}
