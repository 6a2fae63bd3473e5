//! In-memory fabric.
//!
//! `SoftFabric` reproduces the control-path behaviour of a VALE switch
//! (name limits, exclusive bridges, lowest-free index assignment, errno-style
//! failures) without any packet I/O. The daemon runs on it in simulation
//! mode and the tests use it as the fabric under the bridge core.
//!
//! Forwarding contexts obtain a [`Datapath`] per bridge. A datapath reads the
//! installed policy through an `ArcSwapOption`, so frames never wait on the
//! control-plane lock.

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::error::{FabricError, FabricOp, FabricResult, FabricStatus};
use crate::fabric::Fabric;
use crate::policy::{ForwardingPolicy, FrameMeta, InstalledPolicy};
use crate::table::{LivePortTable, PortTable};
use crate::types::{ControlHandle, HandleId, PortIndex, PortMask};

/// Longest bridge or port name accepted (NETMAP_REQ_IFNAMSIZ).
pub const MAX_NAME_LEN: usize = 64;

/// One control-path call as seen by the fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricCall {
    pub op: FabricOp,
    /// Bridge name for bridge-scoped calls, port name otherwise.
    pub target: String,
    /// Port name for attach/detach.
    pub port: Option<String>,
}

impl FabricCall {
    fn new(op: FabricOp, target: &str, port: Option<&str>) -> Self {
        Self {
            op,
            target: target.to_string(),
            port: port.map(str::to_string),
        }
    }
}

/// Lock-free per-frame access to one bridge.
#[derive(Clone)]
pub struct Datapath {
    policy: Arc<ArcSwapOption<InstalledPolicy>>,
    flood: LivePortTable,
}

impl Datapath {
    /// Returns the destinations for a frame.
    ///
    /// Without an installed policy the bridge floods to every other attached
    /// port, like an unconfigured VALE bridge.
    #[inline]
    pub fn forward(&self, frame: &FrameMeta<'_>) -> PortMask {
        let policy = self.policy.load();
        match policy.as_deref() {
            Some(installed) => installed.decide(frame),
            None => {
                let table = self.flood.load();
                if table.contains(frame.src) {
                    table.attached().without(frame.src)
                } else {
                    PortMask::EMPTY
                }
            }
        }
    }

    /// Name of the installed policy, if any.
    pub fn policy_name(&self) -> Option<String> {
        self.policy
            .load()
            .as_deref()
            .map(|p| p.policy_name().to_string())
    }
}

struct SoftBridge {
    handle: HandleId,
    ports: HashMap<String, PortIndex>,
    used: PortMask,
    /// Fabric-side view used for flooding before a policy is installed.
    flood: LivePortTable,
    policy: Arc<ArcSwapOption<InstalledPolicy>>,
}

impl SoftBridge {
    fn publish_flood_table(&self) {
        let table = self
            .ports
            .iter()
            .fold(PortTable::new(), |t, (name, index)| {
                t.with_port(*index, name)
            });
        self.flood.publish(table);
    }
}

#[derive(Default)]
struct SoftState {
    bridges: HashMap<String, SoftBridge>,
    ports: HashSet<String>,
    injected: HashMap<(FabricOp, String), FabricStatus>,
    journal: Vec<FabricCall>,
}

impl SoftState {
    fn record(&mut self, call: FabricCall) -> FabricResult<()> {
        let key = (call.op, call.port.clone().unwrap_or_else(|| call.target.clone()));
        let op = call.op;
        self.journal.push(call);
        match self.injected.remove(&key) {
            Some(status) => Err(FabricError::new(op, key.1, status)),
            None => Ok(()),
        }
    }

    fn bridge_mut(
        &mut self,
        op: FabricOp,
        name: &str,
        handle: &ControlHandle,
    ) -> FabricResult<&mut SoftBridge> {
        let bridge = self
            .bridges
            .get_mut(name)
            .ok_or_else(|| FabricError::new(op, name, FabricStatus::NoDevice))?;
        if !handle.matches(bridge.handle) {
            return Err(FabricError::new(op, name, FabricStatus::PermissionDenied));
        }
        Ok(bridge)
    }
}

/// In-memory [`Fabric`] implementation.
#[derive(Default)]
pub struct SoftFabric {
    state: Mutex<SoftState>,
}

impl SoftFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `op` on `resource` fail with `status`.
    ///
    /// `resource` is the port name for port-scoped operations (including
    /// attach and detach) and the bridge name otherwise.
    pub fn inject_failure(&self, op: FabricOp, resource: &str, status: FabricStatus) {
        self.state
            .lock()
            .injected
            .insert((op, resource.to_string()), status);
    }

    /// Returns every control-path call received so far, in order.
    pub fn journal(&self) -> Vec<FabricCall> {
        self.state.lock().journal.clone()
    }

    /// Returns a forwarding context for `bridge`.
    pub fn datapath(&self, bridge: &str) -> Option<Datapath> {
        self.state.lock().bridges.get(bridge).map(|b| Datapath {
            policy: Arc::clone(&b.policy),
            flood: b.flood.clone(),
        })
    }

    pub fn bridge_exists(&self, bridge: &str) -> bool {
        self.state.lock().bridges.contains_key(bridge)
    }

    pub fn port_exists(&self, port: &str) -> bool {
        self.state.lock().ports.contains(port)
    }

    /// Index the fabric assigned to `port` on `bridge`.
    pub fn port_index(&self, bridge: &str, port: &str) -> Option<PortIndex> {
        self.state
            .lock()
            .bridges
            .get(bridge)
            .and_then(|b| b.ports.get(port).copied())
    }

    fn check_name(op: FabricOp, name: &str) -> FabricResult<()> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(FabricError::new(op, name, FabricStatus::InvalidArgument));
        }
        Ok(())
    }
}

impl Fabric for SoftFabric {
    fn create_bridge(&self, name: &str) -> FabricResult<ControlHandle> {
        let mut state = self.state.lock();
        state.record(FabricCall::new(FabricOp::CreateBridge, name, None))?;
        Self::check_name(FabricOp::CreateBridge, name)?;
        if state.bridges.contains_key(name) {
            return Err(FabricError::new(FabricOp::CreateBridge, name, FabricStatus::Exists));
        }

        let handle = ControlHandle::issue();
        state.bridges.insert(
            name.to_string(),
            SoftBridge {
                handle: handle.id(),
                ports: HashMap::new(),
                used: PortMask::EMPTY,
                flood: LivePortTable::new(),
                policy: Arc::new(ArcSwapOption::empty()),
            },
        );
        debug!(bridge = name, "soft fabric: bridge created");
        Ok(handle)
    }

    fn create_port(&self, name: &str) -> FabricResult<()> {
        let mut state = self.state.lock();
        state.record(FabricCall::new(FabricOp::CreatePort, name, None))?;
        Self::check_name(FabricOp::CreatePort, name)?;
        if !state.ports.insert(name.to_string()) {
            return Err(FabricError::new(FabricOp::CreatePort, name, FabricStatus::Exists));
        }
        debug!(port = name, "soft fabric: port created");
        Ok(())
    }

    fn destroy_port(&self, name: &str) -> FabricResult<()> {
        let mut state = self.state.lock();
        state.record(FabricCall::new(FabricOp::DestroyPort, name, None))?;
        if !state.ports.contains(name) {
            return Err(FabricError::new(FabricOp::DestroyPort, name, FabricStatus::NoDevice));
        }
        if state.bridges.values().any(|b| b.ports.contains_key(name)) {
            return Err(FabricError::new(FabricOp::DestroyPort, name, FabricStatus::Busy));
        }
        state.ports.remove(name);
        debug!(port = name, "soft fabric: port destroyed");
        Ok(())
    }

    fn attach(&self, bridge: &str, port: &str, handle: &ControlHandle) -> FabricResult<PortIndex> {
        let mut state = self.state.lock();
        state.record(FabricCall::new(FabricOp::Attach, bridge, Some(port)))?;
        if !state.ports.contains(port) {
            // Validate the bridge and handle first so a bad handle is reported as such.
            state.bridge_mut(FabricOp::Attach, bridge, handle)?;
            return Err(FabricError::new(FabricOp::Attach, port, FabricStatus::NoDevice));
        }
        if state.bridges.values().any(|b| b.ports.contains_key(port)) {
            state.bridge_mut(FabricOp::Attach, bridge, handle)?;
            return Err(FabricError::new(FabricOp::Attach, port, FabricStatus::Busy));
        }

        let entry = state.bridge_mut(FabricOp::Attach, bridge, handle)?;
        let index = entry
            .used
            .first_free()
            .ok_or_else(|| FabricError::new(FabricOp::Attach, bridge, FabricStatus::NoSpace))?;
        entry.used.insert(index);
        entry.ports.insert(port.to_string(), index);
        entry.publish_flood_table();
        debug!(bridge, port, %index, "soft fabric: port attached");
        Ok(index)
    }

    fn detach(&self, bridge: &str, port: &str, handle: &ControlHandle) -> FabricResult<PortIndex> {
        let mut state = self.state.lock();
        state.record(FabricCall::new(FabricOp::Detach, bridge, Some(port)))?;
        let entry = state.bridge_mut(FabricOp::Detach, bridge, handle)?;
        let index = entry
            .ports
            .remove(port)
            .ok_or_else(|| FabricError::new(FabricOp::Detach, port, FabricStatus::NoDevice))?;
        entry.used.remove(index);
        entry.publish_flood_table();
        debug!(bridge, port, %index, "soft fabric: port detached");
        Ok(index)
    }

    fn install_policy(
        &self,
        bridge: &str,
        policy: Arc<dyn ForwardingPolicy>,
        context: LivePortTable,
        handle: &ControlHandle,
    ) -> FabricResult<()> {
        let mut state = self.state.lock();
        state.record(FabricCall::new(FabricOp::InstallPolicy, bridge, None))?;
        let entry = state.bridge_mut(FabricOp::InstallPolicy, bridge, handle)?;
        let name = policy.name().to_string();
        entry
            .policy
            .store(Some(Arc::new(InstalledPolicy::new(policy, context))));
        debug!(bridge, policy = %name, "soft fabric: policy installed");
        Ok(())
    }

    fn destroy_bridge(&self, bridge: &str, handle: &ControlHandle) -> FabricResult<()> {
        let mut state = self.state.lock();
        state.record(FabricCall::new(FabricOp::DestroyBridge, bridge, None))?;
        let entry = state.bridge_mut(FabricOp::DestroyBridge, bridge, handle)?;
        if !entry.ports.is_empty() {
            return Err(FabricError::new(FabricOp::DestroyBridge, bridge, FabricStatus::Busy));
        }
        entry.policy.store(None);
        state.bridges.remove(bridge);
        debug!(bridge, "soft fabric: bridge destroyed");
        Ok(())
    }
}
