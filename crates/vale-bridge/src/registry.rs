//! Port registry: ground truth for bridge and port membership.
//!
//! The registry tracks every port descriptor (name, state, bridge, index)
//! and every bridge it created (control handle identity, state, live port
//! table). All mutations go through one control lock and reach the fabric
//! while that lock is held, so at most one membership change is in flight.
//!
//! The data plane never takes the lock. Each bridge's [`LivePortTable`] is
//! republished as a fresh snapshot after every attach and detach, and the
//! forwarding policy installed on the bridge reads those snapshots.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use vale_fabric::{
    ControlHandle, Fabric, FabricError, ForwardingPolicy, HandleId, LivePortTable, PortIndex,
};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::error::{BridgeError, BridgeResult};
use crate::types::{BridgeState, PortHandle, PortInfo, PortState};

const SOURCE: &str = "PortRegistry";

#[derive(Debug)]
struct PortEntry {
    state: PortState,
    bridge: Option<String>,
    index: Option<PortIndex>,
}

impl PortEntry {
    fn is_live(&self) -> bool {
        self.state != PortState::Destroyed
    }
}

#[derive(Debug)]
struct BridgeEntry {
    handle: HandleId,
    state: BridgeState,
    table: LivePortTable,
}

#[derive(Debug, Default)]
struct RegistryState {
    ports: HashMap<String, PortEntry>,
    bridges: HashMap<String, BridgeEntry>,
}

impl RegistryState {
    /// Checks that `bridge` is active and `handle` is its control handle.
    fn authorize(&self, bridge: &str, handle: &ControlHandle, action: &str) -> BridgeResult<()> {
        let entry = self
            .bridges
            .get(bridge)
            .filter(|b| b.state == BridgeState::Active)
            .ok_or_else(|| BridgeError::not_found(bridge))?;

        if !handle.matches(entry.handle) {
            audit_log!(audit(AuditCategory::Authorization, action, "bridge", bridge)
                .with_outcome(AuditOutcome::Denied)
                .with_error("control handle does not match"));
            return Err(BridgeError::invalid_handle(bridge));
        }
        Ok(())
    }

    fn table(&self, bridge: &str) -> BridgeResult<&LivePortTable> {
        self.bridges
            .get(bridge)
            .map(|b| &b.table)
            .ok_or_else(|| BridgeError::not_found(bridge))
    }
}

fn audit(category: AuditCategory, action: &str, object_type: &str, object_id: &str) -> AuditRecord {
    AuditRecord::new(category, SOURCE, action)
        .with_object_type(object_type)
        .with_object_id(object_id)
}

/// Maps a fabric failure, reporting a rejected handle as [`BridgeError::InvalidHandle`].
fn from_fabric(bridge: &str, err: FabricError) -> BridgeError {
    if err.is_permission_denied() {
        BridgeError::invalid_handle(bridge)
    } else {
        BridgeError::Fabric(err)
    }
}

/// Registry of bridges and ports backed by a [`Fabric`].
pub struct PortRegistry {
    fabric: Arc<dyn Fabric>,
    state: Mutex<RegistryState>,
}

impl PortRegistry {
    /// Creates an empty registry driving `fabric`.
    pub fn new(fabric: Arc<dyn Fabric>) -> Self {
        Self {
            fabric,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Creates a bridge and returns its control handle.
    ///
    /// A bridge that was destroyed earlier may be created again; the new
    /// bridge gets a new handle and an empty port table.
    #[instrument(skip(self))]
    pub fn create_bridge(&self, name: &str) -> BridgeResult<ControlHandle> {
        let mut state = self.state.lock();
        if matches!(state.bridges.get(name), Some(b) if b.state == BridgeState::Active) {
            return Err(BridgeError::duplicate_name(name));
        }

        let handle = match self.fabric.create_bridge(name) {
            Ok(handle) => handle,
            Err(err) => {
                audit_log!(audit(AuditCategory::ResourceCreate, "create_bridge", "bridge", name)
                    .with_error(err.to_string()));
                return Err(BridgeError::Fabric(err));
            }
        };

        state.bridges.insert(
            name.to_string(),
            BridgeEntry {
                handle: handle.id(),
                state: BridgeState::Active,
                table: LivePortTable::new(),
            },
        );

        audit_log!(audit(AuditCategory::ResourceCreate, "create_bridge", "bridge", name)
            .with_outcome(AuditOutcome::Success));
        info!("Created bridge {}", name);
        Ok(handle)
    }

    /// Registers a port descriptor in CREATED state.
    ///
    /// Fails with [`BridgeError::DuplicateName`] while a live descriptor with
    /// this name exists (CREATED, ATTACHED or DETACHED). A DESTROYED name may
    /// be reused.
    #[instrument(skip(self))]
    pub fn create_port(&self, name: &str) -> BridgeResult<PortHandle> {
        let mut state = self.state.lock();
        if matches!(state.ports.get(name), Some(p) if p.is_live()) {
            return Err(BridgeError::duplicate_name(name));
        }

        if let Err(err) = self.fabric.create_port(name) {
            audit_log!(audit(AuditCategory::ResourceCreate, "create_port", "port", name)
                .with_error(err.to_string()));
            return Err(BridgeError::Fabric(err));
        }

        state.ports.insert(
            name.to_string(),
            PortEntry {
                state: PortState::Created,
                bridge: None,
                index: None,
            },
        );

        audit_log!(audit(AuditCategory::ResourceCreate, "create_port", "port", name)
            .with_outcome(AuditOutcome::Success));
        debug!("Created port {}", name);
        Ok(PortHandle::new(name))
    }

    /// Attaches a CREATED or DETACHED port and returns its assigned index.
    ///
    /// The handle is checked before anything else; a wrong handle leaves
    /// registry and fabric untouched.
    #[instrument(skip(self, handle))]
    pub fn attach(&self, bridge: &str, port: &str, handle: &ControlHandle) -> BridgeResult<PortIndex> {
        let mut state = self.state.lock();
        state.authorize(bridge, handle, "attach")?;

        match state.ports.get(port).filter(|p| p.is_live()) {
            None => return Err(BridgeError::not_found(port)),
            Some(entry) if !entry.state.can_attach() => {
                return Err(BridgeError::already_attached(port))
            }
            Some(_) => {}
        }

        let index = match self.fabric.attach(bridge, port, handle) {
            Ok(index) => index,
            Err(err) => {
                audit_log!(audit(AuditCategory::ResourceModify, "attach", "port", port)
                    .with_error(err.to_string()));
                return Err(from_fabric(bridge, err));
            }
        };

        let table = state.table(bridge)?.clone();
        let current = table.snapshot();
        if current.contains(index) {
            let holder = current.name_of(index).unwrap_or_default().to_string();
            warn!(
                "Fabric assigned index {} on {} to {} but {} holds it; detaching",
                index, bridge, port, holder
            );
            if let Err(err) = self.fabric.detach(bridge, port, handle) {
                warn!("Failed to undo conflicting attach of {}: {}", port, err);
            }
            return Err(BridgeError::IndexConflict {
                bridge: bridge.to_string(),
                index: index.as_u16(),
                holder,
            });
        }
        table.publish(current.with_port(index, port));

        if let Some(entry) = state.ports.get_mut(port) {
            entry.state = PortState::Attached;
            entry.bridge = Some(bridge.to_string());
            entry.index = Some(index);
        }

        audit_log!(audit(AuditCategory::ResourceModify, "attach", "port", port)
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "bridge": bridge,
                "port_index": index.as_u16(),
            })));
        info!("Attached port {} to {} at index {}", port, bridge, index);
        Ok(index)
    }

    /// Detaches an ATTACHED port and returns the index it held.
    #[instrument(skip(self, handle))]
    pub fn detach(&self, bridge: &str, port: &str, handle: &ControlHandle) -> BridgeResult<PortIndex> {
        let mut state = self.state.lock();
        state.authorize(bridge, handle, "detach")?;

        let held = match state.ports.get(port).filter(|p| p.is_live()) {
            None => return Err(BridgeError::not_found(port)),
            Some(entry) => match (entry.state, entry.bridge.as_deref(), entry.index) {
                (PortState::Attached, Some(b), Some(index)) if b == bridge => index,
                _ => {
                    return Err(BridgeError::NotAttached {
                        bridge: bridge.to_string(),
                        port: port.to_string(),
                    })
                }
            },
        };

        match self.fabric.detach(bridge, port, handle) {
            Ok(reported) if reported != held => {
                warn!(
                    "Fabric reported index {} for {} but registry holds {}",
                    reported, port, held
                );
            }
            Ok(_) => {}
            Err(err) => {
                audit_log!(audit(AuditCategory::ResourceModify, "detach", "port", port)
                    .with_error(err.to_string()));
                return Err(from_fabric(bridge, err));
            }
        }

        let table = state.table(bridge)?.clone();
        let current = table.snapshot();
        table.publish(current.without_port(held));

        if let Some(entry) = state.ports.get_mut(port) {
            entry.state = PortState::Detached;
            entry.bridge = None;
            entry.index = None;
        }

        audit_log!(audit(AuditCategory::ResourceModify, "detach", "port", port)
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "bridge": bridge,
                "port_index": held.as_u16(),
            })));
        info!("Detached port {} from {} (index {})", port, bridge, held);
        Ok(held)
    }

    /// Releases a CREATED or DETACHED port. The descriptor stays behind as
    /// a DESTROYED tombstone.
    #[instrument(skip(self))]
    pub fn destroy_port(&self, name: &str) -> BridgeResult<()> {
        let mut state = self.state.lock();
        match state.ports.get(name).filter(|p| p.is_live()) {
            None => return Err(BridgeError::not_found(name)),
            Some(entry) if entry.state == PortState::Attached => {
                return Err(BridgeError::PortAttached {
                    port: name.to_string(),
                })
            }
            Some(_) => {}
        }

        if let Err(err) = self.fabric.destroy_port(name) {
            audit_log!(audit(AuditCategory::ResourceDelete, "destroy_port", "port", name)
                .with_error(err.to_string()));
            return Err(BridgeError::Fabric(err));
        }
        if let Some(entry) = state.ports.get_mut(name) {
            entry.state = PortState::Destroyed;
        }

        audit_log!(audit(AuditCategory::ResourceDelete, "destroy_port", "port", name)
            .with_outcome(AuditOutcome::Success));
        debug!("Destroyed port {}", name);
        Ok(())
    }

    /// Installs `policy` as the bridge's per-frame lookup.
    ///
    /// The fabric receives the bridge's live port table as the policy context.
    #[instrument(skip(self, policy, handle), fields(policy_name = policy.name()))]
    pub fn install_policy(
        &self,
        bridge: &str,
        policy: Arc<dyn ForwardingPolicy>,
        handle: &ControlHandle,
    ) -> BridgeResult<()> {
        let state = self.state.lock();
        state.authorize(bridge, handle, "install_policy")?;

        let table = state.table(bridge)?.clone();
        let policy_name = policy.name().to_string();
        if let Err(err) = self.fabric.install_policy(bridge, policy, table, handle) {
            audit_log!(audit(AuditCategory::SecurityPolicy, "install_policy", "bridge", bridge)
                .with_error(err.to_string()));
            return Err(from_fabric(bridge, err));
        }

        audit_log!(audit(AuditCategory::SecurityPolicy, "install_policy", "bridge", bridge)
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({ "policy": policy_name })));
        info!("Installed forwarding policy {} on {}", policy_name, bridge);
        Ok(())
    }

    /// Destroys a bridge with no attached ports.
    #[instrument(skip(self, handle))]
    pub fn destroy_bridge(&self, bridge: &str, handle: &ControlHandle) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.authorize(bridge, handle, "destroy_bridge")?;

        let attached = state.table(bridge)?.load().len();
        if attached > 0 {
            return Err(BridgeError::BridgeBusy {
                bridge: bridge.to_string(),
                attached,
            });
        }

        if let Err(err) = self.fabric.destroy_bridge(bridge, handle) {
            audit_log!(audit(AuditCategory::ResourceDelete, "destroy_bridge", "bridge", bridge)
                .with_error(err.to_string()));
            return Err(from_fabric(bridge, err));
        }
        if let Some(entry) = state.bridges.get_mut(bridge) {
            entry.state = BridgeState::Destroyed;
        }

        audit_log!(audit(AuditCategory::ResourceDelete, "destroy_bridge", "bridge", bridge)
            .with_outcome(AuditOutcome::Success));
        info!("Destroyed bridge {}", bridge);
        Ok(())
    }

    /// Current state of a port, or `None` if the name was never created.
    pub fn port_state(&self, name: &str) -> Option<PortState> {
        self.state.lock().ports.get(name).map(|p| p.state)
    }

    /// Index held by a port while it is attached.
    pub fn port_index(&self, name: &str) -> Option<PortIndex> {
        self.state.lock().ports.get(name).and_then(|p| p.index)
    }

    /// Full descriptor of a port.
    pub fn port_info(&self, name: &str) -> Option<PortInfo> {
        self.state.lock().ports.get(name).map(|p| PortInfo {
            name: name.to_string(),
            state: p.state,
            bridge: p.bridge.clone(),
            index: p.index.map(PortIndex::as_u16),
        })
    }

    /// State of a bridge; never-created bridges report UNCREATED.
    pub fn bridge_state(&self, name: &str) -> BridgeState {
        self.state
            .lock()
            .bridges
            .get(name)
            .map(|b| b.state)
            .unwrap_or(BridgeState::Uncreated)
    }

    /// Attached ports of a bridge in index order.
    pub fn attached_ports(&self, bridge: &str) -> Vec<(PortIndex, String)> {
        let table = match self.live_table(bridge) {
            Some(live) => live.snapshot(),
            None => return Vec::new(),
        };
        table
            .iter()
            .map(|(index, name)| (index, name.to_string()))
            .collect()
    }

    /// Live port table of a bridge, for forwarding contexts and diagnostics.
    pub fn live_table(&self, bridge: &str) -> Option<LivePortTable> {
        self.state.lock().bridges.get(bridge).map(|b| b.table.clone())
    }
}
