//! Lifecycle integration tests
//!
//! Drives the controller and registry against the in-memory fabric and checks
//! what the fabric observed.

use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use vale_bridge::{
    BridgeConfig, BridgeController, BridgeError, BridgeState, FloodPolicy, LifecycleState,
    PortRegistry, PortState, RestrictedPolicy, ShutdownStep, StartupStep,
};
use vale_fabric::{
    ControlHandle, FabricCall, FabricOp, FabricStatus, FrameMeta, PortIndex, PortMask, SoftFabric,
};

const BRIDGE: &str = "vale0:";

fn idx(raw: u16) -> PortIndex {
    PortIndex::new(raw).unwrap()
}

fn setup(config: BridgeConfig) -> (Arc<SoftFabric>, BridgeController) {
    let fabric = Arc::new(SoftFabric::new());
    let registry = Arc::new(PortRegistry::new(fabric.clone()));
    (fabric, BridgeController::new(registry, config))
}

fn call(op: FabricOp, target: &str, port: Option<&str>) -> FabricCall {
    FabricCall {
        op,
        target: target.to_string(),
        port: port.map(str::to_string),
    }
}

fn forward(fabric: &SoftFabric, src: u16) -> Vec<u16> {
    fabric
        .datapath(BRIDGE)
        .unwrap()
        .forward(&FrameMeta::new(idx(src), &[0u8; 60]))
        .iter()
        .map(PortIndex::as_u16)
        .collect()
}

// ============================================================================
// STARTUP
// ============================================================================

#[test]
fn test_default_startup_forwarding() {
    let (fabric, mut ctl) = setup(BridgeConfig::default());
    ctl.startup().unwrap();
    assert_eq!(ctl.state(), LifecycleState::Active);

    // v0 broadcasts to v1 and v2; v1 and v2 are restricted sources.
    assert_eq!(forward(&fabric, 0), vec![1, 2]);
    assert!(forward(&fabric, 1).is_empty());
    assert!(forward(&fabric, 2).is_empty());
}

#[test]
fn test_startup_call_order() {
    let (fabric, mut ctl) = setup(BridgeConfig::default());
    ctl.startup().unwrap();

    assert_eq!(
        fabric.journal(),
        vec![
            call(FabricOp::CreateBridge, BRIDGE, None),
            call(FabricOp::CreatePort, "v0", None),
            call(FabricOp::CreatePort, "v1", None),
            call(FabricOp::CreatePort, "v2", None),
            call(FabricOp::Attach, BRIDGE, Some("v0")),
            call(FabricOp::Attach, BRIDGE, Some("v1")),
            call(FabricOp::Attach, BRIDGE, Some("v2")),
            call(FabricOp::InstallPolicy, BRIDGE, None),
        ]
    );
}

#[test]
fn test_startup_failure_reports_step_and_resource() {
    let (fabric, mut ctl) = setup(BridgeConfig::default());
    fabric.inject_failure(FabricOp::Attach, "v1", FabricStatus::NoSpace);

    let err = ctl.startup().unwrap_err();
    assert_eq!(err.step, StartupStep::AttachPort);
    assert_eq!(err.resource, "v1");
    assert_eq!(
        err.source.fabric().map(|e| e.status()),
        Some(FabricStatus::NoSpace)
    );
    assert_eq!(ctl.state(), LifecycleState::Failed);

    // Nothing after the failing attach reached the fabric.
    let journal = fabric.journal();
    assert_eq!(journal.last(), Some(&call(FabricOp::Attach, BRIDGE, Some("v1"))));
    assert_eq!(ctl.registry().port_state("v0"), Some(PortState::Attached));
    assert_eq!(ctl.registry().port_state("v2"), Some(PortState::Created));
}

#[test]
fn test_failed_startup_then_shutdown_cleans_up() {
    let (fabric, mut ctl) = setup(BridgeConfig::default());
    fabric.inject_failure(FabricOp::InstallPolicy, BRIDGE, FabricStatus::NoMemory);
    let err = ctl.startup().unwrap_err();
    assert_eq!(err.step, StartupStep::InstallPolicy);

    let report = ctl.shutdown().unwrap();
    assert!(report.is_clean());
    assert!(!fabric.bridge_exists(BRIDGE));
    assert_eq!(ctl.registry().bridge_state(BRIDGE), BridgeState::Destroyed);
}

#[test]
fn test_rollback_on_failure() {
    let mut config = BridgeConfig::default();
    config.startup.rollback_on_failure = true;
    let (fabric, mut ctl) = setup(config);
    fabric.inject_failure(FabricOp::CreatePort, "v2", FabricStatus::NoMemory);

    let err = ctl.startup().unwrap_err();
    assert_eq!(err.step, StartupStep::CreatePort);
    assert_eq!(ctl.state(), LifecycleState::Terminated);

    let tail: Vec<FabricCall> = fabric.journal().into_iter().skip(4).collect();
    assert_eq!(
        tail,
        vec![
            call(FabricOp::DestroyPort, "v0", None),
            call(FabricOp::DestroyPort, "v1", None),
            call(FabricOp::DestroyBridge, BRIDGE, None),
        ]
    );
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_shutdown_order() {
    let (fabric, mut ctl) = setup(BridgeConfig::default());
    ctl.startup().unwrap();
    let before = fabric.journal().len();

    let report = ctl.shutdown().unwrap();
    assert!(report.is_clean());

    let tail: Vec<FabricCall> = fabric.journal().into_iter().skip(before).collect();
    assert_eq!(
        tail,
        vec![
            call(FabricOp::Detach, BRIDGE, Some("v0")),
            call(FabricOp::Detach, BRIDGE, Some("v1")),
            call(FabricOp::Detach, BRIDGE, Some("v2")),
            call(FabricOp::DestroyPort, "v0", None),
            call(FabricOp::DestroyPort, "v1", None),
            call(FabricOp::DestroyPort, "v2", None),
            call(FabricOp::DestroyBridge, BRIDGE, None),
        ]
    );
}

#[test]
fn test_shutdown_attempts_every_step_after_first_detach_fails() {
    let (fabric, mut ctl) = setup(BridgeConfig::default());
    ctl.startup().unwrap();
    fabric.inject_failure(FabricOp::Detach, "v0", FabricStatus::NotFound);

    let report = ctl.shutdown().unwrap();
    assert_eq!(report.attempted(), 7);
    assert_eq!(report.failures()[0].step, ShutdownStep::DetachPort);
    assert_eq!(report.failures()[0].resource, "v0");
    assert_eq!(
        report.failures()[0].error.fabric().map(|e| e.status()),
        Some(FabricStatus::NotFound)
    );

    // Later ports were still detached and destroyed.
    let journal = fabric.journal();
    for port in ["v1", "v2"] {
        assert!(journal.contains(&call(FabricOp::Detach, BRIDGE, Some(port))));
        assert!(journal.contains(&call(FabricOp::DestroyPort, port, None)));
    }

    // v0 and the bridge are still held; a second shutdown finishes the job.
    assert_eq!(ctl.state(), LifecycleState::Failed);
    assert!(fabric.bridge_exists(BRIDGE));
    let before = fabric.journal().len();
    let report = ctl.shutdown().unwrap();
    assert!(report.is_clean());
    let tail: Vec<FabricCall> = fabric.journal().into_iter().skip(before).collect();
    assert_eq!(
        tail,
        vec![
            call(FabricOp::Detach, BRIDGE, Some("v0")),
            call(FabricOp::DestroyPort, "v0", None),
            call(FabricOp::DestroyBridge, BRIDGE, None),
        ]
    );
    assert_eq!(ctl.state(), LifecycleState::Terminated);
    assert!(!fabric.bridge_exists(BRIDGE));
}

// ============================================================================
// REGISTRY PROPERTIES
// ============================================================================

#[test]
fn test_foreign_handle_never_mutates() {
    let fabric = Arc::new(SoftFabric::new());
    let registry = PortRegistry::new(fabric.clone());
    let handle = registry.create_bridge(BRIDGE).unwrap();
    registry.create_port("v0").unwrap();
    registry.create_port("v1").unwrap();
    registry.attach(BRIDGE, "v0", &handle).unwrap();
    registry
        .install_policy(BRIDGE, Arc::new(FloodPolicy), &handle)
        .unwrap();
    let datapath = fabric.datapath(BRIDGE).unwrap();

    let forged = ControlHandle::issue();
    let journal = fabric.journal();

    let results = [
        registry.attach(BRIDGE, "v1", &forged).map(|_| ()),
        registry.detach(BRIDGE, "v0", &forged).map(|_| ()),
        registry.install_policy(
            BRIDGE,
            Arc::new(RestrictedPolicy::new(PortMask::default())),
            &forged,
        ),
        registry.destroy_bridge(BRIDGE, &forged),
    ];
    for result in results {
        assert_eq!(result, Err(BridgeError::invalid_handle(BRIDGE)));
    }

    assert_eq!(fabric.journal(), journal);
    assert_eq!(registry.port_state("v0"), Some(PortState::Attached));
    assert_eq!(registry.port_state("v1"), Some(PortState::Created));
    assert_eq!(registry.attached_ports(BRIDGE).len(), 1);
    assert_eq!(datapath.policy_name().as_deref(), Some("flood"));
}

#[test]
fn test_detached_index_is_reused() {
    let fabric = Arc::new(SoftFabric::new());
    let registry = PortRegistry::new(fabric);
    let handle = registry.create_bridge(BRIDGE).unwrap();
    for port in ["a", "b", "c", "d"] {
        registry.create_port(port).unwrap();
    }

    assert_eq!(registry.attach(BRIDGE, "a", &handle).unwrap(), idx(0));
    assert_eq!(registry.attach(BRIDGE, "b", &handle).unwrap(), idx(1));
    assert_eq!(registry.attach(BRIDGE, "c", &handle).unwrap(), idx(2));
    assert_eq!(registry.detach(BRIDGE, "b", &handle).unwrap(), idx(1));
    assert_eq!(registry.attach(BRIDGE, "d", &handle).unwrap(), idx(1));
}

#[test]
fn test_random_attach_detach_keeps_indices_unique() {
    let fabric = Arc::new(SoftFabric::new());
    let registry = PortRegistry::new(fabric.clone());
    let handle = registry.create_bridge(BRIDGE).unwrap();
    let ports: Vec<String> = (0..16).map(|i| format!("p{}", i)).collect();
    for port in &ports {
        registry.create_port(port).unwrap();
    }

    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..2000 {
        let port = &ports[rng.gen_range(0..ports.len())];
        match registry.port_state(port) {
            Some(PortState::Attached) => {
                registry.detach(BRIDGE, port, &handle).unwrap();
            }
            _ => {
                registry.attach(BRIDGE, port, &handle).unwrap();
            }
        }

        let attached = registry.attached_ports(BRIDGE);
        let indices: HashSet<PortIndex> = attached.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices.len(), attached.len(), "duplicate index");

        let by_name: HashMap<&str, PortIndex> = ports
            .iter()
            .filter_map(|p| registry.port_index(p).map(|i| (p.as_str(), i)))
            .collect();
        assert_eq!(by_name.len(), attached.len());
        for (index, name) in &attached {
            assert_eq!(by_name.get(name.as_str()), Some(index));
            assert_eq!(fabric.port_index(BRIDGE, name), Some(*index));
        }
    }
}
