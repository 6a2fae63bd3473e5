//! Bridge lifecycle controller.
//!
//! The controller provisions one bridge from a [`BridgeConfig`]: it creates
//! the bridge, creates and attaches every configured port, then installs the
//! forwarding policy. It is the only holder of the bridge's
//! [`ControlHandle`] and never hands it out.
//!
//! Startup is strictly ordered and stops at the first failure. Shutdown is
//! best-effort over what the controller holds: each detach, each port
//! destroy and the bridge destroy are attempted even when earlier steps
//! fail, and each failure is collected in the returned [`ShutdownReport`].
//! Whatever a failed step leaves behind stays held for the next shutdown.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use vale_fabric::{ControlHandle, ForwardingPolicy, PortIndex};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::policy::build_policy;
use crate::registry::PortRegistry;
use crate::types::{BridgeState, PortState};

const SOURCE: &str = "BridgeController";

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    CreatingBridge,
    CreatingPorts,
    AttachingPorts,
    /// Policy installed, bridge forwarding.
    Active,
    DetachingPorts,
    DestroyingPorts,
    DestroyingBridge,
    Terminated,
    /// Startup stopped at a step, or a teardown left resources behind.
    /// `shutdown` releases what is still held.
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "UNINITIALIZED",
            LifecycleState::CreatingBridge => "CREATING_BRIDGE",
            LifecycleState::CreatingPorts => "CREATING_PORTS",
            LifecycleState::AttachingPorts => "ATTACHING_PORTS",
            LifecycleState::Active => "POLICY_INSTALLED",
            LifecycleState::DetachingPorts => "DETACHING_PORTS",
            LifecycleState::DestroyingPorts => "DESTROYING_PORTS",
            LifecycleState::DestroyingBridge => "DESTROYING_BRIDGE",
            LifecycleState::Terminated => "TERMINATED",
            LifecycleState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Startup step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartupStep {
    CreateBridge,
    CreatePort,
    AttachPort,
    InstallPolicy,
}

impl fmt::Display for StartupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StartupStep::CreateBridge => "create_bridge",
            StartupStep::CreatePort => "create_port",
            StartupStep::AttachPort => "attach_port",
            StartupStep::InstallPolicy => "install_policy",
        })
    }
}

/// First failure of a startup sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("startup failed at {step} for '{resource}': {source}")]
pub struct StartupError {
    pub step: StartupStep,
    /// Bridge or port name the step was acting on.
    pub resource: String,
    #[source]
    pub source: BridgeError,
}

impl StartupError {
    /// Returns a mapper that tags a registry error with the failing step.
    fn at(step: StartupStep, resource: &str) -> impl FnOnce(BridgeError) -> Self {
        let resource = resource.to_string();
        move |source| Self {
            step,
            resource,
            source,
        }
    }
}

/// Shutdown sub-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownStep {
    DetachPort,
    DestroyPort,
    DestroyBridge,
}

impl fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownStep::DetachPort => "detach_port",
            ShutdownStep::DestroyPort => "destroy_port",
            ShutdownStep::DestroyBridge => "destroy_bridge",
        })
    }
}

/// One failed shutdown sub-step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownFailure {
    pub step: ShutdownStep,
    pub resource: String,
    pub error: BridgeError,
}

impl fmt::Display for ShutdownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.step, self.resource, self.error)
    }
}

/// Outcome of a shutdown sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    attempted: usize,
    failures: Vec<ShutdownFailure>,
}

impl ShutdownReport {
    /// Number of sub-steps attempted.
    pub fn attempted(&self) -> usize {
        self.attempted
    }

    pub fn failures(&self) -> &[ShutdownFailure] {
        &self.failures
    }

    /// True if every attempted sub-step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record<T>(&mut self, step: ShutdownStep, resource: &str, result: BridgeResult<T>) {
        self.attempted += 1;
        if let Err(error) = result {
            warn!("Shutdown step {} failed for {}: {}", step, resource, error);
            self.failures.push(ShutdownFailure {
                step,
                resource: resource.to_string(),
                error,
            });
        }
    }
}

/// Drives a bridge from creation to teardown.
pub struct BridgeController {
    registry: Arc<PortRegistry>,
    config: BridgeConfig,
    policy: Arc<dyn ForwardingPolicy>,
    handle: Option<ControlHandle>,
    state: LifecycleState,
    /// Ports created by startup and not yet destroyed, in order.
    created: Vec<String>,
    /// Ports attached by startup and not yet detached, in order.
    attached: Vec<String>,
}

impl BridgeController {
    /// Creates a controller that installs the policy selected by `config`.
    pub fn new(registry: Arc<PortRegistry>, config: BridgeConfig) -> Self {
        let policy = build_policy(&config.policy);
        Self::with_policy(registry, config, policy)
    }

    /// Creates a controller that installs `policy` instead of the configured one.
    pub fn with_policy(
        registry: Arc<PortRegistry>,
        config: BridgeConfig,
        policy: Arc<dyn ForwardingPolicy>,
    ) -> Self {
        Self {
            registry,
            config,
            policy,
            handle: None,
            state: LifecycleState::Uninitialized,
            created: Vec::new(),
            attached: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn registry(&self) -> &Arc<PortRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn bridge_name(&self) -> &str {
        &self.config.bridge.name
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    /// Attached ports and their indices, in configuration order.
    pub fn port_indices(&self) -> Vec<(String, PortIndex)> {
        self.config
            .bridge
            .ports
            .iter()
            .filter_map(|name| {
                self.registry
                    .port_index(name)
                    .map(|index| (name.clone(), index))
            })
            .collect()
    }

    /// Runs the startup sequence.
    ///
    /// Stops at the first failing step. With `rollback_on_failure` set, the
    /// resources created so far are torn down before the error is returned.
    pub fn startup(&mut self) -> Result<(), StartupError> {
        let bridge = self.config.bridge.name.clone();
        if self.state != LifecycleState::Uninitialized {
            return Err(StartupError {
                step: StartupStep::CreateBridge,
                resource: bridge,
                source: BridgeError::invalid_state("startup", self.state),
            });
        }

        info!(
            "Starting bridge {} with {} port(s), policy {}",
            bridge,
            self.config.bridge.ports.len(),
            self.policy.name()
        );
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "startup")
            .with_object_type("bridge")
            .with_object_id(bridge.as_str())
            .with_details(serde_json::json!({
                "ports": self.config.bridge.ports,
                "policy": self.policy.name(),
            })));

        match self.run_startup(&bridge) {
            Ok(()) => {
                self.state = LifecycleState::Active;
                audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "startup")
                    .with_outcome(AuditOutcome::Success)
                    .with_object_type("bridge")
                    .with_object_id(bridge.as_str()));
                info!("Bridge {} active", bridge);
                Ok(())
            }
            Err(err) => {
                self.state = LifecycleState::Failed;
                error!("{}", err);
                audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "startup")
                    .with_object_type("bridge")
                    .with_object_id(bridge.as_str())
                    .with_details(serde_json::json!({
                        "step": err.step.to_string(),
                        "resource": err.resource,
                    }))
                    .with_error(err.source.to_string()));

                if self.config.startup.rollback_on_failure {
                    self.rollback();
                }
                Err(err)
            }
        }
    }

    fn run_startup(&mut self, bridge: &str) -> Result<(), StartupError> {
        self.state = LifecycleState::CreatingBridge;
        let handle = self
            .registry
            .create_bridge(bridge)
            .map_err(StartupError::at(StartupStep::CreateBridge, bridge))?;
        let handle = self.handle.insert(handle);

        self.state = LifecycleState::CreatingPorts;
        for port in &self.config.bridge.ports {
            self.registry
                .create_port(port)
                .map_err(StartupError::at(StartupStep::CreatePort, port))?;
            self.created.push(port.clone());
        }

        self.state = LifecycleState::AttachingPorts;
        for port in &self.config.bridge.ports {
            let index = self
                .registry
                .attach(bridge, port, handle)
                .map_err(StartupError::at(StartupStep::AttachPort, port))?;
            self.attached.push(port.clone());
            info!("Port {} attached to {} at index {}", port, bridge, index);
        }

        self.registry
            .install_policy(bridge, Arc::clone(&self.policy), handle)
            .map_err(StartupError::at(StartupStep::InstallPolicy, bridge))?;
        Ok(())
    }

    /// Tears down what a failed startup created.
    fn rollback(&mut self) {
        let bridge = self.config.bridge.name.clone();
        warn!(
            "Rolling back bridge {}: {} attached, {} created port(s)",
            bridge,
            self.attached.len(),
            self.created.len()
        );

        let report = self.teardown(&bridge);
        if self.state == LifecycleState::Terminated {
            info!("Rollback of {} complete", bridge);
        } else {
            for failure in report.failures() {
                error!("Rollback of {} incomplete: {}", bridge, failure);
            }
        }
    }

    /// Runs the shutdown sequence.
    ///
    /// Allowed from ACTIVE and from FAILED (to clean up a partial startup or
    /// retry an incomplete teardown). Every port this controller attached is
    /// detached and every port it created is destroyed, in configuration
    /// order, and the bridge is destroyed last. Resources that were never
    /// created are not touched.
    ///
    /// The controller ends in TERMINATED once nothing is left; otherwise it
    /// stays FAILED, keeps its control handle and `shutdown` may be called
    /// again for the remainder.
    pub fn shutdown(&mut self) -> BridgeResult<ShutdownReport> {
        if !matches!(self.state, LifecycleState::Active | LifecycleState::Failed) {
            return Err(BridgeError::invalid_state("shutdown", self.state));
        }

        let bridge = self.config.bridge.name.clone();
        info!("Shutting down bridge {}", bridge);
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "shutdown")
            .with_object_type("bridge")
            .with_object_id(bridge.as_str()));

        let report = self.teardown(&bridge);

        if report.is_clean() {
            audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "shutdown")
                .with_outcome(AuditOutcome::Success)
                .with_object_type("bridge")
                .with_object_id(bridge.as_str())
                .with_details(serde_json::json!({ "steps": report.attempted() })));
            info!("Bridge {} shut down", bridge);
        } else {
            let failures: Vec<String> = report.failures().iter().map(|f| f.to_string()).collect();
            audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "shutdown")
                .with_object_type("bridge")
                .with_object_id(bridge.as_str())
                .with_details(serde_json::json!({
                    "steps": report.attempted(),
                    "failures": failures,
                    "state": self.state.as_str(),
                }))
                .with_error(format!("{} step(s) failed", report.failures().len())));
            warn!(
                "Bridge {} shut down with {} failed step(s), state {}",
                bridge,
                report.failures().len(),
                self.state
            );
        }
        Ok(report)
    }

    /// Releases the resources this controller still holds.
    ///
    /// After each phase the held lists are reconciled with the registry, so
    /// a failed step stays held for the next attempt and a step that failed
    /// because the resource is already gone does not.
    fn teardown(&mut self, bridge: &str) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        self.state = LifecycleState::DetachingPorts;
        if let Some(handle) = self.handle.as_ref() {
            for port in &self.attached {
                let result = self.registry.detach(bridge, port, handle).map(|index| {
                    info!("Port {} detached from {}, released index {}", port, bridge, index);
                });
                report.record(ShutdownStep::DetachPort, port, result);
            }
        }
        let registry = &self.registry;
        self.attached
            .retain(|port| registry.port_state(port) == Some(PortState::Attached));

        self.state = LifecycleState::DestroyingPorts;
        for port in &self.created {
            report.record(ShutdownStep::DestroyPort, port, self.registry.destroy_port(port));
        }
        let registry = &self.registry;
        self.created.retain(|port| {
            matches!(registry.port_state(port), Some(state) if state != PortState::Destroyed)
        });

        self.state = LifecycleState::DestroyingBridge;
        if let Some(handle) = self.handle.as_ref() {
            let result = self.registry.destroy_bridge(bridge, handle);
            report.record(ShutdownStep::DestroyBridge, bridge, result);
            if self.registry.bridge_state(bridge) != BridgeState::Active {
                self.handle = None;
            }
        }

        self.state = if self.handle.is_none() && self.attached.is_empty() && self.created.is_empty() {
            LifecycleState::Terminated
        } else {
            LifecycleState::Failed
        };
        report
    }
}

impl fmt::Debug for BridgeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeController")
            .field("bridge", &self.config.bridge.name)
            .field("state", &self.state)
            .field("policy", &self.policy.name())
            .finish()
    }
}
