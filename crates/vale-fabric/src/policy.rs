//! Forwarding strategy seam between the fabric and the bridge core.
//!
//! The fabric calls an [`InstalledPolicy`] once per frame. The installed
//! policy loads a single [`PortTable`] snapshot, asks the
//! [`ForwardingPolicy`] for a [`ForwardingTarget`] and resolves the target
//! against that same snapshot into a [`PortMask`] of destinations.

use std::fmt;
use std::sync::Arc;

use crate::table::{LivePortTable, PortTable};
use crate::types::{PortIndex, PortMask};

/// Per-frame metadata handed to a policy.
#[derive(Debug, Clone, Copy)]
pub struct FrameMeta<'a> {
    /// Index of the port the frame arrived on.
    pub src: PortIndex,
    /// Destination ring on the receiving ports.
    pub ring: u8,
    /// Frame bytes, read-only.
    pub data: &'a [u8],
}

impl<'a> FrameMeta<'a> {
    pub fn new(src: PortIndex, data: &'a [u8]) -> Self {
        Self { src, ring: 0, data }
    }
}

/// Decision returned by a forwarding policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingTarget {
    /// Every attached port except the source.
    Broadcast,
    /// A restricted destination set. Empty means drop.
    Ports(PortMask),
}

impl ForwardingTarget {
    /// Drop the frame.
    pub const DROP: Self = ForwardingTarget::Ports(PortMask::EMPTY);

    /// Returns true if this target delivers nowhere regardless of the table.
    pub fn is_drop(&self) -> bool {
        matches!(self, ForwardingTarget::Ports(mask) if mask.is_empty())
    }

    /// Resolves the target into concrete destinations.
    ///
    /// The source is never a destination, and only attached indices survive.
    #[inline]
    pub fn resolve(&self, table: &PortTable, src: PortIndex) -> PortMask {
        match self {
            ForwardingTarget::Broadcast => table.attached().without(src),
            ForwardingTarget::Ports(mask) => mask.intersection(&table.attached()).without(src),
        }
    }
}

/// A forwarding decision strategy.
///
/// `lookup` runs on the packet path, concurrently from every forwarding
/// context. It must not allocate, block or mutate shared state. Lookups
/// that cannot be answered (for example a source that has just been
/// detached) return [`ForwardingTarget::DROP`].
pub trait ForwardingPolicy: Send + Sync {
    /// Policy name for logs.
    fn name(&self) -> &str;

    /// Decides where a frame goes.
    fn lookup(&self, table: &PortTable, frame: &FrameMeta<'_>) -> ForwardingTarget;
}

/// A policy bound to the live table of the bridge it was installed on.
#[derive(Clone)]
pub struct InstalledPolicy {
    policy: Arc<dyn ForwardingPolicy>,
    ports: LivePortTable,
}

impl InstalledPolicy {
    pub fn new(policy: Arc<dyn ForwardingPolicy>, ports: LivePortTable) -> Self {
        Self { policy, ports }
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    /// Per-frame entry point: returns the destination set for `frame`.
    #[inline]
    pub fn decide(&self, frame: &FrameMeta<'_>) -> PortMask {
        let table = self.ports.load();
        self.policy.lookup(&table, frame).resolve(&table, frame.src)
    }
}

impl fmt::Debug for InstalledPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstalledPolicy")
            .field("policy", &self.policy.name())
            .field("ports", &self.ports)
            .finish()
    }
}
