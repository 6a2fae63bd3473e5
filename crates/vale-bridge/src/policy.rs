//! Forwarding policies installed by the lifecycle controller.
//!
//! [`RestrictedPolicy`] is the default: frames arriving on a restricted
//! index are dropped, everything else is broadcast. [`FloodPolicy`] never
//! restricts and exists for bridges that only need plain hub behaviour.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use vale_fabric::{ForwardingPolicy, ForwardingTarget, FrameMeta, PortMask, PortTable};

use crate::config::PolicyConfig;

/// Policy selector used in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Drop frames from restricted source indices, broadcast the rest.
    #[default]
    Restricted,
    /// Broadcast every frame.
    Flood,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Restricted => "restricted",
            PolicyKind::Flood => "flood",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drops frames whose source index is restricted and broadcasts the rest.
///
/// A source that is not attached in the snapshot (a frame racing a detach)
/// is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestrictedPolicy {
    restricted: PortMask,
}

impl RestrictedPolicy {
    pub fn new(restricted: PortMask) -> Self {
        Self { restricted }
    }
}

impl ForwardingPolicy for RestrictedPolicy {
    fn name(&self) -> &str {
        "restricted"
    }

    #[inline]
    fn lookup(&self, table: &PortTable, frame: &FrameMeta<'_>) -> ForwardingTarget {
        if !table.contains(frame.src) || self.restricted.contains(frame.src) {
            return ForwardingTarget::DROP;
        }
        ForwardingTarget::Broadcast
    }
}

/// Broadcasts every frame from an attached source.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloodPolicy;

impl ForwardingPolicy for FloodPolicy {
    fn name(&self) -> &str {
        "flood"
    }

    #[inline]
    fn lookup(&self, table: &PortTable, frame: &FrameMeta<'_>) -> ForwardingTarget {
        if table.contains(frame.src) {
            ForwardingTarget::Broadcast
        } else {
            ForwardingTarget::DROP
        }
    }
}

/// Builds the policy selected by configuration.
pub fn build_policy(config: &PolicyConfig) -> Arc<dyn ForwardingPolicy> {
    match config.kind {
        PolicyKind::Restricted => Arc::new(RestrictedPolicy::new(config.restricted_mask())),
        PolicyKind::Flood => Arc::new(FloodPolicy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vale_fabric::PortIndex;

    fn idx(raw: u16) -> PortIndex {
        PortIndex::new(raw).unwrap()
    }

    fn restricted(raw: &[u16]) -> RestrictedPolicy {
        RestrictedPolicy::new(raw.iter().map(|r| idx(*r)).collect())
    }

    fn table_of(indices: &[u16]) -> PortTable {
        indices
            .iter()
            .fold(PortTable::new(), |t, raw| t.with_port(idx(*raw), &format!("v{}", raw)))
    }

    fn destinations(policy: &dyn ForwardingPolicy, table: &PortTable, src: u16) -> Vec<u16> {
        let frame = FrameMeta::new(idx(src), &[]);
        policy
            .lookup(table, &frame)
            .resolve(table, frame.src)
            .iter()
            .map(PortIndex::as_u16)
            .collect()
    }

    #[test]
    fn test_restricted_drops_restricted_sources() {
        let policy = restricted(&[1, 2]);
        let table = table_of(&[0, 1, 2]);
        assert_eq!(destinations(&policy, &table, 0), vec![1, 2]);
        assert!(destinations(&policy, &table, 1).is_empty());
        assert!(destinations(&policy, &table, 2).is_empty());
    }

    #[test]
    fn test_restricted_drops_unattached_source() {
        let policy = restricted(&[1, 2]);
        let table = table_of(&[1, 2]);
        let frame = FrameMeta::new(idx(0), &[]);
        assert!(policy.lookup(&table, &frame).is_drop());
    }

    #[test]
    fn test_restricted_broadcast_tracks_membership() {
        let policy = restricted(&[1, 2]);
        let table = table_of(&[0, 1, 2, 3, 7]);
        assert_eq!(destinations(&policy, &table, 3), vec![0, 1, 2, 7]);
        assert_eq!(destinations(&policy, &table, 0), vec![1, 2, 3, 7]);
    }

    #[test]
    fn test_flood_policy() {
        let table = table_of(&[0, 1, 2]);
        assert_eq!(destinations(&FloodPolicy, &table, 1), vec![0, 2]);
        assert!(destinations(&FloodPolicy, &table, 5).is_empty());
    }

    #[test]
    fn test_build_policy() {
        let config = PolicyConfig::default();
        assert_eq!(build_policy(&config).name(), "restricted");

        // Configured indices reach the installed policy.
        let config = PolicyConfig {
            kind: PolicyKind::Restricted,
            restricted_ports: vec![3],
        };
        let policy = build_policy(&config);
        let table = table_of(&[0, 1, 3]);
        assert!(destinations(policy.as_ref(), &table, 3).is_empty());
        assert_eq!(destinations(policy.as_ref(), &table, 1), vec![0, 3]);

        let config = PolicyConfig {
            kind: PolicyKind::Flood,
            restricted_ports: Vec::new(),
        };
        assert_eq!(build_policy(&config).name(), "flood");
    }

    #[test]
    fn test_policy_kind_serde() {
        let kind: PolicyKind = serde_json::from_str("\"flood\"").unwrap();
        assert_eq!(kind, PolicyKind::Flood);
        assert_eq!(PolicyKind::default().to_string(), "restricted");
    }
}
