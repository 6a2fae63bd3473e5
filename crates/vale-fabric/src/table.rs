//! Live port table read by forwarding policies.
//!
//! The control plane mutates bridge membership rarely; the data plane reads
//! it for every frame from many contexts at once. Membership is therefore
//! kept as immutable [`PortTable`] snapshots. A mutation builds a complete
//! new snapshot and publishes it atomically through [`LivePortTable`], so a
//! reader sees the table either entirely before or entirely after the change.

use arc_swap::{ArcSwap, Guard};
use std::fmt;
use std::sync::Arc;

use crate::types::{PortIndex, PortMask, MAX_PORTS};

/// Immutable snapshot of the ports attached to one bridge.
#[derive(Clone, PartialEq, Eq)]
pub struct PortTable {
    attached: PortMask,
    names: Vec<Option<Arc<str>>>,
}

impl PortTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            attached: PortMask::EMPTY,
            names: vec![None; MAX_PORTS],
        }
    }

    /// Returns true if `index` belongs to an attached port.
    #[inline]
    pub fn contains(&self, index: PortIndex) -> bool {
        self.attached.contains(index)
    }

    /// Returns the set of attached indices.
    #[inline]
    pub fn attached(&self) -> PortMask {
        self.attached
    }

    /// Number of attached ports.
    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    /// Name of the port holding `index`.
    pub fn name_of(&self, index: PortIndex) -> Option<&str> {
        self.names[index.as_usize()].as_deref()
    }

    /// Index held by the port called `name`.
    ///
    /// Scans the attached set; meant for diagnostics, not the packet path.
    pub fn index_of(&self, name: &str) -> Option<PortIndex> {
        self.attached
            .iter()
            .find(|index| self.name_of(*index) == Some(name))
    }

    /// Returns a copy of this table with `name` attached at `index`.
    pub fn with_port(&self, index: PortIndex, name: &str) -> Self {
        let mut next = self.clone();
        next.attached.insert(index);
        next.names[index.as_usize()] = Some(Arc::from(name));
        next
    }

    /// Returns a copy of this table with `index` released.
    pub fn without_port(&self, index: PortIndex) -> Self {
        let mut next = self.clone();
        next.attached.remove(index);
        next.names[index.as_usize()] = None;
        next
    }

    /// Iterates over `(index, name)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (PortIndex, &str)> + '_ {
        self.attached
            .iter()
            .filter_map(move |index| self.name_of(index).map(|name| (index, name)))
    }
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PortTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Shared, atomically replaceable handle to a bridge's [`PortTable`].
///
/// Cloning is cheap and every clone observes the same table. Readers call
/// [`load`](Self::load), which neither locks nor allocates. Writers must be
/// serialized externally; the port registry does so under its control lock.
#[derive(Clone)]
pub struct LivePortTable {
    inner: Arc<ArcSwap<PortTable>>,
}

impl LivePortTable {
    /// Creates a live table holding an empty snapshot.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(PortTable::new())),
        }
    }

    /// Borrows the current snapshot for the duration of a lookup.
    #[inline]
    pub fn load(&self) -> Guard<Arc<PortTable>> {
        self.inner.load()
    }

    /// Returns an owned reference to the current snapshot.
    pub fn snapshot(&self) -> Arc<PortTable> {
        self.inner.load_full()
    }

    /// Replaces the current snapshot.
    pub fn publish(&self, table: PortTable) {
        self.inner.store(Arc::new(table));
    }
}

impl Default for LivePortTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LivePortTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LivePortTable")
            .field(&*self.load())
            .finish()
    }
}
