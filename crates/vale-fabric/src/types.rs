//! Typed identifiers shared by the fabric and the bridge core.

use std::fmt;
use uuid::Uuid;

/// Maximum number of ports a single bridge can hold.
pub const MAX_PORTS: usize = 254;

const MASK_WORDS: usize = 4;

/// Index of a port within a bridge, assigned by the fabric at attach time.
///
/// Indices are only meaningful while the port is attached; after a detach
/// the same value may be handed to another port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortIndex(u16);

impl PortIndex {
    /// Creates an index, returning `None` if it is outside the bridge range.
    pub const fn new(raw: u16) -> Option<Self> {
        if (raw as usize) < MAX_PORTS {
            Some(PortIndex(raw))
        } else {
            None
        }
    }

    /// Returns the raw index value.
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the index as a `usize` for slot addressing.
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PortIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-size set of port indices.
///
/// Every destination set produced on the packet path is a `PortMask`, so
/// forwarding decisions are plain word operations and never allocate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PortMask {
    words: [u64; MASK_WORDS],
}

impl PortMask {
    /// The empty set.
    pub const EMPTY: Self = PortMask {
        words: [0; MASK_WORDS],
    };

    /// Creates an empty mask.
    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// Adds an index to the set. Returns false if it was already present.
    #[inline]
    pub fn insert(&mut self, index: PortIndex) -> bool {
        let (word, bit) = Self::locate(index);
        let present = self.words[word] & bit != 0;
        self.words[word] |= bit;
        !present
    }

    /// Removes an index from the set. Returns false if it was absent.
    #[inline]
    pub fn remove(&mut self, index: PortIndex) -> bool {
        let (word, bit) = Self::locate(index);
        let present = self.words[word] & bit != 0;
        self.words[word] &= !bit;
        present
    }

    #[inline]
    pub fn contains(&self, index: PortIndex) -> bool {
        let (word, bit) = Self::locate(index);
        self.words[word] & bit != 0
    }

    /// Returns a copy of the set without `index`.
    #[inline]
    pub fn without(mut self, index: PortIndex) -> Self {
        self.remove(index);
        self
    }

    #[inline]
    pub fn union(&self, other: &PortMask) -> Self {
        let mut out = *self;
        for (w, o) in out.words.iter_mut().zip(other.words.iter()) {
            *w |= *o;
        }
        out
    }

    #[inline]
    pub fn intersection(&self, other: &PortMask) -> Self {
        let mut out = *self;
        for (w, o) in out.words.iter_mut().zip(other.words.iter()) {
            *w &= *o;
        }
        out
    }

    /// Number of indices in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Lowest index not in the set, if the bridge has room.
    pub fn first_free(&self) -> Option<PortIndex> {
        for (i, word) in self.words.iter().enumerate() {
            if *word != u64::MAX {
                let raw = i * 64 + (!*word).trailing_zeros() as usize;
                return PortIndex::new(raw as u16);
            }
        }
        None
    }

    /// Iterates over the indices in ascending order.
    pub fn iter(&self) -> PortMaskIter {
        PortMaskIter {
            words: self.words,
            word: 0,
        }
    }

    #[inline]
    fn locate(index: PortIndex) -> (usize, u64) {
        let raw = index.as_usize();
        (raw / 64, 1u64 << (raw % 64))
    }
}

impl fmt::Debug for PortMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|i| i.as_u16())).finish()
    }
}

impl FromIterator<PortIndex> for PortMask {
    fn from_iter<I: IntoIterator<Item = PortIndex>>(iter: I) -> Self {
        let mut mask = PortMask::new();
        for index in iter {
            mask.insert(index);
        }
        mask
    }
}

/// Iterator over the members of a [`PortMask`].
pub struct PortMaskIter {
    words: [u64; MASK_WORDS],
    word: usize,
}

impl Iterator for PortMaskIter {
    type Item = PortIndex;

    fn next(&mut self) -> Option<PortIndex> {
        while self.word < MASK_WORDS {
            let bits = self.words[self.word];
            if bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                self.words[self.word] &= bits - 1;
                return PortIndex::new((self.word * 64 + bit) as u16);
            }
            self.word += 1;
        }
        None
    }
}

/// Identity of a control handle.
///
/// Fabrics and registries store this to check a presented handle. It is
/// copyable, but a [`ControlHandle`] can never be rebuilt from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(Uuid);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability authorizing mutation of one bridge's membership.
///
/// Returned once by bridge creation. Not `Clone`: whoever holds it is the
/// only component able to attach, detach, install a policy or destroy.
#[derive(PartialEq, Eq)]
pub struct ControlHandle {
    id: HandleId,
}

impl ControlHandle {
    /// Mints a fresh handle with a random identity.
    pub fn issue() -> Self {
        Self {
            id: HandleId(Uuid::new_v4()),
        }
    }

    /// Returns the identity used for verification.
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Returns true if this handle is the one identified by `id`.
    pub fn matches(&self, id: HandleId) -> bool {
        self.id == id
    }
}

impl fmt::Debug for ControlHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ControlHandle(..)")
    }
}
