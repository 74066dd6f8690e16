//! Optimistic concurrency token for saga data.

use serde::{Deserialize, Serialize};

/// Revision of a persisted saga instance.
///
/// An insert stores revision 0 and every successful update advances it by
/// exactly one. The storage backend owns the increment; everything else only
/// reads and propagates revisions.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    /// Revision of a freshly inserted instance.
    pub const INITIAL: Revision = Revision(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_initial(self) -> bool {
        self == Self::INITIAL
    }

    /// The revision a successful update produces.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check a write precondition against the currently stored revision.
    pub fn matches(self, stored: Revision) -> bool {
        self == stored
    }
}

impl core::fmt::Display for Revision {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
