//! Error types for directory mutations.

use core::fmt;

/// Errors raised by node mutations.
///
/// All directory errors are recoverable; callers of the [`Directory`]
/// facade see them folded into `bool` returns, matching the fire-and-forget
/// character of the protocol layer above.
///
/// [`Directory`]: crate::Directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    /// A handler or child with the same name already exists on the node.
    DuplicateName,
    /// Mounting the child would create a directed cycle.
    Cyclic,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName => write!(f, "duplicate name"),
            Self::Cyclic => write!(f, "mount would create a cycle"),
        }
    }
}

impl std::error::Error for NodeError {}
