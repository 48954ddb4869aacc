//! Worker/pipe kind tags used by the validator and monitoring matrix in place of
//! reflection-based type inspection (§9).

use std::fmt;

/// What a worker does, independent of its generic payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Supplier,
    Function,
    Transformer,
    Consumer,
    Action,
    Fork,
    Join,
    Drain,
    Forward,
}

impl NodeKind {
    /// Whether this kind is an internal plumbing worker never constructed directly by a
    /// pipeline's caller (Fork/Join/Drain/Forward), as opposed to a user-supplied one.
    #[must_use]
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            NodeKind::Fork | NodeKind::Join | NodeKind::Drain | NodeKind::Forward
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeKind::Supplier => "supplier",
            NodeKind::Function => "function",
            NodeKind::Transformer => "transformer",
            NodeKind::Consumer => "consumer",
            NodeKind::Action => "action",
            NodeKind::Fork => "fork",
            NodeKind::Join => "join",
            NodeKind::Drain => "drain",
            NodeKind::Forward => "forward",
        };
        f.write_str(label)
    }
}

/// Identity of a pipe for graph-validation/monitoring purposes, derived from its address
/// rather than any generic type parameter (§9, "cyclic references").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeId(pub(crate) usize);

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe#{:x}", self.0)
    }
}

/// Identity of a worker for graph-validation/monitoring purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub(crate) usize);

impl WorkerId {
    /// Builds a worker id from a caller-chosen number. Callers typically hand out `0, 1, 2,
    /// ...` while assembling a `PipelineBuilder`; uniqueness within one pipeline is the
    /// caller's responsibility, same as naming.
    #[must_use]
    pub fn new(id: usize) -> Self {
        Self(id)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{:x}", self.0)
    }
}
