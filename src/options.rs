//! Analysis options.

/// Sequence-length thresholds for list abstraction.
///
/// A chain of nodes is summarized only if it is at least as long as the
/// threshold selected by how the nodes compare to each other.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AbstractionThresholds {
    /// All nodes are structurally equal.
    pub equality: usize,
    /// Nodes are related by one-way entailment.
    pub entailment: usize,
    /// Nodes are incomparable but can be generalized.
    pub incomparable: usize,
}

impl Default for AbstractionThresholds {
    fn default() -> Self {
        Self {
            equality: 2,
            entailment: 2,
            incomparable: 3,
        }
    }
}

/// How to treat a dereference of a value that is not known to be a pointer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum UnknownDereferencePolicy {
    /// Assume the access is safe and has no effect on the memory graph.
    #[default]
    Ignore,
    /// Record an invalid read/write.
    Error,
    /// Assume the pointer refers to externally allocated memory.
    External,
}

/// Configuration of the memory analysis.
///
/// # Examples
///
/// ```
/// use smg_rs::options::{SmgOptions, UnknownDereferencePolicy};
///
/// let options = SmgOptions {
///     malloc_may_fail: true,
///     unknown_write: UnknownDereferencePolicy::Error,
///     ..SmgOptions::default()
/// };
/// assert!(options.heap_abstraction);
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SmgOptions {
    /// Summarize list-like structures (default: true)
    pub heap_abstraction: bool,
    /// Thresholds for list abstraction (default: 2/2/3)
    pub thresholds: AbstractionThresholds,
    /// Model allocation failure as an extra successor (default: false)
    pub malloc_may_fail: bool,
    /// Policy for reads through unknown pointers (default: ignore)
    pub unknown_read: UnknownDereferencePolicy,
    /// Policy for writes through unknown pointers (default: ignore)
    pub unknown_write: UnknownDereferencePolicy,
    /// Verify the graph after every mutating state operation (default: false)
    pub check_consistency: bool,
    /// Size in bits assumed for allocations with an unknown size (default: 16)
    pub guessed_allocation_size: u64,
    /// Size in bits of objects created for unknown external memory (default: 64)
    pub external_allocation_size: u64,
}

impl Default for SmgOptions {
    fn default() -> Self {
        Self {
            heap_abstraction: true,
            thresholds: AbstractionThresholds::default(),
            malloc_may_fail: false,
            unknown_read: UnknownDereferencePolicy::Ignore,
            unknown_write: UnknownDereferencePolicy::Ignore,
            check_consistency: false,
            guessed_allocation_size: 16,
            external_allocation_size: 64,
        }
    }
}
