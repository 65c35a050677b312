//! Abstract states of the memory analysis.
//!
//! An [`SmgState`] wraps the language memory, the explicit-value map and the
//! violation record of one analysis path. States are immutable: every
//! operation takes `&self` and returns new states that share structure with
//! the original through the persistent maps underneath.
//!
//! Operations that may split the path (heap allocation when allocation may
//! fail, dereferences that materialize list segments) return a list of
//! successors. Memory-safety violations of the analyzed program are not
//! errors; they are recorded in [`ErrorInfo`] and the state is returned as
//! usual. Only modeling faults are reported through [`SmgError`].
//!
//! # Examples
//!
//! ```
//! use smg_rs::context::AnalysisContext;
//! use smg_rs::frame::FunctionDecl;
//! use smg_rs::options::SmgOptions;
//! use smg_rs::state::SmgState;
//!
//! let ctx = AnalysisContext::with_options(SmgOptions::default());
//! let state = SmgState::initial(ctx).add_stack_frame(FunctionDecl::void("main")).unwrap();
//!
//! let allocated = state.allocate_heap(64, "buffer").unwrap();
//! let ptr = allocated[0].value.unwrap();
//! let target = allocated[0].state.smg().points_to(ptr).unwrap().object;
//!
//! let freed = allocated[0].state.free(target, 0).unwrap();
//! assert!(!freed.has_memory_errors());
//! let again = freed.free(target, 0).unwrap();
//! assert!(again.errors().is_invalid_free());
//! ```

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use num_bigint::BigInt;

use crate::consistency;
use crate::context::AnalysisContext;
use crate::edge::{HasValueEdge, PointsToEdge};
use crate::error::{Result, SmgError};
use crate::explicit::{extract_bits, ExplicitValues};
use crate::frame::{FunctionDecl, RETURN_OBJECT_LABEL};
use crate::graph::Smg;
use crate::memory::LanguageMemory;
use crate::object::SmgObject;
use crate::options::UnknownDereferencePolicy;
use crate::types::{Address, ObjectId, TargetSpecifier, ValueId};
use crate::violation::{ChainElement, ErrorInfo, Violation};

/// A successor state together with a value computed on the way to it.
///
/// `value` is `None` when the value is unknown.
#[derive(Debug, Clone)]
pub struct ValueAndState {
    pub state: SmgState,
    pub value: Option<ValueId>,
}

/// A successor state together with a resolved address.
///
/// `address` is `None` when the pointer could not be resolved.
#[derive(Debug, Clone)]
pub struct AddressAndState {
    pub state: SmgState,
    pub address: Option<Address>,
}

/// Kind of a memory access through a pointer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone)]
pub struct SmgState {
    ctx: Arc<AnalysisContext>,
    id: u64,
    predecessor: Option<u64>,
    memory: LanguageMemory,
    explicit: ExplicitValues,
    errors: ErrorInfo,
    block_ended: bool,
}

impl SmgState {
    /// The state at the start of the analysis: only the Null object and the Zero value.
    pub fn initial(ctx: Arc<AnalysisContext>) -> Self {
        let id = ctx.fresh_state_id();
        debug!("initial state {}", id);
        Self {
            ctx,
            id,
            predecessor: None,
            memory: LanguageMemory::new(),
            explicit: ExplicitValues::new(),
            errors: ErrorInfo::new(),
            block_ended: false,
        }
    }

    /// Builds a state from parts computed by join or intersection.
    pub(crate) fn from_parts(
        ctx: Arc<AnalysisContext>,
        memory: LanguageMemory,
        explicit: ExplicitValues,
        errors: ErrorInfo,
    ) -> Self {
        let id = ctx.fresh_state_id();
        Self {
            ctx,
            id,
            predecessor: None,
            memory,
            explicit,
            errors,
            block_ended: false,
        }
    }

    pub fn context(&self) -> &Arc<AnalysisContext> {
        &self.ctx
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn predecessor(&self) -> Option<u64> {
        self.predecessor
    }

    pub fn memory(&self) -> &LanguageMemory {
        &self.memory
    }

    pub fn smg(&self) -> &Smg {
        self.memory.smg()
    }

    pub fn explicit_values(&self) -> &ExplicitValues {
        &self.explicit
    }

    pub fn explicit_value(&self, value: ValueId) -> Option<&BigInt> {
        self.explicit.get(value)
    }

    pub fn errors(&self) -> &ErrorInfo {
        &self.errors
    }

    pub fn has_memory_errors(&self) -> bool {
        self.errors.has_memory_errors()
    }

    pub fn has_memory_leaks(&self) -> bool {
        self.errors.has_leak()
    }

    pub fn error_description(&self) -> Option<&str> {
        self.errors.description()
    }

    pub fn invalid_chain(&self) -> &[ChainElement] {
        self.errors.invalid_chain()
    }

    pub fn current_chain(&self) -> &[ChainElement] {
        self.errors.current_chain()
    }

    /// Set by the outer algorithm once the current block has been fully explored.
    pub fn is_block_ended(&self) -> bool {
        self.block_ended
    }

    pub fn with_block_ended(&self) -> SmgState {
        let mut next = self.successor();
        next.block_ended = true;
        next
    }

    /// Copy of this state with a new identity.
    pub(crate) fn successor(&self) -> SmgState {
        SmgState {
            ctx: self.ctx.clone(),
            id: self.ctx.fresh_state_id(),
            predecessor: Some(self.id),
            memory: self.memory.clone(),
            explicit: self.explicit.clone(),
            errors: self.errors.clone(),
            block_ended: false,
        }
    }

    pub(crate) fn memory_mut(&mut self) -> &mut LanguageMemory {
        &mut self.memory
    }

    pub(crate) fn smg_mut(&mut self) -> &mut Smg {
        self.memory.smg_mut()
    }

    pub(crate) fn explicit_mut(&mut self) -> &mut ExplicitValues {
        &mut self.explicit
    }

    /// Verifies the graph when consistency checking is enabled.
    pub(crate) fn finish(self) -> Result<SmgState> {
        if self.ctx.options().check_consistency {
            self.check_consistency()?;
        }
        Ok(self)
    }

    pub fn check_consistency(&self) -> Result<()> {
        consistency::verify(&self.memory, &self.explicit)
    }

    /// Records a violation of the analyzed program.
    pub(crate) fn record_violation(
        mut self,
        violation: Violation,
        description: impl Into<String>,
        element: Option<ChainElement>,
    ) -> SmgState {
        let description = description.into();
        warn!("{}: {}", violation, description);
        let mut errors = std::mem::take(&mut self.errors)
            .with_violation(violation)
            .with_description(description);
        if let Some(element) = element {
            errors = errors.with_current_element(element);
        }
        self.errors = errors.confirm_current_chain();
        self
    }
}

// Stack frames and variables
impl SmgState {
    /// Enters `function`, reserving a return slot for non-void functions.
    pub fn add_stack_frame(&self, function: FunctionDecl) -> Result<SmgState> {
        let mut next = self.successor();
        let return_object = function
            .return_size
            .map(|size| SmgObject::region(self.ctx.fresh_object_id(), size, RETURN_OBJECT_LABEL));
        next.memory.add_stack_frame(function, return_object);
        next.finish()
    }

    /// Leaves the current function, deleting its local objects.
    pub fn drop_stack_frame(&self) -> Result<SmgState> {
        let mut next = self.successor();
        next.memory.drop_stack_frame()?;
        next.finish()
    }

    pub fn add_global_variable(&self, size: u64, name: &str) -> Result<(SmgState, ObjectId)> {
        let mut next = self.successor();
        let id = self.ctx.fresh_object_id();
        next.memory.add_global_object(SmgObject::region(id, size, name))?;
        Ok((next.finish()?, id))
    }

    pub fn add_local_variable(&self, size: u64, name: &str) -> Result<(SmgState, ObjectId)> {
        let mut next = self.successor();
        let id = self.ctx.fresh_object_id();
        next.memory.add_stack_object(SmgObject::region(id, size, name))?;
        Ok((next.finish()?, id))
    }

    /// The object of a variable visible in the current function.
    pub fn variable_object(&self, name: &str) -> Option<ObjectId> {
        self.memory.visible_variable(name)
    }

    /// The return slot of the current function.
    pub fn return_object(&self) -> Option<ObjectId> {
        self.memory.top_frame().and_then(|frame| frame.return_object())
    }
}

// Allocation
impl SmgState {
    /// Allocates a heap region of `size` bits and returns a pointer to it.
    ///
    /// When allocation may fail, a second successor returns the null pointer.
    pub fn allocate_heap(&self, size: u64, label: &str) -> Result<Vec<ValueAndState>> {
        let mut next = self.successor();
        let object = self.ctx.fresh_object_id();
        debug!("allocate_heap({}, {}) -> {}", size, label, object);
        next.memory.add_heap_object(SmgObject::region(object, size, label));
        let pointer = next.add_pointer(object, 0, TargetSpecifier::Region);
        let mut successors = vec![ValueAndState {
            state: next.finish()?,
            value: Some(pointer),
        }];
        if self.ctx.options().malloc_may_fail {
            successors.push(ValueAndState {
                state: self.successor(),
                value: Some(ValueId::ZERO),
            });
        }
        Ok(successors)
    }

    /// Allocates a region of `size` bits in the current stack frame.
    ///
    /// The object id is appended to `label`, since frame names are unique.
    pub fn allocate_stack(&self, size: u64, label: &str) -> Result<ValueAndState> {
        let mut next = self.successor();
        let object = self.ctx.fresh_object_id();
        let label = format!("{}_{}", label, object.id());
        next.memory.add_stack_object(SmgObject::region(object, size, label))?;
        let pointer = next.add_pointer(object, 0, TargetSpecifier::Region);
        Ok(ValueAndState {
            state: next.finish()?,
            value: Some(pointer),
        })
    }

    /// Adds a region standing for memory allocated outside the analyzed code.
    pub fn add_external_allocation(&self, size: u64, label: &str) -> Result<ValueAndState> {
        let mut next = self.successor();
        let object = self.ctx.fresh_object_id();
        debug!("add_external_allocation({}, {}) -> {}", size, label, object);
        next.memory.add_external_object(SmgObject::region(object, size, label));
        let pointer = next.add_pointer(object, 0, TargetSpecifier::Region);
        Ok(ValueAndState {
            state: next.finish()?,
            value: Some(pointer),
        })
    }

    /// Frees the object `object`, addressed at bit `offset`.
    ///
    /// Freeing the null pointer is a no-op. Freeing a non-heap object, an
    /// object that is already invalid, or a heap object at a non-zero offset
    /// is an invalid free.
    pub fn free(&self, object: ObjectId, offset: u64) -> Result<SmgState> {
        let next = self.successor();
        if object.is_null() {
            return Ok(next);
        }
        let target = self.smg().object_checked(object)?;
        if target.is_abstract() {
            return Err(SmgError::Unsupported(format!("free of abstract object {}", target)));
        }
        let external = self.memory.is_external(object);
        if !self.memory.is_heap_object(object) {
            let description = format!("free of non-heap {}", self.memory.describe_object(object));
            return Ok(next.record_violation(Violation::InvalidFree, description, Some(object.into())));
        }
        if !self.smg().is_valid(object) {
            let description = format!("double free of {}", self.memory.describe_object(object));
            return Ok(next.record_violation(Violation::InvalidFree, description, Some(object.into())));
        }
        if offset != 0 && !external {
            let description = format!(
                "free at offset {} of {}",
                offset,
                self.memory.describe_object(object)
            );
            return Ok(next.record_violation(Violation::InvalidFree, description, Some(object.into())));
        }

        debug!("free({}, {})", object, offset);
        let mut next = next;
        next.smg_mut().set_validity(object, false);
        next.memory.set_external(object, false);
        next.smg_mut().clear_has_value_edges(object);
        next.finish()
    }

    pub fn realloc(&self, _object: ObjectId, _size: u64) -> Result<Vec<ValueAndState>> {
        Err(SmgError::Unsupported("realloc".to_string()))
    }
}

// Reading and writing
impl SmgState {
    /// Checks the validity and bounds of an access; records a violation otherwise.
    fn check_access(&self, object: ObjectId, offset: u64, size: u64, access: Access) -> Result<Option<SmgState>> {
        let target = self.smg().object_checked(object)?;
        let violation = match access {
            Access::Read => Violation::InvalidRead,
            Access::Write => Violation::InvalidWrite,
        };
        let verb = match access {
            Access::Read => "read from",
            Access::Write => "write to",
        };
        let external = self.memory.is_external(object);
        if !self.smg().is_valid(object) && !external {
            let description = format!("{} invalid {}", verb, self.memory.describe_object(object));
            return Ok(Some(self.successor().record_violation(violation, description, Some(object.into()))));
        }
        if offset + size > target.size() && !external {
            let description = format!(
                "{} bits [{}, {}) out of bounds of {}",
                verb,
                offset,
                offset + size,
                self.memory.describe_object(object)
            );
            return Ok(Some(self.successor().record_violation(violation, description, Some(object.into()))));
        }
        Ok(None)
    }

    /// Writes `value` into `[offset, offset + size)` of `object`.
    ///
    /// Overlapping edges are removed, except zero edges, which shrink to the
    /// bits outside the written range.
    pub fn write_value(&self, object: ObjectId, offset: u64, size: u64, value: ValueId) -> Result<SmgState> {
        if !self.smg().contains_value(value) {
            return Err(SmgError::UnknownValue(value));
        }
        if let Some(violated) = self.check_access(object, offset, size, Access::Write)? {
            return Ok(violated);
        }
        let target = self.smg().object_checked(object)?;
        if offset + size > target.size() {
            debug!("write_value: ignoring out-of-bounds write to external {}", object);
            return Ok(self.successor());
        }
        let mut next = self.successor();
        next.smg_mut().write_edge(HasValueEdge::new(object, offset, size, value));
        next.finish()
    }

    /// Reads `[offset, offset + size)` of `object`.
    ///
    /// The result is, in order of preference, the value of an edge matching
    /// the range exactly, the bits extracted from an explicit value stored in
    /// a larger covering edge, Zero if the range is nullified, or unknown.
    pub fn read_value(&self, object: ObjectId, offset: u64, size: u64) -> Result<ValueAndState> {
        if let Some(violated) = self.check_access(object, offset, size, Access::Read)? {
            return Ok(ValueAndState {
                state: violated,
                value: None,
            });
        }
        let smg = self.smg();
        if let Some(value) = smg.read_value(object, offset, size) {
            return Ok(ValueAndState {
                state: self.successor(),
                value: Some(value),
            });
        }

        let covering = smg
            .overlapping_edges(object, offset, size)
            .into_iter()
            .find(|e| e.covers(offset, size) && self.explicit.contains(e.value));
        if let Some(edge) = covering {
            if let Some(number) = self.explicit.get(edge.value) {
                let part = extract_bits(number, offset - edge.offset, size);
                debug!("read_value: extracted {} from {}", part, edge);
                return Ok(self.value_for_number(part));
            }
        }

        if smg.is_covered_by_nullified_blocks(object, offset, size) {
            return Ok(ValueAndState {
                state: self.successor(),
                value: Some(ValueId::ZERO),
            });
        }

        Ok(ValueAndState {
            state: self.successor(),
            value: None,
        })
    }

    /// Like [`SmgState::read_value`], but an unknown value is replaced by a
    /// fresh one that is written back, so later reads observe the same value.
    pub fn read_or_create(&self, object: ObjectId, offset: u64, size: u64) -> Result<ValueAndState> {
        let read = self.read_value(object, offset, size)?;
        if read.value.is_some() {
            return Ok(read);
        }
        let readable = self.check_access(object, offset, size, Access::Read)?.is_none();
        let mut next = read.state;
        let value = next.add_fresh_value();
        let in_bounds = self.smg().object_checked(object)?.size() >= offset + size;
        if readable && in_bounds {
            next.smg_mut().write_edge(HasValueEdge::new(object, offset, size, value));
        }
        Ok(ValueAndState {
            state: next.finish()?,
            value: Some(value),
        })
    }

    /// Handles an access through a pointer whose target is unknown.
    ///
    /// Depending on the configured policy the access is ignored, recorded as
    /// a violation, or redirected to a new externally allocated object.
    pub fn dereference_unknown(&self, pointer: ValueId, access: Access) -> Result<AddressAndState> {
        let options = self.ctx.options();
        let policy = match access {
            Access::Read => options.unknown_read,
            Access::Write => options.unknown_write,
        };
        match policy {
            UnknownDereferencePolicy::Ignore => Ok(AddressAndState {
                state: self.successor(),
                address: None,
            }),
            UnknownDereferencePolicy::Error => {
                let violation = match access {
                    Access::Read => Violation::InvalidRead,
                    Access::Write => Violation::InvalidWrite,
                };
                let description = format!("dereference of unknown pointer {}", pointer);
                Ok(AddressAndState {
                    state: self
                        .successor()
                        .record_violation(violation, description, Some(pointer.into())),
                    address: None,
                })
            }
            UnknownDereferencePolicy::External => {
                if self.smg().points_to(pointer).is_some() {
                    return Err(SmgError::InconsistentGraph(format!(
                        "pointer {} has a target and cannot become external",
                        pointer
                    )));
                }
                let mut next = self.successor();
                let object = self.ctx.fresh_object_id();
                let label = format!("external_{}", object.id());
                let size = options.external_allocation_size;
                next.memory
                    .add_external_object(SmgObject::region(object, size, label));
                next.smg_mut()
                    .add_points_to_edge(PointsToEdge::new(pointer, object, 0, TargetSpecifier::Region));
                Ok(AddressAndState {
                    state: next.finish()?,
                    address: Some(Address::new(object, 0)),
                })
            }
        }
    }
}

// Values
impl SmgState {
    pub(crate) fn add_fresh_value(&mut self) -> ValueId {
        let value = self.ctx.fresh_value_id();
        self.smg_mut().add_value(value);
        value
    }

    /// A new value unrelated to all others.
    pub fn fresh_value(&self) -> ValueAndState {
        let mut next = self.successor();
        let value = next.add_fresh_value();
        ValueAndState {
            state: next,
            value: Some(value),
        }
    }

    /// The value owning `number`, created if no value owns it yet.
    pub fn value_for_number(&self, number: BigInt) -> ValueAndState {
        if let Some(value) = self.explicit.value_of(&number) {
            return ValueAndState {
                state: self.successor(),
                value: Some(value),
            };
        }
        let mut next = self.successor();
        let value = next.add_fresh_value();
        next.explicit.put(value, number);
        ValueAndState {
            state: next,
            value: Some(value),
        }
    }

    /// Assigns `number` to `value`.
    ///
    /// If another value already owns `number`, both values are identified
    /// and the surviving one is returned.
    pub fn put_explicit(&self, value: ValueId, number: BigInt) -> Result<ValueAndState> {
        if !self.smg().contains_value(value) {
            return Err(SmgError::UnknownValue(value));
        }
        let mut next = self.successor();
        let kept = match next.explicit.put(value, number) {
            None => value,
            Some(owner) => next.merge_values(owner, value),
        };
        Ok(ValueAndState {
            state: next.finish()?,
            value: Some(kept),
        })
    }

    /// Identifies two values in place; returns the surviving one.
    pub(crate) fn merge_values(&mut self, a: ValueId, b: ValueId) -> ValueId {
        let kept = self.smg_mut().merge_values(a, b);
        let removed = if kept == a { b } else { a };
        if kept != removed {
            self.explicit.merge(kept, removed);
        }
        kept
    }

    /// Checks whether `a` and `b` certainly denote different numbers or addresses.
    pub fn are_non_equal(&self, a: ValueId, b: ValueId) -> bool {
        if a == b {
            return false;
        }
        let smg = self.smg();
        if smg.is_neq(a, b) {
            return true;
        }
        if self.explicit.contains(a) && self.explicit.contains(b) {
            return true;
        }
        match (smg.points_to(a), smg.points_to(b)) {
            (Some(pa), Some(pb)) => {
                let concrete = |o: ObjectId| smg.object(o).is_some_and(|o| !o.is_abstract());
                (pa.object != pb.object || pa.offset != pb.offset) && concrete(pa.object) && concrete(pb.object)
            }
            _ => false,
        }
    }

    /// Assumes `a == b`. Returns `None` if the assumption is infeasible.
    pub fn identify_equal_values(&self, a: ValueId, b: ValueId) -> Result<Option<SmgState>> {
        for v in [a, b] {
            if !self.smg().contains_value(v) {
                return Err(SmgError::UnknownValue(v));
            }
        }
        if a == b {
            return Ok(Some(self.successor()));
        }
        if self.are_non_equal(a, b) {
            debug!("identify_equal_values({}, {}): infeasible", a, b);
            return Ok(None);
        }
        let mut next = self.successor();
        let (kept, removed) = if next.smg().points_to(a).is_some() { (a, b) } else { (b, a) };
        next.merge_values(kept, removed);
        Ok(Some(next.finish()?))
    }

    /// Assumes `a != b`. Returns `None` if the assumption is infeasible.
    pub fn identify_non_equal_values(&self, a: ValueId, b: ValueId) -> Result<Option<SmgState>> {
        for v in [a, b] {
            if !self.smg().contains_value(v) {
                return Err(SmgError::UnknownValue(v));
            }
        }
        if a == b {
            debug!("identify_non_equal_values({}, {}): infeasible", a, b);
            return Ok(None);
        }
        let mut next = self.successor();
        if !next.are_non_equal(a, b) {
            next.smg_mut().add_neq(a, b);
        }
        Ok(Some(next.finish()?))
    }
}

// Pointers
impl SmgState {
    /// Returns a value pointing to `object` at `offset`, reusing an existing one.
    pub(crate) fn add_pointer(&mut self, object: ObjectId, offset: u64, specifier: TargetSpecifier) -> ValueId {
        if let Some(value) = self.smg().find_pointer(object, offset, specifier) {
            return value;
        }
        let value = self.add_fresh_value();
        self.smg_mut()
            .add_points_to_edge(PointsToEdge::new(value, object, offset, specifier));
        value
    }

    /// A value pointing to `object` at `offset`.
    pub fn create_pointer(&self, object: ObjectId, offset: u64) -> Result<ValueAndState> {
        let target = self.smg().object_checked(object)?;
        let specifier = if target.is_list_segment() {
            TargetSpecifier::First
        } else {
            TargetSpecifier::Region
        };
        let mut next = self.successor();
        let value = next.add_pointer(object, offset, specifier);
        Ok(ValueAndState {
            state: next.finish()?,
            value: Some(value),
        })
    }

    /// Resolves `pointer` to concrete addresses.
    ///
    /// Pointers into abstract objects are materialized first, which may
    /// split the state. An unknown pointer yields a single successor without
    /// an address.
    pub fn get_pointer_targets(&self, pointer: ValueId) -> Result<Vec<AddressAndState>> {
        let mut resolved = Vec::new();
        let mut pending = std::collections::VecDeque::from([(self.successor(), pointer)]);
        while let Some((state, pointer)) = pending.pop_front() {
            self.ctx.check_shutdown()?;
            let Some(pt) = state.smg().pointer(pointer)? else {
                resolved.push(AddressAndState { state, address: None });
                continue;
            };
            let target = state.smg().object_checked(pt.object)?;
            if target.is_abstract() {
                pending.extend(crate::abstraction::materialize::materialize(&state, pointer)?);
            } else {
                resolved.push(AddressAndState {
                    state,
                    address: Some(Address::new(pt.object, pt.offset)),
                });
            }
        }
        Ok(resolved)
    }
}

// Garbage collection
impl SmgState {
    /// Deletes unreachable objects and values; still-valid deleted objects are leaks.
    pub fn prune_unreachable(&self) -> Result<SmgState> {
        let mut next = self.successor();
        let outcome = next.memory.prune(self.ctx.shutdown())?;
        let smg = next.memory.smg().clone();
        next.explicit.retain(|v| smg.contains_value(v));
        if !outcome.leaked.is_empty() {
            let descriptions: Vec<String> = outcome
                .leaked
                .iter()
                .map(|&o| self.memory.describe_object(o))
                .collect();
            let mut errors = std::mem::take(&mut next.errors);
            for &object in &outcome.leaked {
                errors = errors.with_invalid_element(object);
            }
            next.errors = errors;
            next = next.record_violation(
                Violation::MemoryLeak,
                format!("memory leak of {}", descriptions.join(", ")),
                None,
            );
        }
        next.finish()
    }
}

impl fmt::Display for SmgState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "state {} ({}):", self.id, self.errors)?;
        for object in self.smg().objects() {
            if object.is_null() {
                continue;
            }
            let validity = if self.smg().is_valid(object.id()) { "" } else { " (invalid)" };
            writeln!(f, "  {}{}", object, validity)?;
            for edge in self.smg().edges_of(object.id()) {
                write!(f, "    [{}..{}) = {}", edge.offset, edge.end(), edge.value)?;
                if let Some(number) = self.explicit.get(edge.value) {
                    write!(f, " ({})", number)?;
                }
                if let Some(pt) = self.smg().points_to(edge.value) {
                    write!(f, " -> {}+{} {}", pt.object, pt.offset, pt.specifier)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::options::SmgOptions;

    fn main_state(options: SmgOptions) -> SmgState {
        let options = SmgOptions {
            check_consistency: true,
            ..options
        };
        SmgState::initial(AnalysisContext::with_options(options))
            .add_stack_frame(FunctionDecl::void("main"))
            .unwrap()
    }

    fn malloc(state: &SmgState, size: u64) -> (SmgState, ObjectId, ValueId) {
        let allocated = state.allocate_heap(size, "node").unwrap();
        let ValueAndState { state, value } = allocated.into_iter().next().unwrap();
        let pointer = value.unwrap();
        let object = state.smg().points_to(pointer).unwrap().object;
        (state, object, pointer)
    }

    #[test]
    fn test_states_are_immutable() {
        let state = main_state(SmgOptions::default());
        let (next, _) = state.add_local_variable(64, "x").unwrap();
        assert!(state.variable_object("x").is_none());
        assert!(next.variable_object("x").is_some());
        assert_eq!(next.predecessor(), Some(state.id()));
    }

    #[test]
    fn test_double_write_leaves_one_edge() {
        let state = main_state(SmgOptions::default());
        let (state, x) = state.add_local_variable(64, "x").unwrap();
        let a = state.value_for_number(BigInt::from(1));
        let state = a.state.write_value(x, 0, 64, a.value.unwrap()).unwrap();
        let b = state.value_for_number(BigInt::from(2));
        let state = b.state.write_value(x, 0, 64, b.value.unwrap()).unwrap();
        assert_eq!(state.smg().edges_of(x).len(), 1);
        let read = state.read_value(x, 0, 64).unwrap();
        assert_eq!(read.value, b.value);
    }

    #[test]
    fn test_read_zero_and_unknown() {
        let state = main_state(SmgOptions::default());
        let (state, x) = state.add_local_variable(128, "x").unwrap();
        assert_eq!(state.read_value(x, 0, 64).unwrap().value, None);
        let state = state.write_value(x, 0, 128, ValueId::ZERO).unwrap();
        assert_eq!(state.read_value(x, 32, 32).unwrap().value, Some(ValueId::ZERO));
    }

    #[test]
    fn test_read_extracts_explicit_bits() {
        let state = main_state(SmgOptions::default());
        let (state, x) = state.add_local_variable(32, "x").unwrap();
        let n = state.value_for_number(BigInt::from(0x1234));
        let state = n.state.write_value(x, 0, 32, n.value.unwrap()).unwrap();
        let high = state.read_value(x, 8, 8).unwrap();
        let value = high.value.unwrap();
        assert_eq!(high.state.explicit_value(value), Some(&BigInt::from(0x12)));
    }

    #[test]
    fn test_read_or_create_is_stable() {
        let state = main_state(SmgOptions::default());
        let (state, x) = state.add_local_variable(64, "x").unwrap();
        let first = state.read_or_create(x, 0, 64).unwrap();
        let second = first.state.read_or_create(x, 0, 64).unwrap();
        assert_eq!(first.value, second.value);
    }

    #[test]
    fn test_double_free() {
        let state = main_state(SmgOptions::default());
        let (state, object, _) = malloc(&state, 64);
        let freed = state.free(object, 0).unwrap();
        assert!(!freed.has_memory_errors());
        assert!(!freed.smg().is_valid(object));
        let again = freed.free(object, 0).unwrap();
        assert!(again.errors().is_invalid_free());
        assert!(again.invalid_chain().contains(&ChainElement::Object(object)));
    }

    #[test]
    fn test_invalid_frees() {
        let state = main_state(SmgOptions::default());
        let (state, x) = state.add_local_variable(64, "x").unwrap();
        assert!(state.free(x, 0).unwrap().errors().is_invalid_free());
        let (state, object, _) = malloc(&state, 64);
        assert!(state.free(object, 8).unwrap().errors().is_invalid_free());
        assert!(!state.free(ObjectId::NULL, 0).unwrap().has_memory_errors());
    }

    #[test]
    fn test_free_clears_edges_keeps_pointers() {
        let state = main_state(SmgOptions::default());
        let (state, object, pointer) = malloc(&state, 64);
        let state = state.write_value(object, 0, 64, ValueId::ZERO).unwrap();
        let state = state.free(object, 0).unwrap();
        assert!(state.smg().edges_of(object).is_empty());
        assert_eq!(state.smg().points_to(pointer).unwrap().object, object);
        let read = state.read_value(object, 0, 64).unwrap();
        assert!(read.state.errors().is_invalid_read());
    }

    #[test]
    fn test_out_of_bounds_write() {
        let state = main_state(SmgOptions::default());
        let (state, object, _) = malloc(&state, 32);
        let state = state.write_value(object, 0, 64, ValueId::ZERO).unwrap();
        assert!(state.errors().is_invalid_write());
        assert!(state.smg().edges_of(object).is_empty());
    }

    #[test]
    fn test_null_dereference() {
        let state = main_state(SmgOptions::default());
        let targets = state.get_pointer_targets(ValueId::ZERO).unwrap();
        assert_eq!(targets.len(), 1);
        let address = targets[0].address.unwrap();
        assert!(address.is_null());
        let read = state.read_value(address.object, 0, 64).unwrap();
        assert!(read.state.errors().is_invalid_read());
    }

    #[test]
    fn test_malloc_may_fail() {
        let state = main_state(SmgOptions {
            malloc_may_fail: true,
            ..SmgOptions::default()
        });
        let successors = state.allocate_heap(64, "node").unwrap();
        assert_eq!(successors.len(), 2);
        assert_eq!(successors[1].value, Some(ValueId::ZERO));
    }

    #[test]
    fn test_leak_after_prune() {
        let state = main_state(SmgOptions::default());
        let (state, object, _) = malloc(&state, 64);
        let pruned = state.prune_unreachable().unwrap();
        assert!(pruned.has_memory_leaks());
        assert!(!pruned.smg().contains_object(object));
        assert!(pruned.invalid_chain().contains(&ChainElement::Object(object)));
    }

    #[test]
    fn test_unknown_value_is_an_error() {
        let state = main_state(SmgOptions::default());
        let (state, x) = state.add_local_variable(64, "x").unwrap();
        assert!(matches!(
            state.write_value(x, 0, 64, ValueId::new(9999)),
            Err(SmgError::UnknownValue(_))
        ));
        assert!(matches!(state.get_pointer_targets(ValueId::new(9999)), Err(SmgError::UnknownValue(_))));
    }

    #[test]
    fn test_put_explicit_merges_owner() {
        let state = main_state(SmgOptions::default());
        let fresh = state.fresh_value();
        let v = fresh.value.unwrap();
        let zero = fresh.state.put_explicit(v, BigInt::from(0)).unwrap();
        assert_eq!(zero.value, Some(ValueId::ZERO));
        assert!(!zero.state.smg().contains_value(v));
    }

    #[test]
    fn test_identify_values() {
        let state = main_state(SmgOptions::default());
        let one = state.value_for_number(BigInt::from(1));
        let state = one.state;
        let one = one.value.unwrap();
        assert!(state.identify_equal_values(one, ValueId::ZERO).unwrap().is_none());
        assert!(state.identify_non_equal_values(one, one).unwrap().is_none());

        let fresh = state.fresh_value();
        let v = fresh.value.unwrap();
        let state = fresh.state.identify_non_equal_values(v, ValueId::ZERO).unwrap().unwrap();
        assert!(state.are_non_equal(v, ValueId::ZERO));
        assert!(state.identify_equal_values(v, ValueId::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_unknown_dereference_policies() {
        for (policy, errors, resolved) in [
            (UnknownDereferencePolicy::Ignore, false, false),
            (UnknownDereferencePolicy::Error, true, false),
            (UnknownDereferencePolicy::External, false, true),
        ] {
            let state = main_state(SmgOptions {
                unknown_write: policy,
                ..SmgOptions::default()
            });
            let fresh = state.fresh_value();
            let outcome = fresh
                .state
                .dereference_unknown(fresh.value.unwrap(), Access::Write)
                .unwrap();
            assert_eq!(outcome.state.errors().is_invalid_write(), errors);
            assert_eq!(outcome.address.is_some(), resolved);
        }
    }

    #[test]
    fn test_realloc_unsupported() {
        let state = main_state(SmgOptions::default());
        assert!(matches!(state.realloc(ObjectId::NULL, 8), Err(SmgError::Unsupported(_))));
    }
}
