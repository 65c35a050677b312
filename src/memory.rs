//! Language memory layer: a memory graph plus a call stack, a global
//! namespace and a classification of objects into stack, global, heap and
//! externally allocated memory.
//!
//! The roots of the memory are the global objects and the objects owned by
//! stack frames. Everything not reachable from a root through has-value and
//! points-to edges is garbage, which [`LanguageMemory::prune`] deletes and
//! reports as leaked when it was still valid.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use im::{OrdMap, OrdSet, Vector};
use log::debug;

use crate::error::{Result, SmgError};
use crate::frame::{FunctionDecl, StackFrame};
use crate::graph::Smg;
use crate::object::SmgObject;
use crate::path::{MemoryPath, PathRoot};
use crate::shutdown::ShutdownNotifier;
use crate::types::{ObjectId, ValueId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageMemory {
    smg: Smg,
    stack: Vector<StackFrame>,
    globals: OrdMap<Arc<str>, ObjectId>,
    heap: OrdSet<ObjectId>,
    external: OrdSet<ObjectId>,
}

/// What [`LanguageMemory::prune`] deleted.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PruneOutcome {
    pub removed_objects: Vec<ObjectId>,
    pub removed_values: Vec<ValueId>,
    /// Removed objects that were still valid (and not external memory).
    pub leaked: Vec<ObjectId>,
}

impl Default for LanguageMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageMemory {
    pub fn new() -> Self {
        let mut heap = OrdSet::new();
        heap.insert(ObjectId::NULL);
        Self {
            smg: Smg::new(),
            stack: Vector::new(),
            globals: OrdMap::new(),
            heap,
            external: OrdSet::new(),
        }
    }

    pub fn smg(&self) -> &Smg {
        &self.smg
    }

    pub fn smg_mut(&mut self) -> &mut Smg {
        &mut self.smg
    }
}

// Stack frames
impl LanguageMemory {
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Frames from the bottom (`main`) to the top.
    pub fn frames(&self) -> impl Iterator<Item = &StackFrame> {
        self.stack.iter()
    }

    pub fn frame(&self, depth: usize) -> Option<&StackFrame> {
        self.stack.get(depth)
    }

    pub fn top_frame(&self) -> Option<&StackFrame> {
        self.stack.last()
    }

    /// Pushes a frame for `function`; `return_object` is the reserved slot
    /// for its return value.
    pub fn add_stack_frame(&mut self, function: FunctionDecl, return_object: Option<SmgObject>) {
        debug!("add_stack_frame({})", function);
        let return_id = return_object.map(|object| {
            let id = object.id();
            self.smg.add_object(object);
            id
        });
        self.stack.push_back(StackFrame::new(function, return_id));
    }

    /// Pops the top frame, deleting its objects and their edges.
    ///
    /// Heap objects only referenced from the frame become garbage and are
    /// reported by the next [`LanguageMemory::prune`].
    pub fn drop_stack_frame(&mut self) -> Result<StackFrame> {
        let frame = self.stack.pop_back().ok_or(SmgError::EmptyStack)?;
        debug!("drop_stack_frame({})", frame.function());
        for object in frame.objects() {
            self.smg.remove_object_and_edges(object);
        }
        Ok(frame)
    }

    /// Adds a local object to the top frame, named by its label.
    pub fn add_stack_object(&mut self, object: SmgObject) -> Result<()> {
        let top = self.stack.back_mut().ok_or(SmgError::EmptyStack)?;
        top.add_variable(object.label_arc(), object.id())?;
        self.smg.add_object(object);
        Ok(())
    }

    pub fn is_stack_object(&self, object: ObjectId) -> bool {
        self.stack.iter().any(|frame| frame.owns(object))
    }

    /// Depth of the frame owning `object`.
    pub fn frame_depth_of(&self, object: ObjectId) -> Option<usize> {
        self.stack.iter().position(|frame| frame.owns(object))
    }
}

// Globals
impl LanguageMemory {
    /// Adds a global object, named by its label.
    pub fn add_global_object(&mut self, object: SmgObject) -> Result<()> {
        let name = object.label_arc();
        if self.globals.contains_key(&name) {
            return Err(SmgError::DuplicateVariable(name));
        }
        self.globals.insert(name, object.id());
        self.smg.add_object(object);
        Ok(())
    }

    pub fn global(&self, name: &str) -> Option<ObjectId> {
        self.globals.get(name).copied()
    }

    pub fn globals(&self) -> impl Iterator<Item = (&Arc<str>, ObjectId)> {
        self.globals.iter().map(|(name, object)| (name, *object))
    }

    pub fn is_global(&self, object: ObjectId) -> bool {
        self.globals.values().any(|&o| o == object)
    }

    /// Resolves a variable name: the top frame first, then the globals.
    pub fn visible_variable(&self, name: &str) -> Option<ObjectId> {
        self.top_frame()
            .and_then(|frame| frame.variable(name))
            .or_else(|| self.global(name))
    }
}

// Heap
impl LanguageMemory {
    pub fn add_heap_object(&mut self, object: SmgObject) {
        self.heap.insert(object.id());
        self.smg.add_object(object);
    }

    /// Adds a heap object standing for memory allocated outside the analyzed code.
    pub fn add_external_object(&mut self, object: SmgObject) {
        self.external.insert(object.id());
        self.add_heap_object(object);
    }

    /// Registers an already present object as a heap object.
    pub fn mark_heap_object(&mut self, object: ObjectId) {
        self.heap.insert(object);
    }

    pub fn remove_heap_object(&mut self, object: ObjectId) {
        self.heap.remove(&object);
        self.external.remove(&object);
        self.smg.remove_object_and_edges(object);
    }

    pub fn heap_objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.heap.iter().copied()
    }

    pub fn is_heap_object(&self, object: ObjectId) -> bool {
        self.heap.contains(&object)
    }

    pub fn is_external(&self, object: ObjectId) -> bool {
        self.external.contains(&object)
    }

    pub fn set_external(&mut self, object: ObjectId, external: bool) {
        if external {
            self.external.insert(object);
        } else {
            self.external.remove(&object);
        }
    }

    pub fn external_objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.external.iter().copied()
    }
}

// Reachability
impl LanguageMemory {
    /// Root objects: globals, then every frame's variables and return slot.
    pub fn root_objects(&self) -> Vec<ObjectId> {
        let mut roots: Vec<ObjectId> = self.globals.values().copied().collect();
        for frame in self.stack.iter() {
            roots.extend(frame.objects());
        }
        roots
    }

    pub fn is_root_object(&self, object: ObjectId) -> bool {
        self.is_global(object) || self.is_stack_object(object)
    }

    /// Objects and values reachable from the roots.
    pub fn reachable(&self, shutdown: &ShutdownNotifier) -> Result<(HashSet<ObjectId>, HashSet<ValueId>)> {
        let mut objects: HashSet<ObjectId> = HashSet::new();
        let mut values: HashSet<ValueId> = HashSet::new();
        let mut queue: VecDeque<ObjectId> = VecDeque::new();

        objects.insert(ObjectId::NULL);
        values.insert(ValueId::ZERO);
        for root in self.root_objects() {
            if objects.insert(root) {
                queue.push_back(root);
            }
        }

        while let Some(object) = queue.pop_front() {
            shutdown.check()?;
            for edge in self.smg.edges_of(object) {
                values.insert(edge.value);
                if let Some(pt) = self.smg.points_to(edge.value) {
                    if objects.insert(pt.object) {
                        queue.push_back(pt.object);
                    }
                }
            }
        }

        Ok((objects, values))
    }

    /// Deletes unreachable objects and values.
    ///
    /// Every deleted object that was still valid and not external memory is
    /// reported in [`PruneOutcome::leaked`].
    pub fn prune(&mut self, shutdown: &ShutdownNotifier) -> Result<PruneOutcome> {
        let (reached_objects, reached_values) = self.reachable(shutdown)?;
        let mut outcome = PruneOutcome::default();

        let stray_objects: Vec<ObjectId> = self
            .smg
            .object_ids()
            .filter(|o| !reached_objects.contains(o))
            .collect();
        for object in stray_objects {
            shutdown.check()?;
            if self.smg.is_valid(object) && !self.is_external(object) {
                debug!("prune: leaked {}", object);
                outcome.leaked.push(object);
            }
            self.heap.remove(&object);
            self.external.remove(&object);
            self.smg.remove_object_and_edges(object);
            outcome.removed_objects.push(object);
        }

        let stray_values: Vec<ValueId> = self.smg.values().filter(|v| !reached_values.contains(v)).collect();
        for value in stray_values {
            self.smg.remove_value(value);
            outcome.removed_values.push(value);
        }

        debug!(
            "prune: removed {} objects, {} values, {} leaked",
            outcome.removed_objects.len(),
            outcome.removed_values.len(),
            outcome.leaked.len()
        );
        Ok(outcome)
    }

    /// Shortest memory path of every reachable object.
    pub fn object_paths(&self) -> BTreeMap<ObjectId, MemoryPath> {
        let mut paths: BTreeMap<ObjectId, MemoryPath> = BTreeMap::new();
        let mut queue: VecDeque<ObjectId> = VecDeque::new();

        for (name, object) in self.globals() {
            paths.insert(object, MemoryPath::new(PathRoot::Global(name.clone())));
            queue.push_back(object);
        }
        for (depth, frame) in self.stack.iter().enumerate() {
            let function = frame.function().name.clone();
            for (name, object) in frame.variables() {
                let root = PathRoot::Local {
                    depth,
                    function: function.clone(),
                    variable: name.clone(),
                };
                paths.insert(object, MemoryPath::new(root));
                queue.push_back(object);
            }
            if let Some(object) = frame.return_object() {
                let root = PathRoot::Return {
                    depth,
                    function: function.clone(),
                };
                paths.insert(object, MemoryPath::new(root));
                queue.push_back(object);
            }
        }

        while let Some(object) = queue.pop_front() {
            let Some(path) = paths.get(&object).cloned() else {
                continue;
            };
            for edge in self.smg.edges_of(object) {
                if let Some(pt) = self.smg.points_to(edge.value) {
                    if pt.object.is_null() || paths.contains_key(&pt.object) {
                        continue;
                    }
                    paths.insert(pt.object, path.child(edge.offset));
                    queue.push_back(pt.object);
                }
            }
        }

        paths
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::edge::{HasValueEdge, PointsToEdge};
    use crate::types::TargetSpecifier;

    fn point(memory: &mut LanguageMemory, from: ObjectId, offset: u64, value: u64, to: ObjectId) -> ValueId {
        let v = ValueId::new(value);
        memory.smg_mut().add_value(v);
        memory
            .smg_mut()
            .add_points_to_edge(PointsToEdge::new(v, to, 0, TargetSpecifier::Region));
        memory
            .smg_mut()
            .add_has_value_edge(HasValueEdge::new(from, offset, 64, v));
        v
    }

    #[test]
    fn test_frames_and_lookup() {
        let mut memory = LanguageMemory::new();
        memory
            .add_global_object(SmgObject::region(ObjectId::new(1), 32, "g"))
            .unwrap();
        assert!(matches!(
            memory.add_stack_object(SmgObject::region(ObjectId::new(2), 32, "x")),
            Err(SmgError::EmptyStack)
        ));
        memory.add_stack_frame(FunctionDecl::void("main"), None);
        memory
            .add_stack_object(SmgObject::region(ObjectId::new(2), 32, "x"))
            .unwrap();
        memory
            .add_stack_object(SmgObject::region(ObjectId::new(3), 32, "g"))
            .unwrap();
        assert_eq!(memory.visible_variable("x"), Some(ObjectId::new(2)));
        assert_eq!(memory.visible_variable("g"), Some(ObjectId::new(3)));
        assert!(memory.is_stack_object(ObjectId::new(2)));
        assert!(memory.is_global(ObjectId::new(1)));

        memory.drop_stack_frame().unwrap();
        assert_eq!(memory.visible_variable("g"), Some(ObjectId::new(1)));
        assert!(!memory.smg().contains_object(ObjectId::new(2)));
        assert!(matches!(memory.drop_stack_frame(), Err(SmgError::EmptyStack)));
    }

    #[test]
    fn test_prune_reports_leaks_once() {
        let mut memory = LanguageMemory::new();
        memory.add_stack_frame(FunctionDecl::void("main"), None);
        let p = ObjectId::new(1);
        memory.add_stack_object(SmgObject::region(p, 64, "p")).unwrap();
        let kept = ObjectId::new(2);
        let lost = ObjectId::new(3);
        let freed = ObjectId::new(4);
        memory.add_heap_object(SmgObject::region(kept, 64, "kept"));
        memory.add_heap_object(SmgObject::region(lost, 64, "lost"));
        memory.add_heap_object(SmgObject::region(freed, 64, "freed"));
        memory.smg_mut().set_validity(freed, false);
        point(&mut memory, p, 0, 10, kept);
        // The lost object points to the kept one; that does not make it reachable.
        point(&mut memory, lost, 0, 11, kept);

        let outcome = memory.prune(&ShutdownNotifier::new()).unwrap();
        assert_eq!(outcome.leaked, vec![lost]);
        assert_eq!(outcome.removed_objects, vec![lost, freed]);
        assert!(memory.smg().contains_object(kept));
        assert!(!memory.is_heap_object(lost));
        assert!(!memory.smg().contains_value(ValueId::new(11)));

        let again = memory.prune(&ShutdownNotifier::new()).unwrap();
        assert!(again.leaked.is_empty());
    }

    #[test]
    fn test_prune_ignores_external_memory() {
        let mut memory = LanguageMemory::new();
        memory.add_external_object(SmgObject::region(ObjectId::new(1), 64, "ext"));
        let outcome = memory.prune(&ShutdownNotifier::new()).unwrap();
        assert!(outcome.leaked.is_empty());
        assert_eq!(outcome.removed_objects, vec![ObjectId::new(1)]);
    }

    #[test]
    fn test_prune_honours_shutdown() {
        let mut memory = LanguageMemory::new();
        memory.add_global_object(SmgObject::region(ObjectId::new(1), 64, "g")).unwrap();
        let shutdown = ShutdownNotifier::new();
        shutdown.request_shutdown();
        assert!(matches!(memory.prune(&shutdown), Err(SmgError::Cancelled)));
    }

    #[test]
    fn test_object_paths() {
        let mut memory = LanguageMemory::new();
        let head = ObjectId::new(1);
        memory.add_global_object(SmgObject::region(head, 64, "head")).unwrap();
        let a = ObjectId::new(2);
        let b = ObjectId::new(3);
        memory.add_heap_object(SmgObject::region(a, 128, "a"));
        memory.add_heap_object(SmgObject::region(b, 128, "b"));
        point(&mut memory, head, 0, 10, a);
        point(&mut memory, a, 64, 11, b);
        let paths = memory.object_paths();
        assert_eq!(paths[&b].to_string(), "head->[0]->[64]");
        assert_eq!(paths[&a].depth(), 1);
    }
}
