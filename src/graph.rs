//! The symbolic memory graph.
//!
//! An [`Smg`] is a pure data structure: objects, values, has-value edges,
//! points-to edges, a validity map and a disequality relation. Its mutation
//! primitives do *not* keep the graph globally consistent; that is the job of
//! the state layer, which verifies the graph after a batch of operations
//! (see [`consistency`][crate::consistency]).
//!
//! All maps are persistent (`im`), so cloning a graph is O(1) and two graphs
//! derived from a common ancestor share their unmodified structure.
//!
//! # Invariants maintained by the state layer
//!
//! - Object `#0` is the Null object: size 0, always invalid.
//! - Value `v0` is the Zero value and points to the Null object at offset 0.
//! - Non-zero has-value edges of one object never overlap.
//! - A value has at most one points-to edge.

use im::{OrdMap, OrdSet};
use log::debug;

use crate::edge::{HasValueEdge, HasValueFilter, PointsToEdge};
use crate::error::{Result, SmgError};
use crate::object::SmgObject;
use crate::types::{ObjectId, TargetSpecifier, ValueId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smg {
    objects: OrdMap<ObjectId, SmgObject>,
    validity: OrdMap<ObjectId, bool>,
    values: OrdSet<ValueId>,
    has_value: OrdMap<ObjectId, OrdSet<HasValueEdge>>,
    points_to: OrdMap<ValueId, PointsToEdge>,
    neq: OrdMap<ValueId, OrdSet<ValueId>>,
}

impl Default for Smg {
    fn default() -> Self {
        Smg::new()
    }
}

impl Smg {
    /// Creates a graph holding only the Null object and the Zero value.
    pub fn new() -> Self {
        let mut smg = Smg {
            objects: OrdMap::new(),
            validity: OrdMap::new(),
            values: OrdSet::new(),
            has_value: OrdMap::new(),
            points_to: OrdMap::new(),
            neq: OrdMap::new(),
        };
        smg.objects.insert(ObjectId::NULL, SmgObject::null());
        smg.validity.insert(ObjectId::NULL, false);
        smg.values.insert(ValueId::ZERO);
        smg.points_to.insert(
            ValueId::ZERO,
            PointsToEdge::new(ValueId::ZERO, ObjectId::NULL, 0, TargetSpecifier::Region),
        );
        smg
    }
}

// Objects
impl Smg {
    pub fn null_object(&self) -> ObjectId {
        ObjectId::NULL
    }

    pub fn objects(&self) -> impl Iterator<Item = &SmgObject> {
        self.objects.values()
    }

    pub fn object_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.keys().copied()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn contains_object(&self, object: ObjectId) -> bool {
        self.objects.contains_key(&object)
    }

    pub fn object(&self, object: ObjectId) -> Option<&SmgObject> {
        self.objects.get(&object)
    }

    /// Like [`Smg::object`], but an absent object is a modeling fault.
    pub fn object_checked(&self, object: ObjectId) -> Result<&SmgObject> {
        self.objects.get(&object).ok_or(SmgError::UnknownObject(object))
    }

    /// Adds a new valid object.
    ///
    /// Keeps consistency: no.
    pub fn add_object(&mut self, object: SmgObject) {
        debug!("add_object({})", object);
        let id = object.id();
        let valid = !object.is_null();
        self.objects.insert(id, object);
        self.validity.insert(id, valid);
    }

    /// Replaces the description of an existing object, keeping its edges.
    ///
    /// Keeps consistency: no.
    pub fn replace_object(&mut self, object: SmgObject) {
        debug!("replace_object({})", object);
        self.objects.insert(object.id(), object);
    }

    /// Removes the object, leaving its edges in place.
    ///
    /// Keeps consistency: no.
    pub fn remove_object(&mut self, object: ObjectId) {
        assert!(!object.is_null(), "The Null object cannot be removed");
        debug!("remove_object({})", object);
        self.objects.remove(&object);
        self.validity.remove(&object);
    }

    /// Removes the object together with its has-value edges and all
    /// points-to edges targeting it.
    ///
    /// Keeps consistency: no.
    pub fn remove_object_and_edges(&mut self, object: ObjectId) {
        self.remove_object(object);
        self.has_value.remove(&object);
        let incoming: Vec<ValueId> = self
            .points_to
            .values()
            .filter(|pt| pt.object == object)
            .map(|pt| pt.value)
            .collect();
        for value in incoming {
            self.points_to.remove(&value);
        }
    }

    pub fn is_valid(&self, object: ObjectId) -> bool {
        self.validity.get(&object).copied().unwrap_or(false)
    }

    /// Keeps consistency: no.
    pub fn set_validity(&mut self, object: ObjectId, valid: bool) {
        assert!(!(object.is_null() && valid), "The Null object cannot be valid");
        debug!("set_validity({}, {})", object, valid);
        self.validity.insert(object, valid);
    }
}

// Values
impl Smg {
    pub fn zero_value(&self) -> ValueId {
        ValueId::ZERO
    }

    pub fn values(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.values.iter().copied()
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn contains_value(&self, value: ValueId) -> bool {
        self.values.contains(&value)
    }

    /// Keeps consistency: no.
    pub fn add_value(&mut self, value: ValueId) {
        self.values.insert(value);
    }

    /// Removes the value together with its points-to edge and disequalities.
    ///
    /// Keeps consistency: no.
    pub fn remove_value(&mut self, value: ValueId) {
        assert!(!value.is_zero(), "The Zero value cannot be removed");
        debug!("remove_value({})", value);
        self.values.remove(&value);
        self.points_to.remove(&value);
        for other in self.neq_of(value) {
            self.remove_neq(value, other);
        }
    }

    /// Identifies two values: every edge mentioning `removed` is redirected
    /// to `kept` and `removed` disappears from the graph.
    ///
    /// The Zero value is never removed; the operands are swapped instead.
    /// Returns the value that was kept.
    ///
    /// Keeps consistency: no.
    pub fn merge_values(&mut self, kept: ValueId, removed: ValueId) -> ValueId {
        let (kept, removed) = if removed.is_zero() { (removed, kept) } else { (kept, removed) };
        if kept == removed {
            return kept;
        }
        debug!("merge_values(kept = {}, removed = {})", kept, removed);

        for edge in self.edges_with_value(removed) {
            self.remove_has_value_edge(&edge);
            self.add_has_value_edge(edge.with_value(kept));
        }

        for other in self.neq_of(removed) {
            self.remove_neq(removed, other);
            if other != kept {
                self.add_neq(kept, other);
            }
        }

        if let Some(pt) = self.points_to.remove(&removed) {
            if !self.points_to.contains_key(&kept) {
                self.points_to.insert(kept, pt.with_value(kept));
            }
        }

        self.values.remove(&removed);
        kept
    }
}

// Has-value edges
impl Smg {
    /// Keeps consistency: no.
    pub fn add_has_value_edge(&mut self, edge: HasValueEdge) {
        let mut edges = self.has_value.get(&edge.object).cloned().unwrap_or_default();
        edges.insert(edge);
        self.has_value.insert(edge.object, edges);
    }

    /// Keeps consistency: no.
    pub fn remove_has_value_edge(&mut self, edge: &HasValueEdge) {
        if let Some(edges) = self.has_value.get_mut(&edge.object) {
            edges.remove(edge);
            if edges.is_empty() {
                self.has_value.remove(&edge.object);
            }
        }
    }

    /// Removes all has-value edges leaving `object`.
    ///
    /// Keeps consistency: no.
    pub fn clear_has_value_edges(&mut self, object: ObjectId) {
        self.has_value.remove(&object);
    }

    /// All has-value edges of `object`, ordered by offset.
    pub fn edges_of(&self, object: ObjectId) -> Vec<HasValueEdge> {
        self.has_value
            .get(&object)
            .map(|edges| edges.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_value_edges(&self, filter: &HasValueFilter) -> Vec<HasValueEdge> {
        match filter.target_object() {
            Some(object) => self
                .has_value
                .get(&object)
                .map(|edges| edges.iter().filter(|e| filter.matches(e)).copied().collect())
                .unwrap_or_default(),
            None => self.all_has_value_edges().filter(|e| filter.matches(e)).collect(),
        }
    }

    pub fn all_has_value_edges(&self) -> impl Iterator<Item = HasValueEdge> + '_ {
        self.has_value.values().flat_map(|edges| edges.iter().copied())
    }

    pub fn edges_with_value(&self, value: ValueId) -> Vec<HasValueEdge> {
        self.all_has_value_edges().filter(|e| e.value == value).collect()
    }

    /// The value stored exactly at `[offset, offset + size)`, if any.
    pub fn read_value(&self, object: ObjectId, offset: u64, size: u64) -> Option<ValueId> {
        self.has_value.get(&object).and_then(|edges| {
            edges
                .iter()
                .find(|e| e.offset == offset && e.size == size)
                .map(|e| e.value)
        })
    }

    /// Edges of `object` overlapping `[offset, offset + size)`.
    pub fn overlapping_edges(&self, object: ObjectId, offset: u64, size: u64) -> Vec<HasValueEdge> {
        self.has_value
            .get(&object)
            .map(|edges| edges.iter().filter(|e| e.overlaps(offset, size)).copied().collect())
            .unwrap_or_default()
    }

    /// Maximal contiguous bit ranges of `object` covered by zero edges, as
    /// `(start, end)` pairs ordered by start.
    pub fn nullified_blocks(&self, object: ObjectId) -> Vec<(u64, u64)> {
        let mut blocks: Vec<(u64, u64)> = Vec::new();
        let Some(edges) = self.has_value.get(&object) else {
            return blocks;
        };
        let mut zeros: Vec<(u64, u64)> = edges.iter().filter(|e| e.is_zero()).map(|e| (e.offset, e.end())).collect();
        zeros.sort_unstable();
        for (start, end) in zeros {
            match blocks.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => blocks.push((start, end)),
            }
        }
        blocks
    }

    /// Checks whether `[offset, offset + size)` of `object` is covered by
    /// zero edges without gaps.
    pub fn is_covered_by_nullified_blocks(&self, object: ObjectId, offset: u64, size: u64) -> bool {
        let end = offset + size;
        self.nullified_blocks(object)
            .iter()
            .any(|&(start, stop)| start <= offset && end <= stop)
    }

    /// Inserts `edge`, removing the edges it overlaps.
    ///
    /// Overlapped zero edges are not discarded but shrunk to the parts lying
    /// outside the new edge, so the knowledge that those bits are zero
    /// survives. Returns `false` if the exact edge was already present.
    ///
    /// Keeps consistency: no.
    pub fn write_edge(&mut self, edge: HasValueEdge) -> bool {
        let overlapping = self.overlapping_edges(edge.object, edge.offset, edge.size);
        if overlapping.contains(&edge) {
            debug!("write_edge({}): already present", edge);
            return false;
        }
        debug!("write_edge({}): {} overlapping edges", edge, overlapping.len());
        for old in overlapping {
            self.remove_has_value_edge(&old);
            if old.is_zero() {
                if old.offset < edge.offset {
                    self.add_has_value_edge(HasValueEdge::new(
                        old.object,
                        old.offset,
                        edge.offset - old.offset,
                        ValueId::ZERO,
                    ));
                }
                if old.end() > edge.end() {
                    self.add_has_value_edge(HasValueEdge::new(
                        old.object,
                        edge.end(),
                        old.end() - edge.end(),
                        ValueId::ZERO,
                    ));
                }
            }
        }
        self.add_has_value_edge(edge);
        true
    }
}

// Points-to edges
impl Smg {
    /// Keeps consistency: no.
    pub fn add_points_to_edge(&mut self, edge: PointsToEdge) {
        debug!("add_points_to_edge({})", edge);
        self.points_to.insert(edge.value, edge);
    }

    /// Keeps consistency: no.
    pub fn remove_points_to_edge(&mut self, value: ValueId) {
        self.points_to.remove(&value);
    }

    pub fn points_to_edges(&self) -> impl Iterator<Item = &PointsToEdge> {
        self.points_to.values()
    }

    /// The points-to edge of `value`, if it is a pointer.
    pub fn points_to(&self, value: ValueId) -> Option<&PointsToEdge> {
        self.points_to.get(&value)
    }

    /// Points-to edges targeting `object`.
    pub fn pointers_to(&self, object: ObjectId) -> Vec<PointsToEdge> {
        self.points_to.values().filter(|pt| pt.object == object).copied().collect()
    }

    /// Finds a value pointing to `object` at `offset` with `specifier`.
    pub fn find_pointer(&self, object: ObjectId, offset: u64, specifier: TargetSpecifier) -> Option<ValueId> {
        self.points_to
            .values()
            .find(|pt| pt.object == object && pt.offset == offset && pt.specifier == specifier)
            .map(|pt| pt.value)
    }

    pub fn pointer(&self, value: ValueId) -> Result<Option<PointsToEdge>> {
        if !self.contains_value(value) {
            return Err(SmgError::UnknownValue(value));
        }
        Ok(self.points_to.get(&value).copied())
    }

    pub fn is_pointer(&self, value: ValueId) -> Result<bool> {
        Ok(self.pointer(value)?.is_some())
    }

    pub fn object_pointed_by(&self, value: ValueId) -> Result<Option<ObjectId>> {
        Ok(self.pointer(value)?.map(|pt| pt.object))
    }

    /// Number of has-value edges holding a pointer into `object`.
    pub fn incoming_reference_count(&self, object: ObjectId) -> usize {
        self.pointers_to(object)
            .iter()
            .map(|pt| self.edges_with_value(pt.value).len())
            .sum()
    }
}

// Disequalities
impl Smg {
    /// Keeps consistency: no.
    pub fn add_neq(&mut self, a: ValueId, b: ValueId) {
        assert_ne!(a, b, "A value cannot be unequal to itself");
        for (x, y) in [(a, b), (b, a)] {
            let mut set = self.neq.get(&x).cloned().unwrap_or_default();
            set.insert(y);
            self.neq.insert(x, set);
        }
    }

    /// Keeps consistency: no.
    pub fn remove_neq(&mut self, a: ValueId, b: ValueId) {
        for (x, y) in [(a, b), (b, a)] {
            if let Some(set) = self.neq.get_mut(&x) {
                set.remove(&y);
                if set.is_empty() {
                    self.neq.remove(&x);
                }
            }
        }
    }

    pub fn is_neq(&self, a: ValueId, b: ValueId) -> bool {
        self.neq.get(&a).is_some_and(|set| set.contains(&b))
    }

    pub fn neq_of(&self, value: ValueId) -> Vec<ValueId> {
        self.neq
            .get(&value)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All disequal pairs, each reported once as `(smaller, larger)`.
    pub fn neq_pairs(&self) -> Vec<(ValueId, ValueId)> {
        self.neq
            .iter()
            .flat_map(|(a, set)| set.iter().filter(move |b| a < *b).map(move |b| (*a, *b)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn region(smg: &mut Smg, id: u64, size: u64) -> ObjectId {
        let object = ObjectId::new(id);
        smg.add_object(SmgObject::region(object, size, format!("r{}", id)));
        object
    }

    #[test]
    fn test_null_invariants() {
        let smg = Smg::new();
        let null = smg.object(ObjectId::NULL).unwrap();
        assert!(null.is_null());
        assert_eq!(null.size(), 0);
        assert!(!smg.is_valid(ObjectId::NULL));
        let pt = smg.points_to(ValueId::ZERO).unwrap();
        assert_eq!(pt.object, ObjectId::NULL);
        assert_eq!(pt.offset, 0);
    }

    #[test]
    fn test_unknown_value_queries_fail() {
        let smg = Smg::new();
        let v = ValueId::new(42);
        assert!(matches!(smg.is_pointer(v), Err(SmgError::UnknownValue(x)) if x == v));
        assert!(matches!(smg.object_pointed_by(v), Err(SmgError::UnknownValue(_))));
        assert!(matches!(smg.pointer(v), Err(SmgError::UnknownValue(_))));
    }

    #[test]
    fn test_write_overwrites_same_range() {
        let mut smg = Smg::new();
        let o = region(&mut smg, 1, 128);
        let (a, b) = (ValueId::new(1), ValueId::new(2));
        smg.add_value(a);
        smg.add_value(b);
        assert!(smg.write_edge(HasValueEdge::new(o, 0, 64, a)));
        assert!(smg.write_edge(HasValueEdge::new(o, 0, 64, b)));
        assert_eq!(smg.edges_of(o), vec![HasValueEdge::new(o, 0, 64, b)]);
        assert!(!smg.write_edge(HasValueEdge::new(o, 0, 64, b)));
    }

    #[test]
    fn test_write_shrinks_zero_edges() {
        let mut smg = Smg::new();
        let o = region(&mut smg, 1, 128);
        let v = ValueId::new(1);
        smg.add_value(v);
        smg.write_edge(HasValueEdge::new(o, 0, 128, ValueId::ZERO));
        smg.write_edge(HasValueEdge::new(o, 32, 32, v));
        let edges = smg.edges_of(o);
        assert_eq!(edges.len(), 3);
        assert!(edges.contains(&HasValueEdge::new(o, 0, 32, ValueId::ZERO)));
        assert!(edges.contains(&HasValueEdge::new(o, 32, 32, v)));
        assert!(edges.contains(&HasValueEdge::new(o, 64, 64, ValueId::ZERO)));
        assert!(smg.is_covered_by_nullified_blocks(o, 64, 64));
        assert!(!smg.is_covered_by_nullified_blocks(o, 0, 64));
    }

    #[test]
    fn test_nullified_blocks_merge_adjacent() {
        let mut smg = Smg::new();
        let o = region(&mut smg, 1, 128);
        smg.add_has_value_edge(HasValueEdge::new(o, 0, 32, ValueId::ZERO));
        smg.add_has_value_edge(HasValueEdge::new(o, 32, 32, ValueId::ZERO));
        smg.add_has_value_edge(HasValueEdge::new(o, 96, 32, ValueId::ZERO));
        assert_eq!(smg.nullified_blocks(o), vec![(0, 64), (96, 128)]);
        assert!(smg.is_covered_by_nullified_blocks(o, 16, 32));
        assert!(!smg.is_covered_by_nullified_blocks(o, 48, 32));
    }

    #[test]
    fn test_merge_values_redirects_edges() {
        let mut smg = Smg::new();
        let o = region(&mut smg, 1, 128);
        let (a, b, c) = (ValueId::new(1), ValueId::new(2), ValueId::new(3));
        for v in [a, b, c] {
            smg.add_value(v);
        }
        smg.add_has_value_edge(HasValueEdge::new(o, 0, 64, b));
        smg.add_neq(b, c);
        let kept = smg.merge_values(a, b);
        assert_eq!(kept, a);
        assert!(!smg.contains_value(b));
        assert_eq!(smg.read_value(o, 0, 64), Some(a));
        assert!(smg.is_neq(a, c));
        assert!(!smg.is_neq(b, c));
    }

    #[test]
    fn test_merge_never_removes_zero() {
        let mut smg = Smg::new();
        let o = region(&mut smg, 1, 64);
        let a = ValueId::new(1);
        smg.add_value(a);
        smg.add_has_value_edge(HasValueEdge::new(o, 0, 64, a));
        let kept = smg.merge_values(ValueId::ZERO, a);
        assert_eq!(kept, ValueId::ZERO);
        let kept = smg.merge_values(a, ValueId::ZERO);
        assert_eq!(kept, ValueId::ZERO);
        assert!(smg.contains_value(ValueId::ZERO));
        assert_eq!(smg.read_value(o, 0, 64), Some(ValueId::ZERO));
    }

    #[test]
    fn test_remove_object_and_edges() {
        let mut smg = Smg::new();
        let o = region(&mut smg, 1, 64);
        let p = ValueId::new(1);
        smg.add_value(p);
        smg.add_points_to_edge(PointsToEdge::new(p, o, 0, TargetSpecifier::Region));
        smg.add_has_value_edge(HasValueEdge::new(o, 0, 64, p));
        assert_eq!(smg.incoming_reference_count(o), 1);
        smg.remove_object_and_edges(o);
        assert!(!smg.contains_object(o));
        assert!(smg.edges_of(o).is_empty());
        assert_eq!(smg.points_to(p), None);
        assert!(smg.contains_value(p));
    }

    #[test]
    fn test_neq_is_symmetric() {
        let mut smg = Smg::new();
        let (a, b) = (ValueId::new(1), ValueId::new(2));
        smg.add_value(a);
        smg.add_value(b);
        smg.add_neq(a, b);
        assert!(smg.is_neq(b, a));
        assert_eq!(smg.neq_pairs(), vec![(a, b)]);
        smg.remove_neq(b, a);
        assert!(!smg.is_neq(a, b));
        assert!(smg.neq_pairs().is_empty());
    }
}
