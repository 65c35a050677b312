//! Materialization: splitting a concrete node off an abstract object.
//!
//! Dereferencing a pointer into a list segment of minimum length `n` yields:
//!
//! - for `n > 0`, one state where the pointed-to end of the segment is a
//!   concrete region followed (or preceded) by a segment of length `n - 1`;
//! - for `n = 0`, additionally a state where the segment is empty and every
//!   pointer into it is identified with the value past its end.
//!
//! Optional objects are either present (turned into a region in place) or
//! absent (pointers to them are identified with their only non-null field,
//! or with Zero).
//!
//! Each successor comes with the value the dereferenced pointer has become,
//! which the caller resolves again.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::abstraction::finder::link_value;
use crate::edge::{HasValueEdge, PointsToEdge};
use crate::error::{Result, SmgError};
use crate::object::{ObjectKind, SmgObject};
use crate::state::SmgState;
use crate::types::{ObjectId, TargetSpecifier, ValueId};

/// Materializes the abstract object `pointer` points to.
pub fn materialize(state: &SmgState, pointer: ValueId) -> Result<Vec<(SmgState, ValueId)>> {
    let pt = state
        .smg()
        .pointer(pointer)?
        .ok_or_else(|| SmgError::InconsistentGraph(format!("{} is not a pointer", pointer)))?;
    let object = state.smg().object_checked(pt.object)?.clone();
    debug!("materialize({}) via {}", object, pt);
    let from_last = pt.specifier == TargetSpecifier::Last && object.pfo().is_some();
    let successors = match object.kind() {
        ObjectKind::Sll { .. } | ObjectKind::Dll { .. } => {
            let mut successors = vec![split_node(state, &object, pointer, from_last)?];
            if object.min_length() == 0 {
                successors.extend(remove_empty_segment(state, &object, pointer, from_last)?);
            }
            successors
        }
        ObjectKind::Optional => {
            let mut successors = vec![make_present(state, &object, pointer)?];
            successors.extend(remove_optional(state, &object, pointer)?);
            successors
        }
        ObjectKind::Null | ObjectKind::Region => {
            return Err(SmgError::InconsistentGraph(format!(
                "cannot materialize concrete object {}",
                object
            )))
        }
    };
    Ok(successors)
}

/// Copies the value of a summary field into a materialized node.
///
/// Scalars and pointers to shared objects are kept: a summary only holds a
/// value that all folded nodes agreed on. Pointers to objects owned by the
/// summary (nested one level down) are deep-copied. Back-pointers into the
/// summary now target the new node.
struct FieldCopier {
    segment: ObjectId,
    level: u32,
    node: ObjectId,
    copies: BTreeMap<ObjectId, ObjectId>,
}

impl FieldCopier {
    fn copy_value(&mut self, state: &mut SmgState, value: ValueId) -> Result<ValueId> {
        if value.is_zero() || state.explicit_value(value).is_some() {
            return Ok(value);
        }
        let Some(pt) = state.smg().points_to(value).copied() else {
            return Ok(value);
        };
        if pt.object == self.segment {
            return Ok(state.add_pointer(self.node, pt.offset, TargetSpecifier::Region));
        }
        let target = state.smg().object_checked(pt.object)?.clone();
        if target.level() <= self.level {
            return Ok(value);
        }
        let copy = self.copy_object(state, &target)?;
        let specifier = if target.is_list_segment() {
            pt.specifier
        } else {
            TargetSpecifier::Region
        };
        Ok(state.add_pointer(copy, pt.offset, specifier))
    }

    fn copy_object(&mut self, state: &mut SmgState, object: &SmgObject) -> Result<ObjectId> {
        if let Some(&copy) = self.copies.get(&object.id()) {
            return Ok(copy);
        }
        state.context().check_shutdown()?;
        let id = state.context().fresh_object_id();
        self.copies.insert(object.id(), id);
        let copy = object.with_id(id).with_level(object.level() - 1);
        let valid = state.smg().is_valid(object.id());
        state.memory_mut().add_heap_object(copy);
        state.smg_mut().set_validity(id, valid);
        for edge in state.smg().edges_of(object.id()) {
            let value = self.copy_value(state, edge.value)?;
            state.smg_mut().add_has_value_edge(HasValueEdge::new(id, edge.offset, edge.size, value));
        }
        Ok(id)
    }
}

/// Objects owned by `object`: reachable through pointers to deeper levels.
fn owned_objects(state: &SmgState, object: &SmgObject) -> BTreeSet<ObjectId> {
    let smg = state.smg();
    let mut owned = BTreeSet::new();
    let mut pending = vec![object.id()];
    while let Some(current) = pending.pop() {
        for edge in smg.edges_of(current) {
            let Some(pt) = smg.points_to(edge.value) else {
                continue;
            };
            let deeper = smg.object(pt.object).is_some_and(|t| t.level() > object.level());
            if deeper && owned.insert(pt.object) {
                pending.push(pt.object);
            }
        }
    }
    owned
}

/// Splits the first (or last) node off the segment.
fn split_node(state: &SmgState, segment: &SmgObject, pointer: ValueId, from_last: bool) -> Result<(SmgState, ValueId)> {
    let mut next = state.successor();
    let pointer_size = state.context().machine().pointer_bits;
    let id = segment.id();
    let (hfo, nfo) = match (segment.hfo(), segment.nfo()) {
        (Some(hfo), Some(nfo)) => (hfo, nfo),
        _ => return Err(SmgError::InconsistentGraph(format!("{} is not a list segment", segment))),
    };
    let pfo = segment.pfo();

    let node = state.context().fresh_object_id();
    let region = SmgObject::new(node, segment.size(), segment.label_arc(), segment.level(), ObjectKind::Region);
    next.memory_mut().add_heap_object(region);

    let mut copier = FieldCopier {
        segment: id,
        level: segment.level(),
        node,
        copies: BTreeMap::new(),
    };
    for edge in state.smg().edges_of(id) {
        if segment.is_link_offset(edge.offset) && edge.size == pointer_size {
            continue;
        }
        let value = copier.copy_value(&mut next, edge.value)?;
        next.smg_mut()
            .add_has_value_edge(HasValueEdge::new(node, edge.offset, edge.size, value));
    }

    // Pointers to the materialized end now target the new node.
    let end = if from_last { TargetSpecifier::Last } else { TargetSpecifier::First };
    for pt in state.smg().pointers_to(id) {
        if pt.specifier == end {
            next.smg_mut()
                .add_points_to_edge(pt.with_target(node, TargetSpecifier::Region));
        }
    }

    let (inner_link, outer_link) = if from_last {
        (pfo.unwrap_or(nfo), nfo)
    } else {
        (nfo, pfo.unwrap_or(nfo))
    };
    let into_segment = next.add_pointer(id, hfo, end);
    next.smg_mut()
        .write_edge(HasValueEdge::new(node, inner_link, pointer_size, into_segment));
    if pfo.is_some() {
        let outer = match link_value(state, id, outer_link) {
            Some(value) => value,
            None => next.add_fresh_value(),
        };
        next.smg_mut()
            .write_edge(HasValueEdge::new(node, outer_link, pointer_size, outer));
        let back = next.add_pointer(node, hfo, TargetSpecifier::Region);
        next.smg_mut()
            .write_edge(HasValueEdge::new(id, outer_link, pointer_size, back));
    }

    let remaining = segment.min_length().saturating_sub(1);
    next.smg_mut().replace_object(segment.with_min_length(remaining));
    debug!("split_node: {} off {} (now {}+)", node, id, remaining);
    Ok((next.finish()?, pointer))
}

/// The successor in which the empty segment disappears.
///
/// Returns `None` if `pointer` is known to differ from the value past the
/// segment end.
fn remove_empty_segment(
    state: &SmgState,
    segment: &SmgObject,
    pointer: ValueId,
    from_last: bool,
) -> Result<Option<(SmgState, ValueId)>> {
    let id = segment.id();
    let nfo = segment
        .nfo()
        .ok_or_else(|| SmgError::InconsistentGraph(format!("{} is not a list segment", segment)))?;
    let after_last = link_value(state, id, nfo);
    let before_first = segment.pfo().and_then(|pfo| link_value(state, id, pfo));
    let own = if from_last { before_first } else { after_last };
    if let Some(replacement) = own {
        if state.are_non_equal(pointer, replacement) {
            debug!("remove_empty_segment: {} != {}, infeasible", pointer, replacement);
            return Ok(None);
        }
    }

    let mut next = state.successor();
    let mut first_replacement = match after_last {
        Some(value) => value,
        None => next.add_fresh_value(),
    };
    let mut last_replacement = match before_first {
        Some(value) => value,
        None => next.add_fresh_value(),
    };
    let mut resolved = pointer;
    for pt in state.smg().pointers_to(id) {
        next.smg_mut().remove_points_to_edge(pt.value);
        let replacement = match pt.specifier {
            TargetSpecifier::Last => &mut last_replacement,
            _ => &mut first_replacement,
        };
        let kept = next.merge_values(*replacement, pt.value);
        *replacement = kept;
        if pt.value == pointer {
            resolved = kept;
        }
    }
    if resolved == pointer && !next.smg().contains_value(pointer) {
        resolved = if from_last { last_replacement } else { first_replacement };
    }

    for object in owned_objects(state, segment) {
        next.memory_mut().remove_heap_object(object);
    }
    next.memory_mut().remove_heap_object(id);
    debug!("remove_empty_segment: {} removed, {} resolved to {}", id, pointer, resolved);
    Ok(Some((next.finish()?, resolved)))
}

/// The successor in which the optional object exists.
fn make_present(state: &SmgState, object: &SmgObject, pointer: ValueId) -> Result<(SmgState, ValueId)> {
    let mut next = state.successor();
    next.smg_mut().replace_object(object.with_kind(ObjectKind::Region));
    let retargeted: Vec<PointsToEdge> = state.smg().pointers_to(object.id());
    for pt in retargeted {
        if pt.specifier != TargetSpecifier::Region {
            next.smg_mut()
                .add_points_to_edge(pt.with_target(object.id(), TargetSpecifier::Region));
        }
    }
    Ok((next.finish()?, pointer))
}

/// The successor in which the optional object does not exist.
fn remove_optional(state: &SmgState, object: &SmgObject, pointer: ValueId) -> Result<Option<(SmgState, ValueId)>> {
    let values: BTreeSet<ValueId> = state
        .smg()
        .edges_of(object.id())
        .into_iter()
        .map(|e| e.value)
        .filter(|v| !v.is_zero())
        .collect();
    let replacement = match values.len() {
        1 => values.into_iter().next().unwrap_or(ValueId::ZERO),
        _ => ValueId::ZERO,
    };
    if state.are_non_equal(pointer, replacement) {
        return Ok(None);
    }

    let mut next = state.successor();
    let mut kept = replacement;
    for pt in state.smg().pointers_to(object.id()) {
        next.smg_mut().remove_points_to_edge(pt.value);
        kept = next.merge_values(kept, pt.value);
    }
    for owned in owned_objects(state, object) {
        next.memory_mut().remove_heap_object(owned);
    }
    next.memory_mut().remove_heap_object(object.id());
    Ok(Some((next.finish()?, kept)))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use test_log::test;

    use super::*;
    use crate::context::AnalysisContext;
    use crate::frame::FunctionDecl;
    use crate::options::SmgOptions;

    fn with_segment(min_length: u32) -> (SmgState, ObjectId, ValueId) {
        let options = SmgOptions {
            check_consistency: true,
            ..SmgOptions::default()
        };
        let state = SmgState::initial(AnalysisContext::with_options(options))
            .add_stack_frame(FunctionDecl::void("main"))
            .unwrap();
        let (mut state, head) = state.add_local_variable(64, "head").unwrap();
        let segment = state.context().fresh_object_id();
        let kind = ObjectKind::Sll {
            hfo: 0,
            nfo: 64,
            min_length,
        };
        state
            .memory_mut()
            .add_heap_object(SmgObject::new(segment, 128, "node", 0, kind));
        state
            .smg_mut()
            .add_has_value_edge(HasValueEdge::new(segment, 0, 64, ValueId::ZERO));
        state
            .smg_mut()
            .add_has_value_edge(HasValueEdge::new(segment, 64, 64, ValueId::ZERO));
        let pointer = state.add_pointer(segment, 0, TargetSpecifier::First);
        let state = state.write_value(head, 0, 64, pointer).unwrap();
        (state, segment, pointer)
    }

    #[test]
    fn test_split_keeps_total_length() {
        let (state, segment, pointer) = with_segment(3);
        let successors = materialize(&state, pointer).unwrap();
        assert_eq!(successors.len(), 1);
        let (next, resolved) = &successors[0];
        assert_eq!(*resolved, pointer);
        let node = next.smg().points_to(pointer).unwrap().object;
        assert!(next.smg().object(node).unwrap().is_region());
        assert_eq!(next.smg().object(segment).unwrap().min_length(), 2);
        // The node's next field points into the remaining segment.
        let link = next.smg().read_value(node, 64, 64).unwrap();
        let pt = next.smg().points_to(link).unwrap();
        assert_eq!((pt.object, pt.specifier), (segment, TargetSpecifier::First));
        assert_eq!(next.smg().read_value(node, 0, 64), Some(ValueId::ZERO));
    }

    #[test]
    fn test_split_keeps_shared_scalar() {
        let (mut state, segment, pointer) = with_segment(2);
        let shared = state.add_fresh_value();
        let state = state.write_value(segment, 0, 64, shared).unwrap();

        let successors = materialize(&state, pointer).unwrap();
        assert_eq!(successors.len(), 1);
        let (next, _) = &successors[0];
        let node = next.smg().points_to(pointer).unwrap().object;
        assert_eq!(next.smg().read_value(node, 0, 64), Some(shared));
        assert_eq!(next.smg().read_value(segment, 0, 64), Some(shared));
    }

    #[test]
    fn test_empty_segment_has_two_successors() {
        let (state, segment, pointer) = with_segment(0);
        let successors = materialize(&state, pointer).unwrap();
        assert_eq!(successors.len(), 2);
        let (absent, resolved) = &successors[1];
        assert_eq!(*resolved, ValueId::ZERO);
        assert!(!absent.smg().contains_object(segment));
        let (present, _) = &successors[0];
        assert_eq!(present.smg().object(segment).unwrap().min_length(), 0);
    }

    #[test]
    fn test_pointer_targets_resolve_through_segments() {
        let (state, _, pointer) = with_segment(0);
        let targets = state.get_pointer_targets(pointer).unwrap();
        assert_eq!(targets.len(), 2);
        let objects: BTreeSet<bool> = targets
            .iter()
            .map(|t| t.address.is_some_and(|a| a.is_null()))
            .collect();
        assert_eq!(objects, BTreeSet::from([false, true]));
    }
}
