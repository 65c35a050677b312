//! List-segment abstraction and materialization.
//!
//! Abstraction summarizes chains of equally shaped heap nodes into a single
//! list segment (singly or doubly linked) whose minimum length is the number
//! of concrete nodes it replaced. Materialization is the inverse step,
//! performed when a pointer into a segment is dereferenced: it splits one
//! concrete node off the segment (see [`materialize`]).
//!
//! # Examples
//!
//! ```
//! use std::collections::BTreeSet;
//!
//! use smg_rs::context::AnalysisContext;
//! use smg_rs::frame::FunctionDecl;
//! use smg_rs::options::SmgOptions;
//! use smg_rs::state::SmgState;
//! use smg_rs::types::ValueId;
//!
//! let ctx = AnalysisContext::with_options(SmgOptions::default());
//! let state = SmgState::initial(ctx).add_stack_frame(FunctionDecl::void("main")).unwrap();
//! let (mut state, head) = state.add_local_variable(64, "head").unwrap();
//!
//! // head -> n3 -> n2 -> n1 -> NULL, nodes of 128 bits with "next" at 64
//! let mut next = ValueId::ZERO;
//! for _ in 0..3 {
//!     let allocated = state.allocate_heap(128, "node").unwrap().remove(0);
//!     let pointer = allocated.value.unwrap();
//!     let node = allocated.state.smg().points_to(pointer).unwrap().object;
//!     state = allocated.state.write_value(node, 0, 64, ValueId::ZERO).unwrap();
//!     state = state.write_value(node, 64, 64, next).unwrap();
//!     next = pointer;
//! }
//! let state = state.write_value(head, 0, 64, next).unwrap();
//!
//! let (abstracted, changed) = state.execute_heap_abstraction(&BTreeSet::new()).unwrap();
//! assert!(changed);
//! let segment = abstracted.smg().objects().find(|o| o.is_list_segment()).unwrap();
//! assert_eq!(segment.min_length(), 3);
//! ```

use std::collections::BTreeSet;

use log::{debug, info};

use crate::edge::HasValueEdge;
use crate::error::Result;
use crate::object::{ObjectKind, SmgObject};
use crate::path::MemoryPath;
use crate::state::SmgState;
use crate::types::{ObjectId, TargetSpecifier, ValueId};

pub mod candidate;
pub mod finder;
pub mod materialize;
pub mod template;

use candidate::AbstractionCandidate;
use template::FieldTemplate;

impl SmgState {
    /// Summarizes list-like structures until no candidate is left.
    ///
    /// Chains starting at objects whose memory paths are in `blocked` are
    /// left alone. Returns the new state and whether anything changed.
    pub fn execute_heap_abstraction(&self, blocked: &BTreeSet<MemoryPath>) -> Result<(SmgState, bool)> {
        let mut state = self.successor();
        if !self.context().options().heap_abstraction {
            return Ok((state, false));
        }
        let mut changed = false;
        while let Some(candidate) = candidate::best_candidate(&state, blocked)? {
            self.context().check_shutdown()?;
            fold_candidate(&mut state, &candidate)?;
            changed = true;
        }
        if changed {
            info!("heap abstraction: {} objects left", state.smg().object_count());
        }
        Ok((state.finish()?, changed))
    }
}

fn retarget_specifier(specifier: TargetSpecifier, is_first: bool, is_last: bool) -> Option<TargetSpecifier> {
    match specifier {
        TargetSpecifier::All => Some(TargetSpecifier::All),
        TargetSpecifier::Region | TargetSpecifier::First if is_first => Some(TargetSpecifier::First),
        TargetSpecifier::Region | TargetSpecifier::Last if is_last => Some(TargetSpecifier::Last),
        _ => None,
    }
}

/// Replaces the nodes of `candidate` by one list segment.
fn fold_candidate(state: &mut SmgState, candidate: &AbstractionCandidate) -> Result<()> {
    let chain = &candidate.chain;
    let shape = chain.shape;
    let first_node = state.smg().object_checked(chain.first())?.clone();
    let min_length: u32 = chain
        .nodes
        .iter()
        .filter_map(|&n| state.smg().object(n))
        .map(|o| o.min_length())
        .sum();
    let kind = match shape.pfo {
        None => ObjectKind::Sll {
            hfo: shape.hfo,
            nfo: shape.nfo,
            min_length,
        },
        Some(pfo) => ObjectKind::Dll {
            hfo: shape.hfo,
            nfo: shape.nfo,
            pfo,
            min_length,
        },
    };
    let segment_id = state.context().fresh_object_id();
    let level = first_node.level();
    let segment = SmgObject::new(segment_id, first_node.size(), first_node.label_arc(), level, kind);
    debug!("fold_candidate: {:?} -> {}", chain.nodes, segment);

    let pointer_size = state.context().machine().pointer_bits;
    let next_value = finder::link_value(state, chain.last(), shape.nfo);
    let prev_value = shape.pfo.and_then(|pfo| finder::link_value(state, chain.first(), pfo));

    // Pointers stored in the links between the nodes disappear with the nodes.
    let mut internal: BTreeSet<ValueId> = BTreeSet::new();
    for window in chain.nodes.windows(2) {
        if let Some(v) = finder::link_value(state, window[0], shape.nfo) {
            internal.insert(v);
        }
        if let Some(v) = shape.pfo.and_then(|pfo| finder::link_value(state, window[1], pfo)) {
            internal.insert(v);
        }
    }

    let memory = state.memory_mut();
    memory.add_heap_object(segment);
    let smg = memory.smg_mut();
    for (&(offset, size), field) in &candidate.template.fields {
        match field {
            FieldTemplate::Value(value) => {
                smg.add_has_value_edge(HasValueEdge::new(segment_id, offset, size, *value));
            }
            FieldTemplate::Fresh => {}
            FieldTemplate::Nested {
                pointer, target, fresh, ..
            } => {
                smg.add_has_value_edge(HasValueEdge::new(segment_id, offset, size, *pointer));
                if let Some(object) = smg.object(*target).cloned() {
                    if object.level() == level {
                        smg.replace_object(object.with_level(level + 1));
                    }
                }
                for edge in smg.edges_of(*target) {
                    if fresh.contains(&(edge.offset, edge.size)) {
                        smg.remove_has_value_edge(&edge);
                    }
                }
            }
        }
    }
    if let Some(next) = next_value {
        smg.add_has_value_edge(HasValueEdge::new(segment_id, shape.nfo, pointer_size, next));
    }
    if let (Some(pfo), Some(prev)) = (shape.pfo, prev_value) {
        smg.add_has_value_edge(HasValueEdge::new(segment_id, pfo, pointer_size, prev));
    }

    let last_index = chain.len() - 1;
    for (index, &node) in chain.nodes.iter().enumerate() {
        for pt in smg.pointers_to(node) {
            if internal.contains(&pt.value) {
                continue;
            }
            let is_first = index == 0;
            let is_last = index == last_index && shape.pfo.is_some();
            if let Some(specifier) = retarget_specifier(pt.specifier, is_first, is_last) {
                smg.add_points_to_edge(pt.with_target(segment_id, specifier));
            }
        }
    }

    let discarded: Vec<ObjectId> = candidate.template.discarded_objects();
    for object in chain.nodes.iter().chain(discarded.iter()) {
        memory.remove_heap_object(*object);
    }
    for value in &internal {
        if !value.is_zero() && memory.smg().contains_value(*value) {
            memory.smg_mut().remove_value(*value);
        }
    }
    let explicit = state.explicit_mut();
    for value in internal {
        explicit.remove(value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::context::AnalysisContext;
    use crate::frame::FunctionDecl;
    use crate::options::{AbstractionThresholds, SmgOptions};
    use num_bigint::BigInt;

    fn main_state(options: SmgOptions) -> SmgState {
        let options = SmgOptions {
            check_consistency: true,
            ..options
        };
        SmgState::initial(AnalysisContext::with_options(options))
            .add_stack_frame(FunctionDecl::void("main"))
            .unwrap()
    }

    /// Builds `head -> n1 -> ... -> nk -> NULL` with `data` written at offset 0.
    fn build_list(state: SmgState, data: &[Option<i64>], doubly: bool) -> (SmgState, ObjectId) {
        let (mut state, head) = state.add_local_variable(64, "head").unwrap();
        let size = if doubly { 192 } else { 128 };
        let mut next = ValueId::ZERO;
        let mut next_node: Option<ObjectId> = None;
        for value in data.iter().rev() {
            let allocated = state.allocate_heap(size, "node").unwrap().remove(0);
            let pointer = allocated.value.unwrap();
            state = allocated.state;
            let node = state.smg().points_to(pointer).unwrap().object;
            if let Some(number) = value {
                let n = state.value_for_number(BigInt::from(*number));
                state = n.state.write_value(node, 0, 64, n.value.unwrap()).unwrap();
            }
            state = state.write_value(node, 64, 64, next).unwrap();
            if doubly {
                state = state.write_value(node, 128, 64, ValueId::ZERO).unwrap();
                if let Some(successor) = next_node {
                    state = state.write_value(successor, 128, 64, pointer).unwrap();
                }
            }
            next = pointer;
            next_node = Some(node);
        }
        let state = state.write_value(head, 0, 64, next).unwrap();
        (state, head)
    }

    fn segments(state: &SmgState) -> Vec<SmgObject> {
        state.smg().objects().filter(|o| o.is_list_segment()).cloned().collect()
    }

    fn regions_on_heap(state: &SmgState) -> usize {
        state
            .memory()
            .heap_objects()
            .filter(|&o| state.smg().object(o).is_some_and(|o| o.is_region()))
            .count()
    }

    #[test]
    fn test_five_node_sll() {
        let (state, _) = build_list(main_state(SmgOptions::default()), &[Some(0); 5], false);
        let (abstracted, changed) = state.execute_heap_abstraction(&BTreeSet::new()).unwrap();
        assert!(changed);
        let segs = segments(&abstracted);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].min_length(), 5);
        assert!(matches!(segs[0].kind(), ObjectKind::Sll { hfo: 0, nfo: 64, .. }));
        assert_eq!(regions_on_heap(&abstracted), 0);
        assert!(!abstracted.prune_unreachable().unwrap().has_memory_leaks());
    }

    #[test]
    fn test_five_node_sll_distinct_payloads() {
        let data: Vec<Option<i64>> = (1..=5).map(Some).collect();
        let (state, _) = build_list(main_state(SmgOptions::default()), &data, false);
        let (abstracted, changed) = state.execute_heap_abstraction(&BTreeSet::new()).unwrap();
        assert!(changed);
        let segs = segments(&abstracted);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].min_length(), 5);
        assert_eq!(regions_on_heap(&abstracted), 0);
    }

    #[test]
    fn test_dll_detected() {
        let (state, head) = build_list(main_state(SmgOptions::default()), &[None; 3], true);
        let (abstracted, _) = state.execute_heap_abstraction(&BTreeSet::new()).unwrap();
        let segs = segments(&abstracted);
        assert_eq!(segs.len(), 1);
        assert!(matches!(segs[0].kind(), ObjectKind::Dll { pfo: 128, min_length: 3, .. }));
        let pointer = abstracted.smg().read_value(head, 0, 64).unwrap();
        let pt = abstracted.smg().points_to(pointer).unwrap();
        assert_eq!(pt.specifier, TargetSpecifier::First);
    }

    #[test]
    fn test_incomparable_threshold() {
        let options = SmgOptions {
            thresholds: AbstractionThresholds {
                incomparable: 4,
                ..AbstractionThresholds::default()
            },
            ..SmgOptions::default()
        };
        let (state, _) = build_list(main_state(options), &[Some(1), Some(2), Some(3)], false);
        let (_, changed) = state.execute_heap_abstraction(&BTreeSet::new()).unwrap();
        assert!(!changed);

        let (state, _) = build_list(main_state(SmgOptions::default()), &[Some(1), Some(2), Some(3)], false);
        let (abstracted, changed) = state.execute_heap_abstraction(&BTreeSet::new()).unwrap();
        assert!(changed);
        let segment = &segments(&abstracted)[0];
        // The data field differs between nodes and is not kept.
        assert_eq!(abstracted.smg().read_value(segment.id(), 0, 64), None);
    }

    #[test]
    fn test_blocked_start_is_skipped() {
        let (state, _) = build_list(main_state(SmgOptions::default()), &[Some(0); 2], false);
        let paths = state.memory().object_paths();
        let blocked: BTreeSet<MemoryPath> = paths.values().filter(|p| p.depth() == 1).cloned().collect();
        let (_, changed) = state.execute_heap_abstraction(&blocked).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_disabled_abstraction() {
        let options = SmgOptions {
            heap_abstraction: false,
            ..SmgOptions::default()
        };
        let (state, _) = build_list(main_state(options), &[Some(0); 5], false);
        let (abstracted, changed) = state.execute_heap_abstraction(&BTreeSet::new()).unwrap();
        assert!(!changed);
        assert!(segments(&abstracted).is_empty());
    }
}
