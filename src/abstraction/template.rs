//! Folding the fields of chain nodes into a common node template.
//!
//! Every non-link field of the chain is compared across all nodes. Fields
//! holding the same value in every node keep it; differing scalar fields
//! become fresh (unknown) in the summary; pointers to exclusively owned,
//! pointer-free regions become nested objects of the summary. Any other
//! difference between pointers prevents the fold, since the targets would
//! become unreachable.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::abstraction::finder::Chain;
use crate::state::SmgState;
use crate::types::{ObjectId, ValueId};

/// How similar the folded nodes are.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NodeComparison {
    /// All nodes are structurally equal.
    Equal,
    /// Some node is more general than another.
    Entailed,
    /// Nodes hold conflicting information.
    Incomparable,
}

impl NodeComparison {
    pub fn update(self, other: NodeComparison) -> NodeComparison {
        self.max(other)
    }
}

/// The summary of one field of the folded nodes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FieldTemplate {
    /// Every node holds this value.
    Value(ValueId),
    /// Nodes disagree; the summary does not know the value.
    Fresh,
    /// Every node owns a region here; `target` (the first node's) stands for
    /// all of them. Its fields in `fresh` differ across nodes.
    Nested {
        pointer: ValueId,
        target: ObjectId,
        fresh: BTreeSet<(u64, u64)>,
        discarded: Vec<ObjectId>,
    },
}

#[derive(Debug, Clone)]
pub struct NodeTemplate {
    pub fields: BTreeMap<(u64, u64), FieldTemplate>,
    pub comparison: NodeComparison,
}

impl NodeTemplate {
    /// Nested regions of all nodes but the first, dropped by the fold.
    pub fn discarded_objects(&self) -> Vec<ObjectId> {
        self.fields
            .values()
            .flat_map(|field| match field {
                FieldTemplate::Nested { discarded, .. } => discarded.clone(),
                _ => Vec::new(),
            })
            .collect()
    }
}

/// Value of `[offset, offset + size)`: an exact edge, Zero if nullified, or unknown.
pub(crate) fn field_value(state: &SmgState, object: ObjectId, offset: u64, size: u64) -> Option<ValueId> {
    let smg = state.smg();
    smg.read_value(object, offset, size).or_else(|| {
        smg.is_covered_by_nullified_blocks(object, offset, size)
            .then_some(ValueId::ZERO)
    })
}

fn is_address(state: &SmgState, value: ValueId) -> bool {
    state.smg().points_to(value).is_some_and(|pt| !pt.object.is_null())
}

/// Compares scalar values across nodes.
fn compare_scalars(state: &SmgState, values: &[Option<ValueId>]) -> NodeComparison {
    let first = values[0];
    if values.iter().all(|&v| v == first) {
        return NodeComparison::Equal;
    }
    if values.iter().any(|v| v.is_none()) {
        return NodeComparison::Entailed;
    }
    let explicit: Vec<bool> = values
        .iter()
        .flatten()
        .map(|&v| state.explicit_value(v).is_some())
        .collect();
    if explicit.iter().all(|&e| e) || explicit.iter().all(|&e| !e) {
        NodeComparison::Incomparable
    } else {
        NodeComparison::Entailed
    }
}

/// A region that can be summarized as a nested object of a list node.
fn is_nestable(state: &SmgState, target: ObjectId, node_level: u32) -> bool {
    let smg = state.smg();
    let memory = state.memory();
    let Some(object) = smg.object(target) else {
        return false;
    };
    object.is_region()
        && object.level() == node_level
        && memory.is_heap_object(target)
        && !memory.is_external(target)
        && smg.is_valid(target)
        && smg.incoming_reference_count(target) == 1
        && smg.edges_of(target).iter().all(|e| !is_address(state, e.value))
}

fn fold_nested(state: &SmgState, pointers: &[ValueId], node_levels: &[u32]) -> Option<(FieldTemplate, NodeComparison)> {
    let smg = state.smg();
    let mut targets = Vec::with_capacity(pointers.len());
    for (&pointer, &level) in pointers.iter().zip(node_levels) {
        let pt = smg.points_to(pointer)?;
        if pt.offset != 0 {
            return None;
        }
        let object = smg.object(pt.object)?;
        // Summaries already own their nested region one level down.
        let nestable = if object.level() == level + 1 {
            object.is_region() && smg.incoming_reference_count(pt.object) == 1
        } else {
            is_nestable(state, pt.object, level)
        };
        if !nestable || targets.contains(&pt.object) {
            return None;
        }
        targets.push(pt.object);
    }
    let size = smg.object(targets[0])?.size();
    if targets.iter().any(|&t| smg.object(t).map(|o| o.size()) != Some(size)) {
        return None;
    }

    let keys: BTreeSet<(u64, u64)> = targets
        .iter()
        .flat_map(|&t| smg.edges_of(t))
        .map(|e| (e.offset, e.size))
        .collect();
    let mut comparison = NodeComparison::Equal;
    let mut fresh = BTreeSet::new();
    for (offset, size) in keys {
        let values: Vec<Option<ValueId>> = targets.iter().map(|&t| field_value(state, t, offset, size)).collect();
        let field = compare_scalars(state, &values);
        if field != NodeComparison::Equal {
            fresh.insert((offset, size));
        }
        comparison = comparison.update(field);
    }

    Some((
        FieldTemplate::Nested {
            pointer: pointers[0],
            target: targets[0],
            fresh,
            discarded: targets[1..].to_vec(),
        },
        comparison,
    ))
}

fn fold_field(state: &SmgState, values: &[Option<ValueId>], node_levels: &[u32]) -> Option<(FieldTemplate, NodeComparison)> {
    let first = values[0];
    if values.iter().all(|&v| v == first) {
        return Some(match first {
            Some(value) => (FieldTemplate::Value(value), NodeComparison::Equal),
            None => (FieldTemplate::Fresh, NodeComparison::Equal),
        });
    }
    let addresses = values.iter().filter(|v| v.is_some_and(|v| is_address(state, v))).count();
    if addresses == 0 {
        return Some((FieldTemplate::Fresh, compare_scalars(state, values)));
    }
    if addresses < values.len() {
        return None;
    }
    let pointers: Vec<ValueId> = values.iter().flatten().copied().collect();
    fold_nested(state, &pointers, node_levels)
}

/// Folds the non-link fields of all nodes of `chain`.
///
/// Returns `None` if the nodes cannot be summarized by one template.
pub fn fold_chain(state: &SmgState, chain: &Chain) -> Option<NodeTemplate> {
    let smg = state.smg();
    let pointer_size = state.context().machine().pointer_bits;
    let keys: BTreeSet<(u64, u64)> = chain
        .nodes
        .iter()
        .flat_map(|&n| smg.edges_of(n))
        .filter(|e| !chain.shape.is_link_field(e.offset, e.size, pointer_size))
        .map(|e| (e.offset, e.size))
        .collect();

    let node_levels: Vec<u32> = chain
        .nodes
        .iter()
        .map(|&n| smg.object(n).map_or(0, |o| o.level()))
        .collect();
    // A segment is more general than any region it absorbs.
    let mut comparison = if chain.nodes.iter().any(|&n| smg.object(n).is_some_and(|o| o.is_list_segment())) {
        NodeComparison::Entailed
    } else {
        NodeComparison::Equal
    };

    let mut fields = BTreeMap::new();
    for (offset, size) in keys {
        let values: Vec<Option<ValueId>> = chain
            .nodes
            .iter()
            .map(|&n| field_value(state, n, offset, size))
            .collect();
        let Some((field, field_comparison)) = fold_field(state, &values, &node_levels) else {
            debug!("fold_chain: field [{}, {}) cannot be summarized", offset, offset + size);
            return None;
        };
        comparison = comparison.update(field_comparison);
        fields.insert((offset, size), field);
    }

    Some(NodeTemplate { fields, comparison })
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_comparison_lattice() {
        use NodeComparison::*;
        assert_eq!(Equal.update(Entailed), Entailed);
        assert_eq!(Entailed.update(Equal), Entailed);
        assert_eq!(Entailed.update(Incomparable), Incomparable);
        assert_eq!(Equal.update(Equal), Equal);
    }
}
