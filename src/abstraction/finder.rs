//! Detection of linked chains of heap nodes.
//!
//! A chain is a sequence of nodes where each node's "next" field (at `nfo`)
//! holds a pointer to the head (`hfo`) of the following node. A chain is
//! doubly linked when each following node also holds a pointer back to its
//! predecessor at `pfo`.
//!
//! Only the first node of a chain may be referenced from outside the chain;
//! in a doubly-linked chain the last node may additionally be referenced by
//! the "previous" field of its successor.

use log::debug;

use crate::error::Result;
use crate::object::{ObjectKind, SmgObject};
use crate::state::SmgState;
use crate::types::{ObjectId, TargetSpecifier, ValueId};

/// Link offsets of a list, in bits.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ListShape {
    pub hfo: u64,
    pub nfo: u64,
    pub pfo: Option<u64>,
}

impl ListShape {
    pub fn is_link_field(&self, offset: u64, size: u64, pointer_size: u64) -> bool {
        size == pointer_size && (offset == self.nfo || Some(offset) == self.pfo)
    }

    fn admits(&self, object: &SmgObject) -> bool {
        match object.kind() {
            ObjectKind::Region => true,
            ObjectKind::Sll { hfo, nfo, .. } => self.pfo.is_none() && hfo == self.hfo && nfo == self.nfo,
            ObjectKind::Dll { hfo, nfo, pfo, .. } => {
                self.pfo == Some(pfo) && hfo == self.hfo && nfo == self.nfo
            }
            ObjectKind::Null | ObjectKind::Optional => false,
        }
    }
}

/// A maximal run of linked nodes starting at a given node.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Chain {
    pub shape: ListShape,
    pub nodes: Vec<ObjectId>,
}

impl Chain {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn first(&self) -> ObjectId {
        self.nodes[0]
    }

    pub fn last(&self) -> ObjectId {
        self.nodes[self.nodes.len() - 1]
    }
}

/// The value stored in the pointer-sized field at `offset` of `object`.
pub(crate) fn link_value(state: &SmgState, object: ObjectId, offset: u64) -> Option<ValueId> {
    let size = state.context().machine().pointer_bits;
    state.smg().read_value(object, offset, size)
}

/// The node the field at `offset` of `object` points to, with the target offset.
fn follow(state: &SmgState, object: ObjectId, offset: u64) -> Option<(ObjectId, u64, TargetSpecifier)> {
    let value = link_value(state, object, offset)?;
    let pt = state.smg().points_to(value)?;
    if pt.object.is_null() {
        return None;
    }
    Some((pt.object, pt.offset, pt.specifier))
}

/// Checks whether `object` may become part of a list with the given node layout.
fn is_list_node(state: &SmgState, object: ObjectId, size: u64, level: u32) -> bool {
    let memory = state.memory();
    let Some(node) = state.smg().object(object) else {
        return false;
    };
    !object.is_null()
        && memory.is_heap_object(object)
        && !memory.is_external(object)
        && state.smg().is_valid(object)
        && node.size() == size
        && node.level() == level
        && matches!(
            node.kind(),
            ObjectKind::Region | ObjectKind::Sll { .. } | ObjectKind::Dll { .. }
        )
}

/// Checks whether all references into `node` come from the list itself:
/// the "next" field of `previous` and, for doubly-linked lists, the
/// "previous" field of the node following `node`.
fn only_list_references(state: &SmgState, node: ObjectId, previous: ObjectId, shape: &ListShape) -> bool {
    let smg = state.smg();
    let successor = follow(state, node, shape.nfo).map(|(o, _, _)| o);
    smg.pointers_to(node).iter().all(|pt| {
        smg.edges_with_value(pt.value).iter().all(|edge| {
            (edge.object == previous && edge.offset == shape.nfo)
                || (shape.pfo == Some(edge.offset) && Some(edge.object) == successor)
        })
    })
}

/// Checks that the "previous" field of `node` points back to `previous`.
fn links_back(state: &SmgState, node: ObjectId, previous: ObjectId, shape: &ListShape) -> bool {
    let Some(pfo) = shape.pfo else {
        return true;
    };
    matches!(
        follow(state, node, pfo),
        Some((o, offset, TargetSpecifier::Region | TargetSpecifier::Last)) if o == previous && offset == shape.hfo
    )
}

/// Finds the "previous" field of a doubly-linked pair `first -> second`.
fn detect_pfo(state: &SmgState, first: ObjectId, second: ObjectId, hfo: u64, nfo: u64) -> Option<u64> {
    let pointer_size = state.context().machine().pointer_bits;
    state
        .smg()
        .edges_of(second)
        .into_iter()
        .filter(|e| e.size == pointer_size && e.offset != nfo)
        .find(|e| {
            state.smg().points_to(e.value).is_some_and(|pt| {
                pt.object == first
                    && pt.offset == hfo
                    && matches!(pt.specifier, TargetSpecifier::Region | TargetSpecifier::Last)
            })
        })
        .map(|e| e.offset)
}

/// Walks the chain starting at `start` through the field at `nfo`.
pub fn chain_from(state: &SmgState, start: ObjectId, nfo: u64) -> Option<Chain> {
    let smg = state.smg();
    let first = smg.object(start)?;
    if !is_list_node(state, start, first.size(), first.level()) {
        return None;
    }
    let (second, hfo, specifier) = follow(state, start, nfo)?;
    if !matches!(specifier, TargetSpecifier::Region | TargetSpecifier::First) {
        return None;
    }
    let pfo = match (first.pfo(), smg.object(second).and_then(|o| o.pfo())) {
        (Some(pfo), _) | (None, Some(pfo)) => Some(pfo),
        (None, None) => detect_pfo(state, start, second, hfo, nfo),
    };
    let shape = ListShape { hfo, nfo, pfo };
    if !shape.admits(first) {
        return None;
    }

    let mut nodes = vec![start];
    let mut current = start;
    while let Some((next, offset, specifier)) = follow(state, current, nfo) {
        if nodes.contains(&next) || offset != hfo {
            break;
        }
        if !matches!(specifier, TargetSpecifier::Region | TargetSpecifier::First) {
            break;
        }
        if !is_list_node(state, next, first.size(), first.level()) {
            break;
        }
        let Some(node) = smg.object(next) else {
            break;
        };
        if !shape.admits(node) || !links_back(state, next, current, &shape) {
            break;
        }
        if !only_list_references(state, next, current, &shape) {
            break;
        }
        nodes.push(next);
        current = next;
    }

    if nodes.len() < 2 {
        return None;
    }
    Some(Chain { shape, nodes })
}

/// All chains of at least two nodes, one per start node and "next" field.
pub fn find_chains(state: &SmgState) -> Result<Vec<Chain>> {
    let pointer_size = state.context().machine().pointer_bits;
    let mut chains = Vec::new();
    for start in state.memory().heap_objects() {
        state.context().check_shutdown()?;
        let Some(object) = state.smg().object(start) else {
            continue;
        };
        let candidates: Vec<u64> = match object.nfo() {
            Some(nfo) => vec![nfo],
            None => state
                .smg()
                .edges_of(start)
                .into_iter()
                .filter(|e| e.size == pointer_size)
                .map(|e| e.offset)
                .collect(),
        };
        for nfo in candidates {
            if let Some(chain) = chain_from(state, start, nfo) {
                debug!("find_chains: {} nodes from {} via {}", chain.len(), start, nfo);
                chains.push(chain);
            }
        }
    }
    Ok(chains)
}
