//! Consistency verifier for memory graphs.
//!
//! Graph mutation primitives do not keep the graph consistent on their own.
//! The state layer runs [`verify`] after each mutating operation when
//! [`SmgOptions::check_consistency`][crate::options::SmgOptions::check_consistency]
//! is set; a failure is a modeling fault, reported as
//! [`SmgError::InconsistentGraph`].

use log::debug;

use crate::error::{Result, SmgError};
use crate::explicit::ExplicitValues;
use crate::graph::Smg;
use crate::memory::LanguageMemory;
use crate::types::{ObjectId, TargetSpecifier, ValueId};

fn fail(message: String) -> Result<()> {
    debug!("consistency check failed: {}", message);
    Err(SmgError::InconsistentGraph(message))
}

/// Verifies all invariants of the memory graph and of the language layer.
pub fn verify(memory: &LanguageMemory, explicit: &ExplicitValues) -> Result<()> {
    let smg = memory.smg();
    verify_null(smg)?;
    verify_has_value_edges(smg)?;
    verify_points_to_edges(smg)?;
    verify_disequalities(smg)?;
    verify_explicit_values(smg, explicit)?;
    verify_classification(memory)?;
    Ok(())
}

fn verify_null(smg: &Smg) -> Result<()> {
    let Some(null) = smg.object(ObjectId::NULL) else {
        return fail("the Null object is missing".to_string());
    };
    if !null.is_null() || null.size() != 0 {
        return fail(format!("object #0 is not the Null object: {}", null));
    }
    if smg.is_valid(ObjectId::NULL) {
        return fail("the Null object is valid".to_string());
    }
    if !smg.edges_of(ObjectId::NULL).is_empty() {
        return fail("the Null object has has-value edges".to_string());
    }
    if let Some(other) = smg.objects().find(|o| o.is_null() && !o.id().is_null()) {
        return fail(format!("second Null object {}", other));
    }
    if !smg.contains_value(ValueId::ZERO) {
        return fail("the Zero value is missing".to_string());
    }
    match smg.points_to(ValueId::ZERO) {
        Some(pt) if pt.object.is_null() && pt.offset == 0 => Ok(()),
        _ => fail("the Zero value does not point to the Null object".to_string()),
    }
}

fn verify_has_value_edges(smg: &Smg) -> Result<()> {
    for object in smg.objects() {
        let edges = smg.edges_of(object.id());
        if !edges.is_empty() && !smg.is_valid(object.id()) && object.is_region() {
            return fail(format!("invalid region {} has has-value edges", object));
        }
        for edge in &edges {
            if !smg.contains_value(edge.value) {
                return fail(format!("edge {} holds an unknown value", edge));
            }
            if edge.end() > object.size() {
                return fail(format!("edge {} exceeds the bounds of {}", edge, object));
            }
        }
        let non_zero: Vec<_> = edges.iter().filter(|e| !e.is_zero()).collect();
        for (i, a) in non_zero.iter().enumerate() {
            for b in &non_zero[i + 1..] {
                if a.overlaps(b.offset, b.size) {
                    return fail(format!("overlapping edges {} and {}", a, b));
                }
            }
        }
    }
    for edge in smg.all_has_value_edges() {
        if !smg.contains_object(edge.object) {
            return fail(format!("edge {} leaves an unknown object", edge));
        }
    }
    Ok(())
}

fn verify_points_to_edges(smg: &Smg) -> Result<()> {
    for pt in smg.points_to_edges() {
        if !smg.contains_value(pt.value) {
            return fail(format!("points-to edge {} of an unknown value", pt));
        }
        let Some(target) = smg.object(pt.object) else {
            return fail(format!("points-to edge {} targets an unknown object", pt));
        };
        let list_specifier = matches!(pt.specifier, TargetSpecifier::First | TargetSpecifier::Last);
        if list_specifier && !target.is_list_segment() {
            return fail(format!("points-to edge {} uses a list specifier on {}", pt, target));
        }
    }
    Ok(())
}

fn verify_disequalities(smg: &Smg) -> Result<()> {
    for (a, b) in smg.neq_pairs() {
        if !smg.contains_value(a) || !smg.contains_value(b) {
            return fail(format!("disequality {} != {} mentions an unknown value", a, b));
        }
    }
    Ok(())
}

fn verify_explicit_values(smg: &Smg, explicit: &ExplicitValues) -> Result<()> {
    for (value, number) in explicit.iter() {
        if !smg.contains_value(value) {
            return fail(format!("explicit value {} = {} is not in the graph", value, number));
        }
    }
    Ok(())
}

fn verify_classification(memory: &LanguageMemory) -> Result<()> {
    let smg = memory.smg();
    for root in memory.root_objects() {
        if !smg.contains_object(root) {
            return fail(format!("variable object {} is missing", root));
        }
        if memory.is_heap_object(root) {
            return fail(format!("variable object {} is also a heap object", root));
        }
    }
    for object in memory.heap_objects() {
        if !smg.contains_object(object) {
            return fail(format!("heap object {} is missing", object));
        }
    }
    for object in memory.external_objects() {
        if !memory.is_heap_object(object) {
            return fail(format!("external object {} is not a heap object", object));
        }
    }
    for object in smg.object_ids() {
        if !memory.is_heap_object(object) && !memory.is_root_object(object) {
            return fail(format!("object {} is neither heap nor variable memory", object));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::edge::HasValueEdge;
    use crate::frame::FunctionDecl;
    use crate::object::SmgObject;

    fn memory_with_variable() -> (LanguageMemory, ObjectId) {
        let mut memory = LanguageMemory::new();
        memory.add_stack_frame(FunctionDecl::void("main"), None);
        let x = ObjectId::new(1);
        memory.add_stack_object(SmgObject::region(x, 64, "x")).unwrap();
        (memory, x)
    }

    #[test]
    fn test_fresh_memory_is_consistent() {
        assert!(verify(&LanguageMemory::new(), &ExplicitValues::new()).is_ok());
        let (memory, _) = memory_with_variable();
        assert!(verify(&memory, &ExplicitValues::new()).is_ok());
    }

    #[test]
    fn test_overlapping_edges_detected() {
        let (mut memory, x) = memory_with_variable();
        let (a, b) = (ValueId::new(1), ValueId::new(2));
        memory.smg_mut().add_value(a);
        memory.smg_mut().add_value(b);
        memory.smg_mut().add_has_value_edge(HasValueEdge::new(x, 0, 32, a));
        memory.smg_mut().add_has_value_edge(HasValueEdge::new(x, 16, 32, b));
        assert!(matches!(
            verify(&memory, &ExplicitValues::new()),
            Err(SmgError::InconsistentGraph(_))
        ));
    }

    #[test]
    fn test_out_of_bounds_edge_detected() {
        let (mut memory, x) = memory_with_variable();
        memory
            .smg_mut()
            .add_has_value_edge(HasValueEdge::new(x, 32, 64, ValueId::ZERO));
        assert!(verify(&memory, &ExplicitValues::new()).is_err());
    }

    #[test]
    fn test_unclassified_object_detected() {
        let (mut memory, _) = memory_with_variable();
        memory
            .smg_mut()
            .add_object(SmgObject::region(ObjectId::new(7), 8, "stray"));
        assert!(verify(&memory, &ExplicitValues::new()).is_err());
    }
}
