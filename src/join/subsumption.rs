//! The coverage check used to stop exploring already reached states.

use log::debug;

use crate::error::Result;
use crate::state::SmgState;
use crate::types::ObjectId;

impl SmgState {
    /// Checks whether every concrete memory described by this state is also
    /// described by `reached`.
    ///
    /// With heap abstraction the check is a join whose status places this
    /// state below `reached`; both states must also agree on whether pruning
    /// finds a leak. Without abstraction the graph of `reached` must embed
    /// into this one element by element.
    pub fn is_less_or_equal(&self, reached: &SmgState) -> Result<bool> {
        let (mine, theirs) = (self.errors(), reached.errors());
        let flags_covered = (!mine.is_invalid_read() || theirs.is_invalid_read())
            && (!mine.is_invalid_write() || theirs.is_invalid_write())
            && (!mine.is_invalid_free() || theirs.is_invalid_free())
            && (!mine.has_leak() || theirs.has_leak());
        if !flags_covered {
            return Ok(false);
        }

        if !self.context().options().heap_abstraction {
            return self.embeds(reached);
        }

        let Some(result) = self.join(reached)? else {
            return Ok(false);
        };
        if !result.status.left_covered() {
            debug!("{} not covered by {}: {}", self.id(), reached.id(), result.status);
            return Ok(false);
        }
        Ok(self.leaks_on_prune()? == reached.leaks_on_prune()?)
    }

    fn leaks_on_prune(&self) -> Result<bool> {
        let mut memory = self.memory().clone();
        let outcome = memory.prune(self.context().shutdown())?;
        Ok(!outcome.leaked.is_empty())
    }

    /// Checks that every element of `reached` occurs identically in this state.
    fn embeds(&self, reached: &SmgState) -> Result<bool> {
        let (mine, theirs) = (self.memory(), reached.memory());
        if mine.stack_depth() != theirs.stack_depth() {
            return Ok(false);
        }
        for (m, t) in mine.frames().zip(theirs.frames()) {
            if m.function().name != t.function().name || m.return_object() != t.return_object() {
                return Ok(false);
            }
            if t.variables().any(|(name, object)| m.variable(name) != Some(object)) {
                return Ok(false);
            }
        }
        if theirs.globals().any(|(name, object)| mine.global(name) != Some(object)) {
            return Ok(false);
        }

        let (smg, other) = (self.smg(), reached.smg());
        for object in other.objects() {
            self.context().check_shutdown()?;
            let id: ObjectId = object.id();
            if smg.object(id) != Some(object) || smg.is_valid(id) != other.is_valid(id) {
                return Ok(false);
            }
            for edge in other.edges_of(id) {
                let present = smg.read_value(id, edge.offset, edge.size) == Some(edge.value)
                    || (edge.is_zero() && smg.is_covered_by_nullified_blocks(id, edge.offset, edge.size));
                if !present {
                    return Ok(false);
                }
            }
        }
        for pt in other.points_to_edges() {
            if smg.points_to(pt.value) != Some(pt) {
                return Ok(false);
            }
        }
        for (value, number) in reached.explicit_values().iter() {
            if self.explicit_value(value) != Some(number) {
                return Ok(false);
            }
        }
        Ok(other
            .neq_pairs()
            .into_iter()
            .all(|(a, b)| self.are_non_equal(a, b)))
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;
    use test_log::test;

    use crate::context::AnalysisContext;
    use crate::frame::FunctionDecl;
    use crate::options::SmgOptions;
    use crate::state::SmgState;

    fn main_state(heap_abstraction: bool) -> SmgState {
        let options = SmgOptions {
            heap_abstraction,
            check_consistency: true,
            ..SmgOptions::default()
        };
        SmgState::initial(AnalysisContext::with_options(options))
            .add_stack_frame(FunctionDecl::void("main"))
            .unwrap()
    }

    #[test]
    fn test_more_specific_is_covered() {
        for abstraction in [true, false] {
            let (state, x) = main_state(abstraction).add_local_variable(32, "x").unwrap();
            let n = state.value_for_number(BigInt::from(3));
            let assigned = n.state.write_value(x, 0, 32, n.value.unwrap()).unwrap();
            assert!(assigned.is_less_or_equal(&state).unwrap());
            assert!(!state.is_less_or_equal(&assigned).unwrap());
            assert!(state.is_less_or_equal(&state).unwrap());
        }
    }

    #[test]
    fn test_errors_must_be_covered() {
        let (state, _) = main_state(true).add_local_variable(32, "x").unwrap();
        let allocated = state.allocate_heap(64, "node").unwrap().remove(0);
        let object = allocated.state.smg().points_to(allocated.value.unwrap()).unwrap().object;
        let freed = allocated.state.free(object, 0).unwrap();
        let double = freed.free(object, 0).unwrap();
        assert!(double.has_memory_errors());
        assert!(!double.is_less_or_equal(&freed).unwrap());
    }
}
