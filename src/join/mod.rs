//! Joining and comparing states at control-flow confluence points.

pub mod mapping;
pub mod status;
pub mod subsumption;
pub mod values;

use log::debug;

use crate::error::Result;
use crate::join::status::JoinStatus;
use crate::join::values::Joiner;
use crate::state::SmgState;

/// A defined join of two states.
#[derive(Debug, Clone)]
pub struct JoinResult {
    /// How the left input relates to the right one.
    pub status: JoinStatus,
    /// A state covering both inputs.
    pub state: SmgState,
}

impl SmgState {
    /// Joins two states into one covering both.
    ///
    /// Returns `None` if the shapes cannot be reconciled, e.g. because the
    /// call stacks differ or a pointer faces an unrelated value.
    ///
    /// # Examples
    ///
    /// ```
    /// use smg_rs::context::AnalysisContext;
    /// use smg_rs::frame::FunctionDecl;
    /// use smg_rs::join::status::JoinStatus;
    /// use smg_rs::options::SmgOptions;
    /// use smg_rs::state::SmgState;
    ///
    /// let ctx = AnalysisContext::with_options(SmgOptions::default());
    /// let state = SmgState::initial(ctx).add_stack_frame(FunctionDecl::void("main")).unwrap();
    /// let (state, _) = state.add_local_variable(32, "x").unwrap();
    ///
    /// let joined = state.join(&state).unwrap().unwrap();
    /// assert_eq!(joined.status, JoinStatus::Equal);
    /// ```
    pub fn join(&self, other: &SmgState) -> Result<Option<JoinResult>> {
        debug!("join({}, {})", self.id(), other.id());
        let Some(graph) = Joiner::new(self, other).run()? else {
            return Ok(None);
        };
        let errors = self.errors().merge(other.errors());
        let state = SmgState::from_parts(self.context().clone(), graph.memory, graph.explicit, errors).finish()?;
        debug!("join({}, {}) = {} with status {}", self.id(), other.id(), state.id(), graph.status);
        Ok(Some(JoinResult {
            status: graph.status,
            state,
        }))
    }

    /// Merges this state into an already reached one.
    ///
    /// The reached state is returned unchanged if it already covers this one,
    /// if the join is undefined, or if the violation flags differ.
    pub fn merge(&self, reached: &SmgState) -> Result<SmgState> {
        let same_errors = self.has_memory_errors() == reached.has_memory_errors()
            && self.has_memory_leaks() == reached.has_memory_leaks();
        if !same_errors {
            return Ok(reached.clone());
        }
        match self.join(reached)? {
            Some(JoinResult { status, state }) if !status.left_covered() => Ok(state),
            _ => Ok(reached.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;
    use test_log::test;

    use super::*;
    use crate::context::AnalysisContext;
    use crate::frame::FunctionDecl;
    use crate::options::SmgOptions;
    use crate::types::ObjectId;

    fn with_variable() -> (SmgState, ObjectId) {
        let options = SmgOptions {
            check_consistency: true,
            ..SmgOptions::default()
        };
        let state = SmgState::initial(AnalysisContext::with_options(options))
            .add_stack_frame(FunctionDecl::void("main"))
            .unwrap();
        state.add_local_variable(32, "x").unwrap()
    }

    fn assign(state: &SmgState, x: ObjectId, n: i64) -> SmgState {
        let number = state.value_for_number(BigInt::from(n));
        number.state.write_value(x, 0, 32, number.value.unwrap()).unwrap()
    }

    #[test]
    fn test_join_equal_constants() {
        let (state, x) = with_variable();
        let a = assign(&state, x, 7);
        let b = assign(&state, x, 7);
        let joined = a.join(&b).unwrap().unwrap();
        assert_eq!(joined.status, JoinStatus::Equal);
        let x = joined.state.variable_object("x").unwrap();
        let value = joined.state.read_value(x, 0, 32).unwrap().value.unwrap();
        assert_eq!(joined.state.explicit_value(value), Some(&BigInt::from(7)));
    }

    #[test]
    fn test_join_different_constants() {
        let (state, x) = with_variable();
        let a = assign(&state, x, 1);
        let b = assign(&state, x, 2);
        let joined = a.join(&b).unwrap().unwrap();
        assert_eq!(joined.status, JoinStatus::Incomparable);
        let x = joined.state.variable_object("x").unwrap();
        let value = joined.state.read_value(x, 0, 32).unwrap().value.unwrap();
        assert_eq!(joined.state.explicit_value(value), None);
    }

    #[test]
    fn test_join_known_with_unknown() {
        let (state, x) = with_variable();
        let a = assign(&state, x, 1);
        assert_eq!(a.join(&state).unwrap().unwrap().status, JoinStatus::LeftEntails);
        assert_eq!(state.join(&a).unwrap().unwrap().status, JoinStatus::RightEntails);
    }

    #[test]
    fn test_join_requires_same_stack() {
        let (state, _) = with_variable();
        let deeper = state.add_stack_frame(FunctionDecl::void("f")).unwrap();
        assert!(state.join(&deeper).unwrap().is_none());
        let (other, _) = state.add_local_variable(32, "y").unwrap();
        assert!(state.join(&other).unwrap().is_none());
    }

    #[test]
    fn test_merge_keeps_reached_when_covered() {
        let (state, x) = with_variable();
        let a = assign(&state, x, 1);
        let reached = state.clone();
        let merged = a.merge(&reached).unwrap();
        assert_eq!(merged.id(), reached.id());
    }

    #[test]
    fn test_merge_generalizes() {
        let (state, x) = with_variable();
        let a = assign(&state, x, 1);
        let b = assign(&state, x, 2);
        let merged = a.merge(&b).unwrap();
        assert_ne!(merged.id(), b.id());
        assert!(b.is_less_or_equal(&merged).unwrap());
        assert!(a.is_less_or_equal(&merged).unwrap());
    }
}
