//! The transfer relation: successor states of one control-flow edge.

use std::fmt;
use std::sync::Arc;

use log::debug;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::error::{Result, SmgError};
use crate::expr::Expr;
use crate::frame::FunctionDecl;
use crate::machine::CType;
use crate::state::{Access, AddressAndState, SmgState, ValueAndState};
use crate::types::ValueId;
use crate::violation::Violation;

/// The effect of one control-flow edge of the analyzed program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfaEdge {
    /// Declares a variable in the current frame or, if `global`, in the
    /// global namespace. Globals start zeroed; locals are uninitialized.
    Declaration {
        name: Arc<str>,
        ty: CType,
        global: bool,
        initializer: Option<Expr>,
    },
    Assignment {
        lhs: Expr,
        rhs: Expr,
    },
    /// A call of a function without a body: a memory builtin or an unknown
    /// external function.
    Call {
        result: Option<Expr>,
        function: Arc<str>,
        arguments: Vec<Expr>,
    },
    /// Enters a function with a body; arguments are evaluated in the caller.
    FunctionEntry {
        function: FunctionDecl,
        parameters: Vec<(Arc<str>, CType)>,
        arguments: Vec<Expr>,
    },
    /// `return value;` inside the current function.
    Return {
        value: Option<Expr>,
    },
    /// Leaves the current function, storing its result into `result` in the caller.
    FunctionExit {
        result: Option<Expr>,
    },
    Assume {
        condition: Expr,
        truth: bool,
    },
    Skip,
}

impl fmt::Display for CfaEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfaEdge::Declaration { name, ty, .. } => write!(f, "{} {};", ty, name),
            CfaEdge::Assignment { lhs, rhs } => write!(f, "{} = {};", lhs, rhs),
            CfaEdge::Call { function, arguments, .. } => write!(f, "{}({} args);", function, arguments.len()),
            CfaEdge::FunctionEntry { function, .. } => write!(f, "enter {}", function),
            CfaEdge::Return { .. } => write!(f, "return;"),
            CfaEdge::FunctionExit { .. } => write!(f, "exit"),
            CfaEdge::Assume { condition, truth } => write!(f, "[{} == {}]", condition, truth),
            CfaEdge::Skip => write!(f, "skip"),
        }
    }
}

fn byte_size(bytes: &BigInt) -> Option<u64> {
    bytes.to_u64().and_then(|b| b.checked_mul(8))
}

impl SmgState {
    /// All successors of this state along `edge`.
    pub fn successors(&self, edge: &CfaEdge) -> Result<Vec<SmgState>> {
        debug!("successors({}, {})", self.id(), edge);
        match edge {
            CfaEdge::Declaration {
                name,
                ty,
                global,
                initializer,
            } => {
                let size = self.context().machine().size_of(ty);
                let state = if *global {
                    let (state, object) = self.add_global_variable(size, name)?;
                    state.write_value(object, 0, size, ValueId::ZERO)?
                } else {
                    self.add_local_variable(size, name)?.0
                };
                match initializer {
                    Some(init) => {
                        let target = Expr::var(name.clone(), ty.clone());
                        state.assign_expression(&target, init)
                    }
                    None => Ok(vec![state]),
                }
            }
            CfaEdge::Assignment { lhs, rhs } => self.assign_expression(lhs, rhs),
            CfaEdge::Call {
                result,
                function,
                arguments,
            } => self.call_builtin(result.as_ref(), function, arguments),
            CfaEdge::FunctionEntry {
                function,
                parameters,
                arguments,
            } => self.enter_function(function, parameters, arguments),
            CfaEdge::Return { value } => {
                let Some(value) = value else {
                    return Ok(vec![self.successor()]);
                };
                let Some(slot) = self.return_object() else {
                    return Err(SmgError::InvalidExpression(format!("return of {} from void function", value)));
                };
                let size = self.smg().object_checked(slot)?.size();
                let mut successors = Vec::new();
                for ValueAndState { state, value } in self.evaluate_value(value)? {
                    let (state, value) = state.value_or_fresh(value);
                    successors.push(state.write_value(slot, 0, size, value)?);
                }
                Ok(successors)
            }
            CfaEdge::FunctionExit { result } => self.exit_function(result.as_ref()),
            CfaEdge::Assume { condition, truth } => self.evaluate_assumption(condition, *truth),
            CfaEdge::Skip => Ok(vec![self.successor()]),
        }
    }

    fn value_or_fresh(self, value: Option<ValueId>) -> (SmgState, ValueId) {
        match value {
            Some(value) => (self, value),
            None => {
                let mut next = self;
                let value = next.add_fresh_value();
                (next, value)
            }
        }
    }

    /// Writes `value` (unknown if `None`) into every location `lhs` denotes.
    pub fn assign(&self, lhs: &Expr, value: Option<ValueId>) -> Result<Vec<SmgState>> {
        let size = self.context().machine().size_of(&lhs.ty());
        let mut successors = Vec::new();
        for AddressAndState { state, address } in self.evaluate_address(lhs, Access::Write)? {
            match address {
                Some(address) => {
                    let (state, value) = state.value_or_fresh(value);
                    successors.push(state.write_value(address.object, address.offset, size, value)?);
                }
                None => successors.push(state),
            }
        }
        Ok(successors)
    }

    fn assign_expression(&self, lhs: &Expr, rhs: &Expr) -> Result<Vec<SmgState>> {
        let mut successors = Vec::new();
        for ValueAndState { state, value } in self.evaluate_value(rhs)? {
            successors.extend(state.assign(lhs, value)?);
        }
        Ok(successors)
    }

    fn assign_result(state: SmgState, result: Option<&Expr>, value: Option<ValueId>) -> Result<Vec<SmgState>> {
        match result {
            Some(lhs) => state.assign(lhs, value),
            None => Ok(vec![state]),
        }
    }

    /// Evaluates a size argument in bytes; unknown sizes fall back to the guess.
    fn allocation_size(&self, argument: Option<&Expr>) -> Result<Vec<(SmgState, u64)>> {
        let guessed = self.context().options().guessed_allocation_size;
        let Some(argument) = argument else {
            return Ok(vec![(self.successor(), guessed)]);
        };
        Ok(self
            .evaluate_explicit_value(argument)?
            .into_iter()
            .map(|(state, number)| {
                let size = number.as_ref().and_then(byte_size).unwrap_or(guessed);
                (state, size)
            })
            .collect())
    }

    fn call_builtin(&self, result: Option<&Expr>, function: &str, arguments: &[Expr]) -> Result<Vec<SmgState>> {
        let mut successors = Vec::new();
        match function {
            "malloc" => {
                for (state, size) in self.allocation_size(arguments.first())? {
                    for allocated in state.allocate_heap(size, "malloc")? {
                        successors.extend(Self::assign_result(allocated.state, result, allocated.value)?);
                    }
                }
            }
            "calloc" => {
                let guessed = self.context().options().guessed_allocation_size;
                let (Some(count), Some(element)) = (arguments.first(), arguments.get(1)) else {
                    return Err(SmgError::InvalidExpression("calloc() needs two arguments".to_string()));
                };
                for (state, count) in self.evaluate_explicit_value(count)? {
                    for (state, element) in state.evaluate_explicit_value(element)? {
                        let size = match (&count, element) {
                            (Some(count), Some(element)) => byte_size(&(count * element)),
                            _ => None,
                        }
                        .unwrap_or(guessed);
                        for allocated in state.allocate_heap(size, "calloc")? {
                            let target = allocated
                                .value
                                .and_then(|pointer| allocated.state.smg().points_to(pointer))
                                .map(|pt| pt.object)
                                .filter(|object| !object.is_null());
                            let state = match target {
                                Some(object) if size > 0 => allocated.state.write_value(object, 0, size, ValueId::ZERO)?,
                                _ => allocated.state,
                            };
                            successors.extend(Self::assign_result(state, result, allocated.value)?);
                        }
                    }
                }
            }
            "alloca" | "__builtin_alloca" => {
                for (state, size) in self.allocation_size(arguments.first())? {
                    let allocated = state.allocate_stack(size, "alloca")?;
                    successors.extend(Self::assign_result(allocated.state, result, allocated.value)?);
                }
            }
            "free" => {
                let argument = arguments
                    .first()
                    .ok_or_else(|| SmgError::InvalidExpression("free() without argument".to_string()))?;
                for ValueAndState { state, value } in self.evaluate_value(argument)? {
                    successors.extend(state.free_value(value)?);
                }
            }
            "realloc" => return Err(SmgError::Unsupported("realloc".to_string())),
            _ => {
                debug!("call of unknown function {}: result is unknown", function);
                let mut state = self.successor();
                for argument in arguments {
                    // Evaluated for their memory-safety effects only.
                    let evaluated = state.evaluate_value(argument)?;
                    state = match evaluated.into_iter().next() {
                        Some(evaluated) => evaluated.state,
                        None => state,
                    };
                }
                successors.extend(Self::assign_result(state, result, None)?);
            }
        }
        Ok(successors)
    }

    /// Frees the memory `pointer` refers to.
    fn free_value(&self, pointer: Option<ValueId>) -> Result<Vec<SmgState>> {
        let Some(pointer) = pointer else {
            debug!("free of unknown value ignored");
            return Ok(vec![self.successor()]);
        };
        if self.smg().points_to(pointer).is_none() {
            return Ok(match self.explicit_value(pointer) {
                Some(number) if !number.is_zero() => {
                    let description = format!("free of non-pointer value {}", number);
                    vec![self
                        .successor()
                        .record_violation(Violation::InvalidFree, description, Some(pointer.into()))]
                }
                _ => vec![self.successor()],
            });
        }
        let mut successors = Vec::new();
        for AddressAndState { state, address } in self.get_pointer_targets(pointer)? {
            match address {
                Some(address) => successors.push(state.free(address.object, address.offset)?),
                None => successors.push(state),
            }
        }
        Ok(successors)
    }

    fn enter_function(
        &self,
        function: &FunctionDecl,
        parameters: &[(Arc<str>, CType)],
        arguments: &[Expr],
    ) -> Result<Vec<SmgState>> {
        if parameters.len() != arguments.len() {
            return Err(SmgError::InvalidExpression(format!(
                "{} takes {} arguments, {} given",
                function,
                parameters.len(),
                arguments.len()
            )));
        }
        // Arguments are evaluated in the caller's frame.
        let mut evaluated: Vec<(SmgState, Vec<Option<ValueId>>)> = vec![(self.successor(), Vec::new())];
        for argument in arguments {
            let mut extended = Vec::new();
            for (state, values) in evaluated {
                for ValueAndState { state, value } in state.evaluate_value(argument)? {
                    let mut values = values.clone();
                    values.push(value);
                    extended.push((state, values));
                }
            }
            evaluated = extended;
        }

        let mut successors = Vec::new();
        for (state, values) in evaluated {
            let mut state = state.add_stack_frame(function.clone())?;
            for ((name, ty), value) in parameters.iter().zip(values) {
                let size = state.context().machine().size_of(ty);
                let (next, object) = state.add_local_variable(size, name)?;
                let (next, value) = next.value_or_fresh(value);
                state = next.write_value(object, 0, size, value)?;
            }
            successors.push(state);
        }
        Ok(successors)
    }

    fn exit_function(&self, result: Option<&Expr>) -> Result<Vec<SmgState>> {
        let returned = match self.return_object() {
            Some(slot) => {
                let size = self.smg().object_checked(slot)?.size();
                self.read_value(slot, 0, size)?
            }
            None => ValueAndState {
                state: self.successor(),
                value: None,
            },
        };
        let state = returned.state.drop_stack_frame()?;
        let mut successors = Vec::new();
        for state in Self::assign_result(state, result, returned.value)? {
            successors.push(state.prune_unreachable()?);
        }
        Ok(successors)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::context::AnalysisContext;
    use crate::options::SmgOptions;

    fn main_state() -> SmgState {
        let options = SmgOptions {
            check_consistency: true,
            ..SmgOptions::default()
        };
        SmgState::initial(AnalysisContext::with_options(options))
            .add_stack_frame(FunctionDecl::new("main", Some(32)))
            .unwrap()
    }

    fn run(state: SmgState, edges: &[CfaEdge]) -> Vec<SmgState> {
        let mut states = vec![state];
        for edge in edges {
            states = states.iter().flat_map(|s| s.successors(edge).unwrap()).collect();
        }
        states
    }

    fn declare(name: &str, ty: CType) -> CfaEdge {
        CfaEdge::Declaration {
            name: name.into(),
            ty,
            global: false,
            initializer: None,
        }
    }

    fn call(result: Option<Expr>, function: &str, arguments: Vec<Expr>) -> CfaEdge {
        CfaEdge::Call {
            result,
            function: function.into(),
            arguments,
        }
    }

    #[test]
    fn test_global_is_zeroed() {
        let edge = CfaEdge::Declaration {
            name: "g".into(),
            ty: CType::Int,
            global: true,
            initializer: None,
        };
        let states = run(main_state(), &[edge]);
        let values = states[0].evaluate_explicit_value(&Expr::var("g", CType::Int)).unwrap();
        assert_eq!(values[0].1, Some(BigInt::zero()));
    }

    #[test]
    fn test_malloc_then_free_twice() {
        let p = Expr::var("p", CType::Pointer);
        let states = run(
            main_state(),
            &[
                declare("p", CType::Pointer),
                call(Some(p.clone()), "malloc", vec![Expr::int(16, CType::Long)]),
                call(None, "free", vec![p.clone()]),
            ],
        );
        assert_eq!(states.len(), 1);
        assert!(!states[0].has_memory_errors());
        let states = run(states[0].clone(), &[call(None, "free", vec![p])]);
        assert!(states[0].errors().is_invalid_free());
    }

    #[test]
    fn test_calloc_zeroes() {
        let p = Expr::var("p", CType::Pointer);
        let states = run(
            main_state(),
            &[
                declare("p", CType::Pointer),
                call(
                    Some(p.clone()),
                    "calloc",
                    vec![Expr::int(2, CType::Long), Expr::int(4, CType::Long)],
                ),
            ],
        );
        let second = p.arrow(32, CType::Int);
        let values = states[0].evaluate_explicit_value(&second).unwrap();
        assert_eq!(values[0].1, Some(BigInt::zero()));
    }

    #[test]
    fn test_realloc_is_unsupported() {
        let state = main_state();
        let edge = call(None, "realloc", vec![Expr::null(), Expr::int(8, CType::Long)]);
        assert!(matches!(state.successors(&edge), Err(SmgError::Unsupported(_))));
    }

    #[test]
    fn test_leak_on_function_exit() {
        let p = Expr::var("p", CType::Pointer);
        let entry = CfaEdge::FunctionEntry {
            function: FunctionDecl::void("f"),
            parameters: vec![],
            arguments: vec![],
        };
        let states = run(
            main_state(),
            &[
                entry,
                declare("p", CType::Pointer),
                call(Some(p), "malloc", vec![Expr::int(8, CType::Long)]),
                CfaEdge::FunctionExit { result: None },
            ],
        );
        assert_eq!(states.len(), 1);
        assert!(states[0].has_memory_leaks());
        assert_eq!(states[0].memory().stack_depth(), 1);
    }

    #[test]
    fn test_returned_pointer_survives_exit() {
        let q = Expr::var("q", CType::Pointer);
        let p = Expr::var("p", CType::Pointer);
        let states = run(
            main_state(),
            &[
                declare("q", CType::Pointer),
                CfaEdge::FunctionEntry {
                    function: FunctionDecl::new("make", Some(64)),
                    parameters: vec![("n".into(), CType::Int)],
                    arguments: vec![Expr::int(3, CType::Int)],
                },
                declare("p", CType::Pointer),
                call(Some(p.clone()), "malloc", vec![Expr::int(8, CType::Long)]),
                CfaEdge::Return { value: Some(p) },
                CfaEdge::FunctionExit { result: Some(q) },
            ],
        );
        assert_eq!(states.len(), 1);
        assert!(!states[0].has_memory_leaks());
        assert_eq!(states[0].memory().heap_objects().filter(|o| !o.is_null()).count(), 1);
    }

    #[test]
    fn test_assume_splits_on_unknown() {
        let x = Expr::var("x", CType::Int);
        let states = run(main_state(), &[declare("x", CType::Int)]);
        let is_zero = x.equals(Expr::int(0, CType::Int));
        let then = states[0]
            .successors(&CfaEdge::Assume {
                condition: is_zero.clone(),
                truth: true,
            })
            .unwrap();
        let otherwise = states[0]
            .successors(&CfaEdge::Assume {
                condition: is_zero,
                truth: false,
            })
            .unwrap();
        assert_eq!((then.len(), otherwise.len()), (1, 1));
    }
}
