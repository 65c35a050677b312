//! Evaluation of expressions against a state.
//!
//! Every evaluation may split the state (dereferencing a list segment yields
//! one successor per materialization), so all entry points return a list of
//! `(state, result)` pairs.

use log::debug;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::abstraction::materialize::materialize;
use crate::error::{Result, SmgError};
use crate::explicit::wrap_signed;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::machine::CType;
use crate::state::{Access, AddressAndState, SmgState, ValueAndState};
use crate::types::{Address, ValueId};

impl SmgState {
    fn size_of(&self, ty: &CType) -> u64 {
        self.context().machine().size_of(ty)
    }

    /// The memory locations an lvalue denotes.
    ///
    /// An address of `None` means the location is unknown; the
    /// unknown-dereference policy for `access` has already been applied.
    pub fn evaluate_address(&self, expr: &Expr, access: Access) -> Result<Vec<AddressAndState>> {
        match expr {
            Expr::Variable { name, .. } => {
                let object = self
                    .variable_object(name)
                    .ok_or_else(|| SmgError::UnknownVariable(name.to_string()))?;
                Ok(vec![AddressAndState {
                    state: self.successor(),
                    address: Some(Address::new(object, 0)),
                }])
            }
            Expr::Deref { pointer, .. } => {
                let mut addresses = Vec::new();
                for ValueAndState { state, value } in self.evaluate_value(pointer)? {
                    let (state, pointer) = match value {
                        Some(value) => (state, value),
                        None => {
                            let fresh = state.fresh_value();
                            let value = fresh.value.ok_or_else(|| {
                                SmgError::InvalidExpression(format!("no value for {}", pointer))
                            })?;
                            (fresh.state, value)
                        }
                    };
                    for target in state.get_pointer_targets(pointer)? {
                        if target.address.is_some() {
                            addresses.push(target);
                        } else {
                            addresses.push(target.state.dereference_unknown(pointer, access)?);
                        }
                    }
                }
                Ok(addresses)
            }
            Expr::Field { base, offset, .. } => Ok(self
                .evaluate_address(base, access)?
                .into_iter()
                .map(|AddressAndState { state, address }| AddressAndState {
                    state,
                    address: address.map(|a| Address::new(a.object, a.offset + offset)),
                })
                .collect()),
            _ => Err(SmgError::InvalidExpression(format!("{} is not an lvalue", expr))),
        }
    }

    /// The symbolic values `expr` evaluates to; `None` if unknown.
    pub fn evaluate_value(&self, expr: &Expr) -> Result<Vec<ValueAndState>> {
        match expr {
            Expr::IntLiteral { value, ty } => Ok(vec![self.value_for_number(wrap_signed(value, self.size_of(ty)))]),
            Expr::Variable { ty, .. } | Expr::Deref { ty, .. } | Expr::Field { ty, .. } => {
                let size = self.size_of(ty);
                let mut values = Vec::new();
                for AddressAndState { state, address } in self.evaluate_address(expr, Access::Read)? {
                    match address {
                        Some(address) => values.push(state.read_or_create(address.object, address.offset, size)?),
                        None => values.push(state.fresh_value()),
                    }
                }
                Ok(values)
            }
            Expr::AddressOf(inner) => {
                let mut values = Vec::new();
                for AddressAndState { state, address } in self.evaluate_address(inner, Access::Read)? {
                    match address {
                        Some(address) => values.push(state.create_pointer(address.object, address.offset)?),
                        None => values.push(state.fresh_value()),
                    }
                }
                Ok(values)
            }
            Expr::Binary { op, lhs, rhs, ty } => {
                let mut values = Vec::new();
                for left in self.evaluate_value(lhs)? {
                    for right in left.state.evaluate_value(rhs)? {
                        values.push(right.state.apply_binary(*op, left.value, right.value, ty)?);
                    }
                }
                Ok(values)
            }
            Expr::Unary { op, operand, ty } => {
                let mut values = Vec::new();
                for ValueAndState { state, value } in self.evaluate_value(operand)? {
                    let number = value.and_then(|v| state.explicit_value(v)).cloned();
                    let result = match (op, number) {
                        (UnaryOp::Neg, Some(n)) => Some(wrap_signed(&-n, state.size_of(ty))),
                        (UnaryOp::BitNot, Some(n)) => Some(wrap_signed(&!n, state.size_of(ty))),
                        (UnaryOp::Not, Some(n)) => Some(BigInt::from(u8::from(n.is_zero()))),
                        (UnaryOp::Not, None) => match value {
                            Some(v) if state.are_non_equal(v, ValueId::ZERO) => Some(BigInt::zero()),
                            _ => None,
                        },
                        _ => None,
                    };
                    values.push(match result {
                        Some(number) => state.value_for_number(number),
                        None => state.fresh_value(),
                    });
                }
                Ok(values)
            }
            Expr::Cast { operand, ty } => {
                let mut values = Vec::new();
                for ValueAndState { state, value } in self.evaluate_value(operand)? {
                    let number = value.and_then(|v| state.explicit_value(v)).cloned();
                    values.push(match number {
                        Some(number) if *ty != CType::Pointer => {
                            state.value_for_number(wrap_signed(&number, state.size_of(ty)))
                        }
                        _ => ValueAndState { state, value },
                    });
                }
                Ok(values)
            }
        }
    }

    /// The numbers `expr` evaluates to; `None` if not a known number.
    pub fn evaluate_explicit_value(&self, expr: &Expr) -> Result<Vec<(SmgState, Option<BigInt>)>> {
        Ok(self
            .evaluate_value(expr)?
            .into_iter()
            .map(|ValueAndState { state, value }| {
                let number = value.and_then(|v| state.explicit_value(v)).cloned();
                (state, number)
            })
            .collect())
    }

    fn apply_binary(&self, op: BinaryOp, lhs: Option<ValueId>, rhs: Option<ValueId>, ty: &CType) -> Result<ValueAndState> {
        let (Some(lhs), Some(rhs)) = (lhs, rhs) else {
            return Ok(self.fresh_value());
        };
        if op.is_comparison() {
            return Ok(match self.compare(op, lhs, rhs) {
                Some(holds) => self.value_for_number(BigInt::from(u8::from(holds))),
                None => self.fresh_value(),
            });
        }

        let smg = self.smg();
        let target = |v: ValueId| smg.points_to(v).filter(|pt| !pt.object.is_null()).copied();
        let (a, b) = (self.explicit_value(lhs), self.explicit_value(rhs));
        match (op, target(lhs), target(rhs)) {
            (BinaryOp::Add | BinaryOp::Sub, Some(pt), None) => {
                let Some(delta) = b.and_then(|n| n.to_i64()) else {
                    return Ok(self.fresh_value());
                };
                let delta = if op == BinaryOp::Sub { -delta } else { delta };
                let shifted = Address::new(pt.object, pt.offset).shifted(delta.saturating_mul(8));
                return match shifted {
                    Some(address) => self.create_pointer(address.object, address.offset),
                    None => Ok(self.fresh_value()),
                };
            }
            (BinaryOp::Add, None, Some(pt)) => {
                let Some(delta) = a.and_then(|n| n.to_i64()) else {
                    return Ok(self.fresh_value());
                };
                return match Address::new(pt.object, pt.offset).shifted(delta.saturating_mul(8)) {
                    Some(address) => self.create_pointer(address.object, address.offset),
                    None => Ok(self.fresh_value()),
                };
            }
            (BinaryOp::Sub, Some(p), Some(q)) if p.object == q.object => {
                let bytes = (BigInt::from(p.offset) - BigInt::from(q.offset)) / 8;
                return Ok(self.value_for_number(bytes));
            }
            _ => {}
        }

        let (Some(a), Some(b)) = (a, b) else {
            return Ok(self.fresh_value());
        };
        let result = match op {
            BinaryOp::Add => Some(a + b),
            BinaryOp::Sub => Some(a - b),
            BinaryOp::Mul => Some(a * b),
            BinaryOp::Div if !b.is_zero() => Some(a / b),
            BinaryOp::Rem if !b.is_zero() => Some(a % b),
            BinaryOp::BitAnd => Some(a & b),
            BinaryOp::BitOr => Some(a | b),
            BinaryOp::BitXor => Some(a ^ b),
            BinaryOp::Shl => b.to_usize().map(|s| a << s),
            BinaryOp::Shr => b.to_usize().map(|s| a >> s),
            _ => None,
        };
        Ok(match result {
            Some(number) => self.value_for_number(wrap_signed(&number, self.size_of(ty))),
            None => {
                debug!("apply_binary: {} {} {} is unknown", a, op, b);
                self.fresh_value()
            }
        })
    }

    /// Decides a comparison if the state determines it.
    fn compare(&self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> Option<bool> {
        if let (Some(a), Some(b)) = (self.explicit_value(lhs), self.explicit_value(rhs)) {
            return Some(match op {
                BinaryOp::Eq => a == b,
                BinaryOp::Ne => a != b,
                BinaryOp::Lt => a < b,
                BinaryOp::Le => a <= b,
                BinaryOp::Gt => a > b,
                BinaryOp::Ge => a >= b,
                _ => return None,
            });
        }
        let equal = if lhs == rhs {
            Some(true)
        } else if self.are_non_equal(lhs, rhs) {
            Some(false)
        } else {
            None
        };
        match op {
            BinaryOp::Eq => equal,
            BinaryOp::Ne => equal.map(|e| !e),
            _ => {
                let (p, q) = (self.smg().points_to(lhs)?, self.smg().points_to(rhs)?);
                if p.object != q.object || p.object.is_null() {
                    return None;
                }
                Some(match op {
                    BinaryOp::Lt => p.offset < q.offset,
                    BinaryOp::Le => p.offset <= q.offset,
                    BinaryOp::Gt => p.offset > q.offset,
                    _ => p.offset >= q.offset,
                })
            }
        }
    }

    /// The successors in which `expr` evaluates to `truth`.
    ///
    /// Equalities and disequalities are recorded in the graph; branches
    /// contradicting the state are dropped.
    pub fn evaluate_assumption(&self, expr: &Expr, truth: bool) -> Result<Vec<SmgState>> {
        match expr {
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
                ..
            } => self.evaluate_assumption(operand, !truth),
            Expr::Binary {
                op: op @ (BinaryOp::Eq | BinaryOp::Ne),
                lhs,
                rhs,
                ..
            } => {
                let equal = (*op == BinaryOp::Eq) == truth;
                let mut successors = Vec::new();
                for left in self.evaluate_value(lhs)? {
                    for right in left.state.evaluate_value(rhs)? {
                        let (state, a) = right.state.known_value(left.value)?;
                        let (state, b) = state.known_value(right.value)?;
                        successors.extend(state.assume_relation(a, b, equal)?);
                    }
                }
                Ok(successors)
            }
            Expr::Binary { op, lhs, rhs, .. } if op.is_comparison() => {
                let mut successors = Vec::new();
                for left in self.evaluate_value(lhs)? {
                    for right in left.state.evaluate_value(rhs)? {
                        let decided = match (left.value, right.value) {
                            (Some(a), Some(b)) => right.state.compare(*op, a, b),
                            _ => None,
                        };
                        if decided.map_or(true, |holds| holds == truth) {
                            successors.push(right.state);
                        }
                    }
                }
                Ok(successors)
            }
            _ => {
                let mut successors = Vec::new();
                for ValueAndState { state, value } in self.evaluate_value(expr)? {
                    let (state, value) = state.known_value(value)?;
                    successors.extend(state.assume_relation(value, ValueId::ZERO, !truth)?);
                }
                Ok(successors)
            }
        }
    }

    fn known_value(self, value: Option<ValueId>) -> Result<(SmgState, ValueId)> {
        match value {
            Some(value) => Ok((self, value)),
            None => {
                let fresh = self.fresh_value();
                let value = fresh
                    .value
                    .ok_or_else(|| SmgError::InvalidExpression("missing fresh value".to_string()))?;
                Ok((fresh.state, value))
            }
        }
    }

    /// Assumes `a == b` or `a != b`, materializing abstract targets first so
    /// that pointers into possibly empty segments can be compared.
    fn assume_relation(&self, a: ValueId, b: ValueId, equal: bool) -> Result<Vec<SmgState>> {
        let abstract_target = |state: &SmgState, v: ValueId| {
            state
                .smg()
                .points_to(v)
                .and_then(|pt| state.smg().object(pt.object))
                .is_some_and(|o| o.is_abstract())
        };
        let mut pending = vec![(self.successor(), a, b)];
        let mut successors = Vec::new();
        while let Some((state, a, b)) = pending.pop() {
            self.context().check_shutdown()?;
            if abstract_target(&state, a) {
                pending.extend(materialize(&state, a)?.into_iter().map(|(s, a)| (s, a, b)));
                continue;
            }
            if abstract_target(&state, b) {
                pending.extend(materialize(&state, b)?.into_iter().map(|(s, b)| (s, a, b)));
                continue;
            }
            let assumed = if equal {
                state.identify_equal_values(a, b)?
            } else {
                state.identify_non_equal_values(a, b)?
            };
            successors.extend(assumed);
        }
        Ok(successors)
    }
}
