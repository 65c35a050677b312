//! Typed expression trees handed over by the front end.
//!
//! Field offsets are in bits. Pointer arithmetic counts in bytes, as if every
//! pointer were a `char *`; the front end scales indices beforehand.

use std::fmt;
use std::ops::{Add, BitAnd, BitOr, BitXor, Mul, Sub};
use std::sync::Arc;

use num_bigint::BigInt;

use crate::machine::CType;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Logical negation.
    Not,
    BitNot,
}

/// An expression of the analyzed program.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Expr {
    IntLiteral {
        value: BigInt,
        ty: CType,
    },
    Variable {
        name: Arc<str>,
        ty: CType,
    },
    /// `*pointer`
    Deref {
        pointer: Box<Expr>,
        ty: CType,
    },
    /// The field at bit `offset` of the lvalue `base`.
    Field {
        base: Box<Expr>,
        offset: u64,
        ty: CType,
    },
    AddressOf(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        ty: CType,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        ty: CType,
    },
    Cast {
        operand: Box<Expr>,
        ty: CType,
    },
}

impl Expr {
    pub fn int(value: impl Into<BigInt>, ty: CType) -> Self {
        Expr::IntLiteral {
            value: value.into(),
            ty,
        }
    }

    /// The null pointer constant.
    pub fn null() -> Self {
        Expr::int(0, CType::Pointer)
    }

    pub fn var(name: impl Into<Arc<str>>, ty: CType) -> Self {
        Expr::Variable { name: name.into(), ty }
    }

    pub fn deref(self, ty: CType) -> Self {
        Expr::Deref {
            pointer: Box::new(self),
            ty,
        }
    }

    pub fn field(self, offset: u64, ty: CType) -> Self {
        Expr::Field {
            base: Box::new(self),
            offset,
            ty,
        }
    }

    /// `self->field`: a field of the object `self` points to.
    pub fn arrow(self, offset: u64, ty: CType) -> Self {
        Expr::Field {
            base: Box::new(self.deref(CType::Char)),
            offset,
            ty,
        }
    }

    pub fn address_of(self) -> Self {
        Expr::AddressOf(Box::new(self))
    }

    pub fn cast(self, ty: CType) -> Self {
        Expr::Cast {
            operand: Box::new(self),
            ty,
        }
    }

    pub fn logical_not(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
            ty: CType::Int,
        }
    }

    pub fn negate(self) -> Self {
        let ty = self.ty();
        Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(self),
            ty,
        }
    }

    /// A binary expression; comparisons have type `int`, all others the type
    /// of the left operand.
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        let ty = if op.is_comparison() { CType::Int } else { lhs.ty() };
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            ty,
        }
    }

    pub fn equals(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Eq, self, rhs)
    }

    pub fn not_equals(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Ne, self, rhs)
    }

    pub fn less_than(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Lt, self, rhs)
    }

    pub fn ty(&self) -> CType {
        match self {
            Expr::IntLiteral { ty, .. }
            | Expr::Variable { ty, .. }
            | Expr::Deref { ty, .. }
            | Expr::Field { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Cast { ty, .. } => ty.clone(),
            Expr::AddressOf(_) => CType::Pointer,
        }
    }

    /// Checks whether the expression denotes a memory location.
    pub fn is_lvalue(&self) -> bool {
        matches!(self, Expr::Variable { .. } | Expr::Deref { .. } | Expr::Field { .. })
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }
    };
}

binary_operator!(Add, add, BinaryOp::Add);
binary_operator!(Sub, sub, BinaryOp::Sub);
binary_operator!(Mul, mul, BinaryOp::Mul);
binary_operator!(BitAnd, bitand, BinaryOp::BitAnd);
binary_operator!(BitOr, bitor, BinaryOp::BitOr);
binary_operator!(BitXor, bitxor, BinaryOp::BitXor);

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntLiteral { value, .. } => write!(f, "{}", value),
            Expr::Variable { name, .. } => write!(f, "{}", name),
            Expr::Deref { pointer, .. } => write!(f, "*({})", pointer),
            Expr::Field { base, offset, .. } => write!(f, "({}).@{}", base, offset),
            Expr::AddressOf(inner) => write!(f, "&({})", inner),
            Expr::Binary { op, lhs, rhs, .. } => write!(f, "({} {} {})", lhs, op, rhs),
            Expr::Unary { op, operand, .. } => {
                let op = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                };
                write!(f, "{}({})", op, operand)
            }
            Expr::Cast { operand, ty } => write!(f, "({})({})", ty, operand),
        }
    }
}
