use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

/// The `Num` tag from the value model.
///
/// Kept as a two-variant enum (no fixed-point `Decimal` variant, unlike the
/// teacher's `sql::Number`) — nothing in the spec calls for exact decimal
/// arithmetic, see DESIGN.md.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Default for Number {
    fn default() -> Self {
        Number::Int(0)
    }
}

macro_rules! from_prim_ints {
    ($($int:ty),*) => {
        $(
            impl From<$int> for Number {
                fn from(v: $int) -> Self {
                    Number::Int(v as i64)
                }
            }
        )*
    };
}

from_prim_ints!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl From<f32> for Number {
    fn from(v: f32) -> Self {
        Number::Float(v as f64)
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Number::Float(v)
    }
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int(v) => *v as f64,
            Number::Float(v) => *v,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Number::Int(v) => *v,
            Number::Float(v) => *v as i64,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        match self {
            Number::Int(v) if *v >= 0 => Some(*v as usize),
            Number::Float(v) if *v >= 0.0 => Some(*v as usize),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Number::Int(v) => *v == 0,
            Number::Float(v) => *v == 0.0,
        }
    }

    pub fn is_truthy(&self) -> bool {
        !self.is_zero()
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(v) => write!(f, "{v}"),
            Number::Float(v) => write!(f, "{v}"),
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            _ => self.as_f64() == other.as_f64(),
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.partial_cmp(b),
            _ => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }
}

/// Promotes to `Float` whenever either operand is already a float, otherwise
/// stays in `Int`. Mirrors the promotion rule `core/src/sql/number.rs` uses
/// between its `Int`/`Float` variants.
macro_rules! impl_binop {
    ($trait:ident, $method:ident, $checked:ident, $op:tt) => {
        impl $trait for Number {
            type Output = Number;
            fn $method(self, rhs: Number) -> Number {
                match (self, rhs) {
                    (Number::Int(a), Number::Int(b)) => match a.$checked(b) {
                        Some(v) => Number::Int(v),
                        None => Number::Float((a as f64) $op (b as f64)),
                    },
                    (a, b) => Number::Float(a.as_f64() $op b.as_f64()),
                }
            }
        }
    };
}

impl_binop!(Add, add, checked_add, +);
impl_binop!(Sub, sub, checked_sub, -);
impl_binop!(Mul, mul, checked_mul, *);

impl Div for Number {
    type Output = Option<Number>;
    fn div(self, rhs: Number) -> Option<Number> {
        if rhs.is_zero() {
            return None;
        }
        Some(match (self, rhs) {
            (Number::Int(a), Number::Int(b)) if a % b == 0 => Number::Int(a / b),
            (a, b) => Number::Float(a.as_f64() / b.as_f64()),
        })
    }
}

impl Rem for Number {
    type Output = Option<Number>;
    fn rem(self, rhs: Number) -> Option<Number> {
        if rhs.is_zero() {
            return None;
        }
        Some(match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => Number::Int(a % b),
            (a, b) => Number::Float(a.as_f64() % b.as_f64()),
        })
    }
}

impl Neg for Number {
    type Output = Number;
    fn neg(self) -> Number {
        match self {
            Number::Int(v) => Number::Int(-v),
            Number::Float(v) => Number::Float(-v),
        }
    }
}
