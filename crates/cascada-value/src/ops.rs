//! Arithmetic, comparison and logical dispatch over [`Value`].
//!
//! These functions assume both operands are already resolved — any
//! `Value::Pending` composition happens one layer up, in the expression
//! evaluator, which awaits operands before calling down into here. What
//! lives here only has to handle the type-dispatch and poison-propagation
//! rules: if either operand is already `Poison`, the result is the join of
//! both; otherwise a type mismatch produces a fresh `Poison`.

use crate::error::{AnnotatedError, Error};
use crate::poison::Poison;
use crate::value::Value;

fn poison_of(a: &Value, b: &Value) -> Option<Poison> {
    match (a, b) {
        (Value::Poison(pa), Value::Poison(pb)) => Some(pa.clone().join(pb.clone())),
        (Value::Poison(p), _) | (_, Value::Poison(p)) => Some(p.clone()),
        _ => None,
    }
}

fn mismatch(expected: &'static str, found: &Value) -> Value {
    Value::from(Error::TypeMismatch { expected, found: type_tag(found) })
}

fn type_tag(v: &Value) -> &'static str {
    match v {
        Value::Str(_) => "string",
        Value::Num(_) => "number",
        Value::Bool(_) => "bool",
        Value::Null => "null",
        Value::Undef => "undefined",
        Value::List(_) => "array",
        Value::Dict(_) => "object",
        Value::Func(_) => "function",
        Value::Obj(_) => "object",
        Value::Pending(_) => "pending",
        Value::Poison(_) => "poison",
    }
}

pub fn add(a: Value, b: Value) -> Value {
    if let Some(p) = poison_of(&a, &b) {
        return Value::Poison(p);
    }
    match (a, b) {
        (Value::Num(a), Value::Num(b)) => Value::Num(a + b),
        (Value::Str(mut a), Value::Str(b)) => {
            a.push_str(&b);
            Value::Str(a)
        }
        (Value::Str(mut a), b) => {
            a.push_str(&b.to_string());
            Value::Str(a)
        }
        (a, Value::Str(b)) => Value::Str(format!("{a}{b}")),
        (Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Value::List(a)
        }
        (a, _) => mismatch("number, string or array", &a),
    }
}

pub fn sub(a: Value, b: Value) -> Value {
    numeric_binop(a, b, |a, b| Value::Num(a - b))
}

pub fn mul(a: Value, b: Value) -> Value {
    numeric_binop(a, b, |a, b| Value::Num(a * b))
}

pub fn div(a: Value, b: Value) -> Value {
    if let Some(p) = poison_of(&a, &b) {
        return Value::Poison(p);
    }
    match (a, b) {
        (Value::Num(a), Value::Num(b)) => match a / b {
            Some(v) => Value::Num(v),
            None => Value::from(Error::DivideByZero),
        },
        (a, _) => mismatch("number", &a),
    }
}

pub fn rem(a: Value, b: Value) -> Value {
    if let Some(p) = poison_of(&a, &b) {
        return Value::Poison(p);
    }
    match (a, b) {
        (Value::Num(a), Value::Num(b)) => match a % b {
            Some(v) => Value::Num(v),
            None => Value::from(Error::DivideByZero),
        },
        (a, _) => mismatch("number", &a),
    }
}

fn numeric_binop(a: Value, b: Value, f: impl FnOnce(crate::number::Number, crate::number::Number) -> Value) -> Value {
    if let Some(p) = poison_of(&a, &b) {
        return Value::Poison(p);
    }
    match (a, b) {
        (Value::Num(a), Value::Num(b)) => f(a, b),
        (a, _) => mismatch("number", &a),
    }
}

pub fn neg(a: Value) -> Value {
    match a {
        Value::Poison(p) => Value::Poison(p),
        Value::Num(n) => Value::Num(-n),
        other => mismatch("number", &other),
    }
}

pub fn not(a: &Value) -> Value {
    // Logical negation of a poison is still poison: it is a failure to
    // evaluate, not a boolean the program can branch on.
    match a {
        Value::Poison(p) => Value::Poison(p.clone()),
        other => Value::Bool(!other.is_truthy()),
    }
}

/// Structural equality. Two poisons are never equal to anything, including
/// each other — a failed computation has no comparable identity.
pub fn eq(a: &Value, b: &Value) -> Value {
    if let Some(p) = poison_of(a, b) {
        return Value::Poison(p);
    }
    Value::Bool(values_equal(a, b))
}

pub fn ne(a: &Value, b: &Value) -> Value {
    if let Some(p) = poison_of(a, b) {
        return Value::Poison(p);
    }
    Value::Bool(!values_equal(a, b))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Num(a), Value::Num(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) | (Value::Undef, Value::Undef) => true,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| values_equal(a, b))
        }
        (Value::Dict(a), Value::Dict(b)) => {
            a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|bv| values_equal(v, bv)))
        }
        (Value::Pending(a), Value::Pending(b)) => a == b,
        (Value::Obj(a), Value::Obj(b)) => a == b,
        (Value::Func(a), Value::Func(b)) => a == b,
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Num(a), Value::Num(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

pub fn lt(a: &Value, b: &Value) -> Value {
    ordering(a, b, |o| o == std::cmp::Ordering::Less)
}

pub fn le(a: &Value, b: &Value) -> Value {
    ordering(a, b, |o| o != std::cmp::Ordering::Greater)
}

pub fn gt(a: &Value, b: &Value) -> Value {
    ordering(a, b, |o| o == std::cmp::Ordering::Greater)
}

pub fn ge(a: &Value, b: &Value) -> Value {
    ordering(a, b, |o| o != std::cmp::Ordering::Less)
}

fn ordering(a: &Value, b: &Value, f: impl FnOnce(std::cmp::Ordering) -> bool) -> Value {
    if let Some(p) = poison_of(a, b) {
        return Value::Poison(p);
    }
    match compare(a, b) {
        Some(o) => Value::Bool(f(o)),
        None => Value::from(AnnotatedError::new(Error::TypeMismatch {
            expected: "comparable operands",
            found: type_tag(b),
        })),
    }
}
