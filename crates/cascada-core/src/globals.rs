//! Built-in global functions available to every template, registered into a fresh [`crate::rt::Globals`] alongside
//! whatever a host adds of its own.

use cascada_value::{Number, Value};

use crate::rt::Globals;

/// Populates `globals` with the handful of built-ins the language assumes
/// are always present — `range()` for the canonical counting loop
/// plus the small set of type/length helpers most
/// templates reach for immediately.
pub fn install_builtins(globals: &mut Globals) {
    globals.functions.insert("range".to_string(), std::sync::Arc::new(range));
    globals.functions.insert("length".to_string(), std::sync::Arc::new(length));
    globals.functions.insert("keys".to_string(), std::sync::Arc::new(keys));
}

/// `range(stop)`, `range(start, stop)`, `range(start, stop, step)` — mirrors
/// the host-language `range` builtin most templating engines expose for
/// `{% for i in range(n) %}`.
fn range(args: &[Value]) -> Value {
    let nums: Vec<i64> = args.iter().filter_map(|v| v.as_number().map(|n| n.as_i64())).collect();
    let (start, stop, step) = match nums.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Value::from(cascada_value::Error::custom("range() takes 1 to 3 arguments")),
    };
    if step == 0 {
        return Value::from(cascada_value::Error::custom("range() step cannot be zero"));
    }
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(Value::Num(Number::Int(i)));
        i += step;
    }
    Value::List(out)
}

fn length(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Str(s)) => Value::Num(Number::Int(s.chars().count() as i64)),
        Some(Value::List(l)) => Value::Num(Number::Int(l.len() as i64)),
        Some(Value::Dict(d)) => Value::Num(Number::Int(d.len() as i64)),
        Some(other) => Value::from(cascada_value::Error::TypeMismatch { expected: "string, array or object", found: type_tag(other) }),
        None => Value::from(cascada_value::Error::custom("length() takes 1 argument")),
    }
}

fn keys(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Dict(d)) => Value::List(d.keys().map(|k| Value::from(k.clone())).collect()),
        Some(other) => Value::from(cascada_value::Error::TypeMismatch { expected: "object", found: type_tag(other) }),
        None => Value::from(cascada_value::Error::custom("keys() takes 1 argument")),
    }
}

fn type_tag(v: &Value) -> &'static str {
    crate::eval::type_tag(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn range_default_start_and_step() {
        let v = range(&[Value::Num(Number::Int(3))]);
        assert_eq!(v, Value::List(vec![Value::Num(Number::Int(0)), Value::Num(Number::Int(1)), Value::Num(Number::Int(2))]));
    }

    #[test]
    fn range_with_explicit_step() {
        let v = range(&[Value::Num(Number::Int(10)), Value::Num(Number::Int(0)), Value::Num(Number::Int(-2))]);
        assert_eq!(
            v,
            Value::List(vec![
                Value::Num(Number::Int(10)),
                Value::Num(Number::Int(8)),
                Value::Num(Number::Int(6)),
                Value::Num(Number::Int(4)),
                Value::Num(Number::Int(2)),
            ])
        );
    }

    #[test]
    fn length_counts_chars_not_bytes() {
        let v = length(&[Value::from("abc")]);
        assert_eq!(v, Value::Num(Number::Int(3)));
    }
}
