//! The built-in `data` handler.
//!
//! Maintains a single [`Value`], initially `Dict{}` but replaceable wholesale
//! by a root-level `set`. Every mutation method is implemented the way
//! `core/src/sql/value/{set,get,del,merge,increment,decrement}.rs` implement
//! path-addressed `Value` mutation in the teacher: recursive, keyed by an
//! ordered path-step slice, operating in place under a lock.

use cascada_value::{Error as ValueError, Part, Value};
use parking_lot::RwLock;

use super::Handler;

pub struct DataHandler {
    value: RwLock<Value>,
}

impl Default for DataHandler {
    fn default() -> Self {
        DataHandler { value: RwLock::new(Value::base()) }
    }
}

impl DataHandler {
    pub fn new() -> DataHandler {
        DataHandler::default()
    }

    fn with_target<R>(&self, path: &[Part], f: impl FnOnce(&mut Value) -> R) -> R {
        let mut root = self.value.write();
        if path.is_empty() {
            return f(&mut root);
        }
        let (parent_path, last) = path.split_at(path.len() - 1);
        ensure_path(&mut root, parent_path);
        let parent = navigate_mut(&mut root, parent_path);
        let key = &last[0];
        match (parent, key) {
            (Value::Dict(map), Part::Field(name)) => {
                let slot = map.entry(name.clone()).or_insert(Value::Undef);
                f(slot)
            }
            (Value::List(list), Part::Index(i)) => {
                while list.len() <= *i {
                    list.push(Value::Undef);
                }
                f(&mut list[*i])
            }
            (other, _) => f(other),
        }
    }
}

/// Walks (creating `Dict`s along the way) down to, but not including, the
/// final path step so [`DataHandler::with_target`] can hand the method its
/// direct slot.
fn ensure_path(root: &mut Value, path: &[Part]) {
    let mut cur = root;
    for step in path {
        if matches!(cur, Value::Undef | Value::Null) {
            *cur = Value::base();
        }
        cur = match (cur, step) {
            (Value::Dict(map), Part::Field(name)) => map.entry(name.clone()).or_insert(Value::Undef),
            (Value::List(list), Part::Index(i)) => {
                while list.len() <= *i {
                    list.push(Value::Undef);
                }
                &mut list[*i]
            }
            (other, _) => other,
        };
    }
}

fn navigate_mut<'a>(root: &'a mut Value, path: &[Part]) -> &'a mut Value {
    let mut cur = root;
    for step in path {
        cur = match (cur, step) {
            (Value::Dict(map), Part::Field(name)) => map.entry(name.clone()).or_insert(Value::Undef),
            (Value::List(list), Part::Index(i)) => {
                while list.len() <= *i {
                    list.push(Value::Undef);
                }
                &mut list[*i]
            }
            (other, _) => other,
        };
    }
    cur
}

impl Handler for DataHandler {
    fn apply(&self, path: &[Part], method: &str, args: &[Value]) -> Result<Value, ValueError> {
        match method {
            "set" => {
                let v = args.first().cloned().unwrap_or(Value::Undef);
                if path.is_empty() {
                    *self.value.write() = v;
                } else {
                    self.with_target(path, |slot| *slot = v);
                }
                Ok(Value::Undef)
            }
            "push" => self.with_target(path, |slot| slot.push(args_first(args))),
            "unshift" => self.with_target(path, |slot| slot.unshift(args_first(args))),
            "pop" => self.with_target(path, |slot| slot.pop()),
            "shift" => self.with_target(path, |slot| slot.shift()),
            "reverse" => self.with_target(path, |slot| slot.reverse().map(|_| Value::Undef)),
            "concat" => self.with_target(path, |slot| slot.concat(args_first(args)).map(|_| Value::Undef)),
            "merge" => self.with_target(path, |slot| slot.merge(args_first(args)).map(|_| Value::Undef)),
            "deepMerge" => self.with_target(path, |slot| slot.deep_merge(args_first(args)).map(|_| Value::Undef)),
            "append" => self.with_target(path, |slot| {
                let other = args_first(args);
                let s = other.as_str().ok_or(ValueError::TypeMismatch { expected: "string", found: "non-string" })?;
                slot.append_str(s).map(|_| Value::Undef)
            }),
            "add" => self.with_target(path, |slot| {
                let rhs = args_first(args);
                let result = cascada_value::op::add(slot.clone(), rhs);
                if result.is_poison() {
                    Err(ValueError::TypeMismatch { expected: "number or string", found: "incompatible operand" })
                } else {
                    *slot = result;
                    Ok(Value::Undef)
                }
            }),
            "sub" => numeric_compound(self, path, args, cascada_value::op::sub),
            "mul" => numeric_compound(self, path, args, cascada_value::op::mul),
            "div" => self.with_target(path, |slot| {
                let rhs = args_first(args);
                let result = cascada_value::op::div(slot.clone(), rhs);
                if let Some(p) = result.as_poison() {
                    let _ = p;
                    Err(ValueError::DivideByZero)
                } else {
                    *slot = result;
                    Ok(Value::Undef)
                }
            }),
            "inc" => self.with_target(path, |slot| {
                let result = cascada_value::op::add(slot.clone(), Value::from(1));
                *slot = result;
                Ok(Value::Undef)
            }),
            "dec" => self.with_target(path, |slot| {
                let result = cascada_value::op::sub(slot.clone(), Value::from(1));
                *slot = result;
                Ok(Value::Undef)
            }),
            "and" => self.with_target(path, |slot| {
                let rhs = args_first(args);
                *slot = if slot.is_truthy() { rhs } else { slot.clone() };
                Ok(Value::Undef)
            }),
            "or" => self.with_target(path, |slot| {
                let rhs = args_first(args);
                *slot = if slot.is_truthy() { slot.clone() } else { rhs };
                Ok(Value::Undef)
            }),
            "delete" => {
                self.value.write().delete_path(path);
                Ok(Value::Undef)
            }
            "toUpperCase" => string_op(self, path, |s| s.to_uppercase()),
            "toLowerCase" => string_op(self, path, |s| s.to_lowercase()),
            "trim" => string_op(self, path, |s| s.trim().to_string()),
            "trimStart" => string_op(self, path, |s| s.trim_start().to_string()),
            "trimEnd" => string_op(self, path, |s| s.trim_end().to_string()),
            "repeat" => {
                let n = args.first().and_then(Value::as_number).and_then(|n| n.as_usize()).unwrap_or(0);
                string_op(self, path, move |s| s.repeat(n))
            }
            "charAt" => {
                let i = args.first().and_then(Value::as_number).and_then(|n| n.as_usize()).unwrap_or(0);
                self.with_target(path, move |slot| {
                    let s = slot.as_str().ok_or(ValueError::TypeMismatch { expected: "string", found: "non-string" })?;
                    Ok(s.chars().nth(i).map(|c| Value::from(c.to_string())).unwrap_or(Value::Undef))
                })
            }
            "slice" | "substring" => {
                let start = args.first().and_then(Value::as_number).and_then(|n| n.as_usize()).unwrap_or(0);
                let end = args.get(1).and_then(Value::as_number).and_then(|n| n.as_usize());
                self.with_target(path, move |slot| match slot {
                    Value::Str(s) => {
                        let chars: Vec<char> = s.chars().collect();
                        let end = end.unwrap_or(chars.len()).min(chars.len());
                        let start = start.min(end);
                        Ok(Value::from(chars[start..end].iter().collect::<String>()))
                    }
                    Value::List(v) => {
                        let end = end.unwrap_or(v.len()).min(v.len());
                        let start = start.min(end);
                        Ok(Value::List(v[start..end].to_vec()))
                    }
                    other => Err(ValueError::TypeMismatch { expected: "string or array", found: type_tag(other) }),
                })
            }
            "arraySlice" => self.with_target(path, |slot| match slot {
                Value::List(v) => {
                    let start = args.first().and_then(Value::as_number).and_then(|n| n.as_usize()).unwrap_or(0);
                    let end = args.get(1).and_then(Value::as_number).and_then(|n| n.as_usize()).unwrap_or(v.len());
                    let end = end.min(v.len());
                    let start = start.min(end);
                    Ok(Value::List(v[start..end].to_vec()))
                }
                other => Err(ValueError::TypeMismatch { expected: "array", found: type_tag(other) }),
            }),
            "replace" => {
                let from = args.first().and_then(Value::as_str).map(str::to_owned).unwrap_or_default();
                let to = args.get(1).and_then(Value::as_str).map(str::to_owned).unwrap_or_default();
                string_op(self, path, move |s| s.replacen(&from, &to, 1))
            }
            "replaceAll" => {
                let from = args.first().and_then(Value::as_str).map(str::to_owned).unwrap_or_default();
                let to = args.get(1).and_then(Value::as_str).map(str::to_owned).unwrap_or_default();
                string_op(self, path, move |s| s.replace(&from, &to))
            }
            "split" => {
                let sep = args.first().and_then(Value::as_str).map(str::to_owned).unwrap_or_default();
                self.with_target(path, move |slot| {
                    let s = slot.as_str().ok_or(ValueError::TypeMismatch { expected: "string", found: "non-string" })?;
                    let parts: Vec<Value> = if sep.is_empty() {
                        s.chars().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::from).collect()
                    };
                    Ok(Value::List(parts))
                })
            }
            "at" => {
                let i = args.first().and_then(Value::as_number).map(|n| n.as_i64()).unwrap_or(0);
                self.with_target(path, move |slot| match slot {
                    Value::List(v) => {
                        let idx = if i < 0 { v.len() as i64 + i } else { i };
                        Ok(usize::try_from(idx).ok().and_then(|i| v.get(i).cloned()).unwrap_or(Value::Undef))
                    }
                    other => Err(ValueError::TypeMismatch { expected: "array", found: type_tag(other) }),
                })
            }
            "sort" => self.with_target(path, |slot| match slot {
                Value::List(v) => {
                    v.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
                    Ok(Value::Undef)
                }
                other => Err(ValueError::TypeMismatch { expected: "array", found: type_tag(other) }),
            }),
            "sortWith" => {
                let cmp = args.first().cloned().unwrap_or(Value::Undef);
                let f = match cmp {
                    Value::Func(f) => f,
                    other => return Err(ValueError::TypeMismatch { expected: "function", found: type_tag(&other) }),
                };
                self.with_target(path, move |slot| match slot {
                    Value::List(v) => {
                        let mut error = None;
                        let mut items = v.clone();
                        items.sort_by(|a, b| {
                            if error.is_some() {
                                return std::cmp::Ordering::Equal;
                            }
                            match f.call(&[a.clone(), b.clone()]) {
                                Value::Pending(_) => {
                                    error = Some(ValueError::custom(
                                        "sortWith comparator must resolve synchronously",
                                    ));
                                    std::cmp::Ordering::Equal
                                }
                                Value::Poison(p) => {
                                    error = Some(ValueError::custom(p.to_string()));
                                    std::cmp::Ordering::Equal
                                }
                                other => other
                                    .as_number()
                                    .map(|n| n.as_f64())
                                    .unwrap_or(0.0)
                                    .partial_cmp(&0.0)
                                    .unwrap_or(std::cmp::Ordering::Equal),
                            }
                        });
                        match error {
                            Some(e) => Err(e),
                            None => {
                                *v = items;
                                Ok(Value::Undef)
                            }
                        }
                    }
                    other => Err(ValueError::TypeMismatch { expected: "array", found: type_tag(other) }),
                })
            }
            "_call" => Ok(Value::Undef),
            other => Err(ValueError::custom(format!("unknown data handler method {other:?}"))),
        }
    }

    fn list_len(&self, path: &[Part]) -> Option<usize> {
        let root = self.value.read();
        let v = root.get_path(path);
        match v {
            Value::List(l) => Some(l.len()),
            _ => None,
        }
    }

    fn snapshot(&self) -> Value {
        self.value.read().clone()
    }

    fn restore(&self, snapshot: Value) {
        *self.value.write() = snapshot;
    }

    fn fresh(&self) -> std::sync::Arc<dyn Handler> {
        std::sync::Arc::new(DataHandler::new())
    }
}

fn args_first(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or(Value::Undef)
}

fn numeric_compound(
    handler: &DataHandler,
    path: &[Part],
    args: &[Value],
    op: impl FnOnce(Value, Value) -> Value,
) -> Result<Value, ValueError> {
    handler.with_target(path, |slot| {
        let rhs = args_first(args);
        let result = op(slot.clone(), rhs);
        if result.is_poison() {
            Err(ValueError::TypeMismatch { expected: "number", found: "incompatible operand" })
        } else {
            *slot = result;
            Ok(Value::Undef)
        }
    })
}

fn string_op(handler: &DataHandler, path: &[Part], f: impl FnOnce(&str) -> String) -> Result<Value, ValueError> {
    handler.with_target(path, move |slot| {
        let s = slot.as_str().ok_or(ValueError::TypeMismatch { expected: "string", found: "non-string" })?;
        *slot = Value::from(f(s));
        Ok(Value::Undef)
    })
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

#[cfg(test)]
mod tests {
    use super::*;
    use cascada_value::Part;
    use pretty_assertions::assert_eq;

    fn p(name: &str) -> Part {
        Part::field(name)
    }

    #[test]
    fn set_at_empty_path_replaces_root() {
        let h = DataHandler::new();
        h.apply(&[], "set", &[Value::from(5)]).unwrap();
        assert_eq!(h.snapshot(), Value::from(5));
    }

    #[test]
    fn push_auto_creates_a_list() {
        let h = DataHandler::new();
        h.apply(&[p("items")], "push", &[Value::from(1)]).unwrap();
        h.apply(&[p("items")], "push", &[Value::from(2)]).unwrap();
        assert_eq!(h.snapshot().get_path(&[p("items")]), Value::List(vec![Value::from(1), Value::from(2)]));
    }

    #[test]
    fn deep_merge_replaces_lists_but_recurses_into_dicts() {
        let h = DataHandler::new();
        h.apply(&[], "set", &[Value::base()]).unwrap();
        h.apply(&[p("config")], "set", &[Value::base()]).unwrap();
        h.apply(&[p("config")], "merge", &[{
            let mut m = indexmap::IndexMap::new();
            m.insert("theme".to_string(), Value::from("dark"));
            Value::Dict(m)
        }])
        .unwrap();
        h.apply(&[], "deepMerge", &[{
            let mut outer = indexmap::IndexMap::new();
            let mut inner = indexmap::IndexMap::new();
            inner.insert("loaded".to_string(), Value::Bool(true));
            outer.insert("config".to_string(), Value::Dict(inner));
            Value::Dict(outer)
        }])
        .unwrap();
        assert_eq!(h.snapshot().get_path(&[p("config"), p("theme")]), Value::from("dark"));
        assert_eq!(h.snapshot().get_path(&[p("config"), p("loaded")]), Value::Bool(true));
    }

    #[test]
    fn compound_increment_decrement_and_scale() {
        let h = DataHandler::new();
        h.apply(&[p("counter")], "set", &[Value::from(10)]).unwrap();
        h.apply(&[p("counter")], "add", &[Value::from(5)]).unwrap();
        h.apply(&[p("counter")], "mul", &[Value::from(2)]).unwrap();
        h.apply(&[p("counter")], "sub", &[Value::from(3)]).unwrap();
        h.apply(&[p("counter")], "inc", &[]).unwrap();
        h.apply(&[p("counter")], "div", &[Value::from(2)]).unwrap();
        assert_eq!(h.snapshot().get_path(&[p("counter")]), Value::from(14));
    }

    #[test]
    fn division_by_zero_is_a_fatal_error_not_a_poison() {
        let h = DataHandler::new();
        h.apply(&[p("x")], "set", &[Value::from(1)]).unwrap();
        let err = h.apply(&[p("x")], "div", &[Value::from(0)]).unwrap_err();
        assert!(matches!(err, ValueError::DivideByZero));
    }

    #[test]
    fn delete_removes_the_addressed_field() {
        let h = DataHandler::new();
        h.apply(&[p("a")], "set", &[Value::from(1)]).unwrap();
        h.apply(&[p("a")], "delete", &[]).unwrap();
        assert_eq!(h.snapshot().get_path(&[p("a")]), Value::Undef);
    }

    #[test]
    fn string_methods_round_trip() {
        let h = DataHandler::new();
        h.apply(&[p("name")], "set", &[Value::from("  Ada  ")]).unwrap();
        h.apply(&[p("name")], "trim", &[]).unwrap();
        h.apply(&[p("name")], "toUpperCase", &[]).unwrap();
        assert_eq!(h.snapshot().get_path(&[p("name")]), Value::from("ADA"));
    }
}
