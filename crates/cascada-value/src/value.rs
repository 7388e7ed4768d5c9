use crate::error::{AnnotatedError, Error};
use crate::number::Number;
use crate::path::Part;
use crate::pending::Pending;
use crate::poison::Poison;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// An external, opaque host object.
///
/// `Obj` values are accessed by field/key through this trait but are never
/// walked by [`Value::resolve_deep`] — and §9, deep
/// resolution stops at the `Obj` boundary so a pathological host object graph
/// (including cycles) cannot cause an infinite walk. Identity, not structure,
/// is what the runtime ever compares host objects by.
pub trait HostObject: Send + Sync + fmt::Debug {
    fn get(&self, key: &str) -> Option<Value>;
}

type NativeFn = dyn Fn(&[Value]) -> Value + Send + Sync;

/// A callable value. May itself produce a [`Value::Pending`] when the
/// underlying host function is asynchronous.
#[derive(Clone)]
pub struct Func(pub Arc<NativeFn>);

impl Func {
    pub fn new(f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Self {
        Func(Arc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Func(..)")
    }
}

impl PartialEq for Func {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// The tagged value model.
///
/// Every operator dispatches on this tag and, on a type violation, produces
/// [`Value::Poison`] rather than panicking or raising — runtime failures are
/// values, not control flow.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(String),
    Num(Number),
    Bool(bool),
    Null,
    Undef,
    List(Vec<Value>),
    Dict(IndexMap<String, Value>),
    Func(Func),
    Obj(ObjHandle),
    Pending(Pending),
    Poison(Poison),
}

/// A cloneable, identity-comparable handle to a [`HostObject`].
#[derive(Clone)]
pub struct ObjHandle(pub Arc<dyn HostObject>);

impl fmt::Debug for ObjHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Obj({:?})", self.0)
    }
}

impl PartialEq for ObjHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Poison {
    fn eq(&self, _other: &Self) -> bool {
        // Poisons are never meaningfully compared by value; callers should
        // match on `Value::Poison` and inspect `errors()` instead.
        false
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Undef
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Poison> for Value {
    fn from(v: Poison) -> Self {
        Value::Poison(v)
    }
}

impl From<AnnotatedError> for Value {
    fn from(v: AnnotatedError) -> Self {
        Value::Poison(Poison::new(v))
    }
}

impl From<Error> for Value {
    fn from(v: Error) -> Self {
        Value::from(AnnotatedError::from(v))
    }
}

macro_rules! from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Num(Number::from(v))
                }
            }
        )*
    };
}
from_number!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl Value {
    pub fn base() -> Value {
        Value::Dict(IndexMap::new())
    }

    pub fn is_poison(&self) -> bool {
        matches!(self, Value::Poison(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Value::Pending(_))
    }

    pub fn is_none_ish(&self) -> bool {
        matches!(self, Value::Null | Value::Undef)
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Dict(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::List(_))
    }

    pub fn as_poison(&self) -> Option<&Poison> {
        match self {
            Value::Poison(p) => Some(p),
            _ => None,
        }
    }

    pub fn poisoned(error: Error) -> Value {
        Value::from(error)
    }

    /// Truthiness used by `if`/`while`/`and`/`or`. A poison value is never
    /// truthy — callers must check [`Value::is_poison`] first when that
    /// distinction matters.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => n.is_truthy(),
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Dict(d) => !d.is_empty(),
            Value::Null | Value::Undef | Value::Poison(_) => false,
            Value::Func(_) | Value::Obj(_) | Value::Pending(_) => true,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
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

    /// Walks `List`/`Dict` structures and awaits every `Pending` leaf
    /// transitively, collapsing a failing branch to `Poison` without
    /// aborting sibling branches. `Obj` is opaque and is
    /// never descended into.
    pub fn resolve_deep(self) -> BoxFuture<'static, Value> {
        Box::pin(async move {
            match self {
                Value::Pending(p) => p.await_value().await.resolve_deep().await,
                Value::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    let mut poison: Option<Poison> = None;
                    for item in items {
                        match item.resolve_deep().await {
                            Value::Poison(p) => {
                                poison = Some(match poison.take() {
                                    Some(existing) => existing.join(p),
                                    None => p,
                                });
                            }
                            v => out.push(v),
                        }
                    }
                    match poison {
                        Some(p) => Value::Poison(p),
                        None => Value::List(out),
                    }
                }
                Value::Dict(map) => {
                    let mut out = IndexMap::with_capacity(map.len());
                    let mut poison: Option<Poison> = None;
                    for (k, v) in map {
                        match v.resolve_deep().await {
                            Value::Poison(p) => {
                                poison = Some(match poison.take() {
                                    Some(existing) => existing.join(p),
                                    None => p,
                                });
                            }
                            v => {
                                out.insert(k, v);
                            }
                        }
                    }
                    match poison {
                        Some(p) => Value::Poison(p),
                        None => Value::Dict(out),
                    }
                }
                other => other,
            }
        })
    }

    // -- path addressed access -------------------------------------------------
    //
    // By the time a path reaches these methods every dynamic segment has
    // already been resolved to a concrete `Value`/index (see `path.rs`), so
    // they are plain synchronous recursions, the same shape as
    // `core/src/sql/value/{get,set,del}.rs` minus the `reblessive`/`Context`
    // plumbing those need for SurrealQL's destructuring and graph traversal.

    pub fn get_path(&self, path: &[Part]) -> Value {
        let Some((head, rest)) = path.split_first() else {
            return self.clone();
        };
        match (self, head) {
            (Value::Dict(map), Part::Field(f)) => {
                map.get(f).map(|v| v.get_path(rest)).unwrap_or(Value::Undef)
            }
            (Value::List(v), Part::Index(i)) => {
                v.get(*i).map(|v| v.get_path(rest)).unwrap_or(Value::Undef)
            }
            (Value::List(v), Part::ExprIndex(idx)) => match idx.as_ref() {
                Value::Num(n) => n
                    .as_usize()
                    .and_then(|i| v.get(i))
                    .map(|v| v.get_path(rest))
                    .unwrap_or(Value::Undef),
                _ => Value::Undef,
            },
            (Value::Dict(map), Part::ExprIndex(idx)) => match idx.as_ref() {
                Value::Str(s) => map.get(s).map(|v| v.get_path(rest)).unwrap_or(Value::Undef),
                _ => Value::Undef,
            },
            _ => Value::Undef,
        }
    }

    pub fn set_path(&mut self, path: &[Part], val: Value) {
        let Some((head, rest)) = path.split_first() else {
            *self = val;
            return;
        };
        if matches!(self, Value::Null | Value::Undef) {
            *self = Value::base();
        }
        match (self, head) {
            (Value::Dict(map), Part::Field(f)) => {
                map.entry(f.clone()).or_insert(Value::Undef).set_path(rest, val);
            }
            (Value::List(v), Part::Index(i)) => {
                while v.len() <= *i {
                    v.push(Value::Undef);
                }
                v[*i].set_path(rest, val);
            }
            (Value::List(v), Part::ExprIndex(idx)) => {
                if let Value::Num(n) = idx.as_ref() {
                    if let Some(i) = n.as_usize() {
                        while v.len() <= i {
                            v.push(Value::Undef);
                        }
                        v[i].set_path(rest, val);
                    }
                }
            }
            (Value::Dict(map), Part::ExprIndex(idx)) => {
                if let Value::Str(s) = idx.as_ref() {
                    map.entry(s.clone()).or_insert(Value::Undef).set_path(rest, val);
                }
            }
            _ => {}
        }
    }

    pub fn delete_path(&mut self, path: &[Part]) {
        let Some((head, rest)) = path.split_first() else {
            return;
        };
        match (self, head) {
            (Value::Dict(map), Part::Field(f)) if rest.is_empty() => {
                map.shift_remove(f);
            }
            (Value::Dict(map), Part::Field(f)) => {
                if let Some(v) = map.get_mut(f) {
                    v.delete_path(rest);
                }
            }
            (Value::List(v), Part::Index(i)) if rest.is_empty() => {
                if *i < v.len() {
                    v.remove(*i);
                }
            }
            (Value::List(v), Part::Index(i)) => {
                if let Some(v) = v.get_mut(*i) {
                    v.delete_path(rest);
                }
            }
            _ => {}
        }
    }

    /// Shallow merge: every key present in `other` overwrites (or, for
    /// `Value::Undef`, removes) the corresponding key in `self`.
    pub fn merge(&mut self, other: Value) -> Result<(), Error> {
        let Value::Dict(incoming) = other else {
            return Err(Error::InvalidMerge);
        };
        let Value::Dict(target) = self else {
            *self = Value::Dict(incoming);
            return Ok(());
        };
        for (k, v) in incoming {
            if v.is_none_ish() {
                target.shift_remove(&k);
            } else {
                target.insert(k, v);
            }
        }
        Ok(())
    }

    /// Recursive merge: nested objects merge field-by-field; list values
    /// replace rather than concatenate.
    pub fn deep_merge(&mut self, other: Value) -> Result<(), Error> {
        let Value::Dict(incoming) = other else {
            return Err(Error::InvalidMerge);
        };
        let Value::Dict(target) = self else {
            *self = Value::Dict(incoming);
            return Ok(());
        };
        for (k, v) in incoming {
            match (target.get_mut(&k), v) {
                (Some(existing @ Value::Dict(_)), incoming_v @ Value::Dict(_)) => {
                    existing.deep_merge(incoming_v)?;
                }
                (_, v) if v.is_none_ish() => {
                    target.shift_remove(&k);
                }
                (_, v) => {
                    target.insert(k, v);
                }
            }
        }
        Ok(())
    }

    pub fn push(&mut self, val: Value) -> Result<(), Error> {
        match self {
            Value::Undef | Value::Null => {
                *self = Value::List(vec![val]);
                Ok(())
            }
            Value::List(v) => {
                v.push(val);
                Ok(())
            }
            other => Err(Error::TypeMismatch { expected: "array", found: other.type_name() }),
        }
    }

    pub fn unshift(&mut self, val: Value) -> Result<(), Error> {
        match self {
            Value::Undef | Value::Null => {
                *self = Value::List(vec![val]);
                Ok(())
            }
            Value::List(v) => {
                v.insert(0, val);
                Ok(())
            }
            other => Err(Error::TypeMismatch { expected: "array", found: other.type_name() }),
        }
    }

    pub fn pop(&mut self) -> Result<Value, Error> {
        match self {
            Value::List(v) => Ok(v.pop().unwrap_or(Value::Undef)),
            other => Err(Error::TypeMismatch { expected: "array", found: other.type_name() }),
        }
    }

    pub fn shift(&mut self) -> Result<Value, Error> {
        match self {
            Value::List(v) if v.is_empty() => Ok(Value::Undef),
            Value::List(v) => Ok(v.remove(0)),
            other => Err(Error::TypeMismatch { expected: "array", found: other.type_name() }),
        }
    }

    pub fn reverse(&mut self) -> Result<(), Error> {
        match self {
            Value::List(v) => {
                v.reverse();
                Ok(())
            }
            other => Err(Error::TypeMismatch { expected: "array", found: other.type_name() }),
        }
    }

    pub fn concat(&mut self, other: Value) -> Result<(), Error> {
        match (self, other) {
            (this @ (Value::Undef | Value::Null), Value::List(other)) => {
                *this = Value::List(other);
                Ok(())
            }
            (Value::List(v), Value::List(other)) => {
                v.extend(other);
                Ok(())
            }
            (this, _) => Err(Error::TypeMismatch { expected: "array", found: this.type_name() }),
        }
    }

    pub fn append_str(&mut self, other: &str) -> Result<(), Error> {
        match self {
            Value::Str(s) => {
                s.push_str(other);
                Ok(())
            }
            other => Err(Error::TypeMismatch { expected: "string", found: other.type_name() }),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            Value::Num(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
            Value::Undef => Ok(()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Dict(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Func(_) => write!(f, "[function]"),
            Value::Obj(_) => write!(f, "[object]"),
            Value::Pending(_) => write!(f, "[pending]"),
            Value::Poison(p) => write!(f, "{p}"),
        }
    }
}
