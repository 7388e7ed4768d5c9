//! The tagged value model shared by every other Cascada crate.
//!
//! `Value` (§3 of the value model), its poison/pending variants, the
//! `Number` tag and path-addressed access all live here with no dependency
//! on the scheduling, command-buffer or parsing machinery built on top of
//! them in `cascada-core`/`cascada-ast`/`cascada-expr`.

mod error;
mod number;
mod ops;
mod path;
mod pending;
mod poison;
mod value;

pub use error::{AnnotatedError, Error};
pub use number::Number;
pub use path::Part;
pub use pending::Pending;
pub use poison::Poison;
pub use value::{Func, HostObject, ObjHandle, Value};

pub mod op {
    pub use crate::ops::*;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn truthiness_matches_spec() {
        assert!(Value::from(1).is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Undef.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
    }

    #[test]
    fn poison_propagates_through_add() {
        let poison = Value::poisoned(Error::custom("boom"));
        let result = op::add(poison.clone(), Value::from(1));
        assert!(result.is_poison());
    }

    #[test]
    fn poison_from_both_sides_joins_without_duplicating() {
        let a = Value::poisoned(Error::custom("a"));
        let b = Value::poisoned(Error::custom("b"));
        let joined = op::add(a, b);
        let Value::Poison(p) = joined else { panic!("expected poison") };
        assert_eq!(p.errors().len(), 2);
    }

    #[test]
    fn type_mismatch_produces_poison_not_panic() {
        let result = op::add(Value::from(1), Value::Bool(true));
        assert!(result.is_poison());
    }

    #[test]
    fn string_concat_coerces_numbers() {
        let result = op::add(Value::from("n = "), Value::from(3));
        assert_eq!(result, Value::from("n = 3".to_string()));
    }

    #[test]
    fn divide_by_zero_poisons_rather_than_panicking() {
        let result = op::div(Value::from(1), Value::from(0));
        assert!(result.is_poison());
    }

    #[test]
    fn set_path_then_get_path_round_trips() {
        let mut v = Value::base();
        v.set_path(&[Part::field("a"), Part::Index(0)], Value::from(42));
        assert_eq!(v.get_path(&[Part::field("a"), Part::Index(0)]), Value::from(42));
    }

    #[test]
    fn delete_path_removes_object_key() {
        let mut v = Value::base();
        v.set_path(&[Part::field("a")], Value::from(1));
        v.delete_path(&[Part::field("a")]);
        assert_eq!(v.get_path(&[Part::field("a")]), Value::Undef);
    }

    #[test]
    fn merge_removes_keys_set_to_undef() {
        let mut v = Value::base();
        v.set_path(&[Part::field("a")], Value::from(1));
        v.set_path(&[Part::field("b")], Value::from(2));
        let mut incoming = indexmap::IndexMap::new();
        incoming.insert("a".to_string(), Value::Undef);
        v.merge(Value::Dict(incoming)).unwrap();
        assert_eq!(v.get_path(&[Part::field("a")]), Value::Undef);
        assert_eq!(v.get_path(&[Part::field("b")]), Value::from(2));
    }

    #[tokio::test]
    async fn resolve_deep_awaits_nested_pending_and_collects_sibling_poisons() {
        let pending = Pending::new();
        let list = Value::List(vec![
            Value::Pending(pending.clone()),
            Value::poisoned(Error::custom("sibling failure")),
        ]);
        pending.resolve(Value::from(7));
        let resolved = list.resolve_deep().await;
        let Value::Poison(p) = resolved else { panic!("expected poison, pending resolved ok but sibling poisoned") };
        assert_eq!(p.errors().len(), 1);
    }

    #[tokio::test]
    async fn pending_await_value_unblocks_on_resolve() {
        let pending = Pending::new();
        let clone = pending.clone();
        let handle = tokio::spawn(async move { clone.await_value().await });
        pending.resolve(Value::from("done"));
        let v = handle.await.unwrap();
        assert_eq!(v, Value::from("done"));
    }
}
