use crate::value::Value;

/// One step of a path addressing into a [`Value`] tree.
///
/// This is `PathStep` from `spec.md` §3. By the time a path reaches
/// [`Value::get_path`]/[`Value::set_path`] every dynamic piece has already
/// been resolved to a concrete [`Value`] or index — resolving `ExprIndex`
/// expressions, and translating `LastIndex` into a concrete `Index`, is the
/// job of the command buffer (`cascada-core::cmd`), which is the only part of
/// the system that knows what "most recently appended" means across a
/// render's program order.
#[derive(Clone, Debug, PartialEq)]
pub enum Part {
    Field(String),
    Index(usize),
    /// `foo[]` — resolved to a concrete `Index` before reaching `Value`.
    LastIndex,
    ExprIndex(Box<Value>),
}

impl Part {
    pub fn field(name: impl Into<String>) -> Part {
        Part::Field(name.into())
    }
}

impl From<&str> for Part {
    fn from(v: &str) -> Self {
        Part::Field(v.to_owned())
    }
}

impl From<usize> for Part {
    fn from(v: usize) -> Self {
        Part::Index(v)
    }
}
