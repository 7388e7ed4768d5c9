use crate::error::AnnotatedError;
use std::fmt;

/// A value that carries one or more errors instead of a result.
///
/// Poison never aborts evaluation by itself: operators and built-ins return it
/// as an ordinary [`crate::Value`] so that independent siblings can still run
/// to completion and contribute their own errors. `errors` is always
/// non-empty and deduplicated by the identity of the underlying
/// [`crate::Error`] (see [`AnnotatedError::identity`]), never by message text,
/// so the same failure surfacing through two different paths collapses to one
/// entry while two distinct failures with the same message do not.
#[derive(Clone, Debug)]
pub struct Poison {
    errors: Vec<AnnotatedError>,
}

impl Poison {
    pub fn new(error: AnnotatedError) -> Self {
        Poison { errors: vec![error] }
    }

    pub fn from_errors(errors: Vec<AnnotatedError>) -> Self {
        debug_assert!(!errors.is_empty(), "a Poison must carry at least one error");
        Poison { errors }
    }

    pub fn errors(&self) -> &[AnnotatedError] {
        &self.errors
    }

    /// Joins two poisons, keeping program order and deduplicating by error
    /// identity. Used whenever an operation has more than one poisoned
    /// operand (`a + b` where both `a` and `b` are poison, for example).
    pub fn join(mut self, other: Poison) -> Poison {
        for e in other.errors {
            if !self.errors.iter().any(|existing| existing.identity() == e.identity()) {
                self.errors.push(e);
            }
        }
        self
    }

    pub fn push(&mut self, error: AnnotatedError) {
        if !self.errors.iter().any(|existing| existing.identity() == error.identity()) {
            self.errors.push(error);
        }
    }
}

impl fmt::Display for Poison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}
