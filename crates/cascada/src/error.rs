//! The crate's public error surface.
//!
//! Wraps `cascada-core`'s `Error` (syntax/compile/load/invariant failures,
//! all fatal) and adds the one failure mode that only exists once a render
//! actually ran: the aggregated [`cascada_value::Poison`] a render collects
//! and surfaces as a single user-visible error (§7 "User-visible failure").

use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] cascada_core::Error),
    #[error("render failed:\n{0}")]
    Render(#[from] cascada_value::Poison),
}

pub type Result<T> = std::result::Result<T, Error>;
