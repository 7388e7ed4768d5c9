use std::fmt;
use std::sync::Arc;

/// An error produced by value-level operations.
///
/// These are the building blocks that poison values carry. `Error` is cheap to
/// clone (it is always stored behind an [`Arc`] once it enters a [`crate::Poison`])
/// so that the same underlying failure can be shared by many dependents without
/// re-allocating the message.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("division by zero")]
    DivideByZero,
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },
    #[error("cannot merge a non-object value")]
    InvalidMerge,
    #[error("index {0} out of range")]
    IndexOutOfRange(i64),
    #[error("{0}")]
    Custom(String),
    #[error("{message}")]
    Host {
        message: String,
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Error::Custom(msg.into())
    }

    pub fn host(msg: impl Into<String>) -> Self {
        Error::Host { message: msg.into(), source: None }
    }
}

/// A single error, annotated with the template path and position it occurred
/// at when that information is available. This is what actually ends up
/// inside a [`crate::Poison`]'s error list.
#[derive(Clone, Debug)]
pub struct AnnotatedError {
    pub error: Arc<Error>,
    pub path: Option<Arc<str>>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl AnnotatedError {
    pub fn new(error: Error) -> Self {
        AnnotatedError { error: Arc::new(error), path: None, line: None, column: None }
    }

    pub fn at(mut self, path: impl Into<Arc<str>>, line: u32, column: u32) -> Self {
        self.path = Some(path.into());
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// Identity used for deduplication inside a [`crate::Poison`] — the same
    /// underlying error reaching the same poison twice (for example via two
    /// siblings reading one poisoned variable) must not be recorded twice.
    pub fn identity(&self) -> *const Error {
        Arc::as_ptr(&self.error)
    }
}

impl fmt::Display for AnnotatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.path, self.line, self.column) {
            (Some(p), Some(l), Some(c)) => write!(f, "{p}:{l}:{c}: {}", self.error),
            _ => write!(f, "{}", self.error),
        }
    }
}

impl From<Error> for AnnotatedError {
    fn from(error: Error) -> Self {
        AnnotatedError::new(error)
    }
}
