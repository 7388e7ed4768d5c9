//! Cascada: a dataflow-parallel template and scripting engine.
//!
//! This crate is the public entry point: it owns template source
//! acquisition ([`loader`]), compiled-program caching ([`resolver`]),
//! command handler lifecycle ([`handlers`]) and environment configuration
//! ([`environment`]). Everything about *how* a compiled program actually
//! runs — the scope tree, async closure accounting, sequence locks, the
//! command buffer, the guard engine — lives in `cascada-core`, which this
//! crate only drives.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use cascada::{Environment, MemoryLoader};
//!
//! # async fn run() -> cascada::Result<()> {
//! let loader = Arc::new(MemoryLoader::new());
//! loader.insert("greeting", "Hello, {{ name }}!");
//! let env = Environment::builder(loader).build();
//! let outcome = env.render("greeting", HashMap::from([("name".into(), "Ada".into())])).await?;
//! assert_eq!(outcome.text().as_deref(), Some("Hello, Ada!"));
//! # Ok(())
//! # }
//! ```

pub mod environment;
pub mod error;
pub mod handlers;
pub mod loader;
pub mod resolver;

pub use cascada_core::cmd::{DataHandler, Handler, TextHandler};
pub use cascada_core::rt::EvalFlags;
pub use cascada_core::RenderOutcome;
pub use cascada_value::Value;

pub use environment::{Environment, EnvironmentBuilder};
pub use error::{Error, Result};
pub use handlers::HandlerRegistration;
pub use loader::{FsLoader, Loader, MemoryLoader, Source};
pub use resolver::CachingResolver;
