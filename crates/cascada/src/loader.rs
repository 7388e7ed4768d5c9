//! Template source loaders.
//!
//! A [`Loader`] turns a template name into source text. The trait is async
//! the way the teacher's transport implementations are (`client/src/protocol/
//! http/native.rs`, `client/src/protocol/ws/native.rs`) because a loader may
//! genuinely hit a filesystem or network, and `async_trait` is the same
//! crate the teacher reaches for at that boundary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

/// Source text for one resolved template name, plus the path it actually
/// came from (used for error position reporting) and whether it should
/// bypass the resolver's compiled-program cache.
#[derive(Clone, Debug)]
pub struct Source {
    pub src: String,
    pub path: String,
    pub no_cache: bool,
}

impl Source {
    pub fn new(src: impl Into<String>, path: impl Into<String>) -> Source {
        Source { src: src.into(), path: path.into(), no_cache: false }
    }

    pub fn uncached(mut self) -> Source {
        self.no_cache = true;
        self
    }
}

/// Resolves a template name to source text.
///
/// `resolve` reinterprets a name relative to the template that referenced it
/// (`{% include %}`/`{% extends %}`/`{% import %}` all pass the including
/// template's own name as `from`); loaders with a flat namespace can ignore
/// `from` and return `name` unchanged.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn get_source(&self, name: &str) -> Option<Source>;

    fn resolve(&self, from: Option<&str>, name: &str) -> String {
        let _ = from;
        name.to_string()
    }
}

/// Loads templates from a directory on disk, one file per name.
pub struct FsLoader {
    root: PathBuf,
    ext: String,
}

impl FsLoader {
    pub fn new(root: impl Into<PathBuf>) -> FsLoader {
        FsLoader { root: root.into(), ext: "cascada".to_string() }
    }

    pub fn with_extension(mut self, ext: impl Into<String>) -> FsLoader {
        self.ext = ext.into();
        self
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let mut path = self.root.join(name);
        if path.extension().is_none() {
            path.set_extension(&self.ext);
        }
        path
    }
}

#[async_trait]
impl Loader for FsLoader {
    async fn get_source(&self, name: &str) -> Option<Source> {
        let path = self.path_for(name);
        let src = tokio::fs::read_to_string(&path).await.ok()?;
        Some(Source::new(src, path.to_string_lossy().into_owned()))
    }

    fn resolve(&self, from: Option<&str>, name: &str) -> String {
        match from {
            Some(from) if name.starts_with("./") || name.starts_with("../") => {
                let base = Path::new(from).parent().unwrap_or_else(|| Path::new(""));
                base.join(name).to_string_lossy().into_owned()
            }
            _ => name.to_string(),
        }
    }
}

/// Loads templates from an in-memory map, registered up front — used for
/// tests and for hosts that already hold template source in some other
/// store.
#[derive(Default)]
pub struct MemoryLoader {
    templates: RwLock<HashMap<String, String>>,
}

impl MemoryLoader {
    pub fn new() -> MemoryLoader {
        MemoryLoader::default()
    }

    pub fn insert(&self, name: impl Into<String>, src: impl Into<String>) -> &Self {
        self.templates.write().insert(name.into(), src.into());
        self
    }
}

#[async_trait]
impl Loader for MemoryLoader {
    async fn get_source(&self, name: &str) -> Option<Source> {
        let src = self.templates.read().get(name).cloned()?;
        Some(Source::new(src, name.to_string()))
    }
}

pub(crate) type SharedLoader = Arc<dyn Loader>;
