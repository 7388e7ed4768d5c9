//! The environment: the process-wide registry of globals, filters, tests,
//! functions and command handlers a render draws on.
//!
//! Configuration happens through [`EnvironmentBuilder`] and is frozen into
//! an immutable [`Environment`] by [`EnvironmentBuilder::build`] — the same
//! shape the teacher's `Datastore` takes (`with_strict_mode`, `with_capabilities`,
//! ... in `core/src/kvs/ds.rs`, culminating in a value no render-time code
//! path can mutate). This is what makes the "configured once, read-only
//! during every render that shares it" rule enforceable
//! rather than just documented.

use std::collections::HashMap;
use std::sync::Arc;

use cascada_ast::{parse_script, parse_template};
use cascada_core::cmd::Handler;
use cascada_core::render::{render, RenderOutcome, RenderRequest};
use cascada_core::rt::{EvalFlags, Globals, HostFn};
use cascada_core::Error as CoreError;
use cascada_expr::{compile, ir};
use cascada_value::Value;

use crate::error::{Error, Result};
use crate::handlers::HandlerRegistration;
use crate::loader::Loader;
use crate::resolver::CachingResolver;

/// Builds an [`Environment`]. Every registration method takes and returns
/// `self` by value so configuration reads as a single chained expression;
/// nothing about it is reachable once [`build`](EnvironmentBuilder::build)
/// has produced the frozen `Environment`.
pub struct EnvironmentBuilder {
    loader: Arc<dyn Loader>,
    flags: EvalFlags,
    values: HashMap<String, Value>,
    filters: HashMap<String, Arc<dyn HostFn>>,
    tests: HashMap<String, Arc<dyn HostFn>>,
    functions: HashMap<String, Arc<dyn HostFn>>,
    handlers: HashMap<String, HandlerRegistration>,
}

impl EnvironmentBuilder {
    pub fn new(loader: Arc<dyn Loader>) -> EnvironmentBuilder {
        EnvironmentBuilder {
            loader,
            flags: EvalFlags::default(),
            values: HashMap::new(),
            filters: HashMap::new(),
            tests: HashMap::new(),
            functions: HashMap::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn with_flags(mut self, flags: EvalFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_autoescape(mut self, autoescape: bool) -> Self {
        self.flags.autoescape = autoescape;
        self
    }

    pub fn with_throw_on_undefined(mut self, throw: bool) -> Self {
        self.flags.throw_on_undefined = throw;
        self
    }

    pub fn with_dev(mut self, dev: bool) -> Self {
        self.flags.dev = dev;
        self
    }

    /// Registers a global value, visible to every template rendered from
    /// this environment under `name` unless a given render's context
    /// provides its own value of the same name.
    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn with_filter<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(f));
        self
    }

    pub fn with_test<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.tests.insert(name.into(), Arc::new(f));
        self
    }

    pub fn with_function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    /// Registers a singleton command handler — one instance, and therefore one piece of
    /// state, shared by every render from this environment.
    pub fn with_command_handler(mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(name.into(), HandlerRegistration::singleton(handler));
        self
    }

    /// Registers a factory command handler — a fresh instance per render.
    pub fn with_command_handler_factory<F>(mut self, name: impl Into<String>, make: F) -> Self
    where
        F: Fn() -> Arc<dyn Handler> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), HandlerRegistration::factory(make));
        self
    }

    pub fn build(self) -> Environment {
        Environment {
            resolver: Arc::new(CachingResolver::new(self.loader)),
            globals: Arc::new(Globals {
                values: self.values,
                filters: self.filters,
                tests: self.tests,
                functions: self.functions,
            }),
            flags: self.flags,
            handlers: Arc::new(self.handlers),
        }
    }
}

/// A configured, immutable rendering environment.
///
/// Cheap to clone and share: every field is behind an `Arc`, so handing the
/// same `Environment` to many concurrent renders never contends beyond the
/// per-render state each render owns exclusively.
#[derive(Clone)]
pub struct Environment {
    resolver: Arc<CachingResolver>,
    globals: Arc<Globals>,
    flags: EvalFlags,
    handlers: Arc<HashMap<String, HandlerRegistration>>,
}

impl Environment {
    pub fn builder(loader: Arc<dyn Loader>) -> EnvironmentBuilder {
        EnvironmentBuilder::new(loader)
    }

    /// Forces `name` and everything it statically includes/extends/imports
    /// to be loaded and compiled now, instead of lazily on first `render`.
    pub async fn preload(&self, name: &str) -> Result<()> {
        self.resolver.preload(name).await.map_err(Error::from)?;
        Ok(())
    }

    pub fn invalidate(&self, name: &str) {
        self.resolver.invalidate(name);
    }

    pub fn invalidate_all(&self) {
        self.resolver.invalidate_all();
    }

    /// Renders the named template").
    pub async fn render(&self, name: &str, ctx: HashMap<String, Value>) -> Result<RenderOutcome> {
        let program = self.resolver.preload(name).await.map_err(Error::from)?;
        self.run(&program, ctx).await
    }

    /// Parses and renders `src` directly, without going through the loader
    /// for the top-level template itself — any `include`/`extends`/`import`
    /// it contains is still resolved through the environment's loader
    ///").
    pub async fn render_string(&self, src: &str, ctx: HashMap<String, Value>) -> Result<RenderOutcome> {
        let template = parse_template(src).map_err(CoreError::Syntax).map_err(Error::from)?;
        let program = compile(template).map_err(CoreError::Compile).map_err(Error::from)?;
        self.resolver.preload_program(&program).await.map_err(Error::from)?;
        self.run(&program, ctx).await
    }

    /// Transpiles the line-oriented script syntax and renders it
    ///", §4.11).
    pub async fn render_script(&self, src: &str, ctx: HashMap<String, Value>) -> Result<RenderOutcome> {
        let template = parse_script(src).map_err(CoreError::Syntax).map_err(Error::from)?;
        let program = compile(template).map_err(CoreError::Compile).map_err(Error::from)?;
        self.resolver.preload_program(&program).await.map_err(Error::from)?;
        self.run(&program, ctx).await
    }

    async fn run(&self, program: &ir::Program, ctx: HashMap<String, Value>) -> Result<RenderOutcome> {
        let mut values = self.globals.values.clone();
        values.extend(ctx);

        let request = RenderRequest {
            globals: Arc::new(Globals {
                values,
                filters: self.globals.filters.clone(),
                tests: self.globals.tests.clone(),
                functions: self.globals.functions.clone(),
            }),
            flags: self.flags,
            resolver: Some(self.resolver.clone()),
            handlers: self.handlers.iter().map(|(name, reg)| (name.clone(), reg.instance())).collect(),
        };

        render(program, request).await.map_err(Error::from)
    }
}
