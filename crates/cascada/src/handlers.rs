//! Command handler registration.
//!
//! A handler is registered either as a singleton (the same instance, and
//! therefore the same state, is reused across every render) or as a
//! factory (a fresh instance is constructed for each render, the way the
//! built-in `data`/`text` handlers already work per-render in
//! `cascada-core`). Both end up as an `Arc<dyn cascada_core::cmd::Handler>`
//! handed to `RenderRequest::handlers` just before a render starts.

use std::sync::Arc;

use cascada_core::cmd::Handler;

/// Either a reused singleton or a constructor invoked fresh per render.
pub enum HandlerRegistration {
    Singleton(Arc<dyn Handler>),
    Factory(Arc<dyn Fn() -> Arc<dyn Handler> + Send + Sync>),
}

impl HandlerRegistration {
    pub fn singleton(handler: Arc<dyn Handler>) -> HandlerRegistration {
        HandlerRegistration::Singleton(handler)
    }

    pub fn factory<F>(make: F) -> HandlerRegistration
    where
        F: Fn() -> Arc<dyn Handler> + Send + Sync + 'static,
    {
        HandlerRegistration::Factory(Arc::new(make))
    }

    /// The handler instance this render should use — the singleton itself,
    /// or a fresh instance from the factory.
    pub fn instance(&self) -> Arc<dyn Handler> {
        match self {
            HandlerRegistration::Singleton(h) => h.clone(),
            HandlerRegistration::Factory(make) => make(),
        }
    }
}
