//! Named in-process handlers invoked by `httpCallback` actions.

use crate::model::{HttpRequest, HttpResponse};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Produces a response for a matched request.
pub trait CallbackHandler: Send + Sync {
    fn handle(&self, request: &HttpRequest) -> Result<HttpResponse, String>;
}

impl<F> CallbackHandler for F
where
    F: Fn(&HttpRequest) -> Result<HttpResponse, String> + Send + Sync,
{
    fn handle(&self, request: &HttpRequest) -> Result<HttpResponse, String> {
        self(request)
    }
}

/// Handlers keyed by callback name. One registry per server instance.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn CallbackHandler>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same name.
    pub fn register(&self, name: impl Into<String>, handler: impl CallbackHandler + 'static) {
        let name = name.into();
        debug!("Registering callback '{}'", name);
        self.handlers.write().insert(name, Arc::new(handler));
    }

    /// Register a closure.
    pub fn register_fn<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, String> + Send + Sync + 'static,
    {
        self.register(name, handler);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CallbackHandler>> {
        self.handlers.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u16);

    impl CallbackHandler for Fixed {
        fn handle(&self, _: &HttpRequest) -> Result<HttpResponse, String> {
            Ok(HttpResponse::status(self.0))
        }
    }

    #[test]
    fn test_register_handler_type() {
        let registry = CallbackRegistry::new();
        registry.register("unavailable", Fixed(503));
        let response = registry.get("unavailable").unwrap().handle(&HttpRequest::get("/")).unwrap();
        assert_eq!(response.status_code, 503);
    }

    #[test]
    fn test_register_and_replace() {
        let registry = CallbackRegistry::new();
        registry.register_fn("echo", |req: &HttpRequest| Ok(HttpResponse::ok().with_body(req.path.clone())));
        registry.register_fn("teapot", |_: &HttpRequest| Ok(HttpResponse::status(418)));
        assert_eq!(registry.names(), vec!["echo", "teapot"]);

        let handler = registry.get("echo").unwrap();
        let response = handler.handle(&HttpRequest::get("/x")).unwrap();
        assert_eq!(response.body_bytes().as_ref(), b"/x");

        registry.register_fn("echo", |_: &HttpRequest| Err("down".to_string()));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("echo").unwrap().handle(&HttpRequest::get("/")).is_err());

        assert!(registry.unregister("teapot"));
        assert!(!registry.unregister("teapot"));
        assert!(registry.get("teapot").is_none());
    }
}
