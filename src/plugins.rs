use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;
use tracing::warn;

use crate::http::HttpError;
use crate::models::{HttpRequest, HttpResponse, QueryContext, Resources};

/// Per-request context a plugin may augment in `before_request` and read
/// back in `after_request`.
#[derive(Debug, Clone, Default)]
pub struct HookContext(HashMap<String, Value>);

impl HookContext {
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Hook surface invoked by the engine around query and request execution.
///
/// Hooks are side-effect-only: their outcome never changes the query
/// result, and a panicking hook is caught and logged.
pub trait LifecycleHooks: Send + Sync {
    fn before_query(&self, _query: &str, _ctx: &QueryContext) {}

    fn after_query(&self, _query: &str, _resources: &Resources) {}

    fn before_request(&self, _ctx: &mut HookContext, _request: &HttpRequest) {}

    fn after_request(
        &self,
        _ctx: &HookContext,
        _request: &HttpRequest,
        _response: &HttpResponse,
        _error: Option<&HttpError>,
    ) {
    }
}

/// Dispatches lifecycle hooks to every registered plugin, isolating each
/// invocation so a misbehaving plugin cannot abort the query.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn LifecycleHooks>>,
}

impl PluginRegistry {
    pub fn new(plugins: Vec<Box<dyn LifecycleHooks>>) -> Self {
        PluginRegistry { plugins }
    }

    pub fn run_before_query(&self, query: &str, ctx: &QueryContext) {
        for plugin in &self.plugins {
            guarded("before_query", || plugin.before_query(query, ctx));
        }
    }

    pub fn run_after_query(&self, query: &str, resources: &Resources) {
        for plugin in &self.plugins {
            guarded("after_query", || plugin.after_query(query, resources));
        }
    }

    pub fn run_before_request(&self, request: &HttpRequest) -> HookContext {
        let mut ctx = HookContext::default();
        for plugin in &self.plugins {
            guarded("before_request", || {
                plugin.before_request(&mut ctx, request)
            });
        }
        ctx
    }

    pub fn run_after_request(
        &self,
        ctx: &HookContext,
        request: &HttpRequest,
        response: &HttpResponse,
        error: Option<&HttpError>,
    ) {
        for plugin in &self.plugins {
            guarded("after_request", || {
                plugin.after_request(ctx, request, response, error)
            });
        }
    }
}

fn guarded(hook: &str, call: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(call)).is_err() {
        warn!(hook, "plugin hook panicked, ignoring");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct PanickingPlugin;

    impl LifecycleHooks for PanickingPlugin {
        fn before_query(&self, _query: &str, _ctx: &QueryContext) {
            panic!("boom");
        }
    }

    struct CountingPlugin {
        calls: Arc<AtomicUsize>,
    }

    impl LifecycleHooks for CountingPlugin {
        fn before_query(&self, _query: &str, _ctx: &QueryContext) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn panicking_plugin_does_not_stop_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = PluginRegistry::new(vec![
            Box::new(PanickingPlugin),
            Box::new(CountingPlugin {
                calls: calls.clone(),
            }),
        ]);

        registry.run_before_query("from hero", &QueryContext::default());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn before_request_collects_context_augmentations() {
        struct TaggingPlugin;

        impl LifecycleHooks for TaggingPlugin {
            fn before_request(&self, ctx: &mut HookContext, _request: &HttpRequest) {
                ctx.set("trace-id", Value::String("abc123".to_string()));
            }
        }

        let registry = PluginRegistry::new(vec![Box::new(TaggingPlugin)]);
        let ctx = registry.run_before_request(&HttpRequest::default());

        assert_eq!(ctx.get("trace-id"), Some(&Value::String("abc123".into())));
    }
}
