//! In-process user module registration ("Mode B").
//!
//! An embedding application contributes handlers by implementing
//! [`SilkModule`]; the trait bound is the compile-time signature check, and
//! [`ModuleHost`] is the only surface a module sees. A module cannot touch
//! permission keys, hooks, or the route map beyond plain registration.

use crate::router::{HandlerFn, Router};

/// Entry point an external module implements to register handlers.
pub trait SilkModule {
    fn register(host: &mut ModuleHost<'_>);
}

/// Thin adapter over the router's `register`. Routes registered here carry
/// no permission key and are therefore always allowed.
pub struct ModuleHost<'a> {
    router: &'a mut Router,
}

impl<'a> ModuleHost<'a> {
    pub(crate) fn new(router: &'a mut Router) -> Self {
        Self { router }
    }

    pub fn register(&mut self, cmd: impl Into<String>, handler: HandlerFn) {
        self.router.register(cmd, handler, None);
    }
}

/// Default stub module: registers nothing.
pub struct NoopModule;

impl SilkModule for NoopModule {
    fn register(_host: &mut ModuleHost<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    struct CounterModule;

    impl SilkModule for CounterModule {
        fn register(host: &mut ModuleHost<'_>) {
            host.register("user:double", Arc::new(|_, args| {
                let n = args.as_i64().unwrap_or(0);
                Ok(json!(n * 2))
            }));
        }
    }

    #[test]
    fn module_routes_land_in_the_router() {
        let mut router = Router::new();
        CounterModule::register(&mut ModuleHost::new(&mut router));
        assert!(router.has("user:double"));
    }

    #[test]
    fn noop_module_registers_nothing() {
        let mut router = Router::new();
        NoopModule::register(&mut ModuleHost::new(&mut router));
        assert!(!router.has("user:double"));
    }
}
