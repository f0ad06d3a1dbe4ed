//! Command registry and dispatch.
//!
//! The route map is populated at startup and read-only once dispatching
//! begins. Every dispatch outcome, including permission denials and handler
//! failures, is rendered into a response script; nothing a handler returns
//! can abort the dispatching thread.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use crate::envelope::{ErrorCode, InvokeRequest, Response};
use crate::permissions::PermissionPolicy;

/// Message attached to denials, fixed as part of the wire contract.
pub const DENIED_MESSAGE: &str = "Command denied by permissions";

/// Message attached to unknown commands, fixed as part of the wire contract.
pub const NOT_FOUND_MESSAGE: &str = "Command not found";

/// What a handler reports on failure: a short error name plus detail. The
/// router folds both into the response message.
#[derive(Clone, Debug, PartialEq)]
pub struct HandlerError {
    pub name: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

/// Per-request view handed to handlers. Capability handlers use the policy
/// reference for their own scoping checks (path containment, program names).
pub struct RequestContext<'a> {
    pub cmd: &'a str,
    pub callback: u64,
    pub policy: &'a PermissionPolicy,
}

/// Shared fallible handler capability. References are assumed to outlive the
/// router.
pub type HandlerFn =
    Arc<dyn Fn(&RequestContext<'_>, Value) -> Result<Value, HandlerError> + Send + Sync>;

struct Route {
    handler: HandlerFn,
    permission_key: Option<String>,
}

/// Dispatch hooks, shared with the bridge worker so remote completions
/// observe the same callbacks as local ones. Hooks are plain synchronous
/// functions and must not block.
#[derive(Clone, Default)]
pub(crate) struct DispatchHooks {
    before: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    after: Option<Arc<dyn Fn(&str, bool) + Send + Sync>>,
}

impl DispatchHooks {
    pub(crate) fn fire_before(&self, cmd: &str) {
        if let Some(hook) = &self.before {
            hook(cmd);
        }
    }

    pub(crate) fn fire_after(&self, cmd: &str, success: bool) {
        if let Some(hook) = &self.after {
            hook(cmd, success);
        }
    }
}

/// Registry of command → handler routes.
#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Route>,
    hooks: DispatchHooks,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a route; the last registration for a command wins. Must only
    /// be called before the first dispatch.
    pub fn register(
        &mut self,
        cmd: impl Into<String>,
        handler: HandlerFn,
        permission_key: Option<String>,
    ) {
        self.routes.insert(
            cmd.into(),
            Route {
                handler,
                permission_key,
            },
        );
    }

    /// Whether an in-process route exists for `cmd`.
    pub fn has(&self, cmd: &str) -> bool {
        self.routes.contains_key(cmd)
    }

    pub fn on_before(&mut self, hook: impl Fn(&str) + Send + Sync + 'static) {
        self.hooks.before = Some(Arc::new(hook));
    }

    pub fn on_after(&mut self, hook: impl Fn(&str, bool) + Send + Sync + 'static) {
        self.hooks.after = Some(Arc::new(hook));
    }

    pub(crate) fn hooks(&self) -> DispatchHooks {
        self.hooks.clone()
    }

    /// Dispatches one request to its in-process handler and renders the
    /// response script. Permission denial, unknown command, and handler
    /// failure all produce error responses; none of them propagates.
    pub fn dispatch(&self, policy: &PermissionPolicy, request: &InvokeRequest) -> String {
        self.hooks.fire_before(&request.cmd);
        let response = self.dispatch_inner(policy, request);
        self.hooks.fire_after(&request.cmd, response.outcome.is_ok());
        response.into_script()
    }

    fn dispatch_inner(&self, policy: &PermissionPolicy, request: &InvokeRequest) -> Response {
        let Some(route) = self.routes.get(&request.cmd) else {
            return Response::failure(request.callback, ErrorCode::MethodNotFound, NOT_FOUND_MESSAGE);
        };

        if let Some(key) = &route.permission_key {
            if !policy.allows_route(key, &request.cmd) {
                return Response::failure(
                    request.callback,
                    ErrorCode::PermissionDenied,
                    DENIED_MESSAGE,
                );
            }
        }

        let context = RequestContext {
            cmd: &request.cmd,
            callback: request.callback,
            policy,
        };
        // Failure is modeled as `Result`, but a buggy handler may still
        // panic; that must not unwind into the webview's message callback.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            (route.handler)(&context, request.args.clone())
        }));
        match outcome {
            Ok(Ok(result)) => Response::success(request.callback, result),
            Ok(Err(error)) => Response::failure(
                request.callback,
                ErrorCode::InternalError,
                error.to_string(),
            ),
            Err(payload) => Response::failure(
                request.callback,
                ErrorCode::InternalError,
                panic_message(payload.as_ref()),
            ),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}

/// Renders a success response script without consulting the route map. Used
/// by the external bridge when a host reply arrives.
pub fn build_success_script(callback: u64, result: Value) -> String {
    Response::success(callback, result).into_script()
}

/// Renders an error response script without consulting the route map.
pub fn build_error_script(callback: u64, code: ErrorCode, message: impl Into<String>) -> String {
    Response::failure(callback, code, message).into_script()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn request(cmd: &str, callback: u64, args: Value) -> InvokeRequest {
        InvokeRequest {
            callback,
            cmd: cmd.to_string(),
            args,
        }
    }

    fn echo_handler() -> HandlerFn {
        Arc::new(|_, args| Ok(args))
    }

    #[test]
    fn has_reflects_registration() {
        let mut router = Router::new();
        assert!(!router.has("demo:echo"));
        router.register("demo:echo", echo_handler(), None);
        assert!(router.has("demo:echo"));
        assert!(!router.has("demo:other"));
    }

    #[test]
    fn last_registration_wins() {
        let mut router = Router::new();
        router.register("demo:value", Arc::new(|_, _| Ok(json!(1))), None);
        router.register("demo:value", Arc::new(|_, _| Ok(json!(2))), None);

        let script = router.dispatch(
            &PermissionPolicy::empty(),
            &request("demo:value", 1, Value::Null),
        );
        assert!(script.contains(r#""result":2"#), "{script}");
    }

    #[test]
    fn success_serializes_handler_result() {
        let mut router = Router::new();
        router.register("demo:echo", echo_handler(), None);

        let script = router.dispatch(
            &PermissionPolicy::empty(),
            &request("demo:echo", 5, json!({"x": 1})),
        );
        assert_eq!(
            script,
            r#"window.__silk && window.__silk.__dispatch({"kind":"response","callback":5,"ok":true,"result":{"x":1}});"#
        );
    }

    #[test]
    fn unknown_command_is_method_not_found() {
        let router = Router::new();
        let script = router.dispatch(
            &PermissionPolicy::empty(),
            &request("nope", 7, json!({})),
        );
        assert!(script.contains(r#""ok":false"#), "{script}");
        assert!(script.contains(r#""code":"METHOD_NOT_FOUND""#), "{script}");
        assert!(script.contains(r#""message":"Command not found""#), "{script}");
    }

    #[test]
    fn keyed_route_without_grant_is_denied() {
        let mut router = Router::new();
        router.register("fs:readText", echo_handler(), Some("fs".to_string()));

        let script = router.dispatch(
            &PermissionPolicy::empty(),
            &request("fs:readText", 2, Value::Null),
        );
        assert!(script.contains(r#""code":"PERMISSION_DENIED""#), "{script}");
        assert!(
            script.contains(r#""message":"Command denied by permissions""#),
            "{script}"
        );
    }

    #[test]
    fn keyless_route_is_always_allowed() {
        let mut router = Router::new();
        router.register("demo:echo", echo_handler(), None);

        let script = router.dispatch(
            &PermissionPolicy::empty(),
            &request("demo:echo", 3, json!("hi")),
        );
        assert!(script.contains(r#""ok":true"#), "{script}");
    }

    #[test]
    fn handler_failure_surfaces_its_name() {
        let mut router = Router::new();
        router.register(
            "demo:fail",
            Arc::new(|_, _| Err(HandlerError::new("MissingText", "text argument is required"))),
            None,
        );

        let script = router.dispatch(
            &PermissionPolicy::empty(),
            &request("demo:fail", 9, Value::Null),
        );
        assert!(script.contains(r#""code":"INTERNAL_ERROR""#), "{script}");
        assert!(script.contains("MissingText"), "{script}");
    }

    #[test]
    fn panicking_handler_becomes_an_error_response() {
        let mut router = Router::new();
        router.register(
            "demo:panic",
            Arc::new(|_, _| panic!("index out of range")),
            None,
        );
        router.register("demo:echo", echo_handler(), None);

        let policy = PermissionPolicy::empty();
        let script = router.dispatch(&policy, &request("demo:panic", 13, Value::Null));
        assert!(script.contains(r#""code":"INTERNAL_ERROR""#), "{script}");
        assert!(script.contains("handler panicked: index out of range"), "{script}");

        // The router stays usable after the unwind was contained.
        let script = router.dispatch(&policy, &request("demo:echo", 14, json!(true)));
        assert!(script.contains(r#""ok":true"#), "{script}");
    }

    #[test]
    fn context_exposes_cmd_callback_and_policy() {
        let mut router = Router::new();
        router.register(
            "demo:ctx",
            Arc::new(|ctx, _| {
                Ok(json!({
                    "cmd": ctx.cmd,
                    "callback": ctx.callback,
                    "scoped": !ctx.policy.allows_path(std::path::Path::new("/etc"), crate::permissions::PathAccess::Read),
                }))
            }),
            None,
        );

        let mut policy = PermissionPolicy::empty();
        policy.set_fs_read_roots(vec!["/srv/app".into()]);
        let script = router.dispatch(&policy, &request("demo:ctx", 11, Value::Null));
        assert!(script.contains(r#""cmd":"demo:ctx""#), "{script}");
        assert!(script.contains(r#""callback":11"#), "{script}");
        assert!(script.contains(r#""scoped":true"#), "{script}");
    }

    #[test]
    fn hooks_fire_on_every_outcome() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let completions = Arc::new(AtomicUsize::new(0));

        let mut router = Router::new();
        let before_log = seen.clone();
        router.on_before(move |cmd| before_log.lock().unwrap().push(cmd.to_string()));
        let after_count = completions.clone();
        router.on_after(move |_, success| {
            if !success {
                after_count.fetch_add(1, Ordering::SeqCst);
            }
        });
        router.register("demo:echo", echo_handler(), None);

        let policy = PermissionPolicy::empty();
        router.dispatch(&policy, &request("demo:echo", 1, Value::Null));
        router.dispatch(&policy, &request("unknown", 2, Value::Null));

        assert_eq!(*seen.lock().unwrap(), ["demo:echo", "unknown"]);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn script_helpers_match_dispatch_output() {
        assert_eq!(
            build_success_script(9, json!({"x": 1})),
            r#"window.__silk && window.__silk.__dispatch({"kind":"response","callback":9,"ok":true,"result":{"x":1}});"#
        );
        let script = build_error_script(9, ErrorCode::BridgeUnavailable, "host closed its output");
        assert!(script.contains(r#""code":"BRIDGE_UNAVAILABLE""#), "{script}");
    }
}
