//! The assembled runtime: one value owning the router, the policy, the reply
//! pump, and the optional external handler bridge.
//!
//! The native layer threads this value to its callbacks; there is no module
//! global. [`Runtime::handle_webview_message`] is the UI-thread entry point
//! the webview's script-message callback calls, and
//! [`Runtime::flush_replies`] is what the host runs on the UI thread after
//! [`UiWebview::schedule_flush`] fires.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::builtin;
use crate::config::RuntimeConfig;
use crate::envelope::{self, ErrorCode};
use crate::error::RuntimeError;
use crate::host_bridge::HostBridge;
use crate::module::{ModuleHost, SilkModule};
use crate::permissions::PermissionPolicy;
use crate::pump::{ReplyPump, UiWebview};
use crate::router::{build_error_script, HandlerFn, Router, DENIED_MESSAGE, NOT_FOUND_MESSAGE};

/// Identity reported by the `silk:appInfo` route.
#[derive(Clone, Debug, PartialEq)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            name: "silk".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The IPC core, constructed once at startup via [`Runtime::builder`].
pub struct Runtime {
    router: Router,
    policy: PermissionPolicy,
    pump: Arc<ReplyPump>,
    webview: Arc<dyn UiWebview>,
    bridge: Option<HostBridge>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// UI-thread entry point for one raw webview message.
    ///
    /// Parse failures are logged and dropped; without a parsed envelope no
    /// callback identifier is trustworthy, so no reply is possible. Every
    /// parsed request yields exactly one enqueued response.
    pub fn handle_webview_message(&self, raw: &str) {
        let request = match envelope::parse_invoke(raw) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "dropping malformed webview message");
                return;
            }
        };

        if self.router.has(&request.cmd) {
            let script = self.router.dispatch(&self.policy, &request);
            self.pump.enqueue(script, self.webview.as_ref());
            return;
        }

        let hooks = self.router.hooks();
        match &self.bridge {
            Some(bridge) => {
                if self.policy.allows(&request.cmd) {
                    debug!(cmd = %request.cmd, "forwarding to external handler host");
                    hooks.fire_before(&request.cmd);
                    bridge.submit(request);
                } else {
                    hooks.fire_before(&request.cmd);
                    let script = build_error_script(
                        request.callback,
                        ErrorCode::PermissionDenied,
                        DENIED_MESSAGE,
                    );
                    self.pump.enqueue(script, self.webview.as_ref());
                    hooks.fire_after(&request.cmd, false);
                }
            }
            None => {
                hooks.fire_before(&request.cmd);
                let script = build_error_script(
                    request.callback,
                    ErrorCode::MethodNotFound,
                    NOT_FOUND_MESSAGE,
                );
                self.pump.enqueue(script, self.webview.as_ref());
                hooks.fire_after(&request.cmd, false);
            }
        }
    }

    /// Drains the reply queue. The host must call this on the UI thread, once
    /// per [`UiWebview::schedule_flush`].
    pub fn flush_replies(&self) {
        self.pump.flush(self.webview.as_ref());
    }

    /// Whether an in-process route exists. Exposed for embedders that decide
    /// between local features and host capabilities up front.
    pub fn has_route(&self, cmd: &str) -> bool {
        self.router.has(cmd)
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    /// Stops the bridge worker, killing the host process and abandoning any
    /// in-flight reply.
    pub fn shutdown(&mut self) {
        if let Some(mut bridge) = self.bridge.take() {
            bridge.shutdown();
        }
    }
}

/// Startup-time assembly of a [`Runtime`]. Routes, hooks, policy, and bridge
/// settings are all fixed before the first dispatch.
pub struct RuntimeBuilder {
    router: Router,
    policy: PermissionPolicy,
    app_info: AppInfo,
    bridge_argv: Option<Vec<String>>,
}

impl RuntimeBuilder {
    fn new() -> Self {
        Self {
            router: Router::new(),
            policy: PermissionPolicy::baseline(),
            app_info: AppInfo::default(),
            bridge_argv: None,
        }
    }

    /// Applies a parsed configuration document: permission policy and Mode-A
    /// bridge settings.
    pub fn config(mut self, config: &RuntimeConfig) -> Self {
        if let Some(permissions) = &config.permissions {
            self.policy = PermissionPolicy::from_config(permissions);
        }
        if config.mode_a.enabled {
            self.bridge_argv = Some(config.mode_a.argv.clone());
        }
        self
    }

    pub fn policy(mut self, policy: PermissionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn app_info(mut self, app_info: AppInfo) -> Self {
        self.app_info = app_info;
        self
    }

    /// Enables the external handler bridge with the given command vector.
    pub fn host_bridge(mut self, argv: Vec<String>) -> Self {
        self.bridge_argv = Some(argv);
        self
    }

    /// Registers a capability route. Plugins call this with their permission
    /// key; keyless routes are always allowed.
    pub fn register(
        mut self,
        cmd: impl Into<String>,
        handler: HandlerFn,
        permission_key: Option<String>,
    ) -> Self {
        self.router.register(cmd, handler, permission_key);
        self
    }

    /// Applies an in-process user module ("Mode B").
    pub fn module<M: SilkModule>(mut self) -> Self {
        M::register(&mut ModuleHost::new(&mut self.router));
        self
    }

    pub fn on_before(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.router.on_before(hook);
        self
    }

    pub fn on_after(mut self, hook: impl Fn(&str, bool) + Send + Sync + 'static) -> Self {
        self.router.on_after(hook);
        self
    }

    /// Finishes assembly, registering the built-in routes and starting the
    /// bridge worker when Mode A is enabled.
    pub fn build(mut self, webview: Arc<dyn UiWebview>) -> Result<Runtime, RuntimeError> {
        builtin::register(&mut self.router, &self.app_info);

        let pump = Arc::new(ReplyPump::new());
        let bridge = match self.bridge_argv {
            Some(argv) => Some(HostBridge::spawn(
                argv,
                pump.clone(),
                webview.clone(),
                self.router.hooks(),
            )?),
            None => None,
        };

        Ok(Runtime {
            router: self.router,
            policy: self.policy,
            pump,
            webview,
            bridge,
        })
    }
}
