#![forbid(unsafe_code)]
//! IPC core of the Silk desktop runtime.
//!
//! Silk hosts a native OS webview and mediates a typed request/response
//! channel between the page's scripting environment and a backend of
//! capability handlers. This crate is that channel: the envelope codec, the
//! permission engine, the command router, the reply pump that keeps script
//! evaluation off the webview's message callback, the injected bridge
//! script, and the external handler bridge that forwards unrecognized
//! commands to an out-of-process host.
//!
//! Window and webview creation stay with the embedding application. The
//! core consumes two capabilities through the [`UiWebview`] trait: a
//! `post_script` that the host guarantees runs on the UI thread, and a
//! `schedule_flush` that arranges one future [`Runtime::flush_replies`]
//! call there.
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use silk_runtime::{Runtime, UiWebview};
//!
//! struct HeadlessWebview;
//!
//! impl UiWebview for HeadlessWebview {
//!     fn post_script(&self, script: &str) {
//!         println!("evaluate: {script}");
//!     }
//!
//!     fn schedule_flush(&self) {
//!         // A real host posts a task to its UI event loop here.
//!     }
//! }
//!
//! # fn main() -> Result<(), silk_runtime::RuntimeError> {
//! let runtime = Runtime::builder()
//!     .register(
//!         "demo:echo",
//!         Arc::new(|_ctx, args| Ok(args)),
//!         None,
//!     )
//!     .build(Arc::new(HeadlessWebview))?;
//!
//! runtime.handle_webview_message(
//!     &json!({"kind": "invoke", "callback": 1, "cmd": "demo:echo", "args": {"x": 1}}).to_string(),
//! );
//! runtime.flush_replies();
//! # Ok(()) }
//! ```
//!
//! Handlers run synchronously on the UI thread; responses are queued and
//! evaluated later, in FIFO order, from a flush the host schedules. Commands
//! without an in-process route go to the Mode-A host process when one is
//! configured (`mode_a` block, see [`RuntimeConfig`]), whose replies
//! interleave with local ones in enqueue order.

mod bridge_script;
mod builtin;
mod config;
mod envelope;
mod error;
mod host_bridge;
mod module;
mod permissions;
mod pump;
mod router;
mod runtime;

pub use bridge_script::{BRIDGE_SCRIPT, MAX_PENDING_INVOKES};
pub use config::{FsScopeConfig, ModeAConfig, PermissionsConfig, RuntimeConfig, ShellScopeConfig};
pub use envelope::{
    parse_invoke, parse_response, serialize_invoke, EnvelopeError, ErrorCode, InvokeRequest,
    Response, ResponseError, DISPATCH_PREFIX, DISPATCH_SUFFIX, MAX_CALLBACK,
};
pub use error::RuntimeError;
pub use host_bridge::MAX_REPLY_LINE_BYTES;
pub use module::{ModuleHost, NoopModule, SilkModule};
pub use permissions::{
    PathAccess, PermissionPolicy, BASELINE_ALLOW_COMMANDS, BASELINE_NAMESPACES,
};
pub use pump::{ReplyPump, UiWebview, MAX_QUEUED_REPLIES};
pub use router::{
    build_error_script, build_success_script, HandlerError, HandlerFn, RequestContext, Router,
    DENIED_MESSAGE, NOT_FOUND_MESSAGE,
};
pub use runtime::{AppInfo, Runtime, RuntimeBuilder};
