#![forbid(unsafe_code)]
//! Handler host SDK for Silk's external handler bridge ("Mode A").
//!
//! The Silk runtime forwards commands it cannot serve in-process to a host
//! process over newline-delimited JSON: one invoke envelope per stdin line,
//! one `{"ok":true,"result":...}` or `{"ok":false,"error":"..."}` reply per
//! stdout line, strictly in order. This crate is the host's side of that
//! conversation: register handlers on a [`HostApp`] and let [`HostApp::run`]
//! own the line loop.
//!
//! ```no_run
//! use silk_host::HostApp;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> std::io::Result<()> {
//!     let mut app = HostApp::new();
//!     app.register("ts:echo", |args| Ok(args));
//!     app.run().await
//! }
//! ```

use std::collections::HashMap;
use std::io;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

/// A host-side command handler: arguments in, JSON result or error text out.
pub type HostHandler = Box<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Registry of host-served commands plus the stdio line loop.
#[derive(Default)]
pub struct HostApp {
    handlers: HashMap<String, HostHandler>,
}

impl HostApp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler; the last registration for a command wins.
    pub fn register(
        &mut self,
        cmd: impl Into<String>,
        handler: impl Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    ) {
        self.handlers.insert(cmd.into(), Box::new(handler));
    }

    /// Serves requests from stdin until it closes, writing one reply line
    /// per request to stdout. Lines that are not invoke envelopes cannot be
    /// answered (no trustworthy correlator) and are logged and skipped.
    pub async fn run(self) -> io::Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        let mut lines = stdin.lines();

        while let Some(line) = lines.next_line().await? {
            let Some(reply) = self.handle_line(&line) else {
                continue;
            };
            stdout.write_all(reply.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok(())
    }

    /// Processes one request line into one reply line. `None` means the line
    /// was blank or malformed and must not be answered.
    pub fn handle_line(&self, line: &str) -> Option<String> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            return None;
        }

        let envelope: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "skipping malformed request line");
                return None;
            }
        };
        if envelope.get("kind").and_then(Value::as_str) != Some("invoke") {
            warn!("skipping request line without invoke kind");
            return None;
        }
        let Some(cmd) = envelope.get("cmd").and_then(Value::as_str) else {
            warn!("skipping request line without cmd");
            return None;
        };
        let args = envelope.get("args").cloned().unwrap_or(Value::Null);

        let outcome = match self.handlers.get(cmd) {
            Some(handler) => handler(args),
            None => Err(format!("no host handler for `{cmd}`")),
        };
        Some(reply_line(outcome))
    }
}

fn reply_line(outcome: Result<Value, String>) -> String {
    let mut body = serde_json::Map::new();
    match outcome {
        Ok(result) => {
            body.insert("ok".into(), Value::from(true));
            body.insert("result".into(), result);
        }
        Err(message) => {
            body.insert("ok".into(), Value::from(false));
            body.insert("error".into(), Value::from(message));
        }
    }
    serde_json::to_string(&Value::Object(body)).unwrap_or_else(|_| r#"{"ok":false}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_app() -> HostApp {
        let mut app = HostApp::new();
        app.register("ts:echo", Ok);
        app.register("ts:fail", |_| {
            Err("MissingText: text argument is required".to_string())
        });
        app
    }

    #[test]
    fn echo_replies_with_the_arguments() {
        let app = echo_app();
        let reply = app
            .handle_line(r#"{"kind":"invoke","callback":9,"cmd":"ts:echo","args":{"x":1}}"#)
            .unwrap();
        assert_eq!(reply, r#"{"ok":true,"result":{"x":1}}"#);
    }

    #[test]
    fn handler_error_becomes_an_error_reply() {
        let app = echo_app();
        let reply = app
            .handle_line(r#"{"kind":"invoke","callback":1,"cmd":"ts:fail","args":null}"#)
            .unwrap();
        assert_eq!(
            reply,
            r#"{"ok":false,"error":"MissingText: text argument is required"}"#
        );
    }

    #[test]
    fn unknown_command_is_an_error_reply() {
        let app = echo_app();
        let reply = app
            .handle_line(r#"{"kind":"invoke","callback":1,"cmd":"ts:missing"}"#)
            .unwrap();
        assert!(reply.contains(r#""ok":false"#), "{reply}");
        assert!(reply.contains("ts:missing"), "{reply}");
    }

    #[test]
    fn missing_args_materialize_as_null() {
        let app = echo_app();
        let reply = app
            .handle_line(r#"{"kind":"invoke","callback":2,"cmd":"ts:echo"}"#)
            .unwrap();
        assert_eq!(reply, r#"{"ok":true,"result":null}"#);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let app = echo_app();
        assert_eq!(app.handle_line(""), None);
        assert_eq!(app.handle_line("   "), None);
        assert_eq!(app.handle_line("not json"), None);
        assert_eq!(app.handle_line(r#"{"kind":"response","callback":1}"#), None);
        assert_eq!(app.handle_line(r#"{"kind":"invoke","callback":1}"#), None);
    }

    #[test]
    fn last_registration_wins() {
        let mut app = HostApp::new();
        app.register("ts:value", |_| Ok(json!(1)));
        app.register("ts:value", |_| Ok(json!(2)));
        let reply = app
            .handle_line(r#"{"kind":"invoke","callback":1,"cmd":"ts:value"}"#)
            .unwrap();
        assert_eq!(reply, r#"{"ok":true,"result":2}"#);
    }
}
