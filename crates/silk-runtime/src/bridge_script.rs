//! The webview-side IPC client, injected at document start.
//!
//! The script is self-contained and idempotent: the first evaluation
//! publishes `window.__silk`, later evaluations return immediately. Keep the
//! constants below in sync with [`crate::envelope`]; the runtime addresses
//! the client exclusively through `window.__silk.__dispatch`.

/// Upper bound on in-flight invocations in the webview. Further calls reject
/// immediately instead of growing the pending map.
pub const MAX_PENDING_INVOKES: usize = 1024;

/// Source injected into every document before any application script runs.
pub const BRIDGE_SCRIPT: &str = r#"(function () {
  "use strict";
  if (window.__silk) {
    return;
  }

  var MAX_PENDING = 1024;
  var nextCallback = 1;
  var pendingCount = 0;
  var pending = {};
  var listeners = {};

  function findTransport() {
    if (window.webkit && window.webkit.messageHandlers) {
      var handlers = window.webkit.messageHandlers;
      if (handlers.silk) {
        return function (raw) { handlers.silk.postMessage(raw); };
      }
      if (handlers.silk_ipc) {
        return function (raw) { handlers.silk_ipc.postMessage(raw); };
      }
    }
    if (window.chrome && window.chrome.webview && window.chrome.webview.postMessage) {
      return function (raw) { window.chrome.webview.postMessage(raw); };
    }
    if (typeof window.__silkPostMessage === "function") {
      return function (raw) { window.__silkPostMessage(raw); };
    }
    return null;
  }

  function invoke(cmd, args) {
    return new Promise(function (resolve, reject) {
      var post = findTransport();
      if (!post) {
        reject(new Error("Silk transport unavailable"));
        return;
      }
      if (pendingCount >= MAX_PENDING) {
        reject(new Error("Silk invoke backlog full"));
        return;
      }
      var callback = nextCallback;
      nextCallback += 1;
      pending[callback] = { resolve: resolve, reject: reject };
      pendingCount += 1;
      post(JSON.stringify({
        kind: "invoke",
        callback: callback,
        cmd: cmd,
        args: args === undefined ? null : args
      }));
    });
  }

  function listen(event, handler) {
    if (!listeners[event]) {
      listeners[event] = [];
    }
    listeners[event].push(handler);
    return function unlisten() {
      var subscribed = listeners[event] || [];
      var index = subscribed.indexOf(handler);
      if (index !== -1) {
        subscribed.splice(index, 1);
      }
    };
  }

  function toError(error) {
    if (error && typeof error === "object") {
      var wrapped = new Error(error.message !== undefined ? error.message : String(error));
      if (error.code !== undefined) {
        wrapped.code = error.code;
      }
      return wrapped;
    }
    return new Error(error);
  }

  function __dispatch(msg) {
    if (!msg) {
      return;
    }
    if (msg.kind === "response") {
      var entry = pending[msg.callback];
      if (!entry) {
        return;
      }
      delete pending[msg.callback];
      pendingCount -= 1;
      if (msg.ok) {
        entry.resolve(msg.result);
      } else {
        entry.reject(toError(msg.error));
      }
      return;
    }
    if (msg.kind === "event") {
      var subscribed = listeners[msg.event] || [];
      for (var i = 0; i < subscribed.length; i += 1) {
        subscribed[i](msg.payload);
      }
    }
  }

  window.__silk = {
    invoke: invoke,
    listen: listen,
    __dispatch: __dispatch
  };
})();
"#;
