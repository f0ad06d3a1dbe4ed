//! Reply pump: the queue + flush discipline that carries response scripts to
//! the UI thread.
//!
//! The webview forbids evaluating script from inside its own message
//! callback, so no dispatch path posts a script directly. Scripts are queued
//! here and drained by [`ReplyPump::flush`], which the host arranges to run
//! on the UI thread after [`UiWebview::schedule_flush`] fires. The
//! `flush_scheduled` flag guarantees exactly one pending wake-up no matter
//! how many replies arrive in between.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tracing::warn;

/// Capabilities the native window layer lends to the IPC core. Both calls
/// may be invoked from any dispatch thread; `post_script` itself is only
/// ever called from `flush`, which the host runs on the UI thread.
pub trait UiWebview: Send + Sync {
    /// Evaluates one script in the webview. Guaranteed by the host to run on
    /// the UI thread.
    fn post_script(&self, script: &str);

    /// Arranges one future call to the runtime's flush on the UI thread.
    fn schedule_flush(&self);
}

/// Upper bound on queued reply scripts; beyond it, replies are dropped with
/// a diagnostic rather than growing without bound against a stalled UI.
pub const MAX_QUEUED_REPLIES: usize = 4096;

#[derive(Default)]
struct PumpState {
    queue: VecDeque<String>,
    flush_scheduled: bool,
}

/// Bounded, mutex-guarded FIFO of serialized reply scripts.
#[derive(Default)]
pub struct ReplyPump {
    state: Mutex<PumpState>,
}

impl ReplyPump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a script and schedules a flush unless one is already pending.
    pub fn enqueue(&self, script: String, webview: &dyn UiWebview) {
        let needs_schedule = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.queue.len() >= MAX_QUEUED_REPLIES {
                warn!(
                    queued = state.queue.len(),
                    "reply queue full; dropping response script"
                );
                return;
            }
            state.queue.push_back(script);
            !std::mem::replace(&mut state.flush_scheduled, true)
        };
        if needs_schedule {
            webview.schedule_flush();
        }
    }

    /// Drains the queue in FIFO order, posting each script. Runs on the UI
    /// thread. Scripts enqueued while posting belong to the next cycle,
    /// scheduled by the `enqueue` that follows the flag reset below.
    pub fn flush(&self, webview: &dyn UiWebview) {
        let batch: Vec<String> = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.flush_scheduled = false;
            state.queue.drain(..).collect()
        };
        for script in batch {
            webview.post_script(&script);
        }
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .len()
    }
}
