//! External handler bridge ("Mode A").
//!
//! Commands with no in-process route are handed to a long-lived host process
//! speaking newline-delimited JSON on its standard streams: one invoke
//! envelope out, one `{"ok":...}` reply line back, strictly FIFO. A single
//! worker thread owns the conversation; the UI thread only ever pushes jobs
//! onto the condition-variable-gated queue, so a hung host hangs the worker
//! and nothing else.
//!
//! The bridge has no restart policy: the first broken write, read, or spawn
//! disables it, and every later job is answered with a bridge-level error.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use serde_json::Value;
use tracing::{debug, warn};

use crate::envelope::{serialize_invoke, ErrorCode, InvokeRequest};
use crate::error::RuntimeError;
use crate::pump::{ReplyPump, UiWebview};
use crate::router::{build_error_script, build_success_script, DispatchHooks};

/// Longest reply line accepted from the host process.
pub const MAX_REPLY_LINE_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug)]
struct BridgeQueue {
    jobs: VecDeque<InvokeRequest>,
    shutdown: bool,
}

#[derive(Debug)]
struct BridgeShared {
    queue: Mutex<BridgeQueue>,
    available: Condvar,
}

/// Worker handle for one enabled bridge.
#[derive(Debug)]
pub(crate) struct HostBridge {
    shared: Arc<BridgeShared>,
    child: Arc<Mutex<Option<Child>>>,
    worker: Option<JoinHandle<()>>,
}

impl HostBridge {
    /// Starts the worker thread. The host process itself is spawned lazily
    /// on the first job.
    pub(crate) fn spawn(
        argv: Vec<String>,
        pump: Arc<ReplyPump>,
        webview: Arc<dyn UiWebview>,
        hooks: DispatchHooks,
    ) -> Result<Self, RuntimeError> {
        if argv.is_empty() {
            return Err(RuntimeError::EmptyHostCommand);
        }

        let shared = Arc::new(BridgeShared {
            queue: Mutex::new(BridgeQueue {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });
        let child = Arc::new(Mutex::new(None));

        let worker_shared = shared.clone();
        let worker_child = child.clone();
        let worker = std::thread::Builder::new()
            .name("silk-host-bridge".to_string())
            .spawn(move || worker_loop(argv, worker_shared, worker_child, pump, webview, hooks))
            .map_err(RuntimeError::WorkerSpawn)?;

        Ok(Self {
            shared,
            child,
            worker: Some(worker),
        })
    }

    /// Hands one request to the worker queue. The request is owned data with
    /// no references back into the UI thread's parse buffer.
    pub(crate) fn submit(&self, request: InvokeRequest) {
        let mut queue = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        queue.jobs.push_back(request);
        drop(queue);
        self.shared.available.notify_one();
    }

    /// Signals the worker, kills the host process to unblock any in-flight
    /// read (abandoning that reply), and joins.
    pub(crate) fn shutdown(&mut self) {
        {
            let mut queue = self
                .shared
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            queue.shutdown = true;
        }
        self.shared.available.notify_all();
        kill_child(&self.child);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for HostBridge {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}

fn kill_child(slot: &Arc<Mutex<Option<Child>>>) {
    let child = slot
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(mut child) = child {
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// The worker's side of the host conversation. stdin/stdout handles are
/// detached from the `Child` so shutdown can kill the process from another
/// thread while a read is in flight.
struct HostChannel {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

enum HostState {
    Idle,
    Running(HostChannel),
    Disabled,
}

#[derive(Debug)]
enum ServeError {
    /// The bridge is (now) unusable; the job and all later ones fail.
    Unavailable(String),
    /// The host produced a malformed reply; the conversation continues.
    Protocol(String),
    /// The host answered `ok:false`: the remote handler itself failed.
    Host(String),
}

fn worker_loop(
    argv: Vec<String>,
    shared: Arc<BridgeShared>,
    child_slot: Arc<Mutex<Option<Child>>>,
    pump: Arc<ReplyPump>,
    webview: Arc<dyn UiWebview>,
    hooks: DispatchHooks,
) {
    let mut state = HostState::Idle;
    loop {
        let job = {
            let mut queue = shared
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.shutdown {
                    return;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let outcome = serve(&argv, &mut state, &shared, &child_slot, &job);
        let (script, success) = match outcome {
            Ok(result) => (build_success_script(job.callback, result), true),
            Err(ServeError::Unavailable(message)) => {
                state = HostState::Disabled;
                kill_child(&child_slot);
                warn!(cmd = %job.cmd, %message, "external handler bridge disabled");
                (
                    build_error_script(job.callback, ErrorCode::BridgeUnavailable, message),
                    false,
                )
            }
            Err(ServeError::Protocol(message)) => {
                warn!(cmd = %job.cmd, %message, "external handler host protocol fault");
                (
                    build_error_script(job.callback, ErrorCode::BridgeProtocol, message),
                    false,
                )
            }
            Err(ServeError::Host(message)) => (
                build_error_script(job.callback, ErrorCode::InternalError, message),
                false,
            ),
        };
        pump.enqueue(script, webview.as_ref());
        hooks.fire_after(&job.cmd, success);
    }
}

fn shutting_down(shared: &BridgeShared) -> bool {
    shared
        .queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .shutdown
}

/// One request/reply exchange: spawn on first use, write one line, read one
/// bounded line, interpret the `{ok, result|error}` body.
fn serve(
    argv: &[String],
    state: &mut HostState,
    shared: &BridgeShared,
    child_slot: &Arc<Mutex<Option<Child>>>,
    job: &InvokeRequest,
) -> Result<Value, ServeError> {
    if matches!(state, HostState::Disabled) {
        return Err(ServeError::Unavailable(
            "external handler bridge is disabled".to_string(),
        ));
    }
    if matches!(state, HostState::Idle) {
        // Jobs popped during shutdown must not spawn a host that nobody
        // will kill: shutdown's kill only reaches a child already in the
        // slot, so check the flag before spawning and again after, killing
        // a freshly spawned child ourselves if shutdown raced the spawn.
        if shutting_down(shared) {
            return Err(ServeError::Unavailable(
                "external handler bridge is shutting down".to_string(),
            ));
        }
        let channel = start_host(argv, child_slot)
            .map_err(|err| ServeError::Unavailable(err.to_string()))?;
        if shutting_down(shared) {
            kill_child(child_slot);
            return Err(ServeError::Unavailable(
                "external handler bridge is shutting down".to_string(),
            ));
        }
        *state = HostState::Running(channel);
    }
    let HostState::Running(channel) = state else {
        // Idle was replaced above; Disabled returned early.
        return Err(ServeError::Unavailable(
            "external handler bridge is disabled".to_string(),
        ));
    };

    let mut line = serialize_invoke(job);
    line.push('\n');
    channel
        .stdin
        .write_all(line.as_bytes())
        .and_then(|()| channel.stdin.flush())
        .map_err(|err| ServeError::Unavailable(RuntimeError::HostWrite(err).to_string()))?;

    let reply = read_reply_line(&mut channel.stdout)?;
    interpret_reply(&reply)
}

fn start_host(
    argv: &[String],
    child_slot: &Arc<Mutex<Option<Child>>>,
) -> Result<HostChannel, RuntimeError> {
    let (program, args) = argv
        .split_first()
        .ok_or(RuntimeError::EmptyHostCommand)?;
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| RuntimeError::HostSpawn {
            binary: program.clone(),
            source,
        })?;

    let stdin = child.stdin.take().ok_or(RuntimeError::HostStdinUnavailable)?;
    let stdout = child
        .stdout
        .take()
        .ok_or(RuntimeError::HostStdoutUnavailable)?;
    debug!(%program, "external handler host spawned");

    *child_slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(child);
    Ok(HostChannel {
        stdin,
        stdout: BufReader::new(stdout),
    })
}

/// Reads one `\n`-terminated line, holding at most [`MAX_REPLY_LINE_BYTES`]
/// in memory. An oversized line is discarded through its terminator so the
/// stream stays in sync, then reported as a protocol fault.
fn read_reply_line(stdout: &mut BufReader<ChildStdout>) -> Result<String, ServeError> {
    let mut line: Vec<u8> = Vec::new();
    let mut discarding = false;
    loop {
        let buffer = stdout
            .fill_buf()
            .map_err(|err| ServeError::Unavailable(RuntimeError::HostRead(err).to_string()))?;
        if buffer.is_empty() {
            return Err(ServeError::Unavailable(RuntimeError::HostClosed.to_string()));
        }

        let newline = buffer.iter().position(|byte| *byte == b'\n');
        let segment_len = newline.unwrap_or(buffer.len());

        if !discarding {
            if line.len() + segment_len > MAX_REPLY_LINE_BYTES {
                discarding = true;
                line.clear();
            } else {
                line.extend_from_slice(&buffer[..segment_len]);
            }
        }

        match newline {
            Some(position) => {
                stdout.consume(position + 1);
                if discarding {
                    return Err(ServeError::Protocol(
                        RuntimeError::HostReplyTooLong {
                            max_bytes: MAX_REPLY_LINE_BYTES,
                        }
                        .to_string(),
                    ));
                }
                return String::from_utf8(line).map_err(|_| {
                    ServeError::Protocol("host reply was not valid UTF-8".to_string())
                });
            }
            None => {
                let consumed = buffer.len();
                stdout.consume(consumed);
            }
        }
    }
}

fn interpret_reply(reply: &str) -> Result<Value, ServeError> {
    let value: Value = serde_json::from_str(reply)
        .map_err(|err| ServeError::Protocol(format!("host reply was not valid JSON: {err}")))?;
    let Value::Object(body) = value else {
        return Err(ServeError::Protocol(
            "host reply was not a JSON object".to_string(),
        ));
    };
    let ok = body
        .get("ok")
        .and_then(Value::as_bool)
        .ok_or_else(|| ServeError::Protocol("host reply is missing boolean `ok`".to_string()))?;
    if ok {
        return Ok(body.get("result").cloned().unwrap_or(Value::Null));
    }
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .ok_or_else(|| ServeError::Protocol("host reply is missing string `error`".to_string()))?;
    Err(ServeError::Host(message.to_string()))
}
