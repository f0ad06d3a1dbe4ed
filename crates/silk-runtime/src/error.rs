use std::io;

use thiserror::Error;

/// Errors that may occur while assembling or tearing down the runtime, or
/// while the bridge talks to its host process. Dispatch-path failures never
/// surface here; they become response envelopes instead.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("external handler command must not be empty")]
    EmptyHostCommand,
    #[error("external handler host `{binary}` could not be spawned: {source}")]
    HostSpawn {
        binary: String,
        #[source]
        source: io::Error,
    },
    #[error("host stdin unavailable")]
    HostStdinUnavailable,
    #[error("host stdout unavailable")]
    HostStdoutUnavailable,
    #[error("failed to write to host stdin: {0}")]
    HostWrite(#[source] io::Error),
    #[error("failed to read from host stdout: {0}")]
    HostRead(#[source] io::Error),
    #[error("host closed its output")]
    HostClosed,
    #[error("host reply line exceeded {max_bytes} bytes")]
    HostReplyTooLong { max_bytes: usize },
    #[error("failed to start bridge worker thread: {0}")]
    WorkerSpawn(#[source] io::Error),
    #[error("failed to parse runtime configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
