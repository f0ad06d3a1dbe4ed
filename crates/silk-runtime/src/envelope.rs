//! Wire envelopes between the webview and the runtime.
//!
//! Incoming messages are `{"kind":"invoke","callback":N,"cmd":"...","args":...}`
//! objects posted by the bridge script. Outgoing messages are `"response"`
//! envelopes wrapped in a script string that calls back into the bridge. This
//! module is the only place either shape is read or written.

use serde_json::Value;
use thiserror::Error;

/// Largest accepted callback identifier (63-bit non-negative integer).
pub const MAX_CALLBACK: u64 = (1 << 63) - 1;

/// Literal prefix of every response script handed to the webview.
pub const DISPATCH_PREFIX: &str = "window.__silk && window.__silk.__dispatch(";

/// Literal suffix of every response script handed to the webview.
pub const DISPATCH_SUFFIX: &str = ");";

/// One call from the webview, decoded from an invoke envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeRequest {
    /// Correlator chosen by the bridge script; echoed back verbatim.
    pub callback: u64,
    /// Opaque command identifier. Namespacing conventions are the caller's.
    pub cmd: String,
    /// Arguments as posted; a missing `args` field materializes as `Null`.
    pub args: Value,
}

/// Machine-readable error code attached to failed responses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    PermissionDenied,
    MethodNotFound,
    InternalError,
    BridgeUnavailable,
    BridgeProtocol,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::BridgeUnavailable => "BRIDGE_UNAVAILABLE",
            ErrorCode::BridgeProtocol => "BRIDGE_PROTOCOL",
        }
    }

    fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "PERMISSION_DENIED" => Some(ErrorCode::PermissionDenied),
            "METHOD_NOT_FOUND" => Some(ErrorCode::MethodNotFound),
            "INTERNAL_ERROR" => Some(ErrorCode::InternalError),
            "BRIDGE_UNAVAILABLE" => Some(ErrorCode::BridgeUnavailable),
            "BRIDGE_PROTOCOL" => Some(ErrorCode::BridgeProtocol),
            _ => None,
        }
    }
}

/// One outcome, correlated to its request by `callback`.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub callback: u64,
    pub outcome: Result<Value, ResponseError>,
}

/// Structured error carried by a failed response.
///
/// The bridge script accepts both this shape and a bare string; the runtime
/// always emits the structured form.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseError {
    pub code: ErrorCode,
    pub message: String,
}

impl Response {
    pub fn success(callback: u64, result: Value) -> Self {
        Self {
            callback,
            outcome: Ok(result),
        }
    }

    pub fn failure(callback: u64, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            callback,
            outcome: Err(ResponseError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Renders the envelope JSON and wraps it in the dispatch script literal.
    pub fn into_script(self) -> String {
        let mut envelope = serde_json::Map::new();
        envelope.insert("kind".into(), Value::from("response"));
        envelope.insert("callback".into(), Value::from(self.callback));
        match self.outcome {
            Ok(result) => {
                envelope.insert("ok".into(), Value::from(true));
                envelope.insert("result".into(), result);
            }
            Err(error) => {
                envelope.insert("ok".into(), Value::from(false));
                let mut body = serde_json::Map::new();
                body.insert("code".into(), Value::from(error.code.as_str()));
                body.insert("message".into(), Value::from(error.message));
                envelope.insert("error".into(), Value::Object(body));
            }
        }
        let json = serde_json::to_string(&Value::Object(envelope))
            .unwrap_or_else(|_| r#"{"kind":"response"}"#.to_string());
        format!("{DISPATCH_PREFIX}{json}{DISPATCH_SUFFIX}")
    }
}

/// Why an incoming envelope was rejected. Each failure mode is distinct so
/// callers can log precisely; none of them yields a reply (the callback is
/// not trustworthy once parsing fails).
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EnvelopeError {
    #[error("envelope is not a JSON object")]
    InvalidEnvelope,
    #[error("envelope is missing `kind`")]
    MissingKind,
    #[error("envelope `kind` is not a string")]
    InvalidKind,
    #[error("unsupported envelope kind `{kind}`")]
    UnsupportedKind { kind: String },
    #[error("envelope is missing `callback`")]
    MissingCallback,
    #[error("envelope `callback` is not a 63-bit non-negative integer")]
    InvalidCallback,
    #[error("envelope is missing `cmd`")]
    MissingCommand,
    #[error("envelope `cmd` is not a non-empty string")]
    InvalidCommand,
}

/// Renders an invoke envelope as a single JSON line body (no terminator).
/// The external bridge writes this shape to its host process.
pub fn serialize_invoke(request: &InvokeRequest) -> String {
    let mut envelope = serde_json::Map::new();
    envelope.insert("kind".into(), Value::from("invoke"));
    envelope.insert("callback".into(), Value::from(request.callback));
    envelope.insert("cmd".into(), Value::from(request.cmd.clone()));
    envelope.insert("args".into(), request.args.clone());
    serde_json::to_string(&Value::Object(envelope))
        .unwrap_or_else(|_| r#"{"kind":"invoke"}"#.to_string())
}

/// Parses one webview → runtime envelope.
pub fn parse_invoke(raw: &str) -> Result<InvokeRequest, EnvelopeError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| EnvelopeError::InvalidEnvelope)?;
    let Value::Object(mut envelope) = value else {
        return Err(EnvelopeError::InvalidEnvelope);
    };

    let kind = envelope.get("kind").ok_or(EnvelopeError::MissingKind)?;
    let kind = kind.as_str().ok_or(EnvelopeError::InvalidKind)?;
    if kind != "invoke" {
        return Err(EnvelopeError::UnsupportedKind {
            kind: kind.to_string(),
        });
    }

    let callback = envelope
        .get("callback")
        .ok_or(EnvelopeError::MissingCallback)
        .and_then(parse_callback)?;

    let cmd = envelope.get("cmd").ok_or(EnvelopeError::MissingCommand)?;
    let cmd = cmd.as_str().ok_or(EnvelopeError::InvalidCommand)?;
    if cmd.is_empty() {
        return Err(EnvelopeError::InvalidCommand);
    }
    let cmd = cmd.to_string();

    let args = envelope.remove("args").unwrap_or(Value::Null);

    Ok(InvokeRequest {
        callback,
        cmd,
        args,
    })
}

/// Parses one runtime → webview response envelope (the JSON body, without the
/// script wrapper). Inverse of [`Response::into_script`] for valid records.
pub fn parse_response(raw: &str) -> Result<Response, EnvelopeError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| EnvelopeError::InvalidEnvelope)?;
    let Value::Object(envelope) = value else {
        return Err(EnvelopeError::InvalidEnvelope);
    };

    let kind = envelope.get("kind").ok_or(EnvelopeError::MissingKind)?;
    let kind = kind.as_str().ok_or(EnvelopeError::InvalidKind)?;
    if kind != "response" {
        return Err(EnvelopeError::UnsupportedKind {
            kind: kind.to_string(),
        });
    }

    let callback = envelope
        .get("callback")
        .ok_or(EnvelopeError::MissingCallback)
        .and_then(parse_callback)?;

    let ok = envelope
        .get("ok")
        .and_then(Value::as_bool)
        .ok_or(EnvelopeError::InvalidEnvelope)?;

    if ok {
        let result = envelope.get("result").cloned().unwrap_or(Value::Null);
        return Ok(Response::success(callback, result));
    }

    let error = envelope.get("error").ok_or(EnvelopeError::InvalidEnvelope)?;
    let code = error
        .get("code")
        .and_then(Value::as_str)
        .and_then(ErrorCode::from_str)
        .ok_or(EnvelopeError::InvalidEnvelope)?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .ok_or(EnvelopeError::InvalidEnvelope)?
        .to_string();
    Ok(Response::failure(callback, code, message))
}

fn parse_callback(value: &Value) -> Result<u64, EnvelopeError> {
    if let Some(n) = value.as_u64() {
        return if n <= MAX_CALLBACK {
            Ok(n)
        } else {
            Err(EnvelopeError::InvalidCallback)
        };
    }
    // Integral floats are what a JS sender produces; coerce them, reject
    // anything negative, fractional, or past 2^53 (no longer exact in f64).
    const MAX_EXACT_F64: f64 = 9_007_199_254_740_992.0;
    if let Some(f) = value.as_f64() {
        if f >= 0.0 && f.fract() == 0.0 && f <= MAX_EXACT_F64 {
            return Ok(f as u64);
        }
    }
    Err(EnvelopeError::InvalidCallback)
}
