//! Job backend seam: start a job kind, read its status snapshot.
//!
//! The controller is generic over `JobBackend` so tests can script responses while the
//! binary talks HTTP through `HttpBackend`.

mod http;

pub(crate) use http::{build_http_client, read_body, HttpBackend};

#[cfg(test)]
pub(crate) use http::testing;

use crate::error::BackendError;
use crate::model::JobKind;
use serde::Deserialize;
use std::future::Future;

/// Backend accepted the start request. It says nothing about completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartAck {
    pub message: Option<String>,
    pub estimated_duration: Option<String>,
}

/// One status snapshot. `running == false` covers both "finished" and "failed
/// server-side"; the protocol does not tell them apart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub running: bool,
    pub message: String,
    pub last_run: Option<String>,
}

pub trait JobBackend: Send + Sync + 'static {
    fn start(&self, kind: JobKind)
        -> impl Future<Output = Result<StartAck, BackendError>> + Send;

    fn status(
        &self,
        kind: JobKind,
    ) -> impl Future<Output = Result<StatusReport, BackendError>> + Send;
}

/// `{status, data, message?, error?}` wrapper used by every job endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: Option<String>,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl<T> Envelope<T> {
    fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }

    fn top_level_message(&self) -> Option<String> {
        self.message.clone().or_else(|| self.error.clone())
    }
}

#[derive(Debug, Deserialize)]
struct StartData {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    estimated_duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    running: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    last_run: Option<serde_json::Value>,
}

/// Message-only view of an error body, used for non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub(crate) fn error_message(body: &[u8]) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_slice(body).ok()?;
    parsed
        .data
        .as_ref()
        .and_then(|d| d.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .or(parsed.message)
        .or(parsed.error)
}

pub(crate) fn decode_start(body: &[u8]) -> Result<StartAck, BackendError> {
    let env: Envelope<StartData> =
        serde_json::from_slice(body).map_err(|e| BackendError::Malformed(e.to_string()))?;
    if !env.is_success() {
        let msg = env
            .data
            .as_ref()
            .and_then(|d| d.message.clone())
            .or_else(|| env.top_level_message())
            .unwrap_or_else(|| "backend reported an error".to_string());
        return Err(BackendError::Application(msg));
    }
    let top = env.top_level_message();
    let data = env
        .data
        .ok_or_else(|| BackendError::Malformed("missing data".into()))?;
    if !data.success {
        let msg = data
            .message
            .or(top)
            .unwrap_or_else(|| "start request was rejected".to_string());
        return Err(BackendError::Application(msg));
    }
    Ok(StartAck {
        message: data.message,
        estimated_duration: data.estimated_duration.filter(|s| !s.trim().is_empty()),
    })
}

pub(crate) fn decode_status(body: &[u8]) -> Result<StatusReport, BackendError> {
    let env: Envelope<StatusData> =
        serde_json::from_slice(body).map_err(|e| BackendError::Malformed(e.to_string()))?;
    if !env.is_success() {
        let msg = env
            .data
            .as_ref()
            .and_then(|d| d.message.clone())
            .or_else(|| env.top_level_message())
            .unwrap_or_else(|| "backend reported an error".to_string());
        return Err(BackendError::Application(msg));
    }
    let data = env
        .data
        .ok_or_else(|| BackendError::Malformed("missing data".into()))?;
    let last_run = match data.last_run {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    };
    Ok(StatusReport {
        running: data.running,
        message: data.message.unwrap_or_default(),
        last_run,
    })
}
