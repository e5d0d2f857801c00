use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by voxbridge-core.
#[derive(Debug, Error)]
pub enum VoxError {
    #[error("audio device unavailable: {0}")]
    DeviceAcquisition(String),

    #[error("audio graph construction failed: {0}")]
    GraphConstruction(String),

    #[error("malformed audio buffer: {0}")]
    BufferValidation(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("remote error: {0}")]
    Remote(RemoteError),

    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("recognition engine failed to load: {0}")]
    EngineLoad(String),

    #[error("model failed to load: {0}")]
    ModelLoad(String),

    #[error("recognition engine error: {0}")]
    Engine(String),

    #[error("channel disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoxError>;

/// Category of an error that crossed the thread boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteErrorKind {
    MethodNotFound,
    InvalidParams,
    EngineLoad,
    ModelLoad,
    Engine,
    Internal,
}

/// Serialisable error payload carried in a reply envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<&VoxError> for RemoteError {
    fn from(err: &VoxError) -> Self {
        let kind = match err {
            VoxError::MethodNotFound(_) => RemoteErrorKind::MethodNotFound,
            VoxError::InvalidParams(_) => RemoteErrorKind::InvalidParams,
            VoxError::EngineLoad(_) => RemoteErrorKind::EngineLoad,
            VoxError::ModelLoad(_) => RemoteErrorKind::ModelLoad,
            VoxError::Engine(_) => RemoteErrorKind::Engine,
            VoxError::Remote(remote) => return remote.clone(),
            _ => RemoteErrorKind::Internal,
        };
        // Strip the local Display prefix so the client can rebuild the variant.
        let message = match err {
            VoxError::MethodNotFound(m)
            | VoxError::InvalidParams(m)
            | VoxError::EngineLoad(m)
            | VoxError::ModelLoad(m)
            | VoxError::Engine(m) => m.clone(),
            other => other.to_string(),
        };
        RemoteError { kind, message }
    }
}

impl From<RemoteError> for VoxError {
    fn from(remote: RemoteError) -> Self {
        match remote.kind {
            RemoteErrorKind::MethodNotFound => VoxError::MethodNotFound(remote.message),
            RemoteErrorKind::EngineLoad => VoxError::EngineLoad(remote.message),
            RemoteErrorKind::ModelLoad => VoxError::ModelLoad(remote.message),
            _ => VoxError::Remote(remote),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_not_found_survives_the_boundary() {
        let local = VoxError::MethodNotFound("frobnicate".into());
        let remote = RemoteError::from(&local);
        assert_eq!(remote.kind, RemoteErrorKind::MethodNotFound);
        assert_eq!(remote.message, "frobnicate");

        match VoxError::from(remote) {
            VoxError::MethodNotFound(name) => assert_eq!(name, "frobnicate"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn engine_failures_stay_remote() {
        let remote = RemoteError::from(&VoxError::Engine("decoder crashed".into()));
        match VoxError::from(remote) {
            VoxError::Remote(r) => {
                assert_eq!(r.kind, RemoteErrorKind::Engine);
                assert_eq!(r.message, "decoder crashed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn remote_error_serializes_with_camel_case_kind() {
        let remote = RemoteError::new(RemoteErrorKind::ModelLoad, "missing am/final.mdl");
        let json = serde_json::to_value(&remote).expect("serialize remote error");
        assert_eq!(json["kind"], "modelLoad");
        assert_eq!(json["message"], "missing am/final.mdl");
    }
}
