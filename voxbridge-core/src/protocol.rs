//! Method tokens and channel aliases shared by the recognizer and the worker.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::buffering::chunk::AudioChunk;
use crate::error::VoxError;
use crate::rpc::{ClientTransport, RpcClient};

/// Closed set of methods the recognition worker serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecognizerMethod {
    Start,
    Stop,
    ProcessAudioChunk,
}

impl RecognizerMethod {
    pub const ALL: [RecognizerMethod; 3] = [Self::Start, Self::Stop, Self::ProcessAudioChunk];

    /// Wire name of the method.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::ProcessAudioChunk => "processAudioChunk",
        }
    }
}

impl fmt::Display for RecognizerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecognizerMethod {
    type Err = VoxError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == name)
            .ok_or_else(|| VoxError::MethodNotFound(name.to_string()))
    }
}

/// Client handle used by the foreground side.
pub type RecognizerClient = RpcClient<RecognizerMethod, AudioChunk, Value>;

/// Client end of a recognizer channel, as returned by `spawn_worker`.
pub type RecognizerTransport = ClientTransport<RecognizerMethod, AudioChunk, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for method in RecognizerMethod::ALL {
            assert_eq!(method.as_str().parse::<RecognizerMethod>().unwrap(), method);
            assert_eq!(
                serde_json::to_value(method).unwrap(),
                Value::String(method.as_str().into())
            );
        }
    }

    #[test]
    fn unknown_name_is_method_not_found() {
        match "reset".parse::<RecognizerMethod>() {
            Err(VoxError::MethodNotFound(name)) => assert_eq!(name, "reset"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
