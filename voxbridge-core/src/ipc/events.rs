//! Event types surfaced to the embedding application.
//!
//! | Event | Source |
//! |-------|--------|
//! | `RecognitionResult` | worker push, filtered by the recognizer |
//! | `CaptureStateEvent` | capture state machine broadcast |

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Recognition results
// ---------------------------------------------------------------------------

/// Distinguishes streaming partials from committed finals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// Streaming partial; text may change with the next chunk.
    Partial,
    /// Committed final; the segment is complete and will not change.
    Final,
}

/// A transcript update delivered to the recognizer's result callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    pub kind: SegmentKind,
    pub text: String,
}

impl RecognitionResult {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Partial,
            text: text.into(),
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Final,
            text: text.into(),
        }
    }

    pub fn is_final(&self) -> bool {
        self.kind == SegmentKind::Final
    }

    /// Interpret an engine transcript payload.
    ///
    /// `{"text": ..}` is a final segment, `{"partial": ..}` a partial one.
    /// Anything else (including non-string fields) is not a recognition result.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        if let Some(text) = payload.get("text").and_then(Value::as_str) {
            return Some(Self::final_text(text));
        }
        payload
            .get("partial")
            .and_then(Value::as_str)
            .map(Self::partial)
    }

    /// Engine-shaped JSON form of this result.
    pub fn to_payload(&self) -> Value {
        match self.kind {
            SegmentKind::Partial => serde_json::json!({ "partial": self.text }),
            SegmentKind::Final => serde_json::json!({ "text": self.text }),
        }
    }
}

// ---------------------------------------------------------------------------
// Capture state
// ---------------------------------------------------------------------------

/// Activation state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Inactive,
    Starting,
    Active,
    Stopping,
}

/// Published on every capture state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStateEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub state: CaptureState,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}
