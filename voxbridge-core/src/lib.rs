//! # voxbridge-core
//!
//! Streams microphone audio to a speech recognizer running on its own thread.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → InputDevice → SPSC RingBuffer → pump → GainStage → BufferStage
//!                                                                    │
//!                                                  Recognizer::process_buffer
//!                                                                    │
//!                                    RpcClient ── cast processAudioChunk ──▶
//!                                                        [thread boundary]
//!                                    RpcServer → RecognizerWorker → SpeechEngine
//!                                                                    │
//!                                    ◀── push {"partial"} / {"text"} ─┘
//! ```
//!
//! The foreground side owns the device and the capture graph; the worker
//! thread owns the engine, its model and the native staging buffer. Nothing
//! is shared between them except the channel.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod protocol;
pub mod recognizer;
pub mod rpc;
pub mod storage;
pub mod worker;

// Convenience re-exports for downstream crates
pub use audio::CpalSource;
pub use buffering::chunk::{AudioBuffer, AudioChunk};
pub use capture::{CaptureConfig, MicrophoneProcessor};
pub use engine::{SpeechEngine, StubEngine, StubModelStore};
pub use error::{Result, VoxError};
pub use ipc::events::{CaptureState, CaptureStateEvent, RecognitionResult, SegmentKind};
pub use protocol::RecognizerMethod;
pub use recognizer::{Recognizer, RecognizerOptions};
pub use storage::{DirModelStore, ModelStore};
pub use worker::{spawn_worker, RecognizerWorker, WorkerConfig};

#[cfg(feature = "vosk")]
pub use engine::VoskEngine;
