//! Speech recognition engine abstraction.
//!
//! `SpeechEngine` mirrors the capability set a native recogniser exposes:
//! model load/dispose, recogniser instances bound to a sample rate, waveform
//! acceptance from a native staging buffer, and transcript JSON getters.
//! The worker owns exactly one engine and drives it from a single thread, so
//! nothing here needs to be `Sync`.

pub mod heap;
pub mod stub;

#[cfg(feature = "vosk")]
pub mod vosk;

use std::path::Path;

use crate::error::Result;

pub use heap::{HeapAddr, NativeHeap};
pub use stub::{StubEngine, StubModelStore};

#[cfg(feature = "vosk")]
pub use self::vosk::VoskEngine;

/// Contract for speech recognition backends.
///
/// Transcript getters return the engine's JSON: `{"partial": ".."}` while a
/// segment is tentative and `{"text": ".."}` once it is committed.
pub trait SpeechEngine: 'static {
    type Model;
    type Recognizer;

    /// One-time runtime load (native library, logging setup).
    ///
    /// # Errors
    /// `VoxError::EngineLoad` if the runtime cannot be initialised.
    fn initialize(&mut self) -> Result<()>;

    /// Construct a model from an unpacked model directory.
    ///
    /// # Errors
    /// `VoxError::ModelLoad` if the directory is missing or invalid.
    fn load_model(&mut self, path: &Path) -> Result<Self::Model>;

    fn set_downsampling(&mut self, model: &mut Self::Model, allow: bool);

    fn sample_frequency(&self, model: &Self::Model) -> f32;

    fn create_recognizer(&mut self, model: &Self::Model, sample_rate: f32)
        -> Result<Self::Recognizer>;

    /// Feed `sample_count` f32 samples from `buffer`. Returns `true` once the
    /// current segment is finalised.
    fn accept_waveform(
        &mut self,
        recognizer: &mut Self::Recognizer,
        buffer: HeapAddr,
        sample_count: usize,
    ) -> Result<bool>;

    fn result(&mut self, recognizer: &mut Self::Recognizer) -> String;

    fn partial_result(&mut self, recognizer: &mut Self::Recognizer) -> String;

    fn final_result(&mut self, recognizer: &mut Self::Recognizer) -> String;

    fn dispose_recognizer(&mut self, recognizer: Self::Recognizer);

    fn dispose_model(&mut self, model: Self::Model);

    /// Allocate `bytes` of native memory.
    fn allocate(&mut self, bytes: usize) -> Result<HeapAddr>;

    fn free(&mut self, addr: HeapAddr);

    /// Copy samples into a previously allocated block.
    fn write_samples(&mut self, addr: HeapAddr, samples: &[f32]) -> Result<()>;
}
