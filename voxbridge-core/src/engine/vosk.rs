//! Vosk backend (feature `vosk`).
//!
//! Links against the native `libvosk`. The staging buffer still lives in a
//! [`NativeHeap`]; samples are converted to i16 on the way into the decoder.

use std::path::Path;

use serde_json::json;
use tracing::{debug, info};
use vosk::{CompleteResult, DecodingState, LogLevel, Model, Recognizer};

use super::{HeapAddr, NativeHeap, SpeechEngine};
use crate::error::{Result, VoxError};

/// Rate Vosk's published small models are trained at.
const NOMINAL_SAMPLE_RATE: f32 = 16_000.0;

#[derive(Default)]
pub struct VoskEngine {
    heap: NativeHeap,
    initialized: bool,
}

impl VoskEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

fn complete_text(result: CompleteResult<'_>) -> String {
    let text = match result {
        CompleteResult::Single(single) => single.text.to_string(),
        CompleteResult::Multiple(multiple) => multiple
            .alternatives
            .first()
            .map(|alt| alt.text.to_string())
            .unwrap_or_default(),
    };
    json!({ "text": text }).to_string()
}

impl SpeechEngine for VoskEngine {
    type Model = Model;
    type Recognizer = Recognizer;

    fn initialize(&mut self) -> Result<()> {
        if !self.initialized {
            vosk::set_log_level(LogLevel::Warn);
            self.initialized = true;
            info!("Vosk runtime initialised");
        }
        Ok(())
    }

    fn load_model(&mut self, path: &Path) -> Result<Model> {
        let path_str = path
            .to_str()
            .ok_or_else(|| VoxError::ModelLoad(format!("non-UTF-8 path {}", path.display())))?;
        Model::new(path_str)
            .ok_or_else(|| VoxError::ModelLoad(format!("vosk rejected model at {path_str}")))
    }

    fn set_downsampling(&mut self, _model: &mut Model, allow: bool) {
        // libvosk resamples internally; nothing to configure.
        debug!(allow, "vosk: downsampling flag ignored");
    }

    fn sample_frequency(&self, _model: &Model) -> f32 {
        NOMINAL_SAMPLE_RATE
    }

    fn create_recognizer(&mut self, model: &Model, sample_rate: f32) -> Result<Recognizer> {
        let mut recognizer = Recognizer::new(model, sample_rate)
            .ok_or_else(|| VoxError::Engine(format!("cannot create recognizer @ {sample_rate} Hz")))?;
        recognizer.set_words(false);
        Ok(recognizer)
    }

    fn accept_waveform(
        &mut self,
        recognizer: &mut Recognizer,
        buffer: HeapAddr,
        sample_count: usize,
    ) -> Result<bool> {
        let pcm: Vec<i16> = self
            .heap
            .read(buffer, sample_count)?
            .iter()
            .map(|s| s.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect();
        match recognizer.accept_waveform(&pcm) {
            Ok(DecodingState::Finalized) => Ok(true),
            Ok(DecodingState::Running) => Ok(false),
            Ok(DecodingState::Failed) => Err(VoxError::Engine("vosk decoding failed".into())),
            Err(e) => Err(VoxError::Engine(format!("vosk rejected waveform: {e}"))),
        }
    }

    fn result(&mut self, recognizer: &mut Recognizer) -> String {
        complete_text(recognizer.result())
    }

    fn partial_result(&mut self, recognizer: &mut Recognizer) -> String {
        json!({ "partial": recognizer.partial_result().partial }).to_string()
    }

    fn final_result(&mut self, recognizer: &mut Recognizer) -> String {
        complete_text(recognizer.final_result())
    }

    fn dispose_recognizer(&mut self, recognizer: Recognizer) {
        drop(recognizer);
    }

    fn dispose_model(&mut self, model: Model) {
        drop(model);
    }

    fn allocate(&mut self, bytes: usize) -> Result<HeapAddr> {
        self.heap.allocate(bytes)
    }

    fn free(&mut self, addr: HeapAddr) {
        self.heap.free(addr);
    }

    fn write_samples(&mut self, addr: HeapAddr, samples: &[f32]) -> Result<()> {
        self.heap.write(addr, samples)
    }
}
