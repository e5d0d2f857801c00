//! `StubEngine`: deterministic backend with no native dependency.
//!
//! Lets the full capture → channel → worker pipeline run end-to-end without a
//! real model. It treats energetic chunks as speech and finalises an
//! utterance on the first quiet chunk after enough speech:
//!
//! - speech chunk   → `{"partial": "…"}`
//! - silence        → `{"partial": ""}`
//! - end of speech  → `{"text": "[stub: <N> samples @ <SR> Hz]"}`

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{HeapAddr, NativeHeap, SpeechEngine};
use crate::error::{Result, VoxError};
use crate::storage::{is_cached, ModelStore, CACHE_MARKER};

/// Samples arrive scaled to the i16 range; RMS is compared after undoing that.
const INT16_SCALE: f32 = 32_768.0;
const SPEECH_RMS: f32 = 0.02;

pub struct StubModel {
    path: PathBuf,
    allow_downsampling: bool,
}

pub struct StubRecognizer {
    sample_rate: f32,
    utterance_samples: usize,
    partial: String,
    last_final: String,
}

/// Echo-style stub engine.
#[derive(Debug, Default)]
pub struct StubEngine {
    heap: NativeHeap,
    utterance_count: u32,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live native allocations (for leak checks).
    pub fn live_allocations(&self) -> usize {
        self.heap.live_blocks()
    }

    fn min_utterance(sample_rate: f32) -> usize {
        (sample_rate / 4.0) as usize
    }

    fn commit(&mut self, recognizer: &mut StubRecognizer) {
        self.utterance_count += 1;
        recognizer.last_final = format!(
            "[stub: {} samples @ {} Hz]",
            recognizer.utterance_samples, recognizer.sample_rate as u32
        );
        recognizer.utterance_samples = 0;
        recognizer.partial.clear();
    }
}

impl SpeechEngine for StubEngine {
    type Model = StubModel;
    type Recognizer = StubRecognizer;

    fn initialize(&mut self) -> Result<()> {
        debug!("StubEngine::initialize: no-op");
        Ok(())
    }

    fn load_model(&mut self, path: &Path) -> Result<StubModel> {
        if !path.is_dir() {
            return Err(VoxError::ModelLoad(format!(
                "model directory {} not found",
                path.display()
            )));
        }
        Ok(StubModel {
            path: path.to_path_buf(),
            allow_downsampling: false,
        })
    }

    fn set_downsampling(&mut self, model: &mut StubModel, allow: bool) {
        model.allow_downsampling = allow;
    }

    fn sample_frequency(&self, _model: &StubModel) -> f32 {
        16_000.0
    }

    fn create_recognizer(&mut self, model: &StubModel, sample_rate: f32) -> Result<StubRecognizer> {
        if sample_rate <= 0.0 {
            return Err(VoxError::Engine(format!("invalid sample rate {sample_rate}")));
        }
        debug!(
            model = %model.path.display(),
            downsampling = model.allow_downsampling,
            sample_rate,
            "StubEngine: new recognizer"
        );
        Ok(StubRecognizer {
            sample_rate,
            utterance_samples: 0,
            partial: String::new(),
            last_final: String::new(),
        })
    }

    fn accept_waveform(
        &mut self,
        recognizer: &mut StubRecognizer,
        buffer: HeapAddr,
        sample_count: usize,
    ) -> Result<bool> {
        let samples = self.heap.read(buffer, sample_count)?;
        let rms = if samples.is_empty() {
            0.0
        } else {
            let sum_sq: f32 = samples.iter().map(|s| (s / INT16_SCALE).powi(2)).sum();
            (sum_sq / samples.len() as f32).sqrt()
        };

        if rms >= SPEECH_RMS {
            recognizer.utterance_samples += sample_count;
            recognizer.partial = "\u{2026}".to_string(); // "…"
            return Ok(false);
        }

        if recognizer.utterance_samples >= Self::min_utterance(recognizer.sample_rate) {
            self.commit(recognizer);
            return Ok(true);
        }
        // Too short to commit; discard it.
        recognizer.utterance_samples = 0;
        recognizer.partial.clear();
        Ok(false)
    }

    fn result(&mut self, recognizer: &mut StubRecognizer) -> String {
        json!({ "text": recognizer.last_final }).to_string()
    }

    fn partial_result(&mut self, recognizer: &mut StubRecognizer) -> String {
        json!({ "partial": recognizer.partial }).to_string()
    }

    fn final_result(&mut self, recognizer: &mut StubRecognizer) -> String {
        if recognizer.utterance_samples > 0 {
            self.commit(recognizer);
        } else {
            recognizer.last_final.clear();
        }
        json!({ "text": recognizer.last_final }).to_string()
    }

    fn dispose_recognizer(&mut self, _recognizer: StubRecognizer) {
        debug!("StubEngine: recognizer disposed");
    }

    fn dispose_model(&mut self, model: StubModel) {
        debug!(model = %model.path.display(), "StubEngine: model disposed");
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

/// Store for the stub engine: creates an empty model directory.
#[derive(Debug, Clone, Default)]
pub struct StubModelStore;

#[async_trait]
impl ModelStore for StubModelStore {
    async fn ensure_cached(&self, model_ref: &str, destination: &Path) -> Result<()> {
        if is_cached(destination) {
            return Ok(());
        }
        fs::create_dir_all(destination)?;
        fs::write(destination.join(CACHE_MARKER), model_ref)?;
        Ok(())
    }
}
