//! Linear processing graph: source → intermediate stages → fixed-size buffers.
//!
//! The graph is an explicit ordered chain. `connect` records one link per
//! adjacent pair of nodes; `disconnect` walks those links in reverse and
//! releases each downstream node before dropping the source.

use tracing::debug;

use crate::buffering::{chunk::AudioBuffer, AudioConsumer, Consumer, Observer};
use crate::error::{Result, VoxError};

/// In-place sample transform between the source and the buffer stage.
pub trait Stage: Send {
    fn label(&self) -> &str;

    fn process(&mut self, samples: &mut [f32]);

    /// Called once when the link feeding this stage is removed.
    fn disconnect(&mut self) {}
}

/// Multiplies every sample by a constant.
#[derive(Debug, Clone)]
pub struct GainStage {
    gain: f32,
}

impl GainStage {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl Stage for GainStage {
    fn label(&self) -> &str {
        "gain"
    }

    fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample *= self.gain;
        }
    }
}

/// Slices a continuous sample stream into buffers of exactly `size` frames.
#[derive(Debug)]
pub struct BufferStage {
    size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl BufferStage {
    pub fn new(size: usize, sample_rate: u32) -> Self {
        Self {
            size,
            sample_rate,
            pending: Vec::with_capacity(size * 2),
        }
    }

    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioBuffer> {
        self.pending.extend_from_slice(samples);
        let mut ready = Vec::new();
        while self.pending.len() >= self.size {
            let block: Vec<f32> = self.pending.drain(..self.size).collect();
            ready.push(AudioBuffer::mono(block, self.sample_rate));
        }
        ready
    }

    /// Samples waiting for a full buffer.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn clear(&mut self) {
        self.pending.clear();
    }
}

const BUFFER_LABEL: &str = "buffer";

/// One wired capture graph.
pub struct ProcessingGraph {
    source: Option<AudioConsumer>,
    stages: Vec<Box<dyn Stage>>,
    buffer: BufferStage,
    links: Vec<(String, String)>,
    scratch: Vec<f32>,
}

impl ProcessingGraph {
    /// Wire `source → stages… → buffer` as a strict chain.
    ///
    /// # Errors
    /// `VoxError::GraphConstruction` for a zero buffer size or sample rate.
    pub fn connect(
        source_label: &str,
        source: AudioConsumer,
        stages: Vec<Box<dyn Stage>>,
        buffer_size: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if buffer_size == 0 {
            return Err(VoxError::GraphConstruction("buffer size must be non-zero".into()));
        }
        if sample_rate == 0 {
            return Err(VoxError::GraphConstruction("device reported a 0 Hz sample rate".into()));
        }

        let labels: Vec<String> = std::iter::once(source_label.to_string())
            .chain(stages.iter().map(|s| s.label().to_string()))
            .chain(std::iter::once(BUFFER_LABEL.to_string()))
            .collect();
        let links: Vec<(String, String)> = labels
            .windows(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        for (from, to) in &links {
            debug!(%from, %to, "graph: connected");
        }

        Ok(Self {
            source: Some(source),
            stages,
            buffer: BufferStage::new(buffer_size, sample_rate),
            links,
            scratch: Vec::with_capacity(buffer_size),
        })
    }

    /// Current links, upstream first.
    pub fn links(&self) -> &[(String, String)] {
        &self.links
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_some()
    }

    /// Drain whatever the source has, run it through the stages and return
    /// every buffer that filled up.
    pub fn pull(&mut self) -> Vec<AudioBuffer> {
        let Some(source) = self.source.as_mut() else {
            return Vec::new();
        };
        let available = source.occupied_len();
        if available == 0 {
            return Vec::new();
        }
        self.scratch.resize(available, 0.0);
        let read = source.pop_slice(&mut self.scratch);
        self.scratch.truncate(read);

        for stage in self.stages.iter_mut() {
            stage.process(&mut self.scratch);
        }
        self.buffer.push(&self.scratch)
    }

    /// Tear the chain down in reverse order of connection and return the
    /// links in the order they were removed. Idempotent.
    pub fn disconnect(&mut self) -> Vec<(String, String)> {
        let links = std::mem::take(&mut self.links);
        // Link i feeds node i + 1, which is stages[i] or, past the end, the buffer.
        for (index, (from, to)) in links.iter().enumerate().rev() {
            if let Some(stage) = self.stages.get_mut(index) {
                stage.disconnect();
            } else {
                self.buffer.clear();
            }
            debug!(%from, %to, "graph: disconnected");
        }
        self.stages.clear();
        self.source = None;
        links.into_iter().rev().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use approx::assert_relative_eq;

    use super::*;
    use crate::buffering::{create_audio_ring, Producer};

    struct RecordingStage {
        label: String,
        released: Arc<AtomicUsize>,
        order: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    impl Stage for RecordingStage {
        fn label(&self) -> &str {
            &self.label
        }

        fn process(&mut self, _samples: &mut [f32]) {}

        fn disconnect(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
            self.order.lock().push(self.label.clone());
        }
    }

    #[test]
    fn gain_rescales_to_int16_range() {
        let mut gain = GainStage::new(32_768.0);
        let mut samples = [0.5, -1.0, 0.0];
        gain.process(&mut samples);
        assert_relative_eq!(samples[0], 16_384.0);
        assert_relative_eq!(samples[1], -32_768.0);
        assert_relative_eq!(samples[2], 0.0);
    }

    #[test]
    fn buffer_stage_emits_exact_sizes() {
        let mut stage = BufferStage::new(4, 16_000);
        assert!(stage.push(&[1.0, 2.0, 3.0]).is_empty());
        let ready = stage.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(ready.len(), 2);
        assert!(ready.iter().all(|b| b.len() == 4));
        assert_eq!(stage.pending(), 1);
    }

    #[test]
    fn pull_applies_stages_then_slices() {
        let (mut producer, consumer) = create_audio_ring();
        let mut graph = ProcessingGraph::connect(
            "mic",
            consumer,
            vec![Box::new(GainStage::new(2.0))],
            3,
            8_000,
        )
        .unwrap();

        producer.push_slice(&[0.25; 7]);
        let buffers = graph.pull();
        assert_eq!(buffers.len(), 2);
        let (samples, rate) = buffers[0].clone().into_first_float_channel().unwrap();
        assert_eq!(rate, 8_000);
        for s in samples {
            assert_relative_eq!(s, 0.5);
        }
    }

    #[test]
    fn disconnect_runs_in_reverse_and_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recording = |label: &str| -> Box<dyn Stage> {
            Box::new(RecordingStage {
                label: label.to_string(),
                released: Arc::clone(&released),
                order: Arc::clone(&order),
            })
        };
        let (_producer, consumer) = create_audio_ring();
        let mut graph =
            ProcessingGraph::connect("mic", consumer, vec![recording("a"), recording("b")], 16, 16_000)
                .unwrap();
        assert_eq!(graph.links().len(), 3);

        let removed = graph.disconnect();
        assert_eq!(
            removed,
            vec![
                ("b".to_string(), "buffer".to_string()),
                ("a".to_string(), "b".to_string()),
                ("mic".to_string(), "a".to_string()),
            ]
        );
        assert_eq!(*order.lock(), vec!["b".to_string(), "a".to_string()]);
        assert!(!graph.is_connected());

        assert!(graph.disconnect().is_empty());
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn zero_buffer_size_is_a_construction_error() {
        let (_producer, consumer) = create_audio_ring();
        assert!(matches!(
            ProcessingGraph::connect("mic", consumer, Vec::new(), 0, 16_000),
            Err(VoxError::GraphConstruction(_))
        ));
    }
}
