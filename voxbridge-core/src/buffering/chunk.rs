//! Audio value types handed between the capture graph, the orchestrator and
//! the worker thread.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxError};

/// A contiguous block of mono samples at a known sample rate.
///
/// Moved (never cloned) into a `processAudioChunk` envelope, so the capture
/// side loses access to the samples once the chunk is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunk {
    /// Mono f32 samples, already scaled to the range the engine expects.
    #[serde(rename = "data")]
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
    /// Duration in seconds.
    pub duration: f64,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration = if sample_rate == 0 {
            0.0
        } else {
            samples.len() as f64 / sample_rate as f64
        };
        Self {
            samples,
            sample_rate,
            duration,
        }
    }

    /// Size in bytes of the sample payload.
    pub fn byte_len(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Sample storage of one channel as delivered by the processing graph.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    Float32(Vec<f32>),
    Int16(Vec<i16>),
}

/// One fixed-size buffer handed to the per-buffer hook.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<ChannelData>,
    sample_rate: u32,
    length: usize,
}

impl AudioBuffer {
    pub fn new(channels: Vec<ChannelData>, sample_rate: u32) -> Self {
        let length = channels
            .first()
            .map(|c| match c {
                ChannelData::Float32(s) => s.len(),
                ChannelData::Int16(s) => s.len(),
            })
            .unwrap_or(0);
        Self {
            channels,
            sample_rate,
            length,
        }
    }

    /// Single-channel float buffer, the shape the capture graph produces.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![ChannelData::Float32(samples)], sample_rate)
    }

    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames per channel.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.length as f64 / self.sample_rate as f64
    }

    /// Take ownership of the first channel as float samples.
    ///
    /// # Errors
    /// `VoxError::BufferValidation` when the buffer has no channels or the
    /// first channel is not float data.
    pub fn into_first_float_channel(self) -> Result<(Vec<f32>, u32)> {
        if self.channels.is_empty() {
            return Err(VoxError::BufferValidation(format!(
                "audio buffer contained {} channels",
                self.channels.len()
            )));
        }
        let sample_rate = self.sample_rate;
        match self.channels.into_iter().next() {
            Some(ChannelData::Float32(samples)) => Ok((samples, sample_rate)),
            Some(ChannelData::Int16(samples)) => Err(VoxError::BufferValidation(format!(
                "channel data is not f32 as expected ({} i16 samples)",
                samples.len()
            ))),
            None => Err(VoxError::BufferValidation("audio buffer had no channel data".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_duration_follows_sample_rate() {
        let chunk = AudioChunk::new(vec![0.0; 8_000], 16_000);
        assert!((chunk.duration - 0.5).abs() < 1e-9);
        assert_eq!(chunk.byte_len(), 32_000);
    }

    #[test]
    fn chunk_serializes_samples_as_data() {
        let chunk = AudioChunk::new(vec![0.5, -0.5], 8_000);
        let json = serde_json::to_value(&chunk).expect("serialize chunk");
        assert_eq!(json["data"].as_array().map(|a| a.len()), Some(2));
        assert_eq!(json["sampleRate"], 8_000);
        assert!(json.get("duration").is_some());
    }

    #[test]
    fn buffer_without_channels_is_rejected() {
        let buffer = AudioBuffer::new(vec![], 16_000);
        assert_eq!(buffer.number_of_channels(), 0);
        assert!(matches!(
            buffer.into_first_float_channel(),
            Err(VoxError::BufferValidation(_))
        ));
    }

    #[test]
    fn integer_channel_data_is_rejected() {
        let buffer = AudioBuffer::new(vec![ChannelData::Int16(vec![1, 2, 3])], 16_000);
        assert!(matches!(
            buffer.into_first_float_channel(),
            Err(VoxError::BufferValidation(_))
        ));
    }

    #[test]
    fn mono_buffer_hands_over_its_samples() {
        let buffer = AudioBuffer::mono(vec![0.25; 4_096], 48_000);
        assert_eq!(buffer.len(), 4_096);
        let (samples, rate) = buffer.into_first_float_channel().expect("float channel");
        assert_eq!(samples.len(), 4_096);
        assert_eq!(rate, 48_000);
    }
}
