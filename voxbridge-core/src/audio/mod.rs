//! Microphone input through cpal.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not allocate, block or perform I/O; it only downmixes into a
//! pre-sized scratch vector and pushes into the SPSC ring.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms, so each started device owns
//! a dedicated `audio-capture` thread that builds the stream, keeps it alive
//! while the running flag is set and drops it on the same thread.

pub mod device;

#[cfg(feature = "audio-cpal")]
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use std::thread::{self, JoinHandle};
#[cfg(feature = "audio-cpal")]
use std::time::Duration;

#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

#[cfg(feature = "audio-cpal")]
use crate::buffering::{AudioProducer, Producer};
use crate::capture::{AudioSource, CaptureConstraints, InputDevice};
use crate::error::{Result, VoxError};

#[cfg(feature = "audio-cpal")]
const CAPTURE_THREAD_NAME: &str = "audio-capture";

/// How often the capture thread re-checks its running flag.
#[cfg(feature = "audio-cpal")]
const CAPTURE_POLL: Duration = Duration::from_millis(50);

/// Mono frames downmixed per block inside the callback. Larger callbacks are
/// split, so the scratch vector is sized once when the stream is built.
#[cfg(feature = "audio-cpal")]
const MONO_SCRATCH_FRAMES: usize = 8192;

/// The host's microphones.
#[derive(Debug, Clone, Default)]
pub struct CpalSource;

impl CpalSource {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "audio-cpal")]
impl AudioSource for CpalSource {
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn InputDevice>> {
        use cpal::traits::DeviceTrait;

        let device = device::resolve_input_device(constraints.preferred_device.as_deref())?;
        let name = device
            .name()
            .map_err(|e| VoxError::DeviceAcquisition(e.to_string()))?;
        let supported = device
            .default_input_config()
            .map_err(|e| VoxError::DeviceAcquisition(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        if channels != constraints.channels {
            info!(channels, wanted = constraints.channels, "input will be downmixed");
        }
        info!(device = %name, sample_rate, channels, "input device acquired");

        Ok(Box::new(CpalInputDevice {
            name,
            sample_rate,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }))
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl AudioSource for CpalSource {
    fn acquire(&self, _constraints: &CaptureConstraints) -> Result<Box<dyn InputDevice>> {
        Err(VoxError::DeviceAcquisition(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

/// An acquired cpal input device.
#[cfg(feature = "audio-cpal")]
pub struct CpalInputDevice {
    name: String,
    sample_rate: u32,
    /// Cleared to make the callback no-op and the capture thread exit.
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

#[cfg(feature = "audio-cpal")]
impl InputDevice for CpalInputDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, producer: AudioProducer) -> Result<()> {
        if self.thread.is_some() {
            return Err(VoxError::DeviceAcquisition(format!(
                "{} is already started",
                self.name
            )));
        }
        self.running.store(true, Ordering::SeqCst);

        // Sync oneshot: the capture thread reports whether the stream opened.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();
        let name = self.name.clone();
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name(CAPTURE_THREAD_NAME.to_string())
            .spawn(move || {
                let stream = match open_stream(&name, producer, Arc::clone(&running)) {
                    Ok(stream) => {
                        let _ = open_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                while running.load(Ordering::Acquire) {
                    thread::park_timeout(CAPTURE_POLL);
                }
                // Stream drops here, releasing the device on this thread.
                drop(stream);
                info!(device = %name, "input stream closed");
            })?;

        let opened = match open_rx.recv() {
            Ok(result) => result,
            Err(_) => Err(VoxError::DeviceAcquisition(
                "capture thread exited before opening the stream".into(),
            )),
        };
        match opened {
            Ok(()) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn stop_all_tracks(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!(device = %self.name, "capture thread panicked");
            }
        }
    }
}

#[cfg(feature = "audio-cpal")]
impl Drop for CpalInputDevice {
    fn drop(&mut self) {
        self.stop_all_tracks();
    }
}

#[cfg(feature = "audio-cpal")]
fn open_stream(
    name: &str,
    producer: AudioProducer,
    running: Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    use cpal::traits::{DeviceTrait, StreamTrait};
    use cpal::SampleFormat;

    let device = device::resolve_input_device(Some(name))?;
    let supported = device
        .default_input_config()
        .map_err(|e| VoxError::DeviceAcquisition(e.to_string()))?;
    let config = cpal::StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_mono_stream::<f32>(&device, &config, producer, running, |s| s),
        SampleFormat::I16 => build_mono_stream::<i16>(&device, &config, producer, running, |s| {
            s as f32 / 32_768.0
        }),
        SampleFormat::U8 => build_mono_stream::<u8>(&device, &config, producer, running, |s| {
            (s as f32 - 128.0) / 128.0
        }),
        other => {
            return Err(VoxError::GraphConstruction(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| VoxError::GraphConstruction(e.to_string()))?;
    Ok(stream)
}

#[cfg(feature = "audio-cpal")]
fn build_mono_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
    to_f32: fn(T) -> f32,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + 'static,
{
    use cpal::traits::DeviceTrait;

    let channels = usize::from(config.channels.max(1));
    // Allocated here, never inside the callback.
    let mut mono: Vec<f32> = Vec::with_capacity(MONO_SCRATCH_FRAMES);
    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                downmix_blocks(data, channels, to_f32, &mut mono, |block| {
                    let written = producer.push_slice(block);
                    if written < block.len() {
                        warn!("ring buffer full: dropped {} frames", block.len() - written);
                    }
                });
            },
            |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| VoxError::GraphConstruction(e.to_string()))
}

/// Downmix `data` in blocks that fit `scratch`'s existing capacity, handing
/// each block to `sink`. `scratch` never reallocates.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
fn downmix_blocks<T: Copy>(
    data: &[T],
    channels: usize,
    to_f32: fn(T) -> f32,
    scratch: &mut Vec<f32>,
    mut sink: impl FnMut(&[f32]),
) {
    let frames = scratch.capacity().max(1);
    for block in data.chunks(frames * channels.max(1)) {
        downmix_into(block, channels, to_f32, scratch);
        sink(scratch);
    }
}

/// Average interleaved frames into one normalised channel.
///
/// `out` is cleared and refilled.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
fn downmix_into<T: Copy>(data: &[T], channels: usize, to_f32: fn(T) -> f32, out: &mut Vec<f32>) {
    out.clear();
    if channels <= 1 {
        out.extend(data.iter().map(|&s| to_f32(s)));
        return;
    }
    out.extend(
        data.chunks_exact(channels)
            .map(|frame| frame.iter().map(|&s| to_f32(s)).sum::<f32>() / channels as f32),
    );
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn stereo_frames_are_averaged() {
        let mut out = Vec::new();
        downmix_into(&[0.5f32, -0.5, 1.0, 0.0], 2, |s| s, &mut out);
        assert_eq!(out.len(), 2);
        assert_relative_eq!(out[0], 0.0);
        assert_relative_eq!(out[1], 0.5);
    }

    #[test]
    fn large_callbacks_are_split_without_growing_the_scratch() {
        let mut scratch = Vec::with_capacity(4);
        let capacity = scratch.capacity();
        let data: Vec<f32> = (0..(capacity * 5 + 1) * 2).map(|i| i as f32).collect();

        let mut frames = Vec::new();
        downmix_blocks(&data, 2, |s| s, &mut scratch, |block| {
            assert!(block.len() <= capacity);
            frames.extend_from_slice(block);
        });

        assert_eq!(scratch.capacity(), capacity);
        assert_eq!(frames.len(), capacity * 5 + 1);
        assert_relative_eq!(frames[0], 0.5);
        assert_relative_eq!(frames[frames.len() - 1], data[data.len() - 2] + 0.5);
    }

    #[test]
    fn integer_formats_are_normalised() {
        let mut out = Vec::new();
        downmix_into(&[i16::MIN, 16_384], 1, |s| s as f32 / 32_768.0, &mut out);
        assert_relative_eq!(out[0], -1.0);
        assert_relative_eq!(out[1], 0.5);

        downmix_into(&[0u8, 128, 192], 1, |s| (s as f32 - 128.0) / 128.0, &mut out);
        assert_eq!(out.len(), 3);
        assert_relative_eq!(out[0], -1.0);
        assert_relative_eq!(out[1], 0.0);
        assert_relative_eq!(out[2], 0.5);
    }

    #[cfg(not(feature = "audio-cpal"))]
    #[test]
    fn acquisition_fails_without_backend() {
        let result = CpalSource::new().acquire(&CaptureConstraints {
            channels: 1,
            preferred_device: None,
        });
        assert!(matches!(result, Err(VoxError::DeviceAcquisition(_))));
    }
}
