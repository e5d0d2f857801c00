//! Foreground recognizer: microphone capture wired to the recognition worker.
//!
//! Activation calls `start` on the worker and waits for it before the device
//! is opened. Deactivation closes the device first and then calls `stop`, so
//! the final transcript push is seen before `set_active(false)` resolves.
//! Every buffer in between is scaled into the i16 range and cast to the
//! worker as a `processAudioChunk`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::buffering::chunk::{AudioBuffer, AudioChunk};
use crate::capture::{
    AudioSource, CaptureConfig, CaptureHooks, GainStage, MicrophoneProcessor, Stage,
};
use crate::error::Result;
use crate::ipc::events::{CaptureState, CaptureStateEvent, RecognitionResult};
use crate::protocol::{RecognizerClient, RecognizerMethod, RecognizerTransport};
use crate::rpc::RpcClient;

/// Factor taking [-1.0, 1.0] samples to the signed 16-bit range.
pub const INT16_GAIN: f32 = 32_768.0;

#[derive(Debug, Clone)]
pub struct RecognizerOptions {
    pub capture: CaptureConfig,
    pub gain: f32,
    /// Applied to `start`/`stop`; `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
}

impl Default for RecognizerOptions {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            gain: INT16_GAIN,
            call_timeout: None,
        }
    }
}

/// Capture hooks that forward audio to the worker.
pub struct RecognizerHooks {
    client: RecognizerClient,
    gain: f32,
    call_timeout: Option<Duration>,
}

impl RecognizerHooks {
    async fn call(&self, method: RecognizerMethod) -> Result<()> {
        let reply = match self.call_timeout {
            Some(timeout) => {
                self.client
                    .call_with_timeout(method, Vec::new(), timeout)
                    .await
            }
            None => self.client.call(method, Vec::new()).await,
        };
        reply.map(|_| ())
    }
}

#[async_trait]
impl CaptureHooks for RecognizerHooks {
    fn process_buffer(&self, buffer: AudioBuffer) -> Result<()> {
        let (samples, sample_rate) = buffer.into_first_float_channel()?;
        self.client.cast(
            RecognizerMethod::ProcessAudioChunk,
            vec![AudioChunk::new(samples, sample_rate)],
        );
        Ok(())
    }

    fn create_intermediate_stages(&self, _sample_rate: u32) -> Vec<Box<dyn Stage>> {
        vec![Box::new(GainStage::new(self.gain))]
    }

    async fn before_activate(&self) -> Result<()> {
        self.call(RecognizerMethod::Start).await
    }

    async fn after_deactivate(&self) -> Result<()> {
        self.call(RecognizerMethod::Stop).await
    }
}

/// Streams microphone audio to a recognition worker and reports transcripts.
pub struct Recognizer {
    capture: MicrophoneProcessor<RecognizerHooks>,
}

impl Recognizer {
    /// Connect to a worker transport.
    ///
    /// `on_result` runs for every push that carries a `text` or `partial`
    /// string; other pushes are ignored. Must be called from within a Tokio
    /// runtime.
    pub fn new<F>(
        transport: RecognizerTransport,
        source: Arc<dyn AudioSource>,
        options: RecognizerOptions,
        on_result: F,
    ) -> Self
    where
        F: Fn(RecognitionResult) + Send + 'static,
    {
        let client = RpcClient::connect(transport, move |payload: Value| {
            match RecognitionResult::from_payload(&payload) {
                Some(result) => on_result(result),
                None => debug!(%payload, "ignoring push that is not a recognition result"),
            }
        });
        let hooks = RecognizerHooks {
            client,
            gain: options.gain,
            call_timeout: options.call_timeout,
        };
        Self {
            capture: MicrophoneProcessor::new(hooks, source, options.capture),
        }
    }

    /// Start or stop recognition. Resolves with `active` once the transition
    /// (including the worker round trip) has completed.
    pub fn set_active(&self, active: bool) -> impl Future<Output = Result<bool>> + Send + 'static {
        self.capture.set_active(active)
    }

    pub fn state(&self) -> CaptureState {
        self.capture.state()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<CaptureStateEvent> {
        self.capture.subscribe_state()
    }

    /// Calls to the worker still awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.capture.hooks().client.in_flight()
    }
}
