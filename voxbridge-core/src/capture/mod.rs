//! Microphone capture state machine.
//!
//! ## Lifecycle
//!
//! ```text
//! set_active(true)  → Starting → before_activate hook
//!                              → acquire device (spawn_blocking)
//!                              → connect graph, spawn pump  → Active
//! set_active(false) → Stopping → stop pump, disconnect graph (reverse)
//!                              → stop device tracks
//!                              → after_deactivate hook      → Inactive
//! ```
//!
//! Transitions are serialised through a pending-operation token: every
//! request waits for the previous one to finish before it starts, so a
//! reversal queues behind the transition it reverses. A failing
//! `process_buffer` hook deactivates the session from inside the pump.
//!
//! The device callback writes into an SPSC ring; the pump task drains it on
//! the Tokio runtime, so buffers reach the hook one at a time and in order.

pub mod graph;

use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Weak,
};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::buffering::{chunk::AudioBuffer, create_audio_ring, AudioConsumer, AudioProducer};
use crate::error::{Result, VoxError};
use crate::ipc::events::{CaptureState, CaptureStateEvent};

pub use graph::{BufferStage, GainStage, ProcessingGraph, Stage};

/// How long the pump sleeps when the ring is empty.
const PUMP_IDLE: Duration = Duration::from_millis(5);

/// Capacity of the state-event broadcast channel.
const STATE_CHANNEL_CAPACITY: usize = 64;

/// Frames per buffer handed to `process_buffer`.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Capture-side configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub buffer_size: usize,
    pub channels: u16,
    /// Input device name to try first.
    pub preferred_device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            channels: 1,
            preferred_device: None,
        }
    }
}

impl CaptureConfig {
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            channels: self.channels,
            preferred_device: self.preferred_device.clone(),
        }
    }
}

/// What the capture side asks of an input device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub channels: u16,
    pub preferred_device: Option<String>,
}

/// Grants access to input devices.
pub trait AudioSource: Send + Sync + 'static {
    /// # Errors
    /// `VoxError::DeviceAcquisition` when no usable device is available.
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn InputDevice>>;
}

/// An acquired input device. Produces mono f32 frames once started.
pub trait InputDevice: Send {
    fn name(&self) -> &str;

    fn sample_rate(&self) -> u32;

    fn start(&mut self, producer: AudioProducer) -> Result<()>;

    /// Stop every track and release the device. Idempotent.
    fn stop_all_tracks(&mut self);
}

/// Behaviour plugged into a [`MicrophoneProcessor`].
#[async_trait]
pub trait CaptureHooks: Send + Sync + 'static {
    /// Handle one fixed-size buffer. An error ends the session.
    fn process_buffer(&self, buffer: AudioBuffer) -> Result<()>;

    /// Stages inserted between the device and the buffer stage, in order.
    fn create_intermediate_stages(&self, _sample_rate: u32) -> Vec<Box<dyn Stage>> {
        Vec::new()
    }

    /// Runs before the device is acquired. An error aborts activation.
    async fn before_activate(&self) -> Result<()> {
        Ok(())
    }

    /// Runs after the device is released, and to undo a successful
    /// `before_activate` when activation fails later on.
    async fn after_deactivate(&self) -> Result<()> {
        Ok(())
    }
}

struct CaptureSession {
    device: Box<dyn InputDevice>,
    stop: Arc<AtomicBool>,
    pump: JoinHandle<ProcessingGraph>,
}

struct Core<H> {
    hooks: H,
    source: Arc<dyn AudioSource>,
    config: CaptureConfig,
    state: Mutex<CaptureState>,
    session: Mutex<Option<CaptureSession>>,
    /// Completes when the most recently requested transition has finished.
    pending: Mutex<Option<oneshot::Receiver<()>>>,
    events: broadcast::Sender<CaptureStateEvent>,
    seq: AtomicU64,
}

/// Capture state machine with pluggable per-buffer processing.
pub struct MicrophoneProcessor<H: CaptureHooks> {
    core: Arc<Core<H>>,
}

impl<H: CaptureHooks> MicrophoneProcessor<H> {
    pub fn new(hooks: H, source: Arc<dyn AudioSource>, config: CaptureConfig) -> Self {
        let (events, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            core: Arc::new(Core {
                hooks,
                source,
                config,
                state: Mutex::new(CaptureState::Inactive),
                session: Mutex::new(None),
                pending: Mutex::new(None),
                events,
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// Request activation or deactivation.
    ///
    /// The transition is queued immediately; the returned future resolves
    /// with `active` once it has completed. Must be called from within a
    /// Tokio runtime.
    pub fn set_active(&self, active: bool) -> impl Future<Output = Result<bool>> + Send + 'static {
        let outcome = Core::transition(&self.core, active);
        async move { outcome.await.map_err(|_| VoxError::Disconnected)? }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> CaptureState {
        *self.core.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == CaptureState::Active
    }

    /// Subscribe to state transitions, in order.
    pub fn subscribe_state(&self) -> broadcast::Receiver<CaptureStateEvent> {
        self.core.events.subscribe()
    }

    pub fn hooks(&self) -> &H {
        &self.core.hooks
    }
}

impl<H: CaptureHooks> Core<H> {
    /// Queue a transition behind the current token and make it the new token.
    fn transition(core: &Arc<Self>, active: bool) -> oneshot::Receiver<Result<bool>> {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let previous = core.pending.lock().replace(done_rx);
        let (result_tx, result_rx) = oneshot::channel();
        let core = Arc::clone(core);

        tokio::spawn(async move {
            if let Some(previous) = previous {
                // Err only means the previous task is gone; either way it is done.
                let _ = previous.await;
            }
            let outcome = if active {
                core.activate().await
            } else {
                core.deactivate().await
            };
            let _ = result_tx.send(outcome.map(|()| active));
            drop(done_tx);
        });
        result_rx
    }

    async fn activate(self: &Arc<Self>) -> Result<()> {
        if self.session.lock().is_some() {
            debug!("capture already active");
            return Ok(());
        }
        self.set_state(CaptureState::Starting, None);

        if let Err(e) = self.hooks.before_activate().await {
            warn!("activation aborted: {e}");
            self.set_state(CaptureState::Inactive, Some(e.to_string()));
            return Err(e);
        }

        match self.open_session().await {
            Ok(session) => {
                info!(device = session.device.name(), "capture active");
                *self.session.lock() = Some(session);
                self.set_state(CaptureState::Active, None);
                Ok(())
            }
            Err(e) => {
                warn!("capture activation failed: {e}");
                if let Err(rollback) = self.hooks.after_deactivate().await {
                    warn!("rollback after failed activation also failed: {rollback}");
                }
                self.set_state(CaptureState::Inactive, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn open_session(self: &Arc<Self>) -> Result<CaptureSession> {
        let source = Arc::clone(&self.source);
        let constraints = self.config.constraints();
        let acquire = move || -> Result<(Box<dyn InputDevice>, AudioConsumer)> {
            let mut device = source.acquire(&constraints)?;
            let (producer, consumer) = create_audio_ring();
            if let Err(e) = device.start(producer) {
                device.stop_all_tracks();
                return Err(e);
            }
            Ok((device, consumer))
        };
        let (device, consumer) = tokio::task::spawn_blocking(acquire)
            .await
            .map_err(|e| VoxError::DeviceAcquisition(format!("device task failed: {e}")))??;

        let sample_rate = device.sample_rate();
        let stages = self.hooks.create_intermediate_stages(sample_rate);
        let connected = ProcessingGraph::connect(
            device.name(),
            consumer,
            stages,
            self.config.buffer_size,
            sample_rate,
        );
        let graph = match connected {
            Ok(graph) => graph,
            Err(e) => {
                release_device(device).await;
                return Err(e);
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let pump = tokio::spawn(pump(Arc::downgrade(self), graph, Arc::clone(&stop)));
        Ok(CaptureSession { device, stop, pump })
    }

    async fn deactivate(&self) -> Result<()> {
        let Some(session) = self.session.lock().take() else {
            debug!("capture already inactive");
            return Ok(());
        };
        self.set_state(CaptureState::Stopping, None);

        let CaptureSession { device, stop, pump } = session;
        stop.store(true, Ordering::Release);
        match pump.await {
            Ok(mut graph) => {
                graph.disconnect();
            }
            Err(e) => warn!("capture pump ended abnormally: {e}"),
        }
        release_device(device).await;

        let outcome = self.hooks.after_deactivate().await;
        let detail = outcome.as_ref().err().map(|e| e.to_string());
        self.set_state(CaptureState::Inactive, detail);
        info!("capture inactive");
        outcome
    }

    fn set_state(&self, state: CaptureState, detail: Option<String>) {
        *self.state.lock() = state;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(?state, seq, "capture state");
        // No subscribers is fine.
        let _ = self.events.send(CaptureStateEvent { seq, state, detail });
    }
}

impl<H> Drop for Core<H> {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.get_mut().take() {
            warn!("capture dropped while active; releasing device");
            session.stop.store(true, Ordering::Release);
            session.device.stop_all_tracks();
        }
    }
}

async fn release_device(device: Box<dyn InputDevice>) {
    let name = device.name().to_string();
    let released = tokio::task::spawn_blocking(move || {
        let mut device = device;
        device.stop_all_tracks();
    })
    .await;
    match released {
        Ok(()) => debug!(device = %name, "device released"),
        Err(e) => warn!(device = %name, "device release failed: {e}"),
    }
}

/// Feed buffers from the graph to the hook until told to stop.
///
/// Returns the graph so the deactivating side can disconnect it. A hook
/// failure queues a deactivation and ends the pump immediately.
async fn pump<H: CaptureHooks>(
    core: Weak<Core<H>>,
    mut graph: ProcessingGraph,
    stop: Arc<AtomicBool>,
) -> ProcessingGraph {
    while !stop.load(Ordering::Acquire) {
        let buffers = graph.pull();
        if buffers.is_empty() {
            tokio::time::sleep(PUMP_IDLE).await;
            continue;
        }
        let Some(core) = core.upgrade() else {
            break;
        };
        for buffer in buffers {
            if let Err(e) = core.hooks.process_buffer(buffer) {
                error!("processing audio buffer failed, stopping: {e}");
                stop.store(true, Ordering::Release);
                drop(Core::transition(&core, false));
                return graph;
            }
        }
    }
    graph
}
