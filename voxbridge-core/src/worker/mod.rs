//! Background recognition worker.
//!
//! Serves the recognizer methods over the RPC server half and owns one
//! `RecognitionSession` at a time:
//!
//! ```text
//! start()             → engine init (once) → ensure_cached → load model
//! processAudioChunk() → lazy recognizer → staging buffer → accept_waveform
//!                       → push {"partial"} | {"text"}
//! stop()              → push final transcript → dispose recognizer + model
//!                       → free staging buffer
//! ```
//!
//! Everything here runs on the worker thread's single-threaded runtime, so
//! one envelope is handled to completion before the next is looked at.

pub mod staging;

use std::path::PathBuf;
use std::thread::JoinHandle;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::buffering::chunk::AudioChunk;
use crate::engine::SpeechEngine;
use crate::error::{Result, VoxError};
use crate::protocol::{RecognizerMethod, RecognizerTransport};
use crate::rpc::{spawn_server, Outcome, Pusher, RpcServer};
use crate::storage::{cache_key, ModelStore};

pub use staging::StagingBuffer;

/// Name of the OS thread hosting the worker.
pub const WORKER_THREAD_NAME: &str = "recognizer-worker";

/// Worker-side configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Model reference handed to the [`ModelStore`].
    pub model_ref: String,
    /// Directory models are cached under.
    pub storage_root: PathBuf,
    pub allow_downsampling: bool,
}

impl WorkerConfig {
    /// Where the model for `model_ref` lives once cached.
    pub fn model_path(&self) -> PathBuf {
        self.storage_root.join(cache_key(&self.model_ref))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            model_ref: "vosk-model-small-en-us-0.15".to_string(),
            storage_root: PathBuf::from("models"),
            allow_downsampling: true,
        }
    }
}

/// Loaded model plus the per-stream state built on top of it.
struct RecognitionSession<E: SpeechEngine> {
    model: E::Model,
    /// Created on the first chunk, bound to that chunk's sample rate.
    recognizer: Option<E::Recognizer>,
    staging: StagingBuffer,
}

pub type WorkerServer<E, S> = RpcServer<RecognizerWorker<E, S>, RecognizerMethod, AudioChunk, Value>;

/// Server-side implementation of the recognizer methods.
pub struct RecognizerWorker<E: SpeechEngine, S: ModelStore> {
    engine: E,
    store: S,
    config: WorkerConfig,
    pusher: Pusher<Value>,
    engine_ready: bool,
    session: Option<RecognitionSession<E>>,
}

impl<E: SpeechEngine, S: ModelStore> RecognizerWorker<E, S> {
    pub fn new(engine: E, store: S, config: WorkerConfig, pusher: Pusher<Value>) -> Self {
        debug!(model = %config.model_ref, "RecognizerWorker constructed");
        Self {
            engine,
            store,
            config,
            pusher,
            engine_ready: false,
            session: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Load the engine and model and mark the session running.
    ///
    /// # Errors
    /// `VoxError::EngineLoad` or `VoxError::ModelLoad`.
    pub async fn start(&mut self) -> Result<()> {
        info!(model = %self.config.model_ref, "worker starting");
        if self.session.is_some() {
            warn!("start while running: closing the previous session");
            self.stop();
        }

        if !self.engine_ready {
            self.engine.initialize().map_err(|e| match e {
                VoxError::EngineLoad(_) => e,
                other => VoxError::EngineLoad(other.to_string()),
            })?;
            self.engine_ready = true;
        }

        let model_path = self.config.model_path();
        self.store
            .ensure_cached(&self.config.model_ref, &model_path)
            .await
            .map_err(as_model_load)?;

        let mut model = self.engine.load_model(&model_path).map_err(as_model_load)?;
        self.engine
            .set_downsampling(&mut model, self.config.allow_downsampling);
        info!(
            path = %model_path.display(),
            sample_frequency = self.engine.sample_frequency(&model),
            "model loaded"
        );

        self.session = Some(RecognitionSession {
            model,
            recognizer: None,
            staging: StagingBuffer::new(),
        });
        Ok(())
    }

    /// Flush the final transcript and release every session resource.
    /// A no-op when nothing is running.
    pub fn stop(&mut self) {
        info!("worker stopping");
        self.teardown(true);
    }

    /// Feed one chunk to the engine and push the resulting transcript.
    ///
    /// Chunks arriving while stopped are dropped and yield `Ok(None)`.
    pub fn process_audio_chunk(&mut self, chunk: AudioChunk) -> Result<Option<Value>> {
        let Some(session) = self.session.as_mut() else {
            debug!(samples = chunk.samples.len(), "not running, dropping chunk");
            return Ok(None);
        };
        let engine = &mut self.engine;

        let recognizer = match session.recognizer.take() {
            Some(existing) => existing,
            None => {
                let created = engine.create_recognizer(&session.model, chunk.sample_rate as f32)?;
                info!(sample_rate = chunk.sample_rate, "recognizer created");
                created
            }
        };
        let recognizer = session.recognizer.insert(recognizer);

        let addr = session.staging.ensure(engine, chunk.byte_len())?;
        engine.write_samples(addr, &chunk.samples)?;
        let raw = if engine.accept_waveform(recognizer, addr, chunk.samples.len())? {
            engine.result(recognizer)
        } else {
            engine.partial_result(recognizer)
        };

        let transcript: Value = serde_json::from_str(&raw)?;
        self.pusher.push(transcript.clone());
        Ok(Some(transcript))
    }

    /// Wrap the worker in a server with every method registered.
    pub fn into_server(self) -> WorkerServer<E, S> {
        let pusher = self.pusher.clone();
        RpcServer::new(self, pusher)
            .register(RecognizerMethod::Start, handle_start::<E, S>)
            .register(RecognizerMethod::Stop, handle_stop::<E, S>)
            .register(
                RecognizerMethod::ProcessAudioChunk,
                handle_process_audio_chunk::<E, S>,
            )
    }

    fn teardown(&mut self, flush: bool) {
        let Some(mut session) = self.session.take() else {
            debug!("no active session");
            return;
        };
        if let Some(mut recognizer) = session.recognizer.take() {
            if flush {
                let raw = self.engine.final_result(&mut recognizer);
                match serde_json::from_str::<Value>(&raw) {
                    Ok(transcript) => {
                        self.pusher.push(transcript);
                    }
                    Err(e) => warn!("discarding unparsable final transcript: {e}"),
                }
            }
            self.engine.dispose_recognizer(recognizer);
            debug!("recognizer disposed");
        }
        session.staging.release(&mut self.engine);
        self.engine.dispose_model(session.model);
        debug!("model disposed");
    }
}

impl<E: SpeechEngine, S: ModelStore> Drop for RecognizerWorker<E, S> {
    fn drop(&mut self) {
        // The client is gone by now; release without flushing.
        self.teardown(false);
    }
}

fn as_model_load(err: VoxError) -> VoxError {
    match err {
        VoxError::ModelLoad(_) => err,
        other => VoxError::ModelLoad(other.to_string()),
    }
}

fn handle_start<E: SpeechEngine, S: ModelStore>(
    worker: &mut RecognizerWorker<E, S>,
    _params: Vec<AudioChunk>,
) -> Result<Outcome<'_, Value>> {
    Ok(Outcome::Deferred(Box::pin(async move {
        worker.start().await?;
        Ok::<Option<Value>, VoxError>(None)
    })))
}

fn handle_stop<E: SpeechEngine, S: ModelStore>(
    worker: &mut RecognizerWorker<E, S>,
    _params: Vec<AudioChunk>,
) -> Result<Outcome<'_, Value>> {
    worker.stop();
    Ok(Outcome::Nothing)
}

fn handle_process_audio_chunk<E: SpeechEngine, S: ModelStore>(
    worker: &mut RecognizerWorker<E, S>,
    params: Vec<AudioChunk>,
) -> Result<Outcome<'_, Value>> {
    let chunk = params.into_iter().next().ok_or_else(|| {
        VoxError::InvalidParams("processAudioChunk expects one audio chunk".into())
    })?;
    Ok(match worker.process_audio_chunk(chunk)? {
        Some(transcript) => Outcome::Value(transcript),
        None => Outcome::Nothing,
    })
}

/// Start the worker on its own thread.
///
/// The engine and store are moved to the new thread; the returned transport
/// is the only way to reach them. The thread exits when the client side of
/// the transport is dropped.
pub fn spawn_worker<E, S>(
    engine: E,
    store: S,
    config: WorkerConfig,
) -> Result<(RecognizerTransport, JoinHandle<()>)>
where
    E: SpeechEngine + Send,
    S: ModelStore,
{
    let spawned = spawn_server(WORKER_THREAD_NAME, move |pusher| {
        RecognizerWorker::new(engine, store, config, pusher).into_server()
    })?;
    Ok(spawned)
}
