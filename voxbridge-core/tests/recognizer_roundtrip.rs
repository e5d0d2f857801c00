use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use voxbridge_core::buffering::{AudioProducer, Producer};
use voxbridge_core::capture::{AudioSource, CaptureConfig, CaptureConstraints, InputDevice};
use voxbridge_core::{
    spawn_worker, CaptureState, CaptureStateEvent, DirModelStore, RecognitionResult, Recognizer,
    RecognizerOptions, Result, SegmentKind, StubEngine, StubModelStore, VoxError, WorkerConfig,
};

const RATE: u32 = 16_000;
const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct DeviceLog {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

/// Microphone that delivers a fixed recording as soon as it is started.
struct ScriptedMic {
    recording: Vec<f32>,
    log: Arc<DeviceLog>,
}

struct ScriptedTrack {
    recording: Vec<f32>,
    log: Arc<DeviceLog>,
    live: bool,
}

impl AudioSource for ScriptedMic {
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn InputDevice>> {
        assert_eq!(constraints.channels, 1);
        self.log.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedTrack {
            recording: self.recording.clone(),
            log: Arc::clone(&self.log),
            live: false,
        }))
    }
}

impl InputDevice for ScriptedTrack {
    fn name(&self) -> &str {
        "scripted-mic"
    }

    fn sample_rate(&self) -> u32 {
        RATE
    }

    fn start(&mut self, mut producer: AudioProducer) -> Result<()> {
        self.live = true;
        let written = producer.push_slice(&self.recording);
        assert_eq!(written, self.recording.len());
        Ok(())
    }

    fn stop_all_tracks(&mut self) {
        if std::mem::take(&mut self.live) {
            self.log.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct Harness {
    recognizer: Recognizer,
    results: mpsc::UnboundedReceiver<RecognitionResult>,
    states: broadcast::Receiver<CaptureStateEvent>,
    devices: Arc<DeviceLog>,
    worker: JoinHandle<()>,
}

fn scratch(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("voxbridge-it-{tag}-{}", std::process::id()))
}

fn harness(tag: &str, recording: Vec<f32>, buffer_size: usize) -> Harness {
    let config = WorkerConfig {
        model_ref: "stub-model".into(),
        storage_root: scratch(tag),
        allow_downsampling: true,
    };
    let (transport, worker) =
        spawn_worker(StubEngine::new(), StubModelStore, config).expect("spawn worker");
    build(transport, worker, recording, buffer_size)
}

fn build(
    transport: voxbridge_core::protocol::RecognizerTransport,
    worker: JoinHandle<()>,
    recording: Vec<f32>,
    buffer_size: usize,
) -> Harness {
    let devices = Arc::new(DeviceLog::default());
    let source = Arc::new(ScriptedMic {
        recording,
        log: Arc::clone(&devices),
    });
    let options = RecognizerOptions {
        capture: CaptureConfig {
            buffer_size,
            ..CaptureConfig::default()
        },
        call_timeout: Some(WAIT),
        ..RecognizerOptions::default()
    };
    let (tx, results) = mpsc::unbounded_channel();
    let recognizer = Recognizer::new(transport, source, options, move |result| {
        let _ = tx.send(result);
    });
    let states = recognizer.subscribe_state();
    Harness {
        recognizer,
        results,
        states,
        devices,
        worker,
    }
}

impl Harness {
    async fn next_result(&mut self) -> RecognitionResult {
        tokio::time::timeout(WAIT, self.results.recv())
            .await
            .expect("timed out waiting for a result")
            .expect("result channel closed")
    }

    fn drain_states(&mut self) -> Vec<CaptureState> {
        let mut log = Vec::new();
        while let Ok(event) = self.states.try_recv() {
            log.push(event.state);
        }
        log
    }

    async fn shutdown(self) {
        let Harness {
            recognizer, worker, ..
        } = self;
        assert_eq!(recognizer.in_flight(), 0);
        drop(recognizer);
        tokio::task::spawn_blocking(move || worker.join())
            .await
            .expect("join task")
            .expect("worker thread panicked");
    }
}

fn speech(samples: usize) -> Vec<f32> {
    vec![0.25; samples]
}

fn silence(samples: usize) -> Vec<f32> {
    vec![0.0; samples]
}

#[tokio::test]
async fn one_second_of_silence_yields_an_empty_partial() {
    let mut h = harness("silence", silence(RATE as usize), RATE as usize);

    assert!(h.recognizer.set_active(true).await.unwrap());
    let first = h.next_result().await;
    assert_eq!(first, RecognitionResult::partial(""));

    assert!(!h.recognizer.set_active(false).await.unwrap());
    // The stop flush is the only final, and it carries no text.
    let flushed = h.results.try_recv().expect("final flush before stop resolved");
    assert_eq!(flushed, RecognitionResult::final_text(""));
    assert!(h.results.try_recv().is_err());

    assert_eq!(h.devices.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(h.devices.released.load(Ordering::SeqCst), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn final_segment_arrives_before_stop_resolves() {
    let mut recording = speech(4_096);
    recording.extend(silence(4_096));
    let mut h = harness("final", recording, 4_096);

    h.recognizer.set_active(true).await.unwrap();
    let first = h.next_result().await;
    assert_eq!(first.kind, SegmentKind::Partial);

    // Both buffers were cast in the same pump pass, ahead of `stop`.
    h.recognizer.set_active(false).await.unwrap();
    let committed = h.results.try_recv().expect("final pushed before stop reply");
    assert_eq!(
        committed,
        RecognitionResult::final_text("[stub: 4096 samples @ 16000 Hz]")
    );
    assert_eq!(
        h.results.try_recv().expect("stop flush"),
        RecognitionResult::final_text("")
    );
    h.shutdown().await;
}

const CYCLE: [CaptureState; 4] = [
    CaptureState::Starting,
    CaptureState::Active,
    CaptureState::Stopping,
    CaptureState::Inactive,
];

#[tokio::test]
async fn reversal_completes_before_the_next_transition() {
    let mut h = harness("reverse", Vec::new(), 4_096);
    h.recognizer.set_active(true).await.unwrap();

    let off = h.recognizer.set_active(false);
    let on = h.recognizer.set_active(true);
    assert!(!off.await.unwrap());
    assert!(on.await.unwrap());
    h.recognizer.set_active(false).await.unwrap();

    assert_eq!(h.drain_states(), [CYCLE, CYCLE].concat());
    assert_eq!(h.devices.acquired.load(Ordering::SeqCst), 2);
    assert_eq!(h.devices.released.load(Ordering::SeqCst), 2);
    h.shutdown().await;
}

#[tokio::test]
async fn interleaved_requests_never_double_activate() {
    let mut h = harness("interleave", silence(512), 4_096);
    let requests = [true, true, false, true, false, false, true, false];
    let pending: Vec<_> = requests
        .iter()
        .map(|&active| h.recognizer.set_active(active))
        .collect();
    for (future, requested) in pending.into_iter().zip(requests) {
        assert_eq!(future.await.unwrap(), requested);
    }

    // Redundant requests are no-ops, so three full cycles remain.
    assert_eq!(h.drain_states(), [CYCLE, CYCLE, CYCLE].concat());
    assert_eq!(h.recognizer.state(), CaptureState::Inactive);
    h.shutdown().await;
}

#[tokio::test]
async fn missing_model_fails_activation_before_the_device_opens() {
    let config = WorkerConfig {
        model_ref: scratch("missing").join("no-such-model").display().to_string(),
        storage_root: scratch("missing-cache"),
        allow_downsampling: true,
    };
    let (transport, worker) =
        spawn_worker(StubEngine::new(), DirModelStore::new(), config).expect("spawn worker");
    let mut h = build(transport, worker, silence(4_096), 4_096);

    let result = h.recognizer.set_active(true).await;
    assert!(matches!(result, Err(VoxError::ModelLoad(_))), "{result:?}");
    assert_eq!(h.recognizer.state(), CaptureState::Inactive);
    assert_eq!(
        h.drain_states(),
        [CaptureState::Starting, CaptureState::Inactive]
    );
    assert_eq!(h.devices.acquired.load(Ordering::SeqCst), 0);
    h.shutdown().await;
}
