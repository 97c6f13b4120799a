use capture::{CaptureError, Frame, FrameSource};
use chrono::Local;
use gateway::display_channel;
use inference::{BoundingBox, DetectionFilter, InferenceEngine, LabelTable, RawDetection};
use pipeline::{
    ControlListener, Orchestrator, PipelineConfig, PipelineError, PipelineState, QueueFullPolicy,
    SessionFactory,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use store::paths::{LOAD_DETECTION, TERMINATE, TOTAL_COUNTS};
use store::{
    MemoryObjectStore, MemoryTree, ObjectMeta, ObjectStore, RemoteTree, StoreError, StoreHandles,
};

const HEALTHY: i64 = 0;
const DISEASED: i64 = 1;

// ========== Scripted collaborators ==========

#[derive(Default)]
struct Tally {
    delivered: AtomicUsize,
    released: AtomicUsize,
}

/// Yields `limit` synthetic frames (or forever), then reports the source as
/// exhausted.
struct ScriptedSource {
    next: u64,
    limit: Option<u64>,
    tally: Arc<Tally>,
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.limit.is_some_and(|limit| self.next > limit) {
            thread::sleep(Duration::from_millis(5));
            return Err(CaptureError::Released);
        }
        let frame = Frame::from_rgb(self.next, Local::now(), 32, 32, vec![60; 32 * 32 * 3])?;
        self.next += 1;
        self.tally.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(frame)
    }

    fn release(&mut self) {
        self.tally.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn raw(class_id: i64, confidence: f32) -> RawDetection {
    RawDetection::new(class_id, confidence, BoundingBox::new(2.0, 2.0, 20.0, 20.0))
}

/// The three-frame scenario: nothing, one Healthy, two Healthy and a weak
/// Diseased.
struct ScriptedEngine;

impl InferenceEngine for ScriptedEngine {
    fn infer(&mut self, frame: &Frame) -> anyhow::Result<Vec<RawDetection>> {
        Ok(match frame.number() {
            2 => vec![raw(HEALTHY, 0.9)],
            3 => vec![raw(HEALTHY, 0.85), raw(HEALTHY, 0.85), raw(DISEASED, 0.5)],
            _ => vec![],
        })
    }
}

/// Blocks the first inference until the test lets it through.
struct GatedEngine {
    entered: mpsc::Sender<()>,
    proceed: Mutex<mpsc::Receiver<()>>,
}

impl InferenceEngine for GatedEngine {
    fn infer(&mut self, _frame: &Frame) -> anyhow::Result<Vec<RawDetection>> {
        let _ = self.entered.send(());
        if let Ok(proceed) = self.proceed.lock() {
            let _ = proceed.recv();
        }
        Ok(vec![raw(HEALTHY, 0.95)])
    }
}

enum EngineKind {
    Scripted,
    Gated(Mutex<Option<GatedEngine>>),
    Missing,
}

struct ScriptedFactory {
    tally: Arc<Tally>,
    limit: Option<u64>,
    device_present: bool,
    engine: EngineKind,
}

impl ScriptedFactory {
    fn new(tally: Arc<Tally>, limit: Option<u64>, engine: EngineKind) -> Self {
        Self {
            tally,
            limit,
            device_present: true,
            engine,
        }
    }
}

impl SessionFactory for ScriptedFactory {
    fn open_source(&self) -> Result<Box<dyn FrameSource>, CaptureError> {
        if !self.device_present {
            return Err(CaptureError::NoDevice);
        }
        Ok(Box::new(ScriptedSource {
            next: 1,
            limit: self.limit,
            tally: self.tally.clone(),
        }))
    }

    fn load_engine(&self) -> anyhow::Result<Box<dyn InferenceEngine>> {
        match &self.engine {
            EngineKind::Scripted => Ok(Box::new(ScriptedEngine)),
            EngineKind::Gated(slot) => {
                let engine = slot
                    .lock()
                    .ok()
                    .and_then(|mut slot| slot.take())
                    .ok_or_else(|| anyhow::anyhow!("gated engine already used"))?;
                Ok(Box::new(engine))
            }
            EngineKind::Missing => anyhow::bail!("model file not found"),
        }
    }
}

/// Tree whose conditional writes panic, taking the persistence worker down.
#[derive(Default)]
struct PanickingTree(MemoryTree);

impl RemoteTree for PanickingTree {
    fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.0.get(path)
    }

    fn set(&self, path: &str, value: &Value) -> Result<(), StoreError> {
        self.0.set(path, value)
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.0.remove(path)
    }

    fn get_tagged(&self, path: &str) -> Result<(Option<Value>, String), StoreError> {
        self.0.get_tagged(path)
    }

    fn set_if(&self, _path: &str, _value: &Value, _etag: &str) -> Result<(), StoreError> {
        panic!("tree backend crashed");
    }
}

/// Counts every upload attempt, including ones that land on the same path.
#[derive(Default)]
struct CountingObjects {
    inner: MemoryObjectStore,
    puts: AtomicUsize,
}

impl ObjectStore for CountingObjects {
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<ObjectMeta, StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(path, bytes, content_type)
    }

    fn download_url(&self, meta: &ObjectMeta) -> Result<String, StoreError> {
        self.inner.download_url(meta)
    }
}

// ========== Harness ==========

struct Harness {
    tree: Arc<MemoryTree>,
    objects: Arc<CountingObjects>,
    tally: Arc<Tally>,
    orchestrator: Orchestrator,
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.confidence_threshold = 0.8;
    config.excluded_label = "Background".to_string();
    config.font_path = None;
    config.persist.base_delay = Duration::from_millis(1);
    config.control_poll_interval = Duration::from_millis(10);
    config
}

fn orchestrator(config: PipelineConfig, stores: StoreHandles, factory: ScriptedFactory) -> Orchestrator {
    let filter = DetectionFilter::new(
        LabelTable::new(["Healthy", "Diseased"]),
        config.confidence_threshold,
        config.excluded_label.clone(),
    );
    let (display, _frames) = display_channel();
    Orchestrator::new(config, stores, display, filter, Box::new(factory))
}

fn harness(factory: impl FnOnce(Arc<Tally>) -> ScriptedFactory) -> Harness {
    let tree = Arc::new(MemoryTree::new());
    let objects = Arc::new(CountingObjects::default());
    let tally = Arc::new(Tally::default());
    let stores = StoreHandles {
        tree: tree.clone(),
        objects: objects.clone(),
    };
    let orchestrator = orchestrator(config(), stores, factory(tally.clone()));

    Harness {
        tree,
        objects,
        tally,
        orchestrator,
    }
}

/// Single-slot blocking queue over a tree that kills the persistence worker.
fn crashing_persistence(
    mut config: PipelineConfig,
    tally: &Arc<Tally>,
    limit: Option<u64>,
) -> (Arc<PanickingTree>, Orchestrator) {
    config.persist.capacity = 1;
    config.persist.full_policy = QueueFullPolicy::Block;
    let tree = Arc::new(PanickingTree::default());
    let stores = StoreHandles {
        tree: tree.clone(),
        objects: Arc::new(MemoryObjectStore::new()),
    };
    let factory = ScriptedFactory::new(tally.clone(), limit, EngineKind::Scripted);
    (tree, orchestrator(config, stores, factory))
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

// ========== End-to-end ==========

#[test]
fn three_frame_session_accumulates_and_uploads() {
    let mut h = harness(|tally| ScriptedFactory::new(tally, Some(3), EngineKind::Scripted));
    h.tree.set(TOTAL_COUNTS, &json!({"Healthy": 40, "Old": 2})).unwrap();
    h.tree.set("Detections/2020-01-01/Healthy/1", &json!({"time": "t"})).unwrap();

    h.orchestrator.start().unwrap();
    assert_eq!(h.orchestrator.state(), PipelineState::Running);

    let tally = h.tally.clone();
    wait_until("three frames", || tally.delivered.load(Ordering::SeqCst) == 3);
    let summary = h.orchestrator.stop().unwrap();

    assert_eq!(h.orchestrator.state(), PipelineState::Stopped);
    assert_eq!(summary.cycles, 3);
    assert_eq!(summary.detections, 3, "Diseased at 0.5 is below the threshold");
    assert_eq!(summary.persist.failed, 0);

    // Stale session data is gone; only this session's sum remains.
    assert_eq!(h.tree.get(TOTAL_COUNTS).unwrap(), Some(json!({"Healthy": 3})));
    assert_eq!(h.objects.puts.load(Ordering::SeqCst), 2);

    let evidence = h.tree.get("Detections").unwrap().unwrap();
    let Value::Object(dates) = evidence else {
        panic!("evidence tree should be an object");
    };
    assert!(!dates.contains_key("2020-01-01"));
    for labels in dates.values() {
        assert!(labels.get("Healthy").is_some());
        assert!(labels.get("Diseased").is_none());
    }

    assert_eq!(h.tally.released.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_mid_cycle_completes_that_cycle() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (proceed_tx, proceed_rx) = mpsc::channel();
    let gated = GatedEngine {
        entered: entered_tx,
        proceed: Mutex::new(proceed_rx),
    };
    let mut h = harness(move |tally| {
        ScriptedFactory::new(tally, None, EngineKind::Gated(Mutex::new(Some(gated))))
    });

    h.orchestrator.start().unwrap();
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let release = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        proceed_tx.send(()).unwrap();
    });
    let summary = h.orchestrator.stop().unwrap();
    release.join().unwrap();

    assert_eq!(summary.cycles, 1);
    assert_eq!(h.tally.delivered.load(Ordering::SeqCst), 1);
    assert_eq!(h.tally.released.load(Ordering::SeqCst), 1);
    assert_eq!(h.tree.get(TOTAL_COUNTS).unwrap(), Some(json!({"Healthy": 1})));
}

// ========== Lifecycle ==========

#[test]
fn failed_start_stays_idle() {
    let mut h = harness(|tally| {
        let mut factory = ScriptedFactory::new(tally, None, EngineKind::Scripted);
        factory.device_present = false;
        factory
    });
    h.tree.set(TOTAL_COUNTS, &json!({"Healthy": 5})).unwrap();

    let err = h.orchestrator.start().unwrap_err();
    assert!(matches!(err, PipelineError::Capture(CaptureError::NoDevice)));
    assert_eq!(h.orchestrator.state(), PipelineState::Idle);
    assert_eq!(
        h.tree.get(TOTAL_COUNTS).unwrap(),
        Some(json!({"Healthy": 5})),
        "Nothing is cleared when the session never starts"
    );
}

#[test]
fn engine_load_failure_releases_source() {
    let mut h = harness(|tally| ScriptedFactory::new(tally, None, EngineKind::Missing));

    let err = h.orchestrator.start().unwrap_err();
    assert!(matches!(err, PipelineError::Inference(_)));
    assert_eq!(h.orchestrator.state(), PipelineState::Idle);
    assert_eq!(h.tally.released.load(Ordering::SeqCst), 1);
}

#[test]
fn invalid_transitions_are_rejected() {
    let mut h = harness(|tally| ScriptedFactory::new(tally, Some(0), EngineKind::Scripted));

    assert!(matches!(h.orchestrator.stop(), Err(PipelineError::Transition(_))));
    assert_eq!(h.orchestrator.state(), PipelineState::Idle);

    h.orchestrator.start().unwrap();
    assert!(matches!(h.orchestrator.start(), Err(PipelineError::Transition(_))));
    assert_eq!(h.orchestrator.state(), PipelineState::Running);

    h.orchestrator.stop().unwrap();
    assert!(matches!(h.orchestrator.stop(), Err(PipelineError::Transition(_))));
    assert_eq!(h.tally.released.load(Ordering::SeqCst), 1);
}

#[test]
fn stopped_pipeline_restarts_as_new_session() {
    let mut h = harness(|tally| ScriptedFactory::new(tally, Some(3), EngineKind::Scripted));

    h.orchestrator.start().unwrap();
    let tally = h.tally.clone();
    wait_until("first session", || tally.delivered.load(Ordering::SeqCst) == 3);
    h.orchestrator.stop().unwrap();

    h.orchestrator.start().unwrap();
    wait_until("second session", || tally.delivered.load(Ordering::SeqCst) == 6);
    h.orchestrator.stop().unwrap();

    // Counts restart from zero with each session.
    assert_eq!(h.tree.get(TOTAL_COUNTS).unwrap(), Some(json!({"Healthy": 3})));
    assert_eq!(h.tally.released.load(Ordering::SeqCst), 2);
}

#[test]
fn dead_persistence_worker_does_not_hang_stop() {
    let tally = Arc::new(Tally::default());
    let (_tree, mut orchestrator) = crashing_persistence(config(), &tally, None);

    orchestrator.start().unwrap();
    // The worker dies on frame 2's counts; frame 3's push would block forever
    // on the full queue. The pipeline notices and releases the source.
    wait_until("pipeline exit", || tally.released.load(Ordering::SeqCst) == 1);

    let err = orchestrator.stop().unwrap_err();
    assert!(matches!(err, PipelineError::WorkerPanicked("persist")));
    assert_eq!(orchestrator.state(), PipelineState::Stopped);
    assert_eq!(tally.released.load(Ordering::SeqCst), 1);
}

#[test]
fn service_loop_stops_session_when_persistence_dies() {
    let tally = Arc::new(Tally::default());
    let mut config = config();
    config.autostart = true;
    // Two frames, then the pipeline idles on capture errors and never pushes again.
    let (tree, mut orchestrator) = crashing_persistence(config, &tally, Some(2));

    let shutdown = Arc::new(AtomicBool::new(false));
    let listener = ControlListener::new(tree);
    let service = {
        let shutdown = shutdown.clone();
        thread::spawn(move || orchestrator.run(&shutdown, &listener))
    };

    wait_until("session torn down", || tally.released.load(Ordering::SeqCst) == 1);

    shutdown.store(true, Ordering::Release);
    let last = service.join().unwrap().unwrap();
    assert!(last.is_none(), "A session whose worker panicked has no summary");
    assert_eq!(tally.released.load(Ordering::SeqCst), 1);
}

// ========== Control keys ==========

#[test]
fn control_keys_drive_the_service_loop() {
    let h = harness(|tally| ScriptedFactory::new(tally, None, EngineKind::Scripted));
    let Harness {
        tree,
        tally,
        mut orchestrator,
        ..
    } = h;

    let shutdown = Arc::new(AtomicBool::new(false));
    let listener = ControlListener::new(tree.clone());
    let service = {
        let shutdown = shutdown.clone();
        thread::spawn(move || orchestrator.run(&shutdown, &listener))
    };

    tree.set(LOAD_DETECTION, &json!(1)).unwrap();
    wait_until("session start", || tally.delivered.load(Ordering::SeqCst) > 0);
    wait_until("load acknowledged", || tree.get(LOAD_DETECTION).unwrap().is_none());

    tree.set(TERMINATE, &json!(1)).unwrap();
    wait_until("release", || tally.released.load(Ordering::SeqCst) == 1);
    wait_until("terminate acknowledged", || tree.get(TERMINATE).unwrap().is_none());

    shutdown.store(true, Ordering::Release);
    let last = service.join().unwrap().unwrap();
    assert!(last.is_none(), "Session already stopped by the terminate key");
    assert_eq!(tally.released.load(Ordering::SeqCst), 1);
}
