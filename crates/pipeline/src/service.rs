use crate::annotate::Annotator;
use crate::config::PipelineConfig;
use crate::control::{ControlCommand, ControlListener};
use crate::counts::RemoteCounterSync;
use crate::errors::PipelineError;
use crate::evidence::EvidenceUploader;
use crate::metrics::PipelineMetrics;
use crate::persist::{PersistQueue, PersistStats, PersistWorker};
use crate::state_machine::{PipelineEvent, PipelineState, StateMachine};
use crate::worker::{Pipeline, PipelineContext, PipelineHandle};
use anyhow::Context;
use capture::{CaptureConfig, CaptureError, FrameSource};
use common::{span, wait_for_resource};
use gateway::DisplaySink;
use inference::{DetectionFilter, InferenceConfig, InferenceEngine, LabelTable};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use store::StoreHandles;

/// Opens the per-session resources. Swapped out in tests.
pub trait SessionFactory: Send {
    fn open_source(&self) -> Result<Box<dyn FrameSource>, CaptureError>;
    fn load_engine(&self) -> anyhow::Result<Box<dyn InferenceEngine>>;
}

/// Real camera (or replay directory) plus the configured ONNX model.
pub struct DeviceFactory {
    capture: CaptureConfig,
    inference: InferenceConfig,
}

impl DeviceFactory {
    pub fn new(capture: CaptureConfig, inference: InferenceConfig) -> Self {
        Self { capture, inference }
    }
}

impl SessionFactory for DeviceFactory {
    fn open_source(&self) -> Result<Box<dyn FrameSource>, CaptureError> {
        capture::open_source(&self.capture)
    }

    fn load_engine(&self) -> anyhow::Result<Box<dyn InferenceEngine>> {
        inference::load_engine(&self.inference)
    }
}

/// Label table from `LABELS_PATH` when set, the built-in table otherwise.
pub fn build_filter(config: &PipelineConfig) -> anyhow::Result<DetectionFilter> {
    let labels = match config.inference.labels_path.as_deref() {
        Some(path) => {
            LabelTable::load(path).with_context(|| format!("Failed to load labels from {path}"))?
        }
        None => LabelTable::default(),
    };
    tracing::info!(labels = labels.len(), "Label table ready");
    Ok(DetectionFilter::new(
        labels,
        config.confidence_threshold,
        config.excluded_label.clone(),
    ))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub cycles: u64,
    pub frames_skipped: u64,
    pub detections: u64,
    pub persist: PersistStats,
}

struct Session {
    pipeline: PipelineHandle,
    persist: JoinHandle<PersistStats>,
}

impl Session {
    /// Name of a worker thread that ended while the session was running.
    fn exited_thread(&self) -> Option<&'static str> {
        if self.persist.is_finished() {
            Some("persist")
        } else if self.pipeline.is_finished() {
            Some("pipeline")
        } else {
            None
        }
    }
}

/// Owns the state machine and at most one running session.
pub struct Orchestrator {
    config: PipelineConfig,
    stores: StoreHandles,
    display: DisplaySink,
    filter: DetectionFilter,
    factory: Box<dyn SessionFactory>,
    metrics: PipelineMetrics,
    machine: StateMachine,
    session: Option<Session>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        stores: StoreHandles,
        display: DisplaySink,
        filter: DetectionFilter,
        factory: Box<dyn SessionFactory>,
    ) -> Self {
        Self {
            config,
            stores,
            display,
            filter,
            factory,
            metrics: PipelineMetrics::init("vinewatch"),
            machine: StateMachine::new(),
            session: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.machine.current_state()
    }

    /// Open the source and engine, clear the previous session's remote data,
    /// and spawn the pipeline and persistence threads. On any failure the
    /// machine stays where it was.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        self.machine.next(PipelineEvent::Start)?;
        let _s = span!("session_start");

        let mut source = self.factory.open_source()?;
        let engine = match self.factory.load_engine() {
            Ok(engine) => engine,
            Err(e) => {
                source.release();
                return Err(PipelineError::inference(e));
            }
        };

        let counter = RemoteCounterSync::new(self.stores.tree.clone());
        let uploader = EvidenceUploader::new(
            self.stores.tree.clone(),
            self.stores.objects.clone(),
            self.config.evidence_object_prefix.clone(),
            self.config.key_mode,
            self.config.jpeg_quality,
        );
        if let Err(e) = counter.reset() {
            tracing::warn!(error = %e, "Failed to clear cumulative counts");
        }
        if let Err(e) = uploader.reset() {
            tracing::warn!(error = %e, "Failed to clear evidence tree");
        }

        let (queue, jobs) = PersistQueue::bounded(
            self.config.persist.capacity,
            self.config.persist.full_policy,
            self.metrics.clone(),
        );
        let persist = PersistWorker::new(
            jobs,
            counter,
            uploader,
            &self.config.persist,
            self.metrics.clone(),
        )
        .spawn()?;

        let ctx = PipelineContext {
            source,
            engine,
            filter: self.filter.clone(),
            annotator: Annotator::from_font_path(self.config.font_path.as_deref()),
            display: self.display.clone(),
            queue,
            evidence_policy: self.config.evidence_policy,
        };
        let pipeline = Pipeline::new(ctx, self.metrics.clone()).spawn()?;

        self.session = Some(Session { pipeline, persist });
        self.machine.apply(PipelineEvent::Start)?;
        Ok(())
    }

    /// Stop the running session. Blocks until the in-flight cycle completes,
    /// the source is released and the persistence queue has drained.
    pub fn stop(&mut self) -> Result<SessionSummary, PipelineError> {
        self.machine.apply(PipelineEvent::Stop)?;
        let _s = span!("session_stop");

        let Some(session) = self.session.take() else {
            self.machine.apply(PipelineEvent::Finished)?;
            return Ok(SessionSummary::default());
        };

        let pipeline = session.pipeline.stop();
        let persist = session
            .persist
            .join()
            .map_err(|_| PipelineError::WorkerPanicked("persist"));
        self.machine.apply(PipelineEvent::Finished)?;

        let stats = pipeline?;
        let persist = persist?;
        let summary = SessionSummary {
            cycles: stats.cycles,
            frames_skipped: stats.skipped,
            detections: stats.detections,
            persist,
        };
        tracing::info!(
            cycles = summary.cycles,
            skipped = summary.frames_skipped,
            detections = summary.detections,
            counts_synced = persist.counts_synced,
            evidence_uploaded = persist.evidence_uploaded,
            persist_failed = persist.failed,
            "Session finished"
        );
        Ok(summary)
    }

    pub fn handle(&mut self, cmd: ControlCommand) -> Result<(), PipelineError> {
        tracing::info!(command = ?cmd, state = ?self.state(), "Control command");
        match cmd {
            ControlCommand::Load => self.start(),
            ControlCommand::Terminate => self.stop().map(|_| ()),
        }
    }

    /// Service loop: poll the control keys until `shutdown` is set, then
    /// stop any running session.
    pub fn run(
        &mut self,
        shutdown: &AtomicBool,
        listener: &ControlListener,
    ) -> Result<Option<SessionSummary>, PipelineError> {
        tracing::info!(
            poll_ms = self.config.control_poll_interval.as_millis() as u64,
            autostart = self.config.autostart,
            "Orchestrator starting"
        );

        if self.config.autostart {
            let poll_ms = self.config.control_poll_interval.as_millis() as u64;
            wait_for_resource(
                || self.start(),
                poll_ms,
                "Detection session",
                || shutdown.load(Ordering::Acquire),
            );
        }

        let mut last = None;
        while !shutdown.load(Ordering::Acquire) {
            match listener.poll() {
                Ok(commands) => {
                    for cmd in commands {
                        match self.handle(cmd) {
                            Ok(()) => {}
                            Err(PipelineError::Transition(e)) => {
                                tracing::warn!(error = %e, "Control command rejected")
                            }
                            Err(e) => tracing::error!(error = %e, command = ?cmd, "Control command failed"),
                        }
                        if let Err(e) = listener.acknowledge(cmd) {
                            tracing::warn!(error = %e, command = ?cmd, "Failed to clear control key");
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Control poll failed"),
            }

            if let Some(thread) = self.session.as_ref().and_then(Session::exited_thread) {
                tracing::error!(thread, "Session thread exited on its own, stopping session");
                match self.stop() {
                    Ok(summary) => last = Some(summary),
                    Err(e) => tracing::error!(error = %e, "Session teardown failed"),
                }
            }

            thread::sleep(self.config.control_poll_interval);
        }

        tracing::info!("Shutdown requested");
        if self.state() == PipelineState::Running {
            last = Some(self.stop()?);
        }
        Ok(last)
    }
}
