use crate::annotate::Annotator;
use crate::config::EvidencePolicy;
use crate::counts::{FrameCounts, aggregate};
use crate::errors::PipelineError;
use crate::evidence::EvidenceJob;
use crate::fps::FpsMeter;
use crate::metrics::PipelineMetrics;
use crate::persist::{PersistJob, PersistQueue};
use capture::FrameSource;
use common::span;
use gateway::{DetectionInfo, DisplayFrame, DisplaySink};
use inference::{Detection, DetectionFilter, InferenceEngine};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Pause after a capture error so a dead device does not spin the loop.
const CAPTURE_ERROR_DELAY: Duration = Duration::from_millis(50);

/// Everything one session's loop works with, handed over at construction.
pub struct PipelineContext {
    pub source: Box<dyn FrameSource>,
    pub engine: Box<dyn InferenceEngine>,
    pub filter: DetectionFilter,
    pub annotator: Annotator,
    pub display: DisplaySink,
    pub queue: PersistQueue,
    pub evidence_policy: EvidencePolicy,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub cycles: u64,
    pub skipped: u64,
    pub detections: u64,
}

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub frame_number: u64,
    pub fps: Option<f64>,
    pub detections: Vec<Detection>,
    pub counts: FrameCounts,
    pub evidence_jobs: usize,
}

pub struct Pipeline {
    ctx: PipelineContext,
    fps: FpsMeter,
    metrics: PipelineMetrics,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(ctx: PipelineContext, metrics: PipelineMetrics) -> Self {
        Self {
            ctx,
            fps: FpsMeter::new(),
            metrics,
            stats: PipelineStats::default(),
        }
    }

    /// capture -> infer -> filter -> annotate/display -> enqueue counts and
    /// evidence.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, PipelineError> {
        let start = Instant::now();
        let fps = self.fps.tick(start);

        let frame = self.ctx.source.next_frame()?;
        let _s = span!("pipeline_cycle", frame_number = frame.number());

        let raw = self
            .ctx
            .engine
            .infer(&frame)
            .map_err(PipelineError::inference)?;
        let detections = self.ctx.filter.filter(&raw);

        let annotated = self.ctx.annotator.annotate(&frame, &detections, fps);
        self.ctx.display.show(DisplayFrame {
            frame: annotated.clone(),
            fps,
            detections: detections.iter().map(detection_info).collect(),
        });

        let counts = aggregate(&detections);
        if !counts.is_empty() {
            self.ctx
                .queue
                .push(PersistJob::SyncCounts(counts.clone()))?;
        }

        let labels = evidence_labels(&detections, self.ctx.evidence_policy);
        let evidence_jobs = labels.len();
        for label in labels {
            self.ctx.queue.push(PersistJob::UploadEvidence(EvidenceJob {
                label,
                frame: annotated.clone(),
            }))?;
        }

        self.metrics
            .cycle_duration
            .record(start.elapsed().as_secs_f64(), &[]);
        self.metrics.frames.add(1, &[]);
        self.metrics.detections.add(detections.len() as u64, &[]);

        Ok(CycleOutcome {
            frame_number: frame.number(),
            fps,
            detections,
            counts,
            evidence_jobs,
        })
    }

    /// Cycle until `stop` is set or the persistence worker is gone. The flag
    /// is read between cycles, so a stop arriving mid-cycle lets that cycle
    /// finish. Releases the source and closes the persistence queue on the
    /// way out.
    pub fn run(mut self, stop: &AtomicBool) -> PipelineStats {
        tracing::info!("Pipeline loop starting");

        while !stop.load(Ordering::Acquire) {
            match self.run_cycle() {
                Ok(outcome) => {
                    self.stats.cycles += 1;
                    self.stats.detections += outcome.detections.len() as u64;

                    if self.stats.cycles % 30 == 0 {
                        tracing::debug!(
                            cycles = self.stats.cycles,
                            skipped = self.stats.skipped,
                            frame_number = outcome.frame_number,
                            detections = outcome.detections.len(),
                            fps = outcome.fps.unwrap_or_default(),
                            queued = self.ctx.queue.len(),
                            "Pipeline status"
                        );
                    }
                }
                Err(PipelineError::QueueClosed) => {
                    self.stats.skipped += 1;
                    self.metrics.frames_skipped.add(1, &[]);
                    tracing::error!("Persistence worker gone - stopping pipeline");
                    break;
                }
                Err(e) => {
                    self.stats.skipped += 1;
                    self.metrics.frames_skipped.add(1, &[]);
                    tracing::error!(error = %e, "Cycle failed - skipping frame");

                    if matches!(e, PipelineError::Capture(_)) {
                        thread::sleep(CAPTURE_ERROR_DELAY);
                    }
                }
            }
        }

        self.ctx.source.release();
        self.ctx.queue.close();

        tracing::info!(
            cycles = self.stats.cycles,
            skipped = self.stats.skipped,
            detections = self.stats.detections,
            "Pipeline loop stopped"
        );
        self.stats
    }

    pub fn spawn(self) -> std::io::Result<PipelineHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || self.run(&flag))?;
        Ok(PipelineHandle { stop, thread })
    }
}

/// Owner's handle on a running pipeline thread.
pub struct PipelineHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<PipelineStats>,
}

impl PipelineHandle {
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Request a stop and wait for the in-flight cycle and the release.
    pub fn stop(self) -> Result<PipelineStats, PipelineError> {
        self.request_stop();
        self.thread
            .join()
            .map_err(|_| PipelineError::WorkerPanicked("pipeline"))
    }
}

fn detection_info(det: &Detection) -> DetectionInfo {
    DetectionInfo {
        label: det.label.clone(),
        confidence: det.confidence,
        x1: det.bbox.x1,
        y1: det.bbox.y1,
        x2: det.bbox.x2,
        y2: det.bbox.y2,
    }
}

/// Labels to upload evidence for, in first-seen order.
pub fn evidence_labels(detections: &[Detection], policy: EvidencePolicy) -> Vec<String> {
    let mut labels: Vec<String> = Vec::with_capacity(detections.len());
    for det in detections {
        if policy == EvidencePolicy::PerDetection || !labels.contains(&det.label) {
            labels.push(det.label.clone());
        }
    }
    labels
}
