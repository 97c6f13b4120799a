use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};

/// Instruments recorded by the pipeline and persistence threads. Without
/// an installed meter provider these are no-ops.
#[derive(Clone)]
pub struct PipelineMetrics {
    pub cycle_duration: Histogram<f64>,
    pub frames: Counter<u64>,
    pub frames_skipped: Counter<u64>,
    pub detections: Counter<u64>,
    pub jobs_dropped: Counter<u64>,
    pub jobs_failed: Counter<u64>,
}

impl PipelineMetrics {
    pub fn init(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.005, 0.01, 0.02, 0.03, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0,
        ];

        Self {
            cycle_duration: meter
                .f64_histogram("pipeline_cycle_duration_seconds")
                .with_description("Time for one capture-to-enqueue cycle")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
            frames: meter
                .u64_counter("pipeline_frames_total")
                .with_description("Total cycles completed")
                .build(),
            frames_skipped: meter
                .u64_counter("pipeline_frames_skipped_total")
                .with_description("Total cycles skipped on capture or inference errors")
                .build(),
            detections: meter
                .u64_counter("pipeline_detections_total")
                .with_description("Total detections kept by the filter")
                .build(),
            jobs_dropped: meter
                .u64_counter("persist_jobs_dropped_total")
                .with_description("Evidence jobs evicted from a full persistence queue")
                .build(),
            jobs_failed: meter
                .u64_counter("persist_jobs_failed_total")
                .with_description("Persistence jobs abandoned after retries")
                .build(),
        }
    }
}
