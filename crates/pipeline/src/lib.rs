pub mod annotate;
pub mod config;
pub mod control;
pub mod counts;
pub mod errors;
pub mod evidence;
pub mod fps;
pub mod metrics;
pub mod persist;
pub mod service;
pub mod state_machine;
pub mod worker;

pub use annotate::Annotator;
pub use config::{EvidencePolicy, KeyMode, PersistConfig, PipelineConfig, QueueFullPolicy};
pub use control::{ControlCommand, ControlListener};
pub use counts::{FrameCounts, RemoteCounterSync, aggregate};
pub use errors::PipelineError;
pub use evidence::{EvidenceJob, EvidenceRecord, EvidenceUploader};
pub use fps::FpsMeter;
pub use persist::{JobReceiver, PersistJob, PersistQueue, PersistStats, PersistWorker};
pub use service::{DeviceFactory, Orchestrator, SessionFactory, SessionSummary};
pub use state_machine::{PipelineEvent, PipelineState, StateMachine, TransitionError};
pub use worker::{Pipeline, PipelineContext, PipelineHandle, PipelineStats};
