use crate::state_machine::TransitionError;
use capture::CaptureError;
use gateway::GatewayError;
use std::io;
use store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Encoding error: {0}")]
    Encode(#[from] GatewayError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Persistence queue closed")]
    QueueClosed,

    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    /// Wrap an engine error, keeping its context chain.
    pub fn inference(e: anyhow::Error) -> Self {
        PipelineError::Inference(format!("{:#}", e))
    }
}
