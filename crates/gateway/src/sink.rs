use crate::state::DetectionInfo;
use capture::Frame;
use std::sync::Arc;
use tokio::sync::watch;

/// An annotated frame ready for viewers.
#[derive(Debug, Clone)]
pub struct DisplayFrame {
    pub frame: Frame,
    pub fps: Option<f64>,
    pub detections: Vec<DetectionInfo>,
}

/// Producer side of the single-slot display hand-off.
///
/// `show` never blocks and never fails: an unread frame is simply replaced
/// by the next one.
#[derive(Clone)]
pub struct DisplaySink {
    tx: Arc<watch::Sender<Option<DisplayFrame>>>,
}

/// Consumer side, owned by the display context.
#[derive(Clone)]
pub struct DisplayHandle {
    rx: watch::Receiver<Option<DisplayFrame>>,
}

pub fn display_channel() -> (DisplaySink, DisplayHandle) {
    let (tx, rx) = watch::channel(None);
    (DisplaySink { tx: Arc::new(tx) }, DisplayHandle { rx })
}

impl DisplaySink {
    pub fn show(&self, frame: DisplayFrame) {
        self.tx.send_replace(Some(frame));
    }

    pub fn subscribe(&self) -> DisplayHandle {
        DisplayHandle {
            rx: self.tx.subscribe(),
        }
    }
}

impl DisplayHandle {
    /// Latest frame, marking it seen.
    pub fn latest(&mut self) -> Option<DisplayFrame> {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for a frame newer than the last one seen. Errors once every
    /// sink is gone.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.rx.changed().await
    }

    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }
}
