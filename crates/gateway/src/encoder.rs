use crate::errors::GatewayError;
use crate::jpeg::encode_jpeg;
use crate::sink::{DisplayFrame, DisplayHandle};
use crate::state::{FrameMessage, FramePacket};
use std::sync::Arc;
use tokio::sync::watch;

pub fn build_packet(display: &DisplayFrame, quality: u8) -> Result<FramePacket, GatewayError> {
    let jpeg_data = encode_jpeg(&display.frame, quality)?;

    Ok(FramePacket {
        metadata: FrameMessage {
            frame_number: display.frame.number(),
            timestamp_ms: display.frame.captured_at().timestamp_millis(),
            width: display.frame.width(),
            height: display.frame.height(),
            fps: display.fps,
            detections: display.detections.clone(),
        },
        jpeg_data,
    })
}

/// Encode each new display frame once and publish it to viewers.
///
/// Frames arriving while an encode is in flight collapse into the latest.
/// Returns when the display sink is dropped.
pub async fn run_encoder(
    mut frames: DisplayHandle,
    packets: watch::Sender<Option<Arc<FramePacket>>>,
    quality: u8,
) {
    tracing::info!("Display encoder started");

    while frames.changed().await.is_ok() {
        let Some(display) = frames.latest() else {
            continue;
        };

        match tokio::task::spawn_blocking(move || build_packet(&display, quality)).await {
            Ok(Ok(packet)) => {
                tracing::debug!(
                    frame_number = packet.metadata.frame_number,
                    detections = packet.metadata.detections.len(),
                    "Frame encoded"
                );
                packets.send_replace(Some(Arc::new(packet)));
            }
            Ok(Err(e)) => tracing::error!(error = %e, "Display encoding failed - skipping frame"),
            Err(e) => tracing::error!(error = %e, "Display encoding task failed"),
        }
    }

    tracing::info!("Display sink closed, encoder stopping");
}
