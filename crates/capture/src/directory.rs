use crate::errors::CaptureError;
use crate::frame::Frame;
use crate::source::FrameSource;
use chrono::Local;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const PATTERNS: [&str; 3] = ["*.jpg", "*.jpeg", "*.png"];

/// Replays still images from a directory in name order, looping forever,
/// paced to a fixed rate.
pub struct DirectorySource {
    paths: Vec<PathBuf>,
    cursor: usize,
    period: Duration,
    last_emit: Option<Instant>,
    frame_count: u64,
    released: bool,
}

impl DirectorySource {
    pub fn open(dir: &str, fps: f64) -> Result<Self, CaptureError> {
        let mut paths = Vec::new();
        for pattern in PATTERNS {
            let full = format!("{}/{}", dir.trim_end_matches('/'), pattern);
            let entries =
                glob::glob(&full).map_err(|e| CaptureError::Decode(format!("{}: {}", full, e)))?;
            paths.extend(entries.filter_map(Result::ok));
        }
        paths.sort();

        if paths.is_empty() {
            return Err(CaptureError::EmptyDirectory(dir.to_string()));
        }

        tracing::info!(dir, images = paths.len(), fps, "Replaying images from directory");

        let period = if fps > 0.0 {
            Duration::from_secs_f64(1.0 / fps)
        } else {
            Duration::ZERO
        };

        Ok(Self {
            paths,
            cursor: 0,
            period,
            last_emit: None,
            frame_count: 0,
            released: false,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_emit {
            let elapsed = last.elapsed();
            if elapsed < self.period {
                std::thread::sleep(self.period - elapsed);
            }
        }
        self.last_emit = Some(Instant::now());
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.released {
            return Err(CaptureError::Released);
        }
        self.pace();

        let path = &self.paths[self.cursor];
        self.cursor = (self.cursor + 1) % self.paths.len();

        let image = image::open(path)?.to_rgb8();
        let frame = Frame::new(self.frame_count, Local::now(), image);
        self.frame_count += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            tracing::info!(frames = self.frame_count, "Directory replay released");
        }
    }
}
