use std::time::Instant;

/// Frame rate from the wall-clock gap between consecutive cycle starts.
#[derive(Debug, Default)]
pub struct FpsMeter {
    last_start: Option<Instant>,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cycle start. `None` on the first cycle and when no time
    /// has passed since the previous one.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        let fps = self.last_start.and_then(|prev| {
            let dt = now.saturating_duration_since(prev).as_secs_f64();
            (dt > 0.0).then(|| 1.0 / dt)
        });
        self.last_start = Some(now);
        fps
    }

    pub fn reset(&mut self) {
        self.last_start = None;
    }
}
