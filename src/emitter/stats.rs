use std::time::Instant;

/// Delivery statistics of one emitter
#[derive(Debug, Clone, Default)]
pub struct EmitterStats {
    pub frames_sent: u64,
    pub frames_failed: u64,
    pub bytes_sent: u64,
    /// Polls that found no frame due
    pub idle_polls: u64,
    pub started_at: Option<Instant>,
    pub last_frame_time: Option<Instant>,
}

impl EmitterStats {
    pub fn started() -> Self {
        Self {
            started_at: Some(Instant::now()),
            ..Self::default()
        }
    }

    pub fn update_frame_stats(&mut self, frame_size: usize) {
        self.frames_sent += 1;
        self.bytes_sent += frame_size as u64;
        self.last_frame_time = Some(Instant::now());
    }

    pub fn record_failed_frame(&mut self) {
        self.frames_failed += 1;
    }

    pub fn record_idle_poll(&mut self) {
        self.idle_polls += 1;
    }

    /// Frames per second since the emitter started
    pub fn average_fps(&self) -> f64 {
        match self.started_at {
            Some(start) => {
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    self.frames_sent as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    pub fn efficiency(&self) -> f64 {
        let total = self.frames_sent + self.frames_failed;
        if total > 0 {
            self.frames_sent as f64 / total as f64
        } else {
            1.0
        }
    }
}
