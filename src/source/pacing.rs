use std::time::{Duration, Instant};

/// Decides when the next frame of a source is due.
///
/// A frame is due every `1 / (fps * speed)` seconds. A pacer that fell more
/// than one interval behind restarts from the current instant instead of
/// bursting to catch up.
#[derive(Debug, Clone)]
pub struct FramePacer {
    fps: u32,
    speed: f64,
    next_due: Option<Instant>,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            speed: 1.0,
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / (self.fps as f64 * self.speed))
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
        self.next_due = None;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due.map_or(true, |due| now >= due)
    }

    /// Record a delivered frame at `now`
    pub fn mark(&mut self, now: Instant) {
        let interval = self.interval();
        self.next_due = match self.next_due {
            Some(due) if now.saturating_duration_since(due) < interval => Some(due + interval),
            _ => Some(now + interval),
        };
    }

    /// Make the next frame due immediately
    pub fn reset(&mut self) {
        self.next_due = None;
    }

    /// Frames dropped before each delivered frame when playing faster than 1x
    pub fn frames_to_skip(&self) -> u64 {
        if self.speed > 1.0 {
            ((self.speed - 1.0) * 2.0).floor() as u64
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_scales_with_speed() {
        let mut pacer = FramePacer::new(25);
        assert_eq!(pacer.interval(), Duration::from_millis(40));

        pacer.set_speed(2.0);
        assert_eq!(pacer.interval(), Duration::from_millis(20));
        pacer.set_speed(0.5);
        assert_eq!(pacer.interval(), Duration::from_millis(80));
    }

    #[test]
    fn test_due_after_interval() {
        let mut pacer = FramePacer::new(10);
        let start = Instant::now();
        assert!(pacer.is_due(start));

        pacer.mark(start);
        assert!(!pacer.is_due(start + Duration::from_millis(50)));
        assert!(pacer.is_due(start + Duration::from_millis(100)));

        pacer.reset();
        assert!(pacer.is_due(start));
    }

    #[test]
    fn test_frames_to_skip() {
        let mut pacer = FramePacer::new(30);
        assert_eq!(pacer.frames_to_skip(), 0);
        pacer.set_speed(1.4);
        assert_eq!(pacer.frames_to_skip(), 0);
        pacer.set_speed(1.5);
        assert_eq!(pacer.frames_to_skip(), 1);
        pacer.set_speed(3.0);
        assert_eq!(pacer.frames_to_skip(), 4);
    }
}
