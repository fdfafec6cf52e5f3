//! Frame clock used by the frame loop for animation and pacing statistics.

use std::time::{Duration, Instant};

/// Tracks elapsed time and the number of frames rendered since start.
#[derive(Debug)]
pub struct FrameClock {
    start: Instant,
    last_frame: Instant,
    frames: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            frames: 0,
        }
    }

    /// Seconds since the clock was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Marks the start of a new frame and returns the time since the previous one.
    pub fn begin_frame(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_frame;
        self.last_frame = now;
        self.frames += 1;
        delta
    }

    /// Number of frames begun so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Average frames per second over the clock's lifetime.
    pub fn average_fps(&self) -> f32 {
        let secs = self.elapsed_secs();
        if secs <= f32::EPSILON {
            0.0
        } else {
            self.frames as f32 / secs
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_count_advances() {
        let mut clock = FrameClock::new();
        assert_eq!(clock.frame_count(), 0);
        clock.begin_frame();
        clock.begin_frame();
        assert_eq!(clock.frame_count(), 2);
    }

    #[test]
    fn test_delta_is_monotonic() {
        let mut clock = FrameClock::new();
        std::thread::sleep(Duration::from_millis(2));
        let delta = clock.begin_frame();
        assert!(delta >= Duration::from_millis(2));
    }
}
