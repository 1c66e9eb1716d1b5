use std::time::{Duration, Instant};

/// Frame cadence and a twice-per-second fps sample for the window title.
pub struct FrameTiming {
    last_frame_time: Option<Instant>,
    last_sample_time: Instant,
    frames_since_sample: u32,
    pub frame_dt: f32,
    fps: f32,
    preview_ms: f32,
}

impl FrameTiming {
    pub fn new(now: Instant) -> Self {
        Self {
            last_frame_time: None,
            last_sample_time: now,
            frames_since_sample: 0,
            frame_dt: 1.0 / 60.0,
            fps: 0.0,
            preview_ms: 0.0,
        }
    }

    pub fn set_preview_time(&mut self, elapsed: Duration) {
        self.preview_ms = elapsed.as_secs_f32() * 1000.0;
    }

    /// Records a frame. Returns true when a new fps sample is available.
    pub fn update(&mut self, now: Instant) -> bool {
        let dt = match self.last_frame_time {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::from_millis(16),
        };
        self.last_frame_time = Some(now);
        // Stalled frames (modal dialogs, drag-resize) count as 100 ms.
        self.frame_dt = dt.as_secs_f32().min(0.1);

        self.frames_since_sample = self.frames_since_sample.saturating_add(1);
        let elapsed = now.saturating_duration_since(self.last_sample_time);
        if elapsed.as_secs_f32() < 0.5 {
            return false;
        }
        self.fps = self.frames_since_sample as f32 / elapsed.as_secs_f32();
        self.frames_since_sample = 0;
        self.last_sample_time = now;
        true
    }

    pub fn title(&self, base: &str, detail: &str) -> String {
        if detail.is_empty() {
            format!("{} - {:.0} fps (preview {:.1} ms)", base, self.fps, self.preview_ms)
        } else {
            format!(
                "{} - {} - {:.0} fps (preview {:.1} ms)",
                base, detail, self.fps, self.preview_ms
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FrameTiming;
    use std::time::{Duration, Instant};

    #[test]
    fn samples_fps_every_half_second() {
        let start = Instant::now();
        let mut timing = FrameTiming::new(start);
        let mut sampled = false;
        for frame in 1..=25 {
            sampled = timing.update(start + Duration::from_millis(frame * 20));
        }
        assert!(sampled);
        assert!(timing.title("Gallery", "").contains("50 fps"));
        assert!((timing.frame_dt - 0.02).abs() < 1e-4);
    }

    #[test]
    fn long_frames_are_clamped() {
        let start = Instant::now();
        let mut timing = FrameTiming::new(start);
        timing.update(start);
        timing.update(start + Duration::from_secs(3));
        assert!((timing.frame_dt - 0.1).abs() < 1e-6);
    }
}
