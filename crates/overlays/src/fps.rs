//! Frames-per-second readout: an exponential moving average over frame
//! durations, colour-coded so a degraded frame rate is visible at a glance.

use geometry::BBox;
use viewport::Viewport;

use crate::{Overlay, OverlaySurface};

const EMA_SMOOTHING: f64 = 0.1;
const GOOD_FPS_THRESHOLD: f64 = 30.0;
const FAIR_FPS_THRESHOLD: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpsColor {
    Green,
    Yellow,
    Red,
}

impl FpsColor {
    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            FpsColor::Green => (80, 220, 100),
            FpsColor::Yellow => (230, 200, 60),
            FpsColor::Red => (230, 70, 70),
        }
    }

    fn for_fps(fps: f64) -> Self {
        if fps >= GOOD_FPS_THRESHOLD {
            FpsColor::Green
        } else if fps >= FAIR_FPS_THRESHOLD {
            FpsColor::Yellow
        } else {
            FpsColor::Red
        }
    }
}

pub struct FpsCounter {
    average_frame_seconds: Option<f64>,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self { average_frame_seconds: None }
    }

    /// Folds one frame's wall-clock duration into the moving average.
    /// Callers own the clock (this crate never touches `Instant::now`, to
    /// stay testable without real timing).
    pub fn record_frame(&mut self, frame_seconds: f64) {
        self.average_frame_seconds = Some(match self.average_frame_seconds {
            Some(previous) => previous + EMA_SMOOTHING * (frame_seconds - previous),
            None => frame_seconds,
        });
    }

    pub fn fps(&self) -> f64 {
        match self.average_frame_seconds {
            Some(seconds) if seconds > 0.0 => 1.0 / seconds,
            _ => 0.0,
        }
    }

    pub fn color(&self) -> FpsColor {
        FpsColor::for_fps(self.fps())
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Overlay for FpsCounter {
    fn update(&mut self, _viewport: Viewport, _world_bounds: BBox) {}

    fn render(&self, surface: &mut dyn OverlaySurface) {
        let fps = self.fps();
        let label = format!("{:.0} fps", fps.round());
        surface.draw_text(8.0, 16.0, &label, self.color().rgb());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSurface;

    #[test]
    fn steady_sixty_fps_frames_converge_to_sixty() {
        let mut counter = FpsCounter::new();
        for _ in 0..200 {
            counter.record_frame(1.0 / 60.0);
        }
        assert!((counter.fps() - 60.0).abs() < 1.0, "fps was {}", counter.fps());
        assert_eq!(counter.color(), FpsColor::Green);
    }

    #[test]
    fn color_thresholds_match_spec_bands() {
        assert_eq!(FpsColor::for_fps(45.0), FpsColor::Green);
        assert_eq!(FpsColor::for_fps(20.0), FpsColor::Yellow);
        assert_eq!(FpsColor::for_fps(5.0), FpsColor::Red);
    }

    #[test]
    fn no_frames_recorded_reports_zero() {
        let counter = FpsCounter::new();
        assert_eq!(counter.fps(), 0.0);
        assert_eq!(counter.color(), FpsColor::Red);
    }

    #[test]
    fn render_draws_one_label() {
        let mut counter = FpsCounter::new();
        counter.record_frame(1.0 / 60.0);
        let mut surface = RecordingSurface::default();
        counter.render(&mut surface);
        assert_eq!(surface.calls.len(), 1);
    }
}
