//! Adaptive level-of-detail: a budget-and-hysteresis state machine that
//! decides when the renderer should recurse deeper or shallower into the
//! cell hierarchy. Stateless with respect to geometry — it only ever sees
//! a zoom scalar and a polygon count.

use std::time::{Duration, Instant};

use gds_document::Document;
use gds_protocol::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LodState {
    Steady,
    Rerendering,
}

/// What an [`LodManager::evaluate`] call decided. `crossed` is false (and
/// everything else a no-op) whenever the zoom hasn't crossed a threshold
/// since the last evaluation, or a re-render is already in flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodEvaluation {
    pub crossed: bool,
    pub depth_changed: bool,
    pub new_depth: u8,
    /// True whenever outline-mode stroke width must be recomputed, which
    /// happens on every crossing regardless of whether depth changed,
    /// because stroke width is a function of zoom, not depth.
    pub needs_stroke_recompute: bool,
}

impl LodEvaluation {
    fn unchanged(depth: u8) -> Self {
        Self { crossed: false, depth_changed: false, new_depth: depth, needs_stroke_recompute: false }
    }
}

/// Recursion-depth state machine. Persists across documents (spec: LOD
/// state outlives any one load); call [`LodManager::reset`] on a new
/// document load with that document's computed initial depth.
pub struct LodManager {
    depth: u8,
    zoom_at_last_change: f64,
    last_change_time: Option<Instant>,
    state: LodState,
}

impl LodManager {
    pub fn new(initial_depth: u8, initial_zoom: f64) -> Self {
        Self {
            depth: initial_depth.clamp(config::LOD_MIN_DEPTH, config::LOD_MAX_DEPTH),
            zoom_at_last_change: initial_zoom,
            last_change_time: None,
            state: LodState::Steady,
        }
    }

    /// Resets depth and thresholds for a newly loaded document, per the
    /// document's own hierarchy shape (see [`initial_depth`]).
    pub fn reset(&mut self, initial_depth: u8, initial_zoom: f64) {
        self.depth = initial_depth.clamp(config::LOD_MIN_DEPTH, config::LOD_MAX_DEPTH);
        self.zoom_at_last_change = initial_zoom;
        self.last_change_time = None;
        self.state = LodState::Steady;
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn state(&self) -> LodState {
        self.state
    }

    pub fn budget(&self) -> u64 {
        config::budget_for_depth(self.depth)
    }

    /// The zoom level thresholds bracket around, used by hosts reporting
    /// `getPerformanceMetrics().thresholds` — the next zoom-out/zoom-in
    /// crossing that would trigger a re-evaluation.
    pub fn thresholds(&self) -> (f64, f64) {
        (self.zoom_at_last_change * config::LOD_ZOOM_OUT_FACTOR, self.zoom_at_last_change * config::LOD_ZOOM_IN_FACTOR)
    }

    /// Evaluates a zoom-threshold crossing. Only triggers a depth change
    /// when the budget utilization calls for it, the cooldown has
    /// elapsed, and no re-render is already in progress.
    pub fn evaluate(&mut self, current_zoom: f64, visible_polygons: u64, outline_mode: bool, now: Instant) -> LodEvaluation {
        if self.state == LodState::Rerendering {
            return LodEvaluation::unchanged(self.depth);
        }

        let low = self.zoom_at_last_change * config::LOD_ZOOM_OUT_FACTOR;
        let high = self.zoom_at_last_change * config::LOD_ZOOM_IN_FACTOR;
        let crossed = current_zoom <= low || current_zoom >= high;
        if !crossed {
            return LodEvaluation::unchanged(self.depth);
        }

        let utilization = visible_polygons as f64 / self.budget() as f64;
        let mut target_depth = self.depth;
        if utilization < config::LOD_INCREASE_THRESHOLD && self.depth < config::LOD_MAX_DEPTH {
            target_depth = self.depth + 1;
        } else if utilization > config::LOD_DECREASE_THRESHOLD && self.depth > config::LOD_MIN_DEPTH {
            target_depth = self.depth - 1;
        }

        let cooldown_elapsed = self
            .last_change_time
            .is_none_or(|last| now.duration_since(last) >= Duration::from_millis(config::LOD_CHANGE_COOLDOWN_MS));

        let depth_changed = target_depth != self.depth && cooldown_elapsed;
        if depth_changed {
            log::debug!("lod: depth {} -> {} (utilization {:.3})", self.depth, target_depth, utilization);
            self.depth = target_depth;
            self.last_change_time = Some(now);
            self.state = LodState::Rerendering;
        }

        self.zoom_at_last_change = current_zoom;

        LodEvaluation { crossed: true, depth_changed, new_depth: self.depth, needs_stroke_recompute: outline_mode }
    }

    /// Signals that the re-render triggered by the last `evaluate` call
    /// has finished; the controller resumes evaluating future crossings.
    pub fn mark_rerender_complete(&mut self) {
        self.state = LodState::Steady;
    }

    /// Forces depth down by one level in response to a render-time error
    /// (a structurally-exceeded budget or a dropped invalid-transform
    /// instance), per the failure-semantics design. Returns whether depth
    /// actually moved; a no-op at `LOD_MIN_DEPTH` leaves the caller to
    /// accept the partial frame with no further recourse.
    pub fn back_off_on_error(&mut self) -> bool {
        if self.depth > config::LOD_MIN_DEPTH {
            self.depth -= 1;
            log::debug!("lod: backing off to depth {} after a render error", self.depth);
            true
        } else {
            false
        }
    }
}

/// Depth 3 for a hierarchical file (top cells carry no direct geometry of
/// their own but do instantiate children); depth 0 for a flat file.
pub fn initial_depth(document: &Document) -> u8 {
    let direct_polygons: usize = document.top_cells().map(|cell| cell.direct_polygon_count()).sum();
    let instances: usize = document.top_cells().map(|cell| cell.instance_count()).sum();
    if direct_polygons == 0 && instances > 0 {
        config::LOD_MAX_DEPTH
    } else {
        config::LOD_MIN_DEPTH
    }
}
