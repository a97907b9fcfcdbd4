//! Bottom-corner scale bar: a bar of a "nice" physical length (1/2/5 times
//! a power of 10, in nm/µm/mm/m) sized to occupy 100-200 screen pixels.

use geometry::Units;
use viewport::Viewport;

use crate::{Overlay, OverlaySurface};

const MIN_BAR_PX: f64 = 100.0;
const MAX_BAR_PX: f64 = 200.0;
const NICE_STEPS: [f64; 3] = [1.0, 2.0, 5.0];

const SCALE_BAR_COLOUR: (u8, u8, u8) = (230, 230, 230);
const MARGIN_PX: f64 = 20.0;

/// Picks a bar length in meters, and its conventional unit label, such
/// that at the given screen-pixels-per-meter scale it renders between
/// [`MIN_BAR_PX`] and [`MAX_BAR_PX`] pixels wide.
pub fn pick_bar_length_meters(px_per_meter: f64) -> (f64, &'static str) {
    if !px_per_meter.is_finite() || px_per_meter <= 0.0 {
        return (1e-6, "um");
    }

    let target_meters = (MIN_BAR_PX + MAX_BAR_PX) / 2.0 / px_per_meter;
    let mut best = f64::INFINITY;
    let mut best_distance = f64::INFINITY;

    // Search a wide exponent range; the viewport's own zoom limits keep
    // target_meters within [1nm, 1m] in practice, but this stays robust
    // for any scale a caller passes directly.
    for exponent in -12..=3 {
        let power = 10f64.powi(exponent);
        for step in NICE_STEPS {
            let candidate = step * power;
            let candidate_px = candidate * px_per_meter;
            if candidate_px < MIN_BAR_PX || candidate_px > MAX_BAR_PX {
                continue;
            }
            let distance = (candidate - target_meters).abs();
            if distance < best_distance {
                best_distance = distance;
                best = candidate;
            }
        }
    }

    if best.is_infinite() {
        best = target_meters;
    }

    (best, unit_label(best))
}

fn unit_label(meters: f64) -> &'static str {
    if meters >= 1.0 {
        "m"
    } else if meters >= 1e-3 {
        "mm"
    } else if meters >= 1e-6 {
        "um"
    } else {
        "nm"
    }
}

fn format_length(meters: f64, label: &str) -> String {
    let value = match label {
        "m" => meters,
        "mm" => meters * 1e3,
        "um" => meters * 1e6,
        _ => meters * 1e9,
    };
    if (value - value.round()).abs() < 1e-6 {
        format!("{} {label}", value.round() as i64)
    } else {
        format!("{value:.1} {label}")
    }
}

pub struct ScaleBarOverlay {
    units: Units,
    viewport: Viewport,
    screen_height: f64,
}

impl ScaleBarOverlay {
    pub fn new(units: Units) -> Self {
        Self { units, viewport: Viewport { tx: 0.0, ty: 0.0, sx: 1.0 }, screen_height: 0.0 }
    }

    pub fn set_screen_height(&mut self, screen_height: f64) {
        self.screen_height = screen_height;
    }

    fn px_per_meter(&self) -> f64 {
        let px_per_db_unit = self.viewport.sx.abs();
        let db_units_per_meter = self.units.meters_to_db_units(1.0);
        px_per_db_unit * db_units_per_meter
    }
}

impl Overlay for ScaleBarOverlay {
    fn update(&mut self, viewport: Viewport, _world_bounds: geometry::BBox) {
        self.viewport = viewport;
    }

    fn render(&self, surface: &mut dyn OverlaySurface) {
        let px_per_meter = self.px_per_meter();
        if px_per_meter <= 0.0 || !px_per_meter.is_finite() {
            return;
        }
        let (length_meters, label) = pick_bar_length_meters(px_per_meter);
        let bar_px = length_meters * px_per_meter;

        let y = self.screen_height - MARGIN_PX;
        surface.draw_line(MARGIN_PX, y, MARGIN_PX + bar_px, y, SCALE_BAR_COLOUR);
        surface.draw_text(MARGIN_PX, y - 6.0, &format_length(length_meters, label), SCALE_BAR_COLOUR);
    }
}
