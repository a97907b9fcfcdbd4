//! Cursor position readout, in micrometers, corrected for the viewport's
//! Y-axis flip so the displayed coordinate matches GDSII's Cartesian
//! Y-up convention rather than screen Y-down.

use geometry::{BBox, Units};
use viewport::Viewport;

use crate::{Overlay, OverlaySurface};

const READOUT_COLOUR: (u8, u8, u8) = (200, 200, 200);

pub struct CoordinatesDisplay {
    units: Units,
    viewport: Viewport,
    cursor_screen: Option<(f64, f64)>,
}

impl CoordinatesDisplay {
    pub fn new(units: Units) -> Self {
        Self { units, viewport: Viewport { tx: 0.0, ty: 0.0, sx: 1.0 }, cursor_screen: None }
    }

    pub fn set_cursor(&mut self, screen_x: f64, screen_y: f64) {
        self.cursor_screen = Some((screen_x, screen_y));
    }

    pub fn clear_cursor(&mut self) {
        self.cursor_screen = None;
    }

    /// The cursor's world position in micrometers, or `None` if the
    /// cursor is outside the canvas (matches the scale bar's meter
    /// conventions, just scaled to a more legible unit for this readout).
    pub fn world_position_micrometers(&self) -> Option<(f64, f64)> {
        let (screen_x, screen_y) = self.cursor_screen?;
        let world = self.viewport.screen_to_world(screen_x, screen_y);
        let meters_x = self.units.db_units_to_meters(world.x);
        let meters_y = self.units.db_units_to_meters(world.y);
        Some((meters_x * 1e6, meters_y * 1e6))
    }
}

impl Overlay for CoordinatesDisplay {
    fn update(&mut self, viewport: Viewport, _world_bounds: BBox) {
        self.viewport = viewport;
    }

    fn render(&self, surface: &mut dyn OverlaySurface) {
        let Some((x, y)) = self.world_position_micrometers() else {
            return;
        };
        let label = format!("{x:.3} um, {y:.3} um");
        surface.draw_text(8.0, 32.0, &label, READOUT_COLOUR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{DrawCall, RecordingSurface};
    use geometry::Point;

    fn units() -> Units {
        Units { db_per_user: 1e-3, user_per_meter: 1e-6 }
    }

    #[test]
    fn no_cursor_renders_nothing() {
        let display = CoordinatesDisplay::new(units());
        let mut surface = RecordingSurface::default();
        display.render(&mut surface);
        assert!(surface.calls.is_empty());
    }

    #[test]
    fn cursor_position_round_trips_through_the_viewport_transform() {
        let mut display = CoordinatesDisplay::new(units());
        display.update(Viewport { tx: 0.0, ty: 0.0, sx: 2.0 }, BBox::EMPTY);
        display.set_cursor(20.0, -20.0);

        let world = Viewport { tx: 0.0, ty: 0.0, sx: 2.0 }.screen_to_world(20.0, -20.0);
        let expected = Point::new(world.x, world.y);

        let (micrometers_x, micrometers_y) = display.world_position_micrometers().unwrap();
        let meters_x = units().db_units_to_meters(expected.x);
        let meters_y = units().db_units_to_meters(expected.y);
        assert!((micrometers_x - meters_x * 1e6).abs() < 1e-9);
        assert!((micrometers_y - meters_y * 1e6).abs() < 1e-9);
    }

    #[test]
    fn render_emits_a_formatted_label() {
        let mut display = CoordinatesDisplay::new(units());
        display.update(Viewport { tx: 0.0, ty: 0.0, sx: 1.0 }, BBox::EMPTY);
        display.set_cursor(0.0, 0.0);

        let mut surface = RecordingSurface::default();
        display.render(&mut surface);
        assert!(matches!(&surface.calls[0], DrawCall::Text { text, .. } if text.contains("um")));
    }
}
