//! Dynamic background grid: spacing is the largest power of 10 database
//! units that still draws at least 10 lines across the current viewport.

use geometry::BBox;
use viewport::Viewport;

use crate::{Overlay, OverlaySurface};

const MIN_LINES_ACROSS_VIEWPORT: f64 = 10.0;
const GRID_LINE_COLOUR: (u8, u8, u8) = (60, 60, 60);

/// Computes the grid line spacing, in database units, for a viewport of
/// the given world-space width: the largest power of 10 that still draws
/// at least [`MIN_LINES_ACROSS_VIEWPORT`] lines across it.
pub fn grid_spacing(world_width: f64) -> f64 {
    if !(world_width.is_finite()) || world_width <= 0.0 {
        return 1.0;
    }
    let max_spacing = world_width / MIN_LINES_ACROSS_VIEWPORT;
    let exponent = max_spacing.log10().floor();
    10f64.powf(exponent)
}

pub struct GridOverlay {
    world_bounds: BBox,
    viewport: Viewport,
    visible: bool,
}

impl GridOverlay {
    pub fn new() -> Self {
        Self { world_bounds: BBox::EMPTY, viewport: Viewport { tx: 0.0, ty: 0.0, sx: 1.0 }, visible: true }
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn spacing(&self) -> f64 {
        grid_spacing(self.world_bounds.width())
    }
}

impl Default for GridOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl Overlay for GridOverlay {
    fn update(&mut self, viewport: Viewport, world_bounds: BBox) {
        self.viewport = viewport;
        self.world_bounds = world_bounds;
    }

    fn render(&self, surface: &mut dyn OverlaySurface) {
        if !self.visible || self.world_bounds.is_empty() {
            return;
        }
        let spacing = self.spacing();
        if spacing <= 0.0 {
            return;
        }

        let first_x = (self.world_bounds.min_x / spacing).floor() * spacing;
        let mut world_x = first_x;
        while world_x <= self.world_bounds.max_x {
            let screen_x = world_x * self.viewport.sx + self.viewport.tx;
            surface.draw_line(screen_x, f64::MIN, screen_x, f64::MAX, GRID_LINE_COLOUR);
            world_x += spacing;
        }

        let first_y = (self.world_bounds.min_y / spacing).floor() * spacing;
        let mut world_y = first_y;
        while world_y <= self.world_bounds.max_y {
            let screen_y = world_y * self.viewport.sy() + self.viewport.ty;
            surface.draw_line(f64::MIN, screen_y, f64::MAX, screen_y, GRID_LINE_COLOUR);
            world_y += spacing;
        }
    }
}
