//! The overlay family: grid, scale bar, coordinates readout, FPS counter,
//! and minimap. Per the design notes, these share one capability set
//! (position on the canvas, update on viewport change, render to a
//! surface) expressed as the [`Overlay`] trait rather than a shared base
//! class — each overlay otherwise owns completely different state.

mod coordinates;
mod fps;
mod grid;
mod minimap;
mod scale_bar;

pub use coordinates::CoordinatesDisplay;
pub use fps::{FpsColor, FpsCounter};
pub use grid::GridOverlay;
pub use minimap::{Minimap, MinimapClick};
pub use scale_bar::ScaleBarOverlay;

use geometry::BBox;
use viewport::Viewport;

/// A line or rectangle colour as straight sRGB bytes; overlays never need
/// the HSV layer-colouring scheme the renderer and minimap tiles use.
pub type Rgb = (u8, u8, u8);

/// Minimal drawing surface an overlay renders itself onto. A host shell
/// implements this once against its real canvas; tests use an in-memory
/// recorder (see each overlay's test module).
pub trait OverlaySurface {
    fn draw_line(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, colour: Rgb);
    fn draw_text(&mut self, x: f64, y: f64, text: &str, colour: Rgb);
    fn draw_rect_stroke(&mut self, x: f64, y: f64, width: f64, height: f64, colour: Rgb);
}

/// Shared capability set for the overlay family: told when the viewport
/// moves, then asked to draw itself. Not every overlay needs both methods
/// in a meaningful way (the FPS counter ignores `update`), but the
/// uniform interface is what lets the orchestrator hold them as
/// `Vec<Box<dyn Overlay>>` instead of one case per concrete type.
pub trait Overlay {
    fn update(&mut self, viewport: Viewport, world_bounds: BBox);
    fn render(&self, surface: &mut dyn OverlaySurface);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum DrawCall {
        Line { x0: f64, y0: f64, x1: f64, y1: f64, colour: Rgb },
        Text { x: f64, y: f64, text: String, colour: Rgb },
        RectStroke { x: f64, y: f64, width: f64, height: f64, colour: Rgb },
    }

    #[derive(Debug, Default)]
    pub struct RecordingSurface {
        pub calls: Vec<DrawCall>,
    }

    impl OverlaySurface for RecordingSurface {
        fn draw_line(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, colour: Rgb) {
            self.calls.push(DrawCall::Line { x0, y0, x1, y1, colour });
        }
        fn draw_text(&mut self, x: f64, y: f64, text: &str, colour: Rgb) {
            self.calls.push(DrawCall::Text { x, y, text: text.to_string(), colour });
        }
        fn draw_rect_stroke(&mut self, x: f64, y: f64, width: f64, height: f64, colour: Rgb) {
            self.calls.push(DrawCall::RectStroke { x, y, width, height, colour });
        }
    }
}
