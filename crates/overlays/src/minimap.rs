//! A small always-visible overview of the whole document: a reduced,
//! cell-culled render pass fitted to its own corner viewport, plus the
//! main viewport's current bounds drawn as a rectangle, and a click
//! handler that maps a minimap-space click back to a world coordinate.

use std::sync::Arc;

use gds_document::Document;
use gds_renderer::{RenderOptions, RenderOutput, Renderer};
use geometry::{BBox, Point};
use viewport::{Viewport, ViewportManager, ZoomLimits};

use crate::{Overlay, OverlaySurface};

const MINIMAP_WIDTH_PX: f64 = 200.0;
const MINIMAP_HEIGHT_PX: f64 = 150.0;
const MINIMAP_MARGIN_PX: f64 = 16.0;
const MINIMAP_FIT_MARGIN: f64 = 0.05;
const TILE_COLOUR: (u8, u8, u8) = (140, 160, 200);
const VIEWPORT_RECT_COLOUR: (u8, u8, u8) = (255, 255, 255);

/// The world coordinate a minimap click resolves to, for the host to feed
/// into `ViewportManager::set_center_and_scale` on the main viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimapClick {
    pub world_x: f64,
    pub world_y: f64,
}

/// Where, in screen space, the minimap panel sits and how large it is.
/// Kept separate from the render output so `resize` can reposition the
/// panel without forcing a re-render.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Panel {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl Panel {
    fn bottom_right(screen_w: f64, screen_h: f64) -> Self {
        Self {
            x: screen_w - MINIMAP_WIDTH_PX - MINIMAP_MARGIN_PX,
            y: screen_h - MINIMAP_HEIGHT_PX - MINIMAP_MARGIN_PX,
            width: MINIMAP_WIDTH_PX,
            height: MINIMAP_HEIGHT_PX,
        }
    }

    fn contains(&self, screen_x: f64, screen_y: f64) -> bool {
        screen_x >= self.x && screen_x <= self.x + self.width && screen_y >= self.y && screen_y <= self.y + self.height
    }
}

/// A self-contained reduced renderer: its own `ViewportManager` fitted to
/// the whole document, independent of the main view the host is panning.
pub struct Minimap {
    panel: Panel,
    minimap_viewport: ViewportManager,
    render: Option<RenderOutput>,
    main_viewport_rect: BBox,
}

impl Minimap {
    pub fn new(document: Arc<Document>, screen_w: f64, screen_h: f64) -> Self {
        let limits = ZoomLimits::compute(MINIMAP_WIDTH_PX, document.units());
        let mut minimap_viewport = ViewportManager::new(limits);
        minimap_viewport.fit_to_view(document.overall_bbox(), MINIMAP_WIDTH_PX, MINIMAP_HEIGHT_PX, MINIMAP_FIT_MARGIN);

        let mut minimap = Self {
            panel: Panel::bottom_right(screen_w, screen_h),
            minimap_viewport,
            render: None,
            main_viewport_rect: BBox::EMPTY,
        };
        minimap.rebuild(document);
        minimap
    }

    /// Re-renders the minimap's own reduced pass. Cheap to call rarely
    /// (on document load, or a manual refresh) — this is not part of the
    /// per-frame `update` path, since the document's geometry does not
    /// change as the main viewport pans and zooms.
    pub fn rebuild(&mut self, document: Arc<Document>) {
        let options = RenderOptions {
            depth: gds_protocol::config::LOD_MAX_DEPTH,
            budget: gds_protocol::config::budget_for_depth(gds_protocol::config::LOD_MAX_DEPTH),
            outline: false,
            effective_scale: self.minimap_viewport.viewport().sx,
            layer_visibility: Default::default(),
            skip_minimap_cells: true,
        };
        self.render = Some(Renderer::new(document, options).run_to_completion());
    }

    pub fn resize(&mut self, screen_w: f64, screen_h: f64) {
        self.panel = Panel::bottom_right(screen_w, screen_h);
    }

    /// Maps a screen-space click to a world coordinate, if the click
    /// landed inside the minimap panel.
    pub fn handle_click(&self, screen_x: f64, screen_y: f64) -> Option<MinimapClick> {
        if !self.panel.contains(screen_x, screen_y) {
            return None;
        }
        let local_x = screen_x - self.panel.x;
        let local_y = screen_y - self.panel.y;
        let world = self.minimap_viewport.viewport().screen_to_world(local_x, local_y);
        Some(MinimapClick { world_x: world.x, world_y: world.y })
    }

    fn to_panel_screen(&self, point: Point) -> (f64, f64) {
        let viewport = self.minimap_viewport.viewport();
        let local_x = point.x * viewport.sx + viewport.tx;
        let local_y = point.y * viewport.sy() + viewport.ty;
        (self.panel.x + local_x, self.panel.y + local_y)
    }
}

impl Overlay for Minimap {
    fn update(&mut self, main_viewport: Viewport, world_bounds: BBox) {
        let _ = main_viewport;
        self.main_viewport_rect = world_bounds;
    }

    fn render(&self, surface: &mut dyn OverlaySurface) {
        surface.draw_rect_stroke(self.panel.x, self.panel.y, self.panel.width, self.panel.height, VIEWPORT_RECT_COLOUR);

        if let Some(output) = &self.render {
            for tile in output.tiles.values() {
                for polygon in &tile.polygons {
                    let points: Vec<(f64, f64)> = polygon.points.iter().map(|p| self.to_panel_screen(*p)).collect();
                    for window in points.windows(2) {
                        let (x0, y0) = window[0];
                        let (x1, y1) = window[1];
                        surface.draw_line(x0, y0, x1, y1, TILE_COLOUR);
                    }
                    if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
                        surface.draw_line(last.0, last.1, first.0, first.1, TILE_COLOUR);
                    }
                }
            }
        }

        if !self.main_viewport_rect.is_empty() {
            let (x0, y0) = self.to_panel_screen(Point::new(self.main_viewport_rect.min_x, self.main_viewport_rect.min_y));
            let (x1, y1) = self.to_panel_screen(Point::new(self.main_viewport_rect.max_x, self.main_viewport_rect.max_y));
            let (left, top) = (x0.min(x1), y0.min(y1));
            let (width, height) = ((x1 - x0).abs(), (y1 - y0).abs());
            surface.draw_rect_stroke(left, top, width, height, VIEWPORT_RECT_COLOUR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{DrawCall, RecordingSurface};
    use gds_document::{CellDraft, DocumentBuilder, Instance, Polygon};
    use gds_protocol::ParseStatistics;
    use geometry::Units;

    fn units() -> Units {
        Units { db_per_user: 1e-3, user_per_meter: 1e-6 }
    }

    fn square(layer: i32, datatype: i32, x0: f64, y0: f64, side: f64) -> Polygon {
        Polygon::try_new(
            layer,
            datatype,
            vec![Point::new(x0, y0), Point::new(x0 + side, y0), Point::new(x0 + side, y0 + side), Point::new(x0, y0 + side)],
        )
        .unwrap()
    }

    fn document_with_small_and_large_cells() -> Arc<Document> {
        let mut builder = DocumentBuilder::new();
        builder.add_cell("TOP", CellDraft { polygons: vec![square(1, 0, 0.0, 0.0, 10_000.0)], instances: vec![] });
        builder.add_cell("SPECK", CellDraft { polygons: vec![square(2, 0, 0.0, 0.0, 1.0)], instances: vec![] });
        builder.add_cell(
            "ROOT",
            CellDraft {
                polygons: vec![],
                instances: vec![
                    Instance { cell_ref: "TOP".to_string(), x: 0.0, y: 0.0, rotation_degrees: 0.0, mirror: false, magnification: 1.0 },
                    Instance { cell_ref: "SPECK".to_string(), x: 0.0, y: 0.0, rotation_degrees: 0.0, mirror: false, magnification: 1.0 },
                ],
            },
        );
        Arc::new(builder.build(units(), ParseStatistics::default()).unwrap())
    }

    #[test]
    fn minimap_culls_cells_marked_skip_in_minimap() {
        let document = document_with_small_and_large_cells();
        let minimap = Minimap::new(document, 800.0, 600.0);
        let output = minimap.render.as_ref().unwrap();
        assert_eq!(output.polygons_rendered, 1);
    }

    #[test]
    fn click_outside_panel_resolves_to_none() {
        let document = document_with_small_and_large_cells();
        let minimap = Minimap::new(document, 800.0, 600.0);
        assert!(minimap.handle_click(0.0, 0.0).is_none());
    }

    #[test]
    fn click_inside_panel_resolves_to_a_world_coordinate() {
        let document = document_with_small_and_large_cells();
        let minimap = Minimap::new(document, 800.0, 600.0);
        let panel = minimap.panel;
        let click = minimap.handle_click(panel.x + panel.width / 2.0, panel.y + panel.height / 2.0);
        assert!(click.is_some());
    }

    #[test]
    fn render_draws_the_panel_frame_and_tiles() {
        let document = document_with_small_and_large_cells();
        let mut minimap = Minimap::new(document, 800.0, 600.0);
        minimap.update(Viewport { tx: 0.0, ty: 0.0, sx: 1.0 }, BBox::from_points([Point::new(0.0, 0.0), Point::new(100.0, 100.0)]));

        let mut surface = RecordingSurface::default();
        minimap.render(&mut surface);

        assert!(surface.calls.iter().any(|c| matches!(c, DrawCall::RectStroke { .. })));
        assert!(surface.calls.iter().any(|c| matches!(c, DrawCall::Line { .. })));
    }

    #[test]
    fn resize_repositions_the_panel() {
        let document = document_with_small_and_large_cells();
        let mut minimap = Minimap::new(document, 800.0, 600.0);
        let before = minimap.panel;
        minimap.resize(1600.0, 1200.0);
        assert_ne!(minimap.panel, before);
    }
}
