//! Collaborators the orchestrator depends on by trait rather than concrete
//! type, so a host (or a test) can substitute its own document loader or
//! render target without this crate knowing anything about a real canvas.

use gds_document::Document;
use gds_protocol::{LayerKey, ParseError, ResourceError, TileHandle};
use gds_renderer::Tile;

/// Produces a `Document` from a raw byte stream. [`GdsiiDocumentSource`]
/// wraps [`gds_parser::Parser`]; a host may substitute a fixture loader in
/// tests, or a different wire format entirely.
pub trait DocumentSource {
    fn parse(&self, bytes: &[u8], on_progress: &mut dyn FnMut(f32)) -> Result<Document, ParseError>;
}

/// The default [`DocumentSource`]: drives [`gds_parser::Parser`] to
/// completion synchronously, forwarding each step's fractional progress.
pub struct GdsiiDocumentSource;

impl DocumentSource for GdsiiDocumentSource {
    fn parse(&self, bytes: &[u8], on_progress: &mut dyn FnMut(f32)) -> Result<Document, ParseError> {
        let mut parser = gds_parser::Parser::new(bytes);
        loop {
            match parser.step()? {
                gds_parser::ParseStep::Continue { fraction } => on_progress(fraction),
                gds_parser::ParseStep::Done(document) => return Ok(document),
                gds_parser::ParseStep::Cancelled => {
                    unreachable!("GdsiiDocumentSource::parse never calls Parser::cancel")
                }
            }
        }
    }
}

/// The minimal GPU-canvas abstraction a host's `RenderSurface` fills in:
/// allocate or replace one tile's resident batch, drop a tile no longer in
/// the live set, and present a composited frame. Modelled as a trait at the
/// seam (rather than this crate owning a GPU device) the same way the
/// teacher crate's tile renderer takes a `RenderDataResolver` instead of
/// reaching into a document's storage directly.
///
/// The orchestrator calls `upload_tile`/`evict_tile` only from
/// `swap_in_render_output` (the atomic swap point in §4.6); `present` is
/// the host's cue to flip whatever backbuffer it maintains after a tick.
pub trait RenderSurface {
    fn upload_tile(&mut self, handle: TileHandle, tile: &Tile, colour: (u8, u8, u8));
    fn evict_tile(&mut self, handle: TileHandle);
    fn present(&mut self);
}

/// An in-memory [`RenderSurface`] double for tests: records which tiles are
/// currently resident rather than touching any real GPU state.
#[derive(Debug, Default)]
pub struct RecordingRenderSurface {
    pub resident: std::collections::HashMap<TileHandle, (i32, i32, usize)>,
    pub present_count: u64,
}

impl RenderSurface for RecordingRenderSurface {
    fn upload_tile(&mut self, handle: TileHandle, tile: &Tile, _colour: (u8, u8, u8)) {
        self.resident.insert(handle, (tile.key.layer, tile.key.datatype, tile.polygons.len()));
    }

    fn evict_tile(&mut self, handle: TileHandle) {
        self.resident.remove(&handle);
    }

    fn present(&mut self) {
        self.present_count += 1;
    }
}

/// Uploads every tile in `output` to `surface`, colouring each batch by the
/// deterministic `(layer, datatype)` hue both the main renderer and the
/// minimap share (§4.6's "Colouring" rule).
pub fn upload_all_tiles(
    surface: &mut dyn RenderSurface,
    tiles: &slotmap::SlotMap<TileHandle, Tile>,
) {
    for (handle, tile) in tiles.iter() {
        let colour = geometry::layer_rgb(tile.key.layer, tile.key.datatype);
        surface.upload_tile(handle, tile, colour);
    }
}

/// Used purely to document the intended correspondence between a
/// `RenderSurface`'s resident set and a `LayerKey`, for hosts that group
/// GPU resources per layer rather than per tile.
pub fn layer_key_of(tile: &Tile) -> LayerKey {
    LayerKey::new(tile.key.layer, tile.key.datatype)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_surface_tracks_residency() {
        use gds_document::{CellDraft, DocumentBuilder, Polygon};
        use gds_protocol::ParseStatistics;
        use gds_renderer::{RenderOptions, Renderer};
        use geometry::{Point, Units};
        use std::sync::Arc;

        let mut builder = DocumentBuilder::new();
        builder.add_cell(
            "TOP",
            CellDraft {
                polygons: vec![Polygon::try_new(
                    1,
                    0,
                    vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(1.0, 1.0), Point::new(0.0, 1.0)],
                )
                .unwrap()],
                instances: vec![],
            },
        );
        let document = builder
            .build(Units { db_per_user: 1e-3, user_per_meter: 1e-6 }, ParseStatistics::default())
            .unwrap();
        let output = Renderer::new(Arc::new(document), RenderOptions::default()).run_to_completion();

        let mut surface = RecordingRenderSurface::default();
        upload_all_tiles(&mut surface, &output.tiles);
        assert_eq!(surface.resident.len(), output.tiles.len());

        let handle = *output.tiles.keys().next().unwrap();
        surface.evict_tile(handle);
        assert!(surface.resident.is_empty());

        surface.present();
        assert_eq!(surface.present_count, 1);
    }
}

/// Resource-loss recovery contract: a host calls this when it observes
/// `CANVAS_LOST`/`GPU_CONTEXT_LOST` on its real `RenderSurface`
/// implementation, then routes the error into
/// [`crate::Orchestrator::handle_resource_error`].
pub fn describe_resource_error(error: ResourceError) -> &'static str {
    match error {
        ResourceError::CanvasLost => "canvas surface lost; orchestrator will re-render at current depth",
        ResourceError::GpuContextLost => "GPU context lost; orchestrator will re-render at current depth",
    }
}
