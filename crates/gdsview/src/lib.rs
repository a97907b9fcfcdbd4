//! Ties the parser, document, renderer, viewport, LOD, input, and overlay
//! crates into the single stateful object a host embeds: load a stream,
//! drive a per-frame tick, dispatch device input, and read back whatever
//! the canvas and side panels need to draw. No GPU or windowing dependency
//! lives here — see [`surface::RenderSurface`] for the seam a host fills in.

mod metrics;
mod options;
mod surface;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gds_document::Document;
use gds_protocol::{config, ConfigError, LayerKey, ParseError, ResourceError, TileHandle};
use gds_renderer::{RenderOptions, RenderOutput, Renderer, RenderStep, Tile};
use geometry::{BBox, Units};
use input::{InputCommand, InputController, Key, KeyPhase, MouseButton, ToggleKey};
use lod::LodManager;
use overlays::{CoordinatesDisplay, FpsCounter, GridOverlay, Minimap, MinimapClick, Overlay, OverlaySurface, ScaleBarOverlay};
use slotmap::SlotMap;
use spatial_index::SpatialIndex;
use viewport::{Viewport, ViewportManager, VisibilityEntry, ZoomLimits};

pub use metrics::PerformanceMetrics;
pub use options::{OrchestratorOptions, PersistedViewport};
pub use surface::{DocumentSource, GdsiiDocumentSource, RecordingRenderSurface, RenderSurface};

/// Margin applied to `fitToView` whenever the orchestrator calls it itself
/// (initial load, the `FitToView` toggle key) rather than a host asking
/// for an exact fit.
const FIT_MARGIN: f64 = 0.1;
/// Neutral placeholder units used for overlay construction before any
/// document has been loaded; replaced with the document's real units the
/// moment one is.
const UNLOADED_UNITS: Units = Units { db_per_user: 1.0, user_per_meter: 1.0 };

slotmap::new_key_type! {
    pub struct HoverSubscription;
    pub struct ViewportSubscription;
}

/// One rendered polygon's visibility entry. Indexed individually (rather
/// than at tile granularity) so `visiblePolygons` reflects exactly which
/// polygons the viewport actually shows, not a coarser tile-bbox
/// over-approximation.
struct PolygonVisibilityEntry {
    bbox: BBox,
    layer_key: LayerKey,
    visible: bool,
}

impl VisibilityEntry for PolygonVisibilityEntry {
    fn bbox(&self) -> BBox {
        self.bbox
    }
    fn layer_key(&self) -> LayerKey {
        self.layer_key
    }
    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }
}

/// The stateful host object: owns the current document, viewport, LOD
/// controller, input dispatch, the overlay family, and whatever render
/// pass is currently in flight.
pub struct Orchestrator {
    options: OrchestratorOptions,
    document: Option<Arc<Document>>,
    viewport: Option<ViewportManager>,
    lod: LodManager,
    input: InputController,
    document_source: Box<dyn DocumentSource>,
    render_surface: Option<Box<dyn RenderSurface>>,
    resident_tiles: Vec<TileHandle>,

    active_render: Option<Renderer>,
    render_output: Option<RenderOutput>,
    polygon_entries: Vec<PolygonVisibilityEntry>,
    polygon_index: SpatialIndex<usize>,

    fill_mode: bool,
    layer_visibility: HashMap<LayerKey, bool>,
    canvas_size: (f64, f64),

    grid: GridOverlay,
    scale_bar: ScaleBarOverlay,
    coordinates: CoordinatesDisplay,
    fps: FpsCounter,
    minimap: Option<Minimap>,
    minimap_visible: bool,
    show_performance_panel: bool,
    show_layer_panel: bool,

    last_visibility_update: Option<Instant>,
    last_overlay_update: Option<Instant>,

    hover_subs: SlotMap<HoverSubscription, Box<dyn FnMut(f64, f64)>>,
    viewport_subs: SlotMap<ViewportSubscription, Box<dyn FnMut(Viewport, BBox)>>,
}

impl Orchestrator {
    pub fn new(options: OrchestratorOptions, canvas_width: f64, canvas_height: f64) -> Result<Self, ConfigError> {
        options.validate()?;

        let mut layer_visibility = HashMap::with_capacity(options.initial_layer_visibility.len());
        for (key, visible) in &options.initial_layer_visibility {
            layer_visibility.insert(LayerKey::parse(key)?, *visible);
        }

        let lod_depth = options.lod_min_depth;
        let mut input = InputController::new();
        input.resize(canvas_width, canvas_height);

        let mut scale_bar = ScaleBarOverlay::new(UNLOADED_UNITS);
        scale_bar.set_screen_height(canvas_height);

        Ok(Self {
            options,
            document: None,
            viewport: None,
            lod: LodManager::new(lod_depth, 1.0),
            input,
            document_source: Box::new(GdsiiDocumentSource),
            render_surface: None,
            resident_tiles: Vec::new(),

            active_render: None,
            render_output: None,
            polygon_entries: Vec::new(),
            polygon_index: SpatialIndex::new(),

            fill_mode: true,
            layer_visibility,
            canvas_size: (canvas_width, canvas_height),

            grid: GridOverlay::new(),
            scale_bar,
            coordinates: CoordinatesDisplay::new(UNLOADED_UNITS),
            fps: FpsCounter::new(),
            minimap: None,
            minimap_visible: true,
            show_performance_panel: false,
            show_layer_panel: false,

            last_visibility_update: None,
            last_overlay_update: None,

            hover_subs: SlotMap::with_key(),
            viewport_subs: SlotMap::with_key(),
        })
    }

    /// Substitutes the [`DocumentSource`] a test or an alternate host uses
    /// in place of [`GdsiiDocumentSource`]. Exposed for callers who already
    /// have their own parser (a worker thread, a fixture loader).
    pub fn set_document_source(&mut self, source: Box<dyn DocumentSource>) {
        self.document_source = source;
    }

    /// Substitutes the [`RenderSurface`] a host's real GPU canvas (or a
    /// test double) fills in. A host must call this before the first
    /// `render_step`/`load` if it wants tile uploads driven automatically;
    /// without one, `render_output`/`visible_tiles` still work, the host
    /// just has to upload tiles itself.
    pub fn set_render_surface(&mut self, surface: Box<dyn RenderSurface>) {
        self.render_surface = Some(surface);
    }

    // -- Loading ----------------------------------------------------------

    /// Parses `bytes` into a `Document` via the configured
    /// [`DocumentSource`] (synchronously; `on_progress` reports each
    /// internal step's fraction), then adopts it as the active document.
    pub fn load(&mut self, bytes: &[u8], mut on_progress: impl FnMut(f32)) -> Result<Arc<Document>, ParseError> {
        let document = self.document_source.parse(bytes, &mut on_progress)?;
        Ok(self.adopt_parsed_document(document))
    }

    /// Adopts an already-parsed `Document` directly, bypassing
    /// `DocumentSource`. Used by `load` and by hosts/tests that parse off
    /// of this crate's main path.
    pub fn adopt_parsed_document(&mut self, document: Document) -> Arc<Document> {
        self.active_render = None;
        let document = Arc::new(document);
        log::debug!(
            "gdsview: loaded document with {} cells ({} top-level)",
            document.cells().count(),
            document.top_cells().count()
        );

        let is_first_load = self.document.is_none();
        let limits = ZoomLimits::compute(self.canvas_size.0, document.units());
        let mut viewport_manager = match (is_first_load, &self.options.initial_viewport) {
            (true, Some(persisted)) => {
                ViewportManager::from_persisted(persisted.tx, persisted.ty, persisted.sx, limits).unwrap_or_else(|error| {
                    log::warn!("gdsview: ignoring invalid persisted viewport ({error}), fitting instead");
                    let mut manager = ViewportManager::new(limits);
                    manager.fit_to_view(document.overall_bbox(), self.canvas_size.0, self.canvas_size.1, FIT_MARGIN);
                    manager
                })
            }
            _ => {
                let mut manager = ViewportManager::new(limits);
                manager.fit_to_view(document.overall_bbox(), self.canvas_size.0, self.canvas_size.1, FIT_MARGIN);
                manager
            }
        };
        viewport_manager.set_limits(limits);

        let depth = lod::initial_depth(&document).clamp(self.options.lod_min_depth, self.options.lod_max_depth);
        self.lod.reset(depth, viewport_manager.viewport().sx);

        self.scale_bar = ScaleBarOverlay::new(document.units());
        self.scale_bar.set_screen_height(self.canvas_size.1);
        self.coordinates = CoordinatesDisplay::new(document.units());
        self.minimap = Some(Minimap::new(Arc::clone(&document), self.canvas_size.0, self.canvas_size.1));

        self.viewport = Some(viewport_manager);
        self.document = Some(Arc::clone(&document));
        self.render_output = None;
        self.polygon_entries.clear();
        self.polygon_index.clear();
        self.last_visibility_update = None;
        self.last_overlay_update = None;

        self.start_render();
        self.notify_viewport_changed();
        document
    }

    pub fn clear(&mut self) {
        self.active_render = None;
        self.document = None;
        self.viewport = None;
        self.render_output = None;
        self.polygon_entries.clear();
        self.polygon_index.clear();
        if let Some(surface) = self.render_surface.as_deref_mut() {
            for handle in self.resident_tiles.drain(..) {
                surface.evict_tile(handle);
            }
        }
        self.minimap = None;
        self.lod.reset(self.options.lod_min_depth, 1.0);
        self.last_visibility_update = None;
        self.last_overlay_update = None;
    }

    pub fn document(&self) -> Option<&Arc<Document>> {
        self.document.as_ref()
    }

    // -- Rendering ----------------------------------------------------------

    fn start_render(&mut self) {
        let (Some(document), Some(viewport)) = (&self.document, &self.viewport) else { return };
        let render_options = RenderOptions {
            depth: self.lod.depth(),
            budget: self.lod.budget(),
            outline: !self.fill_mode,
            effective_scale: viewport.viewport().sx,
            layer_visibility: self.layer_visibility.clone(),
            skip_minimap_cells: false,
        };
        self.active_render = Some(Renderer::new(Arc::clone(document), render_options));
    }

    /// Advances the in-flight render by one step, if any. Returns true the
    /// instant a render pass completes, so the host knows its canvas needs
    /// a fresh upload.
    pub fn render_step(&mut self) -> bool {
        let Some(renderer) = self.active_render.as_mut() else { return false };
        match renderer.step() {
            RenderStep::Continue { .. } => false,
            RenderStep::Cancelled => {
                self.active_render = None;
                false
            }
            RenderStep::Done(output) => {
                self.active_render = None;
                self.swap_in_render_output(output);
                true
            }
        }
    }

    /// Runs the active render pass to completion without yielding. Mostly
    /// useful for tests and non-interactive batch rendering; interactive
    /// hosts should call `render_step` once per frame instead.
    pub fn run_render_to_completion(&mut self) {
        while self.active_render.is_some() {
            self.render_step();
        }
    }

    fn swap_in_render_output(&mut self, output: RenderOutput) {
        for error in &output.errors {
            log::warn!("gdsview: {error}");
        }
        let needs_backoff = !output.errors.is_empty();

        self.polygon_entries = output
            .tiles
            .values()
            .flat_map(|tile: &Tile| {
                let layer_key = LayerKey::new(tile.key.layer, tile.key.datatype);
                tile.polygons.iter().map(move |polygon| PolygonVisibilityEntry {
                    bbox: BBox::from_points(polygon.points.iter().copied()),
                    layer_key,
                    visible: false,
                })
            })
            .collect();

        let mut index = SpatialIndex::new();
        index.insert_many(self.polygon_entries.iter().enumerate().map(|(i, entry)| (entry.bbox, i)));
        self.polygon_index = index;

        if let Some(surface) = self.render_surface.as_deref_mut() {
            for handle in self.resident_tiles.drain(..) {
                surface.evict_tile(handle);
            }
            surface::upload_all_tiles(surface, &output.tiles);
            self.resident_tiles.extend(output.tiles.keys());
        }

        self.render_output = Some(output);
        self.last_visibility_update = None;

        if self.lod.state() == lod::LodState::Rerendering {
            self.lod.mark_rerender_complete();
        }

        // This pass's partial frame is accepted as-is; a render error still
        // backs the LOD off one level so the next pass asks for less.
        if needs_backoff && self.lod.back_off_on_error() {
            self.start_render();
        }
    }

    pub fn render_output(&self) -> Option<&RenderOutput> {
        self.render_output.as_ref()
    }

    /// Tile handles whose bbox intersects the current viewport, for a host
    /// deciding which GPU-resident batches to keep uploaded. Coarser than
    /// `performance_metrics().visible_polygons`, which counts individual
    /// polygons rather than whole tiles.
    pub fn visible_tiles(&self) -> Vec<TileHandle> {
        let (Some(viewport), Some(output)) = (&self.viewport, &self.render_output) else { return Vec::new() };
        let bounds = viewport.get_viewport_bounds(self.canvas_size.0, self.canvas_size.1);
        output.spatial_index.query(bounds).copied().collect()
    }

    fn visible_polygon_count(&self) -> u64 {
        self.polygon_entries.iter().filter(|entry| entry.visible).count() as u64
    }

    /// A resource loss notification from the host's canvas/GPU backend.
    /// Per the failure-semantics design the orchestrator re-initialises
    /// and re-runs a render at the current depth rather than surfacing a
    /// fatal error, since the document and viewport state are unaffected.
    pub fn handle_resource_error(&mut self, error: ResourceError) {
        log::error!("gdsview: {error}, re-rendering at current depth");
        self.active_render = None;
        self.start_render();
    }

    // -- Per-frame tick ----------------------------------------------------

    pub fn tick(&mut self, now: Instant, frame_seconds: f64) {
        self.fps.record_frame(frame_seconds);
        self.render_step();
        self.maybe_recompute_visibility(now);

        if let Some(viewport) = &self.viewport {
            let zoom = viewport.viewport().sx;
            let visible_polygons = self.visible_polygon_count();
            let evaluation = self.lod.evaluate(zoom, visible_polygons, !self.fill_mode, now);
            if evaluation.depth_changed {
                self.start_render();
            }
        }

        self.maybe_update_overlays(now);

        if let Some(surface) = self.render_surface.as_deref_mut() {
            surface.present();
        }
    }

    fn maybe_recompute_visibility(&mut self, now: Instant) {
        if self.viewport.is_none() {
            return;
        }
        let due = self
            .last_visibility_update
            .is_none_or(|last| now.duration_since(last) >= Duration::from_millis(config::VIEWPORT_DEBOUNCE_MS));
        if !due {
            return;
        }
        self.force_visibility_refresh();
    }

    /// Recomputes polygon visibility immediately, ignoring the debounce
    /// window. Used internally right after a render swap and exposed for
    /// tests/hosts that need a visibility snapshot without waiting a tick.
    pub fn force_visibility_refresh(&mut self) {
        let Some(viewport) = &self.viewport else { return };
        viewport.update_visibility(
            self.canvas_size.0,
            self.canvas_size.1,
            &mut self.polygon_entries,
            &self.polygon_index,
            &self.layer_visibility,
        );
        self.last_visibility_update = Some(Instant::now());
    }

    fn maybe_update_overlays(&mut self, now: Instant) {
        let Some(viewport) = &self.viewport else { return };
        let due = self
            .last_overlay_update
            .is_none_or(|last| now.duration_since(last) >= Duration::from_millis(config::OVERLAY_DEBOUNCE_MS));
        if !due {
            return;
        }
        let current = viewport.viewport();
        let bounds = viewport.get_viewport_bounds(self.canvas_size.0, self.canvas_size.1);
        self.grid.update(current, bounds);
        self.scale_bar.update(current, bounds);
        self.coordinates.update(current, bounds);
        if let Some(minimap) = &mut self.minimap {
            minimap.update(current, bounds);
        }
        self.last_overlay_update = Some(now);
    }

    // -- View controls ------------------------------------------------------

    pub fn fit_to_view(&mut self) {
        let Some(bbox) = self.document.as_ref().map(|document| document.overall_bbox()) else { return };
        let (width, height) = self.canvas_size;
        if let Some(viewport) = &mut self.viewport {
            viewport.fit_to_view(bbox, width, height, FIT_MARGIN);
        }
        self.notify_viewport_changed();
    }

    /// Directly overrides the viewport's `{tx, ty, sx}`, as a host restoring
    /// a persisted view or jumping to a bookmarked coordinate would.
    pub fn set_viewport(&mut self, tx: f64, ty: f64, sx: f64) -> Result<(), ConfigError> {
        let Some(existing) = &self.viewport else { return Ok(()) };
        let limits = existing.limits();
        self.viewport = Some(ViewportManager::from_persisted(tx, ty, sx, limits)?);
        self.notify_viewport_changed();
        Ok(())
    }

    pub fn set_fill_mode(&mut self, filled: bool) {
        if self.fill_mode == filled {
            return;
        }
        self.fill_mode = filled;
        self.start_render();
    }

    pub fn fill_mode(&self) -> bool {
        self.fill_mode
    }

    pub fn set_layer_visibility(&mut self, visibility: &HashMap<String, bool>) -> Result<(), ConfigError> {
        let mut parsed = HashMap::with_capacity(visibility.len());
        for (key, visible) in visibility {
            parsed.insert(LayerKey::parse(key)?, *visible);
        }
        self.layer_visibility.extend(parsed);
        self.start_render();
        Ok(())
    }

    pub fn set_render_depth(&mut self, depth: u8) -> Result<(), ConfigError> {
        if depth < self.options.lod_min_depth || depth > self.options.lod_max_depth {
            return Err(ConfigError::OutOfRangeDepth { depth, min: self.options.lod_min_depth, max: self.options.lod_max_depth });
        }
        let zoom = self.viewport.as_ref().map(|v| v.viewport().sx).unwrap_or(1.0);
        self.lod.reset(depth, zoom);
        self.start_render();
        Ok(())
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.canvas_size = (width, height);
        self.input.resize(width, height);
        self.scale_bar.set_screen_height(height);
        if let Some(minimap) = &mut self.minimap {
            minimap.resize(width, height);
        }
        if let Some(document) = &self.document {
            let limits = ZoomLimits::compute(width, document.units());
            if let Some(viewport) = &mut self.viewport {
                viewport.set_limits(limits);
            }
        }
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let zoom = self.viewport.as_ref().map(|v| v.viewport().sx).unwrap_or(0.0);
        let viewport_bbox = self
            .viewport
            .as_ref()
            .map(|v| v.get_viewport_bounds(self.canvas_size.0, self.canvas_size.1))
            .unwrap_or(BBox::EMPTY);
        PerformanceMetrics {
            fps: self.fps.fps(),
            visible_polygons: self.visible_polygon_count(),
            total_polygons: self.render_output.as_ref().map(|output| output.polygons_rendered).unwrap_or(0),
            budget: self.lod.budget(),
            depth: self.lod.depth(),
            zoom,
            thresholds: self.lod.thresholds(),
            viewport_bbox,
        }
    }

    pub fn grid_visible(&self) -> bool {
        self.grid.is_visible()
    }

    pub fn minimap_visible(&self) -> bool {
        self.minimap_visible
    }

    pub fn show_performance_panel(&self) -> bool {
        self.show_performance_panel
    }

    pub fn show_layer_panel(&self) -> bool {
        self.show_layer_panel
    }

    /// Draws every enabled overlay (grid, scale bar, coordinates, FPS, and
    /// the minimap if visible) onto the host's surface, in back-to-front
    /// order.
    pub fn render_overlays(&self, surface: &mut dyn OverlaySurface) {
        self.grid.render(surface);
        self.scale_bar.render(surface);
        self.coordinates.render(surface);
        self.fps.render(surface);
        if self.minimap_visible {
            if let Some(minimap) = &self.minimap {
                minimap.render(surface);
            }
        }
    }

    /// Resolves a screen-space click against the minimap panel, if present
    /// and hit, and re-centers the main viewport there.
    pub fn handle_minimap_click(&mut self, screen_x: f64, screen_y: f64) -> Option<MinimapClick> {
        let click = self.minimap.as_ref()?.handle_click(screen_x, screen_y)?;
        if let Some(viewport) = &mut self.viewport {
            let current_scale = viewport.viewport().sx;
            viewport.set_center_and_scale(click.world_x, click.world_y, current_scale, self.canvas_size.0, self.canvas_size.1);
        }
        self.notify_viewport_changed();
        Some(click)
    }

    // -- Subscriptions --------------------------------------------------------

    pub fn on_hover(&mut self, callback: impl FnMut(f64, f64) + 'static) -> HoverSubscription {
        self.hover_subs.insert(Box::new(callback))
    }

    pub fn unsubscribe_hover(&mut self, subscription: HoverSubscription) {
        self.hover_subs.remove(subscription);
    }

    pub fn on_viewport_changed(&mut self, callback: impl FnMut(Viewport, BBox) + 'static) -> ViewportSubscription {
        self.viewport_subs.insert(Box::new(callback))
    }

    pub fn unsubscribe_viewport_changed(&mut self, subscription: ViewportSubscription) {
        self.viewport_subs.remove(subscription);
    }

    fn notify_hover(&mut self, world_x: f64, world_y: f64) {
        for callback in self.hover_subs.values_mut() {
            callback(world_x, world_y);
        }
    }

    fn notify_viewport_changed(&mut self) {
        let Some(viewport) = &self.viewport else { return };
        let current = viewport.viewport();
        let bounds = viewport.get_viewport_bounds(self.canvas_size.0, self.canvas_size.1);
        for callback in self.viewport_subs.values_mut() {
            callback(current, bounds);
        }
    }

    // -- Input dispatch -----------------------------------------------------

    pub fn on_mouse_down(&mut self, button: MouseButton, x: f64, y: f64) {
        if let Some(command) = self.input.on_mouse_down(button, x, y) {
            self.apply_input_command(command);
        }
    }

    pub fn on_mouse_up(&mut self, button: MouseButton) {
        if let Some(command) = self.input.on_mouse_up(button) {
            self.apply_input_command(command);
        }
    }

    pub fn on_mouse_move(&mut self, x: f64, y: f64) {
        let command = self.input.on_mouse_move(x, y);
        self.apply_input_command(command);
    }

    pub fn on_mouse_wheel(&mut self, delta_notches: f64, x: f64, y: f64) {
        let command = self.input.on_mouse_wheel(delta_notches, x, y);
        self.apply_input_command(command);
    }

    pub fn on_key_down(&mut self, key: Key, shift_held: bool) {
        if let Some(command) = self.input.on_key_down(key, shift_held) {
            self.apply_input_command(command);
        }
    }

    pub fn on_key_up(&mut self, key: Key) {
        if let Some(command) = self.input.on_key_up(key) {
            self.apply_input_command(command);
        }
    }

    pub fn on_touch_start(&mut self, id: u64, x: f64, y: f64) {
        self.input.on_touch_start(id, x, y);
    }

    pub fn on_touch_move(&mut self, id: u64, x: f64, y: f64) {
        if let Some(command) = self.input.on_touch_move(id, x, y) {
            self.apply_input_command(command);
        }
    }

    pub fn on_touch_end(&mut self, id: u64) {
        self.input.on_touch_end(id);
    }

    fn apply_input_command(&mut self, command: InputCommand) {
        match command {
            InputCommand::Pan { dx_px, dy_px } => {
                if let Some(viewport) = &mut self.viewport {
                    viewport.pan(dx_px, dy_px);
                    self.notify_viewport_changed();
                }
            }
            InputCommand::Zoom { factor, screen_cx, screen_cy } => {
                if let Some(viewport) = &mut self.viewport {
                    viewport.zoom(factor, screen_cx, screen_cy);
                    self.notify_viewport_changed();
                }
            }
            InputCommand::CursorMoved { screen_x, screen_y } => {
                self.coordinates.set_cursor(screen_x, screen_y);
                if let Some(viewport) = &self.viewport {
                    let world = viewport.screen_to_world(screen_x, screen_y);
                    self.notify_hover(world.x, world.y);
                }
            }
            InputCommand::Toggle { key, phase } => self.apply_toggle(key, phase),
        }
    }

    fn apply_toggle(&mut self, key: ToggleKey, phase: KeyPhase) {
        if phase != KeyPhase::Pressed {
            return;
        }
        match key {
            ToggleKey::FitToView => self.fit_to_view(),
            ToggleKey::Grid => self.grid.set_visible(!self.grid.is_visible()),
            ToggleKey::Outline => {
                let filled = !self.fill_mode;
                self.set_fill_mode(filled);
            }
            ToggleKey::PerformancePanel => self.show_performance_panel = !self.show_performance_panel,
            ToggleKey::LayerPanel => self.show_layer_panel = !self.show_layer_panel,
            ToggleKey::Minimap => self.minimap_visible = !self.minimap_visible,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gds_document::{CellDraft, DocumentBuilder, Instance, Polygon};
    use gds_protocol::ParseStatistics;
    use geometry::Point;

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

    fn small_document() -> Document {
        let mut builder = DocumentBuilder::new();
        builder.add_cell("TOP", CellDraft { polygons: vec![square(1, 0, 0.0, 0.0, 10.0)], instances: vec![] });
        builder.build(units(), ParseStatistics::default()).unwrap()
    }

    /// A cheap xorshift-style generator: deterministic, dependency-free,
    /// good enough to scatter polygon centroids across a large bbox.
    struct Lcg(u64);

    impl Lcg {
        fn next_f64(&mut self) -> f64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 11) as f64) / ((1u64 << 53) as f64)
        }
    }

    fn ten_thousand_scattered_polygons() -> Document {
        let mut builder = DocumentBuilder::new();
        let mut rng = Lcg(42);
        let polygons: Vec<Polygon> = (0..10_000)
            .map(|_| {
                let x = rng.next_f64() * 9_999_000.0;
                let y = rng.next_f64() * 9_999_000.0;
                square(1, 0, x, y, 1.0)
            })
            .collect();
        builder.add_cell("TOP", CellDraft { polygons, instances: vec![] });
        builder.build(units(), ParseStatistics::default()).unwrap()
    }

    #[test]
    fn load_fits_the_viewport_to_the_document_and_starts_a_render() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 600.0).unwrap();
        orchestrator.adopt_parsed_document(small_document());

        assert!(orchestrator.viewport.is_some());
        orchestrator.run_render_to_completion();
        assert_eq!(orchestrator.render_output().unwrap().polygons_rendered, 1);
    }

    #[test]
    fn clear_drops_document_and_render_state() {
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 600.0).unwrap();
        orchestrator.adopt_parsed_document(small_document());
        orchestrator.run_render_to_completion();

        orchestrator.clear();
        assert!(orchestrator.document().is_none());
        assert!(orchestrator.render_output().is_none());
    }

    #[test]
    fn set_fill_mode_triggers_a_new_render_pass() {
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 600.0).unwrap();
        orchestrator.adopt_parsed_document(small_document());
        orchestrator.run_render_to_completion();

        orchestrator.set_fill_mode(false);
        assert!(orchestrator.active_render.is_some());
        orchestrator.run_render_to_completion();
        let tile = orchestrator.render_output().unwrap().tiles.values().next().unwrap();
        assert!(tile.stroke_width.is_some());
    }

    #[test]
    fn a_render_error_backs_off_lod_depth_and_starts_a_fresh_render() {
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 600.0).unwrap();
        orchestrator.adopt_parsed_document(small_document());
        orchestrator.run_render_to_completion();
        orchestrator.lod.reset(2, orchestrator.viewport.as_ref().unwrap().viewport().sx);
        orchestrator.active_render = None;

        let output = RenderOutput {
            tiles: SlotMap::with_key(),
            spatial_index: SpatialIndex::new(),
            polygons_rendered: 50,
            skipped_by_budget: 7,
            errors: vec![gds_protocol::RenderError::BudgetStructurallyExceeded { budget: 50, required_minimum: 57 }],
        };
        orchestrator.swap_in_render_output(output);

        assert_eq!(orchestrator.lod.depth(), 1);
        assert!(orchestrator.active_render.is_some());
    }

    #[test]
    fn a_render_error_at_minimum_depth_leaves_the_partial_frame_with_no_further_render() {
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 600.0).unwrap();
        orchestrator.adopt_parsed_document(small_document());
        orchestrator.run_render_to_completion();
        orchestrator.active_render = None;

        let output = RenderOutput {
            tiles: SlotMap::with_key(),
            spatial_index: SpatialIndex::new(),
            polygons_rendered: 1,
            skipped_by_budget: 0,
            errors: vec![gds_protocol::RenderError::InvalidTransform],
        };
        orchestrator.swap_in_render_output(output);

        assert_eq!(orchestrator.lod.depth(), 0);
        assert!(orchestrator.active_render.is_none());
    }

    #[test]
    fn render_surface_receives_uploads_and_clears_on_document_swap() {
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 600.0).unwrap();
        orchestrator.set_render_surface(Box::new(RecordingRenderSurface::default()));

        orchestrator.adopt_parsed_document(small_document());
        orchestrator.run_render_to_completion();
        assert_eq!(orchestrator.resident_tiles.len(), orchestrator.render_output().unwrap().tiles.len());

        orchestrator.clear();
        assert!(orchestrator.resident_tiles.is_empty());
    }

    #[test]
    fn tick_presents_the_render_surface_once_per_call() {
        struct CountingSurface(std::rc::Rc<std::cell::Cell<u64>>);
        impl RenderSurface for CountingSurface {
            fn upload_tile(&mut self, _handle: TileHandle, _tile: &gds_renderer::Tile, _colour: (u8, u8, u8)) {}
            fn evict_tile(&mut self, _handle: TileHandle) {}
            fn present(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let presents = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 600.0).unwrap();
        orchestrator.set_render_surface(Box::new(CountingSurface(presents.clone())));
        orchestrator.adopt_parsed_document(small_document());
        orchestrator.run_render_to_completion();

        orchestrator.tick(Instant::now(), 1.0 / 60.0);
        orchestrator.tick(Instant::now(), 1.0 / 60.0);
        assert_eq!(presents.get(), 2);
    }

    #[test]
    fn set_render_depth_rejects_out_of_range_values() {
        let options = OrchestratorOptions { lod_min_depth: 0, lod_max_depth: 2, ..OrchestratorOptions::default() };
        let mut orchestrator = Orchestrator::new(options, 800.0, 600.0).unwrap();
        orchestrator.adopt_parsed_document(small_document());
        assert!(orchestrator.set_render_depth(3).is_err());
        assert!(orchestrator.set_render_depth(2).is_ok());
    }

    #[test]
    fn hover_subscription_fires_on_cursor_move() {
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 600.0).unwrap();
        orchestrator.adopt_parsed_document(small_document());

        let seen = std::rc::Rc::new(std::cell::RefCell::new(None));
        let seen_handle = seen.clone();
        orchestrator.on_hover(move |x, y| *seen_handle.borrow_mut() = Some((x, y)));

        orchestrator.on_mouse_move(10.0, 10.0);
        assert!(seen.borrow().is_some());
    }

    #[test]
    fn viewport_subscription_fires_on_pan() {
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 600.0).unwrap();
        orchestrator.adopt_parsed_document(small_document());

        let call_count = std::rc::Rc::new(std::cell::RefCell::new(0));
        let call_count_handle = call_count.clone();
        orchestrator.on_viewport_changed(move |_viewport, _bounds| *call_count_handle.borrow_mut() += 1);

        let before = *call_count.borrow();
        orchestrator.on_key_down(Key::ArrowUp, false);
        assert!(*call_count.borrow() > before);
    }

    #[test]
    fn unsubscribe_hover_stops_further_callbacks() {
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 600.0).unwrap();
        orchestrator.adopt_parsed_document(small_document());

        let call_count = std::rc::Rc::new(std::cell::RefCell::new(0));
        let call_count_handle = call_count.clone();
        let subscription = orchestrator.on_hover(move |_, _| *call_count_handle.borrow_mut() += 1);
        orchestrator.unsubscribe_hover(subscription);

        orchestrator.on_mouse_move(10.0, 10.0);
        assert_eq!(*call_count.borrow(), 0);
    }

    #[test]
    fn grid_toggle_key_flips_visibility() {
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 600.0).unwrap();
        orchestrator.adopt_parsed_document(small_document());
        assert!(orchestrator.grid_visible());

        orchestrator.on_key_down(Key::Toggle(ToggleKey::Grid), false);
        assert!(!orchestrator.grid_visible());
    }

    #[test]
    fn invalid_layer_key_is_rejected_without_mutating_existing_visibility() {
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 600.0).unwrap();
        orchestrator.adopt_parsed_document(small_document());

        let mut visibility = HashMap::new();
        visibility.insert("not-a-layer-key".to_string(), false);
        assert!(orchestrator.set_layer_visibility(&visibility).is_err());
    }

    #[test]
    fn scattered_polygons_scenario_culls_to_a_small_fraction_when_viewport_is_narrow() {
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 800.0).unwrap();
        orchestrator.adopt_parsed_document(ten_thousand_scattered_polygons());
        orchestrator.run_render_to_completion();
        assert_eq!(orchestrator.render_output().unwrap().polygons_rendered, 10_000);

        // sx = 800px / 10_000 world units, tx = 0, ty = 800 maps screen
        // (0,0)-(800,800) to world (0,0)-(10_000,10_000).
        orchestrator.set_viewport(0.0, 800.0, 800.0 / 10_000.0).unwrap();
        orchestrator.force_visibility_refresh();

        let metrics = orchestrator.performance_metrics();
        // 0.01% of 10,000 polygons is 1; allow generous slack for the
        // pseudo-random scatter landing more than one polygon in-window.
        assert!(metrics.visible_polygons <= 50, "expected a small fraction visible, got {}", metrics.visible_polygons);
        assert!(metrics.total_polygons == 10_000);
    }

    #[test]
    fn tick_advances_an_in_flight_render_and_updates_fps() {
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 600.0).unwrap();
        orchestrator.adopt_parsed_document(small_document());

        let now = Instant::now();
        orchestrator.tick(now, 1.0 / 60.0);
        assert!(orchestrator.performance_metrics().fps > 0.0);
    }

    #[test]
    fn resize_updates_the_input_controller_and_zoom_limits() {
        let mut orchestrator = Orchestrator::new(OrchestratorOptions::default(), 800.0, 600.0).unwrap();
        orchestrator.adopt_parsed_document(small_document());
        let limits_before = orchestrator.viewport.as_ref().unwrap().limits();

        orchestrator.resize(1600.0, 1200.0);
        let limits_after = orchestrator.viewport.as_ref().unwrap().limits();
        assert_ne!(limits_before, limits_after);
    }
}
