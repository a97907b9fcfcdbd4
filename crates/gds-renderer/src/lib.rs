//! Flattens a `Document`'s cell hierarchy into tiled, colour-classified
//! polygon batches under composed transforms. Cooperative and resumable:
//! [`Renderer::step`] processes one bounded chunk of polygons per call,
//! mirroring the parser's `step()` so a host loop can interleave both
//! without threads.

use std::collections::HashMap;
use std::sync::Arc;

use gds_document::{Document, Instance};
use gds_protocol::config::{STROKE_SCREEN_PX, TILE_SIZE};
use gds_protocol::{LayerKey, RenderError, TileHandle};
use geometry::{BBox, Point, Transform};
use slotmap::SlotMap;
use spatial_index::SpatialIndex;

const POLYGONS_PER_STEP: u64 = 10_000;

/// A polygon after flattening: transformed into document space under its
/// instance's accumulated transform.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPolygon {
    pub layer: i32,
    pub datatype: i32,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub layer: i32,
    pub datatype: i32,
    pub tile_x: i64,
    pub tile_y: i64,
}

/// One rendered batch: every polygon sharing a `(layer, datatype)` pair
/// whose centroid falls in the same `TILE_SIZE` square.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub key: TileKey,
    pub polygons: Vec<RenderedPolygon>,
    pub bbox: BBox,
    /// `Some(width)` in outline mode (`2 / effectiveScale` dbUnits, so
    /// strokes read as a constant 2 screen pixels); `None` when filled —
    /// filled-mode strokes produced visible seam artifacts at tile edges.
    pub stroke_width: Option<f64>,
}

/// The result of a completed render pass: a live tile set plus its index,
/// swapped into the host atomically once `step()` returns `Done`.
#[derive(Debug)]
pub struct RenderOutput {
    pub tiles: SlotMap<TileHandle, Tile>,
    pub spatial_index: SpatialIndex<TileHandle>,
    pub polygons_rendered: u64,
    pub skipped_by_budget: u64,
    /// Non-fatal faults collected during the pass: instances whose
    /// accumulated transform produced non-finite coordinates
    /// (`InvalidTransform`, almost always a malformed ANGLE or MAG value
    /// surviving parsing), and a single trailing
    /// `BudgetStructurallyExceeded` when the pass had to skip direct
    /// polygons because the budget could not hold them. Neither aborts the
    /// render; the caller logs these and backs the LOD off one level.
    pub errors: Vec<RenderError>,
}

/// Parameters for one render pass. `effective_scale` is whatever the
/// orchestrator resolved from `overrideScale ?? viewport.sx` — this crate
/// has no dependency on `viewport`, so it only ever sees the final number.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub depth: u8,
    pub budget: u64,
    pub outline: bool,
    pub effective_scale: f64,
    pub layer_visibility: HashMap<LayerKey, bool>,
    /// When set, an instance whose target cell has `skip_in_minimap` is
    /// dropped along with its whole subtree instead of being recursed into.
    /// Used by the minimap's reduced renderer for cell-level culling; the
    /// main renderer always leaves this `false`.
    pub skip_minimap_cells: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            depth: 0,
            budget: gds_protocol::config::LOD_BUDGET_BASE,
            outline: false,
            effective_scale: 1.0,
            layer_visibility: HashMap::new(),
            skip_minimap_cells: false,
        }
    }
}

#[derive(Debug)]
pub enum RenderStep {
    Continue { fraction: f32 },
    Done(RenderOutput),
    Cancelled,
}

struct Frame {
    cell_name: String,
    transform: Transform,
    depth_remaining: u8,
    next_polygon_index: usize,
    next_instance_index: usize,
    /// `polygons_rendered` must stay below this while this frame emits its
    /// own direct polygons — the 70% reservation that keeps a
    /// polygon-heavy cell from starving its own instance recursion.
    direct_ceiling: u64,
}

struct TileBuilder {
    key: TileKey,
    polygons: Vec<RenderedPolygon>,
    bbox: BBox,
}

/// A single render pass over a shared `Document`. Construct fresh for
/// each pass; `step()` it to completion or cancellation, then discard it.
/// Holds an `Arc<Document>` rather than a borrow so a host can keep a
/// render session alive across many calls (interleaved with unrelated
/// `&mut` orchestrator methods) without a self-referential lifetime.
pub struct Renderer {
    document: Arc<Document>,
    options: RenderOptions,
    stack: Vec<Frame>,
    tiles: HashMap<TileKey, TileBuilder>,
    polygons_rendered: u64,
    skipped_by_budget: u64,
    errors: Vec<RenderError>,
    cancelled: bool,
}

impl Renderer {
    pub fn new(document: Arc<Document>, options: RenderOptions) -> Self {
        let mut stack = Vec::new();
        for cell in document.top_cells() {
            let has_direct = !cell.polygons.is_empty();
            let has_instances = !cell.instances.is_empty();
            let direct_cap = direct_budget_share(options.budget, has_direct, has_instances);
            stack.push(Frame {
                cell_name: cell.name.clone(),
                transform: Transform::IDENTITY,
                depth_remaining: options.depth,
                next_polygon_index: 0,
                next_instance_index: 0,
                direct_ceiling: direct_cap,
            });
        }
        // Top cells are pushed in document order; process them last-in so
        // the first top cell is not starved relative to later ones.
        stack.reverse();
        Self {
            document,
            options,
            stack,
            tiles: HashMap::new(),
            polygons_rendered: 0,
            skipped_by_budget: 0,
            errors: Vec::new(),
            cancelled: false,
        }
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn step(&mut self) -> RenderStep {
        if self.cancelled {
            return RenderStep::Cancelled;
        }

        let document = Arc::clone(&self.document);
        let mut processed_this_step = 0u64;

        loop {
            if self.cancelled {
                return RenderStep::Cancelled;
            }
            if processed_this_step >= POLYGONS_PER_STEP {
                return RenderStep::Continue { fraction: self.progress_fraction() };
            }

            let Some(top) = self.stack.len().checked_sub(1) else {
                return RenderStep::Done(self.finish());
            };

            let cell_name = self.stack[top].cell_name.clone();
            let Some(cell) = document.cell(&cell_name) else {
                self.stack.pop();
                continue;
            };

            if self.stack[top].next_polygon_index < cell.polygons.len() {
                let poly_index = self.stack[top].next_polygon_index;
                let direct_ceiling = self.stack[top].direct_ceiling;
                if self.polygons_rendered < direct_ceiling && self.polygons_rendered < self.options.budget {
                    let polygon = &cell.polygons[poly_index];
                    let layer_key = LayerKey::new(polygon.layer, polygon.datatype);
                    let visible = *self.options.layer_visibility.get(&layer_key).unwrap_or(&true);
                    if visible {
                        let transform = self.stack[top].transform;
                        self.emit_polygon(polygon, transform);
                    }
                    self.stack[top].next_polygon_index += 1;
                    processed_this_step += 1;
                } else {
                    let remaining_here = (cell.polygons.len() - poly_index) as u64;
                    self.skipped_by_budget += remaining_here;
                    self.stack[top].next_polygon_index = cell.polygons.len();
                }
                continue;
            }

            if self.stack[top].next_instance_index < cell.instances.len() {
                let instance_index = self.stack[top].next_instance_index;
                self.stack[top].next_instance_index += 1;

                if self.polygons_rendered >= self.options.budget {
                    continue;
                }
                if self.stack[top].depth_remaining == 0 {
                    continue;
                }
                let instance: Instance = cell.instances[instance_index].clone();
                if gds_document::is_context_cell(&instance.cell_ref) {
                    continue;
                }
                let Some(child_cell) = document.cell(&instance.cell_ref) else {
                    continue;
                };
                if self.options.skip_minimap_cells && child_cell.skip_in_minimap {
                    continue;
                }

                let parent_transform = self.stack[top].transform;
                let child_transform = parent_transform.compose_child(
                    instance.rotation_degrees,
                    instance.mirror,
                    instance.magnification,
                    instance.x,
                    instance.y,
                );

                if !child_transform.translate_x.is_finite() || !child_transform.translate_y.is_finite() {
                    self.errors.push(RenderError::InvalidTransform);
                    continue;
                }

                let has_direct = !child_cell.polygons.is_empty();
                let has_instances = !child_cell.instances.is_empty();
                let remaining = self.options.budget.saturating_sub(self.polygons_rendered);
                let direct_cap = direct_budget_share(remaining, has_direct, has_instances);

                self.stack.push(Frame {
                    cell_name: instance.cell_ref,
                    transform: child_transform,
                    depth_remaining: self.stack[top].depth_remaining - 1,
                    next_polygon_index: 0,
                    next_instance_index: 0,
                    direct_ceiling: self.polygons_rendered + direct_cap,
                });
                continue;
            }

            self.stack.pop();
        }
    }

    fn emit_polygon(&mut self, polygon: &gds_document::Polygon, transform: Transform) {
        let points: Vec<Point> = polygon.points.iter().map(|point| transform.apply(*point)).collect();
        let Some(rendered_bbox_source) = gds_document::Polygon::try_new(polygon.layer, polygon.datatype, points.clone()) else {
            return;
        };
        let bbox = rendered_bbox_source.bbox();
        let centroid = centroid_of(&points);
        let key = TileKey {
            layer: polygon.layer,
            datatype: polygon.datatype,
            tile_x: (centroid.x / TILE_SIZE).floor() as i64,
            tile_y: (centroid.y / TILE_SIZE).floor() as i64,
        };
        let builder = self.tiles.entry(key).or_insert_with(|| TileBuilder { key, polygons: Vec::new(), bbox: BBox::EMPTY });
        builder.polygons.push(RenderedPolygon { layer: polygon.layer, datatype: polygon.datatype, points });
        builder.bbox = builder.bbox.union(&bbox);
        self.polygons_rendered += 1;
    }

    fn progress_fraction(&self) -> f32 {
        (self.polygons_rendered as f32 / self.options.budget.max(1) as f32).min(0.99)
    }

    fn finish(&mut self) -> RenderOutput {
        let stroke_width =
            if self.options.outline { Some(STROKE_SCREEN_PX / self.options.effective_scale.max(f64::MIN_POSITIVE)) } else { None };

        let mut tiles: SlotMap<TileHandle, Tile> = SlotMap::with_key();
        let mut entries = Vec::with_capacity(self.tiles.len());
        for (key, builder) in self.tiles.drain() {
            let bbox = builder.bbox;
            let tile = Tile { key, polygons: builder.polygons, bbox, stroke_width };
            let handle = tiles.insert(tile);
            entries.push((bbox, handle));
        }

        let mut spatial_index = SpatialIndex::new();
        spatial_index.insert_many(entries);

        if self.skipped_by_budget > 0 {
            self.errors.push(RenderError::BudgetStructurallyExceeded {
                budget: self.options.budget,
                required_minimum: self.polygons_rendered + self.skipped_by_budget,
            });
        }

        RenderOutput {
            tiles,
            spatial_index,
            polygons_rendered: self.polygons_rendered,
            skipped_by_budget: self.skipped_by_budget,
            errors: std::mem::take(&mut self.errors),
        }
    }

    /// Runs `step()` to completion without yielding, for callers (tests,
    /// the minimap's reduced renderer) that never call `cancel()`.
    pub fn run_to_completion(mut self) -> RenderOutput {
        loop {
            match self.step() {
                RenderStep::Continue { .. } => continue,
                RenderStep::Done(output) => return output,
                RenderStep::Cancelled => panic!("run_to_completion called on a cancelled renderer"),
            }
        }
    }
}

fn direct_budget_share(remaining: u64, has_direct: bool, has_instances: bool) -> u64 {
    if has_direct && has_instances {
        (remaining as f64 * 0.7) as u64
    } else if has_direct {
        remaining
    } else {
        0
    }
}

fn centroid_of(points: &[Point]) -> Point {
    let count = points.len().max(1) as f64;
    let (sum_x, sum_y) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point::new(sum_x / count, sum_y / count)
}
