//! The in-memory hierarchical document produced by the parser and consumed
//! by the renderer: `Document`, `Cell`, `Polygon`, `Instance`, plus the
//! derived properties (top-cell detection, recursive bounding boxes,
//! minimap culling) that only need the hierarchy's shape, not the byte
//! stream it came from.

use std::collections::{HashMap, HashSet};

use gds_protocol::config::MINIMAP_SKIP_THRESHOLD;
use gds_protocol::{ParseError, ParseStatistics};
use geometry::{BBox, Point, Transform, Units};

/// True for the auxiliary "context" cells a library uses for bookkeeping:
/// name starts with `$$$` or contains `CONTEXT_INFO`. Context cells are
/// never rendered and never contribute to the referenced-cell set.
pub fn is_context_cell(name: &str) -> bool {
    name.starts_with("$$$") || name.contains("CONTEXT_INFO")
}

/// A closed polygon on one `(layer, datatype)` pair. Always holds at least
/// three unique vertices; construction rejects anything smaller.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub layer: i32,
    pub datatype: i32,
    pub points: Vec<Point>,
}

impl Polygon {
    /// Builds a polygon, rejecting degenerate input (fewer than three
    /// unique vertices). Vertex order is not otherwise validated; fill
    /// rule is a renderer concern.
    pub fn try_new(layer: i32, datatype: i32, points: Vec<Point>) -> Option<Self> {
        if unique_point_count(&points) < 3 {
            return None;
        }
        Some(Self { layer, datatype, points })
    }

    pub fn bbox(&self) -> BBox {
        BBox::from_points(self.points.iter().copied())
    }
}

fn unique_point_count(points: &[Point]) -> usize {
    let mut unique: Vec<Point> = Vec::with_capacity(points.len());
    for point in points {
        if !unique.iter().any(|existing| points_equal(*existing, *point)) {
            unique.push(*point);
        }
    }
    unique.len()
}

fn points_equal(a: Point, b: Point) -> bool {
    a.x == b.x && a.y == b.y
}

/// A placement of another cell (by name) inside this one, via an `SREF`.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub cell_ref: String,
    pub x: f64,
    pub y: f64,
    pub rotation_degrees: f64,
    pub mirror: bool,
    pub magnification: f64,
}

impl Instance {
    /// The transform this instance's own fields contribute, to be composed
    /// with whatever transform a renderer has accumulated for the parent.
    pub fn local_transform(&self) -> Transform {
        Transform {
            rotation_degrees: self.rotation_degrees,
            mirror: self.mirror,
            magnification: self.magnification,
            translate_x: self.x,
            translate_y: self.y,
        }
    }
}

/// A named, reusable cell definition: direct geometry plus child placements.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub name: String,
    pub polygons: Vec<Polygon>,
    pub instances: Vec<Instance>,
    pub bounding_box: BBox,
    pub skip_in_minimap: bool,
}

impl Cell {
    pub fn direct_polygon_count(&self) -> usize {
        self.polygons.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

/// The parsed, immutable document: every cell the stream defined, the
/// stably-ordered top cells, and bookkeeping about what the parser dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    units: Units,
    cells: HashMap<String, Cell>,
    top_cell_names: Vec<String>,
    overall_bbox: BBox,
    statistics: ParseStatistics,
}

impl Document {
    pub fn units(&self) -> Units {
        self.units
    }

    pub fn cell(&self, name: &str) -> Option<&Cell> {
        self.cells.get(name)
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    pub fn top_cells(&self) -> impl Iterator<Item = &Cell> {
        self.top_cell_names.iter().filter_map(|name| self.cells.get(name))
    }

    pub fn overall_bbox(&self) -> BBox {
        self.overall_bbox
    }

    pub fn statistics(&self) -> ParseStatistics {
        self.statistics
    }
}

/// A single cell's contents as the parser accumulates them, before bbox
/// propagation and top-cell detection have run.
#[derive(Debug, Clone, Default)]
pub struct CellDraft {
    pub polygons: Vec<Polygon>,
    pub instances: Vec<Instance>,
}

/// Accumulates cells in the order the stream defines them, then derives the
/// rest of the `Document` invariants in one pass.
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    drafts: HashMap<String, CellDraft>,
    order: Vec<String>,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces, if the stream redefines a structure name) a cell
    /// draft, preserving first-seen order for deterministic `topCells`.
    pub fn add_cell(&mut self, name: impl Into<String>, draft: CellDraft) {
        let name = name.into();
        if !self.drafts.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.drafts.insert(name, draft);
    }

    /// Computes recursive bounding boxes, top-cell membership, and
    /// minimap-skip flags, then freezes everything into a `Document`.
    pub fn build(self, units: Units, statistics: ParseStatistics) -> Result<Document, ParseError> {
        let bboxes = compute_bboxes(&self.drafts)?;

        let mut referenced: HashSet<String> = HashSet::new();
        for (name, draft) in &self.drafts {
            if is_context_cell(name) {
                continue;
            }
            for instance in &draft.instances {
                referenced.insert(instance.cell_ref.clone());
            }
        }
        let top_cell_names: Vec<String> = self
            .order
            .iter()
            .filter(|name| !referenced.contains(*name) && !is_context_cell(name))
            .cloned()
            .collect();

        let overall_bbox = top_cell_names
            .iter()
            .filter_map(|name| bboxes.get(name))
            .fold(BBox::EMPTY, |acc, bbox| acc.union(bbox));

        let doc_width = overall_bbox.width();
        let doc_height = overall_bbox.height();

        let mut cells = HashMap::with_capacity(self.drafts.len());
        for (name, draft) in self.drafts {
            let bounding_box = bboxes.get(&name).copied().unwrap_or(BBox::EMPTY);
            let skip_in_minimap = doc_width > 0.0
                && doc_height > 0.0
                && bounding_box.width() < MINIMAP_SKIP_THRESHOLD * doc_width
                && bounding_box.height() < MINIMAP_SKIP_THRESHOLD * doc_height;
            cells.insert(
                name.clone(),
                Cell {
                    name,
                    polygons: draft.polygons,
                    instances: draft.instances,
                    bounding_box,
                    skip_in_minimap,
                },
            );
        }

        Ok(Document { units, cells, top_cell_names, overall_bbox, statistics })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Done,
}

fn compute_bboxes(
    drafts: &HashMap<String, CellDraft>,
) -> Result<HashMap<String, BBox>, ParseError> {
    let mut memo: HashMap<String, BBox> = HashMap::with_capacity(drafts.len());
    let mut state: HashMap<String, VisitState> = HashMap::new();
    for name in drafts.keys() {
        bbox_for(name, drafts, &mut memo, &mut state)?;
    }
    Ok(memo)
}

fn bbox_for(
    name: &str,
    drafts: &HashMap<String, CellDraft>,
    memo: &mut HashMap<String, BBox>,
    state: &mut HashMap<String, VisitState>,
) -> Result<BBox, ParseError> {
    if let Some(bbox) = memo.get(name) {
        return Ok(*bbox);
    }
    match state.get(name) {
        Some(VisitState::Visiting) => {
            return Err(ParseError::CyclicReference { cell: name.to_string() });
        }
        Some(VisitState::Done) => unreachable!("done cells are always memoized"),
        None => {}
    }

    let Some(draft) = drafts.get(name) else {
        // A dangling SNAME reference to a structure the stream never
        // defined; treat it as contributing no geometry.
        return Ok(BBox::EMPTY);
    };

    state.insert(name.to_string(), VisitState::Visiting);

    let mut bbox = BBox::from_points(draft.polygons.iter().flat_map(|polygon| polygon.points.iter().copied()));
    for instance in &draft.instances {
        let child_bbox = bbox_for(&instance.cell_ref, drafts, memo, state)?;
        if child_bbox.is_empty() {
            continue;
        }
        let placed = instance.local_transform().apply_bbox(&child_bbox);
        bbox = bbox.union(&placed);
    }

    state.insert(name.to_string(), VisitState::Done);
    memo.insert(name.to_string(), bbox);
    Ok(bbox)
}
