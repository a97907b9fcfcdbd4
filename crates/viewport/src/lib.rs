//! Pan/zoom viewport state: the `{tx, ty, sx, sy = -sx}` affine, scale
//! limits calibrated off the document's units, and the debounced
//! visibility pass that feeds layer filtering into the spatial index.

use std::collections::{HashMap, HashSet};

use gds_protocol::{ConfigError, LayerKey};
use geometry::{BBox, Point, Units};
use spatial_index::SpatialIndex;

/// Reference span, in screen pixels, the zoom-limit calculation treats as
/// "the viewport" when bounding the physical length it can represent.
/// Interpreting the spec's "current viewport width" as screen pixels
/// (rather than database units) is the only reading under which the
/// viewport width actually participates in the min/max zoom formula.
const DEFAULT_REFERENCE_PX: f64 = 150.0;

/// Stateless min/max zoom so the scale bar's displayed length never
/// implies a physical span outside `[1 nm, 1 m]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomLimits {
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl ZoomLimits {
    pub fn compute(viewport_width_px: f64, units: Units) -> Self {
        let reference_px = viewport_width_px.max(1.0).min(DEFAULT_REFERENCE_PX.max(viewport_width_px));
        let meters_per_db_unit = units.db_per_user / units.user_per_meter;
        let min_zoom = reference_px * meters_per_db_unit / gds_protocol::config::SCALE_BAR_MAX_METERS;
        let max_zoom = reference_px * meters_per_db_unit / gds_protocol::config::SCALE_BAR_MIN_METERS;
        Self { min_zoom, max_zoom }
    }

    pub fn clamp(&self, scale: f64) -> f64 {
        scale.clamp(self.min_zoom, self.max_zoom)
    }
}

/// The viewport's affine transform. `sy` is always `-sx`: GDSII's
/// Cartesian Y-up coordinates displayed on a Y-down screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub tx: f64,
    pub ty: f64,
    pub sx: f64,
}

impl Viewport {
    pub fn sy(&self) -> f64 {
        -self.sx
    }

    pub fn screen_to_world(&self, screen_x: f64, screen_y: f64) -> Point {
        Point::new((screen_x - self.tx) / self.sx, (screen_y - self.ty) / self.sy())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VisibilityCounts {
    pub visible: usize,
    pub hidden: usize,
}

/// An entry a `SpatialIndex` keyed by bbox, with a visibility flag the
/// viewport toggles during `update_visibility`. The renderer owns the
/// concrete type; the viewport only needs these three capabilities.
pub trait VisibilityEntry {
    fn bbox(&self) -> BBox;
    fn layer_key(&self) -> LayerKey;
    fn set_visible(&mut self, visible: bool);
}

pub struct ViewportManager {
    viewport: Viewport,
    limits: ZoomLimits,
}

impl ViewportManager {
    pub fn new(limits: ZoomLimits) -> Self {
        Self { viewport: Viewport { tx: 0.0, ty: 0.0, sx: limits.clamp(1.0) }, limits }
    }

    /// Reconstructs a viewport from persisted `{tx, ty, sx}`, rejecting
    /// non-finite or non-positive scale rather than silently clamping it.
    pub fn from_persisted(tx: f64, ty: f64, sx: f64, limits: ZoomLimits) -> Result<Self, ConfigError> {
        if !sx.is_finite() || sx <= 0.0 {
            return Err(ConfigError::InvalidViewportState(format!("invalid persisted scale {sx}")));
        }
        Ok(Self { viewport: Viewport { tx, ty, sx }, limits })
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn limits(&self) -> ZoomLimits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: ZoomLimits) {
        self.limits = limits;
        self.viewport.sx = limits.clamp(self.viewport.sx);
    }

    /// Converts a screen-space point to world (database) units, using the
    /// current viewport transform. Exposed for overlays (minimap clicks,
    /// the coordinates display) that need single-point conversion rather
    /// than the four-corner sweep `get_viewport_bounds` performs.
    pub fn screen_to_world(&self, screen_x: f64, screen_y: f64) -> Point {
        self.viewport.screen_to_world(screen_x, screen_y)
    }

    pub fn get_viewport_bounds(&self, screen_w: f64, screen_h: f64) -> BBox {
        BBox::from_points([
            self.viewport.screen_to_world(0.0, 0.0),
            self.viewport.screen_to_world(screen_w, 0.0),
            self.viewport.screen_to_world(0.0, screen_h),
            self.viewport.screen_to_world(screen_w, screen_h),
        ])
    }

    pub fn pan(&mut self, dx_px: f64, dy_px: f64) {
        self.viewport.tx += dx_px;
        self.viewport.ty += dy_px;
    }

    /// Multiplies scale by `factor` (after clamping), keeping the world
    /// point currently under `(screen_cx, screen_cy)` fixed on screen.
    pub fn zoom(&mut self, factor: f64, screen_cx: f64, screen_cy: f64) {
        let old_sx = self.viewport.sx;
        let new_sx = self.limits.clamp(old_sx * factor);
        if new_sx == old_sx {
            return;
        }
        let world = self.viewport.screen_to_world(screen_cx, screen_cy);
        self.viewport.sx = new_sx;
        self.viewport.tx = screen_cx - world.x * new_sx;
        self.viewport.ty = screen_cy - world.y * self.viewport.sy();
    }

    /// Used by minimap clicks and jump-to-coordinate navigation.
    pub fn set_center_and_scale(&mut self, world_cx: f64, world_cy: f64, sx: f64, screen_w: f64, screen_h: f64) {
        let sx = self.limits.clamp(sx);
        self.viewport.sx = sx;
        self.viewport.tx = screen_w / 2.0 - world_cx * sx;
        self.viewport.ty = screen_h / 2.0 - world_cy * self.viewport.sy();
    }

    /// Fits `doc_bbox` to the canvas with a fractional margin. The only
    /// operation allowed to ignore `ZoomLimits`, since a document can
    /// physically exceed the scale-bar-derived range.
    pub fn fit_to_view(&mut self, doc_bbox: BBox, screen_w: f64, screen_h: f64, margin_fraction: f64) {
        if doc_bbox.is_empty() || screen_w <= 0.0 || screen_h <= 0.0 {
            self.viewport = Viewport { tx: screen_w / 2.0, ty: screen_h / 2.0, sx: self.viewport.sx };
            return;
        }
        let width = doc_bbox.width().max(f64::MIN_POSITIVE);
        let height = doc_bbox.height().max(f64::MIN_POSITIVE);
        let margin = 1.0 + margin_fraction;
        let sx = (screen_w / (width * margin)).min(screen_h / (height * margin));

        self.viewport.sx = sx;
        let center = doc_bbox.center();
        self.viewport.tx = screen_w / 2.0 - center.x * sx;
        self.viewport.ty = screen_h / 2.0 - center.y * self.viewport.sy();
    }

    /// Queries `index` with the current viewport bounds and toggles each
    /// entry's visibility, AND-masked with `layer_visibility`.
    pub fn update_visibility<T: VisibilityEntry>(
        &self,
        screen_w: f64,
        screen_h: f64,
        entries: &mut [T],
        index: &SpatialIndex<usize>,
        layer_visibility: &HashMap<LayerKey, bool>,
    ) -> VisibilityCounts {
        let bounds = self.get_viewport_bounds(screen_w, screen_h);
        let in_view: HashSet<usize> = index.query(bounds).copied().collect();

        let mut counts = VisibilityCounts::default();
        for (index_in_entries, entry) in entries.iter_mut().enumerate() {
            let layer_visible = *layer_visibility.get(&entry.layer_key()).unwrap_or(&true);
            let visible = in_view.contains(&index_in_entries) && layer_visible;
            entry.set_visible(visible);
            if visible {
                counts.visible += 1;
            } else {
                counts.hidden += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units() -> Units {
        Units { db_per_user: 1e-3, user_per_meter: 1e-6 }
    }

    #[test]
    fn zoom_keeps_cursor_world_point_fixed() {
        let limits = ZoomLimits { min_zoom: 1e-6, max_zoom: 1e6 };
        let mut manager = ViewportManager::new(limits);
        manager.pan(100.0, 50.0);
        let before = manager.viewport();
        let world_before = before.screen_to_world(400.0, 300.0);

        manager.zoom(2.0, 400.0, 300.0);

        let after = manager.viewport();
        let world_after = after.screen_to_world(400.0, 300.0);
        assert!((world_before.x - world_after.x).abs() < 1e-9);
        assert!((world_before.y - world_after.y).abs() < 1e-9);
    }

    #[test]
    fn fit_to_view_twice_is_idempotent() {
        let limits = ZoomLimits::compute(800.0, units());
        let mut manager = ViewportManager::new(limits);
        let bbox = BBox::from_points([Point::new(0.0, 0.0), Point::new(1000.0, 500.0)]);

        manager.fit_to_view(bbox, 800.0, 600.0, 0.1);
        let first = manager.viewport();
        manager.fit_to_view(bbox, 800.0, 600.0, 0.1);
        let second = manager.viewport();

        assert!((first.sx - second.sx).abs() < 1e-9);
        assert!((first.tx - second.tx).abs() < 1e-6);
        assert!((first.ty - second.ty).abs() < 1e-6);
    }

    #[test]
    fn fit_to_view_can_exceed_zoom_limits() {
        let limits = ZoomLimits { min_zoom: 1.0, max_zoom: 1.0 };
        let mut manager = ViewportManager::new(limits);
        let bbox = BBox::from_points([Point::new(0.0, 0.0), Point::new(10_000_000.0, 10_000_000.0)]);
        manager.fit_to_view(bbox, 800.0, 600.0, 0.1);
        assert!(manager.viewport().sx < limits.min_zoom);
    }

    #[test]
    fn from_persisted_rejects_non_positive_scale() {
        let limits = ZoomLimits { min_zoom: 0.1, max_zoom: 10.0 };
        assert!(ViewportManager::from_persisted(0.0, 0.0, 0.0, limits).is_err());
        assert!(ViewportManager::from_persisted(0.0, 0.0, -1.0, limits).is_err());
        assert!(ViewportManager::from_persisted(0.0, 0.0, 1.0, limits).is_ok());
    }

    struct TestEntry {
        bbox: BBox,
        layer: LayerKey,
        visible: bool,
    }

    impl VisibilityEntry for TestEntry {
        fn bbox(&self) -> BBox {
            self.bbox
        }
        fn layer_key(&self) -> LayerKey {
            self.layer
        }
        fn set_visible(&mut self, visible: bool) {
            self.visible = visible;
        }
    }

    #[test]
    fn update_visibility_and_masks_bbox_intersection_with_layer_visibility() {
        let limits = ZoomLimits { min_zoom: 1e-9, max_zoom: 1e9 };
        let manager = ViewportManager::new(limits);

        let mut entries = vec![
            TestEntry { bbox: BBox::from_points([Point::new(0.0, 0.0), Point::new(1.0, 1.0)]), layer: LayerKey::new(1, 0), visible: false },
            TestEntry { bbox: BBox::from_points([Point::new(1000.0, 1000.0), Point::new(1001.0, 1001.0)]), layer: LayerKey::new(1, 0), visible: false },
        ];

        let mut index = SpatialIndex::new();
        index.insert_many(entries.iter().enumerate().map(|(i, e)| (e.bbox(), i)));

        let mut layer_visibility = HashMap::new();
        layer_visibility.insert(LayerKey::new(1, 0), true);

        let counts = manager.update_visibility(10.0, 10.0, &mut entries, &index, &layer_visibility);
        assert_eq!(counts.visible, 1);
        assert_eq!(counts.hidden, 1);
        assert!(entries[0].visible);
        assert!(!entries[1].visible);
    }
}
