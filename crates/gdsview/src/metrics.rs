//! The snapshot a host polls (or the performance panel overlay renders)
//! once per tick: `getPerformanceMetrics()` per the external interface.

use geometry::BBox;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceMetrics {
    pub fps: f64,
    pub visible_polygons: u64,
    pub total_polygons: u64,
    pub budget: u64,
    pub depth: u8,
    pub zoom: f64,
    /// The zoom-out/zoom-in thresholds the next LOD re-evaluation will
    /// trigger on, from [`lod::LodManager::thresholds`].
    pub thresholds: (f64, f64),
    pub viewport_bbox: BBox,
}
