//! Shared protocol types used across the parser, document, renderer,
//! viewport, LOD, and orchestrator crates: configuration constants, the
//! error taxonomy of the failure-semantics design, and the small value
//! types that cross crate boundaries (layer keys, tile handles, progress).

use std::fmt;

slotmap::new_key_type! {
    /// Identifies one rendered tile's Graphics batch and SpatialIndex entry.
    /// Lifetime is tied to a single render pass (see `config` module docs).
    pub struct TileHandle;
}

/// Compile- and init-time constants from the external interface table.
pub mod config {
    /// Database units per tile side.
    pub const TILE_SIZE: f64 = 1_000_000.0;
    pub const LOD_MIN_DEPTH: u8 = 0;
    pub const LOD_MAX_DEPTH: u8 = 3;
    pub const LOD_BUDGET_BASE: u64 = 100_000;
    /// Per-depth polygon budget multiplier, indexed by depth 0..=3.
    pub const LOD_BUDGET_MULT: [f64; 4] = [1.0, 1.5, 2.0, 2.5];
    pub const LOD_INCREASE_THRESHOLD: f64 = 0.30;
    pub const LOD_DECREASE_THRESHOLD: f64 = 0.90;
    pub const LOD_ZOOM_OUT_FACTOR: f64 = 0.2;
    pub const LOD_ZOOM_IN_FACTOR: f64 = 2.0;
    pub const LOD_CHANGE_COOLDOWN_MS: u64 = 1000;
    pub const MINIMAP_SKIP_THRESHOLD: f64 = 0.01;
    pub const VIEWPORT_DEBOUNCE_MS: u64 = 100;
    pub const OVERLAY_DEBOUNCE_MS: u64 = 50;
    pub const STROKE_SCREEN_PX: f64 = 2.0;
    pub const SCALE_BAR_MIN_METERS: f64 = 1e-9;
    pub const SCALE_BAR_MAX_METERS: f64 = 1.0;

    /// Budget in polygons for a render pass at the given recursion depth.
    pub fn budget_for_depth(depth: u8) -> u64 {
        let multiplier = LOD_BUDGET_MULT[depth as usize];
        (LOD_BUDGET_BASE as f64 * multiplier) as u64
    }
}

/// The canonical `"<layer>:<datatype>"` key a host uses to address layer
/// visibility toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerKey {
    pub layer: i32,
    pub datatype: i32,
}

impl LayerKey {
    pub fn new(layer: i32, datatype: i32) -> Self {
        Self { layer, datatype }
    }

    pub fn parse(key: &str) -> Result<Self, ConfigError> {
        let mut parts = key.split(':');
        let (Some(layer_str), Some(datatype_str), None) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ConfigError::InvalidLayerKey(key.to_string()));
        };
        let layer = layer_str
            .parse::<i32>()
            .map_err(|_| ConfigError::InvalidLayerKey(key.to_string()))?;
        let datatype = datatype_str
            .parse::<i32>()
            .map_err(|_| ConfigError::InvalidLayerKey(key.to_string()))?;
        Ok(Self { layer, datatype })
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.layer, self.datatype)
    }
}

/// Counts of records the parser recognised but intentionally did not turn
/// into geometry, plus degenerate-polygon drops. Surfaced to the host as a
/// non-modal status line per the failure-semantics design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseStatistics {
    pub polygons_emitted: u64,
    pub polygons_degenerate_dropped: u64,
    pub paths_skipped: u64,
    pub boxes_skipped: u64,
    pub texts_skipped: u64,
    pub arefs_skipped: u64,
    pub unknown_tags_skipped: u64,
    pub used_fallback_decoder: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    Header,
    Library,
    Structure,
    Element,
    EndLib,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    MalformedLength { stage: ParseStage, offset: usize },
    UnknownTag { stage: ParseStage, offset: usize, tag: u16 },
    UnterminatedStructure { offset: usize, name: String },
    CyclicReference { cell: String },
    Truncated { offset: usize, expected: usize, available: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MalformedLength { stage, offset } => write!(
                formatter,
                "malformed record length at offset {offset} during {stage:?}"
            ),
            ParseError::UnknownTag { stage, offset, tag } => write!(
                formatter,
                "unknown record tag {tag:#06x} at offset {offset} during {stage:?}"
            ),
            ParseError::UnterminatedStructure { offset, name } => write!(
                formatter,
                "structure '{name}' starting near offset {offset} was never terminated"
            ),
            ParseError::CyclicReference { cell } => {
                write!(formatter, "cyclic cell reference detected through '{cell}'")
            }
            ParseError::Truncated { offset, expected, available } => write!(
                formatter,
                "truncated stream at offset {offset}: expected {expected} bytes, {available} available"
            ),
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderError {
    BudgetStructurallyExceeded { budget: u64, required_minimum: u64 },
    InvalidTransform,
}

impl fmt::Display for RenderError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::BudgetStructurallyExceeded { budget, required_minimum } => write!(
                formatter,
                "render budget {budget} cannot hold the {required_minimum} polygons required at this depth"
            ),
            RenderError::InvalidTransform => {
                write!(formatter, "accumulated transform produced non-finite coordinates")
            }
        }
    }
}

impl std::error::Error for RenderError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidLayerKey(String),
    OutOfRangeDepth { depth: u8, min: u8, max: u8 },
    InvalidViewportState(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidLayerKey(key) => write!(formatter, "invalid layer key '{key}'"),
            ConfigError::OutOfRangeDepth { depth, min, max } => write!(
                formatter,
                "depth {depth} is out of range [{min}, {max}]"
            ),
            ConfigError::InvalidViewportState(reason) => write!(formatter, "invalid viewport state: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    CanvasLost,
    GpuContextLost,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::CanvasLost => write!(formatter, "canvas surface was lost"),
            ResourceError::GpuContextLost => write!(formatter, "GPU context was lost"),
        }
    }
}

impl std::error::Error for ResourceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_key_round_trips_through_display_and_parse() {
        let key = LayerKey::new(12, 3);
        let text = key.to_string();
        assert_eq!(text, "12:3");
        assert_eq!(LayerKey::parse(&text).unwrap(), key);
    }

    #[test]
    fn layer_key_parse_rejects_malformed_input() {
        assert!(LayerKey::parse("12").is_err());
        assert!(LayerKey::parse("12:3:4").is_err());
        assert!(LayerKey::parse("a:b").is_err());
    }

    #[test]
    fn budget_for_depth_matches_multiplier_table() {
        assert_eq!(config::budget_for_depth(0), 100_000);
        assert_eq!(config::budget_for_depth(1), 150_000);
        assert_eq!(config::budget_for_depth(3), 250_000);
    }
}
