//! Host-overridable tuning knobs, validated once at construction rather
//! than silently clamped, and (de)serializable so a shell can persist a
//! session's settings the way it persists viewport state.

use gds_protocol::{config, ConfigError};
use serde::{Deserialize, Serialize};

/// A viewport a host persisted from a previous session. Reapplied the
/// first time a document's `Units` become known (see `Orchestrator::load`),
/// since `ZoomLimits` — and therefore a meaningful `ViewportManager` — do
/// not exist before that.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistedViewport {
    pub tx: f64,
    pub ty: f64,
    pub sx: f64,
}

/// Construction-time overrides for the constants in `gds_protocol::config`.
/// Fields not supplied by the host default to the spec's own values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorOptions {
    #[serde(default = "default_lod_min_depth")]
    pub lod_min_depth: u8,
    #[serde(default = "default_lod_max_depth")]
    pub lod_max_depth: u8,
    #[serde(default)]
    pub initial_viewport: Option<PersistedViewport>,
    /// Layer visibility, keyed by the canonical `"<layer>:<datatype>"`
    /// string so this struct round-trips through JSON the way a host's
    /// saved session does.
    #[serde(default)]
    pub initial_layer_visibility: std::collections::HashMap<String, bool>,
}

fn default_lod_min_depth() -> u8 {
    config::LOD_MIN_DEPTH
}

fn default_lod_max_depth() -> u8 {
    config::LOD_MAX_DEPTH
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            lod_min_depth: config::LOD_MIN_DEPTH,
            lod_max_depth: config::LOD_MAX_DEPTH,
            initial_viewport: None,
            initial_layer_visibility: std::collections::HashMap::new(),
        }
    }
}

impl OrchestratorOptions {
    /// Rejects a depth range that is empty or exceeds the hard ceiling the
    /// budget multiplier table supports, rather than clamping it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lod_min_depth > self.lod_max_depth || self.lod_max_depth > config::LOD_MAX_DEPTH {
            return Err(ConfigError::OutOfRangeDepth {
                depth: self.lod_min_depth,
                min: 0,
                max: config::LOD_MAX_DEPTH,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_depth_range_is_rejected() {
        let options = OrchestratorOptions { lod_min_depth: 2, lod_max_depth: 1, ..OrchestratorOptions::default() };
        assert!(matches!(options.validate(), Err(ConfigError::OutOfRangeDepth { .. })));
    }

    #[test]
    fn depth_above_the_multiplier_table_ceiling_is_rejected() {
        let options = OrchestratorOptions { lod_min_depth: 0, lod_max_depth: 9, ..OrchestratorOptions::default() };
        assert!(options.validate().is_err());
    }

    #[test]
    fn default_options_validate() {
        assert!(OrchestratorOptions::default().validate().is_ok());
    }

    #[test]
    fn round_trips_through_json() {
        let options = OrchestratorOptions::default();
        let text = serde_json::to_string(&options).unwrap();
        let back: OrchestratorOptions = serde_json::from_str(&text).unwrap();
        assert_eq!(options, back);
    }
}
