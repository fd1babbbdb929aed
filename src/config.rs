//! Engine configuration
//!
//! Tunables for hit testing, node sizing, automatic placement, history depth and the external
//! layout tool. Stored as JSON; every field falls back to its default when missing.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::edge::EditMode;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outline family used by the default style provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeShapeKind {
    #[default]
    Ellipse,
    Box,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RankDir {
    #[default]
    LR,
    TB,
}

/// External layout tool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Graphviz executable (overridden by `STATECANVAS_DOT`)
    pub program: String,
    /// Kill the layout process after this long
    pub timeout_ms: u64,
    /// How often the running process is polled (and the caller's UI pumped)
    pub poll_interval_ms: u64,
    pub rankdir: RankDir,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            program: "dot".to_string(),
            timeout_ms: 30_000,
            poll_interval_ms: 20,
            rankdir: RankDir::LR,
        }
    }
}

impl LayoutConfig {
    /// Resolve the Graphviz binary: environment override first, then the configured name.
    pub fn program_path(&self) -> PathBuf {
        if let Ok(p) = std::env::var("STATECANVAS_DOT") {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return pb;
            }
        }
        PathBuf::from(&self.program)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Snap pitch for handle drags in scene units; 0 disables snapping
    pub grid_pitch: f32,
    /// Pick distance for handles and curve segments
    pub handle_tolerance: f32,
    /// Smallest node half-extent per axis
    pub min_node_radius: f32,
    /// Half-extent of freshly created nodes
    pub default_node_radius: [f32; 2],
    /// Tile pitch used by grid placement
    pub grid_spacing: f32,
    /// Above this many missing items a full reconcile gives up instead of grid-placing
    pub max_auto_repair: usize,
    pub default_edge_mode: EditMode,
    /// Root/tip moves shorter than this do not re-run spline interpolation
    pub spline_threshold: f32,
    /// Gap kept between a target outline and a control point pushed out of it
    pub anchor_margin: f32,
    /// Distance of a default edge label from its curve
    pub label_offset: f32,
    pub node_shape: NodeShapeKind,
    /// Total undo snapshots retained across all open diagrams
    pub history_ceiling: usize,
    pub layout: LayoutConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid_pitch: 0.0,
            handle_tolerance: 5.0,
            min_node_radius: 5.0,
            default_node_radius: [20.0, 20.0],
            grid_spacing: 100.0,
            max_auto_repair: 25,
            default_edge_mode: EditMode::Line,
            spline_threshold: 0.5,
            anchor_margin: 2.0,
            label_offset: 10.0,
            node_shape: NodeShapeKind::Ellipse,
            history_ceiling: 15,
            layout: LayoutConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        log::debug!("loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn default_radius(&self) -> egui::Vec2 {
        egui::vec2(
            self.default_node_radius[0].max(self.min_node_radius),
            self.default_node_radius[1].max(self.min_node_radius),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{ "grid_pitch": 10.0, "layout": { "timeout_ms": 5 } }"#)
            .expect("valid config");
        assert_eq!(config.grid_pitch, 10.0);
        assert_eq!(config.layout.timeout_ms, 5);
        assert_eq!(config.layout.program, "dot");
        assert_eq!(config.history_ceiling, 15);
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = EngineConfig::default();
        config.node_shape = NodeShapeKind::Box;
        config.default_edge_mode = EditMode::Spline;
        let text = config.to_json().expect("serializes");
        assert_eq!(EngineConfig::from_json(&text).expect("parses"), config);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(EngineConfig::from_json("{"), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_default_radius_respects_minimum() {
        let mut config = EngineConfig::default();
        config.default_node_radius = [1.0, 30.0];
        assert_eq!(config.default_radius(), egui::vec2(5.0, 30.0));
    }
}
