use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::algorithms::SolverConfig;
use crate::core::{Position, WAREHOUSE_CENTER};
use crate::navigation::{BlockedRegion, Connectivity, GridNode, PlannerConfig};
use crate::processing::parser::{ANCHOR_DATA_TOPIC, RACK_SCAN_TOPIC};
use crate::processing::FilterParameters;

/// System-wide configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Floor footprint and obstacles
    pub warehouse: WarehouseConfig,
    /// Motion filter tuning
    pub filter: FilterParameters,
    /// Trilateration solver tuning
    pub solver: SolverConfig,
    /// Path planner bounds
    pub planner: PlannerConfig,
    /// Message bus topic patterns
    pub topics: TopicConfig,
}

/// Navigable floor layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Grid nodes along x (coordinates 0..width)
    pub width: i32,
    /// Grid nodes along y (coordinates 0..height)
    pub height: i32,
    pub connectivity: Connectivity,
    /// Racks and other obstacles, bounds inclusive
    pub blocked_regions: Vec<BlockedRegion>,
    /// Position of tags with no fix yet
    pub default_position: Position,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            width: 51,
            height: 51,
            connectivity: Connectivity::Four,
            blocked_regions: vec![BlockedRegion::new(GridNode::new(10, 10), GridNode::new(20, 20))],
            default_position: WAREHOUSE_CENTER,
        }
    }
}

/// Topic patterns subscribed on the bus; `+` matches one level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub anchor_data: String,
    pub rack_scan: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            anchor_data: ANCHOR_DATA_TOPIC.to_string(),
            rack_scan: RACK_SCAN_TOPIC.to_string(),
        }
    }
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid parameter {parameter}: {reason}")]
    InvalidParameter { parameter: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConfigError {
    fn invalid(parameter: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }
}

impl SystemConfig {
    /// Load and validate configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON document; missing fields take defaults
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: SystemConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges. Obstacle bounds are checked when the graph is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let warehouse = &self.warehouse;
        if warehouse.width <= 0 || warehouse.height <= 0 {
            return Err(ConfigError::invalid(
                "warehouse.width/height",
                format!("must be positive, got {}x{}", warehouse.width, warehouse.height),
            ));
        }
        if let Some(region) = warehouse
            .blocked_regions
            .iter()
            .find(|r| r.min.x > r.max.x || r.min.y > r.max.y)
        {
            return Err(ConfigError::invalid(
                "warehouse.blocked_regions",
                format!("min {:?} exceeds max {:?}", region.min, region.max),
            ));
        }
        if !warehouse.default_position.is_finite() {
            return Err(ConfigError::invalid("warehouse.default_position", "must be finite"));
        }

        let filter = &self.filter;
        if !(filter.dt > 0.0) {
            return Err(ConfigError::invalid("filter.dt", "must be positive"));
        }
        if !(filter.process_variance >= 0.0) {
            return Err(ConfigError::invalid("filter.process_variance", "must be non-negative"));
        }
        if !(filter.measurement_variance > 0.0) {
            return Err(ConfigError::invalid("filter.measurement_variance", "must be positive"));
        }
        if !(filter.initial_covariance > 0.0) {
            return Err(ConfigError::invalid("filter.initial_covariance", "must be positive"));
        }

        if self.solver.max_iterations == 0 {
            return Err(ConfigError::invalid("solver.max_iterations", "must be at least 1"));
        }
        if !(self.solver.initial_damping > 0.0) {
            return Err(ConfigError::invalid("solver.initial_damping", "must be positive"));
        }

        if self.planner.max_expansions == 0 {
            return Err(ConfigError::invalid("planner.max_expansions", "must be at least 1"));
        }

        if self.topics.anchor_data.is_empty() || self.topics.rack_scan.is_empty() {
            return Err(ConfigError::invalid("topics", "patterns must not be empty"));
        }

        Ok(())
    }
}
