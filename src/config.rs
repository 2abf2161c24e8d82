//! Engine configuration.
//!
//! Every section is optional in the YAML file; missing keys take the
//! defaults below. Durations use humantime notation (`2s`, `15m`, `3h`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the primary reception of a canonical packet is chosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimarySelection {
    /// The first capture recorded for the packet
    #[default]
    FirstRecorded,
    /// The capture with the earliest timestamp, ties broken by recording order
    Earliest,
}

/// Reception correlation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationSettings {
    /// Half-width of the time-fallback grouping window
    #[serde(with = "humantime_serde")]
    pub time_window: Duration,
    /// How long an id-keyed group accepts late receptions
    #[serde(with = "humantime_serde")]
    pub id_retention: Duration,
    pub primary: PrimarySelection,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            time_window: Duration::from_secs(2),
            id_retention: Duration::from_secs(24 * 3600),
            primary: PrimarySelection::FirstRecorded,
        }
    }
}

/// Relay hint resolution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// How far back a zero-hop reception still counts as "heard directly"
    #[serde(with = "humantime_serde")]
    pub recency_window: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            recency_window: Duration::from_secs(3 * 3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    #[serde(with = "humantime_serde")]
    pub location_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub link_stats_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            location_ttl: Duration::from_secs(300),
            link_stats_ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Result cap applied when a query does not set one
    pub max_results: usize,
    /// Time box for distance ranking and gateway comparison scans
    #[serde(with = "humantime_serde")]
    pub time_budget: Duration,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            max_results: 100,
            time_budget: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonSettings {
    /// Width of the binned chart series
    #[serde(with = "humantime_serde")]
    pub bin_width: Duration,
}

impl Default for ComparisonSettings {
    fn default() -> Self {
        Self {
            bin_width: Duration::from_secs(3600),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub correlation: CorrelationSettings,
    pub relay: RelaySettings,
    pub cache: CacheSettings,
    pub query: QuerySettings,
    pub comparison: ComparisonSettings,
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.correlation.time_window.is_zero() {
            return Err(ValidationError::InvalidCorrelation(
                "time_window must be greater than zero".to_string(),
            ));
        }
        if self.correlation.id_retention < self.correlation.time_window {
            return Err(ValidationError::InvalidCorrelation(
                "id_retention cannot be shorter than time_window".to_string(),
            ));
        }
        if self.relay.recency_window.is_zero() {
            return Err(ValidationError::InvalidRelay(
                "recency_window must be greater than zero".to_string(),
            ));
        }
        if self.query.max_results == 0 {
            return Err(ValidationError::InvalidQuery(
                "max_results must be at least 1".to_string(),
            ));
        }
        if self.comparison.bin_width.is_zero() {
            return Err(ValidationError::InvalidComparison(
                "bin_width must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid correlation configuration: {0}")]
    InvalidCorrelation(String),
    #[error("Invalid relay configuration: {0}")]
    InvalidRelay(String),
    #[error("Invalid query configuration: {0}")]
    InvalidQuery(String),
    #[error("Invalid comparison configuration: {0}")]
    InvalidComparison(String),
}
