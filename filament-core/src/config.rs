//! Application configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level configuration for an [`App`](crate::App).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    /// Frame period used by the async driver.
    pub frame_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            frame_interval_ms: 16,
        }
    }
}

impl AppConfig {
    /// Parse a config, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How many echoed requests a node may receive in the frame it was last
    /// updated before further requests are dropped.
    pub cascade_limit: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { cascade_limit: 8 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.frame_interval(), Duration::from_millis(16));
    }

    #[test]
    fn partial_override() {
        let config = AppConfig::from_json(r#"{"scheduler": {"cascade_limit": 2}}"#).unwrap();
        assert_eq!(config.scheduler.cascade_limit, 2);
        assert_eq!(config.frame_interval_ms, 16);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = AppConfig::from_json("{").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
