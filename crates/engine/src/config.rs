use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::time::{Beats, DEFAULT_TIME_EPSILON};

/// Tunables of the editing engine.
///
/// # Example
/// ```
/// use clip_engine::EngineConfig;
///
/// let config: EngineConfig =
///     serde_json::from_str(r#"{"holding_region_start": 4096.0}"#).expect("valid json");
/// assert_eq!(config.holding_region_start, 4096.0);
/// assert_eq!(config.probe_loop_end, 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// First beat of the scratch region, far beyond real content.
    pub holding_region_start: Beats,
    /// Width reserved for one operation inside the holding region.
    pub holding_lease_span: Beats,
    /// Number of distinct lease offsets before they are reused.
    pub holding_lease_count: usize,
    /// First session slot used for probe and transient clips.
    pub scratch_slot_base: usize,
    /// Loop end forced on content probes.
    pub probe_loop_end: Beats,
    pub time_epsilon: Beats,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            holding_region_start: 16_384.0,
            holding_lease_span: 2_048.0,
            holding_lease_count: 16,
            scratch_slot_base: 32,
            probe_loop_end: 1.0,
            time_epsilon: DEFAULT_TIME_EPSILON,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.holding_region_start <= 0.0 {
            return Err(config_error("holding_region_start must be positive"));
        }
        if self.holding_lease_span <= 0.0 {
            return Err(config_error("holding_lease_span must be positive"));
        }
        if self.holding_lease_count == 0 {
            return Err(config_error("holding_lease_count must be at least 1"));
        }
        if self.probe_loop_end <= 0.0 {
            return Err(config_error("probe_loop_end must be positive"));
        }
        if !(self.time_epsilon > 0.0 && self.time_epsilon < 1.0) {
            return Err(config_error("time_epsilon must lie in (0, 1)"));
        }
        Ok(())
    }

    /// Longest clip a holding lane can take without touching the next one.
    pub fn holding_lane_capacity(&self) -> Beats {
        self.holding_lease_span / 2.0
    }
}

fn config_error(reason: &str) -> EngineError {
    EngineError::Config {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default()
            .validate()
            .expect("defaults should validate");
    }

    #[test]
    fn zero_lease_count_is_rejected() {
        let config = EngineConfig {
            holding_lease_count: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
