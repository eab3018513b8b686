//! Errors reported while validating a [`PolicyConfig`](crate::config::PolicyConfig).
//!
//! Everything past startup is infallible: collaborator contract violations are
//! programming errors and panic where they are detected.

/// Result of validating policy configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("pause time goal must be positive, got {0}ms")]
    PauseGoal(f64),

    #[error("pause interval ({interval_ms}ms) must be greater than the pause time goal ({goal_ms}ms)")]
    PauseInterval { goal_ms: f64, interval_ms: f64 },

    #[error("{name} must be within [0, 100], got {value}")]
    Percent { name: &'static str, value: f64 },

    #[error("invalid young generation sizing: {0}")]
    YoungSize(String),

    #[error("region size must be a non-zero power of two, got {0} bytes")]
    RegionSize(usize),

    #[error("mixed GC count target must be at least 1")]
    MixedGcCountTarget,

    #[error("{0} must be at least 1")]
    ZeroRatio(&'static str),

    #[error("max tenuring threshold {0} exceeds the age table size {1}")]
    TenuringThreshold(u32, usize),
}

impl ConfigError {
    pub fn young_size(msg: impl Into<String>) -> Self {
        Self::YoungSize(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::PauseInterval {
            goal_ms: 200.0,
            interval_ms: 100.0,
        };
        assert!(err.to_string().contains("100ms"));
        assert!(ConfigError::young_size("min > max")
            .to_string()
            .contains("min > max"));
    }
}
