//! Bootstrap configuration - seeds the session registry and the processing
//! pipeline at startup.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Idle time after which a session may be evicted.
    /// Default: "5h"
    #[serde(default = "SessionsConfig::default_idle_threshold")]
    pub idle_threshold: String,

    /// How often the eviction sweep runs.
    /// Default: "10m"
    #[serde(default = "SessionsConfig::default_sweep_interval")]
    pub sweep_interval: String,
}

impl SessionsConfig {
    fn default_idle_threshold() -> String {
        "5h".to_string()
    }

    fn default_sweep_interval() -> String {
        "10m".to_string()
    }

    pub fn idle_threshold(&self) -> Result<Duration, ConfigError> {
        parse_duration("sessions.idle_threshold", &self.idle_threshold)
    }

    /// Must be non-zero; the sweep runs on a timer with this period.
    pub fn sweep_interval(&self) -> Result<Duration, ConfigError> {
        let interval = parse_duration("sessions.sweep_interval", &self.sweep_interval)?;
        if interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sessions.sweep_interval".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(interval)
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Self::default_idle_threshold(),
            sweep_interval: Self::default_sweep_interval(),
        }
    }
}

/// Processing pipeline and data-index defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Standard montage applied after loading a recording.
    #[serde(default = "PipelineConfig::default_montage")]
    pub montage: String,

    /// File-name suffixes the data index treats as recordings.
    #[serde(default = "PipelineConfig::default_data_suffixes")]
    pub data_suffixes: Vec<String>,

    /// Known experiment folder names under the data root.
    #[serde(default = "PipelineConfig::default_experiments")]
    pub experiments: Vec<String>,
}

impl PipelineConfig {
    fn default_montage() -> String {
        "standard_1020".to_string()
    }

    fn default_data_suffixes() -> Vec<String> {
        vec!["data.bdf".to_string()]
    }

    fn default_experiments() -> Vec<String> {
        vec!["RSVP".to_string(), "MI".to_string(), "SSVEP".to_string()]
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            montage: Self::default_montage(),
            data_suffixes: Self::default_data_suffixes(),
            experiments: Self::default_experiments(),
        }
    }
}

/// All bootstrap sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub sessions: SessionsConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Parse `"90s"`, `"30m"`, `"5h"` or bare seconds.
pub fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let invalid = || ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("expected a duration like 90s, 30m or 5h, got {:?}", value),
    };

    let (digits, scale) = match value.char_indices().last() {
        Some((idx, 's')) => (&value[..idx], 1),
        Some((idx, 'm')) => (&value[..idx], 60),
        Some((idx, 'h')) => (&value[..idx], 3600),
        Some(_) => (value, 1),
        None => return Err(invalid()),
    };

    let n: u64 = digits.trim().parse().map_err(|_| invalid())?;
    let secs = n.checked_mul(scale).ok_or_else(invalid)?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("x", "45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("x", "30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("x", "5h").unwrap(), Duration::from_secs(18000));
        assert_eq!(parse_duration("x", "120").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("x", "").is_err());
        assert!(parse_duration("x", "soon").is_err());
        assert!(parse_duration("x", "5d").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        let huge = format!("{}h", u64::MAX / 2);
        assert!(matches!(
            parse_duration("x", &huge),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(parse_duration("x", &format!("{}s", u64::MAX)).is_ok());
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let sessions = SessionsConfig {
            sweep_interval: "0s".to_string(),
            ..SessionsConfig::default()
        };
        assert!(matches!(
            sessions.sweep_interval(),
            Err(ConfigError::InvalidValue { .. })
        ));
        let sessions = SessionsConfig {
            sweep_interval: "0".to_string(),
            ..SessionsConfig::default()
        };
        assert!(sessions.sweep_interval().is_err());
        // A zero idle threshold is allowed: every sweep evicts everything.
        let sessions = SessionsConfig {
            idle_threshold: "0".to_string(),
            ..SessionsConfig::default()
        };
        assert_eq!(sessions.idle_threshold().unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_default_idle_threshold_is_five_hours() {
        let sessions = SessionsConfig::default();
        assert_eq!(sessions.idle_threshold().unwrap(), Duration::from_secs(5 * 60 * 60));
    }
}
