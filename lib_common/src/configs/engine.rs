//! Engine options, defaults and validation.

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

use crate::core::dispatcher::DispatcherSettings;
use crate::core::rotation::RotationSettings;

/// Settings the engine refuses to start with.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Fewer than one monitor configured.
    #[error("monitor_count must be at least 1, got {0}")]
    MonitorCount(i64),

    /// A duration, interval or size that must be positive is zero.
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    /// The test insert text limit is zero.
    #[error("max_text_len must be at least 1")]
    TextLimit,

    /// A config file exists but cannot be read or parsed.
    #[error("Failed to read config file {path}: {reason}")]
    File {
        /// Path as given.
        path: String,
        /// Underlying I/O or parse error.
        reason: String,
    },
}

/// # Engine Options
///
/// Plain numbers as they come from a config file or the command line.
/// Durations are whole seconds except `tick_interval_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Number of monitors; must be at least 1.
    pub monitor_count: i64,
    /// Sleep between dispatcher cycles.
    pub claim_interval_secs: u64,
    /// Minimum age before a pending item is dispatched.
    pub old_data_threshold_secs: u64,
    /// Display window for an item while more are queued.
    pub normal_display_secs: u64,
    /// Display window once nothing else is queued.
    pub idle_display_secs: u64,
    /// Snapshot cadence of streaming sessions, in milliseconds.
    pub tick_interval_ms: u64,
    /// Items fetched per queue refill.
    pub refill_page_size: usize,
    /// Bound of the dispatcher's recently-assigned id set.
    pub recent_capacity: usize,
    /// Age after which a stuck claim returns to pending; `None` disables the sweep.
    pub reclaim_after_secs: Option<u64>,
    /// Longest text accepted by the test insert endpoint, in characters.
    pub max_text_len: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            monitor_count: 3,
            claim_interval_secs: 10,
            old_data_threshold_secs: 300,
            normal_display_secs: 10,
            idle_display_secs: 3,
            tick_interval_ms: 1000,
            refill_page_size: 20,
            recent_capacity: 1024,
            reclaim_after_secs: None,
            max_text_len: 500,
        }
    }
}

/// # Engine Settings
///
/// Validated form of `EngineOptions`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Number of monitors.
    pub monitor_count: NonZeroU32,
    /// Dispatcher loop settings.
    pub dispatcher: DispatcherSettings,
    /// Rotation timing and refill settings.
    pub rotation: RotationSettings,
    /// Longest accepted test insert text.
    pub max_text_len: usize,
}

fn positive_secs(value: u64, name: &'static str) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::ZeroValue(name));
    }
    Ok(Duration::from_secs(value))
}

impl TryFrom<&EngineOptions> for EngineSettings {
    type Error = ConfigError;

    fn try_from(options: &EngineOptions) -> Result<Self, Self::Error> {
        let monitor_count = u32::try_from(options.monitor_count)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or(ConfigError::MonitorCount(options.monitor_count))?;

        if options.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroValue("tick_interval_ms"));
        }
        if options.refill_page_size == 0 {
            return Err(ConfigError::ZeroValue("refill_page_size"));
        }
        if options.recent_capacity == 0 {
            return Err(ConfigError::ZeroValue("recent_capacity"));
        }
        if options.max_text_len == 0 {
            return Err(ConfigError::TextLimit);
        }

        let reclaim_after = options
            .reclaim_after_secs
            .map(|secs| positive_secs(secs, "reclaim_after_secs"))
            .transpose()?;

        Ok(Self {
            monitor_count,
            dispatcher: DispatcherSettings {
                claim_interval: positive_secs(options.claim_interval_secs, "claim_interval_secs")?,
                // Zero is allowed here: every pending item is immediately eligible.
                old_data_threshold: Duration::from_secs(options.old_data_threshold_secs),
                recent_capacity: options.recent_capacity,
                reclaim_after,
            },
            rotation: RotationSettings {
                normal_display: positive_secs(options.normal_display_secs, "normal_display_secs")?,
                idle_display: positive_secs(options.idle_display_secs, "idle_display_secs")?,
                tick_interval: Duration::from_millis(options.tick_interval_ms),
                page_size: options.refill_page_size,
            },
            max_text_len: options.max_text_len,
        })
    }
}

impl TryFrom<EngineOptions> for EngineSettings {
    type Error = ConfigError;

    fn try_from(options: EngineOptions) -> Result<Self, Self::Error> {
        Self::try_from(&options)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            monitor_count: NonZeroU32::MIN.saturating_add(2),
            dispatcher: DispatcherSettings::default(),
            rotation: RotationSettings::default(),
            max_text_len: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_to_default_settings() {
        let settings = EngineSettings::try_from(&EngineOptions::default()).unwrap();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.monitor_count.get(), 3);
        assert_eq!(settings.rotation.idle_display, Duration::from_secs(3));
    }

    #[test]
    fn monitor_count_below_one_is_rejected() {
        for count in [0, -2] {
            let options = EngineOptions { monitor_count: count, ..EngineOptions::default() };
            assert_eq!(EngineSettings::try_from(&options), Err(ConfigError::MonitorCount(count)));
        }
    }

    #[test]
    fn zero_durations_are_rejected() {
        let options = EngineOptions { normal_display_secs: 0, ..EngineOptions::default() };
        assert_eq!(
            EngineSettings::try_from(&options),
            Err(ConfigError::ZeroValue("normal_display_secs"))
        );

        let options = EngineOptions { reclaim_after_secs: Some(0), ..EngineOptions::default() };
        assert_eq!(
            EngineSettings::try_from(options),
            Err(ConfigError::ZeroValue("reclaim_after_secs"))
        );
    }

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let options: EngineOptions =
            serde_json::from_str(r#"{"monitor_count": 5, "reclaim_after_secs": 600}"#).unwrap();
        let settings = EngineSettings::try_from(&options).unwrap();
        assert_eq!(settings.monitor_count.get(), 5);
        assert_eq!(settings.dispatcher.reclaim_after, Some(Duration::from_secs(600)));
        assert_eq!(settings.dispatcher.claim_interval, Duration::from_secs(10));
    }
}
