//! Daemon configuration (JSON file, every key optional)

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use stepclock_core::{StepClockError, StepClockResult};
use stepclock_drive::PulseTiming;
use stepclock_time::{FixedOffset, TimeSourceConfig, TimeZoneRule, ZonePreset};

use crate::EngineConfig;

/// Sysfs GPIO lines of the H-bridge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeLines {
    pub gpio_in1: u32,
    pub gpio_in2: u32,
}

/// Daemon configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// `auto` (network time) or `manual`
    pub mode: String,
    pub ntp_server: String,
    /// `posix`, `eu`, `fixed` or `preset`
    pub tz_mode: String,
    pub posix_tz: String,
    pub tz_preset: String,
    pub time_zone_offset_hrs: i32,
    pub time_zone_offset_min: u32,
    pub fixed_dst: bool,
    pub impulse_delay_ms: u64,
    pub dead_time_ms: u64,
    pub min_gap_ms: u64,
    /// Defaults to drive + dead time + safety margin
    pub catchup_interval_ms: Option<u64>,
    pub resync_rtc_if_diff_seconds: u32,
    pub max_catchup_minutes: u16,
    /// 0 disables periodic resync
    pub ntp_resync_every_minutes: u64,
    pub web_edit_enabled: bool,
    pub poll_interval_ms: u64,
    pub state_path: PathBuf,
    pub rtc_path: PathBuf,
    pub http_listen: Option<SocketAddr>,
    pub bridge: Option<BridgeLines>,
    pub log_json: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            mode: "auto".into(),
            ntp_server: "pool.ntp.org".into(),
            tz_mode: "eu".into(),
            posix_tz: String::new(),
            tz_preset: String::new(),
            time_zone_offset_hrs: 0,
            time_zone_offset_min: 0,
            fixed_dst: false,
            impulse_delay_ms: 500,
            dead_time_ms: 150,
            min_gap_ms: 600,
            catchup_interval_ms: None,
            resync_rtc_if_diff_seconds: 60,
            max_catchup_minutes: 180,
            ntp_resync_every_minutes: 15,
            web_edit_enabled: false,
            poll_interval_ms: 50,
            state_path: PathBuf::from("state.txt"),
            rtc_path: PathBuf::from("rtc.txt"),
            http_listen: None,
            bridge: None,
            log_json: false,
        }
    }
}

impl ClockConfig {
    /// Parse a JSON document
    pub fn from_json(json: &str) -> StepClockResult<Self> {
        let mut config: ClockConfig =
            serde_json::from_str(json).map_err(|e| StepClockError::Config(e.to_string()))?;
        config.time_zone_offset_min = config.time_zone_offset_min.min(59);
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is missing
    /// or invalid
    pub fn load_or_default(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "config not readable, using defaults");
                return Self::default();
            }
        };
        match Self::from_json(&text) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "config invalid, using defaults");
                Self::default()
            }
        }
    }

    pub fn is_manual(&self) -> bool {
        self.mode.eq_ignore_ascii_case("manual")
    }

    fn fixed_offset(&self) -> FixedOffset {
        FixedOffset::new(
            self.time_zone_offset_hrs,
            self.time_zone_offset_min.min(59),
            self.fixed_dst,
        )
    }

    /// The fixed offset, or `None` with a warning when it is out of range
    fn checked_fixed_offset(&self) -> Option<FixedOffset> {
        let offset = self.fixed_offset();
        match offset.offset_secs() {
            Ok(_) => Some(offset),
            Err(e) => {
                tracing::warn!(error = %e, "fixed offset invalid, using EU rule");
                None
            }
        }
    }

    fn eu_rule() -> StepClockResult<TimeZoneRule> {
        ZonePreset::EuropeCentral.rule()
    }

    /// Rule for the `posix`, `eu` and `preset` modes; unusable input falls
    /// back to the EU rule
    fn named_rule(&self) -> StepClockResult<TimeZoneRule> {
        match self.tz_mode.to_ascii_lowercase().as_str() {
            "posix" => {
                let rule = self.posix_tz.trim();
                if rule.is_empty() {
                    tracing::warn!("posix_tz empty, using EU rule");
                    return Self::eu_rule();
                }
                TimeZoneRule::parse(rule).or_else(|e| {
                    tracing::warn!(error = %e, "posix_tz invalid, using EU rule");
                    Self::eu_rule()
                })
            }
            "preset" => match ZonePreset::from_name(&self.tz_preset) {
                Some(preset) => preset.rule(),
                None => {
                    tracing::warn!(preset = %self.tz_preset, "unknown tz_preset, using EU rule");
                    Self::eu_rule()
                }
            },
            "eu" | "fixed" => Self::eu_rule(),
            other => {
                tracing::warn!(tz_mode = other, "unknown tz_mode, using EU rule");
                Self::eu_rule()
            }
        }
    }

    /// Time source configuration for this file
    pub fn time_source_config(&self) -> StepClockResult<TimeSourceConfig> {
        let offset = if self.tz_mode.eq_ignore_ascii_case("fixed") {
            self.checked_fixed_offset()
        } else {
            None
        };
        let config = match (self.is_manual(), offset) {
            (false, Some(offset)) => TimeSourceConfig::NetworkWithOffset {
                server: self.ntp_server.clone(),
                offset,
            },
            (false, None) => TimeSourceConfig::NetworkWithRule {
                server: self.ntp_server.clone(),
                rule: self.named_rule()?,
            },
            (true, Some(offset)) => TimeSourceConfig::ManualWithOffset { offset },
            (true, None) => TimeSourceConfig::ManualWithRule {
                rule: self.named_rule()?,
            },
        };
        Ok(config)
    }

    pub fn pulse_timing(&self) -> PulseTiming {
        PulseTiming {
            pulse: Duration::from_millis(self.impulse_delay_ms),
            dead_time: Duration::from_millis(self.dead_time_ms),
            min_gap: Duration::from_millis(self.min_gap_ms),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_catchup_minutes: self.max_catchup_minutes,
            catchup_interval: self
                .catchup_interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| self.pulse_timing().cycle()),
            resync_every: (self.ntp_resync_every_minutes > 0)
                .then(|| Duration::from_secs(self.ntp_resync_every_minutes * 60)),
            drift_threshold_secs: self.resync_rtc_if_diff_seconds,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stepclock_time::SyncMode;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = ClockConfig::from_json("{}").unwrap();
        assert_eq!(config, ClockConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_millis(50));

        let engine = config.engine_config();
        assert_eq!(engine.catchup_interval, Duration::from_millis(700));
        assert_eq!(engine.resync_every, Some(Duration::from_secs(900)));
        assert_eq!(engine.drift_threshold_secs, 60);
    }

    #[test]
    fn test_default_time_source_is_network_eu() {
        let source = ClockConfig::default().time_source_config().unwrap();
        assert_eq!(source.mode(), SyncMode::Network);
        assert_eq!(source.server(), Some("pool.ntp.org"));
        assert_eq!(source.rule().unwrap().as_str(), ZonePreset::EuropeCentral.posix());
    }

    #[test]
    fn test_fixed_manual_mapping_clamps_minutes() {
        let config = ClockConfig::from_json(
            r#"{"mode":"manual","tz_mode":"fixed","time_zone_offset_hrs":5,"time_zone_offset_min":75}"#,
        )
        .unwrap();
        assert_eq!(config.time_zone_offset_min, 59);
        assert_eq!(
            config.time_source_config().unwrap(),
            TimeSourceConfig::ManualWithOffset {
                offset: FixedOffset::new(5, 59, false)
            }
        );
    }

    #[test]
    fn test_bad_posix_rule_falls_back_to_eu() {
        for posix in ["", "not a rule"] {
            let config = ClockConfig {
                tz_mode: "posix".into(),
                posix_tz: posix.into(),
                ..ClockConfig::default()
            };
            let rule = config.time_source_config().unwrap().rule().unwrap();
            assert_eq!(rule.as_str(), ZonePreset::EuropeCentral.posix());
        }
    }

    #[test]
    fn test_out_of_range_fixed_offset_falls_back_to_eu() {
        for (hours, manual) in [(20, false), (-13, true)] {
            let config = ClockConfig {
                mode: if manual { "manual" } else { "auto" }.into(),
                tz_mode: "fixed".into(),
                time_zone_offset_hrs: hours,
                ..ClockConfig::default()
            };
            let source = config.time_source_config().unwrap();
            assert_eq!(source.mode() == SyncMode::Manual, manual);
            assert_eq!(source.rule().unwrap().as_str(), ZonePreset::EuropeCentral.posix());
        }
    }

    #[test]
    fn test_preset_and_posix_modes() {
        let preset = ClockConfig {
            tz_mode: "preset".into(),
            tz_preset: "us-pacific".into(),
            ..ClockConfig::default()
        };
        assert_eq!(
            preset.time_source_config().unwrap().rule().unwrap().as_str(),
            "PST8PDT,M3.2.0,M11.1.0"
        );

        let posix = ClockConfig {
            tz_mode: "posix".into(),
            posix_tz: "EET-2EEST,M3.5.0/3,M10.5.0/4".into(),
            ..ClockConfig::default()
        };
        assert_eq!(
            posix.time_source_config().unwrap().rule().unwrap().as_str(),
            "EET-2EEST,M3.5.0/3,M10.5.0/4"
        );
    }

    #[test]
    fn test_explicit_interval_and_disabled_resync() {
        let config = ClockConfig::from_json(
            r#"{"catchup_interval_ms":1200,"ntp_resync_every_minutes":0,"min_gap_ms":2000}"#,
        )
        .unwrap();
        let engine = config.engine_config();
        assert_eq!(engine.catchup_interval, Duration::from_millis(1200));
        assert_eq!(engine.resync_every, None);
        assert_eq!(config.pulse_timing().required_gap(), Duration::from_secs(2));
    }

    #[test]
    fn test_load_or_default_tolerates_missing_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("config.json");
        assert_eq!(ClockConfig::load_or_default(&missing), ClockConfig::default());

        fs::write(&missing, "{ not json").unwrap();
        assert_eq!(ClockConfig::load_or_default(&missing), ClockConfig::default());

        fs::write(
            &missing,
            r#"{"http_listen":"127.0.0.1:8080","bridge":{"gpio_in1":17,"gpio_in2":27}}"#,
        )
        .unwrap();
        let config = ClockConfig::load_or_default(&missing);
        assert_eq!(config.http_listen, Some("127.0.0.1:8080".parse().unwrap()));
        assert_eq!(
            config.bridge,
            Some(BridgeLines {
                gpio_in1: 17,
                gpio_in2: 27
            })
        );
    }

    proptest! {
        #[test]
        fn prop_offset_minutes_always_clamped(hours in -12i32..=14, minutes in 0u32..10_000) {
            let json = format!(
                r#"{{"tz_mode":"fixed","time_zone_offset_hrs":{},"time_zone_offset_min":{}}}"#,
                hours, minutes
            );
            let config = ClockConfig::from_json(&json).unwrap();
            prop_assert!(config.time_zone_offset_min <= 59);
            prop_assert!(config.time_source_config().unwrap().rule().is_ok());
        }
    }
}
