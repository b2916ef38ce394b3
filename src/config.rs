use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub min_games_basic: u64,
    pub min_games_advanced: u64,
    /// Seconds of goal history that feed momentum.
    pub momentum_window: f64,
    pub quick_response_window: f64,
    pub scoring_run_threshold: usize,
    pub cache_size: usize,
    /// Clock seconds at or below which a moment counts as late.
    pub critical_moment_threshold: f64,
    pub close_game_threshold: u32,
    pub recent_goal_capacity: usize,
    // Only used by the early/late goal heuristics.
    pub nominal_period_length: f64,
    pub edge_goal_window: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            min_games_basic: 30,
            min_games_advanced: 300,
            momentum_window: 60.0,
            quick_response_window: 30.0,
            scoring_run_threshold: 3,
            cache_size: 128,
            critical_moment_threshold: 60.0,
            close_game_threshold: 2,
            recent_goal_capacity: 10,
            nominal_period_length: 180.0,
            edge_goal_window: 30.0,
        }
    }
}

impl AnalyticsConfig {
    /// Defaults overridden by `ANALYTICS_*` environment variables.
    ///
    /// A variable that is set but does not parse is a configuration error,
    /// as is any combination that fails [`AnalyticsConfig::validate`].
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        override_env(&mut cfg.min_games_basic, "ANALYTICS_MIN_GAMES_BASIC")?;
        override_env(&mut cfg.min_games_advanced, "ANALYTICS_MIN_GAMES_ADVANCED")?;
        override_env(&mut cfg.momentum_window, "ANALYTICS_MOMENTUM_WINDOW")?;
        override_env(
            &mut cfg.quick_response_window,
            "ANALYTICS_QUICK_RESPONSE_WINDOW",
        )?;
        override_env(
            &mut cfg.scoring_run_threshold,
            "ANALYTICS_SCORING_RUN_THRESHOLD",
        )?;
        override_env(&mut cfg.cache_size, "ANALYTICS_CACHE_SIZE")?;
        override_env(
            &mut cfg.critical_moment_threshold,
            "ANALYTICS_CRITICAL_MOMENT_THRESHOLD",
        )?;
        override_env(&mut cfg.close_game_threshold, "ANALYTICS_CLOSE_GAME_THRESHOLD")?;
        override_env(&mut cfg.recent_goal_capacity, "ANALYTICS_RECENT_GOAL_CAPACITY")?;
        override_env(&mut cfg.nominal_period_length, "ANALYTICS_PERIOD_LENGTH")?;
        override_env(&mut cfg.edge_goal_window, "ANALYTICS_EDGE_GOAL_WINDOW")?;
        cfg.validated()
    }

    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_games_basic == 0 {
            return Err(config_err("min_games_basic must be positive"));
        }
        if self.min_games_advanced <= self.min_games_basic {
            return Err(config_err(format!(
                "min_games_advanced ({}) must exceed min_games_basic ({})",
                self.min_games_advanced, self.min_games_basic
            )));
        }
        positive("momentum_window", self.momentum_window)?;
        positive("quick_response_window", self.quick_response_window)?;
        if self.scoring_run_threshold < 2 {
            return Err(config_err("scoring_run_threshold must be at least 2"));
        }
        if self.cache_size == 0 {
            return Err(config_err("cache_size must be positive"));
        }
        positive("critical_moment_threshold", self.critical_moment_threshold)?;
        if self.close_game_threshold == 0 {
            return Err(config_err("close_game_threshold must be positive"));
        }
        if self.recent_goal_capacity == 0 {
            return Err(config_err("recent_goal_capacity must be positive"));
        }
        positive("nominal_period_length", self.nominal_period_length)?;
        positive("edge_goal_window", self.edge_goal_window)?;
        Ok(())
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(config_err(format!("{name} must be a positive number, got {value}")))
    }
}

fn config_err(msg: impl Into<String>) -> AnalyticsError {
    AnalyticsError::Configuration(msg.into())
}

fn override_env<T: FromStr>(slot: &mut T, key: &str) -> Result<()> {
    let Some(raw) = env::var(key).ok().filter(|v| !v.trim().is_empty()) else {
        return Ok(());
    };
    *slot = raw
        .trim()
        .parse::<T>()
        .map_err(|_| config_err(format!("{key}={raw} does not parse")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AnalyticsConfig::default().validate().is_ok());
    }

    #[test]
    fn basic_must_be_below_advanced() {
        let cfg = AnalyticsConfig {
            min_games_basic: 300,
            min_games_advanced: 300,
            ..AnalyticsConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(AnalyticsError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_non_positive_fields() {
        let bad = [
            AnalyticsConfig {
                min_games_basic: 0,
                ..AnalyticsConfig::default()
            },
            AnalyticsConfig {
                momentum_window: 0.0,
                ..AnalyticsConfig::default()
            },
            AnalyticsConfig {
                quick_response_window: -1.0,
                ..AnalyticsConfig::default()
            },
            AnalyticsConfig {
                scoring_run_threshold: 1,
                ..AnalyticsConfig::default()
            },
            AnalyticsConfig {
                cache_size: 0,
                ..AnalyticsConfig::default()
            },
            AnalyticsConfig {
                critical_moment_threshold: f64::NAN,
                ..AnalyticsConfig::default()
            },
            AnalyticsConfig {
                close_game_threshold: 0,
                ..AnalyticsConfig::default()
            },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "{cfg:?} should be rejected");
        }
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let cfg: AnalyticsConfig =
            serde_json::from_str(r#"{"momentum_window": 90.0, "cache_size": 16}"#).unwrap();
        assert_eq!(cfg.momentum_window, 90.0);
        assert_eq!(cfg.cache_size, 16);
        assert_eq!(cfg.min_games_basic, 30);
    }
}
