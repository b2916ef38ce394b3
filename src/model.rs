use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};

pub const DEFAULT_MAX_PERIODS: u32 = 3;
pub const DEFAULT_PERIOD_LENGTH: f64 = 180.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Red,
    Blue,
}

impl Team {
    pub fn opponent(self) -> Team {
        match self {
            Team::Red => Team::Blue,
            Team::Blue => Team::Red,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Team::Red => "red",
            Team::Blue => "blue",
        }
    }

    // +1 for red, -1 for blue; momentum and differentials are red-positive.
    pub fn sign(self) -> f64 {
        match self {
            Team::Red => 1.0,
            Team::Blue => -1.0,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Score {
    pub red: u32,
    pub blue: u32,
}

impl Score {
    pub fn new(red: u32, blue: u32) -> Self {
        Self { red, blue }
    }

    pub fn get(&self, team: Team) -> u32 {
        match team {
            Team::Red => self.red,
            Team::Blue => self.blue,
        }
    }

    /// Red minus blue.
    pub fn differential(&self) -> i32 {
        self.red as i32 - self.blue as i32
    }

    pub fn leader(&self) -> Option<Team> {
        match self.red.cmp(&self.blue) {
            std::cmp::Ordering::Greater => Some(Team::Red),
            std::cmp::Ordering::Less => Some(Team::Blue),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn with_goal(&self, team: Team) -> Score {
        match team {
            Team::Red => Score::new(self.red + 1, self.blue),
            Team::Blue => Score::new(self.red, self.blue + 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Classic,
    Evolved,
    CrazyPlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Possession {
    Red,
    Blue,
    InPlay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub score: Score,
    pub period: u32,
    /// Seconds remaining in the current period.
    pub clock: f64,
    pub game_id: u64,
    pub mode: GameMode,
    pub is_running_clock: bool,
    #[serde(default = "default_max_periods")]
    pub max_periods: u32,
    #[serde(default = "default_period_length")]
    pub period_length: f64,
}

fn default_max_periods() -> u32 {
    DEFAULT_MAX_PERIODS
}

fn default_period_length() -> f64 {
    DEFAULT_PERIOD_LENGTH
}

impl GameState {
    /// Fresh state at puck drop: period 1, full clock, 0-0.
    pub fn kickoff(game_id: u64, mode: GameMode) -> Self {
        Self {
            score: Score::default(),
            period: 1,
            clock: DEFAULT_PERIOD_LENGTH,
            game_id,
            mode,
            is_running_clock: true,
            max_periods: DEFAULT_MAX_PERIODS,
            period_length: DEFAULT_PERIOD_LENGTH,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.game_id == 0 {
            return Err(invalid_state("game_id must be positive"));
        }
        if self.max_periods == 0 {
            return Err(invalid_state("max_periods must be at least 1"));
        }
        if !self.period_length.is_finite() || self.period_length <= 0.0 {
            return Err(invalid_state(format!(
                "period_length must be positive, got {}",
                self.period_length
            )));
        }
        if self.period < 1 || self.period > self.max_periods {
            return Err(invalid_state(format!(
                "period {} outside 1..={}",
                self.period, self.max_periods
            )));
        }
        if !self.clock.is_finite() || self.clock < 0.0 || self.clock > self.period_length {
            return Err(invalid_state(format!(
                "clock {} outside 0..={}",
                self.clock, self.period_length
            )));
        }
        Ok(())
    }

    /// Share of total regulation time still to be played, in [0, 1].
    pub fn time_remaining_ratio(&self) -> f64 {
        let total = self.max_periods as f64 * self.period_length;
        if total <= 0.0 {
            return 0.0;
        }
        let untouched = self.max_periods.saturating_sub(self.period) as f64 * self.period_length;
        ((untouched + self.clock) / total).clamp(0.0, 1.0)
    }

    pub fn period_progress(&self) -> f64 {
        if self.max_periods == 0 {
            return 0.0;
        }
        self.period as f64 / self.max_periods as f64
    }
}

fn invalid_state(msg: impl Into<String>) -> AnalyticsError {
    AnalyticsError::InvalidGameState(msg.into())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalEvent {
    /// Clock seconds remaining in the period when the goal went in.
    pub time: f64,
    pub period: u32,
    pub team: Team,
    pub score_after: Score,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub time_since_last: Option<f64>,
}

impl GoalEvent {
    pub fn new(
        time: f64,
        period: u32,
        team: Team,
        score_after: Score,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            time,
            period,
            team,
            score_after,
            timestamp,
            time_since_last: None,
        }
    }

    pub fn with_time_since_last(mut self, secs: Option<f64>) -> Self {
        self.time_since_last = secs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.time.is_finite() || self.time < 0.0 {
            return Err(AnalyticsError::InvalidGoal(format!(
                "time {} must be a non-negative number",
                self.time
            )));
        }
        if self.period < 1 {
            return Err(AnalyticsError::InvalidGoal(
                "period must be at least 1".to_string(),
            ));
        }
        if let Some(secs) = self.time_since_last {
            if !secs.is_finite() || secs < 0.0 {
                return Err(AnalyticsError::InvalidGoal(format!(
                    "time_since_last {secs} must be a non-negative number"
                )));
            }
        }
        Ok(())
    }
}
