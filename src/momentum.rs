use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalyticsConfig;
use crate::model::{GoalEvent, Team};
use crate::store::seconds_between;

const GOAL_DIFF_SCALE: f64 = 33.3;
const HOLD_THRESHOLD: f64 = 33.0;
const STRONG_THRESHOLD: f64 = 60.0;
const OVERWHELMING_THRESHOLD: f64 = 80.0;
const MAX_STREAK_MULTIPLIER: f64 = 1.5;
const STABLE_TREND_BAND: f64 = 10.0;
const DOMINANCE_MARGIN: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Neutral,
    Moderate,
    Strong,
    Overwhelming,
}

impl Intensity {
    pub fn from_score(score: f64) -> Self {
        let magnitude = score.abs();
        if magnitude >= OVERWHELMING_THRESHOLD {
            Intensity::Overwhelming
        } else if magnitude >= STRONG_THRESHOLD {
            Intensity::Strong
        } else if magnitude >= HOLD_THRESHOLD {
            Intensity::Moderate
        } else {
            Intensity::Neutral
        }
    }

    pub fn is_heightened(self) -> bool {
        matches!(self, Intensity::Strong | Intensity::Overwhelming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentumTrigger {
    Goal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumSample {
    pub timestamp: DateTime<Utc>,
    pub momentum_score: f64,
    pub team: Option<Team>,
    pub trigger: MomentumTrigger,
    pub team_scored: Team,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumState {
    pub team: Option<Team>,
    /// Signed, red-positive, in [-100, 100].
    pub score: f64,
    /// Undecayed goal differential in the window, times 33.3.
    pub base_score: f64,
    pub recent_goals: usize,
    pub intensity: Intensity,
    pub duration: Option<f64>,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumShift {
    pub timestamp: DateTime<Utc>,
    pub from_team: Option<Team>,
    pub to_team: Team,
    pub trigger: MomentumTrigger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftSummary {
    pub total_shifts: usize,
    pub shifts: Vec<MomentumShift>,
    /// Mean seconds between consecutive shifts.
    pub avg_duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumDistribution {
    pub red: f64,
    pub blue: f64,
    pub neutral: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumStats {
    pub avg_momentum_score: f64,
    pub max_momentum_score: f64,
    pub momentum_distribution: MomentumDistribution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumAnalysis {
    pub current_state: MomentumState,
    pub momentum_shifts: ShiftSummary,
    pub dominant_team: Option<Team>,
    pub momentum_stats: MomentumStats,
}

pub struct MomentumTracker {
    config: AnalyticsConfig,
    window: VecDeque<GoalEvent>,
    score: f64,
    base_score: f64,
    team: Option<Team>,
    history: Vec<MomentumSample>,
}

impl MomentumTracker {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            window: VecDeque::new(),
            score: 0.0,
            base_score: 0.0,
            team: None,
            history: Vec::new(),
        }
    }

    pub fn add_goal(&mut self, goal: &GoalEvent) -> MomentumState {
        let now = goal.timestamp;
        // Eviction is relative to the newest goal, never to the wall clock.
        while let Some(front) = self.window.front() {
            if seconds_between(front.timestamp, now) > self.config.momentum_window {
                self.window.pop_front();
            } else {
                break;
            }
        }
        self.window.push_back(goal.clone());

        self.recalculate();

        self.history.push(MomentumSample {
            timestamp: now,
            momentum_score: self.score,
            team: self.team,
            trigger: MomentumTrigger::Goal,
            team_scored: goal.team,
        });
        debug!(
            score = self.score,
            team = ?self.team,
            window = self.window.len(),
            "momentum updated"
        );

        self.current_state()
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.history.clear();
        self.score = 0.0;
        self.base_score = 0.0;
        self.team = None;
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn history(&self) -> &[MomentumSample] {
        &self.history
    }

    /// Red minus blue goals currently inside the window.
    pub fn recent_goal_differential(&self) -> i32 {
        self.window
            .iter()
            .map(|g| match g.team {
                Team::Red => 1,
                Team::Blue => -1,
            })
            .sum()
    }

    pub fn current_state(&self) -> MomentumState {
        MomentumState {
            team: self.team,
            score: self.score,
            base_score: self.base_score,
            recent_goals: self.window.len(),
            intensity: Intensity::from_score(self.score),
            duration: self.duration(),
            trend: self.trend(),
        }
    }

    pub fn momentum_analysis(&self) -> MomentumAnalysis {
        MomentumAnalysis {
            current_state: self.current_state(),
            momentum_shifts: self.shifts(),
            dominant_team: self.dominant_team(),
            momentum_stats: self.stats(),
        }
    }

    fn recalculate(&mut self) {
        if self.window.is_empty() {
            self.score = 0.0;
            self.base_score = 0.0;
            self.team = None;
            return;
        }

        self.base_score = self.recent_goal_differential() as f64 * GOAL_DIFF_SCALE;
        let decayed = self.time_weighted_score();
        let multiplier = self.streak_multiplier();
        self.score = (decayed * multiplier).clamp(-100.0, 100.0);

        self.team = if self.score.abs() >= HOLD_THRESHOLD {
            Some(if self.score > 0.0 { Team::Red } else { Team::Blue })
        } else {
            None
        };
    }

    fn time_weighted_score(&self) -> f64 {
        let Some(latest) = self.window.back().map(|g| g.timestamp) else {
            return 0.0;
        };
        let half_window = self.config.momentum_window / 2.0;

        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        for goal in &self.window {
            let dt = seconds_between(goal.timestamp, latest).max(0.0);
            let w = (-dt / half_window).exp();
            weighted_sum += goal.team.sign() * w;
            weight_sum += w;
        }

        if weight_sum > 0.0 {
            weighted_sum / weight_sum * 100.0
        } else {
            0.0
        }
    }

    fn streak_multiplier(&self) -> f64 {
        let Some(last) = self.window.back().map(|g| g.team) else {
            return 1.0;
        };
        let streak = self
            .window
            .iter()
            .rev()
            .take_while(|g| g.team == last)
            .count();
        (1.0 + 0.1 * (streak as f64 - 1.0)).min(MAX_STREAK_MULTIPLIER)
    }

    fn duration(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let Some(team) = self.team else {
            return Some(0.0);
        };
        let run = self
            .history
            .iter()
            .rev()
            .take_while(|s| s.team == Some(team))
            .count();
        Some(run as f64 * (self.config.momentum_window / self.history.len() as f64))
    }

    fn trend(&self) -> Trend {
        if self.history.len() < 2 {
            return Trend::Stable;
        }
        let start = self.history.len().saturating_sub(3);
        let recent: Vec<f64> = self.history[start..]
            .iter()
            .map(|s| s.momentum_score)
            .collect();
        let deltas: Vec<f64> = recent.windows(2).map(|w| w[1] - w[0]).collect();
        let avg = deltas.iter().sum::<f64>() / deltas.len() as f64;

        if avg.abs() < STABLE_TREND_BAND {
            Trend::Stable
        } else if avg > 0.0 {
            Trend::Increasing
        } else {
            Trend::Decreasing
        }
    }

    fn shifts(&self) -> ShiftSummary {
        let mut shifts = Vec::new();
        let mut prev: Option<Team> = None;
        for sample in &self.history {
            let Some(team) = sample.team else { continue };
            if Some(team) != prev {
                shifts.push(MomentumShift {
                    timestamp: sample.timestamp,
                    from_team: prev,
                    to_team: team,
                    trigger: sample.trigger,
                });
                prev = Some(team);
            }
        }

        let gaps: Vec<f64> = shifts
            .windows(2)
            .map(|w| seconds_between(w[0].timestamp, w[1].timestamp))
            .collect();
        let avg_duration = if gaps.is_empty() {
            None
        } else {
            Some(gaps.iter().sum::<f64>() / gaps.len() as f64)
        };

        ShiftSummary {
            total_shifts: shifts.len(),
            shifts,
            avg_duration,
        }
    }

    fn dominant_team(&self) -> Option<Team> {
        if self.history.is_empty() {
            return None;
        }
        let red = self.count_held(Some(Team::Red)) as f64;
        let blue = self.count_held(Some(Team::Blue)) as f64;
        if (red - blue).abs() < self.history.len() as f64 * DOMINANCE_MARGIN {
            return None;
        }
        Some(if red > blue { Team::Red } else { Team::Blue })
    }

    fn stats(&self) -> MomentumStats {
        if self.history.is_empty() {
            return MomentumStats {
                avg_momentum_score: 0.0,
                max_momentum_score: 0.0,
                momentum_distribution: MomentumDistribution {
                    red: 0.0,
                    blue: 0.0,
                    neutral: 0.0,
                },
            };
        }
        let n = self.history.len() as f64;
        MomentumStats {
            avg_momentum_score: self.history.iter().map(|s| s.momentum_score).sum::<f64>() / n,
            max_momentum_score: self
                .history
                .iter()
                .map(|s| s.momentum_score.abs())
                .fold(0.0, f64::max),
            momentum_distribution: MomentumDistribution {
                red: self.count_held(Some(Team::Red)) as f64 / n,
                blue: self.count_held(Some(Team::Blue)) as f64 / n,
                neutral: self.count_held(None) as f64 / n,
            },
        }
    }

    fn count_held(&self, team: Option<Team>) -> usize {
        self.history.iter().filter(|s| s.team == team).count()
    }
}
