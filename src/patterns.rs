use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AnalyticsConfig;
use crate::error::Result;
use crate::model::{GoalEvent, Team};
use crate::store::seconds_between;

const COMEBACK_DEFICIT: i64 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamCounts {
    pub red: usize,
    pub blue: usize,
}

impl TeamCounts {
    pub fn bump(&mut self, team: Team) {
        match team {
            Team::Red => self.red += 1,
            Team::Blue => self.blue += 1,
        }
    }

    pub fn get(&self, team: Team) -> usize {
        match team {
            Team::Red => self.red,
            Team::Blue => self.blue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub team: Team,
    pub goals: usize,
    /// Wall seconds from the run's first goal to its latest.
    pub duration: f64,
    pub started_period: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseGoal {
    pub team: Team,
    pub response_time: f64,
    pub period: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalKind {
    Tying,
    GoAhead,
    Insurance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalGoal {
    pub team: Team,
    pub score_diff: u32,
    pub time_remaining: f64,
    pub period: u32,
    #[serde(rename = "type")]
    pub kind: CriticalKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentRun {
    pub team: Option<Team>,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringRunSummary {
    pub total_runs: usize,
    pub current_run: CurrentRun,
    pub longest_run: usize,
    pub runs_by_team: TeamCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalDistribution {
    pub by_period: BTreeMap<u32, TeamCounts>,
    pub total_goals: usize,
    pub goals_by_team: TeamCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingPatterns {
    pub avg_interval: f64,
    pub quick_goals: usize,
    pub longest_drought: f64,
    pub early_goals: usize,
    pub late_goals: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComebackSummary {
    pub successful: TeamCounts,
    pub attempts: TeamCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamPatterns {
    pub response_goals: TeamCounts,
    pub comebacks: ComebackSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub scoring_runs: ScoringRunSummary,
    pub goal_distribution: GoalDistribution,
    pub timing_patterns: TimingPatterns,
    pub team_patterns: TeamPatterns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalPatterns {
    pub scoring_run: Option<RunInfo>,
    pub response_goal: Option<ResponseGoal>,
    pub critical_goal: Option<CriticalGoal>,
    pub current_patterns: PatternSummary,
}

/// Scoring patterns over the ordered goal history of one game.
///
/// Every aggregate is recomputed from `goals`, so queries never depend on
/// state beyond the append-only history.
pub struct PatternAnalyzer {
    config: AnalyticsConfig,
    goals: Vec<GoalEvent>,
    recent: VecDeque<GoalEvent>,
}

impl PatternAnalyzer {
    pub fn new(config: AnalyticsConfig) -> Self {
        let cap = config.recent_goal_capacity;
        Self {
            config,
            goals: Vec::new(),
            recent: VecDeque::with_capacity(cap),
        }
    }

    pub fn add_goal(&mut self, goal: &GoalEvent) -> Result<GoalPatterns> {
        if let Err(err) = goal.validate() {
            warn!(error = %err, "rejecting goal event");
            return Err(err);
        }

        self.goals.push(goal.clone());
        if self.recent.len() == self.config.recent_goal_capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(goal.clone());

        let scoring_run = self.scoring_run();
        let response_goal = self.response_goal(goal);
        let critical_goal = self.critical_goal(goal);
        if let Some(run) = &scoring_run {
            debug!(team = %run.team, goals = run.goals, "scoring run");
        }

        Ok(GoalPatterns {
            scoring_run,
            response_goal,
            critical_goal,
            current_patterns: self.current_patterns(),
        })
    }

    pub fn goals(&self) -> &[GoalEvent] {
        &self.goals
    }

    pub fn recent_goals(&self) -> impl Iterator<Item = &GoalEvent> {
        self.recent.iter()
    }

    pub fn total_goals(&self) -> usize {
        self.goals.len()
    }

    pub fn current_patterns(&self) -> PatternSummary {
        PatternSummary {
            scoring_runs: self.scoring_run_summary(),
            goal_distribution: self.goal_distribution(),
            timing_patterns: self.timing_patterns(),
            team_patterns: self.team_patterns(),
        }
    }

    fn trailing_run(&self) -> &[GoalEvent] {
        let Some(last) = self.goals.last() else {
            return &[];
        };
        let len = self
            .goals
            .iter()
            .rev()
            .take_while(|g| g.team == last.team)
            .count();
        &self.goals[self.goals.len() - len..]
    }

    fn scoring_run(&self) -> Option<RunInfo> {
        let run = self.trailing_run();
        if run.len() < self.config.scoring_run_threshold {
            return None;
        }
        let first = run.first()?;
        let last = run.last()?;
        Some(RunInfo {
            team: last.team,
            goals: run.len(),
            duration: seconds_between(first.timestamp, last.timestamp),
            started_period: first.period,
        })
    }

    fn response_goal(&self, goal: &GoalEvent) -> Option<ResponseGoal> {
        if self.goals.len() < 2 {
            return None;
        }
        let previous = &self.goals[self.goals.len() - 2];
        let elapsed = goal.time_since_last?;
        if previous.team != goal.team && elapsed <= self.config.quick_response_window {
            return Some(ResponseGoal {
                team: goal.team,
                response_time: elapsed,
                period: goal.period,
            });
        }
        None
    }

    fn critical_goal(&self, goal: &GoalEvent) -> Option<CriticalGoal> {
        let diff = goal.score_after.differential().unsigned_abs();
        let close = diff <= self.config.close_game_threshold;
        let late = goal.time <= self.config.critical_moment_threshold;
        if !(close || late) {
            return None;
        }
        let kind = match diff {
            0 => CriticalKind::Tying,
            1 => CriticalKind::GoAhead,
            _ => CriticalKind::Insurance,
        };
        Some(CriticalGoal {
            team: goal.team,
            score_diff: diff,
            time_remaining: goal.time,
            period: goal.period,
            kind,
        })
    }

    // Maximal same-team streaks in order.
    fn streaks(&self) -> Vec<(Team, usize)> {
        let mut out: Vec<(Team, usize)> = Vec::new();
        for goal in &self.goals {
            match out.last_mut() {
                Some((team, len)) if *team == goal.team => *len += 1,
                _ => out.push((goal.team, 1)),
            }
        }
        out
    }

    fn scoring_run_summary(&self) -> ScoringRunSummary {
        let streaks = self.streaks();
        let mut runs_by_team = TeamCounts::default();
        let mut total_runs = 0;
        let mut longest_run = 0;
        for (team, len) in &streaks {
            if *len >= self.config.scoring_run_threshold {
                total_runs += 1;
                runs_by_team.bump(*team);
                longest_run = longest_run.max(*len);
            }
        }
        let current_run = match streaks.last() {
            Some((team, len)) => CurrentRun {
                team: Some(*team),
                length: *len,
            },
            None => CurrentRun {
                team: None,
                length: 0,
            },
        };
        ScoringRunSummary {
            total_runs,
            current_run,
            longest_run,
            runs_by_team,
        }
    }

    fn goal_distribution(&self) -> GoalDistribution {
        let mut by_period: BTreeMap<u32, TeamCounts> = BTreeMap::new();
        let mut goals_by_team = TeamCounts::default();
        for goal in &self.goals {
            by_period.entry(goal.period).or_default().bump(goal.team);
            goals_by_team.bump(goal.team);
        }
        GoalDistribution {
            by_period,
            total_goals: self.goals.len(),
            goals_by_team,
        }
    }

    fn timing_patterns(&self) -> TimingPatterns {
        let intervals: Vec<f64> = self.goals.iter().filter_map(|g| g.time_since_last).collect();
        let avg_interval = if intervals.is_empty() {
            0.0
        } else {
            intervals.iter().sum::<f64>() / intervals.len() as f64
        };
        let early_cutoff = self.config.nominal_period_length - self.config.edge_goal_window;

        TimingPatterns {
            avg_interval,
            quick_goals: intervals
                .iter()
                .filter(|i| **i <= self.config.quick_response_window)
                .count(),
            longest_drought: intervals.iter().copied().fold(0.0, f64::max),
            early_goals: self.goals.iter().filter(|g| g.time >= early_cutoff).count(),
            late_goals: self
                .goals
                .iter()
                .filter(|g| g.time <= self.config.edge_goal_window)
                .count(),
        }
    }

    fn team_patterns(&self) -> TeamPatterns {
        let mut response_goals = TeamCounts::default();
        for pair in self.goals.windows(2) {
            let (prev, goal) = (&pair[0], &pair[1]);
            let quick = goal
                .time_since_last
                .is_some_and(|t| t <= self.config.quick_response_window);
            if prev.team != goal.team && quick {
                response_goals.bump(goal.team);
            }
        }
        TeamPatterns {
            response_goals,
            comebacks: self.comebacks(),
        }
    }

    fn comebacks(&self) -> ComebackSummary {
        let mut successful = TeamCounts::default();
        let mut attempts = TeamCounts::default();
        let mut open_red = false;
        let mut open_blue = false;

        for goal in &self.goals {
            for (team, open) in [(Team::Red, &mut open_red), (Team::Blue, &mut open_blue)] {
                let deficit = goal.score_after.get(team.opponent()) as i64
                    - goal.score_after.get(team) as i64;
                if *open && deficit <= 0 {
                    successful.bump(team);
                    *open = false;
                } else if !*open && deficit >= COMEBACK_DEFICIT {
                    attempts.bump(team);
                    *open = true;
                }
            }
        }

        ComebackSummary {
            successful,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Score;
    use chrono::{DateTime, Duration, Utc};

    struct Feed {
        base: DateTime<Utc>,
        score: Score,
        last: Option<i64>,
    }

    impl Feed {
        fn new() -> Self {
            Self {
                base: Utc::now(),
                score: Score::default(),
                last: None,
            }
        }

        fn goal(&mut self, at: i64, team: Team, clock: f64) -> GoalEvent {
            self.score = self.score.with_goal(team);
            let since = self.last.map(|l| (at - l) as f64);
            self.last = Some(at);
            GoalEvent::new(clock, 1, team, self.score, self.base + Duration::seconds(at))
                .with_time_since_last(since)
        }
    }

    #[test]
    fn run_reported_once_threshold_is_reached() {
        let mut feed = Feed::new();
        let mut pa = PatternAnalyzer::new(AnalyticsConfig::default());
        assert!(pa.add_goal(&feed.goal(0, Team::Red, 170.0)).unwrap().scoring_run.is_none());
        assert!(pa.add_goal(&feed.goal(20, Team::Red, 150.0)).unwrap().scoring_run.is_none());
        let out = pa.add_goal(&feed.goal(50, Team::Red, 120.0)).unwrap();
        let run = out.scoring_run.unwrap();
        assert_eq!(run.goals, 3);
        assert_eq!(run.duration, 50.0);
        assert_eq!(out.current_patterns.scoring_runs.total_runs, 1);

        let out = pa.add_goal(&feed.goal(60, Team::Red, 110.0)).unwrap();
        assert_eq!(out.scoring_run.unwrap().goals, 4);
        // Extending a run does not count a second one.
        assert_eq!(out.current_patterns.scoring_runs.total_runs, 1);
        assert_eq!(out.current_patterns.scoring_runs.longest_run, 4);
    }

    #[test]
    fn critical_goal_types_follow_differential() {
        let mut feed = Feed::new();
        let mut pa = PatternAnalyzer::new(AnalyticsConfig::default());
        let g = pa.add_goal(&feed.goal(0, Team::Red, 170.0)).unwrap();
        assert_eq!(g.critical_goal.unwrap().kind, CriticalKind::GoAhead);
        let g = pa.add_goal(&feed.goal(10, Team::Red, 160.0)).unwrap();
        assert_eq!(g.critical_goal.unwrap().kind, CriticalKind::Insurance);
        // Three-goal lead early in the period is not critical.
        let g = pa.add_goal(&feed.goal(20, Team::Red, 150.0)).unwrap();
        assert!(g.critical_goal.is_none());
        // ...but it is once the clock is late.
        let g = pa.add_goal(&feed.goal(30, Team::Red, 40.0)).unwrap();
        assert_eq!(g.critical_goal.unwrap().kind, CriticalKind::Insurance);
    }

    #[test]
    fn comeback_attempt_and_success() {
        let mut feed = Feed::new();
        let mut pa = PatternAnalyzer::new(AnalyticsConfig::default());
        for (at, team) in [
            (0, Team::Red),
            (10, Team::Red),
            (50, Team::Blue),
            (90, Team::Red),
            (120, Team::Blue),
            (140, Team::Blue),
            (160, Team::Blue),
        ] {
            pa.add_goal(&feed.goal(at, team, 100.0)).unwrap();
        }
        let comebacks = pa.current_patterns().team_patterns.comebacks;
        // Blue fell behind 2-0 (one attempt, still open at 3-1) and tied at 3-3.
        assert_eq!(comebacks.attempts.blue, 1);
        assert_eq!(comebacks.successful.blue, 1);
        assert_eq!(comebacks.attempts.red, 0);
    }

    #[test]
    fn timing_patterns_on_empty_history_are_zero() {
        let pa = PatternAnalyzer::new(AnalyticsConfig::default());
        let t = pa.current_patterns().timing_patterns;
        assert_eq!(t.avg_interval, 0.0);
        assert_eq!(t.longest_drought, 0.0);
        assert_eq!(t.quick_goals, 0);
        let runs = pa.current_patterns().scoring_runs;
        assert_eq!(runs.current_run.team, None);
        assert_eq!(runs.current_run.length, 0);
    }

    #[test]
    fn recent_ring_is_bounded() {
        let mut feed = Feed::new();
        let cfg = AnalyticsConfig {
            recent_goal_capacity: 3,
            ..AnalyticsConfig::default()
        };
        let mut pa = PatternAnalyzer::new(cfg);
        for i in 0..5 {
            let team = if i % 2 == 0 { Team::Red } else { Team::Blue };
            pa.add_goal(&feed.goal(i * 10, team, 100.0)).unwrap();
        }
        assert_eq!(pa.total_goals(), 5);
        assert_eq!(pa.recent_goals().count(), 3);
        assert_eq!(pa.recent_goals().next().unwrap().score_after, Score::new(2, 1));
    }

    #[test]
    fn invalid_goal_is_not_recorded() {
        let mut pa = PatternAnalyzer::new(AnalyticsConfig::default());
        let bad = GoalEvent::new(-1.0, 1, Team::Red, Score::new(1, 0), Utc::now());
        assert!(pa.add_goal(&bad).is_err());
        assert_eq!(pa.total_goals(), 0);
    }
}
