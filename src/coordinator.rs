use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AnalyticsConfig;
use crate::error::{AnalyticsError, Result};
use crate::events::{DispatchOutcome, EventDispatcher, SensorData, SensorKind, SensorPayload};
use crate::model::{GameMode, GameState, GoalEvent, Team};
use crate::momentum::{MomentumAnalysis, MomentumState, MomentumTracker, ShiftSummary};
use crate::patterns::{PatternAnalyzer, PatternSummary, ScoringRunSummary, TeamCounts};
use crate::probability::{WinProbability, WinProbabilityTracker};
use crate::store::{AnalyticsStore, seconds_between};

/// One snapshot of everything the engine derives for a game state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub win_probability: WinProbability,
    pub patterns: PatternSummary,
    pub momentum: MomentumAnalysis,
    pub is_critical_moment: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStats {
    pub total_goals: usize,
    pub goals_per_period: BTreeMap<u32, TeamCounts>,
    pub scoring_runs: ScoringRunSummary,
    pub momentum_shifts: ShiftSummary,
    pub game_id: u64,
    pub mode: GameMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    #[serde(flatten)]
    pub analysis: AnalysisRecord,
    pub game_stats: GameStats,
}

/// State the sensor handlers work on.
struct LiveGame<S> {
    store: S,
    patterns: PatternAnalyzer,
    momentum: MomentumTracker,
    current: Option<GameState>,
    last_goal_at: Option<DateTime<Utc>>,
}

pub struct GameAnalytics<S: AnalyticsStore> {
    config: AnalyticsConfig,
    tracker: WinProbabilityTracker,
    live: LiveGame<S>,
    dispatcher: EventDispatcher<LiveGame<S>>,
}

impl<S: AnalyticsStore + 'static> GameAnalytics<S> {
    pub fn new(store: S, config: AnalyticsConfig) -> Result<Self> {
        config.validate()?;

        let tracker = WinProbabilityTracker::from_store(&store, config.clone());
        let live = LiveGame {
            store,
            patterns: PatternAnalyzer::new(config.clone()),
            momentum: MomentumTracker::new(config.clone()),
            current: None,
            last_goal_at: None,
        };

        let mut dispatcher: EventDispatcher<LiveGame<S>> = EventDispatcher::new();
        dispatcher.register_handler(SensorKind::Goals, |live: &mut LiveGame<S>, event| {
            let SensorData::Goal(goal) = &event.data else {
                return Ok(());
            };
            on_goal(live, goal)
        });
        dispatcher.register_handler(SensorKind::Time, |live: &mut LiveGame<S>, event| {
            let SensorData::Time(clock) = event.data else {
                return Ok(());
            };
            on_clock(live, clock)
        });

        info!(tier = ?tracker.tier(), games = tracker.total_games(), "analytics ready");
        Ok(Self {
            config,
            tracker,
            live,
            dispatcher,
        })
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn win_probability_tracker(&self) -> &WinProbabilityTracker {
        &self.tracker
    }

    pub fn patterns(&self) -> &PatternAnalyzer {
        &self.live.patterns
    }

    pub fn momentum(&self) -> &MomentumTracker {
        &self.live.momentum
    }

    pub fn current_state(&self) -> Option<&GameState> {
        self.live.current.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.live.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.live.store
    }

    /// Analyze `state` and persist the result. Persistence is best-effort.
    pub fn update(&mut self, state: &GameState) -> Result<AnalysisRecord> {
        state.validate()?;
        self.live.current = Some(state.clone());

        let record = self.analyze(state)?;
        if let Err(err) = self.live.store.save_analysis(state.game_id, &record) {
            warn!(game_id = state.game_id, error = %err, "saving analysis failed");
        }
        Ok(record)
    }

    pub fn record_goal(&mut self, team: Team, state: &GameState) -> Result<AnalysisRecord> {
        self.record_goal_at(team, state, Utc::now())
    }

    /// Record a goal scored by `team` at `at`. `state` is the game state with
    /// the goal already counted.
    pub fn record_goal_at(
        &mut self,
        team: Team,
        state: &GameState,
        at: DateTime<Utc>,
    ) -> Result<AnalysisRecord> {
        state.validate()?;

        let goal = GoalEvent::new(state.clock, state.period, team, state.score, at);
        self.live.current = Some(state.clone());
        let outcome = self.dispatcher.process_sensor_data(
            &mut self.live,
            SensorKind::Goals,
            SensorPayload::Goal(goal),
        )?;
        if outcome.handled == 0 {
            warn!(game_id = state.game_id, failed = outcome.failed, "goal reached no handler");
        } else if outcome.failed > 0 {
            warn!(game_id = state.game_id, failed = outcome.failed, "goal handlers failed");
        }

        self.update(state)
    }

    /// Feed host sensor input through the dispatcher.
    pub fn process_sensor_data(
        &mut self,
        kind: SensorKind,
        payload: SensorPayload,
    ) -> Result<DispatchOutcome> {
        self.dispatcher
            .process_sensor_data(&mut self.live, kind, payload)
    }

    /// Current analysis plus game statistics, or `None` before the first update.
    pub fn analytics_summary(&mut self) -> Result<Option<AnalyticsSummary>> {
        let Some(state) = self.live.current.clone() else {
            return Ok(None);
        };
        let analysis = self.analyze(&state)?;
        let game_stats = GameStats {
            total_goals: self.live.patterns.total_goals(),
            goals_per_period: analysis.patterns.goal_distribution.by_period.clone(),
            scoring_runs: analysis.patterns.scoring_runs.clone(),
            momentum_shifts: analysis.momentum.momentum_shifts.clone(),
            game_id: state.game_id,
            mode: state.mode,
        };
        Ok(Some(AnalyticsSummary {
            analysis,
            game_stats,
        }))
    }

    pub fn cleanup(&mut self) {
        self.dispatcher.clear_handlers(None);
        info!("analytics cleaned up");
    }

    fn analyze(&mut self, state: &GameState) -> Result<AnalysisRecord> {
        let recent_diff = match self
            .live
            .store
            .recent_goals(state.game_id, self.config.momentum_window)
        {
            Ok(goals) => goals
                .iter()
                .map(|g| match g.team {
                    Team::Red => 1,
                    Team::Blue => -1,
                })
                .sum(),
            Err(err) => {
                warn!(game_id = state.game_id, error = %err, "recent goals unavailable");
                self.live.momentum.recent_goal_differential()
            }
        };
        self.tracker.set_recent_goal_differential(recent_diff);

        let win_probability = self.tracker.calculate_win_probability(state)?;
        let patterns = self.live.patterns.current_patterns();
        let momentum = self.live.momentum.momentum_analysis();
        let is_critical_moment = is_critical(&self.config, state, &momentum.current_state);

        Ok(AnalysisRecord {
            win_probability,
            patterns,
            momentum,
            is_critical_moment,
            timestamp: Utc::now(),
        })
    }
}

fn is_critical(config: &AnalyticsConfig, state: &GameState, momentum: &MomentumState) -> bool {
    let close = state.score.differential().unsigned_abs() <= config.close_game_threshold;
    let late = state.clock <= config.critical_moment_threshold;
    (close && late) || momentum.intensity.is_heightened()
}

fn on_goal<S: AnalyticsStore>(live: &mut LiveGame<S>, goal: &GoalEvent) -> Result<()> {
    // Elapsed time always comes from our own clock, whatever the payload carried.
    let since_last = live
        .last_goal_at
        .map(|prev| seconds_between(prev, goal.timestamp).max(0.0));
    let goal = goal.clone().with_time_since_last(since_last);
    live.last_goal_at = Some(goal.timestamp);
    if let Some(game_id) = live.current.as_ref().map(|s| s.game_id) {
        if let Err(err) = live.store.record_goal(game_id, &goal) {
            warn!(game_id, error = %err, "storing goal failed");
        }
    }
    live.patterns.add_goal(&goal)?;
    let state = live.momentum.add_goal(&goal);
    debug!(team = %goal.team, momentum = state.score, "goal processed");
    Ok(())
}

fn on_clock<S>(live: &mut LiveGame<S>, clock: f64) -> Result<()> {
    let Some(state) = live.current.as_mut() else {
        return Ok(());
    };
    if clock > state.period_length {
        return Err(AnalyticsError::InvalidPayload(format!(
            "clock {clock} exceeds period length {}",
            state.period_length
        )));
    }
    state.clock = clock;
    Ok(())
}
