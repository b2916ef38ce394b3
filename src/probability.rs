use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::AnalyticsConfig;
use crate::error::{AnalyticsError, Result};
use crate::model::{GameState, Team};
use crate::store::{AnalyticsStore, HistoricalSummary};

const W_SCORE_DIFF: f64 = 0.4;
const W_TIME_REMAINING: f64 = 0.2;
const W_PERIOD_PROGRESS: f64 = 0.1;
const W_MOMENTUM: f64 = 0.2;
const W_HISTORICAL: f64 = 0.1;

// Three goals is treated as a decisive lead.
const SCORE_DIFF_SCALE: f64 = 3.0;
const MOMENTUM_SCALE: f64 = 2.0;

const BASIC_FLOOR: f64 = 0.01;
const BASIC_CEIL: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Basic,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WinProbability {
    pub red: f64,
    pub blue: f64,
    pub tier: ModelTier,
}

impl WinProbability {
    pub fn from_red(red: f64, tier: ModelTier) -> Self {
        let red = red.clamp(0.0, 1.0);
        Self {
            red,
            blue: 1.0 - red,
            tier,
        }
    }

    pub fn even(tier: ModelTier) -> Self {
        Self::from_red(0.5, tier)
    }

    pub fn for_team(&self, team: Team) -> f64 {
        match team {
            Team::Red => self.red,
            Team::Blue => self.blue,
        }
    }
}

/// Normalized inputs of the advanced model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector {
    pub score_diff: f64,
    pub time_remaining_ratio: f64,
    pub period_progress: f64,
    pub momentum_factor: f64,
    pub historical_pattern: f64,
}

impl FeatureVector {
    pub fn weighted_sum(&self) -> f64 {
        W_SCORE_DIFF * self.score_diff
            + W_TIME_REMAINING * self.time_remaining_ratio
            + W_PERIOD_PROGRESS * self.period_progress
            + W_MOMENTUM * self.momentum_factor
            + W_HISTORICAL * self.historical_pattern
    }
}

/// Value snapshot of everything a probability depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbabilityKey {
    red: u32,
    blue: u32,
    period: u32,
    clock_bits: u64,
    max_periods: u32,
    period_length_bits: u64,
    recent_goal_diff: i32,
}

impl ProbabilityKey {
    pub fn new(state: &GameState, recent_goal_diff: i32) -> Self {
        // `+ 0.0` folds -0.0 into 0.0 so both hash alike.
        Self {
            red: state.score.red,
            blue: state.score.blue,
            period: state.period,
            clock_bits: (state.clock + 0.0).to_bits(),
            max_periods: state.max_periods,
            period_length_bits: (state.period_length + 0.0).to_bits(),
            recent_goal_diff,
        }
    }
}

/// Bounded least-recently-used map.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        self.tick += 1;
        let tick = self.tick;
        let (value, last_used) = self.entries.get_mut(key)?;
        self.order.remove(last_used);
        *last_used = tick;
        self.order.insert(tick, key.clone());
        Some(value.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.tick += 1;
        if let Some((_, last_used)) = self.entries.get(&key) {
            self.order.remove(last_used);
        } else if self.entries.len() >= self.capacity {
            if let Some((_, oldest)) = self.order.pop_first() {
                self.entries.remove(&oldest);
            }
        }
        self.order.insert(self.tick, key.clone());
        self.entries.insert(key, (value, self.tick));
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

pub struct WinProbabilityTracker {
    config: AnalyticsConfig,
    total_games: u64,
    historical_patterns: HashMap<(i32, u32), f64>,
    recent_goal_diff: i32,
    cache: LruCache<ProbabilityKey, WinProbability>,
}

impl WinProbabilityTracker {
    pub fn new(config: AnalyticsConfig) -> Self {
        let cache = LruCache::new(config.cache_size);
        Self {
            config,
            total_games: 0,
            historical_patterns: HashMap::new(),
            recent_goal_diff: 0,
            cache,
        }
    }

    /// Tracker primed with the store's history. A store that cannot answer
    /// leaves the tracker on the basic model.
    pub fn from_store<S: AnalyticsStore + ?Sized>(store: &S, config: AnalyticsConfig) -> Self {
        let mut tracker = Self::new(config);
        tracker.reload_from(store);
        tracker
    }

    pub fn reload_from<S: AnalyticsStore + ?Sized>(&mut self, store: &S) {
        match store.historical_summary() {
            Ok(summary) => self.load_history(&summary),
            Err(err) => {
                error!(error = %err, "loading historical patterns failed");
                self.load_history(&HistoricalSummary::default());
            }
        }
    }

    pub fn load_history(&mut self, summary: &HistoricalSummary) {
        self.total_games = summary.total_games;
        self.historical_patterns.clear();
        if self.total_games >= self.config.min_games_basic {
            for s in &summary.situations {
                self.historical_patterns
                    .insert((s.score_diff, s.period), s.red_win_rate());
            }
        }
        self.cache.clear();
        info!(
            total_games = self.total_games,
            situations = self.historical_patterns.len(),
            tier = ?self.tier(),
            "historical patterns loaded"
        );
    }

    pub fn total_games(&self) -> u64 {
        self.total_games
    }

    pub fn tier(&self) -> ModelTier {
        if self.total_games < self.config.min_games_basic {
            ModelTier::Basic
        } else if self.total_games < self.config.min_games_advanced {
            ModelTier::Intermediate
        } else {
            ModelTier::Advanced
        }
    }

    /// Red minus blue goals inside the momentum window; feeds the momentum factor.
    pub fn set_recent_goal_differential(&mut self, diff: i32) {
        self.recent_goal_diff = diff;
    }

    pub fn recent_goal_differential(&self) -> i32 {
        self.recent_goal_diff
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn calculate_win_probability(&mut self, state: &GameState) -> Result<WinProbability> {
        state.validate()?;

        let key = ProbabilityKey::new(state, self.recent_goal_diff);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let out = match self.tier() {
            ModelTier::Basic => self.basic_probability(state),
            ModelTier::Intermediate => self.intermediate_probability(state),
            ModelTier::Advanced => self.advanced_probability(state, ModelTier::Advanced),
        };
        debug!(
            game_id = state.game_id,
            red = out.red,
            tier = ?out.tier,
            "win probability computed"
        );
        self.cache.insert(key, out);
        Ok(out)
    }

    /// Advanced-model features for `state`. Refuses to answer before the
    /// basic sample threshold is reached.
    pub fn feature_breakdown(&self, state: &GameState) -> Result<FeatureVector> {
        state.validate()?;
        if self.total_games < self.config.min_games_basic {
            return Err(AnalyticsError::InsufficientData {
                required: self.config.min_games_basic,
                available: self.total_games,
            });
        }
        Ok(self.features(state))
    }

    fn basic_probability(&self, state: &GameState) -> WinProbability {
        let score_diff = state.score.differential();
        let base = 0.5 + 0.1 * score_diff as f64;
        let time_factor = state.time_remaining_ratio();

        let red = if score_diff > 0 {
            base + (1.0 - base) * (1.0 - time_factor)
        } else if score_diff < 0 {
            base * time_factor
        } else {
            0.5
        };

        WinProbability::from_red(red.clamp(BASIC_FLOOR, BASIC_CEIL), ModelTier::Basic)
    }

    fn intermediate_probability(&self, state: &GameState) -> WinProbability {
        let basic = self.basic_probability(state);
        let advanced = self.advanced_probability(state, ModelTier::Intermediate);

        let span = (self.config.min_games_advanced - self.config.min_games_basic) as f64;
        let w = ((self.total_games - self.config.min_games_basic) as f64 / span).clamp(0.0, 1.0);
        WinProbability::from_red(
            (1.0 - w) * basic.red + w * advanced.red,
            ModelTier::Intermediate,
        )
    }

    fn advanced_probability(&self, state: &GameState, tier: ModelTier) -> WinProbability {
        let z = self.features(state).weighted_sum();
        let p = logistic(z);

        let confidence = (self.total_games as f64 / self.config.min_games_advanced as f64).min(1.0);
        WinProbability::from_red(p * confidence + 0.5 * (1.0 - confidence), tier)
    }

    fn features(&self, state: &GameState) -> FeatureVector {
        let score_diff = state.score.differential();
        FeatureVector {
            score_diff: (score_diff as f64 / SCORE_DIFF_SCALE).tanh(),
            time_remaining_ratio: state.time_remaining_ratio(),
            period_progress: state.period_progress(),
            momentum_factor: (self.recent_goal_diff as f64 / MOMENTUM_SCALE).tanh(),
            historical_pattern: self.historical_pattern(score_diff, state.period),
        }
    }

    fn historical_pattern(&self, score_diff: i32, period: u32) -> f64 {
        if self.historical_patterns.is_empty() {
            return 0.0;
        }
        self.historical_patterns
            .get(&(score_diff, period))
            .copied()
            .unwrap_or(0.5)
    }
}

fn logistic(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GameMode, Score};
    use crate::store::SituationOutcome;

    fn state(red: u32, blue: u32, period: u32, clock: f64) -> GameState {
        GameState {
            score: Score::new(red, blue),
            period,
            clock,
            ..GameState::kickoff(1, GameMode::Classic)
        }
    }

    fn tracker_with_games(n: u64) -> WinProbabilityTracker {
        let mut t = WinProbabilityTracker::new(AnalyticsConfig::default());
        t.load_history(&HistoricalSummary {
            total_games: n,
            ..HistoricalSummary::default()
        });
        t
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);
        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn lru_reinsert_refreshes_without_growing() {
        let mut cache = LruCache::new(2);
        cache.insert(1, "x");
        cache.insert(2, "y");
        cache.insert(1, "z");
        cache.insert(3, "w");
        assert_eq!(cache.get(&1), Some("z"));
        assert!(!cache.contains(&2));
        assert_eq!(cache.len(), cache.capacity());
    }

    #[test]
    fn basic_tier_leader_gains_as_clock_runs_down() {
        let mut t = tracker_with_games(0);
        let early = t.calculate_win_probability(&state(1, 0, 1, 170.0)).unwrap();
        let late = t.calculate_win_probability(&state(1, 0, 3, 10.0)).unwrap();
        assert_eq!(early.tier, ModelTier::Basic);
        assert!(late.red > early.red);
        assert!(late.red <= BASIC_CEIL);
    }

    #[test]
    fn basic_tier_is_color_symmetric() {
        let mut t = tracker_with_games(0);
        let red_up = t.calculate_win_probability(&state(2, 0, 2, 45.0)).unwrap();
        let blue_up = t.calculate_win_probability(&state(0, 2, 2, 45.0)).unwrap();
        assert!((red_up.red - blue_up.blue).abs() < 1e-12);
    }

    #[test]
    fn basic_tier_clamps_blowouts() {
        let mut t = tracker_with_games(0);
        let p = t.calculate_win_probability(&state(9, 0, 1, 180.0)).unwrap();
        assert!((p.red - BASIC_CEIL).abs() < 1e-12);
        let p = t.calculate_win_probability(&state(0, 9, 1, 180.0)).unwrap();
        assert!((p.red - BASIC_FLOOR).abs() < 1e-12);
    }

    #[test]
    fn tiers_follow_sample_size() {
        assert_eq!(tracker_with_games(29).tier(), ModelTier::Basic);
        assert_eq!(tracker_with_games(30).tier(), ModelTier::Intermediate);
        assert_eq!(tracker_with_games(299).tier(), ModelTier::Intermediate);
        assert_eq!(tracker_with_games(300).tier(), ModelTier::Advanced);
    }

    #[test]
    fn intermediate_starts_at_basic_output() {
        // At exactly min_games_basic the blend weight is zero.
        let mut inter = tracker_with_games(30);
        let mut basic = tracker_with_games(0);
        let s = state(1, 0, 2, 100.0);
        let a = inter.calculate_win_probability(&s).unwrap();
        let b = basic.calculate_win_probability(&s).unwrap();
        assert!((a.red - b.red).abs() < 1e-12);
        assert_eq!(a.tier, ModelTier::Intermediate);
    }

    #[test]
    fn advanced_uses_logistic_of_weighted_features() {
        let mut t = tracker_with_games(300);
        let s = state(0, 0, 1, 180.0);
        let f = t.feature_breakdown(&s).unwrap();
        assert_eq!(f.score_diff, 0.0);
        assert_eq!(f.historical_pattern, 0.0);
        let expected = logistic(0.2 * 1.0 + 0.1 * (1.0 / 3.0));
        let p = t.calculate_win_probability(&s).unwrap();
        assert!((p.red - expected).abs() < 1e-12);
    }

    #[test]
    fn historical_pattern_defaults_to_even_for_unseen_situations() {
        let mut t = WinProbabilityTracker::new(AnalyticsConfig::default());
        t.load_history(&HistoricalSummary {
            total_games: 40,
            red_wins: 20,
            blue_wins: 20,
            situations: vec![SituationOutcome {
                score_diff: 1,
                period: 1,
                samples: 10,
                red_wins: 8,
                draws: 0,
            }],
        });
        assert!((t.historical_pattern(1, 1) - 0.8).abs() < 1e-12);
        assert_eq!(t.historical_pattern(2, 3), 0.5);
    }

    #[test]
    fn feature_breakdown_requires_basic_sample() {
        let t = tracker_with_games(5);
        let err = t.feature_breakdown(&state(0, 0, 1, 180.0)).unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::InsufficientData {
                required: 30,
                available: 5
            }
        ));
    }

    #[test]
    fn momentum_input_is_part_of_cache_key() {
        let mut t = tracker_with_games(300);
        let s = state(1, 1, 2, 90.0);
        let calm = t.calculate_win_probability(&s).unwrap();
        t.set_recent_goal_differential(3);
        let hot = t.calculate_win_probability(&s).unwrap();
        assert!(hot.red > calm.red);
        assert_eq!(t.cached_entries(), 2);
    }

    #[test]
    fn invalid_state_is_rejected() {
        let mut t = tracker_with_games(0);
        let err = t.calculate_win_probability(&state(0, 0, 5, 10.0)).unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidGameState(_)));
        assert_eq!(t.cached_entries(), 0);
    }
}
