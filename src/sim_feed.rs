use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{GameMode, GameState, Score, Team};

// Break between periods, in wall seconds.
const INTERMISSION_SECS: f64 = 30.0;

#[derive(Debug, Clone)]
pub struct SimSettings {
    pub game_id: u64,
    pub mode: GameMode,
    pub seed: u64,
    /// Mean clock seconds between goals.
    pub mean_goal_gap: f64,
    /// Chance the team that just scored also scores next.
    pub streakiness: f64,
    /// Chance red scores a goal with no previous scorer.
    pub red_bias: f64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            game_id: 1,
            mode: GameMode::Classic,
            seed: 7,
            mean_goal_gap: 35.0,
            streakiness: 0.6,
            red_bias: 0.5,
        }
    }
}

/// One goal as the host would report it: the scorer, the state with the goal
/// counted, and the wall time it went in.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedGoal {
    pub team: Team,
    pub state: GameState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SimulatedGame {
    pub goals: Vec<SimulatedGoal>,
    pub final_state: GameState,
}

/// Play a full game with a seeded RNG. Same settings and start give the same
/// goals.
pub fn simulate_game(settings: &SimSettings, start: DateTime<Utc>) -> SimulatedGame {
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut state = GameState::kickoff(settings.game_id, settings.mode);
    let mut goals = Vec::new();
    let mut last_scorer: Option<Team> = None;
    let mut wall_secs = 0.0;

    let gap_hi = (settings.mean_goal_gap * 2.0).max(2.0);
    let streak = clamp_prob(settings.streakiness);
    let red_bias = clamp_prob(settings.red_bias);

    for period in 1..=state.max_periods {
        state.period = period;
        state.clock = state.period_length;
        if period > 1 {
            wall_secs += INTERMISSION_SECS;
        }

        loop {
            let gap = rng.gen_range(1.0..gap_hi);
            if gap > state.clock {
                wall_secs += state.clock;
                state.clock = 0.0;
                break;
            }
            state.clock -= gap;
            wall_secs += gap;

            let team = match last_scorer {
                Some(prev) if rng.gen_bool(streak) => prev,
                Some(prev) => prev.opponent(),
                None if rng.gen_bool(red_bias) => Team::Red,
                None => Team::Blue,
            };
            state.score = state.score.with_goal(team);
            last_scorer = Some(team);
            goals.push(SimulatedGoal {
                team,
                state: state.clone(),
                at: start + Duration::milliseconds((wall_secs * 1000.0) as i64),
            });
        }
    }

    SimulatedGame {
        goals,
        final_state: state,
    }
}

pub fn final_score(game: &SimulatedGame) -> Score {
    game.final_state.score
}

fn clamp_prob(p: f64) -> f64 {
    if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.5 }
}
