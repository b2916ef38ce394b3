use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rink_analytics::model::{GameMode, GameState, Score, Team};
use rink_analytics::sim_feed::{self, SimSettings};
use rink_analytics::store::{AnalyticsStore, MemoryStore, SqliteStore};
use rink_analytics::{AnalysisRecord, AnalyticsConfig, GameAnalytics};

#[derive(Debug, serde::Deserialize)]
struct ReplayLog {
    game_id: u64,
    #[serde(default = "default_mode")]
    mode: GameMode,
    #[serde(default)]
    period_length: Option<f64>,
    goals: Vec<ReplayGoal>,
}

#[derive(Debug, serde::Deserialize)]
struct ReplayGoal {
    team: Team,
    period: u32,
    clock: f64,
    score: Score,
    /// Wall seconds since the start of the game.
    at_secs: f64,
}

fn default_mode() -> GameMode {
    GameMode::Classic
}

struct ReplayStep {
    team: Team,
    state: GameState,
    at: DateTime<Utc>,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_logging();

    let config = AnalyticsConfig::from_env().context("load analytics config")?;
    let start = Utc::now();

    let steps = match arg_value("--goals") {
        Some(path) => load_log(&PathBuf::from(path), start)?,
        None => {
            let settings = SimSettings {
                seed: arg_value("--seed")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(7),
                game_id: arg_value("--game-id")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1),
                ..SimSettings::default()
            };
            info!(seed = settings.seed, game_id = settings.game_id, "simulating game");
            sim_feed::simulate_game(&settings, start)
                .goals
                .into_iter()
                .map(|g| ReplayStep {
                    team: g.team,
                    state: g.state,
                    at: g.at,
                })
                .collect()
        }
    };

    let db_path = arg_value("--db")
        .or_else(|| std::env::var("ANALYTICS_DB").ok())
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);

    match db_path {
        Some(path) => {
            let mut store = SqliteStore::open(&path)?;
            if let Some(game_id) = steps.first().map(|s| s.state.game_id) {
                let removed = store.clear_game(game_id)?;
                if removed > 0 {
                    info!(game_id, removed, "cleared earlier replay of this game");
                }
            }
            let mut engine = replay(GameAnalytics::new(store, config)?, &steps)?;
            if let Some(last) = steps.last() {
                engine
                    .store_mut()
                    .record_game_result(last.state.game_id, last.state.score)?;
                println!("DB: {}", path.display());
            }
        }
        None => {
            replay(GameAnalytics::new(MemoryStore::new(), config)?, &steps)?;
        }
    }

    Ok(())
}

fn replay<S: AnalyticsStore + 'static>(
    mut engine: GameAnalytics<S>,
    steps: &[ReplayStep],
) -> Result<GameAnalytics<S>> {
    if steps.is_empty() {
        return Err(anyhow!("no goals to replay"));
    }

    for step in steps {
        let record = engine.record_goal_at(step.team, &step.state, step.at)?;
        print_step(step, &record);
    }

    let summary = engine
        .analytics_summary()?
        .context("no game state after replay")?;
    println!("{}", serde_json::to_string_pretty(&summary.game_stats)?);
    engine.cleanup();
    Ok(engine)
}

fn print_step(step: &ReplayStep, record: &AnalysisRecord) {
    let momentum = &record.momentum.current_state;
    println!(
        "P{} {:>5.1}s {:<4} {}-{} | red {:>5.1}% ({:?}) | momentum {:+6.1} {:?}{}",
        step.state.period,
        step.state.clock,
        step.team.as_str(),
        step.state.score.red,
        step.state.score.blue,
        record.win_probability.red * 100.0,
        record.win_probability.tier,
        momentum.score,
        momentum.intensity,
        if record.is_critical_moment {
            " [critical]"
        } else {
            ""
        }
    );
}

fn load_log(path: &PathBuf, start: DateTime<Utc>) -> Result<Vec<ReplayStep>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read goal log {}", path.display()))?;
    let log: ReplayLog = serde_json::from_str(&raw).context("parse goal log")?;

    let mut base = GameState::kickoff(log.game_id, log.mode);
    if let Some(len) = log.period_length {
        base.period_length = len;
    }
    Ok(log
        .goals
        .into_iter()
        .map(|g| ReplayStep {
            team: g.team,
            state: GameState {
                score: g.score,
                period: g.period,
                clock: g.clock,
                ..base.clone()
            },
            at: start + Duration::milliseconds((g.at_secs * 1000.0) as i64),
        })
        .collect())
}

fn arg_value(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.clone());
        }
    }
    None
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rink_analytics=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
