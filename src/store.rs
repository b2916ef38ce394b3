use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::coordinator::AnalysisRecord;
use crate::error::{AnalyticsError, Result};
use crate::model::{GoalEvent, Score, Team};

/// Persistence collaborator for the analytics engine.
///
/// The engine only reads and writes through this trait; schema and durability
/// belong to the implementation.
pub trait AnalyticsStore {
    fn save_analysis(&mut self, game_id: u64, record: &AnalysisRecord) -> Result<()>;

    fn record_goal(&mut self, game_id: u64, goal: &GoalEvent) -> Result<()>;

    /// Goals of `game_id` within `window_secs` of that game's latest goal.
    fn recent_goals(&self, game_id: u64, window_secs: f64) -> Result<Vec<GoalEvent>>;

    fn historical_summary(&self) -> Result<HistoricalSummary>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SituationOutcome {
    /// Red minus blue right after a goal.
    pub score_diff: i32,
    pub period: u32,
    pub samples: u64,
    pub red_wins: u64,
    pub draws: u64,
}

impl SituationOutcome {
    pub fn red_win_rate(&self) -> f64 {
        if self.samples == 0 {
            return 0.5;
        }
        (self.red_wins as f64 + 0.5 * self.draws as f64) / self.samples as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSummary {
    pub total_games: u64,
    pub red_wins: u64,
    pub blue_wins: u64,
    pub situations: Vec<SituationOutcome>,
}

fn summarize(goals: &HashMap<u64, Vec<GoalEvent>>, results: &HashMap<u64, Score>) -> HistoricalSummary {
    let mut out = HistoricalSummary {
        total_games: results.len() as u64,
        ..HistoricalSummary::default()
    };
    let mut situations: BTreeMap<(i32, u32), SituationOutcome> = BTreeMap::new();

    for (game_id, final_score) in results {
        match final_score.leader() {
            Some(Team::Red) => out.red_wins += 1,
            Some(Team::Blue) => out.blue_wins += 1,
            None => {}
        }
        let Some(game_goals) = goals.get(game_id) else {
            continue;
        };
        for goal in game_goals {
            let diff = goal.score_after.differential();
            let entry = situations
                .entry((diff, goal.period))
                .or_insert_with(|| SituationOutcome {
                    score_diff: diff,
                    period: goal.period,
                    samples: 0,
                    red_wins: 0,
                    draws: 0,
                });
            entry.samples += 1;
            match final_score.leader() {
                Some(Team::Red) => entry.red_wins += 1,
                None => entry.draws += 1,
                Some(Team::Blue) => {}
            }
        }
    }

    out.situations = situations.into_values().collect();
    out
}

fn within_window(mut goals: Vec<GoalEvent>, window_secs: f64) -> Vec<GoalEvent> {
    goals.sort_by_key(|g| g.timestamp);
    let Some(latest) = goals.last().map(|g| g.timestamp) else {
        return goals;
    };
    goals
        .into_iter()
        .filter(|g| seconds_between(g.timestamp, latest) <= window_secs)
        .collect()
}

pub(crate) fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

/// In-process store. Keeps everything in memory; handy for tests, demos and
/// hosts that run without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Vec<(u64, AnalysisRecord)>,
    goals: HashMap<u64, Vec<GoalEvent>>,
    results: HashMap<u64, Score>,
    preset_summary: Option<HistoricalSummary>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that reports `summary` instead of deriving one from recorded games.
    pub fn with_historical_summary(summary: HistoricalSummary) -> Self {
        Self {
            preset_summary: Some(summary),
            ..Self::default()
        }
    }

    pub fn record_game_result(&mut self, game_id: u64, final_score: Score) {
        self.results.insert(game_id, final_score);
    }

    pub fn snapshots(&self) -> &[(u64, AnalysisRecord)] {
        &self.snapshots
    }

    pub fn goals_for(&self, game_id: u64) -> &[GoalEvent] {
        self.goals.get(&game_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl AnalyticsStore for MemoryStore {
    fn save_analysis(&mut self, game_id: u64, record: &AnalysisRecord) -> Result<()> {
        self.snapshots.push((game_id, record.clone()));
        Ok(())
    }

    fn record_goal(&mut self, game_id: u64, goal: &GoalEvent) -> Result<()> {
        self.goals.entry(game_id).or_default().push(goal.clone());
        Ok(())
    }

    fn recent_goals(&self, game_id: u64, window_secs: f64) -> Result<Vec<GoalEvent>> {
        Ok(within_window(self.goals_for(game_id).to_vec(), window_secs))
    }

    fn historical_summary(&self) -> Result<HistoricalSummary> {
        if let Some(summary) = &self.preset_summary {
            return Ok(summary.clone());
        }
        Ok(summarize(&self.goals, &self.results))
    }
}

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn record_game_result(&mut self, game_id: u64, final_score: Score) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO game_results (game_id, score_red, score_blue, finished_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(game_id) DO UPDATE SET
                score_red = excluded.score_red,
                score_blue = excluded.score_blue,
                finished_at = excluded.finished_at
            "#,
            params![
                game_id as i64,
                final_score.red,
                final_score.blue,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Drop everything stored for `game_id`, so a replay starts from scratch.
    pub fn clear_game(&mut self, game_id: u64) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        for table in ["goal_events", "analysis_snapshots", "game_results"] {
            removed += tx.execute(
                &format!("DELETE FROM {table} WHERE game_id = ?1"),
                params![game_id as i64],
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    pub fn snapshot_count(&self, game_id: u64) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM analysis_snapshots WHERE game_id = ?1",
            params![game_id as i64],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn latest_snapshot(&self, game_id: u64) -> Result<Option<AnalysisRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM analysis_snapshots WHERE game_id = ?1 ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![game_id as i64])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let payload: String = row.get(0)?;
        Ok(Some(serde_json::from_str(&payload)?))
    }

    fn all_goals(&self) -> Result<HashMap<u64, Vec<GoalEvent>>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT game_id, team, period, time_remaining, score_red, score_blue,
                   created_at, time_since_last
            FROM goal_events
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            let game_id: i64 = row.get(0)?;
            Ok((game_id as u64, read_goal_row(row)?))
        })?;
        let mut out: HashMap<u64, Vec<GoalEvent>> = HashMap::new();
        for row in rows {
            let (game_id, raw) = row?;
            out.entry(game_id).or_default().push(raw.into_goal()?);
        }
        Ok(out)
    }

    fn all_results(&self) -> Result<HashMap<u64, Score>> {
        let mut stmt = self
            .conn
            .prepare("SELECT game_id, score_red, score_blue FROM game_results")?;
        let rows = stmt.query_map([], |row| {
            let game_id: i64 = row.get(0)?;
            Ok((game_id as u64, Score::new(row.get(1)?, row.get(2)?)))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (id, score) = row?;
            out.insert(id, score);
        }
        Ok(out)
    }
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS goal_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id INTEGER NOT NULL,
            team TEXT NOT NULL,
            period INTEGER NOT NULL,
            time_remaining REAL NOT NULL,
            score_red INTEGER NOT NULL,
            score_blue INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            time_since_last REAL NULL
        );
        CREATE INDEX IF NOT EXISTS idx_goal_events_game ON goal_events(game_id);

        CREATE TABLE IF NOT EXISTS analysis_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            payload TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_snapshots_game ON analysis_snapshots(game_id);

        CREATE TABLE IF NOT EXISTS game_results (
            game_id INTEGER PRIMARY KEY,
            score_red INTEGER NOT NULL,
            score_blue INTEGER NOT NULL,
            finished_at TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

struct GoalRow {
    team: String,
    period: u32,
    time_remaining: f64,
    score_red: u32,
    score_blue: u32,
    created_at: String,
    time_since_last: Option<f64>,
}

fn read_goal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GoalRow> {
    Ok(GoalRow {
        team: row.get(1)?,
        period: row.get(2)?,
        time_remaining: row.get(3)?,
        score_red: row.get(4)?,
        score_blue: row.get(5)?,
        created_at: row.get(6)?,
        time_since_last: row.get(7)?,
    })
}

impl GoalRow {
    fn into_goal(self) -> Result<GoalEvent> {
        let team = match self.team.as_str() {
            "red" => Team::Red,
            "blue" => Team::Blue,
            other => {
                return Err(AnalyticsError::Storage(format!(
                    "unknown team {other:?} in goal_events"
                )));
            }
        };
        let timestamp = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|err| {
                AnalyticsError::Storage(format!("bad timestamp {:?}: {err}", self.created_at))
            })?
            .with_timezone(&Utc);
        Ok(GoalEvent {
            time: self.time_remaining,
            period: self.period,
            team,
            score_after: Score::new(self.score_red, self.score_blue),
            timestamp,
            time_since_last: self.time_since_last,
        })
    }
}

impl AnalyticsStore for SqliteStore {
    fn save_analysis(&mut self, game_id: u64, record: &AnalysisRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        self.conn.execute(
            "INSERT INTO analysis_snapshots (game_id, created_at, payload) VALUES (?1, ?2, ?3)",
            params![game_id as i64, record.timestamp.to_rfc3339(), payload],
        )?;
        Ok(())
    }

    fn record_goal(&mut self, game_id: u64, goal: &GoalEvent) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO goal_events (
                game_id, team, period, time_remaining, score_red, score_blue,
                created_at, time_since_last
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                game_id as i64,
                goal.team.as_str(),
                goal.period,
                goal.time,
                goal.score_after.red,
                goal.score_after.blue,
                goal.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
                goal.time_since_last,
            ],
        )?;
        Ok(())
    }

    fn recent_goals(&self, game_id: u64, window_secs: f64) -> Result<Vec<GoalEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT game_id, team, period, time_remaining, score_red, score_blue,
                   created_at, time_since_last
            FROM goal_events
            WHERE game_id = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![game_id as i64], read_goal_row)?;
        let mut goals = Vec::new();
        for row in rows {
            goals.push(row?.into_goal()?);
        }
        Ok(within_window(goals, window_secs))
    }

    fn historical_summary(&self) -> Result<HistoricalSummary> {
        Ok(summarize(&self.all_goals()?, &self.all_results()?))
    }
}
