pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod model;
pub mod momentum;
pub mod patterns;
pub mod probability;
pub mod sim_feed;
pub mod store;

pub use config::AnalyticsConfig;
pub use coordinator::{AnalysisRecord, AnalyticsSummary, GameAnalytics, GameStats};
pub use error::{AnalyticsError, Result};
pub use model::{GameMode, GameState, GoalEvent, Possession, Score, Team};
pub use store::{AnalyticsStore, MemoryStore, SqliteStore};
