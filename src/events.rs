use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::error::{AnalyticsError, Result};
use crate::model::{GoalEvent, Possession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Goals,
    Time,
    Possession,
    Shots,
    PlayerPositions,
}

impl SensorKind {
    pub const ALL: [SensorKind; 5] = [
        SensorKind::Goals,
        SensorKind::Time,
        SensorKind::Possession,
        SensorKind::Shots,
        SensorKind::PlayerPositions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Goals => "goals",
            SensorKind::Time => "time",
            SensorKind::Possession => "possession",
            SensorKind::Shots => "shots",
            SensorKind::PlayerPositions => "player_positions",
        }
    }

    fn slot(self) -> usize {
        match self {
            SensorKind::Goals => 0,
            SensorKind::Time => 1,
            SensorKind::Possession => 2,
            SensorKind::Shots => 3,
            SensorKind::PlayerPositions => 4,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data as handed to the dispatcher: already typed, or raw JSON off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorPayload {
    Goal(GoalEvent),
    Time(f64),
    Possession(Possession),
    Json(Value),
}

impl SensorPayload {
    fn label(&self) -> &'static str {
        match self {
            SensorPayload::Goal(_) => "goal",
            SensorPayload::Time(_) => "time",
            SensorPayload::Possession(_) => "possession",
            SensorPayload::Json(_) => "json",
        }
    }
}

/// Validated data delivered to handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorData {
    Goal(GoalEvent),
    Time(f64),
    Possession(Possession),
    Raw(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsEvent {
    pub kind: SensorKind,
    pub data: SensorData,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub handled: usize,
    pub failed: usize,
}

pub type Handler<C> = Box<dyn FnMut(&mut C, &AnalyticsEvent) -> Result<()>>;

/// Sensor-kind keyed observer table.
///
/// Handlers receive a `&mut C` supplied at dispatch time, so they can update
/// analyzers without sharing them through interior mutability.
pub struct EventDispatcher<C> {
    handlers: [Vec<(HandlerId, Handler<C>)>; 5],
    next_id: u64,
}

impl<C> Default for EventDispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> EventDispatcher<C> {
    pub fn new() -> Self {
        Self {
            handlers: std::array::from_fn(|_| Vec::new()),
            next_id: 0,
        }
    }

    pub fn register_handler<F>(&mut self, kind: SensorKind, handler: F) -> HandlerId
    where
        F: FnMut(&mut C, &AnalyticsEvent) -> Result<()> + 'static,
    {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers[kind.slot()].push((id, Box::new(handler)));
        info!(kind = %kind, "registered handler");
        id
    }

    pub fn unregister_handler(&mut self, kind: SensorKind, id: HandlerId) -> bool {
        let list = &mut self.handlers[kind.slot()];
        let before = list.len();
        list.retain(|(hid, _)| *hid != id);
        let removed = list.len() != before;
        if removed {
            info!(kind = %kind, "unregistered handler");
        }
        removed
    }

    pub fn handler_count(&self, kind: SensorKind) -> usize {
        self.handlers[kind.slot()].len()
    }

    pub fn clear_handlers(&mut self, kind: Option<SensorKind>) {
        match kind {
            Some(kind) => {
                self.handlers[kind.slot()].clear();
                info!(kind = %kind, "cleared handlers");
            }
            None => {
                for list in &mut self.handlers {
                    list.clear();
                }
                info!("cleared all handlers");
            }
        }
    }

    /// Validate `payload` as `kind` data and hand it to every handler for
    /// that kind. A failing handler is logged and skipped.
    pub fn process_sensor_data(
        &mut self,
        ctx: &mut C,
        kind: SensorKind,
        payload: SensorPayload,
    ) -> Result<DispatchOutcome> {
        let data = match validate_payload(kind, payload) {
            Ok(data) => data,
            Err(cause) => {
                error!(kind = %kind, error = %cause, "rejecting sensor data");
                return Err(AnalyticsError::sensor(kind, cause));
            }
        };
        let event = AnalyticsEvent {
            kind,
            data,
            timestamp: Utc::now(),
        };

        let mut outcome = DispatchOutcome::default();
        for (id, handler) in self.handlers[kind.slot()].iter_mut() {
            match handler(&mut *ctx, &event) {
                Ok(()) => outcome.handled += 1,
                Err(err) => {
                    outcome.failed += 1;
                    error!(kind = %kind, handler = ?id, error = %err, "handler failed");
                }
            }
        }
        debug!(kind = %kind, handled = outcome.handled, failed = outcome.failed, "dispatched");
        Ok(outcome)
    }
}

fn validate_payload(kind: SensorKind, payload: SensorPayload) -> Result<SensorData> {
    match (kind, payload) {
        (SensorKind::Goals, SensorPayload::Goal(goal)) => {
            goal.validate()?;
            Ok(SensorData::Goal(goal))
        }
        (SensorKind::Goals, SensorPayload::Json(value)) => {
            let goal: GoalEvent = serde_json::from_value(value)?;
            goal.validate()?;
            Ok(SensorData::Goal(goal))
        }
        (SensorKind::Time, SensorPayload::Time(secs)) => check_time(secs),
        (SensorKind::Time, SensorPayload::Json(value)) => {
            let secs = value.as_f64().ok_or_else(|| {
                AnalyticsError::InvalidPayload(format!("time must be numeric, got {value}"))
            })?;
            check_time(secs)
        }
        (SensorKind::Possession, SensorPayload::Possession(p)) => Ok(SensorData::Possession(p)),
        (SensorKind::Possession, SensorPayload::Json(value)) => {
            Ok(SensorData::Possession(serde_json::from_value(value)?))
        }
        (SensorKind::Shots | SensorKind::PlayerPositions, SensorPayload::Json(value)) => {
            Ok(SensorData::Raw(value))
        }
        (expected, other) => Err(AnalyticsError::PayloadMismatch {
            expected,
            found: other.label(),
        }),
    }
}

fn check_time(secs: f64) -> Result<SensorData> {
    if secs.is_finite() && secs >= 0.0 {
        Ok(SensorData::Time(secs))
    } else {
        Err(AnalyticsError::InvalidPayload(format!(
            "time must be a non-negative number, got {secs}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Sink {
        times: Vec<f64>,
    }

    #[test]
    fn failing_handler_does_not_block_the_rest() {
        let mut d: EventDispatcher<Sink> = EventDispatcher::new();
        d.register_handler(SensorKind::Time, |_, _| {
            Err(AnalyticsError::Storage("boom".to_string()))
        });
        d.register_handler(SensorKind::Time, |sink, ev| {
            if let SensorData::Time(t) = ev.data {
                sink.times.push(t);
            }
            Ok(())
        });

        let mut sink = Sink::default();
        let out = d
            .process_sensor_data(&mut sink, SensorKind::Time, SensorPayload::Time(42.0))
            .unwrap();
        assert_eq!(out, DispatchOutcome { handled: 1, failed: 1 });
        assert_eq!(sink.times, vec![42.0]);
    }

    #[test]
    fn possession_outside_closed_set_is_rejected() {
        let mut d: EventDispatcher<Sink> = EventDispatcher::new();
        let mut sink = Sink::default();
        let err = d
            .process_sensor_data(
                &mut sink,
                SensorKind::Possession,
                SensorPayload::Json(json!("green")),
            )
            .unwrap_err();
        match err {
            AnalyticsError::InvalidSensorData { kind, source } => {
                assert_eq!(kind, SensorKind::Possession);
                assert!(matches!(*source, AnalyticsError::Json(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        let mut d: EventDispatcher<Sink> = EventDispatcher::new();
        let mut sink = Sink::default();
        let err = d
            .process_sensor_data(&mut sink, SensorKind::Goals, SensorPayload::Time(3.0))
            .unwrap_err();
        assert!(err.to_string().contains("goals"));
    }

    #[test]
    fn unregister_and_clear() {
        let mut d: EventDispatcher<Sink> = EventDispatcher::new();
        let a = d.register_handler(SensorKind::Shots, |_, _| Ok(()));
        d.register_handler(SensorKind::Shots, |_, _| Ok(()));
        d.register_handler(SensorKind::Time, |_, _| Ok(()));
        assert!(d.unregister_handler(SensorKind::Shots, a));
        assert!(!d.unregister_handler(SensorKind::Shots, a));
        assert_eq!(d.handler_count(SensorKind::Shots), 1);
        d.clear_handlers(Some(SensorKind::Shots));
        assert_eq!(d.handler_count(SensorKind::Shots), 0);
        assert_eq!(d.handler_count(SensorKind::Time), 1);
        d.clear_handlers(None);
        assert!(SensorKind::ALL.iter().all(|k| d.handler_count(*k) == 0));
    }
}
