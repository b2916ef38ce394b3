use chrono::Utc;
use serde_json::json;

use rink_analytics::error::AnalyticsError;
use rink_analytics::events::{EventDispatcher, SensorData, SensorKind, SensorPayload};
use rink_analytics::model::{GoalEvent, Possession, Score, Team};

#[derive(Default)]
struct Log {
    seen: Vec<String>,
}

fn dispatcher_for(kind: SensorKind) -> EventDispatcher<Log> {
    let mut d = EventDispatcher::new();
    d.register_handler(kind, |log: &mut Log, event| {
        log.seen.push(format!("first:{:?}", event.data));
        Ok(())
    });
    d.register_handler(kind, |log: &mut Log, _| {
        log.seen.push("second".to_string());
        Ok(())
    });
    d
}

#[test]
fn handlers_run_in_registration_order() {
    let mut d = dispatcher_for(SensorKind::Possession);
    let mut log = Log::default();
    let out = d
        .process_sensor_data(
            &mut log,
            SensorKind::Possession,
            SensorPayload::Json(json!("in_play")),
        )
        .unwrap();
    assert_eq!(out.handled, 2);
    assert_eq!(
        log.seen,
        vec![
            format!("first:{:?}", SensorData::Possession(Possession::InPlay)),
            "second".to_string()
        ]
    );
}

#[test]
fn json_goal_is_decoded_and_validated() {
    let goal = GoalEvent::new(88.0, 2, Team::Blue, Score::new(0, 1), Utc::now())
        .with_time_since_last(Some(12.5));
    let mut d: EventDispatcher<Vec<GoalEvent>> = EventDispatcher::new();
    d.register_handler(SensorKind::Goals, |goals: &mut Vec<GoalEvent>, event| {
        if let SensorData::Goal(g) = &event.data {
            goals.push(g.clone());
        }
        Ok(())
    });

    let mut goals = Vec::new();
    let payload = SensorPayload::Json(serde_json::to_value(&goal).unwrap());
    d.process_sensor_data(&mut goals, SensorKind::Goals, payload)
        .unwrap();
    assert_eq!(goals, vec![goal]);

    let bad = json!({
        "time": -3.0,
        "period": 1,
        "team": "red",
        "score_after": {"red": 1, "blue": 0},
        "timestamp": "2024-03-01T12:00:00Z"
    });
    let err = d
        .process_sensor_data(&mut goals, SensorKind::Goals, SensorPayload::Json(bad))
        .unwrap_err();
    match err {
        AnalyticsError::InvalidSensorData { kind, source } => {
            assert_eq!(kind, SensorKind::Goals);
            assert!(matches!(*source, AnalyticsError::InvalidGoal(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(goals.len(), 1);
}

#[test]
fn time_must_be_a_non_negative_number() {
    let mut d = dispatcher_for(SensorKind::Time);
    let mut log = Log::default();
    for payload in [
        SensorPayload::Time(-1.0),
        SensorPayload::Time(f64::INFINITY),
        SensorPayload::Json(json!("soon")),
    ] {
        let err = d
            .process_sensor_data(&mut log, SensorKind::Time, payload)
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidSensorData { .. }));
    }
    assert!(log.seen.is_empty());

    d.process_sensor_data(&mut log, SensorKind::Time, SensorPayload::Json(json!(30)))
        .unwrap();
    assert_eq!(log.seen.len(), 2);
}

#[test]
fn raw_kinds_accept_any_json() {
    let mut d = dispatcher_for(SensorKind::PlayerPositions);
    let mut log = Log::default();
    d.process_sensor_data(
        &mut log,
        SensorKind::PlayerPositions,
        SensorPayload::Json(json!({"red": [[1, 2]], "blue": []})),
    )
    .unwrap();
    assert_eq!(log.seen.len(), 2);

    let err = d
        .process_sensor_data(
            &mut log,
            SensorKind::Shots,
            SensorPayload::Possession(Possession::Red),
        )
        .unwrap_err();
    assert!(err.to_string().contains("shots"));
}

#[test]
fn no_handlers_is_not_an_error() {
    let mut d: EventDispatcher<Log> = EventDispatcher::new();
    let mut log = Log::default();
    let out = d
        .process_sensor_data(&mut log, SensorKind::Shots, SensorPayload::Json(json!(1)))
        .unwrap();
    assert_eq!(out.handled + out.failed, 0);
}
