//! End-to-end tests for detector sessions.

use chrono::Utc;
use sensor_trust_agent::bus::EventLog;
use sensor_trust_agent::core::{ManualClock, PollTiming};
use sensor_trust_agent::detector::types::{
    BluetoothSighting, InboundEvent, MotionSample, Permission,
};
use sensor_trust_agent::detector::MotionDetector;
use sensor_trust_agent::platform::{
    CountingRadio, HandoffLog, Platform, PreferenceStore, StaticCapabilities, SwitchableNetwork,
};
use sensor_trust_agent::{
    record, BusEvent, Config, Detector, DetectorState, DetectorType, EventBus, Record,
    SensorAgent, SensorEvent, SessionContext, SessionFile, SessionMode,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const MS: u64 = 1_000_000;

fn test_dir() -> PathBuf {
    std::env::temp_dir().join(format!("sensor-trust-test-{}", uuid::Uuid::new_v4()))
}

fn platform(capabilities: StaticCapabilities, sink: Arc<HandoffLog>) -> Platform {
    Platform {
        capabilities: Arc::new(capabilities),
        network: Arc::new(SwitchableNetwork::default()),
        radio: Arc::new(CountingRadio::default()),
        store: Arc::new(PreferenceStore::in_memory()),
        sink,
    }
}

fn agent(config: Config, capabilities: StaticCapabilities) -> (SensorAgent, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let agent = SensorAgent::new(config, platform(capabilities, Arc::new(HandoffLog::new())))
        .with_manual_clock(clock.clone());
    agent.authorize_gathering("owner-7");
    (agent, clock)
}

fn motion(timestamp_nanos: u64) -> SensorEvent {
    SensorEvent::Motion(MotionSample {
        timestamp_nanos,
        x: 0.1,
        y: 0.2,
        z: 9.7,
    })
}

#[test]
fn test_partial_capability_disables_exactly_one_detector() {
    let dir = test_dir();
    let config = Config {
        data_path: dir.clone(),
        ..Config::default()
    };
    let (mut agent, _clock) = agent(config, StaticCapabilities::all().deny_permission(Permission::Camera));

    let listening = agent.start_session(SessionMode::Gather).unwrap();
    let states = agent.detector_states();
    assert_eq!(listening, states.len() - 1);
    for (detector, state) in states {
        if detector == DetectorType::Image {
            assert_eq!(state, DetectorState::Disabled);
        } else {
            assert_eq!(state, DetectorState::Listening, "{detector} should listen");
        }
    }

    agent.stop_session().unwrap();
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_threshold_appends_exactly_one_batch() {
    let dir = test_dir();
    let mut config = Config {
        data_path: dir.clone(),
        ..Config::default()
    };
    config.flush_overrides.insert(DetectorType::Accelerometer, 5);
    let (mut agent, _clock) = agent(config, StaticCapabilities::all());
    agent.start_session(SessionMode::Gather).unwrap();

    let file = SessionFile::new(&dir.join("sessions"), DetectorType::Accelerometer, "owner-7");
    for i in 0..4 {
        agent
            .deliver(DetectorType::Accelerometer, motion(i * 50 * MS))
            .unwrap();
    }
    assert_eq!(file.line_count().unwrap(), 0);

    agent
        .deliver(DetectorType::Accelerometer, motion(200 * MS))
        .unwrap();
    assert_eq!(file.line_count().unwrap(), 5);

    // A gated sample adds nothing.
    agent
        .deliver(DetectorType::Accelerometer, motion(201 * MS))
        .unwrap();
    agent.stop_session().unwrap();
    assert_eq!(file.line_count().unwrap(), 5);
    assert_eq!(agent.stats().stats().events_dropped, 1);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_stop_twice_publishes_one_status_event() {
    let dir = test_dir();
    let config = Config {
        data_path: dir.clone(),
        ..Config::default()
    };
    let clock = Arc::new(ManualClock::new(0));
    let ctx = SessionContext::new(
        Arc::new(config),
        platform(StaticCapabilities::all(), Arc::new(HandoffLog::new())),
        "owner-7",
        SessionMode::Gather,
        clock,
    );
    let log = Arc::new(EventLog::new());
    ctx.bus.subscribe(log.clone());

    let mut detector = MotionDetector::accelerometer(&ctx);
    assert!(detector.start_listening());
    detector.on_event(motion(0));
    log.clear();

    detector.stop_listening();
    detector.stop_listening();

    assert_eq!(detector.base().flush_count(), 1);
    assert_eq!(
        log.events(),
        vec![BusEvent::Status {
            detector: DetectorType::Accelerometer,
            state: DetectorState::Idle
        }]
    );
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_polled_window_closes_on_cadence() {
    let dir = test_dir();
    let mut config = Config {
        data_path: dir.clone(),
        ..Config::default()
    };
    config.sources = sensor_trust_agent::SourceConfig::from_csv("bluetooth");
    config.polling.bluetooth = PollTiming::new(4000, 4000);
    let (mut agent, clock) = agent(config, StaticCapabilities::all());
    agent.start_session(SessionMode::Authenticate).unwrap();

    assert_eq!(agent.pump(), Some(4000));
    agent
        .deliver(
            DetectorType::Bluetooth,
            SensorEvent::Bluetooth(BluetoothSighting {
                observed_at: Utc::now(),
                address: "AA:BB:CC:DD:EE:FF".into(),
                rssi: -55,
            }),
        )
        .unwrap();

    let file = SessionFile::new(&dir.join("sessions"), DetectorType::Bluetooth, "owner-7");
    clock.set(3999);
    agent.pump();
    assert_eq!(file.line_count().unwrap(), 0);

    clock.set(4000);
    assert_eq!(agent.pump(), Some(4000));
    assert_eq!(file.line_count().unwrap(), 1);

    agent.stop_session().unwrap();
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_jsonl_events_drive_a_session() {
    let dir = test_dir();
    let config = Config {
        data_path: dir.clone(),
        motion_interval: Duration::from_millis(15),
        ..Config::default()
    };
    let (mut agent, _clock) = agent(config, StaticCapabilities::all());
    agent.start_session(SessionMode::Gather).unwrap();

    let lines = [
        r#"{"detector":"gyroscope","kind":"motion","timestamp_nanos":0,"x":1.0,"y":2.0,"z":3.0}"#,
        r#"{"detector":"gyroscope","kind":"motion","timestamp_nanos":10000000,"x":1.0,"y":2.0,"z":3.0}"#,
        r#"{"detector":"gyroscope","kind":"motion","timestamp_nanos":20000000,"x":1.0,"y":2.0,"z":3.0}"#,
    ];
    for line in lines {
        let inbound: InboundEvent = serde_json::from_str(line).unwrap();
        agent.deliver(inbound.detector, inbound.event).unwrap();
    }
    let finished = agent.stop_session().unwrap();

    let gyro = finished
        .iter()
        .find(|f| f.detector == DetectorType::Gyroscope)
        .expect("gyroscope file");
    let content = std::fs::read_to_string(&gyro.path).unwrap();
    assert_eq!(content.lines().count(), 2);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_persisted_record_round_trip() {
    let dir = test_dir();
    let file = SessionFile::new(&dir, DetectorType::MetaData, "owner-7");
    let original: Record = record![1_700_000_000_123i64, -3.25, "wifi toggled", "", 0.1];
    file.append(std::slice::from_ref(&original)).unwrap();

    assert_eq!(file.read_records().unwrap(), vec![original]);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_publish_without_subscribers_returns_normally() {
    let bus = EventBus::new();
    let delivered = bus.publish(BusEvent::Status {
        detector: DetectorType::Location,
        state: DetectorState::Listening,
    });
    assert_eq!(delivered, 0);
}
