//! End-to-end session behaviour over a scripted channel.

use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use flowmeter_core::handshake::PROBE_FRAME;
use flowmeter_core::mocks::{ScriptHandle, ScriptedChannel, failing_connector, once_connector};
use flowmeter_core::{
    ConnectionState, ErrorKind, FlowError, HandshakeCfg, Sample, SessionConfig, SessionController,
    SessionEvent, SessionState,
};
use flowmeter_traits::ManualClock;

const WAIT: Duration = Duration::from_secs(3);
const EPS: f64 = 1e-9;

fn session_with(cfg: SessionConfig, ch: ScriptedChannel, clock: ManualClock) -> SessionController {
    SessionController::builder(cfg)
        .with_connector(once_connector(ch))
        .with_clock(clock)
        .build()
        .unwrap()
}

fn scripted(lines: &[&str]) -> (SessionController, ScriptHandle) {
    let clock = ManualClock::new();
    let ch = ScriptedChannel::new(clock.clone(), Duration::from_millis(100), lines.iter().copied());
    let handle = ch.handle();
    (
        session_with(SessionConfig::new("COM3", 9600), ch, clock),
        handle,
    )
}

fn next_sample(rx: &Receiver<SessionEvent>) -> Sample {
    let deadline = Instant::now() + WAIT;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(SessionEvent::Sample(s)) => return s,
            Ok(_) => {}
            Err(e) => panic!("no sample event: {e}"),
        }
    }
}

fn next_error(rx: &Receiver<SessionEvent>) -> (ErrorKind, String) {
    let deadline = Instant::now() + WAIT;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(SessionEvent::Error { kind, message }) => return (kind, message),
            Ok(_) => {}
            Err(e) => panic!("no error event: {e}"),
        }
    }
}

#[test]
fn three_readings_then_reply() {
    let (mut ctrl, handle) = scripted(&["1.0", "1.2", "1.1", "MJ"]);
    let rx = ctrl.subscribe();
    ctrl.connect().unwrap();
    assert_eq!(ctrl.state(), SessionState::Connected);
    ctrl.start().unwrap();
    assert_eq!(ctrl.state(), SessionState::Acquiring);

    let mut samples = Vec::new();
    loop {
        match rx.recv_timeout(WAIT).unwrap() {
            SessionEvent::Sample(s) => samples.push(s),
            SessionEvent::Connected {
                port_name,
                baud_rate,
            } => {
                assert_eq!(port_name, "COM3");
                assert_eq!(baud_rate, 9600);
                break;
            }
            SessionEvent::Error { kind, message } => panic!("{kind}: {message}"),
        }
    }
    assert_eq!(samples.len(), 3, "all readings arrive before the reply");
    assert_eq!(ctrl.connection_state(), ConnectionState::Confirmed);

    let times: Vec<u64> = samples.iter().map(|s| s.time).collect();
    assert_eq!(times, vec![0, 100, 200]);
    let expect = [(0.0, 0.0, 0.0), (2.0, 2.0, 1.0), (-1.0, -1.0, 1.0 / 3.0)];
    for (s, (flow, median, avg)) in samples.iter().zip(expect) {
        assert!((s.flow_per_second - flow).abs() < EPS, "{s:?}");
        assert!((s.flow_median_filtered - median).abs() < EPS, "{s:?}");
        assert!((s.flow_average - avg).abs() < EPS, "{s:?}");
    }

    let summary = ctrl.stop().unwrap();
    assert_eq!(ctrl.state(), SessionState::Stopped);
    assert_eq!(summary.samples, 3);
    assert!((summary.max_flow_average - 1.0).abs() < EPS);
    assert_eq!(summary.last_mass, 1.1);
    assert_eq!(ctrl.summary(), Some(summary));
    assert_eq!(ctrl.connection_state(), ConnectionState::Disconnected);
    assert!(handle.is_closed());
    assert_eq!(handle.writes_of(&PROBE_FRAME), 1);
}

#[test]
fn invalid_transitions_leave_state_untouched() {
    let (mut ctrl, _handle) = scripted(&[]);
    assert!(matches!(
        ctrl.start(),
        Err(FlowError::InvalidTransition {
            op: "start",
            state: SessionState::Idle
        })
    ));
    assert!(matches!(
        ctrl.stop(),
        Err(FlowError::InvalidTransition { op: "stop", .. })
    ));
    assert_eq!(ctrl.state(), SessionState::Idle);

    ctrl.connect().unwrap();
    ctrl.start().unwrap();
    assert!(matches!(
        ctrl.start(),
        Err(FlowError::InvalidTransition {
            state: SessionState::Acquiring,
            ..
        })
    ));
    assert!(matches!(
        ctrl.connect(),
        Err(FlowError::InvalidTransition { op: "connect", .. })
    ));
    assert_eq!(ctrl.state(), SessionState::Acquiring);
    ctrl.stop().unwrap();
}

#[test]
fn open_failure_returns_to_idle_and_reports() {
    let mut ctrl = SessionController::builder(SessionConfig::new("COM9", 9600))
        .with_connector(failing_connector("no such port"))
        .with_clock(ManualClock::new())
        .build()
        .unwrap();
    let rx = ctrl.subscribe();
    let err = ctrl.connect().unwrap_err();
    assert!(matches!(err, FlowError::OpenFailed(_)));
    assert_eq!(ctrl.state(), SessionState::Idle);
    let (kind, message) = next_error(&rx);
    assert_eq!(kind, ErrorKind::OpenFailed);
    assert!(message.contains("no such port"));
}

#[test]
fn clear_then_one_sample_restarts_time() {
    let (mut ctrl, handle) = scripted(&["1.0", "2.0"]);
    let rx = ctrl.subscribe();
    ctrl.connect().unwrap();
    ctrl.start().unwrap();
    next_sample(&rx);
    let second = next_sample(&rx);
    assert_eq!(second.time, 100);

    ctrl.clear();
    assert!(ctrl.history().read().unwrap().is_empty());
    let _ = rx.try_iter().count();

    handle.push_line("5.0");
    let s = next_sample(&rx);
    assert_eq!(s.time, 0);
    assert_eq!(s.time_delta, 0);
    assert_eq!(s.delta, 5.0);
    assert_eq!(ctrl.history().read().unwrap().len(), 1);
    ctrl.stop().unwrap();
}

#[test]
fn clear_while_stopped_keeps_history_handle() {
    let (mut ctrl, _handle) = scripted(&["1.0", "2.0"]);
    let history = ctrl.history();
    let rx = ctrl.subscribe();
    ctrl.connect().unwrap();
    ctrl.start().unwrap();
    next_sample(&rx);
    next_sample(&rx);
    ctrl.stop().unwrap();
    assert_eq!(history.read().unwrap().len(), 2);

    ctrl.clear();
    assert!(history.read().unwrap().is_empty());
    assert_eq!(ctrl.state(), SessionState::Stopped);
}

#[test]
fn silent_device_exhausts_handshake_budget_once() {
    let clock = ManualClock::new();
    let ch = ScriptedChannel::new(clock.clone(), Duration::from_millis(100), Vec::<String>::new());
    let handle = ch.handle();
    let cfg = SessionConfig::new("COM3", 9600).with_handshake(HandshakeCfg {
        max_probes: 3,
        probe_interval_ms: 500,
    });
    let mut ctrl = session_with(cfg, ch, clock);
    let rx = ctrl.subscribe();
    ctrl.connect().unwrap();
    ctrl.start().unwrap();

    let (kind, message) = next_error(&rx);
    assert_eq!(kind, ErrorKind::HandshakeTimeout);
    assert!(message.contains("3 probes"), "{message}");
    assert_eq!(handle.writes_of(&PROBE_FRAME), 3);

    // Numeric lines are still acquired after giving up
    handle.push_line("4.0");
    let s = next_sample(&rx);
    assert_eq!(s.mass, 4.0);
    assert_eq!(handle.writes_of(&PROBE_FRAME), 3);
    assert!(
        rx.try_iter()
            .all(|e| !matches!(e, SessionEvent::Error { .. }))
    );
    ctrl.stop().unwrap();
}

#[test]
fn write_failures_are_reported_but_reading_continues() {
    let clock = ManualClock::new();
    let ch = ScriptedChannel::new(clock.clone(), Duration::from_millis(100), ["2.5"])
        .failing_writes();
    let mut ctrl = session_with(SessionConfig::new("COM3", 9600), ch, clock);
    let rx = ctrl.subscribe();
    ctrl.connect().unwrap();
    ctrl.start().unwrap();

    let (kind, _) = next_error(&rx);
    assert_eq!(kind, ErrorKind::WriteFailed);
    assert_eq!(next_sample(&rx).mass, 2.5);
    assert_eq!(ctrl.connection_state(), ConnectionState::Disconnected);
    ctrl.stop().unwrap();
}

#[test]
fn device_vanishing_ends_the_reader() {
    let (mut ctrl, handle) = scripted(&["MJ", "1.0"]);
    let rx = ctrl.subscribe();
    ctrl.connect().unwrap();
    ctrl.start().unwrap();
    next_sample(&rx);

    handle.close();
    let (kind, _) = next_error(&rx);
    assert_eq!(kind, ErrorKind::Closed);
    let deadline = Instant::now() + WAIT;
    while !ctrl.reader_finished() {
        assert!(Instant::now() < deadline, "reader did not exit");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(ctrl.connection_state(), ConnectionState::Disconnected);
    assert_eq!(ctrl.state(), SessionState::Stopped);
    assert!(!ctrl.is_acquiring());
    let summary = ctrl.stop().unwrap();
    assert_eq!(summary.samples, 1);
}

#[test]
fn reconnect_after_device_loss_reaps_the_reader() {
    let (mut ctrl, handle) = scripted(&["MJ", "1.0"]);
    let rx = ctrl.subscribe();
    ctrl.connect().unwrap();
    ctrl.start().unwrap();
    next_sample(&rx);
    handle.close();
    let deadline = Instant::now() + WAIT;
    while !ctrl.reader_finished() {
        assert!(Instant::now() < deadline, "reader did not exit");
        std::thread::sleep(Duration::from_millis(5));
    }
    // The one-shot connector has nothing left, so the reopen fails cleanly
    assert!(matches!(ctrl.connect(), Err(FlowError::OpenFailed(_))));
    assert_eq!(ctrl.state(), SessionState::Idle);
    assert_eq!(ctrl.summary().map(|s| s.samples), Some(1));
}

#[test]
fn stop_returns_promptly() {
    let (mut ctrl, _handle) = scripted(&[]);
    ctrl.connect().unwrap();
    ctrl.start().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let t0 = Instant::now();
    ctrl.stop().unwrap();
    assert!(t0.elapsed() < Duration::from_millis(2000));
}

#[test]
fn offset_trails_first_flowing_sample() {
    let clock = ManualClock::new();
    let ch = ScriptedChannel::new(
        clock.clone(),
        Duration::from_millis(100),
        ["1.0", "1.0", "1.5", "2.0"],
    );
    let cfg = SessionConfig::new("COM3", 9600).with_offset_lookback_ms(50);
    let mut ctrl = session_with(cfg, ch, clock);
    let rx = ctrl.subscribe();
    ctrl.connect().unwrap();
    assert_eq!(ctrl.offset(), None);
    ctrl.start().unwrap();
    for _ in 0..4 {
        next_sample(&rx);
    }
    // First positive average at t=200
    assert_eq!(ctrl.offset(), Some(150));
    ctrl.stop().unwrap();
}

#[test]
fn reconnect_after_stop_needs_a_fresh_channel() {
    let (mut ctrl, _handle) = scripted(&[]);
    ctrl.connect().unwrap();
    ctrl.stop().unwrap();
    // once_connector only hands out one channel
    assert!(matches!(ctrl.connect(), Err(FlowError::OpenFailed(_))));
    assert_eq!(ctrl.state(), SessionState::Idle);
}
