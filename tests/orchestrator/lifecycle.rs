use crate::common::{
    node_available, registry, shell, sleeper, wait_event, wait_terminated, wait_until,
    FakeBrowsers,
};
use crate::{assert_no_proc, common};
use debug_orchestrator::dispatcher::CommandOutcome;
use debug_orchestrator::event::Payload;
use debug_orchestrator::session::{DebugConfig, SessionStatus, SessionType};
use debug_orchestrator::Error;
use serial_test::serial;

#[test]
#[serial]
fn test_start_stop() {
    let registry = registry();
    let events = registry.subscribe();
    let session = registry.create("sleeper", SessionType::Custom, sleeper());
    let id = session.id.as_str();
    assert_eq!(session.status, SessionStatus::Stopped);

    let started = registry.start(id).unwrap();
    assert_eq!(started.status, SessionStatus::Running);
    let pid = started.pid.unwrap();
    assert!(common::proc_exists(pid));

    let stopped = registry.stop(id).unwrap();
    assert_eq!(stopped.status, SessionStatus::Terminated);
    assert!(stopped.pid.is_none());
    let end_time = stopped.end_time.unwrap();

    let event = wait_terminated(&events);
    assert_eq!(
        event.data,
        Payload::SessionTerminated {
            code: None,
            signal: Some("SIGTERM".to_string())
        }
    );
    wait_until(|| !common::proc_exists(pid));
    assert_no_proc!(pid);

    // second stop is a no-op
    let again = registry.stop(id).unwrap();
    assert_eq!(again.status, SessionStatus::Terminated);
    assert_eq!(again.end_time, Some(end_time));
}

#[test]
#[serial]
fn test_start_twice() {
    let registry = registry();
    let session = registry.create("sleeper", SessionType::Custom, sleeper());
    let id = session.id.as_str();
    registry.start(id).unwrap();

    let err = registry.start(id).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            actual: SessionStatus::Running,
            ..
        }
    ));
    assert_eq!(registry.get(id).unwrap().status, SessionStatus::Running);
    registry.stop(id).unwrap();
}

#[test]
#[serial]
fn test_failed_launch_rolls_back() {
    let registry = registry();
    let events = registry.subscribe();
    let session = registry.create(
        "broken",
        SessionType::Custom,
        DebugConfig::new("/definitely/not/a/program"),
    );
    let id = session.id.as_str();

    for _ in 0..2 {
        let err = registry.start(id).unwrap_err();
        assert!(matches!(err, Error::LaunchFailure { .. }));
        let snapshot = registry.get(id).unwrap();
        assert_eq!(snapshot.status, SessionStatus::Stopped);
        assert!(snapshot.pid.is_none());
        assert!(snapshot.end_time.is_none());
    }
    assert!(events
        .try_iter()
        .all(|e| !matches!(e.data, Payload::SessionStarted { .. })));
}

#[test]
#[serial]
fn test_out_of_band_exit() {
    let registry = registry();
    let events = registry.subscribe();
    let session = registry.create("exit", SessionType::Custom, shell("exit 3"));
    let id = session.id.as_str();
    registry.start(id).unwrap();

    let error = wait_event(&events, |p| matches!(p, Payload::DebugError { .. }));
    assert!(matches!(error.data, Payload::DebugError { ref message } if message.contains("exit")));
    let terminated = wait_terminated(&events);
    assert_eq!(
        terminated.data,
        Payload::SessionTerminated {
            code: Some(3),
            signal: None
        }
    );

    let snapshot = registry.get(id).unwrap();
    assert_eq!(snapshot.status, SessionStatus::Terminated);
    assert!(snapshot.pid.is_none());
    assert!(snapshot.end_time.is_some());

    assert!(matches!(registry.pause(id), Err(Error::NotRunning(_))));
    assert!(matches!(registry.resume(id), Err(Error::NotRunning(_))));
    assert!(matches!(registry.start(id), Err(Error::InvalidState { .. })));
}

#[test]
#[serial]
fn test_successful_exit_is_not_an_error() {
    let registry = registry();
    let events = registry.subscribe();
    let session = registry.create("ok", SessionType::Custom, shell("exit 0"));
    registry.start(session.id.as_str()).unwrap();

    let terminated = wait_terminated(&events);
    assert_eq!(
        terminated.data,
        Payload::SessionTerminated {
            code: Some(0),
            signal: None
        }
    );
    assert!(events
        .try_iter()
        .all(|e| !matches!(e.data, Payload::DebugError { .. })));
}

#[test]
#[serial]
fn test_pause_resume() {
    let registry = registry();
    let session = registry.create("sleeper", SessionType::Custom, sleeper());
    let id = session.id.as_str();
    registry.start(id).unwrap();

    assert_eq!(registry.pause(id).unwrap().status, SessionStatus::Paused);
    // pause of a paused session keeps it paused
    assert_eq!(registry.pause(id).unwrap().status, SessionStatus::Paused);
    assert_eq!(registry.resume(id).unwrap().status, SessionStatus::Running);
    assert_eq!(registry.resume(id).unwrap().status, SessionStatus::Running);

    registry.stop(id).unwrap();
}

#[test]
#[serial]
fn test_browser_pause_resume() {
    let _browsers = FakeBrowsers::install();
    let registry = registry();
    let events = registry.subscribe();

    for r#type in [SessionType::Chrome, SessionType::Firefox] {
        let session = registry.create("page", r#type, DebugConfig::new("http://localhost:3000"));
        let id = session.id.as_str();
        let pid = registry.start(id).unwrap().pid.unwrap();

        assert_eq!(registry.pause(id).unwrap().status, SessionStatus::Paused);
        assert_eq!(registry.resume(id).unwrap().status, SessionStatus::Running);
        assert_eq!(registry.step_over(id).unwrap(), CommandOutcome::Dispatched);
        assert_eq!(registry.get(id).unwrap().status, SessionStatus::Running);

        registry.stop(id).unwrap();
        wait_event(&events, |p| matches!(p, Payload::SessionTerminated { .. }));
        wait_until(|| !common::proc_exists(pid));
        assert_no_proc!(pid);
    }
}

#[test]
#[serial]
fn test_stop_paused_process() {
    let registry = registry();
    let events = registry.subscribe();
    let session = registry.create("sleeper", SessionType::Custom, sleeper());
    let id = session.id.as_str();
    let pid = registry.start(id).unwrap().pid.unwrap();
    registry.pause(id).unwrap();

    registry.stop(id).unwrap();
    wait_terminated(&events);
    wait_until(|| !common::proc_exists(pid));
    assert_no_proc!(pid);
}

#[test]
#[serial]
fn test_stop_not_started_session() {
    let registry = registry();
    let session = registry.create("never", SessionType::Custom, sleeper());
    let id = session.id.as_str();

    let stopped = registry.stop(id).unwrap();
    assert_eq!(stopped.status, SessionStatus::Terminated);
    assert!(stopped.end_time.is_some());
    assert!(matches!(registry.start(id), Err(Error::InvalidState { .. })));
}

#[test]
#[serial]
fn test_cwd_and_env() {
    let registry = registry();
    let events = registry.subscribe();
    let config = shell("echo $DORCH_TEST_VALUE; pwd")
        .with_cwd("/")
        .with_env("DORCH_TEST_VALUE", "from-config");
    let session = registry.create("env", SessionType::Custom, config);
    registry.start(session.id.as_str()).unwrap();

    let mut lines = vec![];
    for _ in 0..2 {
        let event = wait_event(&events, |p| matches!(p, Payload::Output { .. }));
        if let Payload::Output { text, .. } = event.data {
            lines.push(text);
        }
    }
    assert_eq!(lines, vec!["from-config", "/"]);
}

#[test]
#[serial]
fn test_node_session() {
    if !node_available() {
        eprintln!("node is not installed, skip");
        return;
    }

    let registry = registry();
    let config = DebugConfig::new("app.js").with_cwd("/tmp");
    let session = registry.create("t1", SessionType::Node, config);
    let id = session.id.as_str();

    let started = registry.start(id).unwrap();
    assert_eq!(started.status, SessionStatus::Running);
    assert!(started.pid.is_some());

    let stopped = registry.stop(id).unwrap();
    assert_eq!(stopped.status, SessionStatus::Terminated);
    assert!(stopped.pid.is_none());
    assert!(stopped.end_time.is_some());
}
