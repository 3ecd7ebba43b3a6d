use crate::common::{registry, shell, sleeper, wait_event, wait_terminated, FakeAdapter};
use debug_orchestrator::dispatcher::{CommandOutcome, DebugCommand};
use debug_orchestrator::event::{EventKind, OutputStream, Payload};
use debug_orchestrator::session::{SessionStatus, SessionType};
use debug_orchestrator::Error;
use serial_test::serial;

#[test]
fn test_commands_require_process() {
    let registry = registry();
    let session = registry.create("idle", SessionType::Node, sleeper());
    let id = session.id.as_str();

    assert!(matches!(registry.step_over(id), Err(Error::NotRunning(_))));
    assert!(matches!(registry.step_into(id), Err(Error::NotRunning(_))));
    assert!(matches!(registry.step_out(id), Err(Error::NotRunning(_))));
    assert!(matches!(registry.continue_(id), Err(Error::NotRunning(_))));
    assert!(matches!(
        registry.evaluate(id, "1 + 1"),
        Err(Error::NotRunning(_))
    ));
    assert!(matches!(registry.pause(id), Err(Error::NotRunning(_))));
    assert_eq!(registry.get(id).unwrap().status, SessionStatus::Stopped);
}

#[test]
#[serial]
fn test_signal_backend_hand_off() {
    let registry = registry();
    let session = registry.create("sleeper", SessionType::Custom, sleeper());
    let id = session.id.as_str();
    registry.start(id).unwrap();
    let events = registry.subscribe();

    assert_eq!(registry.step_over(id).unwrap(), CommandOutcome::Dispatched);
    assert_eq!(
        registry.evaluate(id, "x").unwrap(),
        CommandOutcome::Dispatched
    );

    let dispatched: Vec<_> = events.try_iter().collect();
    assert_eq!(dispatched.len(), 2);
    assert_eq!(
        dispatched[0].data,
        Payload::CommandDispatched {
            command: DebugCommand::StepOver
        }
    );
    assert_eq!(dispatched[0].kind, EventKind::Resumed);
    assert_eq!(dispatched[1].kind, EventKind::Output);
    registry.stop(id).unwrap();
}

#[test]
#[serial]
fn test_command_after_exit() {
    let registry = registry();
    let events = registry.subscribe();
    let session = registry.create("short", SessionType::Custom, shell("exit 0"));
    let id = session.id.as_str();
    registry.start(id).unwrap();
    wait_terminated(&events);

    assert!(matches!(registry.step_over(id), Err(Error::NotRunning(_))));
    assert!(matches!(
        registry.refresh_call_stack(id),
        Err(Error::NotRunning(_))
    ));
}

#[test]
#[serial]
fn test_dap_backend() {
    let adapter = FakeAdapter::spawn();
    let registry = registry();
    let events = registry.subscribe();
    let session = registry.create(
        "remote",
        SessionType::Custom,
        sleeper().with_port(adapter.port),
    );
    let id = session.id.as_str();
    registry.start(id).unwrap();

    assert_eq!(
        registry.evaluate(id, "1 + 2").unwrap(),
        CommandOutcome::Evaluated {
            result: "3".to_string(),
            type_name: Some("number".to_string())
        }
    );
    let output = wait_event(&events, |p| matches!(p, Payload::Output { .. }));
    assert_eq!(
        output.data,
        Payload::Output {
            stream: OutputStream::Console,
            text: "evaluated".to_string()
        }
    );

    assert_eq!(registry.step_over(id).unwrap(), CommandOutcome::Dispatched);
    assert_eq!(registry.step_into(id).unwrap(), CommandOutcome::Dispatched);
    assert_eq!(registry.step_out(id).unwrap(), CommandOutcome::Dispatched);

    assert_eq!(registry.pause(id).unwrap().status, SessionStatus::Paused);
    let halted = wait_event(&events, |p| matches!(p, Payload::Halted { .. }));
    assert_eq!(halted.kind, EventKind::Paused);
    assert_eq!(registry.resume(id).unwrap().status, SessionStatus::Running);

    let frames = registry.refresh_call_stack(id).unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].name, "main");
    assert_eq!(frames[1].source.file, "/app/main.js");
    registry.set_current_frame(id, 2).unwrap();

    // stop closes the adapter connection
    registry.stop(id).unwrap();
    let commands = adapter.handle.join().unwrap();
    assert_eq!(
        commands,
        vec![
            "initialize",
            "evaluate",
            "next",
            "stepIn",
            "stepOut",
            "pause",
            "continue",
            "stackTrace"
        ]
    );
}
