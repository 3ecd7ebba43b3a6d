mod common;

mod commands;
mod frames;
mod lifecycle;

use crate::common::{registry, sleeper, wait_terminated, wait_until};
use debug_orchestrator::session::{SessionStatus, SessionType};
use serial_test::serial;

#[test]
#[serial]
fn test_registry_drop_stops_live_sessions() {
    let registry = registry();
    let events = registry.subscribe();
    let live = registry.create("live", SessionType::Custom, sleeper());
    let pid = registry.start(live.id.as_str()).unwrap().pid.unwrap();

    drop(registry);

    wait_terminated(&events);
    wait_until(|| !common::proc_exists(pid));
    assert_no_proc!(pid);
}

#[test]
#[serial]
fn test_shutdown_is_best_effort() {
    let registry = registry();
    let events = registry.subscribe();
    let a = registry.create("a", SessionType::Custom, sleeper());
    let b = registry.create("b", SessionType::Custom, sleeper());
    registry.start(a.id.as_str()).unwrap();
    registry.start(b.id.as_str()).unwrap();
    registry.pause(b.id.as_str()).unwrap();

    registry.shutdown();

    for s in registry.list_all() {
        assert_eq!(s.status, SessionStatus::Terminated);
        assert!(s.pid.is_none());
    }
    wait_terminated(&events);
    wait_terminated(&events);
}
