use crate::common::{registry, sleeper};
use debug_orchestrator::event::Payload;
use debug_orchestrator::session::{CallFrame, SessionType, SourceLocation, Variables};
use debug_orchestrator::Error;
use serde_json::json;
use serial_test::serial;

fn frame(id: i64, name: &str, var: (&str, serde_json::Value)) -> CallFrame {
    let mut variables = Variables::new();
    variables.insert(var.0.to_string(), var.1);
    CallFrame {
        id,
        name: name.to_string(),
        source: SourceLocation {
            file: "app.js".to_string(),
            line: 10 + id as u32,
            column: None,
        },
        line: 10 + id as u32,
        column: 1,
        variables,
    }
}

fn stack() -> Vec<CallFrame> {
    vec![
        frame(0, "inner", ("a", json!(1))),
        frame(1, "outer", ("b", json!("two"))),
    ]
}

#[test]
fn test_set_current_frame() {
    let registry = registry();
    let session = registry.create("frames", SessionType::Node, sleeper());
    let id = session.id.as_str();
    registry.replace_call_stack(id, stack()).unwrap();

    assert!(matches!(
        registry.set_current_frame(id, 7),
        Err(Error::FrameNotFound { frame: 7, .. })
    ));

    registry.set_current_frame(id, 1).unwrap();
    let vars = registry.get_variables(id, None).unwrap();
    assert_eq!(vars.get("b"), Some(&json!("two")));
    assert_eq!(registry.get(id).unwrap().current_frame, Some(1));

    // explicit frame wins over the current one
    let vars = registry.get_variables(id, Some(0)).unwrap();
    assert_eq!(vars.get("a"), Some(&json!(1)));
}

#[test]
fn test_session_variables_fallback() {
    let registry = registry();
    let session = registry.create("frames", SessionType::Node, sleeper());
    let id = session.id.as_str();
    registry.set_variable(id, "answer", json!(42)).unwrap();

    let vars = registry.get_variables(id, None).unwrap();
    assert_eq!(vars.get("answer"), Some(&json!(42)));
    // unknown explicit frame falls back as well
    let vars = registry.get_variables(id, Some(99)).unwrap();
    assert_eq!(vars.get("answer"), Some(&json!(42)));
}

#[test]
fn test_stale_frame_after_rebuild() {
    let registry = registry();
    let session = registry.create("frames", SessionType::Node, sleeper());
    let id = session.id.as_str();
    registry.replace_call_stack(id, stack()).unwrap();
    registry.set_current_frame(id, 0).unwrap();

    // same ids, new snapshot
    registry.replace_call_stack(id, stack()).unwrap();
    assert!(matches!(
        registry.get_variables(id, None),
        Err(Error::FrameNotFound { frame: 0, .. })
    ));
    assert_eq!(registry.get(id).unwrap().current_frame, None);

    registry.set_current_frame(id, 0).unwrap();
    assert!(registry.get_variables(id, None).is_ok());
}

#[test]
fn test_call_stack_snapshot() {
    let registry = registry();
    let session = registry.create("frames", SessionType::Node, sleeper());
    let id = session.id.as_str();
    let events = registry.subscribe();
    assert!(registry.get_call_stack(id).unwrap().is_empty());

    registry.replace_call_stack(id, stack()).unwrap();
    let frames = registry.get_call_stack(id).unwrap();
    assert_eq!(frames, stack());
    assert_eq!(frames[0].name, "inner");
    assert_eq!(
        events.try_iter().next().unwrap().data,
        Payload::CallStackChanged { frame_count: 2 }
    );
}

#[test]
#[serial]
fn test_refresh_without_stack_support() {
    let registry = registry();
    let session = registry.create("frames", SessionType::Custom, sleeper());
    let id = session.id.as_str();
    assert!(matches!(
        registry.refresh_call_stack(id),
        Err(Error::NotRunning(_))
    ));

    registry.replace_call_stack(id, stack()).unwrap();
    registry.start(id).unwrap();
    // signal backend has no stack introspection, stored stack stays
    assert_eq!(registry.refresh_call_stack(id).unwrap(), stack());
    registry.stop(id).unwrap();
}
