use debug_orchestrator::config::OrchestratorConfig;
use debug_orchestrator::event::{DebugEvent, Payload, Subscription};
use debug_orchestrator::session::DebugConfig;
use debug_orchestrator::SessionRegistry;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Read, Write};
use std::ffi::OsString;
use std::net::TcpListener;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn registry() -> SessionRegistry {
    SessionRegistry::new(OrchestratorConfig::default())
}

pub fn strict_registry() -> SessionRegistry {
    SessionRegistry::new(OrchestratorConfig {
        strict_breakpoint_removal: true,
        ..OrchestratorConfig::default()
    })
}

/// Long running debugee.
pub fn sleeper() -> DebugConfig {
    DebugConfig::new("sleep").with_args(["30"])
}

pub fn shell(script: &str) -> DebugConfig {
    DebugConfig::new("sh").with_args(["-c", script])
}

/// Wait for the first event matching `pred`, skip others.
pub fn wait_event(events: &Subscription, pred: impl Fn(&Payload) -> bool) -> DebugEvent {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        let event = events
            .recv_timeout(left)
            .expect("timeout while waiting for event");
        if pred(&event.data) {
            return event;
        }
    }
}

pub fn wait_terminated(events: &Subscription) -> DebugEvent {
    wait_event(events, |p| matches!(p, Payload::SessionTerminated { .. }))
}

pub fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(20));
    }
}

pub fn proc_exists(pid: i32) -> bool {
    let sys = sysinfo::System::new_with_specifics(
        sysinfo::RefreshKind::everything()
            .without_cpu()
            .without_memory(),
    );
    sysinfo::System::process(&sys, sysinfo::Pid::from_u32(pid as u32)).is_some()
}

#[macro_export]
macro_rules! assert_no_proc {
    ($pid:expr) => {
        assert!(!$crate::common::proc_exists($pid))
    };
}

pub fn node_available() -> bool {
    which::which("node").is_ok()
}

fn read_frame(reader: &mut impl BufRead) -> Option<Value> {
    let mut content_length = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            return None;
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Content-Length:") {
            content_length = Some(value.trim().parse::<usize>().ok()?);
        }
    }
    let mut buf = vec![0u8; content_length?];
    reader.read_exact(&mut buf).ok()?;
    serde_json::from_slice(&buf).ok()
}

fn write_frame(writer: &mut impl Write, msg: &Value) {
    let payload = serde_json::to_vec(msg).unwrap();
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len()).unwrap();
    writer.write_all(&payload).unwrap();
    writer.flush().unwrap();
}

/// Minimal debug adapter listening on a random local port. Answers every request with
/// success, emits `stopped` on `pause` and `output` on `evaluate`. Join handle returns
/// received commands in order.
pub struct FakeAdapter {
    pub port: u16,
    pub handle: JoinHandle<Vec<String>>,
}

impl FakeAdapter {
    pub fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut commands = vec![];
            let mut seq = 0;
            while let Some(req) = read_frame(&mut reader) {
                let command = req["command"].as_str().unwrap_or_default().to_string();
                let body = match command.as_str() {
                    "evaluate" => {
                        seq += 1;
                        write_frame(
                            &mut writer,
                            &json!({"seq": seq, "type": "event", "event": "output", "body": {"output": "evaluated"}}),
                        );
                        json!({"result": "3", "type": "number"})
                    }
                    "pause" => {
                        seq += 1;
                        write_frame(
                            &mut writer,
                            &json!({"seq": seq, "type": "event", "event": "stopped", "body": {"reason": "pause"}}),
                        );
                        json!({})
                    }
                    "stackTrace" => json!({"stackFrames": [
                        {"id": 1, "name": "inner", "source": {"path": "/app/lib.js"}, "line": 3, "column": 5},
                        {"id": 2, "name": "main", "source": {"path": "/app/main.js"}, "line": 10, "column": 1},
                    ]}),
                    _ => json!({}),
                };
                seq += 1;
                write_frame(
                    &mut writer,
                    &json!({
                        "seq": seq,
                        "type": "response",
                        "request_seq": req["seq"],
                        "success": true,
                        "command": command,
                        "body": body,
                    }),
                );
                commands.push(command);
            }
            commands
        });
        Self { port, handle }
    }
}

/// Stand-in `google-chrome` and `firefox` executables that just sleep, installed in
/// front of `PATH` until dropped. Tests using it must be serial.
pub struct FakeBrowsers {
    dir: PathBuf,
    old_path: Option<OsString>,
}

impl FakeBrowsers {
    pub fn install() -> Self {
        let dir = std::env::temp_dir().join(format!("dorch-browsers-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["google-chrome", "firefox"] {
            let path = dir.join(name);
            std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let old_path = std::env::var_os("PATH");
        let mut paths = vec![dir.clone()];
        paths.extend(old_path.iter().flat_map(std::env::split_paths));
        std::env::set_var("PATH", std::env::join_paths(paths).unwrap());
        Self { dir, old_path }
    }
}

impl Drop for FakeBrowsers {
    fn drop(&mut self) {
        match self.old_path.take() {
            Some(path) => std::env::set_var("PATH", path),
            None => std::env::remove_var("PATH"),
        }
        _ = std::fs::remove_dir_all(&self.dir);
    }
}
