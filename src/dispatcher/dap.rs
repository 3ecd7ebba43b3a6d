use crate::dispatcher::{Backend, BackendContext, CommandOutcome, DebugCommand};
use crate::error::{Error, Result};
use crate::event::{EventBus, OutputStream, Payload};
use crate::session::{CallFrame, SessionId, SourceLocation, Variables};
use crate::{orch_debug, orch_info, orch_warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_HOST: &str = "127.0.0.1";
pub(crate) const DEFAULT_DEBUG_PORT: u16 = 9222;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);
/// Debugees are driven as a single logical thread.
const THREAD_ID: i64 = 1;

/// Read one `Content-Length` framed message.
pub(crate) fn read_message(reader: &mut impl BufRead) -> io::Result<Value> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let read_n = reader.read_line(&mut line)?;
        if read_n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "DAP connection closed",
            ));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some(v) = line.strip_prefix("Content-Length:") {
            let len = v
                .trim()
                .parse()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            content_length = Some(len);
        }
    }

    let len = content_length.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "Missing Content-Length header")
    })?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(serde_json::from_slice(&buf)?)
}

pub(crate) fn write_message(writer: &mut impl Write, message: &Value) -> io::Result<()> {
    let payload = serde_json::to_vec(message)?;
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(&payload)?;
    writer.flush()
}

#[derive(Default)]
struct Waiters {
    closed: bool,
    by_seq: HashMap<i64, SyncSender<Value>>,
}

/// Single tcp connection to a debug adapter. Responses are routed to waiting
/// requests by `request_seq`, events are handed to the event callback.
struct Connection {
    writer: Mutex<TcpStream>,
    waiters: Arc<Mutex<Waiters>>,
    next_seq: AtomicI64,
}

impl Connection {
    fn open(stream: TcpStream, on_event: impl Fn(Value) + Send + 'static) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let waiters: Arc<Mutex<Waiters>> = Arc::default();

        let reader_waiters = waiters.clone();
        thread::Builder::new()
            .name("dap-reader".to_string())
            .spawn(move || {
                loop {
                    let msg = match read_message(&mut reader) {
                        Ok(msg) => msg,
                        Err(e) => {
                            orch_debug!(target: "dispatcher", "dap reader finished: {e}");
                            break;
                        }
                    };
                    match msg.get("type").and_then(Value::as_str) {
                        Some("response") => {
                            let seq = msg.get("request_seq").and_then(Value::as_i64);
                            let waiter = seq.and_then(|seq| {
                                reader_waiters
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .by_seq
                                    .remove(&seq)
                            });
                            match waiter {
                                // buffer of 1, never blocks; a timed out waiter is gone
                                Some(waiter) => {
                                    let _ = waiter.try_send(msg);
                                }
                                None => {
                                    orch_debug!(target: "dispatcher", "unsolicited dap response: {msg}")
                                }
                            }
                        }
                        Some("event") => on_event(msg),
                        _ => orch_debug!(target: "dispatcher", "unknown dap message: {msg}"),
                    }
                }

                let mut waiters = reader_waiters
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                waiters.closed = true;
                // dropping senders releases every pending request
                waiters.by_seq.clear();
            })?;

        Ok(Self {
            writer: Mutex::new(stream),
            waiters,
            next_seq: AtomicI64::new(1),
        })
    }

    fn is_closed(&self) -> bool {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    fn request(&self, command: &str, arguments: Value, timeout: Option<Duration>) -> Result<Value> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::sync_channel(1);
        {
            let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            if waiters.closed {
                return Err(Error::BackendDisconnected);
            }
            waiters.by_seq.insert(seq, tx);
        }

        let request = json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        let written = {
            let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            write_message(&mut *writer, &request)
        };
        if let Err(e) = written {
            self.forget(seq);
            orch_warn!(target: "dispatcher", "dap write `{command}`: {e}");
            return Err(Error::BackendDisconnected);
        }

        let response = match timeout {
            None => rx.recv().map_err(|_| Error::BackendDisconnected)?,
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(response) => response,
                Err(RecvTimeoutError::Timeout) => {
                    self.forget(seq);
                    return Err(Error::BackendTimeout(command.to_string()));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Error::BackendDisconnected),
            },
        };

        if response.get("success").and_then(Value::as_bool) != Some(true) {
            let message = response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            return Err(Error::BackendRequest {
                command: command.to_string(),
                message,
            });
        }
        Ok(response.get("body").cloned().unwrap_or(Value::Null))
    }

    fn forget(&self, seq: i64) {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_seq
            .remove(&seq);
    }

    fn close(&self) {
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = writer.shutdown(Shutdown::Both);
    }
}

/// Translate adapter events into orchestrator events.
fn relay_event(events: &EventBus, session: &SessionId, msg: &Value) {
    let body = msg.get("body").cloned().unwrap_or(Value::Null);
    let str_field = |name: &str| body.get(name).and_then(Value::as_str).map(str::to_string);

    match msg.get("event").and_then(Value::as_str) {
        Some("output") => {
            if let Some(text) = str_field("output") {
                events.emit(
                    session,
                    Payload::Output {
                        stream: OutputStream::Console,
                        text,
                    },
                );
            }
        }
        Some("stopped") => events.emit(
            session,
            Payload::Halted {
                reason: str_field("reason").unwrap_or_else(|| "pause".to_string()),
                description: str_field("description"),
            },
        ),
        Some(other) => orch_debug!(target: "dispatcher", "{session}: dap event `{other}` ignored"),
        None => {}
    }
}

fn frame_from_dap(frame: &Value) -> Option<CallFrame> {
    let source = frame.get("source");
    let file = source
        .and_then(|s| s.get("path").or_else(|| s.get("name")))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let position = |key: &str| {
        frame
            .get(key)
            .and_then(Value::as_u64)
            .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
    };
    let line = position("line");
    let column = position("column");

    Some(CallFrame {
        id: frame.get("id")?.as_i64()?,
        name: frame
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string(),
        source: SourceLocation {
            file,
            line,
            column: Some(column),
        },
        line,
        column,
        variables: Variables::new(),
    })
}

/// Debug adapter protocol client. Connects lazily on the first command, since
/// an adapter usually needs some time after launch before it listens.
pub struct DapBackend {
    session: SessionId,
    address: String,
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
    events: Arc<EventBus>,
    connection: Mutex<Option<Arc<Connection>>>,
    shut_down: AtomicBool,
}

impl DapBackend {
    pub(super) fn new(ctx: &BackendContext) -> Self {
        let host = ctx.config.hostname.as_deref().unwrap_or(DEFAULT_HOST);
        let port = match ctx.config.port {
            None | Some(0) => DEFAULT_DEBUG_PORT,
            Some(port) => port,
        };

        Self {
            session: ctx.session_id.clone(),
            address: format!("{host}:{port}"),
            connect_timeout: ctx.connect_timeout,
            request_timeout: ctx.config.timeout.map(Duration::from_millis),
            events: ctx.events.clone(),
            connection: Mutex::default(),
            shut_down: AtomicBool::new(false),
        }
    }

    fn connect(&self) -> Result<Connection> {
        let start = Instant::now();
        let stream = loop {
            if self.shut_down.load(Ordering::Acquire) {
                return Err(Error::BackendDisconnected);
            }
            match TcpStream::connect(&self.address) {
                Ok(stream) => break stream,
                Err(err) => {
                    if start.elapsed() > self.connect_timeout {
                        return Err(Error::Backend {
                            backend: "dap",
                            message: format!("failed to connect to {}: {err}", self.address),
                        });
                    }
                    thread::sleep(CONNECT_RETRY_DELAY);
                }
            }
        };

        let events = self.events.clone();
        let session = self.session.clone();
        let connection = Connection::open(stream, move |msg| relay_event(&events, &session, &msg))?;
        connection.request(
            "initialize",
            json!({
                "clientID": "dorch",
                "adapterID": "debug-orchestrator",
                "linesStartAt1": true,
                "columnsStartAt1": true,
            }),
            Some(self.connect_timeout),
        )?;
        orch_info!(target: "dispatcher", "{}: connected to debug adapter at {}", self.session, self.address);
        Ok(connection)
    }

    /// Return live connection, connect if there is none yet. Connect happens without
    /// holding the connection lock, so [`Backend::shutdown`] never waits for it.
    fn connection(&self) -> Result<Arc<Connection>> {
        {
            let current = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(conn) = current.as_ref() {
                if !conn.is_closed() {
                    return Ok(conn.clone());
                }
            }
        }

        let fresh = Arc::new(self.connect()?);
        let mut current = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shut_down.load(Ordering::Acquire) {
            fresh.close();
            return Err(Error::BackendDisconnected);
        }
        match current.as_ref() {
            Some(conn) if !conn.is_closed() => {
                fresh.close();
                Ok(conn.clone())
            }
            _ => {
                *current = Some(fresh.clone());
                Ok(fresh)
            }
        }
    }

    fn request(&self, command: &str, arguments: Value) -> Result<Value> {
        orch_debug!(target: "dispatcher", "{}: dap -> {command} {arguments}", self.session);
        self.connection()?
            .request(command, arguments, self.request_timeout)
    }
}

impl Backend for DapBackend {
    fn name(&self) -> &'static str {
        "dap"
    }

    fn suspend(&self) -> Result<()> {
        self.request("pause", json!({"threadId": THREAD_ID}))
            .map(drop)
    }

    fn resume(&self) -> Result<()> {
        self.request("continue", json!({"threadId": THREAD_ID}))
            .map(drop)
    }

    fn execute(&self, command: &DebugCommand) -> Result<CommandOutcome> {
        let thread = json!({"threadId": THREAD_ID});
        let body = match command {
            DebugCommand::StepOver => self.request("next", thread)?,
            DebugCommand::StepInto => self.request("stepIn", thread)?,
            DebugCommand::StepOut => self.request("stepOut", thread)?,
            DebugCommand::Continue => self.request("continue", thread)?,
            DebugCommand::Evaluate { expression } => {
                let body = self.request(
                    "evaluate",
                    json!({"expression": expression, "context": "repl"}),
                )?;
                let result = body
                    .get("result")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let type_name = body
                    .get("type")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Ok(CommandOutcome::Evaluated { result, type_name });
            }
        };
        orch_debug!(target: "dispatcher", "{}: dap <- {body}", self.session);
        Ok(CommandOutcome::Dispatched)
    }

    fn stack_trace(&self) -> Result<Option<Vec<CallFrame>>> {
        let body = self.request("stackTrace", json!({"threadId": THREAD_ID}))?;
        let frames = body
            .get("stackFrames")
            .and_then(Value::as_array)
            .map(|frames| frames.iter().filter_map(frame_from_dap).collect())
            .unwrap_or_default();
        Ok(Some(frames))
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        let conn = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            conn.close();
        }
    }
}
