//! Line oriented JSON front end over a [`SessionRegistry`].
//!
//! Every input line is one request `{"id": .., "method": "..", "params": {..}}`, every
//! output line is either a response `{"id": .., "ok": .., "result"|"error": ..}` or an
//! event `{"event": {..}}`.

use crate::error::{Error, ErrorKind, Result};
use crate::event::DebugEvent;
use crate::registry::SessionRegistry;
use crate::session::{BreakpointPatch, BreakpointSpec, CallFrame, DebugConfig, SessionType};
use crate::{orch_debug, orch_info, orch_warn, weak_error};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(e: &Error) -> Self {
        Self {
            code: e.status_code(),
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, PartialEq, Serialize)]
pub struct Response {
    pub id: Value,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    fn new(id: Value, result: Result<Value>) -> Self {
        match result {
            Ok(result) => Self {
                id,
                ok: true,
                result: Some(result),
                error: None,
            },
            Err(e) => Self {
                id,
                ok: false,
                result: None,
                error: Some(ErrorBody::from(&e)),
            },
        }
    }
}

#[derive(Serialize)]
struct EventLine<'a> {
    event: &'a DebugEvent,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionParams {
    session_id: String,
}

#[derive(Deserialize)]
struct CreateParams {
    name: String,
    #[serde(rename = "type")]
    r#type: SessionType,
    config: DebugConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddBreakpointParams {
    session_id: String,
    breakpoint: BreakpointSpec,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BreakpointParams {
    session_id: String,
    breakpoint_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBreakpointParams {
    session_id: String,
    breakpoint_id: String,
    patch: BreakpointPatch,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateParams {
    session_id: String,
    expression: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariablesParams {
    session_id: String,
    #[serde(default)]
    frame_id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameParams {
    session_id: String,
    frame_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetVariableParams {
    session_id: String,
    name: String,
    value: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallStackParams {
    session_id: String,
    frames: Vec<CallFrame>,
}

fn params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::BadRequest(format!("{method}: {e}")))
}

fn to_value(value: impl Serialize) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

pub struct Service {
    registry: Arc<SessionRegistry>,
}

impl Service {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn dispatch(&self, method: &str, p: Value) -> Result<Value> {
        let reg = &self.registry;
        let session_id = |p: Value| -> Result<String> {
            Ok(params::<SessionParams>(method, p)?.session_id)
        };

        match method {
            "createSession" => {
                let p: CreateParams = params(method, p)?;
                to_value(reg.create(p.name, p.r#type, p.config))
            }
            "getSession" => to_value(reg.get(&session_id(p)?)?),
            "listSessions" => to_value(reg.list_all()),
            "removeSession" => to_value(reg.remove(&session_id(p)?)?),
            "startSession" => to_value(reg.start(&session_id(p)?)?),
            "stopSession" => to_value(reg.stop(&session_id(p)?)?),
            "pauseSession" => to_value(reg.pause(&session_id(p)?)?),
            "resumeSession" => to_value(reg.resume(&session_id(p)?)?),

            "addBreakpoint" => {
                let p: AddBreakpointParams = params(method, p)?;
                to_value(reg.add_breakpoint(&p.session_id, p.breakpoint)?)
            }
            "removeBreakpoint" => {
                let p: BreakpointParams = params(method, p)?;
                reg.remove_breakpoint(&p.session_id, &p.breakpoint_id)?;
                Ok(Value::Null)
            }
            "updateBreakpoint" => {
                let p: UpdateBreakpointParams = params(method, p)?;
                to_value(reg.update_breakpoint(&p.session_id, &p.breakpoint_id, p.patch)?)
            }
            "getBreakpoints" => to_value(reg.list_breakpoints(&session_id(p)?)?),

            "stepOver" => to_value(reg.step_over(&session_id(p)?)?),
            "stepInto" => to_value(reg.step_into(&session_id(p)?)?),
            "stepOut" => to_value(reg.step_out(&session_id(p)?)?),
            "continue" => to_value(reg.continue_(&session_id(p)?)?),
            "evaluate" => {
                let p: EvaluateParams = params(method, p)?;
                to_value(reg.evaluate(&p.session_id, p.expression)?)
            }

            "getVariables" => {
                let p: VariablesParams = params(method, p)?;
                to_value(reg.get_variables(&p.session_id, p.frame_id)?)
            }
            "setVariable" => {
                let p: SetVariableParams = params(method, p)?;
                reg.set_variable(&p.session_id, &p.name, p.value)?;
                Ok(Value::Null)
            }
            "getCallStack" => to_value(reg.get_call_stack(&session_id(p)?)?),
            "refreshCallStack" => to_value(reg.refresh_call_stack(&session_id(p)?)?),
            "replaceCallStack" => {
                let p: CallStackParams = params(method, p)?;
                reg.replace_call_stack(&p.session_id, p.frames)?;
                Ok(Value::Null)
            }
            "setFrame" => {
                let p: FrameParams = params(method, p)?;
                reg.set_current_frame(&p.session_id, p.frame_id)?;
                Ok(Value::Null)
            }

            other => Err(Error::BadRequest(format!("unknown method `{other}`"))),
        }
    }

    pub fn handle(&self, request: Request) -> Response {
        orch_debug!(target: "service", "request {} {}", request.method, request.params);
        let result = self.dispatch(&request.method, request.params);
        if let Err(e) = &result {
            orch_debug!(target: "service", "{} failed: {e}", request.method);
        }
        Response::new(request.id, result)
    }

    /// Handle one raw input line, malformed json is answered with a 400 error.
    pub fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request),
            Err(e) => Response::new(
                Value::Null,
                Err(Error::BadRequest(format!("malformed request: {e}"))),
            ),
        }
    }

    /// Serve requests from `input` until EOF, then stop all live sessions. Responses and
    /// events are interleaved on `output`.
    pub fn serve<W: Write + Send + 'static>(&self, input: impl BufRead, output: W) -> Result<()> {
        let output = Arc::new(Mutex::new(output));
        let finished = Arc::new(AtomicBool::new(false));

        let subscription = self.registry.subscribe();
        let event_output = output.clone();
        let event_finished = finished.clone();
        let forwarder = thread::Builder::new()
            .name("service-events".to_string())
            .spawn(move || {
                let forward = |event: DebugEvent| {
                    let mut out = event_output.lock().unwrap_or_else(PoisonError::into_inner);
                    weak_error!(write_line(&mut *out, &EventLine { event: &event }));
                };
                while !event_finished.load(Ordering::Acquire) {
                    if let Some(event) = subscription.recv_timeout(EVENT_POLL_INTERVAL) {
                        forward(event);
                    }
                }
                subscription.try_iter().for_each(forward);
            })?;

        orch_info!(target: "service", "serving requests");
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_line(&line);
            let mut out = output.lock().unwrap_or_else(PoisonError::into_inner);
            write_line(&mut *out, &response)?;
        }

        orch_info!(target: "service", "input closed, shutting down");
        self.registry.shutdown();
        finished.store(true, Ordering::Release);
        if forwarder.join().is_err() {
            orch_warn!(target: "service", "event forwarder panicked");
        }
        Ok(())
    }
}

fn write_line(out: &mut impl Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

/// Build a request line, used by clients and tests.
pub fn request_line(id: u64, method: &str, params: Value) -> String {
    json!({"id": id, "method": method, "params": params}).to_string()
}
