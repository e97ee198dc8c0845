// src/protocol/event.rs
//! Typed engine events
//!
//! The engine writes one JSON object per line, discriminated by its `type`
//! field. Each known type decodes into its own payload struct; unknown
//! fields are preserved in `extra` so nothing the engine says is lost.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Event discriminator, used as the subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Error,
    Warning,
    Solution,
    Checker,
    Status,
    Statistics,
    Time,
    Trace,
    Interface,
    /// Any engine event type not listed above
    Other,
    Stdout,
    Stderr,
    Exit,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Error => "error",
            EventKind::Warning => "warning",
            EventKind::Solution => "solution",
            EventKind::Checker => "checker",
            EventKind::Status => "status",
            EventKind::Statistics => "statistics",
            EventKind::Time => "time",
            EventKind::Trace => "trace",
            EventKind::Interface => "interface",
            EventKind::Other => "other",
            EventKind::Stdout => "stdout",
            EventKind::Stderr => "stderr",
            EventKind::Exit => "exit",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine message types with a dedicated payload
const TYPED_KINDS: [&str; 9] = [
    "error",
    "warning",
    "solution",
    "checker",
    "status",
    "statistics",
    "time",
    "trace",
    "interface",
];

/// One event of a run
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Error(Diagnostic),
    Warning(Diagnostic),
    Solution(SolutionEvent),
    Checker(CheckerEvent),
    Status(StatusEvent),
    Statistics(StatisticsEvent),
    Time(TimeEvent),
    Trace(TraceEvent),
    Interface(InterfaceEvent),
    Other { kind: String, payload: Map<String, Value> },
    /// Raw stdout line that is not a protocol message
    Stdout(String),
    /// Raw stderr line
    Stderr(String),
    /// Terminal event, always last
    Exit(ExitEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Error(_) => EventKind::Error,
            Event::Warning(_) => EventKind::Warning,
            Event::Solution(_) => EventKind::Solution,
            Event::Checker(_) => EventKind::Checker,
            Event::Status(_) => EventKind::Status,
            Event::Statistics(_) => EventKind::Statistics,
            Event::Time(_) => EventKind::Time,
            Event::Trace(_) => EventKind::Trace,
            Event::Interface(_) => EventKind::Interface,
            Event::Other { .. } => EventKind::Other,
            Event::Stdout(_) => EventKind::Stdout,
            Event::Stderr(_) => EventKind::Stderr,
            Event::Exit(_) => EventKind::Exit,
        }
    }

    /// Decode an engine message whose `type` field was already removed.
    ///
    /// `exit`, `stdout` and `stderr` are reserved for the transport, so an
    /// engine message claiming one of them lands in `Other`.
    pub fn from_message(kind: &str, payload: Map<String, Value>) -> serde_json::Result<Event> {
        if !TYPED_KINDS.contains(&kind) {
            return Ok(Event::Other {
                kind: kind.to_string(),
                payload,
            });
        }

        let value = Value::Object(payload);
        Ok(match kind {
            "error" => Event::Error(serde_json::from_value(value)?),
            "warning" => Event::Warning(serde_json::from_value(value)?),
            "solution" => Event::Solution(serde_json::from_value(value)?),
            "checker" => Event::Checker(serde_json::from_value(value)?),
            "status" => Event::Status(serde_json::from_value(value)?),
            "statistics" => Event::Statistics(serde_json::from_value(value)?),
            "time" => Event::Time(serde_json::from_value(value)?),
            "trace" => Event::Trace(serde_json::from_value(value)?),
            _ => Event::Interface(serde_json::from_value(value)?),
        })
    }

    /// Render the event as the JSON object the engine would have written
    pub fn to_json(&self) -> Value {
        let (kind, body) = match self {
            Event::Error(d) | Event::Warning(d) => (self.kind().as_str().to_string(), to_value(d)),
            Event::Solution(s) => ("solution".into(), to_value(s)),
            Event::Checker(c) => ("checker".into(), to_value(c)),
            Event::Status(s) => ("status".into(), to_value(s)),
            Event::Statistics(s) => ("statistics".into(), to_value(s)),
            Event::Time(t) => ("time".into(), to_value(t)),
            Event::Trace(t) => ("trace".into(), to_value(t)),
            Event::Interface(i) => ("interface".into(), to_value(i)),
            Event::Other { kind, payload } => (kind.clone(), Value::Object(payload.clone())),
            Event::Stdout(line) | Event::Stderr(line) => (
                self.kind().as_str().to_string(),
                serde_json::json!({ "value": line }),
            ),
            Event::Exit(e) => ("exit".into(), to_value(e)),
        };

        let mut object = match body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        object.insert("type".to_string(), Value::String(kind));
        Value::Object(object)
    }
}

fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

/// Source span inside a (caller-visible) file, 1-based
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub first_line: u32,
    #[serde(default)]
    pub first_column: u32,
    #[serde(default)]
    pub last_line: u32,
    #[serde(default)]
    pub last_column: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,

    /// Frame is an iteration of a comprehension
    #[serde(rename = "isCompIter", default)]
    pub is_comprehension_iteration: bool,

    #[serde(default)]
    pub description: String,
}

/// Payload of `error` and `warning` events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(default)]
    pub message: String,

    /// Error kind tag, e.g. "type error"
    #[serde(rename = "what", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<StackFrame>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolutionEvent {
    /// Output sections, e.g. `json`, `dzn`, `raw`
    #[serde(default)]
    pub output: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SolutionEvent {
    /// The `json` output section
    pub fn json(&self) -> Option<&Value> {
        self.output.get("json")
    }

    /// The `dzn` output section
    pub fn dzn(&self) -> Option<&str> {
        self.output.get("dzn").and_then(Value::as_str)
    }
}

/// Outcome reported by the engine. Unrecognised values read as `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SolveStatus {
    AllSolutions,
    OptimalSolution,
    Unsatisfiable,
    Unbounded,
    UnsatOrUnbounded,
    Satisfied,
    #[default]
    Unknown,
    Error,
}

impl SolveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolveStatus::AllSolutions => "ALL_SOLUTIONS",
            SolveStatus::OptimalSolution => "OPTIMAL_SOLUTION",
            SolveStatus::Unsatisfiable => "UNSATISFIABLE",
            SolveStatus::Unbounded => "UNBOUNDED",
            SolveStatus::UnsatOrUnbounded => "UNSAT_OR_UNBOUNDED",
            SolveStatus::Satisfied => "SATISFIED",
            SolveStatus::Unknown => "UNKNOWN",
            SolveStatus::Error => "ERROR",
        }
    }
}

impl From<String> for SolveStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ALL_SOLUTIONS" => SolveStatus::AllSolutions,
            "OPTIMAL_SOLUTION" => SolveStatus::OptimalSolution,
            "UNSATISFIABLE" => SolveStatus::Unsatisfiable,
            "UNBOUNDED" => SolveStatus::Unbounded,
            "UNSAT_OR_UNBOUNDED" => SolveStatus::UnsatOrUnbounded,
            "SATISFIED" => SolveStatus::Satisfied,
            "ERROR" => SolveStatus::Error,
            _ => SolveStatus::Unknown,
        }
    }
}

impl From<SolveStatus> for String {
    fn from(status: SolveStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(default)]
    pub status: SolveStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsEvent {
    #[serde(default)]
    pub statistics: Map<String, Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckerEvent {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    #[serde(default)]
    pub message: Value,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Description of one model variable or parameter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VarInfo {
    #[serde(rename = "type", default)]
    pub ty: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of the model-interface operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceEvent {
    #[serde(default)]
    pub input: BTreeMap<String, VarInfo>,

    #[serde(default)]
    pub output: BTreeMap<String, VarInfo>,

    /// "sat", "min" or "max"
    #[serde(default)]
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_output_item: Option<bool>,

    #[serde(default)]
    pub included_files: Vec<String>,

    #[serde(default)]
    pub globals: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Terminal event synthesized by the transport
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitEvent {
    /// Exit code; `None` when the run was cancelled
    pub code: Option<i32>,

    /// Requested output files; `None` values were not produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_files: Option<BTreeMap<String, Option<String>>>,

    /// Whole stdout of a non-streaming run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    /// Whole stderr of a non-streaming run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    /// Transport failure that ended the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExitEvent {
    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Default::default()
        }
    }

    pub fn cancelled() -> Self {
        Self::default()
    }

    /// The context failed before or while running the engine
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self {
            code: Some(-1),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.code.is_none()
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Contents of a requested output file
    pub fn output_file(&self, name: &str) -> Option<&str> {
        self.output_files
            .as_ref()
            .and_then(|files| files.get(name))
            .and_then(|contents| contents.as_deref())
    }
}
