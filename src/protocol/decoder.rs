// src/protocol/decoder.rs
//! Line-to-event decoding
//!
//! ```text
//! stdout line ──► JSON object with "type"? ──yes──► rewrite sandbox paths ──► typed Event
//!                         │ no / bad payload
//!                         └──────────────────────► Event::Stdout(raw line)
//! stderr line ─────────────────────────────────────► Event::Stderr(raw line)
//! ```

use crate::protocol::event::Event;
use crate::vfs::path::strip_root;
use serde_json::{Map, Value};
use tracing::trace;

/// Decodes one run's output lines
#[derive(Debug, Clone)]
pub struct StreamDecoder {
    /// Directory the engine saw staged files under
    root: String,

    /// Whether stdout carries the JSON line protocol
    json_stream: bool,
}

impl StreamDecoder {
    pub fn new(root: impl Into<String>, json_stream: bool) -> Self {
        Self {
            root: root.into(),
            json_stream,
        }
    }

    pub fn json_stream(&self) -> bool {
        self.json_stream
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Decode one complete stdout line
    pub fn stdout_line(&self, line: String) -> Event {
        if self.json_stream {
            if let Some(event) = self.decode_message(&line) {
                return event;
            }
            trace!(%line, "Line is not a protocol message");
        }
        Event::Stdout(line)
    }

    /// Stderr is never parsed
    pub fn stderr_line(&self, line: String) -> Event {
        Event::Stderr(line)
    }

    fn decode_message(&self, line: &str) -> Option<Event> {
        let Value::Object(mut object) = serde_json::from_str::<Value>(line).ok()? else {
            return None;
        };
        let kind = match object.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return None,
        };

        self.rewrite_paths(&mut object);
        Event::from_message(&kind, object).ok()
    }

    /// Map sandbox paths in `location` and `stack[].location` back to the
    /// caller's filenames
    fn rewrite_paths(&self, object: &mut Map<String, Value>) {
        if let Some(location) = object.get_mut("location") {
            self.rewrite_location(location);
        }
        if let Some(Value::Array(stack)) = object.get_mut("stack") {
            for frame in stack {
                if let Some(location) = frame.get_mut("location") {
                    self.rewrite_location(location);
                }
            }
        }
    }

    fn rewrite_location(&self, location: &mut Value) {
        let Some(Value::String(filename)) = location.get_mut("filename") else {
            return;
        };
        if let Some(relative) = strip_root(&self.root, filename).map(str::to_string) {
            *filename = relative;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::event::{EventKind, SolveStatus};

    fn decoder() -> StreamDecoder {
        StreamDecoder::new("/minizinc", true)
    }

    #[test]
    fn test_typed_event() {
        let event = decoder().stdout_line(r#"{"type":"status","status":"ALL_SOLUTIONS"}"#.into());
        let Event::Status(status) = event else { panic!("expected status") };
        assert_eq!(status.status, SolveStatus::AllSolutions);
    }

    #[test]
    fn test_rewrites_location_and_stack() {
        let line = r#"{"type":"error","what":"type error","message":"bad","location":{"filename":"/minizinc/_mzn_0.mzn","firstLine":1},"stack":[{"location":{"filename":"/minizinc/lib/inc.mzn"},"isCompIter":false,"description":"call"},{"location":{"filename":"/usr/share/std/stdlib.mzn"},"description":"std"}]}"#;
        let Event::Error(diagnostic) = decoder().stdout_line(line.into()) else {
            panic!("expected error");
        };
        assert_eq!(diagnostic.location.unwrap().filename, "_mzn_0.mzn");
        let stack = diagnostic.stack.unwrap();
        assert_eq!(stack[0].location.as_ref().unwrap().filename, "lib/inc.mzn");
        assert_eq!(stack[1].location.as_ref().unwrap().filename, "/usr/share/std/stdlib.mzn");
    }

    #[test]
    fn test_fallbacks_to_stdout() {
        let d = decoder();
        for line in ["x = 3;", "----------", "42", r#"{"no_type":1}"#, r#"{"type":7}"#, r#"{"type":"solution","output":5}"#, ""] {
            assert_eq!(d.stdout_line(line.into()), Event::Stdout(line.into()), "line {line:?}");
        }
    }

    #[test]
    fn test_inactive_protocol_keeps_raw_lines() {
        let d = StreamDecoder::new("/minizinc", false);
        let line = r#"{"type":"status","status":"SATISFIED"}"#;
        assert_eq!(d.stdout_line(line.into()), Event::Stdout(line.into()));
    }

    #[test]
    fn test_stderr_is_verbatim() {
        let line = r#"{"type":"error","message":"not parsed"}"#;
        let event = decoder().stderr_line(line.into());
        assert_eq!(event.kind(), EventKind::Stderr);
        assert_eq!(event, Event::Stderr(line.into()));
    }
}
