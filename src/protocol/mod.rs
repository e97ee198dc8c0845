// src/protocol/mod.rs
//! Streaming protocol
//!
//! The engine speaks newline-delimited JSON on stdout and free text on
//! stderr:
//!
//! - **Codec**: newline framing over raw bytes
//! - **Decoder**: line to typed event, sandbox path rewriting
//! - **Sink**: `io::Write` adapters for in-process engine modules
//! - **Event**: the closed set of event payloads

pub mod codec;
pub mod decoder;
pub mod event;
pub mod sink;

pub use codec::LineCodec;
pub use decoder::StreamDecoder;
pub use event::{
    Diagnostic, Event, EventKind, ExitEvent, InterfaceEvent, Location, SolutionEvent, SolveStatus,
    StackFrame, StatisticsEvent, StatusEvent, VarInfo,
};
pub use sink::{OutputSink, OutputStream};
