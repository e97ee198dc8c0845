// src/protocol/sink.rs
//! Byte sinks handed to an in-process engine module
//!
//! With the line protocol active every completed line is decoded and
//! forwarded immediately; otherwise output is captured whole and attached to
//! the exit event.

use crate::protocol::codec::LineCodec;
use crate::protocol::decoder::StreamDecoder;
use crate::protocol::event::Event;
use bytes::BytesMut;
use std::io::{self, Write};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::codec::Decoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

pub struct OutputSink {
    stream: OutputStream,
    decoder: StreamDecoder,
    codec: LineCodec,
    buffer: BytesMut,
    events: UnboundedSender<Event>,
}

impl OutputSink {
    pub fn new(stream: OutputStream, decoder: StreamDecoder, events: UnboundedSender<Event>) -> Self {
        Self {
            stream,
            decoder,
            codec: LineCodec::new(),
            buffer: BytesMut::new(),
            events,
        }
    }

    fn emit(&self, line: String) {
        let event = match self.stream {
            OutputStream::Stdout => self.decoder.stdout_line(line),
            OutputStream::Stderr => self.decoder.stderr_line(line),
        };
        // A closed receiver means the run was abandoned
        let _ = self.events.send(event);
    }

    /// Flush a trailing partial line, or return the captured text when the
    /// protocol is inactive
    pub fn finish(mut self) -> Option<String> {
        if self.decoder.json_stream() {
            while let Ok(Some(line)) = self.codec.decode_eof(&mut self.buffer) {
                self.emit(line);
            }
            None
        } else if self.buffer.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.buffer).into_owned())
        }
    }
}

impl Write for OutputSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(data);
        if self.decoder.json_stream() {
            while let Some(line) = self.codec.decode(&mut self.buffer)? {
                self.emit(line);
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
