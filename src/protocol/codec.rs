// src/protocol/codec.rs
//! Newline framing for engine output
//!
//! Like `tokio_util::codec::LinesCodec`, but invalid UTF-8 is replaced
//! instead of failing the stream, so one bad byte never ends a run.

use bytes::BytesMut;
use std::io;
use tokio_util::codec::Decoder;

#[derive(Debug, Default, Clone)]
pub struct LineCodec {
    /// Bytes already scanned for a newline
    next_index: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

fn to_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let start = self.next_index.min(buf.len());
        match buf[start..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let newline = start + offset;
                self.next_index = 0;
                let frame = buf.split_to(newline + 1);
                Ok(Some(to_line(&frame[..newline])))
            }
            None => {
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if buf.is_empty() {
            Ok(None)
        } else {
            let rest = buf.split();
            Ok(Some(to_line(&rest)))
        }
    }
}
