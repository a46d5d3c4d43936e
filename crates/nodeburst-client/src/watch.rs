use crate::error::{ClientError, Result};
use bytes::{Buf, Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use nodeburst_core::WatchEvent;
use serde_json::Value;
use std::collections::VecDeque;

/// Splits a chunked watch body into newline-delimited JSON events
///
/// Chunk boundaries are arbitrary; a line is only decoded once its
/// terminating newline has arrived (or the body ends).
#[derive(Debug, Default)]
pub struct WatchDecoder {
    buf: BytesMut,
}

impl WatchDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every event completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<WatchEvent<Value>>> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos);
            self.buf.advance(1);
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever is left once the body has ended
    pub fn finish(&mut self) -> Option<Result<WatchEvent<Value>>> {
        let rest = self.buf.split();
        decode_line(&rest)
    }

    /// Bytes held back waiting for a newline
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(line: &[u8]) -> Option<Result<WatchEvent<Value>>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(serde_json::from_slice(line).map_err(|e| ClientError::decode("watch event", e)))
}

/// Open watch on one resource collection
pub struct WatchStream {
    url: String,
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: WatchDecoder,
    pending: VecDeque<Result<WatchEvent<Value>>>,
    ended: bool,
}

impl WatchStream {
    pub(crate) fn new(url: String, response: reqwest::Response) -> Self {
        Self {
            url,
            body: response.bytes_stream().boxed(),
            decoder: WatchDecoder::new(),
            pending: VecDeque::new(),
            ended: false,
        }
    }

    /// Next decoded event; None once the server has closed the stream
    pub async fn next_event(&mut self) -> Option<Result<WatchEvent<Value>>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.ended {
                return None;
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.decoder.push(&chunk)),
                Some(Err(e)) => {
                    self.ended = true;
                    return Some(Err(ClientError::http(&self.url, e)));
                }
                None => {
                    self.ended = true;
                    return self.decoder.finish();
                }
            }
        }
    }
}

/// Resource version carried by a watch event object, if any
pub fn event_resource_version(object: &Value) -> Option<&str> {
    object
        .get("metadata")
        .and_then(|m| m.get("resourceVersion"))
        .and_then(Value::as_str)
        .filter(|rv| !rv.is_empty())
}

/// Whether an ERROR event reports that the watched resource version expired
pub fn is_expired_error(object: &Value) -> bool {
    object.get("code").and_then(Value::as_u64) == Some(410)
}
