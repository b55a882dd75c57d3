//! Decoding of streamed chat responses
//!
//! The backend answers a streaming request with newline-delimited lines.
//! Each line is either an SSE `data: {...}` frame carrying one increment,
//! or a bare JSON object carrying the whole reply. Bare objects are turned
//! into one fragment per character by `CharFragments` so callers always
//! see an incremental sequence.

use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::{Error, Result};

/// A decoded response line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One increment of the reply
    Fragment(String),
    /// The complete reply in a single object
    Whole(String),
    /// The backend reported a failure
    Error(String),
    /// Blank, comment, end marker or undecodable line
    Skip,
}

/// Decode one response line
#[must_use]
pub fn decode_line(line: &str) -> Frame {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Frame::Skip;
    }

    if let Some(payload) = line.strip_prefix("data:") {
        let payload = payload.trim();
        if payload == "[DONE]" {
            return Frame::Skip;
        }
        let Some(object) = parse_object(payload) else {
            return Frame::Skip;
        };
        return match text_field(&object, &["text", "textResponse"]) {
            Some(text) => Frame::Fragment(text),
            None => error_field(&object).map_or(Frame::Skip, Frame::Error),
        };
    }

    let Some(object) = parse_object(line) else {
        tracing::trace!(line, "skipping undecodable stream line");
        return Frame::Skip;
    };
    match text_field(&object, &["textResponse", "text"]) {
        Some(text) => Frame::Whole(text),
        None => error_field(&object).map_or(Frame::Skip, Frame::Error),
    }
}

fn parse_object(payload: &str) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_str(payload) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// First non-empty string among `keys`
fn text_field(object: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .find(|text| !text.is_empty())
        .map(ToString::to_string)
}

/// The `error` field, if it signals a failure
///
/// `null`, `false` and empty strings do not.
pub(crate) fn error_field(object: &serde_json::Map<String, Value>) -> Option<String> {
    match object.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(true) => Some("backend reported an error".to_string()),
        other => Some(other.to_string()),
    }
}

/// Iterator over the characters of a string, each as its own fragment
#[derive(Debug, Clone)]
pub struct CharFragments {
    text: String,
    pos: usize,
}

impl Iterator for CharFragments {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let c = self.text[self.pos..].chars().next()?;
        self.pos += c.len_utf8();
        Some(c.to_string())
    }
}

/// Split a whole reply into single-character fragments
#[must_use]
pub fn char_fragments(text: impl Into<String>) -> CharFragments {
    CharFragments {
        text: text.into(),
        pos: 0,
    }
}

struct LineReader<S> {
    body: Pin<Box<S>>,
    buffer: Vec<u8>,
    idle: Duration,
    done: bool,
}

/// Split a byte stream into lines
///
/// Waiting longer than `idle` for the next chunk fails with
/// `RemoteTimeout`; a transport error fails with `RemoteUnavailable`.
/// Either error ends the stream.
pub fn body_lines<S, B, E>(body: S, idle: Duration) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let reader = LineReader {
        body: Box::pin(body),
        buffer: Vec::new(),
        idle,
        done: false,
    };

    futures::stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(pos) = reader.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = reader.buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                return Some((Ok(line), reader));
            }

            if reader.done {
                if reader.buffer.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut reader.buffer);
                let line = String::from_utf8_lossy(&rest).trim_end().to_string();
                return Some((Ok(line), reader));
            }

            match tokio::time::timeout(reader.idle, reader.body.next()).await {
                Ok(Some(Ok(chunk))) => reader.buffer.extend_from_slice(chunk.as_ref()),
                Ok(None) => reader.done = true,
                Ok(Some(Err(e))) => {
                    reader.done = true;
                    reader.buffer.clear();
                    let err = Error::RemoteUnavailable(format!("response stream failed: {e}"));
                    return Some((Err(err), reader));
                }
                Err(_) => {
                    reader.done = true;
                    reader.buffer.clear();
                    return Some((Err(Error::RemoteTimeout(reader.idle.as_secs())), reader));
                }
            }
        }
    })
}

enum Decoder<L> {
    Lines(Pin<Box<L>>),
    Chars(CharFragments),
    Done,
}

/// Turn response lines into reply fragments
///
/// SSE frames yield their increments in arrival order. A bare whole-reply
/// object yields its characters and ends the sequence. An error frame
/// yields `RemoteProtocol` and ends the sequence.
pub fn fragments<L>(lines: L) -> impl Stream<Item = Result<String>>
where
    L: Stream<Item = Result<String>>,
{
    futures::stream::unfold(Decoder::Lines(Box::pin(lines)), |state| async move {
        match state {
            Decoder::Done => None,
            Decoder::Chars(mut chars) => chars.next().map(|c| (Ok(c), Decoder::Chars(chars))),
            Decoder::Lines(mut lines) => loop {
                let line = match lines.next().await? {
                    Ok(line) => line,
                    Err(e) => return Some((Err(e), Decoder::Done)),
                };

                match decode_line(&line) {
                    Frame::Skip => {}
                    Frame::Fragment(text) => return Some((Ok(text), Decoder::Lines(lines))),
                    Frame::Whole(text) => {
                        let mut chars = char_fragments(text);
                        return chars.next().map(|c| (Ok(c), Decoder::Chars(chars)));
                    }
                    Frame::Error(detail) => {
                        tracing::warn!(error = %detail, "error frame in chat stream");
                        return Some((Err(Error::protocol(None, &detail)), Decoder::Done));
                    }
                }
            },
        }
    })
}
