//! Claude CLI `stream-json` output parsing
//!
//! Three layers, each testable without a process:
//!
//! ```text
//! stdout bytes ──► NdjsonLineCodec ──► decode_line ──► TurnTracker::apply ──► ProxyEvent*
//!                  (non-blank lines)   (CliOutput)     (per-run state)
//! ```

use crate::agent::types::{ExitCode, ProxyEvent};
use bytes::{Buf, BytesMut};
use serde_json::Value;
use tokio_util::codec::Decoder;

// =============================================================================
// Line splitting
// =============================================================================

/// Longest stdout line accepted from the CLI, excluding the newline
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// One frame produced by [`NdjsonLineCodec`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NdjsonLine {
    Line(String),
    /// A line longer than the limit was discarded; `length` excludes the newline
    Oversized { length: usize },
}

/// Splits a byte stream into non-blank lines.
///
/// Partial lines are buffered across reads; a trailing line without a
/// newline is emitted at EOF. Invalid UTF-8 is replaced, never rejected.
/// Lines longer than `max_length` are skipped up to the next newline and
/// reported as [`NdjsonLine::Oversized`] instead of failing the stream.
#[derive(Debug)]
pub struct NdjsonLineCodec {
    max_length: usize,
    /// Bytes already scanned for a newline
    scanned: usize,
    /// Inside an oversized line
    discarding: bool,
    discarded: usize,
}

impl NdjsonLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            scanned: 0,
            discarding: false,
            discarded: 0,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn finish_discard(&mut self, length: usize) -> NdjsonLine {
        self.discarding = false;
        self.discarded = 0;
        self.scanned = 0;
        NdjsonLine::Oversized { length }
    }
}

impl Default for NdjsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NdjsonLineCodec {
    type Item = NdjsonLine;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<NdjsonLine>, Self::Error> {
        loop {
            // Never look further than one byte past the limit
            let read_to = buf.len().min(self.max_length.saturating_add(1));
            let newline = buf[self.scanned..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.scanned + offset);

            if self.discarding {
                match newline {
                    Some(end) => {
                        buf.advance(end + 1);
                        let length = self.discarded + end;
                        return Ok(Some(self.finish_discard(length)));
                    }
                    None => {
                        buf.advance(read_to);
                        self.discarded += read_to;
                        if buf.is_empty() {
                            return Ok(None);
                        }
                        continue;
                    }
                }
            }

            match newline {
                Some(end) => {
                    let line = buf.split_to(end + 1);
                    self.scanned = 0;

                    let text = String::from_utf8_lossy(&line[..end]);
                    if !text.trim().is_empty() {
                        return Ok(Some(NdjsonLine::Line(text.into_owned())));
                    }
                }
                None if buf.len() > self.max_length => {
                    self.discarding = true;
                    self.scanned = 0;
                }
                None => {
                    self.scanned = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<NdjsonLine>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if self.discarding {
            let length = self.discarded + buf.len();
            buf.clear();
            return Ok(Some(self.finish_discard(length)));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        let rest = buf.split_to(buf.len());
        self.scanned = 0;
        let text = String::from_utf8_lossy(&rest);
        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(NdjsonLine::Line(text.into_owned())))
        }
    }
}

// =============================================================================
// Line decoding
// =============================================================================

/// One decoded stdout line, tagged by the record's `type`
#[derive(Debug, Clone, PartialEq)]
pub enum CliOutput {
    /// `system` record with subtype `init`
    SystemInit {
        session_id: Option<String>,
        model: Option<String>,
        cwd: Option<String>,
        record: Value,
    },
    /// `system` record with any other subtype
    System { subtype: Option<String> },
    User(Value),
    /// `assistant` record; `None` when it carries no content entries
    Assistant { text: Option<String> },
    Result { subtype: Option<String> },
    /// JSON object with an unknown or missing `type`
    Other(Value),
    /// Not a JSON object
    Raw(String),
}

/// Decode one line. Never fails: undecodable input becomes [`CliOutput::Raw`].
pub fn decode_line(line: &str) -> CliOutput {
    let record = match serde_json::from_str::<Value>(line) {
        Ok(record @ Value::Object(_)) => record,
        Ok(_) => return CliOutput::Raw(line.to_string()),
        Err(e) => {
            tracing::debug!("Non-JSON CLI output ({}): {}", e, preview(line));
            return CliOutput::Raw(line.to_string());
        }
    };

    match record.get("type").and_then(Value::as_str) {
        Some("system") => {
            let subtype = str_field(&record, "subtype");
            if subtype.as_deref() == Some("init") {
                CliOutput::SystemInit {
                    session_id: str_field(&record, "session_id").filter(|s| !s.is_empty()),
                    model: str_field(&record, "model"),
                    cwd: str_field(&record, "cwd"),
                    record,
                }
            } else {
                CliOutput::System { subtype }
            }
        }
        Some("user") => CliOutput::User(record),
        Some("assistant") => CliOutput::Assistant {
            text: first_content_text(&record),
        },
        Some("result") => CliOutput::Result {
            subtype: str_field(&record, "subtype"),
        },
        _ => CliOutput::Other(record),
    }
}

fn str_field(record: &Value, key: &str) -> Option<String> {
    record.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Text of `message.content[0]`; an entry without text yields an empty string
fn first_content_text(record: &Value) -> Option<String> {
    let first = record
        .get("message")?
        .get("content")?
        .as_array()?
        .first()?;
    Some(
        first
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    )
}

fn preview(line: &str) -> &str {
    match line.char_indices().nth(200) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

// =============================================================================
// Per-run dispatch state
// =============================================================================

/// Events produced by one line, plus a newly captured session id
#[derive(Debug, Default, PartialEq)]
pub struct Dispatch {
    pub captured_session_id: Option<String>,
    pub events: Vec<ProxyEvent>,
}

/// State of one bridge invocation: session id capture, the assistant
/// message buffer and the one-shot `session-created` flag.
#[derive(Debug)]
pub struct TurnTracker {
    session_id: Option<String>,
    caller_supplied: bool,
    has_message: bool,
    message_buffer: String,
    session_created_sent: bool,
}

impl TurnTracker {
    pub fn new(caller_session_id: Option<String>, has_message: bool) -> Self {
        Self {
            caller_supplied: caller_session_id.is_some(),
            session_id: caller_session_id,
            has_message,
            message_buffer: String::new(),
            session_created_sent: false,
        }
    }

    /// Captured id, else the caller-supplied one
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// No caller-supplied id, and a non-empty message (whitespace counts)
    pub fn is_new_session(&self) -> bool {
        !self.caller_supplied && self.has_message
    }

    /// Text accumulated for the current assistant turn
    pub fn message_buffer(&self) -> &str {
        &self.message_buffer
    }

    pub fn apply(&mut self, output: CliOutput) -> Dispatch {
        let mut dispatch = Dispatch::default();

        match output {
            CliOutput::SystemInit {
                session_id,
                model,
                cwd,
                record,
            } => {
                if let Some(id) = session_id.filter(|_| self.session_id.is_none()) {
                    tracing::info!(session_id = %id, "Captured CLI session id");
                    self.session_id = Some(id.clone());
                    dispatch.captured_session_id = Some(id.clone());

                    if !self.caller_supplied && !self.session_created_sent {
                        self.session_created_sent = true;
                        dispatch.events.push(ProxyEvent::SessionCreated {
                            session_id: id,
                            model,
                            cwd,
                        });
                    }
                }
                dispatch.events.push(ProxyEvent::System { data: record });
            }
            CliOutput::System { subtype } => {
                tracing::debug!(subtype = ?subtype, "Ignoring CLI system message");
            }
            CliOutput::User(record) => {
                dispatch.events.push(ProxyEvent::User { data: record });
            }
            CliOutput::Assistant { text: Some(text) } => {
                self.message_buffer.push_str(&text);
                dispatch.events.push(ProxyEvent::text_delta(text));
            }
            CliOutput::Assistant { text: None } => {}
            CliOutput::Result { subtype } => {
                if !self.message_buffer.is_empty() {
                    self.message_buffer.clear();
                    dispatch.events.push(ProxyEvent::content_block_stop());
                }
                dispatch.events.push(ProxyEvent::Complete {
                    session_id: self.session_id.clone(),
                    success: Some(subtype.as_deref() == Some("success")),
                    exit_code: ExitCode::Absent,
                    is_new_session: self.is_new_session(),
                });
            }
            CliOutput::Other(record) => {
                dispatch.events.push(ProxyEvent::Passthrough { data: record });
            }
            CliOutput::Raw(line) => {
                dispatch.events.push(ProxyEvent::RawOutput { data: line });
            }
        }

        dispatch
    }
}
