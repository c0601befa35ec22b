// MIT License - Copyright (c) 2026 Peter Wright
// Serial stream framing

//! Turns the panel's printer-port byte stream into event and report frames.
//!
//! Bytes are split into lines; non-blank lines are appended to a
//! [`FrameAccumulator`] and blank lines (real or synthesized) run the
//! completion rules of the active [`FramePolicy`]:
//!
//! 1. delimiter count == report terminator count, buffer non-blank and the
//!    report trailer check passes → report
//! 2. delimiter count == 0, buffer non-blank and the event check passes → event
//! 3. otherwise keep accumulating

use tracing::{debug, warn};

use crate::error::BridgeError;

/// Longest line accepted before the pending bytes are treated as garbage.
pub const MAX_LINE_LEN: usize = 4096;

/// How a panel marks the end of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlankLineStrategy {
    /// Frames end on a blank line sent by the panel.
    WaitForBlank,
    /// The panel never sends blank lines; run the completion rules after every line.
    SynthesizeAfterEachLine,
}

/// Per-panel framing rules.
#[derive(Debug, Clone, Copy)]
pub struct FramePolicy {
    /// Substring that marks a report delimiter line.
    pub report_delimiter: &'static str,
    /// Number of delimiter lines that make a report complete.
    pub report_terminator_count: u32,
    pub strategy: BlankLineStrategy,
    /// Extra check a completed report buffer must pass.
    pub report_trailer: Option<fn(&str) -> bool>,
    /// Extra check a completed event buffer must pass.
    pub event_trailer: Option<fn(&str) -> bool>,
}

/// A completed frame, ready for a panel parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Event(String),
    Report(String),
}

/// Text gathered since the last dispatched frame.
#[derive(Debug, Default, Clone)]
pub struct FrameAccumulator {
    buffer: String,
    delimiter_count: u32,
}

impl FrameAccumulator {
    fn append(&mut self, line: &str, delimiter: &str) {
        if !delimiter.is_empty() && line.contains(delimiter) {
            self.delimiter_count += 1;
        }
        self.buffer.push_str(line);
        self.buffer.push('\n');
    }

    fn take(&mut self) -> String {
        self.delimiter_count = 0;
        std::mem::take(&mut self.buffer)
    }

    pub fn is_blank(&self) -> bool {
        self.buffer.trim().is_empty()
    }

    pub fn delimiter_count(&self) -> u32 {
        self.delimiter_count
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }
}

/// Result of feeding one chunk of bytes.
#[derive(Debug, Default)]
pub struct Feed {
    pub frames: Vec<Frame>,
    /// Set when undecodable bytes forced a flush; the caller should discard
    /// whatever is still in the port's input buffer.
    pub decode_error: Option<BridgeError>,
}

/// Line splitter plus framing state machine for one serial connection.
#[derive(Debug)]
pub struct Framer {
    policy: FramePolicy,
    acc: FrameAccumulator,
    pending: Vec<u8>,
}

impl Framer {
    pub fn new(policy: FramePolicy) -> Self {
        Self {
            policy,
            acc: FrameAccumulator::default(),
            pending: Vec::new(),
        }
    }

    pub fn accumulator(&self) -> &FrameAccumulator {
        &self.acc
    }

    /// Feed raw bytes. Frames are returned in the order their bytes arrived.
    pub fn feed(&mut self, bytes: &[u8]) -> Feed {
        let mut feed = Feed::default();
        self.pending.extend_from_slice(bytes);

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            match decode_line(&raw[..raw.len() - 1]) {
                Ok(line) => {
                    if let Some(frame) = self.push_line(&line) {
                        feed.frames.push(frame);
                    }
                }
                Err(details) => {
                    self.recover(&mut feed, details);
                    return feed;
                }
            }
        }

        if self.pending.len() > MAX_LINE_LEN {
            let details = format!("line exceeds {MAX_LINE_LEN} bytes without terminator");
            self.recover(&mut feed, details);
        }
        feed
    }

    /// Push one decoded line through the state machine.
    pub fn push_line(&mut self, line: &str) -> Option<Frame> {
        let line = line.trim();
        if line.is_empty() {
            return self.on_blank_line();
        }
        self.acc.append(line, self.policy.report_delimiter);
        match self.policy.strategy {
            BlankLineStrategy::WaitForBlank => None,
            BlankLineStrategy::SynthesizeAfterEachLine => self.on_blank_line(),
        }
    }

    /// Dispatch whatever has been gathered, preferring a report if one was in
    /// progress, and reset.
    pub fn flush(&mut self) -> Option<Frame> {
        if self.acc.is_blank() {
            self.acc.take();
            return None;
        }
        let in_report = self.acc.delimiter_count > 0;
        let text = self.acc.take();
        Some(if in_report {
            Frame::Report(text)
        } else {
            Frame::Event(text)
        })
    }

    /// Drop all framing state (port closed or panel model changed).
    pub fn reset(&mut self) {
        self.acc.take();
        self.pending.clear();
    }

    fn on_blank_line(&mut self) -> Option<Frame> {
        if self.acc.is_blank() {
            return None;
        }
        let count = self.acc.delimiter_count;
        let text = self.acc.text();

        if count == self.policy.report_terminator_count
            && self.policy.report_trailer.is_none_or(|check| check(text))
        {
            debug!("Report frame complete ({count} delimiters)");
            return Some(Frame::Report(self.acc.take()));
        }

        if count == 0 && self.policy.event_trailer.is_none_or(|check| check(text)) {
            return Some(Frame::Event(self.acc.take()));
        }

        None
    }

    fn recover(&mut self, feed: &mut Feed, details: String) {
        warn!("Undecodable serial data ({details}), flushing frame and input");
        if let Some(frame) = self.flush() {
            feed.frames.push(frame);
        }
        self.pending.clear();
        feed.decode_error = Some(BridgeError::Decode { details });
    }
}

/// Panels print latin-1, so every byte maps to a char. Only NUL marks garbage.
fn decode_line(raw: &[u8]) -> std::result::Result<String, String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    if let Some(pos) = raw.iter().position(|&b| b == 0) {
        return Err(format!("NUL byte at offset {pos}"));
    }
    Ok(raw.iter().map(|&b| b as char).collect())
}
