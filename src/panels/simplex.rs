// MIT License - Copyright (c) 2026 Peter Wright
// Simplex 4100ES printer protocol

//! ```text
//! 10:15:32 THU 14-MAR-24
//! -1:M1-17 ALARM
//! -SMOKE DETECTOR 3RD FLOOR EAST
//! ```
//!
//! The first line is the panel timestamp. Data lines start with `-`: the
//! first carries the event code, the rest are metadata. Codes with a `:`
//! are point addresses and always report at maximum severity.

use crate::constants::SEVERITY_MAX;
use crate::framing::{BlankLineStrategy, FramePolicy};
use crate::message::PanelRecord;
use crate::panels::frame_lines;
use crate::serial::{Parity, SerialSettings};

const DATA_PREFIX: char = '-';

pub const FRAME_POLICY: FramePolicy = FramePolicy {
    report_delimiter: "#####",
    report_terminator_count: 2,
    strategy: BlankLineStrategy::WaitForBlank,
    report_trailer: None,
    event_trailer: Some(has_data_line),
};

/// The panel sometimes prints the timestamp, a blank line, then the data.
fn has_data_line(text: &str) -> bool {
    text.lines().any(|l| l.trim_start().starts_with(DATA_PREFIX))
}

pub fn serial_defaults() -> SerialSettings {
    SerialSettings {
        baud_rate: 9600,
        data_bits: 8,
        parity: Parity::None,
        stop_bits: 1,
        software_flow_control: true,
        ..SerialSettings::default()
    }
}

pub fn severity_override(code: &str) -> Option<i32> {
    code.contains(':').then_some(SEVERITY_MAX)
}

pub fn parse_event(frame: &str) -> Option<PanelRecord> {
    let lines = frame_lines(frame);
    let (header, rest) = lines.split_first()?;
    if header.starts_with(DATA_PREFIX) {
        return None;
    }

    let mut data = rest
        .iter()
        .filter_map(|l| l.strip_prefix(DATA_PREFIX))
        .map(str::trim);
    let code = data.next().filter(|c| !c.is_empty())?;
    let metadata = data.collect::<Vec<_>>().join(" | ");

    Some(PanelRecord {
        code: code.to_string(),
        panel_time: Some(header.to_string()),
        metadata,
    })
}
