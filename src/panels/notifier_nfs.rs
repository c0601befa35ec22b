// MIT License - Copyright (c) 2026 Peter Wright
// Notifier NFS-320 / NFS2-640 printer protocol

//! The NFS prints one event per line, columns padded with runs of spaces,
//! and never a blank line between events:
//!
//! ```text
//! FIRE ALARM   SMOKE (PHOTO) 2ND FLOOR   10:15A 031424 1M012
//! ```
//!
//! The timestamp column is found by its shape (`H:MM[A|P] DDMMYY`); the
//! device address that follows it and every other column go to metadata.

use crate::framing::{BlankLineStrategy, FramePolicy};
use crate::message::PanelRecord;
use crate::panels::frame_lines;
use crate::serial::{Parity, SerialSettings};

pub const FRAME_POLICY: FramePolicy = FramePolicy {
    report_delimiter: "*****",
    report_terminator_count: 2,
    strategy: BlankLineStrategy::SynthesizeAfterEachLine,
    report_trailer: None,
    event_trailer: None,
};

/// 2400 baud, 7E1 with XON/XOFF.
pub fn serial_defaults() -> SerialSettings {
    SerialSettings {
        baud_rate: 2400,
        data_bits: 7,
        parity: Parity::Even,
        stop_bits: 1,
        software_flow_control: true,
        ..SerialSettings::default()
    }
}

pub fn parse_event(frame: &str) -> Option<PanelRecord> {
    let lines = frame_lines(frame);
    let line = lines.first()?;

    let columns = split_columns(line);
    let (code, rest) = columns.split_first()?;

    let mut panel_time = None;
    let mut metadata: Vec<String> = Vec::new();
    for column in rest {
        if panel_time.is_none()
            && let Some((stamp, tail)) = split_timestamp(column)
        {
            panel_time = Some(stamp);
            if !tail.is_empty() {
                metadata.push(tail.to_string());
            }
            continue;
        }
        metadata.push(column.to_string());
    }
    metadata.extend(lines[1..].iter().map(|l| l.to_string()));

    Some(PanelRecord {
        code: code.to_string(),
        panel_time,
        metadata: metadata.join(" | "),
    })
}

/// Columns separated by three or more spaces.
fn split_columns(line: &str) -> Vec<&str> {
    line.split("   ")
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect()
}

/// `"10:15A 031424 1M012"` → `("10:15A 031424", "1M012")`.
fn split_timestamp(column: &str) -> Option<(String, &str)> {
    let mut words = column.splitn(3, ' ');
    let time = words.next()?;
    let date = words.next()?;
    if !is_clock(time) || !is_date(date) {
        return None;
    }
    let tail = words.next().unwrap_or("").trim();
    Some((format!("{time} {date}"), tail))
}

fn is_clock(s: &str) -> bool {
    let Some(s) = s.strip_suffix(['A', 'P']) else {
        return false;
    };
    let Some((h, m)) = s.split_once(':') else {
        return false;
    };
    matches!(h.len(), 1 | 2)
        && m.len() == 2
        && h.chars().chain(m.chars()).all(|c| c.is_ascii_digit())
}

fn is_date(s: &str) -> bool {
    s.len() == 6 && s.chars().all(|c| c.is_ascii_digit())
}
