// MIT License - Copyright (c) 2026 Peter Wright
// Edwards EST3 / EST3X printer protocol

//! `ALARM :: 14:02:11 03/14/24 :: 01020045 :: PULL STATION LOBBY`
//!
//! Any further lines in the frame are appended to the metadata.

use crate::framing::{BlankLineStrategy, FramePolicy};
use crate::message::PanelRecord;
use crate::panels::frame_lines;

const FIELD_SEPARATOR: &str = "::";
const END_OF_REPORT: &str = "END OF REPORT";

pub const FRAME_POLICY: FramePolicy = FramePolicy {
    report_delimiter: "=====",
    report_terminator_count: 2,
    strategy: BlankLineStrategy::WaitForBlank,
    report_trailer: Some(has_report_trailer),
    event_trailer: None,
};

/// The panel prints blank lines inside reports; only the closing marker ends one.
fn has_report_trailer(text: &str) -> bool {
    text.lines().any(|l| l.trim() == END_OF_REPORT)
}

pub fn parse_event(frame: &str) -> Option<PanelRecord> {
    let lines = frame_lines(frame);
    let (header, extra) = lines.split_first()?;

    let fields: Vec<&str> = header.split(FIELD_SEPARATOR).map(str::trim).collect();
    if fields.len() < 2 {
        return None;
    }
    let code = fields[0];
    if code.is_empty() {
        return None;
    }
    let panel_time = Some(fields[1]).filter(|t| !t.is_empty()).map(String::from);

    let metadata = fields[2..]
        .iter()
        .chain(extra.iter())
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" | ");

    Some(PanelRecord {
        code: code.to_string(),
        panel_time,
        metadata,
    })
}
