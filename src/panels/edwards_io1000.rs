// MIT License - Copyright (c) 2026 Peter Wright
// Edwards iO1000 printer protocol

//! Event frames look like:
//!
//! ```text
//! FIRE ALARM | 10:15:32 03/14/24 NODE:1 DEV:0023
//! SMOKE DETECTOR 2ND FLOOR HALL
//!
//! ```
//!
//! The header is split on `|`: the event code, then the panel time and
//! date followed by `key:value` tokens. An optional second line is free
//! text. Reports are framed by four `-----------------` lines.

use crate::framing::{BlankLineStrategy, FramePolicy};
use crate::message::PanelRecord;
use crate::panels::frame_lines;

pub const REPORT_DELIMITER: &str = "-----------------";

pub const FRAME_POLICY: FramePolicy = FramePolicy {
    report_delimiter: REPORT_DELIMITER,
    report_terminator_count: 4,
    strategy: BlankLineStrategy::WaitForBlank,
    report_trailer: None,
    event_trailer: None,
};

pub fn parse_event(frame: &str) -> Option<PanelRecord> {
    let lines = frame_lines(frame);
    let header = lines.first()?;

    let mut parts = header.split('|');
    let code = parts.next()?.trim();
    let rest = parts.next()?;
    if code.is_empty() {
        return None;
    }

    let mut tokens = rest.split_whitespace();
    let time = tokens.next()?;
    let date = tokens.next()?;

    let mut metadata = String::new();
    for token in tokens {
        let (key, value) = token.split_once(':')?;
        if value.contains(':') {
            return None;
        }
        metadata.push_str(&format!("{}: {} | ", key.trim(), value.trim()));
    }

    if let Some(extra) = lines.get(1) {
        metadata.push_str("Additional_Metadata: ");
        metadata.push_str(extra);
    }

    Some(PanelRecord {
        code: code.to_string(),
        panel_time: Some(format!("{time} {date}")),
        metadata,
    })
}

/// Reports are forwarded whole; the panel time comes from the block after
/// the first delimiter, which is one or two title lines long.
pub fn parse_report(frame: &str) -> Option<PanelRecord> {
    let lines = frame_lines(frame);
    let block = lines.get(1..4)?;

    let stamp = if block[2].contains(REPORT_DELIMITER) {
        block[1]
    } else {
        block[2]
    };
    let mut tokens = stamp.split_whitespace();
    let time = tokens.next()?;
    let date = tokens.next()?;

    Some(PanelRecord {
        code: frame.trim_end().to_string(),
        panel_time: Some(format!("{time} {date}")),
        metadata: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_with_metadata() {
        let frame = "FIRE ALARM | 10:15:32 03/14/24 NODE:1 DEV:0023\nSMOKE DETECTOR 2ND FLOOR HALL\n";
        let rec = parse_event(frame).unwrap();
        assert_eq!(rec.code, "FIRE ALARM");
        assert_eq!(rec.panel_time.as_deref(), Some("10:15:32 03/14/24"));
        assert_eq!(
            rec.metadata,
            "NODE: 1 | DEV: 0023 | Additional_Metadata: SMOKE DETECTOR 2ND FLOOR HALL"
        );
    }

    #[test]
    fn test_parse_event_header_only() {
        let rec = parse_event("TROUBLE | 08:00:01 01/02/24\n").unwrap();
        assert_eq!(rec.code, "TROUBLE");
        assert_eq!(rec.metadata, "");
    }

    #[test]
    fn test_missing_pipe_is_unparseable() {
        assert_eq!(parse_event("FIRE ALARM 10:15:32 03/14/24\n"), None);
    }

    #[test]
    fn test_missing_date_is_unparseable() {
        assert_eq!(parse_event("FIRE ALARM | 10:15:32\n"), None);
    }

    #[test]
    fn test_bad_metadata_token_is_unparseable() {
        assert_eq!(parse_event("FIRE | 10:15:32 03/14/24 NODE\n"), None);
        assert_eq!(parse_event("FIRE | 10:15:32 03/14/24 A:B:C\n"), None);
    }

    #[test]
    fn test_empty_frame_is_unparseable() {
        assert_eq!(parse_event("\n\n"), None);
        assert_eq!(parse_event(" | 10:15:32 03/14/24\n"), None);
    }

    #[test]
    fn test_parse_report_single_title_line() {
        let report = "-----------------\nSYSTEM STATUS\n10:20:00 03/14/24\n-----------------\nALARMS: 0\n-----------------\nEND\n-----------------\n";
        let rec = parse_report(report).unwrap();
        assert_eq!(rec.panel_time.as_deref(), Some("10:20:00 03/14/24"));
        assert!(rec.code.starts_with("-----------------\nSYSTEM STATUS"));
    }

    #[test]
    fn test_parse_report_two_title_lines() {
        let report = "-----------------\nDEVICE\nHISTORY\n11:00:00 03/15/24\n-----------------\n";
        let rec = parse_report(report).unwrap();
        assert_eq!(rec.panel_time.as_deref(), Some("11:00:00 03/15/24"));
    }

    #[test]
    fn test_short_report_is_unparseable() {
        assert_eq!(parse_report("-----------------\nX\n"), None);
    }
}
