// MIT License - Copyright (c) 2026 Peter Wright
// Supported panel models

//! One variant per supported panel family.
//!
//! Each model supplies the same capability set: a frame policy, an event
//! parser, a report parser, default serial settings and an optional
//! severity quirk. Parsers are pure: malformed frames yield `None`, never
//! an error, so a bad frame can only ever be logged and dropped.

pub mod edwards_est3x;
pub mod edwards_io1000;
pub mod notifier_nfs;
pub mod simplex;

use std::fmt;

use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::framing::FramePolicy;
use crate::message::PanelRecord;
use crate::serial::SerialSettings;
use crate::severity::SeverityTable;

/// Supported fire alarm control panel models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanelModel {
    /// Edwards iO1000 / iO64: `CODE | time date key:value...` events
    EdwardsIo1000,
    /// Edwards EST3 / EST3X: `::`-separated fields
    EdwardsEst3x,
    /// Notifier NFS-320 / NFS2-640: one line per event, columns padded with spaces
    NotifierNfs,
    /// Simplex 4100ES: timestamp header followed by `-` data lines
    Simplex,
}

/// Panel model ids as configured locally and pushed remotely.
const MODEL_IDS: [(u32, PanelModel); 4] = [
    (10001, PanelModel::EdwardsIo1000),
    (10002, PanelModel::EdwardsEst3x),
    (10003, PanelModel::NotifierNfs),
    (10004, PanelModel::Simplex),
];

/// What a report parser made of a report frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Parsed(PanelRecord),
    Unparseable,
    /// The model's reports are not forwarded.
    Unsupported,
}

impl PanelModel {
    pub const ALL: [PanelModel; 4] = [
        PanelModel::EdwardsIo1000,
        PanelModel::EdwardsEst3x,
        PanelModel::NotifierNfs,
        PanelModel::Simplex,
    ];

    pub fn from_id(id: u32) -> Result<Self> {
        MODEL_IDS
            .iter()
            .find(|(model_id, _)| *model_id == id)
            .map(|(_, model)| *model)
            .ok_or(BridgeError::UnsupportedPanelModel(id))
    }

    pub fn id(&self) -> u32 {
        MODEL_IDS
            .iter()
            .find(|(_, model)| model == self)
            .map(|(id, _)| *id)
            .unwrap_or_default()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::EdwardsIo1000 => "Edwards iO1000",
            Self::EdwardsEst3x => "Edwards EST3x",
            Self::NotifierNfs => "Notifier NFS",
            Self::Simplex => "Simplex 4100",
        }
    }

    pub fn frame_policy(&self) -> FramePolicy {
        match self {
            Self::EdwardsIo1000 => edwards_io1000::FRAME_POLICY,
            Self::EdwardsEst3x => edwards_est3x::FRAME_POLICY,
            Self::NotifierNfs => notifier_nfs::FRAME_POLICY,
            Self::Simplex => simplex::FRAME_POLICY,
        }
    }

    pub fn serial_defaults(&self) -> SerialSettings {
        match self {
            Self::NotifierNfs => notifier_nfs::serial_defaults(),
            Self::Simplex => simplex::serial_defaults(),
            Self::EdwardsIo1000 | Self::EdwardsEst3x => SerialSettings::default(),
        }
    }

    pub fn parse_event(&self, frame: &str) -> Option<PanelRecord> {
        match self {
            Self::EdwardsIo1000 => edwards_io1000::parse_event(frame),
            Self::EdwardsEst3x => edwards_est3x::parse_event(frame),
            Self::NotifierNfs => notifier_nfs::parse_event(frame),
            Self::Simplex => simplex::parse_event(frame),
        }
    }

    pub fn parse_report(&self, frame: &str) -> ReportOutcome {
        match self {
            Self::EdwardsIo1000 => match edwards_io1000::parse_report(frame) {
                Some(record) => ReportOutcome::Parsed(record),
                None => ReportOutcome::Unparseable,
            },
            Self::EdwardsEst3x | Self::NotifierNfs | Self::Simplex => ReportOutcome::Unsupported,
        }
    }

    /// Severity of `code` for this model.
    ///
    /// Models with a severity quirk override the table; the override is
    /// logged when it contradicts an explicit table entry.
    pub fn resolve_severity(&self, table: &SeverityTable, code: &str) -> i32 {
        let quirk = match self {
            Self::Simplex => simplex::severity_override(code),
            _ => None,
        };
        match quirk {
            Some(severity) => {
                if let Some(configured) = table.lookup(self.id(), code)
                    && configured != severity
                {
                    debug!(
                        "{}: code {code:?} escalated to {severity} (table says {configured})",
                        self.name()
                    );
                }
                severity
            }
            None => table.resolve(self.id(), code),
        }
    }
}

impl fmt::Display for PanelModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

/// Non-blank, trimmed lines of a frame.
pub(crate) fn frame_lines(frame: &str) -> Vec<&str> {
    frame
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SEVERITY_MAX;

    #[test]
    fn test_model_id_roundtrip() {
        for model in PanelModel::ALL {
            assert_eq!(PanelModel::from_id(model.id()).unwrap(), model);
        }
    }

    #[test]
    fn test_unknown_model_id() {
        let err = PanelModel::from_id(20001).unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedPanelModel(20001)));
    }

    #[test]
    fn test_display() {
        assert_eq!(PanelModel::EdwardsIo1000.to_string(), "Edwards iO1000 (10001)");
    }

    #[test]
    fn test_only_io1000_parses_reports() {
        assert_eq!(
            PanelModel::NotifierNfs.parse_report("*****\nX\n*****\n"),
            ReportOutcome::Unsupported
        );
        assert_eq!(
            PanelModel::EdwardsIo1000.parse_report("garbage"),
            ReportOutcome::Unparseable
        );
    }

    #[test]
    fn test_severity_from_table_and_default() {
        let table = SeverityTable::new(999).with_levels(10001, [("FIRE ALARM", 6)]);
        let model = PanelModel::EdwardsIo1000;
        assert_eq!(model.resolve_severity(&table, "FIRE ALARM"), 6);
        assert_eq!(model.resolve_severity(&table, "DOOR OPEN"), 999);
    }

    #[test]
    fn test_simplex_colon_quirk_overrides_table() {
        let table = SeverityTable::new(999).with_levels(10004, [("1:M1-17 ALARM", 2)]);
        let model = PanelModel::Simplex;
        assert_eq!(model.resolve_severity(&table, "1:M1-17 ALARM"), SEVERITY_MAX);
        assert_eq!(model.resolve_severity(&table, "SYSTEM TROUBLE"), 999);
    }

    #[test]
    fn test_colon_has_no_effect_on_other_models() {
        let table = SeverityTable::new(0);
        assert_eq!(PanelModel::EdwardsEst3x.resolve_severity(&table, "A:B"), 0);
    }

    #[test]
    fn test_frame_lines() {
        assert_eq!(frame_lines("  a \n\n b\n"), vec!["a", "b"]);
    }
}
