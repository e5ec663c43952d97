//! Role-masked views of records.
//!
//! Views are what a dashboard renders: the record list filtered to the
//! caller's audience, and detail views with locked section values withheld.

use crate::config::SimChartConfig;
use crate::record::{Attachment, SectionLabel, SimulationId, SimulationRecord};
use crate::role::{Audience, Role};

use super::access::{can_edit_record, can_open, can_read_section_value, is_visible};

/// Message shown instead of a detail view when a record is locked.
pub const LOCKED_NOTICE: &str = "This simulation is locked";

/// A section value as the caller is allowed to see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionValue {
    /// The stored value (possibly empty).
    Visible(String),
    /// The value exists but is locked for this role.
    Withheld,
}

/// One section in a detail view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionView {
    /// Which section.
    pub label: SectionLabel,
    /// Value or withheld marker.
    pub value: SectionValue,
    /// The stored lock flag (admins see it to toggle it).
    pub locked: bool,
}

impl SectionView {
    /// Text to render: the value, or the configured placeholder.
    #[must_use]
    pub fn display<'a>(&'a self, cfg: &'a SimChartConfig) -> &'a str {
        match &self.value {
            SectionValue::Withheld => &cfg.locked_placeholder,
            SectionValue::Visible(v) if v.trim().is_empty() => &cfg.unavailable_placeholder,
            SectionValue::Visible(v) => v,
        }
    }
}

/// A record detail view, masked for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordView {
    #[allow(missing_docs)]
    pub id: SimulationId,
    #[allow(missing_docs)]
    pub title: String,
    #[allow(missing_docs)]
    pub description: String,
    #[allow(missing_docs)]
    pub assigned_to: Audience,
    #[allow(missing_docs)]
    pub locked: bool,
    /// Sections in display order.
    pub sections: Vec<SectionView>,
    #[allow(missing_docs)]
    pub notes: String,
    #[allow(missing_docs)]
    pub attachments: Vec<Attachment>,
    /// Whether the viewer may edit and toggle locks.
    pub editable: bool,
}

/// Shown in place of a detail view for a locked record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedNotice {
    #[allow(missing_docs)]
    pub id: SimulationId,
    #[allow(missing_docs)]
    pub title: String,
    /// User-facing text.
    pub message: String,
}

/// Result of trying to open a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The caller may see the record.
    Opened(RecordView),
    /// The record is locked for this role.
    Locked(LockedNotice),
    /// The record is not addressed to this role.
    Hidden,
}

/// Records that belong in `role`'s list, in snapshot order.
#[must_use]
pub fn visible_records(role: Role, records: &[SimulationRecord]) -> Vec<&SimulationRecord> {
    records.iter().filter(|r| is_visible(role, r)).collect()
}

/// Builds a detail view with locked sections withheld for non-admins.
///
/// Does not check the record lock; see [`open`].
#[must_use]
pub fn mask(role: Role, record: &SimulationRecord) -> RecordView {
    let sections = SectionLabel::ALL
        .into_iter()
        .map(|label| {
            let stored = record.section(label);
            let value = if can_read_section_value(role, record, label) {
                SectionValue::Visible(stored.map(|s| s.value.clone()).unwrap_or_default())
            } else {
                SectionValue::Withheld
            };
            SectionView {
                label,
                value,
                locked: stored.is_some_and(|s| s.locked),
            }
        })
        .collect();

    RecordView {
        id: record.id.clone(),
        title: record.title.clone(),
        description: record.description.clone(),
        assigned_to: record.assigned_to,
        locked: record.locked,
        sections,
        notes: record.notes.clone(),
        attachments: record.attachments.clone(),
        editable: can_edit_record(role),
    }
}

/// Decides what `role` gets when opening `record`.
#[must_use]
pub fn open(role: Role, record: &SimulationRecord) -> OpenOutcome {
    if !is_visible(role, record) {
        return OpenOutcome::Hidden;
    }
    if !can_open(role, record) {
        return OpenOutcome::Locked(LockedNotice {
            id: record.id.clone(),
            title: record.title.clone(),
            message: LOCKED_NOTICE.to_string(),
        });
    }
    OpenOutcome::Opened(mask(role, record))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(id: &str, assigned_to: Audience) -> SimulationRecord {
        let mut r = SimulationRecord::draft(id, "", Utc::now());
        r.id = SimulationId::new(id);
        r.assigned_to = assigned_to;
        r
    }

    #[test]
    fn test_visible_records_keeps_order() {
        let records = vec![
            record("a", Audience::All),
            record("b", Audience::Admin),
            record("c", Audience::Student),
        ];
        let ids: Vec<_> = visible_records(Role::Student, &records)
            .into_iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(visible_records(Role::Admin, &records).len(), 3);
    }

    #[test]
    fn test_mask_withholds_locked_sections() {
        let cfg = SimChartConfig::default();
        let mut r = record("a", Audience::All);
        r.sections.insert(
            SectionLabel::CtScan,
            crate::record::Section {
                value: "Left MCA infarct".to_string(),
                locked: true,
            },
        );

        let student = mask(Role::Student, &r);
        let ct = student.sections.iter().find(|s| s.label == SectionLabel::CtScan).unwrap();
        assert_eq!(ct.value, SectionValue::Withheld);
        assert_eq!(ct.display(&cfg), "Locked");
        let cbc = student.sections.iter().find(|s| s.label == SectionLabel::Cbc).unwrap();
        assert_eq!(cbc.display(&cfg), "Not available");
        assert!(!student.editable);

        let admin = mask(Role::Admin, &r);
        let ct = admin.sections.iter().find(|s| s.label == SectionLabel::CtScan).unwrap();
        assert_eq!(ct.display(&cfg), "Left MCA infarct");
        assert!(ct.locked);
        assert!(admin.editable);
    }

    #[test]
    fn test_open_outcomes() {
        let mut r = record("a", Audience::Student);
        r.locked = true;
        match open(Role::Student, &r) {
            OpenOutcome::Locked(notice) => assert_eq!(notice.message, LOCKED_NOTICE),
            other => panic!("expected locked notice, got {other:?}"),
        }
        assert!(matches!(open(Role::Admin, &r), OpenOutcome::Opened(_)));

        let hidden = record("b", Audience::Admin);
        assert_eq!(open(Role::Student, &hidden), OpenOutcome::Hidden);
    }
}
