//! Simulation record model.
//!
//! Records live in the remote collection as loosely-typed documents. Decoding
//! never fails: fields that are missing or malformed fall back to a default and
//! the problem is recorded as an [`IntegrityIssue`] on the decoded record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::{Document, DocumentSnapshot};
use crate::error::{ExecutionError, SimError, SimResult, TransportError, ValidationError};
use crate::policy::integrity::IntegrityIssue;
use crate::role::Audience;

/// Stable identifier of a simulation record, assigned by the collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulationId(String);

impl SimulationId {
    /// Wraps an existing document id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SimulationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SimulationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SimulationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The fixed set of lab and imaging sections on every record.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SectionLabel {
    #[serde(rename = "cbc")]
    Cbc,
    #[serde(rename = "cmp")]
    Cmp,
    #[serde(rename = "ekg")]
    Ekg,
    #[serde(rename = "xr")]
    XRay,
    #[serde(rename = "ct")]
    CtScan,
    #[serde(rename = "bloodGas")]
    BloodGas,
    #[serde(rename = "ultrasound")]
    Ultrasound,
}

impl SectionLabel {
    /// Every section, in display order.
    pub const ALL: [Self; 7] = [
        Self::Cbc,
        Self::Cmp,
        Self::Ekg,
        Self::XRay,
        Self::CtScan,
        Self::BloodGas,
        Self::Ultrasound,
    ];

    /// Document key used for this section.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Cbc => "cbc",
            Self::Cmp => "cmp",
            Self::Ekg => "ekg",
            Self::XRay => "xr",
            Self::CtScan => "ct",
            Self::BloodGas => "bloodGas",
            Self::Ultrasound => "ultrasound",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Cbc => "CBC",
            Self::Cmp => "CMP",
            Self::Ekg => "EKG",
            Self::XRay => "X-Ray",
            Self::CtScan => "CT Scan",
            Self::BloodGas => "Blood Gas",
            Self::Ultrasound => "Ultrasound",
        }
    }

    /// Looks up a section by its document key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.key() == key)
    }
}

impl fmt::Display for SectionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SectionLabel {
    type Err = ValidationError;

    /// Accepts either the document key (`xr`) or the label (`X-Ray`, any case).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::from_key(trimmed)
            .or_else(|| {
                Self::ALL
                    .into_iter()
                    .find(|l| l.label().eq_ignore_ascii_case(trimmed))
            })
            .ok_or_else(|| ValidationError::UnknownSection {
                label: s.to_string(),
            })
    }
}

/// One section's value and its independent lock flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Free-text finding.
    #[serde(default)]
    pub value: String,
    /// When true, non-admins cannot read `value`.
    #[serde(default)]
    pub locked: bool,
}

/// The `sections` aggregate field.
pub type Sections = BTreeMap<SectionLabel, Section>;

/// All sections, unlocked, with empty values.
#[must_use]
pub fn default_sections() -> Sections {
    SectionLabel::ALL
        .into_iter()
        .map(|label| (label, Section::default()))
        .collect()
}

/// Kind of an attached file.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    File,
    Image,
}

/// A file or image attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Display name.
    pub name: String,
    /// Download URL.
    pub url: String,
    /// File or image.
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
}

impl Attachment {
    /// Builds an attachment named after the last path segment of `url`.
    #[must_use]
    pub fn from_url(url: impl Into<String>, kind: AttachmentKind) -> Self {
        let url = url.into();
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let name = path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(path)
            .to_string();
        Self { name, url, kind }
    }
}

/// A simulation record as mirrored from the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRecord {
    /// Document id; never changes once assigned.
    pub id: SimulationId,
    /// Display title.
    pub title: String,
    /// Display description.
    pub description: String,
    /// Intended audience.
    pub assigned_to: Audience,
    /// Record-level lock.
    pub locked: bool,
    /// Per-section values and locks.
    pub sections: Sections,
    /// Admin-authored notes.
    pub notes: String,
    /// Attached files, in upload order.
    pub attachments: Vec<Attachment>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last write time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Problems found while decoding the source document.
    #[serde(skip)]
    pub integrity: Vec<IntegrityIssue>,
}

impl SimulationRecord {
    /// A freshly created record: addressed to everyone, unlocked, every
    /// section unlocked and empty.
    #[must_use]
    pub fn draft(
        title: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SimulationId::new(String::new()),
            title: title.into(),
            description: description.into(),
            assigned_to: Audience::All,
            locked: false,
            sections: default_sections(),
            notes: String::new(),
            attachments: Vec::new(),
            created_at: Some(now),
            updated_at: Some(now),
            integrity: Vec::new(),
        }
    }

    /// Decodes a collection snapshot entry.
    #[must_use]
    pub fn from_snapshot(doc: &DocumentSnapshot) -> Self {
        Self::from_document(&doc.id, &doc.data)
    }

    /// Decodes a document, recording any integrity issues instead of failing.
    #[must_use]
    pub fn from_document(id: &str, data: &Document) -> Self {
        let mut issues = Vec::new();

        let title = string_field(data, "title", &mut issues);
        let description = string_field(data, "description", &mut issues);
        let notes = string_field(data, "notes", &mut issues);

        let assigned_to = match data.get("assignedTo") {
            None | Some(Value::Null) => {
                issues.push(IntegrityIssue::MissingAudience);
                Audience::All
            }
            Some(Value::String(s)) => s.parse().unwrap_or_else(|_| {
                issues.push(IntegrityIssue::UnrecognizedAudience { value: s.clone() });
                Audience::All
            }),
            Some(other) => {
                issues.push(IntegrityIssue::UnrecognizedAudience {
                    value: other.to_string(),
                });
                Audience::All
            }
        };

        // A lock flag of the wrong type is treated as locked.
        let locked = match data.get("locked") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                issues.push(IntegrityIssue::MalformedField {
                    field: "locked".to_string(),
                });
                true
            }
        };

        let sections = decode_sections(data, &mut issues);
        let attachments = decode_attachments(data, &mut issues);
        let created_at = timestamp_field(data, "createdAt", &mut issues);
        let updated_at = timestamp_field(data, "updatedAt", &mut issues);

        Self {
            id: SimulationId::new(id),
            title,
            description,
            assigned_to,
            locked,
            sections,
            notes,
            attachments,
            created_at,
            updated_at,
            integrity: issues,
        }
    }

    /// Encodes the record body (everything but the id) as a document.
    pub fn to_document(&self) -> SimResult<Document> {
        let mut doc = to_object(self)?;
        doc.remove("id");
        Ok(doc)
    }

    /// Returns a section, if present.
    #[must_use]
    pub fn section(&self, label: SectionLabel) -> Option<&Section> {
        self.sections.get(&label)
    }

    /// True if decoding found nothing wrong with the source document.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.integrity.is_empty()
    }
}

/// A partial update to a record. Unset fields are left untouched.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<Audience>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<Sections>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

#[allow(missing_docs)]
impl RecordPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn assigned_to(mut self, audience: Audience) -> Self {
        self.assigned_to = Some(audience);
        self
    }

    #[must_use]
    pub fn locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }

    #[must_use]
    pub fn sections(mut self, sections: Sections) -> Self {
        self.sections = Some(sections);
        self
    }

    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    #[must_use]
    pub fn attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = Some(attachments);
        self
    }

    /// True if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Checks text fields against the configured limits.
    pub fn validate(&self, max_title_len: usize, max_description_len: usize) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            validate_title(title, max_title_len)?;
        }
        if let Some(description) = &self.description {
            check_len("description", description, max_description_len)?;
        }
        Ok(())
    }

    /// Encodes the patch, stamping `updatedAt`.
    pub fn to_document(&self, now: DateTime<Utc>) -> SimResult<Document> {
        let mut doc = to_object(self)?;
        doc.insert("updatedAt".to_string(), timestamp_value(now));
        Ok(doc)
    }
}

/// Trims `title` and checks it is non-empty and within `max_len` characters.
pub fn validate_title(title: &str, max_len: usize) -> Result<String, ValidationError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    check_len("title", trimmed, max_len)?;
    Ok(trimmed.to_string())
}

pub(crate) fn check_len(field: &str, value: &str, max_length: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max_length {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length,
        });
    }
    Ok(())
}

/// Encodes a timestamp the way records store it (RFC 3339).
#[must_use]
pub fn timestamp_value(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339())
}

/// One change to a single section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SectionEdit {
    ToggleLock,
    SetValue(String),
}

/// Rewrites one entry of the raw `sections` field and returns the new field.
///
/// Every other entry, including keys this crate does not recognize, is
/// carried over untouched. Documents without a `sections` field get the
/// full default map built from their legacy flat fields.
pub(crate) fn edit_sections(data: &Document, label: SectionLabel, edit: SectionEdit) -> SimResult<Value> {
    let key = label.key();
    let mut map = match data.get("sections") {
        Some(Value::Object(map)) => map.clone(),
        None | Some(Value::Null) => {
            let mut ignored = Vec::new();
            decode_sections(data, &mut ignored)
                .iter()
                .map(|(label, section)| {
                    (
                        label.key().to_string(),
                        Value::Object(section_fields(&section.value, section.locked)),
                    )
                })
                .collect()
        }
        Some(_) => return Err(malformed("sections", "sections is not an object")),
    };

    let mut fields = match map.remove(key) {
        None | Some(Value::Null) => section_fields("", false),
        // Bare strings are legacy values; promote them so the lock has a home.
        Some(Value::String(s)) => section_fields(&s, false),
        Some(Value::Object(fields)) => fields,
        Some(_) => {
            return Err(malformed("sections", format!("section '{key}' is not an object")));
        }
    };

    match edit {
        SectionEdit::ToggleLock => {
            let locked = match fields.get("locked") {
                None | Some(Value::Null) => false,
                Some(Value::Bool(b)) => *b,
                Some(_) => {
                    return Err(malformed(
                        "sections",
                        format!("section '{key}' has a non-boolean lock"),
                    ));
                }
            };
            fields.insert("locked".to_string(), Value::Bool(!locked));
        }
        SectionEdit::SetValue(value) => {
            fields.insert("value".to_string(), Value::String(value));
        }
    }

    map.insert(key.to_string(), Value::Object(fields));
    Ok(Value::Object(map))
}

/// Builds the fields that append `attachment` to a raw document.
///
/// Existing `attachments` entries are kept as stored, malformed ones
/// included. Legacy `files`/`images` URLs are folded in and those arrays
/// cleared.
pub(crate) fn append_attachment(data: &Document, attachment: &Attachment) -> SimResult<Document> {
    let mut items = match data.get("attachments") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => return Err(malformed("attachments", "attachments is not an array")),
    };

    let mut body = Document::new();
    for (field, kind) in [("files", AttachmentKind::File), ("images", AttachmentKind::Image)] {
        match data.get(field) {
            None | Some(Value::Null) => {}
            Some(Value::Array(urls)) => {
                for url in urls {
                    let Some(url) = url.as_str() else {
                        return Err(malformed(field, format!("'{field}' holds a non-string entry")));
                    };
                    items.push(encode(&Attachment::from_url(url, kind))?);
                }
                body.insert(field.to_string(), Value::Array(Vec::new()));
            }
            Some(_) => return Err(malformed(field, format!("'{field}' is not an array"))),
        }
    }

    items.push(encode(attachment)?);
    body.insert("attachments".to_string(), Value::Array(items));
    Ok(body)
}

fn section_fields(value: &str, locked: bool) -> Document {
    let mut fields = Document::new();
    fields.insert("value".to_string(), Value::String(value.to_string()));
    fields.insert("locked".to_string(), Value::Bool(locked));
    fields
}

fn malformed(field: &str, reason: impl Into<String>) -> SimError {
    ExecutionError::MalformedAggregate {
        field: field.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn encode<T: Serialize>(value: &T) -> SimResult<Value> {
    serde_json::to_value(value).map_err(|e| {
        TransportError::SerializationFailed {
            message: e.to_string(),
        }
        .into()
    })
}

fn to_object<T: Serialize>(value: &T) -> SimResult<Document> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(TransportError::SerializationFailed {
            message: format!("expected an object, got {other}"),
        }
        .into()),
        Err(e) => Err(TransportError::SerializationFailed {
            message: e.to_string(),
        }
        .into()),
    }
}

fn string_field(data: &Document, field: &str, issues: &mut Vec<IntegrityIssue>) -> String {
    match data.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            issues.push(IntegrityIssue::MalformedField {
                field: field.to_string(),
            });
            String::new()
        }
    }
}

fn timestamp_field(
    data: &Document,
    field: &str,
    issues: &mut Vec<IntegrityIssue>,
) -> Option<DateTime<Utc>> {
    match data.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => match DateTime::parse_from_rfc3339(s) {
            Ok(at) => Some(at.with_timezone(&Utc)),
            Err(_) => {
                issues.push(IntegrityIssue::MalformedField {
                    field: field.to_string(),
                });
                None
            }
        },
        Some(_) => {
            issues.push(IntegrityIssue::MalformedField {
                field: field.to_string(),
            });
            None
        }
    }
}

fn decode_sections(data: &Document, issues: &mut Vec<IntegrityIssue>) -> Sections {
    let mut sections = default_sections();

    match data.get("sections") {
        Some(Value::Object(map)) => {
            for (key, entry) in map {
                let Some(label) = SectionLabel::from_key(key) else {
                    issues.push(IntegrityIssue::MalformedSections {
                        reason: format!("unknown section key '{key}'"),
                    });
                    continue;
                };
                match entry {
                    Value::Object(fields) => {
                        let value = match fields.get("value") {
                            None | Some(Value::Null) => String::new(),
                            Some(Value::String(s)) => s.clone(),
                            Some(_) => {
                                issues.push(IntegrityIssue::MalformedSections {
                                    reason: format!("section '{key}' has a non-string value"),
                                });
                                String::new()
                            }
                        };
                        // Same rule as the record lock: wrong type reads as locked.
                        let locked = match fields.get("locked") {
                            None | Some(Value::Null) => false,
                            Some(Value::Bool(b)) => *b,
                            Some(_) => {
                                issues.push(IntegrityIssue::MalformedSections {
                                    reason: format!("section '{key}' has a non-boolean lock"),
                                });
                                true
                            }
                        };
                        sections.insert(label, Section { value, locked });
                    }
                    Value::String(s) => {
                        issues.push(IntegrityIssue::MalformedSections {
                            reason: format!("section '{key}' is a bare string"),
                        });
                        sections.insert(
                            label,
                            Section {
                                value: s.clone(),
                                locked: false,
                            },
                        );
                    }
                    _ => issues.push(IntegrityIssue::MalformedSections {
                        reason: format!("section '{key}' is not an object"),
                    }),
                }
            }
        }
        None | Some(Value::Null) => {
            // Older clients stored section values as flat top-level fields.
            for label in SectionLabel::ALL {
                if let Some(Value::String(s)) = data.get(label.key()) {
                    if let Some(section) = sections.get_mut(&label) {
                        section.value.clone_from(s);
                    }
                }
            }
        }
        Some(_) => issues.push(IntegrityIssue::MalformedSections {
            reason: "sections is not an object".to_string(),
        }),
    }

    sections
}

fn decode_attachments(data: &Document, issues: &mut Vec<IntegrityIssue>) -> Vec<Attachment> {
    let mut out = Vec::new();

    match data.get("attachments") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for item in items {
                match serde_json::from_value::<Attachment>(item.clone()) {
                    Ok(a) => out.push(a),
                    Err(_) => issues.push(IntegrityIssue::MalformedField {
                        field: "attachments".to_string(),
                    }),
                }
            }
        }
        Some(_) => issues.push(IntegrityIssue::MalformedField {
            field: "attachments".to_string(),
        }),
    }

    for (field, kind) in [("files", AttachmentKind::File), ("images", AttachmentKind::Image)] {
        if let Some(Value::Array(urls)) = data.get(field) {
            out.extend(
                urls.iter()
                    .filter_map(Value::as_str)
                    .map(|url| Attachment::from_url(url, kind)),
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    #[test]
    fn test_section_label_parse() {
        assert_eq!("xr".parse::<SectionLabel>().unwrap(), SectionLabel::XRay);
        assert_eq!("X-Ray".parse::<SectionLabel>().unwrap(), SectionLabel::XRay);
        assert_eq!("blood gas".parse::<SectionLabel>().unwrap(), SectionLabel::BloodGas);
        assert!("MRI".parse::<SectionLabel>().is_err());
    }

    #[test]
    fn test_draft_document_has_default_shape() {
        let now = Utc::now();
        let body = SimulationRecord::draft("T", "D", now).to_document().unwrap();
        assert!(!body.contains_key("id"));
        assert_eq!(body["assignedTo"], json!("all"));
        assert_eq!(body["locked"], json!(false));
        assert_eq!(body["notes"], json!(""));
        assert_eq!(body["attachments"], json!([]));
        let sections = body["sections"].as_object().unwrap();
        assert_eq!(sections.len(), SectionLabel::ALL.len());
        for entry in sections.values() {
            assert_eq!(entry, &json!({"value": "", "locked": false}));
        }

        let decoded = SimulationRecord::from_document("x", &body);
        assert!(decoded.is_well_formed());
        assert_eq!(decoded.created_at.map(|t| t.timestamp()), Some(now.timestamp()));
    }

    #[test]
    fn test_decode_legacy_flat_sections_and_files() {
        let data = doc(json!({
            "title": "Test Sim 1",
            "description": "Patient details...",
            "locked": false,
            "assignedTo": "student",
            "cbc": "WBC 11.2",
            "xr": "Normal cardiac silhouette",
            "files": ["https://cdn.example/sim/labs.pdf?alt=media"],
            "images": ["https://cdn.example/sim/chest.png"],
        }));
        let record = SimulationRecord::from_document("1", &data);
        assert!(record.is_well_formed());
        assert_eq!(record.assigned_to, Audience::Student);
        assert_eq!(record.section(SectionLabel::Cbc).unwrap().value, "WBC 11.2");
        assert_eq!(record.section(SectionLabel::XRay).unwrap().value, "Normal cardiac silhouette");
        assert_eq!(record.section(SectionLabel::Ekg).unwrap().value, "");
        assert_eq!(record.attachments.len(), 2);
        assert_eq!(record.attachments[0].name, "labs.pdf");
        assert_eq!(record.attachments[1].kind, AttachmentKind::Image);
    }

    #[test]
    fn test_missing_audience_defaults_to_all_with_issue() {
        let record = SimulationRecord::from_document("2", &doc(json!({"title": "x"})));
        assert_eq!(record.assigned_to, Audience::All);
        assert_eq!(record.integrity, vec![IntegrityIssue::MissingAudience]);
    }

    #[test]
    fn test_unrecognized_audience_defaults_to_all_with_issue() {
        let record = SimulationRecord::from_document("3", &doc(json!({"assignedTo": "residents"})));
        assert_eq!(record.assigned_to, Audience::All);
        assert!(matches!(
            record.integrity.as_slice(),
            [IntegrityIssue::UnrecognizedAudience { value }] if value == "residents"
        ));
    }

    #[test]
    fn test_malformed_sections_degrade() {
        let data = doc(json!({
            "assignedTo": "all",
            "sections": {
                "ekg": {"value": "ST elevation", "locked": "yes"},
                "mri": {"value": "n/a", "locked": false},
                "cbc": 42,
            }
        }));
        let record = SimulationRecord::from_document("4", &data);
        assert_eq!(record.integrity.len(), 3);
        let ekg = record.section(SectionLabel::Ekg).unwrap();
        assert_eq!(ekg.value, "ST elevation");
        assert!(ekg.locked);
        assert_eq!(record.section(SectionLabel::Cbc), Some(&Section::default()));
        assert_eq!(record.sections.len(), SectionLabel::ALL.len());
    }

    #[test]
    fn test_patch_serializes_only_set_fields() {
        let now = Utc::now();
        let body = RecordPatch::new().notes("bring gloves").locked(true).to_document(now).unwrap();
        assert_eq!(body.len(), 3);
        assert_eq!(body["notes"], json!("bring gloves"));
        assert_eq!(body["locked"], json!(true));
        assert!(body.contains_key("updatedAt"));
        assert!(RecordPatch::new().is_empty());
    }

    #[test]
    fn test_patch_validation() {
        assert!(RecordPatch::new().title("  ").validate(10, 10).is_err());
        assert!(RecordPatch::new().title("ok").validate(10, 10).is_ok());
        assert!(matches!(
            RecordPatch::new().description("x".repeat(11)).validate(10, 10),
            Err(ValidationError::FieldTooLong { .. })
        ));
    }

    #[test]
    fn test_attachment_name_from_url() {
        let a = Attachment::from_url("https://host/a/b/report.pdf", AttachmentKind::File);
        assert_eq!(a.name, "report.pdf");
        let b = Attachment::from_url("https://host/a/dir/", AttachmentKind::File);
        assert_eq!(b.name, "dir");
    }

    #[test]
    fn test_edit_sections_from_legacy_flat_fields() {
        let data = doc(json!({"title": "Old", "cbc": "Hgb 9.1"}));
        let sections = edit_sections(&data, SectionLabel::Ekg, SectionEdit::ToggleLock).unwrap();

        let map = sections.as_object().unwrap();
        assert_eq!(map.len(), SectionLabel::ALL.len());
        assert_eq!(map["cbc"], json!({"value": "Hgb 9.1", "locked": false}));
        assert_eq!(map["ekg"], json!({"value": "", "locked": true}));
    }

    #[test]
    fn test_edit_sections_promotes_bare_string() {
        let data = doc(json!({"sections": {"xr": "Clear lungs"}}));
        let sections = edit_sections(&data, SectionLabel::XRay, SectionEdit::ToggleLock).unwrap();
        assert_eq!(sections, json!({"xr": {"value": "Clear lungs", "locked": true}}));

        let data = doc(json!({"sections": ["not", "a", "map"]}));
        let err = edit_sections(&data, SectionLabel::XRay, SectionEdit::SetValue("x".into())).unwrap_err();
        assert!(err.to_string().contains("sections is not an object"));
    }

    #[test]
    fn test_append_attachment_rejects_non_string_legacy_urls() {
        let data = doc(json!({"images": ["https://host/a.png", 7]}));
        let attachment = Attachment::from_url("https://host/b.png", AttachmentKind::Image);
        assert!(append_attachment(&data, &attachment).is_err());

        let data = doc(json!({"images": ["https://host/a.png"]}));
        let body = append_attachment(&data, &attachment).unwrap();
        assert_eq!(body["images"], json!([]));
        assert!(!body.contains_key("files"));
        assert_eq!(body["attachments"].as_array().unwrap().len(), 2);
    }
}
