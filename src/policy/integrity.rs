//! Data-integrity warnings.
//!
//! These are never returned as errors. Decoding degrades to a safe default
//! and the condition is logged so operators can repair the document.

use std::fmt;

use crate::record::{SimulationId, SimulationRecord};

/// A problem found in a stored record document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// `assignedTo` is absent; treated as `all`.
    MissingAudience,
    /// `assignedTo` holds something other than admin/student/all; treated as `all`.
    UnrecognizedAudience {
        /// The stored value, rendered as text.
        value: String,
    },
    /// The `sections` aggregate does not have the expected shape.
    MalformedSections {
        /// What was wrong.
        reason: String,
    },
    /// Some other field has the wrong type.
    MalformedField {
        /// Document field name.
        field: String,
    },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAudience => f.write_str("assignedTo is missing; treating as 'all'"),
            Self::UnrecognizedAudience { value } => {
                write!(f, "assignedTo {value:?} is not recognized; treating as 'all'")
            }
            Self::MalformedSections { reason } => write!(f, "malformed sections: {reason}"),
            Self::MalformedField { field } => write!(f, "field '{field}' has an unexpected type"),
        }
    }
}

/// An integrity issue tied to the record it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataIntegrityWarning {
    /// Offending record.
    pub record_id: SimulationId,
    /// What was found.
    pub issue: IntegrityIssue,
}

impl fmt::Display for DataIntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "simulation {}: {}", self.record_id, self.issue)
    }
}

/// Collects the warnings carried by a decoded record.
#[must_use]
pub fn warnings_for(record: &SimulationRecord) -> Vec<DataIntegrityWarning> {
    record
        .integrity
        .iter()
        .cloned()
        .map(|issue| DataIntegrityWarning {
            record_id: record.id.clone(),
            issue,
        })
        .collect()
}

/// Logs every integrity warning in `records` and returns how many were found.
pub fn report<'a>(records: impl IntoIterator<Item = &'a SimulationRecord>) -> usize {
    let mut count = 0;
    for warning in records.into_iter().flat_map(warnings_for) {
        tracing::warn!(
            record_id = %warning.record_id,
            issue = %warning.issue,
            "simulation record failed integrity check"
        );
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_warnings_carry_record_id() {
        let Value::Object(data) = json!({"title": "no audience"}) else {
            unreachable!()
        };
        let record = SimulationRecord::from_document("abc", &data);
        let warnings = warnings_for(&record);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].record_id.as_str(), "abc");
        assert!(warnings[0].to_string().contains("treating as 'all'"));
        assert_eq!(report([&record]), 1);
    }
}
