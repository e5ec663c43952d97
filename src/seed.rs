//! Default simulation catalogue and idempotent seeding.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::collection::{DocumentCollection, WriteMode};
use crate::config::SimChartConfig;
use crate::error::{SimError, SimResult};
use crate::record::{timestamp_value, SectionLabel, SimulationId, SimulationRecord};
use crate::role::Audience;

struct CatalogueEntry {
    id: &'static str,
    title: &'static str,
    description: &'static str,
    locked: bool,
    assigned_to: Audience,
    values: &'static [(SectionLabel, &'static str)],
}

const CATALOGUE: &[CatalogueEntry] = &[
    CatalogueEntry {
        id: "1",
        title: "Test Sim 1",
        description: "Patient details...",
        locked: false,
        assigned_to: Audience::Student,
        values: &[
            (SectionLabel::Cbc, "WBC 11.2, Hgb 13.9, Platelets 210"),
            (SectionLabel::Cmp, "Na 138, K 4.1, Cr 1.0, AST 22, ALT 25"),
            (SectionLabel::Ekg, "ST elevations in leads II, III, aVF"),
            (SectionLabel::XRay, "Normal cardiac silhouette"),
            (SectionLabel::CtScan, "No acute intracranial abnormality"),
            (SectionLabel::BloodGas, "pH 7.32, pCO2 48, pO2 70"),
            (SectionLabel::Ultrasound, "Normal LV function"),
        ],
    },
    CatalogueEntry {
        id: "2",
        title: "Stroke Workup",
        description: "68-year-old female with weakness",
        locked: true,
        assigned_to: Audience::Admin,
        values: &[
            (SectionLabel::Cbc, "Pending"),
            (SectionLabel::Cmp, "Pending"),
            (SectionLabel::Ekg, "Normal sinus rhythm"),
            (SectionLabel::XRay, "Normal"),
            (SectionLabel::CtScan, "Left MCA infarct"),
            (SectionLabel::BloodGas, "Normal"),
            (SectionLabel::Ultrasound, "Carotid stenosis 70%"),
        ],
    },
    CatalogueEntry {
        id: "3",
        title: "Emergency Trauma",
        description: "Multiple injuries, adult male",
        locked: false,
        assigned_to: Audience::All,
        values: &[],
    },
];

impl CatalogueEntry {
    fn record(&self, now: DateTime<Utc>) -> SimulationRecord {
        let mut record = SimulationRecord::draft(self.title, self.description, now);
        record.id = SimulationId::new(self.id);
        record.locked = self.locked;
        record.assigned_to = self.assigned_to;
        for (label, value) in self.values {
            record.sections.entry(*label).or_default().value = (*value).to_string();
        }
        record
    }
}

/// The built-in catalogue as records stamped with `now`.
#[must_use]
pub fn default_catalogue(now: DateTime<Utc>) -> Vec<SimulationRecord> {
    CATALOGUE.iter().map(|entry| entry.record(now)).collect()
}

/// What [`seed_simulations`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Records written because they did not exist.
    pub created: Vec<SimulationId>,
    /// Existing records that lacked `assignedTo` and were merged with defaults.
    pub backfilled: Vec<SimulationId>,
    /// Existing well-addressed records left alone.
    pub untouched: Vec<SimulationId>,
}

impl SeedReport {
    /// Number of writes performed.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.created.len() + self.backfilled.len()
    }
}

fn has_audience(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Seeds the default catalogue into `cfg.simulations_collection`.
///
/// Running it again is harmless: existing records are only touched when they
/// have no `assignedTo`, in which case the catalogue fields are merged in.
///
/// # Errors
/// Stops at the first failed read or write.
pub fn seed_simulations(collection: &dyn DocumentCollection, cfg: &SimChartConfig) -> SimResult<SeedReport> {
    seed_records(collection, cfg, default_catalogue(Utc::now()))
}

/// Seeds `records` with the same rules as [`seed_simulations`].
pub fn seed_records(
    collection: &dyn DocumentCollection,
    cfg: &SimChartConfig,
    records: Vec<SimulationRecord>,
) -> SimResult<SeedReport> {
    let name = cfg.simulations_collection.as_str();
    let mut report = SeedReport::default();

    for record in records {
        let id = record.id.as_str();
        let existing = collection.get_one(name, id).map_err(|e| log_failure(name, id, e.into()))?;

        let mut body = record.to_document()?;
        body.remove("createdAt");
        body.insert("updatedAt".to_string(), timestamp_value(Utc::now()));

        match existing {
            None => {
                body.insert(
                    "createdAt".to_string(),
                    timestamp_value(record.created_at.unwrap_or_else(Utc::now)),
                );
                collection
                    .set(name, id, body, WriteMode::Replace)
                    .map_err(|e| log_failure(name, id, e.into()))?;
                tracing::info!(collection = %name, record_id = %id, title = %record.title, "seeded simulation");
                report.created.push(record.id);
            }
            Some(doc) if !has_audience(doc.data.get("assignedTo")) => {
                collection
                    .set(name, id, body, WriteMode::Merge)
                    .map_err(|e| log_failure(name, id, e.into()))?;
                tracing::info!(collection = %name, record_id = %id, "back-filled simulation audience");
                report.backfilled.push(record.id);
            }
            Some(_) => report.untouched.push(record.id),
        }
    }

    tracing::info!(
        collection = %name,
        created = report.created.len(),
        backfilled = report.backfilled.len(),
        untouched = report.untouched.len(),
        "simulation catalogue initialized"
    );
    Ok(report)
}

fn log_failure(collection: &str, record_id: &str, err: SimError) -> SimError {
    tracing::error!(collection, record_id, error = %err, "failed to seed simulation");
    err
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::collection::{Document, InMemoryCollection};

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    #[test]
    fn test_catalogue_shape() {
        let records = default_catalogue(Utc::now());
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].assigned_to, Audience::Admin);
        assert!(records[1].locked);
        assert_eq!(
            records[0].section(SectionLabel::Ekg).map(|s| s.value.as_str()),
            Some("ST elevations in leads II, III, aVF")
        );
        assert!(records[2].sections.values().all(|s| s.value.is_empty()));
    }

    #[test]
    fn test_seed_is_idempotent() {
        let collection = InMemoryCollection::new();
        let cfg = SimChartConfig::default();

        let first = seed_simulations(&collection, &cfg).unwrap();
        assert_eq!(first.created.len(), 3);

        let writes = collection.write_count();
        let second = seed_simulations(&collection, &cfg).unwrap();
        assert_eq!(second.untouched.len(), 3);
        assert_eq!(second.writes(), 0);
        assert_eq!(collection.write_count(), writes);
    }

    #[test]
    fn test_seed_backfills_missing_audience_and_keeps_extra_fields() {
        let collection = InMemoryCollection::new();
        let cfg = SimChartConfig::default();
        collection
            .set(
                "simulations",
                "3",
                doc(json!({"title": "Old trauma", "reviewedBy": "dr-lee"})),
                WriteMode::Replace,
            )
            .unwrap();

        let report = seed_simulations(&collection, &cfg).unwrap();
        assert_eq!(report.backfilled, vec![SimulationId::new("3")]);

        let stored = collection.get_one("simulations", "3").unwrap().unwrap();
        assert_eq!(stored.data["assignedTo"], json!("all"));
        assert_eq!(stored.data["title"], json!("Emergency Trauma"));
        assert_eq!(stored.data["reviewedBy"], json!("dr-lee"));
        assert!(stored.data.get("createdAt").is_none());
    }

    #[test]
    fn test_seed_surfaces_transport_errors() {
        let collection = InMemoryCollection::new();
        collection.set_offline(true);
        let err = seed_simulations(&collection, &SimChartConfig::default()).unwrap_err();
        assert!(err.is_transport());
    }
}
