//! Runtime configuration.

use std::path::Path;

use serde::Deserialize;

use crate::error::{SimResult, ValidationError};

/// Configuration shared by the store, the identity service and dashboards.
///
/// Every field has a default, so a config file only needs the fields it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimChartConfig {
    /// Collection holding simulation records.
    pub simulations_collection: String,
    /// Collection holding user profiles (`users/{uid}`).
    pub users_collection: String,
    /// Maximum title length, in characters.
    pub max_title_len: usize,
    /// Maximum description length, in characters.
    pub max_description_len: usize,
    /// Per-stream snapshot buffer capacity.
    pub stream_capacity: usize,
    /// Minimum password length at signup.
    pub min_password_len: usize,
    /// Rendered in place of a withheld section value.
    pub locked_placeholder: String,
    /// Rendered in place of an empty section value.
    pub unavailable_placeholder: String,
}

impl Default for SimChartConfig {
    fn default() -> Self {
        Self {
            simulations_collection: "simulations".to_string(),
            users_collection: "users".to_string(),
            max_title_len: 200,
            max_description_len: 4000,
            stream_capacity: 256,
            min_password_len: 6,
            locked_placeholder: "Locked".to_string(),
            unavailable_placeholder: "Not available".to_string(),
        }
    }
}

impl SimChartConfig {
    /// Parses a JSON config document.
    pub fn from_json_str(json: &str) -> SimResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads and parses a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&raw)
    }

    /// Rejects values the rest of the crate cannot work with.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| {
            Err(ValidationError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if self.simulations_collection.trim().is_empty() || self.users_collection.trim().is_empty() {
            return invalid("collection names must be non-empty");
        }
        if self.simulations_collection == self.users_collection {
            return invalid("simulations and users must live in different collections");
        }
        if self.max_title_len == 0 {
            return invalid("max_title_len must be positive");
        }
        Ok(())
    }
}
