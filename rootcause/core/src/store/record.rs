//! Incident Records
//!
//! The immutable outcome of one analysis run. A workflow step builds a record
//! by value and hands it to the store; nothing mutates a record after that.
//! A re-analysis produces a new record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::project::ProjectHash;

/// Severity tier attached to an incident (P0 highest)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Critical, immediate action required
    P0,
    /// High, urgent attention needed
    P1,
    /// Medium, should be addressed soon
    P2,
    /// Low, minor issue
    P3,
}

impl Severity {
    /// Every tier, highest first
    pub const ALL: [Severity; 4] = [Self::P0, Self::P1, Self::P2, Self::P3];

    /// Label used in keys and serialized records
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown severity label
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown severity label: {0:?} (expected P0, P1, P2 or P3)")]
pub struct ParseSeverityError(pub String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P0" => Ok(Self::P0),
            "P1" => Ok(Self::P1),
            "P2" => Ok(Self::P2),
            "P3" => Ok(Self::P3),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

/// A proposed fix (dry-run only, never applied by this crate)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixSuggestion {
    /// File the change applies to
    pub file: String,
    /// Unified diff as text
    pub diff: String,
    /// Why this change should help
    pub rationale: String,
}

impl FixSuggestion {
    /// Create a suggestion
    pub fn new(
        file: impl Into<String>,
        diff: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            diff: diff.into(),
            rationale: rationale.into(),
        }
    }
}

/// Outcome of one root-cause analysis
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    /// Namespace of the analysed project
    pub project_hash: ProjectHash,
    /// Creation time, Unix seconds
    pub timestamp: i64,
    /// Root cause hypothesis
    pub hypothesis: String,
    /// Confidence in the hypothesis, 0.0 - 1.0
    pub confidence: f64,
    /// Severity tier
    pub severity: Severity,
    /// Collected evidence
    #[serde(default)]
    pub evidence: BTreeMap<String, serde_json::Value>,
    /// Ordered fix proposals
    #[serde(default)]
    pub suggestions: Vec<FixSuggestion>,
}

impl IncidentRecord {
    /// Create a record without evidence or suggestions
    pub fn new(
        project_hash: ProjectHash,
        timestamp: i64,
        hypothesis: impl Into<String>,
        confidence: f64,
        severity: Severity,
    ) -> Self {
        Self {
            project_hash,
            timestamp,
            hypothesis: hypothesis.into(),
            confidence,
            severity,
            evidence: BTreeMap::new(),
            suggestions: Vec::new(),
        }
    }

    /// Attach one piece of evidence
    #[must_use]
    pub fn with_evidence(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.evidence.insert(key.into(), value);
        self
    }

    /// Append a fix suggestion
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: FixSuggestion) -> Self {
        self.suggestions.push(suggestion);
        self
    }

    /// Creation time as a UTC timestamp
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.timestamp, 0)
            .single()
            .unwrap_or_default()
    }

    /// Key of the primary entry: `incident:{projectHash}:{timestamp}`
    #[must_use]
    pub fn key(&self) -> String {
        incident_key(&self.project_hash, self.timestamp)
    }

    /// Check the invariants a store enforces on save
    pub fn validate(&self) -> Result<(), String> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            ));
        }
        Ok(())
    }

    /// Whether the record is past its retention window at `now_secs`
    #[must_use]
    pub fn is_expired(&self, now_secs: i64, retention_secs: i64) -> bool {
        self.timestamp.saturating_add(retention_secs) <= now_secs
    }

    /// Serialize for storage (adds a human-readable `created_at`)
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "created_at".to_string(),
                serde_json::Value::String(self.created_at().to_rfc3339()),
            );
        }
        serde_json::to_string(&value)
    }

    /// Parse a stored record (unknown fields such as `created_at` are ignored)
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Key of a record's primary entry
#[must_use]
pub fn incident_key(project_hash: &ProjectHash, timestamp: i64) -> String {
    format!("incident:{project_hash}:{timestamp}")
}

/// Key of a project's similarity index
#[must_use]
pub fn similarity_key(project_hash: &ProjectHash) -> String {
    format!("incidents:similar:{project_hash}")
}

/// Key of a project's severity index for one tier
#[must_use]
pub fn severity_key(project_hash: &ProjectHash, severity: Severity) -> String {
    format!("incidents:severity:{project_hash}:{severity}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hash() -> ProjectHash {
        ProjectHash::parse("abc123").unwrap()
    }

    #[test]
    fn test_key_layout() {
        let record = IncidentRecord::new(hash(), 1_700_000_000, "disk full", 0.8, Severity::P1);
        assert_eq!(record.key(), "incident:abc123:1700000000");
        assert_eq!(similarity_key(&hash()), "incidents:similar:abc123");
        assert_eq!(
            severity_key(&hash(), Severity::P1),
            "incidents:severity:abc123:P1"
        );
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("P0".parse::<Severity>().unwrap(), Severity::P0);
        assert_eq!(" p3 ".parse::<Severity>().unwrap(), Severity::P3);
        assert!("P4".parse::<Severity>().is_err());
        assert_eq!(serde_json::to_string(&Severity::P2).unwrap(), "\"P2\"");
    }

    #[test]
    fn test_validate_confidence_bounds() {
        let ok = IncidentRecord::new(hash(), 1, "h", 1.0, Severity::P3);
        assert!(ok.validate().is_ok());

        let high = IncidentRecord::new(hash(), 1, "h", 1.01, Severity::P3);
        assert!(high.validate().is_err());

        let nan = IncidentRecord::new(hash(), 1, "h", f64::NAN, Severity::P3);
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_expiry_boundary() {
        let record = IncidentRecord::new(hash(), 1_000, "h", 0.5, Severity::P2);
        assert!(!record.is_expired(1_099, 100));
        assert!(record.is_expired(1_100, 100));
    }

    #[test]
    fn test_stored_json_carries_created_at() {
        let record = IncidentRecord::new(hash(), 0, "h", 0.5, Severity::P2)
            .with_evidence("exit_code", serde_json::json!(137))
            .with_suggestion(FixSuggestion::new("Dockerfile", "-a\n+b", "raise memory"));

        let raw = record.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["created_at"], "1970-01-01T00:00:00+00:00");

        let back = IncidentRecord::from_json(&raw).unwrap();
        assert_eq!(back, record);
    }
}
