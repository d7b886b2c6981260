//! Core domain model shared by the catalog reconciler and the migration workflow.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "modmig-core";

/// Priority tag carried by the configurations that are eligible migration sources.
pub const DEFAULT_REQUIRED_PRIORITY: &str = "J";

/// Column order shared by both catalogs.
pub const CATALOG_COLUMNS: [&str; 5] = ["modello", "priorita", "articolo", "attivita", "operazione"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("catalog line {line}: expected {expected} columns, found {columns}", expected = CATALOG_COLUMNS.len())]
pub struct CatalogFormatError {
    pub line: usize,
    pub columns: usize,
}

/// One activity entry of a catalog export.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub model_id: String,
    pub priority: String,
    pub article_code: String,
    pub activity_code: String,
    pub operation_code: String,
}

impl CatalogRecord {
    /// Parse a comma-separated row; `line` is only used for error reporting.
    pub fn parse_row(row: &str, line: usize) -> Result<Self, CatalogFormatError> {
        let columns: Vec<&str> = row.split(',').collect();
        let &[model_id, priority, article_code, activity_code, operation_code] = columns.as_slice() else {
            return Err(CatalogFormatError {
                line,
                columns: columns.len(),
            });
        };
        Ok(Self {
            model_id: model_id.to_string(),
            priority: priority.to_string(),
            article_code: article_code.to_string(),
            activity_code: activity_code.to_string(),
            operation_code: operation_code.to_string(),
        })
    }

    /// Fields the reconciler joins on: article, activity, operation.
    pub fn join_key(&self) -> (&str, &str, &str) {
        (&self.article_code, &self.activity_code, &self.operation_code)
    }

    pub fn to_csv_row(&self) -> String {
        [
            self.model_id.as_str(),
            self.priority.as_str(),
            self.article_code.as_str(),
            self.activity_code.as_str(),
            self.operation_code.as_str(),
        ]
        .join(",")
    }
}

/// Structural identity of an activity row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityKey {
    pub operation_code: String,
    pub activity_code: String,
}

impl ActivityKey {
    pub fn new(operation_code: impl Into<String>, activity_code: impl Into<String>) -> Self {
        Self {
            operation_code: operation_code.into(),
            activity_code: activity_code.into(),
        }
    }

    /// Whitespace-trimmed, case-sensitive comparison.
    pub fn matches(&self, other: &ActivityKey) -> bool {
        self.operation_code.trim() == other.operation_code.trim()
            && self.activity_code.trim() == other.activity_code.trim()
    }
}

impl fmt::Display for ActivityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.operation_code.trim(), self.activity_code.trim())
    }
}

/// Activity row as read from a template, replication view.
///
/// `None` on a control means the template row does not expose it at all;
/// `Some(false)` and `Some(0.0)` mean the control exists and is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRow {
    pub operation_code: String,
    pub activity_code: String,
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub ko: Option<bool>,
    #[serde(default)]
    pub cost: Option<f64>,
}

impl ActivityRow {
    pub fn key(&self) -> ActivityKey {
        ActivityKey::new(self.operation_code.clone(), self.activity_code.clone())
    }
}

/// Ordered activity list of a reference model, captured once and never re-read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySequence {
    model_id: String,
    priority: String,
    industrial_cost: f64,
    rows: Vec<ActivityRow>,
}

impl ActivitySequence {
    pub fn new(
        model_id: impl Into<String>,
        priority: impl Into<String>,
        industrial_cost: f64,
        rows: Vec<ActivityRow>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            priority: priority.into(),
            industrial_cost,
            rows,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn priority(&self) -> &str {
        &self.priority
    }

    pub fn industrial_cost(&self) -> f64 {
        self.industrial_cost
    }

    pub fn rows(&self) -> &[ActivityRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// `family_id + product_id`, the identity of a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductKey(String);

impl ProductKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub family_id: String,
    pub product_id: String,
}

impl WorkItem {
    pub fn new(family_id: impl Into<String>, product_id: impl Into<String>) -> Self {
        Self {
            family_id: family_id.into(),
            product_id: product_id.into(),
        }
    }

    pub fn key(&self) -> ProductKey {
        ProductKey(format!("{}{}", self.family_id, self.product_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchResult {
    Matched { candidate_index: usize, priority: String },
    NoMatch,
}

/// Terminal state of one product for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationOutcome {
    SkippedWrongPriority { priority: String },
    NoConfigurationFound,
    NoActivitiesInModel,
    NoModelFound,
    Configured { priority: String },
    NotSavedByUser,
    CollaboratorFailure { reason: String },
}

impl MigrationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SkippedWrongPriority { .. } => "SKIP",
            Self::NoConfigurationFound => "NO_CONFIG_FOUND",
            Self::NoActivitiesInModel => "NO_ACTIVITIES_IN_MODEL",
            Self::NoModelFound => "NO_MODEL_FOUND",
            Self::Configured { .. } => "PRODUCT_CONFIGURED_SUCCESSFULLY",
            Self::NotSavedByUser => "CONFIGURATION_NOT_SAVED_BY_USER",
            Self::CollaboratorFailure { .. } => "COLLABORATOR_FAILURE",
        }
    }

    /// Only a committed configuration takes the product off the work queue.
    pub fn removes_from_queue(&self) -> bool {
        matches!(self, Self::Configured { .. })
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::SkippedWrongPriority { .. })
    }

    pub fn is_failure(&self) -> bool {
        !self.removes_from_queue() && !self.is_skip()
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            Self::SkippedWrongPriority { priority } => Some(format!("priority {priority}")),
            Self::Configured { priority } => Some(format!("priority {priority}")),
            Self::CollaboratorFailure { reason } => Some(reason.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_five_column_rows_verbatim() {
        let record = CatalogRecord::parse_row("M1,A,X1,10,OP1", 2).unwrap();
        assert_eq!(record.model_id, "M1");
        assert_eq!(record.join_key(), ("X1", "10", "OP1"));
        assert_eq!(record.to_csv_row(), "M1,A,X1,10,OP1");

        let padded = CatalogRecord::parse_row("M1,A, X1,10,OP1", 3).unwrap();
        assert_eq!(padded.article_code, " X1");
    }

    #[test]
    fn wrong_column_count_is_a_format_error() {
        let err = CatalogRecord::parse_row("M1,A,X1,10", 7).unwrap_err();
        assert_eq!(err, CatalogFormatError { line: 7, columns: 4 });
        assert!(CatalogRecord::parse_row("M1,A,X1,10,OP1,extra", 8).is_err());
    }

    #[test]
    fn activity_keys_compare_trimmed_and_case_sensitive() {
        let a = ActivityKey::new(" OP1 ", "10\n");
        assert!(a.matches(&ActivityKey::new("OP1", "10")));
        assert!(!a.matches(&ActivityKey::new("op1", "10")));
        assert!(!a.matches(&ActivityKey::new("OP1", "11")));
    }

    #[test]
    fn product_key_concatenates_family_and_product() {
        let item = WorkItem::new("FAM", "P001");
        assert_eq!(item.key().as_str(), "FAMP001");
    }

    #[test]
    fn only_configured_leaves_the_queue() {
        let configured = MigrationOutcome::Configured { priority: "J".into() };
        assert!(configured.removes_from_queue());
        assert!(!configured.is_failure());

        for outcome in [
            MigrationOutcome::NoModelFound,
            MigrationOutcome::NotSavedByUser,
            MigrationOutcome::NoActivitiesInModel,
            MigrationOutcome::CollaboratorFailure { reason: "timeout".into() },
        ] {
            assert!(!outcome.removes_from_queue());
            assert!(outcome.is_failure());
        }

        let skipped = MigrationOutcome::SkippedWrongPriority { priority: "A".into() };
        assert!(skipped.is_skip());
        assert!(!skipped.is_failure());
    }

    #[test]
    fn absent_controls_deserialize_as_none() {
        let row: ActivityRow =
            serde_json::from_str(r#"{"operation_code":"OP1","activity_code":"10","ok":false}"#).unwrap();
        assert_eq!(row.ok, Some(false));
        assert_eq!(row.ko, None);
        assert_eq!(row.cost, None);
    }
}
