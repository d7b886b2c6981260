//! Fixture-first [`LineApplication`]: a JSON snapshot of products, their
//! configurations and the candidate templates offered on import.
//!
//! ```json
//! {
//!   "products": [{
//!     "family_id": "F1", "product_id": "P1",
//!     "configurations": [{ "model_id": "M1", "priority": "J", "industrial_cost": 4.5,
//!                          "rows": [{ "operation_code": "OP1", "activity_code": "10", "ok": true }] }],
//!     "candidates": [{ "template_id": "T1", "rows": [{ "operation_code": "OP1", "activity_code": "10" }] }],
//!     "confirmations": ["conflict_detected", "confirmed"]
//!   }]
//! }
//! ```
//!
//! Confirmations are replayed in order; once exhausted every request is confirmed.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use modmig_core::{ActivityKey, ActivityRow, ProductKey, WorkItem};
use serde::{Deserialize, Serialize};

use crate::{CandidateSource, ConfirmationOutcome, DriverError, LineApplication, ReferenceRow};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureData {
    #[serde(default)]
    pub products: Vec<FixtureProduct>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureProduct {
    pub family_id: String,
    pub product_id: String,
    #[serde(default)]
    pub configurations: Vec<FixtureConfiguration>,
    #[serde(default)]
    pub candidates: Vec<FixtureCandidate>,
    #[serde(default)]
    pub confirmations: VecDeque<ConfirmationOutcome>,
    /// Simulates a collaborator outage while this product is opened.
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureConfiguration {
    pub model_id: String,
    pub priority: String,
    #[serde(default)]
    pub industrial_cost: f64,
    #[serde(default)]
    pub rows: Vec<ActivityRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureCandidate {
    pub template_id: String,
    #[serde(default)]
    pub rows: Vec<ActivityKey>,
}

/// Mutation received by the fixture, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixtureWrite {
    IndustrialCost { template_id: String, cost: f64 },
    Ok { template_id: String, row: usize },
    Ko { template_id: String, row: usize },
    Cost { template_id: String, row: usize, cost: f64 },
    Committed { product: ProductKey, template_id: String },
}

#[derive(Debug, Clone, Default)]
pub struct FixtureLine {
    data: FixtureData,
    product: Option<usize>,
    configuration: Option<usize>,
    import_open: bool,
    candidate: Option<usize>,
    imported: Option<usize>,
    writes: Vec<FixtureWrite>,
    candidate_rows_read: usize,
    recoveries: usize,
}

pub fn load_fixture(path: impl AsRef<Path>) -> Result<FixtureLine> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let data: FixtureData =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(FixtureLine::new(data))
}

fn fixture_err(message: impl Into<String>) -> DriverError {
    DriverError::Fixture(message.into())
}

impl FixtureLine {
    pub fn new(data: FixtureData) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn writes(&self) -> &[FixtureWrite] {
        &self.writes
    }

    /// Template ids committed for `key`, in commit order.
    pub fn committed_for(&self, key: &ProductKey) -> Vec<&str> {
        self.writes
            .iter()
            .filter_map(|w| match w {
                FixtureWrite::Committed { product, template_id } if product == key => {
                    Some(template_id.as_str())
                }
                _ => None,
            })
            .collect()
    }

    pub fn candidate_rows_read(&self) -> usize {
        self.candidate_rows_read
    }

    pub fn recoveries(&self) -> usize {
        self.recoveries
    }

    fn current_product(&self) -> Result<&FixtureProduct, DriverError> {
        self.product
            .and_then(|idx| self.data.products.get(idx))
            .ok_or_else(|| fixture_err("no product open"))
    }

    fn current_configuration(&self) -> Result<&FixtureConfiguration, DriverError> {
        let product = self.current_product()?;
        self.configuration
            .and_then(|idx| product.configurations.get(idx))
            .ok_or_else(|| fixture_err("no configuration open"))
    }

    fn candidate(&self, index: usize) -> Result<&FixtureCandidate, DriverError> {
        self.current_product()?
            .candidates
            .get(index)
            .ok_or_else(|| fixture_err(format!("candidate {index} out of range")))
    }

    fn require_import_open(&self) -> Result<(), DriverError> {
        if self.import_open {
            Ok(())
        } else {
            Err(fixture_err("candidate list is not open"))
        }
    }

    fn imported_template(&self, row: Option<usize>) -> Result<String, DriverError> {
        let index = self
            .imported
            .ok_or_else(|| fixture_err("no candidate imported"))?;
        let candidate = self.candidate(index)?;
        if let Some(row) = row {
            if row >= candidate.rows.len() {
                return Err(fixture_err(format!(
                    "row {row} out of range for template {}",
                    candidate.template_id
                )));
            }
        }
        Ok(candidate.template_id.clone())
    }

    fn reset(&mut self) {
        self.product = None;
        self.configuration = None;
        self.import_open = false;
        self.candidate = None;
        self.imported = None;
    }
}

#[async_trait]
impl CandidateSource for FixtureLine {
    async fn candidate_count(&mut self) -> Result<usize, DriverError> {
        self.require_import_open()?;
        Ok(self.current_product()?.candidates.len())
    }

    async fn open_candidate(&mut self, index: usize) -> Result<usize, DriverError> {
        self.require_import_open()?;
        let rows = self.candidate(index)?.rows.len();
        self.candidate = Some(index);
        Ok(rows)
    }

    async fn candidate_row(&mut self, row: usize) -> Result<ActivityKey, DriverError> {
        self.require_import_open()?;
        let index = self
            .candidate
            .ok_or_else(|| fixture_err("no candidate open"))?;
        let key = self
            .candidate(index)?
            .rows
            .get(row)
            .cloned()
            .ok_or_else(|| fixture_err(format!("candidate row {row} out of range")))?;
        self.candidate_rows_read += 1;
        Ok(key)
    }
}

#[async_trait]
impl LineApplication for FixtureLine {
    async fn open_product(&mut self, item: &WorkItem) -> Result<usize, DriverError> {
        self.reset();
        let Some(idx) = self
            .data
            .products
            .iter()
            .position(|p| p.family_id == item.family_id && p.product_id == item.product_id)
        else {
            return Ok(0);
        };
        if self.data.products[idx].unavailable {
            return Err(DriverError::Unavailable(format!(
                "product {} did not load",
                item.key()
            )));
        }
        self.product = Some(idx);
        Ok(self.data.products[idx].configurations.len())
    }

    async fn configuration_priority(&mut self, index: usize) -> Result<String, DriverError> {
        self.current_product()?
            .configurations
            .get(index)
            .map(|c| c.priority.clone())
            .ok_or_else(|| fixture_err(format!("configuration {index} out of range")))
    }

    async fn open_configuration(&mut self, index: usize) -> Result<usize, DriverError> {
        let rows = self
            .current_product()?
            .configurations
            .get(index)
            .map(|c| c.rows.len())
            .ok_or_else(|| fixture_err(format!("configuration {index} out of range")))?;
        self.configuration = Some(index);
        Ok(rows)
    }

    async fn industrial_cost(&mut self) -> Result<f64, DriverError> {
        Ok(self.current_configuration()?.industrial_cost)
    }

    async fn reference_row(&mut self, row: usize) -> Result<ReferenceRow, DriverError> {
        let configuration = self.current_configuration()?;
        let activity = configuration
            .rows
            .get(row)
            .cloned()
            .ok_or_else(|| fixture_err(format!("reference row {row} out of range")))?;
        Ok(ReferenceRow {
            model_id: configuration.model_id.clone(),
            priority: configuration.priority.clone(),
            activity,
        })
    }

    async fn close_configuration(&mut self) -> Result<(), DriverError> {
        self.configuration = None;
        Ok(())
    }

    async fn begin_import(&mut self, item: &WorkItem) -> Result<(), DriverError> {
        let product = self.current_product()?;
        if product.family_id != item.family_id || product.product_id != item.product_id {
            return Err(fixture_err(format!("import requested for {} while another product is open", item.key())));
        }
        self.import_open = true;
        self.candidate = None;
        self.imported = None;
        Ok(())
    }

    async fn import_candidate(&mut self, index: usize) -> Result<(), DriverError> {
        self.require_import_open()?;
        self.candidate(index)?;
        self.imported = Some(index);
        self.import_open = false;
        Ok(())
    }

    async fn set_industrial_cost(&mut self, cost: f64) -> Result<(), DriverError> {
        let template_id = self.imported_template(None)?;
        self.writes.push(FixtureWrite::IndustrialCost { template_id, cost });
        Ok(())
    }

    async fn mark_ok(&mut self, row: usize) -> Result<(), DriverError> {
        let template_id = self.imported_template(Some(row))?;
        self.writes.push(FixtureWrite::Ok { template_id, row });
        Ok(())
    }

    async fn mark_ko(&mut self, row: usize) -> Result<(), DriverError> {
        let template_id = self.imported_template(Some(row))?;
        self.writes.push(FixtureWrite::Ko { template_id, row });
        Ok(())
    }

    async fn fill_cost(&mut self, row: usize, cost: f64) -> Result<(), DriverError> {
        let template_id = self.imported_template(Some(row))?;
        self.writes.push(FixtureWrite::Cost {
            template_id,
            row,
            cost,
        });
        Ok(())
    }

    async fn request_confirmation(&mut self) -> Result<ConfirmationOutcome, DriverError> {
        let template_id = self.imported_template(None)?;
        let product_idx = self.product.ok_or_else(|| fixture_err("no product open"))?;
        let product = &mut self.data.products[product_idx];
        let outcome = product
            .confirmations
            .pop_front()
            .unwrap_or(ConfirmationOutcome::Confirmed);
        if outcome == ConfirmationOutcome::Confirmed {
            let key = WorkItem::new(product.family_id.clone(), product.product_id.clone()).key();
            self.writes.push(FixtureWrite::Committed {
                product: key,
                template_id,
            });
        }
        if outcome != ConfirmationOutcome::ConflictDetected {
            self.imported = None;
        }
        Ok(outcome)
    }

    async fn reopen_import(&mut self) -> Result<(), DriverError> {
        self.current_product()?;
        self.imported = None;
        self.candidate = None;
        self.import_open = true;
        Ok(())
    }

    async fn abandon_import(&mut self) -> Result<(), DriverError> {
        self.import_open = false;
        self.candidate = None;
        self.imported = None;
        Ok(())
    }

    async fn recover(&mut self) -> Result<(), DriverError> {
        self.reset();
        self.recoveries += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_fixture_path() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/sample-line/line.json")
    }

    #[tokio::test]
    async fn sample_fixture_loads_and_lists_configurations() {
        let mut line = load_fixture(sample_fixture_path()).expect("sample fixture");
        let count = line.open_product(&WorkItem::new("FAM01", "ART100")).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(line.configuration_priority(0).await.unwrap(), "J");
    }

    #[tokio::test]
    async fn unknown_product_has_no_configurations() {
        let mut line = FixtureLine::new(FixtureData::default());
        assert_eq!(line.open_product(&WorkItem::new("X", "Y")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn writes_require_an_imported_candidate() {
        let data: FixtureData = serde_json::from_str(
            r#"{"products":[{"family_id":"F","product_id":"P",
                "candidates":[{"template_id":"T1","rows":[{"operation_code":"OP1","activity_code":"10"}]}]}]}"#,
        )
        .unwrap();
        let item = WorkItem::new("F", "P");
        let mut line = FixtureLine::new(data);
        line.open_product(&item).await.unwrap();
        assert!(matches!(line.mark_ok(0).await, Err(DriverError::Fixture(_))));

        line.begin_import(&item).await.unwrap();
        line.import_candidate(0).await.unwrap();
        line.mark_ok(0).await.unwrap();
        assert!(line.mark_ko(1).await.is_err());
        assert_eq!(
            line.request_confirmation().await.unwrap(),
            ConfirmationOutcome::Confirmed
        );
        assert_eq!(line.committed_for(&item.key()), vec!["T1"]);
    }

    #[tokio::test]
    async fn unavailable_product_fails_to_open() {
        let data: FixtureData = serde_json::from_str(
            r#"{"products":[{"family_id":"F","product_id":"P","unavailable":true}]}"#,
        )
        .unwrap();
        let mut line = FixtureLine::new(data);
        let err = line.open_product(&WorkItem::new("F", "P")).await.unwrap_err();
        assert!(matches!(err, DriverError::Unavailable(_)));
    }
}
