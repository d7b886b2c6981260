use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use modmig_core::{MigrationOutcome, WorkItem};
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductReport {
    pub key: String,
    pub family_id: String,
    pub product_id: String,
    pub outcome: MigrationOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub required_priority: String,
    pub processed: usize,
    pub configured: usize,
    pub skipped: usize,
    pub failed: usize,
    pub remaining_in_queue: usize,
    /// Set when the run stopped before draining the queue snapshot.
    pub aborted: Option<String>,
    pub products: Vec<ProductReport>,
}

impl RunSummary {
    pub fn start(required_priority: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            required_priority: required_priority.into(),
            processed: 0,
            configured: 0,
            skipped: 0,
            failed: 0,
            remaining_in_queue: 0,
            aborted: None,
            products: Vec::new(),
        }
    }

    pub fn record(&mut self, item: &WorkItem, outcome: MigrationOutcome) {
        self.processed += 1;
        if outcome.removes_from_queue() {
            self.configured += 1;
        } else if outcome.is_skip() {
            self.skipped += 1;
        } else {
            self.failed += 1;
        }
        self.products.push(ProductReport {
            key: item.key().to_string(),
            family_id: item.family_id.clone(),
            product_id: item.product_id.clone(),
            outcome,
        });
    }

    pub fn finish(&mut self, remaining_in_queue: usize) {
        self.remaining_in_queue = remaining_in_queue;
        self.finished_at = Some(Utc::now());
    }

    pub fn outcome_for(&self, key: &str) -> Option<&MigrationOutcome> {
        self.products.iter().find(|p| p.key == key).map(|p| &p.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProductReport> {
        self.products.iter().filter(|p| p.outcome.is_failure())
    }

    pub fn to_markdown(&self) -> String {
        let mut labels: BTreeMap<&'static str, usize> = BTreeMap::new();
        for product in &self.products {
            *labels.entry(product.outcome.label()).or_default() += 1;
        }

        let mut brief = format!(
            "# Migration Run\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Required priority: {}\n- Processed: {}\n- Configured: {}\n- Skipped: {}\n- Failed: {}\n- Remaining in queue: {}\n",
            self.run_id,
            self.started_at,
            self.finished_at
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.required_priority,
            self.processed,
            self.configured,
            self.skipped,
            self.failed,
            self.remaining_in_queue,
        );
        if let Some(reason) = &self.aborted {
            brief.push_str(&format!("- Aborted: {reason}\n"));
        }

        brief.push_str("\n## Outcomes\n");
        for (label, count) in &labels {
            brief.push_str(&format!("- {label}: {count}\n"));
        }

        let failures: Vec<_> = self.failures().collect();
        if !failures.is_empty() {
            brief.push_str("\n## Needs Attention\n");
            for product in failures {
                match product.outcome.detail() {
                    Some(detail) => brief.push_str(&format!(
                        "- {}: {} ({})\n",
                        product.key,
                        product.outcome.label(),
                        detail
                    )),
                    None => brief.push_str(&format!("- {}: {}\n", product.key, product.outcome.label())),
                }
            }
        }
        brief
    }
}

/// Write `summary.json` and `brief.md` under `reports_dir/<run_id>/`.
pub async fn write_run_report(reports_dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let run_dir = reports_dir.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    fs::write(run_dir.join("brief.md"), summary.to_markdown())
        .await
        .context("writing brief.md")?;

    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(run_dir.join("summary.json"), json)
        .await
        .context("writing summary.json")?;

    Ok(run_dir)
}
