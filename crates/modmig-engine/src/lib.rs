//! Migration engine: catalog reconciliation, reference extraction, template
//! matching, configuration replication and the per-product orchestration loop.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use modmig_core::DEFAULT_REQUIRED_PRIORITY;
use modmig_driver::{Credentials, Selectors, StabilizationPolicy};

mod extract;
mod matcher;
mod orchestrator;
mod reconcile;
mod replicate;
mod report;

pub use extract::{ActivityExtractor, Extraction};
pub use matcher::TemplateMatcher;
pub use orchestrator::MigrationOrchestrator;
pub use reconcile::{parse_catalog, reconcile, CatalogSide, MalformedRow, ReconcileSummary, Reconciliation};
pub use replicate::{plan_row_writes, ConfigurationReplicator, RowWrite};
pub use report::{write_run_report, ProductReport, RunSummary};

pub const CRATE_NAME: &str = "modmig-engine";

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub workspace_root: PathBuf,
    pub queue_path: PathBuf,
    pub reports_dir: PathBuf,
    pub required_priority: String,
    pub base_url: String,
    pub webdriver_url: String,
    pub credentials: Credentials,
    pub login_attempts: usize,
    pub stabilization: StabilizationPolicy,
    pub selectors_path: Option<PathBuf>,
}

impl MigrationConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let workspace_root = lookup("MODMIG_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let parsed = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        Self {
            queue_path: lookup("MODMIG_QUEUE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| workspace_root.join("data").join("work_queue.csv")),
            reports_dir: workspace_root.join("reports"),
            required_priority: lookup("MODMIG_REQUIRED_PRIORITY")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_REQUIRED_PRIORITY.to_string()),
            base_url: lookup("MODMIG_BASE_URL").unwrap_or_else(|| "http://localhost/".to_string()),
            webdriver_url: lookup("WEBDRIVER_URL")
                .unwrap_or_else(|| "http://localhost:4444".to_string()),
            credentials: Credentials {
                username: lookup("MODMIG_USERNAME").unwrap_or_default(),
                password: lookup("MODMIG_PASSWORD").unwrap_or_default(),
            },
            login_attempts: parsed("MODMIG_LOGIN_ATTEMPTS", 5) as usize,
            stabilization: StabilizationPolicy {
                quantum: Duration::from_millis(parsed("MODMIG_POLL_QUANTUM_MS", 500)),
                max_samples: parsed("MODMIG_MAX_STABILITY_SAMPLES", 120) as usize,
            },
            selectors_path: lookup("MODMIG_SELECTORS_PATH").map(PathBuf::from),
            workspace_root,
        }
    }

    pub fn selectors(&self) -> Result<Selectors> {
        match &self.selectors_path {
            Some(path) => Selectors::from_yaml_file(path),
            None => Ok(Selectors::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> MigrationConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MigrationConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = config_from(&[]);
        assert_eq!(config.required_priority, "J");
        assert_eq!(config.queue_path, PathBuf::from("./data/work_queue.csv"));
        assert_eq!(config.stabilization.quantum, Duration::from_millis(500));
        assert_eq!(config.login_attempts, 5);
        assert!(config.selectors_path.is_none());
    }

    #[test]
    fn environment_overrides_and_bad_numbers_fall_back() {
        let config = config_from(&[
            ("MODMIG_WORKSPACE", "/srv/modmig"),
            ("MODMIG_REQUIRED_PRIORITY", " K "),
            ("MODMIG_POLL_QUANTUM_MS", "250"),
            ("MODMIG_MAX_STABILITY_SAMPLES", "many"),
        ]);
        assert_eq!(config.required_priority, "K");
        assert_eq!(config.queue_path, PathBuf::from("/srv/modmig/data/work_queue.csv"));
        assert_eq!(config.reports_dir, PathBuf::from("/srv/modmig/reports"));
        assert_eq!(config.stabilization.quantum, Duration::from_millis(250));
        assert_eq!(config.stabilization.max_samples, 120);
    }
}
