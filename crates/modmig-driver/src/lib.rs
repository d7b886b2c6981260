//! Collaborator contracts for the line-management application + UI-backed and
//! fixture-backed implementations.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use modmig_core::{ActivityKey, ActivityRow, WorkItem};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod fixture;
mod line;
mod selectors;
mod webdriver;

pub use fixture::{load_fixture, FixtureCandidate, FixtureConfiguration, FixtureData, FixtureLine, FixtureProduct, FixtureWrite};
pub use line::{Credentials, UiLineApplication};
pub use selectors::Selectors;
pub use webdriver::WebDriverClient;

pub const CRATE_NAME: &str = "modmig-driver";

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("no element matches {0}")]
    ElementNotFound(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("fixture: {0}")]
    Fixture(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementState {
    Attached,
    Detached,
    Visible,
    Hidden,
}

/// Terminal signal of the human-in-the-loop confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    Confirmed,
    Discarded,
    /// The commit was rejected because an equivalent configuration already exists.
    ConflictDetected,
}

#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub message: String,
    pub confirm_selector: String,
    pub discard_selector: String,
    pub conflict_selector: String,
    /// Only a `conflict_selector` element containing this text is a conflict.
    pub conflict_text: String,
    pub conflict_window: Duration,
}

/// UI capabilities the application layer relies on. Implementations own the
/// markup-independent mechanics (element lookup, waiting, prompts).
#[async_trait]
pub trait UiDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;
    async fn current_url(&self) -> Result<String, DriverError>;
    async fn fill(&self, selector: &str, text: &str) -> Result<(), DriverError>;
    async fn click(&self, selector: &str) -> Result<(), DriverError>;
    async fn read_text(&self, selector: &str) -> Result<String, DriverError>;
    async fn read_attribute(&self, selector: &str, name: &str) -> Result<Option<String>, DriverError>;
    async fn read_value(&self, selector: &str) -> Result<String, DriverError>;
    async fn select_option(&self, selector: &str, value: &str) -> Result<(), DriverError>;
    async fn count(&self, selector: &str) -> Result<usize, DriverError>;
    /// Element count once two consecutive samples agree.
    async fn wait_until_stable(&self, selector: &str) -> Result<usize, DriverError>;
    /// `timeout: None` waits indefinitely.
    async fn wait_for_state(
        &self,
        selector: &str,
        state: ElementState,
        timeout: Option<Duration>,
    ) -> Result<(), DriverError>;
    /// Blocks until a human confirms or discards; no timeout.
    async fn request_confirmation(
        &self,
        request: &ConfirmationRequest,
    ) -> Result<ConfirmationOutcome, DriverError>;
}

/// Lazily fetched, index-addressable candidate templates of an open import.
/// Indices are stable for the lifetime of the import, so a search can resume
/// from any position.
#[async_trait]
pub trait CandidateSource: Send {
    async fn candidate_count(&mut self) -> Result<usize, DriverError>;
    /// Select candidate `index` and return its settled activity row count.
    async fn open_candidate(&mut self, index: usize) -> Result<usize, DriverError>;
    /// Structural key of row `row` of the open candidate.
    async fn candidate_row(&mut self, row: usize) -> Result<ActivityKey, DriverError>;
}

/// Activity row of a reference configuration along with its model columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRow {
    pub model_id: String,
    pub priority: String,
    pub activity: ActivityRow,
}

/// Domain-level operations on the line-management application. All indices
/// are zero-based and follow on-screen order.
#[async_trait]
pub trait LineApplication: CandidateSource {
    /// Filter the product list down to `item`; returns its configuration count.
    async fn open_product(&mut self, item: &WorkItem) -> Result<usize, DriverError>;
    async fn configuration_priority(&mut self, index: usize) -> Result<String, DriverError>;
    /// Open configuration `index` for editing; returns its settled activity row count.
    async fn open_configuration(&mut self, index: usize) -> Result<usize, DriverError>;
    async fn industrial_cost(&mut self) -> Result<f64, DriverError>;
    async fn reference_row(&mut self, row: usize) -> Result<ReferenceRow, DriverError>;
    async fn close_configuration(&mut self) -> Result<(), DriverError>;

    /// Start a new configuration for `item` and list the candidate templates.
    async fn begin_import(&mut self, item: &WorkItem) -> Result<(), DriverError>;
    async fn import_candidate(&mut self, index: usize) -> Result<(), DriverError>;
    async fn set_industrial_cost(&mut self, cost: f64) -> Result<(), DriverError>;
    async fn mark_ok(&mut self, row: usize) -> Result<(), DriverError>;
    async fn mark_ko(&mut self, row: usize) -> Result<(), DriverError>;
    async fn fill_cost(&mut self, row: usize, cost: f64) -> Result<(), DriverError>;
    async fn request_confirmation(&mut self) -> Result<ConfirmationOutcome, DriverError>;
    /// Return to the candidate list after a rejected commit.
    async fn reopen_import(&mut self) -> Result<(), DriverError>;
    async fn abandon_import(&mut self) -> Result<(), DriverError>;

    /// Bring the application back to the product list after a failure.
    async fn recover(&mut self) -> Result<(), DriverError>;
}

#[derive(Debug, Clone, Copy)]
pub struct StabilizationPolicy {
    pub quantum: Duration,
    pub max_samples: usize,
}

impl Default for StabilizationPolicy {
    fn default() -> Self {
        Self {
            quantum: Duration::from_millis(500),
            max_samples: 120,
        }
    }
}

/// Sample, wait one quantum, resample until two consecutive samples are equal.
pub async fn settle_count<F, Fut>(
    policy: &StabilizationPolicy,
    what: &str,
    mut sample: F,
) -> Result<usize, DriverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<usize, DriverError>>,
{
    let max_samples = policy.max_samples.max(2);
    let mut previous = sample().await?;
    for _ in 1..max_samples {
        tokio::time::sleep(policy.quantum).await;
        let current = sample().await?;
        if current == previous {
            return Ok(current);
        }
        previous = current;
    }
    Err(DriverError::Timeout {
        what: format!("{what} to settle"),
        waited: policy.quantum.saturating_mul((max_samples - 1) as u32),
    })
}
