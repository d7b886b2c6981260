use modmig_core::{MigrationOutcome, WorkItem};
use modmig_driver::{DriverError, LineApplication};
use modmig_storage::WorkQueue;
use tracing::{error, info, info_span, warn, Instrument};

use crate::{ActivityExtractor, ConfigurationReplicator, Extraction, RunSummary};

/// Drives every queued product through extraction and replication, one at a
/// time, and keeps the work queue file in step with committed products.
pub struct MigrationOrchestrator<A> {
    app: A,
    extractor: ActivityExtractor,
    replicator: ConfigurationReplicator,
}

impl<A: LineApplication> MigrationOrchestrator<A> {
    pub fn new(app: A, required_priority: impl Into<String>) -> Self {
        Self {
            app,
            extractor: ActivityExtractor::new(required_priority),
            replicator: ConfigurationReplicator::default(),
        }
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn into_app(self) -> A {
        self.app
    }

    pub fn required_priority(&self) -> &str {
        self.extractor.required_priority()
    }

    pub async fn migrate_product(&mut self, item: &WorkItem) -> Result<MigrationOutcome, DriverError> {
        let configurations = self.app.open_product(item).await?;
        if configurations == 0 {
            return Ok(MigrationOutcome::NoConfigurationFound);
        }

        let mut last_priority = String::new();
        for configuration in 0..configurations {
            match self.extractor.extract(&mut self.app, configuration).await? {
                Extraction::Skipped { priority } => last_priority = priority,
                Extraction::NoActivities => return Ok(MigrationOutcome::NoActivitiesInModel),
                Extraction::Captured(reference) => {
                    return self.replicator.replicate(&mut self.app, item, &reference).await;
                }
            }
        }
        Ok(MigrationOutcome::SkippedWrongPriority {
            priority: last_priority,
        })
    }

    /// Process a snapshot of `queue` in order. Configured products are removed
    /// and the queue file rewritten before moving on. A queue file that cannot
    /// be rewritten, or a failed recovery, stops the run with `aborted` set.
    pub async fn run(&mut self, queue: &mut WorkQueue) -> RunSummary {
        let mut summary = RunSummary::start(self.required_priority());
        let snapshot: Vec<WorkItem> = queue.items().cloned().collect();
        info!(run_id = %summary.run_id, queued = snapshot.len(), "migration run started");

        for item in &snapshot {
            let key = item.key();
            let span = info_span!("product", product = %key);
            let result = self.migrate_product(item).instrument(span.clone()).await;

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(parent: &span, error = %err, "collaborator failure");
                    MigrationOutcome::CollaboratorFailure {
                        reason: err.to_string(),
                    }
                }
            };
            info!(parent: &span, outcome = outcome.label(), detail = ?outcome.detail(), "product processed");

            let failed = matches!(outcome, MigrationOutcome::CollaboratorFailure { .. });
            let mut persisted = Ok(());
            if outcome.removes_from_queue() {
                queue.remove(&key);
                persisted = queue.save().await;
            }
            summary.record(item, outcome);

            if let Err(err) = persisted {
                error!(product = %key, error = %err, "work queue not persisted, stopping run");
                summary.aborted = Some(format!("saving work queue after {key} failed: {err}"));
                break;
            }

            if failed {
                if let Err(err) = self.app.recover().instrument(span).await {
                    error!(product = %key, error = %err, "recovery failed, stopping run");
                    summary.aborted = Some(format!("recovery after {key} failed: {err}"));
                    break;
                }
            }
        }

        summary.finish(queue.len());
        info!(
            run_id = %summary.run_id,
            configured = summary.configured,
            skipped = summary.skipped,
            failed = summary.failed,
            remaining = summary.remaining_in_queue,
            "migration run finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modmig_driver::{FixtureData, FixtureLine, FixtureWrite};

    fn orchestrator(json: &str) -> MigrationOrchestrator<FixtureLine> {
        let data: FixtureData = serde_json::from_str(json).unwrap();
        MigrationOrchestrator::new(FixtureLine::new(data), "J")
    }

    #[tokio::test]
    async fn second_candidate_receives_reference_values() {
        let mut orch = orchestrator(
            r#"{"products":[{"family_id":"F","product_id":"P",
                "configurations":[{"model_id":"M1","priority":"J","industrial_cost":9,
                    "rows":[{"operation_code":"OP1","activity_code":"10","ok":true,"cost":5}]}],
                "candidates":[
                    {"template_id":"T-A","rows":[{"operation_code":"OP1","activity_code":"11"}]},
                    {"template_id":"T-B","rows":[{"operation_code":"OP1","activity_code":"10"}]}]}]}"#,
        );
        let item = WorkItem::new("F", "P");
        let outcome = orch.migrate_product(&item).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::Configured { priority: "J".into() });

        let writes = orch.app().writes();
        assert!(writes.contains(&FixtureWrite::Ok {
            template_id: "T-B".into(),
            row: 0
        }));
        assert!(writes.contains(&FixtureWrite::Cost {
            template_id: "T-B".into(),
            row: 0,
            cost: 5.0
        }));
        assert_eq!(orch.app().committed_for(&item.key()), vec!["T-B"]);
    }

    #[tokio::test]
    async fn first_required_priority_row_is_the_reference() {
        let mut orch = orchestrator(
            r#"{"products":[{"family_id":"F","product_id":"P",
                "configurations":[
                    {"model_id":"M0","priority":"A","rows":[{"operation_code":"OP9","activity_code":"90"}]},
                    {"model_id":"M1","priority":"J"},
                    {"model_id":"M2","priority":"J","rows":[{"operation_code":"OP1","activity_code":"10"}]}]}]}"#,
        );
        let outcome = orch.migrate_product(&WorkItem::new("F", "P")).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::NoActivitiesInModel);
    }

    #[tokio::test]
    async fn all_rows_skipped_reports_last_priority() {
        let mut orch = orchestrator(
            r#"{"products":[{"family_id":"F","product_id":"P",
                "configurations":[{"model_id":"M0","priority":"A"},{"model_id":"M1","priority":"B"}]}]}"#,
        );
        let outcome = orch.migrate_product(&WorkItem::new("F", "P")).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::SkippedWrongPriority { priority: "B".into() });
    }

    #[tokio::test]
    async fn empty_queue_run_is_a_no_op() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("queue.csv");
        let mut queue = WorkQueue::new(&path);
        let mut orch = orchestrator(r#"{"products":[]}"#);

        let summary = orch.run(&mut queue).await;
        assert_eq!(summary.processed, 0);
        assert!(summary.aborted.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unwritable_queue_stops_the_run_and_keeps_the_summary() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("queue.csv");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), "").unwrap();

        let product = |id: &str| {
            format!(
                r#"{{"family_id":"F","product_id":"{id}",
                    "configurations":[{{"model_id":"M1","priority":"J",
                        "rows":[{{"operation_code":"OP1","activity_code":"10","ok":true}}]}}],
                    "candidates":[{{"template_id":"T-{id}","rows":[{{"operation_code":"OP1","activity_code":"10"}}]}}]}}"#
            )
        };
        let mut orch = orchestrator(&format!(r#"{{"products":[{},{}]}}"#, product("P1"), product("P2")));
        let mut queue = WorkQueue::new(&path);
        queue.push(WorkItem::new("F", "P1"));
        queue.push(WorkItem::new("F", "P2"));

        let summary = orch.run(&mut queue).await;
        let reason = summary.aborted.as_deref().unwrap();
        assert!(reason.contains("FP1"), "{reason}");
        assert_eq!(summary.configured, 1);
        assert_eq!(summary.products.len(), 1);
        assert_eq!(summary.remaining_in_queue, 1);
        assert!(orch.app().committed_for(&WorkItem::new("F", "P2").key()).is_empty());
    }
}
