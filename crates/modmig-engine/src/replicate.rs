use modmig_core::{ActivitySequence, MatchResult, MigrationOutcome, WorkItem};
use modmig_driver::{ConfirmationOutcome, DriverError, LineApplication};
use tracing::{debug, info, warn};

use crate::TemplateMatcher;

/// Values to carry onto one row of the imported template.
#[derive(Debug, Clone, PartialEq)]
pub struct RowWrite {
    pub row: usize,
    pub set_ok: bool,
    pub set_ko: bool,
    pub cost: Option<f64>,
}

impl RowWrite {
    fn is_empty(&self) -> bool {
        !self.set_ok && !self.set_ko && self.cost.is_none()
    }
}

/// Rows of `reference` that carry a set flag or a non-zero cost. Absent and
/// empty controls produce no write.
pub fn plan_row_writes(reference: &ActivitySequence) -> Vec<RowWrite> {
    reference
        .rows()
        .iter()
        .enumerate()
        .map(|(row, activity)| RowWrite {
            row,
            set_ok: activity.ok == Some(true),
            set_ko: activity.ko == Some(true),
            cost: activity.cost.filter(|c| c.is_finite() && *c != 0.0),
        })
        .filter(|write| !write.is_empty())
        .collect()
}

/// Imports a structurally equal template for a product and reproduces the
/// reference values on it, leaving the commit to a human.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationReplicator {
    matcher: TemplateMatcher,
}

impl ConfigurationReplicator {
    pub fn new(matcher: TemplateMatcher) -> Self {
        Self { matcher }
    }

    pub async fn replicate<A>(
        &self,
        app: &mut A,
        item: &WorkItem,
        reference: &ActivitySequence,
    ) -> Result<MigrationOutcome, DriverError>
    where
        A: LineApplication + ?Sized,
    {
        let writes = plan_row_writes(reference);
        app.begin_import(item).await?;

        let mut start_at = 0;
        loop {
            let (index, priority) = match self.matcher.find_match(reference, app, start_at).await? {
                MatchResult::Matched {
                    candidate_index,
                    priority,
                } => (candidate_index, priority),
                MatchResult::NoMatch => {
                    app.abandon_import().await?;
                    return Ok(MigrationOutcome::NoModelFound);
                }
            };

            app.import_candidate(index).await?;
            app.set_industrial_cost(reference.industrial_cost()).await?;
            for write in &writes {
                if write.set_ok {
                    app.mark_ok(write.row).await?;
                }
                if write.set_ko {
                    app.mark_ko(write.row).await?;
                }
                if let Some(cost) = write.cost {
                    app.fill_cost(write.row, cost).await?;
                }
            }
            debug!(candidate = index, writes = writes.len(), "reference values applied");

            match app.request_confirmation().await? {
                ConfirmationOutcome::Confirmed => {
                    info!(candidate = index, "configuration committed");
                    return Ok(MigrationOutcome::Configured { priority });
                }
                ConfirmationOutcome::Discarded => {
                    return Ok(MigrationOutcome::NotSavedByUser);
                }
                ConfirmationOutcome::ConflictDetected => {
                    warn!(candidate = index, "commit rejected as duplicate, trying next candidate");
                    app.reopen_import().await?;
                    start_at = index + 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modmig_core::ActivityRow;
    use modmig_driver::{FixtureData, FixtureLine, FixtureWrite};

    fn row(op: &str, ok: Option<bool>, ko: Option<bool>, cost: Option<f64>) -> ActivityRow {
        ActivityRow {
            operation_code: op.to_string(),
            activity_code: "10".to_string(),
            ok,
            ko,
            cost,
        }
    }

    #[test]
    fn plans_only_rows_with_values() {
        let reference = ActivitySequence::new(
            "M1",
            "J",
            1.0,
            vec![
                row("OP1", Some(true), Some(false), Some(0.0)),
                row("OP2", None, None, None),
                row("OP3", Some(false), Some(true), Some(4.0)),
                row("OP4", None, None, Some(f64::NAN)),
            ],
        );
        assert_eq!(
            plan_row_writes(&reference),
            vec![
                RowWrite {
                    row: 0,
                    set_ok: true,
                    set_ko: false,
                    cost: None
                },
                RowWrite {
                    row: 2,
                    set_ok: false,
                    set_ko: true,
                    cost: Some(4.0)
                },
            ]
        );
    }

    fn two_candidate_line(confirmations: &str) -> FixtureLine {
        let json = format!(
            r#"{{"products":[{{"family_id":"F","product_id":"P",
                "candidates":[
                    {{"template_id":"T1","rows":[{{"operation_code":"OP1","activity_code":"10"}}]}},
                    {{"template_id":"T2","rows":[{{"operation_code":"OP1","activity_code":"10"}}]}}],
                "confirmations":{confirmations}}}]}}"#
        );
        FixtureLine::new(serde_json::from_str::<FixtureData>(&json).unwrap())
    }

    #[tokio::test]
    async fn exhausting_candidates_on_conflicts_is_no_model_found() {
        let mut app = two_candidate_line(r#"["conflict_detected","conflict_detected"]"#);
        let item = WorkItem::new("F", "P");
        app.open_product(&item).await.unwrap();
        let reference = ActivitySequence::new("M1", "J", 2.0, vec![row("OP1", Some(true), None, None)]);

        let outcome = ConfigurationReplicator::default()
            .replicate(&mut app, &item, &reference)
            .await
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::NoModelFound);
        assert!(app.committed_for(&item.key()).is_empty());
        assert_eq!(
            app.writes()
                .iter()
                .filter(|w| matches!(w, FixtureWrite::IndustrialCost { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn confirmation_after_conflict_commits_the_next_candidate() {
        let mut app = two_candidate_line(r#"["conflict_detected"]"#);
        let item = WorkItem::new("F", "P");
        app.open_product(&item).await.unwrap();
        let reference = ActivitySequence::new("M1", "J", 2.0, vec![row("OP1", None, None, None)]);

        let outcome = ConfigurationReplicator::default()
            .replicate(&mut app, &item, &reference)
            .await
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::Configured { priority: "J".into() });
        assert_eq!(app.committed_for(&item.key()), vec!["T2"]);
    }

    #[tokio::test]
    async fn discarded_confirmation_is_not_saved() {
        let mut app = two_candidate_line(r#"["discarded"]"#);
        let item = WorkItem::new("F", "P");
        app.open_product(&item).await.unwrap();
        let reference = ActivitySequence::new("M1", "J", 0.0, vec![row("OP1", None, Some(true), None)]);

        let outcome = ConfigurationReplicator::default()
            .replicate(&mut app, &item, &reference)
            .await
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::NotSavedByUser);
        assert!(app.committed_for(&item.key()).is_empty());
        assert!(app
            .writes()
            .contains(&FixtureWrite::Ko { template_id: "T1".into(), row: 0 }));
    }
}
