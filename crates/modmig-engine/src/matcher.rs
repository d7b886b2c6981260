use modmig_core::{ActivitySequence, MatchResult};
use modmig_driver::{CandidateSource, DriverError};
use tracing::{debug, trace};

/// Finds the first candidate template whose activity rows structurally equal a
/// reference sequence. Rows are compared in order on trimmed operation and
/// activity codes; anything else on the row is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateMatcher;

impl TemplateMatcher {
    /// Scan candidates from `start_at`. A candidate whose row count differs is
    /// rejected without reading any of its rows.
    pub async fn find_match<S>(
        &self,
        reference: &ActivitySequence,
        source: &mut S,
        start_at: usize,
    ) -> Result<MatchResult, DriverError>
    where
        S: CandidateSource + ?Sized,
    {
        let total = source.candidate_count().await?;
        for index in start_at..total {
            let rows = source.open_candidate(index).await?;
            if rows != reference.len() {
                trace!(index, rows, expected = reference.len(), "candidate length differs");
                continue;
            }
            if self.rows_match(reference, source).await? {
                debug!(index, model_id = reference.model_id(), "candidate matched");
                return Ok(MatchResult::Matched {
                    candidate_index: index,
                    priority: reference.priority().to_string(),
                });
            }
        }
        Ok(MatchResult::NoMatch)
    }

    async fn rows_match<S>(&self, reference: &ActivitySequence, source: &mut S) -> Result<bool, DriverError>
    where
        S: CandidateSource + ?Sized,
    {
        for (row, expected) in reference.rows().iter().enumerate() {
            let found = source.candidate_row(row).await?;
            if !expected.key().matches(&found) {
                trace!(row, expected = %expected.key(), found = %found, "row mismatch");
                return Ok(false);
            }
        }
        Ok(true)
    }
}
