use modmig_core::{ActivitySequence, DEFAULT_REQUIRED_PRIORITY};
use modmig_driver::{DriverError, LineApplication};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// The configuration carries a priority other than the required one.
    Skipped { priority: String },
    NoActivities,
    Captured(ActivitySequence),
}

/// Captures the activity list of a reference configuration in one pass.
#[derive(Debug, Clone)]
pub struct ActivityExtractor {
    required_priority: String,
}

impl Default for ActivityExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_REQUIRED_PRIORITY)
    }
}

impl ActivityExtractor {
    pub fn new(required_priority: impl Into<String>) -> Self {
        Self {
            required_priority: required_priority.into().trim().to_string(),
        }
    }

    pub fn required_priority(&self) -> &str {
        &self.required_priority
    }

    pub async fn extract<A>(&self, app: &mut A, configuration: usize) -> Result<Extraction, DriverError>
    where
        A: LineApplication + ?Sized,
    {
        let priority = app.configuration_priority(configuration).await?;
        if priority.trim() != self.required_priority {
            debug!(configuration, priority = %priority, "configuration skipped on priority");
            return Ok(Extraction::Skipped {
                priority: priority.trim().to_string(),
            });
        }

        let row_count = app.open_configuration(configuration).await?;
        if row_count == 0 {
            app.close_configuration().await?;
            return Ok(Extraction::NoActivities);
        }

        let industrial_cost = app.industrial_cost().await?;
        let mut rows = Vec::with_capacity(row_count);
        let mut model_id = String::new();
        let mut model_priority = String::new();
        for row in 0..row_count {
            let reference = app.reference_row(row).await?;
            if row == 0 {
                model_id = reference.model_id;
                model_priority = reference.priority;
            }
            rows.push(reference.activity);
        }
        app.close_configuration().await?;

        debug!(configuration, model_id = %model_id, rows = rows.len(), "reference captured");
        Ok(Extraction::Captured(ActivitySequence::new(
            model_id,
            model_priority,
            industrial_cost,
            rows,
        )))
    }
}
