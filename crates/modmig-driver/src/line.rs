use std::fmt;

use async_trait::async_trait;
use modmig_core::{ActivityKey, ActivityRow, WorkItem};
use tracing::{debug, info, warn};

use crate::{
    CandidateSource, ConfirmationOutcome, ConfirmationRequest, DriverError, ElementState,
    LineApplication, ReferenceRow, Selectors, UiDriver,
};

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// [`LineApplication`] driven through a [`UiDriver`] using a [`Selectors`] map.
pub struct UiLineApplication<D> {
    driver: D,
    selectors: Selectors,
    base_url: String,
}

impl<D: UiDriver> UiLineApplication<D> {
    pub fn new(driver: D, selectors: Selectors, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            driver,
            selectors,
            base_url,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Log in, retrying until the home page is reached or `attempts` run out.
    pub async fn login(&mut self, credentials: &Credentials, attempts: usize) -> Result<(), DriverError> {
        let login_url = self.url(&self.selectors.login_path);
        let home_url = self.url(&self.selectors.home_path);
        for attempt in 1..=attempts.max(1) {
            self.driver.navigate(&login_url).await?;
            self.driver
                .fill(&self.selectors.username_input, &credentials.username)
                .await?;
            self.driver
                .fill(&self.selectors.password_input, &credentials.password)
                .await?;
            self.driver.click(&self.selectors.login_button).await?;

            let current = self.driver.current_url().await?;
            if current.starts_with(&home_url) {
                info!(attempt, "logged in");
                return Ok(());
            }
            warn!(attempt, url = %current, "login did not reach the home page");
        }
        Err(DriverError::Unavailable(format!(
            "login did not reach {home_url} after {} attempts",
            attempts.max(1)
        )))
    }

    /// Walk the menu from the home page to the product configuration list.
    pub async fn enter_products_page(&mut self) -> Result<(), DriverError> {
        self.driver.navigate(&self.url(&self.selectors.home_path)).await?;
        for item in &self.selectors.menu_path {
            self.driver.click(item).await?;
        }
        Ok(())
    }

    async fn optional_flag(&self, icon: &str) -> Result<Option<bool>, DriverError> {
        if self.driver.count(icon).await? == 0 {
            return Ok(None);
        }
        let class = self.driver.read_attribute(icon, "class").await?;
        Ok(Some(
            class.is_some_and(|c| c.contains(self.selectors.thumbs_up_class.as_str())),
        ))
    }

    async fn optional_number(&self, input: &str) -> Result<Option<f64>, DriverError> {
        if self.driver.count(input).await? == 0 {
            return Ok(None);
        }
        let raw = self.driver.read_value(input).await?;
        parse_number(&raw, input).map(Some)
    }
}

/// Empty inputs read as zero, like the application's own forms.
fn parse_number(raw: &str, selector: &str) -> Result<f64, DriverError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }
    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|_| DriverError::Protocol(format!("{selector} holds non-numeric value {raw:?}")))
}

#[async_trait]
impl<D: UiDriver> CandidateSource for UiLineApplication<D> {
    async fn candidate_count(&mut self) -> Result<usize, DriverError> {
        self.driver.wait_until_stable(&self.selectors.candidate_rows).await
    }

    async fn open_candidate(&mut self, index: usize) -> Result<usize, DriverError> {
        let s = &self.selectors;
        self.driver.click(&Selectors::row(&s.candidate_row, index)).await?;
        self.driver
            .select_option(&s.candidate_page_length, &s.page_length_value)
            .await?;
        self.driver.wait_until_stable(&s.candidate_activity_rows).await
    }

    async fn candidate_row(&mut self, row: usize) -> Result<ActivityKey, DriverError> {
        let s = &self.selectors;
        let operation = self
            .driver
            .read_text(&Selectors::row(&s.candidate_operation_cell, row))
            .await?;
        let activity = self
            .driver
            .read_text(&Selectors::row(&s.candidate_activity_cell, row))
            .await?;
        Ok(ActivityKey::new(operation, activity))
    }
}

#[async_trait]
impl<D: UiDriver> LineApplication for UiLineApplication<D> {
    async fn open_product(&mut self, item: &WorkItem) -> Result<usize, DriverError> {
        let s = &self.selectors;
        self.driver
            .fill(&s.family_filter, &format!("{} {}", item.family_id, item.product_id))
            .await?;
        self.driver.click(&s.family_first_row).await?;
        self.driver.fill(&s.product_filter, &item.product_id).await?;
        let count = self.driver.wait_until_stable(&s.configuration_rows).await?;
        debug!(family = %item.family_id, product = %item.product_id, count, "configurations listed");
        Ok(count)
    }

    async fn configuration_priority(&mut self, index: usize) -> Result<String, DriverError> {
        let cell = Selectors::row(&self.selectors.configuration_priority_cell, index);
        Ok(self.driver.read_text(&cell).await?.trim().to_string())
    }

    async fn open_configuration(&mut self, index: usize) -> Result<usize, DriverError> {
        let s = &self.selectors;
        self.driver
            .click(&Selectors::row(&s.configuration_edit_button, index))
            .await?;
        self.driver
            .select_option(&s.activity_page_length, &s.page_length_value)
            .await?;
        let count = self.driver.wait_until_stable(&s.activity_rows).await?;
        if count == 0 {
            return Ok(0);
        }
        // An empty table still renders one placeholder row.
        let first_class = self.driver.read_attribute(&s.activity_first_cell, "class").await?;
        if first_class.as_deref() == Some(s.empty_table_class.as_str()) {
            return Ok(0);
        }
        Ok(count)
    }

    async fn industrial_cost(&mut self) -> Result<f64, DriverError> {
        let input = &self.selectors.industrial_cost_input;
        let raw = self.driver.read_value(input).await?;
        parse_number(&raw, input)
    }

    async fn reference_row(&mut self, row: usize) -> Result<ReferenceRow, DriverError> {
        let s = &self.selectors;
        let cell = |column| Selectors::cell(&s.activity_cell, row, column);
        let model_id = self.driver.read_text(&cell(s.model_column)).await?;
        let priority = self.driver.read_text(&cell(s.priority_column)).await?;
        let operation_code = self.driver.read_text(&cell(s.operation_column)).await?;
        let activity_code = self.driver.read_text(&cell(s.activity_column)).await?;
        let ok = self.optional_flag(&Selectors::row(&s.activity_ok_icon, row)).await?;
        let ko = self.optional_flag(&Selectors::row(&s.activity_ko_icon, row)).await?;
        let cost = self
            .optional_number(&Selectors::row(&s.activity_cost_input, row))
            .await?;
        Ok(ReferenceRow {
            model_id: model_id.trim().to_string(),
            priority: priority.trim().to_string(),
            activity: ActivityRow {
                operation_code,
                activity_code,
                ok,
                ko,
                cost,
            },
        })
    }

    async fn close_configuration(&mut self) -> Result<(), DriverError> {
        self.driver
            .click(&self.selectors.configuration_close_button)
            .await
    }

    async fn begin_import(&mut self, item: &WorkItem) -> Result<(), DriverError> {
        let s = &self.selectors;
        self.driver.click(&s.new_configuration_button).await?;
        self.driver.click(&s.product_combobox).await?;
        self.driver.fill(&s.product_search_input, &item.product_id).await?;
        self.driver.click(&s.product_first_option).await?;
        self.driver.click(&s.import_button).await
    }

    async fn import_candidate(&mut self, index: usize) -> Result<(), DriverError> {
        let s = &self.selectors;
        self.driver
            .click(&Selectors::row(&s.candidate_select_link, index))
            .await?;
        self.driver.click(&s.import_confirm_button).await?;
        self.driver
            .wait_for_state(&s.import_modal, ElementState::Hidden, None)
            .await?;
        self.driver
            .select_option(&s.activity_page_length, &s.page_length_value)
            .await
    }

    async fn set_industrial_cost(&mut self, cost: f64) -> Result<(), DriverError> {
        self.driver
            .fill(&self.selectors.industrial_cost_input, &cost.to_string())
            .await
    }

    async fn mark_ok(&mut self, row: usize) -> Result<(), DriverError> {
        self.driver
            .click(&Selectors::row(&self.selectors.activity_ok_toggle, row))
            .await
    }

    async fn mark_ko(&mut self, row: usize) -> Result<(), DriverError> {
        self.driver
            .click(&Selectors::row(&self.selectors.activity_ko_toggle, row))
            .await
    }

    async fn fill_cost(&mut self, row: usize, cost: f64) -> Result<(), DriverError> {
        self.driver
            .fill(
                &Selectors::row(&self.selectors.activity_cost_input, row),
                &cost.to_string(),
            )
            .await
    }

    async fn request_confirmation(&mut self) -> Result<ConfirmationOutcome, DriverError> {
        let s = &self.selectors;
        let request = ConfirmationRequest {
            message: s.confirmation_message.clone(),
            confirm_selector: s.save_button.clone(),
            discard_selector: s.configuration_close_button.clone(),
            conflict_selector: s.conflict_notice.clone(),
            conflict_text: s.conflict_text.clone(),
            conflict_window: s.conflict_window(),
        };
        let outcome = self.driver.request_confirmation(&request).await?;
        if outcome != ConfirmationOutcome::ConflictDetected {
            self.driver
                .wait_for_state(&s.configuration_modal, ElementState::Hidden, None)
                .await?;
        }
        Ok(outcome)
    }

    async fn reopen_import(&mut self) -> Result<(), DriverError> {
        self.driver.click(&self.selectors.import_button).await
    }

    async fn abandon_import(&mut self) -> Result<(), DriverError> {
        self.driver.click(&self.selectors.import_modal_close).await?;
        self.driver
            .click(&self.selectors.configuration_close_button)
            .await
    }

    async fn recover(&mut self) -> Result<(), DriverError> {
        self.enter_products_page().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers reads from a selector → value table and records every action.
    #[derive(Default)]
    struct TableDriver {
        texts: HashMap<String, String>,
        counts: HashMap<String, usize>,
        attributes: HashMap<(String, String), String>,
        urls: Mutex<Vec<String>>,
        actions: Mutex<Vec<String>>,
    }

    impl TableDriver {
        fn log(&self, action: String) {
            self.actions.lock().unwrap().push(action);
        }

        fn actions(&self) -> Vec<String> {
            self.actions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UiDriver for TableDriver {
        async fn navigate(&self, url: &str) -> Result<(), DriverError> {
            self.log(format!("navigate {url}"));
            Ok(())
        }
        async fn current_url(&self) -> Result<String, DriverError> {
            let mut urls = self.urls.lock().unwrap();
            Ok(if urls.is_empty() { String::new() } else { urls.remove(0) })
        }
        async fn fill(&self, selector: &str, text: &str) -> Result<(), DriverError> {
            self.log(format!("fill {selector} = {text}"));
            Ok(())
        }
        async fn click(&self, selector: &str) -> Result<(), DriverError> {
            self.log(format!("click {selector}"));
            Ok(())
        }
        async fn read_text(&self, selector: &str) -> Result<String, DriverError> {
            self.texts
                .get(selector)
                .cloned()
                .ok_or_else(|| DriverError::ElementNotFound(selector.to_string()))
        }
        async fn read_attribute(&self, selector: &str, name: &str) -> Result<Option<String>, DriverError> {
            Ok(self.attributes.get(&(selector.to_string(), name.to_string())).cloned())
        }
        async fn read_value(&self, selector: &str) -> Result<String, DriverError> {
            self.read_text(selector).await
        }
        async fn select_option(&self, selector: &str, value: &str) -> Result<(), DriverError> {
            self.log(format!("select {selector} = {value}"));
            Ok(())
        }
        async fn count(&self, selector: &str) -> Result<usize, DriverError> {
            Ok(self.counts.get(selector).copied().unwrap_or(0))
        }
        async fn wait_until_stable(&self, selector: &str) -> Result<usize, DriverError> {
            self.count(selector).await
        }
        async fn wait_for_state(
            &self,
            selector: &str,
            state: ElementState,
            _timeout: Option<Duration>,
        ) -> Result<(), DriverError> {
            self.log(format!("wait {selector} {state:?}"));
            Ok(())
        }
        async fn request_confirmation(
            &self,
            _request: &ConfirmationRequest,
        ) -> Result<ConfirmationOutcome, DriverError> {
            self.log("confirm".to_string());
            Ok(ConfirmationOutcome::ConflictDetected)
        }
    }

    fn app(driver: TableDriver) -> UiLineApplication<TableDriver> {
        UiLineApplication::new(driver, Selectors::default(), "http://line.local")
    }

    #[tokio::test]
    async fn reference_row_distinguishes_missing_and_empty_controls() {
        let s = Selectors::default();
        let mut driver = TableDriver::default();
        for (col, value) in [(1, "M9"), (2, " J "), (3, "OP1"), (4, "10")] {
            driver
                .texts
                .insert(Selectors::cell(&s.activity_cell, 0, col), value.to_string());
        }
        let ok_icon = Selectors::row(&s.activity_ok_icon, 0);
        driver.counts.insert(ok_icon.clone(), 1);
        driver
            .attributes
            .insert((ok_icon, "class".into()), "fa fa-thumbs-up".into());
        let cost_input = Selectors::row(&s.activity_cost_input, 0);
        driver.counts.insert(cost_input.clone(), 1);
        driver.texts.insert(cost_input, "".into());

        let row = app(driver).reference_row(0).await.unwrap();
        assert_eq!(row.model_id, "M9");
        assert_eq!(row.priority, "J");
        assert_eq!(row.activity.ok, Some(true));
        assert_eq!(row.activity.ko, None);
        assert_eq!(row.activity.cost, Some(0.0));
    }

    #[tokio::test]
    async fn empty_table_placeholder_counts_as_zero_rows() {
        let s = Selectors::default();
        let mut driver = TableDriver::default();
        driver.counts.insert(s.activity_rows.clone(), 1);
        driver.attributes.insert(
            (s.activity_first_cell.clone(), "class".into()),
            "dataTables_empty".into(),
        );
        assert_eq!(app(driver).open_configuration(0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn conflict_does_not_wait_for_the_modal_to_close() {
        let mut line = app(TableDriver::default());
        let outcome = line.request_confirmation().await.unwrap();
        assert_eq!(outcome, ConfirmationOutcome::ConflictDetected);
        assert_eq!(line.driver().actions(), vec!["confirm".to_string()]);
    }

    #[tokio::test]
    async fn login_retries_until_home_page() {
        let driver = TableDriver::default();
        driver.urls.lock().unwrap().extend([
            "http://line.local/login.php".to_string(),
            "http://line.local/index.php?sid=1".to_string(),
        ]);
        let mut line = app(driver);
        let creds = Credentials {
            username: "op".into(),
            password: "secret".into(),
        };
        line.login(&creds, 3).await.unwrap();
        let navigations = line
            .driver()
            .actions()
            .into_iter()
            .filter(|a| a.starts_with("navigate"))
            .count();
        assert_eq!(navigations, 2);
        assert!(!format!("{creds:?}").contains("secret"));
    }

    #[tokio::test]
    async fn login_gives_up_after_attempts() {
        let mut line = app(TableDriver::default());
        let creds = Credentials {
            username: "op".into(),
            password: "bad".into(),
        };
        let err = line.login(&creds, 2).await.unwrap_err();
        assert!(matches!(err, DriverError::Unavailable(_)));
    }

    #[test]
    fn numbers_accept_decimal_comma_and_reject_garbage() {
        assert_eq!(parse_number(" 12,5 ", "#c").unwrap(), 12.5);
        assert_eq!(parse_number("", "#c").unwrap(), 0.0);
        assert!(matches!(parse_number("abc", "#c"), Err(DriverError::Protocol(_))));
    }
}
