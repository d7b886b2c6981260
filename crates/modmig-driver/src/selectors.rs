use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// CSS selectors of the line-management application. Per-row selectors carry a
/// `{row}` placeholder (1-based, as in `:nth-child`); reference activity cells
/// also carry `{col}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub login_path: String,
    pub home_path: String,
    pub username_input: String,
    pub password_input: String,
    pub login_button: String,
    pub menu_path: Vec<String>,

    pub family_filter: String,
    pub family_first_row: String,
    pub product_filter: String,
    pub configuration_rows: String,
    pub configuration_priority_cell: String,
    pub configuration_edit_button: String,
    pub configuration_close_button: String,
    pub page_length_value: String,

    pub activity_page_length: String,
    pub activity_rows: String,
    pub activity_first_cell: String,
    pub empty_table_class: String,
    pub activity_cell: String,
    pub model_column: usize,
    pub priority_column: usize,
    pub operation_column: usize,
    pub activity_column: usize,
    pub activity_ok_icon: String,
    pub activity_ko_icon: String,
    pub activity_ok_toggle: String,
    pub activity_ko_toggle: String,
    pub activity_cost_input: String,
    pub thumbs_up_class: String,
    pub industrial_cost_input: String,

    pub new_configuration_button: String,
    pub product_combobox: String,
    pub product_search_input: String,
    pub product_first_option: String,
    pub import_button: String,
    pub import_modal: String,
    pub import_modal_close: String,
    pub import_confirm_button: String,
    pub candidate_rows: String,
    pub candidate_row: String,
    pub candidate_select_link: String,
    pub candidate_page_length: String,
    pub candidate_activity_rows: String,
    pub candidate_operation_cell: String,
    pub candidate_activity_cell: String,

    pub configuration_modal: String,
    pub save_button: String,
    pub conflict_notice: String,
    /// Text a `conflict_notice` element must contain to count as a duplicate rejection.
    pub conflict_text: String,
    pub conflict_window_ms: u64,
    pub confirmation_message: String,
}

impl Default for Selectors {
    fn default() -> Self {
        let activity_row = "#id_table_pris_articoli_modprod > tbody > tr:nth-child({row})";
        let candidate_activity_row = "#id_table_panth_modprod_d > tbody > tr:nth-child({row})";
        Self {
            login_path: "login.php".into(),
            home_path: "index.php".into(),
            username_input: "#id_sm_utenti_username".into(),
            password_input: "#id_sm_utenti_password".into(),
            login_button: "#id_loginForm > div.login-buttons > button".into(),
            menu_path: vec![
                "#id_li_beemo > a".into(),
                "#id_li_beemo_pris > a".into(),
                "#id_li_beemo_pris_articoli > a".into(),
            ],

            family_filter: "#id_table_famiglie_filter > label > input".into(),
            family_first_row: "#id_table_famiglie > tbody > tr:nth-child(1)".into(),
            product_filter: "#id_table_pris_articoli_filter > label > input".into(),
            configuration_rows: "#id_table_pris_articoli > tbody > tr".into(),
            configuration_priority_cell:
                "#id_table_pris_articoli > tbody > tr:nth-child({row}) > td:nth-child(4)".into(),
            configuration_edit_button:
                "#id_table_pris_articoli > tbody > tr:nth-child({row}) > td.text-right.all.avoid-selection > a.btn.btn-blue"
                    .into(),
            configuration_close_button:
                "#id_pris_articoli_configForm > div.modal-footer > button.btn.btn-white".into(),
            page_length_value: "100".into(),

            activity_page_length: "#id_table_pris_articoli_modprod_length > label > select".into(),
            activity_rows: "#id_table_pris_articoli_modprod > tbody > tr".into(),
            activity_first_cell:
                "#id_table_pris_articoli_modprod > tbody > tr:nth-child(1) > td:nth-child(1)".into(),
            empty_table_class: "dataTables_empty".into(),
            activity_cell: format!("{activity_row} > td:nth-child({{col}})"),
            model_column: 1,
            priority_column: 2,
            operation_column: 3,
            activity_column: 4,
            activity_ok_icon: format!("{activity_row} > td:nth-child(7) > a > i"),
            activity_ko_icon: format!("{activity_row} > td:nth-child(8) > a > i"),
            activity_ok_toggle: format!("{activity_row} > td:nth-child(7) > a"),
            activity_ko_toggle: format!("{activity_row} > td:nth-child(8) > a"),
            activity_cost_input: format!("{activity_row} > td:nth-child(9) > div > div > input"),
            thumbs_up_class: "thumbs-up".into(),
            industrial_cost_input: "#id_pris_articoli_costo_industriale".into(),

            new_configuration_button: "#id_pris_articoli_nuovo".into(),
            product_combobox:
                "#id_pris_articoli_configForm > div.modal-body > div:nth-child(1) > div > span".into(),
            product_search_input:
                "body > span > span > span.select2-search.select2-search--dropdown > input".into(),
            product_first_option: "#select2-id_pris_articoli_codice-results > li:nth-child(1)".into(),
            import_button: "#id_pris_articoli_modprod_import".into(),
            import_modal: "#id_pris_articoli_modprod_modal".into(),
            import_modal_close:
                "#id_pris_articoli_modprod_modal > div > div > div.modal-footer > button.btn.btn-white".into(),
            import_confirm_button: "#id_pris_articoli_modprod_modal_importa".into(),
            candidate_rows: "#id_table_panth_modprod > tbody > tr".into(),
            candidate_row: "#id_table_panth_modprod > tbody > tr:nth-child({row})".into(),
            candidate_select_link:
                "#id_table_panth_modprod > tbody > tr:nth-child({row}) > td.text-left.all.dtr-control > a".into(),
            candidate_page_length: "#id_table_panth_modprod_d_length > label > select".into(),
            candidate_activity_rows: "#id_table_panth_modprod_d > tbody > tr".into(),
            candidate_operation_cell: format!(
                "{candidate_activity_row} > td.text-left.all.sorting_1.dtr-control"
            ),
            candidate_activity_cell: format!("{candidate_activity_row} > td:nth-child(2)"),

            configuration_modal: "#id_pris_articoli_config_modal".into(),
            save_button:
                "body > div.swal2-container > div.swal2-modal.hide-swal2 > button.swal2-confirm.styled".into(),
            conflict_notice: "#toast-container > div > div.toast-message".into(),
            conflict_text: "SyntaxError: Unexpected end of JSON input".into(),
            conflict_window_ms: 2000,
            confirmation_message: "Check the configuration. If it is correct click \"Save\", otherwise \"Close\". Click \"Ok\" to dismiss this message."
                .into(),
        }
    }
}

impl Selectors {
    /// Defaults overridden by whichever fields the YAML file names.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading selectors {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing selectors {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Resolve `{row}` for a zero-based row index.
    pub fn row(template: &str, index: usize) -> String {
        template.replace("{row}", &(index + 1).to_string())
    }

    pub fn cell(template: &str, index: usize, column: usize) -> String {
        Self::row(template, index).replace("{col}", &column.to_string())
    }

    pub fn conflict_window(&self) -> Duration {
        Duration::from_millis(self.conflict_window_ms)
    }
}
