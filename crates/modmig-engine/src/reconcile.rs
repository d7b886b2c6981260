use modmig_core::{CatalogFormatError, CatalogRecord};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSide {
    ToVerify,
    KnownGood,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRow {
    pub side: CatalogSide,
    pub error: CatalogFormatError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub total_records: usize,
    pub matched_count: usize,
    pub unmatched_count: usize,
    pub malformed_rows: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// Known-good records that matched a record to verify, one per matched row.
    pub matched: Vec<CatalogRecord>,
    /// Records to verify with no known-good counterpart.
    pub unmatched: Vec<CatalogRecord>,
    pub malformed: Vec<MalformedRow>,
}

impl Reconciliation {
    pub fn summary(&self) -> ReconcileSummary {
        ReconcileSummary {
            total_records: self.matched.len() + self.unmatched.len(),
            matched_count: self.matched.len(),
            unmatched_count: self.unmatched.len(),
            malformed_rows: self.malformed.len(),
        }
    }
}

/// Parse catalog text, skipping the header row and blank lines. Malformed rows
/// are returned alongside the records instead of aborting the scan.
pub fn parse_catalog(text: &str) -> (Vec<CatalogRecord>, Vec<CatalogFormatError>) {
    let mut records = Vec::new();
    let mut errors = Vec::new();
    for (idx, raw) in text.split('\n').enumerate().skip(1) {
        let row = raw.strip_suffix('\r').unwrap_or(raw);
        if row.trim().is_empty() {
            continue;
        }
        match CatalogRecord::parse_row(row, idx + 1) {
            Ok(record) => records.push(record),
            Err(err) => errors.push(err),
        }
    }
    (records, errors)
}

/// Join the catalog to verify against the known-good catalog on
/// `(article, activity, operation)`. The first known-good row in file order wins.
pub fn reconcile(to_verify: &str, known_good: &str) -> Reconciliation {
    let (targets, target_errors) = parse_catalog(to_verify);
    let (sources, source_errors) = parse_catalog(known_good);

    let mut out = Reconciliation {
        malformed: target_errors
            .into_iter()
            .map(|error| MalformedRow {
                side: CatalogSide::ToVerify,
                error,
            })
            .chain(source_errors.into_iter().map(|error| MalformedRow {
                side: CatalogSide::KnownGood,
                error,
            }))
            .collect(),
        ..Reconciliation::default()
    };

    for target in targets {
        match sources.iter().find(|s| s.join_key() == target.join_key()) {
            Some(source) => out.matched.push(source.clone()),
            None => out.unmatched.push(target),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "modello,priorita,articolo,attivita,operazione";

    fn catalog(rows: &[&str]) -> String {
        std::iter::once(HEADER)
            .chain(rows.iter().copied())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn single_matching_row_records_the_known_good_model() {
        let a = catalog(&["M1,A,X1,10,OP1"]);
        let b = catalog(&["M2,J,X1,10,OP1"]);
        let result = reconcile(&a, &b);
        assert_eq!(result.matched, vec![CatalogRecord::parse_row("M2,J,X1,10,OP1", 2).unwrap()]);
        assert!(result.unmatched.is_empty());
    }

    #[test]
    fn first_known_good_row_wins_on_duplicates() {
        let a = catalog(&["M1,A,X1,10,OP1"]);
        let b = catalog(&["M2,J,X1,10,OP1", "M3,J,X1,10,OP1"]);
        assert_eq!(reconcile(&a, &b).matched[0].model_id, "M2");
    }

    #[test]
    fn partitions_catalog_to_verify() {
        let a = catalog(&[
            "M1,A,X1,10,OP1",
            "M1,A,X1,20,OP2",
            "M1,A,X2,10,OP1",
            "M1,A,X1,10,op1",
        ]);
        let b = catalog(&["M2,J,X1,10,OP1", "M2,J,X1,20,OP2"]);
        let result = reconcile(&a, &b);
        let summary = result.summary();
        assert_eq!(summary.total_records, 4);
        assert_eq!(summary.matched_count, 2);
        assert_eq!(summary.unmatched_count, 2);
        assert_eq!(
            result
                .unmatched
                .iter()
                .map(|r| r.article_code.as_str())
                .collect::<Vec<_>>(),
            vec!["X2", "X1"]
        );
    }

    #[test]
    fn permuting_known_good_keeps_membership() {
        let a = catalog(&["M1,A,X1,10,OP1", "M1,A,X1,20,OP2", "M1,A,X3,30,OP3"]);
        let b = ["M2,J,X1,10,OP1", "M3,J,X1,20,OP2", "M4,J,X9,10,OP1"];
        let forward = reconcile(&a, &catalog(&b));
        let reversed = reconcile(&a, &catalog(&[b[2], b[1], b[0]]));

        let keys = |r: &Reconciliation| {
            r.unmatched
                .iter()
                .map(|rec| rec.to_csv_row())
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&forward), keys(&reversed));
        assert_eq!(forward.summary(), reversed.summary());
    }

    #[test]
    fn malformed_rows_are_counted_and_skipped() {
        let a = format!("{}\r\nM1,A,X1,10,OP1\r\nbroken,row\r\n\r\n", HEADER);
        let b = catalog(&["M2,J,X1,10,OP1", "M2,J,X1"]);
        let result = reconcile(&a, &b);
        let summary = result.summary();
        assert_eq!(summary.total_records, 1);
        assert_eq!(summary.matched_count, 1);
        assert_eq!(summary.malformed_rows, 2);
        assert_eq!(result.malformed[0].side, CatalogSide::ToVerify);
        assert_eq!(result.malformed[0].error.line, 3);
        assert_eq!(result.malformed[1].side, CatalogSide::KnownGood);
    }

    #[test]
    fn header_only_catalogs_are_empty() {
        let result = reconcile(HEADER, HEADER);
        assert_eq!(result.summary(), ReconcileSummary::default());
    }
}
