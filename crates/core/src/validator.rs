//! Validation of mapped rows against a schema and a catalog snapshot.
//!
//! The report is a read-only snapshot of one `(rows, mapping, catalog)`
//! triple. It is recomputed from scratch whenever any of them changes;
//! nothing patches it in place.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogSnapshot;
use crate::mapping::MappedRow;
use crate::resolution::Resolution;
use crate::schema::TargetSchema;

/// Outcome of [`validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub total_rows: usize,
    /// Required fields that are absent or blank on at least one row.
    pub missing_required: BTreeSet<String>,
    /// Number of rows missing each field in `missing_required`.
    pub missing_counts: BTreeMap<String, usize>,
    /// Reference field -> distinct values with no catalog match.
    pub unresolved: BTreeMap<String, BTreeSet<String>>,
    /// Reference field -> unresolved value -> rows using it.
    pub unresolved_counts: BTreeMap<String, BTreeMap<String, usize>>,
}

/// Something that keeps a strict-mode commit from starting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockingIssue {
    /// Required field is empty on `rows` rows and has no default.
    MissingRequired { field: String, rows: usize },
    /// Reference value with no directive, or an explicit `Unresolved`.
    UnresolvedValue { field: String, value: String },
}

impl std::fmt::Display for BlockingIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field, rows } => {
                write!(f, "required field {field} is empty on {rows} row(s) and has no default")
            }
            Self::UnresolvedValue { field, value } => {
                write!(f, "value '{value}' of {field} is not resolved")
            }
        }
    }
}

impl ValidationReport {
    /// No missing required data and no unresolved references.
    pub fn is_clean(&self) -> bool {
        self.missing_required.is_empty() && self.unresolved.values().all(BTreeSet::is_empty)
    }

    /// Issues still open after applying the operator's `resolution`.
    pub fn blocking_issues(&self, resolution: &Resolution) -> Vec<BlockingIssue> {
        let mut issues = Vec::new();

        for field in &self.missing_required {
            if resolution.default_for(field).is_none() {
                issues.push(BlockingIssue::MissingRequired {
                    field: field.clone(),
                    rows: self.missing_counts.get(field).copied().unwrap_or(0),
                });
            }
        }

        for (field, values) in &self.unresolved {
            for value in values {
                let resolved = resolution
                    .directive(field, value)
                    .is_some_and(|d| d.is_resolved());
                if !resolved {
                    issues.push(BlockingIssue::UnresolvedValue {
                        field: field.clone(),
                        value: value.clone(),
                    });
                }
            }
        }

        issues
    }
}

/// Required field -> number of rows where it is absent or blank. Fields
/// present on every row are left out.
pub fn missing_required_counts(rows: &[MappedRow], schema: &TargetSchema) -> BTreeMap<String, usize> {
    schema
        .required_fields()
        .filter_map(|field| {
            let missing = rows
                .iter()
                .filter(|row| row.non_blank(field.name).is_none())
                .count();
            (missing > 0).then(|| (field.name.to_string(), missing))
        })
        .collect()
}

/// Scan `rows` for missing required values and unknown reference values.
pub fn validate(
    rows: &[MappedRow],
    schema: &TargetSchema,
    catalog: &CatalogSnapshot,
) -> ValidationReport {
    let mut report = ValidationReport {
        total_rows: rows.len(),
        ..Default::default()
    };

    report.missing_counts = missing_required_counts(rows, schema);
    report.missing_required = report.missing_counts.keys().cloned().collect();

    for field in schema.reference_fields() {
        let Some(kind) = field.reference_kind else {
            continue;
        };
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for value in rows.iter().filter_map(|row| row.non_blank(field.name)) {
            if !catalog.contains(kind, value) {
                *counts.entry(value.to_string()).or_default() += 1;
            }
        }
        if !counts.is_empty() {
            report
                .unresolved
                .insert(field.name.to_string(), counts.keys().cloned().collect());
            report.unresolved_counts.insert(field.name.to_string(), counts);
        }
    }

    tracing::debug!(
        entity = %schema.entity_kind,
        rows = rows.len(),
        missing_fields = report.missing_required.len(),
        unresolved_fields = report.unresolved.len(),
        "Validated mapped rows"
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::Directive;
    use crate::schema::{ReferenceKind, LEADS, SALES};
    use indexmap::IndexMap;

    fn mapped(index: usize, pairs: &[(&str, &str)]) -> MappedRow {
        MappedRow {
            index,
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<IndexMap<_, _>>(),
        }
    }

    #[test]
    fn example_scenario_reports_single_unresolved_closer() {
        let rows = vec![
            mapped(0, &[("email", "a@x.com"), ("closer_username", "newguy")]),
            mapped(1, &[("email", "b@x.com"), ("closer_username", "newguy")]),
        ];
        let report = validate(&rows, &LEADS, &CatalogSnapshot::default());

        assert!(report.missing_required.is_empty());
        assert_eq!(
            report.unresolved["closer_username"],
            BTreeSet::from(["newguy".to_string()])
        );
        assert_eq!(report.unresolved_counts["closer_username"]["newguy"], 2);
    }

    #[test]
    fn five_hundred_rows_one_distinct_value() {
        let rows: Vec<_> = (0..500)
            .map(|i| {
                let email = format!("{i}@x.com");
                mapped(i, &[("email", &email), ("closer_username", "ghost")])
            })
            .collect();
        let report = validate(&rows, &LEADS, &CatalogSnapshot::default());
        assert_eq!(report.unresolved["closer_username"].len(), 1);
        assert_eq!(report.unresolved_counts["closer_username"]["ghost"], 500);
    }

    #[test]
    fn missing_required_counts_absent_and_blank() {
        let rows = vec![
            mapped(0, &[("email", "a@x.com")]),
            mapped(1, &[("email", "  ")]),
            mapped(2, &[]),
        ];
        let report = validate(&rows, &LEADS, &CatalogSnapshot::default());
        assert_eq!(report.missing_required, BTreeSet::from(["email".to_string()]));
        assert_eq!(report.missing_counts["email"], 2);
    }

    #[test]
    fn optional_unmapped_field_is_ignored() {
        let rows = vec![mapped(0, &[("email", "a@x.com")])];
        let report = validate(&rows, &LEADS, &CatalogSnapshot::default());
        assert!(report.is_clean());
    }

    #[test]
    fn known_values_are_not_unresolved_and_matching_is_case_sensitive() {
        let catalog = CatalogSnapshot::from_keys([
            (ReferenceKind::Program, "Elite"),
            (ReferenceKind::PaymentMethod, "Stripe"),
        ]);
        let rows = vec![mapped(
            0,
            &[
                ("lead_email", "a@x.com"),
                ("program_name", "Elite"),
                ("payment_method", "stripe"),
                ("amount", "10"),
            ],
        )];
        let report = validate(&rows, &SALES, &catalog);
        assert!(!report.unresolved.contains_key("program_name"));
        assert_eq!(
            report.unresolved["payment_method"],
            BTreeSet::from(["stripe".to_string()])
        );
    }

    #[test]
    fn validation_is_deterministic() {
        let rows = vec![
            mapped(0, &[("email", ""), ("closer_username", "b")]),
            mapped(1, &[("email", "x@x.com"), ("closer_username", "a")]),
        ];
        let catalog = CatalogSnapshot::default();
        assert_eq!(
            validate(&rows, &LEADS, &catalog),
            validate(&rows, &LEADS, &catalog)
        );
    }

    #[test]
    fn blocking_issues_respect_defaults_and_directives() {
        let rows = vec![
            mapped(0, &[("email", ""), ("closer_username", "newguy")]),
            mapped(1, &[("email", "b@x.com"), ("closer_username", "other")]),
        ];
        let report = validate(&rows, &LEADS, &CatalogSnapshot::default());

        let mut resolution = Resolution::new();
        assert_eq!(report.blocking_issues(&resolution).len(), 3);

        resolution.set_default("email", "unknown@x.com");
        resolution.set_resolution("closer_username", "newguy", Directive::CreateNew);
        resolution.set_resolution("closer_username", "other", Directive::Unresolved);
        assert_eq!(
            report.blocking_issues(&resolution),
            vec![BlockingIssue::UnresolvedValue {
                field: "closer_username".into(),
                value: "other".into()
            }]
        );
    }
}
