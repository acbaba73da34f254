//! Column mapping: which spreadsheet column feeds which schema field.
//!
//! [`auto_map`] produces an advisory first guess; the operator may override
//! every entry. [`apply_mapping`] is the pure projection from raw rows to
//! [`MappedRow`]s.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::parser::RawRow;
use crate::schema::{FieldDef, TargetSchema};

// ── Types ────────────────────────────────────────────────────────────

/// Field name -> column header. A field with no entry is not imported.
///
/// Deserializes from a JSON object where `null` or `""` also mean
/// "do not import".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IndexMap<String, Option<String>>")]
pub struct ColumnMapping(IndexMap<String, String>);

impl From<IndexMap<String, Option<String>>> for ColumnMapping {
    fn from(raw: IndexMap<String, Option<String>>) -> Self {
        Self(
            raw.into_iter()
                .filter_map(|(field, header)| {
                    header
                        .filter(|h| !h.trim().is_empty())
                        .map(|h| (field, h))
                })
                .collect(),
        )
    }
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_for(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn set(&mut self, field: impl Into<String>, header: impl Into<String>) {
        self.0.insert(field.into(), header.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(f, h)| (f.as_str(), h.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject entries naming a field the schema does not have or a header
    /// the file does not contain.
    pub fn validate_against(
        &self,
        headers: &[String],
        schema: &TargetSchema,
    ) -> Result<(), CoreError> {
        for (field, header) in self.iter() {
            if schema.field(field).is_none() {
                return Err(CoreError::Validation(format!(
                    "Unknown field '{field}' for target '{}'",
                    schema.entity_kind
                )));
            }
            if !headers.iter().any(|h| h == header) {
                return Err(CoreError::Validation(format!(
                    "Column '{header}' mapped to '{field}' is not in the file"
                )));
            }
        }
        Ok(())
    }
}

/// One raw row projected onto schema field names.
///
/// A field absent from `values` was not mapped; a field present with an
/// empty string was mapped but the cell was blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedRow {
    /// Zero-based position among the file's data rows. The header row and
    /// blank lines are not counted, so this is not a line number.
    pub index: usize,
    pub values: IndexMap<String, String>,
}

impl MappedRow {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// The trimmed value, or `None` when absent or blank.
    pub fn non_blank(&self, field: &str) -> Option<&str> {
        self.get(field).map(str::trim).filter(|v| !v.is_empty())
    }
}

// ── Auto-mapping ─────────────────────────────────────────────────────

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Normalized spellings a header may use to refer to `field`.
fn candidate_names(field: &FieldDef) -> Vec<String> {
    let label = normalize(field.label);
    let mut names = vec![normalize(field.name), label.clone()];
    if let Some(prefix) = field.reference_kind.and_then(|k| k.label_prefix()) {
        if let Some(stripped) = label.strip_prefix(prefix) {
            names.push(stripped.trim().to_string());
        }
    }
    names
}

/// Suggest a mapping: for each field, the first header whose normalized
/// text equals the field name, its label, or its label without the
/// reference kind's fixed prefix.
pub fn auto_map(headers: &[String], schema: &TargetSchema) -> ColumnMapping {
    let normalized: Vec<String> = headers.iter().map(|h| normalize(h)).collect();
    let mut mapping = ColumnMapping::new();

    for field in schema.fields {
        let candidates = candidate_names(field);
        if let Some(pos) = normalized.iter().position(|h| candidates.contains(h)) {
            mapping.set(field.name, headers[pos].clone());
        }
    }

    mapping
}

// ── Projection ───────────────────────────────────────────────────────

/// Project raw rows onto schema fields using `mapping`.
pub fn apply_mapping(
    rows: &[RawRow],
    mapping: &ColumnMapping,
    schema: &TargetSchema,
) -> Vec<MappedRow> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let values = schema
                .fields
                .iter()
                .filter_map(|field| {
                    let header = mapping.header_for(field.name)?;
                    let cell = row.get(header)?;
                    Some((field.name.to_string(), cell.clone()))
                })
                .collect();
            MappedRow { index, values }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LEADS, SALES};

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn auto_map_matches_name_and_label_case_insensitively() {
        let h = headers(&["EMAIL", "  Nombre Completo ", "Teléfono"]);
        let mapping = auto_map(&h, &LEADS);
        assert_eq!(mapping.header_for("email"), Some("EMAIL"));
        assert_eq!(mapping.header_for("full_name"), Some("  Nombre Completo "));
        assert_eq!(mapping.header_for("phone"), Some("Teléfono"));
        assert_eq!(mapping.header_for("country"), None);
    }

    #[test]
    fn auto_map_strips_closer_label_prefix() {
        let h = headers(&["Correo del lead", "Closer", "Programa"]);
        let mapping = auto_map(&h, &SALES);
        assert_eq!(mapping.header_for("closer_username"), Some("Closer"));
        assert_eq!(mapping.header_for("program_name"), Some("Programa"));
        assert_eq!(mapping.header_for("lead_email"), Some("Correo del lead"));
    }

    #[test]
    fn auto_map_picks_first_matching_header() {
        let h = headers(&["email", "Correo electrónico"]);
        let mapping = auto_map(&h, &LEADS);
        assert_eq!(mapping.header_for("email"), Some("email"));
    }

    #[test]
    fn auto_map_is_idempotent() {
        let h = headers(&["email", "Usuario del closer", "Estado", "foo"]);
        assert_eq!(auto_map(&h, &LEADS), auto_map(&h, &LEADS));
    }

    #[test]
    fn apply_mapping_distinguishes_absent_from_empty() {
        let mut mapping = ColumnMapping::new();
        mapping.set("email", "Mail");
        mapping.set("phone", "Tel");
        let rows = vec![row(&[("Mail", "a@x.com"), ("Tel", "")])];

        let mapped = apply_mapping(&rows, &mapping, &LEADS);
        assert_eq!(mapped[0].index, 0);
        assert_eq!(mapped[0].get("email"), Some("a@x.com"));
        assert_eq!(mapped[0].get("phone"), Some(""));
        assert_eq!(mapped[0].non_blank("phone"), None);
        assert_eq!(mapped[0].get("country"), None);
    }

    #[test]
    fn row_index_skips_blank_lines() {
        let parsed = crate::parser::parse_csv(b"email\na@x.com\n\n,\nb@x.com\n").unwrap();
        let mut mapping = ColumnMapping::new();
        mapping.set("email", "email");

        let mapped = apply_mapping(&parsed.rows, &mapping, &LEADS);
        assert_eq!(mapped.iter().map(|r| r.index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(mapped[1].get("email"), Some("b@x.com"));
    }

    #[test]
    fn apply_mapping_preserves_row_order() {
        let mut mapping = ColumnMapping::new();
        mapping.set("email", "email");
        let rows = vec![row(&[("email", "1")]), row(&[("email", "2")])];
        let mapped = apply_mapping(&rows, &mapping, &LEADS);
        assert_eq!(mapped[1].index, 1);
        assert_eq!(mapped[1].get("email"), Some("2"));
    }

    #[test]
    fn deserialize_treats_null_and_blank_as_unmapped() {
        let mapping: ColumnMapping =
            serde_json::from_str(r#"{"email":"Mail","phone":null,"country":" "}"#).unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.header_for("email"), Some("Mail"));
    }

    #[test]
    fn validate_against_rejects_unknown_field_and_missing_header() {
        let h = headers(&["Mail"]);
        let mut mapping = ColumnMapping::new();
        mapping.set("email", "Mail");
        assert!(mapping.validate_against(&h, &LEADS).is_ok());

        mapping.set("shoe_size", "Mail");
        assert!(mapping.validate_against(&h, &LEADS).is_err());

        let mut mapping = ColumnMapping::new();
        mapping.set("email", "Correo");
        assert!(mapping.validate_against(&h, &LEADS).is_err());
    }
}
