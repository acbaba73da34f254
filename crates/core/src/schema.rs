//! Static target-schema registry.
//!
//! Each importable entity kind is described by an ordered list of
//! [`FieldDef`]s. The mapper, validator and commit engine are driven
//! entirely by these descriptors; adding a new target kind means adding a
//! new field list here, not branching logic elsewhere.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Record;

// ── Entity kinds ─────────────────────────────────────────────────────

/// The record type an import writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Lead,
    Sale,
}

impl EntityKind {
    /// Target name as used in requests and table names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "leads",
            Self::Sale => "sales",
        }
    }

    /// Parse a target name. Accepts the plural target names and the
    /// singular serde names.
    pub fn from_target(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "leads" | "lead" => Some(Self::Lead),
            "sales" | "sale" => Some(Self::Sale),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Reference kinds ──────────────────────────────────────────────────

/// A lookup catalog that a reference field resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Closer,
    Program,
    PaymentMethod,
}

impl ReferenceKind {
    pub const ALL: &'static [ReferenceKind] = &[
        ReferenceKind::Closer,
        ReferenceKind::Program,
        ReferenceKind::PaymentMethod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closer => "closer",
            Self::Program => "program",
            Self::PaymentMethod => "payment_method",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "closer" | "closers" => Some(Self::Closer),
            "program" | "programs" => Some(Self::Program),
            "payment_method" | "payment_methods" => Some(Self::PaymentMethod),
            _ => None,
        }
    }

    /// Fixed label prefix the auto-mapper strips before comparing headers,
    /// so a column titled "Closer" matches the label "Usuario del closer".
    pub fn label_prefix(&self) -> Option<&'static str> {
        match self {
            Self::Closer => Some("usuario del "),
            Self::Program | Self::PaymentMethod => None,
        }
    }
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Field descriptors ────────────────────────────────────────────────

/// Primitive type a cell is coerced to at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Date,
    Enum,
}

/// One importable field of a target schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    /// Unique key within the schema.
    pub name: &'static str,
    /// Display label (also used for auto-mapping).
    pub label: &'static str,
    pub required: bool,
    pub value_type: ValueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_kind: Option<ReferenceKind>,
    /// Canonical spellings accepted by `Enum` fields.
    #[serde(skip_serializing_if = "no_allowed_values")]
    pub allowed_values: &'static [&'static str],
}

fn no_allowed_values(values: &&'static [&'static str]) -> bool {
    values.is_empty()
}

impl FieldDef {
    const fn text(name: &'static str, label: &'static str, required: bool) -> Self {
        Self {
            name,
            label,
            required,
            value_type: ValueType::String,
            reference_kind: None,
            allowed_values: &[],
        }
    }

    const fn typed(
        name: &'static str,
        label: &'static str,
        required: bool,
        value_type: ValueType,
    ) -> Self {
        Self {
            name,
            label,
            required,
            value_type,
            reference_kind: None,
            allowed_values: &[],
        }
    }

    const fn reference(
        name: &'static str,
        label: &'static str,
        required: bool,
        kind: ReferenceKind,
    ) -> Self {
        Self {
            name,
            label,
            required,
            value_type: ValueType::String,
            reference_kind: Some(kind),
            allowed_values: &[],
        }
    }

    const fn choice(
        name: &'static str,
        label: &'static str,
        allowed_values: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            label,
            required: false,
            value_type: ValueType::Enum,
            reference_kind: None,
            allowed_values,
        }
    }

    pub fn is_reference(&self) -> bool {
        self.reference_kind.is_some()
    }
}

// ── Schemas ──────────────────────────────────────────────────────────

/// Ordered field list for one target entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetSchema {
    pub entity_kind: EntityKind,
    pub fields: &'static [FieldDef],
    /// Field names whose values form the upsert key, in order.
    pub natural_key: &'static [&'static str],
}

const LEAD_FIELDS: &[FieldDef] = &[
    FieldDef::text("email", "Correo electrónico", true),
    FieldDef::text("full_name", "Nombre completo", false),
    FieldDef::text("phone", "Teléfono", false),
    FieldDef::text("country", "País", false),
    FieldDef::choice(
        "source",
        "Fuente",
        &["instagram", "facebook", "youtube", "referral", "organic", "ads", "other"],
    ),
    FieldDef::choice(
        "status",
        "Estado",
        &["new", "contacted", "scheduled", "qualified", "won", "lost"],
    ),
    FieldDef::reference("closer_username", "Usuario del closer", false, ReferenceKind::Closer),
    FieldDef::typed("registered_at", "Fecha de registro", false, ValueType::Date),
];

const SALE_FIELDS: &[FieldDef] = &[
    FieldDef::text("lead_email", "Correo del lead", true),
    FieldDef::text("lead_name", "Nombre del lead", false),
    FieldDef::reference("closer_username", "Usuario del closer", false, ReferenceKind::Closer),
    FieldDef::reference("program_name", "Programa", true, ReferenceKind::Program),
    FieldDef::reference(
        "payment_method",
        "Método de pago",
        true,
        ReferenceKind::PaymentMethod,
    ),
    FieldDef::typed("amount", "Monto", true, ValueType::Number),
    FieldDef::typed("installments", "Cuotas", false, ValueType::Number),
    FieldDef::typed("sale_date", "Fecha de venta", false, ValueType::Date),
    FieldDef::choice(
        "payment_status",
        "Estado del pago",
        &["pending", "paid", "partial", "refunded", "cancelled"],
    ),
];

/// Lead records, keyed by email.
pub const LEADS: TargetSchema = TargetSchema {
    entity_kind: EntityKind::Lead,
    fields: LEAD_FIELDS,
    natural_key: &["email"],
};

/// Sales enrollments, keyed by lead + program + payment method.
pub const SALES: TargetSchema = TargetSchema {
    entity_kind: EntityKind::Sale,
    fields: SALE_FIELDS,
    natural_key: &["lead_email", "program_name", "payment_method"],
};

impl TargetSchema {
    pub fn for_kind(kind: EntityKind) -> &'static TargetSchema {
        match kind {
            EntityKind::Lead => &LEADS,
            EntityKind::Sale => &SALES,
        }
    }

    /// Resolve a `"leads"` / `"sales"` target name.
    pub fn from_target(target: &str) -> Result<&'static TargetSchema, CoreError> {
        EntityKind::from_target(target)
            .map(Self::for_kind)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown import target '{target}'. Must be one of: leads, sales"
                ))
            })
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &'static FieldDef> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn reference_fields(&self) -> impl Iterator<Item = &'static FieldDef> {
        self.fields.iter().filter(|f| f.is_reference())
    }

    /// Distinct reference kinds used by this schema.
    pub fn reference_kinds(&self) -> Vec<ReferenceKind> {
        let mut kinds: Vec<ReferenceKind> =
            self.reference_fields().filter_map(|f| f.reference_kind).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

// ── Natural keys ─────────────────────────────────────────────────────

/// Business identifier used for upsert matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey(pub Vec<String>);

impl NaturalKey {
    /// Derive the key from a resolved record. Returns `None` when any key
    /// part is missing or blank.
    pub fn from_record(schema: &TargetSchema, record: &Record) -> Option<Self> {
        schema
            .natural_key
            .iter()
            .map(|name| {
                record
                    .get(*name)
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join(" / "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_names_are_unique() {
        for schema in [&LEADS, &SALES] {
            let mut names: Vec<_> = schema.fields.iter().map(|f| f.name).collect();
            names.sort();
            names.dedup();
            assert_eq!(names.len(), schema.fields.len(), "{}", schema.entity_kind);
        }
    }

    #[test]
    fn natural_key_fields_exist_and_are_required() {
        for schema in [&LEADS, &SALES] {
            for name in schema.natural_key {
                let field = schema.field(name).expect("key field should exist");
                assert!(field.required, "{name} should be required");
            }
        }
    }

    #[test]
    fn from_target_accepts_plural_and_singular() {
        assert_eq!(TargetSchema::from_target("leads").unwrap().entity_kind, EntityKind::Lead);
        assert_eq!(TargetSchema::from_target("Sale").unwrap().entity_kind, EntityKind::Sale);
        assert!(TargetSchema::from_target("invoices").is_err());
    }

    #[test]
    fn sales_reference_kinds_are_deduplicated() {
        assert_eq!(
            SALES.reference_kinds(),
            vec![
                ReferenceKind::Closer,
                ReferenceKind::Program,
                ReferenceKind::PaymentMethod
            ]
        );
        assert_eq!(LEADS.reference_kinds(), vec![ReferenceKind::Closer]);
    }

    #[test]
    fn natural_key_requires_every_part() {
        let mut record = Record::new();
        record.insert("lead_email".into(), json!("a@x.com"));
        record.insert("program_name".into(), json!("Mentoría"));
        assert!(NaturalKey::from_record(&SALES, &record).is_none());

        record.insert("payment_method".into(), json!(" Stripe "));
        let key = NaturalKey::from_record(&SALES, &record).unwrap();
        assert_eq!(key.parts(), ["a@x.com", "Mentoría", "Stripe"]);
    }

    #[test]
    fn blank_key_part_is_missing() {
        let mut record = Record::new();
        record.insert("email".into(), json!("   "));
        assert!(NaturalKey::from_record(&LEADS, &record).is_none());
    }
}
