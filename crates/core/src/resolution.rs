//! Operator decisions for unresolved reference values and empty required
//! cells.
//!
//! The store is a plain accumulator: it does not check that a `MapTo`
//! target exists. That is checked at commit time against the live catalog,
//! which may have changed since the decision was made.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What to do with one unresolved reference value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "target", rename_all = "snake_case")]
pub enum Directive {
    /// Create a catalog entity whose natural key is the raw value.
    CreateNew,
    /// Use this existing catalog key instead of the raw value.
    MapTo(String),
    /// Leave as is; rows using the value fail at commit.
    Unresolved,
}

impl Directive {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }
}

/// Accumulated directives and defaults for one import session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// field name -> raw value -> directive
    #[serde(default)]
    pub field_resolutions: BTreeMap<String, BTreeMap<String, Directive>>,
    /// field name -> value used when the mapped cell is empty
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

impl Resolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_resolution(
        &mut self,
        field: impl Into<String>,
        raw_value: impl Into<String>,
        directive: Directive,
    ) {
        self.field_resolutions
            .entry(field.into())
            .or_default()
            .insert(raw_value.into(), directive);
    }

    /// Record a fallback for empty cells. A blank value clears the default.
    pub fn set_default(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let field = field.into();
        let value = value.into();
        if value.trim().is_empty() {
            self.clear_default(&field);
        } else {
            self.defaults.insert(field, value);
        }
    }

    pub fn clear_default(&mut self, field: &str) {
        self.defaults.remove(field);
    }

    pub fn directive(&self, field: &str, raw_value: &str) -> Option<&Directive> {
        self.field_resolutions.get(field)?.get(raw_value)
    }

    pub fn default_for(&self, field: &str) -> Option<&str> {
        self.defaults.get(field).map(String::as_str)
    }

    /// Fold another batch of decisions into this one; later entries win.
    pub fn merge(&mut self, other: Resolution) {
        for (field, values) in other.field_resolutions {
            for (raw, directive) in values {
                self.set_resolution(field.clone(), raw, directive);
            }
        }
        for (field, value) in other.defaults {
            self.set_default(field, value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.field_resolutions.values().all(BTreeMap::is_empty) && self.defaults.is_empty()
    }
}
