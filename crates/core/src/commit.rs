//! Commit engine: turns mapped rows into inserts and updates.
//!
//! Rows are processed one at a time in file order. For each row the engine
//! builds an ephemeral resolved record (defaults applied, references
//! resolved, values coerced), derives its natural key and either inserts or
//! updates through the [`EntityStore`]. Row failures are collected into the
//! [`CommitReport`], never thrown.
//!
//! With `skip_errors = false` a commit is all or nothing. A feasibility pass
//! simulates every row and plans its write. Only if no row failed are the
//! planned catalog entries created and the writes handed to
//! [`EntityStore::apply_batch`], which commits them in one transaction. A
//! dry run is the feasibility pass on its own.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::catalog::CatalogProvider;
use crate::coerce::coerce;
use crate::error::CoreError;
use crate::mapping::MappedRow;
use crate::resolution::{Directive, Resolution};
use crate::schema::{FieldDef, NaturalKey, ReferenceKind, TargetSchema};
use crate::store::{BatchError, BatchOutcome, EntityStore, PlannedWrite, StoreError, WriteMode};
use crate::types::Record;
use crate::validator::{missing_required_counts, BlockingIssue};

pub const ERR_DUPLICATE: &str = "duplicate, update disabled";

// ── Types ────────────────────────────────────────────────────────────

/// Operator-chosen commit behaviour. Every flag defaults to `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Simulate everything; write nothing.
    pub dry_run: bool,
    /// Update records whose natural key already exists instead of failing.
    pub update_existing: bool,
    /// Record failing rows and keep going instead of aborting.
    pub skip_errors: bool,
}

/// A failure attached to one source row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row_index: usize,
    pub message: String,
}

/// How a commit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    /// Every row was attempted.
    Completed,
    /// Strict mode found a failing row; no record was written.
    Aborted,
    /// Stopped on request. With `skip_errors` earlier rows stay written;
    /// a strict commit writes nothing.
    Cancelled,
}

impl CommitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A catalog entity created (or, in a dry run, that would be created).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCreation {
    pub reference_kind: ReferenceKind,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    /// Rows attempted.
    pub processed: usize,
    /// Rows written, or that would be written under a dry run.
    pub success: usize,
    pub created: usize,
    pub updated: usize,
    /// Ordered by `row_index`.
    pub errors: Vec<RowError>,
    pub status: CommitStatus,
    pub dry_run: bool,
    pub catalog_created: Vec<CatalogCreation>,
}

impl CommitReport {
    fn empty(dry_run: bool) -> Self {
        Self {
            processed: 0,
            success: 0,
            created: 0,
            updated: 0,
            errors: Vec::new(),
            status: CommitStatus::Completed,
            dry_run,
            catalog_created: Vec::new(),
        }
    }

    /// Discard write counters after a strict-mode failure or an
    /// interrupted feasibility pass.
    fn into_unwritten(mut self, status: CommitStatus) -> Self {
        self.success = 0;
        self.created = 0;
        self.updated = 0;
        self.catalog_created.clear();
        self.status = status;
        self
    }
}

// ── Entry point ──────────────────────────────────────────────────────

/// Commit `rows` into `store`, resolving references against `catalog`.
///
/// Returns [`CoreError::ValidationBlocked`] without touching anything when
/// strict mode is requested and a required field is empty on some rows with
/// no default. Everything else is reported per row.
pub async fn commit(
    rows: &[MappedRow],
    schema: &TargetSchema,
    resolution: &Resolution,
    options: ImportOptions,
    catalog: &dyn CatalogProvider,
    store: &dyn EntityStore,
    cancel: &CancellationToken,
) -> Result<CommitReport, CoreError> {
    tracing::info!(
        entity = %schema.entity_kind,
        rows = rows.len(),
        dry_run = options.dry_run,
        update_existing = options.update_existing,
        skip_errors = options.skip_errors,
        "Starting import commit"
    );

    let report = if options.skip_errors {
        run_pass(rows, schema, resolution, options, catalog, store, cancel, options.dry_run)
            .await
            .report
    } else {
        let issues = blocking_missing_fields(rows, schema, resolution);
        if !issues.is_empty() {
            return Err(CoreError::ValidationBlocked { issues });
        }

        let feasibility =
            run_pass(rows, schema, resolution, options, catalog, store, cancel, true).await;
        let status = feasibility.report.status;
        if status == CommitStatus::Cancelled && !options.dry_run {
            feasibility.report.into_unwritten(CommitStatus::Cancelled)
        } else if status == CommitStatus::Cancelled {
            feasibility.report
        } else if !feasibility.report.errors.is_empty() {
            feasibility.report.into_unwritten(CommitStatus::Aborted)
        } else if options.dry_run {
            feasibility.report
        } else {
            apply_plan(feasibility, schema, catalog, store, cancel).await?
        }
    };

    tracing::info!(
        entity = %schema.entity_kind,
        status = report.status.as_str(),
        processed = report.processed,
        success = report.success,
        created = report.created,
        updated = report.updated,
        errors = report.errors.len(),
        catalog_created = report.catalog_created.len(),
        "Import commit finished"
    );

    Ok(report)
}

fn blocking_missing_fields(
    rows: &[MappedRow],
    schema: &TargetSchema,
    resolution: &Resolution,
) -> Vec<BlockingIssue> {
    missing_required_counts(rows, schema)
        .into_iter()
        .filter(|(field, _)| resolution.default_for(field).is_none())
        .map(|(field, rows)| BlockingIssue::MissingRequired { field, rows })
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn run_pass(
    rows: &[MappedRow],
    schema: &TargetSchema,
    resolution: &Resolution,
    options: ImportOptions,
    catalog: &dyn CatalogProvider,
    store: &dyn EntityStore,
    cancel: &CancellationToken,
    simulate: bool,
) -> PassResult {
    let mut pass = Pass {
        schema,
        resolution,
        options,
        catalog,
        store,
        simulate,
        known_refs: HashSet::new(),
        pending_keys: HashSet::new(),
        current_row: 0,
        creation_rows: Vec::new(),
        writes: Vec::new(),
        report: CommitReport::empty(options.dry_run),
    };

    for row in rows {
        if cancel.is_cancelled() {
            tracing::warn!(
                row_index = row.index,
                processed = pass.report.processed,
                "Import commit cancelled"
            );
            pass.report.status = CommitStatus::Cancelled;
            break;
        }

        pass.report.processed += 1;
        pass.current_row = row.index;
        match pass.process_row(row).await {
            Ok(RowOutcome::Inserted) => {
                pass.report.success += 1;
                pass.report.created += 1;
            }
            Ok(RowOutcome::Updated) => {
                pass.report.success += 1;
                pass.report.updated += 1;
            }
            Err(message) => {
                tracing::debug!(row_index = row.index, %message, "Row rejected");
                pass.report.errors.push(RowError {
                    row_index: row.index,
                    message,
                });
            }
        }
    }

    pass.report.errors.sort_by_key(|e| e.row_index);
    PassResult {
        report: pass.report,
        creation_rows: pass.creation_rows,
        writes: pass.writes,
    }
}

/// What a pass produced. `creation_rows[i]` is the first row that needed
/// `report.catalog_created[i]`; `writes` is filled only while simulating.
struct PassResult {
    report: CommitReport,
    creation_rows: Vec<usize>,
    writes: Vec<PlannedWrite>,
}

// ── Strict apply ─────────────────────────────────────────────────────

/// Carry out a clean feasibility pass: create the planned catalog entries,
/// then write every record in one batch.
///
/// Catalog entries that were created before a failure or cancellation are
/// listed in `catalog_created`; they are harmless because creation is
/// idempotent and a retry reuses them.
async fn apply_plan(
    planned: PassResult,
    schema: &TargetSchema,
    catalog: &dyn CatalogProvider,
    store: &dyn EntityStore,
    cancel: &CancellationToken,
) -> Result<CommitReport, CoreError> {
    let PassResult {
        report: feasibility,
        creation_rows,
        writes,
    } = planned;
    let mut report = CommitReport {
        processed: feasibility.processed,
        ..CommitReport::empty(false)
    };

    for (creation, row_index) in feasibility.catalog_created.into_iter().zip(creation_rows) {
        if cancel.is_cancelled() {
            tracing::warn!(row_index, "Import commit cancelled before writing");
            report.status = CommitStatus::Cancelled;
            return Ok(report);
        }

        let kind = creation.reference_kind;
        match catalog.create(kind, &creation.key).await {
            Ok(id) => {
                tracing::info!(reference_kind = %kind, key = %creation.key, id, "Created catalog entry");
                report.catalog_created.push(creation);
            }
            Err(e) => {
                tracing::warn!(reference_kind = %kind, key = %creation.key, error = %e, "Catalog create failed");
                report.errors.push(RowError {
                    row_index,
                    message: format!("could not create {kind} '{}': {e}", creation.key),
                });
                report.status = CommitStatus::Aborted;
                return Ok(report);
            }
        }
    }

    match store.apply_batch(schema.entity_kind, &writes, cancel).await {
        Ok(BatchOutcome::Applied { inserted, updated }) => {
            report.success = inserted + updated;
            report.created = inserted;
            report.updated = updated;
        }
        Ok(BatchOutcome::Cancelled) => {
            tracing::warn!(processed = report.processed, "Import commit cancelled, batch rolled back");
            report.status = CommitStatus::Cancelled;
        }
        Err(BatchError {
            row_index: Some(row_index),
            source,
        }) => {
            tracing::warn!(row_index, error = %source, "Batch write failed, rolled back");
            report.errors.push(RowError {
                row_index,
                message: write_error_message(&source),
            });
            report.status = CommitStatus::Aborted;
        }
        Err(BatchError {
            row_index: None,
            source,
        }) => return Err(CoreError::Store(source)),
    }

    Ok(report)
}

fn write_error_message(error: &StoreError) -> String {
    match error {
        StoreError::Duplicate { .. } => ERR_DUPLICATE.to_string(),
        other => other.to_string(),
    }
}

// ── Per-row processing ───────────────────────────────────────────────

enum RowOutcome {
    Inserted,
    Updated,
}

struct Pass<'a> {
    schema: &'a TargetSchema,
    resolution: &'a Resolution,
    options: ImportOptions,
    catalog: &'a dyn CatalogProvider,
    store: &'a dyn EntityStore,
    /// No catalog or store mutation; outcomes are simulated.
    simulate: bool,
    /// Catalog keys created (or simulated) during this pass.
    known_refs: HashSet<(ReferenceKind, String)>,
    /// Natural keys of simulated inserts.
    pending_keys: HashSet<NaturalKey>,
    current_row: usize,
    creation_rows: Vec<usize>,
    /// Writes planned while simulating, in row order.
    writes: Vec<PlannedWrite>,
    report: CommitReport,
}

impl Pass<'_> {
    async fn process_row(&mut self, row: &MappedRow) -> Result<RowOutcome, String> {
        let mut record = Record::new();

        for field in self.schema.fields {
            let Some(value) = self.resolved_value(row, field) else {
                if field.required {
                    return Err(format!("missing required field {}", field.name));
                }
                continue;
            };

            let value = match field.reference_kind {
                Some(kind) => self.resolve_reference(field, kind, &value).await?,
                None => value,
            };

            let coerced = coerce(field, &value).map_err(|e| e.to_string())?;
            record.insert(field.name.to_string(), coerced);
        }

        let key = NaturalKey::from_record(self.schema, &record)
            .ok_or_else(|| format!("cannot derive {} natural key", self.schema.entity_kind))?;

        self.write(&key, &record).await
    }

    /// Mapped value if non-blank, else the operator's default.
    fn resolved_value(&self, row: &MappedRow, field: &FieldDef) -> Option<String> {
        row.non_blank(field.name)
            .or_else(|| {
                self.resolution
                    .default_for(field.name)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
            })
            .map(str::to_string)
    }

    async fn catalog_has(&self, kind: ReferenceKind, key: &str) -> Result<bool, String> {
        if self.known_refs.contains(&(kind, key.to_string())) {
            return Ok(true);
        }
        self.catalog
            .lookup(kind, key)
            .await
            .map(|found| found.is_some())
            .map_err(|e| format!("{kind} lookup failed: {e}"))
    }

    async fn resolve_reference(
        &mut self,
        field: &FieldDef,
        kind: ReferenceKind,
        value: &str,
    ) -> Result<String, String> {
        if self.catalog_has(kind, value).await? {
            return Ok(value.to_string());
        }

        let resolution = self.resolution;
        match resolution.directive(field.name, value) {
            Some(Directive::CreateNew) => {
                self.create_reference(kind, value).await?;
                Ok(value.to_string())
            }
            Some(Directive::MapTo(target)) => {
                if self.catalog_has(kind, target).await? {
                    Ok(target.clone())
                } else {
                    Err(format!(
                        "{} '{value}' is mapped to unknown {kind} '{target}'",
                        field.name
                    ))
                }
            }
            Some(Directive::Unresolved) | None => {
                Err(format!("unresolved {} '{value}'", field.name))
            }
        }
    }

    /// Create a catalog entry once per `(kind, key)` in this pass.
    async fn create_reference(&mut self, kind: ReferenceKind, key: &str) -> Result<(), String> {
        let cache_key = (kind, key.to_string());
        if self.known_refs.contains(&cache_key) {
            return Ok(());
        }

        if !self.simulate {
            let id = self.catalog.create(kind, key).await.map_err(|e| {
                tracing::warn!(reference_kind = %kind, key, error = %e, "Catalog create failed");
                format!("could not create {kind} '{key}': {e}")
            })?;
            tracing::info!(reference_kind = %kind, key, id, "Created catalog entry");
        }

        self.known_refs.insert(cache_key);
        self.creation_rows.push(self.current_row);
        self.report.catalog_created.push(CatalogCreation {
            reference_kind: kind,
            key: key.to_string(),
        });
        Ok(())
    }

    async fn write(&mut self, key: &NaturalKey, record: &Record) -> Result<RowOutcome, String> {
        let kind = self.schema.entity_kind;

        let existing = if self.pending_keys.contains(key) {
            Some(None)
        } else {
            self.store
                .find_by_natural_key(kind, key)
                .await
                .map_err(|e| e.to_string())?
                .map(|entity| Some(entity.id))
        };

        match existing {
            Some(_) if !self.options.update_existing => Err(ERR_DUPLICATE.to_string()),
            Some(_) if self.simulate => {
                self.plan(key, record, WriteMode::Upsert);
                Ok(RowOutcome::Updated)
            }
            Some(Some(id)) => {
                self.store
                    .update(kind, id, record)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(RowOutcome::Updated)
            }
            // Pending keys only exist while simulating.
            Some(None) => Ok(RowOutcome::Updated),
            None if self.simulate => {
                self.pending_keys.insert(key.clone());
                self.plan(key, record, WriteMode::Insert);
                Ok(RowOutcome::Inserted)
            }
            None => {
                self.store
                    .insert(kind, record)
                    .await
                    .map_err(|e| write_error_message(&e))?;
                Ok(RowOutcome::Inserted)
            }
        }
    }

    fn plan(&mut self, key: &NaturalKey, record: &Record, mode: WriteMode) {
        self.writes.push(PlannedWrite {
            row_index: self.current_row,
            key: key.clone(),
            fields: record.clone(),
            mode,
        });
    }
}
