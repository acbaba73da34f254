//! Import session state machine.
//!
//! One session owns one uploaded file for its whole life. The operator
//! walks it through mapping, validation, resolution and configuration
//! before committing:
//!
//! ```text
//! uploaded -> mapped -> validated -> (resolved <-> validated) -> configured -> committed
//! ```
//!
//! `committed` and `cancelled` are terminal; re-importing the same file
//! starts a new session.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commit::{CommitReport, CommitStatus, ImportOptions};
use crate::error::CoreError;
use crate::mapping::{apply_mapping, auto_map, ColumnMapping, MappedRow};
use crate::parser::{ParsedFile, RawRow};
use crate::resolution::{Directive, Resolution};
use crate::schema::{EntityKind, TargetSchema};
use crate::types::Timestamp;
use crate::validator::ValidationReport;

// ── States ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uploaded,
    Mapped,
    Validated,
    Resolved,
    Configured,
    Committed,
    Cancelled,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Mapped => "mapped",
            Self::Validated => "validated",
            Self::Resolved => "resolved",
            Self::Configured => "configured",
            Self::Committed => "committed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Cancelled)
    }

    /// States reachable from `self`.
    ///
    /// - `uploaded`   -> `mapped`
    /// - `mapped`     -> `mapped`, `validated`, `cancelled`
    /// - `validated`  -> `mapped`, `validated`, `resolved`, `configured`, `cancelled`
    /// - `resolved`   -> same as `validated`
    /// - `configured` -> same as `validated`, plus `committed`
    /// - terminal states -> nothing
    pub fn valid_transitions(&self) -> &'static [SessionState] {
        use SessionState::*;
        match self {
            Uploaded => &[Mapped],
            Mapped => &[Mapped, Validated, Cancelled],
            Validated | Resolved => &[Mapped, Validated, Resolved, Configured, Cancelled],
            Configured => &[
                Mapped, Validated, Resolved, Configured, Committed, Cancelled,
            ],
            Committed | Cancelled => &[],
        }
    }

    pub fn can_transition(&self, next: SessionState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Session ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ImportSession {
    pub id: Uuid,
    pub target: EntityKind,
    pub state: SessionState,
    pub headers: Vec<String>,
    rows: Vec<RawRow>,
    pub mapping: ColumnMapping,
    /// Latest validation; dropped whenever the mapping changes.
    pub report: Option<ValidationReport>,
    pub resolution: Resolution,
    pub options: ImportOptions,
    pub last_commit: Option<CommitReport>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Client-facing view of a session, without the row data.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub target: EntityKind,
    pub state: SessionState,
    pub headers: Vec<String>,
    pub row_count: usize,
    pub mapping: ColumnMapping,
    pub report: Option<ValidationReport>,
    pub resolution: Resolution,
    pub options: ImportOptions,
    pub last_commit: Option<CommitReport>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ImportSession {
    /// Start a session for an uploaded file and apply the suggested mapping.
    pub fn new(target: EntityKind, file: ParsedFile) -> Self {
        let now = chrono::Utc::now();
        let mut session = Self {
            id: Uuid::new_v4(),
            target,
            state: SessionState::Uploaded,
            headers: file.headers,
            rows: file.rows,
            mapping: ColumnMapping::new(),
            report: None,
            resolution: Resolution::new(),
            options: ImportOptions::default(),
            last_commit: None,
            created_at: now,
            updated_at: now,
        };
        session.mapping = auto_map(&session.headers, session.schema());
        session.state = SessionState::Mapped;
        session
    }

    pub fn schema(&self) -> &'static TargetSchema {
        TargetSchema::for_kind(self.target)
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    /// Current rows projected through the current mapping.
    pub fn mapped_rows(&self) -> Vec<MappedRow> {
        apply_mapping(&self.rows, &self.mapping, self.schema())
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            target: self.target,
            state: self.state,
            headers: self.headers.clone(),
            row_count: self.rows.len(),
            mapping: self.mapping.clone(),
            report: self.report.clone(),
            resolution: self.resolution.clone(),
            options: self.options,
            last_commit: self.last_commit.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn transition(&mut self, next: SessionState) -> Result<(), CoreError> {
        if !self.state.can_transition(next) {
            return Err(CoreError::Conflict(format!(
                "Import session {} cannot move from '{}' to '{}'",
                self.id, self.state, next
            )));
        }
        tracing::debug!(session_id = %self.id, from = %self.state, to = %next, "Session transition");
        self.state = next;
        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    fn require_report(&self) -> Result<&ValidationReport, CoreError> {
        self.report.as_ref().ok_or_else(|| {
            CoreError::Conflict(format!("Import session {} has not been validated", self.id))
        })
    }

    // ── Operator actions ─────────────────────────────────────────────

    /// Replace the column mapping. Any previous validation is discarded.
    pub fn set_mapping(&mut self, mapping: ColumnMapping) -> Result<(), CoreError> {
        mapping.validate_against(&self.headers, self.schema())?;
        self.transition(SessionState::Mapped)?;
        self.mapping = mapping;
        self.report = None;
        Ok(())
    }

    /// Store a fresh validation of the current mapping.
    pub fn record_validation(&mut self, report: ValidationReport) -> Result<(), CoreError> {
        self.transition(SessionState::Validated)?;
        self.report = Some(report);
        Ok(())
    }

    /// Record a directive for one unresolved reference value.
    pub fn set_resolution(
        &mut self,
        field: &str,
        raw_value: &str,
        directive: Directive,
    ) -> Result<(), CoreError> {
        self.check_field(field, true)?;
        if self.require_report()?.is_clean() {
            return Err(CoreError::Conflict(
                "Validation found nothing to resolve".to_string(),
            ));
        }
        self.transition(SessionState::Resolved)?;
        self.resolution.set_resolution(field, raw_value, directive);
        Ok(())
    }

    /// Record a default for empty cells of `field`. A blank value clears it.
    pub fn set_default(&mut self, field: &str, value: &str) -> Result<(), CoreError> {
        self.check_field(field, false)?;
        self.require_report()?;
        self.transition(SessionState::Resolved)?;
        self.resolution.set_default(field, value);
        Ok(())
    }

    /// Fold a batch of directives and defaults into the session.
    pub fn apply_resolution(&mut self, batch: Resolution) -> Result<(), CoreError> {
        for field in batch.field_resolutions.keys() {
            self.check_field(field, true)?;
        }
        for field in batch.defaults.keys() {
            self.check_field(field, false)?;
        }
        let report = self.require_report()?;
        if !batch.field_resolutions.is_empty() && report.is_clean() {
            return Err(CoreError::Conflict(
                "Validation found nothing to resolve".to_string(),
            ));
        }
        self.transition(SessionState::Resolved)?;
        self.resolution.merge(batch);
        Ok(())
    }

    fn check_field(&self, field: &str, reference_only: bool) -> Result<(), CoreError> {
        match self.schema().field(field) {
            Some(def) if reference_only && !def.is_reference() => Err(CoreError::Validation(
                format!("Field '{field}' is not a reference field"),
            )),
            Some(_) => Ok(()),
            None => Err(CoreError::Validation(format!(
                "Unknown field '{field}' for target '{}'",
                self.target
            ))),
        }
    }

    /// Choose commit options. Outside `skip_errors` mode every missing
    /// required field needs a default and every unresolved value needs a
    /// directive.
    pub fn configure(&mut self, options: ImportOptions) -> Result<(), CoreError> {
        let report = self.require_report()?;
        if !options.skip_errors {
            let issues = report.blocking_issues(&self.resolution);
            if !issues.is_empty() {
                return Err(CoreError::ValidationBlocked { issues });
            }
        }
        self.transition(SessionState::Configured)?;
        self.options = options;
        Ok(())
    }

    /// Fail unless the session is ready to commit.
    pub fn ensure_committable(&self) -> Result<(), CoreError> {
        if self.state != SessionState::Configured {
            return Err(CoreError::Conflict(format!(
                "Import session {} is '{}', expected 'configured'",
                self.id, self.state
            )));
        }
        Ok(())
    }

    /// Store the outcome of a commit.
    ///
    /// A completed real commit ends the session and discards the
    /// resolution. Dry runs and aborted commits leave it configured so the
    /// operator can adjust and retry.
    pub fn record_commit(&mut self, report: CommitReport) -> Result<(), CoreError> {
        self.ensure_committable()?;
        let next = match report.status {
            CommitStatus::Cancelled => SessionState::Cancelled,
            CommitStatus::Aborted => SessionState::Configured,
            CommitStatus::Completed if report.dry_run => SessionState::Configured,
            CommitStatus::Completed => SessionState::Committed,
        };
        self.transition(next)?;
        if next == SessionState::Committed {
            self.resolution = Resolution::new();
        }
        self.last_commit = Some(report);
        Ok(())
    }

    /// Abandon the session.
    pub fn cancel(&mut self) -> Result<(), CoreError> {
        self.transition(SessionState::Cancelled)
    }

    /// A terminal session untouched for at least `retention`.
    pub fn is_expired(&self, retention: std::time::Duration) -> bool {
        self.state.is_terminal()
            && chrono::Duration::from_std(retention)
                .is_ok_and(|limit| chrono::Utc::now() - self.updated_at >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogSnapshot;
    use crate::commit::RowError;
    use crate::parser::parse_csv;
    use crate::schema::ReferenceKind;
    use crate::validator::{validate, BlockingIssue};
    use assert_matches::assert_matches;

    const CSV: &str = "email,Usuario del closer\na@x.com,newguy\nb@x.com,newguy\n";

    fn session() -> ImportSession {
        ImportSession::new(EntityKind::Lead, parse_csv(CSV.as_bytes()).unwrap())
    }

    fn validated(session: &mut ImportSession, catalog: &CatalogSnapshot) {
        let report = validate(&session.mapped_rows(), session.schema(), catalog);
        session.record_validation(report).unwrap();
    }

    fn report(status: CommitStatus, dry_run: bool) -> CommitReport {
        CommitReport {
            processed: 2,
            success: 2,
            created: 2,
            updated: 0,
            errors: Vec::<RowError>::new(),
            status,
            dry_run,
            catalog_created: Vec::new(),
        }
    }

    #[test]
    fn new_session_is_auto_mapped() {
        let s = session();
        assert_eq!(s.state, SessionState::Mapped);
        assert_eq!(s.mapping.header_for("email"), Some("email"));
        assert_eq!(s.mapping.header_for("closer_username"), Some("Usuario del closer"));
        assert_eq!(s.summary().row_count, 2);
    }

    #[test]
    fn full_walkthrough_to_committed() {
        let mut s = session();
        validated(&mut s, &CatalogSnapshot::default());

        assert_matches!(
            s.configure(ImportOptions::default()),
            Err(CoreError::ValidationBlocked { ref issues })
                if issues == &vec![BlockingIssue::UnresolvedValue {
                    field: "closer_username".into(),
                    value: "newguy".into(),
                }]
        );

        s.set_resolution("closer_username", "newguy", Directive::CreateNew)
            .unwrap();
        assert_eq!(s.state, SessionState::Resolved);

        s.configure(ImportOptions::default()).unwrap();
        assert_eq!(s.state, SessionState::Configured);

        s.record_commit(report(CommitStatus::Completed, false)).unwrap();
        assert_eq!(s.state, SessionState::Committed);
        assert!(s.resolution.is_empty());
        assert!(s.last_commit.is_some());
    }

    #[test]
    fn clean_validation_goes_straight_to_configured() {
        let mut s = session();
        validated(
            &mut s,
            &CatalogSnapshot::from_keys([(ReferenceKind::Closer, "newguy")]),
        );
        s.configure(ImportOptions::default()).unwrap();
        assert_eq!(s.state, SessionState::Configured);
    }

    #[test]
    fn resolution_needs_items_to_resolve() {
        let mut s = session();
        assert_matches!(
            s.set_resolution("closer_username", "newguy", Directive::CreateNew),
            Err(CoreError::Conflict(_))
        );

        validated(
            &mut s,
            &CatalogSnapshot::from_keys([(ReferenceKind::Closer, "newguy")]),
        );
        assert_matches!(
            s.set_resolution("closer_username", "x", Directive::CreateNew),
            Err(CoreError::Conflict(_))
        );
        assert_matches!(
            s.set_resolution("email", "x", Directive::CreateNew),
            Err(CoreError::Validation(_))
        );
        s.set_default("status", "new").unwrap();
        assert_eq!(s.state, SessionState::Resolved);
    }

    #[test]
    fn remapping_drops_report() {
        let mut s = session();
        validated(&mut s, &CatalogSnapshot::default());

        let mut mapping = ColumnMapping::new();
        mapping.set("email", "email");
        s.set_mapping(mapping).unwrap();
        assert_eq!(s.state, SessionState::Mapped);
        assert!(s.report.is_none());
        assert_matches!(s.configure(ImportOptions::default()), Err(CoreError::Conflict(_)));
    }

    #[test]
    fn remapping_rejects_unknown_header() {
        let mut s = session();
        let mut mapping = ColumnMapping::new();
        mapping.set("email", "Correo");
        assert_matches!(s.set_mapping(mapping), Err(CoreError::Validation(_)));
        assert_eq!(s.state, SessionState::Mapped);
    }

    #[test]
    fn skip_errors_bypasses_gate() {
        let mut s = session();
        validated(&mut s, &CatalogSnapshot::default());
        s.configure(ImportOptions {
            skip_errors: true,
            ..Default::default()
        })
        .unwrap();
        assert!(s.options.skip_errors);
    }

    #[test]
    fn dry_run_and_abort_stay_configured() {
        let mut s = session();
        validated(&mut s, &CatalogSnapshot::default());
        s.configure(ImportOptions {
            skip_errors: true,
            ..Default::default()
        })
        .unwrap();

        s.record_commit(report(CommitStatus::Completed, true)).unwrap();
        assert_eq!(s.state, SessionState::Configured);
        s.record_commit(report(CommitStatus::Aborted, false)).unwrap();
        assert_eq!(s.state, SessionState::Configured);
        s.record_commit(report(CommitStatus::Cancelled, false)).unwrap();
        assert_eq!(s.state, SessionState::Cancelled);
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut s = session();
        s.cancel().unwrap();
        assert_matches!(s.cancel(), Err(CoreError::Conflict(_)));
        assert_matches!(
            s.record_validation(ValidationReport::default()),
            Err(CoreError::Conflict(_))
        );
        assert_matches!(s.set_mapping(ColumnMapping::new()), Err(CoreError::Conflict(_)));
    }

    #[test]
    fn only_terminal_sessions_expire() {
        let mut s = session();
        assert!(!s.is_expired(std::time::Duration::ZERO));

        s.cancel().unwrap();
        assert!(s.is_expired(std::time::Duration::ZERO));
        assert!(!s.is_expired(std::time::Duration::from_secs(3600)));
    }

    #[test]
    fn commit_requires_configured_state() {
        let mut s = session();
        assert_matches!(
            s.record_commit(report(CommitStatus::Completed, false)),
            Err(CoreError::Conflict(_))
        );
    }
}
