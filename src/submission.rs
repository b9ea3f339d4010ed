//! Submission sink: flattening and persisting a completed batch
//!
//! A batch is always written to the local CSV artifact. When a ledger is
//! configured the same rows are also appended to the shared master tab and to
//! a per-respondent tab. Remote failures are collected as warnings and never
//! stop the local export.

use crate::downloader::to_csv;
use crate::error::{LocalPersistenceError, RemotePersistenceError};
use crate::ledger::{LedgerService, append_batch};
use crate::loader::Table;
use crate::review::ResponseRecord;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

lazy_static! {
    static ref DISALLOWED_LABEL_CHARS: Regex = Regex::new(r"[^\p{L}\p{N} _()\-\s]").unwrap();
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();
}

/// Maximum length of a per-respondent tab label, in characters
pub const MAX_LABEL_LEN: usize = 80;
/// Label used when no usable name or email was given
pub const ANONYMOUS_LABEL: &str = "Anonymous";

/// Column layout of every persisted row
pub const LEDGER_COLUMNS: [&str; 18] = [
    "Submitted At",
    "Session ID",
    "Source Index",
    "Skill",
    "AI Support",
    "Original Human Capability",
    "Agree",
    "Revised Human Capability",
    "Name",
    "Email",
    "Company Size",
    "Role Level",
    "Years Experience",
    "Industry",
    "Country",
    "City",
    "Age Band",
    "Education",
];

/// Optional details about the respondent, copied onto every row of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RespondentMetadata {
    pub name: String,
    pub email: String,
    pub company_size: String,
    pub role_level: String,
    pub years_experience: String,
    pub industry: String,
    pub country: String,
    pub city: String,
    pub age_band: String,
    pub education: String,
}

impl RespondentMetadata {
    /// Raw per-respondent label: `Name (Email)`, or whichever one is present
    pub fn raw_label(&self) -> String {
        let name = self.name.trim();
        let email = self.email.trim();
        match (name.is_empty(), email.is_empty()) {
            (false, false) => format!("{} ({})", name, email),
            (false, true) => name.to_string(),
            (true, false) => email.to_string(),
            (true, true) => String::new(),
        }
    }

    /// Sanitized tab name for this respondent's private ledger
    pub fn ledger_label(&self) -> String {
        sanitize_label(&self.raw_label())
    }
}

/// Make a string safe to use as a ledger tab name
///
/// Keeps letters, digits, spaces, underscores, hyphens and parentheses,
/// collapses whitespace, and caps the result at [`MAX_LABEL_LEN`] characters.
/// Falls back to [`ANONYMOUS_LABEL`] when nothing is left.
///
/// # Examples
/// ```
/// use skills_feedback::submission::sanitize_label;
///
/// assert_eq!(sanitize_label("Jane Q. Smith!!"), "Jane Q Smith");
/// assert_eq!(sanitize_label("?!"), "Anonymous");
/// ```
pub fn sanitize_label(raw: &str) -> String {
    let kept = DISALLOWED_LABEL_CHARS.replace_all(raw, "");
    let collapsed = WHITESPACE_RUN.replace_all(kept.trim(), " ");
    let truncated: String = collapsed.chars().take(MAX_LABEL_LEN).collect();
    let label = truncated.trim_end();
    if label.is_empty() {
        ANONYMOUS_LABEL.to_string()
    } else {
        label.to_string()
    }
}

/// Flatten a batch into the uniform row shape of [`LEDGER_COLUMNS`]
pub fn flatten(
    batch: &[ResponseRecord],
    metadata: &RespondentMetadata,
    submitted_at: DateTime<Utc>,
) -> Table {
    let timestamp = submitted_at.format("%Y-%m-%d %H:%M:%S").to_string();
    let mut table = Table::new(LEDGER_COLUMNS.iter().map(|c| c.to_string()).collect());

    for record in batch {
        table.rows.push(vec![
            timestamp.clone(),
            record.session_id.clone(),
            record.source_index.to_string(),
            record.skill.clone(),
            record.ai_support.clone(),
            record.original_human_capability.clone(),
            record.agree.to_string(),
            record.revised_human_capability.clone(),
            metadata.name.trim().to_string(),
            metadata.email.trim().to_string(),
            metadata.company_size.trim().to_string(),
            metadata.role_level.trim().to_string(),
            metadata.years_experience.trim().to_string(),
            metadata.industry.trim().to_string(),
            metadata.country.trim().to_string(),
            metadata.city.trim().to_string(),
            metadata.age_band.trim().to_string(),
            metadata.education.trim().to_string(),
        ]);
    }

    table
}

/// Outcome of the remote part of a submission
#[derive(Debug)]
pub enum RemoteOutcome {
    /// No ledger configured
    Disabled,
    /// Nothing to append for an empty batch
    SkippedEmpty,
    /// Every destination already received this batch on an earlier attempt
    SkippedAlreadySubmitted,
    /// Rows reached every remaining destination; `tabs` lists those written now
    Written { tabs: Vec<String>, rows: usize },
    /// At least one destination failed; `written` lists the ones that succeeded
    Failed {
        written: Vec<String>,
        errors: Vec<(String, RemotePersistenceError)>,
    },
}

impl RemoteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RemoteOutcome::Written { .. })
    }

    /// Tabs that received the batch during this attempt
    pub fn written_tabs(&self) -> &[String] {
        match self {
            RemoteOutcome::Written { tabs, .. } => tabs,
            RemoteOutcome::Failed { written, .. } => written,
            _ => &[],
        }
    }

    /// Human-readable warnings for the respondent
    pub fn warnings(&self) -> Vec<String> {
        match self {
            RemoteOutcome::Failed { errors, .. } => errors
                .iter()
                .map(|(tab, e)| format!("Could not save to shared sheet '{}': {}", tab, e))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Everything that happened while persisting one batch
#[derive(Debug)]
pub struct PersistReport {
    /// Flattened rows, also used to serve downloads
    pub table: Table,
    pub local: Result<PathBuf, LocalPersistenceError>,
    pub remote: RemoteOutcome,
}

/// Persists completed batches to the local artifact and the optional ledger
#[derive(Clone)]
pub struct SubmissionSink {
    export_path: PathBuf,
    ledger: Option<Arc<dyn LedgerService>>,
    master_tab: String,
}

impl SubmissionSink {
    pub fn new(
        export_path: impl Into<PathBuf>,
        ledger: Option<Arc<dyn LedgerService>>,
        master_tab: impl Into<String>,
    ) -> Self {
        SubmissionSink {
            export_path: export_path.into(),
            ledger,
            master_tab: master_tab.into(),
        }
    }

    pub fn export_path(&self) -> &Path {
        &self.export_path
    }

    pub fn ledger(&self) -> Option<&Arc<dyn LedgerService>> {
        self.ledger.as_ref()
    }

    pub fn master_tab(&self) -> &str {
        &self.master_tab
    }

    /// Persist a batch everywhere, stamped with the current time
    pub async fn persist(
        &self,
        batch: &[ResponseRecord],
        metadata: &RespondentMetadata,
    ) -> PersistReport {
        self.persist_at(batch, metadata, Utc::now(), &BTreeSet::new())
            .await
    }

    /// Persist a batch with an explicit timestamp
    ///
    /// Ledger tabs named in `already_written` received this batch on an
    /// earlier attempt and are skipped; only the local artifact is always
    /// rewritten.
    pub async fn persist_at(
        &self,
        batch: &[ResponseRecord],
        metadata: &RespondentMetadata,
        submitted_at: DateTime<Utc>,
        already_written: &BTreeSet<String>,
    ) -> PersistReport {
        let table = flatten(batch, metadata, submitted_at);

        let local = write_local(&self.export_path, &table);
        match &local {
            Ok(path) => log::info!("wrote {} rows to {}", table.len(), path.display()),
            Err(e) => log::error!("local export failed: {}", e),
        }

        let remote = self
            .export_remote(&table, &metadata.ledger_label(), already_written)
            .await;

        PersistReport {
            table,
            local,
            remote,
        }
    }

    async fn export_remote(
        &self,
        table: &Table,
        respondent_tab: &str,
        already_written: &BTreeSet<String>,
    ) -> RemoteOutcome {
        let Some(ledger) = &self.ledger else {
            return RemoteOutcome::Disabled;
        };
        if table.is_empty() {
            return RemoteOutcome::SkippedEmpty;
        }

        let mut pending: Vec<&str> = vec![self.master_tab.as_str()];
        if respondent_tab != self.master_tab {
            pending.push(respondent_tab);
        }
        pending.retain(|tab| !already_written.contains(*tab));
        if pending.is_empty() {
            log::info!("batch already in every ledger tab; skipping remote export");
            return RemoteOutcome::SkippedAlreadySubmitted;
        }

        let mut written = Vec::new();
        let mut errors = Vec::new();
        for tab in pending {
            match append_batch(ledger.as_ref(), tab, &table.columns, &table.rows).await {
                Ok(rows) => {
                    log::info!("appended {} rows to ledger tab '{}'", rows, tab);
                    written.push(tab.to_string());
                }
                Err(e) => {
                    log::warn!("ledger export to '{}' failed: {}", tab, e);
                    errors.push((tab.to_string(), e));
                }
            }
        }

        if errors.is_empty() {
            RemoteOutcome::Written {
                tabs: written,
                rows: table.len(),
            }
        } else {
            RemoteOutcome::Failed { written, errors }
        }
    }
}

/// Overwrite `path` with the whole table as CSV
pub fn write_local(path: &Path, table: &Table) -> Result<PathBuf, LocalPersistenceError> {
    let to_error = |source| LocalPersistenceError {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(to_error)?;
    }
    fs::write(path, to_csv(table)).map_err(to_error)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerHandle, MemoryLedger};
    use crate::loader::read_csv;
    use crate::review::{Agree, ReviewSession, SourceRow};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct OfflineLedger;

    #[async_trait]
    impl LedgerService for OfflineLedger {
        async fn find(&self, _: &str) -> Result<Option<LedgerHandle>, RemotePersistenceError> {
            Err(RemotePersistenceError::Api {
                status: 503,
                message: "network unreachable".to_string(),
            })
        }
        async fn create(&self, _: &str) -> Result<LedgerHandle, RemotePersistenceError> {
            unreachable!()
        }
        async fn read_all(
            &self,
            _: &LedgerHandle,
        ) -> Result<Vec<Vec<String>>, RemotePersistenceError> {
            unreachable!()
        }
        async fn append(
            &self,
            _: &LedgerHandle,
            _: &[Vec<String>],
        ) -> Result<(), RemotePersistenceError> {
            unreachable!()
        }
    }

    fn completed_batch() -> Vec<ResponseRecord> {
        let items: Arc<[SourceRow]> = vec![
            SourceRow {
                skill: "Reconciliation".to_string(),
                ai_support: "Matches entries".to_string(),
                human_capability: "Investigate exceptions".to_string(),
            },
            SourceRow {
                skill: "Forecasting".to_string(),
                ai_support: "Builds models".to_string(),
                human_capability: "Challenge assumptions".to_string(),
            },
        ]
        .into();
        let mut session = ReviewSession::with_id("session-1", items);
        session.submit(Agree::Yes, "").unwrap();
        session.submit(Agree::No, "Use judgment").unwrap();
        session.responses().to_vec()
    }

    fn metadata() -> RespondentMetadata {
        RespondentMetadata {
            name: "Jane Q. Smith".to_string(),
            email: "jane@example.com".to_string(),
            country: "Ireland".to_string(),
            ..Default::default()
        }
    }

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn sanitizes_labels() {
        assert_eq!(sanitize_label("Jane Q. Smith!!"), "Jane Q Smith");
        assert_eq!(sanitize_label(""), "Anonymous");
        assert_eq!(sanitize_label("@#$%."), "Anonymous");
        assert_eq!(sanitize_label("  a\t\tb \n c "), "a b c");
        assert_eq!(sanitize_label("Ops_team-2 (EMEA)"), "Ops_team-2 (EMEA)");
        assert_eq!(sanitize_label(&"x".repeat(120)).chars().count(), 80);
    }

    #[test]
    fn label_combines_name_and_email() {
        assert_eq!(metadata().ledger_label(), "Jane Q Smith (janeexamplecom)");
        let only_email = RespondentMetadata {
            email: "ops@corp.io".to_string(),
            ..Default::default()
        };
        assert_eq!(only_email.ledger_label(), "opscorpio");
        assert_eq!(RespondentMetadata::default().ledger_label(), "Anonymous");
    }

    #[test]
    fn flatten_replicates_metadata_and_keeps_order() {
        let table = flatten(&completed_batch(), &metadata(), timestamp());
        assert_eq!(table.len(), 2);
        assert_eq!(table.columns.len(), LEDGER_COLUMNS.len());
        assert_eq!(table.get(0, "Skill"), "Reconciliation");
        assert_eq!(table.get(1, "Skill"), "Forecasting");
        assert_eq!(table.get(1, "Revised Human Capability"), "Use judgment");
        assert_eq!(table.get(0, "Agree"), "Yes");
        for row in 0..2 {
            assert_eq!(table.get(row, "Name"), "Jane Q. Smith");
            assert_eq!(table.get(row, "Country"), "Ireland");
            assert_eq!(table.get(row, "City"), "");
            assert_eq!(table.get(row, "Submitted At"), "2025-03-01 09:30:00");
        }
    }

    #[tokio::test]
    async fn writes_local_and_both_ledger_tabs() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::new());
        let sink = SubmissionSink::new(
            dir.path().join("out").join("feedback.csv"),
            Some(ledger.clone() as Arc<dyn LedgerService>),
            "Master",
        );

        let report = sink
            .persist_at(&completed_batch(), &metadata(), timestamp(), &BTreeSet::new())
            .await;

        let path = report.local.unwrap();
        let written = read_csv(&path).unwrap();
        assert_eq!(written, report.table);
        assert_eq!(written.len(), 2);

        assert!(report.remote.is_success());
        let master = ledger.rows("Master");
        let private = ledger.rows("Jane Q Smith (janeexamplecom)");
        assert_eq!(master.len(), 3);
        assert_eq!(master, private);
        assert_eq!(master[0], report.table.columns);
    }

    #[tokio::test]
    async fn second_session_appends_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::new());
        let sink = SubmissionSink::new(
            dir.path().join("feedback.csv"),
            Some(ledger.clone() as Arc<dyn LedgerService>),
            "Master",
        );
        sink.persist(&completed_batch(), &metadata()).await;
        sink.persist(&completed_batch(), &RespondentMetadata::default())
            .await;

        assert_eq!(ledger.rows("Master").len(), 5);
        assert_eq!(ledger.rows("Anonymous").len(), 3);
        // Local artifact holds only the latest batch
        assert_eq!(read_csv(sink.export_path()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn remote_failure_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SubmissionSink::new(
            dir.path().join("feedback.csv"),
            Some(Arc::new(OfflineLedger) as Arc<dyn LedgerService>),
            "Master",
        );

        let report = sink.persist(&completed_batch(), &metadata()).await;
        assert!(report.local.is_ok());
        assert_eq!(report.table.len(), 2);
        let warnings = report.remote.warnings();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("Master"));
    }

    #[tokio::test]
    async fn empty_batch_writes_header_only_and_skips_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::new());
        let sink = SubmissionSink::new(
            dir.path().join("feedback.csv"),
            Some(ledger.clone() as Arc<dyn LedgerService>),
            "Master",
        );

        let report = sink.persist(&[], &RespondentMetadata::default()).await;
        let written = read_csv(report.local.unwrap()).unwrap();
        assert!(written.is_empty());
        assert_eq!(written.columns.len(), LEDGER_COLUMNS.len());
        assert!(matches!(report.remote, RemoteOutcome::SkippedEmpty));
        assert!(ledger.tab_names().is_empty());
    }

    #[tokio::test]
    async fn unwritable_path_keeps_batch() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();
        let sink = SubmissionSink::new(blocker.join("feedback.csv"), None, "Master");

        let batch = completed_batch();
        let report = sink.persist(&batch, &metadata()).await;
        assert!(report.local.is_err());
        assert!(matches!(report.remote, RemoteOutcome::Disabled));
        assert_eq!(report.table.len(), batch.len());
    }

    #[tokio::test]
    async fn written_tabs_are_not_appended_again() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::new());
        let sink = SubmissionSink::new(
            dir.path().join("feedback.csv"),
            Some(ledger.clone() as Arc<dyn LedgerService>),
            "Master",
        );
        let done: BTreeSet<String> = ["Master", "Jane Q Smith (janeexamplecom)"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        let report = sink
            .persist_at(&completed_batch(), &metadata(), timestamp(), &done)
            .await;
        assert!(report.local.is_ok());
        assert!(matches!(
            report.remote,
            RemoteOutcome::SkippedAlreadySubmitted
        ));
        assert!(ledger.tab_names().is_empty());
    }

    /// Master always works; every other tab fails while `down` is set
    struct RespondentTabDown {
        inner: MemoryLedger,
        down: AtomicBool,
    }

    #[async_trait]
    impl LedgerService for RespondentTabDown {
        async fn find(&self, name: &str) -> Result<Option<LedgerHandle>, RemotePersistenceError> {
            self.inner.find(name).await
        }
        async fn create(&self, name: &str) -> Result<LedgerHandle, RemotePersistenceError> {
            self.inner.create(name).await
        }
        async fn read_all(
            &self,
            handle: &LedgerHandle,
        ) -> Result<Vec<Vec<String>>, RemotePersistenceError> {
            self.inner.read_all(handle).await
        }
        async fn append(
            &self,
            handle: &LedgerHandle,
            rows: &[Vec<String>],
        ) -> Result<(), RemotePersistenceError> {
            if handle.name != "Master" && self.down.load(Ordering::SeqCst) {
                return Err(RemotePersistenceError::Api {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            self.inner.append(handle, rows).await
        }
    }

    #[tokio::test]
    async fn retry_after_partial_failure_only_fills_missing_tab() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(RespondentTabDown {
            inner: MemoryLedger::new(),
            down: AtomicBool::new(true),
        });
        let sink = SubmissionSink::new(
            dir.path().join("feedback.csv"),
            Some(ledger.clone() as Arc<dyn LedgerService>),
            "Master",
        );
        let label = metadata().ledger_label();

        let first = sink
            .persist_at(&completed_batch(), &metadata(), timestamp(), &BTreeSet::new())
            .await;
        assert!(matches!(first.remote, RemoteOutcome::Failed { .. }));
        assert_eq!(first.remote.written_tabs(), ["Master".to_string()]);
        assert_eq!(ledger.inner.rows("Master").len(), 3);

        let mut done: BTreeSet<String> = first.remote.written_tabs().iter().cloned().collect();
        ledger.down.store(false, Ordering::SeqCst);
        let retry = sink
            .persist_at(&completed_batch(), &metadata(), timestamp(), &done)
            .await;
        assert!(retry.remote.is_success());
        assert_eq!(retry.remote.written_tabs(), [label.clone()]);
        assert_eq!(ledger.inner.rows("Master").len(), 3);
        assert_eq!(ledger.inner.rows(&label), ledger.inner.rows("Master"));

        done.extend(retry.remote.written_tabs().iter().cloned());
        let again = sink
            .persist_at(&completed_batch(), &metadata(), timestamp(), &done)
            .await;
        assert!(matches!(again.remote, RemoteOutcome::SkippedAlreadySubmitted));
        assert_eq!(ledger.inner.rows("Master").len(), 3);
    }

    #[tokio::test]
    async fn respondent_named_like_master_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::new());
        let sink = SubmissionSink::new(
            dir.path().join("feedback.csv"),
            Some(ledger.clone() as Arc<dyn LedgerService>),
            "Master",
        );
        let metadata = RespondentMetadata {
            name: "Master".to_string(),
            ..Default::default()
        };
        let report = sink.persist(&completed_batch(), &metadata).await;
        assert!(report.remote.is_success());
        assert_eq!(ledger.rows("Master").len(), 3);
    }

    proptest! {
        #[test]
        fn sanitized_labels_are_bounded_and_clean(raw in "\\PC{0,200}") {
            let label = sanitize_label(&raw);
            prop_assert!(!label.is_empty());
            prop_assert!(label.chars().count() <= MAX_LABEL_LEN);
            prop_assert!(!label.contains("  "));
            prop_assert!(label.chars().all(|c| c.is_alphanumeric() || " _-()".contains(c)));
        }
    }
}
