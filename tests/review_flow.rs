use skills_feedback::ledger::{LedgerService, MemoryLedger, WorkbookLedger};
use skills_feedback::loader::{load_source, read_csv};
use skills_feedback::report;
use skills_feedback::submission::{LEDGER_COLUMNS, RemoteOutcome, RespondentMetadata, SubmissionSink};
use skills_feedback::{Agree, ConfigurationError, ReviewSession, ValidationError};
use std::fs;
use std::sync::Arc;

const SOURCE: &str = "\
Skill,How AI/GenAI Supports,The New Human Capability Statement
Budgeting,Drafts budgets from history,Negotiate trade-offs with owners
Forecasting,Builds rolling forecasts,Challenge model assumptions
";

fn write_source(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("skills.csv");
    fs::write(&path, SOURCE).unwrap();
    path
}

#[tokio::test]
async fn review_then_persist_locally_and_remotely() {
    let dir = tempfile::tempdir().unwrap();
    let items = load_source(write_source(&dir)).unwrap();
    assert_eq!(items.len(), 2);

    let mut session = ReviewSession::new(items.into());
    session.submit(Agree::Yes, "ignored").unwrap();
    session.submit(Agree::No, "Use judgment").unwrap();
    assert!(session.is_complete());
    assert_eq!(
        session.submit(Agree::Yes, ""),
        Err(ValidationError::SessionComplete)
    );

    let ledger = Arc::new(MemoryLedger::new());
    let shared: Arc<dyn LedgerService> = ledger.clone();
    let export = dir.path().join("out").join("feedback.csv");
    let sink = SubmissionSink::new(&export, Some(shared), "Master");

    let metadata = RespondentMetadata {
        name: "Jane Q. Smith!!".to_string(),
        country: "Ireland".to_string(),
        ..Default::default()
    };
    let report = sink.persist(session.responses(), &metadata).await;

    assert!(report.local.is_ok());
    assert!(report.remote.is_success());

    let written = read_csv(&export).unwrap();
    assert_eq!(written.columns, LEDGER_COLUMNS.to_vec());
    assert_eq!(written.len(), 2);
    assert_eq!(written.get(0, "Agree"), "Yes");
    assert_eq!(written.get(0, "Revised Human Capability"), "");
    assert_eq!(written.get(1, "Revised Human Capability"), "Use judgment");
    assert_eq!(written.get(1, "Country"), "Ireland");

    assert_eq!(ledger.tab_names(), vec!["Jane Q Smith", "Master"]);
    assert_eq!(ledger.rows("Master").len(), 3);
    assert_eq!(ledger.rows("Jane Q Smith").len(), 3);

    let summary = report::summarize(&written).unwrap();
    assert_eq!((summary.agreed, summary.disagreed), (1, 1));
}

#[tokio::test]
async fn second_batch_appends_without_repeating_header() {
    let dir = tempfile::tempdir().unwrap();
    let items: Arc<[_]> = load_source(write_source(&dir)).unwrap().into();
    let ledger: Arc<dyn LedgerService> = Arc::new(WorkbookLedger::new(dir.path().join("ledger")));
    let sink = SubmissionSink::new(dir.path().join("feedback.csv"), Some(ledger.clone()), "Master");

    for name in ["Ann", "Bo"] {
        let mut session = ReviewSession::new(items.clone());
        session.submit(Agree::Yes, "").unwrap();
        session.submit(Agree::Yes, "").unwrap();
        let metadata = RespondentMetadata {
            name: name.to_string(),
            ..Default::default()
        };
        let report = sink.persist(session.responses(), &metadata).await;
        assert!(matches!(report.remote, RemoteOutcome::Written { rows: 2, .. }));
    }

    let master = report::load_ledger(ledger.as_ref(), "Master").await.unwrap().unwrap();
    assert_eq!(master.len(), 4);
    assert_eq!(report::reviewers(&master), vec!["Ann", "Bo"]);

    // The local artifact holds only the latest batch
    let local = report::load_local(sink.export_path()).unwrap().unwrap();
    assert_eq!(local.len(), 2);
}

#[tokio::test]
async fn empty_source_completes_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.csv");
    fs::write(&path, "Skill,How AI/GenAI Supports,The New Human Capability Statement\n").unwrap();

    let session = ReviewSession::new(load_source(&path).unwrap().into());
    assert!(session.is_complete());

    let ledger: Arc<dyn LedgerService> = Arc::new(MemoryLedger::new());
    let sink = SubmissionSink::new(dir.path().join("feedback.csv"), Some(ledger), "Master");
    let report = sink.persist(session.responses(), &RespondentMetadata::default()).await;

    assert!(matches!(report.remote, RemoteOutcome::SkippedEmpty));
    let written = read_csv(sink.export_path()).unwrap();
    assert!(written.is_empty());
    assert_eq!(written.columns.len(), LEDGER_COLUMNS.len());
}

#[test]
fn missing_required_column_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.csv");
    fs::write(&path, "Skill,How AI/GenAI Supports\nBudgeting,Drafts\n").unwrap();

    match load_source(&path) {
        Err(ConfigurationError::MissingColumn(column)) => {
            assert_eq!(column, "The New Human Capability Statement")
        }
        other => panic!("unexpected result: {:?}", other),
    }
}
