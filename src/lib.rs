/*!
# Skills Feedback Collector

A small web application, built in Rust, that walks a reviewer through a list of
accounting skills and asks whether they agree with the proposed "human
capability" statement for each one.

## Overview

The source dataset is a CSV or spreadsheet with one row per skill. Each
reviewer gets their own session, answers Yes/No for every item (proposing a
revised statement when they disagree), optionally describes themselves, and
submits. The completed batch is written to a local CSV artifact and, when a
ledger backend is configured, appended to a shared "Master" tab plus a tab for
the respondent. A password-protected dashboard summarizes everything collected
so far.

## Architecture

### Frontend Layer
- **Technologies**: HTML, CSS, plain JavaScript
- **Pages**: review item, completion form with downloads, dashboard login, dashboard

### Backend Layer
- **Technologies**: Rust, axum, tokio
- **Core Components**:
  - Source Loader - Reads and validates the review dataset
  - Review Session - Ordered Yes/No walk with stale-submission rejection
  - Submission Sink - Local CSV export plus best-effort remote append
  - Ledger Services - In-memory, CSV workbook and Google Sheets backends
  - Reporting - Counters, per-skill agreement and reviewer filter

### Data Persistence Layer
- CSV artifact rewritten on every submission
- Append-only ledger tabs with the header written once
- In-progress sessions snapshotted with Gzip compression and bincode serialization

## Modules

- **error**: Error taxonomy shared by every layer
- **config**: Environment driven configuration
- **loader**: Source dataset import (CSV, XLSX, ODS)
- **review**: Review session state machine
- **downloader**: Export functionality (CSV, XLSX)
- **ledger**: Ledger trait and local backends
- **sheets**: Google Sheets backend
- **submission**: Batch flattening and persistence
- **saving**: Session snapshots with compression
- **report**: Dashboard aggregates
- **graph**: Agreement chart (web feature)
- **login**: Dashboard password gate (web feature)
- **app**: Routing and middleware (web feature)

## REST API Endpoints

- `/` - Current review item, or the completion page
- `/api/review` - Session state as JSON
- `/api/submit` - Yes/No answer for the current position (form post, redirects)
- `/api/answer` - Same as `/api/submit` with a JSON body and JSON state reply
- `/api/complete` - Respondent details; persists the batch
- `/api/restart` - Drops the caller's session and starts over
- `/download/csv`, `/download/xlsx` - The completed batch
- `/dashboard/login`, `/dashboard/logout` - Dashboard password session
- `/dashboard`, `/api/dashboard`, `/dashboard/chart.png` - Reporting

A review session is created by the first answer, not by viewing `/`.
*/

pub mod config;
pub mod downloader;
pub mod error;
pub mod ledger;
pub mod loader;
pub mod report;
pub mod review;
pub mod saving;
pub mod sheets;
pub mod submission;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod graph;
#[cfg(feature = "web")]
pub mod login;

/// Re-export the types most callers need
pub use config::AppConfig;
pub use error::{
    ConfigurationError, LocalPersistenceError, RemotePersistenceError, ReportError,
    ValidationError,
};
pub use ledger::{LedgerHandle, LedgerService, MemoryLedger, WorkbookLedger};
pub use loader::{Table, load_source};
pub use review::{Agree, CurrentItem, ResponseRecord, ReviewSession, SessionState, SourceRow};
pub use submission::{PersistReport, RemoteOutcome, RespondentMetadata, SubmissionSink};
