#![cfg(feature = "web")]

use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::config::{AppConfig, ReportSource};
use crate::downloader::{to_csv, to_xlsx};
use crate::error::{ConfigurationError, ReportError, ValidationError};
use crate::graph::{GraphOptions, create_agreement_chart};
use crate::ledger::{LedgerService, build_ledger};
use crate::loader::{Table, load_source};
use crate::login::{DASHBOARD_COOKIE, DashboardGate, HasDashboardGate, require_auth, session_cookie};
use crate::report::{self, DashboardView};
use crate::review::{Agree, CurrentItem, ReviewSession, SessionState, SourceRow};
use crate::saving::{self, SessionSnapshot};
use crate::submission::{PersistReport, RemoteOutcome, RespondentMetadata, SubmissionSink, flatten};

/// Name of the cookie carrying the review session id
pub const REVIEW_COOKIE: &str = "review_session";

/// One respondent's review, serialized per session by its own lock
pub struct ReviewEntry {
    session: ReviewSession,
    metadata: Option<RespondentMetadata>,
    submitted_at: Option<DateTime<Utc>>,
    outcome: Option<PersistSummary>,
    /// Ledger tabs that already hold this session's batch
    written_tabs: BTreeSet<String>,
}

impl ReviewEntry {
    fn new(session: ReviewSession) -> Self {
        ReviewEntry {
            session,
            metadata: None,
            submitted_at: None,
            outcome: None,
            written_tabs: BTreeSet::new(),
        }
    }
}

type SharedEntry = Arc<tokio::sync::Mutex<ReviewEntry>>;

struct ReviewSlot {
    entry: SharedEntry,
    last_seen: Instant,
}

impl ReviewSlot {
    fn new(session: ReviewSession) -> Self {
        ReviewSlot {
            entry: Arc::new(tokio::sync::Mutex::new(ReviewEntry::new(session))),
            last_seen: Instant::now(),
        }
    }
}

pub struct AppState {
    config: AppConfig,
    items: Arc<[SourceRow]>,
    reviews: Mutex<HashMap<String, ReviewSlot>>,
    session_ttl: Duration,
    /// Latest state of every in-progress session, kept apart from the
    /// per-session locks so saving never waits on a busy respondent
    snapshots: Mutex<HashMap<String, SessionSnapshot>>,
    snapshot_lock: tokio::sync::Mutex<()>,
    sink: SubmissionSink,
    gate: DashboardGate,
}

impl HasDashboardGate for AppState {
    fn dashboard_gate(&self) -> &DashboardGate {
        &self.gate
    }
}

/// What the respondent sees after submitting to the ledger
#[derive(Debug, Clone, Serialize)]
pub struct PersistSummary {
    pub rows: usize,
    pub local_path: Option<String>,
    pub local_error: Option<String>,
    pub remote: &'static str,
    pub warnings: Vec<String>,
}

impl From<&PersistReport> for PersistSummary {
    fn from(report: &PersistReport) -> Self {
        let (local_path, local_error) = match &report.local {
            Ok(path) => (Some(path.display().to_string()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let remote = match &report.remote {
            RemoteOutcome::Disabled => "disabled",
            RemoteOutcome::SkippedEmpty => "skipped",
            RemoteOutcome::SkippedAlreadySubmitted => "already_submitted",
            RemoteOutcome::Written { .. } => "written",
            RemoteOutcome::Failed { .. } => "failed",
        };
        PersistSummary {
            rows: report.table.len(),
            local_path,
            local_error,
            remote,
            warnings: report.remote.warnings(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ItemView<'a> {
    index: usize,
    skill: &'a str,
    ai_support: &'a str,
    human_capability: &'a str,
}

#[derive(Debug, Serialize)]
struct ReviewView<'a> {
    session_id: &'a str,
    total: usize,
    cursor: usize,
    progress: f64,
    state: SessionState,
    item: Option<ItemView<'a>>,
    remote_enabled: bool,
    persisted: Option<&'a PersistSummary>,
}

impl<'a> ReviewView<'a> {
    fn new(entry: &'a ReviewEntry, remote_enabled: bool) -> Self {
        let session = &entry.session;
        let item = match session.current() {
            CurrentItem::Pending { index, row } => Some(ItemView {
                index,
                skill: &row.skill,
                ai_support: &row.ai_support,
                human_capability: &row.human_capability,
            }),
            CurrentItem::Complete => None,
        };
        ReviewView {
            session_id: session.session_id(),
            total: session.total(),
            cursor: session.cursor(),
            progress: session.progress(),
            state: session.state(),
            item,
            remote_enabled,
            persisted: entry.outcome.as_ref(),
        }
    }
}

#[derive(Deserialize)]
struct SubmitForm {
    position: usize,
    agree: String,
    #[serde(default)]
    revised: String,
}

#[derive(Deserialize)]
struct AnswerRequest {
    position: usize,
    agree: String,
    #[serde(default)]
    revised: String,
}

#[derive(Deserialize)]
struct LoginForm {
    password: String,
}

#[derive(Deserialize)]
struct DashboardQuery {
    reviewer: Option<String>,
}

#[derive(Serialize)]
struct SaveResponse {
    status: String,
    message: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(SaveResponse {
            status: "error".to_string(),
            message: Some(message.into()),
        }),
    )
        .into_response()
}

/// Insert a `const NAME = <json>;` script before `</head>`
fn inject_state(template: &str, name: &str, value: &impl Serialize) -> String {
    let json = serde_json::to_string(value)
        .unwrap_or_else(|_| "null".to_string())
        .replace("</", "<\\/");
    template.replace(
        "</head>",
        &format!("    <script>const {} = {};</script>\n</head>", name, json),
    )
}

fn validation_status(error: &ValidationError) -> StatusCode {
    match error {
        ValidationError::SessionComplete | ValidationError::StaleSubmission { .. } => {
            StatusCode::CONFLICT
        }
        ValidationError::RevisionRequired | ValidationError::InvalidAgree(_) => {
            StatusCode::BAD_REQUEST
        }
    }
}

fn redirect_with_error(path: &str, message: &str) -> Response {
    Redirect::to(&format!("{}?error={}", path, urlencoding::encode(message))).into_response()
}

impl AppState {
    pub fn new(
        config: AppConfig,
        items: Arc<[SourceRow]>,
        ledger: Option<Arc<dyn LedgerService>>,
    ) -> Result<Self, ConfigurationError> {
        let gate = DashboardGate::new(&config.dashboard)?;
        let sink = SubmissionSink::new(&config.export.path, ledger, &config.ledger.master_tab);
        Ok(AppState {
            session_ttl: Duration::from_secs(config.review.session_ttl_secs),
            config,
            items,
            reviews: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
            snapshot_lock: tokio::sync::Mutex::new(()),
            sink,
            gate,
        })
    }

    /// Re-attach sessions saved by an earlier run
    pub fn restore_snapshot(&self) {
        let Some(path) = &self.config.snapshot.path else {
            return;
        };
        if !path.exists() {
            return;
        }
        match saving::load_sessions(path) {
            Ok(snapshots) => {
                let restored = saving::restore_sessions(
                    snapshots,
                    &self.items,
                    self.config.review.require_revision,
                );
                log::info!("restored {} review sessions from {}", restored.len(), path.display());
                let mut reviews = self.lock_reviews();
                let mut snapshots = self.lock_snapshots();
                for session in restored {
                    let id = session.session_id().to_string();
                    snapshots.insert(id.clone(), SessionSnapshot::from(&session));
                    reviews.insert(id, ReviewSlot::new(session));
                }
            }
            Err(e) => log::warn!("could not load session snapshot {}: {}", path.display(), e),
        }
    }

    fn lock_reviews(&self) -> std::sync::MutexGuard<'_, HashMap<String, ReviewSlot>> {
        self.reviews.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_snapshots(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionSnapshot>> {
        self.snapshots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of review sessions currently held in memory
    pub fn live_sessions(&self) -> usize {
        self.lock_reviews().len()
    }

    fn find_entry(&self, jar: &CookieJar) -> Option<SharedEntry> {
        let id = jar.get(REVIEW_COOKIE)?.value();
        let mut reviews = self.lock_reviews();
        let slot = reviews.get_mut(id)?;
        slot.last_seen = Instant::now();
        Some(slot.entry.clone())
    }

    /// The caller's review session, creating one (and its cookie) if needed
    ///
    /// Only handlers that record an answer call this, so page views never
    /// allocate a session. Sessions idle for longer than the configured TTL
    /// are evicted whenever a new one is created.
    fn entry_for(&self, jar: CookieJar) -> (CookieJar, SharedEntry) {
        if let Some(entry) = self.find_entry(&jar) {
            return (jar, entry);
        }
        let session = self.fresh_session();
        let id = session.session_id().to_string();
        let slot = ReviewSlot::new(session);
        let entry = slot.entry.clone();
        {
            let mut reviews = self.lock_reviews();
            let now = Instant::now();
            let ttl = self.session_ttl;
            let before = reviews.len();
            let mut evicted = Vec::new();
            reviews.retain(|key, existing| {
                let keep = now.duration_since(existing.last_seen) < ttl;
                if !keep {
                    evicted.push(key.clone());
                }
                keep
            });
            if !evicted.is_empty() {
                log::debug!("evicted {} of {} idle review sessions", evicted.len(), before);
                let mut snapshots = self.lock_snapshots();
                for id in &evicted {
                    snapshots.remove(id);
                }
            }
            reviews.insert(id.clone(), slot);
        }

        let mut cookie = Cookie::new(REVIEW_COOKIE, id);
        cookie.set_path("/");
        cookie.set_http_only(true);
        (jar.add(cookie), entry)
    }

    fn fresh_session(&self) -> ReviewSession {
        ReviewSession::new(self.items.clone())
            .require_revision(self.config.review.require_revision)
    }

    fn remote_enabled(&self) -> bool {
        self.sink.ledger().is_some()
    }

    /// Remember the latest state of a session for the next snapshot
    ///
    /// Called with the session's lock held; completed sessions are dropped
    /// from the snapshot.
    fn record_snapshot(&self, session: &ReviewSession) {
        if self.config.snapshot.path.is_none() {
            return;
        }
        let mut snapshots = self.lock_snapshots();
        if session.is_complete() {
            snapshots.remove(session.session_id());
        } else {
            snapshots.insert(session.session_id().to_string(), SessionSnapshot::from(session));
        }
    }

    fn forget_session(&self, id: &str) {
        self.lock_reviews().remove(id);
        self.lock_snapshots().remove(id);
    }

    /// Write recorded in-progress sessions when a snapshot path is configured
    ///
    /// Saves are serialized so the file always ends with the newest state.
    async fn save_snapshot(&self) {
        let Some(path) = self.config.snapshot.path.clone() else {
            return;
        };
        let _guard = self.snapshot_lock.lock().await;
        let snapshots: Vec<SessionSnapshot> = self.lock_snapshots().values().cloned().collect();
        let display = path.display().to_string();
        let result =
            tokio::task::spawn_blocking(move || saving::save_sessions(&snapshots, &path)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("could not save session snapshot {}: {}", display, e),
            Err(e) => log::warn!("session snapshot task failed: {}", e),
        }
    }

    async fn load_report_table(&self) -> Result<Option<Table>, ReportError> {
        match self.config.dashboard.source {
            ReportSource::Local => report::load_local(self.sink.export_path()),
            ReportSource::Ledger => match self.sink.ledger() {
                Some(ledger) => report::load_ledger(ledger.as_ref(), self.sink.master_tab()).await,
                None => Ok(None),
            },
        }
    }

    async fn dashboard_view(&self, reviewer: Option<&str>) -> Result<Option<DashboardView>, ReportError> {
        match self.load_report_table().await? {
            Some(table) => report::dashboard_view(&table, reviewer).map(Some),
            None => Ok(None),
        }
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let dashboard = Router::new()
        .route("/dashboard", get(serve_dashboard))
        .route("/dashboard/chart.png", get(serve_chart))
        .route("/api/dashboard", get(get_dashboard_data))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_auth::<AppState>,
        ));

    Router::new()
        .route("/", get(serve_review))
        .route("/api/review", get(get_review_state))
        .route("/api/submit", post(submit_response))
        .route("/api/answer", post(submit_answer))
        .route("/api/complete", post(complete_review))
        .route("/api/restart", post(restart_review))
        .route("/download/csv", get(download_csv))
        .route("/download/xlsx", get(download_xlsx))
        .route("/dashboard/login", get(serve_login_page).post(handle_login))
        .route("/dashboard/logout", post(handle_logout))
        .merge(dashboard)
        .nest_service("/static", ServeDir::new(&state.config.server.static_dir))
        .with_state(state)
}

/// Load the source dataset and serve until the process is stopped
pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let items: Arc<[SourceRow]> = load_source(&config.source.path)?.into();
    log::info!("loaded {} review items from {}", items.len(), config.source.path.display());

    let ledger = build_ledger(&config.ledger)?;
    let addr = config.server.bind_addr();
    let state = Arc::new(AppState::new(config, items, ledger)?);
    state.restore_snapshot();

    let app = router(state);

    let listener = TcpListener::bind(&addr).await?;
    log::info!("listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn review_page(entry: &ReviewEntry, remote_enabled: bool) -> Html<String> {
    let view = ReviewView::new(entry, remote_enabled);
    let template = if entry.session.is_complete() {
        include_str!("./static/complete.html")
    } else {
        include_str!("./static/review.html")
    };
    Html(inject_state(template, "REVIEW_STATE", &view))
}

async fn serve_review(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    match state.find_entry(&jar) {
        Some(entry) => {
            let entry = entry.lock().await;
            review_page(&entry, state.remote_enabled()).into_response()
        }
        // Nothing is stored until the first answer
        None => {
            let preview = ReviewEntry::new(state.fresh_session());
            review_page(&preview, state.remote_enabled()).into_response()
        }
    }
}

async fn get_review_state(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    match state.find_entry(&jar) {
        Some(entry) => {
            let entry = entry.lock().await;
            Json(ReviewView::new(&entry, state.remote_enabled())).into_response()
        }
        None => {
            let preview = ReviewEntry::new(state.fresh_session());
            Json(ReviewView::new(&preview, state.remote_enabled())).into_response()
        }
    }
}

/// Record one answer, returning the validation error if it was rejected
async fn record_answer(
    state: &AppState,
    entry: &SharedEntry,
    position: usize,
    agree: &str,
    revised: &str,
) -> Result<(), ValidationError> {
    let agree = agree.parse::<Agree>()?;
    {
        let mut entry = entry.lock().await;
        entry.session.submit_at(position, agree, revised)?;
        state.record_snapshot(&entry.session);
    }
    state.save_snapshot().await;
    Ok(())
}

async fn submit_response(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<SubmitForm>,
) -> Response {
    let (jar, entry) = state.entry_for(jar);
    match record_answer(&state, &entry, form.position, &form.agree, &form.revised).await {
        Ok(()) => (jar, Redirect::to("/")).into_response(),
        Err(e) => (jar, redirect_with_error("/", &e.to_string())).into_response(),
    }
}

/// JSON variant of [`submit_response`] for API clients
async fn submit_answer(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<AnswerRequest>,
) -> Response {
    let (jar, entry) = state.entry_for(jar);
    if let Err(e) =
        record_answer(&state, &entry, request.position, &request.agree, &request.revised).await
    {
        return (jar, error_response(validation_status(&e), e.to_string())).into_response();
    }

    let entry = entry.lock().await;
    (jar, Json(ReviewView::new(&entry, state.remote_enabled()))).into_response()
}

async fn complete_review(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(metadata): Form<RespondentMetadata>,
) -> Response {
    let (jar, entry) = state.entry_for(jar);
    let mut entry = entry.lock().await;
    if !entry.session.is_complete() {
        return (
            jar,
            redirect_with_error("/", "Please review every item before submitting"),
        )
            .into_response();
    }

    // Only this session waits on the ledger; snapshots and other sessions do not
    let submitted_at = Utc::now();
    let report = state
        .sink
        .persist_at(
            entry.session.responses(),
            &metadata,
            submitted_at,
            &entry.written_tabs,
        )
        .await;

    let written = report.remote.written_tabs().to_vec();
    entry.written_tabs.extend(written);
    entry.outcome = Some(PersistSummary::from(&report));
    entry.metadata = Some(metadata);
    entry.submitted_at = Some(submitted_at);
    state.record_snapshot(&entry.session);
    drop(entry);

    state.save_snapshot().await;
    (jar, Redirect::to("/")).into_response()
}

async fn restart_review(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(REVIEW_COOKIE) {
        state.forget_session(cookie.value());
        state.save_snapshot().await;
    }
    let jar = jar.remove(Cookie::build(REVIEW_COOKIE).path("/"));
    (jar, Redirect::to("/")).into_response()
}

/// Flattened batch for the caller's completed session
async fn completed_table(state: &AppState, jar: &CookieJar) -> Result<Table, Response> {
    let entry = state
        .find_entry(jar)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "No review session"))?;
    let entry = entry.lock().await;
    if !entry.session.is_complete() {
        return Err(error_response(
            StatusCode::CONFLICT,
            "Review is not complete yet",
        ));
    }
    let metadata = entry.metadata.clone().unwrap_or_default();
    let submitted_at = entry.submitted_at.unwrap_or_else(Utc::now);
    Ok(flatten(entry.session.responses(), &metadata, submitted_at))
}

fn attachment(content_type: &str, file_name: String, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        body,
    )
        .into_response()
}

async fn download_csv(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    match completed_table(&state, &jar).await {
        Ok(table) => attachment(
            "text/csv",
            format!("{}.csv", state.config.export.download_name),
            to_csv(&table).into_bytes(),
        ),
        Err(response) => response,
    }
}

async fn download_xlsx(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let table = match completed_table(&state, &jar).await {
        Ok(table) => table,
        Err(response) => return response,
    };
    match to_xlsx(&table, "Feedback") {
        Ok(bytes) => attachment(
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            format!("{}.xlsx", state.config.export.download_name),
            bytes,
        ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn serve_login_page() -> Html<&'static str> {
    Html(include_str!("./static/login.html"))
}

async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    match state.gate.login(&form.password) {
        Some(session_id) => (jar.add(session_cookie(session_id)), Redirect::to("/dashboard")).into_response(),
        None => redirect_with_error("/dashboard/login", "Incorrect password. Please try again."),
    }
}

async fn handle_logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(DASHBOARD_COOKIE) {
        state.gate.logout(cookie.value());
    }
    let jar = jar.remove(Cookie::build(DASHBOARD_COOKIE).path("/"));
    (jar, Redirect::to("/dashboard/login")).into_response()
}

#[derive(Serialize)]
struct DashboardPayload {
    available: bool,
    view: Option<DashboardView>,
}

async fn dashboard_payload(state: &AppState, reviewer: Option<&str>) -> Result<DashboardPayload, Response> {
    match state.dashboard_view(reviewer).await {
        Ok(view) => Ok(DashboardPayload {
            available: view.is_some(),
            view,
        }),
        Err(e) => {
            log::error!("dashboard data unavailable: {}", e);
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn serve_dashboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Response {
    match dashboard_payload(&state, query.reviewer.as_deref()).await {
        Ok(payload) => {
            Html(inject_state(include_str!("./static/dashboard.html"), "DASHBOARD_DATA", &payload))
                .into_response()
        }
        Err(response) => response,
    }
}

async fn get_dashboard_data(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Response {
    match dashboard_payload(&state, query.reviewer.as_deref()).await {
        Ok(payload) => Json(payload).into_response(),
        Err(response) => response,
    }
}

async fn serve_chart(State(state): State<Arc<AppState>>) -> Response {
    let view = match state.dashboard_view(None).await {
        Ok(Some(view)) => view,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "No feedback found yet"),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    // Rendering is CPU bound
    let chart = tokio::task::spawn_blocking(move || {
        create_agreement_chart(&view.by_skill, &GraphOptions::default()).map_err(|e| e.to_string())
    })
    .await;

    match chart {
        Ok(Ok(png)) => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
        Ok(Err(e)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_state_cannot_close_script() {
        let page = inject_state(
            "<html><head></head></html>",
            "STATE",
            &serde_json::json!({ "skill": "</script><b>" }),
        );
        assert!(page.contains("const STATE = {\"skill\":\"<\\/script><b>\"};"));
        assert_eq!(page.matches("</script>").count(), 1);
    }

    #[test]
    fn persist_summary_reports_local_failure() {
        let report = PersistReport {
            table: Table::new(vec!["Skill".to_string()]),
            local: Err(crate::error::LocalPersistenceError {
                path: "out.csv".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            }),
            remote: RemoteOutcome::Disabled,
        };
        let summary = PersistSummary::from(&report);
        assert!(summary.local_path.is_none());
        assert!(summary.local_error.unwrap().contains("out.csv"));
        assert_eq!(summary.remote, "disabled");
    }
}
