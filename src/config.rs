//! Application configuration
//!
//! Loaded from a `.env` file (if present) and environment variables with the
//! `SKILLS_FEEDBACK` prefix; nested values use `__` as separator, e.g.
//! `SKILLS_FEEDBACK__LEDGER__BACKEND=workbook`. Every value has a default.

use crate::error::ConfigurationError;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served under `/static`
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_path")]
    pub path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: default_source_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Local CSV artifact, overwritten by each completed session
    #[serde(default = "default_export_path")]
    pub path: PathBuf,
    /// Base name offered for downloads (extension is added)
    #[serde(default = "default_download_name")]
    pub download_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: default_export_path(),
            download_name: default_download_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_true")]
    pub require_revision: bool,
    /// Idle review sessions older than this are dropped from memory
    #[serde(default = "default_review_ttl")]
    pub session_ttl_secs: u64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            require_revision: true,
            session_ttl_secs: default_review_ttl(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    #[default]
    None,
    Workbook,
    GoogleSheets,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub backend: LedgerBackend,
    /// Directory holding one CSV file per tab for the `workbook` backend
    #[serde(default = "default_workbook_dir")]
    pub workbook_dir: PathBuf,
    #[serde(default)]
    pub spreadsheet_id: String,
    /// OAuth bearer token; obtaining it is left to the deployment
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_master_tab")]
    pub master_tab: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::None,
            workbook_dir: default_workbook_dir(),
            spreadsheet_id: String::new(),
            access_token: String::new(),
            api_base: default_api_base(),
            master_tab: default_master_tab(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    #[default]
    Local,
    Ledger,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Shared plain password, used when no hash is configured
    #[serde(default = "default_dashboard_password")]
    pub password: String,
    /// Argon2 PHC string; takes precedence over `password`
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default)]
    pub source: ReportSource,
}

impl DashboardConfig {
    /// True when the shared password was never changed from the built-in one
    pub fn uses_default_password(&self) -> bool {
        self.password_hash.is_none() && self.password == DEFAULT_DASHBOARD_PASSWORD
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            password: default_dashboard_password(),
            password_hash: None,
            session_ttl_secs: default_session_ttl(),
            source: ReportSource::Local,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotConfig {
    /// Where in-progress review sessions are saved; disabled when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_source_path() -> PathBuf {
    PathBuf::from("skills_blueprint.csv")
}

fn default_export_path() -> PathBuf {
    PathBuf::from("ai_feedback_collected.csv")
}

fn default_download_name() -> String {
    "ai_feedback_collected".to_string()
}

fn default_true() -> bool {
    true
}

fn default_workbook_dir() -> PathBuf {
    PathBuf::from("ledger")
}

fn default_api_base() -> String {
    "https://sheets.googleapis.com".to_string()
}

fn default_master_tab() -> String {
    "Master".to_string()
}

/// Dashboard password used when none is configured
pub const DEFAULT_DASHBOARD_PASSWORD: &str = "CGMA2025";

fn default_dashboard_password() -> String {
    DEFAULT_DASHBOARD_PASSWORD.to_string()
}

fn default_session_ttl() -> u64 {
    24 * 60 * 60
}

fn default_review_ttl() -> u64 {
    2 * 60 * 60
}

impl AppConfig {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> Result<Self, ConfigurationError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("SKILLS_FEEDBACK")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Check values that have no sensible fallback
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.ledger.master_tab.trim().is_empty() {
            return Err(ConfigurationError::Invalid(
                "ledger.master_tab must not be empty".to_string(),
            ));
        }
        if self.ledger.backend == LedgerBackend::GoogleSheets
            && self.ledger.spreadsheet_id.trim().is_empty()
        {
            return Err(ConfigurationError::Invalid(
                "ledger.spreadsheet_id is required for the google_sheets backend".to_string(),
            ));
        }
        if self.dashboard.source == ReportSource::Ledger
            && self.ledger.backend == LedgerBackend::None
        {
            return Err(ConfigurationError::Invalid(
                "dashboard.source = ledger needs a ledger backend".to_string(),
            ));
        }
        if self.dashboard.password_hash.is_none() && self.dashboard.password.is_empty() {
            return Err(ConfigurationError::Invalid(
                "dashboard.password must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> AppConfig {
        let mut builder = config::Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap().try_deserialize().unwrap()
    }

    #[test]
    fn empty_source_uses_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.server.bind_addr(), "127.0.0.1:3000");
        assert_eq!(config.ledger.backend, LedgerBackend::None);
        assert_eq!(config.ledger.master_tab, "Master");
        assert!(config.review.require_revision);
        assert!(config.snapshot.path.is_none());
        assert_eq!(config.review.session_ttl_secs, 7200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_password_is_detected() {
        let config = from_pairs(&[]);
        assert!(config.dashboard.uses_default_password());

        let config = from_pairs(&[("dashboard.password", "rotated")]);
        assert!(!config.dashboard.uses_default_password());

        let config = from_pairs(&[("dashboard.password_hash", "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA")]);
        assert!(!config.dashboard.uses_default_password());
    }

    #[test]
    fn nested_values_override_defaults() {
        let config = from_pairs(&[
            ("ledger.backend", "workbook"),
            ("ledger.workbook_dir", "/tmp/ledger"),
            ("review.require_revision", "false"),
            ("server.port", "8080"),
        ]);
        assert_eq!(config.ledger.backend, LedgerBackend::Workbook);
        assert_eq!(config.ledger.workbook_dir, PathBuf::from("/tmp/ledger"));
        assert!(!config.review.require_revision);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn google_sheets_needs_spreadsheet_id() {
        let config = from_pairs(&[("ledger.backend", "google_sheets")]);
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[test]
    fn ledger_report_source_needs_backend() {
        let config = from_pairs(&[("dashboard.source", "ledger")]);
        assert!(config.validate().is_err());
    }
}
