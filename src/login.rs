#![cfg(not(tarpaulin_include))]
#![cfg(feature = "web")]

use crate::config::DashboardConfig;
use crate::error::ConfigurationError;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Name of the cookie carrying the dashboard session id
pub const DASHBOARD_COOKIE: &str = "dashboard_session";

/// Dashboard session data
#[derive(Debug, Clone)]
pub struct Session {
    /// Time when the session expires
    pub expires_at: SystemTime,
}

/// Password gate in front of the feedback dashboard
///
/// Holds an Argon2 hash of the shared dashboard password and the set of
/// live sessions. A plain password from configuration is hashed once at
/// startup so every check goes through the same verifier.
pub struct DashboardGate {
    password_hash: String,
    session_ttl: Duration,
    sessions: RwLock<HashMap<String, Session>>,
}

impl DashboardGate {
    pub fn new(config: &DashboardConfig) -> Result<Self, ConfigurationError> {
        if config.uses_default_password() {
            log::warn!(
                "dashboard is protected by the built-in default password; set SKILLS_FEEDBACK__DASHBOARD__PASSWORD or SKILLS_FEEDBACK__DASHBOARD__PASSWORD_HASH"
            );
        }
        let password_hash = match &config.password_hash {
            Some(hash) => {
                PasswordHash::new(hash).map_err(|e| {
                    ConfigurationError::Invalid(format!("dashboard.password_hash: {}", e))
                })?;
                hash.clone()
            }
            None => hash_password(&config.password).map_err(ConfigurationError::Invalid)?,
        };

        Ok(DashboardGate {
            password_hash,
            session_ttl: Duration::from_secs(config.session_ttl_secs),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Check a password and open a session; returns the session id
    pub fn login(&self, password: &str) -> Option<String> {
        if password.is_empty() || !verify_password(password, &self.password_hash) {
            log::warn!("dashboard login rejected");
            return None;
        }
        let session_id = Uuid::new_v4().to_string();
        let session = Session {
            expires_at: SystemTime::now() + self.session_ttl,
        };
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        // Forget expired sessions while we hold the lock
        let now = SystemTime::now();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(session_id.clone(), session);
        log::info!("dashboard session opened");
        Some(session_id)
    }

    /// Whether a session id is known and not expired
    pub fn validate(&self, session_id: &str) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(session_id)
            .is_some_and(|s| s.expires_at > SystemTime::now())
    }

    pub fn logout(&self, session_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
    }
}

/// Hash a password using Argon2
///
/// # Errors
/// * Returns an error if the password hashing fails
pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    match argon2.hash_password(password.as_bytes(), &salt) {
        Ok(hash) => Ok(hash.to_string()),
        Err(_) => Err("Password hashing failed".to_string()),
    }
}

/// Verify a password against a stored hash
///
/// An unparsable hash never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Anything that owns a [`DashboardGate`]
pub trait HasDashboardGate {
    fn dashboard_gate(&self) -> &DashboardGate;
}

/// Authentication middleware for dashboard routes
///
/// Passes the request through when the session cookie is valid, otherwise
/// redirects to the dashboard login page.
pub async fn require_auth<S>(
    State(state): State<Arc<S>>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response
where
    S: HasDashboardGate + Send + Sync + 'static,
{
    if let Some(cookie) = jar.get(DASHBOARD_COOKIE) {
        if state.dashboard_gate().validate(cookie.value()) {
            return next.run(request).await;
        }
    }
    Redirect::to("/dashboard/login").into_response()
}

/// Cookie carrying a freshly opened dashboard session
pub fn session_cookie(session_id: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(DASHBOARD_COOKIE, session_id);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie
}
