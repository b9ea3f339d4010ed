//! Review session: sequential pagination over the source items
//!
//! A [`ReviewSession`] owns the ordered responses collected so far. Its cursor
//! is always the number of accepted responses, so it can never skip an item or
//! count one twice.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// One item to review, as loaded from the source dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRow {
    pub skill: String,
    pub ai_support: String,
    pub human_capability: String,
}

/// The respondent's verdict on a capability statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Agree {
    Yes,
    No,
}

impl FromStr for Agree {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "yes" | "y" => Ok(Agree::Yes),
            "no" | "n" => Ok(Agree::No),
            _ => Err(ValidationError::InvalidAgree(s.to_string())),
        }
    }
}

impl fmt::Display for Agree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Agree::Yes => write!(f, "Yes"),
            Agree::No => write!(f, "No"),
        }
    }
}

/// One accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub session_id: String,
    pub source_index: usize,
    pub skill: String,
    pub ai_support: String,
    pub original_human_capability: String,
    pub agree: Agree,
    /// Always empty when `agree` is `Yes`
    pub revised_human_capability: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    InProgress,
    Complete,
}

/// What the respondent should see next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentItem<'a> {
    Pending { index: usize, row: &'a SourceRow },
    Complete,
}

#[derive(Debug, Clone)]
pub struct ReviewSession {
    session_id: String,
    items: Arc<[SourceRow]>,
    responses: Vec<ResponseRecord>,
    require_revision: bool,
}

impl ReviewSession {
    /// Start a new session over `items` with a fresh random id
    pub fn new(items: Arc<[SourceRow]>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), items)
    }

    pub fn with_id(session_id: impl Into<String>, items: Arc<[SourceRow]>) -> Self {
        let session = ReviewSession {
            session_id: session_id.into(),
            items,
            responses: Vec::new(),
            require_revision: true,
        };
        log::info!(
            "review session {} started with {} items",
            session.session_id,
            session.total()
        );
        session
    }

    /// Whether disagreeing requires a non-blank revision (default `true`)
    pub fn require_revision(mut self, required: bool) -> Self {
        self.require_revision = required;
        self
    }

    /// Rebuild a session from previously accepted responses
    ///
    /// Returns `None` when the responses do not line up with `items`
    /// (wrong count, out of order, belonging to another session, or answering
    /// an item whose text has since changed).
    pub fn restore(
        session_id: impl Into<String>,
        items: Arc<[SourceRow]>,
        responses: Vec<ResponseRecord>,
    ) -> Option<Self> {
        let session_id = session_id.into();
        if responses.len() > items.len() {
            return None;
        }
        let consistent = responses
            .iter()
            .enumerate()
            .all(|(i, r)| {
                r.source_index == i
                    && r.session_id == session_id
                    && r.skill == items[i].skill
                    && r.original_human_capability == items[i].human_capability
            });
        if !consistent {
            return None;
        }
        Some(ReviewSession {
            session_id,
            items,
            responses,
            require_revision: true,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Index of the next item to review; equals the number of responses
    pub fn cursor(&self) -> usize {
        self.responses.len()
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn state(&self) -> SessionState {
        if self.cursor() >= self.total() {
            SessionState::Complete
        } else {
            SessionState::InProgress
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state() == SessionState::Complete
    }

    pub fn current(&self) -> CurrentItem<'_> {
        match self.items.get(self.cursor()) {
            Some(row) => CurrentItem::Pending {
                index: self.cursor(),
                row,
            },
            None => CurrentItem::Complete,
        }
    }

    /// Fraction of items reviewed, `0.0` for an empty source
    pub fn progress(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.cursor() as f64 / self.total() as f64
        }
    }

    pub fn responses(&self) -> &[ResponseRecord] {
        &self.responses
    }

    /// Submit a response for the current item
    pub fn submit(
        &mut self,
        agree: Agree,
        revised: &str,
    ) -> Result<&ResponseRecord, ValidationError> {
        self.submit_at(self.cursor(), agree, revised)
    }

    /// Submit a response for the item at `position`
    ///
    /// `position` is the cursor the respondent was shown. A second submit for
    /// the same position after the cursor advanced is rejected as stale, which
    /// makes a replayed form post harmless.
    pub fn submit_at(
        &mut self,
        position: usize,
        agree: Agree,
        revised: &str,
    ) -> Result<&ResponseRecord, ValidationError> {
        let cursor = self.cursor();
        let row = self
            .items
            .get(cursor)
            .ok_or(ValidationError::SessionComplete)?;

        if position != cursor {
            log::warn!(
                "session {}: rejected stale submission for item {} (current {})",
                self.session_id,
                position,
                cursor
            );
            return Err(ValidationError::StaleSubmission {
                expected: cursor,
                actual: position,
            });
        }

        let revised = revised.trim();
        let revised = match agree {
            Agree::Yes => {
                if !revised.is_empty() {
                    log::debug!(
                        "session {}: cleared revision text on agreed item {}",
                        self.session_id,
                        cursor
                    );
                }
                String::new()
            }
            Agree::No if revised.is_empty() && self.require_revision => {
                return Err(ValidationError::RevisionRequired);
            }
            Agree::No => revised.to_string(),
        };

        let record = ResponseRecord {
            session_id: self.session_id.clone(),
            source_index: cursor,
            skill: row.skill.clone(),
            ai_support: row.ai_support.clone(),
            original_human_capability: row.human_capability.clone(),
            agree,
            revised_human_capability: revised,
        };
        self.responses.push(record);

        if self.is_complete() {
            log::info!(
                "review session {} complete with {} responses",
                self.session_id,
                self.responses.len()
            );
        }

        Ok(&self.responses[cursor])
    }
}
