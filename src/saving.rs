use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

use crate::review::{ResponseRecord, ReviewSession, SourceRow};

/// Persisted form of an in-progress review session
///
/// Source items are not stored; they are re-attached from the loaded dataset
/// on restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub responses: Vec<ResponseRecord>,
}

impl From<&ReviewSession> for SessionSnapshot {
    fn from(session: &ReviewSession) -> Self {
        SessionSnapshot {
            session_id: session.session_id().to_string(),
            responses: session.responses().to_vec(),
        }
    }
}

/// Write sessions to a gzip-compressed bincode file
///
/// The data goes to a uniquely named temporary file in the same directory
/// and is renamed into place, so concurrent saves never share a scratch file
/// and a crash never leaves a truncated snapshot.
pub fn save_sessions(sessions: &[SessionSnapshot], filename: &Path) -> std::io::Result<()> {
    let dir = match filename.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };

    let tmp = NamedTempFile::new_in(dir)?;
    {
        let encoder = GzEncoder::new(tmp.as_file(), Compression::default());
        let mut writer = std::io::BufWriter::new(encoder);

        serialize_into(&mut writer, sessions)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        encoder.finish()?.flush()?;
    }
    tmp.persist(filename).map_err(|e| e.error)?;
    Ok(())
}

pub fn load_sessions(filename: &Path) -> std::io::Result<Vec<SessionSnapshot>> {
    let file = File::open(filename)?;
    let decoder = GzDecoder::new(file);
    let mut reader = std::io::BufReader::new(decoder);

    let sessions: Vec<SessionSnapshot> = deserialize_from(&mut reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    Ok(sessions)
}

/// Rebuild sessions against the current source items
///
/// Snapshots that no longer line up with `items` (the source changed since
/// they were taken) are dropped with a warning.
pub fn restore_sessions(
    snapshots: Vec<SessionSnapshot>,
    items: &Arc<[SourceRow]>,
    require_revision: bool,
) -> Vec<ReviewSession> {
    snapshots
        .into_iter()
        .filter_map(|snapshot| {
            let id = snapshot.session_id.clone();
            let restored = ReviewSession::restore(snapshot.session_id, items.clone(), snapshot.responses)
                .map(|s| s.require_revision(require_revision));
            if restored.is_none() {
                log::warn!("dropping snapshot of session {}: does not match source", id);
            }
            restored
        })
        .collect()
}
