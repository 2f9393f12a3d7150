//! Filesystem scan for work-session transcripts.
//!
//! Layout under the session root: one folder per project, named with the
//! project path's separators flattened to dashes (`-Users-sam-notes` for
//! `/Users/sam/notes`), each containing one `*.jsonl` transcript per
//! session. The transcript's file stem is the session id; its mtime and
//! line count drive recency and progress reporting.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// One long-running work session discovered on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Transcript file stem, typically a UUID.
    pub id: String,
    /// Decoded project path the session works in.
    pub project_path: String,
    /// Absolute path of the transcript file.
    pub transcript_path: PathBuf,
    /// Whether the transcript was written to recently.
    pub is_live: bool,
    /// Transcript mtime.
    pub last_seen: DateTime<Utc>,
    /// Number of transcript lines (messages).
    pub message_count: usize,
    /// Raw folder name the session was found under.
    pub folder_name: String,
}

/// Recover a project path from its flattened folder name.
///
/// Folder names starting with a dash encode an absolute path with `/`
/// flattened to `-`; anything else is used verbatim.
pub fn decode_project_path(folder_name: &str) -> String {
    if folder_name.starts_with('-') {
        folder_name.replace('-', "/")
    } else {
        folder_name.to_string()
    }
}

/// Scan the session root for transcripts.
///
/// A missing root is an empty host, not an error. Unreadable folders and
/// files are skipped with a debug log so one bad entry cannot sink the
/// whole scan.
pub async fn scan_sessions(
    root: &Path,
    live_window: Duration,
) -> Result<Vec<Session>, SessionError> {
    let mut folders = match tokio::fs::read_dir(root).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SessionError::ScanFailed(format!("{}: {e}", root.display()))),
    };

    let mut folder_paths = Vec::new();
    while let Ok(Some(entry)) = folders.next_entry().await {
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            folder_paths.push(entry.path());
        }
    }

    let scans = folder_paths
        .iter()
        .map(|folder| scan_folder(folder, live_window));
    let mut sessions: Vec<Session> = futures::future::join_all(scans)
        .await
        .into_iter()
        .flatten()
        .collect();

    sessions.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
    Ok(sessions)
}

async fn scan_folder(folder: &Path, live_window: Duration) -> Vec<Session> {
    let folder_name = match folder.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_string(),
        None => return Vec::new(),
    };
    let project_path = decode_project_path(&folder_name);

    let mut entries = match tokio::fs::read_dir(folder).await {
        Ok(rd) => rd,
        Err(e) => {
            tracing::debug!(folder = %folder.display(), error = %e, "Skipping unreadable folder");
            return Vec::new();
        }
    };

    let mut sessions = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let Ok(metadata) = entry.metadata().await else {
            tracing::debug!(path = %path.display(), "Skipping unreadable transcript");
            continue;
        };
        let modified = metadata.modified().ok();
        let last_seen: DateTime<Utc> = modified.map(Into::into).unwrap_or_else(Utc::now);
        let age = modified
            .and_then(|m| m.elapsed().ok())
            .unwrap_or(Duration::ZERO);

        let message_count = match tokio::fs::read(&path).await {
            Ok(raw) => raw.iter().filter(|&&b| b == b'\n').count(),
            Err(_) => 0,
        };

        sessions.push(Session {
            id: id.to_string(),
            project_path: project_path.clone(),
            transcript_path: path,
            is_live: age < live_window,
            last_seen,
            message_count,
            folder_name: folder_name.clone(),
        });
    }
    sessions
}
