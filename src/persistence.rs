//! Durable `{feed, history}` state file.
//!
//! The file is rewritten atomically (temp file + rename) after every change to the feed or the
//! history. Work that was in flight when the file was written cannot be resumed, so loading
//! settles it as failed.

use std::fs;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::Round;
use crate::store::SessionStore;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PersistedSession {
    #[serde(default)]
    pub feed: Vec<Round>,
    #[serde(default)]
    pub history: Vec<Round>,
}

impl PersistedSession {
    /// Marks everything that was still generating as failed. Returns how many outputs changed.
    pub fn settle_interrupted(&mut self) -> usize {
        let mut settled = 0;
        for output in self.feed.iter_mut().chain(self.history.iter_mut()).flat_map(|r| r.outputs.iter_mut()) {
            if output.is_busy() {
                settled += 1;
            }
            output.interrupt();
        }
        settled
    }
}

pub struct SessionArchive {
    path: PathBuf,
}

impl SessionArchive {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and settles the persisted session. A missing or blank file is an empty session.
    pub fn load(&self) -> Result<PersistedSession, PersistenceError> {
        if !self.path.exists() {
            return Ok(PersistedSession::default());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(PersistedSession::default());
        }
        let mut session: PersistedSession = serde_json::from_str(&content)?;
        let settled = session.settle_interrupted();
        if settled > 0 {
            info!("Marked {} interrupted output(s) as failed", settled);
        }
        Ok(session)
    }

    pub fn save(&self, session: &PersistedSession) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_vec_pretty(session)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&content)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), rounds = session.feed.len() + session.history.len(), "Session saved");
        Ok(())
    }
}

/// Saves the store's `{feed, history}` whenever they change. Runs until aborted.
pub fn spawn_writer(archive: Arc<SessionArchive>, store: Arc<SessionStore>) -> JoinHandle<()> {
    let mut changes = store.subscribe();
    tokio::spawn(async move {
        let mut written = changes.borrow_and_update().archive;
        while changes.changed().await.is_ok() {
            let archive_rev = changes.borrow_and_update().archive;
            if archive_rev == written {
                continue;
            }
            written = archive_rev;
            let snapshot = store.persisted();
            let archive = archive.clone();
            match tokio::task::spawn_blocking(move || archive.save(&snapshot)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to persist session: {}", e),
                Err(e) => warn!("Session writer task failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaptionState, ImageState, Output, Settings};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn round(prompt: &str, outputs: Vec<Output>) -> Round {
        Round {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            system_instruction: "SYS".into(),
            created_at: Utc::now(),
            output_mode: "anime".into(),
            layout: Some("text-center".into()),
            uploaded_image: None,
            outputs,
        }
    }

    fn ready_output() -> Output {
        let mut output = Output::pending("imagen_4", "anime", "A red car");
        output.image = ImageState::Ready { data: "data:image/jpeg;base64,AA==".into() };
        output.caption = CaptionState::Ready { text: "caption".into() };
        output.total_time = Some(std::time::Duration::from_millis(1200));
        output
    }

    #[test]
    fn round_trip_keeps_rounds() {
        let dir = tempfile::tempdir().unwrap();
        let archive = SessionArchive::new(dir.path().join("state").join("session.json"));
        let r1 = round("A red car", vec![ready_output(), ready_output()]);
        let session = PersistedSession { feed: vec![r1.clone()], history: vec![] };

        archive.save(&session).unwrap();
        let loaded = archive.load().unwrap();

        assert_eq!(loaded.feed.len(), 1);
        assert_eq!(loaded.feed[0].id, r1.id);
        assert_eq!(loaded.feed[0].prompt, "A red car");
        assert_eq!(loaded.feed[0].outputs.len(), 2);
        assert_eq!(loaded, session);
    }

    #[test]
    fn busy_outputs_are_rehydrated_as_errors() {
        let dir = tempfile::tempdir().unwrap();
        let archive = SessionArchive::new(dir.path().join("session.json"));
        let session = PersistedSession {
            feed: vec![round("A red car", vec![Output::pending("imagen_4", "anime", "A red car"), ready_output()])],
            history: vec![round("Old", vec![Output::pending("imagen_4", "anime", "Old")])],
        };
        archive.save(&session).unwrap();

        let loaded = archive.load().unwrap();
        let feed_outputs = &loaded.feed[0].outputs;
        assert!(feed_outputs[0].got_error());
        assert_eq!(feed_outputs[0].caption, CaptionState::Error);
        assert_eq!(feed_outputs[1].output_data(), Some("data:image/jpeg;base64,AA=="));
        assert!(loaded.history[0].outputs[0].got_error());
        assert!(loaded.feed.iter().chain(&loaded.history).flat_map(|r| &r.outputs).all(|o| !o.is_busy()));
    }

    #[test]
    fn missing_or_blank_file_is_an_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let archive = SessionArchive::new(path.clone());
        assert_eq!(archive.load().unwrap(), PersistedSession::default());

        fs::write(&path, "  \n").unwrap();
        assert_eq!(archive.load().unwrap(), PersistedSession::default());

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(archive.load(), Err(PersistenceError::Json(_))));
    }

    #[tokio::test]
    async fn writer_persists_session_changes_only() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(SessionArchive::new(dir.path().join("session.json")));
        let store = Arc::new(SessionStore::new(Settings::default(), PersistedSession::default()));
        let writer = spawn_writer(archive.clone(), store.clone());

        store.update_settings(|s| s.batch_size = 2);
        tokio::task::yield_now().await;
        assert!(!archive.path().exists());

        let r1 = round("A red car", vec![ready_output()]);
        store.update(|s| s.feed.insert(0, r1.clone()));

        let mut saved = PersistedSession::default();
        for _ in 0..200 {
            if archive.path().exists() {
                saved = archive.load().unwrap();
                if !saved.feed.is_empty() {
                    break;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(saved.feed, vec![r1]);
        writer.abort();
    }
}
