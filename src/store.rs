//! Session store: the single owner of settings, feed, history and the AI-edit session.
//!
//! Every mutation runs as one closure under the lock, then subscribers are notified through a
//! watch channel carrying the store [`Revision`].

use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::models::{AiEditSession, Output, Round, SessionView, Settings};
use crate::persistence::PersistedSession;

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub settings: Settings,
    pub feed: Vec<Round>,
    pub history: Vec<Round>,
    pub ai_edit: Option<AiEditSession>,
}

impl SessionState {
    pub fn round(&self, round_id: Uuid) -> Option<&Round> {
        self.feed.iter().find(|r| r.id == round_id)
    }

    pub fn round_mut(&mut self, round_id: Uuid) -> Option<&mut Round> {
        self.feed.iter_mut().find(|r| r.id == round_id)
    }

    pub fn output_mut(&mut self, round_id: Uuid, output_id: Uuid) -> Option<&mut Output> {
        self.round_mut(round_id)?.output_mut(output_id)
    }
}

/// Counters bumped on every mutation. `archive` only moves when feed or history may have changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revision {
    pub all: u64,
    pub archive: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Settings,
    Session,
}

pub struct SessionStore {
    state: Mutex<SessionState>,
    revision: watch::Sender<Revision>,
}

impl SessionStore {
    pub fn new(settings: Settings, persisted: PersistedSession) -> Self {
        let state = SessionState {
            settings,
            feed: persisted.feed,
            history: persisted.history,
            ai_edit: None,
        };
        let (revision, _) = watch::channel(Revision::default());
        Self { state: Mutex::new(state), revision }
    }

    pub fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&self.state.lock())
    }

    /// Applies `f` atomically. Feed and history are assumed touched.
    pub fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        self.apply(Scope::Session, f)
    }

    /// Like [`update`](Self::update), but subscribers are only notified when `f` succeeds.
    /// `f` must leave the state untouched when it fails.
    pub fn try_update<R, E>(&self, f: impl FnOnce(&mut SessionState) -> Result<R, E>) -> Result<R, E> {
        let result = f(&mut self.state.lock());
        if result.is_ok() {
            self.bump(Scope::Session);
        }
        result
    }

    /// Applies `f` to the settings only; persistence subscribers skip these.
    pub fn update_settings<R>(&self, f: impl FnOnce(&mut Settings) -> R) -> R {
        self.apply(Scope::Settings, |state| f(&mut state.settings))
    }

    /// Guarded write-back for async work: runs `f` only if the output still exists in the feed
    /// and is still on `attempt`. Returns whether it ran.
    pub fn update_output(
        &self,
        round_id: Uuid,
        output_id: Uuid,
        attempt: u32,
        f: impl FnOnce(&mut Output),
    ) -> bool {
        let applied = {
            let mut state = self.state.lock();
            match state.output_mut(round_id, output_id) {
                Some(output) if output.attempt == attempt => {
                    f(output);
                    true
                }
                _ => false,
            }
        };
        if applied {
            self.bump(Scope::Session);
        }
        applied
    }

    fn apply<R>(&self, scope: Scope, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let result = f(&mut self.state.lock());
        self.bump(scope);
        result
    }

    fn bump(&self, scope: Scope) {
        self.revision.send_modify(|rev| {
            rev.all += 1;
            if scope == Scope::Session {
                rev.archive += 1;
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Revision> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> Revision {
        *self.revision.borrow()
    }

    pub fn persisted(&self) -> PersistedSession {
        self.read(|s| PersistedSession { feed: s.feed.clone(), history: s.history.clone() })
    }

    pub fn view(&self) -> SessionView {
        let revision = self.revision().all;
        self.read(|s| SessionView {
            revision,
            settings: s.settings.clone(),
            feed: s.feed.clone(),
            ai_edit: s.ai_edit.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageState;
    use chrono::Utc;

    fn round_with_output() -> (Round, Uuid) {
        let output = Output::pending("imagen_4", "anime", "A red car");
        let output_id = output.id;
        let round = Round {
            id: Uuid::new_v4(),
            prompt: "A red car".into(),
            system_instruction: "SYS".into(),
            created_at: Utc::now(),
            output_mode: "anime".into(),
            layout: None,
            uploaded_image: None,
            outputs: vec![output],
        };
        (round, output_id)
    }

    #[test]
    fn settings_updates_do_not_move_the_archive_revision() {
        let store = SessionStore::new(Settings::default(), PersistedSession::default());
        store.update_settings(|s| s.batch_size = 5);
        assert_eq!(store.revision(), Revision { all: 1, archive: 0 });

        store.update(|s| s.feed.clear());
        assert_eq!(store.revision(), Revision { all: 2, archive: 1 });
        assert_eq!(store.read(|s| s.settings.batch_size), 5);
    }

    #[test]
    fn guarded_update_skips_missing_and_stale_targets() {
        let store = SessionStore::new(Settings::default(), PersistedSession::default());
        let (round, output_id) = round_with_output();
        let round_id = round.id;
        store.update(|s| s.feed.insert(0, round));
        let before = store.revision();

        let ready = |o: &mut Output| o.image = ImageState::Ready { data: "x".into() };
        assert!(!store.update_output(Uuid::new_v4(), output_id, 0, ready));
        assert!(!store.update_output(round_id, output_id, 7, ready));
        assert_eq!(store.revision(), before);

        assert!(store.update_output(round_id, output_id, 0, ready));
        let data = store.read(|s| s.round(round_id).unwrap().outputs[0].output_data().map(str::to_string));
        assert_eq!(data.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let store = SessionStore::new(Settings::default(), PersistedSession::default());
        let mut rx = store.subscribe();
        store.update(|s| s.history.clear());
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().archive, 1);
    }
}
