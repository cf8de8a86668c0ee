use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use nanoedit_contracts::events::{image_fields, EventPayload, EventWriter};
use nanoedit_contracts::image_data::ImagePayload;
use nanoedit_contracts::session::{EditStep, Session, SessionError, SessionStore, VersionRef};
use serde_json::{json, Value};
use thiserror::Error;

use crate::map_object;
use crate::requester::{EditOutcome, EditRequester};

#[derive(Debug, Error)]
pub enum EditError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("an edit is already in progress")]
    EditInFlight,
    #[error("the session was replaced before the edit finished; result discarded")]
    SessionReplaced,
    #[error("{message}")]
    Capability {
        message: String,
        commentary: Option<String>,
    },
}

/// A successful edit after it has been appended to history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEdit {
    pub session_id: String,
    pub step: EditStep,
    pub commentary: String,
}

/// The session store wired to an edit requester, with one edit in flight at a
/// time.
///
/// The store lock is never held across the capability call, so reads and
/// navigation stay available while an edit is outstanding.
pub struct EditWorkspace {
    store: Mutex<SessionStore>,
    in_flight: AtomicBool,
    requester: EditRequester,
    events: EventWriter,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl EditWorkspace {
    pub fn new(requester: EditRequester, events: EventWriter) -> Self {
        Self {
            store: Mutex::new(SessionStore::new()),
            in_flight: AtomicBool::new(false),
            requester,
            events,
        }
    }

    pub fn requester(&self) -> &EditRequester {
        &self.requester
    }

    pub fn event_writer(&self) -> EventWriter {
        self.events.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn start_session(&self, image: ImagePayload) -> Session {
        let mut fields = image_fields("original", &image);
        let session = self.lock_store().start_session(image).clone();
        fields.insert(
            "session_id".to_string(),
            Value::String(session.id().to_string()),
        );
        self.record("session_started", fields);
        session
    }

    pub fn current_session(&self) -> Option<Session> {
        self.lock_store().current_session().cloned()
    }

    /// Borrows the session under the store lock instead of cloning it.
    pub fn with_session<R>(&self, read: impl FnOnce(Option<&Session>) -> R) -> R {
        read(self.lock_store().current_session())
    }

    pub fn current_image(&self) -> Result<ImagePayload, EditError> {
        self.with_session(|session| {
            session
                .map(|session| session.current_image().clone())
                .ok_or(EditError::Session(SessionError::NoActiveSession))
        })
    }

    /// Requests an edit of the current image and, on success, appends it as
    /// the new current version. Failures leave the session untouched.
    pub fn submit_prompt(&self, prompt: &str) -> Result<AppliedEdit, EditError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SessionError::InvalidStep("prompt is empty".to_string()).into());
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EditError::EditInFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let (session_id, base_version, base_image) = self.with_session(|session| {
            session
                .map(|session| {
                    (
                        session.id().to_string(),
                        session.current_version().clone(),
                        session.current_image().clone(),
                    )
                })
                .ok_or(SessionError::NoActiveSession)
        })?;

        let mut requested = image_fields("base", &base_image);
        requested.extend(map_object(json!({
            "session_id": session_id,
            "prompt": prompt,
            "base_version": base_version.to_string(),
            "provider": self.requester.provider_name(),
            "model": self.requester.model(),
        })));
        self.record("edit_requested", requested);

        let started = Instant::now();
        let outcome = self.requester.request_edit(&base_image, prompt);
        let latency_ms = started.elapsed().as_millis() as u64;

        let (image, commentary) = match outcome {
            EditOutcome::Success { image, commentary } => (image, commentary),
            EditOutcome::Failure {
                message,
                commentary,
            } => {
                self.record_failure(&session_id, &message, latency_ms);
                return Err(EditError::Capability {
                    message,
                    commentary,
                });
            }
        };

        let appended = {
            let mut store = self.lock_store();
            let still_active = store
                .current_session()
                .map(|session| session.id() == session_id)
                .unwrap_or(false);
            if still_active {
                match store.append_step(prompt, image) {
                    Ok(step) => {
                        let step = step.clone();
                        let history_len = store
                            .current_session()
                            .map(|session| session.history().len())
                            .unwrap_or(0);
                        Ok((step, history_len))
                    }
                    Err(err) => Err(EditError::from(err)),
                }
            } else {
                Err(EditError::SessionReplaced)
            }
        };
        let (step, history_len) = match appended {
            Ok(appended) => appended,
            Err(err) => {
                self.record_failure(&session_id, &err.to_string(), latency_ms);
                return Err(err);
            }
        };

        let mut succeeded = image_fields("result", &step.image);
        succeeded.extend(map_object(json!({
            "session_id": session_id,
            "step_id": step.id,
            "history_len": history_len,
            "commentary_chars": commentary.chars().count(),
            "latency_ms": latency_ms,
        })));
        self.record("edit_succeeded", succeeded);
        Ok(AppliedEdit {
            session_id,
            step,
            commentary,
        })
    }

    pub fn select_version(&self, version: &VersionRef) -> Result<Session, EditError> {
        let session = self.lock_store().select_version(version)?.clone();
        self.record_selection(&session);
        Ok(session)
    }

    pub fn select_version_by_image(&self, bytes: &[u8]) -> Result<Session, EditError> {
        let session = self.lock_store().select_version_by_image(bytes)?.clone();
        self.record_selection(&session);
        Ok(session)
    }

    pub fn reset_to_original(&self) -> Result<Session, EditError> {
        let (discarded, session) = {
            let mut store = self.lock_store();
            let discarded = store
                .current_session()
                .map(|session| session.history().len())
                .unwrap_or(0);
            (discarded, store.reset_to_original()?.clone())
        };
        self.record(
            "session_reset",
            map_object(json!({
                "session_id": session.id(),
                "discarded_steps": discarded,
            })),
        );
        Ok(session)
    }

    /// Store transitions validate before they mutate, so a poisoned lock
    /// still guards a consistent store.
    fn lock_store(&self) -> MutexGuard<'_, SessionStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_selection(&self, session: &Session) {
        self.record(
            "version_selected",
            map_object(json!({
                "session_id": session.id(),
                "version": session.current_version().to_string(),
            })),
        );
    }

    fn record_failure(&self, session_id: &str, message: &str, latency_ms: u64) {
        self.record(
            "edit_failed",
            map_object(json!({
                "session_id": session_id,
                "error": message,
                "latency_ms": latency_ms,
            })),
        );
    }

    fn record(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("nanoedit: failed to write {event_type} event: {err:#}");
        }
    }
}
