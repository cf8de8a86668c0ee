use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{EditStep, Session, SessionError, VersionRef};
use crate::image_data::ImagePayload;

/// Holds at most one editing session and applies every transition to it.
///
/// Each mutating call validates fully before touching state, so a rejected
/// call leaves the session exactly as it was.
#[derive(Debug, Default)]
pub struct SessionStore {
    session: Option<Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh session, discarding any previous one.
    pub fn start_session(&mut self, image: ImagePayload) -> &Session {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            original: image,
            history: Vec::new(),
            current: VersionRef::Original,
            next_step_seq: 1,
        };
        self.session.insert(session)
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn append_step(
        &mut self,
        prompt: &str,
        image: ImagePayload,
    ) -> Result<&EditStep, SessionError> {
        self.append_step_at(prompt, image, Utc::now())
    }

    fn append_step_at(
        &mut self,
        prompt: &str,
        image: ImagePayload,
        now: DateTime<Utc>,
    ) -> Result<&EditStep, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NoActiveSession)?;
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SessionError::InvalidStep("prompt is empty".to_string()));
        }
        if image.is_empty() {
            return Err(SessionError::InvalidStep("image is empty".to_string()));
        }
        if image.bytes() == session.original.bytes() {
            return Err(SessionError::InvalidStep(
                "image is identical to the original".to_string(),
            ));
        }

        let timestamp = session
            .history
            .last()
            .map(|last| last.timestamp.max(now))
            .unwrap_or(now);
        let id = format!("step-{}", session.next_step_seq);
        session.next_step_seq += 1;
        let index = session.history.len();
        session.history.push(EditStep {
            id: id.clone(),
            prompt: prompt.to_string(),
            image,
            timestamp,
        });
        session.current = VersionRef::Step(id);
        Ok(&session.history[index])
    }

    pub fn select_version(&mut self, version: &VersionRef) -> Result<&Session, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NoActiveSession)?;
        if session.image_for(version).is_none() {
            return Err(SessionError::UnknownVersion(version.to_string()));
        }
        session.current = version.clone();
        Ok(session)
    }

    /// Selects whichever version stores exactly these bytes.
    pub fn select_version_by_image(&mut self, bytes: &[u8]) -> Result<&Session, SessionError> {
        let session = self.session.as_ref().ok_or(SessionError::NoActiveSession)?;
        let version = session.version_for_image(bytes).ok_or_else(|| {
            SessionError::UnknownVersion(format!("no version matches a {}-byte image", bytes.len()))
        })?;
        self.select_version(&version)
    }

    /// Drops every edit step and returns to the original. Not recoverable.
    pub fn reset_to_original(&mut self) -> Result<&Session, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NoActiveSession)?;
        session.history.clear();
        session.current = VersionRef::Original;
        Ok(session)
    }
}
