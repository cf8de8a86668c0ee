mod store;

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::image_data::ImagePayload;

pub use store::SessionStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no active session; start one with a new image first")]
    NoActiveSession,
    #[error("invalid edit step: {0}")]
    InvalidStep(String),
    #[error("unknown version: {0}")]
    UnknownVersion(String),
}

/// Reference to one displayable version of a session: the original upload
/// or a history entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionRef {
    Original,
    Step(String),
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRef::Original => f.write_str("original"),
            VersionRef::Step(id) => f.write_str(id),
        }
    }
}

/// One completed edit. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditStep {
    pub id: String,
    pub prompt: String,
    pub image: ImagePayload,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    original: ImagePayload,
    history: Vec<EditStep>,
    current: VersionRef,
    next_step_seq: u64,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn original_image(&self) -> &ImagePayload {
        &self.original
    }

    pub fn history(&self) -> &[EditStep] {
        &self.history
    }

    pub fn current_version(&self) -> &VersionRef {
        &self.current
    }

    /// Resolves the current version. `current` only ever names the original
    /// or a step still in `history`.
    pub fn current_image(&self) -> &ImagePayload {
        match &self.current {
            VersionRef::Original => &self.original,
            VersionRef::Step(id) => self
                .step(id)
                .map(|step| &step.image)
                .unwrap_or(&self.original),
        }
    }

    pub fn is_at_original(&self) -> bool {
        self.current == VersionRef::Original
    }

    pub fn step(&self, id: &str) -> Option<&EditStep> {
        self.history.iter().find(|step| step.id == id)
    }

    /// Image for a version, if the version belongs to this session.
    pub fn image_for(&self, version: &VersionRef) -> Option<&ImagePayload> {
        match version {
            VersionRef::Original => Some(&self.original),
            VersionRef::Step(id) => self.step(id).map(|step| &step.image),
        }
    }

    /// Finds which version holds exactly these bytes. The original wins over
    /// any history entry, then the oldest matching step.
    pub fn version_for_image(&self, bytes: &[u8]) -> Option<VersionRef> {
        if self.original.bytes() == bytes {
            return Some(VersionRef::Original);
        }
        self.history
            .iter()
            .find(|step| step.image.bytes() == bytes)
            .map(|step| VersionRef::Step(step.id.clone()))
    }
}
