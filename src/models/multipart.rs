//! Represents multipart upload sessions and parts.
//!
//! The row types (`MultipartUpload`, `MultipartPart`) are what the local store
//! persists in SQLite. `UploadSession` is the client-side view the uploader
//! drives through its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// A multipart upload session, initiated before uploading large files in parts.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartUpload {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Bucket the object will land in.
    pub bucket: String,

    /// Object key being uploaded.
    pub key: String,

    /// Unique upload ID (returned to client).
    pub upload_id: String,

    /// Content type recorded at creation and applied on completion.
    pub content_type: Option<String>,

    /// Timestamp when upload was initiated.
    pub initiated_at: DateTime<Utc>,
}

/// Represents a single uploaded part in a multipart upload session.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartPart {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Reference to parent upload session.
    pub upload_id: Uuid,

    /// Part number (1-based).
    pub part_number: i32,

    /// Size in bytes.
    pub size_bytes: i64,

    /// ETag hash for this part.
    pub etag: String,

    /// Timestamp when this part was uploaded.
    pub uploaded_at: DateTime<Utc>,
}

/// Completion token for one part, as handed back to the store on finalize.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

impl CompletedPart {
    pub fn new(part_number: i32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}

/// Byte range of the source file that one part covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartRange {
    pub part_number: i32,
    pub offset: u64,
    pub len: u64,
}

impl PartRange {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    SessionOpen,
    PartsUploading,
    Finalizing,
    Done,
    Aborting,
    Aborted,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (NotStarted, SessionOpen)
                | (SessionOpen, PartsUploading)
                | (PartsUploading, Finalizing)
                | (Finalizing, Done)
                | (SessionOpen, Aborting)
                | (PartsUploading, Aborting)
                | (Finalizing, Aborting)
                | (Aborting, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Aborted)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("illegal session transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: SessionState,
        to: SessionState,
    },
    #[error("part {0} was recorded twice")]
    DuplicatePart(i32),
    #[error("part list is incomplete: expected parts 1..={expected}, got {found} parts")]
    IncompleteParts { expected: usize, found: usize },
    #[error("part list has a gap at part {0}")]
    PartGap(i32),
}

/// One in-progress multipart upload as seen by the uploader.
///
/// Parts may be recorded in any order; `begin_finalize` hands back the list
/// sorted by part number and refuses to proceed if any number in `1..=N` is
/// missing.
#[derive(Debug, Clone)]
pub struct UploadSession {
    session_id: String,
    object_key: String,
    parts: Vec<CompletedPart>,
    state: SessionState,
}

impl UploadSession {
    pub fn new(object_key: impl Into<String>) -> Self {
        Self {
            session_id: String::new(),
            object_key: object_key.into(),
            parts: Vec::new(),
            state: SessionState::NotStarted,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(key = %self.object_key, from = ?self.state, to = ?next, "session transition");
        self.state = next;
        Ok(())
    }

    /// Bind the store-issued session id.
    pub fn open(&mut self, session_id: impl Into<String>) -> Result<(), SessionError> {
        self.transition(SessionState::SessionOpen)?;
        self.session_id = session_id.into();
        Ok(())
    }

    pub fn begin_parts(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::PartsUploading)
    }

    pub fn record_part(&mut self, part: CompletedPart) -> Result<(), SessionError> {
        if self.state != SessionState::PartsUploading {
            return Err(SessionError::IllegalTransition {
                from: self.state,
                to: SessionState::PartsUploading,
            });
        }
        if self
            .parts
            .iter()
            .any(|existing| existing.part_number == part.part_number)
        {
            return Err(SessionError::DuplicatePart(part.part_number));
        }
        self.parts.push(part);
        Ok(())
    }

    /// Move to `Finalizing` and return the parts sorted ascending.
    pub fn begin_finalize(&mut self, expected: usize) -> Result<Vec<CompletedPart>, SessionError> {
        if self.parts.len() != expected {
            return Err(SessionError::IncompleteParts {
                expected,
                found: self.parts.len(),
            });
        }
        let mut sorted = self.parts.clone();
        sorted.sort_by_key(|part| part.part_number);
        for (idx, part) in sorted.iter().enumerate() {
            let want = idx as i32 + 1;
            if part.part_number != want {
                return Err(SessionError::PartGap(want));
            }
        }
        self.transition(SessionState::Finalizing)?;
        Ok(sorted)
    }

    pub fn finish(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Done)
    }

    pub fn begin_abort(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Aborting)
    }

    pub fn mark_aborted(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Aborted)
    }
}
