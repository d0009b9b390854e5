use thiserror::Error;

/// Outcome of a DJEN source lookup/download: either bytes, or a proof that
/// the caderno does not exist. The distinction between this and a transient
/// transport failure is the whole point of the classification in §4.2.
#[derive(Debug, Clone)]
pub struct AuthoritativeAbsent {
    pub status_code: u16,
    pub reason: String,
}

impl AuthoritativeAbsent {
    pub fn new(status_code: u16, reason: impl Into<String>) -> Self {
        Self {
            status_code,
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the source client (DJEN proxy).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("authoritative absent: {0:?}")]
    Absent(AuthoritativeAbsent),

    #[error("transient source error: {0}")]
    Transient(#[from] reqwest::Error),
}

/// Errors surfaced by the archive client (Internet Archive S3 + metadata).
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive upload failed with status {status}")]
    UploadFailed { status: u16 },

    #[error("archive transport error: {0}")]
    Transport(#[from] reqwest::Error),
}
