use std::fmt;
use thiserror::Error;

/// Which of the multipart limits was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Fields,
    FieldSize,
    Files,
    FileSize,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LimitKind::Fields => "fields",
            LimitKind::FieldSize => "fieldSize",
            LimitKind::Files => "files",
            LimitKind::FileSize => "fileSize",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Limit exceeded: {0}")]
    LimitExceeded(LimitKind),

    #[error("Malformed multipart body: {0}")]
    MalformedBody(String),

    #[error("Failed to encode variant: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upstream disconnected: {0}")]
    UpstreamDisconnect(String),
}

impl UploadError {
    /// Session-fatal kinds abort the whole form; the rest stay local to one branch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            UploadError::LimitExceeded(_)
                | UploadError::MalformedBody(_)
                | UploadError::UpstreamDisconnect(_)
        )
    }

    /// Errors caused by what the client sent rather than by the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            UploadError::LimitExceeded(_) | UploadError::MalformedBody(_)
        )
    }
}

impl From<multer::Error> for UploadError {
    fn from(err: multer::Error) -> Self {
        match err {
            multer::Error::StreamReadFailed(e) => UploadError::UpstreamDisconnect(e.to_string()),
            other => UploadError::MalformedBody(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(UploadError::LimitExceeded(LimitKind::Files).is_fatal());
        assert!(UploadError::MalformedBody("bad".into()).is_fatal());
        assert!(UploadError::UpstreamDisconnect("reset".into()).is_fatal());
        assert!(!UploadError::Encode("bad pixels".into()).is_fatal());
        assert!(!UploadError::Io(std::io::Error::other("disk full")).is_fatal());
    }

    #[test]
    fn test_limit_names() {
        assert_eq!(
            UploadError::LimitExceeded(LimitKind::FieldSize).to_string(),
            "Limit exceeded: fieldSize"
        );
        assert_eq!(LimitKind::FileSize.to_string(), "fileSize");
    }
}
