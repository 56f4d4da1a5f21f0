use serde::{Deserialize, Serialize};
use std::fmt;

/// Single structured error shape used across the pipeline layers.
///
/// Codes are namespaced by layer (`EVIDENCE_*`, `BACKEND_*`, `STORAGE_*`, `CONFIG_*`,
/// `LOG_*`). The resolver never surfaces these to end users; they drive tier transitions
/// and operator diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

/// Failure classes the pipeline reacts to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An evidence source contributes nothing; never fatal.
    EvidenceUnavailable,
    /// A model backend call failed; triggers the next fallback tier.
    BackendUnavailable,
    /// Persistence fell back to diagnostics; surfaced to operators only.
    StorageDegraded,
    /// No usable backend or unreadable configuration; fatal at startup.
    Configuration,
    Other,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new("BACKEND_UNAVAILABLE", message).with_retryable(true)
    }

    pub fn evidence_unavailable(message: impl Into<String>) -> Self {
        Self::new("EVIDENCE_UNAVAILABLE", message)
    }

    pub fn kind(&self) -> ErrorKind {
        let code = self.code.as_str();
        if code.starts_with("BACKEND_") {
            ErrorKind::BackendUnavailable
        } else if code.starts_with("EVIDENCE_") {
            ErrorKind::EvidenceUnavailable
        } else if code.starts_with("STORAGE_") {
            ErrorKind::StorageDegraded
        } else if code.starts_with("CONFIG_") {
            ErrorKind::Configuration
        } else {
            ErrorKind::Other
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "[{}] {} ({})", self.code, self.message, details),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for AppError {}
