//! Crate error taxonomy.
//!
//! Reconcilers classify every failure so the error policy can decide between
//! backoff-and-retry and wait-for-edit. Only [`Error::Validation`] is
//! terminal: the object cannot make progress until its spec changes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The spec is malformed or asks for something impossible. Terminal
    /// until the object is edited.
    #[error("validation error: {0}")]
    Validation(String),

    /// Template substitution or manifest decoding failed.
    #[error("render error: {0}")]
    Render(String),

    /// The git provider rejected our credentials.
    #[error("authentication error: {0}")]
    Auth(String),

    /// A transient network or filesystem failure; retrying may succeed.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// A git subprocess failed.
    #[error("git error: {0}")]
    Git(String),

    /// The Kubernetes apiserver returned an error.
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Terminal errors are not requeued; the controller waits for a spec
    /// edit instead of burning retries on an unfixable object.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Stable label for the error counter metric.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Render(_) => "render",
            Error::Auth(_) => "auth",
            Error::TransientIo(_) => "transient_io",
            Error::Git(_) => "git",
            Error::Kube(_) => "kube",
            Error::Serialization(_) => "serialization",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::TransientIo(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_is_terminal() {
        assert!(Error::Validation("bad spec".to_string()).is_terminal());
        assert!(!Error::Render("bad template".to_string()).is_terminal());
        assert!(!Error::Auth("denied".to_string()).is_terminal());
        assert!(!Error::TransientIo("timeout".to_string()).is_terminal());
        assert!(!Error::Git("push failed".to_string()).is_terminal());
    }

    #[test]
    fn metric_labels_are_distinct() {
        let labels = [
            Error::Validation(String::new()).metric_label(),
            Error::Render(String::new()).metric_label(),
            Error::Auth(String::new()).metric_label(),
            Error::TransientIo(String::new()).metric_label(),
            Error::Git(String::new()).metric_label(),
        ];
        let unique: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }

    #[test]
    fn io_errors_classify_as_transient() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout").into();
        assert!(matches!(err, Error::TransientIo(_)));
        assert!(!err.is_terminal());
    }
}
