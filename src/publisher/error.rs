use std::{backtrace::Backtrace, fmt, sync::Arc};

use thiserror::Error;

/// Reason a publish operation was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IllegalState {
    #[error("an ingestion is in progress")]
    IngestionInProgress,

    #[error("subject closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubjectError {
    #[error("Illegal state: {0}")]
    IllegalState(#[from] IllegalState),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl SubjectError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SubjectError::IllegalState(IllegalState::IngestionInProgress) => {
                "ingestion_in_progress"
            }
            SubjectError::IllegalState(IllegalState::Closed) => "closed",
            SubjectError::Unsupported(_) => "unsupported_operation",
        }
    }
}

/// An error delivered to listeners, optionally with the trace captured by the
/// publisher.
///
/// Error events are data: they never terminate the subject or the listener
/// stream. Equality only looks at the error payload.
pub struct ErrorEvent<E> {
    error: E,
    trace: Option<Arc<Backtrace>>,
}

impl<E> ErrorEvent<E> {
    pub fn new(error: E) -> Self {
        ErrorEvent { error, trace: None }
    }

    pub fn with_trace(error: E, trace: Backtrace) -> Self {
        ErrorEvent {
            error,
            trace: Some(Arc::new(trace)),
        }
    }

    pub fn error(&self) -> &E {
        &self.error
    }

    pub fn trace(&self) -> Option<&Backtrace> {
        self.trace.as_deref()
    }

    pub fn into_error(self) -> E {
        self.error
    }
}

impl<E: Clone> Clone for ErrorEvent<E> {
    fn clone(&self) -> Self {
        ErrorEvent {
            error: self.error.clone(),
            trace: self.trace.clone(),
        }
    }
}

impl<E: PartialEq> PartialEq for ErrorEvent<E> {
    fn eq(&self, other: &Self) -> bool {
        self.error == other.error
    }
}

impl<E: fmt::Debug> fmt::Debug for ErrorEvent<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorEvent")
            .field("error", &self.error)
            .field("has_trace", &self.trace.is_some())
            .finish()
    }
}

impl<E: fmt::Display> fmt::Display for ErrorEvent<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ErrorEvent<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(
            SubjectError::from(IllegalState::IngestionInProgress).as_label(),
            "ingestion_in_progress"
        );
        assert_eq!(SubjectError::from(IllegalState::Closed).as_label(), "closed");
        assert_eq!(
            SubjectError::Unsupported("pause").as_label(),
            "unsupported_operation"
        );
    }

    #[test]
    fn test_error_event_ignores_trace_for_equality() {
        let plain = ErrorEvent::new("boom");
        let traced = ErrorEvent::with_trace("boom", Backtrace::disabled());

        assert_eq!(plain, traced);
        assert!(plain.trace().is_none());
        assert!(traced.trace().is_some());
        assert_eq!(traced.to_string(), "boom");
    }
}
