//! Retryability classification for backend errors
//!
//! Each backend provides an [`ErrorClassifier`] that answers a single question:
//! is this error transient? Backends keep their code tables as plain data and
//! the router only ever sees the neutral [`Verdict`].

/// Outcome of classifying an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Worth another attempt
    Retryable,
    /// Returned to the caller immediately
    Terminal,
}

impl Verdict {
    /// Build a verdict from a retryability flag
    pub fn from_retryable(retryable: bool) -> Self {
        if retryable {
            Verdict::Retryable
        } else {
            Verdict::Terminal
        }
    }
}

/// Decides whether a backend error is transient
pub trait ErrorClassifier<E>: Send + Sync {
    /// True when the error may succeed on another attempt
    fn is_retryable(&self, err: &E) -> bool;

    /// Classify an error
    fn verdict(&self, err: &E) -> Verdict {
        Verdict::from_retryable(self.is_retryable(err))
    }
}

impl<E, F> ErrorClassifier<E> for F
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn is_retryable(&self, err: &E) -> bool {
        self(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    #[test]
    fn test_closure_classifier() {
        let classifier: Arc<dyn ErrorClassifier<io::Error>> =
            Arc::new(|err: &io::Error| err.kind() == io::ErrorKind::TimedOut);

        assert_eq!(
            classifier.verdict(&io::Error::from(io::ErrorKind::TimedOut)),
            Verdict::Retryable
        );
        assert_eq!(
            classifier.verdict(&io::Error::from(io::ErrorKind::NotFound)),
            Verdict::Terminal
        );
    }
}
