//! Error types for knn-graph.

use thiserror::Error;

/// Errors that can occur while building, searching or maintaining a k-nn graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KnnError {
    /// Malformed configuration (k = 0, rho/delta/speedup out of range, ...).
    ///
    /// Always detected eagerly, before any similarity is computed.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A node with the same key is already present in the graph.
    #[error("duplicate node: {0}")]
    DuplicateNode(String),

    /// The referenced node key is not present in the graph.
    #[error("node not found: {0}")]
    NotFound(String),

    /// A local-join worker panicked; the whole round was aborted.
    #[error("worker failure in round {round}: {message}")]
    WorkerFailure { round: usize, message: String },
}

impl KnnError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        KnnError::InvalidParameter(msg.into())
    }

    pub(crate) fn duplicate<K: std::fmt::Debug>(key: &K) -> Self {
        KnnError::DuplicateNode(format!("{key:?}"))
    }

    pub(crate) fn not_found<K: std::fmt::Debug>(key: &K) -> Self {
        KnnError::NotFound(format!("{key:?}"))
    }

    /// Turn a caught panic payload into a `WorkerFailure`.
    pub(crate) fn from_panic(round: usize, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "worker panicked".to_string()
        };
        KnnError::WorkerFailure { round, message }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KnnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            KnnError::invalid("k must be at least 1").to_string(),
            "invalid parameter: k must be at least 1"
        );
        assert_eq!(KnnError::duplicate(&7u32).to_string(), "duplicate node: 7");
        assert_eq!(
            KnnError::not_found(&"a").to_string(),
            "node not found: \"a\""
        );
    }

    #[test]
    fn test_from_panic_payloads() {
        let err = KnnError::from_panic(3, Box::new("boom"));
        assert_eq!(
            err,
            KnnError::WorkerFailure {
                round: 3,
                message: "boom".into()
            }
        );

        let err = KnnError::from_panic(1, Box::new(String::from("owned")));
        assert!(err.to_string().contains("owned"));

        let err = KnnError::from_panic(2, Box::new(42u8));
        assert!(err.to_string().contains("worker panicked"));
    }
}
