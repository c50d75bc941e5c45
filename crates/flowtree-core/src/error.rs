use thiserror::Error;

/// Core error type for the Flowtree hierarchy engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A referenced flow node does not exist
    #[error("Flow node not found: {0}")]
    NotFound(String),

    /// A move would make a node its own ancestor
    #[error("Cycle error: cannot place {node} under {target}")]
    Cycle {
        /// Node being moved
        node: String,
        /// Requested new parent
        target: String,
    },

    /// Optimistic check failed while committing a batch; the caller may retry
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Non-cascading delete of a node that still has children
    #[error("Flow node has children: {0}")]
    HasChildren(String),

    /// Invalid input (empty name, unknown type or status, bad identifier)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A structural invariant is broken in stored data
    #[error("Structural corruption: {0}")]
    StructuralCorruption(String),

    /// Backend storage failure
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl CoreError {
    /// Whether repeating the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::ConcurrentModification(_))
    }

    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Cycle { .. } => "CYCLE",
            CoreError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            CoreError::HasChildren(_) => "HAS_CHILDREN",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::StructuralCorruption(_) => "STRUCTURAL_CORRUPTION",
            CoreError::StateStoreError(_) => "STATE_STORE_ERROR",
            CoreError::SerializationError(_) => "SERIALIZATION_ERROR",
            CoreError::ConfigurationError(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}
