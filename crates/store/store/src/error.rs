use thiserror::Error;

/// Errors from store operations.
///
/// `ConditionalCheckFailed` is the create-vs-overwrite conflict signal: a
/// `put` with `overwrite = false` found an existing row. It is the only
/// variant callers branch on; the rest are reported and fail the current
/// target.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The addressed row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional put found the key already present.
    #[error("conditional check failed for {0}")]
    ConditionalCheckFailed(String),

    /// A persisted row could not be interpreted.
    #[error("invalid item: {0}")]
    InvalidItem(String),

    /// Marshalling to or from the persisted representation failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend could not be reached or returned a service error.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            StoreError::NotFound("schedule biz".into()).to_string(),
            "not found: schedule biz"
        );
        assert_eq!(
            StoreError::ConditionalCheckFailed("key".into()).to_string(),
            "conditional check failed for key"
        );
        assert!(
            StoreError::Unavailable("timed out".into())
                .to_string()
                .contains("timed out")
        );
    }
}
