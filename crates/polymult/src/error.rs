//! Error type for planning and allocation failures.
//!
//! Kernels are pure compute and cannot fail; every error is raised before
//! the first output write, so a failed call never leaves partial results.

/// Error type for polymult calls.
#[derive(Debug, thiserror::Error)]
pub enum PolymultError {
    /// Illegal option combination or malformed request.
    #[error("configuration error: {0}")]
    Config(String),

    /// A preprocessed polynomial does not match the call it is used in.
    #[error("preprocessed poly mismatch: {0}")]
    PreprocessMismatch(String),

    /// Scratch or table allocation failed.
    #[error("resource error: {0}")]
    Resource(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PolymultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_detail() {
        let err = PolymultError::Config("circular with a high tail".into());
        assert!(err.to_string().contains("circular with a high tail"));
        let err = PolymultError::PreprocessMismatch("other size 5 != 7".into());
        assert!(err.to_string().starts_with("preprocessed poly mismatch"));
    }
}
