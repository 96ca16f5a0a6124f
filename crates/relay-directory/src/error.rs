//! Error types for the directory layer.

/// Errors a [`DirectoryStore`](crate::DirectoryStore) can report.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The named user has never logged in.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// The backing store could not serve the request.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}
