/// Failures of the shared file helpers.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A file the pipeline expected on disk is absent.
    #[error("Missing file: {0}")]
    NotFound(String),

    /// Content that could not be decoded or interpreted.
    #[error("Invalid payload: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
