use thiserror::Error;

/// Error taxonomy of the export engine.
///
/// `Parse` and `Config` are raised before any group task starts and abort the
/// whole call. `Compute` and `Io` may occur inside a per-group pipeline, where
/// they are caught at the task boundary and degrade only that group's result.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Malformed genomic locus string or BED record.
    #[error("failed to parse genomic input: {0}")]
    Parse(String),

    /// Inconsistent or invalid parameters (mismatched lengths, bad bin size, ...).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Degenerate normalization total; recoverable per group.
    #[error("normalization failed: {0}")]
    Compute(String),

    /// Output format could not be inferred and was not given explicitly.
    #[error("cannot resolve output format: {0}")]
    Format(String),

    /// Unreadable input or unwritable output path.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
