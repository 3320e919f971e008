use thiserror::Error;

/// Failure kinds surfaced to the orchestrator boundary. The sort reports
/// no partial successes: either the output file is fully sorted and
/// flushed, or the invocation fails with one of these.
#[derive(Debug, Error)]
pub enum SortError {
    /// Malformed command line: missing '/', bad parameter, bad spec token.
    #[error("{0}")]
    Argument(String),

    /// Key specification rejected at admission.
    #[error("{0}")]
    Key(String),

    /// Stat/open/copy/map/flush failure on an input or output file.
    #[error("{path}: {message}")]
    File { path: String, message: String },

    /// File size is not a multiple of the record length.
    #[error("file size ({size}) is not divisible by record length ({record_len})")]
    Alignment { size: u64, record_len: usize },

    /// Mapping, thread pool, or scratch acquisition failed.
    #[error("{0}")]
    Resource(String),
}
