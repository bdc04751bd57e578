use palaver_storage::StorageError;
use snafu::Snafu;

/// Failure taxonomy for the conversation engine. Every collaborator failure
/// is caught at a component boundary and surfaced as one of these; none of
/// them is fatal to the process.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    /// Rejected before any I/O: empty message body, missing party id, or no
    /// signed-in user.
    #[snafu(display("validation failed at {stage}: {reason}"))]
    Validation {
        stage: &'static str,
        reason: &'static str,
    },
    /// Transport failure while loading a timeline. Recoverable by retry;
    /// previously loaded messages stay untouched.
    #[snafu(display("timeline load failed: {source}"))]
    TimelineUnavailable {
        stage: &'static str,
        source: StorageError,
    },
    /// Transport failure while persisting a send. The message is not
    /// appended locally.
    #[snafu(display("message send failed: {source}"))]
    SendFailed {
        stage: &'static str,
        source: StorageError,
    },
    /// Transport failure during directory search; degrades to "no results".
    #[snafu(display("directory search failed: {source}"))]
    DirectorySearchFailed {
        stage: &'static str,
        source: StorageError,
    },
    /// The in-memory recency order advanced but the persisted copy lags.
    #[snafu(display("recency persistence failed: {source}"))]
    RecencyPersistFailed {
        stage: &'static str,
        source: StorageError,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;
