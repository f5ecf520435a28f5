use thiserror::Error;

/// Why an episode failed.  Never returned across the session boundary; the
/// session keeps the last one for display next to `PlaybackStatus::Error`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    /// Transient; the adapter retries in place.
    #[error("network error: {0}")]
    Network(String),
    #[error("media decode error: {0}")]
    MediaDecode(String),
    /// Unrecoverable stream failure.  The episode is stopped.
    #[error("stream failed: {0}")]
    FatalStream(String),
    /// The element refused to start (autoplay policy, resource unavailable).
    #[error("playback rejected: {0}")]
    PlayRejected(String),
    #[error("invalid stream URL: {0:?}")]
    InvalidUrl(String),
}
