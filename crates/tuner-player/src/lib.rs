//! Playback engine: the session state machine and the pieces it coordinates.
//!
//! Everything here is synchronous and free of I/O.  The daemon supplies the
//! real media element, segmented-stream adapter and now-playing host; tests
//! supply doubles implementing the same traits.

pub mod error;
pub mod media;
pub mod media_session;
pub mod session;
pub mod sleep_timer;
pub mod stream_type;

pub use error::PlaybackError;
pub use media::{
    AdapterErrorKind, AdapterEvent, AdapterFactory, ElementEvent, MediaElement, RequestVersion,
    SegmentedAdapter, SegmentedConfig, SessionEvent, Stamped,
};
pub use media_session::{MediaSessionAdapter, MediaSessionHost, TransportHandlers, UnsupportedHost};
pub use session::PlaybackSession;
pub use sleep_timer::SleepTimer;
pub use stream_type::{classify, StreamType};
