//! Contracts between the session and the things it drives.
//!
//! The session never awaits anything.  Elements and adapters report back
//! through `Stamped` events that the owner feeds into
//! `PlaybackSession::handle`; the stamp is the episode the work belongs to.

use std::fmt;

use tuner_proto::config::HlsConfig;

/// Episode counter.  Bumped by every `play` and `stop`; only the current
/// value may change session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RequestVersion(u64);

impl RequestVersion {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for RequestVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The host's playable element (an mpv instance in the daemon).
///
/// All operations are fire-and-forget.  Outcomes come back as
/// `SessionEvent::Element` or `SessionEvent::PlayRejected`, stamped with the
/// version passed to the most recent `play`.
pub trait MediaElement {
    fn set_source(&mut self, url: &str);
    /// Drops the current source so nothing keeps buffering.
    fn remove_source(&mut self);
    /// Resets the element after a source change.
    fn load(&mut self);
    fn play(&mut self, version: RequestVersion);
    fn pause(&mut self);
    fn set_volume(&mut self, volume: f32);
    fn set_muted(&mut self, muted: bool);
}

/// Adapter configuration for live segmented streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentedConfig {
    pub low_latency: bool,
    pub max_manifest_retries: u32,
    pub max_level_retries: u32,
    pub back_buffer_secs: u32,
}

impl Default for SegmentedConfig {
    fn default() -> Self {
        Self {
            low_latency: true,
            max_manifest_retries: 5,
            max_level_retries: 5,
            back_buffer_secs: 60,
        }
    }
}

impl From<&HlsConfig> for SegmentedConfig {
    fn from(config: &HlsConfig) -> Self {
        Self {
            low_latency: config.low_latency,
            max_manifest_retries: config.max_manifest_retries,
            max_level_retries: config.max_level_retries,
            back_buffer_secs: config.back_buffer_secs,
        }
    }
}

/// One segmented-stream pipeline.  Lives for a single episode; `destroy`
/// must stop all of its background work.
pub trait SegmentedAdapter<E: MediaElement> {
    fn load_source(&mut self, url: &str);
    fn attach_media(&mut self, element: &E);
    /// Retry loading in place after a fatal network error.
    fn resume_load(&mut self);
    /// In-place recovery after a fatal media error.
    fn recover_media_error(&mut self);
    fn destroy(&mut self);
}

/// Builds adapters.  The version is the episode the adapter reports under.
pub trait AdapterFactory<E: MediaElement> {
    type Adapter: SegmentedAdapter<E>;

    /// When false, segmented URLs are handed to the element directly.
    fn is_supported(&self) -> bool {
        true
    }

    fn create(&mut self, config: &SegmentedConfig, version: RequestVersion) -> Self::Adapter;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementEvent {
    /// Audio is actually coming out.
    Playing,
    Paused,
    /// Buffering or stalled.
    Waiting,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    Network,
    Media,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// The playable media playlist.  The session attaches it to the element
    /// only if the episode is still current.
    ManifestParsed { level: String },
    FatalError { kind: AdapterErrorKind, details: String },
    NonFatalError { details: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Element(ElementEvent),
    Adapter(AdapterEvent),
    /// The element refused `play`.
    PlayRejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamped {
    pub version: RequestVersion,
    pub event: SessionEvent,
}

impl Stamped {
    pub fn new(version: RequestVersion, event: SessionEvent) -> Self {
        Self { version, event }
    }

    pub fn element(version: RequestVersion, event: ElementEvent) -> Self {
        Self::new(version, SessionEvent::Element(event))
    }

    pub fn adapter(version: RequestVersion, event: AdapterEvent) -> Self {
        Self::new(version, SessionEvent::Adapter(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        let v = RequestVersion::default();
        assert!(v.next() > v);
        assert_eq!(v.next().next().get(), 2);
        assert_eq!(RequestVersion::new(7).to_string(), "#7");
    }

    #[test]
    fn test_config_from_hls_section() {
        let hls = HlsConfig {
            low_latency: false,
            max_manifest_retries: 2,
            ..HlsConfig::default()
        };
        let config = SegmentedConfig::from(&hls);
        assert!(!config.low_latency);
        assert_eq!(config.max_manifest_retries, 2);
        assert_eq!(config.max_level_retries, 5);
        assert_eq!(config.back_buffer_secs, 60);
        assert_eq!(SegmentedConfig::from(&HlsConfig::default()), SegmentedConfig::default());
    }
}
