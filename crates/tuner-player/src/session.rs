//! PlaybackSession: the one "currently loading/playing" slot.
//!
//! Owns the media element, the optional segmented adapter and the
//! now-playing adapter.  `desired_playing` is what the caller asked for;
//! element events report what actually happens.  Every asynchronous result
//! arrives as a `Stamped` event and is dropped unless its version is the
//! current one, so a superseded episode can never touch the status.

use tracing::{debug, info, warn};
use tuner_proto::catalog::is_valid_stream_url;
use tuner_proto::protocol::{PlaybackStatus, Station, TransportState};

use crate::error::PlaybackError;
use crate::media::{
    AdapterErrorKind, AdapterEvent, AdapterFactory, ElementEvent, MediaElement, RequestVersion,
    SegmentedAdapter, SegmentedConfig, SessionEvent, Stamped,
};
use crate::media_session::{MediaSessionAdapter, MediaSessionHost};
use crate::stream_type::{classify, StreamType};

pub struct PlaybackSession<E, F, H>
where
    E: MediaElement,
    F: AdapterFactory<E>,
    H: MediaSessionHost,
{
    element: E,
    factory: F,
    adapter: Option<F::Adapter>,
    media_session: MediaSessionAdapter<H>,
    config: SegmentedConfig,
    status: PlaybackStatus,
    volume: f32,
    muted: bool,
    desired_playing: bool,
    version: RequestVersion,
    /// Fallback for `play` without arguments.
    bound_station: Option<Station>,
    /// URL of the live episode, if any.
    current_url: Option<String>,
    last_error: Option<PlaybackError>,
}

impl<E, F, H> PlaybackSession<E, F, H>
where
    E: MediaElement,
    F: AdapterFactory<E>,
    H: MediaSessionHost,
{
    pub fn new(
        mut element: E,
        factory: F,
        host: H,
        config: SegmentedConfig,
        volume: f32,
    ) -> Self {
        let volume = if volume.is_nan() {
            1.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        element.set_volume(volume);
        Self {
            element,
            factory,
            adapter: None,
            media_session: MediaSessionAdapter::new(host),
            config,
            status: PlaybackStatus::Idle,
            volume,
            muted: false,
            desired_playing: false,
            version: RequestVersion::default(),
            bound_station: None,
            current_url: None,
            last_error: None,
        }
    }

    pub fn bind_station(&mut self, station: Option<Station>) {
        self.bound_station = station;
    }

    /// Starts a new episode.  The URL resolves from `url`, then `station`,
    /// then the bound station.  Returns the new episode's version, or `None`
    /// when no usable URL resolved (status becomes `Idle` and nothing else
    /// changes).
    pub fn play(&mut self, url: Option<&str>, station: Option<&Station>) -> Option<RequestVersion> {
        let station = station.or(self.bound_station.as_ref()).cloned();
        let resolved = url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .or_else(|| station.as_ref().map(|s| s.stream_url.trim().to_string()))
            .unwrap_or_default();

        if !is_valid_stream_url(&resolved) {
            warn!("play: no usable stream URL ({:?})", resolved);
            self.last_error = Some(PlaybackError::InvalidUrl(resolved));
            self.set_status(PlaybackStatus::Idle);
            return None;
        }

        self.teardown();
        self.version = self.version.next();
        let version = self.version;

        self.desired_playing = true;
        self.last_error = None;
        self.set_status(PlaybackStatus::Loading);
        self.element.set_volume(self.volume);
        self.muted = false;
        self.element.set_muted(false);

        if let Some(station) = station.as_ref() {
            self.media_session.publish(station);
        }
        if station.is_some() {
            self.bound_station = station;
        }

        let kind = classify(&resolved);
        info!("play {} {:?} {}", version, kind, resolved);
        match kind {
            StreamType::Segmented if self.factory.is_supported() => {
                let mut adapter = self.factory.create(&self.config, version);
                adapter.load_source(&resolved);
                adapter.attach_media(&self.element);
                self.adapter = Some(adapter);
            }
            _ => {
                self.element.set_source(&resolved);
                self.element.play(version);
            }
        }

        self.current_url = Some(resolved);
        Some(version)
    }

    /// Ends the current episode.  Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.desired_playing = false;
        self.version = self.version.next();
        self.teardown();
        self.last_error = None;
        self.set_status(PlaybackStatus::Paused);
        self.media_session.set_transport_state(TransportState::Paused);
    }

    /// Clamps to [0, 1] and applies to the element.  NaN is ignored.
    /// Returns the stored volume so the caller can persist it.
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        if volume.is_nan() {
            return self.volume;
        }
        self.volume = volume.clamp(0.0, 1.0);
        self.element.set_volume(self.volume);
        self.volume
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.element.set_muted(muted);
    }

    /// Single entry point for everything asynchronous.
    pub fn handle(&mut self, stamped: Stamped) {
        if stamped.version != self.version {
            debug!(
                "discarding stale {:?} from episode {} (current {})",
                stamped.event, stamped.version, self.version
            );
            return;
        }

        match stamped.event {
            SessionEvent::Element(event) => self.on_element(event),
            SessionEvent::Adapter(event) => self.on_adapter(event),
            SessionEvent::PlayRejected(reason) => {
                warn!("play rejected: {}", reason);
                self.fail(PlaybackError::PlayRejected(reason));
            }
        }
    }

    fn on_element(&mut self, event: ElementEvent) {
        match event {
            ElementEvent::Playing if self.desired_playing => {
                self.last_error = None;
                self.set_status(PlaybackStatus::Playing);
                self.media_session.set_transport_state(TransportState::Playing);
            }
            ElementEvent::Paused if !self.desired_playing => {
                self.set_status(PlaybackStatus::Paused);
                self.media_session.set_transport_state(TransportState::Paused);
            }
            ElementEvent::Waiting if self.desired_playing => {
                self.set_status(PlaybackStatus::Loading);
            }
            ElementEvent::Error(details) if self.desired_playing => {
                warn!("element error: {}", details);
                self.fail(PlaybackError::MediaDecode(details));
            }
            other => debug!(
                "ignoring {:?} (desired_playing={})",
                other, self.desired_playing
            ),
        }
    }

    fn on_adapter(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::ManifestParsed { level } => {
                debug!("manifest parsed for {}: {}", self.version, level);
                self.element.set_source(&level);
                self.element.play(self.version);
            }
            AdapterEvent::FatalError { kind, details } => match kind {
                AdapterErrorKind::Network => {
                    warn!("fatal network error, resuming load: {}", details);
                    self.last_error = Some(PlaybackError::Network(details));
                    if let Some(adapter) = self.adapter.as_mut() {
                        adapter.resume_load();
                    }
                }
                AdapterErrorKind::Media => {
                    warn!("fatal media error, recovering: {}", details);
                    self.last_error = Some(PlaybackError::MediaDecode(details));
                    if let Some(adapter) = self.adapter.as_mut() {
                        adapter.recover_media_error();
                    }
                }
                AdapterErrorKind::Other => {
                    warn!("fatal stream error, stopping: {}", details);
                    self.stop();
                    self.fail(PlaybackError::FatalStream(details));
                }
            },
            AdapterEvent::NonFatalError { details } => {
                debug!("adapter non-fatal error: {}", details);
            }
        }
    }

    fn fail(&mut self, error: PlaybackError) {
        self.last_error = Some(error);
        self.set_status(PlaybackStatus::Error);
    }

    /// Synchronous: by the time this returns nothing from the old episode can
    /// produce sound.
    fn teardown(&mut self) {
        if let Some(mut adapter) = self.adapter.take() {
            adapter.destroy();
        }
        self.element.pause();
        self.element.remove_source();
        self.element.load();
        self.current_url = None;
    }

    fn set_status(&mut self, status: PlaybackStatus) {
        if self.status != status {
            info!("status {:?} → {:?}", self.status, status);
            self.status = status;
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn desired_playing(&self) -> bool {
        self.desired_playing
    }

    pub fn version(&self) -> RequestVersion {
        self.version
    }

    pub fn last_error(&self) -> Option<&PlaybackError> {
        self.last_error.as_ref()
    }

    pub fn bound_station(&self) -> Option<&Station> {
        self.bound_station.as_ref()
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    pub fn element(&self) -> &E {
        &self.element
    }

    pub fn element_mut(&mut self) -> &mut E {
        &mut self.element
    }

    pub fn adapter(&self) -> Option<&F::Adapter> {
        self.adapter.as_ref()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn media_session(&self) -> &MediaSessionAdapter<H> {
        &self.media_session
    }

    pub fn media_session_mut(&mut self) -> &mut MediaSessionAdapter<H> {
        &mut self.media_session
    }
}
