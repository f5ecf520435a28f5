//! Now-playing metadata and transport buttons on the host's lock screen.
//!
//! Best effort only: every host failure is logged and dropped.

use thiserror::Error;
use tracing::{debug, warn};
use tuner_proto::protocol::{Artwork, NowPlaying, Station, TransportAction, TransportState};

pub const ARTIST: &str = "Radio Player";
pub const FALLBACK_ALBUM: &str = "Internet radio";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaSessionError {
    #[error("media session not supported by host")]
    Unsupported,
    #[error("host rejected {0}")]
    Rejected(String),
}

/// The host's now-playing surface.
pub trait MediaSessionHost {
    fn set_metadata(&mut self, metadata: NowPlaying) -> Result<(), MediaSessionError>;
    fn set_playback_state(&mut self, state: TransportState) -> Result<(), MediaSessionError>;
    /// Enables or disables a transport button.  Presses come back through
    /// `MediaSessionAdapter::dispatch`.
    fn set_action_handler(
        &mut self,
        action: TransportAction,
        enabled: bool,
    ) -> Result<(), MediaSessionError>;
}

/// Host without a now-playing surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedHost;

impl MediaSessionHost for UnsupportedHost {
    fn set_metadata(&mut self, _metadata: NowPlaying) -> Result<(), MediaSessionError> {
        Err(MediaSessionError::Unsupported)
    }

    fn set_playback_state(&mut self, _state: TransportState) -> Result<(), MediaSessionError> {
        Err(MediaSessionError::Unsupported)
    }

    fn set_action_handler(
        &mut self,
        _action: TransportAction,
        _enabled: bool,
    ) -> Result<(), MediaSessionError> {
        Err(MediaSessionError::Unsupported)
    }
}

pub type Handler = Box<dyn FnMut() + Send>;

pub struct TransportHandlers {
    pub play: Handler,
    pub pause: Handler,
    pub stop: Handler,
    pub next: Handler,
    pub prev: Handler,
}

impl TransportHandlers {
    fn get_mut(&mut self, action: TransportAction) -> &mut Handler {
        match action {
            TransportAction::Play => &mut self.play,
            TransportAction::Pause => &mut self.pause,
            TransportAction::Stop => &mut self.stop,
            TransportAction::NextTrack => &mut self.next,
            TransportAction::PreviousTrack => &mut self.prev,
        }
    }
}

pub struct MediaSessionAdapter<H> {
    host: H,
    handlers: Option<TransportHandlers>,
}

impl<H: MediaSessionHost> MediaSessionAdapter<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            handlers: None,
        }
    }

    pub fn publish(&mut self, station: &Station) {
        let result = self.host.set_metadata(now_playing(station));
        report("metadata", result);
    }

    pub fn set_transport_state(&mut self, state: TransportState) {
        let result = self.host.set_playback_state(state);
        report("playback state", result);
    }

    /// Registers all five transport buttons.  A second call replaces the
    /// previous handlers.
    pub fn bind_handlers(&mut self, handlers: TransportHandlers) {
        for action in TransportAction::ALL {
            let result = self.host.set_action_handler(action, true);
            report("action handler", result);
        }
        self.handlers = Some(handlers);
    }

    /// Runs the handler for a host button press.  Returns false when nothing
    /// is bound.
    pub fn dispatch(&mut self, action: TransportAction) -> bool {
        match self.handlers.as_mut() {
            Some(handlers) => {
                (handlers.get_mut(action))();
                true
            }
            None => {
                debug!("media session: {:?} pressed with no handlers bound", action);
                false
            }
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}

fn report(what: &str, result: Result<(), MediaSessionError>) {
    match result {
        Ok(()) => {}
        Err(MediaSessionError::Unsupported) => {
            debug!("media session: {} skipped, host unsupported", what)
        }
        Err(e) => warn!("media session: {} failed: {}", what, e),
    }
}

pub fn now_playing(station: &Station) -> NowPlaying {
    let album = if station.tags.is_empty() {
        FALLBACK_ALBUM.to_string()
    } else {
        station.tags.join(", ")
    };
    let artwork = station
        .cover_url
        .iter()
        .map(|src| Artwork {
            src: src.clone(),
            sizes: "512x512".to_string(),
            mime_type: "image/jpeg".to_string(),
        })
        .collect();

    NowPlaying {
        title: station.name.clone(),
        artist: ARTIST.to_string(),
        album,
        artwork,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        metadata: Vec<NowPlaying>,
        enabled: Vec<TransportAction>,
        fail_with: Option<MediaSessionError>,
    }

    impl MediaSessionHost for Recorder {
        fn set_metadata(&mut self, metadata: NowPlaying) -> Result<(), MediaSessionError> {
            if let Some(e) = self.fail_with.clone() {
                return Err(e);
            }
            self.metadata.push(metadata);
            Ok(())
        }

        fn set_playback_state(&mut self, _state: TransportState) -> Result<(), MediaSessionError> {
            Ok(())
        }

        fn set_action_handler(
            &mut self,
            action: TransportAction,
            _enabled: bool,
        ) -> Result<(), MediaSessionError> {
            self.enabled.push(action);
            Ok(())
        }
    }

    fn handlers(log: Arc<Mutex<Vec<&'static str>>>) -> TransportHandlers {
        let push = |name: &'static str| -> Handler {
            let log = Arc::clone(&log);
            Box::new(move || log.lock().unwrap().push(name))
        };
        TransportHandlers {
            play: push("play"),
            pause: push("pause"),
            stop: push("stop"),
            next: push("next"),
            prev: push("prev"),
        }
    }

    #[test]
    fn test_metadata_shape() {
        let station = Station {
            name: "Synthwave".into(),
            cover_url: Some("https://img.example/c.jpg".into()),
            tags: vec!["synth".into(), "retro".into()],
            ..Station::default()
        };
        let md = now_playing(&station);
        assert_eq!(md.title, "Synthwave");
        assert_eq!(md.artist, "Radio Player");
        assert_eq!(md.album, "synth, retro");
        assert_eq!(md.artwork.len(), 1);
        assert_eq!(md.artwork[0].sizes, "512x512");
        assert_eq!(md.artwork[0].mime_type, "image/jpeg");

        let bare = now_playing(&Station::default());
        assert_eq!(bare.album, "Internet radio");
        assert!(bare.artwork.is_empty());
    }

    #[test]
    fn test_dispatch_routes_to_bound_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut adapter = MediaSessionAdapter::new(Recorder::default());
        assert!(!adapter.dispatch(TransportAction::Play));

        adapter.bind_handlers(handlers(Arc::clone(&log)));
        assert_eq!(adapter.host().enabled.len(), 5);
        assert!(adapter.dispatch(TransportAction::NextTrack));
        assert!(adapter.dispatch(TransportAction::Stop));
        assert_eq!(*log.lock().unwrap(), vec!["next", "stop"]);
    }

    #[test]
    fn test_host_failures_are_swallowed() {
        let mut adapter = MediaSessionAdapter::new(Recorder {
            fail_with: Some(MediaSessionError::Rejected("metadata".into())),
            ..Recorder::default()
        });
        adapter.publish(&Station::default());
        assert!(adapter.host().metadata.is_empty());

        let mut unsupported = MediaSessionAdapter::new(UnsupportedHost);
        unsupported.publish(&Station::default());
        unsupported.set_transport_state(TransportState::Playing);
        unsupported.bind_handlers(handlers(Arc::new(Mutex::new(Vec::new()))));
        assert!(unsupported.dispatch(TransportAction::Pause));
    }
}
