//! Test doubles for the element, adapter and now-playing host.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tuner_player::media::{
    AdapterFactory, MediaElement, RequestVersion, SegmentedAdapter, SegmentedConfig,
};
use tuner_player::media_session::{MediaSessionError, MediaSessionHost};
use tuner_player::PlaybackSession;
use tuner_proto::protocol::{NowPlaying, Station, TransportAction, TransportState};

#[derive(Debug, Clone, PartialEq)]
pub enum ElementOp {
    SetSource(String),
    RemoveSource,
    Load,
    Play(RequestVersion),
    Pause,
    Volume(f32),
    Muted(bool),
}

#[derive(Debug, Default)]
pub struct FakeElement {
    pub ops: Vec<ElementOp>,
}

impl FakeElement {
    pub fn plays(&self) -> Vec<RequestVersion> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                ElementOp::Play(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    pub fn last_volume(&self) -> Option<f32> {
        self.ops.iter().rev().find_map(|op| match op {
            ElementOp::Volume(v) => Some(*v),
            _ => None,
        })
    }
}

impl MediaElement for FakeElement {
    fn set_source(&mut self, url: &str) {
        self.ops.push(ElementOp::SetSource(url.to_string()));
    }

    fn remove_source(&mut self) {
        self.ops.push(ElementOp::RemoveSource);
    }

    fn load(&mut self) {
        self.ops.push(ElementOp::Load);
    }

    fn play(&mut self, version: RequestVersion) {
        self.ops.push(ElementOp::Play(version));
    }

    fn pause(&mut self) {
        self.ops.push(ElementOp::Pause);
    }

    fn set_volume(&mut self, volume: f32) {
        self.ops.push(ElementOp::Volume(volume));
    }

    fn set_muted(&mut self, muted: bool) {
        self.ops.push(ElementOp::Muted(muted));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    Created(RequestVersion, SegmentedConfig),
    LoadSource(RequestVersion, String),
    Attach(RequestVersion),
    ResumeLoad(RequestVersion),
    RecoverMedia(RequestVersion),
    Destroy(RequestVersion),
}

/// Adapter calls outlive the adapter, so they go to a shared log.
#[derive(Debug, Clone, Default)]
pub struct AdapterLog(pub Arc<Mutex<Vec<AdapterCall>>>);

impl AdapterLog {
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.0.lock().unwrap().clone()
    }

    fn push(&self, call: AdapterCall) {
        self.0.lock().unwrap().push(call);
    }
}

pub struct FakeAdapter {
    version: RequestVersion,
    log: AdapterLog,
}

impl SegmentedAdapter<FakeElement> for FakeAdapter {
    fn load_source(&mut self, url: &str) {
        self.log
            .push(AdapterCall::LoadSource(self.version, url.to_string()));
    }

    fn attach_media(&mut self, _element: &FakeElement) {
        self.log.push(AdapterCall::Attach(self.version));
    }

    fn resume_load(&mut self) {
        self.log.push(AdapterCall::ResumeLoad(self.version));
    }

    fn recover_media_error(&mut self) {
        self.log.push(AdapterCall::RecoverMedia(self.version));
    }

    fn destroy(&mut self) {
        self.log.push(AdapterCall::Destroy(self.version));
    }
}

pub struct FakeFactory {
    pub supported: bool,
    pub log: AdapterLog,
}

impl AdapterFactory<FakeElement> for FakeFactory {
    type Adapter = FakeAdapter;

    fn is_supported(&self) -> bool {
        self.supported
    }

    fn create(&mut self, config: &SegmentedConfig, version: RequestVersion) -> FakeAdapter {
        self.log.push(AdapterCall::Created(version, config.clone()));
        FakeAdapter {
            version,
            log: self.log.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingHost {
    pub metadata: Vec<NowPlaying>,
    pub states: Vec<TransportState>,
    pub actions: Vec<TransportAction>,
}

impl MediaSessionHost for RecordingHost {
    fn set_metadata(&mut self, metadata: NowPlaying) -> Result<(), MediaSessionError> {
        self.metadata.push(metadata);
        Ok(())
    }

    fn set_playback_state(&mut self, state: TransportState) -> Result<(), MediaSessionError> {
        self.states.push(state);
        Ok(())
    }

    fn set_action_handler(
        &mut self,
        action: TransportAction,
        _enabled: bool,
    ) -> Result<(), MediaSessionError> {
        self.actions.push(action);
        Ok(())
    }
}

pub type TestSession = PlaybackSession<FakeElement, FakeFactory, RecordingHost>;

pub fn session() -> (TestSession, AdapterLog) {
    session_with_support(true)
}

pub fn session_with_support(supported: bool) -> (TestSession, AdapterLog) {
    let log = AdapterLog::default();
    let factory = FakeFactory {
        supported,
        log: log.clone(),
    };
    let session = PlaybackSession::new(
        FakeElement::default(),
        factory,
        RecordingHost::default(),
        SegmentedConfig::default(),
        0.5,
    );
    (session, log)
}

pub fn station(id: &str, url: &str) -> Station {
    Station {
        id: id.to_string(),
        name: format!("Station {id}"),
        stream_url: url.to_string(),
        ..Station::default()
    }
}
