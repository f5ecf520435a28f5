//! Segmented-stream adapter: resolves an HLS manifest to a playable level and
//! reports it to the session, which hands it to the mpv element.
//!
//! Each adapter belongs to one episode.  Loading runs in a spawned task that
//! reports back as stamped `AdapterEvent`s; `destroy` (or drop) aborts it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use m3u8_rs::Playlist;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use tuner_player::media::{
    AdapterErrorKind, AdapterEvent, AdapterFactory, MediaElement, RequestVersion,
    SegmentedAdapter, SegmentedConfig, Stamped,
};
use url::Url;

use crate::core::DaemonEvent;
use crate::mpv::MpvElement;

pub struct HlsAdapterFactory {
    client: reqwest::Client,
    retry_delay: Duration,
    event_tx: mpsc::Sender<DaemonEvent>,
}

impl HlsAdapterFactory {
    pub fn new(retry_delay: Duration, event_tx: mpsc::Sender<DaemonEvent>) -> Self {
        Self {
            client: reqwest::Client::new(),
            retry_delay,
            event_tx,
        }
    }
}

impl AdapterFactory<MpvElement> for HlsAdapterFactory {
    type Adapter = HlsAdapter;

    fn create(&mut self, config: &SegmentedConfig, version: RequestVersion) -> HlsAdapter {
        HlsAdapter {
            version,
            config: config.clone(),
            client: self.client.clone(),
            retry_delay: self.retry_delay,
            event_tx: self.event_tx.clone(),
            source: None,
            element: None,
            level: Arc::new(Mutex::new(None)),
            task: None,
        }
    }
}

pub struct HlsAdapter {
    version: RequestVersion,
    config: SegmentedConfig,
    client: reqwest::Client,
    retry_delay: Duration,
    event_tx: mpsc::Sender<DaemonEvent>,
    source: Option<String>,
    element: Option<MpvElement>,
    /// Resolved media playlist, once the manifest has been parsed.
    level: Arc<Mutex<Option<String>>>,
    task: Option<AbortHandle>,
}

impl HlsAdapter {
    /// Starts (or restarts) loading once both source and element are known.
    fn start_load(&mut self) {
        let Some(source) = self.source.clone() else {
            return;
        };
        if self.element.is_none() {
            return;
        }
        self.abort();

        let job = LoadJob {
            version: self.version,
            source,
            config: self.config.clone(),
            client: self.client.clone(),
            retry_delay: self.retry_delay,
            event_tx: self.event_tx.clone(),
            level: Arc::clone(&self.level),
        };
        self.task = Some(tokio::spawn(job.run()).abort_handle());
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl SegmentedAdapter<MpvElement> for HlsAdapter {
    fn load_source(&mut self, url: &str) {
        self.source = Some(url.to_string());
        self.start_load();
    }

    fn attach_media(&mut self, element: &MpvElement) {
        element.tune(self.config.low_latency, self.config.back_buffer_secs);
        self.element = Some(element.clone());
        self.start_load();
    }

    fn resume_load(&mut self) {
        info!("hls {}: resuming load", self.version);
        self.start_load();
    }

    fn recover_media_error(&mut self) {
        let level = self.level.lock().ok().and_then(|l| l.clone());
        if let (Some(level), Some(element)) = (level, self.element.as_mut()) {
            info!("hls {}: reloading level {}", self.version, level);
            element.remove_source();
            element.set_source(&level);
            element.play(self.version);
            return;
        }
        self.start_load();
    }

    fn destroy(&mut self) {
        debug!("hls {}: destroyed", self.version);
        self.abort();
        self.element = None;
        self.source = None;
    }
}

impl Drop for HlsAdapter {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Why a manifest load gave up.
#[derive(Debug)]
struct LoadFailure {
    kind: AdapterErrorKind,
    details: String,
}

impl LoadFailure {
    fn new(kind: AdapterErrorKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            details: details.into(),
        }
    }
}

struct LoadJob {
    version: RequestVersion,
    source: String,
    config: SegmentedConfig,
    client: reqwest::Client,
    retry_delay: Duration,
    event_tx: mpsc::Sender<DaemonEvent>,
    level: Arc<Mutex<Option<String>>>,
}

impl LoadJob {
    async fn run(self) {
        match self.resolve().await {
            Ok(level_url) => {
                if let Ok(mut level) = self.level.lock() {
                    *level = Some(level_url.clone());
                }
                info!("hls {}: level {}", self.version, level_url);
                self.emit(AdapterEvent::ManifestParsed { level: level_url }).await;
            }
            Err(failure) => {
                warn!("hls {}: {:?}: {}", self.version, failure.kind, failure.details);
                self.emit(AdapterEvent::FatalError {
                    kind: failure.kind,
                    details: failure.details,
                })
                .await;
            }
        }
    }

    async fn resolve(&self) -> Result<String, LoadFailure> {
        let manifest = self
            .fetch(&self.source, self.config.max_manifest_retries, "manifest")
            .await?;

        let (level_url, level_body) = match select_level(&self.source, &manifest)? {
            Level::Media => (self.source.clone(), manifest),
            Level::Variant(url) => {
                let body = self
                    .fetch(&url, self.config.max_level_retries, "level")
                    .await?;
                (url, body)
            }
        };

        check_media_playlist(&level_body)?;
        Ok(level_url)
    }

    /// GET with bounded retries.  Each failed attempt is reported as a
    /// non-fatal error; running out of attempts is a fatal network error.
    async fn fetch(&self, url: &str, retries: u32, what: &str) -> Result<Vec<u8>, LoadFailure> {
        let mut attempt = 0;
        loop {
            let error = match self.get(url).await {
                Ok(body) => return Ok(body),
                Err(e) => e,
            };
            if attempt >= retries {
                return Err(LoadFailure::new(
                    AdapterErrorKind::Network,
                    format!("{} load failed after {} retries: {}", what, retries, error),
                ));
            }
            attempt += 1;
            self.emit(AdapterEvent::NonFatalError {
                details: format!("{} retry {}/{}: {}", what, attempt, retries, error),
            })
            .await;
            tokio::time::sleep(self.retry_delay * attempt).await;
        }
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn emit(&self, event: AdapterEvent) {
        let stamped = Stamped::adapter(self.version, event);
        if self.event_tx.send(DaemonEvent::Session(stamped)).await.is_err() {
            debug!("hls {}: core gone", self.version);
        }
    }
}

#[derive(Debug, PartialEq)]
enum Level {
    /// The manifest is already a media playlist.
    Media,
    Variant(String),
}

/// Picks the highest-bandwidth audio-capable variant of a master playlist.
fn select_level(manifest_url: &str, body: &[u8]) -> Result<Level, LoadFailure> {
    match m3u8_rs::parse_playlist(body) {
        Ok((_, Playlist::MediaPlaylist(_))) => Ok(Level::Media),
        Ok((_, Playlist::MasterPlaylist(master))) => {
            let best = master
                .variants
                .iter()
                .filter(|v| !v.is_i_frame)
                .max_by_key(|v| v.bandwidth)
                .ok_or_else(|| {
                    LoadFailure::new(AdapterErrorKind::Other, "master playlist has no variants")
                })?;
            resolve_uri(manifest_url, &best.uri).map(Level::Variant)
        }
        Err(e) => Err(LoadFailure::new(
            AdapterErrorKind::Other,
            format!("unparseable manifest: {:?}", e),
        )),
    }
}

fn check_media_playlist(body: &[u8]) -> Result<(), LoadFailure> {
    match m3u8_rs::parse_playlist(body) {
        Ok((_, Playlist::MediaPlaylist(pl))) if !pl.segments.is_empty() => Ok(()),
        Ok((_, Playlist::MediaPlaylist(_))) => Err(LoadFailure::new(
            AdapterErrorKind::Media,
            "level playlist has no segments",
        )),
        Ok((_, Playlist::MasterPlaylist(_))) => Err(LoadFailure::new(
            AdapterErrorKind::Media,
            "variant points at another master playlist",
        )),
        Err(e) => Err(LoadFailure::new(
            AdapterErrorKind::Media,
            format!("unparseable level playlist: {:?}", e),
        )),
    }
}

fn resolve_uri(base: &str, uri: &str) -> Result<String, LoadFailure> {
    Url::parse(base)
        .and_then(|b| b.join(uri))
        .map(String::from)
        .map_err(|e| {
            LoadFailure::new(AdapterErrorKind::Other, format!("bad variant URI {uri}: {e}"))
        })
}
