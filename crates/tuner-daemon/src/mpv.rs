/// mpv-backed media element.
///
/// Architecture:
///
/// ```text
///   MpvElement (Clone, sync)  ── ElementOp ──►  element_worker task
///                                                  │  owns MpvDriver + MpvHandle
///                                                  ├── writer_task ← MpvRequest → socket
///                                                  └── reader_task → responses / MpvEvent
///   element_worker ── DaemonEvent::Session(Stamped) / MpvHealth ──► DaemonCore
/// ```
///
/// The session talks to `MpvElement` synchronously; each call becomes an
/// `ElementOp` that the worker executes in order against mpv's JSON IPC.
/// mpv is spawned lazily on the first `play`.  Property changes and
/// `end-file`/`playback-restart` events are translated by `MpvObserver` and
/// stamped with the episode that issued the last `play`.
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use tuner_player::media::{ElementEvent, MediaElement, RequestVersion, SessionEvent, Stamped};
use tuner_proto::protocol::MpvHealth;

use crate::core::DaemonEvent;

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;
pub const OBS_PAUSED_FOR_CACHE: u64 = 3;

/// Rough bytes per second of a 128 kbit/s stream, for sizing the back buffer.
const BACK_BUFFER_BYTES_PER_SEC: u64 = 16 * 1024;
/// mpv's own `demuxer-max-back-bytes` default (50 MiB).
const DEFAULT_BACK_BUFFER_BYTES: u64 = 50 * 1024 * 1024;

// ── internal channel types ────────────────────────────────────────────────────

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "playback-restart".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_stream(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        let vol_pct = (vol * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn set_mute(&self, muted: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "mute", muted])).await?;
        Ok(())
    }

    /// Stream settings for segmented live playback.
    pub async fn tune(&self, low_latency: bool, back_buffer_secs: u32) {
        if low_latency {
            if let Err(e) = self.send(json!(["apply-profile", "low-latency"])).await {
                warn!("mpv: low-latency profile unavailable: {}", e);
            }
        }
        let bytes = u64::from(back_buffer_secs) * BACK_BUFFER_BYTES_PER_SEC;
        if let Err(e) = self
            .send(json!(["set_property", "demuxer-max-back-bytes", bytes]))
            .await
        {
            warn!("mpv: failed to set back buffer: {}", e);
        }
    }

    /// Undoes `tune` so progressive streams get mpv's defaults back.
    pub async fn untune(&self) {
        if let Err(e) = self
            .send(json!(["apply-profile", "low-latency", "restore"]))
            .await
        {
            debug!("mpv: low-latency profile not restored: {}", e);
        }
        if let Err(e) = self
            .send(json!([
                "set_property",
                "demuxer-max-back-bytes",
                DEFAULT_BACK_BUFFER_BYTES
            ]))
            .await
        {
            warn!("mpv: failed to reset back buffer: {}", e);
        }
    }

    /// Register observe_property for everything `MpvObserver` needs.
    /// Must be called after every fresh connection.
    pub async fn observe_all_properties(&self) {
        let props = [
            (OBS_CORE_IDLE, "core-idle"),
            (OBS_PAUSE, "pause"),
            (OBS_PAUSED_FOR_CACHE, "paused-for-cache"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    binary: Option<PathBuf>,
    process: Option<tokio::process::Child>,
    pub last_volume: f32,
}

impl MpvDriver {
    pub fn new(volume: f32, binary: Option<PathBuf>) -> Self {
        Self {
            socket_name: tuner_proto::platform::mpv_socket_name(),
            binary,
            process: None,
            last_volume: volume,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn command(&self) -> anyhow::Result<tokio::process::Command> {
        let mpv_binary = match &self.binary {
            Some(path) if !path.exists() => anyhow::bail!("mpv binary {:?} not found", path),
            Some(path) => path.clone(),
            None => tuner_proto::platform::find_mpv_binary()
                .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?,
        };

        let vol_arg = format!(
            "--volume={}",
            (self.last_volume * 100.0).clamp(0.0, 100.0).round() as i64
        );
        let mut cmd = tokio::process::Command::new(mpv_binary);
        cmd.arg("--no-video")
            .arg("--idle=yes")
            .arg(tuner_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        Ok(cmd)
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let mut command = self.command()?;
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        info!("mpv: spawning new process");
        self.process = Some(command.spawn()?);

        // Wait for socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let mut command = self.command()?;
        self.kill().await;

        info!("mpv: spawning new process");
        self.process = Some(command.spawn()?);

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── observer ──────────────────────────────────────────────────────────────────

/// Turns mpv's push events into element events for the current episode.
#[derive(Debug, Default)]
pub struct MpvObserver {
    core_idle: Option<bool>,
    paused: bool,
    buffering: bool,
    last: Option<ElementEvent>,
}

impl MpvObserver {
    /// New episode: forget what the previous file reported.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn observe(&mut self, event: &MpvEvent) -> Option<ElementEvent> {
        let derived = if let Some((id, data)) = event.as_property_change() {
            match id {
                OBS_CORE_IDLE => {
                    self.core_idle = data.as_bool();
                    self.derive()
                }
                OBS_PAUSE => {
                    self.paused = data.as_bool().unwrap_or(false);
                    self.derive()
                }
                OBS_PAUSED_FOR_CACHE => {
                    self.buffering = data.as_bool().unwrap_or(false);
                    self.derive()
                }
                _ => None,
            }
        } else {
            match event.event_name()? {
                "playback-restart" if !self.paused => {
                    self.core_idle = Some(false);
                    Some(ElementEvent::Playing)
                }
                "end-file" => match event.raw.get("reason").and_then(Value::as_str) {
                    Some("error") => Some(ElementEvent::Error(
                        event
                            .raw
                            .get("file_error")
                            .and_then(Value::as_str)
                            .unwrap_or("playback failed")
                            .to_string(),
                    )),
                    // A live stream has no natural end; EOF means the server hung up.
                    Some("eof") => Some(ElementEvent::Error("stream ended".to_string())),
                    _ => None,
                },
                _ => None,
            }
        }?;

        if self.last.as_ref() == Some(&derived) {
            return None;
        }
        self.last = Some(derived.clone());
        Some(derived)
    }

    fn derive(&self) -> Option<ElementEvent> {
        if self.paused {
            return Some(ElementEvent::Paused);
        }
        if self.buffering {
            return Some(ElementEvent::Waiting);
        }
        match self.core_idle? {
            false => Some(ElementEvent::Playing),
            true => Some(ElementEvent::Waiting),
        }
    }
}

// ── element ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ElementOp {
    SetSource(String),
    RemoveSource,
    Load,
    Play(RequestVersion),
    Pause,
    Volume(f32),
    Muted(bool),
    Tune { low_latency: bool, back_buffer_secs: u32 },
    Heartbeat,
    Shutdown,
}

/// `MediaElement` backed by an mpv worker task.  Cloning shares the worker.
#[derive(Clone)]
pub struct MpvElement {
    ops_tx: mpsc::UnboundedSender<ElementOp>,
}

impl MpvElement {
    /// Spawns the worker.  mpv itself is started on the first `play`.
    pub fn spawn(
        volume: f32,
        binary: Option<PathBuf>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let worker = ElementWorker::new(MpvDriver::new(volume, binary), event_tx);
        tokio::spawn(worker.run(ops_rx));
        Self { ops_tx }
    }

    /// Applies segmented-stream settings before the next load.
    pub fn tune(&self, low_latency: bool, back_buffer_secs: u32) {
        self.send(ElementOp::Tune {
            low_latency,
            back_buffer_secs,
        });
    }

    pub fn heartbeat(&self) {
        self.send(ElementOp::Heartbeat);
    }

    pub fn shutdown(&self) {
        self.send(ElementOp::Shutdown);
    }

    fn send(&self, op: ElementOp) {
        if self.ops_tx.send(op).is_err() {
            warn!("mpv element: worker gone, op dropped");
        }
    }
}

impl MediaElement for MpvElement {
    fn set_source(&mut self, url: &str) {
        self.send(ElementOp::SetSource(url.to_string()));
    }

    fn remove_source(&mut self) {
        self.send(ElementOp::RemoveSource);
    }

    fn load(&mut self) {
        self.send(ElementOp::Load);
    }

    fn play(&mut self, version: RequestVersion) {
        self.send(ElementOp::Play(version));
    }

    fn pause(&mut self) {
        self.send(ElementOp::Pause);
    }

    fn set_volume(&mut self, volume: f32) {
        self.send(ElementOp::Volume(volume));
    }

    fn set_muted(&mut self, muted: bool) {
        self.send(ElementOp::Muted(muted));
    }
}

struct ElementWorker {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    mpv_events: Option<mpsc::Receiver<MpvEvent>>,
    /// Source set by the session or adapter, not yet loaded.
    source: Option<String>,
    /// Source mpv currently has loaded.
    loaded: Option<String>,
    /// Episode that issued the last `play`; stamps every element event.
    episode: Option<RequestVersion>,
    observer: MpvObserver,
    /// Segmented-stream settings are applied to the running mpv.
    tuned: bool,
    event_tx: mpsc::Sender<DaemonEvent>,
}

impl ElementWorker {
    fn new(driver: MpvDriver, event_tx: mpsc::Sender<DaemonEvent>) -> Self {
        Self {
            driver,
            handle: None,
            mpv_events: None,
            source: None,
            loaded: None,
            episode: None,
            observer: MpvObserver::default(),
            tuned: false,
            event_tx,
        }
    }

    async fn run(mut self, mut ops_rx: mpsc::UnboundedReceiver<ElementOp>) {
        loop {
            tokio::select! {
                op = ops_rx.recv() => match op {
                    Some(ElementOp::Shutdown) | None => break,
                    Some(op) => self.apply(op).await,
                },
                Some(evt) = recv_event(&mut self.mpv_events) => self.on_mpv_event(evt).await,
            }
        }
        self.driver.kill().await;
        debug!("mpv element: worker exiting");
    }

    async fn apply(&mut self, op: ElementOp) {
        debug!("mpv element: {:?}", op);
        match op {
            ElementOp::SetSource(url) => self.source = Some(url),
            ElementOp::RemoveSource => {
                self.source = None;
                if self.loaded.take().is_some() {
                    if let Some(handle) = &self.handle {
                        if let Err(e) = handle.stop().await {
                            warn!("mpv: stop failed: {}", e);
                        }
                    }
                }
            }
            // mpv resets its demuxer on `stop`; only the tuning outlives it.
            ElementOp::Load => {
                if std::mem::take(&mut self.tuned) {
                    if let Some(handle) = &self.handle {
                        handle.untune().await;
                    }
                }
            }
            ElementOp::Play(version) => {
                if self.episode != Some(version) {
                    self.episode = Some(version);
                    self.observer.reset();
                }
                if let Err(e) = self.start(version).await {
                    warn!("mpv: play {} failed: {}", version, e);
                    self.emit(Stamped::new(
                        version,
                        SessionEvent::PlayRejected(e.to_string()),
                    ))
                    .await;
                }
            }
            ElementOp::Pause => {
                if let Some(handle) = &self.handle {
                    if let Err(e) = handle.set_pause(true).await {
                        debug!("mpv: pause failed: {}", e);
                    }
                }
            }
            ElementOp::Volume(volume) => {
                self.driver.last_volume = volume;
                if let Some(handle) = &self.handle {
                    if let Err(e) = handle.set_volume(volume).await {
                        warn!("mpv: set volume failed: {}", e);
                    }
                }
            }
            ElementOp::Muted(muted) => {
                if let Some(handle) = &self.handle {
                    if let Err(e) = handle.set_mute(muted).await {
                        warn!("mpv: set mute failed: {}", e);
                    }
                }
            }
            ElementOp::Tune {
                low_latency,
                back_buffer_secs,
            } => {
                if let Ok(handle) = self.connect().await {
                    handle.tune(low_latency, back_buffer_secs).await;
                    self.tuned = true;
                }
            }
            ElementOp::Heartbeat => self.check_alive().await,
            ElementOp::Shutdown => {}
        }
    }

    async fn start(&mut self, version: RequestVersion) -> anyhow::Result<()> {
        let handle = self.connect().await?;
        match self.source.clone() {
            Some(url) if self.loaded.as_deref() != Some(url.as_str()) => {
                info!("mpv: loading {} for {}", url, version);
                handle.load_stream(&url).await?;
                handle.set_volume(self.driver.last_volume).await?;
                self.loaded = Some(url);
            }
            Some(_) => {}
            None => anyhow::bail!("no source set"),
        }
        handle.set_pause(false).await?;
        Ok(())
    }

    /// Returns a live handle, spawning mpv when needed.
    async fn connect(&mut self) -> anyhow::Result<MpvHandle> {
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }

        self.set_health(MpvHealth::Starting).await;
        let (tx, rx) = mpsc::channel(256);
        match self.driver.spawn_and_connect(tx).await {
            Ok(handle) => {
                handle.observe_all_properties().await;
                self.handle = Some(handle.clone());
                self.mpv_events = Some(rx);
                self.loaded = None;
                self.tuned = false;
                self.set_health(MpvHealth::Running).await;
                Ok(handle)
            }
            Err(e) => {
                self.set_health(MpvHealth::Dead).await;
                Err(e)
            }
        }
    }

    async fn check_alive(&mut self) {
        if self.handle.is_none() || self.driver.process_alive() {
            return;
        }
        warn!("mpv element: heartbeat: mpv process died");
        self.handle = None;
        self.mpv_events = None;
        self.loaded = None;
        self.tuned = false;
        self.set_health(MpvHealth::Dead).await;
        if let Some(version) = self.episode {
            self.emit(Stamped::element(
                version,
                ElementEvent::Error("mpv exited".to_string()),
            ))
            .await;
        }
    }

    async fn on_mpv_event(&mut self, evt: MpvEvent) {
        let Some(version) = self.episode else {
            return;
        };
        if let Some(event) = self.observer.observe(&evt) {
            debug!("mpv element: {:?} for {}", event, version);
            self.emit(Stamped::element(version, event)).await;
        }
    }

    async fn emit(&self, stamped: Stamped) {
        if self.event_tx.send(DaemonEvent::Session(stamped)).await.is_err() {
            debug!("mpv element: core gone");
        }
    }

    async fn set_health(&self, health: MpvHealth) {
        let _ = self.event_tx.send(DaemonEvent::MpvHealth(health)).await;
    }
}

/// Pending forever while mpv is not connected, so `select!` ignores it.
async fn recv_event(rx: &mut Option<mpsc::Receiver<MpvEvent>>) -> Option<MpvEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(id: u64, data: Value) -> MpvEvent {
        MpvEvent {
            raw: json!({"event": "property-change", "id": id, "data": data}),
        }
    }

    fn event(raw: Value) -> MpvEvent {
        MpvEvent { raw }
    }

    #[test]
    fn test_observer_maps_lifecycle() {
        let mut obs = MpvObserver::default();
        assert_eq!(obs.observe(&prop(OBS_PAUSE, json!(false))), None);
        assert_eq!(
            obs.observe(&prop(OBS_CORE_IDLE, json!(true))),
            Some(ElementEvent::Waiting)
        );
        assert_eq!(
            obs.observe(&prop(OBS_CORE_IDLE, json!(false))),
            Some(ElementEvent::Playing)
        );
        assert_eq!(
            obs.observe(&prop(OBS_PAUSED_FOR_CACHE, json!(true))),
            Some(ElementEvent::Waiting)
        );
        assert_eq!(
            obs.observe(&prop(OBS_PAUSED_FOR_CACHE, json!(false))),
            Some(ElementEvent::Playing)
        );
        assert_eq!(
            obs.observe(&prop(OBS_PAUSE, json!(true))),
            Some(ElementEvent::Paused)
        );
    }

    #[test]
    fn test_observer_suppresses_repeats() {
        let mut obs = MpvObserver::default();
        assert_eq!(
            obs.observe(&prop(OBS_CORE_IDLE, json!(false))),
            Some(ElementEvent::Playing)
        );
        assert_eq!(
            obs.observe(&event(json!({"event": "playback-restart"}))),
            None
        );
        obs.reset();
        assert_eq!(
            obs.observe(&event(json!({"event": "playback-restart"}))),
            Some(ElementEvent::Playing)
        );
    }

    #[test]
    fn test_observer_end_file_reasons() {
        let mut obs = MpvObserver::default();
        assert_eq!(
            obs.observe(&event(json!({"event": "end-file", "reason": "stop"}))),
            None
        );
        assert_eq!(
            obs.observe(&event(
                json!({"event": "end-file", "reason": "error", "file_error": "loading failed"})
            )),
            Some(ElementEvent::Error("loading failed".to_string()))
        );
        obs.reset();
        assert_eq!(
            obs.observe(&event(json!({"event": "end-file", "reason": "eof"}))),
            Some(ElementEvent::Error("stream ended".to_string()))
        );
    }

    #[test]
    fn test_property_change_parsing() {
        let evt = prop(OBS_CORE_IDLE, json!(true));
        assert_eq!(evt.as_property_change(), Some((OBS_CORE_IDLE, &json!(true))));
        assert_eq!(evt.event_name(), Some("property-change"));
        assert!(event(json!({"event": "idle"})).as_property_change().is_none());
    }

    /// Worker wired to an in-memory mpv that acknowledges every request and
    /// reports the commands it saw.
    fn worker_with_fake_mpv() -> (ElementWorker, mpsc::UnboundedReceiver<Value>) {
        let (ours, theirs) = tokio::io::duplex(16 * 1024);
        let (read_half, write_half) = tokio::io::split(ours);
        let (mpv_tx, _) = mpsc::channel(8);
        let (event_tx, _) = mpsc::channel(8);
        let mut worker = ElementWorker::new(MpvDriver::new(0.5, None), event_tx);
        worker.handle = Some(start_io_tasks(read_half, write_half, mpv_tx));

        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (theirs_read, mut theirs_write) = tokio::io::split(theirs);
            let mut lines = BufReader::new(theirs_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let reply = json!({"request_id": request["request_id"], "error": "success"});
                let _ = seen_tx.send(request["command"].clone());
                theirs_write
                    .write_all(format!("{}\n", reply).as_bytes())
                    .await
                    .unwrap();
            }
        });
        (worker, seen_rx)
    }

    #[tokio::test]
    async fn test_segmented_tuning_reverted_on_teardown() {
        let (mut worker, mut seen) = worker_with_fake_mpv();

        worker
            .apply(ElementOp::Tune {
                low_latency: true,
                back_buffer_secs: 60,
            })
            .await;
        assert_eq!(seen.recv().await, Some(json!(["apply-profile", "low-latency"])));
        assert_eq!(
            seen.recv().await,
            Some(json!([
                "set_property",
                "demuxer-max-back-bytes",
                60 * BACK_BUFFER_BYTES_PER_SEC
            ]))
        );

        worker.apply(ElementOp::Load).await;
        assert_eq!(
            seen.recv().await,
            Some(json!(["apply-profile", "low-latency", "restore"]))
        );
        assert_eq!(
            seen.recv().await,
            Some(json!([
                "set_property",
                "demuxer-max-back-bytes",
                DEFAULT_BACK_BUFFER_BYTES
            ]))
        );

        // next teardown has nothing left to undo
        worker.apply(ElementOp::Load).await;
        assert!(seen.try_recv().is_err());
    }
}
