/// DaemonCore — single-owner event loop for all mutable state.
///
/// Every task that needs to touch playback sends a `DaemonEvent` here:
/// client commands (TCP, HTTP, transport buttons), stamped element/adapter
/// events, sleep-timer events and the heartbeat.  DaemonCore owns the
/// `PlaybackSession` and `SleepTimer` exclusively, so the only race left is
/// the one the session's version check already handles.
///
/// After each event that changes state, DaemonCore broadcasts
/// `BroadcastMessage::StateUpdated` to all listeners.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tuner_player::media::{SegmentedConfig, Stamped};
use tuner_player::media_session::{Handler, TransportHandlers};
use tuner_player::sleep_timer::{SleepTimer, TimerUpdate};
use tuner_player::PlaybackSession;
use tuner_proto::catalog::{CatalogError, Direction};
use tuner_proto::config::Config;
use tuner_proto::protocol::{Command, ExportFilter, MpvHealth, Station, StationDraft};
use tuner_proto::state::StateManager;
use tuner_proto::transfer;

use crate::hls::HlsAdapterFactory;
use crate::host::BroadcastHost;
use crate::mpv::MpvElement;
use crate::timer::{SleepTimerTasks, TimerEvent};
use crate::BroadcastMessage;

type Session = PlaybackSession<MpvElement, HlsAdapterFactory, BroadcastHost>;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
/// Volume `ToggleMute` returns to from silence.
const UNMUTE_VOLUME: f32 = 0.5;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket client, the HTTP API or a transport button.
    ClientCommand(Command),
    /// Element or adapter callback, stamped with its episode.
    Session(Stamped),
    SleepTimer(TimerEvent),
    MpvHealth(MpvHealth),
    /// Heartbeat — check mpv liveness.
    HeartbeatTick,
    /// Shutdown requested.
    Shutdown,
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore {
    config: Config,
    state_manager: Arc<StateManager>,
    session: Session,
    /// Second handle on the session's element, for heartbeat and shutdown.
    element: MpvElement,
    timer: SleepTimer,
    timer_tasks: SleepTimerTasks,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl DaemonCore {
    pub async fn new(
        config: Config,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> anyhow::Result<Self> {
        let state_manager = Arc::new(StateManager::new(
            config.daemon.state_file.clone(),
            config.daemon.catalog_file.clone(),
            config.mpv.default_volume,
        ));
        let state = state_manager.get_state().await;
        info!(
            "DaemonCore: {} stations, volume {:.2}",
            state.catalog.stations.len(),
            state.volume
        );

        let element = MpvElement::spawn(state.volume, config.mpv.binary.clone(), event_tx.clone());
        let factory = HlsAdapterFactory::new(
            Duration::from_millis(config.hls.retry_delay_ms),
            event_tx.clone(),
        );
        let host = BroadcastHost::new(broadcast_tx.clone(), config.media_session.enabled);
        let mut session = PlaybackSession::new(
            element.clone(),
            factory,
            host,
            SegmentedConfig::from(&config.hls),
            state.volume,
        );
        session.bind_station(
            state
                .catalog
                .playing()
                .or_else(|| state.catalog.active())
                .cloned(),
        );
        session
            .media_session_mut()
            .bind_handlers(transport_handlers(&event_tx));

        let timer = SleepTimer::new(Duration::from_secs(config.sleep_timer.fade_window_secs));

        Ok(Self {
            config,
            state_manager,
            session,
            element,
            timer,
            timer_tasks: SleepTimerTasks::default(),
            event_tx,
            broadcast_tx,
        })
    }

    /// Borrow the state manager (for the socket and HTTP servers).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        let heartbeat_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
                if heartbeat_tx.send(DaemonEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        loop {
            let evt = event_rx.recv().await;
            match evt {
                None => {
                    info!("DaemonCore: event channel closed, shutting down");
                    break;
                }

                Some(DaemonEvent::Shutdown) => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }

                Some(DaemonEvent::ClientCommand(cmd)) => {
                    info!("DaemonCore: command {:?}", cmd);
                    if let Err(e) = self.handle_command(cmd).await {
                        error!("DaemonCore: command error: {}", e);
                    }
                    self.sync_session().await;
                    self.notify_state();
                }

                Some(DaemonEvent::Session(stamped)) => {
                    self.session.handle(stamped);
                    if self.sync_session().await {
                        self.notify_state();
                    }
                }

                Some(DaemonEvent::SleepTimer(evt)) => {
                    if let Err(e) = self.handle_timer(evt).await {
                        error!("DaemonCore: sleep timer error: {}", e);
                    }
                }

                Some(DaemonEvent::MpvHealth(health)) => {
                    debug!("DaemonCore: mpv health {:?}", health);
                    self.state_manager.set_mpv_health(health).await;
                    self.notify_state();
                }

                Some(DaemonEvent::HeartbeatTick) => {
                    self.element.heartbeat();
                }
            }
        }

        self.cleanup().await
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::Play { station_id, url } => {
                let station = match station_id {
                    Some(id) => match self.state_manager.catalog().await.get(&id).cloned() {
                        Some(station) => Some(station),
                        None => {
                            self.notice(format!("Unknown station {}", id));
                            return Ok(());
                        }
                    },
                    None => None,
                };
                self.play(url, station).await?;
            }

            Command::PlayActive => {
                let active = self.state_manager.catalog().await.active().cloned();
                self.play(None, active).await?;
            }

            Command::TogglePlay => {
                let catalog = self.state_manager.catalog().await;
                if self.session.desired_playing() && catalog.active_is_playing() {
                    self.session.stop();
                } else {
                    self.play(None, catalog.active().cloned()).await?;
                }
            }

            Command::Stop => self.session.stop(),

            Command::Next => self.step(Direction::Next).await?,
            Command::Prev => self.step(Direction::Prev).await?,

            Command::Select { station_id } => {
                let selected = self
                    .state_manager
                    .update_catalog(|c| c.select(&station_id).cloned())
                    .await?;
                match selected {
                    Ok(station) => self.follow(Some(station)).await?,
                    Err(e) => self.notice(e.to_string()),
                }
            }

            Command::Volume { value } => {
                let volume = self.session.set_volume(value);
                self.state_manager.set_volume(volume).await?;
            }

            // Mute is volume 0, so it persists and every client sees it.
            Command::ToggleMute => {
                let (target, message) = if self.session.volume() > 0.0 {
                    (0.0, "Sound off")
                } else {
                    (UNMUTE_VOLUME, "Sound on")
                };
                let volume = self.session.set_volume(target);
                self.state_manager.set_volume(volume).await?;
                self.notice(message.to_string());
            }

            Command::SleepTimer { minutes } => {
                let update = self.timer.set(minutes, Utc::now());
                self.apply_timer_update(update).await?;
            }

            Command::CancelSleepTimer => {
                let restore = self.timer.cancel();
                self.apply_timer_update(TimerUpdate::Cancelled {
                    restore_volume: restore,
                })
                .await?;
            }

            Command::Transport { action } => {
                if !self.session.media_session_mut().dispatch(action) {
                    warn!("DaemonCore: transport {:?} with no handler", action);
                }
            }

            Command::AddStation { draft } => self.add_station(draft).await?,

            Command::UpdateStation { station_id, draft } => {
                let updated = self
                    .state_manager
                    .update_catalog(|c| c.update(&station_id, &draft))
                    .await?;
                match updated {
                    Ok(station) => {
                        let bound = self.session.bound_station().map(|s| s.id.clone());
                        if bound.as_deref() == Some(station.id.as_str()) {
                            self.session.bind_station(Some(station));
                        }
                    }
                    Err(e) => self.notice(e.to_string()),
                }
            }

            Command::RemoveStation { station_id } => {
                let removal = self
                    .state_manager
                    .update_catalog(|c| c.remove(&station_id))
                    .await?;
                match removal {
                    Ok(removal) => {
                        if removal.was_playing {
                            self.session.stop();
                        }
                        self.rebind().await;
                        self.notice(format!("Removed {}", removal.station.name));
                    }
                    Err(e) => self.notice(e.to_string()),
                }
            }

            Command::MoveStation { from, to } => {
                if let Err(e) = self
                    .state_manager
                    .update_catalog(|c| c.move_station(from, to))
                    .await?
                {
                    self.notice(e.to_string());
                }
            }

            Command::ToggleFavorite { station_id } => {
                let change = self
                    .state_manager
                    .update_catalog(|c| c.toggle_favorite(&station_id))
                    .await?;
                match change {
                    Ok(change) => self.follow(change.follow).await?,
                    Err(e) => self.notice(e.to_string()),
                }
            }

            Command::ToggleOnlyFavorites => {
                let change = self
                    .state_manager
                    .update_catalog(|c| c.toggle_only_favorites())
                    .await?;
                match change {
                    Ok(change) => self.follow(change.follow).await?,
                    Err(CatalogError::NoFavorites) => {
                        self.notice("Add a station to favorites first".to_string())
                    }
                    Err(e) => self.notice(e.to_string()),
                }
            }

            Command::ClearStations => {
                self.session.stop();
                self.state_manager.update_catalog(|c| c.clear()).await?;
                self.session.bind_station(None);
            }

            Command::ResetStations => {
                let still_playing = self
                    .state_manager
                    .update_catalog(|c| {
                        c.reset_to_defaults();
                        c.playing_id.is_some()
                    })
                    .await?;
                if !still_playing {
                    self.session.stop();
                }
                self.rebind().await;
            }

            Command::Import { text } => self.import(&text).await?,

            Command::Export { filter } => self.export(filter).await,

            Command::GetState => {}
        }
        Ok(())
    }

    async fn play(&mut self, url: Option<String>, station: Option<Station>) -> anyhow::Result<()> {
        let Some(version) = self.session.play(url.as_deref(), station.as_ref()) else {
            self.notice("Nothing to play: no valid stream URL".to_string());
            return Ok(());
        };

        // An explicit URL without a station is not a catalog entry.
        let playing = match (&url, &station) {
            (_, Some(station)) => Some(station.id.clone()),
            (None, None) => self.session.bound_station().map(|s| s.id.clone()),
            (Some(_), None) => None,
        };
        if let Some(id) = playing {
            self.state_manager
                .update_catalog(|c| c.mark_playing(&id))
                .await?;
        }
        debug!("DaemonCore: episode {} started", version);
        Ok(())
    }

    async fn step(&mut self, direction: Direction) -> anyhow::Result<()> {
        let station = self
            .state_manager
            .update_catalog(|c| c.step(direction))
            .await?;
        self.follow(station).await
    }

    /// Cursor moved: playback follows when something is playing.
    async fn follow(&mut self, station: Option<Station>) -> anyhow::Result<()> {
        let Some(station) = station else {
            return Ok(());
        };
        let playing =
            self.session.bound_station().map(|s| s.id.as_str()) == Some(station.id.as_str());
        if self.session.desired_playing() && !playing {
            self.play(None, Some(station)).await?;
        } else if !self.session.desired_playing() {
            self.session.bind_station(Some(station));
        }
        Ok(())
    }

    /// Re-binds the session after the station list changed underneath it.
    async fn rebind(&mut self) {
        let catalog = self.state_manager.catalog().await;
        let station = catalog.playing().or_else(|| catalog.active()).cloned();
        self.session.bind_station(station);
    }

    async fn add_station(&mut self, draft: StationDraft) -> anyhow::Result<()> {
        let now = Utc::now().timestamp_millis();
        let added = self
            .state_manager
            .update_catalog(|c| c.add(&draft, now))
            .await?;
        match added {
            Ok(station) => self.notice(format!("Added {}", station.name)),
            Err(e) => self.notice(e.to_string()),
        }
        Ok(())
    }

    async fn import(&mut self, text: &str) -> anyhow::Result<()> {
        let now = Utc::now().timestamp_millis();
        match transfer::import_text(text, now) {
            Ok(stations) => {
                let found = stations.len();
                let added = self
                    .state_manager
                    .update_catalog(|c| c.merge(stations))
                    .await?;
                info!("DaemonCore: imported {} of {} stations", added, found);
                self.notice(format!("Imported {} stations", added));
                if self.session.bound_station().is_none() {
                    self.rebind().await;
                }
            }
            Err(e) => {
                warn!("DaemonCore: import failed: {}", e);
                self.notice(format!("Import failed: {}", e));
            }
        }
        Ok(())
    }

    async fn export(&mut self, filter: ExportFilter) {
        let catalog = self.state_manager.catalog().await;
        let now = Utc::now().timestamp_millis();
        let text = transfer::export_schema(&catalog, filter, env!("CARGO_PKG_VERSION"), now)
            .and_then(|schema| transfer::export_text(&schema));
        match text {
            Ok(text) => {
                let _ = self.broadcast_tx.send(BroadcastMessage::Export(text));
            }
            Err(e) => self.notice(format!("Export failed: {}", e)),
        }
    }

    // ── sleep timer ───────────────────────────────────────────────────────────

    async fn apply_timer_update(&mut self, update: TimerUpdate) -> anyhow::Result<()> {
        match update {
            TimerUpdate::Cancelled { restore_volume } => {
                self.timer_tasks.cancel();
                self.restore_volume(restore_volume).await?;
                info!("DaemonCore: sleep timer cancelled");
            }
            TimerUpdate::Scheduled {
                generation,
                ends_at,
                delay,
                restore_volume,
            } => {
                self.restore_volume(restore_volume).await?;
                self.timer_tasks.schedule(
                    generation,
                    delay,
                    Duration::from_millis(self.config.sleep_timer.tick_interval_ms),
                    self.event_tx.clone(),
                );
                info!("DaemonCore: sleep timer set, ends at {}", ends_at);
            }
        }
        self.state_manager
            .set_sleep_timer(self.timer.info(Utc::now()))
            .await;
        Ok(())
    }

    async fn handle_timer(&mut self, evt: TimerEvent) -> anyhow::Result<()> {
        match evt {
            TimerEvent::Tick { generation } => {
                if !self.timer.is_current(generation) {
                    return Ok(());
                }
                let now = Utc::now();
                if let Some(tick) = self.timer.tick(now, self.session.volume()) {
                    // Fade volume is applied but not persisted.
                    if let Some(volume) = tick.volume {
                        self.session.set_volume(volume);
                    }
                    self.state_manager
                        .set_sleep_timer(self.timer.info(now))
                        .await;
                    self.notify_state();
                }
            }
            TimerEvent::Expired { generation } => {
                let Some(expiry) = self.timer.expire(generation) else {
                    debug!("DaemonCore: stale sleep timer {} expired", generation);
                    return Ok(());
                };
                self.timer_tasks.cancel();
                self.session.stop();
                self.restore_volume(expiry.restore_volume).await?;
                self.state_manager.set_sleep_timer(None).await;
                info!("DaemonCore: sleep timer fired, playback stopped");
                self.notice("Sleep timer: playback stopped".to_string());
                self.sync_session().await;
                self.notify_state();
            }
        }
        Ok(())
    }

    async fn restore_volume(&mut self, volume: Option<f32>) -> anyhow::Result<()> {
        if let Some(volume) = volume {
            let volume = self.session.set_volume(volume);
            self.state_manager.set_volume(volume).await?;
        }
        Ok(())
    }

    // ── broadcasting ──────────────────────────────────────────────────────────

    /// Copies the session's observable fields into the shared state.
    async fn sync_session(&self) -> bool {
        self.state_manager
            .set_playback(
                self.session.status(),
                self.session.desired_playing(),
                self.session.last_error().map(|e| e.to_string()),
            )
            .await
    }

    fn notify_state(&self) {
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    fn notice(&self, message: String) {
        info!("DaemonCore: notice: {}", message);
        let _ = self.broadcast_tx.send(BroadcastMessage::Notice(message));
    }

    async fn cleanup(&mut self) -> anyhow::Result<()> {
        info!("DaemonCore: cleaning up");
        if self.timer_tasks.is_running() {
            info!("DaemonCore: dropping pending sleep timer");
            self.timer_tasks.cancel();
        }
        if let Some(volume) = self.timer.cancel() {
            self.session.set_volume(volume);
        }
        self.session.stop();
        self.element.shutdown();
        self.state_manager.set_volume(self.session.volume()).await?;
        Ok(())
    }
}

/// Host transport buttons become ordinary commands on the event channel.
fn transport_handlers(event_tx: &mpsc::Sender<DaemonEvent>) -> TransportHandlers {
    let send = |cmd: Command| -> Handler {
        let tx = event_tx.clone();
        Box::new(move || {
            if let Err(e) = tx.try_send(DaemonEvent::ClientCommand(cmd.clone())) {
                warn!("transport button dropped: {}", e);
            }
        })
    };
    TransportHandlers {
        play: send(Command::Play {
            station_id: None,
            url: None,
        }),
        pause: send(Command::Stop),
        stop: send(Command::Stop),
        next: send(Command::Next),
        prev: send(Command::Prev),
    }
}
