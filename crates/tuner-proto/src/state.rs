use crate::catalog::{default_stations, Catalog};
use crate::protocol::{DaemonState, MpvHealth, PlaybackStatus, SleepTimerInfo};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Small settings file (`state.json`).  Written on every volume or selection
/// change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentState {
    pub volume: f32,
    #[serde(default)]
    pub last_active_station_id: Option<String>,
    #[serde(default)]
    pub last_playing_station_id: Option<String>,
    #[serde(default)]
    pub last_favorite_station_id: Option<String>,
    #[serde(default)]
    pub only_favorites: bool,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self {
            volume: 0.5,
            last_active_station_id: None,
            last_playing_station_id: None,
            last_favorite_station_id: None,
            only_favorites: false,
        }
    }
}

/// Station list file (`stations.json`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogFile {
    pub stations: Vec<crate::protocol::Station>,
    #[serde(default)]
    pub favorites: Vec<String>,
}

pub struct StateManager {
    state: Arc<RwLock<DaemonState>>,
    state_file: PathBuf,
    catalog_file: PathBuf,
}

impl StateManager {
    /// Loads both files.  A missing or corrupt station file falls back to the
    /// demo list; a missing state file falls back to `default_volume`.
    pub fn new(state_file: PathBuf, catalog_file: PathBuf, default_volume: f32) -> Self {
        let persistent = Self::load_persistent(&state_file)
            .unwrap_or_else(|| PersistentState {
                volume: default_volume,
                ..PersistentState::default()
            });
        let catalog = Self::load_catalog(&catalog_file, &persistent);

        let state = DaemonState {
            rev: 1,
            catalog,
            volume: persistent.volume.clamp(0.0, 1.0),
            playback_status: PlaybackStatus::Idle,
            desired_playing: false,
            last_error: None,
            sleep_timer: None,
            mpv_health: MpvHealth::Absent,
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            state_file,
            catalog_file,
        }
    }

    pub fn arc(&self) -> Arc<RwLock<DaemonState>> {
        Arc::clone(&self.state)
    }

    pub async fn get_state(&self) -> DaemonState {
        self.state.read().await.clone()
    }

    pub async fn catalog(&self) -> Catalog {
        self.state.read().await.catalog.clone()
    }

    /// Mirrors the session's observable fields.  Returns whether anything
    /// changed (and `rev` was bumped).
    pub async fn set_playback(
        &self,
        status: PlaybackStatus,
        desired_playing: bool,
        last_error: Option<String>,
    ) -> bool {
        let mut state = self.state.write().await;
        if state.playback_status == status
            && state.desired_playing == desired_playing
            && state.last_error == last_error
        {
            return false;
        }
        state.playback_status = status;
        state.desired_playing = desired_playing;
        state.last_error = last_error;
        state.rev += 1;
        true
    }

    pub async fn set_mpv_health(&self, health: MpvHealth) {
        let mut state = self.state.write().await;
        state.mpv_health = health;
        state.rev += 1;
    }

    pub async fn set_sleep_timer(&self, info: Option<SleepTimerInfo>) {
        let mut state = self.state.write().await;
        state.sleep_timer = info;
        state.rev += 1;
    }

    pub async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            state.volume = volume.clamp(0.0, 1.0);
            state.rev += 1;
        }
        self.save().await
    }

    /// Runs `f` against the catalog, bumps `rev` and persists both files.
    pub async fn update_catalog<R>(&self, f: impl FnOnce(&mut Catalog) -> R) -> anyhow::Result<R> {
        let result = {
            let mut state = self.state.write().await;
            let result = f(&mut state.catalog);
            state.rev += 1;
            result
        };
        self.save().await?;
        Ok(result)
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        let (persistent, file) = {
            let state = self.state.read().await;
            let catalog = &state.catalog;
            (
                PersistentState {
                    volume: state.volume,
                    last_active_station_id: catalog.active_id.clone(),
                    last_playing_station_id: catalog.playing_id.clone(),
                    last_favorite_station_id: catalog.last_favorite_id.clone(),
                    only_favorites: catalog.only_favorites,
                },
                CatalogFile {
                    stations: catalog.stations.clone(),
                    favorites: catalog.favorites.clone(),
                },
            )
        };

        write_json(&self.state_file, &persistent).await?;
        write_json(&self.catalog_file, &file).await?;
        Ok(())
    }

    fn load_persistent(state_file: &Path) -> Option<PersistentState> {
        let content = std::fs::read_to_string(state_file).ok()?;
        serde_json::from_str::<PersistentState>(&content).ok()
    }

    fn load_catalog(catalog_file: &Path, persistent: &PersistentState) -> Catalog {
        let file = match std::fs::read_to_string(catalog_file) {
            Ok(content) => match serde_json::from_str::<CatalogFile>(&content) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!("Corrupt station file {:?}, using demo list: {}", catalog_file, e);
                    None
                }
            },
            Err(_) => {
                info!("No station file at {:?}, using demo list", catalog_file);
                None
            }
        };

        let mut catalog = match file {
            Some(file) => Catalog {
                stations: file.stations,
                favorites: file.favorites,
                ..Catalog::default()
            },
            None => Catalog::new(default_stations()),
        };

        let known = |id: &Option<String>| {
            id.as_deref()
                .filter(|id| catalog.get(id).is_some())
                .map(str::to_string)
        };
        let active = known(&persistent.last_active_station_id);
        let playing = known(&persistent.last_playing_station_id);
        let last_favorite = known(&persistent.last_favorite_station_id);

        catalog.active_id = active.or_else(|| catalog.stations.first().map(|s| s.id.clone()));
        catalog.playing_id = playing;
        catalog.last_favorite_id = last_favorite;
        catalog.only_favorites = persistent.only_favorites && !catalog.favorites.is_empty();
        catalog
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StationDraft;

    fn manager(dir: &Path) -> StateManager {
        StateManager::new(dir.join("state.json"), dir.join("stations.json"), 0.8)
    }

    #[tokio::test]
    async fn test_fresh_start_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let state = manager(dir.path()).get_state().await;
        assert_eq!(state.volume, 0.8);
        assert_eq!(state.playback_status, PlaybackStatus::Idle);
        assert_eq!(state.catalog.stations.len(), 3);
        assert_eq!(state.catalog.active_id.as_deref(), Some("eurodance"));
    }

    #[tokio::test]
    async fn test_catalog_and_selection_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let added = {
            let sm = manager(dir.path());
            let added = sm
                .update_catalog(|c| {
                    let station = c.add(
                        &StationDraft {
                            name: "Jazz".into(),
                            stream_url: "https://jazz.example/live".into(),
                            ..StationDraft::default()
                        },
                        1,
                    )?;
                    c.toggle_favorite(&station.id)?;
                    c.select(&station.id)?;
                    c.mark_playing(&station.id);
                    Ok::<_, crate::catalog::CatalogError>(station)
                })
                .await
                .unwrap()
                .unwrap();
            sm.set_volume(0.3).await.unwrap();
            added
        };

        let state = manager(dir.path()).get_state().await;
        assert_eq!(state.volume, 0.3);
        assert_eq!(state.catalog.stations.len(), 4);
        assert!(state.catalog.is_favorite(&added.id));
        assert_eq!(state.catalog.active_id.as_deref(), Some(added.id.as_str()));
        assert_eq!(state.catalog.playing_id.as_deref(), Some(added.id.as_str()));
        assert_eq!(state.catalog.last_favorite_id.as_deref(), Some(added.id.as_str()));
    }

    #[tokio::test]
    async fn test_corrupt_files_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stations.json"), "{ nope").unwrap();
        std::fs::write(dir.path().join("state.json"), "[]").unwrap();
        let state = manager(dir.path()).get_state().await;
        assert_eq!(state.catalog.stations.len(), 3);
        assert_eq!(state.volume, 0.8);
    }

    #[tokio::test]
    async fn test_set_playback_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let sm = manager(dir.path());
        let rev = sm.get_state().await.rev;
        assert!(sm.set_playback(PlaybackStatus::Loading, true, None).await);
        assert!(!sm.set_playback(PlaybackStatus::Loading, true, None).await);
        assert_eq!(sm.get_state().await.rev, rev + 1);
    }

    #[tokio::test]
    async fn test_volume_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let sm = manager(dir.path());
        sm.set_volume(1.7).await.unwrap();
        assert_eq!(sm.get_state().await.volume, 1.0);
    }
}
