//! Station catalog: the ordered station list, favorites and carousel
//! selection.  Pure data; `StateManager` owns the persisted copy.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{ExportFilter, Station, StationDraft};

pub const MAX_NAME_CHARS: usize = 100;
pub const MAX_TAG_CHARS: usize = 20;

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("station name is empty")]
    EmptyName,
    #[error("not a valid stream URL: {0}")]
    InvalidUrl(String),
    #[error("no station with id {0}")]
    UnknownStation(String),
    #[error("no favorite stations")]
    NoFavorites,
    #[error("station list is empty")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

/// Result of removing a station.
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    pub station: Station,
    /// The removed station was the one loaded in the player.
    pub was_playing: bool,
}

/// Result of a favorite toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct FavoriteChange {
    pub is_favorite: bool,
    /// In favorites-only mode, un-starring the active station moves the
    /// cursor to the next favorite.  Playback should follow if active.
    pub follow: Option<Station>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModeChange {
    pub only_favorites: bool,
    /// Station the cursor jumped to because the old one is hidden now.
    pub follow: Option<Station>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Catalog {
    pub stations: Vec<Station>,
    #[serde(default)]
    pub favorites: Vec<String>,
    #[serde(default)]
    pub only_favorites: bool,
    /// Station under the carousel cursor.
    #[serde(default)]
    pub active_id: Option<String>,
    /// Station loaded in the player (may differ from the cursor).
    #[serde(default)]
    pub playing_id: Option<String>,
    /// Used as the landing station when favorites-only mode is switched on.
    #[serde(default)]
    pub last_favorite_id: Option<String>,
}

impl Catalog {
    pub fn new(stations: Vec<Station>) -> Self {
        Self {
            stations,
            ..Self::default()
        }
    }

    pub fn with_defaults() -> Self {
        let mut catalog = Self::new(default_stations());
        catalog.active_id = catalog.stations.first().map(|s| s.id.clone());
        catalog
    }

    pub fn get(&self, id: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.id == id)
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.favorites.iter().any(|f| f == id)
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.stations.iter().any(|s| s.stream_url == url)
    }

    /// Stations shown in the carousel.
    pub fn displayed(&self) -> Vec<&Station> {
        self.stations
            .iter()
            .filter(|s| !self.only_favorites || self.is_favorite(&s.id))
            .collect()
    }

    pub fn filtered(&self, filter: ExportFilter) -> Vec<&Station> {
        match filter {
            ExportFilter::All => self.stations.iter().collect(),
            ExportFilter::Favorites => self
                .stations
                .iter()
                .filter(|s| self.is_favorite(&s.id))
                .collect(),
        }
    }

    /// The cursor station, falling back to the first displayed one.
    pub fn active(&self) -> Option<&Station> {
        let displayed = self.displayed();
        self.active_id
            .as_deref()
            .and_then(|id| displayed.iter().find(|s| s.id == id).copied())
            .or_else(|| displayed.first().copied())
    }

    pub fn playing(&self) -> Option<&Station> {
        self.playing_id.as_deref().and_then(|id| self.get(id))
    }

    /// True when the cursor sits on the station loaded in the player.
    pub fn active_is_playing(&self) -> bool {
        match (self.active(), self.playing_id.as_deref()) {
            (Some(active), Some(playing)) => active.id == playing,
            _ => false,
        }
    }

    pub fn select(&mut self, id: &str) -> Result<&Station, CatalogError> {
        if !self.displayed().iter().any(|s| s.id == id) {
            return Err(CatalogError::UnknownStation(id.to_string()));
        }
        self.active_id = Some(id.to_string());
        self.get(id)
            .ok_or_else(|| CatalogError::UnknownStation(id.to_string()))
    }

    /// Moves the cursor one step, wrapping at both ends of the carousel.
    pub fn step(&mut self, direction: Direction) -> Option<Station> {
        let displayed = self.displayed();
        if displayed.is_empty() {
            return None;
        }
        let current = self
            .active()
            .and_then(|a| displayed.iter().position(|s| s.id == a.id))
            .unwrap_or(0);
        let len = displayed.len();
        let next = match direction {
            Direction::Next => (current + 1) % len,
            Direction::Prev => (current + len - 1) % len,
        };
        let station = displayed[next].clone();
        self.active_id = Some(station.id.clone());
        Some(station)
    }

    /// Records the station handed to the player.
    pub fn mark_playing(&mut self, id: &str) {
        self.playing_id = Some(id.to_string());
        if self.is_favorite(id) {
            self.last_favorite_id = Some(id.to_string());
        }
    }

    pub fn add(&mut self, draft: &StationDraft, now_ms: i64) -> Result<Station, CatalogError> {
        let (name, stream_url) = validate_draft(draft)?;
        let station = Station {
            id: new_station_id(),
            name,
            stream_url,
            cover_url: non_empty(&draft.cover_url),
            homepage_url: non_empty(&draft.homepage_url),
            tags: split_tags(&draft.tags),
            added_at: now_ms,
        };
        if self.active_id.is_none() {
            self.active_id = Some(station.id.clone());
        }
        self.stations.push(station.clone());
        Ok(station)
    }

    pub fn update(&mut self, id: &str, draft: &StationDraft) -> Result<Station, CatalogError> {
        let (name, stream_url) = validate_draft(draft)?;
        let station = self
            .stations
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| CatalogError::UnknownStation(id.to_string()))?;
        station.name = name;
        station.stream_url = stream_url;
        station.cover_url = non_empty(&draft.cover_url);
        station.homepage_url = non_empty(&draft.homepage_url);
        station.tags = split_tags(&draft.tags);
        Ok(station.clone())
    }

    pub fn remove(&mut self, id: &str) -> Result<Removal, CatalogError> {
        let idx = self
            .stations
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| CatalogError::UnknownStation(id.to_string()))?;
        let station = self.stations.remove(idx);
        self.favorites.retain(|f| f != id);

        let was_playing = self.playing_id.as_deref() == Some(id);
        if was_playing {
            self.playing_id = None;
        }
        if self.active_id.as_deref() == Some(id) {
            self.active_id = self.stations.first().map(|s| s.id.clone());
        }
        if self.last_favorite_id.as_deref() == Some(id) {
            self.last_favorite_id = None;
        }
        Ok(Removal {
            station,
            was_playing,
        })
    }

    /// Drag-to-reorder within the full list.
    pub fn move_station(&mut self, from: usize, to: usize) -> Result<(), CatalogError> {
        if from >= self.stations.len() {
            return Err(CatalogError::Empty);
        }
        let to = to.min(self.stations.len() - 1);
        let station = self.stations.remove(from);
        self.stations.insert(to, station);
        Ok(())
    }

    pub fn toggle_favorite(&mut self, id: &str) -> Result<FavoriteChange, CatalogError> {
        if self.get(id).is_none() {
            return Err(CatalogError::UnknownStation(id.to_string()));
        }

        if !self.is_favorite(id) {
            self.favorites.push(id.to_string());
            self.last_favorite_id = Some(id.to_string());
            return Ok(FavoriteChange {
                is_favorite: true,
                follow: None,
            });
        }

        // Position in the full list, taken before the favorite disappears.
        let removed_at = self.stations.iter().position(|s| s.id == id);
        self.favorites.retain(|f| f != id);

        let mut follow = None;
        if self.only_favorites && self.active_id.as_deref() == Some(id) {
            let favorites: Vec<(usize, &Station)> = self
                .stations
                .iter()
                .enumerate()
                .filter(|(_, s)| self.is_favorite(&s.id))
                .collect();
            let after = favorites
                .iter()
                .find(|(i, _)| removed_at.is_some_and(|r| *i > r))
                .or_else(|| favorites.first())
                .map(|(_, s)| (*s).clone());
            if let Some(next) = after {
                self.active_id = Some(next.id.clone());
                follow = Some(next);
            }
        }

        Ok(FavoriteChange {
            is_favorite: false,
            follow,
        })
    }

    pub fn toggle_only_favorites(&mut self) -> Result<ModeChange, CatalogError> {
        if self.stations.is_empty() {
            return Err(CatalogError::Empty);
        }
        if !self.only_favorites && self.favorites.is_empty() {
            return Err(CatalogError::NoFavorites);
        }

        self.only_favorites = !self.only_favorites;
        let mut follow = None;

        if self.only_favorites {
            let active_is_favorite = self
                .active_id
                .as_deref()
                .is_some_and(|id| self.is_favorite(id));
            if !active_is_favorite {
                let landing = self
                    .last_favorite_id
                    .as_deref()
                    .filter(|id| self.is_favorite(id))
                    .and_then(|id| self.get(id))
                    .or_else(|| self.stations.iter().find(|s| self.is_favorite(&s.id)))
                    .cloned();
                if let Some(station) = landing {
                    self.active_id = Some(station.id.clone());
                    follow = Some(station);
                }
            }
        }

        Ok(ModeChange {
            only_favorites: self.only_favorites,
            follow,
        })
    }

    pub fn clear(&mut self) {
        self.stations.clear();
        self.favorites.clear();
        self.active_id = None;
        self.playing_id = None;
        self.last_favorite_id = None;
        self.only_favorites = false;
    }

    /// Replaces the list with the demo stations.  Favorites are kept only for
    /// ids that survive.
    pub fn reset_to_defaults(&mut self) {
        self.stations = default_stations();
        let ids: Vec<String> = self.stations.iter().map(|s| s.id.clone()).collect();
        self.favorites.retain(|f| ids.contains(f));
        self.active_id = self.stations.first().map(|s| s.id.clone());
        if self
            .playing_id
            .as_deref()
            .is_some_and(|id| !ids.iter().any(|i| i == id))
        {
            self.playing_id = None;
        }
    }

    /// Appends stations whose stream URL is not in the list yet.  Returns how
    /// many were added.
    pub fn merge(&mut self, incoming: Vec<Station>) -> usize {
        let mut added = 0;
        for mut station in incoming {
            if self.contains_url(&station.stream_url) {
                continue;
            }
            if station.id.is_empty() || self.get(&station.id).is_some() {
                station.id = new_station_id();
            }
            if self.active_id.is_none() {
                self.active_id = Some(station.id.clone());
            }
            self.stations.push(station);
            added += 1;
        }
        added
    }
}

/// Random 9-character lowercase id.
pub fn new_station_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Absolute http(s) URL check used for stream URLs.
pub fn is_valid_stream_url(raw: &str) -> bool {
    match url::Url::parse(raw.trim()) {
        Ok(u) => u.has_host() && matches!(u.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn validate_draft(draft: &StationDraft) -> Result<(String, String), CatalogError> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(CatalogError::EmptyName);
    }
    let url = draft.stream_url.trim();
    if !is_valid_stream_url(url) {
        return Err(CatalogError::InvalidUrl(url.to_string()));
    }
    Ok((truncate_chars(name, MAX_NAME_CHARS), url.to_string()))
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| truncate_chars(t.trim(), MAX_TAG_CHARS))
        .filter(|t| !t.is_empty())
        .collect()
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Demo list shipped with the app.
pub fn default_stations() -> Vec<Station> {
    let now = chrono::Utc::now().timestamp_millis();
    let demo = |id: &str, name: &str, url: &str, cover: &str, home: &str, tags: &[&str]| Station {
        id: id.to_string(),
        name: name.to_string(),
        stream_url: url.to_string(),
        cover_url: Some(cover.to_string()),
        homepage_url: Some(home.to_string()),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        added_at: now,
    };
    vec![
        demo(
            "eurodance",
            "Eurodance",
            "https://hls-01-radiorecord.hostingradio.ru/record-eurodance/96/playlist.m3u8",
            "https://raw.githubusercontent.com/amun-ra-dev/pic/refs/heads/main/Eurodance.jpg",
            "https://www.radiorecord.ru/",
            &["dance", "90s"],
        ),
        demo(
            "mds-station",
            "MDS Station",
            "https://stream03.pcradio.ru/mdsst_ru_1-hi",
            "https://raw.githubusercontent.com/amun-ra-dev/pic/refs/heads/main/audiobook.jpg",
            "https://mds-station.com/",
            &["audiobook"],
        ),
        demo(
            "synthwave-radio",
            "Synthwave",
            "https://hls-01-radiorecord.hostingradio.ru/record-synth/96/playlist.m3u8",
            "https://raw.githubusercontent.com/amun-ra-dev/pic/refs/heads/main/Synthwave.jpg",
            "https://www.radiorecord.ru/",
            &["synth", "retro"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str) -> Station {
        Station {
            id: id.to_string(),
            name: id.to_uppercase(),
            stream_url: format!("https://radio.example/{id}.mp3"),
            ..Station::default()
        }
    }

    fn catalog(ids: &[&str]) -> Catalog {
        let mut c = Catalog::new(ids.iter().map(|id| station(id)).collect());
        c.active_id = ids.first().map(|s| s.to_string());
        c
    }

    #[test]
    fn test_step_wraps_both_ways() {
        let mut c = catalog(&["a", "b", "c"]);
        assert_eq!(c.step(Direction::Prev).unwrap().id, "c");
        assert_eq!(c.step(Direction::Next).unwrap().id, "a");
        assert_eq!(c.step(Direction::Next).unwrap().id, "b");
    }

    #[test]
    fn test_step_respects_favorites_mode() {
        let mut c = catalog(&["a", "b", "c", "d"]);
        c.toggle_favorite("b").unwrap();
        c.toggle_favorite("d").unwrap();
        let change = c.toggle_only_favorites().unwrap();
        assert!(change.only_favorites);
        // "a" is not a favorite, so the cursor lands on the last starred one.
        assert_eq!(change.follow.unwrap().id, "d");
        assert_eq!(c.step(Direction::Next).unwrap().id, "b");
        assert_eq!(c.step(Direction::Next).unwrap().id, "d");
    }

    #[test]
    fn test_only_favorites_requires_favorites() {
        let mut c = catalog(&["a"]);
        assert_eq!(c.toggle_only_favorites(), Err(CatalogError::NoFavorites));
        assert_eq!(Catalog::default().toggle_only_favorites(), Err(CatalogError::Empty));
    }

    #[test]
    fn test_unfavorite_active_in_favorites_mode_moves_cursor() {
        let mut c = catalog(&["a", "b", "c"]);
        for id in ["a", "b", "c"] {
            c.toggle_favorite(id).unwrap();
        }
        c.toggle_only_favorites().unwrap();
        c.select("b").unwrap();

        let change = c.toggle_favorite("b").unwrap();
        assert!(!change.is_favorite);
        assert_eq!(change.follow.unwrap().id, "c");
        assert_eq!(c.active().unwrap().id, "c");

        // Last one in the list wraps around to the first favorite.
        let change = c.toggle_favorite("c").unwrap();
        assert_eq!(change.follow.unwrap().id, "a");
    }

    #[test]
    fn test_remove_playing_station_clears_selection() {
        let mut c = catalog(&["a", "b"]);
        c.mark_playing("a");
        c.toggle_favorite("a").unwrap();
        let removal = c.remove("a").unwrap();
        assert!(removal.was_playing);
        assert!(c.playing_id.is_none());
        assert_eq!(c.active_id.as_deref(), Some("b"));
        assert!(c.favorites.is_empty());
    }

    #[test]
    fn test_add_validates_and_normalises() {
        let mut c = Catalog::default();
        let bad = StationDraft {
            name: "x".into(),
            stream_url: "not a url".into(),
            ..StationDraft::default()
        };
        assert!(matches!(c.add(&bad, 0), Err(CatalogError::InvalidUrl(_))));

        let draft = StationDraft {
            name: "  Jazz  ".into(),
            stream_url: "https://jazz.example/live".into(),
            tags: "jazz, , smooth ".into(),
            ..StationDraft::default()
        };
        let added = c.add(&draft, 7).unwrap();
        assert_eq!(added.name, "Jazz");
        assert_eq!(added.tags, vec!["jazz", "smooth"]);
        assert_eq!(added.id.len(), 9);
        assert!(added.cover_url.is_none());
        assert_eq!(c.active_id.as_deref(), Some(added.id.as_str()));
    }

    #[test]
    fn test_merge_skips_known_urls() {
        let mut c = catalog(&["a"]);
        let dupe = Station {
            id: "other".into(),
            ..station("a")
        };
        assert_eq!(c.merge(vec![dupe, station("b")]), 1);
        assert_eq!(c.stations.len(), 2);
    }

    #[test]
    fn test_move_station_clamps_target() {
        let mut c = catalog(&["a", "b", "c"]);
        c.move_station(0, 10).unwrap();
        let ids: Vec<&str> = c.stations.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert!(c.move_station(5, 0).is_err());
    }

    #[test]
    fn test_defaults_have_valid_urls() {
        let c = Catalog::with_defaults();
        assert_eq!(c.active().unwrap().id, "eurodance");
        assert!(c.stations.iter().all(|s| is_valid_stream_url(&s.stream_url)));
    }
}
