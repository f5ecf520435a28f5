use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame body a peer may announce.  Imports carry whole station
/// lists, so this is generous.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Messages sent from a UI client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Start an episode.  Both fields optional: an explicit URL wins, then the
    /// station's URL, then whatever station is currently bound to the session.
    Play {
        #[serde(default)]
        station_id: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    /// Play the station under the carousel cursor.
    PlayActive,
    /// Play/stop the active station (the big button).
    TogglePlay,
    Stop,
    Next,
    Prev,
    /// Move the carousel cursor.  Follows with playback when something is
    /// already playing.
    Select { station_id: String },
    Volume { value: f32 },
    ToggleMute,
    SleepTimer { minutes: u32 },
    CancelSleepTimer,
    /// A hardware/lock-screen transport button press relayed by the host.
    Transport { action: TransportAction },
    AddStation { draft: StationDraft },
    UpdateStation { station_id: String, draft: StationDraft },
    RemoveStation { station_id: String },
    MoveStation { from: usize, to: usize },
    ToggleFavorite { station_id: String },
    ToggleOnlyFavorites,
    ClearStations,
    ResetStations,
    Import { text: String },
    Export { filter: ExportFilter },
    GetState,
}

/// Messages sent from the daemon to clients (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: daemon version + full state snapshot.
    Hello {
        protocol_version: u32,
        daemon_rev: u64,
        state: DaemonState,
    },
    State {
        data: DaemonState,
    },
    /// Now-playing metadata for the host's lock-screen surface.
    NowPlaying {
        metadata: NowPlaying,
    },
    /// Transport state mirrored to the host.
    Transport {
        state: TransportState,
    },
    /// Transport buttons that currently have a handler.
    TransportActions {
        actions: Vec<TransportAction>,
    },
    /// Short user-facing message (snackbar).
    Notice {
        message: String,
    },
    Export {
        text: String,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Observable playback status of the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    #[default]
    Idle, // nothing requested yet, or the requested URL was unusable
    Loading, // episode started or rebuffering, no audio yet
    Playing, // element reported audio flowing
    Paused,  // stopped by the user or the sleep timer
    Error,   // episode failed; retry with play
}

impl PlaybackStatus {
    /// Playing or on its way there.  Drives the play/pause icon.
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackStatus::Playing | PlaybackStatus::Loading)
    }
}

/// Transport state as seen by the host's now-playing surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Playing,
    Paused,
}

/// Host transport buttons.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TransportAction {
    Play,
    Pause,
    Stop,
    NextTrack,
    PreviousTrack,
}

impl TransportAction {
    pub const ALL: [TransportAction; 5] = [
        TransportAction::Play,
        TransportAction::Pause,
        TransportAction::Stop,
        TransportAction::NextTrack,
        TransportAction::PreviousTrack,
    ];
}

/// Lock-screen metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub artwork: Vec<Artwork>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artwork {
    pub src: String,
    pub sizes: String,
    pub mime_type: String,
}

/// Health of the mpv process as observed by the daemon.
///
/// Transitions:
///   Absent -> Starting -> Running -> Dead -> Starting ...
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum MpvHealth {
    /// mpv process does not exist yet (before first use).
    #[default]
    Absent,
    /// Process is spawning / socket not yet available.
    Starting,
    /// Socket connected, IPC responding normally.
    Running,
    /// Process exited or socket closed.
    Dead,
}

impl MpvHealth {
    /// Short label for badges / status bar (≤5 chars).
    pub fn badge_label(&self) -> Option<&str> {
        match self {
            MpvHealth::Absent => None,
            MpvHealth::Starting => Some("INIT"),
            MpvHealth::Running => None,
            MpvHealth::Dead => Some("DEAD"),
        }
    }
}

/// Which stations an export covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFilter {
    #[default]
    All,
    Favorites,
}

/// Sleep timer as shown to clients.  Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SleepTimerInfo {
    pub ends_at: chrono::DateTime<chrono::Utc>,
    /// `MM:SS`, refreshed on every timer tick.
    pub remaining: Option<String>,
    pub fading: bool,
}

/// Full state of the daemon.  `rev` is a monotonically increasing counter
/// incremented every time the state changes.  Clients can use it to detect
/// missed updates and request a resync.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonState {
    /// Monotonic revision counter — incremented on every state change.
    #[serde(default)]
    pub rev: u64,
    pub catalog: Catalog,
    pub volume: f32,
    pub playback_status: PlaybackStatus,
    /// What the user last asked for, independent of what mpv reports.
    #[serde(default)]
    pub desired_playing: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub sleep_timer: Option<SleepTimerInfo>,
    /// Health of the mpv process as tracked by the daemon.
    #[serde(default)]
    pub mpv_health: MpvHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub stream_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage_url: Option<String>,
    /// Searchable tags (genre, era, language, ...)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub added_at: i64,
}

/// Editor form contents for add/update.  Tags arrive comma separated.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StationDraft {
    pub name: String,
    pub stream_url: String,
    #[serde(default)]
    pub cover_url: String,
    #[serde(default)]
    pub homepage_url: String,
    #[serde(default)]
    pub tags: String,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Total size (header + body) of the frame at the start of `data`, once
    /// the length header is available.
    pub fn frame_len(data: &[u8]) -> Option<usize> {
        let header: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(4 + u32::from_be_bytes(header) as usize)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_len_reads_header_only() {
        assert_eq!(Message::frame_len(&[0, 0]), None);
        assert_eq!(Message::frame_len(&[0, 0, 1, 0]), Some(4 + 256));

        let encoded = Message::Command(Command::Stop).encode().unwrap();
        assert_eq!(Message::frame_len(&encoded), Some(encoded.len()));
    }

    #[test]
    fn test_message_encode_decode() {
        let msg = Message::Command(Command::Play {
            station_id: Some("eurodance".to_string()),
            url: None,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::Play { station_id, url }) => {
                assert_eq!(station_id.as_deref(), Some("eurodance"));
                assert!(url.is_none());
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_play_fields_default_when_missing() {
        let (decoded, _) = {
            let json = br#"{"cmd":"Play"}"#;
            let mut framed = (json.len() as u32).to_be_bytes().to_vec();
            framed.extend_from_slice(json);
            Message::decode(&framed).unwrap()
        };
        assert!(matches!(
            decoded,
            Message::Command(Command::Play {
                station_id: None,
                url: None
            })
        ));
    }

    #[test]
    fn test_hello_encode_decode() {
        let state = DaemonState {
            rev: 42,
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            daemon_rev: 42,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                daemon_rev,
                ..
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(daemon_rev, 42);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let encoded = Message::Command(Command::Stop).encode().unwrap();
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(Message::decode(&encoded[..2]).is_err());
    }

    #[test]
    fn test_status_is_active() {
        assert!(PlaybackStatus::Playing.is_active());
        assert!(PlaybackStatus::Loading.is_active());
        assert!(!PlaybackStatus::Paused.is_active());
        assert!(!PlaybackStatus::Error.is_active());
        assert!(!PlaybackStatus::Idle.is_active());
    }
}
