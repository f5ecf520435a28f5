use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    /// Manifest plus media segments (HLS); needs an adapter.
    Segmented,
    /// One continuous URL the element can play directly.
    Progressive,
}

/// Marker match on the whole URL, case-insensitive.  Anything unmatched is
/// progressive.
pub fn classify(url: &str) -> StreamType {
    let lower = url.to_ascii_lowercase();
    if lower.contains(".m3u8") || lower.contains("playlist") {
        StreamType::Segmented
    } else {
        StreamType::Progressive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("https://x/live/playlist.m3u8"), StreamType::Segmented);
        assert_eq!(classify("https://x/stream.mp3"), StreamType::Progressive);
        assert_eq!(classify("HTTPS://X/LIVE/INDEX.M3U8?t=1"), StreamType::Segmented);
        assert_eq!(classify("https://x/get?type=Playlist"), StreamType::Segmented);
        assert_eq!(classify(""), StreamType::Progressive);
        assert_eq!(classify("not even a url"), StreamType::Progressive);
    }
}
