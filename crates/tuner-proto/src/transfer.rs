//! Station list import/export.
//!
//! Export produces the v2 JSON schema, optionally wrapped in a chat-friendly
//! text block.  Import is lenient: it takes the v2 schema, a bare array of
//! stations, a single station object, JSON buried inside pasted text, or an
//! M3U playlist.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::catalog::{
    is_valid_stream_url, new_station_id, truncate_chars, Catalog, MAX_NAME_CHARS, MAX_TAG_CHARS,
};
use crate::protocol::{ExportFilter, Station};

pub const EXPORT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("nothing to export")]
    NothingToExport,
    #[error("data not recognised (expected JSON or M3U)")]
    Unrecognised,
    #[error("no valid stations found")]
    NoValidStations,
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportSchemaV2 {
    pub schema_version: u32,
    pub app_version: String,
    pub exported_at: i64,
    pub stations: Vec<ExportedStation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportedStation {
    pub id: String,
    pub title: String,
    pub stream_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    pub is_favorite: bool,
}

pub fn export_schema(
    catalog: &Catalog,
    filter: ExportFilter,
    app_version: &str,
    now_ms: i64,
) -> Result<ExportSchemaV2, TransferError> {
    let stations = catalog.filtered(filter);
    if stations.is_empty() {
        return Err(TransferError::NothingToExport);
    }
    Ok(ExportSchemaV2 {
        schema_version: EXPORT_SCHEMA_VERSION,
        app_version: app_version.to_string(),
        exported_at: now_ms,
        stations: stations
            .into_iter()
            .map(|s| ExportedStation {
                id: s.id.clone(),
                title: s.name.clone(),
                stream_url: s.stream_url.clone(),
                cover_url: s.cover_url.clone(),
                homepage_url: s.homepage_url.clone(),
                tags: (!s.tags.is_empty()).then(|| s.tags.clone()),
                is_favorite: catalog.is_favorite(&s.id),
            })
            .collect(),
    })
}

/// Clipboard text: a readable bullet list followed by the JSON in a code fence.
pub fn export_text(schema: &ExportSchemaV2) -> Result<String, TransferError> {
    let list = schema
        .stations
        .iter()
        .map(|s| format!("- {}", s.title))
        .collect::<Vec<_>>()
        .join("\n");
    let json = serde_json::to_string_pretty(schema)?;
    Ok(format!("Station list:\n\n{list}\n\n```json\n{json}\n```"))
}

/// Parses pasted text into normalised stations (not yet deduplicated against
/// the catalog; `Catalog::merge` does that).
pub fn import_text(text: &str, now_ms: i64) -> Result<Vec<Station>, TransferError> {
    let raw = match extract_json(text) {
        Some(value) => stations_from_json(value),
        None => {
            let parsed = parse_m3u(text);
            if parsed.is_empty() {
                return Err(TransferError::Unrecognised);
            }
            parsed
        }
    };

    let valid = normalise(raw, now_ms);
    if valid.is_empty() {
        return Err(TransferError::NoValidStations);
    }
    Ok(valid)
}

/// Loose station shape accepted on import.  `title` is the v2 name field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStation {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, alias = "title")]
    name: Option<String>,
    #[serde(default, alias = "stream_url", alias = "url")]
    stream_url: Option<String>,
    #[serde(default, alias = "cover_url")]
    cover_url: Option<String>,
    #[serde(default, alias = "homepage_url")]
    homepage_url: Option<String>,
    #[serde(default)]
    tags: Option<Vec<Value>>,
    #[serde(default, alias = "added_at")]
    added_at: Option<i64>,
}

fn stations_from_json(value: Value) -> Vec<RawStation> {
    let entries = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let schema = map.get("schemaVersion").and_then(Value::as_u64);
            if schema == Some(EXPORT_SCHEMA_VERSION as u64) {
                match map.remove("stations") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                }
            } else {
                vec![Value::Object(map)]
            }
        }
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawStation>(v).ok())
        .collect()
}

fn normalise(raw: Vec<RawStation>, now_ms: i64) -> Vec<Station> {
    raw.into_iter()
        .filter_map(|s| {
            let name = s.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())?;
            let stream_url = s.stream_url.map(|u| u.trim().to_string())?;
            if !is_valid_stream_url(&stream_url) {
                return None;
            }
            let id = match s.id {
                Some(Value::String(id)) if !id.is_empty() => id,
                Some(Value::Number(n)) => n.to_string(),
                _ => new_station_id(),
            };
            let tags = s
                .tags
                .unwrap_or_default()
                .into_iter()
                .map(|t| match t {
                    Value::String(t) => t,
                    other => other.to_string(),
                })
                .map(|t| truncate_chars(t.trim(), MAX_TAG_CHARS))
                .filter(|t| !t.is_empty())
                .collect();
            Some(Station {
                id,
                name: truncate_chars(&name, MAX_NAME_CHARS),
                stream_url,
                cover_url: s.cover_url.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
                homepage_url: s
                    .homepage_url
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty()),
                tags,
                added_at: s.added_at.unwrap_or(now_ms),
            })
        })
        .collect()
}

/// Finds a JSON document in `text`: the whole text, or the span from the first
/// `{`/`[` to the matching last closing bracket.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Some(value);
    }

    let brace = text.find('{');
    let bracket = text.find('[');
    let (start, close) = match (brace, bracket) {
        (Some(b), Some(k)) if b < k => (b, '}'),
        (Some(b), None) => (b, '}'),
        (_, Some(k)) => (k, ']'),
        (None, None) => return None,
    };
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// M3U subset: `#EXTINF:<duration>,<name>` followed by a URL line.  Lines that
/// are not URLs are skipped.
fn parse_m3u(content: &str) -> Vec<RawStation> {
    let mut stations = Vec::new();
    let mut pending_name: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if let Some(comma_idx) = rest.find(',') {
                pending_name = Some(rest[comma_idx + 1..].trim().to_string());
            }
            continue;
        }

        if line.starts_with('#') || url::Url::parse(line).is_err() {
            continue;
        }

        let name = pending_name
            .take()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| name_from_url(line));

        stations.push(RawStation {
            name: Some(name),
            stream_url: Some(line.to_string()),
            ..RawStation::default()
        });
    }

    stations
}

fn name_from_url(url: &str) -> String {
    url.split('/')
        .next_back()
        .and_then(|last| last.split('?').next())
        .filter(|s| !s.is_empty())
        .unwrap_or("Radio Station")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_m3u_import() {
        let text = "#EXTM3U\n#EXTINF:-1,Jazz FM\nhttps://jazz.example/live\n\nhttps://x.example/path/rock.mp3?sid=1\nnot a url\n";
        let stations = import_text(text, 5).unwrap();
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].name, "Jazz FM");
        assert_eq!(stations[1].name, "rock.mp3");
        assert_eq!(stations[1].added_at, 5);
    }

    #[test]
    fn test_json_embedded_in_chat_text() {
        let text = r#"Here you go:
```json
{"schemaVersion": 2, "appVersion": "3.0.0", "exportedAt": 1,
 "stations": [{"id": "a", "title": "Alpha", "streamUrl": "https://a.example/s", "isFavorite": true, "tags": ["x", 5]}]}
```
cheers"#;
        let stations = import_text(text, 0).unwrap();
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].id, "a");
        assert_eq!(stations[0].name, "Alpha");
        assert_eq!(stations[0].tags, vec!["x", "5"]);
    }

    #[test]
    fn test_single_object_and_bad_urls() {
        let one = r#"{"name": "Solo", "streamUrl": "https://solo.example/"}"#;
        assert_eq!(import_text(one, 0).unwrap()[0].name, "Solo");

        let bad = r#"[{"name": "Nope", "streamUrl": "ftp//broken"}]"#;
        assert!(matches!(
            import_text(bad, 0),
            Err(TransferError::NoValidStations)
        ));

        assert!(matches!(
            import_text("just words", 0),
            Err(TransferError::Unrecognised)
        ));
    }

    #[test]
    fn test_long_names_are_truncated() {
        let long = "n".repeat(150);
        let json = format!(r#"[{{"name": "{long}", "streamUrl": "https://l.example/"}}]"#);
        let stations = import_text(&json, 0).unwrap();
        assert_eq!(stations[0].name.chars().count(), MAX_NAME_CHARS);
    }

    #[test]
    fn test_export_then_import_preserves_stations() {
        let mut catalog = Catalog::with_defaults();
        catalog.toggle_favorite("mds-station").unwrap();

        let schema = export_schema(&catalog, ExportFilter::Favorites, "0.1.0", 99).unwrap();
        assert_eq!(schema.stations.len(), 1);
        assert!(schema.stations[0].is_favorite);

        let text = export_text(&schema).unwrap();
        assert!(text.contains("- MDS Station"));

        let back = import_text(&text, 0).unwrap();
        assert_eq!(back[0].stream_url, catalog.get("mds-station").unwrap().stream_url);
        assert_eq!(back[0].tags, vec!["audiobook"]);
    }

    #[test]
    fn test_export_empty_favorites() {
        let catalog = Catalog::with_defaults();
        assert!(matches!(
            export_schema(&catalog, ExportFilter::Favorites, "0.1.0", 0),
            Err(TransferError::NothingToExport)
        ));
    }
}
