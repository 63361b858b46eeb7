/*!
Import pipeline: turns exported streaming-history entries into enriched
events the store can persist.
*/
use async_std::path::{Path, PathBuf};
use async_std::prelude::*;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, Timelike, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{Derived, NewListeningEvent, RawRecord};

/// Parse an export timestamp. Exports use `2021-03-01T18:02:11Z`, but an
/// explicit offset or a bare (assumed UTC) datetime are accepted too.
pub fn parse_ts(ts: &str) -> Result<DateTime<Utc>> {
    let ts = ts.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .map_err(|e| Error::MalformedRecord(format!("invalid ts {:?}: {}", ts, e)))
}

pub fn minutes_played(ms_played: i64) -> i64 {
    (ms_played as f64 / 60_000.0).round() as i64
}

/// Compute the derived fields for a (truncated to the second) instant
/// as seen on the wall clock at `offset`.
pub fn derive(ts: DateTime<Utc>, ms_played: i64, raw: &RawRecord, offset: &FixedOffset) -> Derived {
    let local = ts.with_timezone(offset);
    Derived {
        year: local.year(),
        month: local.month0(),
        date: local.date_naive(),
        hour: local.hour(),
        day_of_week: local.weekday().num_days_from_sunday(),
        minutes_played: minutes_played(ms_played),
        is_track: raw.spotify_track_uri.is_some(),
        is_podcast: raw.spotify_episode_uri.is_some(),
        is_audiobook: raw.audiobook_uri.is_some(),
    }
}

/// Validate and enrich a single exported record.
pub fn enrich(raw: &RawRecord, offset: &FixedOffset) -> Result<NewListeningEvent> {
    let ts = raw
        .ts
        .as_deref()
        .ok_or_else(|| Error::MalformedRecord("missing ts".to_string()))?;
    let ts = parse_ts(ts)?;
    let ts = ts
        .with_nanosecond(0)
        .ok_or_else(|| Error::MalformedRecord(format!("can't truncate ts {:?}", ts)))?;
    let ms_played = match raw.ms_played {
        None => return Err(Error::MalformedRecord("missing ms_played".to_string())),
        Some(ms) if ms < 0 => {
            return Err(Error::MalformedRecord(format!("negative ms_played {}", ms)))
        }
        Some(ms) => ms,
    };
    let derived = derive(ts, ms_played, raw, offset);
    Ok(NewListeningEvent {
        id: raw.id,
        ts,
        ms_played,
        spotify_track_uri: raw.spotify_track_uri.clone(),
        spotify_episode_uri: raw.spotify_episode_uri.clone(),
        audiobook_uri: raw.audiobook_uri.clone(),
        track_name: raw.master_metadata_track_name.clone(),
        artist_name: raw.master_metadata_album_artist_name.clone(),
        album_name: raw.master_metadata_album_album_name.clone(),
        platform: raw.platform.clone(),
        skipped: raw.skipped.unwrap_or(false),
        reason_end: raw.reason_end.clone(),
        derived,
    })
}

/// Something the store can import: either an already typed record or an
/// entry straight out of an export file that hasn't been checked yet.
pub trait ExportEntry {
    fn to_event(&self, offset: &FixedOffset) -> Result<NewListeningEvent>;
}

impl ExportEntry for RawRecord {
    fn to_event(&self, offset: &FixedOffset) -> Result<NewListeningEvent> {
        enrich(self, offset)
    }
}

impl ExportEntry for serde_json::Value {
    /// An entry whose fields have the wrong json types is malformed,
    /// same as one missing them.
    fn to_event(&self, offset: &FixedOffset) -> Result<NewListeningEvent> {
        let raw = RawRecord::deserialize(self)
            .map_err(|e| Error::MalformedRecord(format!("invalid entry: {}", e)))?;
        enrich(&raw, offset)
    }
}

/// Read one exported json file. Only the top level array is checked here,
/// entries are validated one by one at import.
pub async fn load_export_file(path: impl AsRef<Path>) -> Result<Vec<serde_json::Value>> {
    let s = async_std::fs::read_to_string(path.as_ref()).await?;
    Ok(serde_json::from_str(&s)?)
}

/// Read every `*.json` file in `dir`, in file name order. Exports are split
/// across several `Streaming_History_Audio_*.json` files.
pub async fn load_export_dir(dir: impl AsRef<Path>) -> Result<Vec<serde_json::Value>> {
    let mut paths: Vec<PathBuf> = vec![];
    let mut entries = async_std::fs::read_dir(dir.as_ref()).await?;
    while let Some(entry) = entries.next().await {
        let path = entry?.path();
        if path.extension().map(|ext| ext == "json").unwrap_or(false) {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));

    let mut records = vec![];
    for path in paths {
        let mut chunk = load_export_file(&path).await?;
        slog::debug!(crate::LOG, "loaded export file"; "path" => path.to_string_lossy().to_string(), "records" => chunk.len());
        records.append(&mut chunk);
    }
    Ok(records)
}

/// Load a single file or a whole export directory
pub async fn load_export(path: impl AsRef<Path>) -> Result<Vec<serde_json::Value>> {
    let path = path.as_ref();
    if path.is_dir().await {
        load_export_dir(path).await
    } else {
        load_export_file(path).await
    }
}
