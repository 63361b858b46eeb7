use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// One event as it appears in a streaming-history export.
///
/// Everything is optional: missing fields are caught during enrichment.
/// Export files are read as untyped json entries and each one is turned
/// into a `RawRecord` on its own, so wrongly typed fields only reject
/// that entry.
#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
pub struct RawRecord {
    // only present when re-importing previously exported store rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub ms_played: Option<i64>,
    #[serde(default)]
    pub spotify_track_uri: Option<String>,
    #[serde(default)]
    pub spotify_episode_uri: Option<String>,
    #[serde(default)]
    pub audiobook_uri: Option<String>,
    #[serde(default)]
    pub master_metadata_track_name: Option<String>,
    #[serde(default)]
    pub master_metadata_album_artist_name: Option<String>,
    #[serde(default)]
    pub master_metadata_album_album_name: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub skipped: Option<bool>,
    #[serde(default)]
    pub reason_end: Option<String>,
}

/// An enriched event that hasn't been written yet. `id` is only set
/// when the source record supplied one, otherwise the store assigns it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewListeningEvent {
    pub id: Option<i64>,
    pub ts: DateTime<Utc>,
    pub ms_played: i64,
    pub spotify_track_uri: Option<String>,
    pub spotify_episode_uri: Option<String>,
    pub audiobook_uri: Option<String>,
    pub track_name: Option<String>,
    pub artist_name: Option<String>,
    pub album_name: Option<String>,
    pub platform: Option<String>,
    pub skipped: bool,
    pub reason_end: Option<String>,
    pub derived: Derived,
}

impl NewListeningEvent {
    pub fn into_event(self, id: i64) -> ListeningEvent {
        ListeningEvent {
            id,
            ts: self.ts,
            ms_played: self.ms_played,
            spotify_track_uri: self.spotify_track_uri,
            spotify_episode_uri: self.spotify_episode_uri,
            audiobook_uri: self.audiobook_uri,
            track_name: self.track_name,
            artist_name: self.artist_name,
            album_name: self.album_name,
            platform: self.platform,
            skipped: self.skipped,
            reason_end: self.reason_end,
            derived: self.derived,
        }
    }
}

/// Calendar, duration and content-type fields computed once at import.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Derived {
    pub year: i32,
    // 0 = January
    pub month: u32,
    pub date: NaiveDate,
    pub hour: u32,
    // 0 = Sunday
    #[serde(rename = "dayOfWeek")]
    pub day_of_week: u32,
    pub minutes_played: i64,
    pub is_track: bool,
    pub is_podcast: bool,
    pub is_audiobook: bool,
}

/// A stored listening event. Immutable once written.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ListeningEvent {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub ms_played: i64,
    pub spotify_track_uri: Option<String>,
    pub spotify_episode_uri: Option<String>,
    pub audiobook_uri: Option<String>,
    #[serde(rename = "master_metadata_track_name")]
    pub track_name: Option<String>,
    #[serde(rename = "master_metadata_album_artist_name")]
    pub artist_name: Option<String>,
    #[serde(rename = "master_metadata_album_album_name")]
    pub album_name: Option<String>,
    pub platform: Option<String>,
    pub skipped: bool,
    pub reason_end: Option<String>,
    #[serde(flatten)]
    pub derived: Derived,
}

fn decode_err<E>(column: &str, e: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    }
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for ListeningEvent {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        let ts: String = row.try_get("ts")?;
        let ts = DateTime::parse_from_rfc3339(&ts)
            .map_err(|e| decode_err("ts", e))?
            .with_timezone(&Utc);
        let date: String = row.try_get("date")?;
        let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| decode_err("date", e))?;
        let month: i64 = row.try_get("month")?;
        let hour: i64 = row.try_get("hour")?;
        let day_of_week: i64 = row.try_get("day_of_week")?;
        Ok(ListeningEvent {
            id: row.try_get("id")?,
            ts,
            ms_played: row.try_get("ms_played")?,
            spotify_track_uri: row.try_get("spotify_track_uri")?,
            spotify_episode_uri: row.try_get("spotify_episode_uri")?,
            audiobook_uri: row.try_get("audiobook_uri")?,
            track_name: row.try_get("master_metadata_track_name")?,
            artist_name: row.try_get("master_metadata_album_artist_name")?,
            album_name: row.try_get("master_metadata_album_album_name")?,
            platform: row.try_get("platform")?,
            skipped: row.try_get("skipped")?,
            reason_end: row.try_get("reason_end")?,
            derived: Derived {
                year: row.try_get("year")?,
                month: month as u32,
                date,
                hour: hour as u32,
                day_of_week: day_of_week as u32,
                minutes_played: row.try_get("minutes_played")?,
                is_track: row.try_get("is_track")?,
                is_podcast: row.try_get("is_podcast")?,
                is_audiobook: row.try_get("is_audiobook")?,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub total: usize,
}

/// Store-wide statistics. Everything past `has_data` is omitted
/// when the store is empty.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_records: i64,
    pub has_data: bool,
    #[serde(flatten)]
    pub details: Option<StoreStatsDetails>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatsDetails {
    pub oldest_date: DateTime<Utc>,
    pub newest_date: DateTime<Utc>,
    pub years_covered: i32,
    pub total_minutes: i64,
    pub total_hours: i64,
    pub total_days: i64,
    pub track_count: i64,
    pub unique_tracks: i64,
    pub unique_artists: i64,
    pub average_per_day: i64,
}
