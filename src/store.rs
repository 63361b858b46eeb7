/*!
Durable storage of enriched listening events

All writes go through a single `HistoryStore` handle which serializes
imports and clears. Reads run directly against the pool.
*/
use std::str::FromStr;

use async_mutex::Mutex;
use cached::stores::TimedCache;
use cached::Cached;
use chrono::{DateTime, Datelike, FixedOffset, Utc};
use slog::o;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::{Error, Result};
use crate::import::ExportEntry;
use crate::models::{ImportSummary, ListeningEvent, NewListeningEvent, StoreStats, StoreStatsDetails};
use crate::{import, utils, Config, LOG};

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub url: String,
    pub max_connections: u32,
    pub utc_offset: FixedOffset,
    pub import_chunk_size: usize,
    pub stats_cache_seconds: u64,
}

impl StoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.db_url.clone(),
            max_connections: config.db_max_connections,
            utc_offset: config.utc_offset(),
            import_chunk_size: config.import_chunk_size,
            stats_cache_seconds: config.stats_cache_seconds,
        }
    }

    /// A private in-memory database. Pinned to a single connection
    /// since every sqlite memory connection is its own database.
    pub fn in_memory(utc_offset: FixedOffset) -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            utc_offset,
            import_chunk_size: 1000,
            stats_cache_seconds: 60,
        }
    }
}

pub struct HistoryStore {
    pool: SqlitePool,
    utc_offset: FixedOffset,
    import_chunk_size: usize,
    write_lock: Mutex<()>,
    stats_cache: Mutex<TimedCache<(), StoreStats>>,
}

const INSERT_EVENT: &str = "
    insert or ignore into listening_history (
        id, ts, ms_played,
        spotify_track_uri, spotify_episode_uri, audiobook_uri,
        master_metadata_track_name, master_metadata_album_artist_name,
        master_metadata_album_album_name,
        platform, skipped, reason_end,
        year, month, date, hour, day_of_week, minutes_played,
        is_track, is_podcast, is_audiobook
    )
    values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

impl HistoryStore {
    /// Connect to the configured database and make sure the schema exists
    pub async fn open(opts: StoreOptions) -> Result<Self> {
        let connect = SqliteConnectOptions::from_str(&opts.url)
            .map_err(Error::StoreUnavailable)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(opts.max_connections.max(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect)
            .await
            .map_err(Error::StoreUnavailable)?;
        slog::info!(LOG, "opened history store"; "url" => &opts.url);
        let store = Self {
            pool,
            utc_offset: opts.utc_offset,
            import_chunk_size: opts.import_chunk_size.max(1),
            write_lock: Mutex::new(()),
            stats_cache: Mutex::new(TimedCache::with_lifespan(opts.stats_cache_seconds)),
        };
        store.init().await?;
        Ok(store)
    }

    /// Create the table and its indexes if they don't exist yet.
    /// Safe to call any number of times.
    pub async fn init(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        slog::info!(LOG, "closed history store");
    }

    pub fn utc_offset(&self) -> &FixedOffset {
        &self.utc_offset
    }

    async fn invalidate_stats(&self) {
        self.stats_cache.lock().await.cache_clear();
    }

    async fn insert_event(conn: &mut SqliteConnection, event: &NewListeningEvent) -> Result<()> {
        let done = sqlx::query(INSERT_EVENT)
            .bind(event.id)
            .bind(utils::canonical_ts(&event.ts))
            .bind(event.ms_played)
            .bind(&event.spotify_track_uri)
            .bind(&event.spotify_episode_uri)
            .bind(&event.audiobook_uri)
            .bind(&event.track_name)
            .bind(&event.artist_name)
            .bind(&event.album_name)
            .bind(&event.platform)
            .bind(event.skipped)
            .bind(&event.reason_end)
            .bind(event.derived.year)
            .bind(event.derived.month as i64)
            .bind(event.derived.date.format("%Y-%m-%d").to_string())
            .bind(event.derived.hour as i64)
            .bind(event.derived.day_of_week as i64)
            .bind(event.derived.minutes_played)
            .bind(event.derived.is_track)
            .bind(event.derived.is_podcast)
            .bind(event.derived.is_audiobook)
            .execute(&mut *conn)
            .await?;
        // `or ignore` only drops a row on a key conflict, which can only
        // happen when the record brought its own id
        if done.rows_affected() == 0 {
            return Err(Error::DuplicateRecord(event.id.unwrap_or_default()));
        }
        Ok(())
    }

    /// Writes `records` chunk by chunk. `summary` only ever holds the
    /// counts of committed chunks, so it is still accurate when a later
    /// chunk fails.
    async fn import_chunks<R: ExportEntry + Sync>(
        &self,
        records: &[R],
        summary: &mut ImportSummary,
        log: &slog::Logger,
    ) -> Result<()> {
        for chunk in records.chunks(self.import_chunk_size) {
            let mut imported = 0;
            let mut skipped = 0;
            let mut tx = self.pool.begin().await?;
            for entry in chunk {
                let res = match entry.to_event(&self.utc_offset) {
                    Ok(event) => Self::insert_event(&mut *tx, &event).await,
                    Err(e) => Err(e),
                };
                match res {
                    Ok(()) => imported += 1,
                    Err(e) if e.is_record_level() => {
                        slog::debug!(log, "skipping record {}", e);
                        skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            tx.commit().await?;
            summary.imported += imported;
            summary.skipped += skipped;
            slog::info!(
                log, "import progress";
                "done" => summary.imported + summary.skipped,
                "total" => summary.total,
            );
        }
        Ok(())
    }

    /// Enrich and write every record. Records that are malformed or collide
    /// with an existing id are counted as skipped and the batch carries on.
    /// Counts are only returned once every record has been attempted.
    pub async fn import_history<R: ExportEntry + Sync>(&self, records: &[R]) -> Result<ImportSummary> {
        let _guard = self.write_lock.lock().await;
        let import_id = uuid::Uuid::new_v4().to_string();
        let log = LOG.new(o!("import_id" => import_id));
        slog::info!(log, "starting import of {} records", records.len());

        let mut summary = ImportSummary {
            imported: 0,
            skipped: 0,
            total: records.len(),
        };
        let res = self.import_chunks(records, &mut summary, &log).await;
        self.invalidate_stats().await;
        match res {
            Ok(()) => {
                slog::info!(
                    log, "import complete";
                    "imported" => summary.imported,
                    "skipped" => summary.skipped,
                    "total" => summary.total,
                );
                Ok(summary)
            }
            Err(e) => {
                // earlier chunks stay committed
                slog::error!(
                    log, "import failed {}", e;
                    "committed" => summary.imported,
                    "skipped" => summary.skipped,
                    "total" => summary.total,
                );
                Err(e)
            }
        }
    }

    /// Delete every stored record
    pub async fn clear_history(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("delete from listening_history")
            .execute(&self.pool)
            .await?;
        self.invalidate_stats().await;
        slog::info!(LOG, "history cleared");
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("select count(*) from listening_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// All records in insertion order, capped at `limit` when it's
    /// positive. A zero or missing limit means everything.
    pub async fn all(&self, limit: Option<i64>) -> Result<Vec<ListeningEvent>> {
        // sqlite treats a negative limit as "no limit"
        let limit = limit.filter(|l| *l > 0).unwrap_or(-1);
        let events = sqlx::query_as::<_, ListeningEvent>(
            "select * from listening_history order by id limit ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    pub async fn by_year(&self, year: i32) -> Result<Vec<ListeningEvent>> {
        let events = sqlx::query_as::<_, ListeningEvent>(
            "select * from listening_history where year = ? order by id",
        )
        .bind(year)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// Records with `start <= ts <= end`, oldest first
    pub async fn by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ListeningEvent>> {
        let events = sqlx::query_as::<_, ListeningEvent>(
            "
            select * from listening_history
            where ts >= ? and ts <= ?
            order by ts, id
            ",
        )
        .bind(utils::canonical_ts(&start))
        .bind(utils::canonical_ts(&end))
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    pub async fn by_artist(&self, artist: &str) -> Result<Vec<ListeningEvent>> {
        let events = sqlx::query_as::<_, ListeningEvent>(
            "select * from listening_history where master_metadata_album_artist_name = ? order by id",
        )
        .bind(artist)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    pub async fn by_track_uri(&self, uri: &str) -> Result<Vec<ListeningEvent>> {
        let events = sqlx::query_as::<_, ListeningEvent>(
            "select * from listening_history where spotify_track_uri = ? order by id",
        )
        .bind(uri)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// Store-wide totals. Cached until the next import or clear.
    pub async fn stats(&self) -> Result<StoreStats> {
        // held across the recompute so a concurrent write's invalidation
        // can only land after the fresh value is stored
        let mut cache = self.stats_cache.lock().await;
        if let Some(stats) = cache.cache_get(&()) {
            return Ok(stats.clone());
        }
        let stats = self.compute_stats().await?;
        cache.cache_set((), stats.clone());
        Ok(stats)
    }

    async fn compute_stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            "
            select
                count(*) as total_records,
                min(ts) as oldest,
                max(ts) as newest,
                coalesce(sum(minutes_played), 0) as total_minutes,
                coalesce(sum(case when is_track then 1 else 0 end), 0) as track_count,
                count(distinct spotify_track_uri) as unique_tracks,
                count(distinct master_metadata_album_artist_name) as unique_artists
            from listening_history
            ",
        )
        .fetch_one(&self.pool)
        .await?;

        let total_records: i64 = row.try_get("total_records")?;
        let oldest: Option<String> = row.try_get("oldest")?;
        let newest: Option<String> = row.try_get("newest")?;
        let (oldest, newest) = match (total_records, oldest, newest) {
            (0, _, _) | (_, None, _) | (_, _, None) => {
                return Ok(StoreStats {
                    total_records: 0,
                    has_data: false,
                    details: None,
                })
            }
            (_, Some(oldest), Some(newest)) => {
                (import::parse_ts(&oldest)?, import::parse_ts(&newest)?)
            }
        };

        let total_minutes: i64 = row.try_get("total_minutes")?;
        let elapsed_ms = (newest - oldest).num_milliseconds();
        let average_per_day = if elapsed_ms <= 0 {
            0
        } else {
            (total_records as f64 / (elapsed_ms as f64 / 86_400_000.0)).round() as i64
        };
        let years_covered = newest.with_timezone(&self.utc_offset).year()
            - oldest.with_timezone(&self.utc_offset).year()
            + 1;

        Ok(StoreStats {
            total_records,
            has_data: true,
            details: Some(StoreStatsDetails {
                oldest_date: oldest,
                newest_date: newest,
                years_covered,
                total_minutes,
                total_hours: utils::round_div(total_minutes, 60),
                total_days: utils::round_div(total_minutes, 60 * 24),
                track_count: row.try_get("track_count")?,
                unique_tracks: row.try_get("unique_tracks")?,
                unique_artists: row.try_get("unique_artists")?,
                average_per_day,
            }),
        })
    }
}
