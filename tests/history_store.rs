use chrono::{FixedOffset, NaiveDate};
use spot_history::analytics;
use spot_history::models::RawRecord;
use spot_history::store::{HistoryStore, StoreOptions};
use spot_history::summary::{StaticPreferences, SummaryService, TopArtist, TopTrack};
use spot_history::{import, Error};
use std::sync::Arc;

fn utc() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

async fn memory_store() -> HistoryStore {
    HistoryStore::open(StoreOptions::in_memory(utc()))
        .await
        .expect("open in-memory store")
}

fn play(ts: &str, uri: &str, artist: &str, ms: i64) -> RawRecord {
    RawRecord {
        ts: Some(ts.to_string()),
        ms_played: Some(ms),
        spotify_track_uri: Some(uri.to_string()),
        master_metadata_track_name: Some(format!("{} song", artist)),
        master_metadata_album_artist_name: Some(artist.to_string()),
        master_metadata_album_album_name: Some(format!("{} album", artist)),
        platform: Some("linux".to_string()),
        skipped: Some(false),
        reason_end: Some("trackdone".to_string()),
        ..Default::default()
    }
}

#[async_std::test]
async fn init_is_idempotent() {
    let store = memory_store().await;
    store.init().await.unwrap();
    store.init().await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
}

#[async_std::test]
async fn repeated_plays_are_kept_as_separate_records() {
    let store = memory_store().await;
    let same = play("2024-01-01T10:00:00Z", "spotify:track:a", "A", 200_000);
    let summary = store.import_history(&[same.clone(), same]).await.unwrap();
    assert_eq!(summary.imported, 2);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.total, 2);

    let all = store.all(None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_ne!(all[0].id, all[1].id);
    assert_eq!(all[0].ts, all[1].ts);
}

#[async_std::test]
async fn explicit_key_conflicts_are_skipped() {
    let store = memory_store().await;
    let mut first = play("2024-01-01T10:00:00Z", "spotify:track:a", "A", 1_000);
    first.id = Some(7);
    let mut second = play("2024-01-02T10:00:00Z", "spotify:track:b", "B", 1_000);
    second.id = Some(7);
    let third = play("2024-01-03T10:00:00Z", "spotify:track:c", "C", 1_000);

    let summary = store
        .import_history(&[first, second, third])
        .await
        .unwrap();
    assert_eq!(summary.imported, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.total, 3);

    let all = store.all(None).await.unwrap();
    assert_eq!(all[0].id, 7);
    assert_eq!(all[0].track_name.as_deref(), Some("A song"));
}

#[async_std::test]
async fn malformed_records_are_skipped_not_fatal() {
    let store = memory_store().await;
    let mut no_ts = play("x", "spotify:track:a", "A", 1_000);
    no_ts.ts = None;
    let bad_ts = play("not a date", "spotify:track:a", "A", 1_000);
    let mut no_ms = play("2024-01-01T10:00:00Z", "spotify:track:a", "A", 1_000);
    no_ms.ms_played = None;
    let good = play("2024-01-01T10:00:00Z", "spotify:track:a", "A", 1_000);

    let summary = store
        .import_history(&[no_ts, bad_ts, no_ms, good])
        .await
        .unwrap();
    assert_eq!(summary.imported, 1);
    assert_eq!(summary.skipped, 3);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[async_std::test]
async fn chunked_imports_count_every_record() {
    let mut opts = StoreOptions::in_memory(utc());
    opts.import_chunk_size = 3;
    let store = HistoryStore::open(opts).await.unwrap();
    let records: Vec<RawRecord> = (0..10)
        .map(|i| play(&format!("2024-01-01T10:{:02}:00Z", i), "spotify:track:a", "A", 1_000))
        .collect();
    let summary = store.import_history(&records).await.unwrap();
    assert_eq!(summary.imported, 10);
    assert_eq!(store.count().await.unwrap(), 10);
    assert_eq!(store.all(Some(4)).await.unwrap().len(), 4);
}

#[async_std::test]
async fn derived_fields_round_trip() {
    let store = HistoryStore::open(StoreOptions::in_memory(FixedOffset::west_opt(5 * 3600).unwrap()))
        .await
        .unwrap();
    store
        .import_history(&[play("2024-01-01T03:00:00Z", "spotify:track:a", "A", 150_000)])
        .await
        .unwrap();
    let e = &store.all(None).await.unwrap()[0];
    // 22:00 on new year's eve five hours west
    assert_eq!(e.derived.year, 2023);
    assert_eq!(e.derived.month, 11);
    assert_eq!(e.derived.date, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    assert_eq!(e.derived.hour, 22);
    assert_eq!(e.derived.day_of_week, 0);
    assert_eq!(e.derived.minutes_played, 3);
    assert!(e.derived.is_track);
    assert_eq!(e.ts, import::parse_ts("2024-01-01T03:00:00Z").unwrap());
}

#[async_std::test]
async fn indexed_reads() {
    let store = memory_store().await;
    store
        .import_history(&[
            play("2023-12-31T10:00:00Z", "spotify:track:a", "A", 1_000),
            play("2024-01-01T10:00:00Z", "spotify:track:b", "B", 1_000),
            play("2024-01-02T10:00:00Z", "spotify:track:a", "A", 1_000),
            play("2024-02-01T10:00:00Z", "spotify:track:c", "C", 1_000),
        ])
        .await
        .unwrap();

    assert_eq!(store.by_year(2024).await.unwrap().len(), 3);
    assert_eq!(store.by_year(2023).await.unwrap().len(), 1);
    assert!(store.by_year(2019).await.unwrap().is_empty());

    let start = import::parse_ts("2024-01-01T10:00:00Z").unwrap();
    let end = import::parse_ts("2024-01-31T00:00:00Z").unwrap();
    let range = store.by_date_range(start, end).await.unwrap();
    assert_eq!(range.len(), 2);
    assert!(range[0].ts <= range[1].ts);

    assert_eq!(store.by_artist("A").await.unwrap().len(), 2);
    assert_eq!(store.by_track_uri("spotify:track:c").await.unwrap().len(), 1);
}

#[async_std::test]
async fn stats_of_an_empty_store() {
    let store = memory_store().await;
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_records, 0);
    assert!(!stats.has_data);
    let v = serde_json::to_value(&stats).unwrap();
    assert_eq!(v, serde_json::json!({ "totalRecords": 0, "hasData": false }));
}

#[async_std::test]
async fn stats_cover_the_store() {
    let store = memory_store().await;
    let mut episode = play("2024-01-11T00:00:00Z", "x", "Host", 600_000);
    episode.spotify_track_uri = None;
    episode.spotify_episode_uri = Some("spotify:episode:1".to_string());
    store
        .import_history(&[
            play("2023-12-22T00:00:00Z", "spotify:track:a", "A", 1_800_000),
            play("2024-01-01T00:00:00Z", "spotify:track:b", "B", 1_800_000),
            play("2024-01-01T01:00:00Z", "spotify:track:b", "B", 1_800_000),
            episode,
        ])
        .await
        .unwrap();

    let stats = store.stats().await.unwrap();
    assert!(stats.has_data);
    assert_eq!(stats.total_records, 4);
    let details = stats.details.unwrap();
    assert_eq!(details.years_covered, 2);
    assert_eq!(details.total_minutes, 100);
    assert_eq!(details.total_hours, 2);
    assert_eq!(details.total_days, 0);
    assert_eq!(details.track_count, 3);
    assert_eq!(details.unique_tracks, 2);
    assert_eq!(details.unique_artists, 3);
    // 4 records over 20 days
    assert_eq!(details.average_per_day, 0);
    assert_eq!(details.oldest_date, import::parse_ts("2023-12-22T00:00:00Z").unwrap());
    assert_eq!(details.newest_date, import::parse_ts("2024-01-11T00:00:00Z").unwrap());
}

#[async_std::test]
async fn stats_follow_imports_and_clears() {
    let store = memory_store().await;
    store
        .import_history(&[play("2024-01-01T00:00:00Z", "spotify:track:a", "A", 1_000)])
        .await
        .unwrap();
    assert_eq!(store.stats().await.unwrap().total_records, 1);

    store
        .import_history(&[play("2024-01-02T00:00:00Z", "spotify:track:a", "A", 1_000)])
        .await
        .unwrap();
    assert_eq!(store.stats().await.unwrap().total_records, 2);

    store.clear_history().await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(!store.stats().await.unwrap().has_data);
    assert!(store.all(None).await.unwrap().is_empty());
}

#[async_std::test]
async fn file_backed_store_persists_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.db");
    let mut opts = StoreOptions::in_memory(utc());
    opts.url = format!("sqlite://{}", path.display());
    opts.max_connections = 2;

    let store = HistoryStore::open(opts.clone()).await.unwrap();
    store
        .import_history(&[play("2024-01-01T00:00:00Z", "spotify:track:a", "A", 1_000)])
        .await
        .unwrap();
    store.close().await;

    let reopened = HistoryStore::open(opts).await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 1);
    reopened.close().await;
}

#[async_std::test]
async fn unreachable_store_is_reported() {
    let mut opts = StoreOptions::in_memory(utc());
    opts.url = "sqlite:///definitely/not/a/real/dir/history.db".to_string();
    match HistoryStore::open(opts).await {
        Err(Error::StoreUnavailable(_)) => {}
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("expected the store to be unavailable"),
    }
}

#[async_std::test]
async fn export_directory_import() {
    let dir = tempfile::tempdir().unwrap();
    let first = serde_json::to_string(&vec![
        play("2024-01-01T00:00:00Z", "spotify:track:a", "A", 1_000),
        play("2024-01-02T00:00:00Z", "spotify:track:b", "B", 1_000),
    ])
    .unwrap();
    let second = serde_json::to_string(&vec![play("2024-01-03T00:00:00Z", "spotify:track:c", "C", 1_000)]).unwrap();
    std::fs::write(dir.path().join("Streaming_History_Audio_2024_1.json"), first).unwrap();
    std::fs::write(dir.path().join("Streaming_History_Audio_2024_0.json"), second).unwrap();
    std::fs::write(dir.path().join("ReadMeFirst.pdf"), "not json").unwrap();

    let path = dir.path().to_string_lossy().to_string();
    let records = import::load_export(&path).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["ts"], "2024-01-03T00:00:00Z");

    let store = memory_store().await;
    let summary = store.import_history(&records).await.unwrap();
    assert_eq!(summary.imported, 3);
}

#[async_std::test]
async fn wrongly_typed_entries_are_counted_as_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Streaming_History_Audio_2024.json");
    std::fs::write(
        &path,
        r#"[
            {"ts": "2024-01-01T00:00:00Z", "ms_played": 1500, "spotify_track_uri": "spotify:track:a"},
            {"ts": "2024-01-02T00:00:00Z", "ms_played": "oops"},
            {"ts": "2024-01-03T00:00:00Z", "ms_played": 1500.5},
            {"ts": "2024-01-04T00:00:00Z", "ms_played": 2000, "skipped": true}
        ]"#,
    )
    .unwrap();

    let path = path.to_string_lossy().to_string();
    let entries = import::load_export(&path).await.unwrap();
    assert_eq!(entries.len(), 4);

    let store = memory_store().await;
    let summary = store.import_history(&entries).await.unwrap();
    assert_eq!(summary.imported, 2);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.total, 4);
    assert_eq!(store.count().await.unwrap(), 2);
}

#[async_std::test]
async fn stats_are_never_stale_after_a_concurrent_import() {
    let store = Arc::new(memory_store().await);
    for i in 0..20 {
        let reader = store.clone();
        let stats = async_std::task::spawn(async move { reader.stats().await.unwrap() });
        store
            .import_history(&[play(
                &format!("2024-01-01T00:{:02}:00Z", i),
                "spotify:track:a",
                "A",
                1_000,
            )])
            .await
            .unwrap();
        stats.await;
        assert_eq!(store.stats().await.unwrap().total_records, i + 1);
    }
}

#[async_std::test]
async fn analytics_over_queried_records() {
    let store = memory_store().await;
    store
        .import_history(&[
            play("2024-01-01T09:00:00Z", "spotify:track:a", "A", 200_000),
            play("2024-01-02T09:00:00Z", "spotify:track:a", "A", 200_000),
            play("2024-01-03T09:00:00Z", "spotify:track:b", "B", 200_000),
        ])
        .await
        .unwrap();
    let events = store.by_year(2024).await.unwrap();
    let top = analytics::top_tracks(&events, 10);
    assert_eq!(top[0].uri, "spotify:track:a");
    assert_eq!(top[0].play_count, 2);
    let streaks = analytics::listening_streaks(&events, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
    assert_eq!(streaks.current, 3);
    assert_eq!(streaks.longest, 3);
    let timeline = analytics::discovery(&events);
    assert_eq!(timeline.total_artists_discovered, 2);
}

#[async_std::test]
async fn dashboard_combines_history_and_preferences() {
    let store = Arc::new(memory_store().await);
    store
        .import_history(&[
            play("2024-01-01T09:00:00Z", "spotify:track:a", "A", 200_000),
            play("2024-01-02T09:00:00Z", "spotify:track:b", "B", 200_000),
        ])
        .await
        .unwrap();
    let preferences = StaticPreferences {
        top_tracks: vec![TopTrack {
            name: "now".to_string(),
            popularity: Some(80),
            duration_ms: Some(120_000),
            ..Default::default()
        }],
        top_artists: vec![TopArtist {
            name: "A".to_string(),
            genres: vec!["indie".to_string(), "rock".to_string()],
            ..Default::default()
        }],
    };
    let service = SummaryService::new(store, preferences).with_top_n(5);
    let dashboard = service
        .dashboard(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
        .await
        .unwrap();
    assert_eq!(dashboard.history.summary.total_plays, 2);
    assert_eq!(dashboard.history.streaks.current, 2);
    assert_eq!(dashboard.current.total_minutes, 2);
    assert_eq!(dashboard.current.popularity_trend.popular, 1);
    // one artist of ten, two genres of five
    assert_eq!(dashboard.diversity_score, 25);
}
