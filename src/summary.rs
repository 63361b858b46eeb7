/*!
Summary service: combines the locally computed history analytics with
"current" top tracks/artists fetched from the remote api by the caller.
*/
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use crate::analytics::{self, HistoryOverview};
use crate::error::Result;
use crate::store::HistoryStore;
use crate::utils::percent;

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ArtistRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AlbumRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A track as returned by the remote top-tracks / recently-played api
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TopTrack {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub popularity: Option<u32>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TopArtist {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub popularity: Option<u32>,
}

/// One recently-played item
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RecentPlay {
    pub played_at: DateTime<Utc>,
    pub track: TopTrack,
}

/// Supplier of the user's current preferences. Fetching (and keeping a
/// valid bearer credential for) the remote api is up to the implementor.
#[async_trait::async_trait]
pub trait PreferenceSource: Send + Sync {
    async fn top_tracks(&self) -> Result<Vec<TopTrack>>;
    async fn top_artists(&self) -> Result<Vec<TopArtist>>;
}

/// Preferences the caller already fetched
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct StaticPreferences {
    #[serde(default)]
    pub top_tracks: Vec<TopTrack>,
    #[serde(default)]
    pub top_artists: Vec<TopArtist>,
}

#[async_trait::async_trait]
impl PreferenceSource for StaticPreferences {
    async fn top_tracks(&self) -> Result<Vec<TopTrack>> {
        Ok(self.top_tracks.clone())
    }
    async fn top_artists(&self) -> Result<Vec<TopArtist>> {
        Ok(self.top_artists.clone())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct GenreCount {
    pub genre: String,
    pub count: usize,
}

/// Genre occurrences across `artists`, most common first. Equal counts
/// keep the order the genres were first seen in.
pub fn extract_genres(artists: &[TopArtist]) -> Vec<GenreCount> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut genres: Vec<GenreCount> = vec![];
    for genre in artists.iter().flat_map(|a| a.genres.iter()) {
        match index.get(genre.as_str()) {
            Some(i) => genres[*i].count += 1,
            None => {
                index.insert(genre, genres.len());
                genres.push(GenreCount {
                    genre: genre.clone(),
                    count: 1,
                });
            }
        }
    }
    genres.sort_by(|a, b| b.count.cmp(&a.count));
    genres
}

/// Average of the artist count against a ceiling of 10 and the genre
/// count against a ceiling of 5, each capped at 100.
pub fn diversity_score(artist_count: usize, genre_count: usize) -> u32 {
    let artist_score = (artist_count as f64 / 10.0 * 100.0).min(100.0);
    let genre_score = (genre_count as f64 / 5.0 * 100.0).min(100.0);
    ((artist_score + genre_score) / 2.0).round() as u32
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct PopularityTrend {
    pub average: u32,
    /// popularity above 70
    pub popular: usize,
    /// popularity below 40
    pub niche: usize,
    /// share of popular tracks, percent with one decimal
    pub mainstream: f64,
}

pub fn popularity_trend(tracks: &[TopTrack]) -> PopularityTrend {
    if tracks.is_empty() {
        return PopularityTrend::default();
    }
    let total: u64 = tracks.iter().map(|t| t.popularity.unwrap_or(0) as u64).sum();
    let popular = tracks
        .iter()
        .filter(|t| t.popularity.map(|p| p > 70).unwrap_or(false))
        .count();
    let niche = tracks
        .iter()
        .filter(|t| t.popularity.map(|p| p < 40).unwrap_or(false))
        .count();
    PopularityTrend {
        average: (total as f64 / tracks.len() as f64).round() as u32,
        popular,
        niche,
        mainstream: percent(popular, tracks.len()),
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearStats {
    pub total_minutes: u64,
    pub top_track: Option<TopTrack>,
    pub top_artist: Option<TopArtist>,
    pub top_genres: Vec<GenreCount>,
    pub popularity_trend: PopularityTrend,
    pub track_count: usize,
    pub artist_count: usize,
}

pub fn year_stats(top_tracks: &[TopTrack], top_artists: &[TopArtist]) -> YearStats {
    let total_ms: u64 = top_tracks.iter().map(|t| t.duration_ms.unwrap_or(0)).sum();
    let mut top_genres = extract_genres(top_artists);
    top_genres.truncate(5);
    YearStats {
        total_minutes: (total_ms as f64 / 60_000.0).round() as u64,
        top_track: top_tracks.first().cloned(),
        top_artist: top_artists.first().cloned(),
        top_genres,
        popularity_trend: popularity_trend(top_tracks),
        track_count: top_tracks.len(),
        artist_count: top_artists.len(),
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListeningStats {
    pub total_tracks: usize,
    pub unique_artists: usize,
    pub unique_albums: usize,
}

/// Track count plus distinct artist and album ids
pub fn listening_stats(tracks: &[TopTrack]) -> ListeningStats {
    let artists: HashSet<&str> = tracks
        .iter()
        .flat_map(|t| t.artists.iter())
        .filter_map(|a| a.id.as_deref())
        .collect();
    let albums: HashSet<&str> = tracks
        .iter()
        .filter_map(|t| t.album.as_ref())
        .filter_map(|a| a.id.as_deref())
        .collect();
    ListeningStats {
        total_tracks: tracks.len(),
        unique_artists: artists.len(),
        unique_albums: albums.len(),
    }
}

/// Recently played items bucketed by their local calendar date
pub fn group_by_day(recent: &[RecentPlay], offset: &FixedOffset) -> BTreeMap<NaiveDate, Vec<RecentPlay>> {
    let mut days: BTreeMap<NaiveDate, Vec<RecentPlay>> = BTreeMap::new();
    for play in recent {
        let date = play.played_at.with_timezone(offset).date_naive();
        days.entry(date).or_default().push(play.clone());
    }
    days
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentPatterns {
    pub peak_hour: usize,
    pub peak_hour_label: String,
    pub peak_day: usize,
    pub peak_day_name: &'static str,
    pub hour_distribution: [u64; 24],
    pub day_distribution: [u64; 7],
}

/// Hour and weekday histograms of recently played items
pub fn listening_patterns(recent: &[RecentPlay], offset: &FixedOffset) -> RecentPatterns {
    use chrono::{Datelike, Timelike};

    let mut hours = [0u64; 24];
    let mut days = [0u64; 7];
    for play in recent {
        let local = play.played_at.with_timezone(offset);
        hours[local.hour() as usize] += 1;
        days[local.weekday().num_days_from_sunday() as usize] += 1;
    }
    let peak_hour = analytics::peak(&hours);
    let peak_day = analytics::peak(&days);
    RecentPatterns {
        peak_hour,
        peak_hour_label: analytics::hour_label(peak_hour),
        peak_day,
        peak_day_name: analytics::day_name(peak_day),
        hour_distribution: hours,
        day_distribution: days,
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub history: HistoryOverview,
    pub current: YearStats,
    pub diversity_score: u32,
}

pub struct SummaryService<P> {
    store: Arc<HistoryStore>,
    preferences: P,
    top_n: usize,
}

impl<P: PreferenceSource> SummaryService<P> {
    pub fn new(store: Arc<HistoryStore>, preferences: P) -> Self {
        Self {
            store,
            preferences,
            top_n: 50,
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    /// Full history overview plus the current-preference summary
    pub async fn dashboard(&self, today: NaiveDate) -> Result<Dashboard> {
        let top_tracks = self.preferences.top_tracks().await?;
        let top_artists = self.preferences.top_artists().await?;
        let events = self.store.all(None).await?;
        slog::debug!(
            crate::LOG, "building dashboard";
            "events" => events.len(),
            "top_tracks" => top_tracks.len(),
            "top_artists" => top_artists.len(),
        );

        let history = analytics::history_overview(&events, self.top_n, today);
        let genre_count = extract_genres(&top_artists).len();
        Ok(Dashboard {
            history,
            current: year_stats(&top_tracks, &top_artists),
            diversity_score: diversity_score(top_artists.len(), genre_count),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artist(name: &str, genres: &[&str]) -> TopArtist {
        TopArtist {
            name: name.to_string(),
            genres: genres.iter().map(|g| g.to_string()).collect(),
            ..Default::default()
        }
    }

    fn track(name: &str, popularity: u32, duration_ms: u64) -> TopTrack {
        TopTrack {
            name: name.to_string(),
            popularity: Some(popularity),
            duration_ms: Some(duration_ms),
            ..Default::default()
        }
    }

    #[test]
    fn genres_by_count() {
        let artists = vec![
            artist("a", &["indie", "rock"]),
            artist("b", &["pop", "rock"]),
            artist("c", &["pop", "rock"]),
            artist("d", &[]),
        ];
        let genres = extract_genres(&artists);
        assert_eq!(
            genres,
            vec![
                GenreCount { genre: "rock".into(), count: 3 },
                GenreCount { genre: "pop".into(), count: 2 },
                GenreCount { genre: "indie".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn diversity_is_capped() {
        assert_eq!(diversity_score(0, 0), 0);
        assert_eq!(diversity_score(5, 0), 25);
        assert_eq!(diversity_score(10, 5), 100);
        assert_eq!(diversity_score(50, 50), 100);
        assert_eq!(diversity_score(3, 1), 25);
    }

    #[test]
    fn popularity_buckets() {
        let tracks = vec![
            track("a", 90, 0),
            track("b", 71, 0),
            track("c", 70, 0),
            track("d", 20, 0),
        ];
        let trend = popularity_trend(&tracks);
        assert_eq!(trend.average, 63);
        assert_eq!(trend.popular, 2);
        assert_eq!(trend.niche, 1);
        assert_eq!(trend.mainstream, 50.0);
        assert_eq!(popularity_trend(&[]), PopularityTrend::default());
    }

    #[test]
    fn year_stats_composition() {
        let tracks = vec![track("first", 80, 200_000), track("second", 30, 100_000)];
        let artists = vec![
            artist("x", &["a", "b", "c"]),
            artist("y", &["d", "e", "f", "a"]),
        ];
        let stats = year_stats(&tracks, &artists);
        assert_eq!(stats.total_minutes, 5);
        assert_eq!(stats.top_track.unwrap().name, "first");
        assert_eq!(stats.top_artist.unwrap().name, "x");
        assert_eq!(stats.top_genres.len(), 5);
        assert_eq!(stats.top_genres[0].genre, "a");
        assert_eq!(stats.track_count, 2);
        assert_eq!(stats.artist_count, 2);

        let empty = year_stats(&[], &[]);
        assert_eq!(empty.total_minutes, 0);
        assert!(empty.top_track.is_none());
    }

    #[test]
    fn listening_stats_count_ids() {
        let mut a = track("a", 1, 1);
        a.artists = vec![
            ArtistRef { id: Some("1".into()), name: None },
            ArtistRef { id: Some("2".into()), name: None },
        ];
        a.album = Some(AlbumRef { id: Some("al".into()), name: None });
        let mut b = track("b", 1, 1);
        b.artists = vec![ArtistRef { id: Some("2".into()), name: None }];
        b.album = Some(AlbumRef { id: Some("al".into()), name: None });
        let stats = listening_stats(&[a, b]);
        assert_eq!(stats.total_tracks, 2);
        assert_eq!(stats.unique_artists, 2);
        assert_eq!(stats.unique_albums, 1);
    }

    #[test]
    fn recent_plays_by_day_and_hour() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let play = |ts: &str| RecentPlay {
            played_at: ts.parse().unwrap(),
            track: track("t", 1, 1),
        };
        let recent = vec![
            play("2024-01-01T05:00:00Z"),
            play("2024-01-01T21:00:00Z"),
            play("2024-01-02T21:30:00Z"),
        ];
        let days = group_by_day(&recent, &utc);
        assert_eq!(days.len(), 2);
        assert_eq!(days[&NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()].len(), 2);

        let patterns = listening_patterns(&recent, &utc);
        assert_eq!(patterns.peak_hour, 21);
        // monday
        assert_eq!(patterns.peak_day, 1);
        assert_eq!(patterns.peak_day_name, "Monday");
    }

    #[test]
    fn json_shapes_deserialize() {
        let prefs: StaticPreferences = serde_json::from_str(
            r#"{
                "top_tracks": [{"id": "1", "name": "song", "popularity": 55, "duration_ms": 1000,
                                "artists": [{"id": "a", "name": "A"}], "album": {"id": "al", "name": "Al"},
                                "explicit": false}],
                "top_artists": [{"id": "a", "name": "A", "genres": ["indie"], "followers": {"total": 3}}]
            }"#,
        )
        .unwrap();
        assert_eq!(prefs.top_tracks[0].popularity, Some(55));
        assert_eq!(prefs.top_artists[0].genres, vec!["indie".to_string()]);
    }
}
