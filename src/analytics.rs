/*!
Aggregations over a set of stored listening events

Everything in here is a pure function of its input slice: no I/O, no
clock reads (the evaluation date for streaks is passed in), no state.
Calendar fields always come from the values derived at import time.

The counting reductions (histograms, sums, distinct sets) could be split
across partitions and merged. Top-N ranking, streaks and discovery depend
on encounter/time order and expect the whole record set in one pass.
*/
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};

use crate::import::minutes_played;
use crate::models::ListeningEvent;
use crate::utils::{percent, round_div};

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// How many of the most recent discoveries are reported
pub const DISCOVERY_TAIL: usize = 100;

/// Keyed accumulators kept in first-encounter order, so a stable sort
/// afterwards breaks ties by whichever key showed up first.
struct Grouped<'a, V> {
    index: HashMap<&'a str, usize>,
    entries: Vec<V>,
}

impl<'a, V> Grouped<'a, V> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: vec![],
        }
    }

    fn entry(&mut self, key: &'a str, init: impl FnOnce() -> V) -> &mut V {
        let idx = match self.index.get(key) {
            Some(idx) => *idx,
            None => {
                self.entries.push(init());
                self.index.insert(key, self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx]
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackAggregate {
    pub rank: usize,
    pub uri: String,
    pub name: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub play_count: usize,
    pub total_ms: i64,
    pub total_minutes: i64,
    pub completed: usize,
    pub skipped: usize,
    pub average_ms: i64,
    pub skip_rate: f64,
}

/// Most played tracks (by uri), ignoring skipped plays
pub fn top_tracks(events: &[ListeningEvent], limit: usize) -> Vec<TrackAggregate> {
    let mut tracks: Grouped<TrackAggregate> = Grouped::new();
    for e in events {
        let uri = match &e.spotify_track_uri {
            Some(uri) if !e.skipped => uri,
            _ => continue,
        };
        let track = tracks.entry(uri, || TrackAggregate {
            rank: 0,
            uri: uri.clone(),
            name: e.track_name.clone(),
            artist: e.artist_name.clone(),
            album: e.album_name.clone(),
            play_count: 0,
            total_ms: 0,
            total_minutes: 0,
            completed: 0,
            skipped: 0,
            average_ms: 0,
            skip_rate: 0.0,
        });
        track.play_count += 1;
        track.total_ms += e.ms_played;
        if e.skipped {
            track.skipped += 1;
        } else {
            track.completed += 1;
        }
    }

    let mut tracks = tracks.entries;
    tracks.sort_by(|a, b| b.play_count.cmp(&a.play_count));
    tracks.truncate(limit);
    for (i, track) in tracks.iter_mut().enumerate() {
        track.rank = i + 1;
        track.total_minutes = minutes_played(track.total_ms);
        track.average_ms = round_div(track.total_ms, track.play_count as i64);
        track.skip_rate = percent(track.skipped, track.play_count);
    }
    tracks
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistAggregate {
    pub rank: usize,
    pub name: String,
    pub play_count: usize,
    pub total_ms: i64,
    pub total_minutes: i64,
    pub unique_tracks: usize,
    pub completed: usize,
    pub skipped: usize,
    pub average_ms: i64,
    pub skip_rate: f64,
}

/// Most played artists (by name), ignoring skipped plays
pub fn top_artists(events: &[ListeningEvent], limit: usize) -> Vec<ArtistAggregate> {
    let mut artists: Grouped<(ArtistAggregate, HashSet<&str>)> = Grouped::new();
    for e in events {
        let name = match &e.artist_name {
            Some(name) if !e.skipped => name,
            _ => continue,
        };
        let (artist, tracks) = artists.entry(name, || {
            (
                ArtistAggregate {
                    rank: 0,
                    name: name.clone(),
                    play_count: 0,
                    total_ms: 0,
                    total_minutes: 0,
                    unique_tracks: 0,
                    completed: 0,
                    skipped: 0,
                    average_ms: 0,
                    skip_rate: 0.0,
                },
                HashSet::new(),
            )
        });
        artist.play_count += 1;
        artist.total_ms += e.ms_played;
        if e.skipped {
            artist.skipped += 1;
        } else {
            artist.completed += 1;
        }
        if let Some(uri) = &e.spotify_track_uri {
            tracks.insert(uri.as_str());
        }
    }

    let mut artists = artists
        .entries
        .into_iter()
        .map(|(mut artist, tracks)| {
            artist.unique_tracks = tracks.len();
            artist
        })
        .collect::<Vec<_>>();
    artists.sort_by(|a, b| b.play_count.cmp(&a.play_count));
    artists.truncate(limit);
    for (i, artist) in artists.iter_mut().enumerate() {
        artist.rank = i + 1;
        artist.total_minutes = minutes_played(artist.total_ms);
        artist.average_ms = round_div(artist.total_ms, artist.play_count as i64);
        artist.skip_rate = percent(artist.skipped, artist.play_count);
    }
    artists
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimePatterns {
    pub peak_hour: usize,
    pub peak_hour_label: String,
    pub peak_day: usize,
    pub peak_day_name: &'static str,
    pub peak_month: usize,
    pub peak_month_name: &'static str,
    pub hour_distribution: [u64; 24],
    pub day_distribution: [u64; 7],
    pub month_distribution: [u64; 12],
}

/// Index of the largest bucket. Ties go to the lowest index.
pub fn peak(counts: &[u64]) -> usize {
    let mut best = 0;
    for (i, count) in counts.iter().enumerate() {
        if *count > counts[best] {
            best = i;
        }
    }
    best
}

pub fn hour_label(hour: usize) -> String {
    format!("{}:00 - {}:00", hour, hour + 1)
}

pub fn day_name(day: usize) -> &'static str {
    DAY_NAMES[day % 7]
}

/// Hour of day / day of week (sunday first) / month histograms of non-skipped plays
pub fn time_patterns(events: &[ListeningEvent]) -> TimePatterns {
    let mut hours = [0u64; 24];
    let mut days = [0u64; 7];
    let mut months = [0u64; 12];
    for e in events.iter().filter(|e| !e.skipped) {
        hours[e.derived.hour as usize % 24] += 1;
        days[e.derived.day_of_week as usize % 7] += 1;
        months[e.derived.month as usize % 12] += 1;
    }
    let peak_hour = peak(&hours);
    let peak_day = peak(&days);
    let peak_month = peak(&months);
    TimePatterns {
        peak_hour,
        peak_hour_label: hour_label(peak_hour),
        peak_day,
        peak_day_name: day_name(peak_day),
        peak_month,
        peak_month_name: MONTH_NAMES[peak_month],
        hour_distribution: hours,
        day_distribution: days,
        month_distribution: months,
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipBehavior {
    pub total_plays: usize,
    pub skipped: usize,
    pub completed: usize,
    pub skip_rate: f64,
    pub completion_rate: f64,
    pub skip_reasons: BTreeMap<String, usize>,
}

/// Skip and completion rates over records that have a track uri,
/// with skips broken down by end reason.
pub fn skip_behavior(events: &[ListeningEvent]) -> SkipBehavior {
    let mut total_plays = 0;
    let mut skipped = 0;
    let mut skip_reasons = BTreeMap::new();
    for e in events.iter().filter(|e| e.spotify_track_uri.is_some()) {
        total_plays += 1;
        if e.skipped {
            skipped += 1;
            let reason = e.reason_end.as_deref().unwrap_or("unknown");
            *skip_reasons.entry(reason.to_string()).or_insert(0) += 1;
        }
    }
    let completed = total_plays - skipped;
    SkipBehavior {
        total_plays,
        skipped,
        completed,
        skip_rate: percent(skipped, total_plays),
        completion_rate: percent(completed, total_plays),
        skip_reasons,
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformAggregate {
    pub platform: String,
    pub plays: usize,
    pub total_ms: i64,
    pub total_minutes: i64,
}

pub fn platforms(events: &[ListeningEvent]) -> Vec<PlatformAggregate> {
    let mut platforms: Grouped<PlatformAggregate> = Grouped::new();
    for e in events.iter().filter(|e| !e.skipped) {
        let name = e.platform.as_deref().unwrap_or("Unknown");
        let platform = platforms.entry(name, || PlatformAggregate {
            platform: name.to_string(),
            plays: 0,
            total_ms: 0,
            total_minutes: 0,
        });
        platform.plays += 1;
        platform.total_ms += e.ms_played;
    }
    let mut platforms = platforms.entries;
    for p in platforms.iter_mut() {
        p.total_minutes = minutes_played(p.total_ms);
    }
    platforms.sort_by(|a, b| b.plays.cmp(&a.plays));
    platforms
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearAggregate {
    pub year: i32,
    pub plays: usize,
    pub total_ms: i64,
    pub total_minutes: i64,
    pub total_hours: i64,
    pub unique_tracks: usize,
    pub unique_artists: usize,
    /// plays / 365, whatever the year length or coverage
    pub average_per_day: i64,
}

/// Per-year rollup of non-skipped plays, oldest year first
pub fn yearly_stats(events: &[ListeningEvent]) -> Vec<YearAggregate> {
    #[derive(Default)]
    struct Acc<'a> {
        plays: usize,
        total_ms: i64,
        tracks: HashSet<&'a str>,
        artists: HashSet<&'a str>,
    }

    let mut years: BTreeMap<i32, Acc> = BTreeMap::new();
    for e in events.iter().filter(|e| !e.skipped) {
        let acc = years.entry(e.derived.year).or_default();
        acc.plays += 1;
        acc.total_ms += e.ms_played;
        if let Some(uri) = &e.spotify_track_uri {
            acc.tracks.insert(uri);
        }
        if let Some(artist) = &e.artist_name {
            acc.artists.insert(artist);
        }
    }
    years
        .into_iter()
        .map(|(year, acc)| YearAggregate {
            year,
            plays: acc.plays,
            total_ms: acc.total_ms,
            total_minutes: minutes_played(acc.total_ms),
            total_hours: round_div(acc.total_ms, 3_600_000),
            unique_tracks: acc.tracks.len(),
            unique_artists: acc.artists.len(),
            average_per_day: round_div(acc.plays as i64, 365),
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakState {
    pub current: usize,
    pub longest: usize,
    pub last_listening_date: Option<NaiveDate>,
}

/// Consecutive-day listening runs over the local dates with at least one
/// non-skipped play.
///
/// `current` is the run ending at the latest listening date on or before
/// `today`, and is 0 unless that date is `today` or the day before.
pub fn listening_streaks(events: &[ListeningEvent], today: NaiveDate) -> StreakState {
    let dates: BTreeSet<NaiveDate> = events
        .iter()
        .filter(|e| !e.skipped)
        .map(|e| e.derived.date)
        .collect();
    let last_listening_date = match dates.iter().next_back() {
        None => return StreakState::default(),
        Some(d) => *d,
    };

    let mut longest = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;
    for date in &dates {
        run = match prev {
            Some(p) if (*date - p).num_days() == 1 => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(*date);
    }

    let mut current = 0;
    let mut later: Option<NaiveDate> = None;
    for date in dates.range(..=today).rev() {
        match later {
            None => {
                if (today - *date).num_days() > 1 {
                    break;
                }
                current = 1;
            }
            Some(l) if (l - *date).num_days() == 1 => current += 1,
            Some(_) => break,
        }
        later = Some(*date);
    }

    StreakState {
        current,
        longest,
        last_listening_date: Some(last_listening_date),
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    pub date: NaiveDate,
    pub ts: DateTime<Utc>,
    pub artist: Option<String>,
    pub track: Option<String>,
    pub track_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryTimeline {
    pub total_artists_discovered: usize,
    pub total_tracks_discovered: usize,
    /// the most recent discoveries, oldest first
    pub discoveries: Vec<Discovery>,
}

/// Walk non-skipped plays in time order and record every play that
/// introduces an unseen artist or an unseen track. A play that introduces
/// both is still a single discovery.
pub fn discovery(events: &[ListeningEvent]) -> DiscoveryTimeline {
    let mut ordered: Vec<&ListeningEvent> = events.iter().filter(|e| !e.skipped).collect();
    ordered.sort_by(|a, b| a.ts.cmp(&b.ts).then(a.id.cmp(&b.id)));

    let mut seen_artists: HashSet<&str> = HashSet::new();
    let mut seen_tracks: HashSet<&str> = HashSet::new();
    let mut discoveries = vec![];
    for e in ordered {
        let mut discovered = false;
        if let Some(artist) = &e.artist_name {
            discovered |= seen_artists.insert(artist);
        }
        if let Some(uri) = &e.spotify_track_uri {
            discovered |= seen_tracks.insert(uri);
        }
        if discovered {
            discoveries.push(Discovery {
                date: e.derived.date,
                ts: e.ts,
                artist: e.artist_name.clone(),
                track: e.track_name.clone(),
                track_uri: e.spotify_track_uri.clone(),
            });
        }
    }

    let keep_from = discoveries.len().saturating_sub(DISCOVERY_TAIL);
    DiscoveryTimeline {
        total_artists_discovered: seen_artists.len(),
        total_tracks_discovered: seen_tracks.len(),
        discoveries: discoveries.split_off(keep_from),
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteSummary {
    pub total_records: usize,
    pub total_plays: usize,
    pub total_minutes: i64,
    pub total_hours: i64,
    pub total_days: i64,
    pub unique_tracks: usize,
    pub unique_artists: usize,
    /// plays / elapsed days between the oldest and newest play
    pub average_per_day: i64,
    pub oldest_date: Option<DateTime<Utc>>,
    pub newest_date: Option<DateTime<Utc>>,
    pub days_covered: i64,
    pub years_covered: i32,
}

/// Totals over non-skipped track plays
pub fn complete_summary(events: &[ListeningEvent]) -> CompleteSummary {
    let mut total_plays = 0;
    let mut total_ms = 0;
    let mut tracks: HashSet<&str> = HashSet::new();
    let mut artists: HashSet<&str> = HashSet::new();
    let mut oldest: Option<&ListeningEvent> = None;
    let mut newest: Option<&ListeningEvent> = None;
    for e in events.iter().filter(|e| !e.skipped) {
        let uri = match &e.spotify_track_uri {
            Some(uri) => uri,
            None => continue,
        };
        total_plays += 1;
        total_ms += e.ms_played;
        tracks.insert(uri);
        if let Some(artist) = &e.artist_name {
            artists.insert(artist);
        }
        if oldest.map(|o| e.ts < o.ts).unwrap_or(true) {
            oldest = Some(e);
        }
        if newest.map(|n| e.ts > n.ts).unwrap_or(true) {
            newest = Some(e);
        }
    }

    let mut summary = CompleteSummary {
        total_records: events.len(),
        total_plays,
        total_minutes: minutes_played(total_ms),
        total_hours: round_div(total_ms, 3_600_000),
        total_days: round_div(total_ms, 86_400_000),
        unique_tracks: tracks.len(),
        unique_artists: artists.len(),
        ..Default::default()
    };
    if let (Some(oldest), Some(newest)) = (oldest, newest) {
        let days_covered = round_div((newest.ts - oldest.ts).num_milliseconds(), 86_400_000);
        summary.days_covered = days_covered;
        summary.average_per_day = round_div(total_plays as i64, days_covered);
        summary.oldest_date = Some(oldest.ts);
        summary.newest_date = Some(newest.ts);
        summary.years_covered = newest.derived.year - oldest.derived.year + 1;
    }
    summary
}

/// Everything the history dashboard shows, computed in one go
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryOverview {
    pub summary: CompleteSummary,
    pub top_tracks: Vec<TrackAggregate>,
    pub top_artists: Vec<ArtistAggregate>,
    pub time_patterns: TimePatterns,
    pub skip_behavior: SkipBehavior,
    pub platforms: Vec<PlatformAggregate>,
    pub yearly: Vec<YearAggregate>,
    pub streaks: StreakState,
    pub discovery: DiscoveryTimeline,
}

pub fn history_overview(events: &[ListeningEvent], top_n: usize, today: NaiveDate) -> HistoryOverview {
    HistoryOverview {
        summary: complete_summary(events),
        top_tracks: top_tracks(events, top_n),
        top_artists: top_artists(events, top_n),
        time_patterns: time_patterns(events),
        skip_behavior: skip_behavior(events),
        platforms: platforms(events),
        yearly: yearly_stats(events),
        streaks: listening_streaks(events, today),
        discovery: discovery(events),
    }
}
