//! Periodic discovery run: ask the calendar for the date window, insert any
//! unseen meeting that has video, and seed its download job. Idempotent and
//! safe to run at any cadence; a systemd timer provides the period.

use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Utc};
use cv_queue::{EnqueueOutcome, JobQueue, RedisJobQueue};
use cv_store::{InsertOutcome, MeetingStore, RedisMeetingStore};
use cv_storage::StorageConfig;
use cv_types::Meeting;
use fs2::FileExt;
use serde::Deserialize;

mod calendar;

use calendar::{CalendarSource, HttpCalendar};

#[derive(Debug, Clone, Deserialize)]
struct Config {
    redis_url: String,

    calendar_base_url: String,

    /// Fixed UTC offset the calendar API expects, e.g. `-04:00`.
    #[serde(default = "default_offset")]
    calendar_utc_offset: String,

    #[serde(flatten)]
    storage: StorageConfig,
}

fn default_offset() -> String {
    "-04:00".to_string()
}

#[derive(Debug, Default, PartialEq, Eq)]
struct DiscoveryStats {
    seen: usize,
    with_video: usize,
    inserted: usize,
    jobs_enqueued: u64,
}

#[tokio::main]
async fn main() {
    cv_app::init_tracing();

    if let Err(e) = run().await {
        tracing::error!(error = %e, step = "discovery", "discovery run failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config: Config = cv_app::load_config()?;

    // Advisory lock: a second discovery process (overlapping timer firings,
    // manual run during the timer window) skips instead of double-fetching.
    std::fs::create_dir_all(&config.storage.storage_root)?;
    let lock_path = config.storage.storage_root.join("discovery.lock");
    let lock_file = std::fs::File::create(&lock_path)?;
    if lock_file.try_lock_exclusive().is_err() {
        tracing::info!(step = "discovery", "another discovery run holds the lock, skipping");
        return Ok(());
    }

    let offset = parse_offset(&config.calendar_utc_offset)
        .ok_or_else(|| format!("CALENDAR_UTC_OFFSET is not valid: {}", config.calendar_utc_offset))?;

    // Operator-supplied range, else the current calendar month.
    let args: Vec<String> = std::env::args().collect();
    let (start, end) = match args.len() {
        3 => (args[1].clone(), args[2].clone()),
        1 => month_window(Utc::now(), offset),
        _ => {
            eprintln!("Usage: {} [<start> <end>]", args[0]);
            std::process::exit(1);
        }
    };

    let store = Arc::new(RedisMeetingStore::connect(&config.redis_url).await?);
    let download_queue: Arc<dyn JobQueue> =
        Arc::new(RedisJobQueue::connect(&config.redis_url, "download").await?);
    let source = HttpCalendar::new(&config.calendar_base_url);

    let stats = run_discovery(
        &source,
        store.as_ref(),
        download_queue.as_ref(),
        &config.calendar_base_url,
        &start,
        &end,
    )
    .await?;

    tracing::info!(
        step = "discovery",
        seen = stats.seen,
        with_video = stats.with_video,
        inserted = stats.inserted,
        jobs_enqueued = stats.jobs_enqueued,
        %start,
        %end,
        "discovery run complete"
    );
    Ok(())
}

async fn run_discovery(
    source: &dyn CalendarSource,
    store: &dyn MeetingStore,
    download_queue: &dyn JobQueue,
    base_url: &str,
    start: &str,
    end: &str,
) -> Result<DiscoveryStats, Box<dyn std::error::Error>> {
    let mut stats = DiscoveryStats::default();

    let meetings = source.meetings_between(start, end).await?;
    stats.seen = meetings.len();

    for entry in meetings.into_iter().filter(|m| m.has_video) {
        stats.with_video += 1;

        let meeting = Meeting::new(
            &entry.id,
            &entry.meeting_name,
            &entry.start_date,
            HttpCalendar::meeting_url(base_url, &entry.id),
        );

        match store.insert_if_absent(&meeting).await? {
            InsertOutcome::AlreadyPresent => {
                tracing::debug!(meeting_id = %entry.id, step = "discovery", "already known, skipping");
            }
            InsertOutcome::Inserted => {
                stats.inserted += 1;
                tracing::info!(meeting_id = %entry.id, title = %entry.meeting_name, step = "discovery", "new meeting discovered");
                if download_queue.enqueue(&entry.id).await? == EnqueueOutcome::Enqueued {
                    stats.jobs_enqueued += 1;
                }
            }
        }
    }

    Ok(stats)
}

/// `"-04:00"` → a chrono offset. Accepts `+HH:MM` / `-HH:MM`.
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = if let Some(rest) = s.strip_prefix('-') {
        (-1, rest)
    } else if let Some(rest) = s.strip_prefix('+') {
        (1, rest)
    } else {
        return None;
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// First instant of the current month through the first instant of the next,
/// rendered with the calendar's offset.
fn month_window(now: DateTime<Utc>, offset: FixedOffset) -> (String, String) {
    let local = now.with_timezone(&offset);
    let (year, month) = (local.year(), local.month());
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };

    let start = offset
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(local);
    let end = offset
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .unwrap_or(local);

    let fmt = "%Y-%m-%dT%H:%M:%S%:z";
    (start.format(fmt).to_string(), end.format(fmt).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::calendar::CalendarError;
    use cv_queue::MemoryJobQueue;
    use cv_store::MemoryMeetingStore;
    use cv_types::CalendarMeeting;

    struct StubCalendar {
        meetings: Vec<CalendarMeeting>,
    }

    #[async_trait]
    impl CalendarSource for StubCalendar {
        async fn meetings_between(&self, _: &str, _: &str) -> Result<Vec<CalendarMeeting>, CalendarError> {
            Ok(self.meetings.clone())
        }
    }

    fn entry(id: &str, has_video: bool) -> CalendarMeeting {
        CalendarMeeting {
            id: id.to_string(),
            meeting_name: "City Commission - Regular".to_string(),
            start_date: "2025-06-05 19:00".to_string(),
            has_video,
        }
    }

    #[test]
    fn offset_parsing() {
        assert_eq!(parse_offset("-04:00"), FixedOffset::west_opt(4 * 3600));
        assert_eq!(parse_offset("+05:30"), FixedOffset::east_opt(5 * 3600 + 30 * 60));
        assert_eq!(parse_offset("04:00"), None);
        assert_eq!(parse_offset(""), None);
    }

    #[test]
    fn month_window_spans_the_calendar_month() {
        let offset = parse_offset("-04:00").unwrap();
        let now = "2025-06-15T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let (start, end) = month_window(now, offset);
        assert_eq!(start, "2025-06-01T00:00:00-04:00");
        assert_eq!(end, "2025-07-01T00:00:00-04:00");
    }

    #[test]
    fn month_window_rolls_over_december() {
        let offset = parse_offset("-04:00").unwrap();
        let now = "2025-12-15T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let (start, end) = month_window(now, offset);
        assert_eq!(start, "2025-12-01T00:00:00-04:00");
        assert_eq!(end, "2026-01-01T00:00:00-04:00");
    }

    #[test]
    fn month_window_respects_offset_at_utc_month_boundary() {
        // Just past midnight UTC on July 1 is still June 30 at -04:00.
        let offset = parse_offset("-04:00").unwrap();
        let now = "2025-07-01T01:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let (start, _) = month_window(now, offset);
        assert_eq!(start, "2025-06-01T00:00:00-04:00");
    }

    #[tokio::test]
    async fn discovery_inserts_and_seeds_download_jobs() {
        let store = MemoryMeetingStore::new();
        let queue = MemoryJobQueue::new("download");
        let source = StubCalendar {
            meetings: vec![entry("m1", true), entry("m2", false)],
        };

        let stats = run_discovery(&source, &store, &queue, "https://city.example", "s", "e")
            .await
            .unwrap();

        assert_eq!(stats.seen, 2);
        assert_eq!(stats.with_video, 1);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.jobs_enqueued, 1);

        let meeting = store.get("m1").await.unwrap().unwrap();
        assert_eq!(meeting.phase, cv_types::Phase::Discovered);
        assert!(meeting.source_url.contains("Meeting.aspx?Id=m1"));
        assert!(queue.job("download-m1").await.unwrap().is_some());
        assert!(store.get("m2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn discovery_is_idempotent() {
        let store = MemoryMeetingStore::new();
        let queue = MemoryJobQueue::new("download");
        let source = StubCalendar { meetings: vec![entry("m1", true)] };

        let first = run_discovery(&source, &store, &queue, "https://city.example", "s", "e")
            .await
            .unwrap();
        let second = run_discovery(&source, &store, &queue, "https://city.example", "s", "e")
            .await
            .unwrap();

        assert_eq!(first.inserted, 1);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.jobs_enqueued, 0);
        assert_eq!(queue.counts().await.unwrap().waiting, 1);
    }
}
