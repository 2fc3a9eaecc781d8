//! Wire payloads for the external calendar API and the agenda page, plus the
//! metadata record the extract phase persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One element of the calendar response's `d` array. Unknown fields are
/// ignored; only these four drive the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarMeeting {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "MeetingName")]
    pub meeting_name: String,

    #[serde(rename = "StartDate")]
    pub start_date: String,

    #[serde(rename = "HasVideo")]
    pub has_video: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarResponse {
    pub d: Vec<CalendarMeeting>,
}

/// A timing bookmark from the agenda page's `Bookmarks: [...]` literal.
/// Times are milliseconds from video start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    #[serde(rename = "AgendaItemId")]
    pub agenda_item_id: i64,

    #[serde(rename = "TimeStart")]
    pub time_start: i64,

    #[serde(rename = "TimeEnd")]
    pub time_end: i64,
}

/// An agenda item joined with its bookmark, if the page carried one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaItem {
    pub id: i64,

    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<Bookmark>,
}

impl AgendaItem {
    /// Sort key: items without a bookmark sort after every timestamped item.
    pub fn sort_start(&self) -> i64 {
        self.bookmark.map_or(i64::MAX, |b| b.time_start)
    }
}

/// Items in chapter order plus the raw bookmark array as parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaData {
    pub items: Vec<AgendaItem>,
    pub bookmarks: Vec<Bookmark>,
}

impl AgendaData {
    /// Stable ascending sort on `TimeStart`, untimed items last.
    pub fn sorted(mut self) -> Self {
        self.items.sort_by_key(AgendaItem::sort_start);
        self
    }
}

/// Persisted as the `derived_metadata` artifact by the extract phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingMetadata {
    pub meeting_id: String,

    pub title: String,

    pub date: String,

    pub agenda: AgendaData,

    pub extracted_at: DateTime<Utc>,

    /// Present when audio extraction failed; the phase still succeeds and
    /// diarization is skipped downstream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_error: Option<String>,
}
