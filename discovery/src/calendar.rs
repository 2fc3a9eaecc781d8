//! Client for the municipal calendar API: one POST endpoint returning the
//! month's meetings. Behind a trait so discovery logic is testable without
//! the network.

use async_trait::async_trait;
use cv_types::{CalendarMeeting, CalendarResponse};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("calendar request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// Meetings scheduled in `[start, end)`; timestamps are ISO-8601 with an
    /// explicit offset, as the API requires.
    async fn meetings_between(&self, start: &str, end: &str) -> Result<Vec<CalendarMeeting>, CalendarError>;
}

pub struct HttpCalendar {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCalendar {
    pub fn new(base_url: &str) -> Self {
        HttpCalendar {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// The meeting page URL recorded as a meeting's source; the downloader
    /// and the agenda fetch both start from here.
    pub fn meeting_url(base_url: &str, meeting_id: &str) -> String {
        format!(
            "{}/Meeting.aspx?Id={}&Agenda=Agenda&lang=English",
            base_url.trim_end_matches('/'),
            meeting_id
        )
    }
}

#[async_trait]
impl CalendarSource for HttpCalendar {
    #[tracing::instrument(skip(self))]
    async fn meetings_between(&self, start: &str, end: &str) -> Result<Vec<CalendarMeeting>, CalendarError> {
        let url = format!("{}/MeetingsCalendarView.aspx/GetCalendarMeetings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "calendarStartDate": start,
                "calendarEndDate": end,
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: CalendarResponse = response.json().await?;
        tracing::info!(count = body.d.len(), "calendar returned meetings");
        Ok(body.d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meeting_url_carries_agenda_params() {
        assert_eq!(
            HttpCalendar::meeting_url("https://city.example/", "m1"),
            "https://city.example/Meeting.aspx?Id=m1&Agenda=Agenda&lang=English"
        );
    }
}
