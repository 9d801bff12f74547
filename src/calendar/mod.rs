//! Calendar collaborator — availability summaries and event creation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::error::CalendarError;
use crate::timeparse;

/// Start of the bookable business window.
pub const WINDOW_START: NaiveTime = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
/// End of the bookable business window.
pub const WINDOW_END: NaiveTime = NaiveTime::from_hms_opt(17, 0, 0).unwrap();

/// A created calendar event.
#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub link: Option<String>,
}

/// External calendar provider, seen through the narrowest possible lens.
#[async_trait]
pub trait Calendar: Send + Sync {
    /// Human-readable busy/free summary for a free-text date description
    /// ("tomorrow", "friday", "2026-08-12"), covering the 09:00–17:00
    /// window.
    async fn availability(&self, date_description: &str) -> Result<String, CalendarError>;

    /// Create an event for an approved booking.
    async fn create_event(
        &self,
        name: &str,
        start: DateTime<Utc>,
        phone: &str,
    ) -> Result<CalendarEvent, CalendarError>;
}

/// Format a busy/free summary for one day.
pub fn availability_summary(day: NaiveDate, busy: &[(NaiveTime, NaiveTime)]) -> String {
    let date = day.format("%A %-d %B");
    let open_from = WINDOW_START.format("%H:%M");
    let open_to = WINDOW_END.format("%H:%M");
    if busy.is_empty() {
        return format!("{date} is fully open between {open_from} and {open_to}.");
    }
    let slots: Vec<String> = busy
        .iter()
        .map(|(start, end)| format!("{}-{}", start.format("%H:%M"), end.format("%H:%M")))
        .collect();
    format!(
        "{date}: booked {} and otherwise open between {open_from} and {open_to}.",
        slots.join(", ")
    )
}

/// In-memory calendar with a settable busy list. Stands in for the real
/// provider in the binary and in tests.
#[derive(Default)]
pub struct InMemoryCalendar {
    busy: tokio::sync::Mutex<Vec<(NaiveDate, NaiveTime, NaiveTime)>>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_busy(&self, day: NaiveDate, start: NaiveTime, end: NaiveTime) {
        self.busy.lock().await.push((day, start, end));
    }
}

#[async_trait]
impl Calendar for InMemoryCalendar {
    async fn availability(&self, date_description: &str) -> Result<String, CalendarError> {
        let today = Utc::now().date_naive();
        let day = timeparse::parse_day(date_description, today)
            .ok_or_else(|| CalendarError::UnknownDate(date_description.to_string()))?;
        let busy: Vec<(NaiveTime, NaiveTime)> = self
            .busy
            .lock()
            .await
            .iter()
            .filter(|(d, _, _)| *d == day)
            .map(|(_, s, e)| (*s, *e))
            .collect();
        Ok(availability_summary(day, &busy))
    }

    async fn create_event(
        &self,
        name: &str,
        start: DateTime<Utc>,
        _phone: &str,
    ) -> Result<CalendarEvent, CalendarError> {
        let day = start.date_naive();
        let time = start.time();
        let end = time + chrono::Duration::hours(1);
        self.busy.lock().await.push((day, time, end));
        tracing::debug!(%name, %start, "Calendar event recorded");
        Ok(CalendarEvent { link: None })
    }
}
