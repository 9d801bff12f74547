//! Booking approval — status change plus its side effects.
//!
//! Approval is driven from the owner dashboard, outside the conversation
//! core. The calendar event and the customer notification are best-effort:
//! their failures never roll back the status change.

use std::sync::Arc;

use uuid::Uuid;

use crate::calendar::Calendar;
use crate::error::Error;
use crate::notify::Notifier;
use crate::repo::{BookingRecord, BookingRepository, BookingStatus};

/// Applies approval decisions to booking requests.
pub struct ApprovalService {
    repo: Arc<dyn BookingRepository>,
    calendar: Arc<dyn Calendar>,
    notifier: Arc<dyn Notifier>,
}

impl ApprovalService {
    pub fn new(
        repo: Arc<dyn BookingRepository>,
        calendar: Arc<dyn Calendar>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            repo,
            calendar,
            notifier,
        }
    }

    /// Approve a booking: update status, then create the calendar event and
    /// notify the customer.
    pub async fn approve(&self, booking_id: Uuid) -> Result<BookingRecord, Error> {
        let record = self
            .repo
            .set_booking_status(booking_id, BookingStatus::Approved)
            .await?;

        if let Err(e) = self
            .calendar
            .create_event(
                &record.customer_name,
                record.requested_at,
                &record.phone_number,
            )
            .await
        {
            tracing::warn!(%booking_id, error = %e, "Calendar event creation failed");
        }

        let message = format!(
            "Good news {}, your booking for {} is confirmed!",
            record.customer_name,
            record.requested_at.format("%A %-d %B at %H:%M"),
        );
        if let Err(e) = self.notifier.send_text(&record.phone_number, &message).await {
            tracing::warn!(%booking_id, error = %e, "Approval notification failed");
        }

        Ok(record)
    }

    /// Reject a booking and notify the customer.
    pub async fn reject(&self, booking_id: Uuid) -> Result<BookingRecord, Error> {
        let record = self
            .repo
            .set_booking_status(booking_id, BookingStatus::Rejected)
            .await?;

        let message = format!(
            "Sorry {}, that time doesn't work. Message us to find another slot.",
            record.customer_name,
        );
        if let Err(e) = self.notifier.send_text(&record.phone_number, &message).await {
            tracing::warn!(%booking_id, error = %e, "Rejection notification failed");
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::InMemoryCalendar;
    use crate::error::NotifyError;
    use crate::notify::LogNotifier;
    use crate::repo::NewBooking;
    use crate::store::memory::MemoryBackend;
    use async_trait::async_trait;
    use chrono::Utc;

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send_text(&self, phone: &str, _body: &str) -> Result<(), NotifyError> {
            Err(NotifyError::SendFailed {
                phone: phone.to_string(),
                reason: "down".to_string(),
            })
        }
    }

    async fn pending_booking(backend: &MemoryBackend) -> BookingRecord {
        backend
            .create_booking(NewBooking {
                business_id: Uuid::new_v4(),
                customer_id: Uuid::new_v4(),
                customer_name: "Alice".to_string(),
                phone_number: "27821234567".to_string(),
                requested_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn approve_updates_status_and_books_calendar() {
        let backend = Arc::new(MemoryBackend::new());
        let calendar = Arc::new(InMemoryCalendar::new());
        let service =
            ApprovalService::new(backend.clone(), calendar.clone(), Arc::new(LogNotifier));
        let booking = pending_booking(&backend).await;

        let approved = service.approve(booking.id).await.unwrap();
        assert_eq!(approved.status, BookingStatus::Approved);

        let stored = backend.booking_by_id(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Approved);
    }

    #[tokio::test]
    async fn notification_failure_keeps_status_change() {
        let backend = Arc::new(MemoryBackend::new());
        let service = ApprovalService::new(
            backend.clone(),
            Arc::new(InMemoryCalendar::new()),
            Arc::new(FailingNotifier),
        );
        let booking = pending_booking(&backend).await;

        let result = service.approve(booking.id).await;
        assert!(result.is_ok(), "notification failure must not propagate");

        let stored = backend.booking_by_id(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Approved);
    }

    #[tokio::test]
    async fn reject_sets_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        let service = ApprovalService::new(
            backend.clone(),
            Arc::new(InMemoryCalendar::new()),
            Arc::new(LogNotifier),
        );
        let booking = pending_booking(&backend).await;

        let rejected = service.reject(booking.id).await.unwrap();
        assert_eq!(rejected.status, BookingStatus::Rejected);
    }
}
