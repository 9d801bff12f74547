//! Booking repository collaborator — customers and booking requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Lifecycle of a booking request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// A customer, unique per (business, phone).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub phone_number: String,
}

/// A stored booking request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: Uuid,
    pub business_id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub phone_number: String,
    /// Requested appointment time, best-effort parsed from customer text.
    pub requested_at: DateTime<Utc>,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a booking request.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub business_id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub phone_number: String,
    pub requested_at: DateTime<Utc>,
}

/// Persistence for customers and booking requests.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Return the customer for (business, phone), creating one with the
    /// given name if absent.
    async fn find_or_create_customer(
        &self,
        business_id: Uuid,
        name: &str,
        phone: &str,
    ) -> Result<Uuid, StoreError>;

    /// Insert a new pending booking request.
    async fn create_booking(&self, booking: NewBooking) -> Result<BookingRecord, StoreError>;

    async fn booking_by_id(&self, id: Uuid) -> Result<Option<BookingRecord>, StoreError>;

    /// Update a booking's status. Errors if the booking does not exist.
    async fn set_booking_status(
        &self,
        id: Uuid,
        status: BookingStatus,
    ) -> Result<BookingRecord, StoreError>;
}
