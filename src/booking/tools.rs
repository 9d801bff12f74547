//! The two tools exposed to the booking model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::calendar::Calendar;
use crate::directory::Directory;
use crate::repo::{BookingRepository, NewBooking};
use crate::timeparse;
use crate::tools::Tool;

const AVAILABILITY_ERROR: &str = "There was an error checking availability. Please try again.";

/// `check_availability` — free/busy summary for a free-text date.
///
/// Never fails upward: provider errors and timeouts become a generic error
/// string the model can relay.
pub struct AvailabilityTool {
    calendar: Arc<dyn Calendar>,
    timeout: Duration,
}

impl AvailabilityTool {
    pub fn new(calendar: Arc<dyn Calendar>, timeout: Duration) -> Self {
        Self { calendar, timeout }
    }
}

#[async_trait]
impl Tool for AvailabilityTool {
    fn name(&self) -> &str {
        "check_availability"
    }

    fn description(&self) -> &str {
        "Check the business calendar for a given date and return a summary \
         of free and booked times in the 09:00-17:00 window. Accepts \
         relative dates like 'today' and 'tomorrow'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "date": {
                    "type": "string",
                    "description": "The date to check, e.g. 'tomorrow' or '2026-08-12'",
                }
            },
            "required": ["date"],
        })
    }

    async fn execute(&self, params: serde_json::Value) -> serde_json::Value {
        let date = params
            .get("date")
            .and_then(|v| v.as_str())
            .unwrap_or("today");

        match tokio::time::timeout(self.timeout, self.calendar.availability(date)).await {
            Ok(Ok(summary)) => serde_json::json!(summary),
            Ok(Err(e)) => {
                tracing::warn!(%date, error = %e, "Availability check failed");
                serde_json::json!(AVAILABILITY_ERROR)
            }
            Err(_) => {
                tracing::warn!(%date, "Availability check timed out");
                serde_json::json!(AVAILABILITY_ERROR)
            }
        }
    }
}

/// `create_booking_request` — files a pending booking for the resolved
/// business.
pub struct CreateBookingTool {
    directory: Arc<dyn Directory>,
    repo: Arc<dyn BookingRepository>,
}

impl CreateBookingTool {
    pub fn new(directory: Arc<dyn Directory>, repo: Arc<dyn BookingRepository>) -> Self {
        Self { directory, repo }
    }
}

#[async_trait]
impl Tool for CreateBookingTool {
    fn name(&self) -> &str {
        "create_booking_request"
    }

    fn description(&self) -> &str {
        "Create a booking request for the customer. Call this once the \
         customer has confirmed their name and a date/time."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Customer's name"},
                "datetime": {
                    "type": "string",
                    "description": "Requested date and time, e.g. 'tomorrow 10am'",
                },
                "phone": {"type": "string", "description": "Customer's phone number"},
            },
            "required": ["name", "datetime", "phone"],
        })
    }

    async fn execute(&self, params: serde_json::Value) -> serde_json::Value {
        let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let datetime = params
            .get("datetime")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let phone = params.get("phone").and_then(|v| v.as_str()).unwrap_or("");

        let business = match self.directory.resolve_target_business().await {
            Ok(Some(business)) => business,
            Ok(None) => {
                tracing::warn!("Booking requested but no business is configured");
                return serde_json::json!({"error": "no business is configured yet"});
            }
            Err(e) => {
                tracing::warn!(error = %e, "Business resolution failed");
                return serde_json::json!({"error": "could not create the booking request"});
            }
        };

        let customer_id = match self
            .repo
            .find_or_create_customer(business.id, name, phone)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "Customer lookup failed");
                return serde_json::json!({"error": "could not create the booking request"});
            }
        };

        let now = Utc::now();
        let requested_at = match timeparse::parse_datetime(datetime, now) {
            Some(dt) => dt,
            None => {
                // Known quirk carried from the original system: an
                // unparseable time books "now" instead of failing.
                tracing::warn!(%datetime, "Unparseable booking datetime, falling back to now");
                now
            }
        };

        match self
            .repo
            .create_booking(NewBooking {
                business_id: business.id,
                customer_id,
                customer_name: name.to_string(),
                phone_number: phone.to_string(),
                requested_at,
            })
            .await
        {
            Ok(record) => serde_json::json!({
                "id": record.id.to_string(),
                "name": record.customer_name,
                "datetime": record.requested_at.to_rfc3339(),
                "phone": record.phone_number,
                "status": record.status.to_string(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Booking insert failed");
                serde_json::json!({"error": "could not create the booking request"})
            }
        }
    }
}
