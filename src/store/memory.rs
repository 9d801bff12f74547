//! In-memory backend — the reference implementation of the collaborator
//! traits, used by unit and integration tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::directory::{BusinessProfile, Directory};
use crate::error::StoreError;
use crate::repo::{BookingRecord, BookingRepository, BookingStatus, Customer, NewBooking};

/// HashMap-backed implementation of `Directory` and `BookingRepository`.
#[derive(Default)]
pub struct MemoryBackend {
    users: Mutex<HashMap<String, Uuid>>,
    profiles: Mutex<HashMap<Uuid, BusinessProfile>>,
    customers: Mutex<Vec<Customer>>,
    bookings: Mutex<HashMap<Uuid, BookingRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored profiles (test helper).
    pub async fn profile_count(&self) -> usize {
        self.profiles.lock().await.len()
    }

    /// Number of stored customers (test helper).
    pub async fn customer_count(&self) -> usize {
        self.customers.lock().await.len()
    }

    /// All stored bookings (test helper).
    pub async fn bookings(&self) -> Vec<BookingRecord> {
        self.bookings.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl Directory for MemoryBackend {
    async fn create_or_find_user(&self, phone: &str) -> Result<Uuid, StoreError> {
        let mut users = self.users.lock().await;
        Ok(*users.entry(phone.to_string()).or_insert_with(Uuid::new_v4))
    }

    async fn upsert_profile(&self, profile: &BusinessProfile) -> Result<(), StoreError> {
        self.profiles
            .lock()
            .await
            .insert(profile.id, profile.clone());
        Ok(())
    }

    async fn update_profile_by_phone(
        &self,
        phone: &str,
        profile: &BusinessProfile,
    ) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().await;
        let existing = profiles
            .values_mut()
            .find(|p| p.phone_number == phone)
            .ok_or_else(|| StoreError::NotFound {
                entity: "business_profile".to_string(),
                id: phone.to_string(),
            })?;
        let id = existing.id;
        *existing = BusinessProfile {
            id,
            ..profile.clone()
        };
        Ok(())
    }

    async fn profile_by_phone(&self, phone: &str) -> Result<Option<BusinessProfile>, StoreError> {
        Ok(self
            .profiles
            .lock()
            .await
            .values()
            .find(|p| p.phone_number == phone)
            .cloned())
    }

    async fn profile_by_id(&self, id: Uuid) -> Result<Option<BusinessProfile>, StoreError> {
        Ok(self.profiles.lock().await.get(&id).cloned())
    }

    async fn resolve_target_business(&self) -> Result<Option<BusinessProfile>, StoreError> {
        let profiles = self.profiles.lock().await;
        let configured = profiles
            .values()
            .filter(|p| p.knowledge_base.as_deref().is_some_and(|k| !k.is_empty()))
            .max_by_key(|p| p.created_at);
        if let Some(profile) = configured {
            return Ok(Some(profile.clone()));
        }
        Ok(profiles.values().max_by_key(|p| p.created_at).cloned())
    }
}

#[async_trait]
impl BookingRepository for MemoryBackend {
    async fn find_or_create_customer(
        &self,
        business_id: Uuid,
        name: &str,
        phone: &str,
    ) -> Result<Uuid, StoreError> {
        let mut customers = self.customers.lock().await;
        if let Some(existing) = customers
            .iter()
            .find(|c| c.business_id == business_id && c.phone_number == phone)
        {
            return Ok(existing.id);
        }
        let customer = Customer {
            id: Uuid::new_v4(),
            business_id,
            name: name.to_string(),
            phone_number: phone.to_string(),
        };
        let id = customer.id;
        customers.push(customer);
        Ok(id)
    }

    async fn create_booking(&self, booking: NewBooking) -> Result<BookingRecord, StoreError> {
        let record = BookingRecord {
            id: Uuid::new_v4(),
            business_id: booking.business_id,
            customer_id: booking.customer_id,
            customer_name: booking.customer_name,
            phone_number: booking.phone_number,
            requested_at: booking.requested_at,
            status: BookingStatus::Pending,
            created_at: Utc::now(),
        };
        self.bookings.lock().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn booking_by_id(&self, id: Uuid) -> Result<Option<BookingRecord>, StoreError> {
        Ok(self.bookings.lock().await.get(&id).cloned())
    }

    async fn set_booking_status(
        &self,
        id: Uuid,
        status: BookingStatus,
    ) -> Result<BookingRecord, StoreError> {
        let mut bookings = self.bookings.lock().await;
        let record = bookings.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity: "booking".to_string(),
            id: id.to_string(),
        })?;
        record.status = status;
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::RoleCategory;

    fn profile(phone: &str, knowledge: Option<&str>) -> BusinessProfile {
        BusinessProfile {
            id: Uuid::new_v4(),
            phone_number: phone.to_string(),
            business_name: "Test Biz".to_string(),
            slug: "test-biz-1".to_string(),
            category: RoleCategory::Professional,
            role_type: "barber".to_string(),
            service_area: None,
            working_days: None,
            approval_required: false,
            knowledge_base: knowledge.map(String::from),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_or_find_user_is_idempotent() {
        let backend = MemoryBackend::new();
        let first = backend.create_or_find_user("111").await.unwrap();
        let second = backend.create_or_find_user("111").await.unwrap();
        assert_eq!(first, second);
        let other = backend.create_or_find_user("222").await.unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn target_business_prefers_configured_knowledge() {
        let backend = MemoryBackend::new();
        let plain = profile("111", None);
        backend.upsert_profile(&plain).await.unwrap();
        // Newer, but the knowledge-configured one should still win.
        let configured = BusinessProfile {
            created_at: plain.created_at - chrono::Duration::hours(1),
            ..profile("222", Some("We cut hair."))
        };
        backend.upsert_profile(&configured).await.unwrap();

        let target = backend.resolve_target_business().await.unwrap().unwrap();
        assert_eq!(target.phone_number, "222");
    }

    #[tokio::test]
    async fn target_business_falls_back_to_newest() {
        let backend = MemoryBackend::new();
        let older = profile("111", None);
        let newer = BusinessProfile {
            created_at: older.created_at + chrono::Duration::hours(1),
            ..profile("222", None)
        };
        backend.upsert_profile(&older).await.unwrap();
        backend.upsert_profile(&newer).await.unwrap();

        let target = backend.resolve_target_business().await.unwrap().unwrap();
        assert_eq!(target.phone_number, "222");
    }

    #[tokio::test]
    async fn customers_unique_per_business_and_phone() {
        let backend = MemoryBackend::new();
        let biz_a = Uuid::new_v4();
        let biz_b = Uuid::new_v4();

        let first = backend
            .find_or_create_customer(biz_a, "Alice", "111")
            .await
            .unwrap();
        let again = backend
            .find_or_create_customer(biz_a, "Alice A.", "111")
            .await
            .unwrap();
        assert_eq!(first, again);

        let elsewhere = backend
            .find_or_create_customer(biz_b, "Alice", "111")
            .await
            .unwrap();
        assert_ne!(first, elsewhere);
        assert_eq!(backend.customer_count().await, 2);
    }

    #[tokio::test]
    async fn booking_status_lifecycle() {
        let backend = MemoryBackend::new();
        let booking = backend
            .create_booking(NewBooking {
                business_id: Uuid::new_v4(),
                customer_id: Uuid::new_v4(),
                customer_name: "Alice".to_string(),
                phone_number: "111".to_string(),
                requested_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);

        let approved = backend
            .set_booking_status(booking.id, BookingStatus::Approved)
            .await
            .unwrap();
        assert_eq!(approved.status, BookingStatus::Approved);

        let missing = backend
            .set_booking_status(Uuid::new_v4(), BookingStatus::Rejected)
            .await;
        assert!(missing.is_err());
    }
}
