//! Identity and business-profile collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Business category, fixed at onboarding finalize.
///
/// Only pure fixed-appointment businesses auto-approve bookings; everyone
/// else reviews requests first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleCategory {
    Professional,
    Tradesperson,
    Hybrid,
}

impl RoleCategory {
    pub fn approval_required(&self) -> bool {
        !matches!(self, Self::Professional)
    }
}

impl std::fmt::Display for RoleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Professional => "professional",
            Self::Tradesperson => "tradesperson",
            Self::Hybrid => "hybrid",
        };
        write!(f, "{s}")
    }
}

/// A business profile, created or updated at onboarding finalize.
///
/// `id` doubles as the owner account id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessProfile {
    pub id: Uuid,
    pub phone_number: String,
    pub business_name: String,
    pub slug: String,
    pub category: RoleCategory,
    pub role_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_days: Option<String>,
    pub approval_required: bool,
    /// Free-text knowledge base shown to the booking model as context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Identity and profile persistence.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Create an auth identity for a phone number, or return the existing
    /// one. Must be idempotent: a second call for the same phone returns the
    /// same id.
    async fn create_or_find_user(&self, phone: &str) -> Result<Uuid, StoreError>;

    /// Insert or update a profile, keyed by id.
    async fn upsert_profile(&self, profile: &BusinessProfile) -> Result<(), StoreError>;

    /// Fallback write path when the upsert's unique constraint fails:
    /// update the existing row matched by phone number.
    async fn update_profile_by_phone(
        &self,
        phone: &str,
        profile: &BusinessProfile,
    ) -> Result<(), StoreError>;

    async fn profile_by_phone(&self, phone: &str) -> Result<Option<BusinessProfile>, StoreError>;

    async fn profile_by_id(&self, id: Uuid) -> Result<Option<BusinessProfile>, StoreError>;

    /// The business booking requests should target: prefer a profile with a
    /// non-empty knowledge base, fall back to the most recently created one.
    async fn resolve_target_business(&self) -> Result<Option<BusinessProfile>, StoreError>;
}

/// Build a URL-safe slug from a business name: lowercase, non-alphanumeric
/// runs collapsed to `-`, suffixed with a random 0–999 integer to reduce
/// collisions.
pub fn make_slug(business_name: &str) -> String {
    let mut slug = String::with_capacity(business_name.len() + 4);
    let mut last_dash = true; // suppress a leading dash
    for c in business_name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    let suffix: u16 = rand::random::<u16>() % 1000;
    if slug.is_empty() {
        format!("business-{suffix}")
    } else {
        format!("{slug}-{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_collapses_non_alphanumeric_runs() {
        let slug = make_slug("Joe's Coffee!!");
        let (body, suffix) = slug.rsplit_once('-').unwrap();
        assert_eq!(body, "joe-s-coffee");
        let n: u32 = suffix.parse().unwrap();
        assert!(n < 1000);
    }

    #[test]
    fn slug_handles_degenerate_names() {
        let slug = make_slug("!!!");
        assert!(slug.starts_with("business-"));

        let slug = make_slug("  Spaced   Out  ");
        let (body, _) = slug.rsplit_once('-').unwrap();
        assert_eq!(body, "spaced-out");
    }

    #[test]
    fn approval_reserved_for_professional() {
        assert!(!RoleCategory::Professional.approval_required());
        assert!(RoleCategory::Tradesperson.approval_required());
        assert!(RoleCategory::Hybrid.approval_required());
    }

    #[test]
    fn category_serde_matches_display() {
        for category in [
            RoleCategory::Professional,
            RoleCategory::Tradesperson,
            RoleCategory::Hybrid,
        ] {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{category}\""));
        }
    }
}
