//! libSQL backend — async implementations of the collaborator traits.
//!
//! Stores a single connection that is reused for all operations.
//! `libsql::Connection` is `Send + Sync` and safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Database as LibSqlDatabase};
use tracing::info;
use uuid::Uuid;

use crate::directory::{BusinessProfile, Directory, RoleCategory};
use crate::error::StoreError;
use crate::repo::{BookingRecord, BookingRepository, BookingStatus, NewBooking};
use crate::session::{ConversationSession, SessionMode, SessionPatch, SessionStore};
use crate::store::migrations;

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to open libSQL database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to create in-memory database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<Uuid>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM users WHERE phone_number = ?1",
                params![phone],
            )
            .await
            .map_err(|e| StoreError::Query(format!("find user: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => {
                let id_str: String = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("user row: {e}")))?;
                Ok(Uuid::parse_str(&id_str).ok())
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("find user: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn category_to_str(category: RoleCategory) -> &'static str {
    match category {
        RoleCategory::Professional => "professional",
        RoleCategory::Tradesperson => "tradesperson",
        RoleCategory::Hybrid => "hybrid",
    }
}

fn str_to_category(s: &str) -> RoleCategory {
    match s {
        "tradesperson" => RoleCategory::Tradesperson,
        "hybrid" => RoleCategory::Hybrid,
        _ => RoleCategory::Professional,
    }
}

fn status_to_str(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Pending => "pending",
        BookingStatus::Approved => "approved",
        BookingStatus::Rejected => "rejected",
    }
}

fn str_to_status(s: &str) -> BookingStatus {
    match s {
        "approved" => BookingStatus::Approved,
        "rejected" => BookingStatus::Rejected,
        _ => BookingStatus::Pending,
    }
}

/// Convert `Option<String>` to a libsql Value.
fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

const SESSION_COLUMNS: &str = "phone_number, business_id, intent, mode, metadata, updated_at";

const BUSINESS_COLUMNS: &str = "id, phone_number, business_name, slug, category, role_type, \
                                service_area, working_days, approval_required, knowledge_base, \
                                created_at";

const BOOKING_COLUMNS: &str = "id, business_id, customer_id, customer_name, phone_number, \
                               requested_at, status, created_at";

fn row_to_session(row: &libsql::Row) -> Result<ConversationSession, StoreError> {
    let phone: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("session row: {e}")))?;
    let business_id: Option<String> = row.get(1).ok();
    let intent: String = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("session row: {e}")))?;
    let mode_json: String = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("session row: {e}")))?;
    let metadata_json: String = row
        .get(4)
        .map_err(|e| StoreError::Query(format!("session row: {e}")))?;
    let updated_str: String = row
        .get(5)
        .map_err(|e| StoreError::Query(format!("session row: {e}")))?;

    let mode: SessionMode = serde_json::from_str(&mode_json)
        .map_err(|e| StoreError::Serialization(format!("session mode: {e}")))?;
    let metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| StoreError::Serialization(format!("session metadata: {e}")))?;

    Ok(ConversationSession {
        phone_number: phone,
        business_id: business_id.and_then(|s| Uuid::parse_str(&s).ok()),
        intent,
        mode,
        metadata,
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_profile(row: &libsql::Row) -> Result<BusinessProfile, StoreError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("business row: {e}")))?;
    let approval: i64 = row
        .get(8)
        .map_err(|e| StoreError::Query(format!("business row: {e}")))?;
    let category_str: String = row
        .get(4)
        .map_err(|e| StoreError::Query(format!("business row: {e}")))?;
    let created_str: String = row
        .get(10)
        .map_err(|e| StoreError::Query(format!("business row: {e}")))?;

    Ok(BusinessProfile {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        phone_number: row
            .get(1)
            .map_err(|e| StoreError::Query(format!("business row: {e}")))?,
        business_name: row
            .get(2)
            .map_err(|e| StoreError::Query(format!("business row: {e}")))?,
        slug: row
            .get(3)
            .map_err(|e| StoreError::Query(format!("business row: {e}")))?,
        category: str_to_category(&category_str),
        role_type: row
            .get(5)
            .map_err(|e| StoreError::Query(format!("business row: {e}")))?,
        service_area: row.get(6).ok(),
        working_days: row.get(7).ok(),
        approval_required: approval != 0,
        knowledge_base: row.get(9).ok(),
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_booking(row: &libsql::Row) -> Result<BookingRecord, StoreError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("booking row: {e}")))?;
    let business_str: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("booking row: {e}")))?;
    let customer_str: String = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("booking row: {e}")))?;
    let requested_str: String = row
        .get(5)
        .map_err(|e| StoreError::Query(format!("booking row: {e}")))?;
    let status_str: String = row
        .get(6)
        .map_err(|e| StoreError::Query(format!("booking row: {e}")))?;
    let created_str: String = row
        .get(7)
        .map_err(|e| StoreError::Query(format!("booking row: {e}")))?;

    Ok(BookingRecord {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        business_id: Uuid::parse_str(&business_str).unwrap_or_else(|_| Uuid::nil()),
        customer_id: Uuid::parse_str(&customer_str).unwrap_or_else(|_| Uuid::nil()),
        customer_name: row
            .get(3)
            .map_err(|e| StoreError::Query(format!("booking row: {e}")))?,
        phone_number: row
            .get(4)
            .map_err(|e| StoreError::Query(format!("booking row: {e}")))?,
        requested_at: parse_datetime(&requested_str),
        status: str_to_status(&status_str),
        created_at: parse_datetime(&created_str),
    })
}

// ── SessionStore ────────────────────────────────────────────────────

#[async_trait]
impl SessionStore for LibSqlBackend {
    async fn get(&self, phone: &str) -> Result<Option<ConversationSession>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE phone_number = ?1"),
                params![phone],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_session(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get session: {e}"))),
        }
    }

    async fn upsert(
        &self,
        phone: &str,
        patch: SessionPatch,
    ) -> Result<ConversationSession, StoreError> {
        // Read-before-merge so a patch never clobbers unrelated metadata
        // keys. The dispatcher serializes per phone, so this is not racy.
        let mut session = self
            .get(phone)
            .await?
            .unwrap_or_else(|| ConversationSession::new(phone));
        patch.apply(&mut session);

        let mode_json = serde_json::to_string(&session.mode)
            .map_err(|e| StoreError::Serialization(format!("session mode: {e}")))?;
        let metadata_json = serde_json::to_string(&session.metadata)
            .map_err(|e| StoreError::Serialization(format!("session metadata: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO sessions (phone_number, business_id, intent, mode, metadata, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(phone_number) DO UPDATE SET
                     business_id = excluded.business_id,
                     intent = excluded.intent,
                     mode = excluded.mode,
                     metadata = excluded.metadata,
                     updated_at = excluded.updated_at",
                params![
                    session.phone_number.clone(),
                    opt_text(session.business_id.map(|id| id.to_string())),
                    session.intent.clone(),
                    mode_json,
                    metadata_json,
                    session.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("upsert session: {e}")))?;

        Ok(session)
    }

    async fn reset(&self, phone: &str) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM sessions WHERE phone_number = ?1", params![phone])
            .await
            .map_err(|e| StoreError::Query(format!("reset session: {e}")))?;
        Ok(())
    }
}

// ── Directory ───────────────────────────────────────────────────────

#[async_trait]
impl Directory for LibSqlBackend {
    async fn create_or_find_user(&self, phone: &str) -> Result<Uuid, StoreError> {
        if let Some(id) = self.find_user_by_phone(phone).await? {
            return Ok(id);
        }

        let id = Uuid::new_v4();
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO users (id, phone_number) VALUES (?1, ?2)",
                params![id.to_string(), phone],
            )
            .await;

        match inserted {
            Ok(_) => Ok(id),
            // Lost a race to another writer; the identity exists, reuse it.
            Err(e) => self
                .find_user_by_phone(phone)
                .await?
                .ok_or_else(|| StoreError::Query(format!("create user: {e}"))),
        }
    }

    async fn upsert_profile(&self, profile: &BusinessProfile) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO businesses (id, phone_number, business_name, slug, category, \
                 role_type, service_area, working_days, approval_required, knowledge_base, \
                 created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                     phone_number = excluded.phone_number,
                     business_name = excluded.business_name,
                     slug = excluded.slug,
                     category = excluded.category,
                     role_type = excluded.role_type,
                     service_area = excluded.service_area,
                     working_days = excluded.working_days,
                     approval_required = excluded.approval_required,
                     knowledge_base = excluded.knowledge_base",
                params![
                    profile.id.to_string(),
                    profile.phone_number.clone(),
                    profile.business_name.clone(),
                    profile.slug.clone(),
                    category_to_str(profile.category),
                    profile.role_type.clone(),
                    opt_text(profile.service_area.clone()),
                    opt_text(profile.working_days.clone()),
                    profile.approval_required as i64,
                    opt_text(profile.knowledge_base.clone()),
                    profile.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Constraint(format!("upsert profile: {e}")))?;
        Ok(())
    }

    async fn update_profile_by_phone(
        &self,
        phone: &str,
        profile: &BusinessProfile,
    ) -> Result<(), StoreError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE businesses SET business_name = ?1, slug = ?2, category = ?3, \
                 role_type = ?4, service_area = ?5, working_days = ?6, \
                 approval_required = ?7, knowledge_base = ?8
                 WHERE phone_number = ?9",
                params![
                    profile.business_name.clone(),
                    profile.slug.clone(),
                    category_to_str(profile.category),
                    profile.role_type.clone(),
                    opt_text(profile.service_area.clone()),
                    opt_text(profile.working_days.clone()),
                    profile.approval_required as i64,
                    opt_text(profile.knowledge_base.clone()),
                    phone,
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("update profile by phone: {e}")))?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "business_profile".to_string(),
                id: phone.to_string(),
            });
        }
        Ok(())
    }

    async fn profile_by_phone(&self, phone: &str) -> Result<Option<BusinessProfile>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {BUSINESS_COLUMNS} FROM businesses WHERE phone_number = ?1"),
                params![phone],
            )
            .await
            .map_err(|e| StoreError::Query(format!("profile by phone: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_profile(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("profile by phone: {e}"))),
        }
    }

    async fn profile_by_id(&self, id: Uuid) -> Result<Option<BusinessProfile>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {BUSINESS_COLUMNS} FROM businesses WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("profile by id: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_profile(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("profile by id: {e}"))),
        }
    }

    async fn resolve_target_business(&self) -> Result<Option<BusinessProfile>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {BUSINESS_COLUMNS} FROM businesses \
                     WHERE knowledge_base IS NOT NULL AND knowledge_base != '' \
                     ORDER BY created_at DESC LIMIT 1"
                ),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("resolve business: {e}")))?;
        if let Ok(Some(row)) = rows.next().await {
            return Ok(Some(row_to_profile(&row)?));
        }

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {BUSINESS_COLUMNS} FROM businesses ORDER BY created_at DESC LIMIT 1"
                ),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("resolve business: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_profile(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("resolve business: {e}"))),
        }
    }
}

// ── BookingRepository ───────────────────────────────────────────────

#[async_trait]
impl BookingRepository for LibSqlBackend {
    async fn find_or_create_customer(
        &self,
        business_id: Uuid,
        name: &str,
        phone: &str,
    ) -> Result<Uuid, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM customers WHERE business_id = ?1 AND phone_number = ?2",
                params![business_id.to_string(), phone],
            )
            .await
            .map_err(|e| StoreError::Query(format!("find customer: {e}")))?;
        if let Ok(Some(row)) = rows.next().await {
            let id_str: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("customer row: {e}")))?;
            if let Ok(id) = Uuid::parse_str(&id_str) {
                return Ok(id);
            }
        }

        let id = Uuid::new_v4();
        self.conn()
            .execute(
                "INSERT INTO customers (id, business_id, name, phone_number) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), business_id.to_string(), name, phone],
            )
            .await
            .map_err(|e| StoreError::Query(format!("create customer: {e}")))?;
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

        self.conn()
            .execute(
                "INSERT INTO bookings (id, business_id, customer_id, customer_name, \
                 phone_number, requested_at, status, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id.to_string(),
                    record.business_id.to_string(),
                    record.customer_id.to_string(),
                    record.customer_name.clone(),
                    record.phone_number.clone(),
                    record.requested_at.to_rfc3339(),
                    status_to_str(record.status),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("create booking: {e}")))?;

        Ok(record)
    }

    async fn booking_by_id(&self, id: Uuid) -> Result<Option<BookingRecord>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("booking by id: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_booking(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("booking by id: {e}"))),
        }
    }

    async fn set_booking_status(
        &self,
        id: Uuid,
        status: BookingStatus,
    ) -> Result<BookingRecord, StoreError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE bookings SET status = ?1 WHERE id = ?2",
                params![status_to_str(status), id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("set booking status: {e}")))?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "booking".to_string(),
                id: id.to_string(),
            });
        }
        self.booking_by_id(id).await?.ok_or_else(|| StoreError::NotFound {
            entity: "booking".to_string(),
            id: id.to_string(),
        })
    }
}
