//! Dispatcher — the single entry point the transport layer calls.
//!
//! Given an inbound message, decides whether the phone number is
//! mid-onboarding, mid-registration, or in normal booking conversation, and
//! routes to the matching engine. Processing is serialized per phone number
//! and fully parallel across phone numbers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::booking::BookingConversation;
use crate::booking::orchestrator::APOLOGY_REPLY;
use crate::error::Error;
use crate::flows::{OnboardingFlow, RegistrationFlow};
use crate::session::{ConversationSession, SessionMode, SessionStore};

/// Keywords that start business onboarding from an idle session.
const SETUP_TRIGGERS: &[&str] = &["setup", "start setup", "kaelo setup"];

/// Routes inbound messages to the owning flow engine.
pub struct Dispatcher {
    sessions: Arc<dyn SessionStore>,
    onboarding: OnboardingFlow,
    registration: RegistrationFlow,
    booking: Arc<BookingConversation>,
    /// Per-phone locks serializing message handling for the same number.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        onboarding: OnboardingFlow,
        registration: RegistrationFlow,
        booking: Arc<BookingConversation>,
    ) -> Self {
        Self {
            sessions,
            onboarding,
            registration,
            booking,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one inbound message. Always returns a reply string — internal
    /// faults degrade to a fixed apology, never an error across the webhook
    /// boundary.
    pub async fn handle_message(
        &self,
        from: &str,
        body: &str,
        media_url: Option<&str>,
    ) -> String {
        let lock = self.phone_lock(from).await;
        let _guard = lock.lock().await;

        match self.route(from, body, media_url).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(phone = %from, error = %e, "Message handling failed");
                APOLOGY_REPLY.to_string()
            }
        }
    }

    async fn route(
        &self,
        from: &str,
        body: &str,
        media_url: Option<&str>,
    ) -> Result<String, Error> {
        let session = self
            .sessions
            .get(from)
            .await?
            .unwrap_or_else(|| ConversationSession::new(from));

        match &session.mode {
            SessionMode::Onboarding { .. } => self.onboarding.advance(from, body, &session).await,
            SessionMode::Registration { .. } => {
                match self
                    .registration
                    .advance(from, body, &session, media_url)
                    .await?
                {
                    Some(reply) => Ok(reply),
                    // Registration not applicable after all — fall through
                    // to the booking conversation.
                    None => Ok(self.booking.respond(from, &session, body).await),
                }
            }
            SessionMode::Idle => {
                // Setup keyword starts onboarding, but only for numbers
                // that don't own a business yet.
                if session.business_id.is_none() && is_setup_trigger(body) {
                    return self.onboarding.begin(from).await;
                }
                Ok(self.booking.respond(from, &session, body).await)
            }
        }
    }

    /// Start onboarding for a phone number (dashboard glue).
    pub async fn begin_onboarding(&self, phone: &str) -> Result<String, Error> {
        let lock = self.phone_lock(phone).await;
        let _guard = lock.lock().await;
        self.onboarding.begin(phone).await
    }

    /// Start registration for a booking (called after approval).
    pub async fn begin_registration(
        &self,
        phone: &str,
        booking_id: Uuid,
    ) -> Result<String, Error> {
        let lock = self.phone_lock(phone).await;
        let _guard = lock.lock().await;
        self.registration.begin(phone, booking_id).await
    }

    /// Administrative reset — drops the session record and the cached chat
    /// transcript.
    pub async fn reset_session(&self, phone: &str) -> Result<(), Error> {
        let lock = self.phone_lock(phone).await;
        let _guard = lock.lock().await;
        self.sessions.reset(phone).await?;
        self.booking.chats().reset(phone).await;
        Ok(())
    }

    /// Evict idle chat transcripts. Intended to be called periodically.
    pub async fn prune_chats(&self) -> usize {
        self.booking.chats().prune_idle().await
    }

    async fn phone_lock(&self, phone: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(phone.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn is_setup_trigger(body: &str) -> bool {
    let normalized = body.trim().to_lowercase();
    SETUP_TRIGGERS.contains(&normalized.as_str())
}
