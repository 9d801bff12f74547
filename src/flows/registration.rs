//! Registration flow — fixed linear customer intake tied to a booking.
//!
//! The engine saves each answer against the question it *last asked*, one
//! turn behind the step pointer, then asks the next question. This
//! save-previous-then-ask-next ordering is load-bearing: the step pointer
//! always names the question that has not been answered yet.

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::Error;
use crate::session::{ConversationSession, RegStep, SessionMode, SessionPatch, SessionStore};

const INTRO_REPLY: &str = "\
Great news — your booking is confirmed! I need a few details to complete \
your registration. Reply OK to start.";

const CONSENT_PROMPT: &str = "\
Almost done — please send a photo of your signature to confirm consent. \
A photo is required, text won't work here.";

const COMPLETE_REPLY: &str = "\
Thank you, your registration is complete! We'll see you at your \
appointment.";

/// The target field and prompt for each real step.
fn step_def(step: RegStep) -> Option<(&'static str, &'static str)> {
    match step {
        RegStep::Name => Some(("full_name", "First, what is your full name?")),
        RegStep::IdNumber => Some(("id_number", "What is your ID number?")),
        RegStep::MedicalAid => Some((
            "medical_aid",
            "Which medical aid are you on? Reply NONE if you don't have one.",
        )),
        RegStep::Consent => Some(("signature_url", CONSENT_PROMPT)),
        RegStep::Done => None,
    }
}

/// The registration flow engine.
pub struct RegistrationFlow {
    sessions: Arc<dyn SessionStore>,
}

impl RegistrationFlow {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    /// Flip a session into registration mode for a booking and return the
    /// intro message. The first question is asked on the customer's next
    /// message.
    pub async fn begin(&self, phone: &str, booking_id: Uuid) -> Result<String, Error> {
        self.sessions
            .upsert(
                phone,
                SessionPatch::mode(SessionMode::Registration {
                    step: RegStep::Name,
                    prev_step: None,
                    booking_id,
                    data: BTreeMap::new(),
                }),
            )
            .await?;
        Ok(INTRO_REPLY.to_string())
    }

    /// Process one customer message. Returns `None` when the session holds
    /// no registration state — the caller treats that as "registration not
    /// applicable", not an error.
    pub async fn advance(
        &self,
        phone: &str,
        message: &str,
        session: &ConversationSession,
        media_url: Option<&str>,
    ) -> Result<Option<String>, Error> {
        let SessionMode::Registration {
            step,
            prev_step,
            booking_id,
            data,
        } = &session.mode
        else {
            return Ok(None);
        };
        let (step, prev_step, booking_id) = (*step, *prev_step, *booking_id);
        let mut data = data.clone();

        // Commit the answer to the question asked last turn. The signature
        // field is the one exception: it comes from the media attachment,
        // never from text.
        if let Some(prev) = prev_step
            && let Some((field, _)) = step_def(prev)
        {
            if prev == RegStep::Consent {
                if let Some(url) = media_url {
                    data.insert(field.to_string(), url.to_string());
                }
            } else {
                data.insert(field.to_string(), message.trim().to_string());
            }
        }

        // Terminal: nothing left to ask, or the signature arrived while the
        // consent step was pending.
        if step == RegStep::Done || (step == RegStep::Consent && media_url.is_some()) {
            if let Some(url) = media_url {
                data.insert("signature_url".to_string(), url.to_string());
            }
            return Ok(Some(self.finalize(phone, booking_id, data).await?));
        }

        // Signature guard: the consent step only moves on a photo. Asking
        // and re-asking are the same prompt; the pointer stays put.
        if step == RegStep::Consent {
            self.sessions
                .upsert(
                    phone,
                    SessionPatch::mode(SessionMode::Registration {
                        step: RegStep::Consent,
                        prev_step: Some(RegStep::Consent),
                        booking_id,
                        data,
                    }),
                )
                .await?;
            return Ok(Some(CONSENT_PROMPT.to_string()));
        }

        // Ask the current step's question and move the pointer one ahead.
        let Some(((_, prompt), next)) = step_def(step).zip(step.next()) else {
            // Unreachable with a well-formed step table.
            tracing::error!(%phone, %step, "Registration step has no question or successor");
            return Ok(Some(
                "Sorry, something went wrong with your registration. Please try again later."
                    .to_string(),
            ));
        };
        self.sessions
            .upsert(
                phone,
                SessionPatch::mode(SessionMode::Registration {
                    step: next,
                    prev_step: Some(step),
                    booking_id,
                    data,
                }),
            )
            .await?;
        Ok(Some(prompt.to_string()))
    }

    /// Snapshot the accumulated answers, flag completion, and clear the
    /// flow-tracking state.
    async fn finalize(
        &self,
        phone: &str,
        booking_id: Uuid,
        data: BTreeMap<String, String>,
    ) -> Result<String, Error> {
        let mut snapshot = serde_json::Map::new();
        snapshot.insert(
            "booking_id".to_string(),
            serde_json::json!(booking_id.to_string()),
        );
        for (key, value) in &data {
            snapshot.insert(key.clone(), serde_json::json!(value));
        }

        self.sessions
            .upsert(
                phone,
                SessionPatch::mode(SessionMode::Idle)
                    .with_meta("registration_complete", serde_json::json!(true))
                    .with_meta(
                        "last_registration_data",
                        serde_json::Value::Object(snapshot),
                    ),
            )
            .await?;

        tracing::info!(%phone, %booking_id, "Registration complete");
        Ok(COMPLETE_REPLY.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;

    fn engine() -> (RegistrationFlow, Arc<MemorySessionStore>) {
        let sessions = Arc::new(MemorySessionStore::new());
        (RegistrationFlow::new(sessions.clone()), sessions)
    }

    async fn session_of(store: &MemorySessionStore, phone: &str) -> ConversationSession {
        store.get(phone).await.unwrap().unwrap()
    }

    fn reg_data(session: &ConversationSession) -> BTreeMap<String, String> {
        match &session.mode {
            SessionMode::Registration { data, .. } => data.clone(),
            other => panic!("expected registration mode, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn returns_none_outside_registration_mode() {
        let (flow, sessions) = engine();
        sessions
            .upsert("111", SessionPatch::default())
            .await
            .unwrap();
        let session = session_of(&sessions, "111").await;

        let reply = flow.advance("111", "hello", &session, None).await.unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn answers_commit_one_turn_behind() {
        let (flow, sessions) = engine();
        let booking_id = Uuid::new_v4();
        flow.begin("111", booking_id).await.unwrap();

        // Trigger message: the name question is asked, nothing committed.
        let session = session_of(&sessions, "111").await;
        let reply = flow
            .advance("111", "OK", &session, None)
            .await
            .unwrap()
            .unwrap();
        assert!(reply.contains("full name"));
        let session = session_of(&sessions, "111").await;
        assert!(!reg_data(&session).contains_key("full_name"));

        // The name answer commits on the *next* call, never immediately.
        let reply = flow
            .advance("111", "Alice Smith", &session, None)
            .await
            .unwrap()
            .unwrap();
        assert!(reply.contains("ID number"));
        let session = session_of(&sessions, "111").await;
        assert_eq!(reg_data(&session)["full_name"], "Alice Smith");
    }

    #[tokio::test]
    async fn text_at_consent_reprompts_without_advancing() {
        let (flow, sessions) = engine();
        let booking_id = Uuid::new_v4();
        flow.begin("111", booking_id).await.unwrap();

        for message in ["OK", "Alice Smith", "8001015009087", "Discovery"] {
            let session = session_of(&sessions, "111").await;
            flow.advance("111", message, &session, None).await.unwrap();
        }

        let session = session_of(&sessions, "111").await;
        let SessionMode::Registration { step, .. } = session.mode else {
            panic!("still registering");
        };
        assert_eq!(step, RegStep::Consent);

        // Text instead of a photo: same prompt, same step.
        let session = session_of(&sessions, "111").await;
        let reply = flow
            .advance("111", "I don't have a pen", &session, None)
            .await
            .unwrap()
            .unwrap();
        assert!(reply.contains("photo"));
        let session = session_of(&sessions, "111").await;
        let SessionMode::Registration { step, .. } = session.mode else {
            panic!("must not leave registration on text");
        };
        assert_eq!(step, RegStep::Consent);
    }

    #[tokio::test]
    async fn photo_at_consent_completes_registration() {
        let (flow, sessions) = engine();
        let booking_id = Uuid::new_v4();
        flow.begin("111", booking_id).await.unwrap();

        for message in ["OK", "Alice Smith", "8001015009087", "Discovery"] {
            let session = session_of(&sessions, "111").await;
            flow.advance("111", message, &session, None).await.unwrap();
        }

        let session = session_of(&sessions, "111").await;
        let reply = flow
            .advance(
                "111",
                "",
                &session,
                Some("https://media.example/sig.jpg"),
            )
            .await
            .unwrap()
            .unwrap();
        assert!(reply.contains("complete"));

        let session = session_of(&sessions, "111").await;
        assert_eq!(session.mode, SessionMode::Idle);
        assert_eq!(
            session.metadata["registration_complete"],
            serde_json::json!(true)
        );
        let snapshot = &session.metadata["last_registration_data"];
        assert_eq!(snapshot["full_name"], "Alice Smith");
        assert_eq!(snapshot["id_number"], "8001015009087");
        assert_eq!(snapshot["medical_aid"], "Discovery");
        assert_eq!(snapshot["signature_url"], "https://media.example/sig.jpg");
        assert_eq!(snapshot["booking_id"], booking_id.to_string());
    }

    #[tokio::test]
    async fn completion_preserves_unrelated_metadata() {
        let (flow, sessions) = engine();
        sessions
            .upsert(
                "111",
                SessionPatch::default().with_meta("chat_history", serde_json::json!(["hi"])),
            )
            .await
            .unwrap();
        let booking_id = Uuid::new_v4();
        flow.begin("111", booking_id).await.unwrap();

        for message in ["OK", "Alice", "123", "NONE"] {
            let session = session_of(&sessions, "111").await;
            flow.advance("111", message, &session, None).await.unwrap();
        }
        let session = session_of(&sessions, "111").await;
        flow.advance("111", "", &session, Some("https://m/s.jpg"))
            .await
            .unwrap();

        let session = session_of(&sessions, "111").await;
        assert_eq!(
            session.metadata["chat_history"],
            serde_json::json!(["hi"])
        );
    }
}
