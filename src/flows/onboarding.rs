//! Onboarding flow — walks a new business owner through a branching
//! questionnaire and finalizes into a business profile plus owner account.
//!
//! The flow is a directed graph over named steps. The root step classifies
//! the owner's work style into one of three branches; each branch is an
//! ordered list of question steps sharing the same shape (business name →
//! role/service type → closing field → finalize).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::directory::{make_slug, BusinessProfile, Directory, RoleCategory};
use crate::error::Error;
use crate::session::{ConversationSession, SessionMode, SessionPatch, SessionStore};

/// Step id of the root classifier.
pub const ROOT_STEP: &str = "root";

pub const ROOT_PROMPT: &str = "\
Welcome to Kaelo! Let's get your business set up. How do you work?\n\
1. Clients come to me at a fixed location (practice, salon, office)\n\
2. I travel to my clients (plumber, electrician, mobile services)\n\
3. A mix of both\n\
Reply with 1, 2 or 3.";

const UNKNOWN_TRANSITION_REPLY: &str = "\
Sorry, something went wrong on our side and I lost track of your setup. \
Please reply RESTART to start over.";

const SAVE_FAILED_REPLY: &str = "\
Sorry, I couldn't save your details just now. Please send your last answer \
again to retry.";

/// One question step in a branch.
struct StepDef {
    id: &'static str,
    prompt: &'static str,
    /// Key in the onboarding data bag this step's answer populates.
    save_field: &'static str,
    /// Fixed-choice remapping. Unmatched input falls through as raw text —
    /// the flow accepts anything and lets the owner fix it in the dashboard.
    options: Option<&'static [(&'static str, &'static str)]>,
}

/// One branch of the questionnaire, finalizing into a business category.
struct BranchDef {
    category: RoleCategory,
    intro: &'static str,
    steps: &'static [StepDef],
    closing: &'static str,
}

static PROFESSIONAL: BranchDef = BranchDef {
    category: RoleCategory::Professional,
    intro: "Great, a fixed-location practice. A few quick questions and you're in.",
    steps: &[
        StepDef {
            id: "pro_name",
            prompt: "What is the name of your practice or business?",
            save_field: "business_name",
            options: None,
        },
        StepDef {
            id: "pro_type",
            prompt: "What kind of professional are you? (e.g. doctor, dentist, physiotherapist)",
            save_field: "role_type",
            options: None,
        },
        StepDef {
            id: "pro_days",
            prompt: "Which days do you see clients? (e.g. weekdays, Mon-Sat)",
            save_field: "working_days",
            options: Some(&[("weekdays", "Mon-Fri"), ("everyday", "Mon-Sun")]),
        },
    ],
    closing: "\
You're all set! Clients who message this number can now book appointments \
with you. Bookings are confirmed automatically — you'll see them on your \
dashboard.",
};

static TRADESPERSON: BranchDef = BranchDef {
    category: RoleCategory::Tradesperson,
    intro: "Great, you go to your clients. A few quick questions and you're in.",
    steps: &[
        StepDef {
            id: "trade_name",
            prompt: "What is your business called?",
            save_field: "business_name",
            options: None,
        },
        StepDef {
            id: "trade_type",
            prompt: "What trade do you work in? (e.g. plumber, electrician, painter)",
            save_field: "role_type",
            options: None,
        },
        StepDef {
            id: "trade_area",
            prompt: "Which areas do you service? (e.g. Soweto and surrounds)",
            save_field: "service_area",
            options: None,
        },
    ],
    closing: "\
You're all set! Clients who message this number can request a callout. \
You approve each request from your dashboard before it's confirmed.",
};

static HYBRID: BranchDef = BranchDef {
    category: RoleCategory::Hybrid,
    intro: "Got it, a mix of on-site and call-out work. A few quick questions and you're in.",
    steps: &[
        StepDef {
            id: "hybrid_name",
            prompt: "What is your business called?",
            save_field: "business_name",
            options: None,
        },
        StepDef {
            id: "hybrid_type",
            prompt: "What service do you offer? (e.g. hairdresser, mechanic)",
            save_field: "role_type",
            options: None,
        },
        StepDef {
            id: "hybrid_area",
            prompt: "Which areas do you cover for call-outs?",
            save_field: "service_area",
            options: None,
        },
    ],
    closing: "\
You're all set! Clients can now book you over WhatsApp. You approve each \
request from your dashboard before it's confirmed.",
};

static BRANCHES: [&BranchDef; 3] = [&PROFESSIONAL, &TRADESPERSON, &HYBRID];

/// Root classifier table: normalized input → branch.
static ROOT_CHOICES: &[(&str, &BranchDef)] = &[
    ("1", &PROFESSIONAL),
    ("fixed", &PROFESSIONAL),
    ("2", &TRADESPERSON),
    ("mobile", &TRADESPERSON),
    ("3", &HYBRID),
    ("both", &HYBRID),
    ("mixed", &HYBRID),
];

/// Find the branch and position for a step id.
fn lookup_step(step_id: &str) -> Option<(&'static BranchDef, usize)> {
    for branch in BRANCHES {
        if let Some(index) = branch.steps.iter().position(|s| s.id == step_id) {
            return Some((branch, index));
        }
    }
    None
}

/// The onboarding flow engine.
pub struct OnboardingFlow {
    sessions: Arc<dyn SessionStore>,
    directory: Arc<dyn Directory>,
}

impl OnboardingFlow {
    pub fn new(sessions: Arc<dyn SessionStore>, directory: Arc<dyn Directory>) -> Self {
        Self {
            sessions,
            directory,
        }
    }

    /// Put a phone number at the root step and return the root prompt.
    pub async fn begin(&self, phone: &str) -> Result<String, Error> {
        self.sessions
            .upsert(
                phone,
                SessionPatch::mode(SessionMode::Onboarding {
                    step: ROOT_STEP.to_string(),
                    data: BTreeMap::new(),
                }),
            )
            .await?;
        Ok(ROOT_PROMPT.to_string())
    }

    /// Process one owner message and return the reply.
    pub async fn advance(
        &self,
        phone: &str,
        input: &str,
        session: &ConversationSession,
    ) -> Result<String, Error> {
        let SessionMode::Onboarding { step, data } = &session.mode else {
            tracing::error!(%phone, "Onboarding advance called outside onboarding mode");
            return Ok(UNKNOWN_TRANSITION_REPLY.to_string());
        };
        let mut data = data.clone();

        if step == ROOT_STEP {
            return self.advance_root(phone, input, data).await;
        }

        let Some((branch, index)) = lookup_step(step) else {
            tracing::error!(%phone, %step, "Onboarding step not found in any branch");
            return Ok(UNKNOWN_TRANSITION_REPLY.to_string());
        };
        let current = &branch.steps[index];

        // Any text is accepted; fixed-choice steps remap known answers and
        // let everything else through raw.
        let trimmed = input.trim();
        let value = match current.options {
            Some(options) => {
                let normalized = trimmed.to_lowercase();
                options
                    .iter()
                    .find(|(key, _)| *key == normalized)
                    .map(|(_, mapped)| mapped.to_string())
                    .unwrap_or_else(|| trimmed.to_string())
            }
            None => trimmed.to_string(),
        };
        data.insert(current.save_field.to_string(), value);

        match branch.steps.get(index + 1) {
            Some(next) => {
                self.sessions
                    .upsert(
                        phone,
                        SessionPatch::mode(SessionMode::Onboarding {
                            step: next.id.to_string(),
                            data,
                        }),
                    )
                    .await?;
                Ok(next.prompt.to_string())
            }
            None => self.finalize(phone, branch, &data).await,
        }
    }

    /// Classify the root answer and enter a branch. The branch intro is
    /// folded into the first question — the intro step itself is never
    /// persisted as current.
    async fn advance_root(
        &self,
        phone: &str,
        input: &str,
        data: BTreeMap<String, String>,
    ) -> Result<String, Error> {
        let normalized = input.trim().to_lowercase();
        let Some((_, branch)) = ROOT_CHOICES.iter().find(|(key, _)| *key == normalized) else {
            // Unrecognized choice: re-prompt, no state change.
            return Ok(ROOT_PROMPT.to_string());
        };

        let first = &branch.steps[0];
        self.sessions
            .upsert(
                phone,
                SessionPatch::mode(SessionMode::Onboarding {
                    step: first.id.to_string(),
                    data,
                }),
            )
            .await?;
        Ok(format!("{}\n\n{}", branch.intro, first.prompt))
    }

    /// Commit the accumulated answers: create/find the owner identity,
    /// upsert the business profile, and clear the flow state.
    ///
    /// On collaborator failure the session stays on the final step, so
    /// resending the last answer retries the whole finalize.
    async fn finalize(
        &self,
        phone: &str,
        branch: &BranchDef,
        data: &BTreeMap<String, String>,
    ) -> Result<String, Error> {
        let business_name = data.get("business_name").cloned().unwrap_or_default();

        let user_id = match self.directory.create_or_find_user(phone).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(%phone, error = %e, "Owner identity lookup failed at finalize");
                return Ok(SAVE_FAILED_REPLY.to_string());
            }
        };

        let profile = BusinessProfile {
            id: user_id,
            phone_number: phone.to_string(),
            business_name: business_name.clone(),
            slug: make_slug(&business_name),
            category: branch.category,
            role_type: data.get("role_type").cloned().unwrap_or_default(),
            service_area: data.get("service_area").cloned(),
            working_days: data.get("working_days").cloned(),
            approval_required: branch.category.approval_required(),
            knowledge_base: None,
            created_at: Utc::now(),
        };

        if let Err(e) = self.directory.upsert_profile(&profile).await {
            tracing::warn!(%phone, error = %e, "Profile upsert failed, retrying by phone");
            if let Err(e) = self
                .directory
                .update_profile_by_phone(phone, &profile)
                .await
            {
                tracing::error!(%phone, error = %e, "Profile fallback update failed");
                return Ok(SAVE_FAILED_REPLY.to_string());
            }
        }

        self.sessions
            .upsert(
                phone,
                SessionPatch {
                    business_id: Some(Some(user_id)),
                    mode: Some(SessionMode::Idle),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(%phone, business = %business_name, category = %branch.category, "Onboarding complete");
        Ok(branch.closing.to_string())
    }
}

/// Expose the finalize marker for a step id, for callers that need to know
/// whether a given step is the last question of its branch.
pub fn is_final_step(step_id: &str) -> Option<RoleCategory> {
    let (branch, index) = lookup_step(step_id)?;
    (index + 1 == branch.steps.len()).then_some(branch.category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use crate::store::memory::MemoryBackend;

    fn engine() -> (OnboardingFlow, Arc<MemorySessionStore>, Arc<MemoryBackend>) {
        let sessions = Arc::new(MemorySessionStore::new());
        let backend = Arc::new(MemoryBackend::new());
        let flow = OnboardingFlow::new(sessions.clone(), backend.clone());
        (flow, sessions, backend)
    }

    async fn session_of(store: &MemorySessionStore, phone: &str) -> ConversationSession {
        store.get(phone).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn unmapped_root_input_reprompts_without_advancing() {
        let (flow, sessions, _) = engine();
        flow.begin("111").await.unwrap();
        let before = session_of(&sessions, "111").await;

        let reply = flow
            .advance("111", "something else", &before)
            .await
            .unwrap();

        assert_eq!(reply, ROOT_PROMPT);
        let after = session_of(&sessions, "111").await;
        assert_eq!(
            after.mode,
            SessionMode::Onboarding {
                step: ROOT_STEP.to_string(),
                data: BTreeMap::new(),
            }
        );
    }

    #[tokio::test]
    async fn root_choices_land_on_first_question() {
        let cases = [
            ("1", "pro_name"),
            ("fixed", "pro_name"),
            ("2", "trade_name"),
            ("MOBILE", "trade_name"),
            ("3", "hybrid_name"),
            ("both", "hybrid_name"),
            (" mixed ", "hybrid_name"),
        ];
        for (input, expected_step) in cases {
            let (flow, sessions, _) = engine();
            flow.begin("111").await.unwrap();
            let session = session_of(&sessions, "111").await;

            let reply = flow.advance("111", input, &session).await.unwrap();

            let after = session_of(&sessions, "111").await;
            let SessionMode::Onboarding { step, .. } = &after.mode else {
                panic!("expected onboarding mode for input {input:?}");
            };
            assert_eq!(step, expected_step, "input {input:?}");
            // Intro and first question are one message, blank-line separated.
            let (intro, question) = reply.split_once("\n\n").unwrap();
            assert!(!intro.is_empty());
            let (branch, _) = lookup_step(expected_step).unwrap();
            assert_eq!(question, branch.steps[0].prompt);
        }
    }

    #[tokio::test]
    async fn professional_run_creates_auto_approving_profile() {
        let (flow, sessions, backend) = engine();
        flow.begin("27821111111").await.unwrap();

        for input in ["1", "Joe's Coffee!!", "barber", "weekdays"] {
            let session = session_of(&sessions, "27821111111").await;
            flow.advance("27821111111", input, &session).await.unwrap();
        }

        let session = session_of(&sessions, "27821111111").await;
        assert_eq!(session.mode, SessionMode::Idle);
        let business_id = session.business_id.expect("business id set at finalize");

        let profile = backend
            .profile_by_phone("27821111111")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.id, business_id);
        assert_eq!(profile.business_name, "Joe's Coffee!!");
        assert_eq!(profile.category, RoleCategory::Professional);
        assert!(!profile.approval_required);
        assert_eq!(profile.working_days.as_deref(), Some("Mon-Fri"));
        assert!(profile.slug.starts_with("joe-s-coffee-"));
    }

    #[tokio::test]
    async fn tradesperson_profile_requires_approval() {
        let (flow, sessions, backend) = engine();
        flow.begin("222").await.unwrap();

        for input in ["2", "Fix-It Phil", "plumber", "Soweto"] {
            let session = session_of(&sessions, "222").await;
            flow.advance("222", input, &session).await.unwrap();
        }

        let profile = backend.profile_by_phone("222").await.unwrap().unwrap();
        assert_eq!(profile.category, RoleCategory::Tradesperson);
        assert!(profile.approval_required);
        assert_eq!(profile.service_area.as_deref(), Some("Soweto"));
        assert!(profile.working_days.is_none());
    }

    #[tokio::test]
    async fn finalize_replay_does_not_duplicate_profiles() {
        let (flow, sessions, backend) = engine();
        flow.begin("333").await.unwrap();

        for input in ["1", "Solo Practice", "dentist"] {
            let session = session_of(&sessions, "333").await;
            flow.advance("333", input, &session).await.unwrap();
        }
        // Capture the session at the final question and replay the last
        // answer twice against it.
        let at_final = session_of(&sessions, "333").await;
        flow.advance("333", "Mon-Fri", &at_final).await.unwrap();
        flow.advance("333", "Mon-Fri", &at_final).await.unwrap();

        assert_eq!(backend.profile_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_step_id_returns_guard_reply() {
        let (flow, sessions, _) = engine();
        flow.begin("444").await.unwrap();
        let mut session = session_of(&sessions, "444").await;
        session.mode = SessionMode::Onboarding {
            step: "no_such_step".to_string(),
            data: BTreeMap::new(),
        };

        let reply = flow.advance("444", "anything", &session).await.unwrap();
        assert!(reply.contains("lost track"));
    }

    #[tokio::test]
    async fn non_option_answer_falls_through_raw() {
        let (flow, sessions, backend) = engine();
        flow.begin("555").await.unwrap();

        for input in ["1", "The Clinic", "GP", "tuesdays and thursdays only"] {
            let session = session_of(&sessions, "555").await;
            flow.advance("555", input, &session).await.unwrap();
        }

        let profile = backend.profile_by_phone("555").await.unwrap().unwrap();
        assert_eq!(
            profile.working_days.as_deref(),
            Some("tuesdays and thursdays only")
        );
    }

    #[test]
    fn final_step_markers_map_to_categories() {
        assert_eq!(is_final_step("pro_days"), Some(RoleCategory::Professional));
        assert_eq!(is_final_step("trade_area"), Some(RoleCategory::Tradesperson));
        assert_eq!(is_final_step("hybrid_area"), Some(RoleCategory::Hybrid));
        assert_eq!(is_final_step("pro_name"), None);
        assert_eq!(is_final_step("bogus"), None);
    }
}
