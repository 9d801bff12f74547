//! Session data model — one record per phone number.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which multi-turn flow currently owns the session.
///
/// Exactly one variant is active at a time; booking conversation is the
/// default when the session is `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum SessionMode {
    Idle,
    Onboarding {
        /// Current step id, looked up in the onboarding step tables.
        step: String,
        #[serde(default)]
        data: BTreeMap<String, String>,
    },
    Registration {
        step: RegStep,
        /// The step whose question was asked last. Answers commit against
        /// this, one turn behind the step pointer.
        #[serde(default)]
        prev_step: Option<RegStep>,
        booking_id: Uuid,
        #[serde(default)]
        data: BTreeMap<String, String>,
    },
}

impl Default for SessionMode {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionMode {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Registration intake steps, in order. `Done` is a pseudo-step marking the
/// end of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegStep {
    Name,
    IdNumber,
    MedicalAid,
    Consent,
    Done,
}

impl RegStep {
    /// Next step in the linear sequence, if any.
    pub fn next(&self) -> Option<RegStep> {
        match self {
            Self::Name => Some(Self::IdNumber),
            Self::IdNumber => Some(Self::MedicalAid),
            Self::MedicalAid => Some(Self::Consent),
            Self::Consent => Some(Self::Done),
            Self::Done => None,
        }
    }
}

impl std::fmt::Display for RegStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Name => "name",
            Self::IdNumber => "id_number",
            Self::MedicalAid => "medical_aid",
            Self::Consent => "consent",
            Self::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// Persisted conversation state for one phone number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub phone_number: String,
    #[serde(default)]
    pub business_id: Option<Uuid>,
    /// Coarse classification tag, informational only.
    pub intent: String,
    #[serde(default)]
    pub mode: SessionMode,
    /// Open-ended bag for everything that is not flow-tracking state:
    /// display chat history, completed-registration snapshots, etc.
    /// Merged shallowly on upsert.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    /// A fresh idle session for a phone number.
    pub fn new(phone_number: &str) -> Self {
        Self {
            phone_number: phone_number.to_string(),
            business_id: None,
            intent: "general".to_string(),
            mode: SessionMode::Idle,
            metadata: serde_json::Map::new(),
            updated_at: Utc::now(),
        }
    }
}

/// A partial update to a session.
///
/// `metadata` entries are merged into the existing bag key-by-key (shallow,
/// top level only); a `Value::Null` entry deletes that key. Unset fields
/// leave the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub business_id: Option<Option<Uuid>>,
    pub intent: Option<String>,
    pub mode: Option<SessionMode>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SessionPatch {
    pub fn mode(mode: SessionMode) -> Self {
        Self {
            mode: Some(mode),
            ..Default::default()
        }
    }

    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Apply this patch to a session in place and bump `updated_at`.
    pub fn apply(self, session: &mut ConversationSession) {
        if let Some(business_id) = self.business_id {
            session.business_id = business_id;
        }
        if let Some(intent) = self.intent {
            session.intent = intent;
        }
        if let Some(mode) = self.mode {
            session.mode = mode;
        }
        for (key, value) in self.metadata {
            if value.is_null() {
                session.metadata.remove(&key);
            } else {
                session.metadata.insert(key, value);
            }
        }
        session.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_idle() {
        let session = ConversationSession::new("27821234567");
        assert!(session.mode.is_idle());
        assert_eq!(session.intent, "general");
        assert!(session.business_id.is_none());
    }

    #[test]
    fn reg_step_walks_to_done() {
        let mut step = RegStep::Name;
        let expected = [
            RegStep::IdNumber,
            RegStep::MedicalAid,
            RegStep::Consent,
            RegStep::Done,
        ];
        for next in expected {
            step = step.next().unwrap();
            assert_eq!(step, next);
        }
        assert!(step.next().is_none());
    }

    #[test]
    fn patch_merges_metadata_shallowly() {
        let mut session = ConversationSession::new("1");
        session
            .metadata
            .insert("keep".to_string(), serde_json::json!({"a": 1}));
        session
            .metadata
            .insert("replace".to_string(), serde_json::json!("old"));

        SessionPatch::default()
            .with_meta("replace", serde_json::json!("new"))
            .with_meta("added", serde_json::json!(42))
            .apply(&mut session);

        assert_eq!(session.metadata["keep"], serde_json::json!({"a": 1}));
        assert_eq!(session.metadata["replace"], serde_json::json!("new"));
        assert_eq!(session.metadata["added"], serde_json::json!(42));
    }

    #[test]
    fn null_metadata_entry_deletes_key() {
        let mut session = ConversationSession::new("1");
        session
            .metadata
            .insert("gone".to_string(), serde_json::json!(true));

        SessionPatch::default()
            .with_meta("gone", serde_json::Value::Null)
            .apply(&mut session);

        assert!(!session.metadata.contains_key("gone"));
    }

    #[test]
    fn patch_can_clear_business_id() {
        let mut session = ConversationSession::new("1");
        session.business_id = Some(Uuid::new_v4());

        SessionPatch {
            business_id: Some(None),
            ..Default::default()
        }
        .apply(&mut session);

        assert!(session.business_id.is_none());
    }

    #[test]
    fn mode_serde_roundtrip() {
        let mode = SessionMode::Registration {
            step: RegStep::MedicalAid,
            prev_step: Some(RegStep::IdNumber),
            booking_id: Uuid::new_v4(),
            data: [("full_name".to_string(), "Alice".to_string())]
                .into_iter()
                .collect(),
        };
        let json = serde_json::to_string(&mode).unwrap();
        assert!(json.contains("\"flow\":\"registration\""));
        let parsed: SessionMode = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, mode);
    }
}
