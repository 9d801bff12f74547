//! Booking conversation orchestrator.
//!
//! Runs one model round trip per inbound customer message, executing
//! requested tool calls and feeding results back until the model answers in
//! plain text or the round cap is hit. Every failure mode degrades to a
//! fixed reply; nothing here ever surfaces an error to the transport.

use std::sync::Arc;
use std::time::Duration;

use crate::directory::Directory;
use crate::error::LlmError;
use crate::llm::{ChatMessage, ChatModel, ChatRequest};
use crate::session::{ConversationSession, SessionPatch, SessionStore};
use crate::tools::ToolRegistry;

use super::cache::ChatSessionCache;

pub const APOLOGY_REPLY: &str = "\
Sorry, I'm having trouble responding right now. Please try again in a \
moment.";

pub const RATE_LIMIT_REPLY: &str = "\
We're receiving a lot of messages right now — please try again in a \
minute.";

const TOOL_LOOP_FALLBACK: &str = "\
Sorry, I couldn't finish processing that request. Could you rephrase, or \
tell me the day and time you'd like?";

const BASE_SYSTEM_PROMPT: &str = "\
You are Kaelo, a friendly WhatsApp booking assistant for a small business. \
Help customers pick a time and book an appointment. Keep replies short — \
this is WhatsApp. Use check_availability before proposing times, and use \
create_booking_request only after the customer confirms a name and a time. \
Never invent availability or confirm a booking without the tool result.";

/// Display-history entries kept in session metadata.
const CHAT_HISTORY_LIMIT: usize = 20;

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard cap on model↔tool rounds per inbound message.
    pub max_tool_rounds: usize,
    /// Timeout for a single model call.
    pub model_timeout: Duration,
    /// Timeout for a single tool execution.
    pub tool_timeout: Duration,
    pub max_tokens: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            model_timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(10),
            max_tokens: 1024,
        }
    }
}

/// The booking conversation orchestrator.
pub struct BookingConversation {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    directory: Arc<dyn Directory>,
    sessions: Arc<dyn SessionStore>,
    chats: Arc<ChatSessionCache>,
    config: OrchestratorConfig,
}

impl BookingConversation {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        directory: Arc<dyn Directory>,
        sessions: Arc<dyn SessionStore>,
        chats: Arc<ChatSessionCache>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            model,
            tools,
            directory,
            sessions,
            chats,
            config,
        }
    }

    /// Access to the chat cache, for pruning and administrative resets.
    pub fn chats(&self) -> &Arc<ChatSessionCache> {
        &self.chats
    }

    /// Handle one customer message and produce the reply text.
    pub async fn respond(&self, phone: &str, session: &ConversationSession, text: &str) -> String {
        let system = self.system_prompt_for(session).await;
        let (system, history) = self.chats.get_or_create(phone, || system).await;

        let mut messages = history;
        messages.push(ChatMessage::user(text));

        let definitions = self.tools.definitions().await;
        let mut rounds = 0;

        loop {
            if rounds >= self.config.max_tool_rounds {
                tracing::warn!(
                    %phone,
                    rounds,
                    "Tool loop cap reached, returning fallback reply"
                );
                return TOOL_LOOP_FALLBACK.to_string();
            }
            rounds += 1;

            let request = ChatRequest::new(messages.clone())
                .with_system(system.clone())
                .with_tools(definitions.clone());

            let response =
                match tokio::time::timeout(self.config.model_timeout, self.model.complete(request))
                    .await
                {
                    Ok(Ok(response)) => response,
                    Ok(Err(LlmError::RateLimited { .. })) => {
                        tracing::warn!(%phone, "Model rate limited");
                        return RATE_LIMIT_REPLY.to_string();
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(%phone, error = %e, "Model call failed");
                        return APOLOGY_REPLY.to_string();
                    }
                    Err(_) => {
                        tracing::warn!(%phone, "Model call timed out");
                        return APOLOGY_REPLY.to_string();
                    }
                };

            if !response.wants_tools() {
                let reply = match response.content {
                    Some(content) if !content.trim().is_empty() => content,
                    _ => APOLOGY_REPLY.to_string(),
                };
                self.chats.commit_turn(phone, text, &reply).await;
                self.append_display_history(phone, session, text, &reply)
                    .await;
                return reply;
            }

            // Execute every requested call, in order, feeding each result
            // back before the next model round.
            let calls = response.tool_calls;
            messages.push(ChatMessage::assistant_with_calls(
                response.content.unwrap_or_default(),
                calls.clone(),
            ));
            for call in calls {
                tracing::debug!(%phone, tool = %call.name, "Executing tool call");
                let result = match tokio::time::timeout(
                    self.config.tool_timeout,
                    self.tools.execute(&call.name, call.arguments),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(%phone, tool = %call.name, "Tool execution timed out");
                        serde_json::json!({"error": "the tool took too long to respond"})
                    }
                };
                messages.push(ChatMessage::tool_result(call.id, result.to_string()));
            }
        }
    }

    /// Base instruction plus the resolved business's knowledge snippet.
    async fn system_prompt_for(&self, session: &ConversationSession) -> String {
        let profile = match session.business_id {
            Some(id) => self.directory.profile_by_id(id).await.ok().flatten(),
            None => self.directory.resolve_target_business().await.ok().flatten(),
        };

        match profile {
            Some(profile) => {
                let mut prompt = format!(
                    "{BASE_SYSTEM_PROMPT}\n\nBusiness: {} ({})",
                    profile.business_name, profile.role_type
                );
                if let Some(area) = &profile.service_area {
                    prompt.push_str(&format!("\nService area: {area}"));
                }
                if let Some(days) = &profile.working_days {
                    prompt.push_str(&format!("\nWorking days: {days}"));
                }
                if let Some(knowledge) = profile
                    .knowledge_base
                    .as_deref()
                    .filter(|k| !k.is_empty())
                {
                    prompt.push_str(&format!("\n\nBusiness notes:\n{knowledge}"));
                }
                prompt
            }
            None => BASE_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Keep a short user-visible transcript in session metadata for the
    /// dashboard. Failures are logged and swallowed — display history is
    /// best-effort.
    async fn append_display_history(
        &self,
        phone: &str,
        session: &ConversationSession,
        user: &str,
        assistant: &str,
    ) {
        let mut history: Vec<serde_json::Value> = session
            .metadata
            .get("chat_history")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        history.push(serde_json::json!({"role": "user", "text": user}));
        history.push(serde_json::json!({"role": "assistant", "text": assistant}));
        if history.len() > CHAT_HISTORY_LIMIT {
            let excess = history.len() - CHAT_HISTORY_LIMIT;
            history.drain(..excess);
        }

        if let Err(e) = self
            .sessions
            .upsert(
                phone,
                SessionPatch::default().with_meta("chat_history", serde_json::Value::Array(history)),
            )
            .await
        {
            tracing::warn!(%phone, error = %e, "Failed to persist chat history");
        }
    }
}
