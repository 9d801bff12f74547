use std::sync::Arc;

use axum::extract::{Form, State};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use kaelo::booking::{BookingConversation, ChatSessionCache, OrchestratorConfig};
use kaelo::calendar::InMemoryCalendar;
use kaelo::config::AppConfig;
use kaelo::dispatch::Dispatcher;
use kaelo::flows::{OnboardingFlow, RegistrationFlow};
use kaelo::llm::{AnthropicModel, ChatModel};
use kaelo::store::LibSqlBackend;
use kaelo::tools::ToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    eprintln!("Kaelo v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhook: http://{}/webhook/whatsapp", config.bind_addr);
    eprintln!("   Database: {}", config.db_path);

    let api_key = config.api_key.clone().unwrap_or_else(|| {
        eprintln!("Error: ANTHROPIC_API_KEY not set");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    });

    // ── Storage ──────────────────────────────────────────────────────
    let backend = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&config.db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: failed to open database at {}: {e}", config.db_path);
                std::process::exit(1);
            }),
    );

    // ── Collaborators ────────────────────────────────────────────────
    let model: Arc<dyn ChatModel> =
        Arc::new(AnthropicModel::new(api_key, config.model.clone()));
    let calendar = Arc::new(InMemoryCalendar::new());

    let tools = Arc::new(ToolRegistry::new());
    tools
        .register(Arc::new(kaelo::booking::tools::AvailabilityTool::new(
            calendar.clone(),
            config.collaborator_timeout,
        )))
        .await;
    tools
        .register(Arc::new(kaelo::booking::tools::CreateBookingTool::new(
            backend.clone(),
            backend.clone(),
        )))
        .await;

    // ── Engines ──────────────────────────────────────────────────────
    let chats = Arc::new(ChatSessionCache::new(
        config.chat_cache_capacity,
        config.chat_idle_timeout,
    ));
    let booking = Arc::new(BookingConversation::new(
        model,
        tools,
        backend.clone(),
        backend.clone(),
        chats,
        OrchestratorConfig {
            max_tool_rounds: config.max_tool_rounds,
            model_timeout: config.model_timeout,
            tool_timeout: config.collaborator_timeout,
            ..Default::default()
        },
    ));
    let onboarding = OnboardingFlow::new(backend.clone(), backend.clone());
    let registration = RegistrationFlow::new(backend.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        backend.clone(),
        onboarding,
        registration,
        booking,
    ));

    // Periodic chat-session pruning.
    {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
            interval.tick().await; // skip the immediate first tick
            loop {
                interval.tick().await;
                let dropped = dispatcher.prune_chats().await;
                if dropped > 0 {
                    tracing::debug!(dropped, "Pruned idle chat sessions");
                }
            }
        });
    }

    // ── HTTP ─────────────────────────────────────────────────────────
    let app = Router::new()
        .route("/webhook/whatsapp", post(whatsapp_webhook))
        .route("/healthz", get(|| async { "ok" }))
        .layer(CorsLayer::permissive())
        .with_state(dispatcher);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Kaelo listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Twilio-style inbound WhatsApp form payload.
#[derive(Debug, Deserialize)]
struct WhatsAppInbound {
    #[serde(rename = "From")]
    from: String,
    #[serde(rename = "Body", default)]
    body: String,
    #[serde(rename = "MediaUrl0", default)]
    media_url: Option<String>,
}

async fn whatsapp_webhook(
    State(dispatcher): State<Arc<Dispatcher>>,
    Form(inbound): Form<WhatsAppInbound>,
) -> String {
    // Twilio prefixes the number with the channel, e.g. "whatsapp:+27...".
    let phone = inbound
        .from
        .strip_prefix("whatsapp:")
        .unwrap_or(&inbound.from)
        .to_string();

    dispatcher
        .handle_message(&phone, &inbound.body, inbound.media_url.as_deref())
        .await
}
