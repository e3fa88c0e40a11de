use std::sync::Arc;

use tera::{Context, Tera};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ventix_core::clock::Clock;
use ventix_core::config::AppConfig;
use ventix_core::domain::conversation::ConversationSnapshot;
use ventix_core::domain::intent::{Intent, Provenance, Slot};

use crate::extract::{parse_classification, ParsedClassification};
use crate::fallback;
use crate::invoker::{InvokerSettings, ResilientInvoker};
use crate::llm::{GeminiClient, ProviderError};
use crate::pool::ProviderPool;
use crate::vocabulary;

const CLASSIFY_PROMPT: &str = r#"Sos el clasificador de intenciones de una tienda mayorista de ropa.
Intenciones válidas: check_stock, create_order, modify_order, cancel_order, sales_advice, general_chat.
Prendas: {{ garments | join(sep=", ") }}. Colores: {{ colors | join(sep=", ") }}. Talles: {{ sizes | join(sep=", ") }}.
El cliente tiene {{ recent_orders }} pedido(s) reciente(s).
{% if history %}Conversación reciente:
{% for message in history %}- {{ message.role }}: {{ message.content }}
{% endfor %}{% endif %}Mensaje del cliente: "{{ message }}"
Respondé solo con un objeto JSON con esta forma:
{"intent": "<intención>", "confidence": <0..1>, "reasoning": "<motivo>", "filters": {"garment_type": null, "color": null, "size": null}, "quantity": null}"#;

/// Turns a message plus short-term context into a validated [`Intent`].
///
/// Remote classification is attempted first when an invoker is configured;
/// any provider, parse or validation failure degrades to the keyword
/// fallback. Callers never see provider errors.
pub struct IntentRouter {
    invoker: Option<Arc<ResilientInvoker>>,
    context_window: usize,
}

impl IntentRouter {
    pub fn new(invoker: Option<Arc<ResilientInvoker>>, context_window: usize) -> Self {
        Self { invoker, context_window }
    }

    pub fn fallback_only(context_window: usize) -> Self {
        Self::new(None, context_window)
    }

    /// Remote classification over the configured pool, or fallback-only when
    /// the pool has no credential/model combinations.
    pub fn from_config(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Self, ProviderError> {
        let window = config.conversation.context_window;
        let pool = ProviderPool::from_config(&config.provider);
        if pool.is_empty() {
            return Ok(Self::fallback_only(window));
        }
        let client = GeminiClient::from_config(&config.provider)?;
        let invoker = ResilientInvoker::new(
            Arc::new(pool),
            Arc::new(client),
            clock,
            InvokerSettings::from_config(&config.provider),
        );
        Ok(Self::new(Some(Arc::new(invoker)), window))
    }

    pub fn invoker(&self) -> Option<&Arc<ResilientInvoker>> {
        self.invoker.as_ref()
    }

    pub async fn classify(
        &self,
        message: &str,
        context: &ConversationSnapshot,
        cancel: &CancellationToken,
    ) -> Intent {
        let mut intent = match self.classify_remote(message, context, cancel).await {
            Some(mut remote) => {
                remote.filters.merge_missing(&vocabulary::filters_in(message));
                if remote.quantity.is_none() {
                    remote.quantity = vocabulary::quantity_in(message);
                }
                remote
            }
            None => fallback::classify(message, context.recent_orders.len()),
        };

        let filled = backfill(&mut intent, message, context, self.context_window);

        info!(
            event_name = "agent.router.classified",
            user_id = %context.user_id,
            intent = %intent.kind,
            provenance = intent.provenance.as_str(),
            confidence = f64::from(intent.confidence),
            backfilled = ?filled,
            "message classified"
        );
        intent
    }

    async fn classify_remote(
        &self,
        message: &str,
        context: &ConversationSnapshot,
        cancel: &CancellationToken,
    ) -> Option<Intent> {
        let invoker = self.invoker.as_ref()?;
        let prompt = match render_prompt(message, context, self.context_window) {
            Ok(prompt) => prompt,
            Err(error) => {
                warn!(event_name = "agent.router.prompt_failed", error = %error, "could not render prompt");
                return None;
            }
        };

        let text = match invoker.invoke(&prompt, cancel).await {
            Ok(text) => text,
            Err(error) => {
                info!(
                    event_name = "agent.router.remote_unavailable",
                    user_id = %context.user_id,
                    reason = error.as_str(),
                    "falling back to keyword classification"
                );
                return None;
            }
        };

        match parse_classification(&text) {
            ParsedClassification::Parsed(intent) => Some(intent),
            ParsedClassification::Unparseable { raw } => {
                warn!(
                    event_name = "agent.router.unparseable",
                    user_id = %context.user_id,
                    raw = %raw,
                    "classifier output carried no usable payload"
                );
                None
            }
            ParsedClassification::InvalidIntentValue { value } => {
                warn!(
                    event_name = "agent.router.invalid_intent",
                    user_id = %context.user_id,
                    value = %value,
                    "classifier returned an intent outside the closed set"
                );
                None
            }
        }
    }
}

fn render_prompt(
    message: &str,
    context: &ConversationSnapshot,
    window: usize,
) -> Result<String, tera::Error> {
    let history: Vec<serde_json::Value> = context
        .window(window)
        .iter()
        .map(|entry| serde_json::json!({ "role": entry.role.as_str(), "content": entry.content }))
        .collect();

    let mut values = Context::new();
    values.insert("garments", &vocabulary::GARMENTS);
    values.insert("colors", &vocabulary::COLORS);
    values.insert("sizes", &vocabulary::SIZES);
    values.insert("recent_orders", &context.recent_orders.len());
    values.insert("history", &history);
    values.insert("message", message);
    Tera::one_off(CLASSIFY_PROMPT, &values, false)
}

/// Completes missing required attributes from recent assistant messages.
///
/// Skipped entirely when the message names a garment itself: a newer, more
/// specific request must not be overridden by older context. Each slot takes
/// the most recent mention. Returns the slots that were filled.
pub fn backfill(
    intent: &mut Intent,
    message: &str,
    context: &ConversationSnapshot,
    window: usize,
) -> Vec<Slot> {
    let mut missing = intent.filters.missing(intent.kind);
    if missing.is_empty() || vocabulary::mentions_garment(message) {
        return Vec::new();
    }

    let mut filled = Vec::new();
    for entry in context.recent_assistant_messages(window) {
        let mentioned = vocabulary::filters_in(&entry.content);
        missing.retain(|slot| match mentioned.get(*slot) {
            Some(value) => {
                intent.filters.set(*slot, value.to_string());
                filled.push(*slot);
                false
            }
            None => true,
        });
        if missing.is_empty() {
            break;
        }
    }

    if !filled.is_empty() {
        let slots: Vec<&str> = filled.iter().map(|slot| slot_name(*slot)).collect();
        intent.reasoning.push_str(&format!("; back-filled {} from context", slots.join(", ")));
        if intent.provenance == Provenance::Remote {
            intent.confidence = (intent.confidence * 0.9).clamp(0.0, 1.0);
        }
    }
    filled
}

fn slot_name(slot: Slot) -> &'static str {
    match slot {
        Slot::GarmentType => "garment_type",
        Slot::Color => "color",
        Slot::Size => "size",
    }
}
