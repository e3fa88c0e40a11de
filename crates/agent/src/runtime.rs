use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use ventix_core::clock::Clock;
use ventix_core::config::AppConfig;
use ventix_core::domain::conversation::{ConversationMessage, ConversationSnapshot};
use ventix_core::domain::intent::{Intent, IntentKind, ProductFilters, Slot};
use ventix_core::domain::order::{NewOrder, Order, OrderSummary};
use ventix_core::domain::product::{Product, ProductId};
use ventix_core::errors::LedgerError;
use ventix_db::repositories::{OrderLedger, OrderRepository, ProductRepository};

use crate::context::{ContextCache, Exchange};
use crate::router::IntentRouter;
use crate::vocabulary;

pub const APOLOGY: &str =
    "Disculpá, tuve un problema procesando tu consulta. ¿Podés intentar de nuevo en un momento?";

const TEMPLATES: &[(&str, &str)] = &[
    (
        "greeting",
        "¡Hola! Te ayudo con stock, precios y pedidos mayoristas (mínimo {{ minimum }} unidades). \
         Los pedidos se pueden modificar durante {{ window_minutes }} minutos.",
    ),
    (
        "clarify_slots",
        "Para avanzar necesito saber {{ missing | join(sep=\", \") }}. \
         Trabajamos {{ garments | join(sep=\", \") }}.",
    ),
    ("no_stock", "No encontré stock para {{ query }}. ¿Querés probar con otro color o talle?"),
    (
        "stock_list",
        "Esto es lo que tenemos{% if query %} para {{ query }}{% endif %}:\n\
         {% for item in items %}• {{ item.label }}: {{ item.stock }} u. \
         (50+: ${{ item.price_50 }}, 100+: ${{ item.price_100 }}, 200+: ${{ item.price_200 }})\n{% endfor %}",
    ),
    ("ask_quantity", "¿Cuántas unidades necesitás? El pedido mínimo es de {{ minimum }}."),
    ("below_minimum", "El pedido mínimo es de {{ minimum }} unidades y pediste {{ requested }}."),
    (
        "order_created",
        "¡Listo! Pedido {{ order_id }}: {{ quantity }} × {{ label }} a ${{ unit_price }} c/u, \
         total ${{ total }}. Podés modificarlo durante {{ window_minutes }} minutos.",
    ),
    (
        "order_modified",
        "Actualicé el pedido {{ order_id }}: {{ quantity }} × {{ label }}, total ${{ total }}.",
    ),
    (
        "order_cancelled",
        "Cancelé el pedido {{ order_id }} ({{ quantity }} unidades) y liberé el stock.",
    ),
    ("no_pending_order", "No encontré pedidos pendientes a tu nombre."),
    (
        "ask_new_quantity",
        "¿A qué cantidad querés cambiar el pedido {{ order_id }}? Ahora tiene {{ quantity }} unidades.",
    ),
    (
        "insufficient_stock",
        "Solo quedan {{ available }} unidades disponibles y necesitás {{ requested }}. \
         ¿Querés ajustar la cantidad?",
    ),
    (
        "edit_window_expired",
        "El pedido {{ order_id }} ya no se puede modificar porque pasaron más de \
         {{ window_minutes }} minutos. Podés hacer un pedido nuevo.",
    ),
    ("order_closed", "El pedido {{ order_id }} ya estaba cancelado."),
    ("not_found", "No encontré {{ what }}."),
    ("invalid_quantity", "La cantidad tiene que ser mayor a cero."),
    (
        "advice",
        "Para {{ garment }} te recomiendo {{ label }} ({{ stock }} u. disponibles). \
         Precio por unidad: ${{ price_50 }} desde 50, ${{ price_100 }} desde 100 y \
         ${{ price_200 }} desde 200 unidades.",
    ),
    (
        "advice_general",
        "Trabajamos {{ garments | join(sep=\", \") }}. Cuanto más grande el pedido, mejor el \
         precio: hay escalas desde 50, 100 y 200 unidades. ¿Qué prenda te interesa?",
    ),
];

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("reply templates failed to compile: {0}")]
    Templates(#[from] tera::Error),
}

#[derive(Clone, Copy, Debug)]
pub struct RuntimeSettings {
    pub minimum_quantity: u32,
    pub edit_window_secs: i64,
    pub search_limit: usize,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            minimum_quantity: config.orders.minimum_quantity,
            edit_window_secs: config.orders.edit_window_secs,
            search_limit: 10,
        }
    }

    fn window_minutes(&self) -> i64 {
        self.edit_window_secs / 60
    }
}

/// Store handles a turn can touch.
#[derive(Clone)]
pub struct CommerceHandles {
    pub catalog: Arc<dyn ProductRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub ledger: Arc<dyn OrderLedger>,
}

#[derive(Debug)]
pub enum LedgerOutcome {
    Created(OrderSummary),
    Modified(OrderSummary),
    Cancelled(Order),
    Rejected(LedgerError),
}

impl LedgerOutcome {
    fn changed_orders(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Modified(_) => "modified",
            Self::Cancelled(_) => "cancelled",
            Self::Rejected(_) => "rejected",
        }
    }
}

#[derive(Debug)]
pub struct TurnOutcome {
    pub correlation_id: String,
    pub reply: String,
    pub intent: Intent,
    pub ledger: Option<LedgerOutcome>,
    /// The caller cancelled the turn; nothing was dispatched or recorded.
    pub cancelled: bool,
}

struct Turn {
    reply: String,
    shown: Vec<ProductId>,
    ledger: Option<LedgerOutcome>,
}

impl Turn {
    fn reply(reply: String) -> Self {
        Self { reply, shown: Vec::new(), ledger: None }
    }
}

#[derive(Serialize)]
struct StockLine {
    label: String,
    stock: u32,
    price_50: String,
    price_100: String,
    price_200: String,
}

impl From<&Product> for StockLine {
    fn from(product: &Product) -> Self {
        Self {
            label: product.label(),
            stock: product.stock,
            price_50: product.prices.from_50.to_string(),
            price_100: product.prices.from_100.to_string(),
            price_200: product.prices.from_200.to_string(),
        }
    }
}

/// Message-in, reply-out orchestration for one conversational turn.
pub struct AgentRuntime {
    router: IntentRouter,
    context: Arc<ContextCache>,
    stores: CommerceHandles,
    clock: Arc<dyn Clock>,
    settings: RuntimeSettings,
    templates: Tera,
}

impl AgentRuntime {
    pub fn new(
        router: IntentRouter,
        context: Arc<ContextCache>,
        stores: CommerceHandles,
        clock: Arc<dyn Clock>,
        settings: RuntimeSettings,
    ) -> Result<Self, RuntimeError> {
        let mut templates = Tera::default();
        templates.add_raw_templates(TEMPLATES.iter().copied())?;
        Ok(Self { router, context, stores, clock, settings, templates })
    }

    pub fn context(&self) -> &Arc<ContextCache> {
        &self.context
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    /// Handles one inbound message. Never fails: unexpected errors are logged
    /// and answered with a generic apology, while ledger rejections come back
    /// as user-correctable replies.
    pub async fn handle_message(
        &self,
        user_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let correlation_id = Uuid::new_v4().to_string();

        let snapshot = match self.context.snapshot(user_id).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(
                    event_name = "agent.runtime.context_unavailable",
                    correlation_id = %correlation_id,
                    user_id,
                    error = %error,
                    "continuing without conversation context"
                );
                ConversationSnapshot::empty(user_id, self.clock.now())
            }
        };

        let intent = self.router.classify(text, &snapshot, cancel).await;

        // A cancelled caller gets no ledger writes, even from a fallback intent.
        if cancel.is_cancelled() {
            warn!(
                event_name = "agent.runtime.turn_cancelled",
                correlation_id = %correlation_id,
                user_id,
                intent = %intent.kind,
                "turn abandoned before dispatch"
            );
            return TurnOutcome {
                correlation_id,
                reply: APOLOGY.to_string(),
                intent,
                ledger: None,
                cancelled: true,
            };
        }

        let turn = match self.dispatch(user_id, text, &intent).await {
            Ok(turn) => turn,
            Err(failure) => {
                error!(
                    event_name = "agent.runtime.turn_failed",
                    correlation_id = %correlation_id,
                    user_id,
                    intent = %intent.kind,
                    error = %failure,
                    "turn degraded to apology"
                );
                Turn::reply(APOLOGY.to_string())
            }
        };

        let now = self.clock.now();
        let exchange = Exchange {
            user: ConversationMessage::user(text, now).with_intent(intent.kind),
            assistant: ConversationMessage::assistant(turn.reply.clone(), now).with_intent(intent.kind),
            shown_products: turn.shown,
            orders_changed: turn.ledger.as_ref().is_some_and(LedgerOutcome::changed_orders),
        };
        if let Err(failure) = self.context.record_exchange(user_id, exchange).await {
            warn!(
                event_name = "agent.runtime.context_write_failed",
                correlation_id = %correlation_id,
                user_id,
                error = %failure,
                "conversation history not persisted"
            );
        }

        info!(
            event_name = "agent.runtime.turn",
            correlation_id = %correlation_id,
            user_id,
            intent = %intent.kind,
            provenance = intent.provenance.as_str(),
            ledger = turn.ledger.as_ref().map(LedgerOutcome::as_str),
            "turn handled"
        );

        TurnOutcome {
            correlation_id,
            reply: turn.reply,
            intent,
            ledger: turn.ledger,
            cancelled: false,
        }
    }

    async fn dispatch(&self, user_id: &str, text: &str, intent: &Intent) -> Result<Turn> {
        match intent.kind {
            IntentKind::CheckStock => self.check_stock(intent).await,
            IntentKind::CreateOrder => self.create_order(user_id, intent).await,
            IntentKind::ModifyOrder => self.modify_order(user_id, text, intent).await,
            IntentKind::CancelOrder => self.cancel_order(user_id).await,
            IntentKind::SalesAdvice => self.sales_advice(intent).await,
            IntentKind::GeneralChat => {
                let mut values = Context::new();
                values.insert("minimum", &self.settings.minimum_quantity);
                values.insert("window_minutes", &self.settings.window_minutes());
                Ok(Turn::reply(self.render("greeting", &values)?))
            }
        }
    }

    async fn check_stock(&self, intent: &Intent) -> Result<Turn> {
        if let Some(turn) = self.clarify(intent)? {
            return Ok(turn);
        }

        let products = self.stores.catalog.search(&intent.filters, self.settings.search_limit).await?;
        let mut values = Context::new();
        values.insert("query", &describe(&intent.filters));
        if products.is_empty() {
            return Ok(Turn::reply(self.render("no_stock", &values)?));
        }

        let items: Vec<StockLine> = products.iter().map(StockLine::from).collect();
        values.insert("items", &items);
        Ok(Turn {
            reply: self.render("stock_list", &values)?,
            shown: products.into_iter().map(|product| product.id).collect(),
            ledger: None,
        })
    }

    async fn create_order(&self, user_id: &str, intent: &Intent) -> Result<Turn> {
        let Some(quantity) = intent.quantity else {
            let mut values = Context::new();
            values.insert("minimum", &self.settings.minimum_quantity);
            return Ok(Turn::reply(self.render("ask_quantity", &values)?));
        };
        if let Some(turn) = self.below_minimum(quantity)? {
            return Ok(turn);
        }
        if let Some(turn) = self.clarify(intent)? {
            return Ok(turn);
        }

        let candidates = self.stores.catalog.search(&intent.filters, self.settings.search_limit).await?;
        let Some(product) = candidates
            .iter()
            .find(|product| product.has_stock_for(quantity))
            .or_else(|| candidates.first())
        else {
            let mut values = Context::new();
            values.insert("query", &describe(&intent.filters));
            return Ok(Turn::reply(self.render("no_stock", &values)?));
        };

        let request = NewOrder {
            product_id: product.id.clone(),
            quantity,
            buyer: user_id.to_string(),
            user_id: Some(user_id.to_string()),
        };
        match self.stores.ledger.create(request).await {
            Ok(order) => {
                let summary = OrderSummary::of(order, product);
                let mut values = summary_values(&summary);
                values.insert("window_minutes", &self.settings.window_minutes());
                Ok(Turn {
                    reply: self.render("order_created", &values)?,
                    shown: vec![product.id.clone()],
                    ledger: Some(LedgerOutcome::Created(summary)),
                })
            }
            Err(rejection) => self.ledger_rejection(rejection),
        }
    }

    async fn modify_order(&self, user_id: &str, text: &str, intent: &Intent) -> Result<Turn> {
        let Some(order) = self.stores.orders.latest_pending_for_user(user_id).await? else {
            return Ok(Turn::reply(self.render("no_pending_order", &Context::new())?));
        };

        let requested = vocabulary::increment_in(text)
            .map(|extra| order.quantity.saturating_add(extra))
            .or(intent.quantity);
        let Some(new_quantity) = requested else {
            let mut values = Context::new();
            values.insert("order_id", &order.id.0);
            values.insert("quantity", &order.quantity);
            return Ok(Turn::reply(self.render("ask_new_quantity", &values)?));
        };
        if let Some(turn) = self.below_minimum(new_quantity)? {
            return Ok(turn);
        }

        match self.stores.ledger.modify(&order.id, new_quantity).await {
            Ok(updated) => {
                let product = self
                    .stores
                    .catalog
                    .find_by_id(&updated.product_id)
                    .await?
                    .ok_or_else(|| anyhow!("product {} vanished after modify", updated.product_id))?;
                let summary = OrderSummary::of(updated, &product);
                Ok(Turn {
                    reply: self.render("order_modified", &summary_values(&summary))?,
                    shown: Vec::new(),
                    ledger: Some(LedgerOutcome::Modified(summary)),
                })
            }
            Err(rejection) => self.ledger_rejection(rejection),
        }
    }

    async fn cancel_order(&self, user_id: &str) -> Result<Turn> {
        let Some(order) = self.stores.orders.latest_pending_for_user(user_id).await? else {
            return Ok(Turn::reply(self.render("no_pending_order", &Context::new())?));
        };

        match self.stores.ledger.cancel(&order.id).await {
            Ok(cancelled) => {
                let mut values = Context::new();
                values.insert("order_id", &cancelled.id.0);
                values.insert("quantity", &cancelled.quantity);
                Ok(Turn {
                    reply: self.render("order_cancelled", &values)?,
                    shown: Vec::new(),
                    ledger: Some(LedgerOutcome::Cancelled(cancelled)),
                })
            }
            Err(rejection) => self.ledger_rejection(rejection),
        }
    }

    async fn sales_advice(&self, intent: &Intent) -> Result<Turn> {
        let mut values = Context::new();
        values.insert("garments", &vocabulary::GARMENTS);

        let Some(garment) = intent.filters.garment_type.as_deref() else {
            return Ok(Turn::reply(self.render("advice_general", &values)?));
        };
        let products = self.stores.catalog.search(&intent.filters, 1).await?;
        let Some(product) = products.first() else {
            return Ok(Turn::reply(self.render("advice_general", &values)?));
        };

        let line = StockLine::from(product);
        values.insert("garment", garment);
        values.insert("label", &line.label);
        values.insert("stock", &line.stock);
        values.insert("price_50", &line.price_50);
        values.insert("price_100", &line.price_100);
        values.insert("price_200", &line.price_200);
        Ok(Turn {
            reply: self.render("advice", &values)?,
            shown: vec![product.id.clone()],
            ledger: None,
        })
    }

    /// Asks for required attributes still missing after back-fill.
    fn clarify(&self, intent: &Intent) -> Result<Option<Turn>> {
        let missing = intent.filters.missing(intent.kind);
        if missing.is_empty() {
            return Ok(None);
        }
        let names: Vec<&str> = missing.iter().map(|slot| slot_label(*slot)).collect();
        let mut values = Context::new();
        values.insert("missing", &names);
        values.insert("garments", &vocabulary::GARMENTS);
        Ok(Some(Turn::reply(self.render("clarify_slots", &values)?)))
    }

    fn below_minimum(&self, quantity: u32) -> Result<Option<Turn>> {
        if quantity >= self.settings.minimum_quantity {
            return Ok(None);
        }
        let mut values = Context::new();
        values.insert("minimum", &self.settings.minimum_quantity);
        values.insert("requested", &quantity);
        Ok(Some(Turn::reply(self.render("below_minimum", &values)?)))
    }

    /// User-correctable ledger errors become replies; persistence failures
    /// propagate so the turn degrades to the apology.
    fn ledger_rejection(&self, rejection: LedgerError) -> Result<Turn> {
        let mut values = Context::new();
        let template = match &rejection {
            LedgerError::InsufficientStock { available, requested, .. } => {
                values.insert("available", available);
                values.insert("requested", requested);
                "insufficient_stock"
            }
            LedgerError::EditWindowExpired { order_id, .. } => {
                values.insert("order_id", &order_id.0);
                values.insert("window_minutes", &self.settings.window_minutes());
                "edit_window_expired"
            }
            LedgerError::OrderCancelled(order_id) => {
                values.insert("order_id", &order_id.0);
                "order_closed"
            }
            LedgerError::OrderNotFound(order_id) => {
                values.insert("what", &format!("el pedido {order_id}"));
                "not_found"
            }
            LedgerError::ProductNotFound(product_id) => {
                values.insert("what", &format!("el producto {product_id}"));
                "not_found"
            }
            LedgerError::InvalidQuantity => "invalid_quantity",
            LedgerError::Persistence(_) => return Err(rejection.into()),
        };

        info!(
            event_name = "agent.runtime.ledger_rejected",
            reason = %rejection,
            "ledger rejected the request"
        );
        Ok(Turn {
            reply: self.render(template, &values)?,
            shown: Vec::new(),
            ledger: Some(LedgerOutcome::Rejected(rejection)),
        })
    }

    fn render(&self, template: &str, values: &Context) -> Result<String> {
        Ok(self.templates.render(template, values)?)
    }
}

fn summary_values(summary: &OrderSummary) -> Context {
    let mut values = Context::new();
    values.insert("order_id", &summary.order.id.0);
    values.insert("quantity", &summary.order.quantity);
    values.insert("label", &summary.product_label);
    values.insert("unit_price", &summary.unit_price.to_string());
    values.insert("total", &summary.total.to_string());
    values
}

fn describe(filters: &ProductFilters) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(garment) = &filters.garment_type {
        parts.push(garment.clone());
    }
    if let Some(color) = &filters.color {
        parts.push(color.clone());
    }
    if let Some(size) = &filters.size {
        parts.push(format!("talla {size}"));
    }
    parts.join(" ")
}

fn slot_label(slot: Slot) -> &'static str {
    match slot {
        Slot::GarmentType => "la prenda",
        Slot::Color => "el color",
        Slot::Size => "el talle",
    }
}
