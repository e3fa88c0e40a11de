//! JSON API over the catalog, the order ledger, stored conversations and the
//! chat runtime.
//!
//! Ledger rejections keep their meaning on the wire: stock and edit-window
//! conflicts are `409`, unknown ids are `404` and invalid input is `422`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use ventix_agent::LedgerOutcome;
use ventix_core::domain::conversation::ConversationMessage;
use ventix_core::domain::intent::{Intent, ProductFilters};
use ventix_core::domain::order::{NewOrder, Order, OrderId, OrderSummary};
use ventix_core::domain::product::{Product, ProductId};
use ventix_core::errors::{ApplicationError, InterfaceError, LedgerError};
use ventix_db::repositories::{
    ConversationRepository, OrderLedger, OrderRepository, ProductRepository, RepositoryError,
};

use crate::bootstrap::Services;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

#[derive(Clone)]
pub struct ApiState {
    services: Services,
    shutdown: CancellationToken,
}

pub fn router(services: Services, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/products", get(list_products))
        .route("/orders", get(list_orders).post(create_order))
        .route("/orders/{id}", get(get_order).patch(modify_order))
        .route("/orders/{id}/cancel", post(cancel_order))
        .route("/conversations/{user_id}", get(conversation_history))
        .route("/api/chat", post(chat))
        .with_state(ApiState { services, shutdown })
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub detail: Option<String>,
    pub correlation_id: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    fn from_ledger(error: LedgerError, correlation_id: &str) -> Self {
        Self(ApplicationError::from(error).into_interface(correlation_id))
    }

    fn from_repository(error: RepositoryError, correlation_id: &str) -> Self {
        Self(ApplicationError::from(error).into_interface(correlation_id))
    }

    fn status(&self) -> StatusCode {
        match self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self.0 {
            InterfaceError::BadRequest { .. } => "bad_request",
            InterfaceError::NotFound { .. } => "not_found",
            InterfaceError::Conflict { .. } => "conflict",
            InterfaceError::ServiceUnavailable { .. } => "service_unavailable",
            InterfaceError::Internal { .. } => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Server-side failure details stay in the logs.
        let detail = if status.is_client_error() {
            Some(match &self.0 {
                InterfaceError::BadRequest { message, .. }
                | InterfaceError::NotFound { message, .. }
                | InterfaceError::Conflict { message, .. }
                | InterfaceError::ServiceUnavailable { message, .. }
                | InterfaceError::Internal { message, .. } => message.clone(),
            })
        } else {
            warn!(
                event_name = "server.api.failure",
                correlation_id = %self.0.correlation_id(),
                error = %self.0,
                "request failed"
            );
            None
        };

        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.0.user_message().to_string(),
            detail,
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    pub garment_type: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub limit: Option<usize>,
    /// Lists products with `0 < stock <= low_stock` instead of searching.
    pub low_stock: Option<u32>,
}

async fn list_products(
    State(state): State<ApiState>,
    Query(query): Query<ProductQuery>,
) -> ApiResult<Json<Vec<Product>>> {
    let correlation_id = correlation_id();
    let catalog = &state.services.handles.catalog;
    let limit = clamp_limit(query.limit);

    let products = if let Some(threshold) = query.low_stock {
        catalog.list_low_stock(threshold).await
    } else {
        let filters = ProductFilters {
            garment_type: query.garment_type.filter(|value| !value.trim().is_empty()),
            color: query.color.filter(|value| !value.trim().is_empty()),
            size: query.size.filter(|value| !value.trim().is_empty()),
        };
        if filters.is_empty() {
            catalog.list().await
        } else {
            catalog.search(&filters, limit).await
        }
    }
    .map_err(|error| ApiError::from_repository(error, &correlation_id))?;

    Ok(Json(products.into_iter().take(limit).collect()))
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderQuery {
    pub user_id: Option<String>,
    pub limit: Option<usize>,
}

async fn list_orders(
    State(state): State<ApiState>,
    Query(query): Query<OrderQuery>,
) -> ApiResult<Json<Vec<Order>>> {
    let correlation_id = correlation_id();
    let orders = &state.services.handles.orders;
    let limit = clamp_limit(query.limit);

    let listed = match query.user_id.as_deref().map(str::trim).filter(|user| !user.is_empty()) {
        Some(user_id) => orders.list_recent_for_user(user_id, DateTime::<Utc>::MIN_UTC, limit).await,
        None => orders.list(limit).await,
    }
    .map_err(|error| ApiError::from_repository(error, &correlation_id))?;

    Ok(Json(listed))
}

async fn get_order(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<OrderSummary>> {
    let correlation_id = correlation_id();
    let order_id = OrderId(id);
    let order = state
        .services
        .handles
        .orders
        .find_by_id(&order_id)
        .await
        .map_err(|error| ApiError::from_repository(error, &correlation_id))?
        .ok_or_else(|| ApiError::from_ledger(LedgerError::OrderNotFound(order_id), &correlation_id))?;

    summarize(&state, order, &correlation_id).await.map(Json)
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub product_id: String,
    pub quantity: u32,
    pub buyer: String,
    pub user_id: Option<String>,
}

async fn create_order(
    State(state): State<ApiState>,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<OrderSummary>)> {
    let correlation_id = correlation_id();
    if request.buyer.trim().is_empty() {
        return Err(ApiError::bad_request("buyer must not be empty", &correlation_id));
    }

    let order = state
        .services
        .handles
        .ledger
        .create(NewOrder {
            product_id: ProductId(request.product_id),
            quantity: request.quantity,
            buyer: request.buyer.trim().to_string(),
            user_id: request.user_id,
        })
        .await
        .map_err(|error| ApiError::from_ledger(error, &correlation_id))?;

    info!(
        event_name = "server.api.order_created",
        correlation_id = %correlation_id,
        order_id = %order.id,
        product_id = %order.product_id,
        quantity = order.quantity,
        "order created over api"
    );
    refresh_context(&state, &order).await;
    let summary = summarize(&state, order, &correlation_id).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

#[derive(Debug, Deserialize)]
pub struct ModifyOrderRequest {
    pub quantity: u32,
}

async fn modify_order(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<ModifyOrderRequest>,
) -> ApiResult<Json<OrderSummary>> {
    let correlation_id = correlation_id();
    let order = state
        .services
        .handles
        .ledger
        .modify(&OrderId(id), request.quantity)
        .await
        .map_err(|error| ApiError::from_ledger(error, &correlation_id))?;

    info!(
        event_name = "server.api.order_modified",
        correlation_id = %correlation_id,
        order_id = %order.id,
        quantity = order.quantity,
        "order modified over api"
    );
    refresh_context(&state, &order).await;
    summarize(&state, order, &correlation_id).await.map(Json)
}

async fn cancel_order(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Order>> {
    let correlation_id = correlation_id();
    let order = state
        .services
        .handles
        .ledger
        .cancel(&OrderId(id))
        .await
        .map_err(|error| ApiError::from_ledger(error, &correlation_id))?;

    info!(
        event_name = "server.api.order_cancelled",
        correlation_id = %correlation_id,
        order_id = %order.id,
        "order cancelled over api"
    );
    refresh_context(&state, &order).await;
    Ok(Json(order))
}

async fn summarize(
    state: &ApiState,
    order: Order,
    correlation_id: &str,
) -> ApiResult<OrderSummary> {
    let product = state
        .services
        .handles
        .catalog
        .find_by_id(&order.product_id)
        .await
        .map_err(|error| ApiError::from_repository(error, correlation_id))?
        .ok_or_else(|| {
            ApiError::from_ledger(LedgerError::ProductNotFound(order.product_id.clone()), correlation_id)
        })?;
    Ok(OrderSummary::of(order, &product))
}

/// Orders changed outside a chat turn must not leave a stale cached context.
async fn refresh_context(state: &ApiState, order: &Order) {
    if let Some(user_id) = order.user_id.as_deref() {
        state.services.context.invalidate(user_id).await;
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// The persisted side of a conversation, oldest message first.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationView {
    pub user_id: String,
    pub messages: Vec<ConversationMessage>,
    pub shown_products: Vec<ProductId>,
}

async fn conversation_history(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<ConversationView>> {
    let correlation_id = correlation_id();
    let user_id = user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(ApiError::bad_request("user_id must not be empty", &correlation_id));
    }

    let conversations = &state.services.conversations;
    let messages = conversations
        .load_recent(&user_id, clamp_limit(query.limit))
        .await
        .map_err(|error| ApiError::from_repository(error, &correlation_id))?;
    let shown_products = conversations
        .load_shown_products(&user_id)
        .await
        .map_err(|error| ApiError::from_repository(error, &correlation_id))?;

    Ok(Json(ConversationView { user_id, messages, shown_products }))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatLedgerView {
    pub outcome: String,
    pub order: Option<Order>,
    pub rejection: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub correlation_id: String,
    pub reply: String,
    pub intent: Intent,
    pub ledger: Option<ChatLedgerView>,
}

impl From<&LedgerOutcome> for ChatLedgerView {
    fn from(outcome: &LedgerOutcome) -> Self {
        let (order, rejection) = match outcome {
            LedgerOutcome::Created(summary) | LedgerOutcome::Modified(summary) => {
                (Some(summary.order.clone()), None)
            }
            LedgerOutcome::Cancelled(order) => (Some(order.clone()), None),
            LedgerOutcome::Rejected(error) => (None, Some(error.to_string())),
        };
        Self { outcome: outcome.as_str().to_string(), order, rejection }
    }
}

async fn chat(
    State(state): State<ApiState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let user_id = request.user_id.trim();
    if user_id.is_empty() || request.message.trim().is_empty() {
        return Err(ApiError::bad_request("user_id and message are required", &correlation_id()));
    }

    let cancel = state.shutdown.child_token();
    let outcome = state.services.runtime.handle_message(user_id, &request.message, &cancel).await;
    if outcome.cancelled {
        return Err(ApiError(InterfaceError::ServiceUnavailable {
            message: "server is shutting down".to_string(),
            correlation_id: outcome.correlation_id,
        }));
    }

    Ok(Json(ChatResponse {
        ledger: outcome.ledger.as_ref().map(ChatLedgerView::from),
        correlation_id: outcome.correlation_id,
        reply: outcome.reply,
        intent: outcome.intent,
    }))
}
