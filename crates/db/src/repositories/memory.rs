use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use ventix_core::clock::{Clock, SystemClock};
use ventix_core::domain::conversation::ConversationMessage;
use ventix_core::domain::intent::ProductFilters;
use ventix_core::domain::order::{NewOrder, Order, OrderId, OrderStatus};
use ventix_core::domain::product::{Product, ProductId};
use ventix_core::errors::LedgerError;
use ventix_core::ledger::{self, CancelPlan, EditWindow};

use super::{
    ConversationRepository, OrderLedger, OrderRepository, ProductRepository, RepositoryError,
};

#[derive(Default)]
struct CommerceState {
    products: HashMap<String, Product>,
    orders: Vec<Order>,
}

/// Products and orders behind one lock so ledger operations are serialized.
pub struct InMemoryCommerceStore {
    state: Mutex<CommerceState>,
    window: EditWindow,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCommerceStore {
    fn default() -> Self {
        Self::new(EditWindow::default(), Arc::new(SystemClock))
    }
}

impl InMemoryCommerceStore {
    pub fn new(window: EditWindow, clock: Arc<dyn Clock>) -> Self {
        Self { state: Mutex::new(CommerceState::default()), window, clock }
    }
}

fn matches_filter(value: &str, filter: Option<&str>) -> bool {
    filter.map_or(true, |wanted| value.to_lowercase().contains(&wanted.to_lowercase()))
}

fn newest_first(orders: &mut [Order]) {
    orders.sort_by(|left, right| {
        right.created_at.cmp(&left.created_at).then_with(|| right.id.0.cmp(&left.id.0))
    });
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryCommerceStore {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.products.get(&id.0).cloned())
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        state.products.insert(product.id.0.clone(), product);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Product>, RepositoryError> {
        let state = self.state.lock().await;
        let mut products: Vec<Product> = state.products.values().cloned().collect();
        products.sort_by(|left, right| {
            (&left.garment_type, &left.color, &left.size, &left.id.0).cmp(&(
                &right.garment_type,
                &right.color,
                &right.size,
                &right.id.0,
            ))
        });
        Ok(products)
    }

    async fn search(
        &self,
        filters: &ProductFilters,
        limit: usize,
    ) -> Result<Vec<Product>, RepositoryError> {
        let state = self.state.lock().await;
        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|product| product.stock > 0)
            .filter(|product| matches_filter(&product.garment_type, filters.garment_type.as_deref()))
            .filter(|product| matches_filter(&product.color, filters.color.as_deref()))
            .filter(|product| {
                filters.size.as_deref().map_or(true, |size| product.size.eq_ignore_ascii_case(size))
            })
            .cloned()
            .collect();
        products.sort_by(|left, right| {
            right.stock.cmp(&left.stock).then_with(|| left.id.0.cmp(&right.id.0))
        });
        products.truncate(limit);
        Ok(products)
    }

    async fn list_low_stock(&self, threshold: u32) -> Result<Vec<Product>, RepositoryError> {
        let state = self.state.lock().await;
        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|product| product.stock > 0 && product.stock <= threshold)
            .cloned()
            .collect();
        products.sort_by(|left, right| {
            left.stock.cmp(&right.stock).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(products)
    }

    async fn stock_of(&self, id: &ProductId) -> Result<Option<u32>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.products.get(&id.0).map(|product| product.stock))
    }
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryCommerceStore {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.orders.iter().find(|order| &order.id == id).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Order>, RepositoryError> {
        let state = self.state.lock().await;
        let mut orders = state.orders.clone();
        newest_first(&mut orders);
        orders.truncate(limit);
        Ok(orders)
    }

    async fn list_recent_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, RepositoryError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .iter()
            .filter(|order| order.user_id.as_deref() == Some(user_id) && order.created_at >= since)
            .cloned()
            .collect();
        newest_first(&mut orders);
        orders.truncate(limit);
        Ok(orders)
    }

    async fn latest_pending_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .iter()
            .filter(|order| order.user_id.as_deref() == Some(user_id) && order.is_pending())
            .cloned()
            .collect();
        newest_first(&mut orders);
        Ok(orders.into_iter().next())
    }
}

#[async_trait::async_trait]
impl OrderLedger for InMemoryCommerceStore {
    async fn create(&self, new_order: NewOrder) -> Result<Order, LedgerError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let product = state
            .products
            .get_mut(&new_order.product_id.0)
            .ok_or_else(|| LedgerError::ProductNotFound(new_order.product_id.clone()))?;
        ledger::plan_create(&new_order.product_id, product.stock, new_order.quantity)?;
        product.stock -= new_order.quantity;

        let order = Order {
            id: OrderId::generate(),
            product_id: new_order.product_id,
            quantity: new_order.quantity,
            buyer: new_order.buyer,
            user_id: new_order.user_id,
            status: OrderStatus::Pending,
            created_at: now,
        };
        state.orders.push(order.clone());
        Ok(order)
    }

    async fn modify(&self, id: &OrderId, new_quantity: u32) -> Result<Order, LedgerError> {
        let now = self.clock.now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let order = state
            .orders
            .iter_mut()
            .find(|order| &order.id == id)
            .ok_or_else(|| LedgerError::OrderNotFound(id.clone()))?;
        let product = state
            .products
            .get_mut(&order.product_id.0)
            .ok_or_else(|| LedgerError::ProductNotFound(order.product_id.clone()))?;

        let plan = ledger::plan_modify(order, product.stock, new_quantity, self.window, now)?;
        product.stock = plan.stock_after(product.stock);
        order.quantity = new_quantity;
        Ok(order.clone())
    }

    async fn cancel(&self, id: &OrderId) -> Result<Order, LedgerError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let order = state
            .orders
            .iter_mut()
            .find(|order| &order.id == id)
            .ok_or_else(|| LedgerError::OrderNotFound(id.clone()))?;

        if let CancelPlan::Restore { quantity } = ledger::plan_cancel(order) {
            let product = state
                .products
                .get_mut(&order.product_id.0)
                .ok_or_else(|| LedgerError::ProductNotFound(order.product_id.clone()))?;
            product.stock += quantity;
            ledger::transition(order, OrderStatus::Cancelled)
                .map_err(|error| LedgerError::Persistence(error.to_string()))?;
        }
        Ok(order.clone())
    }
}

#[derive(Default)]
struct ConversationState {
    messages: Vec<ConversationMessage>,
    shown_products: Vec<ProductId>,
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, ConversationState>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn load_recent(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(user_id)
            .map(|state| {
                let start = state.messages.len().saturating_sub(limit);
                state.messages[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn append(
        &self,
        user_id: &str,
        message: &ConversationMessage,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        conversations.entry(user_id.to_string()).or_default().messages.push(message.clone());
        Ok(())
    }

    async fn load_shown_products(&self, user_id: &str) -> Result<Vec<ProductId>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(user_id).map(|state| state.shown_products.clone()).unwrap_or_default())
    }

    async fn save_shown_products(
        &self,
        user_id: &str,
        products: &[ProductId],
        _updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        conversations.entry(user_id.to_string()).or_default().shown_products = products.to_vec();
        Ok(())
    }
}
