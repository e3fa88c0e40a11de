use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use ventix_core::clock::Clock;
use ventix_core::config::ConversationConfig;
use ventix_core::domain::conversation::{ConversationMessage, ConversationSnapshot};
use ventix_core::domain::order::Order;
use ventix_core::domain::product::ProductId;
use ventix_db::repositories::{ConversationRepository, OrderRepository, RepositoryError};

pub const SHOWN_PRODUCTS_LIMIT: usize = 10;

#[derive(Clone, Debug)]
pub struct ContextSettings {
    pub ttl: Duration,
    pub history_limit: usize,
    pub recent_order_window: Duration,
    pub recent_order_limit: usize,
    pub shown_products_limit: usize,
}

impl ContextSettings {
    pub fn from_config(config: &ConversationConfig) -> Self {
        Self {
            ttl: i64::try_from(config.cache_ttl_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
            history_limit: config.history_limit,
            recent_order_window: Duration::try_days(config.recent_order_days).unwrap_or(Duration::MAX),
            recent_order_limit: config.recent_order_limit,
            shown_products_limit: SHOWN_PRODUCTS_LIMIT,
        }
    }
}

/// One user turn and the reply it produced.
#[derive(Clone, Debug)]
pub struct Exchange {
    pub user: ConversationMessage,
    pub assistant: ConversationMessage,
    pub shown_products: Vec<ProductId>,
    pub orders_changed: bool,
}

type Entry = Arc<Mutex<Option<ConversationSnapshot>>>;

/// Per-user conversation cache in front of the persistent store.
///
/// Entries go stale `ttl` after they were loaded or last written and are then
/// reloaded from the store. Every read-merge-write of one user's entry runs
/// under that user's own async lock, so concurrent turns for the same user
/// cannot drop each other's messages.
pub struct ContextCache {
    conversations: Arc<dyn ConversationRepository>,
    orders: Arc<dyn OrderRepository>,
    clock: Arc<dyn Clock>,
    settings: ContextSettings,
    entries: StdMutex<HashMap<String, Entry>>,
}

impl ContextCache {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        orders: Arc<dyn OrderRepository>,
        clock: Arc<dyn Clock>,
        settings: ContextSettings,
    ) -> Self {
        Self { conversations, orders, clock, settings, entries: StdMutex::new(HashMap::new()) }
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    pub async fn snapshot(&self, user_id: &str) -> Result<ConversationSnapshot, RepositoryError> {
        let entry = self.entry(user_id);
        let mut cached = entry.lock().await;
        let now = self.clock.now();

        if let Some(snapshot) = cached.as_ref().filter(|snapshot| self.is_fresh(snapshot, now)) {
            return Ok(snapshot.clone());
        }

        let snapshot = self.load(user_id, now).await?;
        *cached = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn record_exchange(
        &self,
        user_id: &str,
        exchange: Exchange,
    ) -> Result<(), RepositoryError> {
        let entry = self.entry(user_id);
        let mut cached = entry.lock().await;
        let now = self.clock.now();

        // Taken out so a failed write leaves no half-updated entry behind.
        let mut snapshot = match cached.take() {
            Some(snapshot) if self.is_fresh(&snapshot, now) => snapshot,
            _ => self.load(user_id, now).await?,
        };

        self.conversations.append(user_id, &exchange.user).await?;
        self.conversations.append(user_id, &exchange.assistant).await?;
        snapshot.messages.push(exchange.user);
        snapshot.messages.push(exchange.assistant);
        let overflow = snapshot.messages.len().saturating_sub(self.settings.history_limit);
        snapshot.messages.drain(..overflow);

        if !exchange.shown_products.is_empty() {
            snapshot.push_shown_products(&exchange.shown_products, self.settings.shown_products_limit);
            self.conversations.save_shown_products(user_id, &snapshot.shown_products, now).await?;
        }
        if exchange.orders_changed {
            snapshot.recent_orders = self.recent_orders(user_id, now).await?;
        }

        snapshot.last_updated = now;
        *cached = Some(snapshot);
        Ok(())
    }

    /// Marks the user's entry stale in place so the next read reloads it.
    ///
    /// The entry stays in the map: a turn already holding it and a turn
    /// arriving later must keep sharing one lock.
    pub async fn invalidate(&self, user_id: &str) {
        let existing = self.entries().get(user_id).cloned();
        if let Some(entry) = existing {
            *entry.lock().await = None;
        }
    }

    /// Drops stale entries nobody is currently using. Returns how many went.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| {
            // Handles are only cloned under the map lock, so a sole owner
            // means no turn is between `entry()` and its lock.
            if Arc::strong_count(entry) > 1 {
                return true;
            }
            match entry.try_lock() {
                Ok(cached) => cached.as_ref().is_some_and(|snapshot| self.is_fresh(snapshot, now)),
                Err(_) => true,
            }
        });
        before - entries.len()
    }

    pub fn cached_users(&self) -> usize {
        self.entries().len()
    }

    fn entry(&self, user_id: &str) -> Entry {
        self.entries().entry(user_id.to_string()).or_default().clone()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_fresh(&self, snapshot: &ConversationSnapshot, now: DateTime<Utc>) -> bool {
        now - snapshot.last_updated <= self.settings.ttl
    }

    async fn load(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ConversationSnapshot, RepositoryError> {
        let messages = self.conversations.load_recent(user_id, self.settings.history_limit).await?;
        let shown_products = self.conversations.load_shown_products(user_id).await?;
        let recent_orders = self.recent_orders(user_id, now).await?;
        debug!(
            event_name = "agent.context.loaded",
            user_id,
            messages = messages.len(),
            recent_orders = recent_orders.len(),
            "conversation context loaded from store"
        );
        Ok(ConversationSnapshot {
            user_id: user_id.to_string(),
            messages,
            shown_products,
            recent_orders,
            last_updated: now,
        })
    }

    async fn recent_orders(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let since = now
            .checked_sub_signed(self.settings.recent_order_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.orders.list_recent_for_user(user_id, since, self.settings.recent_order_limit).await
    }
}
