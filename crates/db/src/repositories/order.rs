use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use ventix_core::clock::Clock;
use ventix_core::domain::order::{NewOrder, Order, OrderId, OrderStatus};
use ventix_core::domain::product::ProductId;
use ventix_core::errors::LedgerError;
use ventix_core::ledger::{self, CancelPlan, EditWindow};

use super::product::{parse_timestamp, parse_u32};
use super::{OrderLedger, OrderRepository, RepositoryError};
use crate::DbPool;

const ORDER_COLUMNS: &str = "id, product_id, quantity, buyer, user_id, status, created_at";

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM sales_order WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(order_from_row).transpose()
    }

    async fn list(&self, limit: usize) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM sales_order ORDER BY created_at DESC, id DESC LIMIT ?"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(order_from_row).collect()
    }

    async fn list_recent_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS}
             FROM sales_order
             WHERE user_id = ? AND created_at >= ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?"
        ))
        .bind(user_id)
        .bind(since.to_rfc3339())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(order_from_row).collect()
    }

    async fn latest_pending_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS}
             FROM sales_order
             WHERE user_id = ? AND status = 'pending'
             ORDER BY created_at DESC, id DESC
             LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(order_from_row).transpose()
    }
}

/// SQLite-backed ledger.
///
/// Every operation opens a transaction whose first statement is a write, so
/// the connection takes the database write lock before reading anything.
/// Concurrent operations queue on `busy_timeout` instead of interleaving
/// their read and write phases. Errors drop the transaction, rolling back.
pub struct SqlOrderLedger {
    pool: DbPool,
    window: EditWindow,
    clock: Arc<dyn Clock>,
}

impl SqlOrderLedger {
    pub fn new(pool: DbPool, window: EditWindow, clock: Arc<dyn Clock>) -> Self {
        Self { pool, window, clock }
    }

    /// Locks the order row by touching it; `None` when the order does not exist.
    async fn lock_order(
        tx: &mut Transaction<'_, Sqlite>,
        id: &OrderId,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, LedgerError> {
        let row = sqlx::query(&format!(
            "UPDATE sales_order SET updated_at = ? WHERE id = ? RETURNING {ORDER_COLUMNS}"
        ))
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .fetch_optional(&mut **tx)
        .await
        .map_err(persistence)?;

        Ok(row.map(order_from_row).transpose()?)
    }

    async fn read_stock(
        tx: &mut Transaction<'_, Sqlite>,
        product_id: &ProductId,
    ) -> Result<u32, LedgerError> {
        let row = sqlx::query("SELECT stock FROM product WHERE id = ?")
            .bind(&product_id.0)
            .fetch_optional(&mut **tx)
            .await
            .map_err(persistence)?
            .ok_or_else(|| LedgerError::ProductNotFound(product_id.clone()))?;

        Ok(parse_u32("stock", row.try_get("stock").map_err(persistence)?)?)
    }

    /// `stock -= delta`; negative deltas return units to stock.
    async fn adjust_stock(
        tx: &mut Transaction<'_, Sqlite>,
        product_id: &ProductId,
        delta: i64,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE product SET stock = stock - ? WHERE id = ? AND stock >= ?")
            .bind(delta)
            .bind(&product_id.0)
            .bind(delta)
            .execute(&mut **tx)
            .await
            .map_err(persistence)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::Persistence(format!(
                "stock adjustment of {delta} on product {product_id} was not applied"
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl OrderLedger for SqlOrderLedger {
    async fn create(&self, new_order: NewOrder) -> Result<Order, LedgerError> {
        ledger::ensure_positive(new_order.quantity)?;
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        let reserved =
            sqlx::query("UPDATE product SET stock = stock - ? WHERE id = ? AND stock >= ?")
                .bind(i64::from(new_order.quantity))
                .bind(&new_order.product_id.0)
                .bind(i64::from(new_order.quantity))
                .execute(&mut *tx)
                .await
                .map_err(persistence)?;

        if reserved.rows_affected() == 0 {
            let available = Self::read_stock(&mut tx, &new_order.product_id).await?;
            ledger::plan_create(&new_order.product_id, available, new_order.quantity)?;
            return Err(LedgerError::Persistence(format!(
                "stock reservation on product {} was not applied",
                new_order.product_id
            )));
        }

        let order = Order {
            id: OrderId::generate(),
            product_id: new_order.product_id,
            quantity: new_order.quantity,
            buyer: new_order.buyer,
            user_id: new_order.user_id,
            status: OrderStatus::Pending,
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO sales_order (
                id,
                product_id,
                quantity,
                buyer,
                user_id,
                status,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.id.0)
        .bind(&order.product_id.0)
        .bind(i64::from(order.quantity))
        .bind(&order.buyer)
        .bind(order.user_id.as_deref())
        .bind(order.status.as_str())
        .bind(order.created_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(persistence)?;

        tx.commit().await.map_err(persistence)?;
        Ok(order)
    }

    async fn modify(&self, id: &OrderId, new_quantity: u32) -> Result<Order, LedgerError> {
        ledger::ensure_positive(new_quantity)?;
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        let mut order = Self::lock_order(&mut tx, id, now)
            .await?
            .ok_or_else(|| LedgerError::OrderNotFound(id.clone()))?;
        let available = Self::read_stock(&mut tx, &order.product_id).await?;
        let plan = ledger::plan_modify(&order, available, new_quantity, self.window, now)?;

        if plan.delta != 0 {
            Self::adjust_stock(&mut tx, &order.product_id, plan.delta).await?;
            sqlx::query("UPDATE sales_order SET quantity = ? WHERE id = ?")
                .bind(i64::from(new_quantity))
                .bind(&order.id.0)
                .execute(&mut *tx)
                .await
                .map_err(persistence)?;
        }

        tx.commit().await.map_err(persistence)?;
        order.quantity = new_quantity;
        Ok(order)
    }

    async fn cancel(&self, id: &OrderId) -> Result<Order, LedgerError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        let mut order = Self::lock_order(&mut tx, id, now)
            .await?
            .ok_or_else(|| LedgerError::OrderNotFound(id.clone()))?;

        match ledger::plan_cancel(&order) {
            CancelPlan::AlreadyCancelled => {
                tx.rollback().await.map_err(persistence)?;
                Ok(order)
            }
            CancelPlan::Restore { quantity } => {
                Self::adjust_stock(&mut tx, &order.product_id, -i64::from(quantity)).await?;
                sqlx::query("UPDATE sales_order SET status = ? WHERE id = ?")
                    .bind(OrderStatus::Cancelled.as_str())
                    .bind(&order.id.0)
                    .execute(&mut *tx)
                    .await
                    .map_err(persistence)?;

                tx.commit().await.map_err(persistence)?;
                ledger::transition(&mut order, OrderStatus::Cancelled)
                    .map_err(|error| LedgerError::Persistence(error.to_string()))?;
                Ok(order)
            }
        }
    }
}

fn persistence(error: sqlx::Error) -> LedgerError {
    LedgerError::Persistence(error.to_string())
}

pub(crate) fn order_from_row(row: SqliteRow) -> Result<Order, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = OrderStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown order status `{status_raw}`")))?;

    Ok(Order {
        id: OrderId(row.try_get("id")?),
        product_id: ProductId(row.try_get("product_id")?),
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        buyer: row.try_get("buyer")?,
        user_id: row.try_get("user_id")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use ventix_core::clock::ManualClock;
    use ventix_core::domain::order::{NewOrder, OrderId, OrderStatus};
    use ventix_core::domain::product::{PriceTiers, Product, ProductId};
    use ventix_core::errors::LedgerError;
    use ventix_core::ledger::EditWindow;

    use super::{SqlOrderLedger, SqlOrderRepository};
    use crate::repositories::{
        OrderLedger, OrderRepository, ProductRepository, SqlProductRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn seed_product(pool: &DbPool, id: &str, stock: u32) -> ProductId {
        let product = Product {
            id: ProductId(id.to_string()),
            name: "Pantalón azul".to_string(),
            garment_type: "pantalón".to_string(),
            color: "azul".to_string(),
            size: "L".to_string(),
            prices: PriceTiers {
                from_50: Decimal::new(2500, 2),
                from_100: Decimal::new(2300, 2),
                from_200: Decimal::new(2100, 2),
            },
            stock,
            description: None,
            category: None,
            created_at: Utc::now(),
        };
        SqlProductRepository::new(pool.clone()).save(product.clone()).await.expect("seed product");
        product.id
    }

    fn new_order(product_id: &ProductId, quantity: u32) -> NewOrder {
        NewOrder {
            product_id: product_id.clone(),
            quantity,
            buyer: "Lucía".to_string(),
            user_id: Some("5491100000000".to_string()),
        }
    }

    #[tokio::test]
    async fn create_reserves_stock_and_rejects_overdraw() {
        let pool = setup_pool().await;
        let product_id = seed_product(&pool, "PAN-AZU-L", 100).await;
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = SqlOrderLedger::new(pool.clone(), EditWindow::default(), clock);
        let products = SqlProductRepository::new(pool.clone());

        let order = ledger.create(new_order(&product_id, 60)).await.expect("create");
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(products.stock_of(&product_id).await.expect("stock"), Some(40));

        let error = ledger.create(new_order(&product_id, 50)).await.expect_err("overdraw");
        assert_eq!(
            error,
            LedgerError::InsufficientStock {
                product_id: product_id.clone(),
                available: 40,
                requested: 50
            }
        );
        assert_eq!(products.stock_of(&product_id).await.expect("stock"), Some(40));

        let orders = SqlOrderRepository::new(pool).list(10).await.expect("list orders");
        assert_eq!(orders, vec![order]);
    }

    #[tokio::test]
    async fn create_for_unknown_product_is_reported() {
        let pool = setup_pool().await;
        let ledger =
            SqlOrderLedger::new(pool, EditWindow::default(), Arc::new(ManualClock::new(Utc::now())));
        let missing = ProductId("missing".to_string());

        assert_eq!(
            ledger.create(new_order(&missing, 50)).await,
            Err(LedgerError::ProductNotFound(missing))
        );
    }

    #[tokio::test]
    async fn modify_follows_edit_window() {
        let pool = setup_pool().await;
        let product_id = seed_product(&pool, "PAN-AZU-L", 90).await;
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(t0));
        let ledger = SqlOrderLedger::new(pool.clone(), EditWindow::default(), clock.clone());
        let products = SqlProductRepository::new(pool.clone());

        let order = ledger.create(new_order(&product_id, 50)).await.expect("create");
        assert_eq!(products.stock_of(&product_id).await.expect("stock"), Some(40));

        clock.advance(Duration::minutes(4));
        let modified = ledger.modify(&order.id, 80).await.expect("modify inside window");
        assert_eq!(modified.quantity, 80);
        assert_eq!(products.stock_of(&product_id).await.expect("stock"), Some(10));

        clock.advance(Duration::minutes(2));
        let error = ledger.modify(&order.id, 90).await.expect_err("window closed");
        assert!(matches!(error, LedgerError::EditWindowExpired { .. }));
        assert_eq!(products.stock_of(&product_id).await.expect("stock"), Some(10));

        let stored = SqlOrderRepository::new(pool)
            .find_by_id(&order.id)
            .await
            .expect("find order")
            .expect("order exists");
        assert_eq!(stored.quantity, 80);
    }

    #[tokio::test]
    async fn cancel_restores_stock_once() {
        let pool = setup_pool().await;
        let product_id = seed_product(&pool, "PAN-AZU-L", 100).await;
        let ledger = SqlOrderLedger::new(
            pool.clone(),
            EditWindow::default(),
            Arc::new(ManualClock::new(Utc::now())),
        );
        let products = SqlProductRepository::new(pool.clone());

        let order = ledger.create(new_order(&product_id, 70)).await.expect("create");
        let cancelled = ledger.cancel(&order.id).await.expect("cancel");
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(products.stock_of(&product_id).await.expect("stock"), Some(100));

        let again = ledger.cancel(&order.id).await.expect("second cancel");
        assert_eq!(again.status, OrderStatus::Cancelled);
        assert_eq!(products.stock_of(&product_id).await.expect("stock"), Some(100));

        assert_eq!(
            ledger.modify(&order.id, 60).await,
            Err(LedgerError::OrderCancelled(order.id.clone()))
        );
        let unknown = OrderId("ORD-unknown".to_string());
        assert_eq!(ledger.cancel(&unknown).await, Err(LedgerError::OrderNotFound(unknown)));
    }

    #[tokio::test]
    async fn user_queries_return_newest_first() {
        let pool = setup_pool().await;
        let product_id = seed_product(&pool, "PAN-AZU-L", 500).await;
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(t0));
        let ledger = SqlOrderLedger::new(pool.clone(), EditWindow::default(), clock.clone());
        let orders = SqlOrderRepository::new(pool);

        let first = ledger.create(new_order(&product_id, 50)).await.expect("first");
        clock.advance(Duration::days(3));
        let second = ledger.create(new_order(&product_id, 60)).await.expect("second");
        ledger.cancel(&second.id).await.expect("cancel second");

        let recent = orders
            .list_recent_for_user("5491100000000", t0 + Duration::days(1), 10)
            .await
            .expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, second.id);

        let pending = orders
            .latest_pending_for_user("5491100000000")
            .await
            .expect("latest pending")
            .expect("pending order exists");
        assert_eq!(pending.id, first.id);
    }
}
