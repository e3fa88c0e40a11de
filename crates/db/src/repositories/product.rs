use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use ventix_core::domain::intent::ProductFilters;
use ventix_core::domain::product::{PriceTiers, Product, ProductId};

use super::{ProductRepository, RepositoryError};
use crate::DbPool;

const PRODUCT_COLUMNS: &str = "id, name, garment_type, color, size, price_50, price_100, \
                               price_200, stock, description, category, created_at";

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM product WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(product_from_row).transpose()
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO product (
                id,
                name,
                garment_type,
                color,
                size,
                price_50,
                price_100,
                price_200,
                stock,
                description,
                category,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                garment_type = excluded.garment_type,
                color = excluded.color,
                size = excluded.size,
                price_50 = excluded.price_50,
                price_100 = excluded.price_100,
                price_200 = excluded.price_200,
                stock = excluded.stock,
                description = excluded.description,
                category = excluded.category",
        )
        .bind(&product.id.0)
        .bind(&product.name)
        .bind(&product.garment_type)
        .bind(&product.color)
        .bind(&product.size)
        .bind(product.prices.from_50.to_string())
        .bind(product.prices.from_100.to_string())
        .bind(product.prices.from_200.to_string())
        .bind(i64::from(product.stock))
        .bind(product.description.as_deref())
        .bind(product.category.as_deref())
        .bind(product.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM product ORDER BY garment_type, color, size, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(product_from_row).collect()
    }

    async fn search(
        &self,
        filters: &ProductFilters,
        limit: usize,
    ) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS}
             FROM product
             WHERE stock > 0
               AND (? IS NULL OR lower(garment_type) LIKE '%' || lower(?) || '%')
               AND (? IS NULL OR lower(color) LIKE '%' || lower(?) || '%')
               AND (? IS NULL OR lower(size) = lower(?))
             ORDER BY stock DESC, id ASC
             LIMIT ?"
        ))
        .bind(filters.garment_type.as_deref())
        .bind(filters.garment_type.as_deref())
        .bind(filters.color.as_deref())
        .bind(filters.color.as_deref())
        .bind(filters.size.as_deref())
        .bind(filters.size.as_deref())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(product_from_row).collect()
    }

    async fn list_low_stock(&self, threshold: u32) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS}
             FROM product
             WHERE stock > 0 AND stock <= ?
             ORDER BY stock ASC, id ASC"
        ))
        .bind(i64::from(threshold))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(product_from_row).collect()
    }

    async fn stock_of(&self, id: &ProductId) -> Result<Option<u32>, RepositoryError> {
        let row = sqlx::query("SELECT stock FROM product WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| parse_u32("stock", row.try_get("stock")?)).transpose()
    }
}

pub(crate) fn product_from_row(row: SqliteRow) -> Result<Product, RepositoryError> {
    Ok(Product {
        id: ProductId(row.try_get("id")?),
        name: row.try_get("name")?,
        garment_type: row.try_get("garment_type")?,
        color: row.try_get("color")?,
        size: row.try_get("size")?,
        prices: PriceTiers {
            from_50: parse_decimal("price_50", row.try_get("price_50")?)?,
            from_100: parse_decimal("price_100", row.try_get("price_100")?)?,
            from_200: parse_decimal("price_200", row.try_get("price_200")?)?,
        },
        stock: parse_u32("stock", row.try_get("stock")?)?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
