use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use ventix_core::domain::product::{PriceTiers, Product, ProductId};

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Demo catalog contract: every garment in every listed color and size.
const SEED_GARMENTS: &[SeedGarment] = &[
    SeedGarment {
        garment_type: "camiseta",
        code: "CAM",
        category: "remeras",
        prices_cents: [950, 870, 790],
        colors: &["blanco", "negro", "azul", "rojo", "gris"],
    },
    SeedGarment {
        garment_type: "pantalón",
        code: "PAN",
        category: "pantalones",
        prices_cents: [2450, 2280, 2100],
        colors: &["azul", "negro", "gris"],
    },
    SeedGarment {
        garment_type: "sudadera",
        code: "SUD",
        category: "abrigo",
        prices_cents: [2890, 2690, 2490],
        colors: &["negro", "gris", "verde", "azul"],
    },
    SeedGarment {
        garment_type: "camisa",
        code: "CMS",
        category: "camisas",
        prices_cents: [2150, 1990, 1850],
        colors: &["blanco", "azul"],
    },
    SeedGarment {
        garment_type: "falda",
        code: "FAL",
        category: "faldas",
        prices_cents: [1780, 1650, 1520],
        colors: &["negro", "rojo", "amarillo"],
    },
];

const SEED_SIZES: &[&str] = &["S", "M", "L", "XL"];

struct SeedGarment {
    garment_type: &'static str,
    code: &'static str,
    category: &'static str,
    prices_cents: [i64; 3],
    colors: &'static [&'static str],
}

pub struct DemoCatalog;

impl DemoCatalog {
    /// Deterministic product list; stock varies per item so search ordering is stable.
    pub fn products(created_at: DateTime<Utc>) -> Vec<Product> {
        let mut products = Vec::new();
        let mut ordinal: u32 = 0;

        for garment in SEED_GARMENTS {
            for color in garment.colors {
                for size in SEED_SIZES {
                    ordinal += 1;
                    let color_code: String =
                        color.chars().take(3).collect::<String>().to_uppercase();
                    products.push(Product {
                        id: ProductId(format!("{}-{color_code}-{size}", garment.code)),
                        name: format!("{} {color} {size}", capitalize(garment.garment_type)),
                        garment_type: garment.garment_type.to_string(),
                        color: (*color).to_string(),
                        size: (*size).to_string(),
                        prices: PriceTiers {
                            from_50: Decimal::new(garment.prices_cents[0], 2),
                            from_100: Decimal::new(garment.prices_cents[1], 2),
                            from_200: Decimal::new(garment.prices_cents[2], 2),
                        },
                        stock: 20 + (ordinal * 37) % 280,
                        description: Some(format!("{} de algodón, corte clásico", garment.garment_type)),
                        category: Some(garment.category.to_string()),
                        created_at,
                    });
                }
            }
        }

        products
    }

    /// Inserts the demo catalog; existing products keep their current stock.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let products = Self::products(Utc::now());
        let mut tx = pool.begin().await?;
        let mut inserted = 0_u64;

        for product in &products {
            let result = sqlx::query(
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
                 ON CONFLICT(id) DO NOTHING",
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
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(SeedResult { products_total: products.len(), products_inserted: inserted as usize })
    }

    /// Checks that every demo product exists and that each garment is present.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for garment in SEED_GARMENTS {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM product WHERE garment_type = ?")
                    .bind(garment.garment_type)
                    .fetch_one(pool)
                    .await?;
            let expected = (garment.colors.len() * SEED_SIZES.len()) as i64;
            checks.push((garment.garment_type, count >= expected));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub products_total: usize,
    pub products_inserted: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
