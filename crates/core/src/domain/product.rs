use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(pub String);

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unit prices by quantity breakpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTiers {
    pub from_50: Decimal,
    pub from_100: Decimal,
    pub from_200: Decimal,
}

impl PriceTiers {
    pub const TIER_100_THRESHOLD: u32 = 100;
    pub const TIER_200_THRESHOLD: u32 = 200;

    pub fn unit_price_for(&self, quantity: u32) -> Decimal {
        if quantity >= Self::TIER_200_THRESHOLD {
            self.from_200
        } else if quantity >= Self::TIER_100_THRESHOLD {
            self.from_100
        } else {
            self.from_50
        }
    }

    pub fn total_for(&self, quantity: u32) -> Decimal {
        self.unit_price_for(quantity) * Decimal::from(quantity)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub garment_type: String,
    pub color: String,
    pub size: String,
    pub prices: PriceTiers,
    pub stock: u32,
    pub description: Option<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.stock >= quantity
    }

    pub fn label(&self) -> String {
        format!("{} {} talla {}", self.garment_type, self.color, self.size)
    }
}
