use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    CheckStock,
    CreateOrder,
    ModifyOrder,
    CancelOrder,
    SalesAdvice,
    GeneralChat,
}

impl IntentKind {
    pub const ALL: [IntentKind; 6] = [
        Self::CheckStock,
        Self::CreateOrder,
        Self::ModifyOrder,
        Self::CancelOrder,
        Self::SalesAdvice,
        Self::GeneralChat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckStock => "check_stock",
            Self::CreateOrder => "create_order",
            Self::ModifyOrder => "modify_order",
            Self::CancelOrder => "cancel_order",
            Self::SalesAdvice => "sales_advice",
            Self::GeneralChat => "general_chat",
        }
    }

    /// Strict parse against the closed intent set.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value.trim())
    }

    /// Attributes that must be present before the intent can be acted on.
    pub fn required_slots(self) -> &'static [Slot] {
        match self {
            Self::CreateOrder => &[Slot::GarmentType, Slot::Color, Slot::Size],
            Self::CheckStock | Self::SalesAdvice => &[Slot::GarmentType],
            Self::ModifyOrder | Self::CancelOrder | Self::GeneralChat => &[],
        }
    }

    pub fn is_commercial(self) -> bool {
        matches!(self, Self::CreateOrder | Self::ModifyOrder | Self::CancelOrder)
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    GarmentType,
    Color,
    Size,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFilters {
    pub garment_type: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
}

impl ProductFilters {
    pub fn get(&self, slot: Slot) -> Option<&str> {
        match slot {
            Slot::GarmentType => self.garment_type.as_deref(),
            Slot::Color => self.color.as_deref(),
            Slot::Size => self.size.as_deref(),
        }
    }

    pub fn set(&mut self, slot: Slot, value: String) {
        match slot {
            Slot::GarmentType => self.garment_type = Some(value),
            Slot::Color => self.color = Some(value),
            Slot::Size => self.size = Some(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.garment_type.is_none() && self.color.is_none() && self.size.is_none()
    }

    /// Fills attributes missing here from `other`; present values win.
    pub fn merge_missing(&mut self, other: &ProductFilters) {
        if self.garment_type.is_none() {
            self.garment_type.clone_from(&other.garment_type);
        }
        if self.color.is_none() {
            self.color.clone_from(&other.color);
        }
        if self.size.is_none() {
            self.size.clone_from(&other.size);
        }
    }

    pub fn missing(&self, kind: IntentKind) -> Vec<Slot> {
        kind.required_slots().iter().copied().filter(|slot| self.get(*slot).is_none()).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Remote,
    Fallback,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    pub filters: ProductFilters,
    pub quantity: Option<u32>,
    pub confidence: f32,
    pub provenance: Provenance,
    pub reasoning: String,
}

impl Intent {
    pub fn fallback(kind: IntentKind, confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            kind,
            filters: ProductFilters::default(),
            quantity: None,
            confidence: confidence.clamp(0.0, 1.0),
            provenance: Provenance::Fallback,
            reasoning: reasoning.into(),
        }
    }
}
