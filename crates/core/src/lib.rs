pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ledger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::conversation::{ConversationMessage, ConversationSnapshot, MessageRole};
pub use domain::intent::{Intent, IntentKind, ProductFilters, Provenance, Slot};
pub use domain::order::{NewOrder, Order, OrderId, OrderStatus, OrderSummary};
pub use domain::product::{PriceTiers, Product, ProductId};
pub use errors::{ApplicationError, DomainError, InterfaceError, LedgerError};
pub use ledger::{CancelPlan, EditWindow, ModifyPlan};
