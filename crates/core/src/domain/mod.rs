pub mod conversation;
pub mod intent;
pub mod order;
pub mod product;
