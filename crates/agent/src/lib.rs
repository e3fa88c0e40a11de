//! Conversational layer: classify a shop message and act on it.
//!
//! A turn flows through:
//! 1. **Context** (`context`) - per-user history, shown products and recent
//!    orders, cached with a TTL in front of the store.
//! 2. **Routing** (`router`) - remote classification through the resilient
//!    provider cascade (`pool`, `invoker`, `llm`), payload recovery
//!    (`extract`), keyword fallback (`fallback`) and slot back-fill.
//! 3. **Dispatch** (`runtime`) - catalog lookups and ledger operations, then
//!    a templated reply.
//!
//! # Failure Principle
//!
//! Provider trouble never reaches the caller: it only shows up as an intent
//! with `fallback` provenance. Ledger rejections are never absorbed; they are
//! turned into replies the customer can act on.

pub mod context;
pub mod extract;
pub mod fallback;
pub mod invoker;
pub mod llm;
pub mod pool;
pub mod router;
pub mod runtime;
pub mod vocabulary;

pub use context::{ContextCache, ContextSettings, Exchange};
pub use invoker::{ExhaustedError, InvokerSettings, ResilientInvoker};
pub use llm::{GeminiClient, ProviderError, RemoteClassifier};
pub use pool::{CooldownPolicy, Cursor, FailureKind, PoolStatus, ProviderPool};
pub use router::IntentRouter;
pub use runtime::{AgentRuntime, CommerceHandles, LedgerOutcome, RuntimeSettings, TurnOutcome};
