use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use ventix_agent::{
    AgentRuntime, CommerceHandles, ContextCache, ContextSettings, IntentRouter, LedgerOutcome,
    RuntimeSettings, TurnOutcome,
};
use ventix_core::clock::{Clock, ManualClock};
use ventix_core::domain::intent::{IntentKind, Provenance};
use ventix_core::domain::product::{PriceTiers, Product, ProductId};
use ventix_core::errors::LedgerError;
use ventix_core::ledger::EditWindow;
use ventix_db::repositories::{
    InMemoryCommerceStore, InMemoryConversationRepository, ProductRepository,
};

type ContractResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

const USER: &str = "5491155550000";

struct Shop {
    runtime: AgentRuntime,
    store: Arc<InMemoryCommerceStore>,
    clock: Arc<ManualClock>,
}

impl Shop {
    async fn say(&self, text: &str) -> TurnOutcome {
        self.runtime.handle_message(USER, text, &CancellationToken::new()).await
    }

    async fn stock(&self, id: &str) -> ContractResult<u32> {
        self.store
            .stock_of(&ProductId(id.to_string()))
            .await
            .map_err(|error| format!("stock_of: {error}"))?
            .ok_or_else(|| format!("product {id} missing"))
    }
}

fn product(garment: &str, color: &str, size: &str, stock: u32) -> Product {
    let code: String = garment.chars().take(3).collect::<String>().to_uppercase();
    let color_code: String = color.chars().take(3).collect::<String>().to_uppercase();
    Product {
        id: ProductId(format!("{code}-{color_code}-{size}")),
        name: format!("{garment} {color} {size}"),
        garment_type: garment.to_string(),
        color: color.to_string(),
        size: size.to_string(),
        prices: PriceTiers {
            from_50: Decimal::new(1500, 2),
            from_100: Decimal::new(1350, 2),
            from_200: Decimal::new(1200, 2),
        },
        stock,
        description: None,
        category: None,
        created_at: Utc::now(),
    }
}

async fn shop() -> ContractResult<Shop> {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().ok_or("invalid start time")?,
    ));
    let store = Arc::new(InMemoryCommerceStore::new(
        EditWindow::default(),
        clock.clone() as Arc<dyn Clock>,
    ));
    for item in [
        product("pantalón", "azul", "L", 200),
        product("camiseta", "negro", "M", 100),
        product("camiseta", "blanco", "L", 150),
    ] {
        store.save(item).await.map_err(|error| format!("seed: {error}"))?;
    }

    let context = Arc::new(ContextCache::new(
        Arc::new(InMemoryConversationRepository::default()),
        store.clone(),
        clock.clone(),
        ContextSettings {
            ttl: Duration::minutes(10),
            history_limit: 50,
            recent_order_window: Duration::days(7),
            recent_order_limit: 10,
            shown_products_limit: 10,
        },
    ));
    let runtime = AgentRuntime::new(
        IntentRouter::fallback_only(5),
        context,
        CommerceHandles { catalog: store.clone(), orders: store.clone(), ledger: store.clone() },
        clock.clone(),
        RuntimeSettings { minimum_quantity: 50, edit_window_secs: 300, search_limit: 10 },
    )
    .map_err(|error| format!("runtime: {error}"))?;

    Ok(Shop { runtime, store, clock })
}

#[tokio::test]
async fn order_lifecycle_over_chat() -> ContractResult {
    let shop = shop().await?;

    let created = shop.say("quiero 80 pantalones azules talla L").await;
    require_eq!(created.intent.kind, IntentKind::CreateOrder);
    require_eq!(created.intent.provenance, Provenance::Fallback);
    let Some(LedgerOutcome::Created(summary)) = &created.ledger else {
        return Err(format!("expected created order, got {:?}", created.ledger));
    };
    require_eq!(summary.order.quantity, 80);
    require_eq!(summary.unit_price, Decimal::new(1500, 2));
    require!(created.reply.contains(&summary.order.id.0), "reply: {}", created.reply);
    require_eq!(shop.stock("PAN-AZU-L").await?, 120);

    let modified = shop.say("quiero cambiar el pedido, 20 más").await;
    require_eq!(modified.intent.kind, IntentKind::ModifyOrder);
    let Some(LedgerOutcome::Modified(summary)) = &modified.ledger else {
        return Err(format!("expected modified order, got {:?}", modified.ledger));
    };
    require_eq!(summary.order.quantity, 100);
    require_eq!(summary.unit_price, Decimal::new(1350, 2));
    require_eq!(shop.stock("PAN-AZU-L").await?, 100);

    let cancelled = shop.say("quiero cancelar el pedido").await;
    require_eq!(cancelled.intent.kind, IntentKind::CancelOrder);
    require!(matches!(cancelled.ledger, Some(LedgerOutcome::Cancelled(_))));
    require_eq!(shop.stock("PAN-AZU-L").await?, 200);

    let again = shop.say("quiero cancelar el pedido").await;
    require!(again.ledger.is_none(), "nothing left to cancel: {:?}", again.ledger);
    require!(again.reply.contains("No encontré pedidos pendientes"), "reply: {}", again.reply);
    Ok(())
}

#[tokio::test]
async fn expired_edit_window_suggests_a_new_order() -> ContractResult {
    let shop = shop().await?;
    shop.say("quiero 60 camisetas blancas talla L").await;
    require_eq!(shop.stock("CAM-BLA-L").await?, 90);

    shop.clock.advance(Duration::minutes(6));
    let late = shop.say("quiero cambiar el pedido a 90").await;

    require!(
        matches!(late.ledger, Some(LedgerOutcome::Rejected(LedgerError::EditWindowExpired { .. }))),
        "ledger: {:?}",
        late.ledger
    );
    require!(late.reply.contains("pedido nuevo"), "reply: {}", late.reply);
    require_eq!(shop.stock("CAM-BLA-L").await?, 90);
    Ok(())
}

#[tokio::test]
async fn insufficient_stock_is_reported_not_masked() -> ContractResult {
    let shop = shop().await?;

    let outcome = shop.say("necesito 150 camisetas negras talla M").await;

    require!(
        matches!(
            outcome.ledger,
            Some(LedgerOutcome::Rejected(LedgerError::InsufficientStock {
                available: 100,
                requested: 150,
                ..
            }))
        ),
        "ledger: {:?}",
        outcome.ledger
    );
    require!(outcome.reply.contains("100 unidades"), "reply: {}", outcome.reply);
    require_eq!(shop.stock("CAM-NEG-M").await?, 100);
    Ok(())
}

#[tokio::test]
async fn below_minimum_and_missing_attributes_ask_first() -> ContractResult {
    let shop = shop().await?;

    let small = shop.say("quiero 10 camisetas blancas talla L").await;
    require!(small.ledger.is_none());
    require!(small.reply.contains("mínimo es de 50"), "reply: {}", small.reply);

    let vague = shop.say("quiero 80 camisetas").await;
    require_eq!(vague.intent.kind, IntentKind::CreateOrder);
    require!(vague.ledger.is_none());
    require!(vague.reply.contains("el color, el talle"), "reply: {}", vague.reply);

    require_eq!(shop.stock("CAM-BLA-L").await?, 150);
    Ok(())
}

#[tokio::test]
async fn follow_up_stock_question_inherits_garment() -> ContractResult {
    let shop = shop().await?;

    let first = shop.say("¿tenés camisetas?").await;
    require_eq!(first.intent.kind, IntentKind::CheckStock);
    require!(first.reply.contains("camiseta blanco talla L"), "reply: {}", first.reply);

    let follow_up = shop.say("¿qué colores tenés?").await;
    require_eq!(follow_up.intent.kind, IntentKind::CheckStock);
    require_eq!(follow_up.intent.filters.garment_type.as_deref(), Some("camiseta"));
    require!(follow_up.reply.contains("camiseta negro talla M"), "reply: {}", follow_up.reply);
    require!(!follow_up.reply.contains("pantalón"), "reply: {}", follow_up.reply);

    let snapshot = shop
        .runtime
        .context()
        .snapshot(USER)
        .await
        .map_err(|error| format!("snapshot: {error}"))?;
    require_eq!(snapshot.messages.len(), 4);
    require!(snapshot.shown_products.contains(&ProductId("CAM-NEG-M".to_string())));
    Ok(())
}

#[tokio::test]
async fn small_talk_gets_the_greeting() -> ContractResult {
    let shop = shop().await?;

    let outcome = shop.say("hola, buen día").await;

    require_eq!(outcome.intent.kind, IntentKind::GeneralChat);
    require!(outcome.ledger.is_none());
    require!(outcome.reply.contains("mínimo 50 unidades"), "reply: {}", outcome.reply);
    require!(!outcome.correlation_id.is_empty());
    Ok(())
}

#[tokio::test]
async fn cancelled_turn_never_touches_the_ledger() -> ContractResult {
    let shop = shop().await?;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome =
        shop.runtime.handle_message(USER, "quiero 80 pantalones azules talla L", &cancel).await;

    require!(outcome.cancelled, "turn should report cancellation");
    require!(outcome.ledger.is_none(), "ledger: {:?}", outcome.ledger);
    require_eq!(outcome.reply.as_str(), ventix_agent::runtime::APOLOGY);
    require_eq!(shop.stock("PAN-AZU-L").await?, 200);

    let snapshot = shop
        .runtime
        .context()
        .snapshot(USER)
        .await
        .map_err(|error| format!("snapshot: {error}"))?;
    require!(snapshot.messages.is_empty(), "history: {:?}", snapshot.messages);

    let retried = shop.say("quiero 80 pantalones azules talla L").await;
    require!(!retried.cancelled);
    require!(matches!(retried.ledger, Some(LedgerOutcome::Created(_))));
    require_eq!(shop.stock("PAN-AZU-L").await?, 120);
    Ok(())
}
