//! Deterministic keyword classifier used whenever remote classification is
//! unavailable or unusable.
//!
//! Rules are checked in a fixed priority order and every branch records the
//! keywords that fired in `reasoning`.

use ventix_core::domain::intent::{Intent, IntentKind};

use crate::vocabulary;

const MODIFY_KEYWORDS: &[&str] = &["cambiar", "modificar", "editar", "cancelar", "cancela", "anular"];
const CANCEL_KEYWORDS: &[&str] = &["cancelar", "cancela", "anular"];
const ORDER_KEYWORDS: &[&str] = &["pedido", "quiero", "necesito", "comprar", "encargar", "haceme"];
const STOCK_KEYWORDS: &[&str] =
    &["stock", "cuant", "tenes", "tienen", "disponible", "colores", "talles", "que hay"];
const ADVICE_KEYWORDS: &[&str] = &["recomendas", "conviene", "mejor", "para que"];

/// Keywords present in `message`; single words match token prefixes, phrases
/// match whole-token sequences.
fn matched<'k>(tokens: &[&str], keywords: &[&'k str]) -> Vec<&'k str> {
    let joined = format!(" {} ", tokens.join(" "));
    keywords
        .iter()
        .copied()
        .filter(|keyword| {
            if keyword.contains(' ') {
                joined.contains(&format!(" {keyword} "))
            } else {
                tokens.iter().any(|token| token.starts_with(keyword))
            }
        })
        .collect()
}

pub fn classify(message: &str, recent_orders: usize) -> Intent {
    let folded = vocabulary::fold(message);
    let tokens = vocabulary::tokens(&folded);
    let quantity = vocabulary::quantity_in(message);

    let modify = matched(&tokens, MODIFY_KEYWORDS);
    let order = matched(&tokens, ORDER_KEYWORDS);
    let stock = matched(&tokens, STOCK_KEYWORDS);
    let advice = matched(&tokens, ADVICE_KEYWORDS);

    let mut intent = if !modify.is_empty() && recent_orders > 0 {
        let cancels = matched(&tokens, CANCEL_KEYWORDS);
        if cancels.is_empty() {
            Intent::fallback(
                IntentKind::ModifyOrder,
                0.8,
                format!("modification keywords {modify:?} with {recent_orders} recent order(s)"),
            )
        } else {
            Intent::fallback(
                IntentKind::CancelOrder,
                0.8,
                format!("cancellation keywords {cancels:?} with {recent_orders} recent order(s)"),
            )
        }
    } else if !order.is_empty() && quantity.is_some() {
        Intent::fallback(
            IntentKind::CreateOrder,
            0.8,
            format!("order keywords {order:?} with explicit quantity"),
        )
    } else if !stock.is_empty() {
        Intent::fallback(IntentKind::CheckStock, 0.8, format!("stock keywords {stock:?}"))
    } else if !order.is_empty() {
        Intent::fallback(
            IntentKind::CheckStock,
            0.7,
            format!("order keywords {order:?} without quantity, showing stock"),
        )
    } else if !advice.is_empty() {
        Intent::fallback(IntentKind::SalesAdvice, 0.7, format!("advice keywords {advice:?}"))
    } else {
        Intent::fallback(IntentKind::GeneralChat, 0.6, "no commercial keywords matched")
    };

    intent.filters = vocabulary::filters_in(message);
    intent.quantity = quantity;
    intent
}
