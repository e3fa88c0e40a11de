//! Structured payload recovery from free-form classifier output.

use serde::Deserialize;
use serde_json::Value;

use ventix_core::domain::intent::{Intent, IntentKind, ProductFilters, Provenance};

use crate::vocabulary;

/// Locates the JSON object inside classifier output.
///
/// Tried in order: the whole trimmed text, the interior of the first fenced
/// block, then the span from the first `{` to the last `}` provided the braces
/// in that span balance.
pub fn extract_object(text: &str) -> Option<&str> {
    candidate_objects(text).next()
}

/// Every stage that yields something, in stage order.
fn candidate_objects(text: &str) -> impl Iterator<Item = &str> + '_ {
    let trimmed = text.trim();
    let direct = (trimmed.starts_with('{') && trimmed.ends_with('}')).then_some(trimmed);
    direct.into_iter().chain(fenced_interior(trimmed)).chain(balanced_span(trimmed))
}

fn fenced_interior(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // Skip an info string such as `json`, on its own line or not.
    let info_len = after_fence
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after_fence.len());
    let body = &after_fence[info_len..];
    let close = body.find("```")?;
    let interior = body[..close].trim();
    (!interior.is_empty()).then_some(interior)
}

fn balanced_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let span = &text[start..=end];
    let opened = span.matches('{').count();
    let closed = span.matches('}').count();
    (opened == closed).then_some(span)
}

#[derive(Clone, Debug, PartialEq)]
pub enum ParsedClassification {
    Parsed(Intent),
    Unparseable { raw: String },
    InvalidIntentValue { value: String },
}

#[derive(Deserialize)]
struct RawClassification {
    #[serde(alias = "intent_type")]
    intent: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    filters: Option<RawFilters>,
    #[serde(default)]
    extracted_data: Option<RawExtracted>,
    #[serde(default)]
    quantity: Option<Value>,
}

#[derive(Deserialize)]
struct RawExtracted {
    #[serde(default)]
    product_filters: Option<RawFilters>,
    #[serde(default)]
    quantity: Option<Value>,
}

#[derive(Default, Deserialize)]
struct RawFilters {
    #[serde(default, alias = "tipo_prenda")]
    garment_type: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default, alias = "talla")]
    size: Option<String>,
}

const DEFAULT_REMOTE_CONFIDENCE: f32 = 0.5;

/// Parses classifier output into an [`Intent`] with remote provenance.
pub fn parse_classification(text: &str) -> ParsedClassification {
    let unparseable = || ParsedClassification::Unparseable { raw: text.to_string() };

    // A stage whose slice does not deserialize hands over to the next one.
    let Some(raw) = candidate_objects(text)
        .find_map(|object| serde_json::from_str::<RawClassification>(object).ok())
    else {
        return unparseable();
    };
    let Some(kind) = IntentKind::parse(&raw.intent.to_ascii_lowercase()) else {
        return ParsedClassification::InvalidIntentValue { value: raw.intent };
    };

    let (nested_filters, nested_quantity) = match raw.extracted_data {
        Some(extracted) => (extracted.product_filters, extracted.quantity),
        None => (None, None),
    };
    let filters = raw.filters.or(nested_filters).unwrap_or_default();
    let quantity = raw.quantity.or(nested_quantity).as_ref().and_then(quantity_from);

    ParsedClassification::Parsed(Intent {
        kind,
        filters: ProductFilters {
            garment_type: filters.garment_type.as_deref().and_then(vocabulary::canonical_garment),
            color: filters.color.as_deref().and_then(vocabulary::canonical_color),
            size: filters.size.as_deref().and_then(vocabulary::canonical_size),
        },
        quantity,
        confidence: raw
            .confidence
            .filter(|value| value.is_finite())
            .unwrap_or(DEFAULT_REMOTE_CONFIDENCE)
            .clamp(0.0, 1.0),
        provenance: Provenance::Remote,
        reasoning: raw.reasoning.unwrap_or_else(|| "remote classification".to_string()),
    })
}

fn quantity_from(value: &Value) -> Option<u32> {
    let quantity = match value {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse::<u32>().ok(),
        _ => None,
    };
    quantity.filter(|quantity| *quantity > 0)
}
