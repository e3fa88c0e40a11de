use serde::Serialize;
use ventix_agent::fallback;
use ventix_core::domain::intent::{Intent, Slot};

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct ClassifyOutcome<'a> {
    command: &'static str,
    status: &'static str,
    message: &'a str,
    missing_slots: Vec<Slot>,
    intent: Intent,
}

/// Offline classification: no provider call, no conversation context.
pub fn run(message: &str, recent_orders: usize) -> CommandResult {
    if message.trim().is_empty() {
        return CommandResult::failure("classify", "invalid_input", "message must not be empty", 2);
    }

    let intent = fallback::classify(message, recent_orders);
    let missing_slots = intent.filters.missing(intent.kind);
    let outcome = ClassifyOutcome { command: "classify", status: "ok", message, missing_slots, intent };

    match serde_json::to_string(&outcome) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure("classify", "serialization", error.to_string(), 3),
    }
}
