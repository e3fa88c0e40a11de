use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use toml::Value;
use ventix_core::config::{AppConfig, LoadOptions};

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    fn field(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Field {
        Field { key, value, env_keys }
    }

    vec![
        field("database.url", config.database.url.clone(), &["VENTIX_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["VENTIX_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["VENTIX_DATABASE_TIMEOUT_SECS"],
        ),
        field(
            "provider.api_keys",
            redact_keys(&config.provider.api_keys),
            &["VENTIX_PROVIDER_API_KEYS", "VENTIX_PROVIDER_API_KEY_1"],
        ),
        field("provider.models", config.provider.models.join(", "), &["VENTIX_PROVIDER_MODELS"]),
        field("provider.base_url", config.provider.base_url.clone(), &["VENTIX_PROVIDER_BASE_URL"]),
        field(
            "provider.call_timeout_secs",
            config.provider.call_timeout_secs.to_string(),
            &["VENTIX_PROVIDER_CALL_TIMEOUT_SECS"],
        ),
        field(
            "provider.invoke_deadline_secs",
            config.provider.invoke_deadline_secs.to_string(),
            &["VENTIX_PROVIDER_INVOKE_DEADLINE_SECS"],
        ),
        field(
            "provider.quota_cooldown_secs",
            config.provider.quota_cooldown_secs.to_string(),
            &["VENTIX_PROVIDER_QUOTA_COOLDOWN_SECS"],
        ),
        field(
            "provider.invalid_credential_cooldown_secs",
            config.provider.invalid_credential_cooldown_secs.to_string(),
            &["VENTIX_PROVIDER_INVALID_CREDENTIAL_COOLDOWN_SECS"],
        ),
        field(
            "conversation.cache_ttl_secs",
            config.conversation.cache_ttl_secs.to_string(),
            &["VENTIX_CONVERSATION_CACHE_TTL_SECS"],
        ),
        field(
            "conversation.context_window",
            config.conversation.context_window.to_string(),
            &["VENTIX_CONVERSATION_CONTEXT_WINDOW"],
        ),
        field(
            "conversation.history_limit",
            config.conversation.history_limit.to_string(),
            &["VENTIX_CONVERSATION_HISTORY_LIMIT"],
        ),
        field(
            "orders.edit_window_secs",
            config.orders.edit_window_secs.to_string(),
            &["VENTIX_ORDERS_EDIT_WINDOW_SECS"],
        ),
        field(
            "orders.minimum_quantity",
            config.orders.minimum_quantity.to_string(),
            &["VENTIX_ORDERS_MINIMUM_QUANTITY"],
        ),
        field("server.bind_address", config.server.bind_address.clone(), &["VENTIX_SERVER_BIND_ADDRESS"]),
        field("server.port", config.server.port.to_string(), &["VENTIX_SERVER_PORT"]),
        field(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["VENTIX_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        field(
            "logging.level",
            config.logging.level.clone(),
            &["VENTIX_LOGGING_LEVEL", "VENTIX_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["VENTIX_LOGGING_FORMAT", "VENTIX_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("ventix.toml"), PathBuf::from("config/ventix.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Shows only the last four characters of each key.
fn redact_keys(keys: &[secrecy::SecretString]) -> String {
    if keys.is_empty() {
        return "<unset> (keyword fallback only)".to_string();
    }

    keys.iter()
        .map(|key| {
            let raw = key.expose_secret().trim();
            let tail: String =
                raw.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            if raw.chars().count() <= 8 {
                "<redacted>".to_string()
            } else {
                format!("***{tail}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
