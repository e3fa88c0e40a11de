use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_NUMBERED_API_KEYS: usize = 9;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub conversation: ConversationConfig,
    pub orders: OrdersConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Remote classifier pool: credentials are tried in order, each across every model tier.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub api_keys: Vec<SecretString>,
    pub models: Vec<String>,
    pub base_url: String,
    pub call_timeout_secs: u64,
    pub invoke_deadline_secs: u64,
    pub quota_cooldown_secs: u64,
    pub invalid_credential_cooldown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub cache_ttl_secs: u64,
    pub context_window: usize,
    pub history_limit: usize,
    pub recent_order_days: i64,
    pub recent_order_limit: usize,
}

#[derive(Clone, Debug)]
pub struct OrdersConfig {
    pub edit_window_secs: i64,
    pub minimum_quantity: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub provider_api_keys: Option<Vec<String>>,
    pub provider_models: Option<Vec<String>>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://ventix.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            provider: ProviderConfig {
                api_keys: Vec::new(),
                models: default_models(),
                base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                call_timeout_secs: 20,
                invoke_deadline_secs: 60,
                quota_cooldown_secs: 300,
                invalid_credential_cooldown_secs: 86_400,
            },
            conversation: ConversationConfig {
                cache_ttl_secs: 600,
                context_window: 5,
                history_limit: 50,
                recent_order_days: 7,
                recent_order_limit: 10,
            },
            orders: OrdersConfig { edit_window_secs: 300, minimum_quantity: 50 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn default_models() -> Vec<String> {
    ["gemini-1.5-pro-latest", "gemini-1.5-flash-latest", "gemini-1.0-pro", "gemma-7b"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl ProviderConfig {
    pub fn has_credentials(&self) -> bool {
        !self.api_keys.is_empty()
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("ventix.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(provider) = patch.provider {
            if let Some(api_keys) = provider.api_keys {
                self.provider.api_keys = api_keys.into_iter().map(secret_value).collect();
            }
            if let Some(models) = provider.models {
                self.provider.models = models;
            }
            if let Some(base_url) = provider.base_url {
                self.provider.base_url = base_url;
            }
            if let Some(call_timeout_secs) = provider.call_timeout_secs {
                self.provider.call_timeout_secs = call_timeout_secs;
            }
            if let Some(invoke_deadline_secs) = provider.invoke_deadline_secs {
                self.provider.invoke_deadline_secs = invoke_deadline_secs;
            }
            if let Some(quota_cooldown_secs) = provider.quota_cooldown_secs {
                self.provider.quota_cooldown_secs = quota_cooldown_secs;
            }
            if let Some(secs) = provider.invalid_credential_cooldown_secs {
                self.provider.invalid_credential_cooldown_secs = secs;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(cache_ttl_secs) = conversation.cache_ttl_secs {
                self.conversation.cache_ttl_secs = cache_ttl_secs;
            }
            if let Some(context_window) = conversation.context_window {
                self.conversation.context_window = context_window;
            }
            if let Some(history_limit) = conversation.history_limit {
                self.conversation.history_limit = history_limit;
            }
            if let Some(recent_order_days) = conversation.recent_order_days {
                self.conversation.recent_order_days = recent_order_days;
            }
            if let Some(recent_order_limit) = conversation.recent_order_limit {
                self.conversation.recent_order_limit = recent_order_limit;
            }
        }

        if let Some(orders) = patch.orders {
            if let Some(edit_window_secs) = orders.edit_window_secs {
                self.orders.edit_window_secs = edit_window_secs;
            }
            if let Some(minimum_quantity) = orders.minimum_quantity {
                self.orders.minimum_quantity = minimum_quantity;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("VENTIX_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("VENTIX_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("VENTIX_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("VENTIX_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("VENTIX_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let env_keys = read_env_api_keys();
        if !env_keys.is_empty() {
            self.provider.api_keys = env_keys.into_iter().map(secret_value).collect();
        }
        if let Some(value) = read_env("VENTIX_PROVIDER_MODELS") {
            self.provider.models = split_list(&value);
        }
        if let Some(value) = read_env("VENTIX_PROVIDER_BASE_URL") {
            self.provider.base_url = value;
        }
        if let Some(value) = read_env("VENTIX_PROVIDER_CALL_TIMEOUT_SECS") {
            self.provider.call_timeout_secs =
                parse_u64("VENTIX_PROVIDER_CALL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("VENTIX_PROVIDER_INVOKE_DEADLINE_SECS") {
            self.provider.invoke_deadline_secs =
                parse_u64("VENTIX_PROVIDER_INVOKE_DEADLINE_SECS", &value)?;
        }
        if let Some(value) = read_env("VENTIX_PROVIDER_QUOTA_COOLDOWN_SECS") {
            self.provider.quota_cooldown_secs =
                parse_u64("VENTIX_PROVIDER_QUOTA_COOLDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("VENTIX_PROVIDER_INVALID_CREDENTIAL_COOLDOWN_SECS") {
            self.provider.invalid_credential_cooldown_secs =
                parse_u64("VENTIX_PROVIDER_INVALID_CREDENTIAL_COOLDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("VENTIX_CONVERSATION_CACHE_TTL_SECS") {
            self.conversation.cache_ttl_secs =
                parse_u64("VENTIX_CONVERSATION_CACHE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("VENTIX_CONVERSATION_CONTEXT_WINDOW") {
            self.conversation.context_window =
                parse_usize("VENTIX_CONVERSATION_CONTEXT_WINDOW", &value)?;
        }
        if let Some(value) = read_env("VENTIX_CONVERSATION_HISTORY_LIMIT") {
            self.conversation.history_limit =
                parse_usize("VENTIX_CONVERSATION_HISTORY_LIMIT", &value)?;
        }

        if let Some(value) = read_env("VENTIX_ORDERS_EDIT_WINDOW_SECS") {
            self.orders.edit_window_secs = parse_i64("VENTIX_ORDERS_EDIT_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("VENTIX_ORDERS_MINIMUM_QUANTITY") {
            self.orders.minimum_quantity = parse_u32("VENTIX_ORDERS_MINIMUM_QUANTITY", &value)?;
        }

        if let Some(value) = read_env("VENTIX_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("VENTIX_SERVER_PORT") {
            self.server.port = parse_u16("VENTIX_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("VENTIX_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("VENTIX_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("VENTIX_LOGGING_LEVEL").or_else(|| read_env("VENTIX_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("VENTIX_LOGGING_FORMAT").or_else(|| read_env("VENTIX_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(api_keys) = overrides.provider_api_keys {
            self.provider.api_keys = api_keys.into_iter().map(secret_value).collect();
        }
        if let Some(models) = overrides.provider_models {
            self.provider.models = models;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_provider(&self.provider)?;
        validate_conversation(&self.conversation)?;
        validate_orders(&self.orders)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("ventix.toml"), PathBuf::from("config/ventix.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

/// `VENTIX_PROVIDER_API_KEYS` (comma separated) followed by
/// `VENTIX_PROVIDER_API_KEY_1` .. `VENTIX_PROVIDER_API_KEY_9`, duplicates dropped.
fn read_env_api_keys() -> Vec<String> {
    let mut keys =
        read_env("VENTIX_PROVIDER_API_KEYS").map(|raw| split_list(&raw)).unwrap_or_default();
    for index in 1..=MAX_NUMBERED_API_KEYS {
        if let Some(value) = read_env(&format!("VENTIX_PROVIDER_API_KEY_{index}")) {
            let value = value.trim().to_string();
            if !keys.contains(&value) {
                keys.push(value);
            }
        }
    }
    keys
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|item| !item.is_empty()).map(str::to_string).collect()
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_provider(provider: &ProviderConfig) -> Result<(), ConfigError> {
    if provider.models.is_empty() || provider.models.iter().any(|model| model.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "provider.models must list at least one non-empty model identifier".to_string(),
        ));
    }

    if provider.api_keys.iter().any(|key| key.expose_secret().trim().is_empty()) {
        return Err(ConfigError::Validation(
            "provider.api_keys must not contain empty entries".to_string(),
        ));
    }

    let base_url = provider.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "provider.base_url must start with http:// or https://".to_string(),
        ));
    }

    if provider.call_timeout_secs == 0 || provider.call_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "provider.call_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if provider.invoke_deadline_secs == 0 {
        return Err(ConfigError::Validation(
            "provider.invoke_deadline_secs must be greater than zero".to_string(),
        ));
    }

    if provider.quota_cooldown_secs == 0 || provider.invalid_credential_cooldown_secs == 0 {
        return Err(ConfigError::Validation(
            "provider cooldowns (quota_cooldown_secs, invalid_credential_cooldown_secs) must be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.cache_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "conversation.cache_ttl_secs must be greater than zero".to_string(),
        ));
    }

    if conversation.context_window == 0 || conversation.context_window > conversation.history_limit
    {
        return Err(ConfigError::Validation(
            "conversation.context_window must be in range 1..=conversation.history_limit"
                .to_string(),
        ));
    }

    if conversation.recent_order_days <= 0 {
        return Err(ConfigError::Validation(
            "conversation.recent_order_days must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_orders(orders: &OrdersConfig) -> Result<(), ConfigError> {
    if orders.edit_window_secs <= 0 {
        return Err(ConfigError::Validation(
            "orders.edit_window_secs must be greater than zero".to_string(),
        ));
    }

    if orders.minimum_quantity == 0 {
        return Err(ConfigError::Validation(
            "orders.minimum_quantity must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    provider: Option<ProviderPatch>,
    conversation: Option<ConversationPatch>,
    orders: Option<OrdersPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderPatch {
    api_keys: Option<Vec<String>>,
    models: Option<Vec<String>>,
    base_url: Option<String>,
    call_timeout_secs: Option<u64>,
    invoke_deadline_secs: Option<u64>,
    quota_cooldown_secs: Option<u64>,
    invalid_credential_cooldown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    cache_ttl_secs: Option<u64>,
    context_window: Option<usize>,
    history_limit: Option<usize>,
    recent_order_days: Option<i64>,
    recent_order_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct OrdersPatch {
    edit_window_secs: Option<i64>,
    minimum_quantity: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const PROVIDER_VARS: &[&str] = &[
        "VENTIX_PROVIDER_API_KEYS",
        "VENTIX_PROVIDER_API_KEY_1",
        "VENTIX_PROVIDER_API_KEY_2",
        "VENTIX_PROVIDER_MODELS",
        "VENTIX_PROVIDER_QUOTA_COOLDOWN_SECS",
    ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_without_credentials() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| format!("defaults should validate: {err}"))?;

        ensure(!config.provider.has_credentials(), "default pool should be empty")?;
        ensure(config.provider.models.len() == 4, "default model cascade has four tiers")?;
        ensure(
            config.provider.quota_cooldown_secs != config.provider.invalid_credential_cooldown_secs,
            "cooldown classes should differ",
        )?;
        ensure(config.orders.edit_window_secs == 300, "edit window defaults to five minutes")?;
        ensure(config.conversation.cache_ttl_secs == 600, "cache ttl defaults to ten minutes")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_PROVIDER_KEY_A", "key-a-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("ventix.toml");
            fs::write(
                &path,
                r#"
[provider]
api_keys = ["${TEST_PROVIDER_KEY_A}", "key-b-inline"]
models = ["tier-1", "tier-2"]
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.provider.api_keys.len() == 2, "both keys should load")?;
            ensure(
                config.provider.api_keys[0].expose_secret() == "key-a-from-env",
                "first key should be interpolated from environment",
            )?;
            ensure(
                config.provider.models == vec!["tier-1".to_string(), "tier-2".to_string()],
                "model list should come from file",
            )
        })();

        clear_vars(&["TEST_PROVIDER_KEY_A"]);
        result
    }

    #[test]
    fn numbered_and_listed_env_keys_are_merged() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(PROVIDER_VARS);

        env::set_var("VENTIX_PROVIDER_API_KEYS", "alpha, beta");
        env::set_var("VENTIX_PROVIDER_API_KEY_1", "gamma");
        env::set_var("VENTIX_PROVIDER_API_KEY_2", "alpha");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let keys: Vec<&str> =
                config.provider.api_keys.iter().map(|key| key.expose_secret()).collect();
            ensure(keys == vec!["alpha", "beta", "gamma"], "keys keep order without duplicates")
        })();

        clear_vars(PROVIDER_VARS);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("VENTIX_LOG_LEVEL", "warn");
        env::set_var("VENTIX_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["VENTIX_LOG_LEVEL", "VENTIX_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(PROVIDER_VARS);

        env::set_var("VENTIX_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("VENTIX_PROVIDER_QUOTA_COOLDOWN_SECS", "120");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("ventix.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[provider]
quota_cooldown_secs = 900
invalid_credential_cooldown_secs = 7200

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.provider.quota_cooldown_secs == 120, "env cooldown should win over file")?;
            ensure(
                config.provider.invalid_credential_cooldown_secs == 7200,
                "file cooldown should win over defaults",
            )
        })();

        clear_vars(&["VENTIX_DATABASE_URL", "VENTIX_PROVIDER_QUOTA_COOLDOWN_SECS"]);
        result
    }

    #[test]
    fn validation_rejects_empty_model_cascade() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(PROVIDER_VARS);

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                provider_models: Some(Vec::new()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };

        match error {
            ConfigError::Validation(message) => {
                ensure(message.contains("provider.models"), "error should name the field")
            }
            other => Err(format!("unexpected error variant: {other}")),
        }
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("VENTIX_ORDERS_MINIMUM_QUANTITY", "fifty");
        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "VENTIX_ORDERS_MINIMUM_QUANTITY", "error should carry the key")
            }
            Err(other) => Err(format!("unexpected error variant: {other}")),
            Ok(_) => Err("expected invalid override".to_string()),
        };
        clear_vars(&["VENTIX_ORDERS_MINIMUM_QUANTITY"]);
        result
    }

    #[test]
    fn require_file_reports_missing_path() -> Result<(), String> {
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let missing = dir.path().join("absent.toml");
        match AppConfig::load(LoadOptions {
            config_path: Some(missing.clone()),
            require_file: true,
            ..LoadOptions::default()
        }) {
            Err(ConfigError::MissingConfigFile(path)) => {
                ensure(path == missing, "missing path should be reported")
            }
            Err(other) => Err(format!("unexpected error variant: {other}")),
            Ok(_) => Err("expected missing file error".to_string()),
        }
    }
}
