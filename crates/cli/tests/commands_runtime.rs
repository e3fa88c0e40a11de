use std::env;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use ventix_cli::commands::{classify, doctor, migrate, seed};

#[test]
fn migrate_returns_success_with_valid_env() {
    let database = TempDatabase::new("migrate");
    with_env(&[("VENTIX_DATABASE_URL", database.url().as_str())], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("3 migrations"));
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("VENTIX_DATABASE_URL", "postgres://localhost/ventix")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let database = TempDatabase::new("seed");
    with_env(&[("VENTIX_DATABASE_URL", database.url().as_str())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success: {}", first.output);
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["status"], "ok");
        let first_message = first_payload["message"].as_str().unwrap_or_default().to_string();
        assert!(first_message.contains("0 already present"), "{first_message}");

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        let second_message = second_payload["message"].as_str().unwrap_or_default();
        assert!(second_message.contains("(0 inserted"), "{second_message}");
    });
}

#[test]
fn doctor_reports_degraded_without_provider_keys() {
    let database = TempDatabase::new("doctor");
    with_env(&[("VENTIX_DATABASE_URL", database.url().as_str())], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "degraded is still ready: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "degraded");
        let checks = payload["checks"].as_array().cloned().unwrap_or_default();
        let status_of = |name: &str| {
            checks
                .iter()
                .find(|check| check["name"] == name)
                .map(|check| check["status"].clone())
                .unwrap_or(Value::Null)
        };
        assert_eq!(status_of("config_validation"), "pass");
        assert_eq!(status_of("provider_pool"), "degraded");
        assert_eq!(status_of("database_connectivity"), "pass");
    });
}

#[test]
fn doctor_passes_with_provider_keys() {
    let database = TempDatabase::new("doctor-keys");
    with_env(
        &[
            ("VENTIX_DATABASE_URL", database.url().as_str()),
            ("VENTIX_PROVIDER_API_KEYS", "key-alpha-0001,key-bravo-0002"),
            ("VENTIX_PROVIDER_MODELS", "gemini-1.5-flash-latest"),
        ],
        || {
            let result = doctor::run(false);
            assert_eq!(result.exit_code, 0);
            assert!(result.output.starts_with("doctor: all readiness checks passed"), "{}", result.output);
            assert!(result.output.contains("2 credential(s) x 1 model(s)"), "{}", result.output);
        },
    );
}

#[test]
fn doctor_fails_when_config_invalid() {
    with_env(&[("VENTIX_ORDERS_EDIT_WINDOW_SECS", "0")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
    });
}

#[test]
fn classify_prints_fallback_intent_as_json() {
    let result = classify::run("quiero 80 pantalones azules talla L", 0);
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "classify");
    assert_eq!(payload["intent"]["kind"], "create_order");
    assert_eq!(payload["intent"]["provenance"], "fallback");
    assert_eq!(payload["intent"]["quantity"], 80);
    assert_eq!(payload["intent"]["filters"]["color"], "azul");
    assert_eq!(payload["missing_slots"], Value::Array(Vec::new()));
}

#[test]
fn classify_lists_missing_slots_and_rejects_blank_input() {
    let partial = parse_payload(&classify::run("quiero 80 camisetas", 0).output);
    assert_eq!(partial["missing_slots"], serde_json::json!(["color", "size"]));

    let blank = classify::run("   ", 0);
    assert_eq!(blank.exit_code, 2);
    assert_eq!(parse_payload(&blank.output)["error_class"], "invalid_input");
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

struct TempDatabase {
    path: PathBuf,
}

impl TempDatabase {
    fn new(label: &str) -> Self {
        let path = env::temp_dir().join(format!("ventix-cli-{label}-{}.db", std::process::id()));
        remove_database_files(&path);
        Self { path }
    }

    fn url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path.display())
    }
}

impl Drop for TempDatabase {
    fn drop(&mut self) {
        remove_database_files(&self.path);
    }
}

fn remove_database_files(path: &PathBuf) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "VENTIX_DATABASE_URL",
        "VENTIX_DATABASE_MAX_CONNECTIONS",
        "VENTIX_DATABASE_TIMEOUT_SECS",
        "VENTIX_PROVIDER_API_KEYS",
        "VENTIX_PROVIDER_API_KEY_1",
        "VENTIX_PROVIDER_API_KEY_2",
        "VENTIX_PROVIDER_MODELS",
        "VENTIX_PROVIDER_BASE_URL",
        "VENTIX_ORDERS_EDIT_WINDOW_SECS",
        "VENTIX_ORDERS_MINIMUM_QUANTITY",
        "VENTIX_SERVER_BIND_ADDRESS",
        "VENTIX_SERVER_PORT",
        "VENTIX_LOGGING_LEVEL",
        "VENTIX_LOGGING_FORMAT",
        "VENTIX_LOG_LEVEL",
        "VENTIX_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
