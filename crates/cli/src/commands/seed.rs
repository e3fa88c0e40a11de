use crate::commands::{current_thread_runtime, load_config, CommandResult, StepFailure};
use ventix_db::{connect_from_config, migrations, DemoCatalog, SeedResult};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match current_thread_runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = DemoCatalog::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoCatalog::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        pool.close().await;

        if verification.all_present {
            Ok::<SeedResult, StepFailure>(seeded)
        } else {
            Err(("seed_verification", verification_message(&verification.checks), 6u8))
        }
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "demo catalog ready: {} products ({} inserted, {} already present)",
        seeded.products_total,
        seeded.products_inserted,
        seeded.products_total.saturating_sub(seeded.products_inserted)
    )
}

fn verification_message(checks: &[(&'static str, bool)]) -> String {
    let failed = checks
        .iter()
        .filter_map(|(garment, present)| (!present).then_some(*garment))
        .collect::<Vec<_>>();
    if failed.is_empty() {
        "demo catalog verification failed".to_string()
    } else {
        format!("demo catalog incomplete for garments: {}", failed.join(", "))
    }
}
