use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use campus_sync::config::Config;
use campus_sync::services::sync::SyncOrchestrator;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "campus_sync=info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    init_tracing();
    let config = Config::from_env()?;

    tracing::info!(
        "Starting campus sync: {} calendars, schedules from {}",
        config.calendar.calendars.len(),
        config.schedule.base_url
    );

    let orchestrator = SyncOrchestrator::new(config)?;
    let report = match orchestrator.run().await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Sync aborted: {}", e);
            return Err(e.into());
        }
    };

    println!("{}", report);
    Ok(())
}
