use serde_json::{Value, json};

use joba::{HandleOptions, Joba, JobaConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = JobaConfig::from_env();

    eprintln!("joba v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Bus: {}", config.bus);
    eprintln!("   Worklog: {}", config.db_path);

    let joba = Joba::builder()
        .bus(config.bus_descriptor())
        .persistence(config.persistence_descriptor())
        .build()
        .await
        .unwrap_or_else(|e| {
            eprintln!("Error: Failed to start orchestrator: {e}");
            std::process::exit(1);
        });

    // ── Heartbeat ────────────────────────────────────────────────────────
    let _heartbeat = joba
        .handle(
            "heartbeat",
            |params: Value| async move {
                tracing::info!(params = %params, "heartbeat");
                Ok::<_, anyhow::Error>(json!({ "at": chrono::Utc::now().to_rfc3339() }))
            },
            HandleOptions::default(),
        )
        .await?;

    let _schedule = match config.heartbeat_cron.as_deref() {
        Some(cron) => {
            let handle = joba.schedule(cron, "heartbeat", Value::Null)?;
            eprintln!("   Heartbeat: {cron}");
            Some(handle)
        }
        None => {
            eprintln!("   Heartbeat: not scheduled (set JOBA_HEARTBEAT_CRON)");
            None
        }
    };

    eprintln!("   Press Ctrl-C to stop.\n");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    Ok(())
}
