use analyst_pipeline::{workflow_from_settings, ClientProfile, Settings};
use chrono::NaiveDate;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Analyst Pipeline starting");

    let settings = Settings::from_env()?;
    let workflow = workflow_from_settings(&settings)?;

    // Sample client
    let profile = ClientProfile::new(
        7,
        "aggressive growth for retirement",
        100_000,
        NaiveDate::from_ymd_opt(2024, 1, 1).ok_or("invalid start date")?,
        NaiveDate::from_ymd_opt(2034, 1, 1),
    )?;

    info!(
        risk_tolerance = profile.risk_tolerance(),
        cash_flow = profile.cash_flow(),
        "Running pipeline for sample client"
    );

    let interrupted = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let run = workflow.run_until(profile, interrupted).await?;

    info!(
        run_id = %run.run_id,
        tool_source = ?run.tool_source,
        elapsed_ms = run.elapsed_ms,
        "Pipeline completed"
    );

    for line in &run.reasoning_trace {
        info!("{}", line);
    }

    let portfolio = run.final_portfolio()?;
    println!("{}", serde_json::to_string_pretty(&portfolio)?);

    Ok(())
}
