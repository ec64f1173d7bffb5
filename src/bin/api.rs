use finance_assistant::{
    agent::FinancialAgent,
    api::start_server,
    config::Config,
    db,
    execution::ExecutionEngine,
    llm::OpenAiCompatibleModel,
    tools::create_default_registry,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load environment variables
    let config = Config::from_env()?;

    info!("Financial Assistant - API Server");
    info!(port = config.port, database_url = %config.database_url, model = %config.llm_model, "Configuration loaded");

    // Create components
    let pool = db::connect(&config.database_url).await?;
    db::ensure_schema(&pool).await?;

    let model = Arc::new(OpenAiCompatibleModel::from_config(&config)?);
    let registry = create_default_registry(pool, &config);
    info!(tools = ?registry.list(), "Tools registered");

    let agent = Arc::new(FinancialAgent::new(
        model,
        ExecutionEngine::new(registry),
        config.max_steps,
    ));

    info!("Agent initialized, starting API server");

    start_server(agent, config.port).await?;

    Ok(())
}
