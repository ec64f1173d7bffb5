use clap::{Parser, Subcommand};
use finance_assistant::{
    agent::FinancialAgent,
    config::Config,
    db,
    execution::ExecutionEngine,
    llm::{ChatModel, ModelResponse, OpenAiCompatibleModel, ScriptedModel},
    tools::{calculate_rounded, create_default_registry, ListTablesTool},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "finance-assistant", version, about = "Financial AI assistant")]
struct Cli {
    /// Overrides DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask the assistant a question
    Ask {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Replay model responses from a JSON file instead of calling the LLM
        #[arg(long)]
        script: Option<PathBuf>,
    },
    /// Print the database structure
    Tables,
    /// Create the tables in the database
    InitDb,
    /// Evaluate an arithmetic expression
    Calc {
        #[arg(required = true, num_args = 1..)]
        expression: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout stays clean for answers.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    match cli.command {
        Command::Calc { expression } => {
            let expression = expression.join(" ");
            println!("{}", calculate_rounded(&expression)?);
        }
        Command::InitDb => {
            let pool = db::connect(&config.database_url).await?;
            db::ensure_schema(&pool).await?;
            println!("Schema ready at {}", config.database_url);
        }
        Command::Tables => {
            let pool = db::connect(&config.database_url).await?;
            let tables = ListTablesTool::new(pool).describe().await?;
            println!("{}", serde_json::to_string_pretty(&tables)?);
        }
        Command::Ask { query, script } => {
            let query = query.join(" ");
            let pool = db::connect(&config.database_url).await?;

            let model: Arc<dyn ChatModel> = match script {
                Some(path) => {
                    let responses: Vec<ModelResponse> =
                        serde_json::from_str(&std::fs::read_to_string(path)?)?;
                    Arc::new(ScriptedModel::new(responses))
                }
                None => Arc::new(OpenAiCompatibleModel::from_config(&config)?),
            };

            let registry = create_default_registry(pool, &config);
            let agent = FinancialAgent::new(model, ExecutionEngine::new(registry), config.max_steps);

            info!(model = %agent.model_id(), query = %query, "Running query");
            let run = agent.run(&query).await?;

            println!("{}", run.answer);
            println!("\n=== EXECUTION TRACE ({} ms) ===", run.execution_time_ms);
            for step in &run.steps {
                if let Some(thought) = &step.thought {
                    println!("  {}: {}", step.step_number, thought);
                }
                for obs in &step.observations {
                    println!(
                        "  {}: {} [{}] {} ms -> {}",
                        step.step_number, obs.tool_name, obs.status, obs.execution_time_ms, obs.tool_output
                    );
                }
                if let Some(error) = &step.error {
                    println!("  {}: error: {}", step.step_number, error);
                }
            }
            println!("Tokens used: {}", run.usage.total_tokens);
        }
    }

    Ok(())
}
