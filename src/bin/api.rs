use portfolio_chat_agent::{
    agent::AgentService,
    api::{start_server, ApiState},
    backend::{BackendHandles, HoldingsSource, InMemoryHoldings, PortfolioApiClient},
    checkpoint::{CheckpointStore, InMemoryCheckpointStore, PgCheckpointStore},
    config::Settings,
    llm::{ChatModel, FixedReplyModel, OpenAiChatModel},
    prompts::PromptBuilder,
    telemetry,
    threads::{InMemoryThreadStore, PgThreadStore, ThreadManager, ThreadStore},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();
    let settings = Settings::from_env()?;

    telemetry::init_tracing(&settings.log_level);
    let metrics = telemetry::install_metrics_recorder();

    info!("🚀 Portfolio Chat Agent - API Server");
    info!("📍 Port: {}", settings.api_port);

    // Durable state
    let (thread_store, checkpoints): (Arc<dyn ThreadStore>, Arc<dyn CheckpointStore>) =
        match &settings.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(10)
                    .connect_lazy(url)?;
                info!("🗄️  Using Postgres for threads and checkpoints");
                (
                    Arc::new(PgThreadStore::new(pool.clone())),
                    Arc::new(PgCheckpointStore::new(pool)),
                )
            }
            None => {
                warn!("DATABASE_URL not set; conversations are kept in memory only");
                (
                    Arc::new(InMemoryThreadStore::new()),
                    Arc::new(InMemoryCheckpointStore::new()),
                )
            }
        };

    // Model
    let llm_configured = settings.llm.is_configured();
    let model: Arc<dyn ChatModel> = if llm_configured {
        Arc::new(OpenAiChatModel::new(&settings.llm)?)
    } else {
        warn!("⚠️  LLM_ENDPOINT / LLM_API_KEY not set; answering with a placeholder model");
        Arc::new(FixedReplyModel::new(
            "The assistant is not configured yet. Please set the model endpoint and key.",
        ))
    };

    // Portfolio backend
    let holdings: Arc<dyn HoldingsSource> = match &settings.portfolio_api_base_url {
        Some(base_url) => Arc::new(PortfolioApiClient::new(base_url)?),
        None => {
            warn!("PORTFOLIO_API_BASE_URL not set; holdings tools will find no data");
            Arc::new(InMemoryHoldings::new())
        }
    };

    let threads = Arc::new(ThreadManager::new(thread_store, settings.agent.inactivity_minutes));
    let service = AgentService::new(
        model,
        threads,
        checkpoints,
        PromptBuilder::load(settings.prompts_file.as_deref()),
        settings.agent,
    );

    info!("✅ Agent initialized with model {}", service.model_name());
    info!("📡 Starting API server...");

    let state = ApiState {
        service: Arc::new(service),
        handles: BackendHandles::new(holdings),
        metrics,
        llm_configured,
    };

    start_server(state, settings.api_port).await?;

    Ok(())
}
