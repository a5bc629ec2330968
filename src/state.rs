//! Application state: configuration, the repository, external clients and
//! the services built on them. Shared by every handler as `Arc<AppState>`.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::accounts::Accounts;
use crate::chat::ChatOrchestrator;
use crate::config::AppConfig;
use crate::geolin::{GeolinClient, ProblemGenerator};
use crate::invites::InviteCodes;
use crate::llm::{LlmGateway, OpenAiGateway};
use crate::llm_log::InteractionLog;
use crate::problem_bank::{HttpProblemBank, ProblemBank};
use crate::prompts::PromptResolver;
use crate::stats::Stats;
use crate::store::{MemoryStore, Store};
use crate::tasks::TaskTracker;

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub llm: Arc<dyn LlmGateway>,
    pub bank: Arc<dyn ProblemBank>,
    pub generator: Arc<dyn ProblemGenerator>,
    pub chats: ChatOrchestrator,
    pub tasks: TaskTracker,
    pub invites: InviteCodes,
    pub accounts: Accounts,
    pub stats: Stats,
}

impl AppState {
    /// Build the real clients from configuration.
    #[instrument(level = "info", skip_all)]
    pub fn from_config(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let prompts = PromptResolver::new(config.prompts.clone());
        let log = InteractionLog::new(&config.llm_logging);
        let llm = OpenAiGateway::new(&config.llm, prompts, log)?;
        info!(target: "tutor_backend", chat_model = %llm.chat_model_name(), solver_model = %llm.solver_model_name(), "LLM gateway ready");

        let bank = HttpProblemBank::new(&config.problems)?;
        let generator = GeolinClient::new(&config.geolin)?;
        info!(target: "tutor_backend", problems = %config.problems.base_url, geolin = %config.geolin.base_url, "Upstream clients ready");

        Ok(Self::assemble(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(llm),
            Arc::new(bank),
            Arc::new(generator),
        ))
    }

    /// Wire services around the given collaborators.
    pub fn assemble(
        config: AppConfig,
        store: Arc<dyn Store>,
        llm: Arc<dyn LlmGateway>,
        bank: Arc<dyn ProblemBank>,
        generator: Arc<dyn ProblemGenerator>,
    ) -> Self {
        let config = Arc::new(config);
        let prompts = PromptResolver::new(config.prompts.clone());
        let invites = InviteCodes::new(store.clone());
        Self {
            chats: ChatOrchestrator::new(store.clone(), llm.clone(), bank.clone(), prompts),
            tasks: TaskTracker::new(store.clone(), bank.clone(), config.clone()),
            accounts: Accounts::new(store.clone(), invites.clone(), config.jwt.clone()),
            stats: Stats::new(store),
            invites,
            config,
            llm,
            bank,
            generator,
        }
    }
}
