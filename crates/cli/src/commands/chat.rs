//! Line-oriented chat over stdin and stdout.
//!
//! Calendar and mailbox are process-local in this binary; todos and plans
//! persist in the configured SQLite database.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tempra_agent::{
    HttpCompletionGateway, Orchestrator, OrchestratorDeps, OrchestratorError, PendingDecision,
    TracingAuditSink, TurnRequest,
};
use tempra_core::config::{AppConfig, LoadOptions, LogFormat};
use tempra_core::providers::{InMemoryCalendar, InMemoryMailbox, StaticCredentialProvider};
use tempra_core::{ConversationSession, SessionId, UserIdentity};
use tempra_db::{connect_from_config, migrations, SqlPlanStore, SqlTodoStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::commands::{command_runtime, CommandResult};

const CONFIRM_HINT: &str = "(reply /accept to confirm or /deny to discard)";
const NOTHING_PENDING: &str = "There is nothing waiting for confirmation.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatStep {
    Reply(String),
    Idle,
    Quit,
}

/// One user's conversation: the orchestrator plus the session it owns.
pub struct ChatDriver {
    orchestrator: Orchestrator,
    session: ConversationSession,
    user: UserIdentity,
}

impl ChatDriver {
    pub fn new(orchestrator: Orchestrator, user: UserIdentity, session_id: SessionId) -> Self {
        Self { orchestrator, session: ConversationSession::new(session_id), user }
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub async fn handle_line(&mut self, line: &str) -> ChatStep {
        let message = line.trim();
        match message {
            "" => ChatStep::Idle,
            "/quit" | "/exit" => ChatStep::Quit,
            "/accept" => self.resolve(PendingDecision::Accept).await,
            "/deny" => self.resolve(PendingDecision::Deny).await,
            _ => {
                let reply = self
                    .orchestrator
                    .process_turn(TurnRequest { message, session: &self.session, user: &self.user })
                    .await;
                reply.apply_to(&mut self.session, message, self.orchestrator.history_window());

                if reply.show_confirm_buttons {
                    ChatStep::Reply(format!("{}\n{CONFIRM_HINT}", reply.reply_text))
                } else {
                    ChatStep::Reply(reply.reply_text)
                }
            }
        }
    }

    async fn resolve(&mut self, decision: PendingDecision) -> ChatStep {
        match self.orchestrator.resolve_for_session(decision, &mut self.session, &self.user).await {
            Ok(resolution) => ChatStep::Reply(resolution.message),
            Err(OrchestratorError::NoPendingDraft) => ChatStep::Reply(NOTHING_PENDING.to_string()),
            Err(OrchestratorError::DraftNotReady { missing }) => ChatStep::Reply(format!(
                "That draft still needs: {}. Tell me the missing details first.",
                missing.join(", ")
            )),
        }
    }
}

pub fn run(user_id: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    init_logging(&config);

    let runtime = match command_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let orchestrator = match runtime.block_on(build_orchestrator(&config)) {
        Ok(orchestrator) => orchestrator,
        Err(error) => {
            return CommandResult::failure("chat", "bootstrap", format!("{error:#}"), 4);
        }
    };

    let session_id = SessionId::new(format!("cli-{user_id}"));
    let mut driver = ChatDriver::new(orchestrator, UserIdentity::new(user_id), session_id);
    info!(event_name = "cli.chat.started", user_id = %user_id, "chat session started");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut turns = 0usize;
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(error) => {
                return CommandResult::failure("chat", "stdin", error.to_string(), 5);
            }
        };

        match runtime.block_on(driver.handle_line(&line)) {
            ChatStep::Quit => break,
            ChatStep::Idle => continue,
            ChatStep::Reply(text) => {
                turns += 1;
                if writeln!(stdout, "{text}\n").and_then(|()| stdout.flush()).is_err() {
                    break;
                }
            }
        }
    }

    CommandResult::success("chat", format!("session ended after {turns} turn(s)"))
}

async fn build_orchestrator(config: &AppConfig) -> anyhow::Result<Orchestrator> {
    let gateway = HttpCompletionGateway::from_config(&config.llm)?;
    let pool = connect_from_config(&config.database).await?;
    migrations::run_pending(&pool).await?;

    let deps = OrchestratorDeps {
        gateway: Arc::new(gateway),
        calendar: Arc::new(InMemoryCalendar::default()),
        email: Arc::new(InMemoryMailbox::default()),
        todos: Arc::new(SqlTodoStore::new(pool.clone())),
        plans: Arc::new(SqlPlanStore::new(pool)),
        credentials: Arc::new(StaticCredentialProvider::shared(config.providers.access_token.clone())),
        audit: Arc::new(TracingAuditSink),
    };
    Ok(Orchestrator::new(deps, config))
}

/// Logs go to stderr so replies on stdout stay readable.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter).with_writer(io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
