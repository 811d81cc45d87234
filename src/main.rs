use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ralph_orchestrator::config::{LlmClientConfig, Provider};
use ralph_orchestrator::llm::HttpLlmClient;
use ralph_orchestrator::models::{Plan, Project, ProjectStatus};
use ralph_orchestrator::{ApprovalOracle, Broadcast, Registry, Store, VcsGate, Workspace};

/// Ralph: a long-running agentic build orchestrator.
#[derive(Parser, Debug)]
#[command(name = "ralph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the persisted data directory (holds db.json)
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP/WS dashboard and chat bridge
    Serve {
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
    /// Project management
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Global settings management
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Lessons log management
    Lessons {
        #[command(subcommand)]
        action: LessonsAction,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectAction {
    /// Create a new project
    Create {
        name: String,
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Start a project's pipeline
    Start { id: String },
    /// Stop a project's pipeline
    Stop { id: String },
    /// Materialise a project's workspace and initial commit
    Init { id: String },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the current settings
    Show,
    /// Set a single setting value (e.g. `max-iterations 80`)
    Set { key: String, value: String },
}

#[derive(Subcommand, Debug)]
enum LessonsAction {
    /// List all recorded lessons
    List,
    /// Clear all recorded lessons
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("info") };
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let store = Arc::new(Store::load(cli.data_dir.join("db.json")).await.context("Failed to load store")?);

    match cli.command {
        Command::Serve { port } => run_serve(store, port).await,
        Command::Project { action } => run_project_action(store, action).await,
        Command::Settings { action } => run_settings_action(store, action).await,
        Command::Lessons { action } => run_lessons_action(store, action).await,
    }
}

async fn run_serve(store: Arc<Store>, port: u16) -> Result<()> {
    let broadcast = Broadcast::new();
    let llm_config = LlmClientConfig::from_env();
    let syntax_checker = llm_config.command.clone().unwrap_or_else(|| "node".to_string());
    let llm: Arc<ralph_orchestrator::llm::HttpLlmClient> = Arc::new(HttpLlmClient::new(llm_config));

    let settings = store.get_settings().await;
    let approval = ApprovalOracle::new(settings.chat.enabled);
    let registry = Arc::new(Registry::new(store.clone(), broadcast.clone(), llm.clone(), syntax_checker, approval.clone()));

    registry.resume_on_start().await;

    if settings.chat.enabled {
        if let Some(token) = settings.chat.token.clone() {
            let chat_id = settings.chat.chat_id.as_ref().and_then(|id| id.parse::<i64>().ok()).map(teloxide::types::ChatId);
            let chat_state = ralph_orchestrator::chat::ChatState {
                store: store.clone(),
                approval: approval.clone(),
                authorised_chat_id: chat_id,
            };
            tokio::spawn(ralph_orchestrator::chat::run(token, chat_state));
        }
    }

    let state = ralph_orchestrator::http::AppState { store, registry, broadcast, llm };
    let router = ralph_orchestrator::http::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await.context("Failed to bind dashboard port")?;
    info!("serving dashboard on port {port}");
    axum::serve(listener, router).await.context("Dashboard server failed")?;
    Ok(())
}

async fn run_project_action(store: Arc<Store>, action: ProjectAction) -> Result<()> {
    match action {
        ProjectAction::Create { name, path } => {
            let root_path = path.unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("Projects").join(&name));
            let project = Project::new(name.clone(), root_path, Plan::new(), true);
            store.save_project(project).await?;
            println!("Created project \"{name}\"");
        }
        ProjectAction::Start { id } => {
            let mut project = store.get_project(&id).await.context("No such project")?;
            project.status = ProjectStatus::Running;
            store.save_project(project.clone()).await?;

            let broadcast = Broadcast::new();
            let llm_config = LlmClientConfig::from_env();
            let syntax_checker = llm_config.command.clone().unwrap_or_else(|| "node".to_string());
            let llm: Arc<HttpLlmClient> = Arc::new(HttpLlmClient::new(llm_config));
            let approval = ApprovalOracle::new(false);
            let registry = Registry::new(store.clone(), broadcast, llm, syntax_checker, approval);
            let settings = store.get_settings().await;
            registry.start(&project, &settings).await;
            println!("Started project \"{id}\"");
        }
        ProjectAction::Stop { id } => {
            if let Some(mut project) = store.get_project(&id).await {
                project.status = ProjectStatus::Paused;
                store.save_project(project).await?;
            }
            println!("Stopped project \"{id}\"");
        }
        ProjectAction::Init { id } => {
            let project = store.get_project(&id).await.context("No such project")?;
            Workspace::new(project.root_path.clone()).init()?;
            VcsGate::new(project.root_path.clone()).init()?;
            let mut project = project;
            project.status = ProjectStatus::Initialized;
            store.save_project(project).await?;
            println!("Initialized project \"{id}\"");
        }
    }
    Ok(())
}

async fn run_settings_action(store: Arc<Store>, action: SettingsAction) -> Result<()> {
    match action {
        SettingsAction::Show => {
            let settings = store.get_settings().await;
            println!("{}", serde_yaml::to_string(&settings)?);
        }
        SettingsAction::Set { key, value } => {
            let mut settings = store.get_settings().await;
            match key.as_str() {
                "max-iterations" => settings.max_iterations = value.parse().context("Invalid u32")?,
                "max-retries-per-task" => settings.max_retries_per_task = value.parse().context("Invalid u32")?,
                "base-sleep-time" => settings.base_sleep_time = value.parse().context("Invalid u64")?,
                "backoff-multiplier" => settings.backoff_multiplier = value.parse().context("Invalid f64")?,
                "use-reviewer-agent" => settings.use_reviewer_agent = value.parse().context("Invalid bool")?,
                "auto-test" => settings.auto_test = value.parse().context("Invalid bool")?,
                "chat-enabled" => settings.chat.enabled = value.parse().context("Invalid bool")?,
                other => anyhow::bail!("Unknown setting: {other}"),
            }
            store.update_settings(settings).await?;
            println!("Updated {key} = {value}");
        }
    }
    Ok(())
}

async fn run_lessons_action(store: Arc<Store>, action: LessonsAction) -> Result<()> {
    match action {
        LessonsAction::List => {
            for lesson in store.get_lessons().await {
                println!("[{}] {}/{}: {}", lesson.timestamp, lesson.stage, lesson.task, lesson.error);
            }
        }
        LessonsAction::Clear => {
            for lesson in store.get_lessons().await {
                store.delete_lesson(&lesson.timestamp).await?;
            }
            println!("Cleared all lessons");
        }
    }
    Ok(())
}
