//! Chat bridge — Telegram-backed Approval Oracle delivery and a small
//! set of inbound commands. Only a single pre-authorised chat id is
//! honoured; everything else is ignored rather than answered, so the bot
//! never becomes a general-purpose relay.

use std::path::PathBuf;
use std::sync::Arc;

use teloxide::dispatching::dialogue::{self, InMemStorage};
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

use crate::approval::ApprovalOracle;
use crate::models::{Plan, Project};
use crate::store::Store;

type ChatDialogue = Dialogue<CreationState, InMemStorage<CreationState>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Clone, Default)]
pub enum CreationState {
    #[default]
    Idle,
    AwaitingName,
    AwaitingPrompt {
        name: String,
    },
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Ralph chat bridge commands:")]
enum Command {
    #[command(description = "start creating a new project")]
    New,
    #[command(description = "show the status of all running projects")]
    Status,
    #[command(description = "show the current active task")]
    Current,
    #[command(description = "list all projects")]
    Projects,
    #[command(description = "show this help text")]
    Help,
}

#[derive(Clone)]
pub struct ChatState {
    pub store: Arc<Store>,
    pub approval: ApprovalOracle,
    pub authorised_chat_id: Option<ChatId>,
}

/// Run the long-polling dispatcher until the process exits. Only invoked
/// when `chat.enabled` is true and a bot token is configured.
pub async fn run(token: String, state: ChatState) {
    let bot = Bot::new(token);
    let storage = InMemStorage::<CreationState>::new();

    let handler = schema();
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![storage, state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(dptree::case![Command::New].endpoint(cmd_new))
        .branch(dptree::case![Command::Status].endpoint(cmd_status))
        .branch(dptree::case![Command::Current].endpoint(cmd_current))
        .branch(dptree::case![Command::Projects].endpoint(cmd_projects))
        .branch(dptree::case![Command::Help].endpoint(cmd_help));

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(dptree::case![CreationState::AwaitingName].endpoint(receive_name))
        .branch(dptree::case![CreationState::AwaitingPrompt { name }].endpoint(receive_prompt));

    let callback_handler = Update::filter_callback_query().endpoint(handle_approval_callback);

    dialogue::enter::<Update, InMemStorage<CreationState>, CreationState, _>()
        .branch(message_handler)
        .branch(callback_handler)
}

fn authorised(state: &ChatState, chat_id: ChatId) -> bool {
    match state.authorised_chat_id {
        Some(id) => id == chat_id,
        None => false,
    }
}

async fn cmd_new(bot: Bot, msg: Message, dialogue: ChatDialogue, state: ChatState) -> HandlerResult {
    if !authorised(&state, msg.chat.id) {
        return Ok(());
    }
    bot.send_message(msg.chat.id, "What should the new project be named?").await?;
    dialogue.update(CreationState::AwaitingName).await?;
    Ok(())
}

async fn receive_name(bot: Bot, msg: Message, dialogue: ChatDialogue) -> HandlerResult {
    let Some(name) = msg.text().map(str::to_string) else {
        bot.send_message(msg.chat.id, "Please send the project name as text.").await?;
        return Ok(());
    };
    bot.send_message(msg.chat.id, format!("Got it. What should \"{name}\" build?")).await?;
    dialogue.update(CreationState::AwaitingPrompt { name }).await?;
    Ok(())
}

async fn receive_prompt(bot: Bot, msg: Message, dialogue: ChatDialogue, state: ChatState, name: String) -> HandlerResult {
    let Some(prompt) = msg.text() else {
        bot.send_message(msg.chat.id, "Please send the build prompt as text.").await?;
        return Ok(());
    };

    let root_path = std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join("Projects").join(&name);
    let project = Project::new(name.clone(), root_path, Plan::new(), true);
    match state.store.save_project(project).await {
        Ok(()) => {
            bot.send_message(
                msg.chat.id,
                format!("Created project \"{name}\" with prompt: {prompt}\nUse the dashboard to generate its plan and start it."),
            )
            .await?;
        }
        Err(e) => {
            bot.send_message(msg.chat.id, format!("Failed to create project: {e}")).await?;
        }
    }
    dialogue.exit().await?;
    Ok(())
}

async fn cmd_status(bot: Bot, msg: Message, state: ChatState) -> HandlerResult {
    if !authorised(&state, msg.chat.id) {
        return Ok(());
    }
    let projects = state.store.get_projects().await;
    let lines: Vec<String> = projects
        .iter()
        .map(|p| format!("*{}*: {:?} (iteration {})", p.id, p.status, p.iteration))
        .collect();
    let body = if lines.is_empty() { "No projects yet.".to_string() } else { lines.join("\n") };
    bot.send_message(msg.chat.id, body).await?;
    Ok(())
}

async fn cmd_current(bot: Bot, msg: Message, state: ChatState) -> HandlerResult {
    if !authorised(&state, msg.chat.id) {
        return Ok(());
    }
    let running: Vec<Project> = state
        .store
        .get_projects()
        .await
        .into_iter()
        .filter(|p| p.status == crate::models::ProjectStatus::Running)
        .collect();

    let body = match running.first() {
        Some(p) => match p.plan.active_stage().and_then(crate::models::active_story) {
            Some(story) => format!("{}: {}", p.id, story.title),
            None => format!("{}: no active story", p.id),
        },
        None => "No project is currently running.".to_string(),
    };
    bot.send_message(msg.chat.id, body).await?;
    Ok(())
}

async fn cmd_projects(bot: Bot, msg: Message, state: ChatState) -> HandlerResult {
    if !authorised(&state, msg.chat.id) {
        return Ok(());
    }
    let names: Vec<String> = state.store.get_projects().await.into_iter().map(|p| p.id).collect();
    let body = if names.is_empty() { "No projects yet.".to_string() } else { names.join("\n") };
    bot.send_message(msg.chat.id, body).await?;
    Ok(())
}

async fn cmd_help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string()).await?;
    Ok(())
}

/// Render an approval request with approve/reject inline buttons, routed
/// back through `handle_approval_callback` into the Approval Oracle.
pub async fn send_approval_request(bot: &Bot, chat_id: ChatId, stage: &str, task: &str) -> HandlerResult {
    let keyboard = InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("Approve", "approve"),
        InlineKeyboardButton::callback("Reject", "reject"),
    ]]);
    bot.send_message(chat_id, format!("Approve *{stage}* / *{task}*?"))
        .reply_markup(keyboard)
        .await?;
    Ok(())
}

async fn handle_approval_callback(bot: Bot, query: CallbackQuery, state: ChatState) -> HandlerResult {
    let Some(chat) = query.message.as_ref().map(|m| m.chat().id) else {
        return Ok(());
    };
    if !authorised(&state, chat) {
        return Ok(());
    }
    let decision = match query.data.as_deref() {
        Some("approve") => true,
        Some("reject") => false,
        _ => {
            warn!("unrecognised callback data: {:?}", query.data);
            return Ok(());
        }
    };
    state.approval.resolve(decision).await;
    bot.answer_callback_query(query.id)
        .text(if decision { "Approved" } else { "Rejected" })
        .await?;
    info!("approval callback resolved: {decision}");
    Ok(())
}
