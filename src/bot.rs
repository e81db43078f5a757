use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::config::{Config, Roster};
use crate::github::{DispatchOutcome, HistorySource, JobDispatcher, JobRef};
use crate::platform::{Messenger, Update};

const WELCOME: &str = "🎅 Welcome to the Secret Santa Bot!\n\n\
     This bot runs the automatic Secret Santa draw.\n\
     Commands are reserved to the organizer.\n\n\
     Want to reach the organizer? Just write a message here: it will be forwarded.";

const HELP_ORGANIZER: &str = "🎅 Organizer commands:\n\n\
     /start - Welcome message\n\
     /help - This list\n\
     /list - Show participants\n\
     /status - Last draw in the history\n\
     /broadcast <message> - Send a message to every participant\n\
     /hat - Start the Secret Santa draw";

const HELP_PARTICIPANT: &str = "🎅 Available commands:\n\n\
     /start - Welcome message\n\n\
     Any other message you write is forwarded to the organizer.";

const RESERVED: &str = "⛔ This command is reserved to the organizer.";
const NO_PARTICIPANTS: &str = "👥 No participants configured.";
const NO_HISTORY: &str = "📭 No draw in the history yet.";
const HISTORY_UNAVAILABLE: &str = "⚠️ Unable to read the draw history.";
const BROADCAST_USAGE: &str = "Usage: /broadcast <message>";
const HAT_NOT_CONFIGURED: &str =
    "⚙️ Draw configuration incomplete: repository, workflow and token are required.";
const HAT_STARTED: &str = "🎩 Secret Santa draw started!";
const HAT_REJECTED: &str = "❌ Failed to start the draw.";
const HAT_INTERNAL_ERROR: &str = "⚠️ Internal error while starting the draw.";

/// The history job never keeps more than this many records.
const HISTORY_CAP: usize = 3;

/// Texts starting with these are organizer-only.
const ORGANIZER_PREFIXES: [&str; 4] = ["/hat", "/broadcast", "/status", "/list"];

/// Shared application state: configuration plus the outbound collaborators.
pub struct AppState {
    pub config: Config,
    messenger: Arc<dyn Messenger>,
    dispatcher: Arc<dyn JobDispatcher>,
    history: Arc<dyn HistorySource>,
}

impl AppState {
    pub fn new(
        config: Config,
        messenger: Arc<dyn Messenger>,
        dispatcher: Arc<dyn JobDispatcher>,
        history: Arc<dyn HistorySource>,
    ) -> Self {
        Self {
            config,
            messenger,
            dispatcher,
            history,
        }
    }

    /// Best-effort reply; failures are logged and swallowed.
    async fn reply(&self, chat_id: &str, text: &str) {
        if let Err(e) = self.messenger.send_text(chat_id, text).await {
            error!("Failed to reply to chat {}: {:#}", chat_id, e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Organizer,
    Participant,
}

impl Role {
    pub fn of(update: &Update, config: &Config) -> Self {
        match config.admin_chat_id() {
            Some(admin) if admin == update.chat_id => Role::Organizer,
            _ => Role::Participant,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Start,
    Help,
    List,
    Status,
    /// Trimmed text after the keyword, possibly empty
    Broadcast(&'a str),
    Hat,
}

impl<'a> Command<'a> {
    /// Parse the leading keyword. `/cmd@botname` is accepted as `/cmd`.
    pub fn parse(text: &'a str) -> Option<Self> {
        let text = text.trim();
        let (head, rest) = match text.find(char::is_whitespace) {
            Some(pos) => (&text[..pos], text[pos..].trim()),
            None => (text, ""),
        };
        let keyword = head.split('@').next().unwrap_or(head);

        match keyword {
            "/start" => Some(Command::Start),
            "/help" => Some(Command::Help),
            "/list" => Some(Command::List),
            "/status" => Some(Command::Status),
            "/broadcast" => Some(Command::Broadcast(rest)),
            "/hat" => Some(Command::Hat),
            _ => None,
        }
    }
}

fn is_organizer_command(text: &str) -> bool {
    ORGANIZER_PREFIXES.iter().any(|p| text.starts_with(p))
}

/// Handle one validated update. Never fails: collaborator errors are
/// logged and turned into chat replies.
pub async fn route(state: &AppState, update: &Update) -> Role {
    let role = Role::of(update, &state.config);
    let chat_id = update.chat_id.as_str();

    info!(
        "Message from {} ({}, {:?}): {}",
        update.sender_name, chat_id, role, update.text
    );

    if role == Role::Participant {
        if let Some(admin) = state.config.admin_chat_id() {
            forward_to_admin(state, admin, update).await;
        }
    }

    let command = Command::parse(&update.text);

    match command {
        Some(Command::Start) => {
            state.reply(chat_id, WELCOME).await;
            return role;
        }
        Some(Command::Help) => {
            let help = match role {
                Role::Organizer => HELP_ORGANIZER,
                Role::Participant => HELP_PARTICIPANT,
            };
            state.reply(chat_id, help).await;
            return role;
        }
        _ => {}
    }

    if role == Role::Participant {
        if is_organizer_command(&update.text) {
            info!("Denied organizer command from chat {}", chat_id);
            state.reply(chat_id, RESERVED).await;
        }
        return role;
    }

    match command {
        Some(Command::List) => handle_list(state, chat_id).await,
        Some(Command::Status) => handle_status(state, chat_id).await,
        Some(Command::Broadcast(payload)) => handle_broadcast(state, chat_id, payload).await,
        Some(Command::Hat) => handle_hat(state, chat_id).await,
        Some(Command::Start) | Some(Command::Help) | None => {}
    }

    role
}

async fn forward_to_admin(state: &AppState, admin: &str, update: &Update) {
    let notice = format!(
        "📩 New message to the bot\n\
         👤 From: {}\n\
         🆔 Chat ID: {}\n\n\
         💬 Message:\n{}",
        update.sender_name, update.chat_id, update.text
    );
    if let Err(e) = state.messenger.send_text(admin, &notice).await {
        error!("Failed to forward message to organizer: {:#}", e);
    }
}

fn format_roster(roster: &Roster) -> String {
    let mut list = String::from("👥 Participants\n\n");
    for participant in roster.iter() {
        list.push_str(&format!(
            "• {} ({})\n",
            participant.name, participant.chat_id
        ));
    }
    list.trim_end().to_string()
}

async fn handle_list(state: &AppState, chat_id: &str) {
    let roster = &state.config.participants;
    if roster.is_empty() {
        state.reply(chat_id, NO_PARTICIPANTS).await;
    } else {
        state.reply(chat_id, &format_roster(roster)).await;
    }
}

async fn handle_status(state: &AppState, chat_id: &str) {
    let history = match state.history.latest().await {
        Ok(history) => history,
        Err(e) => {
            warn!("Could not read draw history: {:#}", e);
            state.reply(chat_id, HISTORY_UNAVAILABLE).await;
            return;
        }
    };

    let Some(last) = history.first() else {
        state.reply(chat_id, NO_HISTORY).await;
        return;
    };

    let mut status = format!("📅 Last draw\n🕒 Date: {}\n", last.date);
    if let Some(control) = &last.control_number {
        status.push_str(&format!("🔐 Control number: {}\n", control));
    }
    status.push_str(&format!(
        "📚 Draws in history: {} (max {})",
        history.len(),
        HISTORY_CAP
    ));

    state.reply(chat_id, &status).await;
}

/// Delivery result for one roster entry.
#[derive(Debug)]
pub struct RecipientOutcome {
    pub name: String,
    pub result: Result<()>,
}

/// Send `text` to every participant in roster order. At most
/// `concurrency` sends are in flight; one failure never stops the others.
pub async fn broadcast(
    messenger: &dyn Messenger,
    roster: &Roster,
    text: &str,
    concurrency: usize,
) -> Vec<RecipientOutcome> {
    stream::iter(roster.iter())
        .map(|participant| async move {
            let result = messenger.send_text(&participant.chat_id, text).await;
            if let Err(e) = &result {
                warn!(
                    "Broadcast to {} ({}) failed: {:#}",
                    participant.name, participant.chat_id, e
                );
            }
            RecipientOutcome {
                name: participant.name.clone(),
                result,
            }
        })
        .boxed()
        .buffered(concurrency.max(1))
        .collect()
        .await
}

fn broadcast_summary(outcomes: &[RecipientOutcome]) -> String {
    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| o.result.is_err())
        .map(|o| o.name.as_str())
        .collect();

    let mut summary = format!(
        "📨 Broadcast sent to {}/{} participants.",
        outcomes.len() - failed.len(),
        outcomes.len()
    );
    if !failed.is_empty() {
        summary.push_str(&format!("\n⚠️ Not delivered: {}", failed.join(", ")));
    }
    summary
}

async fn handle_broadcast(state: &AppState, chat_id: &str, payload: &str) {
    if payload.is_empty() {
        state.reply(chat_id, BROADCAST_USAGE).await;
        return;
    }

    let text = format!("📢 Message from the organizer:\n\n{}", payload);
    let outcomes = broadcast(
        state.messenger.as_ref(),
        &state.config.participants,
        &text,
        state.config.broadcast.concurrency,
    )
    .await;

    info!(
        "Broadcast finished: {} recipient(s), {} failed",
        outcomes.len(),
        outcomes.iter().filter(|o| o.result.is_err()).count()
    );

    state.reply(chat_id, &broadcast_summary(&outcomes)).await;
}

async fn handle_hat(state: &AppState, chat_id: &str) {
    let Some(job) = JobRef::from_config(&state.config.github) else {
        warn!("/hat requested but GitHub repo, workflow or token is missing");
        state.reply(chat_id, HAT_NOT_CONFIGURED).await;
        return;
    };

    let reply = match state.dispatcher.dispatch(&job).await {
        DispatchOutcome::Accepted => {
            info!("Draw workflow {} dispatched on {}", job.workflow, job.git_ref);
            HAT_STARTED
        }
        DispatchOutcome::Rejected { status, body } => {
            error!("Workflow dispatch rejected ({}): {}", status, body);
            HAT_REJECTED
        }
        DispatchOutcome::Failed(e) => {
            error!("Workflow dispatch failed: {:#}", e);
            HAT_INTERNAL_ERROR
        }
    };

    state.reply(chat_id, reply).await;
}
