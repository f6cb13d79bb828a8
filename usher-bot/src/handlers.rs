//! Update handling: commands, callbacks, and the two message flows.
//!
//! Every private-chat message walks the same admission sequence before any
//! upstream work: membership gate, stored selection, catalog validation,
//! file-size cap, then the daily quota. Only an admitted request is charged,
//! and it is charged exactly once, before the turn runs.

use crate::keyboards;
use crate::telegram::{
    html_escape, CallbackQuery, Event, IncomingMessage, MessageKind, TelegramClient,
};
use serde_json::Value;
use std::sync::Arc;
use usher_core::{
    AccessGate, AssistantCatalog, Error, Orchestrator, Protocol, QuotaTracker, SelectionStore,
    SessionDirectory, TurnInput,
};

const GREETING: &str = "Hi! 👋\n\nChoose an assistant:";
const PICK_PROMPT: &str = "Choose an assistant:";
const PICK_FIRST: &str = "Please choose an assistant first:";
const STALE_SELECTION: &str = "That assistant is no longer available. Choose another:";
const ACCESS_DENIED: &str = "❌ This assistant is available to group members only.";
const CALLBACK_DENIED: &str = "❌ Group members only";
const UNKNOWN_ASSISTANT: &str = "❌ Unknown assistant";
const UNSUPPORTED: &str = "I can work with text, photos and documents.";
const RESET_DONE: &str = "♻️ Conversation cleared. Your next message starts fresh.";
const RESET_KEEPS_THREAD: &str =
    "💬 This assistant keeps its conversation history. Just keep writing.";
const TIMEOUT_NOTICE: &str = "⏳ The assistant is taking too long. Please try again in a minute.";
const TURN_FAILED: &str = "⚠️ Could not reach the assistant. Please try again.";
const FILE_FAILED: &str = "⚠️ Could not process the file. Please try again.";

fn limit_notice(limit: u32) -> String {
    format!(
        "⛔ You have reached the limit of {limit} requests for today.\n\
         It resets at midnight. Try again tomorrow!"
    )
}

fn file_too_big(max_bytes: u64) -> String {
    format!(
        "📦 The file is too large. The limit is {} MB.",
        max_bytes / (1024 * 1024)
    )
}

/// Bot commands; anything unrecognized flows to the assistant as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Reset,
}

/// Recognize a command, tolerating the `/cmd@botname` form.
fn command_of(text: &str) -> Option<Command> {
    let first = text.split_whitespace().next()?;
    let name = first.split('@').next().unwrap_or(first);
    match name {
        "/start" => Some(Command::Start),
        "/reset" => Some(Command::Reset),
        _ => None,
    }
}

/// Outcome of the admission sequence for one request.
#[derive(Debug, PartialEq, Eq)]
enum Admission {
    /// No assistant selected yet.
    NeedsSelection,
    /// The stored selection is gone from the catalog.
    StaleSelection,
    /// File larger than the cap; nothing was charged.
    Oversize,
    /// Daily ceiling reached; nothing was charged.
    OverLimit,
    /// Charged and cleared to run.
    Go {
        assistant_id: String,
        warning: Option<String>,
    },
}

/// Run the admission sequence.
///
/// The size cap is checked before the quota, so an oversized upload is
/// never charged. `Go` means the day's counter was already incremented.
async fn admit_request(
    selection: &SelectionStore,
    catalog: &AssistantCatalog,
    quota: &QuotaTracker,
    user_id: i64,
    file_size: Option<u64>,
    max_file_bytes: u64,
) -> usher_core::Result<Admission> {
    let Some(assistant_id) = selection.selected(user_id).await? else {
        return Ok(Admission::NeedsSelection);
    };
    if catalog.get(&assistant_id).is_none() {
        return Ok(Admission::StaleSelection);
    }
    if let Some(size) = file_size {
        if size > max_file_bytes {
            return Ok(Admission::Oversize);
        }
    }

    let today = QuotaTracker::today();
    let verdict = quota.check(user_id, today).await?;
    if !verdict.allowed {
        return Ok(Admission::OverLimit);
    }
    quota.increment(user_id, today).await?;

    Ok(Admission::Go {
        assistant_id,
        warning: verdict.warning,
    })
}

/// Fixed user-facing text for a failed turn; detail goes to the log only.
fn failure_notice(error: &Error, file_turn: bool) -> &'static str {
    match error {
        Error::Timeout => TIMEOUT_NOTICE,
        _ if file_turn => FILE_FAILED,
        _ => TURN_FAILED,
    }
}

/// A message payload after command routing.
enum Request {
    Text(String),
    File {
        file_id: String,
        filename: String,
        file_size: u64,
    },
}

/// All update handling, shared across the spawned per-update tasks.
pub struct BotHandlers {
    telegram: Arc<TelegramClient>,
    catalog: Arc<AssistantCatalog>,
    orchestrator: Arc<Orchestrator>,
    quota: Arc<QuotaTracker>,
    gate: Arc<AccessGate>,
    selection: Arc<SelectionStore>,
    directory: Arc<SessionDirectory>,
    daily_limit: u32,
    max_file_bytes: u64,
}

impl BotHandlers {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        telegram: Arc<TelegramClient>,
        catalog: Arc<AssistantCatalog>,
        orchestrator: Arc<Orchestrator>,
        quota: Arc<QuotaTracker>,
        gate: Arc<AccessGate>,
        selection: Arc<SelectionStore>,
        directory: Arc<SessionDirectory>,
        daily_limit: u32,
        max_file_bytes: u64,
    ) -> Self {
        Self {
            telegram,
            catalog,
            orchestrator,
            quota,
            gate,
            selection,
            directory,
            daily_limit,
            max_file_bytes,
        }
    }

    /// Entry point for one raw update.
    pub async fn handle_update(&self, update: Value) {
        let Some(event) = crate::telegram::parse_update(&update) else {
            return;
        };

        let outcome = match event {
            Event::Message(message) => self.handle_message(message).await,
            Event::Callback(query) => self.handle_callback(query).await,
        };
        if let Err(e) = outcome {
            tracing::error!(error = ?e, "Update handling failed");
        }
    }

    async fn handle_message(&self, message: IncomingMessage) -> anyhow::Result<()> {
        // Group chatter and channel-identity senders are ignored outright.
        if !message.private || message.from_channel {
            return Ok(());
        }
        if !self.gate.admit(message.user_id).await {
            return self
                .telegram
                .send_message(message.chat_id, ACCESS_DENIED, None)
                .await;
        }

        match message.kind {
            MessageKind::Text(text) => match command_of(&text) {
                Some(Command::Start) => self.handle_start(message.chat_id).await,
                Some(Command::Reset) => self.handle_reset(message.chat_id, message.user_id).await,
                None => {
                    self.handle_request(message.chat_id, message.user_id, Request::Text(text))
                        .await
                }
            },
            MessageKind::Photo { file_id, file_size } => {
                let request = Request::File {
                    file_id,
                    filename: "image.jpg".to_string(),
                    file_size,
                };
                self.handle_request(message.chat_id, message.user_id, request)
                    .await
            }
            MessageKind::Document {
                file_id,
                file_name,
                file_size,
            } => {
                let request = Request::File {
                    file_id,
                    filename: file_name,
                    file_size,
                };
                self.handle_request(message.chat_id, message.user_id, request)
                    .await
            }
            MessageKind::Other => {
                self.telegram
                    .send_message(message.chat_id, UNSUPPORTED, None)
                    .await
            }
        }
    }

    async fn handle_callback(&self, query: CallbackQuery) -> anyhow::Result<()> {
        if !self.gate.admit(query.user_id).await {
            return self
                .telegram
                .answer_callback_query(&query.id, Some(CALLBACK_DENIED), true)
                .await;
        }

        if let Some(assistant_id) = keyboards::parse_use_callback(&query.data) {
            return self.handle_use(&query, assistant_id).await;
        }

        match query.data.as_str() {
            keyboards::CALLBACK_PICK => {
                self.send_picker(query.chat_id, PICK_PROMPT).await?;
                self.telegram
                    .answer_callback_query(&query.id, None, false)
                    .await
            }
            // "noop" and any leftover payloads from older keyboards.
            _ => {
                self.telegram
                    .answer_callback_query(&query.id, None, false)
                    .await
            }
        }
    }

    async fn handle_use(&self, query: &CallbackQuery, assistant_id: &str) -> anyhow::Result<()> {
        let Some(assistant) = self.catalog.get(assistant_id) else {
            return self
                .telegram
                .answer_callback_query(&query.id, Some(UNKNOWN_ASSISTANT), true)
                .await;
        };

        self.selection.select(query.user_id, &assistant.id).await?;

        let mut text = format!(
            "🔄 You are now talking to {} <b>{}</b>",
            assistant.emoji,
            html_escape(&assistant.title)
        );
        if !assistant.description.is_empty() {
            text.push('\n');
            text.push_str(&html_escape(&assistant.description));
        }

        self.telegram
            .send_message(
                query.chat_id,
                &text,
                Some(&keyboards::active_assistant(assistant)),
            )
            .await?;
        self.telegram
            .answer_callback_query(&query.id, None, false)
            .await
    }

    async fn handle_start(&self, chat_id: i64) -> anyhow::Result<()> {
        self.send_picker(chat_id, GREETING).await
    }

    async fn handle_reset(&self, chat_id: i64, user_id: i64) -> anyhow::Result<()> {
        let Some(assistant_id) = self.selection.selected(user_id).await? else {
            return self.send_picker(chat_id, PICK_FIRST).await;
        };
        let Some(assistant) = self.catalog.get(&assistant_id) else {
            return self.send_picker(chat_id, STALE_SELECTION).await;
        };

        match assistant.protocol {
            Protocol::Responses { .. } => {
                self.directory.reset(user_id, &assistant.id).await?;
                self.telegram
                    .send_message(
                        chat_id,
                        RESET_DONE,
                        Some(&keyboards::active_assistant(assistant)),
                    )
                    .await
            }
            Protocol::Threads { .. } => {
                self.telegram
                    .send_message(
                        chat_id,
                        RESET_KEEPS_THREAD,
                        Some(&keyboards::active_assistant(assistant)),
                    )
                    .await
            }
        }
    }

    async fn handle_request(
        &self,
        chat_id: i64,
        user_id: i64,
        request: Request,
    ) -> anyhow::Result<()> {
        let file_size = match &request {
            Request::Text(_) => None,
            Request::File { file_size, .. } => Some(*file_size),
        };

        let admission = admit_request(
            &self.selection,
            &self.catalog,
            &self.quota,
            user_id,
            file_size,
            self.max_file_bytes,
        )
        .await?;

        let (assistant_id, warning) = match admission {
            Admission::NeedsSelection => return self.send_picker(chat_id, PICK_FIRST).await,
            Admission::StaleSelection => return self.send_picker(chat_id, STALE_SELECTION).await,
            Admission::Oversize => {
                return self
                    .telegram
                    .send_message(chat_id, &file_too_big(self.max_file_bytes), None)
                    .await;
            }
            Admission::OverLimit => {
                return self
                    .telegram
                    .send_message(chat_id, &limit_notice(self.daily_limit), None)
                    .await;
            }
            Admission::Go {
                assistant_id,
                warning,
            } => (assistant_id, warning),
        };

        let Some(assistant) = self.catalog.get(&assistant_id) else {
            return self.send_picker(chat_id, STALE_SELECTION).await;
        };

        let input = match request {
            Request::Text(text) => {
                self.chat_action(chat_id, "typing").await;
                TurnInput::Text(text)
            }
            Request::File {
                file_id, filename, ..
            } => {
                self.chat_action(chat_id, "upload_photo").await;
                let bytes = match self.telegram.download_file(&file_id).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::error!(user_id, error = %e, "File download failed");
                        return self.telegram.send_message(chat_id, FILE_FAILED, None).await;
                    }
                };
                TurnInput::File { filename, bytes }
            }
        };

        let file_turn = matches!(input, TurnInput::File { .. });
        match self.orchestrator.turn(user_id, &assistant.id, input).await {
            Ok(reply) => {
                let mut text = format!(
                    "{} <b>{}</b>:\n\n{}",
                    assistant.emoji,
                    html_escape(&assistant.title),
                    html_escape(&reply.text)
                );
                if let Some(warning) = warning {
                    text.push_str("\n\n");
                    text.push_str(&warning);
                }
                self.telegram
                    .send_message(chat_id, &text, Some(&keyboards::active_assistant(assistant)))
                    .await
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "Turn failed");
                self.telegram
                    .send_message(chat_id, failure_notice(&e, file_turn), None)
                    .await
            }
        }
    }

    async fn send_picker(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        self.telegram
            .send_message(
                chat_id,
                text,
                Some(&keyboards::assistant_picker(self.catalog.all())),
            )
            .await
    }

    /// Best effort; a missing chat action never blocks the turn.
    async fn chat_action(&self, chat_id: i64, action: &str) {
        if let Err(e) = self.telegram.send_chat_action(chat_id, action).await {
            tracing::debug!(error = %e, "Chat action failed");
        }
    }
}
