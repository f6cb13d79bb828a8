//! Telegram Bot API client.
//!
//! Thin `reqwest` wrapper over the handful of Bot API methods the bot
//! needs, plus the update parsing that turns raw `getUpdates` JSON into
//! typed events. The membership oracle for the access gate lives here too,
//! backed by `getChatMember`.

use async_trait::async_trait;
use serde_json::Value;
use usher_core::{MemberStatus, MembershipOracle};

/// Seconds the `getUpdates` long poll holds the connection open.
const LONG_POLL_SECS: u32 = 30;

// ============================================================================
// Events
// ============================================================================

/// One incoming update, already narrowed to what the bot handles.
#[derive(Debug, Clone)]
pub enum Event {
    Message(IncomingMessage),
    Callback(CallbackQuery),
}

/// A message sent to the bot.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub user_id: i64,
    /// Whether the message arrived in a private chat.
    pub private: bool,
    /// Sent on behalf of a channel or group, so there is no real user
    /// to check membership for.
    pub from_channel: bool,
    pub kind: MessageKind,
}

/// Payload of an incoming message.
#[derive(Debug, Clone)]
pub enum MessageKind {
    Text(String),
    Photo {
        file_id: String,
        file_size: u64,
    },
    Document {
        file_id: String,
        file_name: String,
        file_size: u64,
    },
    /// Stickers, voice notes and other content the bot does not take.
    Other,
}

/// An inline keyboard button press.
#[derive(Debug, Clone)]
pub struct CallbackQuery {
    pub id: String,
    pub user_id: i64,
    pub chat_id: i64,
    pub data: String,
}

/// One inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Telegram Bot API client.
pub struct TelegramClient {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot_token: bot_token.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "https://api.telegram.org/file/bot{}/{}",
            self.bot_token, file_path
        )
    }

    /// Long-poll one batch of updates starting at `offset`.
    pub async fn get_updates(&self, offset: i64) -> anyhow::Result<Vec<Value>> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": LONG_POLL_SECS,
            "allowed_updates": ["message", "callback_query"],
        });

        let resp = self
            .client
            .post(self.api_url("getUpdates"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram getUpdates failed: {err}");
        }

        let data: Value = resp.json().await?;
        let updates = data
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(updates)
    }

    /// Send an HTML-formatted message, optionally with an inline keyboard.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&[Vec<InlineButton>]>,
    ) -> anyhow::Result<()> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(buttons) = keyboard {
            body["reply_markup"] = keyboard_markup(buttons);
        }

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendMessage failed: {err}");
        }

        tracing::debug!(chat_id, "Message sent");
        Ok(())
    }

    /// Show a chat action ("typing", "upload_photo") while a turn runs.
    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "action": action,
        });

        let resp = self
            .client
            .post(self.api_url("sendChatAction"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendChatAction failed: {err}");
        }
        Ok(())
    }

    /// Answer a callback query, clearing the button's loading spinner.
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> anyhow::Result<()> {
        let mut body = serde_json::json!({
            "callback_query_id": callback_query_id,
            "show_alert": show_alert,
        });
        if let Some(t) = text {
            body["text"] = Value::String(t.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("answerCallbackQuery"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram answerCallbackQuery failed: {err}");
        }

        tracing::debug!("Answered callback query {callback_query_id}");
        Ok(())
    }

    /// Download a file by id via `getFile` and the file endpoint.
    pub async fn download_file(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
        let resp = self
            .client
            .post(self.api_url("getFile"))
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram getFile failed: {err}");
        }

        let data: Value = resp.json().await?;
        let file_path = data
            .get("result")
            .and_then(|r| r.get("file_path"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("getFile response missing file_path"))?;

        let resp = self.client.get(self.file_url(file_path)).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("Telegram file download failed with {}", resp.status());
        }

        Ok(resp.bytes().await?.to_vec())
    }

    /// Membership status string of `user_id` in `chat_id`.
    pub async fn chat_member_status(&self, chat_id: i64, user_id: i64) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "user_id": user_id,
        });

        let resp = self
            .client
            .post(self.api_url("getChatMember"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram getChatMember failed: {err}");
        }

        let data: Value = resp.json().await?;
        let status = data
            .get("result")
            .and_then(|r| r.get("status"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("getChatMember response missing status"))?;
        Ok(status.to_string())
    }
}

fn keyboard_markup(buttons: &[Vec<InlineButton>]) -> Value {
    let rows: Vec<Vec<Value>> = buttons
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| {
                    serde_json::json!({
                        "text": button.text,
                        "callback_data": button.callback_data,
                    })
                })
                .collect()
        })
        .collect();
    serde_json::json!({ "inline_keyboard": rows })
}

// ============================================================================
// Update parsing
// ============================================================================

/// Parse one `getUpdates` entry into an event, if it is one the bot handles.
pub fn parse_update(update: &Value) -> Option<Event> {
    if let Some(message) = update.get("message") {
        return parse_message(message);
    }
    if let Some(callback) = update.get("callback_query") {
        return parse_callback(callback);
    }
    None
}

fn parse_message(message: &Value) -> Option<Event> {
    let chat = message.get("chat")?;
    let chat_id = chat.get("id")?.as_i64()?;
    let private = chat.get("type")?.as_str()? == "private";
    let user_id = message.get("from")?.get("id")?.as_i64()?;
    let from_channel = message.get("sender_chat").is_some();

    Some(Event::Message(IncomingMessage {
        chat_id,
        user_id,
        private,
        from_channel,
        kind: message_kind(message),
    }))
}

fn message_kind(message: &Value) -> MessageKind {
    if let Some(text) = message.get("text").and_then(Value::as_str) {
        return MessageKind::Text(text.to_string());
    }

    // Photo sizes come smallest first; take the largest rendition.
    if let Some(largest) = message
        .get("photo")
        .and_then(Value::as_array)
        .and_then(|sizes| sizes.last())
    {
        if let Some(file_id) = largest.get("file_id").and_then(Value::as_str) {
            return MessageKind::Photo {
                file_id: file_id.to_string(),
                file_size: largest.get("file_size").and_then(Value::as_u64).unwrap_or(0),
            };
        }
    }

    if let Some(document) = message.get("document") {
        if let Some(file_id) = document.get("file_id").and_then(Value::as_str) {
            return MessageKind::Document {
                file_id: file_id.to_string(),
                file_name: document
                    .get("file_name")
                    .and_then(Value::as_str)
                    .unwrap_or("file.bin")
                    .to_string(),
                file_size: document
                    .get("file_size")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            };
        }
    }

    MessageKind::Other
}

fn parse_callback(callback: &Value) -> Option<Event> {
    let id = callback.get("id")?.as_str()?.to_string();
    let data = callback.get("data")?.as_str()?.to_string();
    let user_id = callback.get("from")?.get("id")?.as_i64()?;

    // The originating message may be gone; in private chats the user id
    // doubles as the chat id.
    let chat_id = callback
        .get("message")
        .and_then(|m| m.get("chat"))
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)
        .unwrap_or(user_id);

    Some(Event::Callback(CallbackQuery {
        id,
        user_id,
        chat_id,
        data,
    }))
}

/// Escape text for Telegram's HTML parse mode.
pub fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ============================================================================
// Membership oracle
// ============================================================================

/// Membership lookups for the access gate, backed by `getChatMember`.
pub struct TelegramOracle {
    client: std::sync::Arc<TelegramClient>,
}

impl TelegramOracle {
    pub fn new(client: std::sync::Arc<TelegramClient>) -> Self {
        Self { client }
    }
}

fn member_status_of(status: &str) -> MemberStatus {
    match status {
        "creator" => MemberStatus::Owner,
        "administrator" => MemberStatus::Administrator,
        "member" => MemberStatus::Member,
        _ => MemberStatus::Outside,
    }
}

#[async_trait]
impl MembershipOracle for TelegramOracle {
    async fn member_status(&self, group_id: i64, user_id: i64) -> anyhow::Result<MemberStatus> {
        let status = self.client.chat_member_status(group_id, user_id).await?;
        Ok(member_status_of(&status))
    }
}
