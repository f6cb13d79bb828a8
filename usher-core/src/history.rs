//! Read-only transcript reconstruction.
//!
//! Rebuilds a bounded recent transcript for a `(user, assistant)` pair from
//! upstream state. Thread sessions are a straight message listing; response
//! sessions are recovered by walking the chain of previous-response ids
//! backward from the stored pointer. Never mutates anything.

use crate::assistant::{AssistantCatalog, Protocol};
use crate::directory::SessionDirectory;
use crate::error::{Error, Result};
use crate::provider::Provider;
use std::sync::Arc;

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// "user" or "assistant".
    pub role: String,
    pub text: String,
}

/// Rebuilds recent conversation transcripts.
pub struct HistoryReader {
    catalog: Arc<AssistantCatalog>,
    provider: Arc<dyn Provider>,
    directory: Arc<SessionDirectory>,
}

impl HistoryReader {
    pub fn new(
        catalog: Arc<AssistantCatalog>,
        provider: Arc<dyn Provider>,
        directory: Arc<SessionDirectory>,
    ) -> Self {
        Self {
            catalog,
            provider,
            directory,
        }
    }

    /// Recent transcript for the pair, oldest first.
    ///
    /// `limit` bounds how much is fetched: the most recent `limit` messages
    /// on a thread session, or the most recent `limit` exchanges on a
    /// response session. A pair with no session yields an empty transcript.
    pub async fn history(
        &self,
        user_id: i64,
        assistant_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let assistant = self
            .catalog
            .get(assistant_id)
            .ok_or_else(|| Error::UnknownAssistant(assistant_id.to_string()))?;

        match assistant.protocol {
            Protocol::Threads { .. } => self.thread_history(user_id, &assistant.id, limit).await,
            Protocol::Responses { .. } => self.response_history(user_id, &assistant.id, limit).await,
        }
    }

    async fn thread_history(
        &self,
        user_id: i64,
        assistant_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let Some(thread_id) = self.directory.thread_id(user_id, assistant_id).await? else {
            return Ok(Vec::new());
        };

        let messages = self.provider.list_messages(&thread_id, limit as u32).await?;

        // The listing is newest first; flip to reading order.
        let mut entries: Vec<HistoryEntry> = messages
            .into_iter()
            .take(limit)
            .map(|m| HistoryEntry {
                role: m.role,
                text: m.text_parts.join("\n"),
            })
            .collect();
        entries.reverse();
        Ok(entries)
    }

    async fn response_history(
        &self,
        user_id: i64,
        assistant_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let Some(mut cursor) = self.directory.last_response_id(user_id, assistant_id).await? else {
            return Ok(Vec::new());
        };

        // Walk the chain newest to oldest, one exchange per response unit.
        // The limit bounds the walk, so a malformed chain cannot loop.
        let mut exchanges: Vec<Vec<HistoryEntry>> = Vec::new();
        loop {
            if exchanges.len() >= limit {
                break;
            }

            let unit = self.provider.retrieve_response(&cursor).await?;

            let mut exchange = Vec::new();
            for text in unit.input_texts {
                exchange.push(HistoryEntry {
                    role: "user".to_string(),
                    text,
                });
            }
            let output = unit.output_texts.join("\n");
            if !output.is_empty() {
                exchange.push(HistoryEntry {
                    role: "assistant".to_string(),
                    text: output,
                });
            }
            if !exchange.is_empty() {
                exchanges.push(exchange);
            }

            match unit.previous_response_id {
                Some(previous) => cursor = previous,
                None => break,
            }
        }

        let mut entries = Vec::new();
        for exchange in exchanges.into_iter().rev() {
            entries.extend(exchange);
        }
        Ok(entries)
    }
}
