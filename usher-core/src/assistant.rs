//! Assistant catalog.
//!
//! Interprets the raw configuration entries into validated descriptors with
//! a resolved protocol variant. Built once at startup; everything downstream
//! dispatches on [`Protocol`] instead of re-reading config strings.

use anyhow::bail;
use usher_common::AssistantEntry;

/// Model used when a response-chaining entry does not name one.
const DEFAULT_MODEL: &str = "gpt-4.1-mini";
/// Persona used when a response-chaining entry has no instructions.
const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant.";

/// Upstream protocol variant an assistant talks through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    /// Thread/run protocol. `retrieval` marks a knowledge base attached
    /// upstream; such assistants can only run on this variant.
    Threads { retrieval: bool },
    /// Response-chaining protocol with a fixed persona, one round trip
    /// per turn.
    Responses { model: String, instructions: String },
}

/// One configured assistant, validated and ready for dispatch.
#[derive(Debug, Clone)]
pub struct Assistant {
    /// Upstream assistant identifier, also the catalog key.
    pub id: String,
    pub title: String,
    pub emoji: String,
    pub description: String,
    pub protocol: Protocol,
}

/// Lookup table over the configured assistants.
///
/// Lookups return `None` for unknown ids so callers can answer gracefully;
/// stale picker buttons outlive catalog changes.
pub struct AssistantCatalog {
    assistants: Vec<Assistant>,
}

impl AssistantCatalog {
    /// Build the catalog from config entries, validating each one.
    pub fn from_entries(entries: &[AssistantEntry]) -> anyhow::Result<Self> {
        let mut assistants: Vec<Assistant> = Vec::with_capacity(entries.len());

        for entry in entries {
            if assistants.iter().any(|a| a.id == entry.id) {
                bail!("Duplicate assistant id: {}", entry.id);
            }

            let protocol = match entry.protocol.as_str() {
                "threads" => Protocol::Threads {
                    retrieval: entry.retrieval,
                },
                // Retrieval is only available on the thread protocol, so a
                // retrieval-flagged entry runs there whatever it asked for.
                "responses" if entry.retrieval => Protocol::Threads { retrieval: true },
                "responses" => Protocol::Responses {
                    model: entry
                        .model
                        .clone()
                        .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                    instructions: entry
                        .instructions
                        .clone()
                        .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
                },
                other => bail!("Assistant {}: unknown protocol {:?}", entry.id, other),
            };

            assistants.push(Assistant {
                id: entry.id.clone(),
                title: entry.title.clone(),
                emoji: entry.emoji.clone(),
                description: entry.description.clone(),
                protocol,
            });
        }

        Ok(Self { assistants })
    }

    /// Look up an assistant by id.
    pub fn get(&self, id: &str) -> Option<&Assistant> {
        self.assistants.iter().find(|a| a.id == id)
    }

    /// All assistants in configuration order, for picker display.
    pub fn all(&self) -> &[Assistant] {
        &self.assistants
    }
}
