//! Usher bot - Telegram front end for the assistant gateway.
//!
//! This crate owns everything user-facing:
//! - Long-poll update dispatch, one spawned task per update
//! - Commands, callbacks, and the text/file message flows
//! - Inline keyboards for assistant selection
//! - Group-membership checks backing the core's access gate
//!
//! The conversation logic itself lives in `usher-core`; this crate only
//! adapts Telegram traffic onto it.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod handlers;
pub mod keyboards;
pub mod telegram;

pub use handlers::BotHandlers;
pub use telegram::{TelegramClient, TelegramOracle};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use usher_common::config::Config;
use usher_core::{
    AccessGate, AssistantCatalog, OpenAiClient, Orchestrator, PollBudget, Provider, QuotaTracker,
    RunReconciler, SelectionStore, SessionDirectory, Store, TurnBudgets,
};

/// Wire every component and run the dispatch loop until ctrl-c.
pub async fn start_bot(config: &Config) -> anyhow::Result<()> {
    config.validate()?;

    let store = Store::open(config.storage.db_path.clone())?;
    let catalog = Arc::new(AssistantCatalog::from_entries(&config.assistants)?);
    let provider: Arc<dyn Provider> = Arc::new(OpenAiClient::with_base_url(
        &config.openai.api_key,
        &config.openai.base_url,
    ));

    let directory = Arc::new(SessionDirectory::new(store.clone(), provider.clone())?);
    let quota = Arc::new(QuotaTracker::new(
        store.clone(),
        config.limits.daily_requests,
        config.limits.warning_threshold,
    )?);
    let selection = Arc::new(SelectionStore::new(store)?);

    let telegram = Arc::new(TelegramClient::new(&config.telegram.bot_token));
    let oracle = Arc::new(TelegramOracle::new(telegram.clone()));
    let gate = Arc::new(AccessGate::new(oracle, config.telegram.group_id));

    let reconciler = RunReconciler::new(
        provider.clone(),
        PollBudget::new(
            config.timeouts.reconcile_attempts,
            Duration::from_millis(config.timeouts.poll_interval_ms),
        ),
    );
    let budgets = TurnBudgets {
        text: PollBudget::for_duration(config.timeouts.run_seconds, config.timeouts.poll_interval_ms),
        file: PollBudget::for_duration(config.timeouts.file_seconds, config.timeouts.poll_interval_ms),
    };
    let orchestrator = Arc::new(Orchestrator::new(
        catalog.clone(),
        provider,
        directory.clone(),
        reconciler,
        budgets,
    ));

    let assistant_count = catalog.all().len();
    let handlers = Arc::new(BotHandlers::new(
        telegram.clone(),
        catalog,
        orchestrator,
        quota,
        gate,
        selection,
        directory,
        config.limits.daily_requests,
        config.limits.max_file_bytes,
    ));

    tracing::info!(assistants = assistant_count, "Bot is up, polling for updates");

    run_dispatch_loop(&telegram, &handlers).await
}

async fn run_dispatch_loop(
    telegram: &Arc<TelegramClient>,
    handlers: &Arc<BotHandlers>,
) -> anyhow::Result<()> {
    let mut offset: i64 = 0;

    loop {
        let updates: Vec<Value> = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                return Ok(());
            }
            batch = telegram.get_updates(offset) => match batch {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            },
        };

        for update in updates {
            if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                offset = offset.max(update_id + 1);
            }

            // One task per update so a slow turn never blocks other users.
            let handlers = handlers.clone();
            tokio::spawn(async move {
                handlers.handle_update(update).await;
            });
        }
    }
}
