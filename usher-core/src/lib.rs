//! Usher Core - session orchestration for the assistant gateway.
//!
//! This crate provides:
//! - An assistant catalog with per-assistant protocol dispatch
//! - A durable session directory per (user, assistant) pair
//! - Conversation orchestration over both upstream protocols
//! - Daily request quotas with a warning band
//! - Group-membership access gating
//! - Leftover-run reconciliation and bounded polling
//! - Read-only transcript reconstruction

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod assistant;
pub mod directory;
pub mod error;
pub mod gate;
pub mod history;
pub mod orchestrator;
pub mod poll;
pub mod provider;
pub mod quota;
pub mod reconcile;
pub mod selection;
pub mod store;

pub use assistant::{Assistant, AssistantCatalog, Protocol};
pub use directory::{SessionDirectory, SessionKind};
pub use error::{Error, Result};
pub use gate::{AccessGate, MemberStatus, MembershipOracle};
pub use history::{HistoryEntry, HistoryReader};
pub use orchestrator::{Orchestrator, TurnBudgets, TurnInput, TurnReply, EMPTY_REPLY};
pub use poll::{poll_until, PollBudget, PollOutcome};
pub use provider::{OpenAiClient, Provider, ProviderError};
pub use quota::{QuotaTracker, QuotaVerdict};
pub use reconcile::RunReconciler;
pub use selection::SelectionStore;
pub use store::Store;
