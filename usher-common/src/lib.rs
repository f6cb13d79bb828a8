//! Usher Common - shared configuration and logging for the usher services.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Logging setup with noise filtering

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;

pub use config::{
    AssistantEntry, Config, LimitsConfig, ObservabilityConfig, OpenAiConfig, StorageConfig,
    TelegramConfig, TimeoutsConfig,
};
pub use logging::init_logging;
