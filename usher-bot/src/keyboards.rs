//! Inline keyboard layouts.
//!
//! Two layouts cover the whole bot: the picker (one row per assistant) and
//! the header shown under replies, naming the active assistant with a
//! switch row beneath it.

use crate::telegram::InlineButton;
use usher_core::Assistant;

/// Callback payload that re-opens the picker.
pub const CALLBACK_PICK: &str = "pick";
/// Callback payload for inert rows; acknowledged and ignored.
pub const CALLBACK_NOOP: &str = "noop";
/// Prefix of assistant selection payloads.
pub const CALLBACK_USE_PREFIX: &str = "use:";

/// Selection payload for `assistant_id`.
pub fn use_callback(assistant_id: &str) -> String {
    format!("{CALLBACK_USE_PREFIX}{assistant_id}")
}

/// Assistant id carried by a selection payload, if it is one.
pub fn parse_use_callback(data: &str) -> Option<&str> {
    data.strip_prefix(CALLBACK_USE_PREFIX)
}

/// Picker keyboard: one full-width button per assistant.
pub fn assistant_picker(assistants: &[Assistant]) -> Vec<Vec<InlineButton>> {
    assistants
        .iter()
        .map(|assistant| {
            vec![InlineButton::new(
                format!("{} {}", assistant.emoji, assistant.title),
                use_callback(&assistant.id),
            )]
        })
        .collect()
}

/// Header keyboard under replies: the active assistant plus a switch row.
pub fn active_assistant(assistant: &Assistant) -> Vec<Vec<InlineButton>> {
    vec![
        vec![InlineButton::new(
            format!("🟢 Assistant: {} {}", assistant.emoji, assistant.title),
            CALLBACK_NOOP,
        )],
        vec![InlineButton::new("🔄 Switch assistant", CALLBACK_PICK)],
    ]
}
