//! Business logic behind the HTTP handlers.
//!
//! - [`prompt_manager`]: cached prompt lookup and system prompt assembly
//! - [`knowledge`]: full-text, semantic and hybrid knowledge base search
//! - [`chat`]: guarded conversations with the language model
//! - [`nudges`]: short motivational messages for users in recovery

pub mod chat;
pub mod knowledge;
pub mod nudges;
pub mod prompt_manager;

/// The first `max` characters of `text`.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// `text` cut to `max` characters with `...` appended when anything was cut.
pub(crate) fn excerpt(text: &str, max: usize) -> String {
    let truncated = truncate_chars(text, max);
    if truncated.len() < text.len() {
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}
