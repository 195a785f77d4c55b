//! Deterministic identifiers for direct conversations

use crate::error::{ChatError, Result};

/// Separator placed between the two sorted participant ids
pub const CONVERSATION_ID_SEPARATOR: &str = "_";

/// Derive the id of the direct conversation between two users.
///
/// The ids are sorted lexicographically before joining, so the result does
/// not depend on which participant opens the conversation.
pub fn derive_conversation_id(a: &str, b: &str) -> Result<String> {
    let a = require_id(a, "first participant id")?;
    let b = require_id(b, "second participant id")?;
    if a == b {
        return Err(ChatError::invalid(format!(
            "a direct conversation needs two distinct participants, got '{}' twice",
            a
        )));
    }

    let (first, second) = if a < b { (a, b) } else { (b, a) };
    Ok(format!("{}{}{}", first, CONVERSATION_ID_SEPARATOR, second))
}

/// Reject empty or whitespace-only identifiers
pub(crate) fn require_id<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(ChatError::invalid(format!("{} must not be empty", what)));
    }
    Ok(value)
}
