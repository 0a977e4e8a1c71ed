//! Prompt assembly.

use super::Message;
use crate::model::{Candidate, SYSTEM_PROMPT};

/// Trim `text` and cut it to at most `max` characters, appending `...` when
/// anything was removed. Counts `char`s, so multi-byte text is never split.
pub fn truncate_chars(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// The single user turn: candidate descriptions as a JSON string list,
/// followed by the question.
///
/// Candidates without a text description are skipped.
pub fn build_user_message(question: &str, candidates: &[Candidate], max_candidate_chars: usize) -> String {
    let descriptions: Vec<String> = candidates
        .iter()
        .filter_map(Candidate::text)
        .map(|text| truncate_chars(text, max_candidate_chars))
        .collect();
    let list = serde_json::to_string(&descriptions).unwrap_or_else(|_| "[]".to_string());
    format!("Course list: {list}\nUser question: {question}")
}

/// System instruction followed by the assembled user turn.
pub fn build_messages(question: &str, candidates: &[Candidate], max_candidate_chars: usize) -> Vec<Message> {
    vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(build_user_message(question, candidates, max_candidate_chars)),
    ]
}
