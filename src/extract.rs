//! Recovery of structured recommendations from free-form model replies.
//!
//! The model is instructed to write its reasoning, then [`SEP_TOKEN`], then a
//! JSON array. In practice the JSON arrives wrapped in code fences, preceded
//! by a sentence, followed by a closing remark, or as a bare object. The
//! extractor trims all of that away with a bracket heuristic:
//!
//! 1. split at the first delimiter
//! 2. drop everything before the first `[` or `{`
//! 3. drop everything after the last `]` or `}`
//! 4. decode what is left
//!
//! It assumes the JSON is contiguous after the first bracket. Unbalanced
//! brackets inside string values are not handled.

use crate::error::ParseError;
use crate::model::{Recommendation, SEP_TOKEN};

/// Extract the recommendation list from a raw model reply.
///
/// A single object (not wrapped in an array) is accepted as a one-element
/// list. The result is never capped or re-ranked: zero items is a valid
/// answer and more than the instructed maximum is passed through.
pub fn extract_recommendations(reply: &str) -> Result<Vec<Recommendation>, ParseError> {
    let Some(pos) = reply.find(SEP_TOKEN) else {
        tracing::warn!(reply_len = reply.len(), "Delimiter missing from model reply");
        return Err(ParseError::MissingDelimiter {
            delimiter: SEP_TOKEN,
            reply: reply.to_string(),
        });
    };
    let after = &reply[pos + SEP_TOKEN.len()..];

    let fragment = json_fragment(after).ok_or_else(|| {
        tracing::warn!(fragment = %after, "No JSON start after delimiter");
        ParseError::MissingJson {
            fragment: after.to_string(),
        }
    })?;

    let decoded = if fragment.starts_with('{') {
        serde_json::from_str::<Recommendation>(fragment).map(|item| vec![item])
    } else {
        serde_json::from_str::<Vec<Recommendation>>(fragment)
    };

    match decoded {
        Ok(items) => Ok(items),
        Err(e) => {
            tracing::warn!(fragment = %fragment, error = %e, "Recommendation JSON rejected");
            Err(ParseError::InvalidJson {
                reason: e.to_string(),
                fragment: fragment.to_string(),
            })
        }
    }
}

/// Narrow `text` to the span between the first opening bracket and the last
/// closing bracket, trimmed. `None` when there is no opening bracket.
fn json_fragment(text: &str) -> Option<&str> {
    let start = text.find(['[', '{'])?;
    let tail = &text[start..];
    let tail = match tail.rfind([']', '}']) {
        Some(end) => &tail[..=end],
        None => tail,
    };
    Some(tail.trim())
}
