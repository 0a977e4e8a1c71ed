//! Core data types shared by every pipeline stage.
//!
//! - [`RecommendRequest`]: one inbound ask, normalized and validated at ingress
//! - [`Candidate`]: one retrieved item with its attribute map
//! - [`Recommendation`]: one structured entry of the final answer

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Literal token the model emits between its reasoning and its JSON answer.
pub const SEP_TOKEN: &str = "<|Result|>";

/// Longest accepted question, in characters.
pub const MAX_QUESTION_CHARS: usize = 1024;

/// Attribute key holding the human-readable candidate description.
pub const TEXT_ATTRIBUTE: &str = "text";

/// System instruction sent with every generation request.
///
/// It fixes the reply shape the extractor relies on: free reasoning, then
/// [`SEP_TOKEN`], then a JSON array of `{"course", "reason"}` objects.
pub const SYSTEM_PROMPT: &str = r#"You are a course selection assistant.
The user input contains a JSON list of strings called the course list, followed by a query.
Every element of the course list describes one course.
The query is a plain string describing what the user is looking for.
Your task: pick one to three courses from the course list that best satisfy the query.
The course list may contain unrelated entries or be empty. If nothing fits, recommend nothing.
You may first write any reasoning you like, for example restating the request or
analysing the candidate courses. After that you must output the marker <|Result|>
followed by a JSON list. Each element of the list is an object with the keys
"course" and "reason". Keep every reason short. An empty list [] is allowed.
Your output must follow this shape:

Your analysis goes here.<|Result|>
[{"course": "name of recommended course 1", "reason": "why course 1"},
 {"course": "name of recommended course 2", "reason": "why course 2"},
 {"course": "name of recommended course 3", "reason": "why course 3"}]

The user input follows."#;

/// One inbound recommendation request.
///
/// The caller identity travels out of band (a header) and is passed next to
/// the request rather than inside it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecommendRequest {
    /// Free-text question, e.g. "courses without a final exam".
    #[serde(rename = "userQuestion")]
    pub user_question: String,

    /// Category filter. `0` means unfiltered.
    #[serde(default, alias = "catagory")]
    pub category: i64,
}

impl RecommendRequest {
    pub fn new(user_question: impl Into<String>, category: i64) -> Self {
        Self {
            user_question: user_question.into(),
            category,
        }
    }

    /// Trim surrounding whitespace from the question.
    pub fn normalize(&mut self) {
        let trimmed = self.user_question.trim();
        if trimmed.len() != self.user_question.len() {
            self.user_question = trimmed.to_string();
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.user_question.is_empty() {
            return Err(ValidationError::new("userQuestion", "question must not be empty"));
        }
        if self.user_question.chars().count() > MAX_QUESTION_CHARS {
            return Err(ValidationError::new(
                "userQuestion",
                format!("question exceeds {MAX_QUESTION_CHARS} characters"),
            ));
        }
        if self.category < 0 {
            return Err(ValidationError::new("category", "category must not be negative"));
        }
        Ok(())
    }
}

/// A candidate attribute value as delivered by the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl AttributeValue {
    /// Convert a JSON payload value. Arrays, objects and nulls yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::Null
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integral view of a numeric value. Floats only qualify when they have
    /// no fractional part.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => {
                let i = *f as i64;
                (i as f64 == *f).then_some(i)
            }
            _ => None,
        }
    }
}

/// One retrieved item eligible for recommendation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// Index point identifier.
    pub id: String,
    /// Similarity score reported by the index.
    pub score: f32,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Description text handed to the model, if the item has one.
    pub fn text(&self) -> Option<&str> {
        self.attribute(TEXT_ATTRIBUTE).and_then(AttributeValue::as_str)
    }
}

/// One structured recommendation extracted from the model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "course")]
    pub label: String,
    #[serde(rename = "reason")]
    pub justification: String,
}

impl Recommendation {
    pub fn new(label: impl Into<String>, justification: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            justification: justification.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_legacy_category_spelling() {
        let req: RecommendRequest =
            serde_json::from_str(r#"{"userQuestion":"q","catagory":3}"#).unwrap();
        assert_eq!(req.category, 3);

        let req: RecommendRequest = serde_json::from_str(r#"{"userQuestion":"q"}"#).unwrap();
        assert_eq!(req.category, 0);
    }

    #[test]
    fn test_request_rejects_unknown_fields() {
        let res: Result<RecommendRequest, _> =
            serde_json::from_str(r#"{"userQuestion":"q","extra":1}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_validate() {
        let mut req = RecommendRequest::new("   ", 0);
        req.normalize();
        assert_eq!(req.validate().unwrap_err().field, "userQuestion");

        let req = RecommendRequest::new("ok", -1);
        assert_eq!(req.validate().unwrap_err().field, "category");

        // Multi-byte characters count once each.
        let req = RecommendRequest::new("测".repeat(MAX_QUESTION_CHARS), 0);
        assert!(req.validate().is_ok());
        let req = RecommendRequest::new("测".repeat(MAX_QUESTION_CHARS + 1), 0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_attribute_conversion() {
        use serde_json::json;

        assert_eq!(
            AttributeValue::from_json(&json!(2)),
            Some(AttributeValue::Integer(2))
        );
        assert_eq!(
            AttributeValue::from_json(&json!(2.0)),
            Some(AttributeValue::Float(2.0))
        );
        assert_eq!(AttributeValue::from_json(&json!([1, 2])), None);
        assert_eq!(AttributeValue::from_json(&json!({"a": 1})), None);
        assert_eq!(AttributeValue::from_json(&json!(null)), None);

        assert_eq!(AttributeValue::Float(4.0).as_integer(), Some(4));
        assert_eq!(AttributeValue::Float(4.5).as_integer(), None);
        assert_eq!(AttributeValue::String("4".into()).as_integer(), None);
    }

    #[test]
    fn test_recommendation_wire_names() {
        let rec = Recommendation::new("Art Appreciation", "no exam");
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["course"], "Art Appreciation");
        assert_eq!(json["reason"], "no exam");
    }
}
