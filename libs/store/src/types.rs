use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /append`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    /// JSON-encoded payload.
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub importance: u8,
    pub source_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Created { id: Option<String> },
    Updated { id: Option<String> },
    Conflict,
}

impl AppendOutcome {
    /// Both duplicate signals mean an entry with the dedupe key already existed.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Updated { .. } | Self::Conflict)
    }
}

/// Parameters of `GET /query`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub scope_prefix: String,
    pub kind: Option<String>,
    pub limit: usize,
}

impl QueryRequest {
    pub fn new(scope_prefix: impl Into<String>, kind: impl Into<String>, limit: usize) -> Self {
        Self {
            scope_prefix: scope_prefix.into(),
            kind: Some(kind.into()),
            limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub dedupe_key: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AppendResponse {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueryResponse {
    #[serde(default)]
    pub items: Vec<StoreItem>,
}

#[cfg(test)]
mod tests {
    use super::{AppendOutcome, AppendRequest};

    #[test]
    fn append_request_uses_store_field_names() {
        let request = AppendRequest {
            scope: "autopilot/ledger".to_string(),
            dedupe_key: Some("telegram:notify:chat-42".to_string()),
            kind: "dedupe".to_string(),
            title: "telegram:notify:chat-42".to_string(),
            content: "{}".to_string(),
            tags: vec!["ledger".to_string()],
            importance: 3,
            source_agent: "autopilot".to_string(),
        };

        let value = match serde_json::to_value(&request) {
            Ok(value) => value,
            Err(error) => panic!("failed to serialize request: {error}"),
        };
        assert_eq!(value["dedupeKey"], "telegram:notify:chat-42");
        assert_eq!(value["type"], "dedupe");
        assert_eq!(value["sourceAgent"], "autopilot");
    }

    #[test]
    fn dedupe_key_is_omitted_when_absent() {
        let request = AppendRequest {
            scope: "autopilot/kill-switch".to_string(),
            dedupe_key: None,
            kind: "kill_switch".to_string(),
            title: "kill switch".to_string(),
            content: "{}".to_string(),
            tags: Vec::new(),
            importance: 5,
            source_agent: "autopilot".to_string(),
        };

        let value = match serde_json::to_value(&request) {
            Ok(value) => value,
            Err(error) => panic!("failed to serialize request: {error}"),
        };
        assert!(value.get("dedupeKey").is_none());
    }

    #[test]
    fn updated_and_conflict_are_duplicates() {
        assert!(AppendOutcome::Conflict.is_duplicate());
        assert!(AppendOutcome::Updated { id: None }.is_duplicate());
        assert!(!AppendOutcome::Created { id: None }.is_duplicate());
    }
}
