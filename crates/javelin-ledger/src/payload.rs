//! Canonical payloads for message and tool entries.
//!
//! A payload is rendered as compact JSON with object keys sorted at every
//! depth, so equal payloads always hash equally regardless of field order.
//! Message content is canonicalized before it is embedded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use javelin_types::{ConversationKey, LedgerError, Role};

use crate::canonical::canonicalize;
use crate::digest::sha256_hex;
use crate::entry::EntryDraft;

/// Minimum length of a pre-computed artifact digest that is trusted as-is.
const MIN_ARTIFACT_DIGEST_LEN: usize = 32;

/// Key-sorted compact JSON.
pub fn stable_json(value: &Value) -> String {
    stable_json_ignoring(value, &[])
}

/// Key-sorted compact JSON with the named keys dropped at every depth
/// (volatile fields such as `system_fingerprint`).
pub fn stable_json_ignoring(value: &Value, ignore: &[&str]) -> String {
    sort_keys(value, ignore).to_string()
}

fn sort_keys(value: &Value, ignore: &[&str]) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .keys()
                .filter(|k| !ignore.contains(&k.as_str()))
                .collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key.as_str()], ignore));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| sort_keys(v, ignore)).collect()),
        other => other.clone(),
    }
}

/// Digest of a tool's returned data.
///
/// Artifacts that already carry their digest
/// (`{"type": "artifact", "sha256": "..."}`) are not re-hashed.
pub fn data_hash(data: &Value) -> String {
    if data.get("type").and_then(Value::as_str) == Some("artifact") {
        if let Some(digest) = data.get("sha256").and_then(Value::as_str) {
            if digest.len() >= MIN_ARTIFACT_DIGEST_LEN {
                return digest.to_string();
            }
        }
    }
    sha256_hex(stable_json(data).as_bytes())
}

/// Digest of a tool call's arguments.
pub fn args_hash(args: &Value) -> String {
    sha256_hex(stable_json(args).as_bytes())
}

fn to_canonical_json<T: Serialize>(payload: &T, kind: &str) -> Result<String, LedgerError> {
    let mut value = serde_json::to_value(payload)
        .map_err(|e| LedgerError::Encoding(format!("failed to serialize {kind} payload: {e}")))?;
    if let Value::Object(map) = &mut value {
        map.insert("type".into(), Value::String(kind.into()));
    }
    Ok(stable_json(&value))
}

/// Audit payload for one chat message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAudit {
    pub user_id: String,
    pub conversation_id: String,
    pub step_id: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl MessageAudit {
    pub fn new(key: &ConversationKey, step_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: key.user_id.clone(),
            conversation_id: key.conversation_id.clone(),
            step_id: step_id.into(),
            role,
            name: None,
            content: None,
            seq: None,
            ts: None,
            model: None,
        }
    }

    pub fn with_content(mut self, content: impl AsRef<str>) -> Self {
        self.content = Some(canonicalize(content.as_ref()));
        self
    }

    pub fn canonical_json(&self) -> Result<String, LedgerError> {
        to_canonical_json(self, "message")
    }

    /// Entry draft carrying this payload.
    pub fn draft(&self) -> Result<EntryDraft, LedgerError> {
        let mut draft = EntryDraft::message(self.role, self.canonical_json()?).with_step(&self.step_id);
        draft.seq = self.seq;
        Ok(draft)
    }
}

/// Audit payload for one tool execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolAudit {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    #[serde(rename = "stepId")]
    pub step_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_hash: Option<String>,
    /// The result came from a cache of an identical earlier call.
    pub reused: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_ms: Option<i64>,
}

impl ToolAudit {
    pub fn new(
        key: &ConversationKey,
        step_id: impl Into<String>,
        name: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            user_id: key.user_id.clone(),
            conversation_id: key.conversation_id.clone(),
            step_id: step_id.into(),
            name: name.into(),
            args_hash: None,
            data_hash: None,
            reused: false,
            status: status.into(),
            ts: None,
            cost_ms: None,
        }
    }

    pub fn with_args(mut self, args: &Value) -> Self {
        self.args_hash = Some(args_hash(args));
        self
    }

    pub fn with_data(mut self, data: &Value) -> Self {
        self.data_hash = Some(data_hash(data));
        self
    }

    pub fn canonical_json(&self) -> Result<String, LedgerError> {
        to_canonical_json(self, "tool")
    }

    pub fn draft(&self) -> Result<EntryDraft, LedgerError> {
        Ok(EntryDraft::tool_result(&self.name, self.canonical_json()?)
            .with_step(&self.step_id)
            .with_state(&self.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> ConversationKey {
        ConversationKey::new("u1", "c1")
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refused"))
        }
    }

    #[test]
    fn serialize_failure_is_an_encoding_error() {
        let err = to_canonical_json(&Unencodable, "message").unwrap_err();
        assert!(matches!(err, LedgerError::Encoding(_)), "got {err:?}");
        assert!(err.to_string().contains("message payload"));
    }

    #[test]
    fn stable_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": true, "m": [ {"y": 1, "x": 2} ]}});
        assert_eq!(
            stable_json(&value),
            r#"{"a":{"m":[{"x":2,"y":1}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn ignored_keys_are_dropped_at_every_depth() {
        let value = json!({"id": 1, "system_fingerprint": "fp", "inner": {"system_fingerprint": "x"}});
        assert_eq!(
            stable_json_ignoring(&value, &["system_fingerprint"]),
            r#"{"id":1,"inner":{}}"#
        );
    }

    #[test]
    fn artifact_digest_is_reused() {
        let digest = "a".repeat(64);
        assert_eq!(data_hash(&json!({"type": "artifact", "sha256": digest})), digest);
    }

    #[test]
    fn short_artifact_digest_is_rehashed() {
        let data = json!({"type": "artifact", "sha256": "abc"});
        assert_eq!(data_hash(&data), sha256_hex(stable_json(&data).as_bytes()));
    }

    #[test]
    fn data_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":[1,2]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":[1,2],"x":1}"#).unwrap();
        assert_eq!(data_hash(&a), data_hash(&b));
    }

    #[test]
    fn message_payload_is_sorted_and_omits_absent_fields() {
        let payload = MessageAudit::new(&key(), "s1", Role::Assistant).with_content("#Hi");
        assert_eq!(
            payload.canonical_json().unwrap(),
            r##"{"content":"# Hi\n","conversationId":"c1","role":"assistant","stepId":"s1","type":"message","userId":"u1"}"##
        );
    }

    #[test]
    fn tool_payload_uses_snake_case_hash_fields() {
        let payload = ToolAudit::new(&key(), "s2", "search", "ok")
            .with_args(&json!({"q": "rust"}))
            .with_data(&json!({"hits": 3}));
        let json: Value = serde_json::from_str(&payload.canonical_json().unwrap()).unwrap();
        assert_eq!(json["type"], "tool");
        assert_eq!(json["name"], "search");
        assert_eq!(json["reused"], false);
        assert_eq!(json["args_hash"].as_str().map(str::len), Some(64));
        assert!(json.get("cost_ms").is_none());
    }

    #[test]
    fn drafts_carry_payload_and_step() {
        let draft = ToolAudit::new(&key(), "s3", "fetch", "error").draft().unwrap();
        assert_eq!(draft.tool_name.as_deref(), Some("fetch"));
        assert_eq!(draft.step_id.as_deref(), Some("s3"));
        assert_eq!(draft.state.as_deref(), Some("error"));
        assert!(draft.canonical.contains(r#""type":"tool""#));
    }
}
