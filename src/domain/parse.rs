use crate::domain::{SourceKind, TodoItem, todo_items_from_value};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const LAST_MESSAGE_MAX_CHARS: usize = 100;

/// What a single log record contributes to its session. Fields are optional
/// because most records carry only a subset; a fully empty update is normal.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordUpdate {
    pub timestamp: Option<OffsetDateTime>,
    pub message_seen: bool,
    pub user_text: Option<String>,
    /// Full replacement todo snapshot, when the record carries one.
    pub todos: Option<Vec<TodoItem>>,
}

/// Strategy dispatch for the two supported record schemas.
pub fn parse_record(source: SourceKind, value: &Value) -> RecordUpdate {
    match source {
        SourceKind::Claude => parse_claude_record(value),
        SourceKind::Qoder => parse_qoder_record(value),
    }
}

/// Claude-style records: `type` is `user`/`assistant`, timestamps are
/// RFC 3339 strings, and todo snapshots ride inside assistant messages as
/// `tool_use` entries named `TodoWrite`.
fn parse_claude_record(value: &Value) -> RecordUpdate {
    let mut update = RecordUpdate {
        timestamp: value
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(parse_rfc3339),
        ..RecordUpdate::default()
    };

    let record_type = value.get("type").and_then(|v| v.as_str());
    if !matches!(record_type, Some("user") | Some("assistant")) {
        return update;
    }
    update.message_seen = true;

    let message = value.get("message");
    if record_type == Some("user") {
        if let Some(text) = message
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
        {
            update.user_text = Some(truncate_chars(text, LAST_MESSAGE_MAX_CHARS));
        }
        return update;
    }

    let Some(content) = message.and_then(|m| m.get("content")).and_then(|c| c.as_array()) else {
        return update;
    };
    for item in content {
        if item.get("type").and_then(|v| v.as_str()) != Some("tool_use") {
            continue;
        }
        if item.get("name").and_then(|v| v.as_str()) != Some("TodoWrite") {
            continue;
        }
        let Some(todos) = item.get("input").and_then(|input| input.get("todos")) else {
            continue;
        };
        let snapshot_time = update.timestamp.unwrap_or_else(OffsetDateTime::now_utc);
        // Later snapshots in the same record win, same as across records.
        update.todos = Some(todo_items_from_value(todos, snapshot_time));
    }

    update
}

/// Qoder-style records: millisecond Unix epochs in `created_at`, turns keyed
/// by a `role` field. Todos live in a sidecar document, not in the log.
fn parse_qoder_record(value: &Value) -> RecordUpdate {
    let mut update = RecordUpdate {
        timestamp: value
            .get("created_at")
            .and_then(|v| v.as_i64())
            .and_then(from_unix_ms),
        ..RecordUpdate::default()
    };

    if value.get("role").is_some() {
        update.message_seen = true;
        if let Some(text) = value.get("content").and_then(|c| c.as_str()) {
            update.user_text = Some(truncate_chars(text, LAST_MESSAGE_MAX_CHARS));
        }
    }

    update
}

fn parse_rfc3339(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

fn from_unix_ms(ms: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
