use serde_json::Value;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    /// Unknown status strings are treated as pending rather than rejected;
    /// the source tools have grown new states before.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "completed" => Self::Completed,
            "in_progress" => Self::InProgress,
            _ => Self::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
    /// Gerund phrasing of the task, display-only.
    pub active_form: String,
    /// Capture time of the snapshot this item belongs to.
    pub timestamp: OffsetDateTime,
}

/// Converts a JSON array of `{content, status, activeForm}` objects into a
/// todo snapshot. Non-object entries are dropped; missing fields default.
pub fn todo_items_from_value(value: &Value, timestamp: OffsetDateTime) -> Vec<TodoItem> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let entry = entry.as_object()?;
            let content = entry
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let status = entry
                .get("status")
                .and_then(|v| v.as_str())
                .map(TodoStatus::parse)
                .unwrap_or_default();
            let active_form = entry
                .get("activeForm")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Some(TodoItem {
                content: content.to_string(),
                status,
                active_form: active_form.to_string(),
                timestamp,
            })
        })
        .collect()
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TodoStats {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub pending: usize,
}

pub fn todo_stats(todos: &[TodoItem]) -> TodoStats {
    let mut stats = TodoStats {
        total: todos.len(),
        ..TodoStats::default()
    };
    for todo in todos {
        match todo.status {
            TodoStatus::Completed => stats.completed += 1,
            TodoStatus::InProgress => stats.in_progress += 1,
            TodoStatus::Pending => stats.pending += 1,
        }
    }
    stats
}

/// `"[<last status> done/total] <last item>"`, matching the dashboard
/// progress column. An in-progress item shows its gerund phrasing when the
/// tool provided one.
pub fn progress_label(todos: &[TodoItem]) -> String {
    let Some(last) = todos.last() else {
        return "(no tasks)".to_string();
    };
    let text = if last.status == TodoStatus::InProgress && !last.active_form.trim().is_empty() {
        &last.active_form
    } else {
        &last.content
    };
    let stats = todo_stats(todos);
    format!(
        "[{} {}/{}] {}",
        last.status.as_str(),
        stats.completed,
        stats.total,
        text
    )
}
