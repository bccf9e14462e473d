use crate::domain::TodoItem;
use std::path::PathBuf;
use std::time::SystemTime;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SourceKind {
    Claude,
    Qoder,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::Claude, SourceKind::Qoder];

    pub fn label(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Qoder => "qoder",
        }
    }

    /// Substring matched against process names for the process-correlation
    /// liveness policy.
    pub fn process_name_pattern(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Qoder => "qoder",
        }
    }

    pub fn log_extension(self) -> &'static str {
        match self {
            Self::Claude => "jsonl",
            Self::Qoder => "jsonl",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub source: SourceKind,
    /// Encoded directory name as it appears under the source root.
    pub project_path: String,
    /// Decoded human-readable project path.
    pub project_name: String,
    pub start_time: OffsetDateTime,
    pub last_activity: OffsetDateTime,
    pub is_active: bool,
    pub is_pinned: bool,
    pub custom_name: String,
    pub todos: Vec<TodoItem>,
    pub message_count: u64,
    pub last_message: String,
    pub file_path: PathBuf,
    pub file_size_bytes: u64,
    pub file_modified: Option<SystemTime>,
}

impl Session {
    pub fn display_name(&self) -> &str {
        if self.custom_name.trim().is_empty() {
            &self.project_name
        } else {
            &self.custom_name
        }
    }

    pub fn duration_label(&self, now: OffsetDateTime) -> String {
        let mut elapsed = self.last_activity - self.start_time;
        if elapsed.is_negative() {
            // Clock skew in the source data can put start_time after
            // last_activity; fall back to time since the last activity.
            elapsed = now - self.last_activity;
        }
        let total_seconds = elapsed.whole_seconds().max(0);
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        format!("{hours}h {minutes}m")
    }
}

/// Active sessions first, then most recent activity first.
pub fn sort_sessions(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| {
        b.is_active
            .cmp(&a.is_active)
            .then(b.last_activity.cmp(&a.last_activity))
    });
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DashboardStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub sessions_with_todos: usize,
    pub completed_todos: usize,
    pub in_progress_todos: usize,
    pub pending_todos: usize,
}

pub fn compute_dashboard_stats(sessions: &[Session]) -> DashboardStats {
    let mut stats = DashboardStats {
        total_sessions: sessions.len(),
        ..DashboardStats::default()
    };
    for session in sessions {
        if session.is_active {
            stats.active_sessions += 1;
        }
        if !session.todos.is_empty() {
            stats.sessions_with_todos += 1;
        }
        let todo_stats = crate::domain::todo_stats(&session.todos);
        stats.completed_todos += todo_stats.completed;
        stats.in_progress_todos += todo_stats.in_progress;
        stats.pending_todos += todo_stats.pending;
    }
    stats
}

/// Most recently captured todo item across all sessions.
pub fn latest_todo(sessions: &[Session]) -> Option<&TodoItem> {
    sessions
        .iter()
        .flat_map(|session| session.todos.iter())
        .max_by_key(|todo| todo.timestamp)
}
