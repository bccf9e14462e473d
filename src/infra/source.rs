use crate::domain::{
    LivenessEvidence, LivenessPolicy, Session, SourceKind, classify, component_count,
    decode_project_dir_name, parse_record, sort_sessions, todo_items_from_value,
};
use crate::infra::{OverrideStore, matching_process_cwds};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use walkdir::WalkDir;

/// Subagent transcripts share the session directory but are not sessions.
const AGENT_SESSION_PREFIX: &str = "agent-";

/// Entries whose decoded project path is this shallow are spurious
/// top-level artifacts, not real projects.
const MIN_PROJECT_COMPONENTS: usize = 2;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScanWarningCount(usize);

impl From<usize> for ScanWarningCount {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl ScanWarningCount {
    pub fn get(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum ResolveSourceRootsError {
    #[error("home directory not found")]
    HomeDirNotFound,
}

#[derive(Clone, Debug)]
pub struct SourceRoots {
    pub projects_dir: PathBuf,
    /// Sidecar todo-document directory; only sources with the external-file
    /// todo format have one.
    pub todos_dir: Option<PathBuf>,
}

pub fn resolve_source_roots(source: SourceKind) -> Result<SourceRoots, ResolveSourceRootsError> {
    let home = dirs::home_dir();
    let resolve = |env_var: &str, default: fn(&Path) -> PathBuf| {
        if let Some(override_dir) = std::env::var_os(env_var) {
            return Ok(PathBuf::from(override_dir));
        }
        home.as_deref()
            .map(default)
            .ok_or(ResolveSourceRootsError::HomeDirNotFound)
    };

    match source {
        SourceKind::Claude => Ok(SourceRoots {
            projects_dir: resolve("CLAUDE_PROJECTS_DIR", |home| {
                home.join(".claude").join("projects")
            })?,
            todos_dir: None,
        }),
        SourceKind::Qoder => Ok(SourceRoots {
            projects_dir: resolve("QODER_PROJECTS_DIR", |home| {
                home.join(".qoder").join("projects")
            })?,
            todos_dir: Some(resolve("QODER_TODOS_DIR", |home| {
                home.join(".qoder").join("todos")
            })?),
        }),
    }
}

#[derive(Clone, Debug)]
pub struct ScanOutput {
    pub sessions: Vec<Session>,
    pub warnings: ScanWarningCount,
    pub notice: Option<String>,
}

#[derive(Debug, Error)]
enum ParseSessionFileError {
    #[error("failed to read session file: {0}")]
    Read(#[from] io::Error),
}

/// One reconciler per source root: owns the in-memory session map, the
/// per-file line offsets, and the liveness recomputation for its sessions.
pub struct SourceMonitor {
    source: SourceKind,
    roots: SourceRoots,
    policy: LivenessPolicy,
    overrides: Arc<OverrideStore>,
    sessions: BTreeMap<String, Session>,
    line_offsets: HashMap<PathBuf, usize>,
}

impl SourceMonitor {
    pub fn new(
        source: SourceKind,
        roots: SourceRoots,
        policy: LivenessPolicy,
        overrides: Arc<OverrideStore>,
    ) -> Self {
        Self {
            source,
            roots,
            policy,
            overrides,
            sessions: BTreeMap::new(),
            line_offsets: HashMap::new(),
        }
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn projects_dir(&self) -> &Path {
        &self.roots.projects_dir
    }

    /// Full rescan: every log file is reparsed from offset zero and the
    /// session map is replaced wholesale. A file that failed to parse is
    /// skipped for this pass, never fatal for its siblings.
    pub fn scan_all(&mut self) -> ScanOutput {
        self.sessions.clear();
        self.line_offsets.clear();

        if !self.roots.projects_dir.exists() {
            return ScanOutput {
                sessions: Vec::new(),
                warnings: ScanWarningCount::from(0usize),
                notice: Some(format!(
                    "{} projects dir not found: {}",
                    self.source.label(),
                    self.roots.projects_dir.display()
                )),
            };
        }

        let process_cwds = self.process_cwds_for_pass();
        let mut warnings = 0usize;

        let walker = WalkDir::new(&self.roots.projects_dir)
            .follow_links(false)
            .into_iter();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::warn!(source = self.source.label(), %error, "skipping unreadable entry");
                    warnings += 1;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(self.source.log_extension())
            {
                continue;
            }

            match self.parse_session_file(path, &process_cwds) {
                Ok(Some((session, lines_consumed))) => {
                    self.line_offsets.insert(path.to_path_buf(), lines_consumed);
                    self.sessions.insert(session.session_id.clone(), session);
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        source = self.source.label(),
                        path = %path.display(),
                        %error,
                        "skipping session file for this pass"
                    );
                    warnings += 1;
                }
            }
        }

        ScanOutput {
            sessions: self.sessions_snapshot(),
            warnings: ScanWarningCount::from(warnings),
            notice: None,
        }
    }

    /// Reads only the lines past the stored offset and folds them into the
    /// existing session. Unknown files degenerate to a fresh full parse;
    /// files that shrank below the offset are reparsed from scratch.
    pub fn apply_incremental_update(&mut self, file_path: &Path) {
        if !file_path.starts_with(&self.roots.projects_dir) {
            return;
        }
        let Some(session_id) = file_stem_string(file_path) else {
            return;
        };
        if session_id.starts_with(AGENT_SESSION_PREFIX) {
            return;
        }

        let process_cwds = self.process_cwds_for_pass();

        if !self.sessions.contains_key(&session_id) {
            self.discover_file(file_path, &process_cwds);
            return;
        }

        let offset = self.line_offsets.get(file_path).copied().unwrap_or(0);
        let (lines, total_lines) = match read_lines_from(file_path, offset) {
            Ok(read) => read,
            Err(error) => {
                tracing::warn!(
                    source = self.source.label(),
                    path = %file_path.display(),
                    %error,
                    "incremental read failed, keeping previous state"
                );
                return;
            }
        };

        if total_lines < offset {
            // Truncated or rewritten underneath us.
            self.discover_file(file_path, &process_cwds);
            return;
        }

        let now = OffsetDateTime::now_utc();
        let source = self.source;
        let todos_dir = self.roots.todos_dir.clone();
        let policy = self.policy;
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };

        let new_lines = !lines.is_empty();
        for line in lines {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
                continue;
            };
            let update = parse_record(source, &value);
            if update.message_seen {
                session.message_count += 1;
            }
            if let Some(text) = update.user_text {
                session.last_message = text;
            }
            if let Some(todos) = update.todos {
                session.todos = todos;
            }
            if let Some(ts) = update.timestamp {
                session.last_activity = session.last_activity.max(ts);
            }
        }
        if new_lines {
            session.last_activity = session.last_activity.max(now);
        }

        if source == SourceKind::Qoder {
            if let Some(todos_dir) = &todos_dir {
                session.todos = read_sidecar_todos(todos_dir, &session_id, now);
            }
        }

        if let Ok(metadata) = fs::metadata(file_path) {
            session.file_size_bytes = metadata.len();
            session.file_modified = metadata.modified().ok();
        }

        let evidence = LivenessEvidence {
            file_modified: session.file_modified,
            last_activity: session.last_activity,
            process_cwds: &process_cwds,
        };
        session.is_active = classify(policy, &evidence, &session.project_path, now);

        self.line_offsets.insert(file_path.to_path_buf(), total_lines);
    }

    /// Re-derives `is_active` for every session from current evidence.
    /// Returns whether any flag flipped; liveness can change with no new
    /// file events purely because time passed.
    pub fn refresh_liveness(&mut self) -> bool {
        let process_cwds = self.process_cwds_for_pass();
        let now = OffsetDateTime::now_utc();
        let policy = self.policy;

        let mut changed = false;
        for session in self.sessions.values_mut() {
            let evidence = LivenessEvidence {
                file_modified: session.file_modified,
                last_activity: session.last_activity,
                process_cwds: &process_cwds,
            };
            let active = classify(policy, &evidence, &session.project_path, now);
            if active != session.is_active {
                session.is_active = active;
                changed = true;
            }
        }
        changed
    }

    /// Reapplies the shared override state to every known session. Touches
    /// the pinned flag and custom name only.
    pub fn apply_overrides(&mut self) {
        for session in self.sessions.values_mut() {
            session.is_pinned = self.overrides.is_pinned(&session.session_id);
            session.custom_name = self.overrides.custom_name(&session.session_id);
        }
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn sessions_snapshot(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
        sort_sessions(&mut sessions);
        sessions
    }

    fn discover_file(&mut self, file_path: &Path, process_cwds: &[String]) {
        match self.parse_session_file(file_path, process_cwds) {
            Ok(Some((session, lines_consumed))) => {
                self.line_offsets
                    .insert(file_path.to_path_buf(), lines_consumed);
                self.sessions.insert(session.session_id.clone(), session);
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(
                    source = self.source.label(),
                    path = %file_path.display(),
                    %error,
                    "failed to parse session file"
                );
            }
        }
    }

    fn parse_session_file(
        &self,
        path: &Path,
        process_cwds: &[String],
    ) -> Result<Option<(Session, usize)>, ParseSessionFileError> {
        let Some(session_id) = file_stem_string(path) else {
            return Ok(None);
        };
        if session_id.starts_with(AGENT_SESSION_PREFIX) {
            return Ok(None);
        }

        let encoded_dir = path
            .parent()
            .and_then(|dir| dir.file_name())
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        let project_name = decode_project_dir_name(&encoded_dir);
        if component_count(&project_name) < MIN_PROJECT_COMPONENTS {
            return Ok(None);
        }

        let metadata = fs::metadata(path)?;
        let file_size_bytes = metadata.len();
        let file_modified = metadata.modified().ok();
        let file_created = metadata.created().ok();

        let now = OffsetDateTime::now_utc();
        let mut start_time: Option<OffsetDateTime> = None;
        let mut last_activity: Option<OffsetDateTime> = None;
        let mut message_count = 0u64;
        let mut last_message = String::new();
        let mut todos = Vec::new();
        let mut lines_consumed = 0usize;

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        for line_result in reader.lines() {
            let line = match line_result {
                Ok(line) => line,
                Err(_) => break,
            };
            lines_consumed += 1;

            let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
                continue;
            };
            let update = parse_record(self.source, &value);
            if update.message_seen {
                message_count += 1;
            }
            if let Some(text) = update.user_text {
                last_message = text;
            }
            if let Some(snapshot) = update.todos {
                todos = snapshot;
            }
            if let Some(ts) = update.timestamp {
                if start_time.is_none() {
                    start_time = Some(ts);
                }
                last_activity = Some(last_activity.map_or(ts, |current| current.max(ts)));
            }
        }

        let start_time = start_time
            .or(file_created.map(OffsetDateTime::from))
            .or(file_modified.map(OffsetDateTime::from))
            .unwrap_or(now);
        let last_activity = last_activity.unwrap_or(start_time);

        if self.source == SourceKind::Qoder {
            if let Some(todos_dir) = &self.roots.todos_dir {
                todos = read_sidecar_todos(todos_dir, &session_id, now);
            }
        }

        let evidence = LivenessEvidence {
            file_modified,
            last_activity,
            process_cwds,
        };
        let is_active = classify(self.policy, &evidence, &encoded_dir, now);

        let session = Session {
            is_pinned: self.overrides.is_pinned(&session_id),
            custom_name: self.overrides.custom_name(&session_id),
            session_id,
            source: self.source,
            project_path: encoded_dir,
            project_name,
            start_time,
            last_activity,
            is_active,
            todos,
            message_count,
            last_message,
            file_path: path.to_path_buf(),
            file_size_bytes,
            file_modified,
        };

        Ok(Some((session, lines_consumed)))
    }

    fn process_cwds_for_pass(&self) -> Vec<String> {
        match self.policy {
            LivenessPolicy::ProcessMatch => {
                matching_process_cwds(self.source.process_name_pattern())
            }
            _ => Vec::new(),
        }
    }
}

/// The external-file todo strategy: the whole sidecar document is re-read on
/// every reconciliation; a missing document means an empty list.
fn read_sidecar_todos(
    todos_dir: &Path,
    session_id: &str,
    timestamp: OffsetDateTime,
) -> Vec<crate::domain::TodoItem> {
    let path = todos_dir.join(format!("{session_id}.json"));
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "failed to read todo sidecar");
            return Vec::new();
        }
    };

    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => todo_items_from_value(&value, timestamp),
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "malformed todo sidecar");
            Vec::new()
        }
    }
}

fn read_lines_from(path: &Path, offset: usize) -> io::Result<(Vec<String>, usize)> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut kept = Vec::new();
    let mut total = 0usize;
    for line_result in reader.lines() {
        let line = match line_result {
            Ok(line) => line,
            Err(_) => break,
        };
        total += 1;
        if total > offset {
            kept.push(line);
        }
    }
    Ok((kept, total))
}

fn file_stem_string(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|name| name.to_str())
        .map(|name| name.to_string())
}
