use crate::domain::{LivenessPolicy, Session, SourceKind, sort_sessions};
use crate::infra::{
    OverrideStore, ResolveSourceRootsError, ScanWarningCount, SourceMonitor, resolve_source_roots,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct AggregateOutput {
    pub sessions: Vec<Session>,
    pub warnings: ScanWarningCount,
    pub notice: Option<String>,
}

/// Runs one reconciler per source root and presents their union as a single
/// session list keyed by session id.
pub struct MultiSourceMonitor {
    monitors: Vec<SourceMonitor>,
    overrides: Arc<OverrideStore>,
}

impl MultiSourceMonitor {
    pub fn new(monitors: Vec<SourceMonitor>, overrides: Arc<OverrideStore>) -> Self {
        Self {
            monitors,
            overrides,
        }
    }

    /// One monitor per known source, rooted at the conventional per-user
    /// directories (or their env overrides).
    pub fn from_default_roots(
        policy: LivenessPolicy,
        overrides: Arc<OverrideStore>,
    ) -> Result<Self, ResolveSourceRootsError> {
        let mut monitors = Vec::new();
        for source in SourceKind::ALL {
            let roots = resolve_source_roots(source)?;
            monitors.push(SourceMonitor::new(source, roots, policy, overrides.clone()));
        }
        Ok(Self::new(monitors, overrides))
    }

    pub fn monitors(&self) -> &[SourceMonitor] {
        &self.monitors
    }

    pub fn overrides(&self) -> &Arc<OverrideStore> {
        &self.overrides
    }

    /// Explicit full rescan of every source.
    pub fn rescan_all(&mut self) -> AggregateOutput {
        let mut warnings = 0usize;
        let mut notices = Vec::new();
        for monitor in &mut self.monitors {
            let output = monitor.scan_all();
            tracing::debug!(
                source = monitor.source().label(),
                sessions = output.sessions.len(),
                warnings = output.warnings.get(),
                "source scan complete"
            );
            warnings += output.warnings.get();
            if let Some(notice) = output.notice {
                notices.push(notice);
            }
        }

        AggregateOutput {
            sessions: self.combined_sessions(),
            warnings: ScanWarningCount::from(warnings),
            notice: join_notices(notices),
        }
    }

    /// Routes a changed file to the monitor for its source. The siblings are
    /// left alone; recombining their existing state is enough.
    pub fn apply_incremental_update(&mut self, source: SourceKind, file_path: &Path) {
        for monitor in &mut self.monitors {
            if monitor.source() == source {
                monitor.apply_incremental_update(file_path);
            }
        }
    }

    /// Re-derives every session's active flag; returns whether any flipped.
    pub fn refresh_liveness(&mut self) -> bool {
        let mut changed = false;
        for monitor in &mut self.monitors {
            changed |= monitor.refresh_liveness();
        }
        changed
    }

    /// Re-reads the shared override documents once and reapplies them to
    /// every source's sessions.
    pub fn load_overrides(&mut self) {
        self.overrides.reload();
        for monitor in &mut self.monitors {
            monitor.apply_overrides();
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.get(session_id).is_some()
    }

    /// Single lookup. Sources are checked in reverse registration order so
    /// the result agrees with the collision winner in `combined_sessions`.
    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.monitors
            .iter()
            .rev()
            .find_map(|monitor| monitor.get(session_id))
    }

    /// Pure recombination of current per-source state; calling it twice with
    /// no intervening change yields the same output. Cross-source id
    /// collisions resolve last-source-wins.
    pub fn combined_sessions(&self) -> Vec<Session> {
        let mut combined: BTreeMap<String, Session> = BTreeMap::new();
        for monitor in &self.monitors {
            for session in monitor.sessions_snapshot() {
                combined.insert(session.session_id.clone(), session);
            }
        }

        let mut sessions: Vec<Session> = combined.into_values().collect();
        sort_sessions(&mut sessions);
        sessions
    }
}

fn join_notices(notices: Vec<String>) -> Option<String> {
    let text = notices
        .into_iter()
        .map(|notice| notice.trim().to_string())
        .filter(|notice| !notice.is_empty())
        .collect::<Vec<_>>()
        .join(" | ");
    if text.is_empty() { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::SourceRoots;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    const POLICY: LivenessPolicy = LivenessPolicy::EventWindow {
        window: Duration::from_secs(120),
    };

    fn write_log(projects_dir: &Path, project: &str, stem: &str) -> PathBuf {
        let project_dir = projects_dir.join(project);
        fs::create_dir_all(&project_dir).expect("create project dir");
        let path = project_dir.join(format!("{stem}.jsonl"));
        let mut file = fs::File::create(&path).expect("create log");
        writeln!(
            file,
            r#"{{"type":"user","timestamp":"2026-03-01T10:00:00Z","message":{{"content":"hello"}}}}"#
        )
        .expect("write");
        path
    }

    fn fixture() -> (TempDir, Arc<OverrideStore>, MultiSourceMonitor) {
        let dir = tempdir().expect("tempdir");
        let overrides = Arc::new(OverrideStore::open(dir.path().join("config")));
        let monitors = ["first", "second"]
            .into_iter()
            .map(|root| {
                let projects_dir = dir.path().join(root);
                fs::create_dir_all(&projects_dir).expect("create root");
                SourceMonitor::new(
                    SourceKind::Claude,
                    SourceRoots {
                        projects_dir,
                        todos_dir: None,
                    },
                    POLICY,
                    overrides.clone(),
                )
            })
            .collect();
        let aggregator = MultiSourceMonitor::new(monitors, overrides.clone());
        (dir, overrides, aggregator)
    }

    #[test]
    fn colliding_session_ids_keep_exactly_one_entry() {
        let (dir, _overrides, mut aggregator) = fixture();
        write_log(&dir.path().join("first"), "-tmp-one", "dup");
        write_log(&dir.path().join("second"), "-tmp-two", "dup");

        let output = aggregator.rescan_all();
        assert_eq!(output.sessions.len(), 1);
        // Later sources overwrite earlier ones, and `get` agrees.
        assert_eq!(output.sessions[0].project_path, "-tmp-two");
        assert_eq!(
            aggregator.get("dup").expect("session").project_path,
            "-tmp-two"
        );
    }

    #[test]
    fn combination_is_idempotent() {
        let (dir, _overrides, mut aggregator) = fixture();
        write_log(&dir.path().join("first"), "-tmp-one", "a");
        write_log(&dir.path().join("second"), "-tmp-two", "b");

        aggregator.rescan_all();
        assert_eq!(aggregator.combined_sessions(), aggregator.combined_sessions());
    }

    #[test]
    fn incremental_update_routes_to_one_source_only() {
        let (dir, _overrides, mut aggregator) = fixture();
        write_log(&dir.path().join("first"), "-tmp-one", "a");
        aggregator.rescan_all();
        assert_eq!(aggregator.combined_sessions().len(), 1);

        // New file appears in the first root; the second root is untouched
        // and must not need a rescan for the combination to pick this up.
        let path = write_log(&dir.path().join("first"), "-tmp-one", "c");
        aggregator.apply_incremental_update(SourceKind::Claude, &path);
        let ids: Vec<String> = aggregator
            .combined_sessions()
            .iter()
            .map(|s| s.session_id.clone())
            .collect();
        assert!(ids.contains(&"a".to_string()));
        assert!(ids.contains(&"c".to_string()));
    }

    #[test]
    fn load_overrides_reaches_every_source() {
        let (dir, overrides, mut aggregator) = fixture();
        write_log(&dir.path().join("first"), "-tmp-one", "a");
        write_log(&dir.path().join("second"), "-tmp-two", "b");
        aggregator.rescan_all();

        overrides.set_pinned("a", true).expect("pin");
        overrides.set_custom_name("b", "renamed").expect("rename");
        aggregator.load_overrides();

        assert!(aggregator.get("a").expect("a").is_pinned);
        assert_eq!(aggregator.get("b").expect("b").custom_name, "renamed");
    }

    #[test]
    fn missing_roots_surface_as_joined_notice() {
        let dir = tempdir().expect("tempdir");
        let overrides = Arc::new(OverrideStore::open(dir.path().join("config")));
        let monitors = vec![
            SourceMonitor::new(
                SourceKind::Claude,
                SourceRoots {
                    projects_dir: dir.path().join("nope-claude"),
                    todos_dir: None,
                },
                POLICY,
                overrides.clone(),
            ),
            SourceMonitor::new(
                SourceKind::Qoder,
                SourceRoots {
                    projects_dir: dir.path().join("nope-qoder"),
                    todos_dir: None,
                },
                POLICY,
                overrides.clone(),
            ),
        ];
        let mut aggregator = MultiSourceMonitor::new(monitors, overrides);

        let output = aggregator.rescan_all();
        assert!(output.sessions.is_empty());
        let notice = output.notice.expect("notice");
        assert!(notice.contains("claude"));
        assert!(notice.contains("qoder"));
    }
}
