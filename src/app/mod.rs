use crate::domain::{Session, SourceKind};
use crate::infra::{MultiSourceMonitor, SourceDirWatcher, WatchSignal, watch_source_dir};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

/// Inbound commands from the UI / CLI layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AppCommand {
    Rescan,
    TogglePin { session_id: String, pinned: bool },
    /// Empty name clears the override.
    Rename { session_id: String, name: String },
    ReloadOverrides,
    Shutdown,
}

/// Outbound events. `SessionsUpdated` always carries the full combined list.
#[derive(Clone, Debug, PartialEq)]
pub enum AppEvent {
    SessionsUpdated(Vec<Session>),
    CommandFailed { message: String },
}

#[derive(Clone, Copy, Debug)]
pub struct MonitorConfig {
    /// Liveness is re-derived on this cadence even with no file events;
    /// the active flag can flip purely because time passed.
    pub tick_interval: Duration,
    pub idle_sleep: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2),
            idle_sleep: Duration::from_millis(100),
        }
    }
}

enum CommandOutcome {
    Changed,
    Unchanged,
    Shutdown,
}

/// Single-threaded monitor loop. Watcher callbacks run on the notify thread
/// and only post into channels; all session-map mutation happens here.
/// Returns when a `Shutdown` command arrives or every command sender is
/// gone; dropping the watchers stops the notifier threads, and there is no
/// write-behind state to flush.
pub fn run_monitor(
    mut aggregator: MultiSourceMonitor,
    commands: Receiver<AppCommand>,
    events: Sender<AppEvent>,
    config: MonitorConfig,
) {
    let watchers = start_watchers(&aggregator);

    let output = aggregator.rescan_all();
    if let Some(notice) = output.notice {
        tracing::warn!(%notice, "initial scan reported problems");
    }
    if events.send(AppEvent::SessionsUpdated(output.sessions)).is_err() {
        return;
    }

    let mut last_tick = Instant::now();
    loop {
        let mut changed = false;

        loop {
            match commands.try_recv() {
                Ok(command) => match handle_command(&mut aggregator, &events, command) {
                    CommandOutcome::Changed => changed = true,
                    CommandOutcome::Unchanged => {}
                    CommandOutcome::Shutdown => return,
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        for (source, watcher) in &watchers {
            let Some(watcher) = watcher else { continue };
            while let Some(signal) = watcher.try_recv() {
                match signal {
                    WatchSignal::Changed(paths) if paths.is_empty() => {
                        // Unattributable event: fall back to a full rescan.
                        aggregator.rescan_all();
                        changed = true;
                    }
                    WatchSignal::Changed(paths) => {
                        for path in dedup_paths(paths) {
                            aggregator.apply_incremental_update(*source, &path);
                        }
                        changed = true;
                    }
                    WatchSignal::Error(message) => {
                        tracing::warn!(source = source.label(), %message, "watch error");
                    }
                }
            }
        }

        if last_tick.elapsed() >= config.tick_interval {
            last_tick = Instant::now();
            if aggregator.refresh_liveness() {
                changed = true;
            }
        }

        if changed
            && events
                .send(AppEvent::SessionsUpdated(aggregator.combined_sessions()))
                .is_err()
        {
            return;
        }

        std::thread::sleep(config.idle_sleep);
    }
}

fn start_watchers(
    aggregator: &MultiSourceMonitor,
) -> Vec<(SourceKind, Option<SourceDirWatcher>)> {
    aggregator
        .monitors()
        .iter()
        .map(|monitor| {
            let source = monitor.source();
            let dir = monitor.projects_dir();
            if !dir.exists() {
                return (source, None);
            }
            match watch_source_dir(dir, source.log_extension()) {
                Ok(watcher) => (source, Some(watcher)),
                Err(error) => {
                    tracing::warn!(
                        source = source.label(),
                        %error,
                        "auto-rescan disabled for source"
                    );
                    (source, None)
                }
            }
        })
        .collect()
}

fn handle_command(
    aggregator: &mut MultiSourceMonitor,
    events: &Sender<AppEvent>,
    command: AppCommand,
) -> CommandOutcome {
    match command {
        AppCommand::Rescan => {
            aggregator.rescan_all();
            CommandOutcome::Changed
        }
        AppCommand::TogglePin { session_id, pinned } => {
            if !aggregator.contains(&session_id) {
                return fail(events, format!("no such session: {session_id}"));
            }
            if let Err(error) = aggregator.overrides().set_pinned(&session_id, pinned) {
                tracing::error!(%error, %session_id, "failed to persist pin state");
                return fail(events, format!("failed to persist pin state: {error}"));
            }
            aggregator.load_overrides();
            CommandOutcome::Changed
        }
        AppCommand::Rename { session_id, name } => {
            if !aggregator.contains(&session_id) {
                return fail(events, format!("no such session: {session_id}"));
            }
            if let Err(error) = aggregator.overrides().set_custom_name(&session_id, &name) {
                tracing::error!(%error, %session_id, "failed to persist session name");
                return fail(events, format!("failed to persist session name: {error}"));
            }
            aggregator.load_overrides();
            CommandOutcome::Changed
        }
        AppCommand::ReloadOverrides => {
            aggregator.load_overrides();
            CommandOutcome::Changed
        }
        AppCommand::Shutdown => CommandOutcome::Shutdown,
    }
}

fn fail(events: &Sender<AppEvent>, message: String) -> CommandOutcome {
    let _ = events.send(AppEvent::CommandFailed { message });
    CommandOutcome::Unchanged
}

fn dedup_paths(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.sort();
    paths.dedup();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LivenessPolicy;
    use crate::infra::{OverrideStore, SourceMonitor, SourceRoots};
    use std::fs;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::mpsc::channel;
    use tempfile::tempdir;

    const RECV_TIMEOUT: Duration = Duration::from_secs(10);

    fn write_log(projects_dir: &std::path::Path, project: &str, stem: &str) {
        let project_dir = projects_dir.join(project);
        fs::create_dir_all(&project_dir).expect("create project dir");
        let path = project_dir.join(format!("{stem}.jsonl"));
        let mut file = fs::File::create(&path).expect("create log");
        writeln!(
            file,
            r#"{{"type":"user","timestamp":"2026-03-01T10:00:00Z","message":{{"content":"hello"}}}}"#
        )
        .expect("write");
    }

    fn next_sessions(events: &Receiver<AppEvent>) -> Vec<Session> {
        loop {
            match events.recv_timeout(RECV_TIMEOUT).expect("event") {
                AppEvent::SessionsUpdated(sessions) => return sessions,
                AppEvent::CommandFailed { .. } => {}
            }
        }
    }

    #[test]
    fn monitor_loop_serves_commands_and_shuts_down() {
        let dir = tempdir().expect("tempdir");
        let projects_dir = dir.path().join("projects");
        fs::create_dir_all(&projects_dir).expect("create");
        write_log(&projects_dir, "-tmp-alpha", "s1");

        let overrides = Arc::new(OverrideStore::open(dir.path().join("config")));
        let monitor = SourceMonitor::new(
            SourceKind::Claude,
            SourceRoots {
                projects_dir,
                todos_dir: None,
            },
            LivenessPolicy::EventWindow {
                window: Duration::from_secs(120),
            },
            overrides.clone(),
        );
        let aggregator = MultiSourceMonitor::new(vec![monitor], overrides.clone());

        let (command_tx, command_rx) = channel();
        let (event_tx, event_rx) = channel();
        let handle = std::thread::spawn(move || {
            run_monitor(aggregator, command_rx, event_tx, MonitorConfig::default());
        });

        let initial = next_sessions(&event_rx);
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].session_id, "s1");
        assert!(!initial[0].is_pinned);

        command_tx
            .send(AppCommand::TogglePin {
                session_id: "s1".to_string(),
                pinned: true,
            })
            .expect("send");
        let updated = next_sessions(&event_rx);
        assert!(updated[0].is_pinned);

        command_tx
            .send(AppCommand::TogglePin {
                session_id: "ghost".to_string(),
                pinned: true,
            })
            .expect("send");
        let failure = event_rx.recv_timeout(RECV_TIMEOUT).expect("event");
        assert_eq!(
            failure,
            AppEvent::CommandFailed {
                message: "no such session: ghost".to_string()
            }
        );

        command_tx
            .send(AppCommand::Rename {
                session_id: "s1".to_string(),
                name: "alpha".to_string(),
            })
            .expect("send");
        let renamed = next_sessions(&event_rx);
        assert_eq!(renamed[0].custom_name, "alpha");

        command_tx.send(AppCommand::Rescan).expect("send");
        let rescanned = next_sessions(&event_rx);
        assert_eq!(rescanned.len(), 1);
        assert!(rescanned[0].is_pinned);

        // Writers signal reload rather than reconcilers re-reading on their
        // own; an out-of-band store write shows up after ReloadOverrides.
        overrides.set_pinned("s1", false).expect("unpin");
        command_tx.send(AppCommand::ReloadOverrides).expect("send");
        let reloaded = next_sessions(&event_rx);
        assert!(!reloaded[0].is_pinned);

        command_tx.send(AppCommand::Shutdown).expect("send");
        handle.join().expect("join");
    }

    #[test]
    fn dropping_the_command_sender_stops_the_loop() {
        let dir = tempdir().expect("tempdir");
        let projects_dir = dir.path().join("projects");
        fs::create_dir_all(&projects_dir).expect("create");

        let overrides = Arc::new(OverrideStore::open(dir.path().join("config")));
        let monitor = SourceMonitor::new(
            SourceKind::Claude,
            SourceRoots {
                projects_dir,
                todos_dir: None,
            },
            LivenessPolicy::default(),
            overrides.clone(),
        );
        let aggregator = MultiSourceMonitor::new(vec![monitor], overrides);

        let (command_tx, command_rx) = channel::<AppCommand>();
        let (event_tx, event_rx) = channel();
        let handle = std::thread::spawn(move || {
            run_monitor(aggregator, command_rx, event_tx, MonitorConfig::default());
        });

        let _ = next_sessions(&event_rx);
        drop(command_tx);
        handle.join().expect("join");
    }

    #[test]
    fn dedup_paths_collapses_duplicates() {
        let paths = vec![
            PathBuf::from("/a/s.jsonl"),
            PathBuf::from("/a/s.jsonl"),
            PathBuf::from("/a/t.jsonl"),
        ];
        assert_eq!(
            dedup_paths(paths),
            vec![PathBuf::from("/a/s.jsonl"), PathBuf::from("/a/t.jsonl")]
        );
    }
}
