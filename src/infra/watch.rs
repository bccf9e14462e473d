use notify::event::EventKind;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, channel};
use thiserror::Error;

/// Raised by the notifier thread; drained from the main loop. An empty path
/// list means the watcher could not attribute the event and the whole source
/// should be rescanned.
#[derive(Clone, Debug)]
pub enum WatchSignal {
    Changed(Vec<PathBuf>),
    Error(String),
}

#[derive(Debug)]
pub struct SourceDirWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<WatchSignal>,
}

impl SourceDirWatcher {
    pub fn try_recv(&self) -> Option<WatchSignal> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug, Error)]
pub enum WatchSourceDirError {
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),
}

pub fn watch_source_dir(
    path: &Path,
    log_extension: &'static str,
) -> Result<SourceDirWatcher, WatchSourceDirError> {
    let (tx, rx) = channel::<WatchSignal>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if let Some(signal) = signal_for_event(&event, log_extension) {
                    let _ = tx.send(signal);
                }
            }
            Err(error) => {
                let _ = tx.send(WatchSignal::Error(error.to_string()));
            }
        },
        Config::default(),
    )?;

    watcher.watch(path, RecursiveMode::Recursive)?;

    Ok(SourceDirWatcher {
        _watcher: watcher,
        rx,
    })
}

fn signal_for_event(event: &notify::Event, log_extension: &str) -> Option<WatchSignal> {
    if matches!(event.kind, EventKind::Access(_)) {
        return None;
    }
    if event.paths.is_empty() {
        return Some(WatchSignal::Changed(Vec::new()));
    }

    let changed: Vec<PathBuf> = event
        .paths
        .iter()
        .filter(|path| {
            path.extension().and_then(|ext| ext.to_str()) == Some(log_extension)
        })
        .cloned()
        .collect();

    if changed.is_empty() {
        None
    } else {
        Some(WatchSignal::Changed(changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, EventAttributes};

    fn event(kind: EventKind, paths: Vec<PathBuf>) -> notify::Event {
        notify::Event {
            kind,
            paths,
            attrs: EventAttributes::default(),
        }
    }

    #[test]
    fn access_events_are_ignored() {
        let ev = event(
            EventKind::Access(AccessKind::Any),
            vec![PathBuf::from("/roots/p/s.jsonl")],
        );
        assert!(signal_for_event(&ev, "jsonl").is_none());
    }

    #[test]
    fn only_log_files_trigger_signals() {
        let ev = event(
            EventKind::Create(CreateKind::File),
            vec![
                PathBuf::from("/roots/p/s.jsonl"),
                PathBuf::from("/roots/p/notes.txt"),
            ],
        );
        let Some(WatchSignal::Changed(paths)) = signal_for_event(&ev, "jsonl") else {
            panic!("expected change signal");
        };
        assert_eq!(paths, vec![PathBuf::from("/roots/p/s.jsonl")]);

        let ev = event(
            EventKind::Create(CreateKind::File),
            vec![PathBuf::from("/roots/p/notes.txt")],
        );
        assert!(signal_for_event(&ev, "jsonl").is_none());
    }

    #[test]
    fn pathless_events_request_a_full_rescan() {
        let ev = event(EventKind::Any, Vec::new());
        let Some(WatchSignal::Changed(paths)) = signal_for_event(&ev, "jsonl") else {
            panic!("expected change signal");
        };
        assert!(paths.is_empty());
    }
}
