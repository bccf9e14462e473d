use std::path::Path;
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;

pub const DEFAULT_ACTIVE_WINDOW: Duration = Duration::from_secs(120);

/// How "is this session being worked on" is inferred. The definition was
/// iterated on; all three stages remain selectable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LivenessPolicy {
    /// Active iff the log file was modified within the window.
    MtimeWindow { window: Duration },
    /// Active iff the newest parsed event timestamp falls within the window.
    /// Preferred over mtime when the writer buffers aggressively.
    EventWindow { window: Duration },
    /// Active iff a matching process has a working directory ending in the
    /// session's encoded project directory. No grace period: the moment no
    /// process matches, the session is inactive.
    ProcessMatch,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self::MtimeWindow {
            window: DEFAULT_ACTIVE_WINDOW,
        }
    }
}

/// Evidence gathered per reconciliation pass. Pinning is deliberately absent:
/// it affects display inclusion only, never the liveness computation.
#[derive(Clone, Debug)]
pub struct LivenessEvidence<'a> {
    pub file_modified: Option<SystemTime>,
    pub last_activity: OffsetDateTime,
    /// Working directories of candidate processes, already normalized with
    /// [`normalize_process_cwd`].
    pub process_cwds: &'a [String],
}

pub fn classify(
    policy: LivenessPolicy,
    evidence: &LivenessEvidence<'_>,
    encoded_project_dir: &str,
    now: OffsetDateTime,
) -> bool {
    match policy {
        LivenessPolicy::MtimeWindow { window } => evidence
            .file_modified
            .map(OffsetDateTime::from)
            .is_some_and(|modified| within_window(now, modified, window)),
        LivenessPolicy::EventWindow { window } => {
            within_window(now, evidence.last_activity, window)
        }
        LivenessPolicy::ProcessMatch => evidence
            .process_cwds
            .iter()
            .any(|cwd| cwd.ends_with(encoded_project_dir)),
    }
}

/// Flattens a working directory the same way the source tools flatten
/// project paths, so it can be compared against encoded directory names.
pub fn normalize_process_cwd(cwd: &Path) -> String {
    cwd.display().to_string().replace(['/', '\\'], "-")
}

fn within_window(now: OffsetDateTime, then: OffsetDateTime, window: Duration) -> bool {
    let window_seconds = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
    (now - then).whole_seconds() < window_seconds
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use time::macros::datetime;

    const ENCODED: &str = "-Users-alice-Code-my-project";

    fn evidence(last_activity: OffsetDateTime) -> LivenessEvidence<'static> {
        LivenessEvidence {
            file_modified: None,
            last_activity,
            process_cwds: &[],
        }
    }

    #[test]
    fn mtime_window_expires_without_new_writes() {
        let policy = LivenessPolicy::default();
        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let ev = LivenessEvidence {
            file_modified: Some(modified),
            ..evidence(datetime!(2026-03-01 10:00 UTC))
        };

        let just_after = OffsetDateTime::from(modified) + time::Duration::seconds(60);
        assert!(classify(policy, &ev, ENCODED, just_after));

        // Same evidence, only the clock moved: the flag must drop.
        let later = OffsetDateTime::from(modified) + time::Duration::seconds(120);
        assert!(!classify(policy, &ev, ENCODED, later));
    }

    #[test]
    fn mtime_window_without_metadata_is_inactive() {
        let ev = evidence(datetime!(2026-03-01 10:00 UTC));
        assert!(!classify(
            LivenessPolicy::default(),
            &ev,
            ENCODED,
            datetime!(2026-03-01 10:00 UTC)
        ));
    }

    #[test]
    fn event_window_uses_parsed_timestamps() {
        let policy = LivenessPolicy::EventWindow {
            window: DEFAULT_ACTIVE_WINDOW,
        };
        let ev = evidence(datetime!(2026-03-01 10:00 UTC));
        assert!(classify(policy, &ev, ENCODED, datetime!(2026-03-01 10:01 UTC)));
        assert!(!classify(policy, &ev, ENCODED, datetime!(2026-03-01 10:03 UTC)));
    }

    #[test]
    fn process_match_compares_encoded_suffix() {
        let cwds = vec![normalize_process_cwd(&PathBuf::from(
            "/Users/alice/Code/my-project",
        ))];
        let ev = LivenessEvidence {
            process_cwds: &cwds,
            ..evidence(datetime!(2026-03-01 10:00 UTC))
        };
        let now = datetime!(2026-03-01 10:00 UTC);
        assert!(classify(LivenessPolicy::ProcessMatch, &ev, ENCODED, now));
        assert!(!classify(
            LivenessPolicy::ProcessMatch,
            &ev,
            "-Users-alice-Code-other",
            now
        ));
    }

    #[test]
    fn process_match_with_no_processes_is_inactive_immediately() {
        let ev = evidence(datetime!(2026-03-01 10:00 UTC));
        assert!(!classify(
            LivenessPolicy::ProcessMatch,
            &ev,
            ENCODED,
            datetime!(2026-03-01 10:00 UTC)
        ));
    }
}
