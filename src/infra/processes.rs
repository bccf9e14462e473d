use crate::domain::normalize_process_cwd;
use sysinfo::{ProcessesToUpdate, System};

/// Working directories of every running process whose name contains
/// `name_pattern`, normalized for comparison against encoded project
/// directory names. Enumeration problems degrade to an empty list; the
/// caller treats that as "no matching processes" for the pass.
pub fn matching_process_cwds(name_pattern: &str) -> Vec<String> {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let mut cwds: Vec<String> = sys
        .processes()
        .values()
        .filter(|process| {
            process
                .name()
                .to_string_lossy()
                .to_ascii_lowercase()
                .contains(name_pattern)
        })
        .filter_map(|process| process.cwd().map(normalize_process_cwd))
        .collect();

    cwds.sort();
    cwds.dedup();
    cwds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumeration_does_not_panic() {
        // No particular process is guaranteed to exist under test; this only
        // exercises the sysinfo plumbing.
        let _ = matching_process_cwds("claude");
    }

    #[test]
    fn unmatched_pattern_yields_no_cwds() {
        let cwds = matching_process_cwds("no-process-is-called-this-7f3a");
        assert!(cwds.is_empty());
    }
}
