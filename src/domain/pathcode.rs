use std::path::{Path, PathBuf};

/// Search-space guard: beyond this many hyphen tokens the probing search is
/// skipped and naive replacement used directly.
const MAX_PROBE_TOKENS: usize = 32;

/// Decodes a flattened project directory name (`/` replaced by `-`, leading
/// `/` stripped) back into a real path, e.g. `-Users-alice-Code-my-project`
/// into `/Users/alice/Code/my-project`.
///
/// Naive replacement is wrong whenever a component itself contains a hyphen,
/// so candidate splits are probed against the filesystem and the first
/// existing path wins, preferring maximal splitting.
pub fn decode_project_dir_name(encoded: &str) -> String {
    decode_with_root(Path::new("/"), encoded)
}

pub fn decode_with_root(root: &Path, encoded: &str) -> String {
    let cleaned = encoded.trim_start_matches('-');
    if cleaned.is_empty() {
        return "/".to_string();
    }

    let tokens: Vec<&str> = cleaned.split('-').collect();
    if tokens.len() <= MAX_PROBE_TOKENS {
        let mut components: Vec<String> = Vec::new();
        if probe_split(root, &tokens, 0, &mut components) {
            return format!("/{}", components.join("/"));
        }
    }

    let decoded = format!("/{}", cleaned.replace('-', "/"));
    tracing::warn!(
        encoded,
        decoded = decoded.as_str(),
        "no existing path matches encoded directory name, using naive replacement"
    );
    decoded
}

fn probe_split(root: &Path, tokens: &[&str], index: usize, components: &mut Vec<String>) -> bool {
    if index == tokens.len() {
        return candidate_path(root, components).exists();
    }

    // Starting a new component finalizes everything before it, so the
    // accumulated prefix must already exist as a directory.
    if components.is_empty() || candidate_path(root, components).is_dir() {
        components.push(tokens[index].to_string());
        if probe_split(root, tokens, index + 1, components) {
            return true;
        }
        components.pop();
    }

    if let Some(saved_len) = components.last().map(String::len) {
        if let Some(last) = components.last_mut() {
            last.push('-');
            last.push_str(tokens[index]);
        }
        if probe_split(root, tokens, index + 1, components) {
            return true;
        }
        if let Some(last) = components.last_mut() {
            last.truncate(saved_len);
        }
    }

    false
}

fn candidate_path(root: &Path, components: &[String]) -> PathBuf {
    let mut path = root.to_path_buf();
    for component in components {
        path.push(component);
    }
    path
}

/// Number of path components in a decoded display path.
pub fn component_count(decoded: &str) -> usize {
    decoded.split('/').filter(|part| !part.is_empty()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn recovers_hyphenated_component_by_probing() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("Users/alice/Code/my-project")).expect("create");

        let decoded = decode_with_root(dir.path(), "-Users-alice-Code-my-project");
        assert_eq!(decoded, "/Users/alice/Code/my-project");
    }

    #[test]
    fn prefers_maximal_splitting_when_both_exist() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("a/b")).expect("create split");
        fs::create_dir_all(dir.path().join("a-b")).expect("create merged");

        let decoded = decode_with_root(dir.path(), "-a-b");
        assert_eq!(decoded, "/a/b");
    }

    #[test]
    fn falls_back_to_naive_replacement_when_nothing_exists() {
        let dir = tempdir().expect("tempdir");
        let decoded = decode_with_root(dir.path(), "-ghost-town-project");
        assert_eq!(decoded, "/ghost/town/project");
    }

    #[test]
    fn oversized_token_count_skips_probing() {
        let dir = tempdir().expect("tempdir");
        let encoded = format!("-{}", vec!["x"; 40].join("-"));
        let decoded = decode_with_root(dir.path(), &encoded);
        assert_eq!(decoded, format!("/{}", vec!["x"; 40].join("/")));
    }

    #[test]
    fn empty_and_root_inputs_decode_to_root() {
        let dir = tempdir().expect("tempdir");
        assert_eq!(decode_with_root(dir.path(), "-"), "/");
        assert_eq!(decode_with_root(dir.path(), ""), "/");
    }

    #[test]
    fn counts_decoded_components() {
        assert_eq!(component_count("/Users/alice/Code"), 3);
        assert_eq!(component_count("/tmp"), 1);
        assert_eq!(component_count("/"), 0);
    }
}
