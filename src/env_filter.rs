/// Prefixes stripped from a child's environment before spawn. These are
/// injected by npm/corepack into its own child processes and otherwise leak
/// into every PTY session spawned from a shell that itself ran under npm.
const STRIPPED_PREFIXES: &[&str] = &["npm_config_", "npm_package_", "npm_lifecycle_"];

/// Exact-match keys stripped alongside the prefixes above.
const STRIPPED_KEYS: &[&str] = &["npm_execpath", "npm_node_execpath"];

/// Returns true if `key` should be excluded from a spawned child's environment.
pub fn is_filtered_env_key(key: &str) -> bool {
    STRIPPED_KEYS.contains(&key) || STRIPPED_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Builds the child environment: current process environment, minus filtered
/// keys, overlaid with the caller-supplied overrides.
pub fn build_child_env(
    overrides: &std::collections::HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut env: std::collections::HashMap<String, String> = std::env::vars()
        .filter(|(k, _)| !is_filtered_env_key(k))
        .collect();

    for (k, v) in overrides {
        env.insert(k.clone(), v.clone());
    }

    env.into_iter().collect()
}

/// Environment variables stripped from every VCS subprocess in addition to
/// `GIT_TERMINAL_PROMPT=0` / `LC_ALL=C`, which are always set rather than
/// merely stripped (see `crate::vcs::runner::Git::run`).
pub const VCS_STRIPPED_KEYS: &[&str] = &["GIT_DIR", "GIT_WORK_TREE"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_npm_prefixes_and_exact_keys() {
        assert!(is_filtered_env_key("npm_config_registry"));
        assert!(is_filtered_env_key("npm_package_name"));
        assert!(is_filtered_env_key("npm_lifecycle_event"));
        assert!(is_filtered_env_key("npm_execpath"));
        assert!(!is_filtered_env_key("PATH"));
    }
}
