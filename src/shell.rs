/// Resolves the shell binary and login-flag for an interactive PTY: a
/// caller-preferred shell takes precedence (user-shell registry lets a
/// caller pin a specific shell per terminal), falling back to
/// `$SHELL`/`COMSPEC`.
pub fn resolve_shell(preferred: Option<&str>) -> (String, bool) {
    if let Some(p) = preferred {
        if !p.is_empty() {
            return (p.to_string(), cfg!(unix));
        }
    }

    #[cfg(unix)]
    {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        (shell, true)
    }
    #[cfg(windows)]
    {
        let shell = std::env::var("COMSPEC").unwrap_or_else(|_| "powershell.exe".to_string());
        (shell, false)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn preferred_shell_wins() {
        let (shell, login) = resolve_shell(Some("/bin/zsh"));
        assert_eq!(shell, "/bin/zsh");
        assert!(login);
    }
}
