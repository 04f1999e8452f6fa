//! Command-string normalization (§4.5): stripping shell-specific history
//! prefixes and `HISTTIMEFORMAT` timestamps before a command is considered
//! for persistence.

use regex::Regex;

/// The three shells the capture pipeline is invoked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
}

impl Shell {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "bash" => Some(Shell::Bash),
            "zsh" => Some(Shell::Zsh),
            "fish" => Some(Shell::Fish),
            _ => None,
        }
    }
}

/// Converts a `strftime`-style `HISTTIMEFORMAT` format string into a regex
/// matching the timestamp prefix bash prepends to each history line, per
/// the format→regex mapping in §4.5.
pub fn histtimeformat_to_regex(format: &str) -> String {
    let mut out = String::from("^");
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push_str(&regex::escape(&c.to_string()));
            continue;
        }
        match chars.next() {
            Some('Y') => out.push_str(r"[0-9]{4}"),
            Some('m') => out.push_str(r"[0-9]{2}"),
            Some('d') => out.push_str(r"[0-9]{2}"),
            Some('H') => out.push_str(r"[0-9]{2}"),
            Some('M') => out.push_str(r"[0-9]{2}"),
            Some('S') => out.push_str(r"[0-9]{2}"),
            Some('F') => out.push_str(r"[0-9]{4}-[0-9]{2}-[0-9]{2}"),
            Some('T') => out.push_str(r"[0-9]{2}:[0-9]{2}:[0-9]{2}"),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// Strips a leading `HISTTIMEFORMAT`-derived prefix from `command`, if
/// `format` is set. Only applies to bash.
pub fn strip_histtimeformat_prefix(command: &str, format: Option<&str>) -> String {
    let Some(format) = format else {
        return command.to_string();
    };
    let pattern = histtimeformat_to_regex(format);
    match Regex::new(&pattern) {
        Ok(re) => re.replace(command, "").to_string(),
        Err(_) => command.to_string(),
    }
}

/// Strips bash's leading history-number prefix, e.g. `"  123  ls /foo"` →
/// `"ls /foo"`.
pub fn strip_bash_history_number(command: &str) -> String {
    static PATTERN: &str = r"^\s*[0-9]+\s+";
    match Regex::new(PATTERN) {
        Ok(re) => re.replace(command, "").to_string(),
        Err(_) => command.to_string(),
    }
}

/// Strips zsh's `: <epoch>:<elapsed>;` extended-history prefix when
/// present.
pub fn strip_zsh_prefix(command: &str) -> String {
    static PATTERN: &str = r"^:\s*[0-9]+:[0-9]+;";
    match Regex::new(PATTERN) {
        Ok(re) => re.replacen(command, 1, "").to_string(),
        Err(_) => command.to_string(),
    }
}

/// Applies every shell-specific normalization step and decides whether the
/// resulting command should be recorded at all. Returns `None` for an
/// empty, whitespace-only, or leading-space command — the shell convention
/// for "do not record" (§4.5, §8).
pub fn normalize_command(shell: Shell, raw: &str, histtimeformat: Option<&str>) -> Option<String> {
    if raw.starts_with(' ') {
        return None;
    }

    let mut command = raw.to_string();
    match shell {
        Shell::Bash => {
            command = strip_histtimeformat_prefix(&command, histtimeformat);
            command = strip_bash_history_number(&command);
        }
        Shell::Zsh => {
            command = strip_zsh_prefix(&command);
        }
        Shell::Fish => {}
    }

    if command.trim().is_empty() {
        return None;
    }

    Some(command)
}

/// Renders `cwd` with the user's home directory replaced by `~`.
pub fn render_cwd_tilde(cwd: &str, home_directory: &str) -> String {
    tidelog_core::entry::HistoryEntry::render_cwd_tilde(cwd, home_directory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histtimeformat_maps_known_directives() {
        assert_eq!(
            histtimeformat_to_regex("%F %T  "),
            r"^[0-9]{4}-[0-9]{2}-[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2}  "
        );
    }

    #[test]
    fn histtimeformat_prefix_is_stripped() {
        let stripped = strip_histtimeformat_prefix("2023-11-14 10:00:00  ls -la", Some("%F %T  "));
        assert_eq!(stripped, "ls -la");
    }

    #[test]
    fn bash_history_number_is_stripped() {
        assert_eq!(strip_bash_history_number("  123  ls /foo"), "ls /foo");
    }

    #[test]
    fn zsh_prefix_is_stripped() {
        assert_eq!(strip_zsh_prefix(": 1700000000:0;ls -la"), "ls -la");
    }

    #[test]
    fn zsh_command_without_prefix_is_unchanged() {
        assert_eq!(strip_zsh_prefix("ls -la"), "ls -la");
    }

    #[test]
    fn leading_space_command_is_dropped() {
        assert_eq!(normalize_command(Shell::Bash, " ls -la", None), None);
    }

    #[test]
    fn empty_command_is_dropped() {
        assert_eq!(normalize_command(Shell::Bash, "   123  ", None), None);
    }

    #[test]
    fn full_bash_normalization_pipeline() {
        let raw = "2023-11-14 10:00:00  42  ls -la";
        let result = normalize_command(Shell::Bash, raw, Some("%F %T  "));
        assert_eq!(result, Some("ls -la".to_string()));
    }

    #[test]
    fn fish_command_passes_through_unchanged() {
        assert_eq!(normalize_command(Shell::Fish, "ls -la", None), Some("ls -la".to_string()));
    }
}
