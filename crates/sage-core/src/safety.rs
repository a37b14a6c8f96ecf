//! Path and command safety checks shared by the filesystem and shell tools.
//!
//! Two independent gates: `PathSafety` keeps filesystem operations inside a
//! sandbox root, and `CommandSafety` flags shell commands that look
//! destructive or reach outside the sandbox. Neither gate denies outright —
//! both defer to a confirmation callback so a host can prompt the operator.

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Expands a leading `~` to the current user's home directory. Mirrors
/// shell tilde-expansion; only the leading-component form is handled since
/// that's the only form tools are expected to pass.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    } else if path == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(path)
}

/// Lexically resolves `.` and `..` components without touching the
/// filesystem, so a path that doesn't exist yet (a file about to be
/// created) can still be checked.
fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Confines filesystem operations to a sandbox root.
#[derive(Clone, Debug)]
pub struct PathSafety {
    root: PathBuf,
}

impl PathSafety {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = if root.is_absolute() {
            normalize_lexical(&root)
        } else {
            normalize_lexical(&std::env::current_dir().unwrap_or_default().join(root))
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `path` (expanding `~`, joining onto the sandbox root if
    /// relative) without requiring it to exist.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let expanded = expand_tilde(path);
        let joined = if expanded.is_absolute() {
            expanded
        } else {
            self.root.join(expanded)
        };
        normalize_lexical(&joined)
    }

    /// True if `path`, once resolved, falls inside the sandbox root.
    /// Uses a separator-aware prefix check (`root` itself and
    /// `root/anything` both pass; `root-sibling` does not).
    pub fn is_safe(&self, path: &str) -> bool {
        let resolved = self.resolve(path);
        resolved == self.root || resolved.starts_with(&self.root)
    }
}

/// A dangerous-command match: the pattern category, a human-readable reason,
/// and the offending text.
#[derive(Debug, Clone, PartialEq)]
pub struct DangerMatch {
    pub category: String,
    pub reason: String,
    pub pattern: String,
}

struct DangerousPattern {
    category: &'static str,
    reason: &'static str,
    regex: Regex,
}

/// `DELETE FROM ... ` with no `WHERE` clause anywhere after it. The `regex`
/// crate has no lookaround support, so unlike the Python original's single
/// `\bDELETE\s+FROM\b(?!.*WHERE)` pattern, this is split into a plain
/// `\bDELETE\s+FROM\b` match followed by a case-insensitive substring search
/// of the remainder of the command for `WHERE`.
fn delete_from_without_where() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bDELETE\s+FROM\b").expect("delete_from regex must compile"))
}

fn find_delete_from_without_where(command: &str) -> Option<DangerMatch> {
    let m = delete_from_without_where().find(command)?;
    let remainder = &command[m.end()..];
    if remainder.to_lowercase().contains("where") {
        return None;
    }
    Some(DangerMatch {
        category: "delete_from_no_where".to_string(),
        reason: "deletes all rows (no WHERE clause)".to_string(),
        pattern: m.as_str().to_string(),
    })
}

/// The dangerous-command catalog, ported pattern-for-pattern from
/// `code_crafter/tools/shell.py::DANGEROUS_COMMAND_PATTERNS` (case-insensitive,
/// `\b`-bounded where the original uses it) rather than approximated with
/// substring checks.
fn dangerous_patterns() -> &'static Vec<DangerousPattern> {
    static PATTERNS: OnceLock<Vec<DangerousPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let specs: &[(&str, &str, &str)] = &[
            ("rm", r"(?i)\brm\s+", "removes files/directories"),
            ("rm_recursive", r"(?i)\brm\b.*-.*r", "recursively removes files/directories"),
            ("rmdir", r"(?i)\brmdir\s+", "removes directories"),
            ("del_windows", r"(?i)\bdel\s+", "deletes files (Windows)"),
            ("rd_windows", r"(?i)\brd\s+", "removes directories (Windows)"),
            ("rd_recursive_windows", r"(?i)\brd\b.*/s", "recursively removes directories (Windows)"),
            ("mkfs", r"(?i)\bmkfs\b", "formats filesystem"),
            ("fdisk", r"(?i)\bfdisk\b", "modifies disk partitions"),
            ("dd", r"(?i)\bdd\s+", "low-level disk copy (can overwrite data)"),
            ("format_windows", r"(?i)\bformat\s+", "formats drive (Windows)"),
            ("chmod_777", r"(?i)\bchmod\s+.*777", "sets world-writable permissions"),
            ("chown", r"(?i)\bchown\s+", "changes file ownership"),
            ("sudo", r"(?i)\bsudo\s+", "runs with elevated privileges"),
            ("su", r"(?i)\bsu\s+", "switches user"),
            ("disk_device_write", r"(?i)>\s*/dev/sd[a-z]", "writes directly to disk device"),
            ("move_to_devnull", r"(?i)\bmv\s+.*\s+/dev/null", "moves files to /dev/null"),
            ("curl_pipe_shell", r"(?i)\bcurl\b.*\|\s*(ba)?sh", "pipes remote content to shell"),
            ("wget_pipe_shell", r"(?i)\bwget\b.*\|\s*(ba)?sh", "pipes remote content to shell"),
            ("git_force_push_long", r"(?i)\bgit\s+push\b.*--force", "force pushes (can overwrite history)"),
            ("git_force_push_short", r"(?i)\bgit\s+push\b.*-f\b", "force pushes (can overwrite history)"),
            ("git_hard_reset", r"(?i)\bgit\s+reset\b.*--hard", "hard reset (discards changes)"),
            ("git_clean_fd", r"(?i)\bgit\s+clean\b.*-fd", "removes untracked files and directories"),
            ("drop_database", r"(?i)\bDROP\s+(DATABASE|TABLE|SCHEMA)\b", "drops database objects"),
            ("truncate_table", r"(?i)\bTRUNCATE\s+", "truncates table data"),
            ("kill_9", r"(?i)\bkill\s+-9\s+", "force kills process"),
            ("killall", r"(?i)\bkillall\s+", "kills processes by name"),
            ("pkill", r"(?i)\bpkill\s+", "kills processes by pattern"),
            ("taskkill_windows", r"(?i)\btaskkill\s+", "kills processes (Windows)"),
            ("shutdown", r"(?i)\bshutdown\b", "shuts down system"),
            ("reboot", r"(?i)\breboot\b", "reboots system"),
            ("runlevel_change", r"(?i)\binit\s+[06]\b", "changes runlevel (shutdown/reboot)"),
        ];
        specs
            .iter()
            .map(|(category, pattern, reason)| DangerousPattern {
                category,
                reason,
                regex: Regex::new(pattern).expect("dangerous pattern regex must compile"),
            })
            .collect()
    })
}

/// Commands whose leading verb is on this allowlist skip the out-of-sandbox
/// path scan entirely, since they're read-only, network-scoped, or
/// package-manager invocations that legitimately touch paths outside the
/// workspace (e.g. a global cargo registry cache). Ported verbatim from
/// `code_crafter/tools/shell.py::SAFE_OUTSIDE_PATH_COMMANDS` — a command
/// line matching any of these skips the scan entirely, rather than the
/// path-token check merely ignoring some of its tokens.
const SAFE_COMMAND_PREFIXES: &[&str] = &[
    "cd ", "echo ", "which ", "where ", "type ",
    "git clone ", "git remote ", "git fetch ", "git pull ", "git push ",
    "pip install ", "npm install ", "yarn add ", "cargo ",
];

/// Extracts path-shaped tokens from a command line, mirroring
/// `code_crafter/tools/shell.py::PATH_EXTRACTION_PATTERNS`: absolute Unix
/// paths, home-anchored paths, parent-escaping (`../`) paths, Windows drive
/// paths, and UNC paths.
fn extract_path_tokens(command: &str) -> Vec<String> {
    static TOKEN_RES: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = TOKEN_RES.get_or_init(|| {
        [
            r#"(?:^|[\s'"])(/[A-Za-z0-9_\-./\\]+)"#,
            r#"(?:^|[\s'"])(~[A-Za-z0-9_\-./\\]*)"#,
            r#"(?:^|[\s'"])(\.\.[/\\][A-Za-z0-9_\-./\\]*)"#,
            r#"(?:^|[\s'"])([A-Za-z]:[/\\][A-Za-z0-9_\-./\\]*)"#,
            r#"(?:^|[\s'"])(\\\\[A-Za-z0-9_\-./\\]+)"#,
        ]
        .iter()
        .map(|p| Regex::new(p).expect("path extraction regex must compile"))
        .collect()
    });

    patterns
        .iter()
        .flat_map(|re| re.captures_iter(command).map(|c| c[1].to_string()))
        .collect()
}

/// Flags shell commands that look destructive or step outside a sandbox.
#[derive(Clone)]
pub struct CommandSafety {
    path_safety: Arc<PathSafety>,
}

impl CommandSafety {
    pub fn new(path_safety: Arc<PathSafety>) -> Self {
        Self { path_safety }
    }

    /// Returns every dangerous-pattern match found in `command`. Empty
    /// means no known-destructive shape was found (not a safety guarantee,
    /// just a blocklist).
    pub fn dangerous_matches(&self, command: &str) -> Vec<DangerMatch> {
        let mut matches: Vec<DangerMatch> = dangerous_patterns()
            .iter()
            .filter_map(|p| {
                p.regex.find(command).map(|m| DangerMatch {
                    category: p.category.to_string(),
                    reason: p.reason.to_string(),
                    pattern: m.as_str().to_string(),
                })
            })
            .collect();
        matches.extend(find_delete_from_without_where(command));
        matches
    }

    /// Returns path tokens in `command` that resolve outside the sandbox,
    /// skipping commands whose prefix is on the read-only/network allowlist.
    pub fn out_of_sandbox_paths(&self, command: &str) -> Vec<String> {
        let trimmed = command.trim_start();
        if SAFE_COMMAND_PREFIXES
            .iter()
            .any(|prefix| trimmed.starts_with(prefix))
        {
            return Vec::new();
        }

        extract_path_tokens(command)
            .into_iter()
            .filter(|token| !self.path_safety.is_safe(token))
            .collect()
    }

    /// True if the command needs operator confirmation: either it matches a
    /// known-dangerous pattern or it touches paths outside the sandbox.
    pub fn needs_confirmation(&self, command: &str) -> bool {
        !self.dangerous_matches(command).is_empty() || !self.out_of_sandbox_paths(command).is_empty()
    }
}

/// Callback a host installs to ask the operator whether to proceed with a
/// flagged action. `None` (the default) denies every confirmation request —
/// a host must explicitly wire one up to allow anything through.
///
/// Passed around as a trait object rather than a process-wide static so
/// tests and multiple concurrent sessions can each supply their own policy
/// (see §9's guidance against true global mutable state).
#[async_trait::async_trait]
pub trait ConfirmationCallback: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Denies every request. The default when no host callback is installed.
pub struct DenyAll;

#[async_trait::async_trait]
impl ConfirmationCallback for DenyAll {
    async fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

/// Builds the banner shown to the operator before a flagged shell command
/// runs, listing the dangerous-pattern categories and out-of-sandbox paths
/// found. Shape grounded in `shell.py::run_command`'s confirmation prompt.
pub fn confirmation_banner(command: &str, dangers: &[DangerMatch], out_of_sandbox: &[String]) -> String {
    let mut lines = vec!["DANGEROUS COMMAND DETECTED".to_string(), String::new()];
    lines.push(format!("Command: {command}"));
    if let Some(first) = dangers.first() {
        lines.push(format!("Reason: {}", first.reason));
    }
    if dangers.len() > 1 {
        lines.push("Other flagged patterns:".to_string());
        for d in &dangers[1..] {
            lines.push(format!("  - {} ({})", d.category, d.reason));
        }
    }
    if !out_of_sandbox.is_empty() {
        lines.push("Paths outside the sandbox:".to_string());
        for p in out_of_sandbox {
            lines.push(format!("  - {p}"));
        }
    }
    lines.push(String::new());
    lines.push("Execute this command?".to_string());
    lines.join("\n")
}

/// Builds the banner shown to the operator before a filesystem operation
/// touching a path outside the sandbox proceeds. Shape grounded in
/// `filesystem.py::_validate_path`'s confirmation prompt.
pub fn path_confirmation_banner(operation: &str, path: &str, resolved: &Path, root: &Path) -> String {
    format!(
        "OUTSIDE WORKING DIRECTORY\n\nOperation: {operation}\nPath: {path}\nResolved: {}\nWorking directory: {}\n\nAllow this operation?",
        resolved.display(),
        root.display(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_paths_under_the_sandbox_root() {
        let ps = PathSafety::new("/sandbox");
        assert_eq!(ps.resolve("foo.txt"), PathBuf::from("/sandbox/foo.txt"));
    }

    #[test]
    fn rejects_parent_dir_escape() {
        let ps = PathSafety::new("/sandbox");
        assert!(!ps.is_safe("../outside.txt"));
    }

    #[test]
    fn rejects_sibling_directory_with_shared_prefix() {
        let ps = PathSafety::new("/sandbox");
        assert!(!ps.is_safe("/sandbox-other/file.txt"));
    }

    #[test]
    fn allows_the_root_itself() {
        let ps = PathSafety::new("/sandbox");
        assert!(ps.is_safe("/sandbox"));
        assert!(ps.is_safe("."));
    }

    #[test]
    fn expands_leading_tilde_against_home() {
        std::env::set_var("HOME", "/home/op");
        let ps = PathSafety::new("/sandbox");
        assert_eq!(ps.resolve("~/file.txt"), PathBuf::from("/home/op/file.txt"));
    }

    #[test]
    fn flags_rm_rf_root() {
        let ps = Arc::new(PathSafety::new("/sandbox"));
        let cs = CommandSafety::new(ps);
        let matches = cs.dangerous_matches("rm -rf /");
        assert!(matches.iter().any(|m| m.category == "rm"));
        assert!(matches.iter().any(|m| m.category == "rm_recursive"));
    }

    #[test]
    fn flags_delete_from_without_where() {
        let ps = Arc::new(PathSafety::new("/sandbox"));
        let cs = CommandSafety::new(ps);
        let matches = cs.dangerous_matches("psql -c \"DELETE FROM users\"");
        assert!(matches.iter().any(|m| m.category == "delete_from_no_where"));
    }

    #[test]
    fn does_not_flag_delete_from_with_where() {
        let ps = Arc::new(PathSafety::new("/sandbox"));
        let cs = CommandSafety::new(ps);
        let matches = cs.dangerous_matches("psql -c \"DELETE FROM users WHERE id = 1\"");
        assert!(!matches.iter().any(|m| m.category == "delete_from_no_where"));
    }

    #[test]
    fn flags_out_of_sandbox_path_token() {
        let ps = Arc::new(PathSafety::new("/sandbox"));
        let cs = CommandSafety::new(ps);
        let paths = cs.out_of_sandbox_paths("cat /etc/passwd");
        assert_eq!(paths, vec!["/etc/passwd".to_string()]);
    }

    #[test]
    fn git_clone_prefix_is_allowlisted_despite_absolute_destination() {
        let ps = Arc::new(PathSafety::new("/sandbox"));
        let cs = CommandSafety::new(ps);
        let paths = cs.out_of_sandbox_paths("git clone https://example.com/repo.git /tmp/checkout");
        assert!(paths.is_empty());
    }

    #[test]
    fn parent_dir_traversal_token_is_flagged() {
        let ps = Arc::new(PathSafety::new("/sandbox"));
        let cs = CommandSafety::new(ps);
        let paths = cs.out_of_sandbox_paths("cat ../secrets.env");
        assert_eq!(paths, vec!["../secrets.env".to_string()]);
    }

    #[test]
    fn in_sandbox_command_needs_no_confirmation() {
        let ps = Arc::new(PathSafety::new("/sandbox"));
        let cs = CommandSafety::new(ps);
        assert!(!cs.needs_confirmation("ls /sandbox/src"));
    }

    #[tokio::test]
    async fn deny_all_denies_every_request() {
        let cb = DenyAll;
        assert!(!cb.confirm("proceed?").await);
    }
}
