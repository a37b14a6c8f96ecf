//! Filesystem tools (C2): read, write, edit, delete, list, and search files,
//! all confined to a sandbox via `sage_core::safety::PathSafety`. A path that
//! resolves outside the sandbox doesn't fail outright — it's routed through
//! the confirmation callback (C4) first, exactly like the shell tool does
//! for dangerous commands, and only denied if the operator (or the default
//! deny-all policy) says no.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use regex::RegexBuilder;
use sage_core::edit::{apply_delete_line_cleanup, apply_edit};
use sage_core::registry::{HandlerOutput, ToolDefinition, ToolHandler, ToolHandlerError};
use sage_core::safety::{path_confirmation_banner, ConfirmationCallback, PathSafety};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directories never descended into by `list_directory`/`search_files`,
/// ported from `code_crafter/tools/filesystem.py`'s `skip_dirs`. Any
/// directory whose name additionally starts with `.` is skipped too.
const SKIP_DIRS: &[&str] = &[
    ".git", ".svn", ".hg", ".bzr",
    "node_modules", "__pycache__", ".pytest_cache", ".mypy_cache", ".ruff_cache",
    "venv", ".venv", "env", ".env", "virtualenv",
    "dist", "build", "target", "out", "bin", "obj",
    ".idea", ".vscode", ".vs",
    "coverage", ".coverage", "htmlcov", ".nyc_output",
    ".tox", ".nox",
    ".next", ".nuxt", ".output",
    ".cache", ".parcel-cache",
];

/// Extensions treated as binary and skipped by `search_files`'s content pass.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "svg",
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    "zip", "tar", "gz", "rar", "7z",
    "exe", "dll", "so", "dylib",
    "pyc", "pyo", "class", "o", "obj",
    "woff", "woff2", "ttf", "eot",
    "mp3", "mp4", "avi", "mov", "wav",
    "sqlite", "db",
];

/// Longest a matched line is allowed to be in `search_files` output before
/// it's truncated with a `...` suffix.
const SEARCH_LINE_TRUNCATE: usize = 100;

/// Per-file and overall caps on `search_files` content hits, so a single
/// huge match can't blow up the response.
const MAX_MATCHES_PER_FILE: usize = 5;
const MAX_TOTAL_MATCHES: usize = 50;

fn is_skippable_dir(name: &str) -> bool {
    SKIP_DIRS.contains(&name) || name.starts_with('.')
}

fn format_size(size: u64) -> String {
    const KB: f64 = 1024.0;
    let size = size as f64;
    if size < KB {
        format!("{}B", size as u64)
    } else if size < KB * KB {
        format!("{:.1}K", size / KB)
    } else if size < KB * KB * KB {
        format!("{:.1}M", size / (KB * KB))
    } else {
        format!("{:.1}G", size / (KB * KB * KB))
    }
}

fn string_arg(args: &HashMap<String, serde_json::Value>, key: &str) -> Result<String, ToolHandlerError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ToolHandlerError::MissingArgument(key.to_string()))
}

fn optional_string_arg(args: &HashMap<String, serde_json::Value>, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn optional_u64_arg(args: &HashMap<String, serde_json::Value>, key: &str) -> Option<u64> {
    args.get(key).and_then(|v| v.as_u64())
}

fn optional_bool_arg(args: &HashMap<String, serde_json::Value>, key: &str, default: bool) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

fn denied(path: &str) -> HandlerOutput {
    HandlerOutput::error(
        serde_json::json!({
            "status": "DENIED",
            "error": format!("Access denied: {path} is outside working directory."),
        })
        .to_string(),
    )
}

/// Resolves `path` against the sandbox, consulting the confirmation
/// callback if it falls outside — never silently proceeding and never
/// hard-denying without giving the host a chance to allow it. Returns
/// `Err(HandlerOutput)` carrying the already-shaped `DENIED` payload when
/// the operator (or the default deny-all policy) refuses.
async fn authorize_path(
    safety: &PathSafety,
    confirmation: &Arc<dyn ConfirmationCallback>,
    operation: &str,
    path: &str,
) -> Result<PathBuf, HandlerOutput> {
    let resolved = safety.resolve(path);
    if safety.is_safe(path) {
        return Ok(resolved);
    }

    let banner = path_confirmation_banner(operation, path, &resolved, safety.root());
    if confirmation.confirm(&banner).await {
        Ok(resolved)
    } else {
        Err(denied(path))
    }
}

pub struct ReadFileTool {
    safety: Arc<PathSafety>,
    confirmation: Arc<dyn ConfirmationCallback>,
}

impl ReadFileTool {
    pub fn new(safety: Arc<PathSafety>, confirmation: Arc<dyn ConfirmationCallback>) -> Self {
        Self { safety, confirmation }
    }
}

#[async_trait]
impl ToolHandler for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a file's contents, with 1-based line numbers, optionally restricted \
                to a line range. Always read a file before editing it."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Path to the file, absolute or relative to the workspace root." },
                    "start_line": { "type": "integer", "description": "Starting line number (1-based, inclusive). Omit to start from the beginning." },
                    "end_line": { "type": "integer", "description": "Ending line number (1-based, inclusive). Omit to read to the end." }
                },
                "required": ["file_path"]
            }),
        }
    }

    async fn call(&self, args: HashMap<String, serde_json::Value>) -> Result<HandlerOutput, ToolHandlerError> {
        let file_path = string_arg(&args, "file_path")?;
        let start_line = optional_u64_arg(&args, "start_line");
        let end_line = optional_u64_arg(&args, "end_line");

        let resolved = match authorize_path(&self.safety, &self.confirmation, "read", &file_path).await {
            Ok(p) => p,
            Err(out) => return Ok(out),
        };

        if !resolved.exists() {
            return Ok(HandlerOutput::error(
                serde_json::json!({"status": "FAILED", "error": format!("File not found: {file_path}")}).to_string(),
            ));
        }
        if !resolved.is_file() {
            return Ok(HandlerOutput::error(
                serde_json::json!({"status": "FAILED", "error": format!("Not a file: {file_path}")}).to_string(),
            ));
        }

        let contents = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Ok(HandlerOutput::error(
                    serde_json::json!({"status": "FAILED", "error": format!("Cannot read binary file: {file_path}")})
                        .to_string(),
                ));
            }
            Err(e) => {
                return Ok(HandlerOutput::error(
                    serde_json::json!({"status": "FAILED", "error": format!("Error reading file: {e}")}).to_string(),
                ));
            }
        };

        let all_lines: Vec<&str> = contents.split('\n').collect();
        let total_lines = all_lines.len();

        let start_idx = start_line.map(|n| n.saturating_sub(1) as usize).unwrap_or(0);
        let end_idx = end_line.map(|n| (n as usize).min(total_lines)).unwrap_or(total_lines);

        if start_idx >= total_lines {
            return Ok(HandlerOutput::error(
                serde_json::json!({
                    "status": "FAILED",
                    "error": format!(
                        "Start line {} is beyond file length ({total_lines} lines)",
                        start_line.unwrap_or(0)
                    ),
                })
                .to_string(),
            ));
        }

        let selected = &all_lines[start_idx..end_idx.max(start_idx)];
        let numbered = selected
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:>4} | {}", start_idx + i + 1, line))
            .collect::<Vec<_>>()
            .join("\n");
        let raw_content = selected.join("\n");

        let mut payload = serde_json::json!({
            "status": "SUCCESS",
            "content": numbered,
            "raw_content": raw_content,
            "path": resolved.display().to_string(),
            "total_lines": total_lines,
        });
        if start_line.is_some() || end_line.is_some() {
            payload["showing_lines"] = serde_json::Value::String(format!("{}-{}", start_idx + 1, end_idx));
            payload["lines_shown"] = serde_json::Value::from(selected.len());
        } else {
            payload["lines"] = serde_json::Value::from(total_lines);
        }

        Ok(HandlerOutput::ok(payload.to_string()))
    }
}

pub struct WriteFileTool {
    safety: Arc<PathSafety>,
    confirmation: Arc<dyn ConfirmationCallback>,
}

impl WriteFileTool {
    pub fn new(safety: Arc<PathSafety>, confirmation: Arc<dyn ConfirmationCallback>) -> Self {
        Self { safety, confirmation }
    }
}

#[async_trait]
impl ToolHandler for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Create a new file or completely overwrite an existing one. For partial \
                changes, use edit_file instead."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["file_path", "content"]
            }),
        }
    }

    async fn call(&self, args: HashMap<String, serde_json::Value>) -> Result<HandlerOutput, ToolHandlerError> {
        let file_path = string_arg(&args, "file_path")?;
        let content = string_arg(&args, "content")?;

        let resolved = match authorize_path(&self.safety, &self.confirmation, "write", &file_path).await {
            Ok(p) => p,
            Err(out) => return Ok(out),
        };

        // The parent directory must itself resolve inside the sandbox before
        // it's created — a leaf path that resolved safely doesn't license
        // creating directories outside the workspace.
        if let Some(parent) = resolved.parent() {
            let parent_str = parent.display().to_string();
            if self.safety.is_safe(&parent_str) {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return Ok(HandlerOutput::error(
                        serde_json::json!({
                            "status": "FAILED",
                            "error": format!("Error writing file: failed to create parent directory: {e}"),
                        })
                        .to_string(),
                    ));
                }
            } else {
                return Ok(denied(&parent_str));
            }
        }

        let existed = tokio::fs::metadata(&resolved).await.is_ok();
        let line_count = content.split('\n').count();
        match tokio::fs::write(&resolved, &content).await {
            Ok(()) => Ok(HandlerOutput::ok(
                serde_json::json!({
                    "status": "SUCCESS",
                    "success": true,
                    "message": format!(
                        "Successfully wrote {} bytes ({line_count} lines) to {}",
                        content.len(),
                        resolved.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
                    ),
                    "path": resolved.display().to_string(),
                    "bytes_written": content.len(),
                    "lines_written": line_count,
                    "created": !existed,
                })
                .to_string(),
            )),
            Err(e) => Ok(HandlerOutput::error(
                serde_json::json!({"status": "FAILED", "error": format!("Error writing file: {e}")}).to_string(),
            )),
        }
    }
}

pub struct EditFileTool {
    safety: Arc<PathSafety>,
    confirmation: Arc<dyn ConfirmationCallback>,
}

impl EditFileTool {
    pub fn new(safety: Arc<PathSafety>, confirmation: Arc<dyn ConfirmationCallback>) -> Self {
        Self { safety, confirmation }
    }
}

#[async_trait]
impl ToolHandler for EditFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "edit_file".to_string(),
            description:
                "Replace the sole occurrence of old_string with new_string in a file. Falls back \
                 through several fuzzy-matching strategies if the exact text isn't found uniquely. \
                 Use an empty new_string to delete old_string. Always read_file before editing."
                    .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string" },
                    "old_string": { "type": "string" },
                    "new_string": { "type": "string" }
                },
                "required": ["file_path", "old_string", "new_string"]
            }),
        }
    }

    async fn call(&self, args: HashMap<String, serde_json::Value>) -> Result<HandlerOutput, ToolHandlerError> {
        let file_path = string_arg(&args, "file_path")?;
        let old_string = string_arg(&args, "old_string")?;
        let new_string = string_arg(&args, "new_string")?;

        let resolved = match authorize_path(&self.safety, &self.confirmation, "edit", &file_path).await {
            Ok(p) => p,
            Err(out) => return Ok(out),
        };

        if !resolved.exists() {
            return Ok(HandlerOutput::error(
                serde_json::json!({"status": "FAILED", "error": format!("File not found: {file_path}")}).to_string(),
            ));
        }

        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Ok(HandlerOutput::error(
                    serde_json::json!({"status": "FAILED", "error": format!("Cannot edit binary file: {file_path}")})
                        .to_string(),
                ));
            }
            Err(e) => {
                return Ok(HandlerOutput::error(
                    serde_json::json!({"status": "FAILED", "error": format!("Error editing file: {e}")}).to_string(),
                ));
            }
        };

        let outcome = apply_edit(&content, &old_string, &new_string);
        if !outcome.success {
            let error = if let Some(count) = outcome.strategy.strip_prefix("exact_multiple_") {
                format!(
                    "String appears {count} times in file. Include more surrounding context to make it unique."
                )
            } else {
                let preview: String = old_string.chars().take(200).collect();
                format!(
                    "String not found in file (tried multiple matching strategies). Ensure whitespace \
                     matches exactly. Searched for: {preview:?}"
                )
            };
            return Ok(HandlerOutput::error(
                serde_json::json!({"status": "FAILED", "error": error}).to_string(),
            ));
        }

        let final_content = if new_string.is_empty() {
            apply_delete_line_cleanup(&content, &old_string, &outcome.strategy).unwrap_or(outcome.content)
        } else {
            outcome.content
        };

        if let Err(e) = tokio::fs::write(&resolved, &final_content).await {
            return Ok(HandlerOutput::error(
                serde_json::json!({"status": "FAILED", "error": format!("Error editing file: {e}")}).to_string(),
            ));
        }

        let old_line_count = old_string.matches('\n').count() + 1;
        let message = if new_string.is_empty() {
            format!("Successfully deleted {} chars ({old_line_count} lines)", old_string.len())
        } else {
            let new_line_count = new_string.matches('\n').count() + 1;
            format!(
                "Successfully replaced {} chars ({old_line_count} lines) with {} chars ({new_line_count} lines)",
                old_string.len(),
                new_string.len(),
            )
        };

        let mut payload = serde_json::json!({
            "status": "SUCCESS",
            "success": true,
            "path": resolved.display().to_string(),
            "message": message,
            "old_length": old_string.len(),
        });
        if !new_string.is_empty() {
            payload["new_length"] = serde_json::Value::from(new_string.len());
        }
        if outcome.strategy != "exact" {
            payload["matching_strategy"] = serde_json::Value::String(outcome.strategy.clone());
            payload["note"] = serde_json::Value::String(format!(
                "Used fallback matching strategy: {}",
                outcome.strategy
            ));
        }

        Ok(HandlerOutput::ok(payload.to_string()))
    }
}

pub struct DeleteFileTool {
    safety: Arc<PathSafety>,
    confirmation: Arc<dyn ConfirmationCallback>,
}

impl DeleteFileTool {
    pub fn new(safety: Arc<PathSafety>, confirmation: Arc<dyn ConfirmationCallback>) -> Self {
        Self { safety, confirmation }
    }
}

#[async_trait]
impl ToolHandler for DeleteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "delete_file".to_string(),
            description: "Permanently delete a file within the workspace. Only works on files, not \
                directories."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "file_path": { "type": "string" } },
                "required": ["file_path"]
            }),
        }
    }

    async fn call(&self, args: HashMap<String, serde_json::Value>) -> Result<HandlerOutput, ToolHandlerError> {
        let file_path = string_arg(&args, "file_path")?;

        let resolved = match authorize_path(&self.safety, &self.confirmation, "delete", &file_path).await {
            Ok(p) => p,
            Err(out) => return Ok(out),
        };

        if !resolved.exists() {
            return Ok(HandlerOutput::error(
                serde_json::json!({"status": "FAILED", "error": format!("File not found: {file_path}")}).to_string(),
            ));
        }
        if !resolved.is_file() {
            return Ok(HandlerOutput::error(
                serde_json::json!({
                    "status": "FAILED",
                    "error": format!("Not a file (use a different method for directories): {file_path}"),
                })
                .to_string(),
            ));
        }

        let size = tokio::fs::metadata(&resolved).await.map(|m| m.len()).unwrap_or(0);
        let name = resolved.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();

        match tokio::fs::remove_file(&resolved).await {
            Ok(()) => Ok(HandlerOutput::ok(
                serde_json::json!({
                    "status": "SUCCESS",
                    "success": true,
                    "message": format!("Successfully deleted file: {name} ({})", format_size(size)),
                    "path": resolved.display().to_string(),
                })
                .to_string(),
            )),
            Err(e) => Ok(HandlerOutput::error(
                serde_json::json!({"status": "FAILED", "error": format!("Error deleting file: {e}")}).to_string(),
            )),
        }
    }
}

pub struct ListDirectoryTool {
    safety: Arc<PathSafety>,
    confirmation: Arc<dyn ConfirmationCallback>,
}

impl ListDirectoryTool {
    pub fn new(safety: Arc<PathSafety>, confirmation: Arc<dyn ConfirmationCallback>) -> Self {
        Self { safety, confirmation }
    }

    /// Recursively renders `current` as a `├──`/`└──` tree, stopping at
    /// `max_depth`, skipping the usual VCS/build-artifact/dot-directory
    /// denylist, and sorting files before directories at each level
    /// (case-insensitive by name within each group) per this tool's
    /// contract.
    fn add_entries(
        current: &Path,
        prefix: &str,
        depth: usize,
        max_depth: usize,
        lines: &mut Vec<String>,
        total_files: &mut usize,
        total_dirs: &mut usize,
    ) {
        if depth >= max_depth {
            return;
        }

        let Ok(read_dir) = std::fs::read_dir(current) else { return };
        let mut entries: Vec<std::fs::DirEntry> = read_dir.flatten().collect();
        entries.retain(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
            !(is_dir && is_skippable_dir(&name))
        });
        entries.sort_by_key(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
            (is_dir, name.to_lowercase())
        });

        let count = entries.len();
        for (i, entry) in entries.into_iter().enumerate() {
            let is_last = i == count - 1;
            let connector = if is_last { "└── " } else { "├── " };
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

            let line = match entry.metadata() {
                Ok(metadata) => {
                    let size = if is_dir { "<DIR>".to_string() } else { format_size(metadata.len()) };
                    let mtime = metadata
                        .modified()
                        .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|_| "????-??-?? ??:??".to_string());
                    let display_name = if is_dir { format!("{name}/") } else { name.clone() };
                    format!("{prefix}{connector}{size:>8}  {mtime}  {display_name}")
                }
                Err(_) => {
                    let display_name = if is_dir { format!("{name}/") } else { name.clone() };
                    format!("{prefix}{connector}{:>8}  ????-??-?? ??:??  {display_name}", "???")
                }
            };
            lines.push(line);

            if is_dir {
                *total_dirs += 1;
                let extension = if is_last { "    " } else { "│   " };
                Self::add_entries(
                    &path,
                    &format!("{prefix}{extension}"),
                    depth + 1,
                    max_depth,
                    lines,
                    total_files,
                    total_dirs,
                );
            } else {
                *total_files += 1;
            }
        }
    }
}

#[async_trait]
impl ToolHandler for ListDirectoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_directory".to_string(),
            description: "Show a directory's structure as a tree, with per-entry size, modification \
                time, and directory markers. Automatically skips node_modules, __pycache__, .git, \
                venv, dist, build, and other dot-directories."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Defaults to the workspace root.", "default": "." },
                    "max_depth": { "type": "integer", "description": "Maximum depth to traverse (default 10).", "default": 10 }
                },
                "required": []
            }),
        }
    }

    async fn call(&self, args: HashMap<String, serde_json::Value>) -> Result<HandlerOutput, ToolHandlerError> {
        let path = optional_string_arg(&args, "path").unwrap_or_else(|| ".".to_string());
        let max_depth = optional_u64_arg(&args, "max_depth").unwrap_or(10) as usize;

        let resolved = match authorize_path(&self.safety, &self.confirmation, "list", &path).await {
            Ok(p) => p,
            Err(out) => return Ok(out),
        };

        if !resolved.exists() {
            return Ok(HandlerOutput::error(
                serde_json::json!({"status": "FAILED", "error": format!("Directory not found: {path}")}).to_string(),
            ));
        }
        if !resolved.is_dir() {
            return Ok(HandlerOutput::error(
                serde_json::json!({"status": "FAILED", "error": format!("Not a directory: {path}")}).to_string(),
            ));
        }

        let dirname = resolved.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| {
            resolved.display().to_string()
        });

        let resolved_for_walk = resolved.clone();
        let (lines, total_files, total_dirs) = tokio::task::spawn_blocking(move || {
            let mut lines = vec![format!("{dirname}/"), "=".repeat(60)];
            let (mut total_files, mut total_dirs) = (0usize, 0usize);
            Self::add_entries(&resolved_for_walk, "", 0, max_depth, &mut lines, &mut total_files, &mut total_dirs);
            lines.push("=".repeat(60));
            lines.push(format!("Total: {total_files} files, {total_dirs} directories"));
            (lines, total_files, total_dirs)
        })
        .await
        .unwrap_or_else(|_| (vec!["error walking directory".to_string()], 0, 0));

        Ok(HandlerOutput::ok(
            serde_json::json!({
                "status": "SUCCESS",
                "path": resolved.display().to_string(),
                "tree": lines.join("\n"),
                "total_files": total_files,
                "total_dirs": total_dirs,
            })
            .to_string(),
        ))
    }
}

pub struct SearchFilesTool {
    safety: Arc<PathSafety>,
    confirmation: Arc<dyn ConfirmationCallback>,
}

impl SearchFilesTool {
    pub fn new(safety: Arc<PathSafety>, confirmation: Arc<dyn ConfirmationCallback>) -> Self {
        Self { safety, confirmation }
    }

    fn is_binary_path(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| BINARY_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Walks `current`, appending a match entry for every file whose name or
    /// relative path matches `regex` and/or whose content does (capped at
    /// `MAX_MATCHES_PER_FILE` line hits per file), stopping once the overall
    /// result hits `MAX_TOTAL_MATCHES`.
    fn scan_dir(
        current: &Path,
        rel_prefix: &str,
        regex: &regex::Regex,
        include_contents: bool,
        matches: &mut Vec<serde_json::Value>,
    ) {
        if matches.len() >= MAX_TOTAL_MATCHES {
            return;
        }

        let Ok(read_dir) = std::fs::read_dir(current) else { return };
        let mut entries: Vec<std::fs::DirEntry> = read_dir.flatten().collect();
        entries.sort_by_key(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let is_file = e.file_type().map(|t| t.is_file()).unwrap_or(false);
            (is_file, name.to_lowercase())
        });

        for entry in entries {
            if matches.len() >= MAX_TOTAL_MATCHES {
                return;
            }

            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            let rel_path = if rel_prefix.is_empty() { name.clone() } else { format!("{rel_prefix}/{name}") };
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

            if is_dir {
                if is_skippable_dir(&name) {
                    continue;
                }
                Self::scan_dir(&path, &rel_path, regex, include_contents, matches);
                continue;
            }

            let name_match = regex.is_match(&rel_path) || regex.is_match(&name);
            let mut matching_lines = Vec::new();

            if include_contents && !Self::is_binary_path(&path) {
                if let Ok(contents) = std::fs::read_to_string(&path) {
                    for (i, line) in contents.split('\n').enumerate() {
                        if regex.is_match(line) {
                            let trimmed = line.trim();
                            let text = if trimmed.len() > SEARCH_LINE_TRUNCATE {
                                format!("{}...", trimmed.chars().take(SEARCH_LINE_TRUNCATE).collect::<String>())
                            } else {
                                trimmed.to_string()
                            };
                            matching_lines.push(serde_json::json!({"line": i + 1, "text": text}));
                            if matching_lines.len() >= MAX_MATCHES_PER_FILE {
                                break;
                            }
                        }
                    }
                }
            }

            let content_match = !matching_lines.is_empty();
            if !name_match && !content_match {
                continue;
            }

            let match_type = match (name_match, content_match) {
                (true, true) => "both",
                (true, false) => "filename",
                (false, true) => "content",
                (false, false) => unreachable!(),
            };

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let mut entry_json = serde_json::json!({
                "path": path.display().to_string(),
                "relative_path": rel_path,
                "name": name,
                "size": format_size(size),
                "match_type": match_type,
            });
            if !matching_lines.is_empty() {
                entry_json["matching_lines"] = serde_json::Value::Array(matching_lines);
            }
            matches.push(entry_json);
        }
    }
}

#[async_trait]
impl ToolHandler for SearchFilesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_files".to_string(),
            description: "Search for files by name and/or content using a case-insensitive regex. \
                Binary files and common build/VCS directories are skipped; content matches are \
                capped at 5 lines per file and 50 matches overall."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regex pattern matched against file names and contents (case-insensitive)." },
                    "path": { "type": "string", "description": "Directory to search in. Defaults to the workspace root.", "default": "." },
                    "include_contents": { "type": "boolean", "description": "Also search file contents, not just names (default true).", "default": true }
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn call(&self, args: HashMap<String, serde_json::Value>) -> Result<HandlerOutput, ToolHandlerError> {
        let pattern = string_arg(&args, "pattern")?;
        let path = optional_string_arg(&args, "path").unwrap_or_else(|| ".".to_string());
        let include_contents = optional_bool_arg(&args, "include_contents", true);

        let resolved = match authorize_path(&self.safety, &self.confirmation, "search", &path).await {
            Ok(p) => p,
            Err(out) => return Ok(out),
        };

        if !resolved.exists() {
            return Ok(HandlerOutput::error(
                serde_json::json!({"status": "FAILED", "error": format!("Directory not found: {path}")}).to_string(),
            ));
        }
        if !resolved.is_dir() {
            return Ok(HandlerOutput::error(
                serde_json::json!({"status": "FAILED", "error": format!("Not a directory: {path}")}).to_string(),
            ));
        }

        let regex = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(r) => r,
            Err(e) => {
                return Ok(HandlerOutput::error(
                    serde_json::json!({"status": "FAILED", "error": format!("Invalid regex pattern: {e}")})
                        .to_string(),
                ));
            }
        };

        let matches = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            Self::scan_dir(&resolved, "", &regex, include_contents, &mut matches);
            matches
        })
        .await
        .unwrap_or_default();

        let truncated = matches.len() >= MAX_TOTAL_MATCHES;
        let message = if truncated {
            format!("Found {} matches for '{pattern}' (truncated)", matches.len())
        } else {
            format!("Found {} matches for '{pattern}'", matches.len())
        };

        Ok(HandlerOutput::ok(
            serde_json::json!({
                "status": "SUCCESS",
                "matches": matches,
                "count": matches.len(),
                "truncated": truncated,
                "message": message,
            })
            .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sage_core::safety::DenyAll;
    use std::path::PathBuf;

    /// Minimal scratch-directory helper so tests don't depend on a
    /// tempfile crate the rest of the workspace doesn't otherwise need.
    struct TempDir(PathBuf);

    impl TempDir {
        fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("sage-tools-test-{name}-{}", std::process::id()));
            let _ = std::fs::remove_dir_all(&dir);
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn path(&self) -> &PathBuf {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn safety_for(dir: &TempDir) -> Arc<PathSafety> {
        Arc::new(PathSafety::new(dir.path().clone()))
    }

    fn deny_all() -> Arc<dyn ConfirmationCallback> {
        Arc::new(DenyAll)
    }

    #[tokio::test]
    async fn write_then_read_round_trips_with_line_numbers() {
        let dir = TempDir::new("rw");
        let safety = safety_for(&dir);
        let write = WriteFileTool::new(safety.clone(), deny_all());
        let read = ReadFileTool::new(safety.clone(), deny_all());

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("f.txt"));
        args.insert("content".to_string(), serde_json::json!("line one\nline two"));
        let out = write.call(args).await.unwrap();
        assert!(!out.is_error);

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("f.txt"));
        let out = read.call(args).await.unwrap();
        assert!(out.content.contains("1 | line one"));
        assert!(out.content.contains("2 | line two"));
        assert!(out.content.contains("\"raw_content\":\"line one\\nline two\""));
    }

    #[tokio::test]
    async fn read_respects_start_and_end_line() {
        let dir = TempDir::new("range");
        let safety = safety_for(&dir);
        let write = WriteFileTool::new(safety.clone(), deny_all());
        let read = ReadFileTool::new(safety.clone(), deny_all());

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("f.txt"));
        args.insert("content".to_string(), serde_json::json!("a\nb\nc\nd\ne"));
        write.call(args).await.unwrap();

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("f.txt"));
        args.insert("start_line".to_string(), serde_json::json!(2));
        args.insert("end_line".to_string(), serde_json::json!(3));
        let out = read.call(args).await.unwrap();
        assert!(!out.is_error);
        assert!(out.content.contains("\"raw_content\":\"b\\nc\""));
        assert!(out.content.contains("\"showing_lines\":\"2-3\""));
    }

    #[tokio::test]
    async fn read_out_of_range_start_line_fails() {
        let dir = TempDir::new("range-oob");
        let safety = safety_for(&dir);
        let write = WriteFileTool::new(safety.clone(), deny_all());
        let read = ReadFileTool::new(safety.clone(), deny_all());

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("f.txt"));
        args.insert("content".to_string(), serde_json::json!("a\nb"));
        write.call(args).await.unwrap();

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("f.txt"));
        args.insert("start_line".to_string(), serde_json::json!(50));
        let out = read.call(args).await.unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("beyond file length"));
    }

    #[tokio::test]
    async fn read_outside_sandbox_is_denied_when_no_confirmation_is_wired() {
        let dir = TempDir::new("sandbox");
        let safety = safety_for(&dir);
        let read = ReadFileTool::new(safety, deny_all());

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("/etc/passwd"));
        let out = read.call(args).await.unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("\"status\":\"DENIED\""));
        assert!(out.content.contains("outside working directory"));
    }

    struct AllowAll;

    #[async_trait]
    impl ConfirmationCallback for AllowAll {
        async fn confirm(&self, _prompt: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn read_outside_sandbox_proceeds_when_operator_confirms() {
        std::fs::write("/tmp/sage-outside-sandbox-test.txt", "hello").unwrap();
        let dir = TempDir::new("sandbox-confirm");
        let safety = safety_for(&dir);
        let read = ReadFileTool::new(safety, Arc::new(AllowAll));

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("/tmp/sage-outside-sandbox-test.txt"));
        let out = read.call(args).await.unwrap();
        assert!(!out.is_error);
        assert!(out.content.contains("hello"));
        let _ = std::fs::remove_file("/tmp/sage-outside-sandbox-test.txt");
    }

    #[tokio::test]
    async fn edit_file_replaces_unique_match() {
        let dir = TempDir::new("edit");
        let safety = safety_for(&dir);
        let write = WriteFileTool::new(safety.clone(), deny_all());
        let edit = EditFileTool::new(safety.clone(), deny_all());

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("f.txt"));
        args.insert("content".to_string(), serde_json::json!("foo bar baz"));
        write.call(args).await.unwrap();

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("f.txt"));
        args.insert("old_string".to_string(), serde_json::json!("bar"));
        args.insert("new_string".to_string(), serde_json::json!("qux"));
        let out = edit.call(args).await.unwrap();
        assert!(!out.is_error);

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("f.txt"));
        let read = ReadFileTool::new(safety, deny_all());
        let out = read.call(args).await.unwrap();
        assert!(out.content.contains("foo qux baz"));
    }

    #[tokio::test]
    async fn edit_ambiguous_match_reports_occurrence_count() {
        let dir = TempDir::new("edit-ambiguous");
        let safety = safety_for(&dir);
        let write = WriteFileTool::new(safety.clone(), deny_all());
        let edit = EditFileTool::new(safety.clone(), deny_all());

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("f.txt"));
        args.insert("content".to_string(), serde_json::json!("a\na\n"));
        write.call(args).await.unwrap();

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("f.txt"));
        args.insert("old_string".to_string(), serde_json::json!("a"));
        args.insert("new_string".to_string(), serde_json::json!("b"));
        let out = edit.call(args).await.unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("appears 2 times"));
    }

    #[tokio::test]
    async fn delete_file_removes_it() {
        let dir = TempDir::new("delete");
        let safety = safety_for(&dir);
        let write = WriteFileTool::new(safety.clone(), deny_all());
        let delete = DeleteFileTool::new(safety.clone(), deny_all());

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("gone.txt"));
        args.insert("content".to_string(), serde_json::json!("x"));
        write.call(args).await.unwrap();

        let mut args = HashMap::new();
        args.insert("file_path".to_string(), serde_json::json!("gone.txt"));
        let out = delete.call(args).await.unwrap();
        assert!(!out.is_error);
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[tokio::test]
    async fn list_directory_sorts_files_before_subdirectories() {
        let dir = TempDir::new("list");
        let safety = safety_for(&dir);
        std::fs::create_dir(dir.path().join("zzz_dir")).unwrap();
        std::fs::write(dir.path().join("aaa_file.txt"), "x").unwrap();

        let list = ListDirectoryTool::new(safety, deny_all());
        let out = list.call(HashMap::new()).await.unwrap();
        assert!(!out.is_error);
        let file_pos = out.content.find("aaa_file.txt").unwrap();
        let dir_pos = out.content.find("zzz_dir").unwrap();
        assert!(file_pos < dir_pos, "files should sort before directories");
    }

    #[tokio::test]
    async fn list_directory_excludes_denylisted_and_dot_directories() {
        let dir = TempDir::new("list-skip");
        let safety = safety_for(&dir);
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::create_dir(dir.path().join(".hidden")).unwrap();
        std::fs::write(dir.path().join("visible.txt"), "x").unwrap();

        let list = ListDirectoryTool::new(safety, deny_all());
        let out = list.call(HashMap::new()).await.unwrap();
        assert!(out.content.contains("visible.txt"));
        assert!(!out.content.contains("node_modules"));
        assert!(!out.content.contains(".hidden"));
    }

    #[tokio::test]
    async fn search_files_truncates_long_lines_and_skips_binaries() {
        let dir = TempDir::new("search");
        let safety = safety_for(&dir);

        std::fs::write(dir.path().join("a.txt"), "x".repeat(150) + " needle").unwrap();
        std::fs::write(dir.path().join("a.png"), [0u8, 1, 2, 3]).unwrap();

        let search = SearchFilesTool::new(safety, deny_all());
        let mut args = HashMap::new();
        args.insert("pattern".to_string(), serde_json::json!("needle|x"));
        let out = search.call(args).await.unwrap();
        assert!(out.content.contains("..."));
        assert!(!out.content.contains("a.png"));
    }

    #[tokio::test]
    async fn search_files_matches_by_filename_even_without_content_hit() {
        let dir = TempDir::new("search-name");
        let safety = safety_for(&dir);
        std::fs::write(dir.path().join("needle_file.txt"), "unrelated content").unwrap();

        let search = SearchFilesTool::new(safety, deny_all());
        let mut args = HashMap::new();
        args.insert("pattern".to_string(), serde_json::json!("needle_file"));
        args.insert("include_contents".to_string(), serde_json::json!(false));
        let out = search.call(args).await.unwrap();
        assert!(!out.is_error);
        assert!(out.content.contains("\"match_type\":\"filename\""));
    }
}
