//! Sage Tools - filesystem and shell capabilities Sage can use.
//!
//! Tools are organized by category:
//! - filesystem: read/write/edit/delete/list/search within the sandbox
//! - shell: run_command, gated by the safety check in sage_core

pub mod filesystem;
pub mod shell;

pub use filesystem::{
    DeleteFileTool, EditFileTool, ListDirectoryTool, ReadFileTool, SearchFilesTool, WriteFileTool,
};
pub use shell::RunCommandTool;
