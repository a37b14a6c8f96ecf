use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub api_key: String,
    pub model: String,

    /// Sandbox root for shell commands and file operations.
    pub workspace_path: String,

    pub max_iterations: usize,
    pub timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: std::env::var("SAGE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".to_string()),
            api_key: std::env::var("SAGE_API_KEY").context("SAGE_API_KEY must be set")?,
            model: std::env::var("SAGE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),

            workspace_path: std::env::var("SAGE_WORKSPACE")
                .unwrap_or_else(|_| "/workspace".to_string()),

            max_iterations: std::env::var("SAGE_MAX_ITERATIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("SAGE_MAX_ITERATIONS must be a positive integer")?,

            timeout_secs: std::env::var("SAGE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .context("SAGE_TIMEOUT_SECS must be a positive integer")?,
        })
    }
}
