//! Time-boxed execution of model-generated code.
//!
//! [`CodeExecutor`] runs Python source or a shell command in a child process
//! with a hard wall-clock timeout and independently truncated output.
//!
//! # This is not a sandbox
//!
//! The only pre-execution check is a substring denylist. Substring matching
//! is trivially evaded (string concatenation, `getattr`, base64, aliases), so
//! the denylist filters accidents, not adversaries. Child processes run with
//! the gateway's own user, filesystem and network access. Real isolation
//! needs an OS-level sandbox: a dedicated unprivileged user, namespaces or a
//! container, and resource limits. That hardening is not done here because
//! it changes observable behaviour.
//!
//! # Scratch files
//!
//! Python source goes to a fresh temporary file that is removed when its
//! guard drops, on every exit path including spawn failure and timeout.

pub mod fence;

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

pub use fence::{CodeBlock, Language, extract_code_block};

use crate::telemetry;

/// Substrings rejected in Python source.
pub const PYTHON_DENYLIST: &[&str] = &[
    "os.system",
    "subprocess.run",
    "subprocess.Popen",
    "__import__(\"os\")",
];

/// Substrings rejected in shell commands.
pub const SHELL_DENYLIST: &[&str] = &["rm -rf", "sudo", "mkfs", "dd if=", "chmod 777", "chown"];

/// Configuration for the code executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Hard wall-clock limit per run. Default: 10s.
    pub timeout: Duration,
    /// Maximum characters kept from each of stdout and stderr. Default: 5000.
    pub max_output_chars: usize,
    /// Python interpreter. Default: `python3`.
    pub python: String,
    /// Shell used for commands (invoked as `<shell> -c <command>`). Default: `bash`.
    pub shell: String,
    /// Directory for scratch files. `None` uses the system temp dir.
    pub work_dir: Option<PathBuf>,
    /// Run shell blocks found in completions (Python blocks always run).
    /// Default: false.
    pub allow_shell_blocks: bool,
    pub python_denylist: Vec<String>,
    pub shell_denylist: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_output_chars: 5000,
            python: "python3".to_string(),
            shell: "bash".to_string(),
            work_dir: None,
            allow_shell_blocks: false,
            python_denylist: PYTHON_DENYLIST.iter().map(|s| s.to_string()).collect(),
            shell_denylist: SHELL_DENYLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_output_chars(mut self, n: usize) -> Self {
        self.max_output_chars = n;
        self
    }

    pub fn python(mut self, interpreter: impl Into<String>) -> Self {
        self.python = interpreter.into();
        self
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn allow_shell_blocks(mut self, allow: bool) -> Self {
        self.allow_shell_blocks = allow;
        self
    }
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Text appended to a completion after running its code block.
    pub fn augmentation(&self) -> String {
        if let Some(error) = &self.error {
            return format!("\n\n[Execution error]\n{error}");
        }
        if self.success {
            return format!("\n\n[Execution result]\n{}", self.stdout);
        }
        let detail = [self.stdout.as_str(), self.stderr.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        format!("\n\n[Execution error]\n{detail}")
    }
}

/// Runs code in time-boxed child processes. See module docs for caveats.
#[derive(Debug, Clone, Default)]
pub struct CodeExecutor {
    config: ExecutorConfig,
}

impl CodeExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Whether a block found in a completion should be run.
    pub fn accepts(&self, block: &CodeBlock) -> bool {
        match block.language {
            Language::Python => true,
            Language::Shell => self.config.allow_shell_blocks,
        }
    }

    /// Run a block with the matching entry point.
    pub async fn run_block(&self, block: &CodeBlock) -> ExecutionResult {
        match block.language {
            Language::Python => self.run_python(&block.source).await,
            Language::Shell => self.run_shell(&block.source).await,
        }
    }

    /// Run the first runnable block in `text` and return the text to append,
    /// or `None` when there is nothing to run.
    pub async fn augment(&self, text: &str) -> Option<String> {
        let block = extract_code_block(text)?;
        if !self.accepts(&block) {
            debug!(language = block.language.as_str(), "skipping code block");
            return None;
        }
        Some(self.run_block(&block).await.augmentation())
    }

    /// Run Python source from a temporary script file.
    pub async fn run_python(&self, code: &str) -> ExecutionResult {
        if let Some(token) = find_denied(code, &self.config.python_denylist) {
            return denied(Language::Python, token);
        }

        let script = match self.write_script(code) {
            Ok(script) => script,
            Err(e) => {
                return record(
                    Language::Python,
                    ExecutionResult::failure(format!("failed to write script: {e}")),
                );
            }
        };

        let mut command = Command::new(&self.config.python);
        command.arg(script.path());
        let result = self.run(command, Language::Python).await;
        // the guard unlinks the script here, after the child has been reaped or killed
        drop(script);
        result
    }

    /// Run a command through the configured shell.
    pub async fn run_shell(&self, command_line: &str) -> ExecutionResult {
        if let Some(token) = find_denied(command_line, &self.config.shell_denylist) {
            return denied(Language::Shell, token);
        }

        let mut command = Command::new(&self.config.shell);
        command.arg("-c").arg(command_line);
        self.run(command, Language::Shell).await
    }

    fn write_script(&self, code: &str) -> std::io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("muninn-exec-").suffix(".py");
        let mut file = match &self.config.work_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(code.as_bytes())?;
        file.flush()?;
        Ok(file)
    }

    async fn run(&self, mut command: Command, language: Language) -> ExecutionResult {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = match timeout(self.config.timeout, command.output()).await {
            Ok(Ok(output)) => ExecutionResult {
                success: output.status.success(),
                stdout: truncate_chars(
                    &String::from_utf8_lossy(&output.stdout),
                    self.config.max_output_chars,
                ),
                stderr: truncate_chars(
                    &String::from_utf8_lossy(&output.stderr),
                    self.config.max_output_chars,
                ),
                error: None,
            },
            Ok(Err(e)) => ExecutionResult::failure(format!("failed to start process: {e}")),
            Err(_) => {
                warn!(language = language.as_str(), timeout = ?self.config.timeout, "execution timed out");
                ExecutionResult::failure(format!("timed out after {:?}", self.config.timeout))
            }
        };
        record(language, result)
    }
}

fn find_denied<'a>(text: &str, denylist: &'a [String]) -> Option<&'a str> {
    denylist
        .iter()
        .map(String::as_str)
        .find(|token| text.contains(token))
}

fn denied(language: Language, token: &str) -> ExecutionResult {
    debug!(language = language.as_str(), token, "execution denied");
    metrics::counter!(
        telemetry::EXECUTIONS_TOTAL,
        "language" => language.as_str(),
        "outcome" => "denied"
    )
    .increment(1);
    ExecutionResult::failure(format!("execution denied: '{token}' is not allowed"))
}

fn record(language: Language, result: ExecutionResult) -> ExecutionResult {
    let outcome = match (&result.error, result.success) {
        (Some(e), _) if e.starts_with("timed out") => "timeout",
        (_, true) => "ok",
        _ => "failed",
    };
    metrics::counter!(
        telemetry::EXECUTIONS_TOTAL,
        "language" => language.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    result
}

/// Keep at most `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("héllo wörld", 7), "héllo w");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("exact", 5), "exact");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn denylist_matches_substrings() {
        let list: Vec<String> = SHELL_DENYLIST.iter().map(|s| s.to_string()).collect();
        assert_eq!(find_denied("sudo reboot", &list), Some("sudo"));
        assert_eq!(find_denied("cd /tmp && rm -rf x", &list), Some("rm -rf"));
        assert_eq!(find_denied("echo add", &list), None);
    }

    #[test]
    fn augmentation_variants() {
        let ok = ExecutionResult {
            success: true,
            stdout: "hello\n".into(),
            ..Default::default()
        };
        assert_eq!(ok.augmentation(), "\n\n[Execution result]\nhello\n");

        let failed = ExecutionResult {
            success: false,
            stderr: "NameError".into(),
            ..Default::default()
        };
        assert_eq!(failed.augmentation(), "\n\n[Execution error]\nNameError");

        let timed_out = ExecutionResult::failure("timed out after 1s");
        assert!(timed_out.augmentation().contains("timed out after 1s"));
    }

    #[test]
    fn shell_blocks_need_opt_in() {
        let block = CodeBlock {
            language: Language::Shell,
            source: "ls".into(),
        };
        assert!(!CodeExecutor::default().accepts(&block));
        let permissive = CodeExecutor::new(ExecutorConfig::new().allow_shell_blocks(true));
        assert!(permissive.accepts(&block));
    }
}
