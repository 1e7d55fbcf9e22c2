//! Headless agent execution
//!
//! The [`AgentInvoker`] trait is the seam between the engine and whatever
//! actually performs an agent's work. [`HeadlessClaudeExecutor`] runs a
//! command-line text-generation process: the instruction payload goes to
//! stdin, stdout/stderr are captured, and the process is killed if it is
//! still running when the deadline passes or the call is dropped.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Everything the executor needs for one invocation
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub agent_name: String,
    pub tools: Vec<String>,
    pub model: String,
    pub instructions: String,
    pub working_directory: PathBuf,
    pub timeout: Duration,
}

/// Token and cost usage reported by the process, when it reports any
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageInfo {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl UsageInfo {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Result of a process that ran to completion (successfully or not)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvocationOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Paths relative to the working directory, sorted
    pub files_created: Vec<String>,
    pub usage: UsageInfo,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl InvocationOutcome {
    pub fn duration_secs(&self) -> f64 {
        (self.completed_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Short human-readable failure description
    pub fn failure_message(&self) -> String {
        let detail = self
            .stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim();
        match (self.exit_code, detail.is_empty()) {
            (Some(code), true) => format!("Agent process exited with code {}", code),
            (Some(code), false) => format!("Agent process exited with code {}: {}", code, detail),
            (None, true) => "Agent process terminated by signal".to_string(),
            (None, false) => format!("Agent process terminated by signal: {}", detail),
        }
    }
}

/// Performs an agent's work.
///
/// `Err` means the invocation itself could not complete (spawn failure,
/// timeout, I/O); a process that ran but exited non-zero is an `Ok` outcome
/// with `success == false`.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationOutcome>;
}

/// Configuration for the command-line executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionConfig {
    /// Binary to run, resolved through PATH
    pub binary: String,
    /// Arguments placed before the tool and model flags
    pub base_args: Vec<String>,
    /// Flag followed by the space-joined tool allow-list; omitted when `None`
    pub tools_flag: Option<String>,
    /// Flag followed by the model identifier; omitted when `None`
    pub model_flag: Option<String>,
    /// Passed as `--output-format <value>` when set
    pub output_format: Option<String>,
    /// Default deadline in seconds when a request does not carry one
    pub timeout_seconds: u64,
    /// Extra environment for the child process
    pub environment: HashMap<String, String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            base_args: vec!["--print".to_string()],
            tools_flag: Some("--allowed-tools".to_string()),
            model_flag: None,
            output_format: None,
            timeout_seconds: 300,
            environment: HashMap::new(),
        }
    }
}

/// Runs agents as headless command-line processes
#[derive(Debug, Clone, Default)]
pub struct HeadlessClaudeExecutor {
    config: ExecutionConfig,
}

impl HeadlessClaudeExecutor {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    fn build_command(&self, request: &InvocationRequest) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(&self.config.base_args);
        if let Some(flag) = &self.config.tools_flag {
            if !request.tools.is_empty() {
                cmd.arg(flag).arg(request.tools.join(" "));
            }
        }
        if let Some(flag) = &self.config.model_flag {
            cmd.arg(flag).arg(&request.model);
        }
        if let Some(format) = &self.config.output_format {
            cmd.arg("--output-format").arg(format);
        }
        for (key, value) in &self.config.environment {
            cmd.env(key, value);
        }
        cmd.env("AGENT_ENSEMBLE_AGENT", &request.agent_name)
            .current_dir(&request.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Pull token and cost figures out of JSON or stream-JSON output.
    ///
    /// Lines that are not JSON objects are ignored; the last line carrying a
    /// cost or usage block wins.
    pub fn parse_usage(stdout: &str) -> UsageInfo {
        let mut usage = UsageInfo::default();
        for line in stdout.lines() {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
                continue;
            };
            let Some(object) = value.as_object() else {
                continue;
            };
            if let Some(cost) = object.get("total_cost_usd").and_then(|v| v.as_f64()) {
                usage.cost_usd = cost;
            }
            if let Some(block) = object.get("usage").and_then(|v| v.as_object()) {
                if let Some(tokens) = block.get("input_tokens").and_then(|v| v.as_u64()) {
                    usage.input_tokens = tokens;
                }
                if let Some(tokens) = block.get("output_tokens").and_then(|v| v.as_u64()) {
                    usage.output_tokens = tokens;
                }
            }
        }
        usage
    }
}

#[async_trait]
impl AgentInvoker for HeadlessClaudeExecutor {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationOutcome> {
        tokio::fs::create_dir_all(&request.working_directory).await?;
        let before = snapshot_files(&request.working_directory).await?;
        let started_at = Utc::now();

        let mut child = self.build_command(&request).spawn().map_err(|e| {
            Error::execution(format!(
                "Failed to spawn '{}' for agent {}: {}",
                self.config.binary, request.agent_name, e
            ))
        })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::execution("Failed to capture stdin"))?;

        let payload = request.instructions.clone();
        let feed = async move {
            let written = stdin.write_all(payload.as_bytes()).await;
            drop(stdin);
            written
        };

        let timeout = if request.timeout.is_zero() {
            Duration::from_secs(self.config.timeout_seconds)
        } else {
            request.timeout
        };

        debug!(
            agent = %request.agent_name,
            dir = %request.working_directory.display(),
            timeout_secs = timeout.as_secs(),
            "Starting agent process"
        );

        // Dropping the child on timeout kills it (kill_on_drop).
        let run = async { tokio::join!(feed, child.wait_with_output()) };
        let (fed, output) = match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    agent = %request.agent_name,
                    "Agent process exceeded {}s and was killed",
                    timeout.as_secs()
                );
                return Err(Error::timeout(
                    format!("agent invocation ({})", request.agent_name),
                    timeout.as_secs(),
                ));
            }
        };

        let output = output.map_err(|e| {
            Error::execution(format!("Failed to wait for agent process: {}", e))
        })?;
        if let Err(e) = fed {
            // A process that exits without reading its input closes the pipe.
            debug!("Agent process did not consume full instructions: {}", e);
        }

        let completed_at = Utc::now();
        let after = snapshot_files(&request.working_directory).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        Ok(InvocationOutcome {
            success: output.status.success(),
            exit_code: output.status.code(),
            usage: Self::parse_usage(&stdout),
            stdout,
            stderr,
            files_created: changed_files(&before, &after),
            started_at,
            completed_at,
        })
    }
}

type FileSnapshot = HashMap<String, Option<SystemTime>>;

/// Relative path → modification time for every regular file under `root`,
/// skipping hidden directories.
pub async fn snapshot_files(root: &Path) -> Result<FileSnapshot> {
    let mut files = HashMap::new();
    if !tokio::fs::try_exists(root).await? {
        return Ok(files);
    }
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                if !entry.file_name().to_string_lossy().starts_with('.') {
                    pending.push(path);
                }
            } else if file_type.is_file() {
                let modified = entry.metadata().await.ok().and_then(|m| m.modified().ok());
                if let Ok(relative) = path.strip_prefix(root) {
                    files.insert(relative.to_string_lossy().replace('\\', "/"), modified);
                }
            }
        }
    }
    Ok(files)
}

/// Files that are new or modified in `after`, sorted
pub fn changed_files(before: &FileSnapshot, after: &FileSnapshot) -> Vec<String> {
    let unchanged: HashSet<&String> = after
        .iter()
        .filter(|(path, modified)| before.get(*path) == Some(*modified))
        .map(|(path, _)| path)
        .collect();
    let mut changed: Vec<String> = after
        .keys()
        .filter(|path| !unchanged.contains(path))
        .cloned()
        .collect();
    changed.sort();
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(dir: &Path, timeout: Duration) -> InvocationRequest {
        InvocationRequest {
            agent_name: "tester".to_string(),
            tools: vec!["Bash".to_string(), "Read".to_string()],
            model: "test-model".to_string(),
            instructions: "write the report".to_string(),
            working_directory: dir.to_path_buf(),
            timeout,
        }
    }

    fn shell(script: &str) -> HeadlessClaudeExecutor {
        HeadlessClaudeExecutor::new(ExecutionConfig {
            binary: "sh".to_string(),
            base_args: vec!["-c".to_string(), script.to_string()],
            tools_flag: None,
            ..ExecutionConfig::default()
        })
    }

    #[test]
    fn test_parse_usage_from_result_line() {
        let stdout = r#"{"type":"assistant","message":{}}
not json
{"type":"result","total_cost_usd":0.25,"usage":{"input_tokens":120,"output_tokens":30}}"#;
        let usage = HeadlessClaudeExecutor::parse_usage(stdout);
        assert_eq!(usage.input_tokens, 120);
        assert_eq!(usage.output_tokens, 30);
        assert_eq!(usage.total_tokens(), 150);
        assert_eq!(usage.cost_usd, 0.25);
        assert_eq!(HeadlessClaudeExecutor::parse_usage("plain text"), UsageInfo::default());
    }

    #[test]
    fn test_changed_files_detects_new_and_modified() {
        let t0 = SystemTime::UNIX_EPOCH;
        let t1 = t0 + Duration::from_secs(5);
        let before: FileSnapshot = [
            ("keep.txt".to_string(), Some(t0)),
            ("edit.txt".to_string(), Some(t0)),
        ]
        .into_iter()
        .collect();
        let after: FileSnapshot = [
            ("keep.txt".to_string(), Some(t0)),
            ("edit.txt".to_string(), Some(t1)),
            ("new/report.md".to_string(), Some(t1)),
        ]
        .into_iter()
        .collect();
        assert_eq!(changed_files(&before, &after), vec!["edit.txt", "new/report.md"]);
    }

    #[test]
    fn test_failure_message_uses_last_stderr_line() {
        let now = Utc::now();
        let outcome = InvocationOutcome {
            success: false,
            exit_code: Some(2),
            stdout: String::new(),
            stderr: "warning\npermission denied\n\n".to_string(),
            files_created: vec![],
            usage: UsageInfo::default(),
            started_at: now,
            completed_at: now,
        };
        assert_eq!(
            outcome.failure_message(),
            "Agent process exited with code 2: permission denied"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_captures_stdin_output_and_files() {
        let dir = TempDir::new().unwrap();
        let executor = shell("cat > REPORT.md; echo done; mkdir -p .cache; touch .cache/x");
        let outcome = executor
            .invoke(request(dir.path(), Duration::from_secs(30)))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout.trim(), "done");
        assert_eq!(outcome.files_created, vec!["REPORT.md"]);
        let written = std::fs::read_to_string(dir.path().join("REPORT.md")).unwrap();
        assert_eq!(written, "write the report");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_unsuccessful_outcome() {
        let dir = TempDir::new().unwrap();
        let executor = shell("echo 'tests failed' >&2; exit 3");
        let outcome = executor
            .invoke(request(dir.path(), Duration::from_secs(30)))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(
            outcome.failure_message(),
            "Agent process exited with code 3: tests failed"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let dir = TempDir::new().unwrap();
        let executor = shell("sleep 5");
        let err = executor
            .invoke(request(dir.path(), Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_execution_error() {
        let dir = TempDir::new().unwrap();
        let executor = HeadlessClaudeExecutor::new(ExecutionConfig {
            binary: "definitely-not-an-agent-binary".to_string(),
            ..ExecutionConfig::default()
        });
        let err = executor
            .invoke(request(dir.path(), Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "execution");
    }
}
