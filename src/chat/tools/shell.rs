//! Shell execution tool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::base::Tool;
use crate::utils::helpers::floor_char_boundary;

/// Default command timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Maximum output length before truncation.
const MAX_OUTPUT_LEN: usize = 10000;

/// Tool to execute shell commands.
pub struct ShellTool {
    shell: String,
    timeout: u64,
    working_dir: Option<PathBuf>,
}

impl ShellTool {
    /// Create a new `ShellTool`.
    ///
    /// `shell` of `"auto"` resolves the user's login shell from `$SHELL`,
    /// falling back to `bash`.
    pub fn new(shell: &str, timeout: u64, working_dir: Option<PathBuf>) -> Self {
        let shell = if shell == "auto" {
            default_shell()
        } else {
            shell.to_string()
        };
        Self {
            shell,
            timeout,
            working_dir,
        }
    }

    /// The resolved shell program.
    pub fn shell(&self) -> &str {
        &self.shell
    }
}

/// The user's shell name from `$SHELL`, or `bash` when unset.
fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|s| {
            Path::new(&s)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "bash".to_string())
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute shell commands. Use this for file operations, system information, or any command-line tasks."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "cmd": {
                    "type": "string",
                    "description": "The command to execute"
                }
            },
            "required": ["cmd"]
        })
    }

    async fn execute(&self, params: HashMap<String, serde_json::Value>) -> Result<String> {
        let Some(cmd) = params.get("cmd").and_then(|v| v.as_str()) else {
            bail!("missing required parameter 'cmd'");
        };

        let mut command = Command::new(&self.shell);
        command.arg("-c").arg(cmd);
        if let Some(ref dir) = self.working_dir {
            command.current_dir(dir);
        }

        let output = match tokio::time::timeout(Duration::from_secs(self.timeout), command.output())
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                bail!("shell not found: {}", self.shell)
            }
            Ok(Err(e)) => bail!("command execution failed: {}", e),
            Err(_) => bail!("command timed out after {} seconds", self.timeout),
        };

        let mut parts: Vec<String> = Vec::new();

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.is_empty() {
            parts.push(stdout.to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            parts.push(format!("STDERR:\n{}", stderr));
        }

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            parts.push(format!("\nExit code: {}", code));
        }

        let mut result = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };

        // Truncate very long output. The cut lands on a char boundary so
        // multibyte output cannot split a character.
        if result.len() > MAX_OUTPUT_LEN {
            let cut = floor_char_boundary(&result, MAX_OUTPUT_LEN);
            let overflow = result.len() - cut;
            result.truncate(cut);
            result.push_str(&format!("\n... (truncated, {} more chars)", overflow));
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ShellTool {
        ShellTool::new("sh", DEFAULT_TIMEOUT_SECS, None)
    }

    fn params(cmd: &str) -> HashMap<String, serde_json::Value> {
        let mut p = HashMap::new();
        p.insert("cmd".to_string(), serde_json::Value::String(cmd.to_string()));
        p
    }

    #[test]
    fn test_auto_resolves_to_some_shell() {
        let tool = ShellTool::new("auto", 5, None);
        assert!(!tool.shell().is_empty());
        assert_ne!(tool.shell(), "auto");
    }

    #[test]
    fn test_explicit_shell_kept() {
        let tool = ShellTool::new("zsh", 5, None);
        assert_eq!(tool.shell(), "zsh");
    }

    #[tokio::test]
    async fn test_execute_captures_stdout() {
        let output = tool().execute(params("echo hi")).await.unwrap();
        assert_eq!(output.trim(), "hi");
    }

    #[tokio::test]
    async fn test_missing_cmd_param() {
        let err = tool().execute(HashMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("missing required parameter 'cmd'"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_code() {
        let output = tool().execute(params("exit 3")).await.unwrap();
        assert!(output.contains("Exit code: 3"), "output: {}", output);
    }

    #[tokio::test]
    async fn test_stderr_captured_in_section() {
        let output = tool().execute(params("echo oops >&2")).await.unwrap();
        assert!(output.contains("STDERR:"), "output: {}", output);
        assert!(output.contains("oops"));
    }

    #[tokio::test]
    async fn test_silent_command_reports_no_output() {
        let output = tool().execute(params("true")).await.unwrap();
        assert_eq!(output, "(no output)");
    }

    #[tokio::test]
    async fn test_timeout() {
        let tool = ShellTool::new("sh", 1, None);
        let err = tool.execute(params("sleep 5")).await.unwrap_err();
        assert!(err.to_string().contains("timed out after 1 seconds"));
    }

    #[tokio::test]
    async fn test_unknown_shell_reports_not_found() {
        let tool = ShellTool::new("definitely-not-a-shell", 5, None);
        let err = tool.execute(params("echo hi")).await.unwrap_err();
        assert!(err.to_string().contains("shell not found"));
    }

    #[tokio::test]
    async fn test_working_dir_applies() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new("sh", 5, Some(dir.path().to_path_buf()));
        let output = tool.execute(params("pwd")).await.unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert!(
            output.trim().ends_with(canonical.to_str().unwrap()),
            "output: {}",
            output
        );
    }

    #[tokio::test]
    async fn test_long_output_truncated() {
        let output = tool()
            .execute(params("head -c 20000 /dev/zero | tr '\\0' 'a'"))
            .await
            .unwrap();
        assert!(output.len() < 20000);
        assert!(output.contains("truncated"));
    }

    #[tokio::test]
    async fn test_long_multibyte_output_truncated_on_char_boundary() {
        // One leading ascii byte shifts every following two-byte character
        // off the even byte offsets, so the cut point falls mid-character.
        let output = tool()
            .execute(params("printf x; printf 'é%.0s' $(seq 1 5300)"))
            .await
            .unwrap();
        assert!(output.len() <= MAX_OUTPUT_LEN + 64);
        assert!(output.contains("truncated"));
        assert!(output.chars().filter(|c| *c == 'é').count() > 4000);
    }
}
