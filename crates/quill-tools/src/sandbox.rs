use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::filter::{CommandCheck, CommandFilter, FilterMode};
use crate::paths::PathRestrictions;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Outcome of a sandboxed command execution.
///
/// `blocked` distinguishes policy denial from runtime failure: a blocked
/// command never reached a subprocess, while a failed one ran and exited
/// non-zero (or timed out).
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub blocked: bool,
    pub blocked_reason: Option<String>,
}

impl ExecutionResult {
    fn blocked(reason: String) -> Self {
        Self {
            blocked: true,
            blocked_reason: Some(reason),
            ..Self::default()
        }
    }
}

/// Combined command-filter + path-restriction + process-execution boundary.
/// The only place a tool-requested command actually touches the system.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    filter: CommandFilter,
    paths: PathRestrictions,
}

impl SandboxExecutor {
    #[must_use]
    pub fn new(filter: CommandFilter, paths: PathRestrictions) -> Self {
        Self { filter, paths }
    }

    /// Check a command without executing it: filter verdict first, then path
    /// restrictions over any path-like tokens in the command line.
    #[must_use]
    pub fn check_command(&self, command: &str) -> CommandCheck {
        let check = self.filter.check_command(command);
        if !check.allowed {
            return check;
        }

        for path in PathRestrictions::extract_paths(command) {
            if let Err(violation) = self.paths.check_path(&path) {
                return CommandCheck {
                    allowed: false,
                    reason: Some(violation.to_string()),
                    matched_rule: None,
                    mode: check.mode,
                };
            }
        }

        check
    }

    /// Execute a command in the sandbox.
    ///
    /// A policy denial returns a blocked result; a timeout kills the child
    /// and returns a failure with a distinguishable message.
    pub async fn execute(
        &self,
        command: &str,
        cwd: Option<&PathBuf>,
        env: Option<&HashMap<String, String>>,
        timeout: Option<Duration>,
    ) -> ExecutionResult {
        let check = self.check_command(command);
        if !check.allowed {
            let reason = check.reason.unwrap_or_else(|| "blocked by policy".into());
            tracing::warn!(command, reason, "command blocked by sandbox");
            return ExecutionResult::blocked(reason);
        }

        let timeout = timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        tracing::debug!(command, timeout_secs = timeout.as_secs(), "executing command");

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        if let Some(vars) = env {
            cmd.envs(vars);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult {
                    success: false,
                    stderr: format!("failed to spawn command: {e}"),
                    ..ExecutionResult::default()
                };
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code();
                ExecutionResult {
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code,
                    blocked: false,
                    blocked_reason: None,
                }
            }
            Ok(Err(e)) => ExecutionResult {
                success: false,
                stderr: format!("command execution failed: {e}"),
                ..ExecutionResult::default()
            },
            Err(_) => {
                // kill_on_drop reaps the child once the future is dropped.
                ExecutionResult {
                    success: false,
                    stderr: format!("command timed out after {}s", timeout.as_secs()),
                    ..ExecutionResult::default()
                }
            }
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.filter.mode() != FilterMode::Disabled
    }

    #[must_use]
    pub fn path_restrictions(&self) -> &PathRestrictions {
        &self.paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_sandbox() -> SandboxExecutor {
        SandboxExecutor::new(
            CommandFilter::new(&[], &[], FilterMode::Blacklist),
            PathRestrictions::new(&["/nonexistent-restricted".to_owned()], &[]),
        )
    }

    fn whitelist_sandbox(patterns: &[&str]) -> SandboxExecutor {
        let whitelist: Vec<String> = patterns.iter().map(|s| (*s).to_owned()).collect();
        SandboxExecutor::new(
            CommandFilter::new(&whitelist, &[], FilterMode::Whitelist),
            PathRestrictions::new(&["/nonexistent-restricted".to_owned()], &[]),
        )
    }

    #[tokio::test]
    async fn executes_simple_command() {
        let result = open_sandbox().execute("echo hello", None, None, None).await;
        assert!(result.success);
        assert!(!result.blocked);
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn captures_stderr_and_exit_code() {
        let result = open_sandbox()
            .execute("echo oops >&2; exit 3", None, None, None)
            .await;
        assert!(!result.success);
        assert!(!result.blocked);
        assert_eq!(result.stderr.trim(), "oops");
        assert_eq!(result.exit_code, Some(3));
    }

    #[tokio::test]
    async fn blocked_command_never_runs() {
        let sandbox = whitelist_sandbox(&["ls"]);
        let result = sandbox.execute("echo leaked", None, None, None).await;
        assert!(result.blocked);
        assert!(!result.success);
        assert!(result.stdout.is_empty());
        assert!(result.blocked_reason.unwrap().contains("not in whitelist"));
    }

    #[tokio::test]
    async fn path_violation_blocks_whitelisted_command() {
        let sandbox = SandboxExecutor::new(
            CommandFilter::new(&["cat*".to_owned()], &[], FilterMode::Whitelist),
            PathRestrictions::new(&["/etc".to_owned()], &[]),
        );
        let result = sandbox.execute("cat /etc/passwd", None, None, None).await;
        assert!(result.blocked);
        assert!(result.blocked_reason.unwrap().contains("/etc"));
    }

    #[tokio::test]
    async fn timeout_reported_as_failure() {
        let result = open_sandbox()
            .execute("sleep 5", None, None, Some(Duration::from_millis(100)))
            .await;
        assert!(!result.success);
        assert!(!result.blocked);
        assert!(result.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn working_directory_respected() {
        let dir = tempfile::tempdir().unwrap();
        let result = open_sandbox()
            .execute("pwd", Some(&dir.path().to_path_buf()), None, None)
            .await;
        assert!(result.success);
        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(
            PathBuf::from(result.stdout.trim()).canonicalize().unwrap(),
            canonical
        );
    }

    #[tokio::test]
    async fn environment_overrides_passed_through() {
        let mut env = HashMap::new();
        env.insert("QUILL_TEST_VAR".to_owned(), "42".to_owned());
        let result = open_sandbox()
            .execute("echo $QUILL_TEST_VAR", None, Some(&env), None)
            .await;
        assert_eq!(result.stdout.trim(), "42");
    }

    #[test]
    fn check_command_does_not_execute() {
        let sandbox = whitelist_sandbox(&["ls"]);
        let check = sandbox.check_command("ls -la");
        assert!(check.allowed);
        let check = sandbox.check_command("rm -rf /");
        assert!(!check.allowed);
    }

    #[test]
    fn is_enabled_false_only_when_disabled() {
        for (mode, expected) in [
            (FilterMode::Whitelist, true),
            (FilterMode::Blacklist, true),
            (FilterMode::Prompt, true),
            (FilterMode::Disabled, false),
        ] {
            let sandbox = SandboxExecutor::new(
                CommandFilter::new(&[], &[], mode),
                PathRestrictions::default(),
            );
            assert_eq!(sandbox.is_enabled(), expected);
        }
    }
}
