//! Command Executor - runs external programs with a timeout.
//!
//! Every component that talks to the virtualization CLI, the guest or the
//! host shell goes through `CommandExecutor`, so the whole orchestration core
//! can be driven by `ScriptedExecutor` in tests.
//!
//! A non-zero exit is a normal `CommandOutput`. Only a failed launch or a
//! timeout is an `ExecError`.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

// ============================================================================
// Command description and result
// ============================================================================

/// One external program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Run through the host elevation prompt. Output cannot be captured.
    pub elevated: bool,
    /// Substrings replaced with `***` when the command is logged
    pub secrets: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
            elevated: false,
            secrets: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    /// Mark a value that must never reach the logs. The shell-quoted form
    /// is registered too, since a quote inside the value is rewritten when
    /// the value is embedded in a `sh -c` line.
    pub fn secret(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            return self;
        }
        if value.contains('\'') {
            self.secrets.push(value.replace('\'', r"'\''"));
        }
        self.secrets.push(value);
        self
    }

    /// Full command line, program first. Used for matching in tests.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Command line safe for logging
    pub fn redacted(&self) -> String {
        let mut line = self.command_line();
        for secret in &self.secrets {
            line = line.replace(secret.as_str(), "***");
        }
        if self.elevated {
            format!("[elevated] {}", line)
        } else {
            line
        }
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Failure to run a command at all
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

// ============================================================================
// Executor trait
// ============================================================================

/// Trait abstraction for external command execution
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run to completion (or timeout) and capture the result
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError>;

    /// Launch and return immediately without waiting for exit
    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<(), ExecError>;
}

/// Shared executor handle passed to every component
pub type SharedExecutor = Arc<dyn CommandExecutor>;

// ============================================================================
// System executor (production)
// ============================================================================

/// Executor that launches real processes with tokio
pub struct SystemExecutor {
    powershell_program: String,
}

impl SystemExecutor {
    pub fn new(powershell_program: impl Into<String>) -> Self {
        Self {
            powershell_program: powershell_program.into(),
        }
    }
}

impl Default for SystemExecutor {
    fn default() -> Self {
        Self::new("powershell.exe")
    }
}

fn powershell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Wrap a command so it runs through the elevation prompt.
///
/// `Start-Process` joins `-ArgumentList` with spaces, so every argument is
/// double-quoted inside its PowerShell literal. The wrapper exits with the
/// elevated process's exit code.
pub fn elevation_wrapper(spec: &CommandSpec, powershell_program: &str) -> CommandSpec {
    let arg_list = spec
        .args
        .iter()
        .map(|a| powershell_quote(&format!("\"{}\"", a.replace('"', "\\\""))))
        .collect::<Vec<_>>()
        .join(",");
    let mut script = format!(
        "$p = Start-Process -FilePath {} -Verb RunAs -Wait -PassThru",
        powershell_quote(&spec.program)
    );
    if !arg_list.is_empty() {
        script.push_str(&format!(" -ArgumentList {}", arg_list));
    }
    script.push_str("; exit $p.ExitCode");

    CommandSpec {
        program: powershell_program.to_string(),
        args: vec![
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-Command".to_string(),
            script,
        ],
        timeout: spec.timeout,
        elevated: false,
        secrets: spec.secrets.clone(),
    }
}

/// Decode process output. The virtualization CLI writes UTF-16LE, which is
/// detected by a BOM or by NUL bytes in the odd positions.
pub fn decode_output(bytes: &[u8]) -> String {
    let has_bom = bytes.starts_with(&[0xFF, 0xFE]);
    let looks_utf16 = bytes.len() >= 2
        && bytes.len() % 2 == 0
        && bytes.iter().skip(1).step_by(2).filter(|b| **b == 0).count() * 2 >= bytes.len() / 2;

    if has_bom || looks_utf16 {
        let start = if has_bom { 2 } else { 0 };
        let units: Vec<u16> = bytes[start..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        let effective = if spec.elevated {
            elevation_wrapper(spec, &self.powershell_program)
        } else {
            spec.clone()
        };

        debug!("Executing: {}", spec.redacted());

        let mut command = Command::new(&effective.program);
        command
            .args(&effective.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if spec.elevated {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let child = command.spawn().map_err(|source| ExecError::Launch {
            program: spec.program.clone(),
            source,
        })?;

        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ExecError::Launch {
                program: spec.program.clone(),
                source,
            })?,
            Err(_) => {
                // Dropping the future drops the child, which kills it
                warn!("Command timed out after {:?}: {}", spec.timeout, spec.redacted());
                return Err(ExecError::Timeout {
                    program: spec.program.clone(),
                    timeout: spec.timeout,
                });
            }
        };

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: decode_output(&output.stdout),
            stderr: decode_output(&output.stderr),
        };
        if !result.success() {
            debug!("Exit {} from {}", result.exit_code, spec.redacted());
        }
        Ok(result)
    }

    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<(), ExecError> {
        debug!("Launching: {}", spec.redacted());
        Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
            .map_err(|source| ExecError::Launch {
                program: spec.program.clone(),
                source,
            })
    }
}

// ============================================================================
// Scripted executor (testing)
// ============================================================================

/// Pre-configured response for one call
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Output(CommandOutput),
    LaunchFailure,
    Timeout,
}

impl ScriptedResponse {
    /// Exit 0 with the given stdout
    pub fn ok(stdout: &str) -> Self {
        Self::Output(CommandOutput {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    /// Non-zero exit with empty output
    pub fn exit(code: i32) -> Self {
        Self::Output(CommandOutput {
            exit_code: code,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    pub fn exit_with(code: i32, stdout: &str) -> Self {
        Self::Output(CommandOutput {
            exit_code: code,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    /// Non-zero exit with a message on stderr
    pub fn failed(code: i32, stderr: &str) -> Self {
        Self::Output(CommandOutput {
            exit_code: code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
    }
}

struct Rule {
    pattern: String,
    responses: VecDeque<ScriptedResponse>,
}

/// Fake executor for deterministic testing
///
/// Rules are matched by substring against the full command line, first
/// registered rule wins. A rule with several responses hands them out in
/// order and keeps repeating the last one. Unmatched commands exit 0 with
/// empty output.
///
/// ```rust,ignore
/// let exec = ScriptedExecutor::new()
///     .on("--list --verbose", ScriptedResponse::ok("PKTWinNode Running 2\n"))
///     .on_sequence("--terminate", vec![ScriptedResponse::ok(""), ScriptedResponse::exit(1)]);
/// ```
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    rules: Arc<Mutex<Vec<Rule>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, response: ScriptedResponse) -> Self {
        self.on_sequence(pattern, vec![response])
    }

    pub fn on_sequence(self, pattern: &str, responses: Vec<ScriptedResponse>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                pattern: pattern.to_string(),
                responses: responses.into(),
            });
        }
        self
    }

    /// Every command line seen so far, in order, with secrets redacted
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of calls whose command line contains `pattern`
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }

    fn respond(&self, spec: &CommandSpec) -> ScriptedResponse {
        let line = spec.command_line();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.redacted());
        }

        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return ScriptedResponse::ok(""),
        };
        for rule in rules.iter_mut() {
            if line.contains(&rule.pattern) {
                return if rule.responses.len() > 1 {
                    rule.responses.pop_front().unwrap_or_else(|| ScriptedResponse::ok(""))
                } else {
                    rule.responses
                        .front()
                        .cloned()
                        .unwrap_or_else(|| ScriptedResponse::ok(""))
                };
            }
        }
        ScriptedResponse::ok("")
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        match self.respond(spec) {
            ScriptedResponse::Output(mut output) => {
                if spec.elevated {
                    output.stdout.clear();
                    output.stderr.clear();
                }
                Ok(output)
            }
            ScriptedResponse::LaunchFailure => Err(ExecError::Launch {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted"),
            }),
            ScriptedResponse::Timeout => Err(ExecError::Timeout {
                program: spec.program.clone(),
                timeout: spec.timeout,
            }),
        }
    }

    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<(), ExecError> {
        match self.respond(spec) {
            ScriptedResponse::LaunchFailure => Err(ExecError::Launch {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted"),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(args: &[&str]) -> CommandSpec {
        CommandSpec::new("wsl", Duration::from_secs(5)).args(args.iter().copied())
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let s = spec(&["-e", "sh", "-c", "echo 'u:hunter2' | chpasswd"]).secret("hunter2");
        assert!(s.command_line().contains("hunter2"));
        assert!(!s.redacted().contains("hunter2"));
        assert!(s.redacted().contains("u:***"));
    }

    #[test]
    fn test_redacted_hides_quoted_secret() {
        let s = spec(&["-e", "sh", "-c", r"echo 'u:it'\''s-Secret9' | chpasswd"]).secret("it's-Secret9");
        assert!(!s.redacted().contains("Secret9"));
        assert!(s.redacted().contains("'u:***'"));
    }

    #[test]
    fn test_elevation_wrapper() {
        let s = CommandSpec::new("powershell.exe", Duration::from_secs(5))
            .args(["-Command", "New-VMSwitch -Name 'WSLBridge'"])
            .elevated();
        let wrapped = elevation_wrapper(&s, "powershell.exe");
        assert!(!wrapped.elevated);
        assert_eq!(wrapped.args[0], "-NoProfile");
        let script = &wrapped.args[3];
        assert!(script.contains("-Verb RunAs -Wait -PassThru"));
        assert!(script.contains("'\"New-VMSwitch -Name ''WSLBridge''\"'"));
        assert!(script.ends_with("exit $p.ExitCode"));
    }

    #[test]
    fn test_decode_utf16_output() {
        let bytes: Vec<u8> = "PKTWinNode\r\n"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        assert_eq!(decode_output(&bytes), "PKTWinNode\r\n");

        let mut with_bom = vec![0xFF, 0xFE];
        with_bom.extend_from_slice(&bytes);
        assert_eq!(decode_output(&with_bom), "PKTWinNode\r\n");

        assert_eq!(decode_output(b"active\n"), "active\n");
    }

    #[tokio::test]
    async fn test_scripted_sequence_repeats_last() {
        let exec = ScriptedExecutor::new().on_sequence(
            "--list",
            vec![ScriptedResponse::ok("first"), ScriptedResponse::ok("second")],
        );
        let s = spec(&["--list", "--verbose"]);
        assert_eq!(exec.run(&s).await.unwrap().stdout, "first");
        assert_eq!(exec.run(&s).await.unwrap().stdout, "second");
        assert_eq!(exec.run(&s).await.unwrap().stdout, "second");
        assert_eq!(exec.count_matching("--list"), 3);
    }

    #[tokio::test]
    async fn test_scripted_errors_and_default() {
        let exec = ScriptedExecutor::new()
            .on("--terminate", ScriptedResponse::Timeout)
            .on("--import", ScriptedResponse::LaunchFailure);
        assert!(matches!(
            exec.run(&spec(&["--terminate", "x"])).await,
            Err(ExecError::Timeout { .. })
        ));
        assert!(matches!(
            exec.run(&spec(&["--import", "x"])).await,
            Err(ExecError::Launch { .. })
        ));
        let out = exec.run(&spec(&["--shutdown"])).await.unwrap();
        assert!(out.success());
        assert!(out.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_elevated_output_not_captured() {
        let exec = ScriptedExecutor::new().on("New-VMSwitch", ScriptedResponse::ok("noise"));
        let s = CommandSpec::new("powershell.exe", Duration::from_secs(1))
            .arg("New-VMSwitch")
            .elevated();
        let out = exec.run(&s).await.unwrap();
        assert!(out.stdout.is_empty());
        assert_eq!(exec.calls()[0], "[elevated] powershell.exe New-VMSwitch");
    }

    #[tokio::test]
    async fn test_system_executor_missing_program() {
        let exec = SystemExecutor::default();
        let s = CommandSpec::new("pktnode-definitely-missing-binary", Duration::from_secs(1));
        assert!(matches!(exec.run(&s).await, Err(ExecError::Launch { .. })));
    }
}
