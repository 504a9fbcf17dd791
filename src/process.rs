//! External tool execution.
//!
//! Stages never spawn processes directly. They describe the call with [`Cmd`]
//! and hand it to a [`ToolchainInvoker`], which returns the exit code and the
//! captured stdio. [`SystemInvoker`] is the real implementation; tests swap in
//! a recording fake.

use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use thiserror::Error;
use tracing::{debug, warn};

use crate::pipeline::CancellationToken;

/// How often a running child is polled for exit and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One external tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    /// Tool name without directories, e.g. `aapt2`.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Arguments as lossy UTF-8, for logs and tests.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    /// Shell-like rendering of the command line.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in self.args_lossy() {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push_str(&format!("'{arg}'"));
            } else {
                line.push_str(&arg);
            }
        }
        line
    }
}

/// Exit status and captured output of a finished tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A tool was killed because the build was cancelled.
#[derive(Debug, Error)]
#[error("'{program}' was interrupted by a stop request")]
pub struct Interrupted {
    pub program: String,
}

/// Process-execution boundary used by every stage.
pub trait ToolchainInvoker: Send + Sync {
    /// Run the tool to completion and capture its output.
    ///
    /// Implementations may abort early when `cancel` is set, returning an
    /// [`Interrupted`] error.
    fn invoke(&self, invocation: &Invocation, cancel: &CancellationToken) -> Result<ToolOutput>;
}

/// Runs tools as child processes of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInvoker;

impl ToolchainInvoker for SystemInvoker {
    fn invoke(&self, invocation: &Invocation, cancel: &CancellationToken) -> Result<ToolOutput> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }

        debug!(tool = %invocation.tool_name(), "spawning process");
        let mut child = command
            .spawn()
            .with_context(|| format!("spawning '{}'", invocation.program.display()))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("waiting for '{}'", invocation.program.display()))?
            {
                break status;
            }
            if cancel.is_cancelled() {
                warn!(tool = %invocation.tool_name(), "stop requested, killing tool");
                let _ = child.kill();
                let _ = child.wait();
                // Grandchildren may still hold the pipes open; leave the
                // drain threads detached.
                drop(stdout);
                drop(stderr);
                return Err(Interrupted {
                    program: invocation.tool_name(),
                }
                .into());
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(ToolOutput {
            code: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }
}

/// Read a child pipe to the end on a helper thread so neither pipe can fill
/// up and block the child.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Builder for a tool call.
///
/// ```rust,ignore
/// Cmd::new(&toolchain.zipalign)
///     .args(["-p", "-f", "4"])
///     .arg_path(&input)
///     .arg_path(&output)
///     .error_msg("zipalign failed")
///     .run_with(invoker, cancel)?;
/// ```
#[derive(Debug, Clone)]
pub struct Cmd {
    program: PathBuf,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            cwd: None,
            error_msg: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    /// Append `flag value` only when `value` is present.
    pub fn opt_path(self, flag: &str, value: Option<&Path>) -> Self {
        match value {
            Some(path) => self.arg(flag).arg_path(path),
            None => self,
        }
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Message used as the first line of the failure when the tool exits
    /// non-zero.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    pub fn invocation(&self) -> Invocation {
        Invocation {
            program: self.program.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
        }
    }

    /// Run through `invoker`; a non-zero exit becomes an error carrying the
    /// tool's stderr (or stdout when stderr is empty).
    pub fn run_with(
        self,
        invoker: &dyn ToolchainInvoker,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput> {
        let invocation = self.invocation();
        let output = invoker.invoke(&invocation, cancel)?;
        if output.success() {
            return Ok(output);
        }

        let msg = self
            .error_msg
            .unwrap_or_else(|| format!("{} failed", invocation.tool_name()));
        let code = output
            .code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim()
        } else {
            output.stderr.trim()
        };
        bail!("{msg} (exit code {code})\n{detail}")
    }
}

/// Fail unless `path` exists.
pub fn ensure_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        bail!("{what} not found: {}", path.display());
    }
    Ok(())
}
