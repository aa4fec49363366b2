/* Copyright (C) 2022 Antmicro
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Running external tools.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ExecError;
use crate::log::*;

/// A fully rendered command line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Invocation {
    /// Logical tool name, as known to the `ToolRegistry`.
    pub tool: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tool)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg.replace('\'', "'\\''"))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Output captured from one tool run, kept verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub trait ToolExecutor {
    fn execute(&mut self, invocation: &Invocation) -> Result<ToolOutput, ExecError>;
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: nix::libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Shared cancellation flag, optionally tied to SIGINT.
#[derive(Clone, Default, Debug)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    interrupt: bool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that also trips on SIGINT. The handler is process-wide; the
    /// running tool receives the interrupt from the terminal on its own.
    pub fn on_interrupt() -> Result<Self, nix::Error> {
        use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

        let action = SigAction::new(
            SigHandler::Handler(on_sigint),
            SaFlags::SA_RESTART,
            SigSet::empty()
        );
        /* SAFETY: the handler only stores to an atomic */
        unsafe { sigaction(Signal::SIGINT, &action) }?;
        Ok(Self { flag: Arc::default(), interrupt: true })
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || (self.interrupt && INTERRUPTED.load(Ordering::SeqCst))
    }
}

#[derive(Clone, Copy)]
enum Echo {
    Stdout,
    Stderr,
}

fn spawn_reader<R>(mut src: R, echo: Option<Echo>) -> thread::JoinHandle<Vec<u8>> where
    R: Read + Send + 'static
{
    thread::spawn(move || {
        let mut captured = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match src.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    captured.extend_from_slice(&buf[.. n]);
                    let _ = match echo {
                        Some(Echo::Stdout) => io::stdout().write_all(&buf[.. n]),
                        Some(Echo::Stderr) => io::stderr().write_all(&buf[.. n]),
                        None => Ok(()),
                    };
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        captured
    })
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs tools as blocking subprocesses, capturing their output while also
/// streaming it to this process' stdout/stderr.
pub struct ProcessExecutor {
    timeout: Option<Duration>,
    cancel: CancelToken,
    echo: bool,
}

impl ProcessExecutor {
    pub fn new(cancel: CancelToken) -> Self {
        Self { timeout: None, cancel, echo: true }
    }

    /// Kill tools that run longer than `timeout`. There is no limit by default.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

impl ToolExecutor for ProcessExecutor {
    fn execute(&mut self, invocation: &Invocation) -> Result<ToolOutput, ExecError> {
        let program = invocation.tool.clone();
        dbg_log!(DBG_INFO, "Running {}", invocation);

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecError::Spawn { program: program.clone(), source })?;

        let stdout = child.stdout.take()
            .map(|s| spawn_reader(s, self.echo.then_some(Echo::Stdout)));
        let stderr = child.stderr.take()
            .map(|s| spawn_reader(s, self.echo.then_some(Echo::Stderr)));

        let started = Instant::now();
        let mut aborted = None;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => (),
                Err(source) => {
                    let _ = child.kill();
                    return Err(ExecError::Io { program, source });
                }
            }
            if self.cancel.is_cancelled() {
                aborted = Some(ExecError::Cancelled { program: program.clone() });
            } else if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    aborted = Some(ExecError::TimedOut {
                        program: program.clone(),
                        secs: timeout.as_secs(),
                    });
                }
            }
            if aborted.is_some() {
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            thread::sleep(POLL_INTERVAL);
        };

        /* Readers are left detached: a grandchild may still hold the pipes */
        if let Some(err) = aborted {
            return Err(err);
        }

        let stdout = stdout.map(|h| h.join().unwrap_or_default()).unwrap_or_default();
        let stderr = stderr.map(|h| h.join().unwrap_or_default()).unwrap_or_default();
        /* A tool killed by the same SIGINT that tripped the token */
        if self.cancel.is_cancelled() {
            return Err(ExecError::Cancelled { program });
        }

        Ok(ToolOutput {
            exit_code: status.and_then(|s| s.code()),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}
