//! Running the program under test.
//!
//! [`ProcessRunner::run`] spawns the program, feeds it its input, and drains stdout and
//! stderr on tasks of their own while waiting for it to exit. If the timeout passes first,
//! the program's process group is sent `SIGTERM`, and `SIGKILL` if it's still around
//! after the kill grace period.
//!
//! Output is collected line by line. Empty lines are dropped.
use crate::prelude::{threading::*, *};
use std::ffi::{OsStr, OsString};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// The timeout of a [`ProcessSpec`] unless [`ProcessSpec::timeout`] is called.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// The time given to a process between `SIGTERM` and `SIGKILL`, and to the
/// output readers after the process is gone.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// What to run, with which input, and for how long.
#[derive(Debug, Clone)]
#[must_use]
pub struct ProcessSpec {
    program: OsString,
    args: Vec<OsString>,
    input: Option<Bytes>,
    timeout: Duration,
    env: Vec<(OsString, OsString)>,
}
impl ProcessSpec {
    /// Runs `program` without arguments and input, with the [`DEFAULT_TIMEOUT`].
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            input: None,
            timeout: DEFAULT_TIMEOUT,
            env: Vec::new(),
        }
    }
    /// Adds an argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }
    /// Adds several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }
    /// Writes `input` to the program's stdin, which is then closed.
    ///
    /// Without input, stdin is the null device.
    pub fn input(mut self, input: impl Into<Bytes>) -> Self {
        self.input = Some(input.into());
        self
    }
    /// Terminates the program if it runs for longer than `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    /// Sets an environment variable of the program.
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }
    /// Sets several environment variables, e.g. [`RunningServer::environment`].
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, value) in vars {
            self = self.env(key, value);
        }
        self
    }
    /// Runs the program under `wrapper`, e.g. a debugger.
    ///
    /// The first item of `wrapper` becomes the program, and the rest of it is put before
    /// the current program and its arguments. An empty `wrapper` changes nothing.
    pub fn under<I, S>(mut self, wrapper: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut wrapper = wrapper.into_iter().map(|s| s.as_ref().to_os_string());
        if let Some(program) = wrapper.next() {
            let mut args: Vec<OsString> = wrapper.collect();
            args.push(std::mem::replace(&mut self.program, program));
            args.append(&mut self.args);
            self.args = args;
        }
        self
    }

    /// The program to run.
    #[must_use]
    pub fn program(&self) -> &OsStr {
        &self.program
    }
    /// The arguments passed to the [`Self::program`].
    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// It exited with a code.
    Code(i32),
    /// It was killed by a signal.
    Signal(i32),
}
impl ExitStatus {
    /// Whether the process exited with code `0`.
    #[must_use]
    pub fn success(self) -> bool {
        self == Self::Code(0)
    }
    /// The exit code, if the process wasn't killed.
    #[must_use]
    pub fn code(self) -> Option<i32> {
        match self {
            Self::Code(code) => Some(code),
            Self::Signal(_) => None,
        }
    }
}
impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        // A status is either a code or a signal.
        Self::Code(status.code().unwrap_or(-1))
    }
}
impl Display for ExitStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit {code}"),
            Self::Signal(signal) => write!(f, "killed by signal {signal}"),
        }
    }
}

/// The outcome of [`ProcessRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct ProcessResult {
    /// How the process ended.
    pub status: ExitStatus,
    /// The non-empty lines written to stdout, in order.
    pub stdout: Vec<String>,
    /// The non-empty lines written to stderr, in order.
    ///
    /// On timeout, the last line is `TIMEOUT: Process terminated after {secs} seconds.`
    pub stderr: Vec<String>,
    /// Whether the process was terminated because it overran its timeout.
    pub timed_out: bool,
}

/// Runs [`ProcessSpec`]s.
#[derive(Debug, Clone)]
#[must_use]
pub struct ProcessRunner {
    verbosity: Verbosity,
    kill_grace: Duration,
}
impl ProcessRunner {
    /// A quiet runner with the [`DEFAULT_KILL_GRACE`].
    pub fn new() -> Self {
        Self {
            verbosity: Verbosity::QUIET,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
    /// Echo output lines and the exit status when `verbosity` [echoes](Verbosity::echoes).
    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }
    /// Sets the time between `SIGTERM` and `SIGKILL`.
    /// The output readers get as long after the process is gone.
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Runs `spec` to completion or until its timeout.
    ///
    /// Returns within `timeout + 2 * kill_grace`, even if a process the program started
    /// keeps its output open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the program can't be started, and [`Error::Io`] if
    /// waiting for it fails.
    pub async fn run(&self, spec: ProcessSpec) -> Result<ProcessResult, Error> {
        let ProcessSpec {
            program,
            args,
            input,
            timeout,
            env,
        } = spec;
        let echo = self.verbosity.echoes();

        let mut command = Command::new(&program);
        command
            .args(&args)
            .envs(env)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Lead a group of its own, so what it starts is terminated along with it.
        #[cfg(unix)]
        command.process_group(0);

        debug!("Running {program:?} with {args:?}");
        let mut child = command.spawn().map_err(|source| Error::Spawn {
            program: program.to_string_lossy().into_owned(),
            source,
        })?;

        let writer = match (input, child.stdin.take()) {
            (Some(input), Some(mut stdin)) => Some(spawn(async move {
                if let Err(err) = stdin.write_all(&input).await {
                    debug!("Failed to write input of process: {err}");
                }
                // stdin is closed when dropped
            })),
            _ => None,
        };
        let (stop, stopped) = watch::channel(false);
        let stdout = child
            .stdout
            .take()
            .map(|out| spawn(lines(out, echo, stopped.clone())));
        let stderr = child
            .stderr
            .take()
            .map(|out| spawn(lines(out, echo, stopped)));

        let mut timed_out = false;
        let status = if let Ok(status) = tokio::time::timeout(timeout, child.wait()).await {
            status?
        } else {
            timed_out = true;
            debug!("Process overran its timeout of {timeout:?}");
            self.terminate(&mut child).await?
        };
        let status = ExitStatus::from(status);

        if let Some(writer) = writer {
            writer.abort();
        }
        let stopper = spawn({
            let grace = self.kill_grace;
            async move {
                tokio::time::sleep(grace).await;
                debug!("Output of process still open after it ended, abandoning it");
                let _ = stop.send(true);
            }
        });
        let stdout = join_lines(stdout).await;
        let mut stderr = join_lines(stderr).await;
        stopper.abort();

        if timed_out {
            let line = format!(
                "TIMEOUT: Process terminated after {} seconds.",
                timeout.as_secs_f64()
            );
            if echo {
                info!("{line}");
            }
            stderr.push(line);
        }
        if echo {
            info!("## {status}");
        }

        Ok(ProcessResult {
            status,
            stdout,
            stderr,
            timed_out,
        })
    }

    async fn terminate(&self, child: &mut Child) -> io::Result<std::process::ExitStatus> {
        if terminate_group(child) {
            if let Ok(status) = tokio::time::timeout(self.kill_grace, child.wait()).await {
                return status;
            }
            debug!("Process still running {:?} after SIGTERM", self.kill_grace);
        }
        kill_group(child);
        if let Err(err) = child.start_kill() {
            // it might've exited in between
            trace!("Failed to kill process: {err}");
        }
        child.wait().await
    }
}
impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends `signal` to the process group `child` leads.
#[cfg(unix)]
fn signal_group(child: &Child, signal: libc::c_int) -> bool {
    let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return false;
    };
    // SAFETY: `kill` takes no pointers.
    unsafe { libc::kill(-pid, signal) == 0 }
}
#[cfg(unix)]
fn terminate_group(child: &Child) -> bool {
    signal_group(child, libc::SIGTERM)
}
#[cfg(unix)]
fn kill_group(child: &Child) {
    signal_group(child, libc::SIGKILL);
}
#[cfg(not(unix))]
fn terminate_group(_child: &Child) -> bool {
    false
}
#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

/// Reads the non-empty lines of `reader` until EOF, or until `stop` is set.
async fn lines(
    reader: impl AsyncRead + Unpin,
    echo: bool,
    mut stop: watch::Receiver<bool>,
) -> Vec<String> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(128);
    let mut lines = Vec::new();
    loop {
        buf.clear();
        tokio::select! {
            biased;
            read = reader.read_until(chars::LF, &mut buf) => match read {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    debug!("Failed to read output of process: {err}");
                    break;
                }
            },
            _ = stop.changed() => break,
        }
        if buf.last() == Some(&chars::LF) {
            buf.pop();
        }
        if buf.is_empty() {
            continue;
        }
        let line = String::from_utf8_lossy(&buf).into_owned();
        if echo {
            info!("{line}");
        }
        lines.push(line);
    }
    lines
}

async fn join_lines(reader: Option<JoinHandle<Vec<String>>>) -> Vec<String> {
    match reader {
        Some(reader) => reader.await.unwrap_or_else(|err| {
            warn!("Output reader failed: {err}");
            Vec::new()
        }),
        None => Vec::new(),
    }
}
