//! Engine command construction and process execution.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::AppResult;
use crate::staging::StagedInputs;

/// Working directory inside the container.
pub const CONTAINER_WORKDIR: &str = "/var/simdata/energyplus";
const CONTAINER_PREFIX: &str = "energyplus_";

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const SIGINT: i32 = 2;
const SIGTERM: i32 = 15;

/// Shared flag that aborts in-flight runs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Flags passed to every engine invocation.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub output_prefix: String,
    pub readvars: bool,
    pub expand_objects: bool,
    pub extra_args: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            output_prefix: "eplus".to_string(),
            readvars: true,
            expand_objects: true,
            extra_args: Vec::new(),
        }
    }
}

/// How to launch the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Local { binary: PathBuf },
    Docker { image: String, tag: String },
}

impl EngineCommand {
    /// Arguments understood by the `energyplus` CLI.
    pub fn engine_args(
        staged: &StagedInputs,
        output_dir: &Path,
        options: &EngineOptions,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-w".into(),
            staged.weather.clone().into(),
            "-p".into(),
            options.output_prefix.clone().into(),
            "-s".into(),
            "d".into(),
        ];
        if let Some(idd) = &staged.idd {
            args.push("-i".into());
            args.push(idd.clone().into());
        }
        args.push("-d".into());
        args.push(output_dir.as_os_str().to_os_string());
        if options.readvars {
            args.push("-r".into());
        }
        if options.expand_objects {
            args.push("-x".into());
        }
        args.extend(options.extra_args.iter().map(OsString::from));
        args.push(staged.model.clone().into());
        args
    }

    /// Container name for a run in `working_dir`. Unique per working directory.
    pub fn container_name(working_dir: &Path) -> String {
        let dir = working_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = dir.strip_prefix(CONTAINER_PREFIX).unwrap_or(&dir);
        format!("{}{}", CONTAINER_PREFIX, dir)
    }

    /// Program and full argument list for a run in `working_dir`.
    ///
    /// Containers run as the working directory's owner so their outputs stay
    /// removable by the host user.
    pub fn program_and_args(
        &self,
        staged: &StagedInputs,
        working_dir: &Path,
        options: &EngineOptions,
    ) -> (OsString, Vec<OsString>) {
        match self {
            EngineCommand::Local { binary } => (
                binary.clone().into_os_string(),
                Self::engine_args(staged, working_dir, options),
            ),
            EngineCommand::Docker { image, tag } => {
                let mut args: Vec<OsString> = vec![
                    "run".into(),
                    "--rm".into(),
                    "--name".into(),
                    Self::container_name(working_dir).into(),
                ];
                if let Some(user) = owner(working_dir) {
                    args.push("--user".into());
                    args.push(user.into());
                }
                args.push("-v".into());
                let mut mount = working_dir.as_os_str().to_os_string();
                mount.push(":");
                mount.push(CONTAINER_WORKDIR);
                args.push(mount);
                args.push("-w".into());
                args.push(CONTAINER_WORKDIR.into());
                args.push(format!("{}:{}", image, tag).into());
                args.push("energyplus".into());
                args.extend(Self::engine_args(
                    staged,
                    Path::new(CONTAINER_WORKDIR),
                    options,
                ));
                ("docker".into(), args)
            }
        }
    }

    /// A ready-to-spawn command running inside `working_dir`.
    pub fn build(
        &self,
        staged: &StagedInputs,
        working_dir: &Path,
        options: &EngineOptions,
    ) -> Invocation {
        let (program, args) = self.program_and_args(staged, working_dir, options);
        let mut command = Command::new(program);
        command.args(args).current_dir(working_dir);
        let container = match self {
            EngineCommand::Local { .. } => None,
            EngineCommand::Docker { .. } => Some(Self::container_name(working_dir)),
        };
        Invocation { command, container }
    }
}

#[cfg(unix)]
fn owner(path: &Path) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(path).ok()?;
    Some(format!("{}:{}", meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
fn owner(_path: &Path) -> Option<String> {
    None
}

/// A spawnable engine command.
///
/// `container` names the Docker container behind it. Killing the `docker`
/// client leaves the container running, so stops go through `docker kill`.
#[derive(Debug)]
pub struct Invocation {
    pub command: Command,
    pub container: Option<String>,
}

impl From<Command> for Invocation {
    fn from(command: Command) -> Self {
        Self {
            command,
            container: None,
        }
    }
}

fn kill_container(name: &str) {
    let status = Command::new("docker")
        .arg("kill")
        .arg(name)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => {
            tracing::debug!(container = name, "container killed");
        }
        Ok(status) => {
            tracing::warn!(container = name, status = %status, "docker kill failed");
        }
        Err(err) => {
            tracing::warn!(container = name, error = %err, "unable to run docker kill");
        }
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeOutcome {
    Success {
        log: String,
    },
    Failed {
        code: Option<i32>,
        reason: String,
        log: String,
    },
    Interrupted {
        log: String,
    },
}

impl InvokeOutcome {
    pub fn log(&self) -> &str {
        match self {
            InvokeOutcome::Success { log }
            | InvokeOutcome::Failed { log, .. }
            | InvokeOutcome::Interrupted { log } => log,
        }
    }
}

enum Stop {
    Cancelled,
    TimedOut(Duration),
}

fn push_line(log: &mut String, line: String) {
    tracing::info!(target: "energyplus", "{}", line);
    log.push_str(&line);
    log.push('\n');
}

fn drain(rx: &mpsc::Receiver<String>, log: &mut String) {
    while let Ok(line) = rx.try_recv() {
        push_line(log, line);
    }
}

fn spawn_line_reader<R: Read + Send + 'static>(stream: R, tx: mpsc::Sender<String>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(unix)]
fn killed_by_interrupt(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    matches!(status.signal(), Some(SIGINT) | Some(SIGTERM))
}

#[cfg(not(unix))]
fn killed_by_interrupt(_status: &ExitStatus) -> bool {
    false
}

/// Run `command` to completion, capturing stdout and stderr line by line.
///
/// Never retries. A spawn failure is returned as an error; everything after
/// the spawn is described by the outcome. A process that already exited when
/// a cancel or timeout is noticed is judged by its exit status.
pub fn invoke(
    invocation: impl Into<Invocation>,
    cancel: &CancelToken,
    timeout: Option<Duration>,
) -> AppResult<InvokeOutcome> {
    let Invocation {
        mut command,
        container,
    } = invocation.into();
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::debug!(command = ?command, "starting EnergyPlus");
    let mut child = command.spawn()?;

    let (tx, rx) = mpsc::channel();
    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, tx.clone());
    }
    drop(tx);

    let started = Instant::now();
    let mut log = String::new();
    let mut stop: Option<Stop> = None;

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => push_line(&mut log, line),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if stop.is_none() {
            let requested = if cancel.is_cancelled() {
                Some(Stop::Cancelled)
            } else {
                timeout
                    .filter(|t| started.elapsed() >= *t)
                    .map(Stop::TimedOut)
            };
            if let Some(requested) = requested {
                // Grandchildren may hold the pipes after a clean exit.
                if child.try_wait()?.is_some() {
                    drain(&rx, &mut log);
                    break;
                }
                tracing::warn!("stopping EnergyPlus process");
                if let Some(name) = &container {
                    kill_container(name);
                }
                let _ = child.kill();
                stop = Some(requested);
            }
        }

        // Grandchildren may keep the pipes open after a kill.
        if stop.is_some() && child.try_wait()?.is_some() {
            drain(&rx, &mut log);
            break;
        }
    }

    let status = child.wait()?;
    let outcome = match stop {
        Some(Stop::Cancelled) => InvokeOutcome::Interrupted { log },
        Some(Stop::TimedOut(limit)) => InvokeOutcome::Failed {
            code: status.code(),
            reason: format!("timed out after {:.1}s", limit.as_secs_f64()),
            log,
        },
        None if status.success() => InvokeOutcome::Success { log },
        None if killed_by_interrupt(&status) => InvokeOutcome::Interrupted { log },
        None => InvokeOutcome::Failed {
            code: status.code(),
            reason: match status.code() {
                Some(code) => format!("exit code {}", code),
                None => format!("terminated ({})", status),
            },
            log,
        },
    };

    tracing::debug!(
        elapsed_s = started.elapsed().as_secs_f64(),
        status = %status,
        "EnergyPlus process ended"
    );
    Ok(outcome)
}

/// Version reported by `<binary> -v`, if it can be parsed.
pub fn engine_version(binary: &Path) -> AppResult<Option<String>> {
    let output = Command::new(binary).arg("-v").stdin(Stdio::null()).output()?;
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(ep_core::engine_version_from_output(&text))
}
