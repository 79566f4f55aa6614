//! Scripted driver for interactive installers.
//!
//! Runs a child with piped stdio and plays a fixed list of expect/send steps.
//! Prompt text belongs to the installer and changes between releases, so
//! expectations only look for a delimiter and give up after a timeout; the raw
//! transcript is logged instead.
//!
//! There is no pseudo-terminal. Installers that test `[ -t 0 ]`, page their
//! license through a pager or read keys in raw mode see pipes and may take
//! their non-interactive path. The child gets `TERM=dumb` and `PAGER=cat` so
//! paging never waits on a keypress.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::{InstallError, InstallResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Wait until `delimiter` shows up in the output (or the timeout passes).
    Expect(String),
    /// Write `line` followed by a newline.
    Send(String),
    /// Wait for the child to close its output.
    ExpectEof,
}

#[derive(Debug, Clone)]
pub struct ScriptedDriver {
    program: OsString,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    timeout: Duration,
}

struct Session {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    transcript: Vec<u8>,
    eof: bool,
}

impl Session {
    fn push(&mut self, chunk: Vec<u8>) {
        tracing::debug!(output = %String::from_utf8_lossy(&chunk), "installer output");
        self.pending.extend_from_slice(&chunk);
        self.transcript.extend_from_slice(&chunk);
    }

    fn expect(&mut self, delimiter: &[u8], timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = find(&self.pending, delimiter) {
                self.pending.drain(..pos + delimiter.len());
                return;
            }
            if self.eof {
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(chunk) => self.push(chunk),
                Err(RecvTimeoutError::Timeout) => {
                    tracing::debug!(
                        delimiter = %String::from_utf8_lossy(delimiter),
                        "expected output did not arrive, continuing"
                    );
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => self.eof = true,
            }
        }
    }

    fn expect_eof(&mut self) {
        while !self.eof {
            match self.rx.recv() {
                Ok(chunk) => self.push(chunk),
                Err(_) => self.eof = true,
            }
        }
        self.pending.clear();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

fn send_line(stdin: &mut Option<ChildStdin>, line: &str) {
    let Some(pipe) = stdin.as_mut() else {
        return;
    };
    let result = pipe
        .write_all(line.as_bytes())
        .and_then(|_| pipe.write_all(b"\n"))
        .and_then(|_| pipe.flush());
    if let Err(err) = result {
        tracing::debug!(error = %err, "installer closed its input");
        *stdin = None;
    }
}

impl ScriptedDriver {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// How long each `Expect` step waits before moving on.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Play `steps`, wait for the child and return its combined output.
    pub fn run(&self, steps: &[Step]) -> InstallResult<String> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("TERM", "dumb")
            .env("PAGER", "cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx.clone());
        }
        drop(tx);

        let mut stdin = child.stdin.take();
        let mut session = Session {
            rx,
            pending: Vec::new(),
            transcript: Vec::new(),
            eof: false,
        };

        for step in steps {
            match step {
                Step::Expect(delimiter) => session.expect(delimiter.as_bytes(), self.timeout),
                Step::Send(line) => send_line(&mut stdin, line),
                Step::ExpectEof => {
                    drop(stdin.take());
                    session.expect_eof();
                }
            }
        }

        drop(stdin);
        session.expect_eof();
        let status = child.wait()?;
        let output = String::from_utf8_lossy(&session.transcript).into_owned();

        if !status.success() {
            return Err(InstallError::InstallerFailed {
                code: status.code(),
                output,
            });
        }
        Ok(output)
    }
}
