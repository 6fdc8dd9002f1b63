//! Inference Invoker
//!
//! Launches the external inference routine as
//! `<executable> <script-path> <image-path> <model-path>`, discards its
//! stderr, and scans stdout line by line until the first qualifying line.
//! Anything written after that line is drained and dropped.
//! The child is always reaped before returning so its exit status can be
//! checked and no process is leaked.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{PredictError, Result};
use crate::metrics;
use crate::parser::{CapturedOutput, OutputFilter};

// ============================================================================
// Interruption
// ============================================================================

/// Raises the interrupt observed by every [`InterruptSignal`] clone
#[derive(Debug)]
pub struct InterruptTrigger {
    tx: watch::Sender<bool>,
}

impl InterruptTrigger {
    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> InterruptSignal {
        InterruptSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Level-triggered interrupt flag.
///
/// Once raised it stays raised: observing it does not clear it, so the
/// interruption is still visible to everything else waiting on it.
#[derive(Debug, Clone)]
pub struct InterruptSignal {
    rx: watch::Receiver<bool>,
}

impl InterruptSignal {
    /// A signal that can never be raised
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the interrupt is raised; pends forever if the trigger is gone
    pub async fn raised(&mut self) {
        let trigger_gone = self.rx.wait_for(|raised| *raised).await.is_err();
        if trigger_gone {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for InterruptSignal {
    fn default() -> Self {
        Self::never()
    }
}

pub fn interrupt_channel() -> (InterruptTrigger, InterruptSignal) {
    let (tx, rx) = watch::channel(false);
    (InterruptTrigger { tx }, InterruptSignal { rx })
}

// ============================================================================
// Invocation
// ============================================================================

/// The fixed calling convention for one inference run
#[derive(Debug, Clone, Copy)]
pub struct InferenceInvocationSpec<'a> {
    pub executable: &'a str,
    pub script: &'a Path,
    pub image: &'a Path,
    pub model: &'a Path,
}

impl InferenceInvocationSpec<'_> {
    fn command(&self) -> Command {
        let mut cmd = Command::new(self.executable);
        cmd.arg(self.script)
            .arg(self.image)
            .arg(self.model)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

enum Outcome {
    Finished(io::Result<(CapturedOutput, ExitStatus)>),
    TimedOut,
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct InferenceInvoker {
    executable: String,
    filter: OutputFilter,
    timeout: Option<Duration>,
}

impl InferenceInvoker {
    pub fn new(executable: impl Into<String>, filter: OutputFilter, timeout: Option<Duration>) -> Self {
        Self {
            executable: executable.into(),
            filter,
            timeout,
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    /// Run the routine once and return its first qualifying stdout line.
    ///
    /// Fails with `ProcessLaunch` if the executable cannot be started,
    /// `ProcessFailure` on a non-zero exit, `ProcessTimeout` when the
    /// configured bound expires and `ProcessInterrupted` when `interrupt`
    /// is raised. In the last two cases the child is killed and reaped.
    pub async fn invoke(
        &self,
        script: &Path,
        image: &Path,
        model: &Path,
        interrupt: &InterruptSignal,
    ) -> Result<CapturedOutput> {
        let invocation = InferenceInvocationSpec {
            executable: &self.executable,
            script,
            image,
            model,
        };

        if interrupt.is_raised() {
            return Err(PredictError::ProcessInterrupted);
        }

        let start = Instant::now();
        let mut child = invocation.command().spawn().map_err(|source| PredictError::ProcessLaunch {
            executable: self.executable.clone(),
            source,
        })?;
        debug!(pid = ?child.id(), script = %script.display(), "Inference process started");

        let stdout = child.stdout.take().ok_or_else(|| {
            PredictError::ProcessIo(io::Error::other("stdout of inference process not captured"))
        })?;

        let mut interrupt = interrupt.clone();
        let outcome = {
            let run = read_then_wait(&mut child, stdout, &self.filter);
            tokio::select! {
                res = run => Outcome::Finished(res),
                _ = deadline(self.timeout) => Outcome::TimedOut,
                _ = interrupt.raised() => Outcome::Interrupted,
            }
        };

        metrics::INFERENCE_DURATION.observe(start.elapsed().as_secs_f64());

        match outcome {
            Outcome::Finished(Ok((captured, status))) => {
                if !status.success() {
                    warn!(exit_code = ?status.code(), "Inference process exited unsuccessfully");
                    return Err(PredictError::ProcessFailure {
                        code: status.code(),
                    });
                }
                info!(
                    latency_ms = start.elapsed().as_millis() as u64,
                    lines_seen = captured.lines_seen,
                    "Inference process completed"
                );
                Ok(captured)
            }
            Outcome::Finished(Err(e)) => {
                terminate(&mut child).await;
                Err(PredictError::ProcessIo(e))
            }
            Outcome::TimedOut => {
                let timeout = self.timeout.unwrap_or_default();
                warn!(timeout = ?timeout, "Inference process timed out, killing it");
                terminate(&mut child).await;
                Err(PredictError::ProcessTimeout { timeout })
            }
            Outcome::Interrupted => {
                warn!("Interrupted while waiting for inference process, killing it");
                terminate(&mut child).await;
                Err(PredictError::ProcessInterrupted)
            }
        }
    }
}

async fn read_then_wait(
    child: &mut Child,
    stdout: ChildStdout,
    filter: &OutputFilter,
) -> io::Result<(CapturedOutput, ExitStatus)> {
    let mut reader = BufReader::new(stdout);
    let captured = capture_first_qualifying(&mut reader, filter).await?;

    // Discard whatever follows so a chatty child never blocks on a full pipe
    let mut sink = tokio::io::sink();
    let exited = tokio::select! {
        status = child.wait() => Some(status?),
        _ = tokio::io::copy(&mut reader, &mut sink) => None,
    };
    let status = match exited {
        Some(status) => status,
        None => child.wait().await?,
    };
    Ok((captured, status))
}

/// Longest output line inspected; anything longer is counted and skipped
pub const MAX_LINE_BYTES: usize = 64 * 1024;

enum Line {
    Text(String),
    Overlong,
}

/// Splits a byte stream on `\n`, `\r\n` and bare `\r`.
///
/// Progress bars redraw themselves with a bare `\r`, so each redraw is its
/// own line. Bytes past [`MAX_LINE_BYTES`] are dropped and the line is
/// reported as [`Line::Overlong`].
#[derive(Default)]
struct LineSplitter {
    buf: Vec<u8>,
    overlong: bool,
    after_cr: bool,
}

impl LineSplitter {
    fn push(&mut self, byte: u8) -> Option<Line> {
        if std::mem::take(&mut self.after_cr) && byte == b'\n' {
            return None;
        }

        match byte {
            b'\n' => Some(self.take()),
            b'\r' => {
                self.after_cr = true;
                Some(self.take())
            }
            _ if self.buf.len() < MAX_LINE_BYTES => {
                self.buf.push(byte);
                None
            }
            _ => {
                self.overlong = true;
                None
            }
        }
    }

    /// Flush an unterminated final line at end of stream
    fn finish(&mut self) -> Option<Line> {
        (!self.buf.is_empty() || self.overlong).then(|| self.take())
    }

    fn take(&mut self) -> Line {
        let overlong = std::mem::take(&mut self.overlong);
        let bytes = std::mem::take(&mut self.buf);
        if overlong {
            Line::Overlong
        } else {
            Line::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

/// Read stdout until the first line accepted by `filter` or end of stream
async fn capture_first_qualifying(
    reader: &mut BufReader<ChildStdout>,
    filter: &OutputFilter,
) -> io::Result<CapturedOutput> {
    let mut captured = CapturedOutput::default();
    let mut splitter = LineSplitter::default();

    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            if let Some(line) = splitter.finish() {
                inspect_line(&mut captured, line, filter);
            }
            return Ok(captured);
        }

        let mut used = 0;
        let mut found = false;
        for &byte in chunk {
            used += 1;
            if let Some(line) = splitter.push(byte) {
                if inspect_line(&mut captured, line, filter) {
                    found = true;
                    break;
                }
            }
        }
        reader.consume(used);

        if found {
            return Ok(captured);
        }
    }
}

/// Count one line and keep it if it qualifies
fn inspect_line(captured: &mut CapturedOutput, line: Line, filter: &OutputFilter) -> bool {
    captured.lines_seen += 1;
    match line {
        Line::Text(text) if filter.qualifies(&text) => {
            captured.line = Some(text);
            true
        }
        Line::Text(text) => {
            debug!(line = %text, "Ignoring non-result output line");
            false
        }
        Line::Overlong => {
            debug!(limit = MAX_LINE_BYTES, "Ignoring over-long output line");
            false
        }
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending::<()>().await,
    }
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill inference process");
    }
}
