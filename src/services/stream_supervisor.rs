//! Stream Supervisor
//!
//! Owns the analyzer process of one feed. A supervisor spawns the analyzer,
//! feeds both of its output pipes into a [`RawBuffer`], parses a snapshot
//! whenever a bitrate report closes a cycle and delivers it through a bounded,
//! lossy channel. Exits are followed by a respawn after a capped exponential
//! backoff; only cancellation ends supervision.
//!
//! Lines from stdout and stderr keep their order within each pipe, but the
//! interleaving between the two pipes is not deterministic.

use chrono::{DateTime, Utc};
use std::io;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::analyzer_command::AnalyzerCommand;
use super::report_buffer::RawBuffer;
use super::restart_backoff::RestartBackoff;
use crate::config::SupervisorConfig;
use crate::errors::{SupervisorError, SupervisorResult};
use crate::models::{StreamSnapshot, StreamTarget, SupervisorState};
use crate::parser::parse_report;

/// Receiving end of a supervisor's snapshot channel
pub type SnapshotReceiver = mpsc::Receiver<StreamSnapshot>;
type SnapshotSender = mpsc::Sender<StreamSnapshot>;

/// Capacity of the merged stdout/stderr line queue
const LINE_QUEUE_CAPACITY: usize = 1024;

/// Upper bound on waiting for a killed analyzer to be reaped
const KILL_WAIT: Duration = Duration::from_secs(2);

/// State shared between the control API, the supervision loop and the watchdog
#[derive(Debug)]
struct SharedState {
    state: SupervisorState,
    pid: Option<u32>,
    last_emit: Instant,
    last_capture: DateTime<Utc>,
}

struct RunControl {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Supervises the analyzer process of a single feed
pub struct StreamSupervisor {
    run: SupervisionRun,
    control: Mutex<Option<RunControl>>,
}

/// Everything the background tasks need, cheap to clone
#[derive(Clone)]
struct SupervisionRun {
    target: StreamTarget,
    command: AnalyzerCommand,
    settings: SupervisorConfig,
    shared: Arc<Mutex<SharedState>>,
    dropped: Arc<AtomicU64>,
    restarts: Arc<AtomicU64>,
}

enum RunOutcome {
    Exited { status: ExitStatus, emitted: u64 },
    Failed { error: SupervisorError, emitted: u64 },
    Cancelled,
}

impl StreamSupervisor {
    pub fn new(target: StreamTarget, command: AnalyzerCommand, settings: SupervisorConfig) -> Self {
        Self {
            run: SupervisionRun {
                target,
                command,
                settings,
                shared: Arc::new(Mutex::new(SharedState {
                    state: SupervisorState::Idle,
                    pid: None,
                    last_emit: Instant::now(),
                    last_capture: Utc::now(),
                })),
                dropped: Arc::new(AtomicU64::new(0)),
                restarts: Arc::new(AtomicU64::new(0)),
            },
            control: Mutex::new(None),
        }
    }

    /// Supervisor running the configured `tsp` pipeline for `target`
    pub fn for_target(target: StreamTarget, settings: SupervisorConfig) -> Self {
        let command = AnalyzerCommand::tsp(settings.analyzer_command.clone(), &target);
        Self::new(target, command, settings)
    }

    pub fn target(&self) -> &StreamTarget {
        &self.run.target
    }

    /// Begin supervision under a child of `parent`.
    ///
    /// Returns the receiver of a fresh snapshot channel. The channel closes
    /// once supervision has fully stopped.
    pub async fn start(&self, parent: &CancellationToken) -> SupervisorResult<SnapshotReceiver> {
        let mut control = self.control.lock().await;
        if control.as_ref().is_some_and(|c| !c.handle.is_finished()) {
            return Err(SupervisorError::already_running(self.run.target.to_string()));
        }

        {
            let mut shared = self.run.shared.lock().await;
            shared.state = SupervisorState::Starting;
            shared.last_emit = Instant::now();
            shared.pid = None;
        }

        let token = parent.child_token();
        let (tx, rx) = mpsc::channel(self.run.settings.channel_capacity.max(1));
        let handle = tokio::spawn(self.run.clone().supervise(tx, token.clone()));
        *control = Some(RunControl { token, handle });

        info!("Supervisor started for {}", self.run.target);
        Ok(rx)
    }

    /// Cancel supervision and wait until every task has finished.
    ///
    /// The control lock is held until the run has joined, so a concurrent
    /// `start` waits for the old run to release the shared state.
    pub async fn stop(&self) {
        let mut guard = self.control.lock().await;
        let Some(control) = guard.take() else {
            return;
        };

        control.token.cancel();
        if let Err(e) = control.handle.await {
            error!("Supervision task for {} failed: {}", self.run.target, e);
            self.run.set_state(SupervisorState::Stopped).await;
        }
        info!("Supervisor stopped for {}", self.run.target);
    }

    pub async fn is_running(&self) -> bool {
        self.run.shared.lock().await.state.is_active()
    }

    pub async fn state(&self) -> SupervisorState {
        self.run.shared.lock().await.state
    }

    /// OS process id of the live analyzer, if any
    pub async fn process_id(&self) -> Option<u32> {
        self.run.shared.lock().await.pid
    }

    /// Snapshots discarded because the channel was full
    pub fn dropped_snapshots(&self) -> u64 {
        self.run.dropped.load(Ordering::Relaxed)
    }

    pub fn restart_count(&self) -> u64 {
        self.run.restarts.load(Ordering::Relaxed)
    }

    /// Supervise for a fixed duration and return the last snapshot seen
    pub async fn probe(&self, duration: Duration) -> SupervisorResult<Option<StreamSnapshot>> {
        let token = CancellationToken::new();
        let mut rx = self.start(&token).await?;
        let mut last = None;

        let deadline = sleep(duration);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                snapshot = rx.recv() => match snapshot {
                    Some(snapshot) => last = Some(snapshot),
                    None => break,
                },
            }
        }

        self.stop().await;
        // Keep anything delivered between the deadline and the stop
        while let Ok(snapshot) = rx.try_recv() {
            last = Some(snapshot);
        }
        Ok(last)
    }
}

impl SupervisionRun {
    async fn set_state(&self, state: SupervisorState) {
        self.shared.lock().await.state = state;
    }

    async fn supervise(self, tx: SnapshotSender, token: CancellationToken) {
        let watchdog = tokio::spawn(self.clone().watchdog(tx.clone(), token.clone()));
        let mut backoff =
            RestartBackoff::new(self.settings.restart_delay, self.settings.max_restart_delay);
        let mut buffer = RawBuffer::new(self.settings.max_buffer_bytes);

        while !token.is_cancelled() {
            self.set_state(SupervisorState::Starting).await;
            buffer.clear();

            let emitted = match self.run_once(&tx, &token, &mut buffer).await {
                RunOutcome::Cancelled => break,
                RunOutcome::Exited { status, emitted } => {
                    if status.success() {
                        info!("Analyzer for {} exited cleanly", self.target);
                        self.set_state(SupervisorState::ExitedClean).await;
                    } else {
                        warn!("Analyzer for {} exited with {}", self.target, status);
                        self.set_state(SupervisorState::ExitedError).await;
                    }
                    emitted
                }
                RunOutcome::Failed { error, emitted } => {
                    error!("Analyzer run for {} failed: {}", self.target, error);
                    self.set_state(SupervisorState::ExitedError).await;
                    emitted
                }
            };

            if emitted > 0 {
                backoff.reset();
            }
            let delay = backoff.next_delay();

            self.set_state(SupervisorState::Restarting).await;
            info!(
                "Restarting analyzer for {} in {} (attempt {})",
                self.target,
                humantime::format_duration(Duration::from_millis(delay.as_millis() as u64)),
                backoff.attempt()
            );

            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(delay) => {}
            }
            self.restarts.fetch_add(1, Ordering::Relaxed);
        }

        self.set_state(SupervisorState::Cancelled).await;
        if let Err(e) = watchdog.await {
            error!("Watchdog for {} failed: {}", self.target, e);
        }

        let mut shared = self.shared.lock().await;
        shared.state = SupervisorState::Stopped;
        shared.pid = None;
        // `tx` drops here, the last sender alive, which closes the channel
    }

    async fn run_once(
        &self,
        tx: &SnapshotSender,
        token: &CancellationToken,
        buffer: &mut RawBuffer,
    ) -> RunOutcome {
        let mut child = match self.command.to_command().spawn() {
            Ok(child) => child,
            Err(source) => {
                return RunOutcome::Failed {
                    error: SupervisorError::Spawn {
                        program: self.command.program().to_string(),
                        stream: self.target.to_string(),
                        source,
                    },
                    emitted: 0,
                }
            }
        };

        let pid = child.id();
        {
            let mut shared = self.shared.lock().await;
            shared.state = SupervisorState::Running;
            shared.pid = pid;
        }
        info!("Started analyzer for {} with PID {:?}: {}", self.target, pid, self.command);

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            (stdout, _) => {
                let pipe = if stdout.is_none() { "stdout" } else { "stderr" };
                self.terminate(&mut child).await;
                return RunOutcome::Failed {
                    error: SupervisorError::PipeUnavailable {
                        pipe,
                        stream: self.target.to_string(),
                    },
                    emitted: 0,
                };
            }
        };

        let reader_token = token.child_token();
        let (line_tx, mut line_rx) = mpsc::channel::<String>(LINE_QUEUE_CAPACITY);
        let max_line = self.settings.max_buffer_bytes;
        let readers = [
            tokio::spawn(read_lines(stdout, line_tx.clone(), reader_token.clone(), max_line)),
            tokio::spawn(read_lines(stderr, line_tx, reader_token.clone(), max_line)),
        ];

        let mut emitted = 0;
        let outcome = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.terminate(&mut child).await;
                    break RunOutcome::Cancelled;
                }
                line = line_rx.recv() => match line {
                    Some(line) => {
                        if buffer.push_line(&line) && self.emit_cycle(tx, buffer).await {
                            emitted += 1;
                        }
                    }
                    None => {
                        // Both pipes closed; the process is exiting
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => {
                                self.terminate(&mut child).await;
                                break RunOutcome::Cancelled;
                            }
                            status = child.wait() => break match status {
                                Ok(status) => RunOutcome::Exited { status, emitted },
                                Err(e) => RunOutcome::Failed { error: e.into(), emitted },
                            },
                        }
                    }
                },
            }
        };

        reader_token.cancel();
        for reader in readers {
            if let Err(e) = reader.await {
                warn!("Output reader for {} failed: {}", self.target, e);
            }
        }
        self.shared.lock().await.pid = None;

        outcome
    }

    /// Parse the current report window; true when a snapshot was produced
    async fn emit_cycle(&self, tx: &SnapshotSender, buffer: &mut RawBuffer) -> bool {
        let produced = match parse_report(buffer.window(self.settings.report_window_cycles), &self.target) {
            Ok(snapshot) => {
                {
                    let mut shared = self.shared.lock().await;
                    shared.last_emit = Instant::now();
                    shared.last_capture = snapshot.captured_at;
                }
                self.deliver(tx, snapshot);
                true
            }
            Err(e) => {
                warn!("Skipping report cycle for {}: {}", self.target, e);
                false
            }
        };

        buffer.compact();
        produced
    }

    /// Non-blocking emission; a full channel drops the snapshot
    fn deliver(&self, tx: &SnapshotSender, snapshot: StreamSnapshot) {
        match tx.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Snapshot channel full for {}, dropped {} so far", self.target, total);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Snapshot receiver for {} is gone", self.target);
            }
        }
    }

    /// Interrupt the analyzer, escalating to a kill after the grace period
    async fn terminate(&self, child: &mut Child) {
        let interrupted = child.id().is_some_and(send_interrupt);
        if interrupted {
            match timeout(self.settings.stop_grace_period, child.wait()).await {
                Ok(Ok(status)) => {
                    info!("Analyzer for {} stopped ({})", self.target, status);
                    return;
                }
                Ok(Err(e)) => warn!("Waiting for analyzer of {} failed: {}", self.target, e),
                Err(_) => warn!(
                    "Analyzer for {} ignored interrupt for {}, killing",
                    self.target,
                    humantime::format_duration(self.settings.stop_grace_period)
                ),
            }
        }

        if let Err(e) = child.start_kill() {
            debug!("Kill of analyzer for {} failed: {}", self.target, e);
        }
        match timeout(KILL_WAIT, child.wait()).await {
            Ok(Ok(status)) => info!("Analyzer for {} killed ({})", self.target, status),
            Ok(Err(e)) => warn!("Waiting for killed analyzer of {} failed: {}", self.target, e),
            Err(_) => error!("Analyzer for {} did not exit after kill, abandoning it", self.target),
        }
    }

    /// Emit offline snapshots while the feed stays silent
    async fn watchdog(self, tx: SnapshotSender, token: CancellationToken) {
        let mut ticker = interval(self.settings.watchdog_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let (silent_for, last_capture) = {
                        let shared = self.shared.lock().await;
                        (shared.last_emit.elapsed(), shared.last_capture)
                    };

                    if silent_for > self.settings.stale_after {
                        warn!(
                            "No report from {} for {}, marking offline",
                            self.target,
                            humantime::format_duration(Duration::from_secs(silent_for.as_secs()))
                        );
                        self.deliver(&tx, StreamSnapshot::offline(&self.target, last_capture));
                    }
                }
            }
        }
    }
}

/// Forward lines of one pipe, decoding invalid UTF-8 lossily.
///
/// Lines longer than `max_line` bytes are cut to that length and the rest of
/// the line is discarded.
async fn read_lines<R>(
    pipe: R,
    lines: mpsc::Sender<String>,
    token: CancellationToken,
    max_line: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::with_capacity(256);

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = token.cancelled() => break,
            read = read_capped_line(&mut reader, &mut buf, max_line) => read,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).into_owned();
                tokio::select! {
                    _ = token.cancelled() => break,
                    sent = lines.send(line) => if sent.is_err() { break },
                }
            }
            Err(e) => {
                debug!("Analyzer pipe read failed: {}", e);
                break;
            }
        }
    }
}

/// Read one line keeping at most `limit` bytes in `buf`; returns the number
/// of bytes consumed from `reader`
async fn read_capped_line<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let limit = limit.max(1);
    let mut consumed = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', buf)
        .await?;
    if consumed < limit || buf.last() == Some(&b'\n') {
        return Ok(consumed);
    }

    let mut discarded = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        let (used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(end) => (end + 1, true),
            None => (available.len(), false),
        };
        reader.consume(used);
        discarded += used;
        if done {
            break;
        }
    }

    if discarded > 0 {
        debug!("Discarded {} bytes of an oversized analyzer line", discarded);
    }
    consumed += discarded;
    Ok(consumed)
}

#[cfg(unix)]
fn send_interrupt(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match i32::try_from(pid) {
        Ok(raw) => kill(Pid::from_raw(raw), Signal::SIGINT).is_ok(),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn send_interrupt(_pid: u32) -> bool {
    false
}
