//! The single IO task.
//!
//! One tokio task owns the transport exclusively. It writes commands, reads
//! every byte the modem sends, frames lines, correlates them with the one
//! command in flight, and runs every line through the notification parser.
//! Callers talk to it over an mpsc channel and get their reply on a oneshot.
//!
//! A new request is only dequeued once the previous command has resolved
//! (final result code or deadline), so commands never interleave on the wire.
//! Callers also take turns in [`IoClient`], so a caller's reply timeout only
//! starts running once its command is next in line.
//! Notifications that arrive while a command is in flight are handled in
//! arrival order like any other line.
//!
//! After a command times out, its final result may still arrive. Until the
//! next command's echo is seen, lines are not counted as part of its reply,
//! so a late `OK` cannot resolve the wrong command.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use voicemodem_core::error::{Error, Result};
use voicemodem_core::transport::Transport;

use crate::observers::ObserverRegistry;
use crate::protocol::{self, FinalResult, LineFramer};
use crate::state::{self, CallState, CommandOutcome};
use crate::urc;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for the IO task.
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Read timeout handed to the transport while waiting for bytes.
    pub idle_poll: Duration,
    /// Consecutive command timeouts after which the modem is reported as
    /// unresponsive in the log.
    pub unresponsive_after: u32,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            idle_poll: Duration::from_millis(100),
            unresponsive_after: 3,
        }
    }
}

/// One AT command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtCommand {
    /// Command text without the line terminator.
    pub line: String,
    /// Substring that must appear in the reply for it to count as success.
    pub expected: Option<String>,
    /// Time allowed between transmission and the final result code.
    pub timeout: Duration,
    /// Call state change applied when the command completes with `OK`.
    pub outcome: Option<CommandOutcome>,
}

impl AtCommand {
    pub fn new(line: impl Into<String>, timeout: Duration) -> Self {
        AtCommand {
            line: line.into(),
            expected: None,
            timeout,
            outcome: None,
        }
    }

    /// Require `expected` to appear in the reply.
    pub fn expecting(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    /// Apply `outcome` to the call state when the command succeeds.
    pub fn on_success(mut self, outcome: CommandOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }
}

/// A request sent from the API to the IO task.
pub(crate) enum Request {
    Command {
        cmd: AtCommand,
        reply: oneshot::Sender<Result<String>>,
    },
}

/// The command currently awaiting its final result code.
struct PendingCommand {
    cmd: AtCommand,
    sent_at: Instant,
    deadline: Instant,
    lines: Vec<String>,
    /// Set when the previous command timed out. Reply lines are discarded
    /// until the echo of this command shows up.
    awaiting_echo: bool,
    reply: oneshot::Sender<Result<String>>,
}

/// Link health shared between the IO task and its handles.
#[derive(Debug)]
struct LinkStatus {
    alive: AtomicBool,
    consecutive_timeouts: AtomicU32,
}

impl LinkStatus {
    fn new() -> Self {
        LinkStatus {
            alive: AtomicBool::new(true),
            consecutive_timeouts: AtomicU32::new(0),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// Cloneable sender side of the IO task.
#[derive(Clone)]
pub struct IoClient {
    tx: mpsc::Sender<Request>,
    link: Arc<LinkStatus>,
    /// Held from enqueue to reply, one caller at a time.
    turn: Arc<tokio::sync::Mutex<()>>,
}

impl IoClient {
    /// Queue a command and wait for its reply.
    ///
    /// Returns the reply lines (echo excluded, final result included) joined
    /// with `\r\n`.
    ///
    /// Waits for any command already in progress from another clone first.
    /// Dropping the future while it waits sends nothing.
    pub async fn command(&self, cmd: AtCommand) -> Result<String> {
        if !self.link.is_alive() {
            return Err(Error::NotConnected);
        }
        let _turn = self.turn.lock().await;
        if !self.link.is_alive() {
            return Err(Error::NotConnected);
        }

        let guard = cmd.timeout + Duration::from_millis(500);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Command {
                cmd,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        match tokio::time::timeout(guard, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::Timeout),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.link.is_alive()
    }
}

/// Handle to a running IO task. Stored inside the connection.
pub struct ModemIo {
    client: IoClient,
    cancel: CancellationToken,
    task: JoinHandle<Box<dyn Transport>>,
}

impl ModemIo {
    pub fn client(&self) -> IoClient {
        self.client.clone()
    }

    pub async fn command(&self, cmd: AtCommand) -> Result<String> {
        self.client.command(cmd).await
    }

    /// `false` once the IO task has stopped, for whatever reason.
    pub fn is_alive(&self) -> bool {
        self.client.is_alive()
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.client
            .link
            .consecutive_timeouts
            .load(Ordering::Acquire)
    }

    /// Stop the IO task and recover the transport.
    ///
    /// Waits up to `wait` for the loop to exit. If it does not, the task is
    /// aborted and the transport is dropped with it.
    pub async fn shutdown(self, wait: Duration) -> Option<Box<dyn Transport>> {
        self.cancel.cancel();
        let mut task = self.task;
        match tokio::time::timeout(wait, &mut task).await {
            Ok(Ok(transport)) => Some(transport),
            Ok(Err(e)) => {
                error!(error = %e, "IO task ended abnormally");
                None
            }
            Err(_) => {
                warn!(?wait, "IO task did not stop in time, aborting");
                task.abort();
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the IO task. Must be called from within a tokio runtime.
pub fn spawn_io_task(
    transport: Box<dyn Transport>,
    config: IoConfig,
    state: Arc<Mutex<CallState>>,
    observers: Arc<ObserverRegistry>,
) -> ModemIo {
    let (tx, rx) = mpsc::channel::<Request>(32);
    let cancel = CancellationToken::new();
    let link = Arc::new(LinkStatus::new());

    let ctx = LoopContext {
        config,
        state,
        observers,
        link: Arc::clone(&link),
    };
    let task = tokio::spawn(io_loop(transport, ctx, rx, cancel.clone()));

    ModemIo {
        client: IoClient {
            tx,
            link,
            turn: Arc::new(tokio::sync::Mutex::new(())),
        },
        cancel,
        task,
    }
}

// ---------------------------------------------------------------------------
// IO Loop
// ---------------------------------------------------------------------------

/// Everything the loop needs besides the transport and its channels.
struct LoopContext {
    config: IoConfig,
    state: Arc<Mutex<CallState>>,
    observers: Arc<ObserverRegistry>,
    link: Arc<LinkStatus>,
}

/// The main IO loop. Runs as a spawned tokio task and hands the transport
/// back when it exits.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. A new request, only while nothing is pending
/// 3. The pending command's deadline
/// 4. Reading from the transport
async fn io_loop(
    mut transport: Box<dyn Transport>,
    ctx: LoopContext,
    mut rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) -> Box<dyn Transport> {
    let mut framer = LineFramer::new();
    let mut pending: Option<PendingCommand> = None;
    let mut resync = false;

    loop {
        let deadline = pending.as_ref().map(|p| p.deadline);

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("IO task cancelled");
                break;
            }

            req = rx.recv(), if pending.is_none() => {
                match req {
                    Some(Request::Command { cmd, reply }) if reply.is_closed() => {
                        debug!(cmd = %cmd.line, "caller gave up, command dropped");
                    }
                    Some(Request::Command { cmd, reply }) => {
                        match transmit(&mut *transport, cmd, reply, resync).await {
                            Ok(p) => {
                                if p.is_some() {
                                    resync = false;
                                }
                                pending = p;
                            }
                            Err(e) => {
                                error!(error = %e, "write failed, stopping IO task");
                                break;
                            }
                        }
                    }
                    None => {
                        debug!("request channel closed, exiting IO task");
                        break;
                    }
                }
            }

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(p) = pending.take() {
                    expire(p, &ctx);
                    resync = true;
                }
            }

            read = async {
                let mut buf = [0u8; 256];
                match transport.receive(&mut buf, ctx.config.idle_poll).await {
                    Ok(n) => Ok(buf[..n].to_vec()),
                    Err(Error::Timeout) => {
                        // Nothing arrived. Yield briefly so the loop can
                        // check for requests, deadlines or cancellation.
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(Vec::new())
                    }
                    Err(e) => Err(e),
                }
            } => {
                match read {
                    Ok(bytes) if bytes.is_empty() => {}
                    Ok(bytes) => {
                        if !framer.push(&bytes) {
                            warn!(max = protocol::MAX_BUF, "line buffer overflow, resetting");
                        }
                        while let Some(line) = framer.next_line() {
                            handle_line(line, &mut pending, &ctx);
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "read failed, stopping IO task");
                        if let Some(p) = pending.take() {
                            let _ = p.reply.send(Err(e));
                        }
                        break;
                    }
                }
            }
        }
    }

    ctx.link.alive.store(false, Ordering::Release);
    if let Some(p) = pending.take() {
        let _ = p.reply.send(Err(Error::NotConnected));
    }
    transport
}

/// Write a command to the transport.
///
/// `resync` marks the command as following a timeout, so its reply only
/// starts after its echo.
///
/// Returns the new pending command, `Ok(None)` if the write failed in a way
/// that only affects this command, or `Err` if the link is gone (the caller
/// has already been told).
async fn transmit(
    transport: &mut dyn Transport,
    cmd: AtCommand,
    reply: oneshot::Sender<Result<String>>,
    resync: bool,
) -> Result<Option<PendingCommand>> {
    debug!(cmd = %cmd.line, "sending command");
    match transport.send(&protocol::encode_command(&cmd.line)).await {
        Ok(()) => {
            let sent_at = Instant::now();
            Ok(Some(PendingCommand {
                deadline: sent_at + cmd.timeout,
                sent_at,
                cmd,
                lines: Vec::new(),
                awaiting_echo: resync,
                reply,
            }))
        }
        Err(e) if e.is_link_failure() => {
            let summary = e.to_string();
            let _ = reply.send(Err(e));
            Err(Error::Transport(summary))
        }
        Err(e) => {
            warn!(cmd = %cmd.line, error = %e, "command not sent");
            let _ = reply.send(Err(e));
            Ok(None)
        }
    }
}

/// Resolve a pending command whose deadline has passed.
fn expire(p: PendingCommand, ctx: &LoopContext) {
    let count = ctx
        .link
        .consecutive_timeouts
        .fetch_add(1, Ordering::AcqRel)
        + 1;
    debug!(cmd = %p.cmd.line, timeout = ?p.cmd.timeout, count, "command timed out");
    if count == ctx.config.unresponsive_after {
        warn!(count, "modem is not answering commands");
    }
    let _ = p.reply.send(Err(Error::Timeout));
}

/// Process one framed line: correlate it with the pending command, then
/// scan it for notifications.
fn handle_line(line: String, pending: &mut Option<PendingCommand>, ctx: &LoopContext) {
    debug!(line = %line, "rx");

    // The command echo (ATE1 is the power-on default) is not part of the reply.
    if let Some(p) = pending.as_mut() {
        if line == p.cmd.line {
            p.awaiting_echo = false;
        } else if p.awaiting_echo {
            debug!(cmd = %p.cmd.line, line = %line, "discarding line left over from a timed-out command");
        } else {
            p.lines.push(line.clone());
            if let Some(result) = protocol::final_result(&line) {
                if let Some(p) = pending.take() {
                    resolve(p, result, ctx);
                }
            }
        }
    }

    for notification in urc::parse_line(&line) {
        let event = state::lock(&ctx.state).apply_urc(&notification);
        debug!(event = event.kind(), "notification");
        ctx.observers.dispatch(&event);
    }
}

/// Complete a pending command on its final result code.
fn resolve(p: PendingCommand, result: FinalResult, ctx: &LoopContext) {
    ctx.link.consecutive_timeouts.store(0, Ordering::Release);
    let response = p.lines.join("\r\n");
    let elapsed = p.sent_at.elapsed();

    let outcome = match result {
        FinalResult::Ok => match &p.cmd.expected {
            Some(expected) if !response.contains(expected.as_str()) => Err(Error::Protocol(
                format!("{}: expected {expected:?} in reply {response:?}", p.cmd.line),
            )),
            _ => {
                if let Some(outcome) = p.cmd.outcome {
                    state::lock(&ctx.state).set_from_command(outcome);
                }
                Ok(response)
            }
        },
        FinalResult::Error => Err(Error::Protocol(format!(
            "{} rejected: {}",
            p.cmd.line,
            p.lines.last().map(String::as_str).unwrap_or("ERROR")
        ))),
    };

    debug!(cmd = %p.cmd.line, ?elapsed, ok = outcome.is_ok(), "command resolved");
    let _ = p.reply.send(outcome);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observers::{ObserverError, StatusObserver};
    use voicemodem_core::events::ModemEvent;
    use voicemodem_core::types::CallStatus;
    use voicemodem_test_harness::{MockHandle, MockTransport};

    const T: Duration = Duration::from_millis(500);

    struct Harness {
        io: ModemIo,
        handle: MockHandle,
        state: Arc<Mutex<CallState>>,
        events: Arc<Mutex<Vec<ModemEvent>>>,
        observers: Arc<ObserverRegistry>,
    }

    fn start(mock: MockTransport) -> Harness {
        let handle = mock.handle();
        let state = Arc::new(Mutex::new(CallState::new()));
        let observers = Arc::new(ObserverRegistry::new());
        let events = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&events);
        let recorder: Arc<dyn StatusObserver> =
            Arc::new(move |event: &ModemEvent| -> std::result::Result<(), ObserverError> {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            });
        observers.register(recorder);

        let io = spawn_io_task(
            Box::new(mock),
            IoConfig::default(),
            Arc::clone(&state),
            Arc::clone(&observers),
        );
        Harness {
            io,
            handle,
            state,
            events,
            observers,
        }
    }

    async fn wait_for_events(events: &Arc<Mutex<Vec<ModemEvent>>>, n: usize) -> Vec<ModemEvent> {
        for _ in 0..100 {
            if events.lock().unwrap().len() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        events.lock().unwrap().clone()
    }

    #[test]
    fn at_command_builder() {
        let cmd = AtCommand::new("ATA", T)
            .expecting("OK")
            .on_success(CommandOutcome::Answered);
        assert_eq!(cmd.line, "ATA");
        assert_eq!(cmd.expected.as_deref(), Some("OK"));
        assert_eq!(cmd.outcome, Some(CommandOutcome::Answered));
        assert_eq!(cmd.timeout, T);
    }

    #[test]
    fn io_config_defaults() {
        let config = IoConfig::default();
        assert_eq!(config.idle_poll, Duration::from_millis(100));
        assert_eq!(config.unresponsive_after, 3);
    }

    #[tokio::test]
    async fn client_reports_not_connected_when_task_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let client = IoClient {
            tx,
            link: Arc::new(LinkStatus::new()),
            turn: Arc::new(tokio::sync::Mutex::new(())),
        };
        let result = client.command(AtCommand::new("AT", T)).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn basic_command_skips_echo() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r\n", b"AT\r\r\nOK\r\n");
        let h = start(mock);

        let reply = h.io.command(AtCommand::new("AT", T).expecting("OK")).await;
        assert_eq!(reply.unwrap(), "OK");
        assert_eq!(h.handle.sent_text(), vec!["AT\r\n"]);

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn multi_line_reply_is_accumulated() {
        let mut mock = MockTransport::new();
        mock.expect(
            b"AT+CLCC\r\n",
            b"AT+CLCC\r\r\n+CLCC: 1,0,0,0,0,\"+15551234567\",145\r\n\r\nOK\r\n",
        );
        let h = start(mock);

        let reply = h.io.command(AtCommand::new("AT+CLCC", T)).await.unwrap();
        assert_eq!(reply, "+CLCC: 1,0,0,0,0,\"+15551234567\",145\r\nOK");

        // The report is also a notification.
        let events = wait_for_events(&h.events, 1).await;
        assert!(matches!(&events[0], ModemEvent::CallStatus(call) if call.status == CallStatus::Active));
        assert_eq!(
            state::lock(&h.state).remote_number(),
            Some("+15551234567")
        );

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn error_reply_is_protocol_error() {
        let mut mock = MockTransport::new();
        mock.expect(b"ATA\r\n", b"ERROR\r\n");
        mock.expect(b"AT+VTS=5\r\n", b"+CME ERROR: 3\r\n");
        let h = start(mock);

        let result = h.io.command(AtCommand::new("ATA", T)).await;
        assert!(matches!(result, Err(Error::Protocol(_))));

        match h.io.command(AtCommand::new("AT+VTS=5", T)).await {
            Err(Error::Protocol(msg)) => assert!(msg.contains("+CME ERROR: 3"), "{msg}"),
            other => panic!("expected protocol error, got {other:?}"),
        }

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn expected_substring_mismatch() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CSQ\r\n", b"+CSQ: 20,0\r\nOK\r\n");
        let h = start(mock);

        let result = h
            .io
            .command(AtCommand::new("AT+CSQ", T).expecting("+CREG"))
            .await;
        assert!(matches!(result, Err(Error::Protocol(_))));

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn timeout_leaves_connection_usable() {
        let mut mock = MockTransport::new();
        mock.expect(b"ATA\r\n", b"");
        mock.expect(b"AT\r\n", b"AT\r\r\nOK\r\n");
        let h = start(mock);

        let result = h
            .io
            .command(AtCommand::new("ATA", Duration::from_millis(50)))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(h.io.consecutive_timeouts(), 1);
        assert!(h.io.is_alive());

        let reply = h.io.command(AtCommand::new("AT", T)).await;
        assert_eq!(reply.unwrap(), "OK");
        assert_eq!(h.io.consecutive_timeouts(), 0);

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn consecutive_timeouts_accumulate() {
        let mut mock = MockTransport::new();
        for _ in 0..3 {
            mock.expect(b"AT\r\n", b"");
        }
        let h = start(mock);

        for _ in 0..3 {
            let result = h
                .io
                .command(AtCommand::new("AT", Duration::from_millis(20)))
                .await;
            assert!(matches!(result, Err(Error::Timeout)));
        }
        assert_eq!(h.io.consecutive_timeouts(), 3);
        assert!(h.io.is_alive());

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn back_to_back_commands_do_not_interleave() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CLCC\r\n", b"");
        mock.expect(b"ATH\r\n", b"OK\r\n");
        let h = start(mock);

        let first = h.io.client();
        let second = h.io.client();
        let a = tokio::spawn(async move {
            first
                .command(AtCommand::new("AT+CLCC", Duration::from_secs(2)))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let b = tokio::spawn(async move {
            second
                .command(AtCommand::new("ATH", Duration::from_secs(2)))
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.handle.sent_text(), vec!["AT+CLCC\r\n"]);

        h.handle.inject(b"\r\nOK\r\n");
        assert_eq!(a.await.unwrap().unwrap(), "OK");
        assert_eq!(b.await.unwrap().unwrap(), "OK");
        assert_eq!(h.handle.sent_text(), vec!["AT+CLCC\r\n", "ATH\r\n"]);

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn queued_command_timeout_starts_when_its_turn_comes() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CLCC\r\n", b"");
        mock.expect(b"ATH\r\n", b"ATH\r\r\nOK\r\n");
        let h = start(mock);
        state::lock(&h.state).set_from_command(CommandOutcome::Answered);

        let first = h.io.client();
        let second = h.io.client();
        let a = tokio::spawn(async move {
            first
                .command(AtCommand::new("AT+CLCC", Duration::from_secs(1)))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let b = tokio::spawn(async move {
            second
                .command(
                    AtCommand::new("ATH", Duration::from_millis(100))
                        .on_success(CommandOutcome::HungUp),
                )
                .await
        });

        // Well past the hangup's own timeout, but it has not been sent yet.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(!b.is_finished());
        assert_eq!(h.handle.sent_text(), vec!["AT+CLCC\r\n"]);

        assert!(matches!(a.await.unwrap(), Err(Error::Timeout)));
        assert_eq!(b.await.unwrap().unwrap(), "OK");
        assert_eq!(h.handle.sent_text(), vec!["AT+CLCC\r\n", "ATH\r\n"]);
        assert_eq!(state::lock(&h.state).current_status(), None);

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn abandoned_command_is_never_sent() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CLCC\r\n", b"");
        let h = start(mock);
        state::lock(&h.state).set_from_command(CommandOutcome::Answered);

        let first = h.io.client();
        let a = tokio::spawn(async move {
            first
                .command(AtCommand::new("AT+CLCC", Duration::from_millis(300)))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let hangup = AtCommand::new("ATH", T).on_success(CommandOutcome::HungUp);
        let gave_up = tokio::time::timeout(Duration::from_millis(100), h.io.command(hangup)).await;
        assert!(gave_up.is_err());

        assert!(matches!(a.await.unwrap(), Err(Error::Timeout)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.handle.sent_text(), vec!["AT+CLCC\r\n"]);
        assert_eq!(
            state::lock(&h.state).current_status(),
            Some(CallStatus::Active)
        );

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn late_result_does_not_resolve_next_command() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CLCC\r\n", b"");
        mock.expect(b"ATH\r\n", b"");
        mock.expect(b"AT\r\n", b"AT\r\r\nOK\r\n");
        let h = start(mock);
        state::lock(&h.state).set_from_command(CommandOutcome::Answered);

        let result = h
            .io
            .command(AtCommand::new("AT+CLCC", Duration::from_millis(50)))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));

        let client = h.io.client();
        let hangup = tokio::spawn(async move {
            client
                .command(
                    AtCommand::new("ATH", Duration::from_millis(300))
                        .on_success(CommandOutcome::HungUp),
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The timed-out AT+CLCC finally answers.
        h.handle.inject(b"\r\nOK\r\n");

        assert!(matches!(hangup.await.unwrap(), Err(Error::Timeout)));
        assert_eq!(
            state::lock(&h.state).current_status(),
            Some(CallStatus::Active)
        );

        // Once the modem echoes again, replies line up.
        assert_eq!(h.io.command(AtCommand::new("AT", T)).await.unwrap(), "OK");
        assert_eq!(h.io.consecutive_timeouts(), 0);

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn ring_then_clip_while_idle() {
        let h = start(MockTransport::new());

        h.handle
            .inject(b"\r\nRING\r\n\r\n+CLIP: \"+15551234567\",145,\"\",0,\"\",0\r\n");

        let events = wait_for_events(&h.events, 2).await;
        assert_eq!(
            events,
            vec![
                ModemEvent::IncomingCall { number: None },
                ModemEvent::IncomingCall {
                    number: Some("+15551234567".into())
                },
            ]
        );
        let state = state::lock(&h.state).clone();
        assert_eq!(state.current_status(), Some(CallStatus::Incoming));
        assert_eq!(state.remote_number(), Some("+15551234567"));

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn notification_during_command_is_dispatched() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CLCC\r\n", b"\r\nRING\r\n\r\nOK\r\n");
        let h = start(mock);

        let reply = h.io.command(AtCommand::new("AT+CLCC", T)).await;
        assert!(reply.is_ok());

        let events = wait_for_events(&h.events, 1).await;
        assert_eq!(events, vec![ModemEvent::IncomingCall { number: None }]);

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn success_applies_command_outcome() {
        let mut mock = MockTransport::new();
        mock.expect(b"ATA\r\n", b"OK\r\n");
        mock.expect(b"ATH\r\n", b"ERROR\r\n");
        let h = start(mock);

        h.io
            .command(AtCommand::new("ATA", T).on_success(CommandOutcome::Answered))
            .await
            .unwrap();
        assert_eq!(
            state::lock(&h.state).current_status(),
            Some(CallStatus::Active)
        );

        // A rejected hangup leaves the call alone.
        let result = h
            .io
            .command(AtCommand::new("ATH", T).on_success(CommandOutcome::HungUp))
            .await;
        assert!(result.is_err());
        assert_eq!(
            state::lock(&h.state).current_status(),
            Some(CallStatus::Active)
        );

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn panicking_observer_does_not_stop_io_task() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r\n", b"OK\r\n");
        let h = start(mock);

        let bad: Arc<dyn StatusObserver> =
            Arc::new(|_: &ModemEvent| -> std::result::Result<(), ObserverError> {
                panic!("observer bug")
            });
        h.observers.register(bad);

        h.handle.inject(b"\r\nNO CARRIER\r\n");
        let events = wait_for_events(&h.events, 1).await;
        assert_eq!(events, vec![ModemEvent::CallEnded {}]);

        assert!(h.io.is_alive());
        assert_eq!(h.io.command(AtCommand::new("AT", T)).await.unwrap(), "OK");

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn unplug_fails_pending_command_and_stops_task() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CLCC\r\n", b"");
        let h = start(mock);

        let client = h.io.client();
        let pending = tokio::spawn(async move {
            client
                .command(AtCommand::new("AT+CLCC", Duration::from_secs(2)))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.handle.unplug();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::ConnectionLost)));

        for _ in 0..50 {
            if !h.io.is_alive() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!h.io.is_alive());

        let result = h.io.command(AtCommand::new("AT", T)).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn send_mismatch_fails_only_that_command() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r\n", b"OK\r\n");
        let h = start(mock);

        // The mock rejects the unexpected write; the task keeps running.
        let result = h.io.command(AtCommand::new("ATZ", T)).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert!(h.io.is_alive());

        h.io.shutdown(T).await;
    }

    #[tokio::test]
    async fn shutdown_recovers_transport() {
        let h = start(MockTransport::new());

        let transport = h.io.shutdown(T).await;
        let transport = transport.expect("transport handed back");
        assert!(transport.is_connected());
        assert!(!h.handle.is_closed());
    }

    #[tokio::test]
    async fn line_buffer_overflow_resyncs() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r\n", b"OK\r\n");
        let h = start(mock);

        // Noise with no terminator, then the tail of the noise as one
        // garbage line.
        h.handle.inject(&vec![b'A'; protocol::MAX_BUF + 300]);
        h.handle.inject(b"\r\n");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.io.command(AtCommand::new("AT", T)).await.unwrap(), "OK");
        h.io.shutdown(T).await;
    }
}
