//! [`Modem`]: connection management and the call-control API.
//!
//! A `Modem` owns at most one connection at a time. Each connection is a
//! transport handed to its own IO task; the `Modem` keeps the task handle,
//! the call state the task writes, and the observer registry the task
//! dispatches to. The call state and the registry outlive individual
//! connections, so observers registered once keep receiving events across
//! reconnects.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use voicemodem_core::error::{Error, Result};
use voicemodem_core::transport::Transport;
use voicemodem_core::types::{Call, CallStatus, ConnectionState};
use voicemodem_transport::SerialTransport;

use crate::commands;
use crate::io::{self, AtCommand, IoClient, IoConfig, ModemIo};
use crate::observers::{ObserverRegistry, StatusObserver};
use crate::state::{self, CallState, CommandOutcome};

/// Timing and health settings for a [`Modem`].
///
/// Usually set through [`ModemBuilder`](crate::builder::ModemBuilder).
#[derive(Debug, Clone)]
pub struct ModemConfig {
    /// Default time allowed for a command's final result code.
    pub command_timeout: Duration,
    /// Time allowed for the `AT` handshake on connect.
    pub handshake_timeout: Duration,
    /// Pause between opening the port and the handshake, letting the modem
    /// finish whatever it was printing.
    pub settle_delay: Duration,
    /// How long disconnect waits for the IO task to hand the transport back.
    pub shutdown_timeout: Duration,
    pub io: IoConfig,
}

impl Default for ModemConfig {
    fn default() -> Self {
        ModemConfig {
            command_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(1),
            settle_delay: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(2),
            io: IoConfig::default(),
        }
    }
}

/// A live connection.
struct Connection {
    io: ModemIo,
    port: String,
    baud_rate: u32,
}

/// A cellular voice modem driven over AT commands.
pub struct Modem {
    config: ModemConfig,
    observers: Arc<ObserverRegistry>,
    state: Arc<Mutex<CallState>>,
    conn: tokio::sync::Mutex<Option<Connection>>,
}

impl Modem {
    pub fn new(config: ModemConfig) -> Self {
        Modem {
            config,
            observers: Arc::new(ObserverRegistry::new()),
            state: Arc::new(Mutex::new(CallState::new())),
            conn: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Connection management
    // -----------------------------------------------------------------------

    /// Open `port` at `baud_rate` and bring the modem up.
    ///
    /// Any existing connection is closed first, so the port is free if it is
    /// the same one.
    pub async fn connect(&self, port: &str, baud_rate: u32) -> Result<()> {
        self.disconnect().await;
        let transport = SerialTransport::open(port, baud_rate).await?;
        self.connect_with_transport(Box::new(transport), port, baud_rate)
            .await
    }

    /// Bring the modem up over an already-open transport.
    ///
    /// `port` is only a label for status reports. The IO task is started
    /// before the handshake, since it is the only reader of the transport.
    /// If `AT` does not get `OK`, the task is stopped, the transport closed,
    /// and the error returned.
    pub async fn connect_with_transport(
        &self,
        transport: Box<dyn Transport>,
        port: &str,
        baud_rate: u32,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        if let Some(old) = conn.take() {
            info!(port = %old.port, "closing previous connection");
            self.teardown(old).await;
        }

        tokio::time::sleep(self.config.settle_delay).await;
        state::lock(&self.state).clear();

        let io = io::spawn_io_task(
            transport,
            self.config.io.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.observers),
        );

        let handshake =
            AtCommand::new(commands::HANDSHAKE, self.config.handshake_timeout).expecting("OK");
        if let Err(e) = io.command(handshake).await {
            error!(port, error = %e, "modem did not answer handshake");
            close_transport(io, self.config.shutdown_timeout).await;
            return Err(e);
        }

        let caller_id = AtCommand::new(commands::ENABLE_CALLER_ID, self.config.command_timeout);
        if let Err(e) = io.command(caller_id).await {
            warn!(port, error = %e, "could not enable caller ID");
        }

        info!(port, baud_rate, "modem connected");
        *conn = Some(Connection {
            io,
            port: port.to_string(),
            baud_rate,
        });
        Ok(())
    }

    /// Close the connection, if any. Calling it again is a no-op.
    pub async fn disconnect(&self) {
        let old = self.conn.lock().await.take();
        match old {
            Some(conn) => self.teardown(conn).await,
            None => debug!("disconnect: not connected"),
        }
    }

    async fn teardown(&self, conn: Connection) {
        let Connection { io, port, .. } = conn;
        close_transport(io, self.config.shutdown_timeout).await;
        state::lock(&self.state).clear();
        info!(port = %port, "modem disconnected");
    }

    /// Tear down a connection whose IO task has died (transport failure).
    async fn reap_dead(&self, conn: &mut Option<Connection>) {
        if conn.as_ref().is_some_and(|c| !c.io.is_alive()) {
            if let Some(dead) = conn.take() {
                warn!(port = %dead.port, "connection lost");
                self.teardown(dead).await;
            }
        }
    }

    /// `true` while a connection exists and its IO task is running.
    pub async fn is_connected(&self) -> bool {
        let mut conn = self.conn.lock().await;
        self.reap_dead(&mut conn).await;
        conn.is_some()
    }

    /// Snapshot of the connection and call state.
    ///
    /// A lost connection is torn down first, so the snapshot never pairs
    /// `connected: false` with a stale port.
    pub async fn connection_state(&self) -> ConnectionState {
        let mut conn = self.conn.lock().await;
        self.reap_dead(&mut conn).await;
        let call = state::lock(&self.state).clone();
        let mut snapshot = ConnectionState {
            call_status: call.current_status(),
            remote_number: call.remote_number().map(str::to_string),
            ..ConnectionState::default()
        };
        if let Some(c) = conn.as_ref() {
            snapshot.connected = c.io.is_alive();
            snapshot.port = Some(c.port.clone());
            snapshot.baud_rate = Some(c.baud_rate);
            snapshot.consecutive_timeouts = c.io.consecutive_timeouts();
        }
        snapshot
    }

    /// Client for the live connection.
    ///
    /// A connection whose IO task has died (transport failure) is torn down
    /// here and reported as [`Error::NotConnected`].
    async fn client(&self) -> Result<IoClient> {
        let mut conn = self.conn.lock().await;
        self.reap_dead(&mut conn).await;
        conn.as_ref()
            .map(|c| c.io.client())
            .ok_or(Error::NotConnected)
    }

    async fn execute(&self, cmd: AtCommand) -> Result<String> {
        self.client().await?.command(cmd).await
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Send a raw AT command and return its reply.
    ///
    /// The reply is every line after the echo, final result included, joined
    /// with `\r\n`. With `expected` set, a reply that does not contain it is
    /// an [`Error::Protocol`]. `timeout` defaults to the configured command
    /// timeout.
    pub async fn send_command(
        &self,
        command: &str,
        expected: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let command = command.trim();
        if command.is_empty() || command.contains(['\r', '\n']) {
            return Err(Error::InvalidParameter(
                "command must be a single non-empty line".into(),
            ));
        }

        let mut cmd = AtCommand::new(command, timeout.unwrap_or(self.config.command_timeout));
        if let Some(expected) = expected {
            cmd = cmd.expecting(expected);
        }
        self.execute(cmd).await
    }

    /// Place a voice call. The number may contain formatting characters;
    /// only digits and a leading `+` are dialed.
    pub async fn dial(&self, number: &str) -> Result<()> {
        let line = commands::cmd_dial(number)?;
        info!(cmd = %line, "dialing");
        self.execute(
            AtCommand::new(line, self.config.command_timeout).on_success(CommandOutcome::Dialed),
        )
        .await?;
        Ok(())
    }

    /// Answer the ringing call.
    pub async fn answer(&self) -> Result<()> {
        info!("answering call");
        self.execute(
            AtCommand::new(commands::ANSWER, self.config.command_timeout)
                .on_success(CommandOutcome::Answered),
        )
        .await?;
        Ok(())
    }

    /// Hang up the current call.
    pub async fn hangup(&self) -> Result<()> {
        info!("hanging up");
        self.execute(
            AtCommand::new(commands::HANGUP, self.config.command_timeout)
                .on_success(CommandOutcome::HungUp),
        )
        .await?;
        Ok(())
    }

    /// Play one DTMF tone on the active call.
    pub async fn send_dtmf(&self, digit: &str) -> Result<()> {
        let line = commands::cmd_dtmf(digit)?;
        debug!(cmd = %line, "sending DTMF");
        self.execute(AtCommand::new(line, self.config.command_timeout))
            .await?;
        Ok(())
    }

    /// Ask the modem for its current call list.
    ///
    /// Returns the first call listed, or `None` if there is none. The report
    /// also updates the call state and reaches observers as a
    /// `call_status` event.
    pub async fn query_call_status(&self) -> Result<Option<Call>> {
        let reply = self
            .execute(AtCommand::new(commands::LIST_CALLS, self.config.command_timeout))
            .await?;
        Ok(commands::parse_call_list(&reply))
    }

    // -----------------------------------------------------------------------
    // Call state
    // -----------------------------------------------------------------------

    pub fn current_status(&self) -> Option<CallStatus> {
        state::lock(&self.state).current_status()
    }

    pub fn current_call(&self) -> Option<Call> {
        state::lock(&self.state).current_call()
    }

    pub fn remote_number(&self) -> Option<String> {
        state::lock(&self.state).remote_number().map(str::to_string)
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    /// Register an observer for modem events.
    ///
    /// Returns `false` if this exact observer is already registered.
    pub fn register_observer(&self, observer: Arc<dyn StatusObserver>) -> bool {
        self.observers.register(observer)
    }

    /// Returns `false` if the observer was not registered.
    pub fn unregister_observer(&self, observer: &Arc<dyn StatusObserver>) -> bool {
        self.observers.unregister(observer)
    }
}

impl Default for Modem {
    fn default() -> Self {
        Modem::new(ModemConfig::default())
    }
}

/// Stop an IO task and close the transport it hands back.
async fn close_transport(io: ModemIo, wait: Duration) {
    if let Some(mut transport) = io.shutdown(wait).await {
        if let Err(e) = transport.close().await {
            warn!(error = %e, "error closing transport");
        }
    }
}
