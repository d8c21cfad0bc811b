// voicemodem test application -- CLI tool for exercising the AT engine
// against a real SIM808-class modem or a scripted mock transport.
//
// Usage:
//   voicemodem-cli ports
//   voicemodem-cli --port /dev/ttyUSB0 dial "+1 (555) 123-4567"
//   voicemodem-cli --port /dev/ttyUSB0 answer
//   voicemodem-cli --port /dev/ttyUSB0 dtmf 123#
//   voicemodem-cli --port /dev/ttyUSB0 raw AT+CSQ --expect +CSQ:
//   voicemodem-cli --port /dev/ttyUSB0 monitor --duration 60 --poll 2
//   voicemodem-cli --mock monitor --duration 2
//
// Set RUST_LOG=voicemodem_at=debug to see the AT traffic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use voicemodem_at::protocol::encode_command;
use voicemodem_at::{Modem, ModemBuilder, ObserverError, StatusObserver, commands};
use voicemodem_core::ModemEvent;
use voicemodem_test_harness::{MockHandle, MockTransport};
use voicemodem_transport::available_ports;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// voicemodem test application -- drives a cellular voice modem from the
/// command line.
#[derive(Parser)]
#[command(name = "voicemodem-cli", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyUSB0, COM3).
    /// Required unless --mock is used.
    #[arg(long)]
    port: Option<String>,

    /// Serial baud rate.
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Default command timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Delay between opening the port and the handshake, in milliseconds.
    #[arg(long, default_value_t = 100)]
    settle_ms: u64,

    /// Use a scripted mock transport instead of a real serial port.
    /// Useful for verifying CLI parsing and engine wiring without hardware.
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports that may have a modem attached.
    Ports,

    /// Place a voice call.
    Dial {
        /// Number to dial; formatting characters are ignored.
        number: String,
    },

    /// Answer the ringing call.
    Answer,

    /// Hang up the current call.
    Hangup,

    /// Send DTMF tones, one command per digit.
    Dtmf {
        /// Digits from 0-9 * # A-D.
        digits: String,

        /// Pause between digits in milliseconds.
        #[arg(long, default_value_t = 200)]
        gap_ms: u64,
    },

    /// Query the current call list and print the connection state.
    Status,

    /// Send a raw AT command and print the reply.
    Raw {
        /// Command text, without the line terminator.
        command: String,

        /// Fail unless the reply contains this text.
        #[arg(long)]
        expect: Option<String>,
    },

    /// Print modem events as JSON lines until the duration elapses.
    Monitor {
        /// Duration in seconds (0 = until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,

        /// Query the call list every N seconds.
        #[arg(long)]
        poll: Option<u64>,
    },
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Script a mock modem that answers the connect sequence and the given
/// subcommand.
fn mock_transport(command: &Command) -> Result<MockTransport> {
    let mut mock = MockTransport::new();
    mock.expect(b"AT\r\n", b"AT\r\r\nOK\r\n");
    mock.expect(b"AT+CLIP=1\r\n", b"AT+CLIP=1\r\r\nOK\r\n");

    match command {
        Command::Ports => {}
        Command::Dial { number } => {
            mock.expect(&encode_command(&commands::cmd_dial(number)?), b"OK\r\n");
        }
        Command::Answer => mock.expect(&encode_command(commands::ANSWER), b"OK\r\n"),
        Command::Hangup => mock.expect(&encode_command(commands::HANGUP), b"OK\r\n"),
        Command::Dtmf { digits, .. } => {
            for c in digits.chars() {
                let line = commands::cmd_dtmf(&c.to_string())?;
                mock.expect(&encode_command(&line), b"OK\r\n");
            }
        }
        Command::Status => mock.expect(
            &encode_command(commands::LIST_CALLS),
            b"+CLCC: 1,0,0,0,0,\"+15551234567\",145\r\n\r\nOK\r\n",
        ),
        Command::Raw { command, .. } => {
            mock.expect(&encode_command(command.trim()), b"OK\r\n");
        }
        Command::Monitor { poll, .. } => {
            if poll.is_some() {
                bail!("--poll is not scripted for --mock");
            }
        }
    }
    Ok(mock)
}

/// Connect to the modem. Returns the mock handle when `--mock` is used.
async fn create_modem(cli: &Cli) -> Result<(Modem, Option<MockHandle>)> {
    let builder = ModemBuilder::new()
        .command_timeout(Duration::from_millis(cli.timeout_ms))
        .settle_delay(Duration::from_millis(cli.settle_ms));

    if cli.mock {
        let mock = mock_transport(&cli.command)?;
        let handle = mock.handle();
        let modem = builder
            .build_with_transport(Box::new(mock), "mock", cli.baud)
            .await
            .context("failed to connect to mock transport")?;
        println!("Connected (mock transport)");
        return Ok((modem, Some(handle)));
    }

    let port = cli
        .port
        .as_deref()
        .context("--port is required when not using --mock")?;
    let modem = builder
        .connect(port, cli.baud)
        .await
        .with_context(|| format!("failed to connect to {port} at {} baud", cli.baud))?;
    println!("Connected -- {port} @ {} baud", cli.baud);
    Ok((modem, None))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_ports() -> Result<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

async fn cmd_dial(modem: &Modem, number: &str) -> Result<()> {
    modem.dial(number).await?;
    println!("Dialing {}", commands::sanitize_number(number));
    Ok(())
}

async fn cmd_answer(modem: &Modem) -> Result<()> {
    modem.answer().await?;
    println!("Call answered");
    Ok(())
}

async fn cmd_hangup(modem: &Modem) -> Result<()> {
    modem.hangup().await?;
    println!("Call ended");
    Ok(())
}

async fn cmd_dtmf(modem: &Modem, digits: &str, gap: Duration) -> Result<()> {
    if digits.is_empty() {
        bail!("no DTMF digits given");
    }
    // Validate everything before sending anything.
    for c in digits.chars() {
        commands::normalize_dtmf(&c.to_string())?;
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 {
            tokio::time::sleep(gap).await;
        }
        modem.send_dtmf(&c.to_string()).await?;
        println!("DTMF {}", c.to_ascii_uppercase());
    }
    Ok(())
}

async fn cmd_status(modem: &Modem) -> Result<()> {
    match modem.query_call_status().await? {
        Some(call) => println!("Call: {}", serde_json::to_string(&call)?),
        None => println!("Call: none"),
    }
    let state = modem.connection_state().await;
    println!("State: {}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

async fn cmd_raw(modem: &Modem, command: &str, expect: Option<&str>) -> Result<()> {
    let reply = modem.send_command(command, expect, None).await?;
    for line in reply.lines() {
        println!("{line}");
    }
    Ok(())
}

/// Forwards events to the monitor loop; observers must not block.
struct ChannelObserver {
    tx: mpsc::UnboundedSender<ModemEvent>,
}

impl StatusObserver for ChannelObserver {
    fn on_event(&self, event: &ModemEvent) -> std::result::Result<(), ObserverError> {
        self.tx
            .send(event.clone())
            .map_err(|_| ObserverError::from("monitor stopped"))
    }
}

async fn cmd_monitor(
    modem: &Modem,
    mock: Option<&MockHandle>,
    duration_secs: u64,
    poll_secs: Option<u64>,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer: Arc<dyn StatusObserver> = Arc::new(ChannelObserver { tx });
    modem.register_observer(Arc::clone(&observer));

    println!("Monitoring modem events (Ctrl-C to stop)...");

    if let Some(handle) = mock {
        handle.inject(b"\r\nRING\r\n\r\n+CLIP: \"+15551234567\",145,\"\",0,\"\",0\r\n");
        handle.inject(b"\r\nNO CARRIER\r\n");
    }

    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));
    let mut poll = tokio::time::interval(Duration::from_secs(poll_secs.unwrap_or(3600).max(1)));
    poll.tick().await;

    loop {
        let remaining = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted.");
                break;
            }
            event = rx.recv() => match event {
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => break,
            },
            _ = poll.tick(), if poll_secs.is_some() => {
                if let Err(e) = modem.query_call_status().await {
                    println!("[warning] status query failed: {e}");
                }
                if !modem.is_connected().await {
                    println!("Connection lost.");
                    break;
                }
            }
            _ = tokio::time::sleep(remaining) => {}
        }
    }

    modem.unregister_observer(&observer);
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // `ports` does not need a modem connection.
    if matches!(cli.command, Command::Ports) {
        return cmd_ports();
    }

    let (modem, mock) = create_modem(&cli).await?;

    let result = match &cli.command {
        Command::Ports => unreachable!("ports handled above"),
        Command::Dial { number } => cmd_dial(&modem, number).await,
        Command::Answer => cmd_answer(&modem).await,
        Command::Hangup => cmd_hangup(&modem).await,
        Command::Dtmf { digits, gap_ms } => {
            cmd_dtmf(&modem, digits, Duration::from_millis(*gap_ms)).await
        }
        Command::Status => cmd_status(&modem).await,
        Command::Raw { command, expect } => cmd_raw(&modem, command, expect.as_deref()).await,
        Command::Monitor { duration, poll } => {
            cmd_monitor(&modem, mock.as_ref(), *duration, *poll).await
        }
    };

    modem.disconnect().await;
    result
}
