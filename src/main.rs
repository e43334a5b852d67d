//! kodi-link - command-line monitor and caller for Kodi's JSON-RPC interface.
//!
//! Without a method it stays connected and logs connectivity changes and
//! notifications until terminated. With a method it performs one call and
//! prints the result.

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kodi_link::{ClientConfig, KodiClient, KodiPacket};

/// Bound on events queued between the listener thread and main.
const CHANNEL_BOUND: usize = 64;

/// How long one-shot mode waits for the first connection.
const CONNECT_WAIT: Duration = Duration::from_secs(10);

const USAGE: &str = "Usage: kodi-link [--host HOST] [--port PORT] [--config FILE] [METHOD [PARAMS_JSON]]";

/// Parsed command line.
#[derive(Debug, Default, PartialEq)]
struct Args {
    host: Option<String>,
    port: Option<String>,
    config: Option<PathBuf>,
    method: Option<String>,
    params: Option<String>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut parsed = Self::default();
        let mut positional = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" => parsed.host = Some(args.next().context("--host needs a value")?),
                "--port" => parsed.port = Some(args.next().context("--port needs a value")?),
                "--config" => {
                    parsed.config = Some(args.next().context("--config needs a value")?.into())
                }
                "-h" | "--help" => bail!("{}", USAGE),
                flag if flag.starts_with("--") => bail!("Unknown option {}\n{}", flag, USAGE),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        parsed.method = positional.next();
        parsed.params = positional.next();
        if let Some(extra) = positional.next() {
            bail!("Unexpected argument {:?}\n{}", extra, USAGE);
        }
        Ok(parsed)
    }
}

/// Events forwarded from client callbacks.
#[derive(Debug)]
enum Event {
    Connected(bool),
    Packet(KodiPacket),
}

/// Queue an event without blocking the listener thread.
fn forward(tx: &SyncSender<Event>, event: Event) {
    match tx.try_send(event) {
        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
        Err(TrySendError::Full(event)) => warn!("Event queue full, dropping {:?}", event),
    }
}

/// One log line for a notification: receive time, method and params.
fn describe(packet: &KodiPacket) -> String {
    let params = packet
        .params()
        .map(|params| params.to_string())
        .unwrap_or_default();
    format!(
        "{} {} {}",
        packet.time_received().format("%H:%M:%S%.3f"),
        packet.method(),
        params
    )
    .trim_end()
    .to_string()
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "kodi_link=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse(std::env::args().skip(1))?;

    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::load()?,
    };
    config.apply_overrides(args.host.clone(), args.port.clone());

    if config.hostname.is_empty() {
        bail!("No Kodi host configured (use --host or KODI_HOST)\n{}", USAGE);
    }

    let params = args
        .params
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("PARAMS_JSON is not valid JSON")?;

    info!("Starting kodi-link v{}", env!("CARGO_PKG_VERSION"));

    let (tx, rx) = mpsc::sync_channel(CHANNEL_BOUND);
    let client = KodiClient::new(config);
    {
        let tx = tx.clone();
        client.set_connected_callback(move |up| forward(&tx, Event::Connected(up)));
    }
    client.set_packet_received_callback(move |packet| forward(&tx, Event::Packet(packet)));
    client.start().context("Failed to start Kodi client")?;

    match args.method {
        Some(method) => {
            let deadline = Instant::now() + CONNECT_WAIT;
            while !client.is_connected() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    bail!(
                        "Could not connect to Kodi at {}:{}",
                        client.hostname(),
                        client.port()
                    );
                }
                match rx.recv_timeout(remaining.min(Duration::from_millis(100))) {
                    Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            let result = client
                .call_method(&method, params)
                .with_context(|| format!("{} failed", method))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            client.stop();
        }
        None => {
            info!(
                "Monitoring Kodi at {}:{} (Ctrl-C to exit)",
                client.hostname(),
                client.port()
            );
            for event in rx {
                match event {
                    Event::Connected(true) => info!("Kodi connected"),
                    Event::Connected(false) => info!("Kodi disconnected"),
                    Event::Packet(packet) => {
                        let line = describe(&packet);
                        info!("{}", line)
                    }
                }
            }
        }
    }

    Ok(())
}
