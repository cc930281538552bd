//! # Peer Node
//!
//! Demo node: listens and/or connects, then ticks the transport at 60Hz.
//! Identity verification and the anti-cheat engine are the in-crate mocks,
//! so every peer with a non-empty identity is admitted.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=debug peer_node --listen 1234 --user alice
//! peer_node --connect 127.0.0.1:1234 --user bob --duration 10
//! ```

use std::process::ExitCode;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;
use warden_networking::connection::ConnectionRole;
use warden_networking::registration::PendingRegistration;
use warden_networking::{
    ClientPlatform, MockAntiCheatEngine, MockIdentityVerifier, PeerHandle, PeerTransport,
    RegistrationInfo, TransportConfig, TransportEvents, VerifierPolicy,
};

/// Tick interval (60 Hz).
const TICK_INTERVAL: Duration = Duration::from_micros(16_667);

/// Logs every transport event.
struct LoggingEvents;

impl TransportEvents for LoggingEvents {
    fn on_opaque_message(&mut self, handle: PeerHandle, payload: &[u8]) {
        tracing::debug!(peer = %handle, len = payload.len(), "opaque message");
    }

    fn on_peer_pending_registration(&mut self, handle: PeerHandle, pending: &PendingRegistration) {
        tracing::info!(peer = %handle, user = %pending.product_user_id, platform = ?pending.platform, "peer registering");
    }

    fn on_peer_disconnected(&mut self, handle: PeerHandle) {
        tracing::info!(peer = %handle, "peer gone");
    }

    fn on_kicked(&mut self, reason: &str) {
        tracing::error!(%reason, "kicked from the session");
    }

    fn on_peer_connected(&mut self, handle: PeerHandle, role: ConnectionRole) {
        tracing::info!(peer = %handle, ?role, "peer connected");
    }

    fn on_peer_admitted(&mut self, handle: PeerHandle, product_user_id: &str) {
        tracing::info!(peer = %handle, user = product_user_id, "peer admitted");
    }
}

struct Args {
    listen: Option<u16>,
    connect: Vec<(String, u16)>,
    user: String,
    token: String,
    config: Option<String>,
    duration_secs: Option<u64>,
}

fn parse_args() -> Result<Option<Args>, String> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let mut args = Args {
        listen: None,
        connect: Vec::new(),
        user: "local-user".to_owned(),
        token: "local-token".to_owned(),
        config: None,
        duration_secs: None,
    };

    let mut i = 0;
    while i < argv.len() {
        let value = argv.get(i + 1);
        match (argv[i].as_str(), value) {
            ("--listen" | "-l", Some(port)) => {
                args.listen = Some(port.parse().map_err(|_| format!("bad port: {port}"))?);
                i += 1;
            }
            ("--connect" | "-c", Some(target)) => {
                let (host, port) = target
                    .rsplit_once(':')
                    .ok_or_else(|| format!("expected host:port, got {target}"))?;
                let port = port.parse().map_err(|_| format!("bad port: {port}"))?;
                args.connect.push((host.to_owned(), port));
                i += 1;
            }
            ("--user" | "-u", Some(user)) => {
                args.user.clone_from(user);
                i += 1;
            }
            ("--token" | "-t", Some(token)) => {
                args.token.clone_from(token);
                i += 1;
            }
            ("--config", Some(path)) => {
                args.config = Some(path.clone());
                i += 1;
            }
            ("--duration" | "-d", Some(secs)) => {
                args.duration_secs = Some(secs.parse().map_err(|_| format!("bad duration: {secs}"))?);
                i += 1;
            }
            ("--help" | "-h", _) => {
                println!("Usage: peer_node [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -l, --listen <PORT>         Accept peers on PORT");
                println!("  -c, --connect <HOST:PORT>   Connect to a peer (repeatable)");
                println!("  -u, --user <ID>             Local product user id");
                println!("  -t, --token <JWT>           Local identity token");
                println!("      --config <FILE>         TOML transport configuration");
                println!("  -d, --duration <SECS>       Run for N seconds then exit");
                println!("  -h, --help                  Show this help");
                return Ok(None);
            }
            (flag, _) => return Err(format!("unknown or incomplete option: {flag}")),
        }
        i += 1;
    }

    Ok(Some(args))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "peer node failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => TransportConfig::load(path)?,
        None => TransportConfig::default(),
    };

    let mut transport = PeerTransport::new(
        config,
        RegistrationInfo::new(ClientPlatform::current(), args.user.as_str(), args.token.as_str()),
        Box::new(MockIdentityVerifier::new(VerifierPolicy::AcceptAll)),
        Box::new(MockAntiCheatEngine::new()),
        Box::new(LoggingEvents),
    )?;

    if let Some(port) = args.listen {
        transport.start_listening(port)?;
    }
    for (host, port) in &args.connect {
        transport.connect_to_peer(host, *port)?;
    }

    let start = Instant::now();
    let deadline = args.duration_secs.map(Duration::from_secs);
    while deadline.map_or(true, |limit| start.elapsed() < limit) {
        let tick_start = Instant::now();
        transport.tick();
        if let Some(rest) = TICK_INTERVAL.checked_sub(tick_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    let stats = transport.stats();
    tracing::info!(
        frames_sent = stats.frames_sent,
        frames_received = stats.frames_received,
        protocol_errors = stats.protocol_errors,
        "shutting down"
    );
    transport.disconnect_all();
    Ok(())
}
