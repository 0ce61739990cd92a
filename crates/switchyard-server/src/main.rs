//! Switchyard server binary.
//!
//! Runs the demo handlers (`Ping`, `Transform`) over TCP, UDP, or both.
//! Type `stop` on stdin or press Ctrl-C to shut down.
//!
//! # Usage
//!
//! ```bash
//! # TCP on 20060 and UDP on 20070
//! switchyard-server
//!
//! # TCP only, short idle timeout
//! switchyard-server --transport stream --port 9000 --timeout-ms 2000
//! ```

use std::time::Duration;

use clap::{Parser, ValueEnum};
use switchyard_server::{
    Server, ServerConfig, TransportKind,
    config::{
        DEFAULT_ACCEPT_POOL_SIZE, DEFAULT_DATAGRAM_PORT, DEFAULT_HOST, DEFAULT_STREAM_PORT,
        DEFAULT_TICK_INTERVAL, DEFAULT_TIMEOUT_THRESHOLD,
    },
    demo,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Which server variants to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportArg {
    /// TCP only
    Stream,
    /// UDP only
    Datagram,
    /// TCP and UDP side by side
    Both,
}

/// Typed-message dispatch server
#[derive(Parser, Debug)]
#[command(name = "switchyard-server")]
#[command(about = "Typed-message dispatch server over TCP and UDP")]
#[command(version)]
struct Args {
    /// Host or IP to bind
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// TCP port
    #[arg(short, long, default_value_t = DEFAULT_STREAM_PORT)]
    port: u16,

    /// UDP port
    #[arg(long, default_value_t = DEFAULT_DATAGRAM_PORT)]
    udp_port: u16,

    /// Variants to run
    #[arg(long, value_enum, default_value_t = TransportArg::Both)]
    transport: TransportArg,

    /// Idle time before a connection is evicted, in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_THRESHOLD.as_millis() as u64)]
    timeout_ms: u64,

    /// Idle-timer tick interval, in milliseconds
    #[arg(long, default_value_t = DEFAULT_TICK_INTERVAL.as_millis() as u64)]
    tick_ms: u64,

    /// Concurrent accept operations (TCP)
    #[arg(long, default_value_t = DEFAULT_ACCEPT_POOL_SIZE)]
    accept_pool: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self, port: u16) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port,
            timeout_threshold: Duration::from_millis(self.timeout_ms),
            tick_interval: Duration::from_millis(self.tick_ms),
            accept_pool_size: self.accept_pool,
            ..Default::default()
        }
    }

    fn variants(&self) -> Vec<(TransportKind, u16)> {
        match self.transport {
            TransportArg::Stream => vec![(TransportKind::Stream, self.port)],
            TransportArg::Datagram => vec![(TransportKind::Datagram, self.udp_port)],
            TransportArg::Both => {
                vec![(TransportKind::Stream, self.port), (TransportKind::Datagram, self.udp_port)]
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Switchyard server starting");

    let mut servers = Vec::new();
    for (kind, port) in args.variants() {
        let mut server = Server::new(kind, args.config(port), demo::registry());
        server.on_connected(|conn| {
            tracing::info!(
                "Client connected: connection {} from {:?}",
                conn.id(),
                conn.peer_addr()
            );
        })?;
        server.start().await?;
        servers.push(server);
    }

    wait_for_stop().await;

    for server in &mut servers {
        if let Err(e) = server.stop().await {
            tracing::error!("Failed to stop {} server: {}", server.kind(), e);
        }
    }

    tracing::info!("Switchyard server stopped");
    Ok(())
}

/// Resolve on a `stop` line from stdin or Ctrl-C.
async fn wait_for_stop() {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ctrl_c_armed = true;
    let mut stdin_open = true;

    loop {
        tokio::select! {
            result = &mut ctrl_c, if ctrl_c_armed => match result {
                Ok(()) => {
                    tracing::info!("Received Ctrl-C");
                    return;
                },
                Err(e) => {
                    tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                    ctrl_c_armed = false;
                },
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().eq_ignore_ascii_case("stop") => {
                    tracing::info!("Received stop command");
                    return;
                },
                Ok(Some(_)) => {},
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                },
            },
            else => return,
        }
    }
}
