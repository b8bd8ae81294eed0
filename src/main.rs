use std::net::IpAddr;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;

use ember::config::{ReadErrorPolicy, WriteFailurePolicy};
use ember::net::constants;
use ember::{ServerConfig, Strategy, logging, replicator};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Process,
    Thread,
}

#[derive(Parser, Debug)]
#[command(name = "ember")]
#[command(about = "Edge-triggered epoll TCP server with SO_REUSEPORT replicas")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value_t = constants::DEFAULT_HOST)]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = constants::DEFAULT_PORT)]
    port: u16,

    /// Replicate event loops as processes or threads
    #[arg(long, value_enum, default_value_t = Mode::Process)]
    mode: Mode,

    /// Replica count in process mode
    #[arg(long, default_value_t = constants::PROCESS_WORKERS)]
    processes: usize,

    /// Replica count in thread mode
    #[arg(long, default_value_t = constants::THREAD_WORKERS)]
    threads: usize,

    /// Listen backlog
    #[arg(long, default_value_t = constants::MAX_BACKLOG)]
    backlog: i32,

    /// Set TCP_NODELAY on the listening socket
    #[arg(long)]
    listener_nodelay: bool,

    /// Set TCP_QUICKACK on the listening socket
    #[arg(long)]
    quickack: bool,

    /// Leave Nagle's algorithm on for accepted connections
    #[arg(long)]
    no_nodelay: bool,

    /// Events handled per poll
    #[arg(long, default_value_t = constants::MAX_EVENTS)]
    max_events: usize,

    /// Bytes read per readiness notification
    #[arg(long, default_value_t = constants::READ_BUF)]
    read_buffer: usize,

    /// Poll timeout in milliseconds; 0 busy-polls, omit to block
    #[arg(long)]
    poll_timeout_ms: Option<u64>,

    /// Close connections whose read fails instead of retrying on the next edge
    #[arg(long)]
    close_on_read_error: bool,

    /// Close only the offending connection on a short or failed write
    #[arg(long)]
    close_on_write_failure: bool,

    /// Pin each replica to a CPU core
    #[arg(long)]
    pin_cores: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn strategy(&self) -> Strategy {
        match self.mode {
            Mode::Process => Strategy::Processes,
            Mode::Thread => Strategy::Threads,
        }
    }

    fn to_config(&self) -> ServerConfig {
        let mut config = ServerConfig {
            host: self.host,
            port: self.port,
            backlog: self.backlog,
            process_workers: self.processes,
            thread_workers: self.threads,
            max_events: self.max_events,
            read_buffer_size: self.read_buffer,
            poll_timeout: self.poll_timeout_ms.map(Duration::from_millis),
            pin_cores: self.pin_cores,
            ..ServerConfig::default()
        };
        config.listener.nodelay = self.listener_nodelay;
        config.listener.quickack = self.quickack;
        config.connection.nodelay = !self.no_nodelay;
        if self.close_on_read_error {
            config.read_errors = ReadErrorPolicy::Close;
        }
        if self.close_on_write_failure {
            config.write_failures = WriteFailurePolicy::CloseConnection;
        }
        config
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    let config = args.to_config();
    let strategy = args.strategy();
    info!(
        addr = %config.bind_addr(),
        ?strategy,
        workers = strategy.workers(&config),
        "server listening"
    );

    // an Err from main exits with status 1
    replicator::run(&config, strategy).context("server terminated")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_map_to_default_config() {
        let args = Args::try_parse_from(["ember"]).unwrap();
        let config = args.to_config();
        let default = ServerConfig::default();
        assert_eq!(args.strategy(), Strategy::Processes);
        assert_eq!(config.bind_addr(), default.bind_addr());
        assert_eq!(config.connection, default.connection);
        assert_eq!(config.listener, default.listener);
        assert_eq!(config.poll_timeout, None);
        assert_eq!(config.read_errors, ReadErrorPolicy::Retry);
        assert_eq!(config.write_failures, WriteFailurePolicy::Fatal);
    }

    #[test]
    fn flags_map_onto_config() {
        let args = Args::try_parse_from([
            "ember",
            "--mode",
            "thread",
            "--threads",
            "4",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--poll-timeout-ms",
            "0",
            "--no-nodelay",
            "--quickack",
            "--close-on-read-error",
            "--close-on-write-failure",
        ])
        .unwrap();
        let config = args.to_config();
        assert_eq!(args.strategy(), Strategy::Threads);
        assert_eq!(config.thread_workers, 4);
        assert_eq!(config.bind_addr(), "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.poll_timeout, Some(Duration::ZERO));
        assert!(!config.connection.nodelay);
        assert!(config.listener.quickack);
        assert_eq!(config.read_errors, ReadErrorPolicy::Close);
        assert_eq!(config.write_failures, WriteFailurePolicy::CloseConnection);
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Args::try_parse_from(["ember", "--mode", "fiber"]).is_err());
    }
}
