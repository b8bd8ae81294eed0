//! Replication of independent event loops
//!
//! Each replica binds its own SO_REUSEPORT listener, so the only thing the
//! replicas share is the port; the kernel picks which one accepts.

pub mod process;
pub mod thread;

use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::net::error::Result;
use crate::reactor::EventLoop;

pub use process::run_processes;
pub use thread::{WorkerFailure, run_threads, spawn_threads};

/// How replicas are started. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// One forked process per replica
    #[default]
    Processes,
    /// One thread per replica inside this process
    Threads,
}

impl Strategy {
    pub fn workers(self, config: &ServerConfig) -> usize {
        match self {
            Strategy::Processes => config.process_workers,
            Strategy::Threads => config.thread_workers,
        }
    }
}

/// Start the replicas and block until they are gone (or forever).
pub fn run(config: &ServerConfig, strategy: Strategy) -> Result<()> {
    config.validate()?;
    match strategy {
        Strategy::Processes => run_processes(config),
        Strategy::Threads => run_threads(config),
    }
}

/// Body of a single replica: bind, then loop until something fatal happens.
pub fn serve(id: usize, config: &ServerConfig) -> Result<()> {
    if config.pin_cores {
        pin_to_core(id);
    }
    EventLoop::bind(id, config)?.run()
}

fn pin_to_core(id: usize) {
    let Some(cores) = core_affinity::get_core_ids().filter(|c| !c.is_empty()) else {
        warn!(worker = id, "no core ids available, not pinning");
        return;
    };
    let core = cores[id % cores.len()];
    if core_affinity::set_for_current(core) {
        debug!(worker = id, core = core.id, "pinned to core");
    } else {
        warn!(worker = id, core = core.id, "failed to pin to core");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_follows_strategy() {
        let config = ServerConfig {
            process_workers: 3,
            thread_workers: 5,
            ..ServerConfig::default()
        };
        assert_eq!(Strategy::Processes.workers(&config), 3);
        assert_eq!(Strategy::Threads.workers(&config), 5);
        assert_eq!(Strategy::default(), Strategy::Processes);
    }

    #[test]
    fn run_validates_before_spawning() {
        let config = ServerConfig { thread_workers: 0, ..ServerConfig::loopback(0) };
        assert!(run(&config, Strategy::Threads).is_err());
    }
}
