use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{error, info};

use crate::config::ServerConfig;
use crate::net::error::{Result, ServerError};

use super::serve;

/// A replica thread that stopped, with the reason.
pub type WorkerFailure = (usize, ServerError);

/// Spawn `config.thread_workers` replica threads
///
/// Each thread builds its own listener and poller. A replica that fails
/// reports on `failures` and exits; the caller decides what happens to
/// the process.
pub fn spawn_threads(
    config: &ServerConfig,
    failures: mpsc::Sender<WorkerFailure>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(config.thread_workers);
    for id in 0..config.thread_workers {
        let config = config.clone();
        let failures = failures.clone();
        let handle = thread::Builder::new()
            .name(format!("ember-worker-{id}"))
            .spawn(move || {
                if let Err(e) = serve(id, &config) {
                    let _ = failures.send((id, e));
                }
            })
            .map_err(|source| ServerError::Spawn { what: "thread spawn", source })?;
        handles.push(handle);
    }
    Ok(handles)
}

/// Run thread replicas until one fails or the process is interrupted.
///
/// The interrupt handler exits straight away; in-flight connections are
/// not drained.
pub fn run_threads(config: &ServerConfig) -> Result<()> {
    ctrlc::set_handler(|| {
        info!("stopped by interrupt");
        std::process::exit(0);
    })?;

    let (tx, rx) = mpsc::channel();
    let handles = spawn_threads(config, tx)?;
    info!(workers = handles.len(), "thread replicas running");

    match rx.recv() {
        Ok((id, e)) => {
            let errno = e.os_error().and_then(|os| os.raw_os_error());
            error!(worker = id, error = %e, errno, "replica failed");
            Err(e)
        }
        // every sender dropped without reporting: all replicas returned
        Err(_) => Ok(()),
    }
}
