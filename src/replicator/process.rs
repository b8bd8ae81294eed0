use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::net::error::{EXIT_FAILURE, Result, ServerError};
use crate::util::fd::{cvt, cvt_retry};

use super::serve;

/// Fork `config.process_workers` replicas and wait for all of them
///
/// Must be called while the process is single-threaded. Returns an error
/// if any child exits non-zero or is killed by a signal.
pub fn run_processes(config: &ServerConfig) -> Result<()> {
    let parent = unsafe { libc::getpid() };
    let mut children = Vec::with_capacity(config.process_workers);

    for id in 0..config.process_workers {
        let pid = cvt(unsafe { libc::fork() })
            .map_err(|source| ServerError::Spawn { what: "fork", source })?;
        if pid == 0 {
            run_child(id, config, parent);
        }
        debug!(worker = id, pid, "forked replica");
        children.push((id, pid));
    }
    info!(workers = children.len(), "process replicas running");

    let mut failure = None;
    reap(children, |id, pid, exit| match exit {
        ChildExit::Code(0) => debug!(worker = id, pid, "replica exited"),
        ChildExit::Code(code) => {
            warn!(worker = id, pid, code, "replica exited with failure");
            failure = failure.take().or(Some(ServerError::WorkerExited { pid, status: code }));
        }
        ChildExit::Signal(sig) => {
            warn!(worker = id, pid, signal = sig, "replica killed by signal");
            failure = failure.take().or(Some(ServerError::WorkerExited { pid, status: 128 + sig }));
        }
    })?;

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Wait until every child in `children` is gone, calling `on_exit` for each
/// one in the order they exit.
fn reap(
    mut children: Vec<(usize, libc::pid_t)>,
    mut on_exit: impl FnMut(usize, libc::pid_t, ChildExit),
) -> Result<()> {
    while !children.is_empty() {
        let (pid, status) = wait_any()?;
        let Some(pos) = children.iter().position(|&(_, p)| p == pid) else {
            debug!(pid, "reaped unknown child");
            continue;
        };
        let (id, _) = children.swap_remove(pos);
        on_exit(id, pid, decode_status(status));
    }
    Ok(())
}

fn run_child(id: usize, config: &ServerConfig, parent: libc::pid_t) -> ! {
    // don't outlive the parent; it may already be gone by now
    unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if unsafe { libc::getppid() } != parent {
        std::process::exit(0);
    }

    let code = match serve(id, config) {
        Ok(()) => 0,
        Err(e) => {
            let errno = e.os_error().and_then(|os| os.raw_os_error());
            error!(worker = id, error = %e, errno, "replica failed");
            EXIT_FAILURE
        }
    };
    std::process::exit(code)
}

fn wait_any() -> Result<(libc::pid_t, libc::c_int)> {
    let mut status: libc::c_int = 0;
    let pid = cvt_retry(|| unsafe { libc::waitpid(-1, &mut status, 0) })
        .map_err(|source| ServerError::Spawn { what: "waitpid", source })?;
    Ok((pid, status))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildExit {
    Code(i32),
    Signal(i32),
}

fn decode_status(status: libc::c_int) -> ChildExit {
    if libc::WIFSIGNALED(status) {
        ChildExit::Signal(libc::WTERMSIG(status))
    } else {
        ChildExit::Code(libc::WEXITSTATUS(status))
    }
}
