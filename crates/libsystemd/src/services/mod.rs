//! Process spawning collaborator (spec §1/§6 `exec_spawn`, named an
//! external boundary the manager calls into and not itself redesigned).
//!
//! `fork_child` holds the teacher's original signal-safe post-fork setup
//! (new session, fd renumbering); [`exec_spawn`] below is a direct
//! fork/exec used by [`crate::units::service::ServiceUnit`] and
//! [`crate::units::socket::SocketUnit`], built on the same signal-safety
//! discipline (log calls and allocations are avoided between fork and
//! exec). The teacher's `fork_parent`/`exec_helper` subprocess and
//! fd-passing protocol belonged to a multi-process control-bus
//! architecture this crate no longer runs.

pub mod fork_child;

use std::ffi::CString;

use nix::unistd::{fork, ForkResult, Pid};

use crate::units::service::ExecCommand;

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("exec_start has no command lines")]
    NoCommand,
    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),
    #[error("invalid path or argument: {0}")]
    InvalidArgument(String),
}

/// Forks and execs the first non-`-`-ignorable command in `commands`,
/// returning the child's pid to the caller without waiting on it — reaping
/// happens through the event loop's `SIGCHLD` handling (spec §4.H).
pub fn exec_spawn(commands: &[ExecCommand]) -> Result<Pid, SpawnError> {
    let cmd = commands.first().ok_or(SpawnError::NoCommand)?;

    let path = CString::new(cmd.path.as_bytes()).map_err(|_| SpawnError::InvalidArgument(cmd.path.clone()))?;
    let argv0 = cmd.argv0_override.as_deref().unwrap_or(&cmd.path);
    let mut argv: Vec<CString> = Vec::with_capacity(cmd.args.len() + 1);
    argv.push(CString::new(argv0.as_bytes()).map_err(|_| SpawnError::InvalidArgument(argv0.to_string()))?);
    for arg in &cmd.args {
        argv.push(CString::new(arg.as_bytes()).map_err(|_| SpawnError::InvalidArgument(arg.clone()))?);
    }

    // Safety: between fork and exec in the child we only call
    // async-signal-safe functions, per the same discipline documented on
    // `fork_child::move_into_new_process_group`.
    match unsafe { fork() }.map_err(SpawnError::Fork)? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            fork_child::move_into_new_process_group();
            let _ = nix::unistd::execv(&path, &argv);
            unsafe { libc::_exit(127) };
        }
    }
}
