//! Signal-safe post-fork setup, grounded on the teacher's
//! `services/fork_child.rs`: the fd-renumbering and `exec_helper` re-exec it
//! used to hand off to belonged to the multi-process control-bus
//! architecture this crate no longer runs (see `crate::services` module
//! doc); only the process-group move survives, now called directly from
//! [`crate::services::exec_spawn`] between fork and exec.

fn write_to_stderr(msg: &str) {
    unsafe {
        libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
        libc::write(libc::STDERR_FILENO, b"\n".as_ptr().cast(), 1);
    }
}

/// Create a new session (and process group) so the child is isolated from
/// the manager's own process group and can later acquire a controlling
/// terminal via `TIOCSCTTY` (needed for TTY-based services, e.g. a getty).
///
/// DO NOT USE THE LOGGER HERE. Between fork and exec only async-signal-safe
/// calls are permitted (signal-safety(7)): the logger's global lock might be
/// held by another thread at the instant of the fork and would never be
/// released in this child.
pub(crate) fn move_into_new_process_group() {
    unsafe {
        if libc::setsid() == -1 {
            write_to_stderr("could not create new session");
            std::process::exit(1);
        }
    };
}
