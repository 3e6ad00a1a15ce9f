//! The cooperative event loop (spec §5): one thread, one `poll(2)` call per
//! iteration, fixed dispatch priority `child-exits > fd-events > timers >
//! queues`.
//!
//! No direct teacher precedent — `entrypoints/service_manager.rs` ran a
//! `signal_hook::iterator::Signals` thread plus a separate timer-scheduler
//! thread plus the main thread, coordinating over a shared
//! `Arc<RwLock<RuntimeInfo>>`. This loop keeps the teacher's
//! `signal_hook`-based SIGCHLD plumbing (the one piece of that design that
//! isn't itself a thread: `Signals::pending()` is a non-blocking drain) but
//! replaces the rest with a single `nix::poll` wait per tick, per spec §5's
//! "single OS thread, no locks" mandate.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::time::{Duration, Instant};

use log::{trace, warn};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use signal_hook::consts::SIGCHLD;
use signal_hook::iterator::Signals;

use crate::manager::Manager;
use crate::units::{ActiveState, UnitId, UnitKind};

/// Upper bound on how long a single `poll` wait may run even with no timer
/// due: keeps SIGCHLD's non-blocking drain and the mount-table's polling
/// fallback responsive without a dedicated wakeup fd for either.
const MAX_TICK: Duration = Duration::from_millis(250);

pub struct EventLoop {
    signals: Signals,
    mountinfo_fd: std::fs::File,
    /// `RawFd -> owning socket unit`, rebuilt every tick from the store
    /// (spec §4.I "no long-lived fd table outside the unit that owns it").
    socket_fds: HashMap<RawFd, UnitId>,
}

impl EventLoop {
    pub fn new() -> std::io::Result<EventLoop> {
        let signals = Signals::new([SIGCHLD])?;
        let mountinfo_fd = std::fs::File::open("/proc/self/mountinfo")?;
        Ok(EventLoop { signals, mountinfo_fd, socket_fds: HashMap::new() })
    }

    /// Run until `should_stop` returns true (checked once per tick, spec §5
    /// "Shutdown" — a SIGTERM/SIGINT handler outside this loop flips the
    /// flag this closure reads).
    pub fn run(&mut self, manager: &mut Manager, mut should_stop: impl FnMut() -> bool) {
        loop {
            manager.process_load_queue();
            manager.dispatch_jobs();
            manager.run_queues();

            if should_stop() {
                trace!("event loop: stop requested, exiting");
                return;
            }

            self.rebuild_socket_fds(manager);
            let timeout = self.compute_timeout(manager);
            self.poll_once(timeout);

            // Priority 1: child exits.
            self.drain_sigchld(manager);
            // Priority 2: fd events (sockets, mount table).
            self.drain_mount_table_event(manager);
            self.drain_socket_events(manager);
            // Priority 3: timers.
            self.fire_due_timers(manager);
        }
    }

    fn rebuild_socket_fds(&mut self, manager: &Manager) {
        self.socket_fds.clear();
        for (id, unit) in manager.store.iter() {
            if let UnitKind::Socket(s) = &unit.kind {
                for fd in &s.fds {
                    self.socket_fds.insert(*fd, id.clone());
                }
            }
        }
    }

    /// Fold the earliest due timer into the poll wait so `OnBootSec=`/
    /// `OnUnitActiveSec=` timers fire promptly instead of waiting for the
    /// next `MAX_TICK` boundary (spec §4.H "per-unit timers").
    fn compute_timeout(&self, manager: &Manager) -> Duration {
        let now = Instant::now();
        let earliest = manager
            .store
            .iter()
            .filter_map(|(_, u)| match &u.kind {
                UnitKind::Timer(t) => t.next_elapse(now),
                _ => None,
            })
            .min();

        match earliest {
            Some(at) if at > now => (at - now).min(MAX_TICK),
            Some(_) => Duration::ZERO,
            None => MAX_TICK,
        }
    }

    fn poll_once(&mut self, timeout: Duration) {
        let mut fds: Vec<PollFd> = Vec::with_capacity(self.socket_fds.len() + 1);
        let mountinfo_borrow = self.mountinfo_fd.as_raw_fd();
        // Safety: `mountinfo_fd`/the socket fds outlive this call; the
        // `PollFd`s built from them are dropped before `self` is touched
        // again.
        let mountinfo_borrowed = unsafe { BorrowedFd::borrow_raw(mountinfo_borrow) };
        fds.push(PollFd::new(mountinfo_borrowed, PollFlags::POLLPRI | PollFlags::POLLERR));
        let socket_borrowed: Vec<BorrowedFd> =
            self.socket_fds.keys().map(|fd| unsafe { BorrowedFd::borrow_raw(*fd) }).collect();
        for b in &socket_borrowed {
            fds.push(PollFd::new(*b, PollFlags::POLLIN));
        }

        let poll_timeout = PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX);
        if let Err(e) = poll(&mut fds, poll_timeout) {
            if e != nix::errno::Errno::EINTR {
                warn!("event loop: poll failed: {e}");
            }
        }
    }

    /// Drain every pending `SIGCHLD` (spec §4.H) and reap every exited child
    /// with `waitpid(-1, WNOHANG)`, handing each one to the manager.
    fn drain_sigchld(&mut self, manager: &mut Manager) {
        let mut got_any = false;
        for _ in self.signals.pending() {
            got_any = true;
        }
        if !got_any {
            return;
        }
        loop {
            match nix::sys::wait::waitpid(None, Some(nix::sys::wait::WaitPidFlag::WNOHANG)) {
                Ok(nix::sys::wait::WaitStatus::Exited(pid, code)) => {
                    trace!("event loop: pid {pid} exited with code {code}");
                    manager.on_child_exit(pid, code == 0);
                }
                Ok(nix::sys::wait::WaitStatus::Signaled(pid, signal, _)) => {
                    trace!("event loop: pid {pid} killed by {signal:?}");
                    manager.on_child_exit(pid, false);
                }
                Ok(nix::sys::wait::WaitStatus::StillAlive) | Err(nix::errno::Errno::ECHILD) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("event loop: waitpid failed: {e}");
                    break;
                }
            }
        }
    }

    /// Spec §4.F.3 "Out-of-band truth": `/proc/self/mountinfo` reports
    /// `POLLERR`/`POLLPRI` whenever the table changes, regardless of whether
    /// this manager caused the change.
    fn drain_mount_table_event(&mut self, manager: &mut Manager) {
        if let Err(e) = manager.reconcile_mounts() {
            warn!("event loop: mount table reconciliation failed: {e}");
        }
    }

    /// A readable socket fd: for `Accept=no` this just means "activity
    /// pending", which is forwarded to the socket's `Service=` peer as a
    /// start job; `Accept=yes` template instantiation (spec §4.C) is left to
    /// the per-connection accept loop a real listener thread would run,
    /// which this crate doesn't implement (see SPEC_FULL.md Non-goals).
    fn drain_socket_events(&mut self, manager: &mut Manager) {
        let ready: Vec<UnitId> = self.socket_fds.values().cloned().collect();
        for id in ready {
            let Some(unit) = manager.store.get_mut(&id) else { continue };
            let UnitKind::Socket(s) = &mut unit.kind else { continue };
            if s.active_state() != ActiveState::Active {
                continue;
            }
            let service = s.config.service.clone();
            s.on_connection_accepted();
            if let Some(service_id) = service {
                let _ = manager.enqueue(service_id.name(), crate::job::JobType::Start, crate::job::JobMode::Replace);
            }
        }
    }

    fn fire_due_timers(&mut self, manager: &mut Manager) {
        let now = Instant::now();
        let due: Vec<(UnitId, UnitId)> = manager
            .store
            .iter()
            .filter_map(|(id, u)| match &u.kind {
                UnitKind::Timer(t) if t.next_elapse(now).is_some_and(|at| at <= now) => Some((id.clone(), t.config.unit.clone())),
                _ => None,
            })
            .collect();

        for (timer_id, target) in due {
            if let Some(unit) = manager.store.get_mut(&timer_id)
                && let UnitKind::Timer(t) = &mut unit.kind
            {
                trace!("event loop: timer {timer_id} fired, starting {target}");
                t.fire(now);
            }
            let _ = manager.enqueue(target.name(), crate::job::JobType::Start, crate::job::JobMode::Replace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_compute_timeout_caps_at_max_tick_with_no_timers() {
        let manager = Manager::new(Config::default_for_test());
        let event_loop = EventLoop { signals: Signals::new([SIGCHLD]).unwrap(), mountinfo_fd: std::fs::File::open("/proc/self/mountinfo").unwrap(), socket_fds: HashMap::new() };
        assert_eq!(event_loop.compute_timeout(&manager), MAX_TICK);
    }
}
