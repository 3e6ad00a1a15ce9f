//! Process entrypoints (spec §6 "Binary entrypoint").
//!
//! systemd-rs ships a single binary that runs as PID 1. The teacher's
//! `exec_helper` dispatch (a second entrypoint for a fork/exec subprocess
//! that fed commands back over a control socket) belonged to the
//! multi-process control-bus architecture this crate no longer runs —
//! [`crate::services::exec_spawn`] forks and execs directly from inside the
//! manager process.

mod service_manager;

pub use service_manager::run_service_manager;
