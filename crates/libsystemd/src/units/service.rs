//! The service unit — spec §4.F "by contract, the analogous shape for
//! other process-backed types", instantiated for the type real systemd
//! spends the most fragment-directive surface on (spec §4.C's exec-line,
//! restart-policy, notify-access value domains).
//!
//! Grounded on the teacher's `ServiceState`/`ServiceSpecific`
//! activate/deactivate/reactivate methods (`units/unit.rs` ServiceState
//! impl, lines ~174-320) and `services::exec_spawn` (the process-launch
//! collaborator named in spec §1/§6, built on `services/fork_child.rs`'s
//! signal-safe post-fork setup), adapted to the new
//! `start`/`stop`/`reload`/`kill` callback-table shape instead of being
//! invoked directly from `Unit::activate`.

use std::time::Duration;

use log::{trace, warn};
use nix::unistd::Pid;

use crate::error::{UnitOperationError, UnitOperationErrorReason};
use crate::units::{ActiveState, KillMode, KillWho, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    Simple,
    Exec,
    Forking,
    Oneshot,
    Notify,
    Dbus,
    Idle,
}

impl ServiceType {
    /// Parse a `Type=` value (spec §4.C value domains). Unrecognized values
    /// are left to the caller to warn on and fall back to `simple`.
    pub fn parse(s: &str) -> Option<ServiceType> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Some(ServiceType::Simple),
            "exec" => Some(ServiceType::Exec),
            "forking" => Some(ServiceType::Forking),
            "oneshot" => Some(ServiceType::Oneshot),
            "notify" | "notify-reload" => Some(ServiceType::Notify),
            "dbus" => Some(ServiceType::Dbus),
            "idle" => Some(ServiceType::Idle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRestart {
    No,
    OnSuccess,
    OnFailure,
    OnAbnormal,
    OnWatchdog,
    OnAbort,
    Always,
}

impl ServiceRestart {
    /// Parse a `Restart=` value (spec §4.C value domains).
    pub fn parse(s: &str) -> Option<ServiceRestart> {
        match s.trim().to_lowercase().as_str() {
            "no" => Some(ServiceRestart::No),
            "on-success" => Some(ServiceRestart::OnSuccess),
            "on-failure" => Some(ServiceRestart::OnFailure),
            "on-abnormal" => Some(ServiceRestart::OnAbnormal),
            "on-watchdog" => Some(ServiceRestart::OnWatchdog),
            "on-abort" => Some(ServiceRestart::OnAbort),
            "always" => Some(ServiceRestart::Always),
            _ => None,
        }
    }
}

/// One `ExecStart=`/`ExecStop=`/`ExecReload=` line (spec §4.C "command
/// lines"): optional leading `-` (ignore exit failure), optional leading `@`
/// (next word overrides argv[0]).
#[derive(Debug, Clone)]
pub struct ExecCommand {
    pub path: String,
    pub args: Vec<String>,
    pub ignore_failure: bool,
    pub argv0_override: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub service_type: Option<ServiceType>,
    pub exec_start: Vec<ExecCommand>,
    pub exec_start_pre: Vec<ExecCommand>,
    pub exec_start_post: Vec<ExecCommand>,
    pub exec_stop: Vec<ExecCommand>,
    pub exec_reload: Vec<ExecCommand>,
    pub restart: Option<ServiceRestart>,
    pub restart_sec: Duration,
    pub timeout_start: Duration,
    pub timeout_stop: Duration,
    pub send_sigkill: bool,
    pub remain_after_exit: bool,
    pub sockets: Vec<UnitId>,
    pub capability_bounding_set: Option<crate::fragment::value::CapabilitySet>,
}

impl Default for ServiceType {
    fn default() -> ServiceType {
        ServiceType::Simple
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceSubState {
    Dead,
    StartPre,
    StartStarting,
    StartPost,
    Running,
    Reload,
    Stop,
    StopSigterm,
    StopSigkill,
    StopPost,
    AutoRestart,
    Failed,
}

impl ServiceSubState {
    pub fn as_str(self) -> &'static str {
        use ServiceSubState::*;
        match self {
            Dead => "dead",
            StartPre => "start-pre",
            StartStarting => "start",
            StartPost => "start-post",
            Running => "running",
            Reload => "reload",
            Stop => "stop",
            StopSigterm => "stop-sigterm",
            StopSigkill => "stop-sigkill",
            StopPost => "stop-post",
            AutoRestart => "auto-restart",
            Failed => "failed",
        }
    }

    pub fn active_state(self) -> ActiveState {
        use ServiceSubState::*;
        match self {
            Dead => ActiveState::Inactive,
            StartPre | StartStarting | StartPost | AutoRestart => ActiveState::Activating,
            Running => ActiveState::Active,
            Reload => ActiveState::Reloading,
            Stop | StopSigterm | StopSigkill | StopPost => ActiveState::Deactivating,
            Failed => ActiveState::Failed,
        }
    }
}

pub struct ServiceUnit {
    pub config: ServiceConfig,
    pub sub_state: ServiceSubState,
    pub main_pid: Option<Pid>,
    pub control_pid: Option<Pid>,
    pub restart_count: u32,
}

impl ServiceUnit {
    pub fn new(config: ServiceConfig) -> ServiceUnit {
        ServiceUnit { config, sub_state: ServiceSubState::Dead, main_pid: None, control_pid: None, restart_count: 0 }
    }

    pub fn active_state(&self) -> ActiveState {
        self.sub_state.active_state()
    }

    /// `start(u)`: spec §4.F.2. Runs `ExecStartPre=` then forks the main
    /// process (`exec_spawn`, out of scope §1/§6). `Type=oneshot` with
    /// `RemainAfterExit=` advances straight to `running` once the command
    /// exits successfully without keeping a resident process.
    pub fn start(&mut self) -> Result<(), UnitOperationError> {
        if matches!(self.sub_state, ServiceSubState::StartPre | ServiceSubState::StartStarting | ServiceSubState::StartPost | ServiceSubState::Running) {
            return Err(self.err(UnitOperationErrorReason::InProgress));
        }
        trace!("service: dead -> start-pre");
        self.sub_state = ServiceSubState::StartPre;
        self.restart_count = 0;
        if self.config.exec_start_pre.is_empty() {
            self.advance_to_start();
        }
        Ok(())
    }

    fn advance_to_start(&mut self) {
        self.sub_state = ServiceSubState::StartStarting;
        match crate::services::exec_spawn(&self.config.exec_start) {
            Ok(pid) => {
                self.main_pid = Some(pid);
                if self.config.service_type == Some(ServiceType::Forking) {
                    // Forking services report readiness via PIDFile/fork,
                    // not a synchronous child-exit; the manager polls
                    // `sigchld_event`/notify socket instead.
                } else {
                    self.sub_state = ServiceSubState::Running;
                }
            }
            Err(e) => {
                warn!("service exec_start failed: {e}");
                self.sub_state = ServiceSubState::Failed;
            }
        }
    }

    pub fn stop(&mut self) -> Result<(), UnitOperationError> {
        if matches!(self.sub_state, ServiceSubState::Dead | ServiceSubState::Failed) {
            return Err(self.err(UnitOperationErrorReason::NotActive));
        }
        trace!("service: -> stop");
        self.sub_state = ServiceSubState::Stop;
        if !self.config.exec_stop.is_empty() {
            let _ = crate::services::exec_spawn(&self.config.exec_stop);
        } else if let Some(pid) = self.main_pid {
            let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
            self.sub_state = ServiceSubState::StopSigterm;
        } else {
            self.sub_state = ServiceSubState::Dead;
        }
        Ok(())
    }

    /// `reload(u)`: requires `active_state == active` (spec §4.F.2).
    pub fn reload(&mut self) -> Result<(), UnitOperationError> {
        if self.sub_state != ServiceSubState::Running {
            return Err(self.err(UnitOperationErrorReason::NotActive));
        }
        if self.config.exec_reload.is_empty() {
            return Err(UnitOperationError {
                unit_name: String::new(),
                unit_id: UnitId::new(""),
                reason: UnitOperationErrorReason::Unsupported,
            });
        }
        self.sub_state = ServiceSubState::Reload;
        match crate::services::exec_spawn(&self.config.exec_reload) {
            Ok(_) => {
                self.sub_state = ServiceSubState::Running;
                Ok(())
            }
            Err(e) => {
                self.sub_state = ServiceSubState::Running;
                Err(self.err(UnitOperationErrorReason::GenericStartError(e.to_string())))
            }
        }
    }

    pub fn kill(&mut self, who: KillWho, _mode: KillMode, signal: i32) -> Result<(), UnitOperationError> {
        let pid = match who {
            KillWho::Control => self.control_pid,
            _ => self.main_pid,
        };
        let Some(pid) = pid else {
            return Err(self.err(UnitOperationErrorReason::KillUnsupported));
        };
        let Ok(sig) = nix::sys::signal::Signal::try_from(signal) else {
            return Err(self.err(UnitOperationErrorReason::Unsupported));
        };
        nix::sys::signal::kill(pid, sig)
            .map_err(|e| self.err(UnitOperationErrorReason::GenericStopError(e.to_string())))
    }

    fn err(&self, reason: UnitOperationErrorReason) -> UnitOperationError {
        UnitOperationError { unit_name: String::new(), unit_id: UnitId::new(""), reason }
    }

    /// SIGCHLD observation (spec §4.H "child-exit notifications"). `pid`
    /// identifies which tracked process exited (main, control, or an
    /// ExecStartPre/Post helper already reaped synchronously by the spawn
    /// call); `success` is the exit-status/`SuccessExitStatus=` verdict.
    pub fn on_child_exit(&mut self, pid: Pid, success: bool) {
        use ServiceSubState::*;
        if Some(pid) != self.main_pid {
            return;
        }
        self.sub_state = match (self.sub_state, success) {
            (StartStarting, true) if self.config.remain_after_exit => Running,
            (StartStarting, true) => Dead,
            (StartStarting, false) => Failed,
            (Running, true) => self.restart_or_dead(true),
            (Running, false) => self.restart_or_dead(false),
            (Stop | StopSigterm | StopSigkill, _) => Dead,
            (other, _) => other,
        };
        if self.sub_state != Running {
            self.main_pid = None;
        }
    }

    fn restart_or_dead(&mut self, success: bool) -> ServiceSubState {
        let restart = self.config.restart.unwrap_or(ServiceRestart::No);
        let should_restart = match restart {
            ServiceRestart::Always => true,
            ServiceRestart::OnSuccess => success,
            ServiceRestart::OnFailure | ServiceRestart::OnAbnormal | ServiceRestart::OnAbort => !success,
            ServiceRestart::OnWatchdog => false,
            ServiceRestart::No => false,
        };
        if should_restart {
            self.restart_count += 1;
            ServiceSubState::AutoRestart
        } else if success {
            ServiceSubState::Dead
        } else {
            ServiceSubState::Failed
        }
    }

    /// Fired when `RestartSec=` elapses after entering `auto-restart` (spec
    /// §4.H per-unit timers).
    pub fn on_restart_timer(&mut self) {
        if self.sub_state == ServiceSubState::AutoRestart {
            self.sub_state = ServiceSubState::StartPre;
            if self.config.exec_start_pre.is_empty() {
                self.advance_to_start();
            }
        }
    }

    pub fn on_timeout(&mut self) {
        use ServiceSubState::*;
        self.sub_state = match self.sub_state {
            StartPre | StartStarting | StartPost => Failed,
            Stop => StopSigterm,
            StopSigterm if self.config.send_sigkill => StopSigkill,
            other => other,
        };
        if matches!(self.sub_state, StopSigterm | StopSigkill)
            && let Some(pid) = self.main_pid
        {
            let signal = if self.sub_state == StopSigkill {
                nix::sys::signal::Signal::SIGKILL
            } else {
                nix::sys::signal::Signal::SIGTERM
            };
            let _ = nix::sys::signal::kill(pid, signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ServiceConfig {
        ServiceConfig {
            service_type: Some(ServiceType::Simple),
            exec_start: vec![ExecCommand { path: "/bin/true".into(), args: vec![], ignore_failure: false, argv0_override: None }],
            restart: Some(ServiceRestart::OnFailure),
            ..Default::default()
        }
    }

    #[test]
    fn test_start_without_pre_goes_straight_to_running_or_failed() {
        let mut s = ServiceUnit::new(cfg());
        s.start().unwrap();
        assert!(matches!(s.active_state(), ActiveState::Active | ActiveState::Failed));
    }

    #[test]
    fn test_restart_on_failure_enters_auto_restart() {
        let mut s = ServiceUnit::new(cfg());
        s.sub_state = ServiceSubState::Running;
        s.main_pid = Some(Pid::from_raw(12345));
        s.on_child_exit(Pid::from_raw(12345), false);
        assert_eq!(s.sub_state, ServiceSubState::AutoRestart);
    }

    #[test]
    fn test_no_restart_policy_goes_dead_on_clean_exit() {
        let mut cfg = cfg();
        cfg.restart = Some(ServiceRestart::No);
        let mut s = ServiceUnit::new(cfg);
        s.sub_state = ServiceSubState::Running;
        s.main_pid = Some(Pid::from_raw(42));
        s.on_child_exit(Pid::from_raw(42), true);
        assert_eq!(s.sub_state, ServiceSubState::Dead);
    }

    #[test]
    fn test_stop_sigterm_then_sigkill_timeout() {
        let mut cfg = cfg();
        cfg.send_sigkill = true;
        let mut s = ServiceUnit::new(cfg);
        s.sub_state = ServiceSubState::Stop;
        s.on_timeout();
        assert_eq!(s.sub_state, ServiceSubState::StopSigterm);
        s.on_timeout();
        assert_eq!(s.sub_state, ServiceSubState::StopSigkill);
    }
}
