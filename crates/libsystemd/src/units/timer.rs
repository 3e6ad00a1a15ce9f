//! The timer unit (spec §4.F per-type state machine; spec §4.H "per-unit
//! timers" names timer-unit elapse events as one of the event loop's four
//! wakeup sources).
//!
//! Grounded on the teacher's `timer_scheduler.rs` `TimerConfig`/
//! `should_fire_timer` OnBootSec=/OnUnitActiveSec= calculation, reshaped
//! from a background poller thread (`start_timer_scheduler_thread`,
//! `TIMER_CHECK_INTERVAL` wakeups) into a single `next_elapse()` query the
//! cooperative event loop can fold into its own wait deadline, per spec
//! §5's single-thread mandate.

use std::time::{Duration, Instant};

use crate::error::{UnitOperationError, UnitOperationErrorReason};
use crate::units::{ActiveState, KillMode, KillWho, UnitId};

#[derive(Debug, Clone)]
pub enum TimerSpec {
    OnBootSec(Duration),
    OnStartupSec(Duration),
    OnUnitActiveSec(Duration),
    OnUnitInactiveSec(Duration),
    OnCalendar(String),
}

#[derive(Debug, Clone, Default)]
pub struct TimerConfig {
    pub specs: Vec<TimerSpec>,
    pub unit: UnitId,
    pub persistent: bool,
    pub wake_system: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSubState {
    Dead,
    Waiting,
    Running,
    Elapsed,
    Failed,
}

impl TimerSubState {
    pub fn as_str(self) -> &'static str {
        match self {
            TimerSubState::Dead => "dead",
            TimerSubState::Waiting => "waiting",
            TimerSubState::Running => "running",
            TimerSubState::Elapsed => "elapsed",
            TimerSubState::Failed => "failed",
        }
    }

    pub fn active_state(self) -> ActiveState {
        match self {
            TimerSubState::Dead => ActiveState::Inactive,
            TimerSubState::Waiting | TimerSubState::Running | TimerSubState::Elapsed => ActiveState::Active,
            TimerSubState::Failed => ActiveState::Failed,
        }
    }
}

pub struct TimerUnit {
    pub config: TimerConfig,
    pub sub_state: TimerSubState,
    pub last_fired: Option<Instant>,
    boot_instant: Instant,
}

impl TimerUnit {
    pub fn new(config: TimerConfig, boot_instant: Instant) -> TimerUnit {
        TimerUnit { config, sub_state: TimerSubState::Dead, last_fired: None, boot_instant }
    }

    pub fn active_state(&self) -> ActiveState {
        self.sub_state.active_state()
    }

    pub fn start(&mut self) -> Result<(), UnitOperationError> {
        if self.sub_state.active_state() != ActiveState::Inactive {
            return Err(self.err(UnitOperationErrorReason::InProgress));
        }
        self.sub_state = TimerSubState::Waiting;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), UnitOperationError> {
        if self.sub_state.active_state() == ActiveState::Inactive {
            return Err(self.err(UnitOperationErrorReason::NotActive));
        }
        self.sub_state = TimerSubState::Dead;
        Ok(())
    }

    pub fn reload(&mut self) -> Result<(), UnitOperationError> {
        Err(self.err(UnitOperationErrorReason::Unsupported))
    }

    pub fn kill(&mut self, _who: KillWho, _mode: KillMode, _signal: i32) -> Result<(), UnitOperationError> {
        Err(self.err(UnitOperationErrorReason::KillUnsupported))
    }

    /// The earliest instant at which this timer next needs attention, if
    /// any — the event loop folds the minimum of every waiting timer's
    /// value into its poll-wait deadline instead of waking on a fixed
    /// period (replacing `TIMER_CHECK_INTERVAL`'s coarse polling).
    pub fn next_elapse(&self, now: Instant) -> Option<Instant> {
        if self.sub_state != TimerSubState::Waiting {
            return None;
        }
        self.config
            .specs
            .iter()
            .filter_map(|spec| self.spec_elapse(spec, now))
            .min()
    }

    fn spec_elapse(&self, spec: &TimerSpec, now: Instant) -> Option<Instant> {
        match spec {
            TimerSpec::OnBootSec(d) | TimerSpec::OnStartupSec(d) => Some(self.boot_instant + *d),
            TimerSpec::OnUnitActiveSec(d) | TimerSpec::OnUnitInactiveSec(d) => {
                Some(self.last_fired.unwrap_or(self.boot_instant) + *d)
            }
            // Calendar expressions need wall-clock/calendar arithmetic the
            // monotonic event loop doesn't do; left for a future calendar
            // evaluator, matching real systemd's separate CALENDAR vs
            // MONOTONIC timer_base split.
            TimerSpec::OnCalendar(_) => None,
        }
    }

    /// Called by the event loop once `next_elapse()` has passed: moves to
    /// `elapsed` then immediately back to `waiting` so `OnUnitActiveSec=`
    /// schedules off this fire, exactly mirroring
    /// `timer_scheduler::check_and_fire_timers`'s `last_fired` bookkeeping.
    pub fn fire(&mut self, now: Instant) {
        self.sub_state = TimerSubState::Elapsed;
        self.last_fired = Some(now);
        self.sub_state = TimerSubState::Waiting;
    }

    fn err(&self, reason: UnitOperationErrorReason) -> UnitOperationError {
        UnitOperationError { unit_name: String::new(), unit_id: UnitId::new(""), reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_boot_sec_elapse_is_boot_instant_plus_delay() {
        let boot = Instant::now();
        let mut t = TimerUnit::new(
            TimerConfig { specs: vec![TimerSpec::OnBootSec(Duration::from_secs(30))], ..Default::default() },
            boot,
        );
        t.start().unwrap();
        assert_eq!(t.next_elapse(boot), Some(boot + Duration::from_secs(30)));
    }

    #[test]
    fn test_fire_reschedules_on_unit_active_sec_from_last_fired() {
        let boot = Instant::now();
        let mut t = TimerUnit::new(
            TimerConfig { specs: vec![TimerSpec::OnUnitActiveSec(Duration::from_secs(10))], ..Default::default() },
            boot,
        );
        t.start().unwrap();
        let first = boot + Duration::from_secs(10);
        assert_eq!(t.next_elapse(boot), Some(first));
        t.fire(first);
        assert_eq!(t.sub_state, TimerSubState::Waiting);
        assert_eq!(t.next_elapse(first), Some(first + Duration::from_secs(10)));
    }

    #[test]
    fn test_dead_timer_has_no_next_elapse() {
        let boot = Instant::now();
        let t = TimerUnit::new(TimerConfig::default(), boot);
        assert_eq!(t.next_elapse(boot), None);
    }
}
