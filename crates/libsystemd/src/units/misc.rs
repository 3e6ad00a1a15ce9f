//! The four "simple" unit types: target, device, swap, path, automount,
//! snapshot — spec §4.F "by contract, the analogous shape for other
//! process-backed types" for the ones with a process-adjacent external
//! authority (swap, device), plus the two pure grouping types (target,
//! snapshot) and the two trigger types (path, automount).
//!
//! Grounded on the teacher's `TargetSpecific`/`SliceSpecific` (pure markers,
//! no sub-state machine beyond dead/active) and `units/unit_parsing/
//! target_unit.rs`; device/swap/path/automount have no teacher precedent and
//! are built from `unit.c`'s state name tables in `original_source/` plus
//! `dbus-swap.c` (confirms swap's property set is a strict subset of
//! mount's: `What`, `Priority`, `Options`).

use crate::error::{UnitOperationError, UnitOperationErrorReason};
use crate::units::{ActiveState, KillMode, KillWho, UnitId};

macro_rules! active_state_error {
    ($unit_id:expr, $name:expr) => {
        UnitOperationError {
            unit_name: $name.to_owned(),
            unit_id: $unit_id.clone(),
            reason: UnitOperationErrorReason::Unsupported,
        }
    };
}

// ---------------------------------------------------------------- target --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSubState {
    Dead,
    Active,
}

impl TargetSubState {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetSubState::Dead => "dead",
            TargetSubState::Active => "active",
        }
    }
}

pub struct TargetUnit {
    pub sub_state: TargetSubState,
}

impl TargetUnit {
    pub fn new() -> TargetUnit {
        TargetUnit { sub_state: TargetSubState::Dead }
    }

    #[cfg(test)]
    pub fn active() -> TargetUnit {
        TargetUnit { sub_state: TargetSubState::Active }
    }

    pub fn active_state(&self) -> ActiveState {
        match self.sub_state {
            TargetSubState::Dead => ActiveState::Inactive,
            TargetSubState::Active => ActiveState::Active,
        }
    }

    pub fn start(&mut self) -> Result<(), UnitOperationError> {
        self.sub_state = TargetSubState::Active;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), UnitOperationError> {
        self.sub_state = TargetSubState::Dead;
        Ok(())
    }
}

impl Default for TargetUnit {
    fn default() -> TargetUnit {
        TargetUnit::new()
    }
}

// ---------------------------------------------------------------- device --

/// Devices are enumerated from udev uevents, not manually started (spec §1
/// names `cgroup_bonding_*`/udev-adjacent bookkeeping as external
/// collaborators); `start`/`stop` always return `-ENOTSUP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSubState {
    Dead,
    Tentative,
    Plugged,
}

impl DeviceSubState {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceSubState::Dead => "dead",
            DeviceSubState::Tentative => "tentative",
            DeviceSubState::Plugged => "plugged",
        }
    }
}

pub struct DeviceUnit {
    pub sub_state: DeviceSubState,
    pub sysfs_path: Option<String>,
}

impl DeviceUnit {
    pub fn new() -> DeviceUnit {
        DeviceUnit { sub_state: DeviceSubState::Dead, sysfs_path: None }
    }

    pub fn active_state(&self) -> ActiveState {
        match self.sub_state {
            DeviceSubState::Dead => ActiveState::Inactive,
            DeviceSubState::Tentative => ActiveState::Activating,
            DeviceSubState::Plugged => ActiveState::Active,
        }
    }

    /// Called from udev-notify reconciliation (out of scope §1), not from
    /// `Unit::start`.
    pub fn set_plugged(&mut self, plugged: bool, have_sysfs_path: bool) {
        self.sub_state = match (plugged, have_sysfs_path) {
            (true, true) => DeviceSubState::Plugged,
            (true, false) => DeviceSubState::Tentative,
            (false, _) => DeviceSubState::Dead,
        };
    }

    pub fn start(&mut self) -> Result<(), UnitOperationError> {
        Err(active_state_error!(UnitId::new("device"), "device units cannot be started manually"))
    }

    pub fn stop(&mut self) -> Result<(), UnitOperationError> {
        Err(active_state_error!(UnitId::new("device"), "device units cannot be stopped manually"))
    }
}

impl Default for DeviceUnit {
    fn default() -> DeviceUnit {
        DeviceUnit::new()
    }
}

// ------------------------------------------------------------------ swap --

/// Mirrors `mount.rs`'s escalation shape (spec SUPPLEMENTED FEATURES:
/// `dbus-swap.c` confirms the property set — `What`/`Priority`/`Options` —
/// is a strict subset of mount's, and the state machine is the same
/// activate/sigterm/sigkill/deactivate shape with `swapon(8)`/`swapoff(8)`
/// standing in for `mount(8)`/`umount(8)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapSubState {
    Dead,
    Activating,
    ActivatingSigterm,
    ActivatingSigkill,
    Active,
    Deactivating,
    DeactivatingSigterm,
    DeactivatingSigkill,
    Failed,
}

impl SwapSubState {
    pub fn as_str(self) -> &'static str {
        match self {
            SwapSubState::Dead => "dead",
            SwapSubState::Activating => "activating",
            SwapSubState::ActivatingSigterm => "activating-sigterm",
            SwapSubState::ActivatingSigkill => "activating-sigkill",
            SwapSubState::Active => "active",
            SwapSubState::Deactivating => "deactivating",
            SwapSubState::DeactivatingSigterm => "deactivating-sigterm",
            SwapSubState::DeactivatingSigkill => "deactivating-sigkill",
            SwapSubState::Failed => "failed",
        }
    }
}

pub struct SwapUnit {
    pub sub_state: SwapSubState,
    pub what: String,
    pub priority: Option<i32>,
    pub options: Vec<String>,
}

impl SwapUnit {
    pub fn new(what: String) -> SwapUnit {
        SwapUnit { sub_state: SwapSubState::Dead, what, priority: None, options: Vec::new() }
    }

    pub fn active_state(&self) -> ActiveState {
        match self.sub_state {
            SwapSubState::Dead | SwapSubState::Failed => {
                if self.sub_state == SwapSubState::Failed { ActiveState::Failed } else { ActiveState::Inactive }
            }
            SwapSubState::Activating | SwapSubState::ActivatingSigterm | SwapSubState::ActivatingSigkill => {
                ActiveState::Activating
            }
            SwapSubState::Active => ActiveState::Active,
            SwapSubState::Deactivating | SwapSubState::DeactivatingSigterm | SwapSubState::DeactivatingSigkill => {
                ActiveState::Deactivating
            }
        }
    }

    pub fn start(&mut self) -> Result<(), UnitOperationError> {
        match self.sub_state {
            SwapSubState::Dead | SwapSubState::Failed => {
                self.sub_state = SwapSubState::Activating;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn stop(&mut self) -> Result<(), UnitOperationError> {
        match self.sub_state {
            SwapSubState::Active => {
                self.sub_state = SwapSubState::Deactivating;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// `swapon`/`swapoff` child exit observation, mirroring
    /// `mount.rs::on_child_exit`.
    pub fn on_child_exit(&mut self, success: bool) {
        self.sub_state = match (self.sub_state, success) {
            (SwapSubState::Activating, true) => SwapSubState::Active,
            (SwapSubState::Activating, false) => SwapSubState::Failed,
            (SwapSubState::Deactivating, _) => SwapSubState::Dead,
            (SwapSubState::ActivatingSigterm | SwapSubState::ActivatingSigkill, _) => SwapSubState::Failed,
            (SwapSubState::DeactivatingSigterm | SwapSubState::DeactivatingSigkill, _) => SwapSubState::Dead,
            (other, _) => other,
        };
    }

    pub fn on_timeout(&mut self, send_sigkill: bool) {
        self.sub_state = match self.sub_state {
            SwapSubState::Activating => SwapSubState::ActivatingSigterm,
            SwapSubState::ActivatingSigterm if send_sigkill => SwapSubState::ActivatingSigkill,
            SwapSubState::Deactivating => SwapSubState::DeactivatingSigterm,
            SwapSubState::DeactivatingSigterm if send_sigkill => SwapSubState::DeactivatingSigkill,
            other => other,
        };
    }
}

// ------------------------------------------------------------------ path --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSubState {
    Dead,
    Waiting,
    Running,
    Failed,
}

impl PathSubState {
    pub fn as_str(self) -> &'static str {
        match self {
            PathSubState::Dead => "dead",
            PathSubState::Waiting => "waiting",
            PathSubState::Running => "running",
            PathSubState::Failed => "failed",
        }
    }
}

pub struct PathUnit {
    pub sub_state: PathSubState,
    pub unit_to_activate: Option<UnitId>,
}

impl PathUnit {
    pub fn new() -> PathUnit {
        PathUnit { sub_state: PathSubState::Dead, unit_to_activate: None }
    }

    pub fn active_state(&self) -> ActiveState {
        match self.sub_state {
            PathSubState::Dead => ActiveState::Inactive,
            PathSubState::Waiting => ActiveState::Active,
            PathSubState::Running => ActiveState::Active,
            PathSubState::Failed => ActiveState::Failed,
        }
    }

    pub fn start(&mut self) -> Result<(), UnitOperationError> {
        self.sub_state = PathSubState::Waiting;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), UnitOperationError> {
        self.sub_state = PathSubState::Dead;
        Ok(())
    }

    /// Path watch fd fired (spec §4.H fd events): mark running while the
    /// triggered unit's job is in flight, the caller re-arms the watch and
    /// returns this unit to `waiting` once it completes.
    pub fn on_path_changed(&mut self) {
        if self.sub_state == PathSubState::Waiting {
            self.sub_state = PathSubState::Running;
        }
    }

    pub fn on_triggered_unit_settled(&mut self) {
        if self.sub_state == PathSubState::Running {
            self.sub_state = PathSubState::Waiting;
        }
    }
}

impl Default for PathUnit {
    fn default() -> PathUnit {
        PathUnit::new()
    }
}

// ------------------------------------------------------------- automount --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomountSubState {
    Dead,
    Waiting,
    Running,
    Failed,
}

impl AutomountSubState {
    pub fn as_str(self) -> &'static str {
        match self {
            AutomountSubState::Dead => "dead",
            AutomountSubState::Waiting => "waiting",
            AutomountSubState::Running => "running",
            AutomountSubState::Failed => "failed",
        }
    }
}

pub struct AutomountUnit {
    pub sub_state: AutomountSubState,
    /// The `mount` unit this automount point triggers (spec §4.F.4's
    /// `x-systemd.automount` linking, §4.C mount-option table).
    pub mount_unit: Option<UnitId>,
}

impl AutomountUnit {
    pub fn new() -> AutomountUnit {
        AutomountUnit { sub_state: AutomountSubState::Dead, mount_unit: None }
    }

    pub fn active_state(&self) -> ActiveState {
        match self.sub_state {
            AutomountSubState::Dead => ActiveState::Inactive,
            AutomountSubState::Waiting | AutomountSubState::Running => ActiveState::Active,
            AutomountSubState::Failed => ActiveState::Failed,
        }
    }

    pub fn start(&mut self) -> Result<(), UnitOperationError> {
        self.sub_state = AutomountSubState::Waiting;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), UnitOperationError> {
        self.sub_state = AutomountSubState::Dead;
        Ok(())
    }

    pub fn on_autofs_request(&mut self) {
        if self.sub_state == AutomountSubState::Waiting {
            self.sub_state = AutomountSubState::Running;
        }
    }

    pub fn on_mount_settled(&mut self, mount_succeeded: bool) {
        self.sub_state = if mount_succeeded { AutomountSubState::Waiting } else { AutomountSubState::Failed };
    }
}

impl Default for AutomountUnit {
    fn default() -> AutomountUnit {
        AutomountUnit::new()
    }
}

// -------------------------------------------------------------- snapshot --

/// Snapshots are ephemeral, in-memory-only records of the active set at a
/// point in time (spec §3's unit type list; `ignore_on_snapshot` on other
/// units controls whether they're captured). Never reloadable, never
/// persisted across a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSubState {
    Dead,
    Active,
}

impl SnapshotSubState {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotSubState::Dead => "dead",
            SnapshotSubState::Active => "active",
        }
    }
}

pub struct SnapshotUnit {
    pub sub_state: SnapshotSubState,
}

impl SnapshotUnit {
    pub fn new() -> SnapshotUnit {
        SnapshotUnit { sub_state: SnapshotSubState::Active }
    }

    pub fn active_state(&self) -> ActiveState {
        match self.sub_state {
            SnapshotSubState::Dead => ActiveState::Inactive,
            SnapshotSubState::Active => ActiveState::Active,
        }
    }

    pub fn start(&mut self) -> Result<(), UnitOperationError> {
        Err(active_state_error!(UnitId::new("snapshot"), "snapshots cannot be (re)started, only removed"))
    }

    pub fn stop(&mut self) -> Result<(), UnitOperationError> {
        self.sub_state = SnapshotSubState::Dead;
        Ok(())
    }
}

impl Default for SnapshotUnit {
    fn default() -> SnapshotUnit {
        SnapshotUnit::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_start_stop() {
        let mut t = TargetUnit::new();
        assert_eq!(t.active_state(), ActiveState::Inactive);
        t.start().unwrap();
        assert_eq!(t.active_state(), ActiveState::Active);
        t.stop().unwrap();
        assert_eq!(t.active_state(), ActiveState::Inactive);
    }

    #[test]
    fn test_device_cannot_be_started_manually() {
        let mut d = DeviceUnit::new();
        assert!(d.start().is_err());
    }

    #[test]
    fn test_swap_activation_escalation() {
        let mut s = SwapUnit::new("/dev/sda2".to_owned());
        s.start().unwrap();
        assert_eq!(s.active_state(), ActiveState::Activating);
        s.on_timeout(true);
        assert_eq!(s.sub_state, SwapSubState::ActivatingSigterm);
        s.on_timeout(true);
        assert_eq!(s.sub_state, SwapSubState::ActivatingSigkill);
        s.on_child_exit(false);
        assert_eq!(s.active_state(), ActiveState::Failed);
    }

    #[test]
    fn test_path_waiting_running_cycle() {
        let mut p = PathUnit::new();
        p.start().unwrap();
        assert_eq!(p.sub_state, PathSubState::Waiting);
        p.on_path_changed();
        assert_eq!(p.sub_state, PathSubState::Running);
        p.on_triggered_unit_settled();
        assert_eq!(p.sub_state, PathSubState::Waiting);
    }
}
