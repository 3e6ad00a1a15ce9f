//! The unit model (spec §3 "Data model", §4.F "Unit lifecycle").
//!
//! A [`Unit`] is the universal resource record the manager owns. Its
//! type-specific payload is a tagged variant, [`UnitKind`], rather than a
//! virtual dispatch table (spec §9 "Per-type polymorphism"): shared state
//! (timestamps, queue membership, the pending job, policy bits) lives on
//! `Unit` itself; only the sub-state machine and the `start`/`stop`/
//! `reload`/`kill` mechanics are type-specific, reached through a single
//! `match` in [`Unit::behavior`] / the free functions in this module.
//!
//! Grounded on the teacher's `units/unit.rs` (`Unit { id, common, specific }`,
//! `Specific` enum, `Dependencies`, `UnitConfig`), restructured so the
//! dependency graph lives centrally in [`crate::relation::Graph`] (owned by
//! [`crate::store::UnitStore`]) instead of embedded per-unit, matching
//! spec §9's "arena `UnitStore` with stable handles" note.

pub mod misc;
pub mod mount;
pub mod service;
pub mod socket;
pub mod timer;

use std::path::PathBuf;
use std::time::SystemTime;

pub use crate::unit_name::UnitType;
use crate::conditions::Condition;
use crate::error::UnitOperationError;
use crate::job::Job;

/// A unit's canonical identity: the primary name it was first added under.
/// Aliases are tracked separately on [`Unit::names`]; the store's name map
/// may have several `UnitId`s (one per alias) resolving to the same `Unit`
/// record, but `UnitId` equality/hashing is always by the full name string,
/// so two aliases compare unequal even though they name the same unit —
/// callers must go through the store's name map (or `follow_merge`) to learn
/// that.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(name: impl Into<String>) -> UnitId {
        UnitId(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn unit_type(&self) -> Option<UnitType> {
        crate::unit_name::to_type(&self.0)
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for UnitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Spec §3: `load_state ∈ {stub, loaded, error, merged, masked}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Stub,
    Loaded,
    Error,
    Merged,
    Masked,
}

/// Spec §3: `active_state` is *derived* from the type's sub-state via a fixed
/// translation table (§4.F.3 gives `mount`'s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveState {
    Inactive,
    Activating,
    Active,
    Reloading,
    Deactivating,
    Failed,
}

impl ActiveState {
    pub fn is_active_or_reloading(self) -> bool {
        matches!(self, ActiveState::Active | ActiveState::Reloading)
    }

    pub fn is_inactive_or_failed(self) -> bool {
        matches!(self, ActiveState::Inactive | ActiveState::Failed)
    }
}

/// Spec §3 "Housekeeping timestamps". Each is a dual (monotonic, realtime)
/// pair once set, per spec §4.J's serialization format
/// (`"<monotonic_usec> <realtime_usec>"`); kept as `SystemTime` here with the
/// monotonic companion reconstructed at serialize-time from `Instant`-since-
/// boot (see `serialize.rs`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamps {
    pub inactive_exit: Option<SystemTime>,
    pub active_enter: Option<SystemTime>,
    pub active_exit: Option<SystemTime>,
    pub inactive_enter: Option<SystemTime>,
    pub condition_check: Option<SystemTime>,
}

impl Timestamps {
    /// Update the relevant timestamp(s) for an (old, new) `ActiveState`
    /// transition, per spec §4.F.1 step 1. Called unconditionally from
    /// `notify`, even when `old == new`.
    pub fn record_transition(&mut self, old: ActiveState, new: ActiveState) {
        let now = SystemTime::now();
        use ActiveState::*;
        if matches!(old, Inactive | Failed) && !matches!(new, Inactive | Failed) {
            self.inactive_exit = Some(now);
        }
        if !matches!(old, Active | Reloading) && matches!(new, Active | Reloading) {
            self.active_enter = Some(now);
        }
        if matches!(old, Active | Reloading) && !matches!(new, Active | Reloading) {
            self.active_exit = Some(now);
        }
        if !matches!(old, Inactive | Failed) && matches!(new, Inactive | Failed) {
            self.inactive_enter = Some(now);
        }
    }
}

/// Spec §3 "Queue membership flags" (spec §4.I): idempotent-insertion
/// bitset so a unit already in a queue is never pushed twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFlags {
    pub in_load_queue: bool,
    pub in_gc_queue: bool,
    pub in_cleanup_queue: bool,
    pub in_dbus_queue: bool,
}

/// Spec §3 "Policy bits".
#[derive(Debug, Clone, Copy)]
pub struct UnitPolicy {
    pub stop_when_unneeded: bool,
    pub refuse_manual_start: bool,
    pub refuse_manual_stop: bool,
    pub allow_isolate: bool,
    pub default_dependencies: bool,
    pub on_failure_isolate: bool,
    pub ignore_on_isolate: bool,
    pub ignore_on_snapshot: bool,
}

impl Default for UnitPolicy {
    fn default() -> UnitPolicy {
        UnitPolicy {
            stop_when_unneeded: false,
            refuse_manual_start: false,
            refuse_manual_stop: false,
            allow_isolate: false,
            default_dependencies: true,
            on_failure_isolate: false,
            ignore_on_isolate: false,
            ignore_on_snapshot: false,
        }
    }
}

/// `who` argument to `kill()` (spec §4.F.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillWho {
    Main,
    Control,
    All,
}

/// `mode` argument to `kill()` (spec §4.F.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillMode {
    None,
    ControlGroup,
    Process,
    ProcessGroup,
}

/// The tagged variant replacing the teacher's per-type virtual table (spec
/// §9). Each arm holds the type's config + live sub-state.
pub enum UnitKind {
    Service(service::ServiceUnit),
    Socket(socket::SocketUnit),
    Target(misc::TargetUnit),
    Device(misc::DeviceUnit),
    Mount(mount::MountUnit),
    Automount(misc::AutomountUnit),
    Snapshot(misc::SnapshotUnit),
    Swap(misc::SwapUnit),
    Timer(timer::TimerUnit),
    Path(misc::PathUnit),
}

impl UnitKind {
    pub fn unit_type(&self) -> UnitType {
        match self {
            UnitKind::Service(_) => UnitType::Service,
            UnitKind::Socket(_) => UnitType::Socket,
            UnitKind::Target(_) => UnitType::Target,
            UnitKind::Device(_) => UnitType::Device,
            UnitKind::Mount(_) => UnitType::Mount,
            UnitKind::Automount(_) => UnitType::Automount,
            UnitKind::Snapshot(_) => UnitType::Snapshot,
            UnitKind::Swap(_) => UnitType::Swap,
            UnitKind::Timer(_) => UnitType::Timer,
            UnitKind::Path(_) => UnitType::Path,
        }
    }

    /// Derive `active_state` from the type's sub-state (spec §4.F.1,
    /// §4.F.3's translation table being the representative example).
    pub fn active_state(&self) -> ActiveState {
        match self {
            UnitKind::Service(u) => u.active_state(),
            UnitKind::Socket(u) => u.active_state(),
            UnitKind::Target(u) => u.active_state(),
            UnitKind::Device(u) => u.active_state(),
            UnitKind::Mount(u) => u.active_state(),
            UnitKind::Automount(u) => u.active_state(),
            UnitKind::Snapshot(u) => u.active_state(),
            UnitKind::Swap(u) => u.active_state(),
            UnitKind::Timer(u) => u.active_state(),
            UnitKind::Path(u) => u.active_state(),
        }
    }

    pub fn sub_state_name(&self) -> &'static str {
        match self {
            UnitKind::Service(u) => u.sub_state.as_str(),
            UnitKind::Socket(u) => u.sub_state.as_str(),
            UnitKind::Target(u) => u.sub_state.as_str(),
            UnitKind::Device(u) => u.sub_state.as_str(),
            UnitKind::Mount(u) => u.sub_state.as_str(),
            UnitKind::Automount(u) => u.sub_state.as_str(),
            UnitKind::Snapshot(u) => u.sub_state.as_str(),
            UnitKind::Swap(u) => u.sub_state.as_str(),
            UnitKind::Timer(u) => u.sub_state.as_str(),
            UnitKind::Path(u) => u.sub_state.as_str(),
        }
    }

    /// Whether this type's `can_reload` (spec §4.F.2 `reload()` contract).
    pub fn can_reload(&self) -> bool {
        matches!(self, UnitKind::Service(_) | UnitKind::Mount(_))
    }

    /// Whether this type opts out of garbage collection regardless of
    /// reference count (spec §3 "survives ... if its type opts out").
    pub fn gc_exempt(&self) -> bool {
        matches!(self, UnitKind::Device(_))
    }
}

/// The universal resource record (spec §3 "Unit").
pub struct Unit {
    /// Primary name; invariant `id.name() ∈ names`.
    pub id: UnitId,
    /// All alias names, including `id`; non-empty.
    pub names: Vec<String>,
    pub unit_type: UnitType,
    /// Present iff the name is an instance (`prefix@instance.suffix`).
    pub instance: Option<String>,
    pub load_state: LoadState,
    /// Set only when `load_state == Error`.
    pub load_error: Option<String>,
    /// Set only when `load_state == Merged`; the canonical unit this one
    /// forwards to (spec §3/§4.D "merge forwarding", I3).
    pub merged_into: Option<UnitId>,
    pub job: Option<Job>,
    pub timestamps: Timestamps,
    pub fragment_path: Option<PathBuf>,
    pub fragment_mtime: Option<SystemTime>,
    pub description: Option<String>,
    pub documentation: Vec<String>,
    pub conditions: Vec<Condition>,
    pub asserts: Vec<Condition>,
    pub cgroup_path: Option<String>,
    pub queues: QueueFlags,
    pub policy: UnitPolicy,
    /// `OnFailure=` targets (spec §4.E `on-failure` relation peers, kept
    /// denormalized here since `on-failure` declares no inverse the graph
    /// would otherwise let us look up from the failing unit's own set).
    pub on_failure_units: Vec<UnitId>,
    /// `Following=` deputy (spec GLOSSARY "Following"): operations on this
    /// unit are forwarded to the named leader.
    pub following: Option<UnitId>,
    pub kind: UnitKind,
}

impl Unit {
    pub fn new_stub(id: UnitId, kind: UnitKind) -> Unit {
        let unit_type = kind.unit_type();
        let instance = crate::unit_name::prefix_and_instance(id.name())
            .1
            .map(|s| s.to_owned());
        Unit {
            names: vec![id.name().to_owned()],
            id,
            unit_type,
            instance,
            load_state: LoadState::Stub,
            load_error: None,
            merged_into: None,
            job: None,
            timestamps: Timestamps::default(),
            fragment_path: None,
            fragment_mtime: None,
            description: None,
            documentation: Vec::new(),
            conditions: Vec::new(),
            asserts: Vec::new(),
            cgroup_path: None,
            queues: QueueFlags::default(),
            policy: UnitPolicy::default(),
            on_failure_units: Vec::new(),
            following: None,
            kind,
        }
    }

    pub fn active_state(&self) -> ActiveState {
        self.kind.active_state()
    }

    /// Add `name` as an alias of this unit, if not already present.
    /// Invariant: every alias carries the same instanced-ness as `id`
    /// (spec §3 "either all aliases carry an instance or none do").
    pub fn add_name(&mut self, name: &str) {
        if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_owned());
        }
    }

    /// Whether this unit has no reason to stay resident: inactive, no
    /// pending job, no essential back-link, and its type doesn't opt out
    /// (spec §3 "candidates for collection", gc-queue semantics).
    pub fn is_gc_candidate(&self, has_essential_backlink: bool) -> bool {
        if self.kind.gc_exempt() {
            return false;
        }
        if self.job.is_some() {
            return false;
        }
        if !matches!(self.active_state(), ActiveState::Inactive | ActiveState::Failed) {
            return false;
        }
        !has_essential_backlink
    }

    pub fn start(&mut self) -> Result<(), UnitOperationError> {
        match &mut self.kind {
            UnitKind::Service(u) => u.start(),
            UnitKind::Socket(u) => u.start(),
            UnitKind::Target(u) => u.start(),
            UnitKind::Device(u) => u.start(),
            UnitKind::Mount(u) => u.start(),
            UnitKind::Automount(u) => u.start(),
            UnitKind::Snapshot(u) => u.start(),
            UnitKind::Swap(u) => u.start(),
            UnitKind::Timer(u) => u.start(),
            UnitKind::Path(u) => u.start(),
        }
    }

    pub fn stop(&mut self) -> Result<(), UnitOperationError> {
        match &mut self.kind {
            UnitKind::Service(u) => u.stop(),
            UnitKind::Socket(u) => u.stop(),
            UnitKind::Target(u) => u.stop(),
            UnitKind::Device(u) => u.stop(),
            UnitKind::Mount(u) => u.stop(),
            UnitKind::Automount(u) => u.stop(),
            UnitKind::Snapshot(u) => u.stop(),
            UnitKind::Swap(u) => u.stop(),
            UnitKind::Timer(u) => u.stop(),
            UnitKind::Path(u) => u.stop(),
        }
    }

    pub fn reload(&mut self) -> Result<(), UnitOperationError> {
        match &mut self.kind {
            UnitKind::Service(u) => u.reload(),
            UnitKind::Mount(u) => u.reload(),
            _ => Err(self.unsupported("reload")),
        }
    }

    pub fn kill(&mut self, who: KillWho, mode: KillMode, signal: i32) -> Result<(), UnitOperationError> {
        match &mut self.kind {
            UnitKind::Service(u) => u.kill(who, mode, signal),
            UnitKind::Mount(u) => u.kill(who, mode, signal),
            _ => Err(self.unsupported("kill")),
        }
    }

    fn unsupported(&self, op: &str) -> UnitOperationError {
        UnitOperationError {
            unit_name: self.id.name().to_owned(),
            unit_id: self.id.clone(),
            reason: match op {
                "kill" => crate::error::UnitOperationErrorReason::KillUnsupported,
                _ => crate::error::UnitOperationErrorReason::Unsupported,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_id_equality_is_by_name() {
        let a = UnitId::new("foo.service");
        let b = UnitId::new("foo.service");
        assert_eq!(a, b);
    }

    #[test]
    fn test_timestamps_record_inactive_to_active() {
        let mut ts = Timestamps::default();
        ts.record_transition(ActiveState::Inactive, ActiveState::Activating);
        assert!(ts.inactive_exit.is_some());
        assert!(ts.active_enter.is_none());
        ts.record_transition(ActiveState::Activating, ActiveState::Active);
        assert!(ts.active_enter.is_some());
    }

    #[test]
    fn test_gc_candidate_requires_no_job() {
        let mut unit = Unit::new_stub(
            UnitId::new("x.target"),
            UnitKind::Target(misc::TargetUnit::new()),
        );
        assert!(unit.is_gc_candidate(false));
        unit.job = Some(Job::new(1, UnitId::new("x.target"), crate::job::JobType::Start, crate::job::JobMode::Replace));
        assert!(!unit.is_gc_candidate(false));
    }
}
