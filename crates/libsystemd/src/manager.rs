//! The manager (spec §4.D/§4.F/§4.G): glues the unit store, job engine,
//! fragment loader and mount table into the single object the event loop
//! drives each iteration.
//!
//! No direct teacher file — the teacher wired `RuntimeInfo` (a bare
//! `HashMap` behind an `Arc<RwLock<_>>`) straight into each thread's
//! closure. This module takes over that glue role for the single-threaded
//! design spec §5 mandates, built in the teacher's own logging/error idiom
//! (`log::{trace,debug,warn}`, a `std::error::Error` enum per fallible
//! entrypoint) around the already self-contained collaborators
//! (`store::UnitStore`, `job::JobEngine`,
//! `fragment::build`/`loader`, `mount_table::MountTable`).

use std::time::Instant;

use log::{debug, trace, warn};

use crate::conditions::evaluate_all;
use crate::config::Config;
use crate::error::FragmentLoadError;
use crate::fragment::{self, loader};
use crate::job::{JobEngine, JobMode, JobResult, JobType, TransactionError};
use crate::mount_table::MountTable;
use crate::relation::RelationKind;
use crate::store::UnitStore;
use crate::units::mount::MountUnit;
use crate::units::{ActiveState, Unit, UnitId, UnitKind};

/// The manager's top-level state (spec §4.D): everything the event loop
/// needs a mutable handle to each iteration.
pub struct Manager {
    pub store: UnitStore,
    pub job_engine: JobEngine,
    pub config: Config,
    pub mount_table: MountTable,
    boot_instant: Instant,
}

impl Manager {
    pub fn new(config: Config) -> Manager {
        Manager {
            store: UnitStore::new(),
            job_engine: JobEngine::new(),
            config,
            mount_table: MountTable::default(),
            boot_instant: Instant::now(),
        }
    }

    /// `manager_load_unit` (spec §4.C/§4.D): resolve `name`'s fragment from
    /// the search path, parse it, and wire its `[Unit]`/`[Install]`
    /// dependency directives into the graph. Idempotent: calling this again
    /// on an already-`Loaded` unit is a no-op that just returns its id.
    pub fn load_unit(&mut self, name: &str) -> Result<UnitId, FragmentLoadError> {
        if let Some(id) = self.store.resolve(name)
            && matches!(self.store.get(&id).map(|u| u.load_state), Some(crate::units::LoadState::Loaded))
        {
            return Ok(id);
        }

        let resolved = loader::resolve(&self.config, name)?;
        let id = UnitId::new(name);

        let Some(file) = loader::load(&resolved.path)? else {
            // spec §4.C "an empty file or a file that is the null-device
            // marks the unit as masked". A masked unit still needs a store
            // entry so jobs against it resolve to a definite -EBADR-style
            // rejection rather than "not found".
            if self.store.get(&id).is_none() {
                self.store.insert(Unit::new_stub(id.clone(), UnitKind::Target(crate::units::misc::TargetUnit::new())));
            }
            let unit = self.store.get_mut(&id).expect("just inserted");
            unit.load_state = crate::units::LoadState::Masked;
            unit.fragment_path = Some(resolved.path);
            debug!("manager: {name} is masked");
            return Ok(id);
        };

        let loaded = fragment::build(name, &file, self.boot_instant)?;

        if self.store.get(&id).is_none() {
            self.store.insert(Unit::new_stub(id.clone(), loaded.kind));
        } else if let Some(unit) = self.store.get_mut(&id) {
            unit.kind = loaded.kind;
        }

        for alias in &resolved.aliases {
            self.store.register_alias(&id, alias);
        }

        let unit = self.store.get_mut(&id).expect("just inserted");
        unit.load_state = crate::units::LoadState::Loaded;
        unit.fragment_path = Some(resolved.path);
        unit.description = loaded.unit_section.description.clone();
        unit.documentation = loaded.unit_section.documentation.clone();
        unit.policy.default_dependencies = loaded.unit_section.default_dependencies;
        unit.policy.allow_isolate = loaded.unit_section.allow_isolate;
        unit.policy.stop_when_unneeded = loaded.unit_section.stop_when_unneeded;
        unit.policy.refuse_manual_start = loaded.unit_section.refuse_manual_start;
        unit.policy.refuse_manual_stop = loaded.unit_section.refuse_manual_stop;
        unit.on_failure_units = loaded.unit_section.on_failure.iter().map(|n| UnitId::new(n.clone())).collect();

        self.wire_dependencies(&id, &loaded.unit_section, &loaded.install_section);
        debug!("manager: loaded {name}");
        Ok(id)
    }

    /// Apply a fragment's dependency directives as graph edges, creating
    /// stub units for any peer not yet known (spec §4.D "load on demand").
    fn wire_dependencies(&mut self, id: &UnitId, unit_section: &loader::ParsedUnitSection, install_section: &loader::ParsedInstallSection) {
        let mut add = |store: &mut UnitStore, names: &[String], kind: RelationKind, forward: bool| {
            for name in names {
                let peer = store.get_or_create(name, default_kind_for(name));
                if forward {
                    store.graph.add_edge(id.clone(), peer, kind);
                } else {
                    store.graph.add_edge(peer, id.clone(), kind);
                }
            }
        };

        add(&mut self.store, &unit_section.wants, RelationKind::Wants, true);
        add(&mut self.store, &unit_section.requires, RelationKind::Requires, true);
        add(&mut self.store, &unit_section.requisite, RelationKind::Requisite, true);
        add(&mut self.store, &unit_section.binds_to, RelationKind::BindTo, true);
        add(&mut self.store, &unit_section.conflicts, RelationKind::Conflicts, true);
        add(&mut self.store, &unit_section.before, RelationKind::Before, true);
        add(&mut self.store, &unit_section.after, RelationKind::After, true);
        add(&mut self.store, &unit_section.references, RelationKind::References, true);
        // `WantedBy=`/`RequiredBy=` in `[Install]` declare the inverse
        // direction: the named unit wants/requires *this* one.
        add(&mut self.store, &install_section.wanted_by, RelationKind::Wants, false);
        add(&mut self.store, &install_section.required_by, RelationKind::Requires, false);
    }

    /// Drain the load queue, resolving and parsing every freshly-inserted
    /// stub (spec §4.I "load queue"). Units whose fragment can't be found
    /// are marked `error` rather than propagating the failure — a missing
    /// unit file is routine (e.g. optional `Wants=` targets) and must not
    /// abort the whole pass.
    pub fn process_load_queue(&mut self) {
        while let Some(id) = self.store.pop_load() {
            if self.store.get(&id).map(|u| u.load_state) != Some(crate::units::LoadState::Stub) {
                continue;
            }
            match self.load_unit(id.name()) {
                Ok(_) => {}
                Err(e) => {
                    warn!("manager: failed to load {id}: {e}");
                    if let Some(u) = self.store.get_mut(&id) {
                        u.load_state = crate::units::LoadState::Error;
                        u.load_error = Some(e.to_string());
                    }
                }
            }
        }
    }

    /// `manager_add_job` entry point for external callers (CLI/D-Bus stand-
    /// ins): load the unit on demand, check its conditions (spec §4.B) for
    /// start-like jobs, then hand off to the job engine.
    pub fn enqueue(&mut self, name: &str, kind: JobType, mode: JobMode) -> Result<u64, EnqueueError> {
        let id = self.load_unit(name)?;
        self.process_load_queue();

        if kind.is_start_like()
            && let Some(unit) = self.store.get(&id)
            && !evaluate_all(&unit.conditions)
        {
            trace!("manager: {name} conditions not met, skipping start");
            return Err(EnqueueError::ConditionsNotMet);
        }

        self.job_engine.add_job(&mut self.store, kind, &id, mode).map_err(EnqueueError::Transaction)
    }

    /// Actually invoke a unit's `start`/`stop`/`reload` per its installed
    /// job (spec §4.G "Job dispatch"): every unit with a `Waiting` job and
    /// no job still running on a dependency it's ordered `after` is given
    /// its verb call. This is the one place `Unit::start`/`stop`/`reload`
    /// are invoked from the manager side.
    pub fn dispatch_jobs(&mut self) {
        let ready: Vec<UnitId> = self
            .store
            .iter()
            .filter_map(|(id, u)| {
                let job = u.job.as_ref()?;
                (job.state == crate::job::JobState::Waiting).then(|| id.clone())
            })
            .collect();

        for id in ready {
            let blocked = self
                .store
                .graph
                .get(&id, RelationKind::After)
                .iter()
                .any(|dep| self.store.get(dep).is_some_and(|d| d.job.is_some()));
            if blocked {
                continue;
            }

            let Some(unit) = self.store.get_mut(&id) else { continue };
            let Some(job) = unit.job.clone() else { continue };
            unit.job.as_mut().unwrap().state = crate::job::JobState::Running;

            let old = unit.active_state();
            let result = if job.kind.is_start_like() {
                unit.start()
            } else if job.kind.is_stop_like() {
                unit.stop()
            } else if job.kind == JobType::Reload {
                unit.reload()
            } else {
                Ok(())
            };
            if let Err(e) = result {
                warn!("manager: job dispatch for {id} failed: {e}");
            }
            let new = self.store.get(&id).map(|u| u.active_state()).unwrap_or(old);
            self.notify(&id, old, new);
        }
    }

    /// `notify(old, new, reload_ok)` (spec §4.F.1): the single place a
    /// unit's observed `active_state` transition is processed, called after
    /// every verb dispatch, child-exit observation, and mount-table
    /// reconciliation.
    pub fn notify(&mut self, id: &UnitId, old: ActiveState, new: ActiveState) {
        // (1) timestamps, unconditionally, even when old == new.
        if let Some(u) = self.store.get_mut(id) {
            u.timestamps.record_transition(old, new);
        }

        // (2) job finish-and-invalidate.
        let job_result = self.job_engine.finish_and_invalidate(&mut self.store, id, new);

        // (3) retroactive coupling (spec §4.G): a unit entering `active`
        // pulls in anything it `binds-to`/`requires` that isn't already
        // active; a unit entering inactive/failed stops anything that
        // `binds-to` it (bind-to is the strict, fate-sharing relation).
        if matches!(new, ActiveState::Active | ActiveState::Reloading) && !old.is_active_or_reloading() {
            let deps: Vec<UnitId> = self
                .store
                .graph
                .get(id, RelationKind::Requires)
                .iter()
                .chain(self.store.graph.get(id, RelationKind::BindTo))
                .cloned()
                .collect();
            for dep in deps {
                if self.store.get(&dep).is_some_and(|u| !u.active_state().is_active_or_reloading() && u.job.is_none()) {
                    trace!("manager: retroactively starting {dep} for {id}");
                    let _ = self.job_engine.add_job(&mut self.store, JobType::Start, &dep, JobMode::Replace);
                }
            }
        }
        if new.is_inactive_or_failed() && !old.is_inactive_or_failed() {
            let bound: Vec<UnitId> = self.store.graph.get(id, RelationKind::BoundBy).to_vec();
            for dependent in bound {
                if self.store.get(&dependent).is_some_and(|u| u.active_state().is_active_or_reloading()) {
                    trace!("manager: {id} stopped, stopping bound dependent {dependent}");
                    let _ = self.job_engine.add_job(&mut self.store, JobType::Stop, &dependent, JobMode::Replace);
                }
            }
        }

        // (4) on-failure triggering.
        if new == ActiveState::Failed && old != ActiveState::Failed {
            let targets = self.store.get(id).map(|u| u.on_failure_units.clone()).unwrap_or_default();
            for target in targets {
                trace!("manager: {id} failed, triggering OnFailure= target {target}");
                let _ = self.job_engine.add_job(&mut self.store, JobType::Start, &target, JobMode::Replace);
            }
        }

        // (5) side-effect notification: dbus queue insertion is the only
        // observable side channel this crate implements (spec §4.I); a real
        // bus connection is out of scope (see `crate::control`).
        self.store.enqueue_dbus(id);

        // (6) stop-when-unneeded: a unit that just lost its last essential
        // back-link and opted into `StopWhenUnneeded=` gets a stop job.
        if new.is_active_or_reloading()
            && let Some(unit) = self.store.get(id)
            && unit.policy.stop_when_unneeded
            && !self.store.has_essential_backlink(id)
        {
            trace!("manager: {id} is unneeded, stopping");
            let _ = self.job_engine.add_job(&mut self.store, JobType::Stop, id, JobMode::Replace);
        }

        // (7) gc queue insertion for anything that might now be collectible.
        if new.is_inactive_or_failed() {
            self.store.enqueue_gc(id);
        }

        if let Some(result) = job_result {
            debug!("manager: job on {id} finished: {result:?}");
            if result == JobResult::Failed {
                self.notify(id, new, new);
            }
        }
    }

    /// SIGCHLD observation (spec §4.H): find whichever unit was tracking
    /// `pid` (service main/control pid, or a mount/swap control process)
    /// and feed it the exit verdict, then run `notify` on the resulting
    /// transition.
    pub fn on_child_exit(&mut self, pid: nix::unistd::Pid, success: bool) {
        let mut hit: Option<(UnitId, ActiveState, ActiveState)> = None;
        for (id, unit) in self.store.iter_mut() {
            let old = unit.active_state();
            let matched = match &mut unit.kind {
                UnitKind::Service(s) => {
                    let was_tracked = s.main_pid == Some(pid) || s.control_pid == Some(pid);
                    if was_tracked {
                        s.on_child_exit(pid, success);
                    }
                    was_tracked
                }
                UnitKind::Mount(m) => {
                    let was_tracked = m.control_pid == Some(pid);
                    if was_tracked {
                        m.on_child_exit(success);
                    }
                    was_tracked
                }
                UnitKind::Swap(s) => {
                    // Swap has no direct pid field modeled; swapon/swapoff
                    // are short-lived helpers reaped synchronously by
                    // `exec_spawn`'s caller, so only the success bit matters.
                    let _ = s;
                    false
                }
                _ => false,
            };
            if matched {
                hit = Some((id.clone(), old, unit.active_state()));
                break;
            }
        }
        if let Some((id, old, new)) = hit {
            self.notify(&id, old, new);
        }
    }

    /// Mount-table reconciliation pass (spec §4.F.3/§4.K, I5 "converges
    /// within one event cycle"): re-read `/proc/self/mountinfo`, diff
    /// against the previous snapshot, and reconcile every changed mount
    /// unit against the new truth.
    pub fn reconcile_mounts(&mut self) -> Result<(), crate::error::MountTableError> {
        let new_table = MountTable::read()?;
        let changed = self.mount_table.changed_paths(&new_table);
        if changed.is_empty() {
            self.mount_table = new_table;
            return Ok(());
        }

        let mut transitions = Vec::new();
        for (id, unit) in self.store.iter_mut() {
            let UnitKind::Mount(m) = &mut unit.kind else { continue };
            if !changed.contains(&m.config.where_) {
                continue;
            }
            let old = m.active_state();
            let is_mounted = new_table.is_mounted(&m.config.where_);
            if reconcile_with_new_table(m, is_mounted) {
                transitions.push((id.clone(), old, m.active_state()));
            }
        }
        self.mount_table = new_table;
        for (id, old, new) in transitions {
            self.notify(&id, old, new);
        }
        Ok(())
    }

    /// Run the gc and cleanup passes (spec §3/§4.I).
    pub fn run_queues(&mut self) {
        self.store.run_gc_pass();
        self.store.run_cleanup_pass();
    }
}

fn reconcile_with_new_table(m: &mut MountUnit, is_mounted: bool) -> bool {
    m.reconcile(is_mounted)
}

/// Every fragment-declared peer name is instantiated as a stub of its own
/// suffix-derived type (spec §4.A `to_type`); unrecognized suffixes fall
/// back to a target stub, matching systemd's own "treat it as a dependency
/// marker" behavior for names it can't otherwise classify.
fn default_kind_for(name: &str) -> impl FnOnce() -> UnitKind + '_ {
    move || match crate::unit_name::to_type(name) {
        Some(crate::unit_name::UnitType::Service) => UnitKind::Service(crate::units::service::ServiceUnit::new(Default::default())),
        Some(crate::unit_name::UnitType::Socket) => UnitKind::Socket(crate::units::socket::SocketUnit::new(Default::default())),
        Some(crate::unit_name::UnitType::Mount) => UnitKind::Mount(MountUnit::new(Default::default())),
        Some(crate::unit_name::UnitType::Device) => UnitKind::Device(crate::units::misc::DeviceUnit::new()),
        Some(crate::unit_name::UnitType::Automount) => UnitKind::Automount(crate::units::misc::AutomountUnit::new()),
        Some(crate::unit_name::UnitType::Snapshot) => UnitKind::Snapshot(crate::units::misc::SnapshotUnit::new()),
        Some(crate::unit_name::UnitType::Swap) => UnitKind::Swap(crate::units::misc::SwapUnit::new(String::new())),
        Some(crate::unit_name::UnitType::Timer) => {
            UnitKind::Timer(crate::units::timer::TimerUnit::new(Default::default(), Instant::now()))
        }
        Some(crate::unit_name::UnitType::Path) => UnitKind::Path(crate::units::misc::PathUnit::new()),
        _ => UnitKind::Target(crate::units::misc::TargetUnit::new()),
    }
}

#[derive(Debug)]
pub enum EnqueueError {
    Load(FragmentLoadError),
    ConditionsNotMet,
    Transaction(TransactionError),
}

impl From<FragmentLoadError> for EnqueueError {
    fn from(e: FragmentLoadError) -> EnqueueError {
        EnqueueError::Load(e)
    }
}

impl std::fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnqueueError::Load(e) => write!(f, "{e}"),
            EnqueueError::ConditionsNotMet => write!(f, "unit conditions not met"),
            EnqueueError::Transaction(e) => write!(f, "{e:?}"),
        }
    }
}

impl std::error::Error for EnqueueError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_unit(dir: &std::path::Path, name: &str, content: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_unit_wires_wants_edge() {
        let dir = tempfile::tempdir().unwrap();
        write_unit(dir.path(), "a.target", "[Unit]\nWants=b.target\n");
        write_unit(dir.path(), "b.target", "[Unit]\n");
        let mut config = Config::default_for_test();
        config.unit_dirs = vec![dir.path().to_path_buf()];
        let mut manager = Manager::new(config);

        let a = manager.load_unit("a.target").unwrap();
        manager.process_load_queue();

        assert!(manager.store.graph.get(&a, RelationKind::Wants).iter().any(|u| u.name() == "b.target"));
        assert_eq!(manager.store.get(&UnitId::new("b.target")).unwrap().load_state, crate::units::LoadState::Loaded);
    }

    #[test]
    fn test_enqueue_and_dispatch_starts_target() {
        let dir = tempfile::tempdir().unwrap();
        write_unit(dir.path(), "a.target", "[Unit]\n");
        let mut config = Config::default_for_test();
        config.unit_dirs = vec![dir.path().to_path_buf()];
        let mut manager = Manager::new(config);

        manager.enqueue("a.target", JobType::Start, JobMode::Replace).unwrap();
        manager.dispatch_jobs();

        let unit = manager.store.get(&UnitId::new("a.target")).unwrap();
        assert_eq!(unit.active_state(), ActiveState::Active);
        assert!(unit.job.is_none());
    }

    #[test]
    fn test_missing_fragment_marks_error_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_unit(dir.path(), "a.target", "[Unit]\nWants=missing.service\n");
        let mut config = Config::default_for_test();
        config.unit_dirs = vec![dir.path().to_path_buf()];
        let mut manager = Manager::new(config);

        manager.load_unit("a.target").unwrap();
        manager.process_load_queue();

        let missing = manager.store.resolve("missing.service").unwrap();
        assert_eq!(manager.store.get(&missing).unwrap().load_state, crate::units::LoadState::Error);
    }
}
