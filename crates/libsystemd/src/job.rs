//! The job engine (spec §4.G): enqueueing, merging, ordering and completing
//! work items against the dependency graph.
//!
//! No direct teacher precedent — the teacher calls `Unit::activate`/
//! `deactivate` straight from `service_manager.rs` rather than through a job
//! queue. Built fresh in the teacher's error/logging idiom (`log::trace!`
//! state chatter, `UnitOperationError` boundary type), using
//! `crate::relation::Graph` for transaction expansion and `crate::store`
//! for the unit map the transaction is built against.

use std::collections::{HashMap, HashSet};

use log::{debug, trace, warn};

use crate::relation::RelationKind;
use crate::store::UnitStore;
use crate::units::{ActiveState, UnitId};

/// Spec §3 "Job": `type ∈ {verify-active, start, stop, reload, restart,
/// try-restart, reload-or-start}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    VerifyActive,
    Start,
    Stop,
    Reload,
    Restart,
    TryRestart,
    ReloadOrStart,
}

impl JobType {
    /// Whether this job type behaves like a "start" for transaction
    /// expansion and cancellation purposes (spec §4.G step 1, §5
    /// "Cancellation" (c)).
    pub fn is_start_like(self) -> bool {
        matches!(self, JobType::Start | JobType::Restart | JobType::TryRestart | JobType::ReloadOrStart)
    }

    pub fn is_stop_like(self) -> bool {
        matches!(self, JobType::Stop)
    }

    /// Whether `active_state` satisfies this job (spec §4.G "Job
    /// completion"), used by `finish_and_invalidate`.
    pub fn is_satisfied_by(self, state: ActiveState) -> bool {
        match self {
            JobType::Start | JobType::Restart | JobType::TryRestart | JobType::ReloadOrStart => {
                state.is_active_or_reloading()
            }
            JobType::Stop => state.is_inactive_or_failed(),
            JobType::Reload => state == ActiveState::Active,
            JobType::VerifyActive => state == ActiveState::Active,
        }
    }

    /// Whether `active_state` contradicts this job outright (spec §4.G
    /// "Job completion": marked `failed`).
    pub fn is_contradicted_by(self, state: ActiveState) -> bool {
        match self {
            JobType::Start | JobType::Restart | JobType::TryRestart | JobType::ReloadOrStart => {
                state == ActiveState::Failed
            }
            JobType::Stop => false,
            JobType::Reload | JobType::VerifyActive => {
                matches!(state, ActiveState::Inactive | ActiveState::Failed)
            }
        }
    }
}

/// Spec §3 "Job": `mode ∈ {replace, fail, isolate, ignore-requirements, …}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    Replace,
    ReplaceIrreversibly,
    Fail,
    Isolate,
    IgnoreRequirements,
    IgnoreDependencies,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    Done,
    Failed,
    Canceled,
    Dependency,
}

/// A pending transition request on a unit (spec §3). Invariant I2: at most
/// one `Job` references a unit — enforced by `UnitStore` never setting
/// `Unit::job` to `Some` twice without going through `enqueue`'s merge/
/// supersede logic.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u64,
    pub unit: UnitId,
    pub kind: JobType,
    pub mode: JobMode,
    pub state: JobState,
}

impl Job {
    pub fn new(id: u64, unit: UnitId, kind: JobType, mode: JobMode) -> Job {
        Job { id, unit, kind, mode, state: JobState::Waiting }
    }
}

/// Why `enqueue` could not install a transaction (spec §4.G step 2/4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// `mode == fail` and a conflicting job would need to be cancelled.
    Conflict(UnitId),
    /// `mode == isolate` on a unit whose type doesn't `allow_isolate`.
    IsolateNotAllowed(UnitId),
    /// The transaction contains both a start-like and a stop-like job on
    /// the same unit with no way to reconcile them.
    Contradiction(UnitId),
}

/// Assigns monotonically increasing job ids; the engine itself is stateless
/// beyond this counter (spec §9 "Global mutable state": job bookkeeping
/// otherwise lives entirely on `Unit::job` / `UnitStore`).
#[derive(Debug, Default)]
pub struct JobEngine {
    next_id: u64,
}

impl JobEngine {
    pub fn new() -> JobEngine {
        JobEngine { next_id: 1 }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Expand a start-like job into the full transaction: the target plus
    /// everything reached by `requires`/`requires-overridable`/`wants`/
    /// `bind-to`/`requisite*` (spec §4.G step 1).
    fn expand_start_transaction(&self, store: &UnitStore, target: &UnitId) -> Vec<(UnitId, JobType)> {
        store
            .graph
            .transitive_closure(target)
            .into_iter()
            .map(|u| (u, JobType::Start))
            .collect()
    }

    /// `isolate` mode: start the target's transitive closure, stop every
    /// other currently-active unit not in it (spec §4.G "isolate").
    fn expand_isolate_transaction(&self, store: &UnitStore, target: &UnitId) -> Vec<(UnitId, JobType)> {
        let keep: HashSet<UnitId> = self.expand_start_transaction(store, target).into_iter().map(|(u, _)| u).collect();
        let mut txn: Vec<(UnitId, JobType)> = keep.iter().cloned().map(|u| (u, JobType::Start)).collect();
        for (id, unit) in store.iter() {
            if keep.contains(id) {
                continue;
            }
            if unit.policy.ignore_on_isolate {
                continue;
            }
            if unit.active_state().is_active_or_reloading() {
                txn.push((id.clone(), JobType::Stop));
            }
        }
        txn
    }

    /// Derive a run-order among the units in a transaction from `before`/
    /// `after` edges (spec §4.G step 3). Returns units sorted so that any
    /// unit listed as `after` another appears later; cycles are broken by
    /// leaving the relative order unchanged for the offending pair (spec
    /// doesn't mandate cycle detection here — `store::load` is where
    /// `-ELOOP` for symlink cycles is raised; ordering cycles are logged and
    /// ignored, matching systemd's own "sorted run queue, not a hard
    /// scheduler" behavior).
    fn order_transaction(&self, store: &UnitStore, txn: &[(UnitId, JobType)]) -> Vec<(UnitId, JobType)> {
        let members: HashSet<&UnitId> = txn.iter().map(|(u, _)| u).collect();
        let mut ordered = txn.to_vec();
        ordered.sort_by(|(a, _), (b, _)| {
            let a_after_b = store.graph.get(a, RelationKind::After).contains(b);
            let b_after_a = store.graph.get(b, RelationKind::After).contains(a);
            match (a_after_b, b_after_a) {
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                _ => a.cmp(b),
            }
        });
        ordered.retain(|(u, _)| members.contains(u));
        ordered
    }

    /// Check for transaction-level contradictions: conflicting start+stop
    /// jobs on the same unit (spec §4.G step 2).
    fn check_contradictions(&self, txn: &[(UnitId, JobType)]) -> Result<(), TransactionError> {
        let mut by_unit: HashMap<&UnitId, JobType> = HashMap::new();
        for (unit, kind) in txn {
            match by_unit.get(unit) {
                Some(existing) if existing.is_start_like() != kind.is_start_like() => {
                    return Err(TransactionError::Contradiction(unit.clone()));
                }
                _ => {
                    by_unit.insert(unit, *kind);
                }
            }
        }
        Ok(())
    }

    /// `manager_add_job` (spec §4.G): compute, validate and apply a
    /// transaction, installing one `Job` per affected unit.
    pub fn add_job(
        &mut self,
        store: &mut UnitStore,
        root_type: JobType,
        root: &UnitId,
        mode: JobMode,
    ) -> Result<u64, TransactionError> {
        if mode == JobMode::Isolate {
            let allows = store
                .get(root)
                .map(|u| u.policy.allow_isolate)
                .unwrap_or(false);
            if !allows {
                return Err(TransactionError::IsolateNotAllowed(root.clone()));
            }
        }

        let mut txn = if mode == JobMode::IgnoreRequirements || !root_type.is_start_like() {
            vec![(root.clone(), root_type)]
        } else if mode == JobMode::Isolate {
            self.expand_isolate_transaction(store, root)
        } else {
            self.expand_start_transaction(store, root)
        };

        // The explicit root job always wins over an incidentally-expanded
        // Start on the same unit (e.g. `systemctl stop foo` where foo is
        // also something else's dependency root).
        if !txn.iter().any(|(u, _)| u == root) {
            txn.push((root.clone(), root_type));
        } else {
            for entry in txn.iter_mut() {
                if entry.0 == *root {
                    entry.1 = root_type;
                }
            }
        }

        self.check_contradictions(&txn)?;

        if mode == JobMode::Fail {
            for (unit, _) in &txn {
                if let Some(existing) = store.get(unit).and_then(|u| u.job.as_ref())
                    && existing.unit != *root
                {
                    return Err(TransactionError::Conflict(unit.clone()));
                }
            }
        }

        let ordered = self.order_transaction(store, &txn);

        // Commit atomically: install every job before returning any error.
        let mut installed = Vec::new();
        let root_id = self.alloc_id();
        for (unit, kind) in &ordered {
            let job_id = if *unit == *root { root_id } else { self.alloc_id() };
            let job = Job::new(job_id, unit.clone(), *kind, mode);
            if let Some(u) = store.get_mut(unit) {
                trace!("job engine: installing {:?} job on {}", kind, unit);
                u.job = Some(job);
                u.queues.in_dbus_queue = true;
                installed.push(unit.clone());
            }
        }
        debug!("job engine: transaction for {} ({:?}/{:?}) touched {} units", root, root_type, mode, installed.len());
        Ok(root_id)
    }

    /// `job_finish_and_invalidate` (spec §4.F.1 step 2, §4.G "Job
    /// completion"): called from `notify` whenever a unit's `active_state`
    /// changes. Marks the pending job done/failed if the new state
    /// satisfies or contradicts it, and returns the outcome so the caller
    /// can wake waiters / re-evaluate `after`-successors.
    pub fn finish_and_invalidate(&mut self, store: &mut UnitStore, unit: &UnitId, new_state: ActiveState) -> Option<JobResult> {
        let job = store.get(unit)?.job.clone()?;

        let result = if job.kind.is_satisfied_by(new_state) {
            Some(JobResult::Done)
        } else if job.kind.is_contradicted_by(new_state) {
            Some(JobResult::Failed)
        } else {
            None
        };

        if let Some(result) = result {
            debug!("job engine: job {} on {} finished: {:?}", job.id, unit, result);
            if let Some(u) = store.get_mut(unit) {
                u.job = None;
            }
        }
        result
    }

    /// Cancellation path (spec §5 "Cancellation" (b)/(c)): drop the pending
    /// job without regard to its state, used when a unit becomes
    /// `merged`/`error`/`masked`.
    pub fn cancel(&mut self, store: &mut UnitStore, unit: &UnitId) {
        if let Some(u) = store.get_mut(unit)
            && u.job.take().is_some()
        {
            trace!("job engine: cancelled pending job on {unit}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{Unit, UnitKind};
    use crate::units::misc::TargetUnit;

    fn store_with_chain() -> UnitStore {
        let mut store = UnitStore::new();
        let a = UnitId::new("a.target");
        let b = UnitId::new("b.service");
        let c = UnitId::new("c.service");
        store.insert(Unit::new_stub(a.clone(), UnitKind::Target(TargetUnit::new())));
        store.insert(Unit::new_stub(b.clone(), UnitKind::Target(TargetUnit::new())));
        store.insert(Unit::new_stub(c.clone(), UnitKind::Target(TargetUnit::new())));
        store.graph.add_edge(a.clone(), b.clone(), RelationKind::Requires);
        store.graph.add_edge(b.clone(), c.clone(), RelationKind::Wants);
        store
    }

    #[test]
    fn test_start_expands_transitive_requirements() {
        let mut store = store_with_chain();
        let mut engine = JobEngine::new();
        engine
            .add_job(&mut store, JobType::Start, &UnitId::new("a.target"), JobMode::Replace)
            .unwrap();
        assert!(store.get(&UnitId::new("a.target")).unwrap().job.is_some());
        assert!(store.get(&UnitId::new("b.service")).unwrap().job.is_some());
        assert!(store.get(&UnitId::new("c.service")).unwrap().job.is_some());
    }

    #[test]
    fn test_single_active_job_invariant() {
        let mut store = store_with_chain();
        let mut engine = JobEngine::new();
        engine
            .add_job(&mut store, JobType::Start, &UnitId::new("a.target"), JobMode::Replace)
            .unwrap();
        let first = store.get(&UnitId::new("a.target")).unwrap().job.clone().unwrap().id;
        engine
            .add_job(&mut store, JobType::Stop, &UnitId::new("a.target"), JobMode::Replace)
            .unwrap();
        let second = store.get(&UnitId::new("a.target")).unwrap().job.clone().unwrap();
        assert_ne!(first, second.id);
        assert_eq!(second.kind, JobType::Stop);
    }

    #[test]
    fn test_isolate_rejected_without_allow_isolate() {
        let mut store = store_with_chain();
        let mut engine = JobEngine::new();
        let err = engine
            .add_job(&mut store, JobType::Start, &UnitId::new("a.target"), JobMode::Isolate)
            .unwrap_err();
        assert_eq!(err, TransactionError::IsolateNotAllowed(UnitId::new("a.target")));
    }

    #[test]
    fn test_finish_and_invalidate_on_satisfied_start() {
        let mut store = store_with_chain();
        let mut engine = JobEngine::new();
        engine
            .add_job(&mut store, JobType::Start, &UnitId::new("a.target"), JobMode::Replace)
            .unwrap();
        let result = engine.finish_and_invalidate(&mut store, &UnitId::new("a.target"), ActiveState::Active);
        assert_eq!(result, Some(JobResult::Done));
        assert!(store.get(&UnitId::new("a.target")).unwrap().job.is_none());
    }
}
