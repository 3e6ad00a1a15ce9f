//! Cgroup bookkeeping, contract only (spec §1 Non-goals, "the cgroup
//! bookkeeping (`cgroup_bonding_*`)"): the path convention a unit's cgroup
//! would live at, with no realization against `/sys/fs/cgroup` behind it.
//! Actually creating/removing the cgroup and migrating pids into it is left
//! to the external collaborator this module names the contract for.
//!
//! No teacher precedent remains in this crate — `Unit::cgroup_path` (spec
//! §3 "cgroup bindings") is populated by [`path_for`] below, grounded on
//! `cgroup.c`'s `cg_bonding_realize`, which derives a unit's control group
//! path from its escaped name under the named hierarchy the manager itself
//! runs in.

use crate::units::UnitId;

/// Where a unit's cgroup would live under the unified hierarchy, by
/// convention (`<slice>.slice/<unit>`), without creating it. Unit names are
/// already valid single path components (the name grammar forbids `/`), so
/// no further escaping is needed here.
pub fn path_for(id: &UnitId) -> String {
    format!("system.slice/{}", id.name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_for_names_unit_under_system_slice() {
        let id = UnitId::new("getty@tty1.service");
        assert_eq!(path_for(&id), "system.slice/getty@tty1.service");
    }
}
