//! The D-Bus surface, contract only (spec §6 "D-Bus surface (contract
//! only)"): the interface name and invalidating-property list each unit
//! type would publish, with no bus connection behind it. Property
//! marshalling and method dispatch are out of scope (spec §1 Non-goals,
//! "the D-Bus introspection and property marshalling surface").
//!
//! No teacher precedent for a working bus remains in this crate — the
//! property lists below are grounded on `dbus-service.c`/`dbus-mount.c`/
//! `dbus-socket.c`/`dbus-swap.c` in `original_source/`, trimmed to the
//! properties those files mark `SD_BUS_VTABLE_PROPERTY_INVALIDATE`.

use crate::units::UnitKind;

/// One unit type's published interface: its well-known name plus the
/// properties that must emit a change signal when mutated.
pub struct InterfaceContract {
    pub name: &'static str,
    pub invalidating_properties: &'static [&'static str],
}

const SERVICE: InterfaceContract = InterfaceContract {
    name: "org.freedesktop.systemd1.Service",
    invalidating_properties: &["ExecStart", "ExecStop", "ExecReload", "ControlPID", "MainPID", "Result", "StatusText"],
};

const SOCKET: InterfaceContract = InterfaceContract {
    name: "org.freedesktop.systemd1.Socket",
    invalidating_properties: &["Listen", "ControlPID", "NConnections", "Result"],
};

const MOUNT: InterfaceContract = InterfaceContract {
    name: "org.freedesktop.systemd1.Mount",
    invalidating_properties: &["Where", "What", "Options", "Type", "ControlPID", "Result"],
};

const SWAP: InterfaceContract = InterfaceContract {
    name: "org.freedesktop.systemd1.Swap",
    invalidating_properties: &["What", "Priority", "Options", "ControlPID", "Result"],
};

const TIMER: InterfaceContract = InterfaceContract {
    name: "org.freedesktop.systemd1.Timer",
    invalidating_properties: &["NextElapseUSecRealtime", "NextElapseUSecMonotonic", "LastTriggerUSec", "Result"],
};

const TARGET: InterfaceContract =
    InterfaceContract { name: "org.freedesktop.systemd1.Target", invalidating_properties: &[] };

const DEVICE: InterfaceContract =
    InterfaceContract { name: "org.freedesktop.systemd1.Device", invalidating_properties: &["SysFSPath"] };

const AUTOMOUNT: InterfaceContract =
    InterfaceContract { name: "org.freedesktop.systemd1.Automount", invalidating_properties: &["Where", "Result"] };

const PATH: InterfaceContract =
    InterfaceContract { name: "org.freedesktop.systemd1.Path", invalidating_properties: &["Result"] };

const SNAPSHOT: InterfaceContract =
    InterfaceContract { name: "org.freedesktop.systemd1.Snapshot", invalidating_properties: &[] };

/// The interface contract a unit's kind would publish over D-Bus.
pub fn interface_for(kind: &UnitKind) -> &'static InterfaceContract {
    match kind {
        UnitKind::Service(_) => &SERVICE,
        UnitKind::Socket(_) => &SOCKET,
        UnitKind::Mount(_) => &MOUNT,
        UnitKind::Swap(_) => &SWAP,
        UnitKind::Timer(_) => &TIMER,
        UnitKind::Target(_) => &TARGET,
        UnitKind::Device(_) => &DEVICE,
        UnitKind::Automount(_) => &AUTOMOUNT,
        UnitKind::Path(_) => &PATH,
        UnitKind::Snapshot(_) => &SNAPSHOT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::mount::{MountConfig, MountUnit};

    #[test]
    fn test_mount_interface_names_where_and_what() {
        let kind = UnitKind::Mount(MountUnit::new(MountConfig::default()));
        let iface = interface_for(&kind);
        assert_eq!(iface.name, "org.freedesktop.systemd1.Mount");
        assert!(iface.invalidating_properties.contains(&"Where"));
        assert!(iface.invalidating_properties.contains(&"What"));
    }
}
