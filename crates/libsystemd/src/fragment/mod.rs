//! Fragment file parsing (spec §4.C): turns one `.service`/`.mount`/...
//! file on disk into a type-specific config plus the common `[Unit]`/
//! `[Install]` dependency directives, ready to be wired into the store's
//! graph by `crate::manager`.

pub mod lexer;
pub mod loader;
pub mod specifier;
pub mod value;

pub use loader::{parse_install_section, parse_unit_section, ParsedInstallSection, ParsedUnitSection};

use std::time::{Duration, Instant};

use log::warn;

use crate::error::FragmentLoadError;
use crate::units::misc::{AutomountUnit, DeviceUnit, PathUnit, SnapshotUnit, SwapUnit, TargetUnit};
use crate::units::mount::{MountConfig, MountUnit};
use crate::units::service::{ExecCommand, ServiceConfig, ServiceRestart, ServiceType, ServiceUnit};
use crate::units::socket::{ListenEndpoint, SocketConfig, SocketUnit};
use crate::units::timer::{TimerConfig, TimerUnit};
use crate::units::{UnitKind, UnitType};
use lexer::{all_values, last_value, ParsedFile};
use value::CapabilitySet;

/// The result of loading one fragment: the type-specific behavior plus the
/// common directives every unit type shares (spec §4.C).
pub struct LoadedFragment {
    pub kind: UnitKind,
    pub unit_section: ParsedUnitSection,
    pub install_section: ParsedInstallSection,
}

/// Parse a fragment file's contents into a [`LoadedFragment`] for
/// `unit_name`. `unit_name`'s suffix selects which `[<Type>]` section is
/// consulted; unknown/missing type sections fall back to that type's
/// defaults (spec §4.C "a unit file with no type-specific section is still
/// a loadable unit using compiled-in defaults").
pub fn build(unit_name: &str, file: &ParsedFile, boot_instant: Instant) -> Result<LoadedFragment, FragmentLoadError> {
    let unit_type = crate::unit_name::to_type(unit_name)
        .ok_or_else(|| FragmentLoadError::Malformed(format!("unrecognized unit type for {unit_name}")))?;

    let unit_section = file.get("[Unit]").map(parse_unit_section).unwrap_or_default();
    let install_section = file.get("[Install]").map(parse_install_section).unwrap_or_default();

    let ctx = specifier::SpecifierContext { unit_name };
    let expand = |s: String| specifier::expand(&s, &ctx);

    let kind = match unit_type {
        UnitType::Service => UnitKind::Service(ServiceUnit::new(build_service_config(file, expand))),
        UnitType::Socket => UnitKind::Socket(SocketUnit::new(build_socket_config(file))),
        UnitType::Mount => UnitKind::Mount(MountUnit::new(build_mount_config(unit_name, file))),
        UnitType::Target => UnitKind::Target(TargetUnit::new()),
        UnitType::Device => UnitKind::Device(DeviceUnit::new()),
        UnitType::Automount => UnitKind::Automount(AutomountUnit::new()),
        UnitType::Snapshot => UnitKind::Snapshot(SnapshotUnit::new()),
        UnitType::Swap => UnitKind::Swap(build_swap(file)),
        UnitType::Timer => UnitKind::Timer(TimerUnit::new(build_timer_config(unit_name, file), boot_instant)),
        UnitType::Path => UnitKind::Path(PathUnit::new()),
    };

    Ok(LoadedFragment { kind, unit_section, install_section })
}

fn build_service_config(file: &ParsedFile, expand: impl Fn(String) -> String) -> ServiceConfig {
    let Some(section) = file.get("[Service]") else { return ServiceConfig::default() };

    let service_type = last_value(section, "TYPE").and_then(|v| match ServiceType::parse(&v) {
        Some(t) => Some(t),
        None => {
            warn!("unrecognized Type={v}, falling back to simple");
            None
        }
    });
    let restart = last_value(section, "RESTART").and_then(|v| match ServiceRestart::parse(&v) {
        Some(r) => Some(r),
        None => {
            warn!("unrecognized Restart={v}, falling back to no");
            None
        }
    });

    ServiceConfig {
        service_type,
        exec_start: parse_exec_lines(section, "EXECSTART", &expand),
        exec_start_pre: parse_exec_lines(section, "EXECSTARTPRE", &expand),
        exec_start_post: parse_exec_lines(section, "EXECSTARTPOST", &expand),
        exec_stop: parse_exec_lines(section, "EXECSTOP", &expand),
        exec_reload: parse_exec_lines(section, "EXECRELOAD", &expand),
        restart,
        restart_sec: last_value(section, "RESTARTSEC").and_then(|v| parse_duration(&v)).unwrap_or_default(),
        timeout_start: last_value(section, "TIMEOUTSTARTSEC").and_then(|v| parse_duration(&v)).unwrap_or_default(),
        timeout_stop: last_value(section, "TIMEOUTSTOPSEC").and_then(|v| parse_duration(&v)).unwrap_or_default(),
        send_sigkill: last_value(section, "SENDSIGKILL").map(|v| lexer::string_to_bool(&v)).unwrap_or(true),
        remain_after_exit: last_value(section, "REMAINAFTEREXIT").map(|v| lexer::string_to_bool(&v)).unwrap_or(false),
        capability_bounding_set: last_value(section, "CAPABILITYBOUNDINGSET").map(|v| CapabilitySet::parse(&v)),
        ..ServiceConfig::default()
    }
}

fn parse_exec_lines(section: &lexer::ParsedSection, key: &str, expand: impl Fn(String) -> String) -> Vec<ExecCommand> {
    section
        .get(key)
        .into_iter()
        .flatten()
        .filter_map(|(_, raw)| parse_one_exec_line(&expand(raw.clone())))
        .collect()
}

fn parse_one_exec_line(raw: &str) -> Option<ExecCommand> {
    let mut rest = raw.trim();
    let ignore_failure = rest.starts_with('-');
    if ignore_failure {
        rest = &rest[1..];
    }
    let mut parts = shlex::split(rest)?.into_iter();
    let first = parts.next()?;
    // `@path argv0 args...`: the token after an `@`-prefixed path is the
    // argv[0] override, not a regular argument (systemd.service(5) "Command
    // lines").
    let (path, argv0_override) = match first.strip_prefix('@') {
        Some(real_path) => (real_path.to_owned(), parts.next()),
        None => (first, None),
    };
    Some(ExecCommand { path, args: parts.collect(), ignore_failure, argv0_override })
}

fn build_socket_config(file: &ParsedFile) -> SocketConfig {
    let Some(section) = file.get("[Socket]") else { return SocketConfig::default() };
    let mut endpoints = Vec::new();
    endpoints.extend(all_values(section, "LISTENSTREAM").into_iter().map(ListenEndpoint::Stream));
    endpoints.extend(all_values(section, "LISTENDATAGRAM").into_iter().map(ListenEndpoint::Datagram));
    endpoints.extend(all_values(section, "LISTENSEQUENTIALPACKET").into_iter().map(ListenEndpoint::SequentialPacket));
    endpoints.extend(all_values(section, "LISTENFIFO").into_iter().map(|s| ListenEndpoint::Fifo(s.into())));
    SocketConfig {
        endpoints,
        accept: last_value(section, "ACCEPT").map(|v| lexer::string_to_bool(&v)).unwrap_or(false),
        backlog: last_value(section, "BACKLOG").and_then(|v| v.parse().ok()).unwrap_or(128),
        ..SocketConfig::default()
    }
}

fn build_mount_config(unit_name: &str, file: &ParsedFile) -> MountConfig {
    let name_prefix = unit_name.strip_suffix(".mount").unwrap_or(unit_name);
    let where_: std::path::PathBuf = crate::unit_name::to_path(name_prefix).unwrap_or_default().into();
    let Some(section) = file.get("[Mount]") else {
        return MountConfig { where_, ..MountConfig::default() };
    };
    MountConfig {
        what: last_value(section, "WHAT").unwrap_or_default(),
        where_,
        fstype: last_value(section, "TYPE"),
        options: last_value(section, "OPTIONS").map(|v| v.split(',').map(str::to_owned).collect()).unwrap_or_default(),
        sloppy_options: last_value(section, "SLOPPYOPTIONS").map(|v| lexer::string_to_bool(&v)).unwrap_or(false),
        ..MountConfig::default()
    }
}

fn build_swap(file: &ParsedFile) -> SwapUnit {
    let Some(section) = file.get("[Swap]") else { return SwapUnit::new(String::new()) };
    let mut swap = SwapUnit::new(last_value(section, "WHAT").unwrap_or_default());
    swap.priority = last_value(section, "PRIORITY").and_then(|v| v.parse().ok());
    swap.options = last_value(section, "OPTIONS").map(|v| v.split(',').map(str::to_owned).collect()).unwrap_or_default();
    swap
}

fn build_timer_config(unit_name: &str, file: &ParsedFile) -> TimerConfig {
    use crate::units::timer::TimerSpec;
    let Some(section) = file.get("[Timer]") else {
        return TimerConfig { unit: crate::units::UnitId::new(unit_name), ..TimerConfig::default() };
    };
    let mut specs = Vec::new();
    for (_, v) in section.get("ONBOOTSEC").into_iter().flatten() {
        if let Some(d) = parse_duration(v) {
            specs.push(TimerSpec::OnBootSec(d));
        }
    }
    for (_, v) in section.get("ONUNITACTIVESEC").into_iter().flatten() {
        if let Some(d) = parse_duration(v) {
            specs.push(TimerSpec::OnUnitActiveSec(d));
        }
    }
    for (_, v) in section.get("ONCALENDAR").into_iter().flatten() {
        specs.push(TimerSpec::OnCalendar(v.clone()));
    }
    TimerConfig { specs, unit: crate::units::UnitId::new(unit_name), persistent: false, wake_system: false }
}

fn parse_duration(v: &str) -> Option<Duration> {
    let trimmed = v.trim();
    if trimmed.eq_ignore_ascii_case("infinity") {
        return Some(Duration::MAX);
    }
    let numeric: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    numeric.parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_service_parses_exec_start() {
        let content = "[Service]\nExecStart=/bin/echo hi\n";
        let file = lexer::parse_file(content).unwrap();
        let loaded = build("foo.service", &file, Instant::now()).unwrap();
        match loaded.kind {
            UnitKind::Service(s) => {
                assert_eq!(s.config.exec_start.len(), 1);
                assert_eq!(s.config.exec_start[0].path, "/bin/echo");
                assert_eq!(s.config.exec_start[0].args, vec!["hi".to_owned()]);
            }
            _ => panic!("expected service"),
        }
    }

    #[test]
    fn test_build_mount_derives_where_from_name() {
        let content = "[Mount]\nWhat=/dev/sda1\nType=ext4\n";
        let file = lexer::parse_file(content).unwrap();
        let loaded = build("var-log.mount", &file, Instant::now()).unwrap();
        match loaded.kind {
            UnitKind::Mount(m) => assert_eq!(m.config.where_, std::path::PathBuf::from("/var/log")),
            _ => panic!("expected mount"),
        }
    }

    #[test]
    fn test_exec_start_ignore_failure_prefix() {
        let content = "[Service]\nExecStartPre=-/bin/false\n";
        let file = lexer::parse_file(content).unwrap();
        let loaded = build("foo.service", &file, Instant::now()).unwrap();
        match loaded.kind {
            UnitKind::Service(s) => assert!(s.config.exec_start_pre[0].ignore_failure),
            _ => panic!("expected service"),
        }
    }

    #[test]
    fn test_build_service_parses_type_restart_and_timeouts() {
        let content = "[Service]\nType=oneshot\nRestart=on-failure\nRestartSec=5\nTimeoutStartSec=30\nTimeoutStopSec=infinity\n";
        let file = lexer::parse_file(content).unwrap();
        let loaded = build("foo.service", &file, Instant::now()).unwrap();
        match loaded.kind {
            UnitKind::Service(s) => {
                assert_eq!(s.config.service_type, Some(ServiceType::Oneshot));
                assert_eq!(s.config.restart, Some(ServiceRestart::OnFailure));
                assert_eq!(s.config.restart_sec, Duration::from_secs(5));
                assert_eq!(s.config.timeout_start, Duration::from_secs(30));
                assert_eq!(s.config.timeout_stop, Duration::MAX);
            }
            _ => panic!("expected service"),
        }
    }

    #[test]
    fn test_build_service_parses_capability_bounding_set() {
        let content = "[Service]\nCapabilityBoundingSet=~CAP_SYS_ADMIN\n";
        let file = lexer::parse_file(content).unwrap();
        let loaded = build("foo.service", &file, Instant::now()).unwrap();
        match loaded.kind {
            UnitKind::Service(s) => {
                let caps = s.config.capability_bounding_set.expect("capability set parsed");
                assert!(caps.is_inverted());
                assert_eq!(caps.raw_names(), ["CAP_SYS_ADMIN".to_owned()]);
            }
            _ => panic!("expected service"),
        }
    }

    #[test]
    fn test_unrecognized_type_falls_back_to_default() {
        let content = "[Service]\nType=bogus\n";
        let file = lexer::parse_file(content).unwrap();
        let loaded = build("foo.service", &file, Instant::now()).unwrap();
        match loaded.kind {
            UnitKind::Service(s) => assert_eq!(s.config.service_type, None),
            _ => panic!("expected service"),
        }
    }

    #[test]
    fn test_unit_section_wants_parsed() {
        let content = "[Unit]\nWants=a.service\nAfter=a.service\n";
        let file = lexer::parse_file(content).unwrap();
        let loaded = build("foo.target", &file, Instant::now()).unwrap();
        assert_eq!(loaded.unit_section.wants, vec!["a.service".to_owned()]);
    }
}
