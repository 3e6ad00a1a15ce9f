//! Checkpoint serialization for re-exec persistence (spec §4.J).
//!
//! No direct teacher precedent — the teacher never re-execs itself, so
//! nothing in it writes a checkpoint. Built in the key=value idiom the
//! teacher already uses for on-disk state elsewhere (`fragment`'s ini
//! parsing, `config.rs`'s `SYSTEMD_UNIT_PATH` handling) rather than pulling in
//! a serialization crate: the format spec §4.J names is line-oriented and
//! must stay diffable/greppable across re-exec for operators debugging a
//! stuck upgrade, which a length-prefixed or JSON blob would not be.
//!
//! One unit per record: a header line naming the unit, then `key=value`
//! lines, then a blank line separating records. Timestamps serialize as
//! `"<monotonic_usec> <realtime_usec>"` pairs; fds are hand off by the
//! integer index the caller attaches to the real `SCM_RIGHTS` transfer
//! (spec §4.J "fd-set handoff by integer index") — this module only carries
//! the index, never the fd itself.

use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::SerializeError;
use crate::job::{JobMode, JobType};
use crate::units::{ActiveState, Timestamps, UnitId};

/// One unit's checkpointed state (spec §4.J): active state, pending job (if
/// any), timestamps, and the fd indices it handed off for re-exec.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitCheckpoint {
    pub name: String,
    pub active_state: ActiveState,
    pub sub_state: String,
    pub job: Option<(JobType, JobMode)>,
    pub timestamps: Timestamps,
    pub fd_names: Vec<(String, u32)>,
}

/// Monotonic clock origin paired with the wall clock at the same instant, so
/// `SystemTime` timestamps recorded pre-re-exec can be expressed as the
/// monotonic-microseconds figure spec §4.J's format wants without this
/// process needing to have tracked a `std::time::Instant` the whole time.
#[derive(Debug, Clone, Copy)]
pub struct ClockAnchor {
    pub boot_realtime: SystemTime,
}

impl ClockAnchor {
    fn monotonic_usec_of(&self, t: SystemTime) -> Option<u64> {
        t.duration_since(self.boot_realtime).ok().map(|d| d.as_micros() as u64)
    }

    fn realtime_usec_of(t: SystemTime) -> Option<u64> {
        t.duration_since(UNIX_EPOCH).ok().map(|d| d.as_micros() as u64)
    }

    fn from_usec_pair(&self, monotonic_usec: u64, _realtime_usec: u64) -> SystemTime {
        self.boot_realtime + Duration::from_micros(monotonic_usec)
    }
}

fn write_timestamp(out: &mut String, key: &str, t: Option<SystemTime>, anchor: &ClockAnchor) {
    let (Some(mono), Some(real)) = (t.and_then(|t| anchor.monotonic_usec_of(t)), t.and_then(ClockAnchor::realtime_usec_of)) else {
        return;
    };
    out.push_str(key);
    out.push('=');
    out.push_str(&mono.to_string());
    out.push(' ');
    out.push_str(&real.to_string());
    out.push('\n');
}

fn parse_timestamp(value: &str) -> Result<(u64, u64), SerializeError> {
    let mut parts = value.split_whitespace();
    let mono: u64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SerializeError::Malformed(value.to_owned()))?;
    let real: u64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SerializeError::Malformed(value.to_owned()))?;
    Ok((mono, real))
}

fn active_state_name(s: ActiveState) -> &'static str {
    match s {
        ActiveState::Inactive => "inactive",
        ActiveState::Activating => "activating",
        ActiveState::Active => "active",
        ActiveState::Reloading => "reloading",
        ActiveState::Deactivating => "deactivating",
        ActiveState::Failed => "failed",
    }
}

fn active_state_from_name(s: &str) -> Result<ActiveState, SerializeError> {
    Ok(match s {
        "inactive" => ActiveState::Inactive,
        "activating" => ActiveState::Activating,
        "active" => ActiveState::Active,
        "reloading" => ActiveState::Reloading,
        "deactivating" => ActiveState::Deactivating,
        "failed" => ActiveState::Failed,
        other => return Err(SerializeError::Malformed(format!("unknown active-state {other:?}"))),
    })
}

fn job_type_name(t: JobType) -> &'static str {
    match t {
        JobType::VerifyActive => "verify-active",
        JobType::Start => "start",
        JobType::Stop => "stop",
        JobType::Reload => "reload",
        JobType::Restart => "restart",
        JobType::TryRestart => "try-restart",
        JobType::ReloadOrStart => "reload-or-start",
    }
}

fn job_type_from_name(s: &str) -> Result<JobType, SerializeError> {
    Ok(match s {
        "verify-active" => JobType::VerifyActive,
        "start" => JobType::Start,
        "stop" => JobType::Stop,
        "reload" => JobType::Reload,
        "restart" => JobType::Restart,
        "try-restart" => JobType::TryRestart,
        "reload-or-start" => JobType::ReloadOrStart,
        other => return Err(SerializeError::Malformed(format!("unknown job type {other:?}"))),
    })
}

fn job_mode_name(m: JobMode) -> &'static str {
    match m {
        JobMode::Replace => "replace",
        JobMode::ReplaceIrreversibly => "replace-irreversibly",
        JobMode::Fail => "fail",
        JobMode::Isolate => "isolate",
        JobMode::IgnoreRequirements => "ignore-requirements",
        JobMode::IgnoreDependencies => "ignore-dependencies",
    }
}

fn job_mode_from_name(s: &str) -> Result<JobMode, SerializeError> {
    Ok(match s {
        "replace" => JobMode::Replace,
        "replace-irreversibly" => JobMode::ReplaceIrreversibly,
        "fail" => JobMode::Fail,
        "isolate" => JobMode::Isolate,
        "ignore-requirements" => JobMode::IgnoreRequirements,
        "ignore-dependencies" => JobMode::IgnoreDependencies,
        other => return Err(SerializeError::Malformed(format!("unknown job mode {other:?}"))),
    })
}

/// Serialize one unit's checkpoint record: a name header, `key=value` lines,
/// then a blank separator line (spec §4.J).
pub fn serialize_unit(ckpt: &UnitCheckpoint, anchor: &ClockAnchor) -> String {
    let mut out = String::new();
    out.push_str(&ckpt.name);
    out.push('\n');
    out.push_str("active-state=");
    out.push_str(active_state_name(ckpt.active_state));
    out.push('\n');
    out.push_str("sub-state=");
    out.push_str(&ckpt.sub_state);
    out.push('\n');
    if let Some((kind, mode)) = ckpt.job {
        out.push_str(&format!("job-type={}\n", job_type_name(kind)));
        out.push_str(&format!("job-mode={}\n", job_mode_name(mode)));
    }
    write_timestamp(&mut out, "inactive-exit-timestamp", ckpt.timestamps.inactive_exit, anchor);
    write_timestamp(&mut out, "active-enter-timestamp", ckpt.timestamps.active_enter, anchor);
    write_timestamp(&mut out, "active-exit-timestamp", ckpt.timestamps.active_exit, anchor);
    write_timestamp(&mut out, "inactive-enter-timestamp", ckpt.timestamps.inactive_enter, anchor);
    for (name, index) in &ckpt.fd_names {
        out.push_str(&format!("fd-name={name} {index}\n"));
    }
    out.push('\n');
    out
}

/// Write a full checkpoint file: every unit's record, in the order given.
pub fn write_checkpoint<W: Write>(mut w: W, units: &[UnitCheckpoint], anchor: &ClockAnchor) -> Result<(), SerializeError> {
    for ckpt in units {
        w.write_all(serialize_unit(ckpt, anchor).as_bytes())?;
    }
    Ok(())
}

/// Parse a checkpoint file back into per-unit records (spec §4.J "restoring
/// `active_state`/`job.type`/all four timestamps exactly").
pub fn parse_checkpoint(content: &str, anchor: &ClockAnchor) -> Result<Vec<UnitCheckpoint>, SerializeError> {
    let mut units = Vec::new();
    let mut lines = content.lines().peekable();

    while let Some(name_line) = lines.next() {
        if name_line.trim().is_empty() {
            continue;
        }
        let name = name_line.to_owned();
        let mut active_state = ActiveState::Inactive;
        let mut sub_state = String::new();
        let mut job_type = None;
        let mut job_mode = None;
        let mut timestamps = Timestamps::default();
        let mut fd_names = Vec::new();

        for line in lines.by_ref() {
            if line.trim().is_empty() {
                break;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| SerializeError::Malformed(line.to_owned()))?;
            match key {
                "active-state" => active_state = active_state_from_name(value)?,
                "sub-state" => sub_state = value.to_owned(),
                "job-type" => job_type = Some(job_type_from_name(value)?),
                "job-mode" => job_mode = Some(job_mode_from_name(value)?),
                "inactive-exit-timestamp" => {
                    let (mono, real) = parse_timestamp(value)?;
                    timestamps.inactive_exit = Some(anchor.from_usec_pair(mono, real));
                }
                "active-enter-timestamp" => {
                    let (mono, real) = parse_timestamp(value)?;
                    timestamps.active_enter = Some(anchor.from_usec_pair(mono, real));
                }
                "active-exit-timestamp" => {
                    let (mono, real) = parse_timestamp(value)?;
                    timestamps.active_exit = Some(anchor.from_usec_pair(mono, real));
                }
                "inactive-enter-timestamp" => {
                    let (mono, real) = parse_timestamp(value)?;
                    timestamps.inactive_enter = Some(anchor.from_usec_pair(mono, real));
                }
                "fd-name" => {
                    let (fd_name, index) = value
                        .split_once(' ')
                        .ok_or_else(|| SerializeError::Malformed(line.to_owned()))?;
                    let index: u32 = index.parse().map_err(|_| SerializeError::Malformed(line.to_owned()))?;
                    fd_names.push((fd_name.to_owned(), index));
                }
                _ => return Err(SerializeError::Malformed(line.to_owned())),
            }
        }

        units.push(UnitCheckpoint {
            name,
            active_state,
            sub_state,
            job: job_type.zip(job_mode),
            timestamps,
            fd_names,
        });
    }

    Ok(units)
}

/// The `UnitId` a checkpoint record names, for the manager to look the unit
/// back up in the store after a re-exec.
pub fn checkpoint_unit_id(ckpt: &UnitCheckpoint) -> UnitId {
    UnitId::new(ckpt.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> ClockAnchor {
        ClockAnchor { boot_realtime: UNIX_EPOCH + Duration::from_secs(1_700_000_000) }
    }

    #[test]
    fn test_round_trip_active_state_and_job() {
        let anchor = anchor();
        let mut timestamps = Timestamps::default();
        timestamps.active_enter = Some(anchor.boot_realtime + Duration::from_secs(5));
        let ckpt = UnitCheckpoint {
            name: "foo.service".to_owned(),
            active_state: ActiveState::Active,
            sub_state: "running".to_owned(),
            job: Some((JobType::Start, JobMode::Replace)),
            timestamps,
            fd_names: vec![("connection".to_owned(), 3)],
        };
        let text = serialize_unit(&ckpt, &anchor);
        let parsed = parse_checkpoint(&text, &anchor).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "foo.service");
        assert_eq!(parsed[0].active_state, ActiveState::Active);
        assert_eq!(parsed[0].job, Some((JobType::Start, JobMode::Replace)));
        assert_eq!(parsed[0].fd_names, vec![("connection".to_owned(), 3)]);
        assert!(parsed[0].timestamps.active_enter.is_some());
    }

    #[test]
    fn test_round_trip_multiple_units() {
        let anchor = anchor();
        let a = UnitCheckpoint {
            name: "a.service".to_owned(),
            active_state: ActiveState::Active,
            sub_state: "running".to_owned(),
            job: None,
            timestamps: Timestamps::default(),
            fd_names: Vec::new(),
        };
        let b = UnitCheckpoint {
            name: "b.service".to_owned(),
            active_state: ActiveState::Inactive,
            sub_state: "dead".to_owned(),
            job: None,
            timestamps: Timestamps::default(),
            fd_names: Vec::new(),
        };
        let mut buf = Vec::new();
        write_checkpoint(&mut buf, &[a, b], &anchor).unwrap();
        let parsed = parse_checkpoint(std::str::from_utf8(&buf).unwrap(), &anchor).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].name, "b.service");
    }

    #[test]
    fn test_malformed_line_rejected() {
        let anchor = anchor();
        let err = parse_checkpoint("foo.service\nnotakeyvalue\n", &anchor).unwrap_err();
        assert!(matches!(err, SerializeError::Malformed(_)));
    }
}
