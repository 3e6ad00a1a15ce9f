//! The kernel's mount table (spec §4.F.3 "Out-of-band truth", §4.K, §6
//! `/proc/self/mountinfo`): parsed once per reconciliation pass and diffed
//! against the previous pass so mount units converge on reality even when
//! `mount(8)`/`umount(8)` ran outside this manager's control.
//!
//! No direct teacher precedent — `units/unit.rs`'s `is_already_mounted`
//! checked `/proc/mounts` ad hoc, one path at a time. This module instead
//! parses the whole table once per pass (`mountinfo`, which carries more
//! than `/proc/mounts`'s five fields but is what systemd itself reads for
//! the same "multiple mounts can stack on one path" reason) and hands back
//! a membership test plus a changed-paths diff, matching the field layout
//! `proc_pid_mountinfo(5)` documents.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::MountTableError;

/// One row of `/proc/self/mountinfo`, trimmed to the fields this manager
/// cares about (spec §4.F.4's automatic-link derivation: `where`, `what`,
/// `fstype`, `options`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTableEntry {
    pub where_: PathBuf,
    pub what: String,
    pub fstype: String,
    pub options: Vec<String>,
}

/// A parsed snapshot of the kernel's mount table, keyed by mountpoint.
/// Later entries in the file win on a repeated mountpoint (a later mount
/// stacked on the same path shadows the earlier one, matching kernel
/// mount-stacking order).
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    by_path: std::collections::HashMap<PathBuf, MountTableEntry>,
}

impl MountTable {
    /// Read and parse `/proc/self/mountinfo` (spec §4.K).
    pub fn read() -> Result<MountTable, MountTableError> {
        let content = std::fs::read_to_string("/proc/self/mountinfo")?;
        Ok(MountTable::parse(&content))
    }

    /// Parse mountinfo-formatted text. Malformed lines are logged and
    /// skipped rather than aborting the whole pass (spec §4.K "unknown lines
    /// skipped with a warning") — one bad row shouldn't blind the manager to
    /// every other mount's real state.
    pub fn parse(content: &str) -> MountTable {
        let mut table = MountTable::default();
        for line in content.lines() {
            match parse_line(line) {
                Ok(entry) => {
                    table.by_path.insert(entry.where_.clone(), entry);
                }
                Err(e) => warn!("mount_table: {e}"),
            }
        }
        table
    }

    pub fn is_mounted(&self, where_: &Path) -> bool {
        self.by_path.contains_key(where_)
    }

    pub fn entry(&self, where_: &Path) -> Option<&MountTableEntry> {
        self.by_path.get(where_)
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.by_path.keys()
    }

    /// Every path that gained or lost a mount between `self` (the previous
    /// pass) and `new` (the current one), for the manager to re-run
    /// `MountUnit::reconcile` against (spec §4.F.3's "one pass per
    /// mount-table change", I5 "converges within one event cycle").
    pub fn changed_paths(&self, new: &MountTable) -> Vec<PathBuf> {
        let mut changed: HashSet<PathBuf> = HashSet::new();
        for path in self.by_path.keys() {
            if !new.by_path.contains_key(path) {
                changed.insert(path.clone());
            }
        }
        for (path, entry) in &new.by_path {
            match self.by_path.get(path) {
                None => {
                    changed.insert(path.clone());
                }
                Some(prev) if prev != entry => {
                    changed.insert(path.clone());
                }
                _ => {}
            }
        }
        changed.into_iter().collect()
    }
}

/// One mountinfo row: `id parent major:minor root mountpoint options
/// [optional-fields...] - fstype source super-options`. The `-` separator
/// is mandatory and is what actually delimits the variable-length
/// optional-fields run from the three trailing fields.
fn parse_line(line: &str) -> Result<MountTableEntry, MountTableError> {
    let (pre, post) = line
        .split_once(" - ")
        .ok_or_else(|| MountTableError::Malformed(line.to_owned()))?;

    let pre_fields: Vec<&str> = pre.split_whitespace().collect();
    // id parent major:minor root mountpoint options [optional-fields...]
    if pre_fields.len() < 6 {
        return Err(MountTableError::Malformed(line.to_owned()));
    }
    let mountpoint = unescape_octal(pre_fields[4]);

    let post_fields: Vec<&str> = post.split_whitespace().collect();
    // fstype source super-options
    if post_fields.len() < 3 {
        return Err(MountTableError::Malformed(line.to_owned()));
    }
    let fstype = post_fields[0].to_owned();
    let source = unescape_octal(post_fields[1]);
    let options = post_fields[2].split(',').map(str::to_owned).collect();

    Ok(MountTableEntry { where_: PathBuf::from(mountpoint), what: source, fstype, options })
}

/// mountinfo escapes space, tab, newline and backslash as `\NNN` octal
/// (`proc_pid_mountinfo(5)`). Unrecognized escapes are passed through
/// verbatim rather than rejected — a best-effort decode is preferable to
/// losing the whole row over one odd escape.
fn unescape_octal(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b)) {
            let val = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(val);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scenario_line() {
        // spec §8 scenario 1.
        let line = "42 1 8:1 / /var ext4 rw,usrquota - ext4 /dev/sda1 rw,usrquota";
        let table = MountTable::parse(line);
        assert!(table.is_mounted(Path::new("/var")));
        let entry = table.entry(Path::new("/var")).unwrap();
        assert_eq!(entry.what, "/dev/sda1");
        assert_eq!(entry.fstype, "ext4");
        assert!(entry.options.iter().any(|o| o == "usrquota"));
    }

    #[test]
    fn test_parse_skips_malformed_line_but_keeps_others() {
        let content = "garbage line with no separator\n42 1 8:1 / / ext4 rw - ext4 /dev/sda1 rw";
        let table = MountTable::parse(content);
        assert!(table.is_mounted(Path::new("/")));
    }

    #[test]
    fn test_unescape_octal_space() {
        assert_eq!(unescape_octal(r"/mnt\040point"), "/mnt point");
    }

    #[test]
    fn test_changed_paths_detects_new_and_removed() {
        let before = MountTable::parse("42 1 8:1 / /a ext4 rw - ext4 /dev/sda1 rw");
        let after = MountTable::parse("43 1 8:2 / /b ext4 rw - ext4 /dev/sda2 rw");
        let changed = before.changed_paths(&after);
        assert!(changed.contains(&PathBuf::from("/a")));
        assert!(changed.contains(&PathBuf::from("/b")));
    }

    #[test]
    fn test_changed_paths_empty_when_identical() {
        let content = "42 1 8:1 / /a ext4 rw - ext4 /dev/sda1 rw";
        let before = MountTable::parse(content);
        let after = MountTable::parse(content);
        assert!(before.changed_paths(&after).is_empty());
    }
}
