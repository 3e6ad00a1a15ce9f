//! Condition evaluator (spec §4.B).
//!
//! A condition is `(kind, parameter, trigger, negate)`. `|` as the first
//! character of a `ConditionXxx=`/`AssertXxx=` value marks it as a *trigger*
//! condition; `!` (which must come after `|`, if present) negates the raw
//! result. Evaluation over the full list:
//!
//! - No trigger condition present → passes iff every condition passes.
//! - At least one trigger condition present → passes iff every non-trigger
//!   condition passes *and* at least one trigger condition passes.
//!
//! Matches `load-fragment.c`'s `config_parse_unit_condition_path` family and
//! `unit.c`'s `unit_condition_test` loop.

use log::{debug, trace};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    PathExists,
    PathIsDirectory,
    DirectoryNotEmpty,
    KernelCommandLine,
    Virtualization,
    Security,
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub kind: ConditionKind,
    pub parameter: String,
    pub trigger: bool,
    pub negate: bool,
}

impl Condition {
    /// Parse a `ConditionXxx=`/`AssertXxx=` value: optional `|` (trigger)
    /// then optional `!` (negate), then the parameter. `|` must precede `!`.
    pub fn parse(kind: ConditionKind, raw: &str) -> Condition {
        let mut rest = raw;
        let mut trigger = false;
        let mut negate = false;

        if let Some(stripped) = rest.strip_prefix('|') {
            trigger = true;
            rest = stripped;
        }
        if let Some(stripped) = rest.strip_prefix('!') {
            negate = true;
            rest = stripped;
        }

        Condition {
            kind,
            parameter: rest.to_owned(),
            trigger,
            negate,
        }
    }

    /// Evaluate this condition's raw predicate (before `negate` is applied).
    fn raw_result(&self) -> bool {
        match self.kind {
            ConditionKind::PathExists => Path::new(&self.parameter).exists(),
            ConditionKind::PathIsDirectory => Path::new(&self.parameter).is_dir(),
            ConditionKind::DirectoryNotEmpty => std::fs::read_dir(&self.parameter)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false),
            ConditionKind::KernelCommandLine => kernel_cmdline_has(&self.parameter),
            ConditionKind::Virtualization => detected_virtualization()
                .map(|v| v.eq_ignore_ascii_case(&self.parameter))
                .unwrap_or(false),
            ConditionKind::Security => security_module_enabled(&self.parameter),
            ConditionKind::Null => !self.parameter.is_empty() && self.parameter != "0",
        }
    }

    /// The final boolean result: raw result XORed with `negate`.
    pub fn evaluate(&self) -> bool {
        let raw = self.raw_result();
        let result = raw ^ self.negate;
        trace!(
            "condition {:?}({:?}) trigger={} negate={} raw={} -> {}",
            self.kind, self.parameter, self.trigger, self.negate, raw, result
        );
        result
    }
}

/// Evaluate a full condition list per spec §4.B's trigger semantics.
pub fn evaluate_all(conditions: &[Condition]) -> bool {
    if conditions.is_empty() {
        return true;
    }

    let has_trigger = conditions.iter().any(|c| c.trigger);
    let mut non_trigger_ok = true;
    let mut any_trigger_ok = false;

    for c in conditions {
        let result = c.evaluate();
        if c.trigger {
            any_trigger_ok |= result;
        } else if !result {
            non_trigger_ok = false;
        }
    }

    let passed = if has_trigger {
        non_trigger_ok && any_trigger_ok
    } else {
        non_trigger_ok
    };
    debug!(
        "condition list ({} entries, trigger={}) -> {}",
        conditions.len(), has_trigger, passed
    );
    passed
}

fn kernel_cmdline_has(parameter: &str) -> bool {
    let cmdline = std::fs::read_to_string("/proc/cmdline").unwrap_or_default();
    let words = cmdline.split_whitespace();
    match parameter.split_once('=') {
        Some((key, value)) => words
            .filter_map(|w| w.split_once('='))
            .any(|(k, v)| k == key && v == value),
        None => words.any(|w| w == parameter || w.split('=').next() == Some(parameter)),
    }
}

/// Best-effort virtualization detection, mirroring `systemd-detect-virt`'s
/// DMI-based checks without shelling out to it.
fn detected_virtualization() -> Option<String> {
    let product = std::fs::read_to_string("/sys/class/dmi/id/product_name").ok()?;
    let product = product.trim().to_ascii_lowercase();
    let detected = if product.contains("kvm") {
        "kvm"
    } else if product.contains("vmware") {
        "vmware"
    } else if product.contains("virtualbox") {
        "oracle"
    } else if product.contains("bochs") || product.contains("qemu") {
        "qemu"
    } else {
        return Some("none".to_owned());
    };
    Some(detected.to_owned())
}

fn security_module_enabled(name: &str) -> bool {
    match name {
        "selinux" => Path::new("/sys/fs/selinux").is_dir(),
        "apparmor" => Path::new("/sys/kernel/security/apparmor").is_dir(),
        "smack" => Path::new("/sys/fs/smackfs").is_dir(),
        "ima" => Path::new("/sys/kernel/security/ima").is_dir(),
        "tomoyo" => Path::new("/sys/kernel/security/tomoyo").is_dir(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let c = Condition::parse(ConditionKind::PathExists, "/etc/hostname");
        assert!(!c.trigger);
        assert!(!c.negate);
        assert_eq!(c.parameter, "/etc/hostname");
    }

    #[test]
    fn test_parse_trigger_and_negate() {
        let c = Condition::parse(ConditionKind::PathExists, "|!/etc/hostname");
        assert!(c.trigger);
        assert!(c.negate);
        assert_eq!(c.parameter, "/etc/hostname");
    }

    #[test]
    fn test_evaluate_negate() {
        let c = Condition::parse(ConditionKind::PathExists, "!/nonexistent-path-xyz");
        assert!(c.evaluate());
    }

    #[test]
    fn test_evaluate_all_no_trigger() {
        let conditions = vec![
            Condition::parse(ConditionKind::PathExists, "/"),
            Condition::parse(ConditionKind::PathIsDirectory, "/"),
        ];
        assert!(evaluate_all(&conditions));
    }

    #[test]
    fn test_evaluate_all_with_trigger() {
        let conditions = vec![
            Condition::parse(ConditionKind::PathExists, "/"),
            Condition::parse(ConditionKind::PathExists, "|/nonexistent-path-xyz"),
            Condition::parse(ConditionKind::PathExists, "|/"),
        ];
        // non-trigger passes, and one of the two trigger conditions passes
        assert!(evaluate_all(&conditions));
    }

    #[test]
    fn test_evaluate_all_with_trigger_all_fail() {
        let conditions = vec![
            Condition::parse(ConditionKind::PathExists, "/"),
            Condition::parse(ConditionKind::PathExists, "|/nonexistent-path-xyz"),
        ];
        assert!(!evaluate_all(&conditions));
    }

    #[test]
    fn test_evaluate_all_empty() {
        assert!(evaluate_all(&[]));
    }

    #[test]
    fn test_directory_not_empty() {
        let c = Condition::parse(ConditionKind::DirectoryNotEmpty, "/nonexistent-dir-xyz");
        assert!(!c.evaluate());
    }
}
