//! Fragment file resolution and loading (spec §4.C "Path resolution",
//! FOLLOW_MAX symlink bound; spec §4.A unit-name validation happens before
//! this module is ever reached).
//!
//! Grounded on the sibling project's `unit_parsing::get_file_list` (search a
//! directory, return sorted entries) generalized to systemd's actual
//! multi-directory override/shadow search order: the first directory in
//! `Config::unit_dirs` that contains a file named exactly `unit_name` wins,
//! matching spec §4.C "first match in directory search order, earlier
//! directories override later ones".

use std::path::{Path, PathBuf};

use log::trace;

use crate::config::Config;
use crate::error::FragmentLoadError;
use crate::fragment::lexer::{self, ParsedFile};

/// Result of resolving a unit name to a concrete fragment file: the final
/// regular-file path, plus every distinctly-named symlink hop traversed to
/// reach it (spec §4.C "accumulating every name traversed so each becomes an
/// alias of the resulting unit").
#[derive(Debug, Clone)]
pub struct Resolved {
    pub path: PathBuf,
    pub aliases: Vec<String>,
}

/// Search `config.unit_dirs` in order for a file literally named
/// `unit_name`, following at most `config.follow_max` symlink hops (spec
/// §4.C, I7 "-ELOOP past FOLLOW_MAX").
pub fn resolve(config: &Config, unit_name: &str) -> Result<Resolved, FragmentLoadError> {
    for dir in &config.unit_dirs {
        let candidate = dir.join(unit_name);
        if candidate.exists() || candidate.symlink_metadata().is_ok() {
            return follow_symlinks(&candidate, unit_name, config.follow_max);
        }
    }
    Err(FragmentLoadError::NotFound(unit_name.to_owned()))
}

fn follow_symlinks(start: &Path, unit_name: &str, follow_max: u8) -> Result<Resolved, FragmentLoadError> {
    let mut current = start.to_path_buf();
    let mut aliases = Vec::new();
    for _ in 0..follow_max {
        let meta = std::fs::symlink_metadata(&current).map_err(|e| FragmentLoadError::Io {
            path: current.display().to_string(),
            source: e,
        })?;
        if !meta.file_type().is_symlink() {
            return Ok(Resolved { path: current, aliases });
        }
        let target = std::fs::read_link(&current).map_err(|e| FragmentLoadError::Io {
            path: current.display().to_string(),
            source: e,
        })?;
        current = if target.is_absolute() { target } else { current.parent().unwrap_or(Path::new("/")).join(target) };
        trace!("following symlink for {unit_name} -> {}", current.display());
        if let Some(name) = current.file_name().and_then(|n| n.to_str())
            && name != unit_name
            && !aliases.iter().any(|a| a == name)
        {
            aliases.push(name.to_owned());
        }
    }
    Err(FragmentLoadError::TooManySymlinks { name: unit_name.to_owned(), max: follow_max })
}

/// Load and lex a fragment file already resolved to a concrete path. Returns
/// `None` in place of a parsed file when the fragment is empty or is the
/// null device — spec §4.C "An empty file or a file that is the null-device
/// marks the unit as `masked`" — so the caller can skip lexing entirely.
pub fn load(path: &Path) -> Result<Option<ParsedFile>, FragmentLoadError> {
    if is_masked(path) {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| FragmentLoadError::Io { path: path.display().to_string(), source: e })?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(lexer::parse_file(&content)?))
}

/// The null device, by device/inode rather than by path string: `/dev/null`
/// might itself be reached through another symlink chain.
fn is_masked(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    let Ok(meta) = std::fs::metadata(path) else { return false };
    if meta.len() == 0 {
        return true;
    }
    let Ok(null_meta) = std::fs::metadata("/dev/null") else { return false };
    meta.dev() == null_meta.dev() && meta.ino() == null_meta.ino()
}

/// A parsed `[Unit]` section's dependency directives, shared by every unit
/// type. Per-type sections (`[Mount]`, `[Service]`, ...) are parsed by each
/// `units::*` module's own loader glue — this only covers what spec §4.C
/// names as universal across all types.
#[derive(Debug, Clone, Default)]
pub struct ParsedUnitSection {
    pub description: Option<String>,
    pub documentation: Vec<String>,
    pub wants: Vec<String>,
    pub requires: Vec<String>,
    pub requisite: Vec<String>,
    pub binds_to: Vec<String>,
    pub conflicts: Vec<String>,
    pub before: Vec<String>,
    pub after: Vec<String>,
    pub on_failure: Vec<String>,
    pub references: Vec<String>,
    pub default_dependencies: bool,
    pub allow_isolate: bool,
    pub stop_when_unneeded: bool,
    pub refuse_manual_start: bool,
    pub refuse_manual_stop: bool,
}

pub fn parse_unit_section(section: &lexer::ParsedSection) -> ParsedUnitSection {
    ParsedUnitSection {
        description: lexer::last_value(section, "DESCRIPTION"),
        documentation: lexer::all_values(section, "DOCUMENTATION"),
        wants: lexer::all_values(section, "WANTS"),
        requires: lexer::all_values(section, "REQUIRES"),
        requisite: lexer::all_values(section, "REQUISITE"),
        binds_to: lexer::all_values(section, "BINDSTO"),
        conflicts: lexer::all_values(section, "CONFLICTS"),
        before: lexer::all_values(section, "BEFORE"),
        after: lexer::all_values(section, "AFTER"),
        on_failure: lexer::all_values(section, "ONFAILURE"),
        references: lexer::all_values(section, "REFERENCES"),
        default_dependencies: lexer::last_value(section, "DEFAULTDEPENDENCIES").map(|v| lexer::string_to_bool(&v)).unwrap_or(true),
        allow_isolate: lexer::last_value(section, "ALLOWISOLATE").map(|v| lexer::string_to_bool(&v)).unwrap_or(false),
        stop_when_unneeded: lexer::last_value(section, "STOPWHENUNNEEDED").map(|v| lexer::string_to_bool(&v)).unwrap_or(false),
        refuse_manual_start: lexer::last_value(section, "REFUSEMANUALSTART").map(|v| lexer::string_to_bool(&v)).unwrap_or(false),
        refuse_manual_stop: lexer::last_value(section, "REFUSEMANUALSTOP").map(|v| lexer::string_to_bool(&v)).unwrap_or(false),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedInstallSection {
    pub wanted_by: Vec<String>,
    pub required_by: Vec<String>,
    pub also: Vec<String>,
}

pub fn parse_install_section(section: &lexer::ParsedSection) -> ParsedInstallSection {
    ParsedInstallSection {
        wanted_by: lexer::all_values(section, "WANTEDBY"),
        required_by: lexer::all_values(section, "REQUIREDBY"),
        also: lexer::all_values(section, "ALSO"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_unit_section_defaults_default_dependencies_true() {
        let section = lexer::parse_section(&["Wants=a.service b.service", "After=a.service"]);
        let parsed = parse_unit_section(&section);
        assert!(parsed.default_dependencies);
        assert_eq!(parsed.wants, vec!["a.service".to_owned(), "b.service".to_owned()]);
    }

    #[test]
    fn test_resolve_first_matching_directory_wins() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        std::fs::write(dir_a.path().join("foo.service"), "[Unit]\n").unwrap();
        std::fs::write(dir_b.path().join("foo.service"), "[Unit]\n").unwrap();
        let mut config = Config::default_for_test();
        config.unit_dirs = vec![dir_a.path().to_path_buf(), dir_b.path().to_path_buf()];
        let resolved = resolve(&config, "foo.service").unwrap();
        assert_eq!(resolved.path, dir_a.path().join("foo.service"));
        assert!(resolved.aliases.is_empty());
    }

    #[test]
    fn test_resolve_accumulates_symlink_aliases() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("real.service"), "[Unit]\n").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.service"), dir.path().join("alias.service")).unwrap();
        let mut config = Config::default_for_test();
        config.unit_dirs = vec![dir.path().to_path_buf()];
        let resolved = resolve(&config, "alias.service").unwrap();
        assert_eq!(resolved.path, dir.path().join("real.service"));
        assert_eq!(resolved.aliases, vec!["real.service".to_owned()]);
    }

    #[test]
    fn test_load_empty_file_is_masked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("masked.service");
        std::fs::write(&path, "").unwrap();
        assert!(load(&path).unwrap().is_none());
    }

    #[test]
    fn test_resolve_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default_for_test();
        config.unit_dirs = vec![dir.path().to_path_buf()];
        assert!(resolve(&config, "missing.service").is_err());
    }

    #[test]
    fn test_follow_symlinks_hits_loop_limit() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.service");
        let b = dir.path().join("b.service");
        std::os::unix::fs::symlink(&b, &a).unwrap();
        std::os::unix::fs::symlink(&a, &b).unwrap();
        let err = follow_symlinks(&a, "a.service", 4);
        assert!(matches!(err, Err(FragmentLoadError::TooManySymlinks { .. })));
        let _ = Write::flush(&mut std::io::sink());
    }
}
