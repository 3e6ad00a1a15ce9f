//! Unit-file ini-dialect lexer (spec §4.C "Fragment files").
//!
//! Grounded on the sibling project's `units/unit_parsing/unit_parser.rs`
//! `parse_file`/`parse_section`: a line-oriented `[Section]` / `Key=Value`
//! reader, case-folding key names to uppercase, comma-splitting values into
//! an ordered `(line_number, value)` list so later "last one wins" / "all
//! values accumulate" semantics can both be built on the same table.

use std::collections::HashMap;

use crate::error::FragmentLoadError;

/// One section's key -> ordered (line number, value) entries.
pub type ParsedSection = HashMap<String, Vec<(u32, String)>>;

/// A whole fragment file: section name (with brackets, e.g. `"[Unit]"`) to
/// its contents. Order among sections isn't preserved — systemd unit files
/// tolerate sections in any order and don't permit repeats.
pub type ParsedFile = HashMap<String, ParsedSection>;

pub fn parse_file(content: &str) -> Result<ParsedFile, FragmentLoadError> {
    let mut sections = HashMap::new();
    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    let mut lines_left = &lines[..];

    while !lines_left.is_empty() && !lines_left[0].starts_with('[') {
        lines_left = &lines_left[1..];
    }
    if lines_left.is_empty() {
        return Ok(sections);
    }

    let mut current_section_name: String = lines_left[0].into();
    let mut current_section_lines = Vec::new();
    lines_left = &lines_left[1..];

    while !lines_left.is_empty() {
        let line = lines_left[0];
        if line.starts_with('[') {
            insert_section(&mut sections, &current_section_name, &current_section_lines)?;
            current_section_name = line.into();
            current_section_lines.clear();
        } else {
            current_section_lines.push(line);
        }
        lines_left = &lines_left[1..];
    }
    insert_section(&mut sections, &current_section_name, &current_section_lines)?;

    Ok(sections)
}

fn insert_section(sections: &mut ParsedFile, name: &str, lines: &[&str]) -> Result<(), FragmentLoadError> {
    if sections.contains_key(name) {
        return Err(FragmentLoadError::Malformed(format!("section {name} repeated")));
    }
    sections.insert(name.to_owned(), parse_section(lines));
    Ok(())
}

/// Join lines ending in a trailing `\` with the line(s) that follow, per
/// spec §4.C/§6 line-continuation: the backslash is discarded and the
/// continued text is appended with a single space, matching
/// `systemd.syntax(7)`'s "a line ending in a backslash... is parsed as a
/// single long line".
fn join_continuations(lines: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    let mut pending: Option<String> = None;

    for &line in lines {
        let joined = match pending.take() {
            Some(mut buf) => {
                buf.push(' ');
                buf.push_str(line.trim_start());
                buf
            }
            None => line.to_owned(),
        };
        match joined.strip_suffix('\\') {
            Some(rest) => pending = Some(rest.trim_end().to_owned()),
            None => out.push(joined),
        }
    }
    if let Some(buf) = pending {
        out.push(buf);
    }
    out
}

pub fn parse_section(lines: &[&str]) -> ParsedSection {
    let mut entries: ParsedSection = HashMap::new();
    let mut entry_number = 0;
    let joined = join_continuations(lines);

    for line in joined.iter().map(String::as_str) {
        if line.starts_with('#') || line.starts_with(';') || line.is_empty() {
            continue;
        }
        let Some(pos) = line.find('=') else { continue };
        let (name, value) = line.split_at(pos);
        let value = value.trim_start_matches('=').trim();
        let name = name.trim().to_uppercase();

        // Multi-value directives (Wants=, After=, ...) are space-separated
        // lists of unit names; single-value directives (Description=,
        // TimeoutSec=) happen to never contain unescaped commas either, so
        // one code path handles both: push the whole trimmed value as one
        // entry and let per-directive parsing re-split on whitespace where
        // that directive calls for a list.
        let vec = entries.entry(name).or_default();
        vec.push((entry_number, value.to_owned()));
        entry_number += 1;
    }

    entries
}

pub fn last_value(section: &ParsedSection, key: &str) -> Option<String> {
    section.get(key).and_then(|v| v.last()).map(|(_, s)| s.clone())
}

pub fn all_values(section: &ParsedSection, key: &str) -> Vec<String> {
    section
        .get(key)
        .into_iter()
        .flatten()
        .flat_map(|(_, s)| s.split_whitespace().map(str::to_owned))
        .collect()
}

pub fn string_to_bool(s: &str) -> bool {
    matches!(s.to_uppercase().as_str(), "YES" | "TRUE" | "1" | "ON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_splits_sections() {
        let content = "[Unit]\nDescription=hi\n\n[Service]\nExecStart=/bin/true\n";
        let file = parse_file(content).unwrap();
        assert_eq!(last_value(&file["[Unit]"], "DESCRIPTION"), Some("hi".to_owned()));
        assert_eq!(last_value(&file["[Service]"], "EXECSTART"), Some("/bin/true".to_owned()));
    }

    #[test]
    fn test_repeated_section_errors() {
        let content = "[Unit]\nDescription=a\n[Unit]\nDescription=b\n";
        assert!(parse_file(content).is_err());
    }

    #[test]
    fn test_multi_value_after_splits_on_whitespace() {
        let content = "[Unit]\nAfter=a.service b.service\n";
        let file = parse_file(content).unwrap();
        assert_eq!(all_values(&file["[Unit]"], "AFTER"), vec!["a.service".to_owned(), "b.service".to_owned()]);
    }

    #[test]
    fn test_comments_and_blank_lines_ignored() {
        let content = "[Unit]\n# a comment\n\nDescription=hi\n";
        let file = parse_file(content).unwrap();
        assert_eq!(last_value(&file["[Unit]"], "DESCRIPTION"), Some("hi".to_owned()));
    }

    #[test]
    fn test_trailing_backslash_continues_onto_next_line() {
        let content = "[Service]\nExecStart=/bin/echo \\\n    hi there\n";
        let file = parse_file(content).unwrap();
        assert_eq!(last_value(&file["[Service]"], "EXECSTART"), Some("/bin/echo hi there".to_owned()));
    }

    #[test]
    fn test_last_value_wins_on_repeated_key() {
        let content = "[Unit]\nDescription=a\nDescription=b\n";
        let file = parse_file(content).unwrap();
        assert_eq!(last_value(&file["[Unit]"], "DESCRIPTION"), Some("b".to_owned()));
    }
}
