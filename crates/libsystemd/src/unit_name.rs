//! Unit name escaping and unescaping.
//!
//! This module implements the systemd unit name escaping rules as documented
//! in `systemd.unit(5)` and `systemd-escape(1)`.
//!
//! ## Escaping rules
//!
//! - `/` is replaced with `-`
//! - All characters except `[a-zA-Z0-9:_.\]` are replaced with `\xHH`
//!   (C-style hex escape using the byte's hex value)
//! - Leading `.` is escaped as `\x2e`
//! - The empty string becomes `-` (representing `/`)
//!
//! ## Path escaping
//!
//! Path escaping is similar but first normalizes the path:
//! - Leading and trailing `/` are stripped
//! - Consecutive `/` are collapsed
//! - The root path `/` becomes `-`
//! - Then normal escaping is applied to the result

/// Characters that do NOT need escaping in a unit name.
/// Matches systemd: ASCII letters, digits, `:`, `_`, `.`
fn is_valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '.'
}

/// Escape a string for use in a systemd unit name.
///
/// This applies the escaping rules from `systemd.unit(5)`:
/// - `/` → `-`
/// - Characters outside `[a-zA-Z0-9:_.\]` → `\xHH`
/// - Leading `.` → `\x2e`
///
/// # Examples
///
/// ```
/// use libsystemd::unit_name::unit_name_escape;
/// assert_eq!(unit_name_escape("foo bar"), r"foo\x20bar");
/// assert_eq!(unit_name_escape("foo/bar"), "foo-bar");
/// assert_eq!(unit_name_escape(".hidden"), r"\x2ehidden");
/// assert_eq!(unit_name_escape(""), "-");
/// ```
pub fn unit_name_escape(s: &str) -> String {
    if s.is_empty() {
        return "-".to_string();
    }

    let mut result = String::with_capacity(s.len() * 2);

    for (i, c) in s.chars().enumerate() {
        if c == '/' {
            result.push('-');
        } else if i == 0 && c == '.' {
            // Leading dot must be escaped
            result.push_str(&format!("\\x{:02x}", c as u32));
        } else if is_valid_char(c) {
            result.push(c);
        } else {
            // Escape each byte of the UTF-8 encoding
            let mut buf = [0u8; 4];
            let encoded = c.encode_utf8(&mut buf);
            for b in encoded.bytes() {
                result.push_str(&format!("\\x{:02x}", b));
            }
        }
    }

    result
}

/// Unescape a systemd unit name back to the original string.
///
/// This reverses the escaping applied by [`unit_name_escape`]:
/// - `-` → `/`
/// - `\xHH` → the corresponding byte
///
/// Returns `None` if the input contains invalid escape sequences.
///
/// # Examples
///
/// ```
/// use libsystemd::unit_name::unit_name_unescape;
/// assert_eq!(unit_name_unescape(r"foo\x20bar"), Some("foo bar".to_string()));
/// assert_eq!(unit_name_unescape("foo-bar"), Some("foo/bar".to_string()));
/// assert_eq!(unit_name_unescape("-"), Some("/".to_string()));
/// ```
pub fn unit_name_unescape(s: &str) -> Option<String> {
    let mut result = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'-' {
            result.push(b'/');
            i += 1;
        } else if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1] == b'x' {
            let hi = hex_digit(bytes[i + 2])?;
            let lo = hex_digit(bytes[i + 3])?;
            result.push(hi << 4 | lo);
            i += 4;
        } else if bytes[i] == b'\\' {
            // Invalid escape sequence
            return None;
        } else {
            result.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(result).ok()
}

/// Escape a filesystem path for use in a systemd unit name.
///
/// The path is first normalized:
/// - Leading and trailing `/` are stripped
/// - Consecutive `/` are collapsed
/// - The root path `/` becomes `-`
///
/// Then normal unit name escaping is applied.
///
/// # Examples
///
/// ```
/// use libsystemd::unit_name::unit_name_path_escape;
/// assert_eq!(unit_name_path_escape("/"), "-");
/// assert_eq!(unit_name_path_escape("/foo/bar"), "foo-bar");
/// assert_eq!(unit_name_path_escape("/foo//bar/"), "foo-bar");
/// assert_eq!(unit_name_path_escape("/foo bar/baz"), r"foo\x20bar-baz");
/// ```
pub fn unit_name_path_escape(path: &str) -> String {
    let normalized = normalize_path(path);
    if normalized.is_empty() {
        return "-".to_string();
    }
    unit_name_escape(&normalized)
}

/// Unescape a systemd unit name back to a filesystem path.
///
/// This reverses [`unit_name_path_escape`]. The result always starts with `/`.
///
/// Returns `None` if the input contains invalid escape sequences.
///
/// # Examples
///
/// ```
/// use libsystemd::unit_name::unit_name_path_unescape;
/// assert_eq!(unit_name_path_unescape("-"), Some("/".to_string()));
/// assert_eq!(unit_name_path_unescape("foo-bar"), Some("/foo/bar".to_string()));
/// ```
pub fn unit_name_path_unescape(s: &str) -> Option<String> {
    let unescaped = unit_name_unescape(s)?;
    if unescaped == "/" {
        return Some("/".to_string());
    }
    if unescaped.starts_with('/') {
        Some(unescaped)
    } else {
        Some(format!("/{unescaped}"))
    }
}

/// Mangle an arbitrary string into a valid unit name.
///
/// This is similar to `unit_name_escape` but also:
/// - Appends `.service` suffix if the result doesn't already have a known
///   unit suffix
/// - Handles the case where the input is already a valid unit name
///
/// This matches `systemd-escape --mangle`.
///
/// # Examples
///
/// ```
/// use libsystemd::unit_name::unit_name_mangle;
/// assert_eq!(unit_name_mangle("foo"), "foo.service");
/// assert_eq!(unit_name_mangle("foo.service"), "foo.service");
/// assert_eq!(unit_name_mangle("foo bar"), r"foo\x20bar.service");
/// assert_eq!(unit_name_mangle("/dev/sda"), "dev-sda.device");
/// ```
pub fn unit_name_mangle(s: &str) -> String {
    // If the string already has a recognized unit suffix, escape the name
    // part and keep the suffix.
    if let Some(suffix) = recognized_suffix(s) {
        let name_part = &s[..s.len() - suffix.len()];
        let escaped = unit_name_escape(name_part);
        return format!("{escaped}{suffix}");
    }

    // If it looks like an absolute path, try to determine the appropriate
    // unit type. Devices get .device, everything else gets .service.
    if s.starts_with('/') {
        if s.starts_with("/dev/") {
            let escaped = unit_name_path_escape(s);
            return format!("{escaped}.device");
        }
        let escaped = unit_name_path_escape(s);
        return format!("{escaped}.service");
    }

    // Otherwise, escape and append .service
    let escaped = unit_name_escape(s);
    format!("{escaped}.service")
}

/// Extract the template name from a template instance unit name.
///
/// For `foo@bar.service`, returns `Some(("foo@", "bar", ".service"))`.
/// For `foo.service`, returns `None`.
pub fn unit_name_template_split(name: &str) -> Option<(&str, &str, &str)> {
    let at_pos = name.find('@')?;
    let dot_pos = name.rfind('.')?;

    if at_pos >= dot_pos {
        return None;
    }

    let prefix = &name[..=at_pos]; // "foo@"
    let instance = &name[at_pos + 1..dot_pos]; // "bar"
    let suffix = &name[dot_pos..]; // ".service"

    Some((prefix, instance, suffix))
}

/// Check if a unit name is a template (contains `@` before the suffix).
pub fn is_template(name: &str) -> bool {
    if let Some(at_pos) = name.find('@')
        && let Some(dot_pos) = name.rfind('.') {
            // Template: foo@.service (instance is empty)
            return at_pos < dot_pos && at_pos + 1 == dot_pos;
        }
    false
}

/// Check if a unit name is a template instance (contains `@` with an
/// instance string before the suffix).
pub fn is_instance(name: &str) -> bool {
    if let Some(at_pos) = name.find('@')
        && let Some(dot_pos) = name.rfind('.') {
            // Instance: foo@bar.service (instance is non-empty)
            return at_pos < dot_pos && at_pos + 1 < dot_pos;
        }
    false
}

/// Instantiate a template with a given instance string.
///
/// `template` should be like `foo@.service` and `instance` is the
/// instance name (unescaped). Returns `foo@instance.service`.
///
/// Returns `None` if `template` is not a valid template name.
pub fn template_instantiate(template: &str, instance: &str) -> Option<String> {
    if !is_template(template) {
        return None;
    }

    let at_pos = template.find('@')?;
    let dot_pos = template.rfind('.')?;

    let prefix = &template[..=at_pos];
    let suffix = &template[dot_pos..];

    Some(format!("{prefix}{instance}{suffix}"))
}

/// The ten unit types from the data model (spec §3), derived purely from a
/// name's suffix. Kept here rather than in `units::` so the name algebra has
/// no dependency on the unit store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitType {
    Service,
    Socket,
    Target,
    Device,
    Mount,
    Automount,
    Swap,
    Timer,
    Path,
    Snapshot,
}

impl UnitType {
    pub const fn suffix(self) -> &'static str {
        match self {
            UnitType::Service => ".service",
            UnitType::Socket => ".socket",
            UnitType::Target => ".target",
            UnitType::Device => ".device",
            UnitType::Mount => ".mount",
            UnitType::Automount => ".automount",
            UnitType::Swap => ".swap",
            UnitType::Timer => ".timer",
            UnitType::Path => ".path",
            UnitType::Snapshot => ".snapshot",
        }
    }
}

/// `to_type` — derive a unit's type purely from its name's suffix (spec §4.A).
pub fn to_type(name: &str) -> Option<UnitType> {
    const ALL: &[UnitType] = &[
        UnitType::Service,
        UnitType::Socket,
        UnitType::Target,
        UnitType::Device,
        UnitType::Mount,
        UnitType::Automount,
        UnitType::Swap,
        UnitType::Timer,
        UnitType::Path,
        UnitType::Snapshot,
    ];
    ALL.iter().copied().find(|t| name.ends_with(t.suffix()))
}

/// `prefix` — the name with the instance (if any) and suffix stripped.
///
/// For `getty@tty1.service` this is `getty`; for `foo.service` it is `foo`.
pub fn prefix(name: &str) -> &str {
    let without_suffix = match name.rfind('.') {
        Some(pos) => &name[..pos],
        None => name,
    };
    match without_suffix.find('@') {
        Some(at_pos) => &without_suffix[..at_pos],
        None => without_suffix,
    }
}

/// `prefix_and_instance` — splits a name into `(prefix, Some(instance))` for
/// an instantiated unit, or `(prefix, None)` for a plain or template name.
pub fn prefix_and_instance(name: &str) -> (&str, Option<&str>) {
    match unit_name_template_split(name) {
        Some((p, instance, _)) => {
            let prefix = &p[..p.len() - 1]; // drop the trailing '@'
            if instance.is_empty() {
                (prefix, None)
            } else {
                (prefix, Some(instance))
            }
        }
        None => (prefix(name), None),
    }
}

/// `replace_instance` — swap the instance segment of a template instance
/// name, keeping prefix and suffix. Returns `None` if `name` is not an
/// instance (or template) name.
///
/// # Examples
/// ```
/// use libsystemd::unit_name::replace_instance;
/// assert_eq!(replace_instance("getty@tty1.service", "tty2"), Some("getty@tty2.service".to_string()));
/// ```
pub fn replace_instance(name: &str, new_instance: &str) -> Option<String> {
    let (prefix, _, suffix) = unit_name_template_split(name)?;
    Some(format!("{prefix}{new_instance}{suffix}"))
}

/// `change_suffix` — replace a name's unit-type suffix, keeping everything
/// before it (prefix and instance, if any) intact. `new_suffix` must include
/// the leading dot (e.g. `".service"`).
pub fn change_suffix(name: &str, new_suffix: &str) -> Option<String> {
    let suffix = recognized_suffix(name)?;
    Some(format!("{}{new_suffix}", &name[..name.len() - suffix.len()]))
}

/// `is_valid` — syntactic validity of a unit name: non-empty prefix,
/// recognized suffix, and (when `template_ok` is false) no empty instance
/// segment.
pub fn is_valid(name: &str, template_ok: bool) -> bool {
    if recognized_suffix(name).is_none() {
        return false;
    }
    if prefix(name).is_empty() {
        return false;
    }
    if is_template(name) && !template_ok {
        return false;
    }
    name.chars().all(|c| is_valid_char(c) || c == '@' || c == '\\')
}

/// `to_path` — alias for [`unit_name_path_unescape`] matching spec §4.A's
/// operation name.
pub fn to_path(name_prefix: &str) -> Option<String> {
    unit_name_path_unescape(name_prefix)
}

/// `from_path` — alias for [`unit_name_path_escape`] matching spec §4.A's
/// operation name.
pub fn from_path(path: &str) -> String {
    unit_name_path_escape(path)
}

/// `template` — the template name for an instance or template unit: the
/// prefix, `@`, and suffix, with the instance segment emptied.
pub fn template(name: &str) -> Option<String> {
    let (p, _, suffix) = unit_name_template_split(name)?;
    Some(format!("{p}{suffix}"))
}

/// `build_escape` — construct a unit name of a given type from an
/// unescaped prefix string, escaping it first. Equivalent to
/// `unit_name_escape(prefix) + type.suffix()`.
pub fn build_escape(raw_prefix: &str, unit_type: UnitType) -> String {
    format!("{}{}", unit_name_escape(raw_prefix), unit_type.suffix())
}

/// Return the unit type suffix if the name has a recognized one.
fn recognized_suffix(name: &str) -> Option<&'static str> {
    const SUFFIXES: &[&str] = &[
        ".service",
        ".socket",
        ".target",
        ".device",
        ".mount",
        ".automount",
        ".swap",
        ".timer",
        ".path",
        ".slice",
        ".scope",
    ];

    SUFFIXES.iter().find(|&&suffix| name.ends_with(suffix)).copied().map(|v| v as _)
}

/// Normalize a filesystem path by stripping leading/trailing slashes
/// and collapsing consecutive slashes.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }

    let mut result = String::with_capacity(trimmed.len());
    let mut prev_slash = false;

    for c in trimmed.chars() {
        if c == '/' {
            if !prev_slash {
                result.push('/');
            }
            prev_slash = true;
        } else {
            result.push(c);
            prev_slash = false;
        }
    }

    result
}

/// Parse a single hex digit character to its numeric value.
fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_basic() {
        assert_eq!(unit_name_escape("foobar"), "foobar");
        assert_eq!(unit_name_escape("foo bar"), r"foo\x20bar");
        assert_eq!(unit_name_escape("foo/bar"), "foo-bar");
        assert_eq!(unit_name_escape(""), "-");
    }

    #[test]
    fn test_escape_leading_dot() {
        assert_eq!(unit_name_escape(".hidden"), r"\x2ehidden");
        assert_eq!(unit_name_escape(".."), r"\x2e.");
    }

    #[test]
    fn test_escape_special_chars() {
        assert_eq!(unit_name_escape("foo@bar"), r"foo\x40bar");
        assert_eq!(unit_name_escape("a=b"), r"a\x3db");
    }

    #[test]
    fn test_escape_allowed_chars() {
        // These should pass through unchanged
        assert_eq!(unit_name_escape("foo_bar"), "foo_bar");
        assert_eq!(unit_name_escape("foo:bar"), "foo:bar");
        assert_eq!(unit_name_escape("foo.bar"), "foo.bar");
        assert_eq!(unit_name_escape("FOO123"), "FOO123");
    }

    #[test]
    fn test_unescape_basic() {
        assert_eq!(unit_name_unescape("foobar"), Some("foobar".to_string()));
        assert_eq!(
            unit_name_unescape(r"foo\x20bar"),
            Some("foo bar".to_string())
        );
        assert_eq!(unit_name_unescape("foo-bar"), Some("foo/bar".to_string()));
        assert_eq!(unit_name_unescape("-"), Some("/".to_string()));
    }

    #[test]
    fn test_unescape_leading_dot() {
        assert_eq!(
            unit_name_unescape(r"\x2ehidden"),
            Some(".hidden".to_string())
        );
    }

    #[test]
    fn test_roundtrip() {
        // Note: empty string is excluded because escaping "" gives "-"
        // and unescaping "-" gives "/" — this is by design in systemd
        // (the empty string and "/" are both represented as "-").
        let test_cases = &[
            "foo bar",
            "/dev/sda",
            ".hidden",
            "hello/world",
            "foo@bar",
            "a=b&c",
        ];

        for &original in test_cases {
            let escaped = unit_name_escape(original);
            let unescaped = unit_name_unescape(&escaped).unwrap();
            assert_eq!(
                unescaped, original,
                "Roundtrip failed for {:?}: escaped={:?}, unescaped={:?}",
                original, escaped, unescaped
            );
        }
    }

    #[test]
    fn test_escape_empty_string() {
        // Empty string escapes to "-" (representing the root path).
        // Unescaping "-" gives "/" — this is a one-way mapping by design.
        assert_eq!(unit_name_escape(""), "-");
        assert_eq!(unit_name_unescape("-"), Some("/".to_string()));
    }

    #[test]
    fn test_path_escape() {
        assert_eq!(unit_name_path_escape("/"), "-");
        assert_eq!(unit_name_path_escape("/foo/bar"), "foo-bar");
        assert_eq!(unit_name_path_escape("/foo//bar/"), "foo-bar");
        assert_eq!(unit_name_path_escape("/foo bar/baz"), r"foo\x20bar-baz");
    }

    #[test]
    fn test_path_unescape() {
        assert_eq!(unit_name_path_unescape("-"), Some("/".to_string()));
        assert_eq!(
            unit_name_path_unescape("foo-bar"),
            Some("/foo/bar".to_string())
        );
    }

    #[test]
    fn test_path_roundtrip() {
        let paths = &["/", "/foo/bar", "/foo bar/baz", "/dev/sda1"];
        for &path in paths {
            let escaped = unit_name_path_escape(path);
            let unescaped = unit_name_path_unescape(&escaped).unwrap();
            // Normalize the original for comparison
            let normalized = if path == "/" {
                "/".to_string()
            } else {
                format!("/{}", normalize_path(path))
            };
            assert_eq!(
                unescaped, normalized,
                "Path roundtrip failed for {:?}: escaped={:?}, unescaped={:?}",
                path, escaped, unescaped
            );
        }
    }

    #[test]
    fn test_mangle() {
        assert_eq!(unit_name_mangle("foo"), "foo.service");
        assert_eq!(unit_name_mangle("foo.service"), "foo.service");
        assert_eq!(unit_name_mangle("foo.socket"), "foo.socket");
        assert_eq!(unit_name_mangle("foo bar"), r"foo\x20bar.service");
    }

    #[test]
    fn test_mangle_path() {
        assert_eq!(unit_name_mangle("/dev/sda"), "dev-sda.device");
        assert_eq!(unit_name_mangle("/foo/bar"), "foo-bar.service");
    }

    #[test]
    fn test_template_split() {
        assert_eq!(
            unit_name_template_split("foo@bar.service"),
            Some(("foo@", "bar", ".service"))
        );
        assert_eq!(
            unit_name_template_split("foo@.service"),
            Some(("foo@", "", ".service"))
        );
        assert_eq!(unit_name_template_split("foo.service"), None);
    }

    #[test]
    fn test_is_template() {
        assert!(is_template("foo@.service"));
        assert!(!is_template("foo@bar.service"));
        assert!(!is_template("foo.service"));
    }

    #[test]
    fn test_is_instance() {
        assert!(is_instance("foo@bar.service"));
        assert!(!is_instance("foo@.service"));
        assert!(!is_instance("foo.service"));
    }

    #[test]
    fn test_template_instantiate() {
        assert_eq!(
            template_instantiate("foo@.service", "bar"),
            Some("foo@bar.service".to_string())
        );
        assert_eq!(
            template_instantiate("getty@.service", "tty1"),
            Some("getty@tty1.service".to_string())
        );
        assert_eq!(template_instantiate("foo.service", "bar"), None);
    }

    #[test]
    fn test_unescape_invalid() {
        // Incomplete escape
        assert_eq!(unit_name_unescape(r"\x2"), None);
        assert_eq!(unit_name_unescape(r"\x"), None);
        assert_eq!(unit_name_unescape(r"\"), None);
        // Invalid hex
        assert_eq!(unit_name_unescape(r"\xzz"), None);
    }

    #[test]
    fn test_to_type() {
        assert_eq!(to_type("var.mount"), Some(UnitType::Mount));
        assert_eq!(to_type("getty@tty1.service"), Some(UnitType::Service));
        assert_eq!(to_type("foo.slice"), None);
    }

    #[test]
    fn test_prefix_and_instance() {
        assert_eq!(prefix_and_instance("getty@tty1.service"), ("getty", Some("tty1")));
        assert_eq!(prefix_and_instance("getty@.service"), ("getty", None));
        assert_eq!(prefix_and_instance("foo.service"), ("foo", None));
    }

    #[test]
    fn test_replace_instance() {
        assert_eq!(
            replace_instance("getty@tty1.service", "tty2"),
            Some("getty@tty2.service".to_string())
        );
        assert_eq!(replace_instance("foo.service", "tty2"), None);
    }

    #[test]
    fn test_change_suffix() {
        assert_eq!(
            change_suffix("var.mount", ".automount"),
            Some("var.automount".to_string())
        );
    }

    #[test]
    fn test_is_valid() {
        assert!(is_valid("foo.service", false));
        assert!(!is_valid("foo@.service", false));
        assert!(is_valid("foo@.service", true));
        assert!(!is_valid("foo", false));
    }

    #[test]
    fn test_template_op() {
        assert_eq!(template("getty@tty1.service"), Some("getty@.service".to_string()));
        assert_eq!(template("getty@.service"), Some("getty@.service".to_string()));
    }

    #[test]
    fn test_build_escape() {
        assert_eq!(build_escape("dev/sda1", UnitType::Device), "dev-sda1.device");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/"), "");
        assert_eq!(normalize_path("///"), "");
        assert_eq!(normalize_path("/foo/bar"), "foo/bar");
        assert_eq!(normalize_path("/foo//bar/"), "foo/bar");
        assert_eq!(normalize_path("/foo///bar///baz/"), "foo/bar/baz");
    }
}
