//! `%`-specifier expansion (spec §4.C "Specifiers"). Applied to `ExecStart=`
//! and related directive values after ini parsing, before they're stored on
//! a unit's config.
//!
//! Grounded on the teacher's `unit_name.rs` instance/prefix split (the `%i`/
//! `%n`/`%N` specifiers are defined purely in terms of the already-correct
//! `unit_name::{prefix, prefix_and_instance}` helpers, so this module adds
//! no new name-escaping logic of its own).

use crate::unit_name;

pub struct SpecifierContext<'a> {
    pub unit_name: &'a str,
}

/// Expand `%i` (instance), `%n` (full unit name), `%N` (unit name, instance
/// unescaped), `%p` (prefix), `%%` (literal percent) in `value`. Unknown
/// specifiers are left untouched, matching systemd's own forward-compat
/// behavior of not erroring on specifiers a given version doesn't know.
pub fn expand(value: &str, ctx: &SpecifierContext) -> String {
    let (prefix, instance) = unit_name::prefix_and_instance(ctx.unit_name);
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('i') => out.push_str(instance.unwrap_or("")),
            Some('n') => out.push_str(ctx.unit_name),
            Some('N') => {
                out.push_str(prefix);
                if let Some(inst) = instance {
                    out.push('@');
                    out.push_str(&unit_name::unit_name_unescape(inst).unwrap_or_else(|| inst.to_owned()));
                }
            }
            Some('p') => out.push_str(prefix),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_instance_and_prefix() {
        let ctx = SpecifierContext { unit_name: "getty@tty1.service" };
        assert_eq!(expand("agetty %I %i", &ctx), "agetty %I tty1");
        assert_eq!(expand("%p", &ctx), "getty");
    }

    #[test]
    fn test_expand_literal_percent() {
        let ctx = SpecifierContext { unit_name: "foo.service" };
        assert_eq!(expand("100%%", &ctx), "100%");
    }

    #[test]
    fn test_unknown_specifier_passed_through() {
        let ctx = SpecifierContext { unit_name: "foo.service" };
        assert_eq!(expand("%Z", &ctx), "%Z");
    }

    #[test]
    fn test_expand_full_name_on_non_instanced_unit() {
        let ctx = SpecifierContext { unit_name: "foo.service" };
        assert_eq!(expand("%n", &ctx), "foo.service");
        assert_eq!(expand("%i", &ctx), "");
    }
}
