//! Capability bounding-set parsing (spec §4.C "capability sets (with `~`
//! inversion for bounding-set)", §9 Open Question 1).
//!
//! `CapabilityBoundingSet=` normally lists the capabilities a unit keeps;
//! a leading `~` instead lists the capabilities to drop, i.e. the parsed
//! set is the *complement* of what's actually granted. We store the
//! caller's literal request (names plus the inversion flag) and only
//! compute the complement in [`CapabilitySet::effective`], so there's one
//! place the un-inversion happens rather than at every call site that
//! reads the set back out.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    names: Vec<String>,
    inverted: bool,
}

impl CapabilitySet {
    pub fn parse(value: &str) -> CapabilitySet {
        let trimmed = value.trim();
        let (inverted, rest) = match trimmed.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let names = rest.split_whitespace().map(str::to_owned).collect();
        CapabilitySet { names, inverted }
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub fn raw_names(&self) -> &[String] {
        &self.names
    }

    /// The capability names actually granted: the literal set, or its
    /// complement against `all_known` when the `~` prefix was used.
    pub fn effective(&self, all_known: &[&str]) -> Vec<String> {
        if !self.inverted {
            return self.names.clone();
        }
        all_known.iter().map(|s| (*s).to_owned()).filter(|c| !self.names.contains(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_set() {
        let set = CapabilitySet::parse("CAP_NET_BIND_SERVICE CAP_CHOWN");
        assert!(!set.is_inverted());
        assert_eq!(set.raw_names(), ["CAP_NET_BIND_SERVICE".to_owned(), "CAP_CHOWN".to_owned()]);
    }

    #[test]
    fn test_parse_inverted_set_complements_on_readback() {
        let known = ["CAP_CHOWN", "CAP_NET_BIND_SERVICE", "CAP_SYS_ADMIN"];
        let set = CapabilitySet::parse("~CAP_SYS_ADMIN");
        assert!(set.is_inverted());
        let effective = set.effective(&known);
        assert!(effective.contains(&"CAP_CHOWN".to_owned()));
        assert!(effective.contains(&"CAP_NET_BIND_SERVICE".to_owned()));
        assert!(!effective.contains(&"CAP_SYS_ADMIN".to_owned()));
    }

    #[test]
    fn test_empty_value_parses_to_empty_set() {
        let set = CapabilitySet::parse("");
        assert!(set.raw_names().is_empty());
        assert!(!set.is_inverted());
    }
}
