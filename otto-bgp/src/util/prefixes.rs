//! Pulls CIDR entries out of generated Juniper prefix-list text. Shared by
//! the RPKI validator, the guardrail engine, and the baseline loader so all
//! three count prefixes identically.

use ipnetwork::IpNetwork;
use regex::Regex;
use std::str::FromStr;

fn prefix_entry_regex() -> Regex {
    Regex::new(r"([0-9a-fA-F:.]+/\d{1,3})\s*;").unwrap()
}

/// Every parseable `<prefix>/<len>;` entry in `juniper_text`, in order of
/// appearance.
pub fn extract_prefixes(juniper_text: &str) -> Vec<IpNetwork> {
    prefix_entry_regex()
        .captures_iter(juniper_text)
        .filter_map(|caps| IpNetwork::from_str(&caps[1]).ok())
        .collect()
}

pub fn count_prefixes(juniper_text: &str) -> usize {
    extract_prefixes(juniper_text).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_v4_and_v6_entries() {
        let body = "prefix-list AS13335 {\n    192.0.2.0/24;\n    2001:db8::/32;\n}\n";
        let prefixes = extract_prefixes(body);
        assert_eq!(prefixes.len(), 2);
        assert!(prefixes[0].is_ipv4());
        assert!(prefixes[1].is_ipv6());
    }

    #[test]
    fn ignores_unparseable_entries() {
        let body = "999.999.999.999/24;\n192.0.2.0/24;\n";
        assert_eq!(count_prefixes(body), 1);
    }

    #[test]
    fn empty_text_has_no_prefixes() {
        assert_eq!(count_prefixes("policy-options { }"), 0);
    }
}
