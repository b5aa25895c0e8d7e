//! Parses Juniper `protocols { bgp { group ... { neighbor ... { peer-as N; } } } }`
//! blocks collected by the SSH collector, extracting per-group AS numbers
//! into a `RouterProfile`. Falls back to a regex sweep for `peer-as N` when
//! full structural parsing fails.

pub mod as_number;

use crate::collector::CollectionResult;
use as_number::{is_reserved_range, validate_as_number};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("no protocols/bgp block found and fallback regex found zero peer-as values")]
    NothingFound,
    #[error("unbalanced braces in configuration text")]
    UnbalancedBraces,
}

#[derive(Debug, Clone)]
pub struct RouterMetadata {
    pub collected_at: DateTime<Utc>,
    pub platform: String,
    pub source: String,
}

/// Group-level `import`/`export` policy references, kept for operator
/// context only; the pipeline never applies or rewrites them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPolicyRefs {
    pub import: Vec<String>,
    pub export: Vec<String>,
}

/// Enriched per-router state. Created by the collector with an empty
/// discovery section, then enriched in place by the parser.
#[derive(Debug, Clone)]
pub struct RouterProfile {
    pub hostname: String,
    pub address: String,
    pub bgp_config: String,
    pub discovered_as_numbers: BTreeSet<u32>,
    pub bgp_groups: BTreeMap<String, BTreeSet<u32>>,
    pub group_policy_refs: BTreeMap<String, GroupPolicyRefs>,
    pub metadata: RouterMetadata,
    pub partially_parsed: bool,
}

impl RouterProfile {
    pub fn new(hostname: impl Into<String>, address: impl Into<String>, bgp_config: String) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
            bgp_config,
            discovered_as_numbers: BTreeSet::new(),
            bgp_groups: BTreeMap::new(),
            group_policy_refs: BTreeMap::new(),
            metadata: RouterMetadata {
                collected_at: Utc::now(),
                platform: "junos".to_string(),
                source: "ssh".to_string(),
            },
            partially_parsed: false,
        }
    }

    /// Invariant: every AS referenced by a group also appears in the
    /// router-wide discovered set.
    pub fn check_invariants(&self) -> bool {
        self.bgp_groups
            .values()
            .flatten()
            .all(|asn| self.discovered_as_numbers.contains(asn))
    }
}

pub struct BGPConfigParser;

impl BGPConfigParser {
    /// Parse every successfully-collected router's config, building one
    /// `RouterProfile` per device. Collection failures are skipped (the
    /// orchestrator already excluded them from downstream stages).
    pub fn parse_all(results: &[CollectionResult]) -> Vec<RouterProfile> {
        results
            .iter()
            .filter_map(|result| result.raw_config.as_ref().map(|cfg| (result, cfg)))
            .map(|(result, cfg)| {
                let mut profile =
                    RouterProfile::new(result.hostname.clone(), result.address.clone(), cfg.clone());
                Self::parse_into(&mut profile);
                profile
            })
            .collect()
    }

    pub fn parse_into(profile: &mut RouterProfile) {
        match parse_groups(&profile.bgp_config) {
            Ok(groups) => {
                for (name, group) in groups {
                    profile.discovered_as_numbers.extend(&group.as_numbers);
                    profile.bgp_groups.insert(name.clone(), group.as_numbers);
                    if group.policy_refs != GroupPolicyRefs::default() {
                        profile.group_policy_refs.insert(name, group.policy_refs);
                    }
                }
            }
            Err(_) => {
                profile.partially_parsed = true;
                let asns = fallback_extract(&profile.bgp_config);
                profile.discovered_as_numbers.extend(&asns);
                if !asns.is_empty() {
                    profile
                        .bgp_groups
                        .insert("__unstructured__".to_string(), asns);
                }
            }
        }

        for asn in &profile.discovered_as_numbers {
            if is_reserved_range(*asn) {
                warn!(hostname = %profile.hostname, asn, "peer AS is in a reserved range");
            }
        }
    }
}

struct ParsedGroup {
    as_numbers: BTreeSet<u32>,
    policy_refs: GroupPolicyRefs,
}

fn parse_groups(text: &str) -> Result<BTreeMap<String, ParsedGroup>, ParseError> {
    let bgp_block = extract_named_block(text, "bgp").ok_or(ParseError::NothingFound)?;

    let group_re = Regex::new(r"group\s+([A-Za-z0-9_.\-]+)\s*\{").unwrap();
    let mut groups = BTreeMap::new();

    for caps in group_re.captures_iter(&bgp_block) {
        let name_match = caps.get(0).unwrap();
        let name = caps.get(1).unwrap().as_str().to_string();
        let brace_pos = name_match.end() - 1;
        let Some((content, _end)) = extract_balanced(&bgp_block, brace_pos) else {
            continue;
        };

        let mut asns = BTreeSet::new();
        for n in find_peer_as(&content) {
            asns.insert(n);
        }
        groups.insert(
            name,
            ParsedGroup {
                as_numbers: asns,
                policy_refs: parse_policy_refs(&content),
            },
        );
    }

    if groups.is_empty() {
        return Err(ParseError::NothingFound);
    }

    Ok(groups)
}

/// Group-level `import [ A B ];` / `export POLICY;` references.
fn parse_policy_refs(block: &str) -> GroupPolicyRefs {
    let re = Regex::new(r"\b(import|export)\s+(\[[^\]]*\]|[A-Za-z0-9_.\-]+)\s*;").unwrap();
    let mut refs = GroupPolicyRefs::default();
    for caps in re.captures_iter(block) {
        let names: Vec<String> = caps[2]
            .trim_matches(|c| c == '[' || c == ']')
            .split_whitespace()
            .map(str::to_string)
            .collect();
        match &caps[1] {
            "import" => refs.import.extend(names),
            _ => refs.export.extend(names),
        }
    }
    refs
}

fn find_peer_as(block: &str) -> Vec<u32> {
    let peer_as_re = Regex::new(r"peer-as\s+(\S+)\s*;").unwrap();
    peer_as_re
        .captures_iter(block)
        .filter_map(|c| validate_as_number(&c[1]).ok())
        .collect()
}

/// Regex-only fallback used when structural parsing fails entirely.
/// Applies the bare-integer-octet guard since this path scans
/// raw, possibly-mixed text rather than a validated `peer-as` statement.
fn fallback_extract(text: &str) -> BTreeSet<u32> {
    const SMALL_AS_ALLOWLIST: &[u32] = &[0, 23456];
    let peer_as_re = Regex::new(r"peer-as\s+(\S+)\s*;").unwrap();
    peer_as_re
        .captures_iter(text)
        .filter_map(|c| validate_as_number(&c[1]).ok())
        .filter(|asn| *asn > 255 || SMALL_AS_ALLOWLIST.contains(asn))
        .collect()
}

/// Find `<name> { ... }` anywhere in `text` and return the raw block
/// contents (braces excluded), tolerating nested nameless braces.
fn extract_named_block(text: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(r"\b{}\s*\{{", regex::escape(name))).unwrap();
    let m = re.find(text)?;
    let brace_pos = m.end() - 1;
    extract_balanced(text, brace_pos).map(|(content, _)| content)
}

/// Given the byte index of an opening `{`, return `(content, index_after_closing_brace)`.
fn extract_balanced(text: &str, open_brace_idx: usize) -> Option<(String, usize)> {
    let bytes = text.as_bytes();
    if bytes.get(open_brace_idx) != Some(&b'{') {
        return None;
    }
    let mut depth = 0i32;
    let mut i = open_brace_idx;
    let content_start = open_brace_idx + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((text[content_start..i].to_string(), i + 1));
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}
