//! Validates generated prefix lists against a pre-fetched RPKI VRP cache.
//! We never speak to a validator protocol ourselves; we only consume
//! CSV/JSON caches someone else refreshed.

use crate::bgpq4::PolicyArtifact;
use crate::config::RpkiConfig;
use crate::util::prefixes::extract_prefixes;
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpkiError {
    #[error("failed to read VRP cache: {0}")]
    Io(String),
    #[error("failed to parse VRP cache: {0}")]
    Parse(String),
    #[error("no vrp_cache.csv or .json found under {0}")]
    CacheNotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VRPRecord {
    pub asn: u32,
    pub prefix: IpNetwork,
    pub max_length: u8,
    pub trust_anchor: Option<String>,
}

impl VRPRecord {
    pub fn new(asn: u32, prefix: IpNetwork, max_length: u8, trust_anchor: Option<String>) -> Self {
        let max_length = max_length.max(prefix.prefix());
        Self {
            asn,
            prefix,
            max_length,
            trust_anchor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RpkiStatus {
    Valid,
    Invalid,
    NotFound,
}

#[derive(Debug, Clone, Default)]
pub struct PolicyRpkiSummary {
    pub valid: usize,
    pub invalid: usize,
    pub not_found: usize,
    pub offending_prefixes: Vec<IpNetwork>,
}

/// One node of the per-family prefix trie. `records` holds the VRPs whose
/// prefix terminates exactly at this node, so walking a candidate's bits
/// from the root visits precisely the VRPs that cover it.
#[derive(Default)]
struct TrieNode {
    children: [Option<Box<TrieNode>>; 2],
    records: Vec<VRPRecord>,
}

impl TrieNode {
    fn insert(&mut self, bits: u128, prefix_len: u8, record: VRPRecord) {
        let mut node = self;
        for index in 0..prefix_len {
            let bit = ((bits >> (127 - index)) & 1) as usize;
            node = node.children[bit].get_or_insert_with(Default::default);
        }
        node.records.push(record);
    }

    /// Every record on the path from the root along `bits`, down to at most
    /// `prefix_len`: exactly the VRPs whose prefix contains the candidate.
    fn covering<'a>(&'a self, bits: u128, prefix_len: u8, out: &mut Vec<&'a VRPRecord>) {
        let mut node = self;
        out.extend(node.records.iter());
        for index in 0..prefix_len {
            let bit = ((bits >> (127 - index)) & 1) as usize;
            match &node.children[bit] {
                Some(child) => {
                    node = child;
                    out.extend(node.records.iter());
                }
                None => break,
            }
        }
    }
}

/// Left-align a network address into 128 bits so both families walk the
/// same trie code.
fn prefix_bits(network: &IpNetwork) -> u128 {
    match network {
        IpNetwork::V4(net) => (u32::from(net.network()) as u128) << 96,
        IpNetwork::V6(net) => u128::from(net.network()),
    }
}

/// VRPs indexed in one binary trie per address family, so a lookup walks
/// at most `prefix_length` nodes regardless of cache size. Records are
/// inserted one at a time as the cache is read, so even a multi-hundred-MB
/// JSON cache never exists in memory as anything but the trie.
pub struct VrpIndex {
    v4: TrieNode,
    v6: TrieNode,
    record_count: usize,
    pub loaded_at: DateTime<Utc>,
}

impl VrpIndex {
    fn empty(loaded_at: DateTime<Utc>) -> Self {
        Self {
            v4: TrieNode::default(),
            v6: TrieNode::default(),
            record_count: 0,
            loaded_at,
        }
    }

    pub fn from_records(records: Vec<VRPRecord>, loaded_at: DateTime<Utc>) -> Self {
        let mut index = Self::empty(loaded_at);
        for record in records {
            index.insert(record);
        }
        index
    }

    fn insert(&mut self, record: VRPRecord) {
        let bits = prefix_bits(&record.prefix);
        let prefix_len = record.prefix.prefix();
        let root = match record.prefix {
            IpNetwork::V4(_) => &mut self.v4,
            IpNetwork::V6(_) => &mut self.v6,
        };
        root.insert(bits, prefix_len, record);
        self.record_count += 1;
    }

    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.loaded_at);
        age.to_std().unwrap_or(Duration::MAX) > max_age
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    fn covering(&self, candidate: &IpNetwork) -> Vec<&VRPRecord> {
        let root = match candidate {
            IpNetwork::V4(_) => &self.v4,
            IpNetwork::V6(_) => &self.v6,
        };
        let mut found = Vec::new();
        root.covering(prefix_bits(candidate), candidate.prefix(), &mut found);
        found
    }

    pub fn validate(&self, candidate: &IpNetwork, origin_asn: u32, allowlist: &[IpNetwork]) -> RpkiStatus {
        let covering = self.covering(candidate);
        if covering
            .iter()
            .any(|record| record.asn == origin_asn && record.max_length >= candidate.prefix())
        {
            return RpkiStatus::Valid;
        }
        if !covering.is_empty() {
            return RpkiStatus::Invalid;
        }
        if allowlist.iter().any(|allowed| covers(allowed, candidate) || allowed == candidate) {
            return RpkiStatus::Valid;
        }
        RpkiStatus::NotFound
    }
}

fn covers(wide: &IpNetwork, narrow: &IpNetwork) -> bool {
    if wide.prefix() > narrow.prefix() {
        return false;
    }
    match (wide, narrow) {
        (IpNetwork::V4(w), IpNetwork::V4(n)) => w.contains(n.network()) && w.prefix() <= n.prefix(),
        (IpNetwork::V6(w), IpNetwork::V6(n)) => w.contains(n.network()) && w.prefix() <= n.prefix(),
        _ => false,
    }
}

/// routinator and rpki-client disagree on the ASN encoding: one emits
/// `"AS13335"`, the other a bare number. Accept both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RoaAsn {
    Number(u32),
    Text(String),
}

impl RoaAsn {
    fn resolve(&self) -> Result<u32, RpkiError> {
        match self {
            RoaAsn::Number(n) => Ok(*n),
            RoaAsn::Text(raw) => parse_asn(raw),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RoutinatorRoa {
    asn: RoaAsn,
    prefix: String,
    #[serde(rename = "maxLength")]
    max_length: u8,
    #[serde(rename = "ta", default)]
    trust_anchor: Option<String>,
}

impl RoutinatorRoa {
    fn into_record(self) -> Result<VRPRecord, RpkiError> {
        let asn = self.asn.resolve()?;
        let prefix = IpNetwork::from_str(&self.prefix)
            .map_err(|err| RpkiError::Parse(format!("invalid prefix '{}': {err}", self.prefix)))?;
        Ok(VRPRecord::new(asn, prefix, self.max_length, self.trust_anchor))
    }
}

/// Drives the `roas` array element-by-element: each entry becomes a trie
/// insertion as soon as it is decoded, so the file is never materialized
/// as a record list.
struct RoaSeqSeed<'a> {
    index: &'a mut VrpIndex,
}

impl<'de> serde::de::DeserializeSeed<'de> for RoaSeqSeed<'_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct RoaSeqVisitor<'a> {
            index: &'a mut VrpIndex,
        }

        impl<'de> serde::de::Visitor<'de> for RoaSeqVisitor<'_> {
            type Value = ();

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("an array of ROA objects")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<(), A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                while let Some(roa) = seq.next_element::<RoutinatorRoa>()? {
                    let record = roa.into_record().map_err(serde::de::Error::custom)?;
                    self.index.insert(record);
                }
                Ok(())
            }
        }

        deserializer.deserialize_seq(RoaSeqVisitor { index: self.index })
    }
}

/// Top-level document visitor: consumes the `roas` key into the trie and
/// skips everything else (routinator adds a `metadata` sibling).
struct RoasDocumentSeed<'a> {
    index: &'a mut VrpIndex,
}

impl<'de> serde::de::DeserializeSeed<'de> for RoasDocumentSeed<'_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct RoasDocumentVisitor<'a> {
            index: &'a mut VrpIndex,
        }

        impl<'de> serde::de::Visitor<'de> for RoasDocumentVisitor<'_> {
            type Value = ();

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("an object with a `roas` array")
            }

            fn visit_map<A>(self, mut map: A) -> Result<(), A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let index = self.index;
                let mut seen_roas = false;
                while let Some(key) = map.next_key::<String>()? {
                    if key == "roas" {
                        map.next_value_seed(RoaSeqSeed { index: &mut *index })?;
                        seen_roas = true;
                    } else {
                        map.next_value::<serde::de::IgnoredAny>()?;
                    }
                }
                if !seen_roas {
                    return Err(serde::de::Error::missing_field("roas"));
                }
                Ok(())
            }
        }

        deserializer.deserialize_map(RoasDocumentVisitor { index: self.index })
    }
}

pub struct RPKIValidator;

impl RPKIValidator {
    /// Load `vrp_cache.csv` or `vrp_cache.json` from `cache_dir`, preferring
    /// CSV when both exist. Both formats stream row-by-row into the trie.
    pub fn load_cache(cache_dir: &Path) -> Result<VrpIndex, RpkiError> {
        let csv_path = cache_dir.join("vrp_cache.csv");
        let json_path = cache_dir.join("vrp_cache.json");

        if csv_path.is_file() {
            let mut index = VrpIndex::empty(file_modified_at(&csv_path)?);
            Self::parse_csv_into(&csv_path, &mut index)?;
            Ok(index)
        } else if json_path.is_file() {
            let mut index = VrpIndex::empty(file_modified_at(&json_path)?);
            Self::parse_json_into(&json_path, &mut index)?;
            Ok(index)
        } else {
            Err(RpkiError::CacheNotFound(cache_dir.display().to_string()))
        }
    }

    /// Columns are positional (`ASN,IP Prefix,Max Length,Trust Anchor`);
    /// rows with a missing or unparseable field are skipped, not fatal.
    fn parse_csv_into(path: &Path, index: &mut VrpIndex) -> Result<(), RpkiError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|err| RpkiError::Io(err.to_string()))?;

        for row in reader.records() {
            let row = row.map_err(|err| RpkiError::Parse(err.to_string()))?;
            let (Some(asn_raw), Some(prefix_raw), Some(max_length_raw)) =
                (row.get(0), row.get(1), row.get(2))
            else {
                continue;
            };
            if asn_raw.trim().is_empty() || prefix_raw.trim().is_empty() || max_length_raw.trim().is_empty() {
                continue;
            }

            let (Ok(asn), Ok(prefix), Ok(max_length)) = (
                parse_asn(asn_raw),
                IpNetwork::from_str(prefix_raw.trim()),
                max_length_raw.trim().parse::<u8>(),
            ) else {
                tracing::warn!(row = ?row, "skipping unparseable VRP cache row");
                continue;
            };

            let trust_anchor = row
                .get(3)
                .map(str::trim)
                .filter(|ta| !ta.is_empty())
                .map(str::to_string);
            index.insert(VRPRecord::new(asn, prefix, max_length, trust_anchor));
        }
        Ok(())
    }

    /// Streams the routinator/rpki-client document off a buffered reader;
    /// each ROA lands in the trie as it is decoded, so the file is never
    /// held in memory whole.
    fn parse_json_into(path: &Path, index: &mut VrpIndex) -> Result<(), RpkiError> {
        use serde::de::DeserializeSeed;

        let file = std::fs::File::open(path).map_err(|err| RpkiError::Io(err.to_string()))?;
        let reader = std::io::BufReader::new(file);
        let mut deserializer = serde_json::Deserializer::from_reader(reader);
        RoasDocumentSeed { index }
            .deserialize(&mut deserializer)
            .map_err(|err| RpkiError::Parse(err.to_string()))?;
        deserializer
            .end()
            .map_err(|err| RpkiError::Parse(err.to_string()))
    }

    /// Annotate one artifact's prefixes, returning a policy-level summary.
    /// `fail_closed` governs behavior when the cache is stale: `true`
    /// rejects every prefix as INVALID (autonomous runs), `false` validates
    /// anyway but the caller should surface a staleness warning
    /// (interactive runs).
    pub fn validate_artifact(
        index: &VrpIndex,
        artifact: &PolicyArtifact,
        config: &RpkiConfig,
        fail_closed: bool,
        offending_limit: usize,
    ) -> PolicyRpkiSummary {
        let stale = index.is_stale(config.max_age, Utc::now());
        let allowlist: Vec<IpNetwork> = config
            .allowlist
            .iter()
            .filter_map(|entry| IpNetwork::from_str(entry).ok())
            .collect();
        let mut summary = PolicyRpkiSummary::default();

        for prefix in extract_prefixes(&artifact.juniper_text) {
            let status = if stale && fail_closed {
                RpkiStatus::Invalid
            } else {
                index.validate(&prefix, artifact.as_number, &allowlist)
            };

            match status {
                RpkiStatus::Valid => summary.valid += 1,
                RpkiStatus::Invalid => {
                    summary.invalid += 1;
                    if summary.offending_prefixes.len() < offending_limit {
                        summary.offending_prefixes.push(prefix);
                    }
                }
                RpkiStatus::NotFound => summary.not_found += 1,
            }
        }

        summary
    }
}

fn file_modified_at(path: &Path) -> Result<DateTime<Utc>, RpkiError> {
    let metadata = std::fs::metadata(path).map_err(|err| RpkiError::Io(err.to_string()))?;
    let modified = metadata
        .modified()
        .map_err(|err| RpkiError::Io(err.to_string()))?;
    Ok(DateTime::<Utc>::from(modified))
}

fn parse_asn(raw: &str) -> Result<u32, RpkiError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("AS").or_else(|| trimmed.strip_prefix("as")).unwrap_or(trimmed);
    digits
        .parse::<u32>()
        .map_err(|_| RpkiError::Parse(format!("invalid asn '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(net: &str) -> IpNetwork {
        IpNetwork::from_str(net).unwrap()
    }

    fn index_with(records: Vec<VRPRecord>) -> VrpIndex {
        VrpIndex::from_records(records, Utc::now())
    }

    #[test]
    fn exact_match_within_max_length_is_valid() {
        let index = index_with(vec![VRPRecord::new(13335, v4("192.0.2.0/24"), 24, None)]);
        let status = index.validate(&v4("192.0.2.0/24"), 13335, &[]);
        assert_eq!(status, RpkiStatus::Valid);
    }

    #[test]
    fn deaggregated_prefix_beyond_max_length_is_invalid() {
        let index = index_with(vec![VRPRecord::new(13335, v4("192.0.2.0/24"), 24, None)]);
        let status = index.validate(&v4("192.0.2.0/25"), 13335, &[]);
        assert_eq!(status, RpkiStatus::Invalid);
    }

    #[test]
    fn wrong_origin_with_covering_vrp_is_invalid() {
        let index = index_with(vec![VRPRecord::new(13335, v4("192.0.2.0/24"), 24, None)]);
        let status = index.validate(&v4("192.0.2.0/24"), 64500, &[]);
        assert_eq!(status, RpkiStatus::Invalid);
    }

    #[test]
    fn uncovered_prefix_is_not_found_unless_allowlisted() {
        let index = index_with(vec![VRPRecord::new(13335, v4("192.0.2.0/24"), 24, None)]);
        assert_eq!(index.validate(&v4("203.0.113.0/24"), 13335, &[]), RpkiStatus::NotFound);
        assert_eq!(
            index.validate(&v4("203.0.113.0/24"), 13335, &[v4("203.0.113.0/24")]),
            RpkiStatus::Valid
        );
    }

    #[test]
    fn staleness_is_detected_against_max_age() {
        let index = VrpIndex::from_records(vec![], Utc::now() - chrono::Duration::seconds(90000));
        assert!(index.is_stale(Duration::from_secs(86400), Utc::now()));
        assert!(!index.is_stale(Duration::from_secs(100000), Utc::now()));
    }

    #[test]
    fn record_count_sums_across_families() {
        let index = index_with(vec![
            VRPRecord::new(13335, v4("192.0.2.0/24"), 24, None),
            VRPRecord::new(15169, IpNetwork::from_str("2001:db8::/32").unwrap(), 48, None),
        ]);
        assert_eq!(index.record_count(), 2);
    }

    #[test]
    fn trie_collects_every_covering_length() {
        // A /8 and a /16 both cover the /24 candidate; the /8 belongs to
        // the right origin so the candidate validates despite the /16
        // pointing elsewhere.
        let index = index_with(vec![
            VRPRecord::new(13335, v4("10.0.0.0/8"), 24, None),
            VRPRecord::new(64500, v4("10.1.0.0/16"), 24, None),
        ]);
        assert_eq!(index.validate(&v4("10.1.2.0/24"), 13335, &[]), RpkiStatus::Valid);
        assert_eq!(index.validate(&v4("10.1.2.0/24"), 65000, &[]), RpkiStatus::Invalid);
    }

    #[test]
    fn families_do_not_cross_cover() {
        let index = index_with(vec![VRPRecord::new(13335, v4("192.0.2.0/24"), 24, None)]);
        let v6_candidate = IpNetwork::from_str("2001:db8::/32").unwrap();
        assert_eq!(index.validate(&v6_candidate, 13335, &[]), RpkiStatus::NotFound);
    }

    #[test]
    fn ipv6_lookup_walks_its_own_trie() {
        let index = index_with(vec![VRPRecord::new(
            13335,
            IpNetwork::from_str("2001:db8::/32").unwrap(),
            48,
            None,
        )]);
        let more_specific = IpNetwork::from_str("2001:db8:1::/48").unwrap();
        assert_eq!(index.validate(&more_specific, 13335, &[]), RpkiStatus::Valid);
        let too_long = IpNetwork::from_str("2001:db8:1:1::/64").unwrap();
        assert_eq!(index.validate(&too_long, 13335, &[]), RpkiStatus::Invalid);
    }

    #[test]
    fn csv_cache_parses_spec_header_and_skips_incomplete_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vrp_cache.csv");
        std::fs::write(
            &path,
            "ASN,IP Prefix,Max Length,Trust Anchor\n\
             AS13335,192.0.2.0/24,24,arin\n\
             13335,198.51.100.0/24,25,\n\
             ,203.0.113.0/24,24,ripe\n\
             AS15169,badprefix,24,ripe\n",
        )
        .unwrap();

        let index = RPKIValidator::load_cache(dir.path()).unwrap();
        assert_eq!(index.record_count(), 2);
        assert_eq!(index.validate(&v4("192.0.2.0/24"), 13335, &[]), RpkiStatus::Valid);
    }

    #[test]
    fn json_cache_accepts_string_and_numeric_asns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("vrp_cache.json"),
            r#"{
  "metadata": { "generated": 1700000000 },
  "roas": [
    { "asn": "AS13335", "prefix": "192.0.2.0/24", "maxLength": 24, "ta": "arin" },
    { "asn": 15169, "prefix": "198.51.100.0/24", "maxLength": 24 }
  ]
}"#,
        )
        .unwrap();

        let index = RPKIValidator::load_cache(dir.path()).unwrap();
        assert_eq!(index.record_count(), 2);
        assert_eq!(index.validate(&v4("192.0.2.0/24"), 13335, &[]), RpkiStatus::Valid);
        assert_eq!(index.validate(&v4("198.51.100.0/24"), 15169, &[]), RpkiStatus::Valid);
    }

    #[test]
    fn json_cache_without_roas_key_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vrp_cache.json"), r#"{ "metadata": {} }"#).unwrap();
        let result = RPKIValidator::load_cache(dir.path());
        assert!(matches!(result, Err(RpkiError::Parse(_))));
    }

    #[test]
    fn artifact_summary_counts_each_status() {
        let index = index_with(vec![VRPRecord::new(13335, v4("192.0.2.0/24"), 24, None)]);
        let artifact = PolicyArtifact {
            as_number: 13335,
            policy_name: "AS13335".to_string(),
            juniper_text: "192.0.2.0/24;\n192.0.2.0/25;\n203.0.113.0/24;\n".to_string(),
            source_irr: None,
        };
        let summary =
            RPKIValidator::validate_artifact(&index, &artifact, &RpkiConfig::default(), false, 10);
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.offending_prefixes, vec![v4("192.0.2.0/25")]);
    }
}
