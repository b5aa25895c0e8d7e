//! Writes and reads the router-AS YAML mapping, maintaining a timestamped
//! history and diff report. Atomic writes are built from the fs crate's
//! writer + renamer traits (temp file, then rename) rather than a direct
//! truncate.

use crate::parser::RouterProfile;
use chrono::{DateTime, Utc};
use otto_bgp_fs::directory_manager::DirectoryManager;
use otto_bgp_fs::file::{LocalFile, reader::FileReader, renamer::FileRenamer, writer::FileWriter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MAPPING_FILE_NAME: &str = "router_mappings.yaml";

/// First line of every file this store writes. Its absence on an existing
/// mapping means someone edited or replaced the file by hand; we warn and
/// archive it before overwriting.
const AUTOGENERATED_HEADER: &str = "# Auto-generated by otto-bgp discovery. Do not edit.";

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("failed to read existing mapping: {0}")]
    Read(String),
    #[error("failed to write mapping: {0}")]
    Write(String),
    #[error("failed to serialize mapping: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterEntry {
    pub address: String,
    pub discovered_as_numbers: Vec<u32>,
    pub bgp_groups: BTreeMap<String, Vec<u32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryMetadata {
    pub generated_at: DateTime<Utc>,
    pub version: u32,
    pub router_count: usize,
    pub as_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryMapping {
    pub routers: BTreeMap<String, RouterEntry>,
    pub as_to_routers: BTreeMap<u32, Vec<String>>,
    pub metadata: DiscoveryMetadata,
}

impl DiscoveryMapping {
    pub fn from_profiles(profiles: &[RouterProfile]) -> Self {
        let mut routers = BTreeMap::new();
        let mut as_to_routers: BTreeMap<u32, Vec<String>> = BTreeMap::new();

        for profile in profiles {
            let mut sorted_as: Vec<u32> = profile.discovered_as_numbers.iter().copied().collect();
            sorted_as.sort_unstable();

            for asn in &sorted_as {
                as_to_routers
                    .entry(*asn)
                    .or_default()
                    .push(profile.hostname.clone());
            }

            let bgp_groups = profile
                .bgp_groups
                .iter()
                .map(|(name, set)| (name.clone(), set.iter().copied().collect()))
                .collect();

            routers.insert(
                profile.hostname.clone(),
                RouterEntry {
                    address: profile.address.clone(),
                    discovered_as_numbers: sorted_as,
                    bgp_groups,
                },
            );
        }

        for routers_for_as in as_to_routers.values_mut() {
            routers_for_as.sort();
        }

        let as_count = as_to_routers.len();
        let router_count = routers.len();

        Self {
            routers,
            as_to_routers,
            metadata: DiscoveryMetadata {
                generated_at: Utc::now(),
                version: 1,
                router_count,
                as_count,
            },
        }
    }

    /// Equality ignoring `metadata.generated_at`, used to decide whether a
    /// rewrite actually changes anything.
    fn content_eq(&self, other: &Self) -> bool {
        self.routers == other.routers && self.as_to_routers == other.as_to_routers
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouterAsDelta {
    pub added: Vec<u32>,
    pub removed: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiscoveryChanges {
    pub added_routers: Vec<String>,
    pub removed_routers: Vec<String>,
    pub added_as_numbers: Vec<u32>,
    pub removed_as_numbers: Vec<u32>,
    pub per_router_deltas: BTreeMap<String, RouterAsDelta>,
}

pub enum WriteOutcome {
    Unchanged,
    Changed { changes: DiscoveryChanges },
}

pub struct DiscoveryStore;

impl DiscoveryStore {
    pub fn write(profiles: &[RouterProfile], output_dir: &Path) -> Result<WriteOutcome, DiscoveryError> {
        Self::write_with(&LocalFile, profiles, output_dir)
    }

    /// Same as `write`, generic over the file traits so failure paths can be
    /// exercised against `MockLocalFile`.
    pub fn write_with<F>(
        file: &F,
        profiles: &[RouterProfile],
        output_dir: &Path,
    ) -> Result<WriteOutcome, DiscoveryError>
    where
        F: FileReader + FileWriter + FileRenamer + DirectoryManager,
    {
        let mapping_path = output_dir.join(MAPPING_FILE_NAME);
        let new_mapping = DiscoveryMapping::from_profiles(profiles);

        let previous_raw = match file.read(&mapping_path) {
            Ok(contents) => Some(contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(DiscoveryError::Read(err.to_string())),
        };
        if let Some(raw) = &previous_raw {
            if !raw.starts_with(AUTOGENERATED_HEADER) {
                tracing::warn!(
                    path = %mapping_path.display(),
                    "existing mapping lacks the auto-generated header, archiving manual edits before overwrite"
                );
            }
        }
        let previous = previous_raw
            .as_deref()
            .and_then(|raw| serde_yaml::from_str::<DiscoveryMapping>(raw).ok());

        if let Some(previous) = &previous {
            if previous.content_eq(&new_mapping) {
                return Ok(WriteOutcome::Unchanged);
            }
        }

        let history_dir = output_dir.join("history");
        file.ensure_dir(&history_dir)
            .map_err(|err| DiscoveryError::Write(err.to_string()))?;

        let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let changes = diff_mappings(previous.as_ref(), &new_mapping);

        if let Some(previous_contents) = &previous_raw {
            let archive_path =
                unclobbered_path(&history_dir, &format!("router_mappings_{timestamp}"), "yaml");
            atomic_write(file, &archive_path, previous_contents)
                .map_err(|err| DiscoveryError::Write(err.to_string()))?;
        }

        let changes_path = unclobbered_path(&history_dir, &format!("changes_{timestamp}"), "yaml");
        let changes_yaml = stamped(&serde_yaml::to_string(&changes)?);
        atomic_write(file, &changes_path, &changes_yaml)
            .map_err(|err| DiscoveryError::Write(err.to_string()))?;

        let new_contents = stamped(&serde_yaml::to_string(&new_mapping)?);
        atomic_write(file, &mapping_path, &new_contents)
            .map_err(|err| DiscoveryError::Write(err.to_string()))?;

        Ok(WriteOutcome::Changed { changes })
    }
}

fn stamped(yaml: &str) -> String {
    format!("{AUTOGENERATED_HEADER}\n{yaml}")
}

/// History files are immutable once written; with second-resolution
/// timestamps, back-to-back changes pick a suffixed name instead of
/// clobbering the earlier archive.
fn unclobbered_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = dir.join(format!("{stem}.{extension}"));
    if !candidate.exists() {
        return candidate;
    }
    let mut sequence = 2;
    loop {
        let candidate = dir.join(format!("{stem}-{sequence}.{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        sequence += 1;
    }
}

fn atomic_write<F>(file: &F, path: &Path, contents: &str) -> std::io::Result<()>
where
    F: FileWriter + FileRenamer,
{
    let tmp_path: PathBuf = path.with_extension("yaml.tmp");
    file.write(&tmp_path, contents)
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    file.rename(&tmp_path, path)
}

fn diff_mappings(previous: Option<&DiscoveryMapping>, new: &DiscoveryMapping) -> DiscoveryChanges {
    let mut changes = DiscoveryChanges::default();
    let Some(previous) = previous else {
        changes.added_routers = new.routers.keys().cloned().collect();
        changes.added_as_numbers = new.as_to_routers.keys().copied().collect();
        return changes;
    };

    for hostname in new.routers.keys() {
        if !previous.routers.contains_key(hostname) {
            changes.added_routers.push(hostname.clone());
        }
    }
    for hostname in previous.routers.keys() {
        if !new.routers.contains_key(hostname) {
            changes.removed_routers.push(hostname.clone());
        }
    }

    for asn in new.as_to_routers.keys() {
        if !previous.as_to_routers.contains_key(asn) {
            changes.added_as_numbers.push(*asn);
        }
    }
    for asn in previous.as_to_routers.keys() {
        if !new.as_to_routers.contains_key(asn) {
            changes.removed_as_numbers.push(*asn);
        }
    }

    for (hostname, entry) in &new.routers {
        if let Some(prev_entry) = previous.routers.get(hostname) {
            let prev_set: std::collections::BTreeSet<u32> =
                prev_entry.discovered_as_numbers.iter().copied().collect();
            let new_set: std::collections::BTreeSet<u32> =
                entry.discovered_as_numbers.iter().copied().collect();
            let added: Vec<u32> = new_set.difference(&prev_set).copied().collect();
            let removed: Vec<u32> = prev_set.difference(&new_set).copied().collect();
            if !added.is_empty() || !removed.is_empty() {
                changes
                    .per_router_deltas
                    .insert(hostname.clone(), RouterAsDelta { added, removed });
            }
        }
    }

    changes
}
