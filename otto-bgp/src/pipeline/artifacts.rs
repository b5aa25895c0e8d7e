//! Persists generated policies to the output tree and reads the previous
//! run's files back as prefix-count baselines for the change-ratio
//! guardrail.
//!
//! Layout: `<output_dir>/routers/<hostname>/AS<N>_policy.txt` per router,
//! plus a combined `<output_dir>/bgpq4_output.txt`.

use crate::bgpq4::PolicyArtifact;
use crate::guardrails::HistoricalBaseline;
use crate::parser::RouterProfile;
use crate::util::prefixes::count_prefixes;
use otto_bgp_fs::directory_manager::DirectoryManager;
use otto_bgp_fs::file::reader::FileReader;
use otto_bgp_fs::file::writer::FileWriter;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const COMBINED_FILE_NAME: &str = "bgpq4_output.txt";
pub const ROUTERS_DIR_NAME: &str = "routers";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("failed to write policy file {path}: {detail}")]
    Write { path: PathBuf, detail: String },
}

pub fn policy_file_name(as_number: u32) -> String {
    format!("AS{as_number}_policy.txt")
}

pub struct PolicyFiles;

impl PolicyFiles {
    /// Write each router's policies under `routers/<hostname>/`, one file
    /// per AS the router peers with. Returns the paths written.
    pub fn write_router_aware<F>(
        file: &F,
        profiles: &[RouterProfile],
        artifacts: &[PolicyArtifact],
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ArtifactError>
    where
        F: FileWriter + DirectoryManager,
    {
        let mut written = Vec::new();
        for profile in profiles {
            let router_dir = output_dir.join(ROUTERS_DIR_NAME).join(&profile.hostname);
            let router_artifacts: Vec<&PolicyArtifact> = artifacts
                .iter()
                .filter(|artifact| profile.discovered_as_numbers.contains(&artifact.as_number))
                .collect();
            if router_artifacts.is_empty() {
                continue;
            }

            file.ensure_dir(&router_dir).map_err(|err| ArtifactError::Write {
                path: router_dir.clone(),
                detail: err.to_string(),
            })?;

            for artifact in router_artifacts {
                let path = router_dir.join(policy_file_name(artifact.as_number));
                file.write(&path, &artifact.juniper_text)
                    .map_err(|err| ArtifactError::Write {
                        path: path.clone(),
                        detail: err.to_string(),
                    })?;
                written.push(path);
            }
        }
        Ok(written)
    }

    /// Write the combined output file: every artifact in ascending AS
    /// order, concatenated byte-for-byte as bgpq4 produced them.
    pub fn write_combined<F>(
        file: &F,
        artifacts: &[PolicyArtifact],
        output_dir: &Path,
    ) -> Result<PathBuf, ArtifactError>
    where
        F: FileWriter,
    {
        let mut ordered: Vec<&PolicyArtifact> = artifacts.iter().collect();
        ordered.sort_by_key(|artifact| artifact.as_number);

        let mut combined = String::new();
        for artifact in ordered {
            combined.push_str(&artifact.juniper_text);
        }

        let path = output_dir.join(COMBINED_FILE_NAME);
        file.write(&path, &combined).map_err(|err| ArtifactError::Write {
            path: path.clone(),
            detail: err.to_string(),
        })?;
        Ok(path)
    }

    /// Read the previous run's per-router policy files and count their
    /// prefixes. Routers with no prior files get no baseline, which the
    /// change-ratio guardrail treats as "first run, nothing to compare".
    pub fn load_baselines<F>(
        file: &F,
        profiles: &[RouterProfile],
        output_dir: &Path,
    ) -> BTreeMap<String, HistoricalBaseline>
    where
        F: FileReader,
    {
        let mut baselines = BTreeMap::new();
        for profile in profiles {
            let router_dir = output_dir.join(ROUTERS_DIR_NAME).join(&profile.hostname);
            let Ok(entries) = file.dir_entries(&router_dir) else {
                continue;
            };

            let mut total = 0usize;
            let mut any = false;
            for entry in entries {
                let Ok(contents) = file.read(&entry) else {
                    continue;
                };
                total += count_prefixes(&contents);
                any = true;
            }
            if any {
                baselines.insert(
                    profile.hostname.clone(),
                    HistoricalBaseline {
                        previous_prefix_count: total,
                    },
                );
            }
        }
        baselines
    }
}
