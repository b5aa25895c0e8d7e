//! Device inventory CSV loader: a thin parse step producing immutable,
//! validated `DeviceInfo` records, parsed once and never mutated.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("failed to open inventory file {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed CSV row {row}: {source}")]
    Csv {
        row: usize,
        #[source]
        source: csv::Error,
    },
    #[error("row {row}: address is required and must be non-empty")]
    EmptyAddress { row: usize },
    #[error("row {row}: duplicate hostname '{hostname}'")]
    DuplicateHostname { row: usize, hostname: String },
    #[error("row {row}: hostname '{hostname}' contains characters outside [A-Za-z0-9.-]")]
    InvalidHostname { row: usize, hostname: String },
}

/// One router's connection identity. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub address: String,
    pub hostname: String,
    pub username: Option<String>,
    pub port: u16,
    pub role: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InventoryRow {
    address: String,
    hostname: Option<String>,
    role: Option<String>,
    region: Option<String>,
    username: Option<String>,
    port: Option<u16>,
}

pub struct InventoryLoader;

impl InventoryLoader {
    pub fn load(path: &Path) -> Result<Vec<DeviceInfo>, InventoryError> {
        let contents = std::fs::read_to_string(path).map_err(|source| InventoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Vec<DeviceInfo>, InventoryError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(contents.as_bytes());

        let mut devices = Vec::new();
        let mut seen_hostnames: HashSet<String> = HashSet::new();

        for (idx, result) in reader.deserialize::<InventoryRow>().enumerate() {
            let row_num = idx + 2; // header is row 1
            let row = result.map_err(|source| InventoryError::Csv { row: row_num, source })?;

            if row.address.trim().is_empty() {
                return Err(InventoryError::EmptyAddress { row: row_num });
            }

            let hostname = row
                .hostname
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| format!("router-{}", slugify(&row.address)));

            if !is_valid_hostname(&hostname) {
                return Err(InventoryError::InvalidHostname {
                    row: row_num,
                    hostname,
                });
            }

            if !seen_hostnames.insert(hostname.clone()) {
                return Err(InventoryError::DuplicateHostname {
                    row: row_num,
                    hostname,
                });
            }

            devices.push(DeviceInfo {
                address: row.address.trim().to_string(),
                hostname,
                username: row.username,
                port: row.port.unwrap_or(crate::config::defaults::DEFAULT_SSH_PORT),
                role: row.role,
                region: row.region,
            });
        }

        Ok(devices)
    }
}

fn slugify(address: &str) -> String {
    address
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

fn is_valid_hostname(hostname: &str) -> bool {
    !hostname.is_empty()
        && hostname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}
