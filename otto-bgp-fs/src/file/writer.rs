use super::LocalFile;
use crate::paths::{PathError, artifact_permissions, ensure_safe_path};
use std::io::Write;
use std::path::Path;
use std::{fs, io};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("unsafe path: {0}")]
    UnsafePath(#[from] PathError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub trait FileWriter {
    fn write(&self, path: &Path, contents: &str) -> Result<(), WriteError>;
}

impl FileWriter for LocalFile {
    /// Write `contents` to `path`, creating parent directories as needed.
    /// The file is created with artifact permissions (0644) and synced
    /// before returning, so a follow-up rename lands a complete file.
    #[instrument(skip_all, fields(path = %path.display()))]
    fn write(&self, path: &Path, contents: &str) -> Result<(), WriteError> {
        ensure_safe_path(path)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file_options = fs::OpenOptions::new();
        file_options.create(true).write(true).truncate(true);
        {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            file_options.mode(artifact_permissions().mode());
        }

        let mut file = file_options.open(path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}
