use crate::file::LocalFile;
use crate::paths::{directory_permissions, ensure_safe_path};
use std::fs::DirBuilder;
use std::io;
use std::path::Path;
use tracing::instrument;

pub trait DirectoryManager {
    /// Create `path` and any missing parents with the output-tree
    /// permissions. Existing directories are left untouched.
    fn ensure_dir(&self, path: &Path) -> io::Result<()>;

    /// Remove `path` and its contents. A missing directory is not an error.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;
}

impl DirectoryManager for LocalFile {
    fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        ensure_safe_path(path).map_err(|err| io::Error::other(err.to_string()))?;

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        {
            use std::os::unix::fs::DirBuilderExt;
            use std::os::unix::fs::PermissionsExt;
            builder.mode(directory_permissions().mode());
        }
        builder.create(path)
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        ensure_safe_path(path).map_err(|err| io::Error::other(err.to_string()))?;
        if !path.exists() {
            return Ok(());
        }
        std::fs::remove_dir_all(path)
    }
}
