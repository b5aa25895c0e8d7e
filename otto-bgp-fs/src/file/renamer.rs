use super::LocalFile;
use std::fs;
use std::io;
use std::path::Path;

pub trait FileRenamer {
    /// Rename `file_path` to `rename_path`. On the same filesystem this is
    /// atomic, which is what makes the temp-then-rename write safe against
    /// readers observing a half-written mapping.
    fn rename(&self, file_path: &Path, rename_path: &Path) -> io::Result<()>;
}

impl FileRenamer for LocalFile {
    fn rename(&self, file_path: &Path, rename_path: &Path) -> io::Result<()> {
        if !file_path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("rename source not found: {}", file_path.display()),
            ));
        }
        fs::rename(file_path, rename_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renames_over_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("mapping.yaml.tmp");
        let target = dir.path().join("mapping.yaml");
        fs::write(&tmp, "new").unwrap();
        fs::write(&target, "old").unwrap();

        LocalFile.rename(&tmp, &target).unwrap();

        assert!(!tmp.exists());
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
    }

    #[test]
    fn missing_source_is_not_found() {
        let err = LocalFile
            .rename(Path::new("/no/such/file"), Path::new("/elsewhere"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
