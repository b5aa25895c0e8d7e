use super::LocalFile;
use std::fs;
use std::io;
use std::path::Path;

pub trait FileDeleter {
    /// Delete `file_path`. A missing file is not an error: releasing an
    /// already-released lock file must be idempotent across exit paths.
    fn delete(&self, file_path: &Path) -> io::Result<()>;
}

impl FileDeleter for LocalFile {
    fn delete(&self, file_path: &Path) -> io::Result<()> {
        match fs::remove_file(file_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deletes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operation.lock");
        fs::write(&path, "1234").unwrap();
        LocalFile.delete(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn deleting_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalFile.delete(&dir.path().join("gone.lock")).is_ok());
    }
}
