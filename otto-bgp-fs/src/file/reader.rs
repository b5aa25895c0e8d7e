use super::LocalFile;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub trait FileReader {
    /// Read `file_path` and return its contents as UTF-8 text.
    fn read(&self, file_path: &Path) -> io::Result<String>;

    /// List the entries of `dir_path`, sorted by name so history listings
    /// and baseline scans are deterministic.
    fn dir_entries(&self, dir_path: &Path) -> io::Result<Vec<PathBuf>>;
}

impl FileReader for LocalFile {
    fn read(&self, file_path: &Path) -> io::Result<String> {
        if !file_path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found or not a file: {}", file_path.display()),
            ));
        }

        let bytes = fs::read(file_path)?;
        String::from_utf8(bytes).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not valid UTF-8: {err}", file_path.display()),
            )
        })
    }

    fn dir_entries(&self, dir_path: &Path) -> io::Result<Vec<PathBuf>> {
        if !dir_path.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {}", dir_path.display()),
            ));
        }

        let mut entries = fs::read_dir(dir_path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_utf8_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.yaml");
        fs::write(&path, "routers: {}\n").unwrap();
        assert_eq!(LocalFile.read(&path).unwrap(), "routers: {}\n");
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = LocalFile.read(Path::new("/does/not/exist.yaml")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn non_utf8_contents_are_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binary.bin");
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        let err = LocalFile.read(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn dir_entries_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.txt", "c.txt"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        let entries = LocalFile.dir_entries(dir.path()).unwrap();
        let names: Vec<_> = entries
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }
}
