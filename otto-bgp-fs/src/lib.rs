//! Filesystem primitives for the policy pipeline: safe path handling,
//! atomic-rename friendly writes, and mockable reader/writer/renamer/deleter
//! traits so stores and report writers can be unit-tested without disk.

pub mod directory_manager;
pub mod file;
pub mod paths;

#[cfg(feature = "mocks")]
pub mod mock {
    use std::io;
    use std::path::Path;
    use std::path::PathBuf;

    use super::directory_manager::DirectoryManager;
    use super::file::deleter::FileDeleter;
    use super::file::reader::FileReader;
    use super::file::renamer::FileRenamer;
    use super::file::writer::{FileWriter, WriteError};
    use mockall::{mock, predicate};

    mock! {
        pub LocalFile {}

        impl FileReader for LocalFile {
            fn read(&self, file_path: &Path) -> io::Result<String>;
            fn dir_entries(&self, dir_path: &Path) -> io::Result<Vec<PathBuf>>;
        }

        impl FileRenamer for LocalFile {
            fn rename(&self, file_path: &Path, rename_path: &Path) -> io::Result<()>;
        }

        impl FileWriter for LocalFile {
            fn write(&self, path: &Path, contents: &str) -> Result<(), WriteError>;
        }

        impl FileDeleter for LocalFile {
            fn delete(&self, file_path: &Path) -> io::Result<()>;
        }

        impl DirectoryManager for LocalFile {
            fn ensure_dir(&self, path: &Path) -> io::Result<()>;
            fn remove_dir(&self, path: &Path) -> io::Result<()>;
        }
    }

    impl MockLocalFile {
        pub fn should_read(&mut self, path: &Path, contents: &str) {
            let contents = contents.to_string();
            self.expect_read()
                .with(predicate::eq(PathBuf::from(path)))
                .returning(move |_| Ok(contents.clone()));
        }

        pub fn should_not_read(&mut self, path: &Path, kind: io::ErrorKind) {
            self.expect_read()
                .with(predicate::eq(PathBuf::from(path)))
                .returning(move |_| Err(io::Error::new(kind, "mock read failure")));
        }

        pub fn should_write(&mut self, path: &Path) {
            self.expect_write()
                .with(predicate::eq(PathBuf::from(path)), predicate::always())
                .times(1)
                .returning(|_, _| Ok(()));
        }

        pub fn should_rename(&mut self, from: &Path, to: &Path) {
            self.expect_rename()
                .with(
                    predicate::eq(PathBuf::from(from)),
                    predicate::eq(PathBuf::from(to)),
                )
                .times(1)
                .returning(|_, _| Ok(()));
        }
    }
}
