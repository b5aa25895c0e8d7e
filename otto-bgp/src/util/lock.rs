//! Global operation lock: a PID file in the data directory, acquired at
//! pipeline start and released at the end of every exit path. A second
//! invocation that finds a live PID refuses to start; this is also one of
//! the GuardrailEngine's built-in, always-blocking risk factors.

use otto_bgp_fs::directory_manager::DirectoryManager;
use otto_bgp_fs::file::deleter::FileDeleter;
use otto_bgp_fs::file::reader::FileReader;
use otto_bgp_fs::file::writer::FileWriter;
use otto_bgp_fs::file::LocalFile;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("operation lock already held by live process {0}")]
    AlreadyHeld(u32),
    #[error("lock file I/O error: {0}")]
    Io(#[from] io::Error),
}

pub struct OperationLock {
    path: PathBuf,
    held: bool,
}

impl OperationLock {
    /// Acquire the lock at `<data_dir>/locks/operation.lock`, failing if the
    /// file already names a live PID.
    pub fn acquire(data_dir: &Path) -> Result<Self, LockError> {
        let file = LocalFile;
        let lock_dir = data_dir.join("locks");
        file.ensure_dir(&lock_dir)?;
        let path = lock_dir.join("operation.lock");

        if let Some(existing_pid) = read_pid(&file, &path)? {
            if is_process_live(existing_pid) {
                return Err(LockError::AlreadyHeld(existing_pid));
            }
        }

        file.write(&path, &std::process::id().to_string())
            .map_err(|err| LockError::Io(io::Error::other(err.to_string())))?;
        Ok(Self { path, held: true })
    }

    pub fn release(&mut self) {
        if self.held {
            let _ = LocalFile.delete(&self.path);
            self.held = false;
        }
    }
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_pid(file: &LocalFile, path: &Path) -> io::Result<Option<u32>> {
    match file.read(path) {
        Ok(contents) => Ok(contents.trim().parse::<u32>().ok()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(target_os = "linux")]
fn is_process_live(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_process_live(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
