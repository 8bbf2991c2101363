//! Production backend on top of a mounted cgroupfs

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use cgkit_core::ProcessId;
use libc::{gid_t, uid_t};
use nix::unistd::{Gid, Uid, chown};

use crate::backend::{ControlBackend, DirEntry};

/// Backend that operates on the real control surface
///
/// Files are never created by writes: parameter files only exist because
/// the kernel populated the group directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelBackend;

impl KernelBackend {
    /// Create a new kernel backend
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ControlBackend for KernelBackend {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        tracing::debug!(path = %path.display(), "Creating cgroup directory");
        fs::create_dir(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        tracing::debug!(path = %path.display(), "Removing cgroup directory");
        fs::remove_dir(path)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
        file.write_all(contents.as_bytes())
    }

    fn append_task(&self, path: &Path, pid: ProcessId) -> io::Result<()> {
        // One id per write(2); the kernel rejects batched ids.
        let mut file = OpenOptions::new().append(true).open(path)?;
        file.write_all(pid.to_string().as_bytes())
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                writable: metadata.permissions().mode() & 0o200 != 0,
            });
        }
        Ok(entries)
    }

    fn set_owner(&self, path: &Path, uid: Option<uid_t>, gid: Option<gid_t>) -> io::Result<()> {
        chown(path, uid.map(Uid::from_raw), gid.map(Gid::from_raw)).map_err(io::Error::from)
    }

    fn owner(&self, path: &Path) -> io::Result<(uid_t, gid_t)> {
        let metadata = fs::metadata(path)?;
        Ok((metadata.uid(), metadata.gid()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_backend_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = KernelBackend::new();
        let group = dir.path().join("group");

        backend.create_dir(&group).unwrap();
        assert!(backend.is_dir(&group));

        // Writes never create parameter files.
        let err = backend.write(&group.join("cpu.shares"), "512").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        fs::write(group.join("cpu.shares"), "1024\n").unwrap();
        backend.write(&group.join("cpu.shares"), "512").unwrap();
        assert_eq!(backend.read_to_string(&group.join("cpu.shares")).unwrap(), "512");

        fs::write(group.join("tasks"), "").unwrap();
        backend
            .append_task(&group.join("tasks"), ProcessId::from_raw(1))
            .unwrap();
        assert_eq!(fs::read_to_string(group.join("tasks")).unwrap(), "1");

        let entries = backend.list_dir(&group).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| !e.is_dir && e.writable));

        let (uid, gid) = backend.owner(&group).unwrap();
        backend.set_owner(&group, Some(uid), Some(gid)).unwrap();

        fs::remove_file(group.join("cpu.shares")).unwrap();
        fs::remove_file(group.join("tasks")).unwrap();
        backend.remove_dir(&group).unwrap();
        assert!(!backend.is_dir(&group));
    }
}
