//! Hierarchy table: which controllers are bound to which mount
//!
//! The table is read from the kernel once, in [`HierarchyTable::discover`],
//! and is immutable afterwards. Share it behind an `Arc`.

use std::path::{Path, PathBuf};

use cgkit_core::limits::{MAX_HIERARCHIES, MAX_MNT_ELEMENTS};
use cgkit_core::{Config, Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::ControlBackend;

/// Kind of cgroup hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HierarchyKind {
    /// cgroup v1: one or more controllers co-mounted on their own tree
    V1,
    /// cgroup v2 unified tree
    Unified,
}

impl HierarchyKind {
    /// Name of the task-membership file
    #[must_use]
    pub const fn tasks_file(self) -> &'static str {
        match self {
            Self::V1 => "tasks",
            Self::Unified => "cgroup.procs",
        }
    }
}

/// One mounted hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    index: usize,
    path: PathBuf,
    controllers: Vec<String>,
    kind: HierarchyKind,
}

impl MountPoint {
    /// Create a mount point; the index is assigned by the table
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, controllers: &[&str], kind: HierarchyKind) -> Self {
        Self {
            index: 0,
            path: path.into(),
            controllers: controllers.iter().map(|c| (*c).to_string()).collect(),
            kind,
        }
    }

    /// Position in the table
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Mount path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Co-mounted controllers, in mount option order
    #[must_use]
    pub fn controllers(&self) -> &[String] {
        &self.controllers
    }

    /// Hierarchy kind
    #[must_use]
    pub const fn kind(&self) -> HierarchyKind {
        self.kind
    }

    /// Whether `controller` is bound here
    #[must_use]
    pub fn has_controller(&self, controller: &str) -> bool {
        self.controllers.iter().any(|c| c == controller)
    }
}

/// Table of mounted hierarchies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyTable {
    mounts: Vec<MountPoint>,
}

impl HierarchyTable {
    /// Build a table from explicit mount points
    ///
    /// # Errors
    /// - `NotMounted` if `mounts` is empty
    /// - `MultiplyMounted` if a controller shows up under two paths
    /// - `CapacityExceeded` if a bound is exceeded
    pub fn new(mounts: Vec<MountPoint>) -> Result<Self> {
        let mut merged: Vec<MountPoint> = Vec::new();

        for mount in mounts {
            // The same mount may be listed more than once.
            if let Some(existing) = merged.iter_mut().find(|m| m.path == mount.path) {
                for controller in mount.controllers {
                    if !existing.has_controller(&controller) {
                        existing.controllers.push(controller);
                    }
                }
                continue;
            }
            merged.push(mount);
        }

        merged.retain(|m| !m.controllers.is_empty());
        if merged.is_empty() {
            return Err(Error::NotMounted);
        }
        if merged.len() > MAX_HIERARCHIES {
            return Err(Error::CapacityExceeded {
                what: "hierarchies",
                max: MAX_HIERARCHIES,
            });
        }

        for (i, mount) in merged.iter().enumerate() {
            if mount.kind == HierarchyKind::V1 && mount.controllers.len() > MAX_MNT_ELEMENTS {
                return Err(Error::CapacityExceeded {
                    what: "co-mounted controllers",
                    max: MAX_MNT_ELEMENTS,
                });
            }
            for controller in &mount.controllers {
                if let Some(other) = merged[..i].iter().find(|m| m.has_controller(controller)) {
                    return Err(Error::MultiplyMounted {
                        controller: controller.clone(),
                        first: other.path.clone(),
                        second: mount.path.clone(),
                    });
                }
            }
        }

        for (index, mount) in merged.iter_mut().enumerate() {
            mount.index = index;
        }

        Ok(Self { mounts: merged })
    }

    /// Discover the mounted hierarchies
    ///
    /// Reads the controller table and the mount table named by `config`
    /// through `backend`. v1 mounts contribute the enabled controllers found
    /// in their mount options; unified mounts contribute the controllers
    /// listed in their `cgroup.controllers` file.
    ///
    /// # Errors
    /// - `MountFailed` if either table cannot be read
    /// - `NotMounted` if no hierarchy with controllers is mounted
    /// - `MultiplyMounted` if a controller is bound twice
    pub fn discover(backend: &dyn ControlBackend, config: &Config) -> Result<Self> {
        let read = |path: &Path| {
            backend.read_to_string(path).map_err(|e| Error::MountFailed {
                message: format!("Cannot read {}: {e}", path.display()),
            })
        };

        let cgroups = read(&config.cgroups_path)?;
        let mounts = read(&config.mounts_path)?;
        let enabled = parse_enabled_controllers(&cgroups);

        let mut points = Vec::new();
        for entry in parse_mount_entries(&mounts) {
            match entry.fstype.as_str() {
                "cgroup" => {
                    let controllers: Vec<&str> = entry
                        .options
                        .iter()
                        .map(String::as_str)
                        .filter(|o| enabled.iter().any(|e| e == o))
                        .collect();
                    points.push(MountPoint::new(&entry.path, &controllers, HierarchyKind::V1));
                }
                "cgroup2" => {
                    let available = backend
                        .read_to_string(&entry.path.join("cgroup.controllers"))
                        .unwrap_or_default();
                    let controllers: Vec<&str> = available.split_whitespace().collect();
                    points.push(MountPoint::new(
                        &entry.path,
                        &controllers,
                        HierarchyKind::Unified,
                    ));
                }
                _ => continue,
            }
            debug!(path = %entry.path.display(), fstype = %entry.fstype, "Found cgroup mount");
        }

        let table = Self::new(points)?;
        info!(hierarchies = table.mounts.len(), "Discovered cgroup hierarchies");
        Ok(table)
    }

    /// Find the hierarchy a controller is bound to
    ///
    /// # Errors
    /// Returns `SubsystemNotMounted` if no hierarchy has the controller
    pub fn resolve(&self, controller: &str) -> Result<&MountPoint> {
        self.mounts
            .iter()
            .find(|m| m.has_controller(controller))
            .ok_or_else(|| Error::SubsystemNotMounted {
                controller: controller.to_string(),
            })
    }

    /// Whether a controller is bound to some hierarchy
    #[must_use]
    pub fn is_mounted(&self, controller: &str) -> bool {
        self.resolve(controller).is_ok()
    }

    /// All hierarchies, in table order
    #[must_use]
    pub fn mounts(&self) -> &[MountPoint] {
        &self.mounts
    }

    /// All mounted controllers, in table order
    pub fn controllers(&self) -> impl Iterator<Item = &str> {
        self.mounts
            .iter()
            .flat_map(|m| m.controllers.iter().map(String::as_str))
    }
}

/// Controller names enabled in `/proc/cgroups`
fn parse_enabled_controllers(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [name, _, _, enabled] if *enabled == "1" => Some((*name).to_string()),
                _ => None,
            }
        })
        .collect()
}

struct MountEntry {
    path: PathBuf,
    fstype: String,
    options: Vec<String>,
}

/// Entries of `/proc/mounts`
fn parse_mount_entries(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let path = fields.next()?;
            let fstype = fields.next()?;
            let options = fields.next().unwrap_or_default();
            Some(MountEntry {
                path: PathBuf::from(unescape_mount_path(path)),
                fstype: fstype.to_string(),
                options: options.split(',').map(str::to_string).collect(),
            })
        })
        .collect()
}

/// Decode the octal escapes (`\040` for a space) used in the mount table
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockBackend;

    const CGROUPS: &str = "\
#subsys_name\thierarchy\tnum_cgroups\tenabled
cpuset\t2\t1\t1
cpu\t3\t60\t1
cpuacct\t3\t60\t1
memory\t4\t80\t1
devices\t5\t60\t0
";

    const MOUNTS: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
tmpfs /sys/fs/cgroup tmpfs ro,nosuid,nodev,noexec,mode=755 0 0
cgroup /sys/fs/cgroup/cpuset cgroup rw,nosuid,nodev,noexec,relatime,cpuset 0 0
cgroup /sys/fs/cgroup/cpu,cpuacct cgroup rw,nosuid,nodev,noexec,relatime,cpu,cpuacct 0 0
cgroup /sys/fs/cgroup/memory cgroup rw,nosuid,nodev,noexec,relatime,memory 0 0
cgroup /sys/fs/cgroup/systemd cgroup rw,nosuid,nodev,noexec,relatime,xattr,name=systemd 0 0
";

    fn config() -> Config {
        Config::new()
            .with_cgroups_path("/proc/cgroups")
            .with_mounts_path("/proc/mounts")
    }

    #[test]
    fn test_discover_v1() {
        let backend = MockBackend::new()
            .with_file("/proc/cgroups", CGROUPS)
            .with_file("/proc/mounts", MOUNTS);

        let table = HierarchyTable::discover(&backend, &config()).unwrap();
        assert_eq!(table.mounts().len(), 3);

        let cpu = table.resolve("cpuacct").unwrap();
        assert_eq!(cpu.path(), Path::new("/sys/fs/cgroup/cpu,cpuacct"));
        assert_eq!(cpu.controllers(), ["cpu", "cpuacct"]);
        assert_eq!(cpu.index(), 1);
        assert_eq!(cpu.kind().tasks_file(), "tasks");

        // Disabled and named hierarchies are not controllers.
        assert!(matches!(
            table.resolve("devices"),
            Err(Error::SubsystemNotMounted { .. })
        ));
        assert!(!table.is_mounted("name=systemd"));

        let all: Vec<&str> = table.controllers().collect();
        assert_eq!(all, ["cpuset", "cpu", "cpuacct", "memory"]);
    }

    #[test]
    fn test_discover_unified() {
        let backend = MockBackend::new()
            .with_file("/proc/cgroups", CGROUPS)
            .with_file(
                "/proc/mounts",
                "cgroup2 /sys/fs/cgroup cgroup2 rw,nosuid,nodev,noexec,relatime 0 0\n",
            )
            .with_file("/sys/fs/cgroup/cgroup.controllers", "cpu io memory pids\n");

        let table = HierarchyTable::discover(&backend, &config()).unwrap();
        let mount = table.resolve("memory").unwrap();
        assert_eq!(mount.kind(), HierarchyKind::Unified);
        assert_eq!(mount.kind().tasks_file(), "cgroup.procs");
        assert_eq!(mount.controllers().len(), 4);
    }

    #[test]
    fn test_discover_not_mounted() {
        let backend = MockBackend::new()
            .with_file("/proc/cgroups", CGROUPS)
            .with_file("/proc/mounts", "proc /proc proc rw 0 0\n");

        assert!(matches!(
            HierarchyTable::discover(&backend, &config()),
            Err(Error::NotMounted)
        ));
    }

    #[test]
    fn test_discover_unreadable_table() {
        let backend = MockBackend::new().with_file("/proc/cgroups", CGROUPS);
        assert!(matches!(
            HierarchyTable::discover(&backend, &config()),
            Err(Error::MountFailed { .. })
        ));
    }

    #[test]
    fn test_multiply_mounted() {
        let mounts = vec![
            MountPoint::new("/cg/a", &["cpu"], HierarchyKind::V1),
            MountPoint::new("/cg/b", &["memory", "cpu"], HierarchyKind::V1),
        ];
        match HierarchyTable::new(mounts) {
            Err(Error::MultiplyMounted {
                controller,
                first,
                second,
            }) => {
                assert_eq!(controller, "cpu");
                assert_eq!(first, PathBuf::from("/cg/a"));
                assert_eq!(second, PathBuf::from("/cg/b"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_mount_entries_merge() {
        let mounts = vec![
            MountPoint::new("/cg/cpu", &["cpu"], HierarchyKind::V1),
            MountPoint::new("/cg/cpu", &["cpu"], HierarchyKind::V1),
        ];
        let table = HierarchyTable::new(mounts).unwrap();
        assert_eq!(table.mounts().len(), 1);
    }

    #[test]
    fn test_too_many_comounted() {
        let names = ["a", "b", "c", "d", "e", "f", "g", "h", "i"];
        let mounts = vec![MountPoint::new("/cg/all", &names, HierarchyKind::V1)];
        assert!(matches!(
            HierarchyTable::new(mounts),
            Err(Error::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_unescape_mount_path() {
        assert_eq!(unescape_mount_path("/mnt/my\\040cgroup"), "/mnt/my cgroup");
        assert_eq!(unescape_mount_path("/plain"), "/plain");
        assert_eq!(unescape_mount_path("/trailing\\04"), "/trailing\\04");
        assert_eq!(unescape_mount_path("/signed\\+12"), "/signed\\+12");
        assert_eq!(unescape_mount_path("/big\\777"), "/big\\777");
        assert_eq!(unescape_mount_path("/tab\\011x"), "/tab\tx");
    }
}
