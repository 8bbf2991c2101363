//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::limits::FILENAME_MAX;
use crate::{Error, Result};

/// Group name: a relative path inside a hierarchy
///
/// Leading, trailing and repeated slashes are dropped, so `"/a//b/"` and
/// `"a/b"` name the same group. The empty name is the hierarchy root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct GroupName(String);

impl GroupName {
    /// Create a new `GroupName` with validation
    ///
    /// # Errors
    /// Returns error if the name is too long or contains `.`, `..` or NUL
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();

        if name.len() > FILENAME_MAX {
            return Err(Error::InvalidArgument {
                message: format!("Group name too long (max {FILENAME_MAX} chars)"),
            });
        }

        if name.contains('\0') {
            return Err(Error::InvalidArgument {
                message: "Group name cannot contain NUL".to_string(),
            });
        }

        let mut components = Vec::new();
        for component in name.split('/').filter(|c| !c.is_empty()) {
            if component == "." || component == ".." {
                return Err(Error::InvalidArgument {
                    message: format!("Group name {name:?} cannot contain {component:?}"),
                });
            }
            components.push(component);
        }

        Ok(Self(components.join("/")))
    }

    /// The hierarchy root
    #[must_use]
    pub const fn root() -> Self {
        Self(String::new())
    }

    /// Whether this names the hierarchy root
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parent group; the root is its own parent
    #[must_use]
    pub fn parent(&self) -> Self {
        match self.0.rfind('/') {
            Some(idx) => Self(self.0[..idx].to_string()),
            None => Self::root(),
        }
    }

    /// This group and every ancestor, nearest first, ending with the root
    #[must_use]
    pub fn ancestors(&self) -> Vec<Self> {
        let mut out = vec![self.clone()];
        let mut current = self.clone();
        while !current.is_root() {
            current = current.parent();
            out.push(current.clone());
        }
        out
    }

    /// Directory of this group under a hierarchy mount point
    #[must_use]
    pub fn path_under(&self, mount: &Path) -> PathBuf {
        if self.is_root() {
            mount.to_path_buf()
        } else {
            mount.join(&self.0)
        }
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("/")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl FromStr for GroupName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for GroupName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<GroupName> for String {
    fn from(name: GroupName) -> Self {
        name.0
    }
}

/// Process identifier
///
/// A raw value of zero stands for the calling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Get the current process ID
    #[must_use]
    pub fn current() -> Self {
        #[allow(clippy::cast_possible_wrap)]
        Self(std::process::id() as i32)
    }

    /// Replace the "current process" placeholder (zero) with the real PID
    #[must_use]
    pub fn resolve(self) -> Self {
        if self.0 == 0 { Self::current() } else { self }
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|_| Error::InvalidArgument {
                message: format!("{s:?} is not a process id"),
            })
    }
}

impl From<nix::unistd::Pid> for ProcessId {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

/// Ownership of a group's files
///
/// The task-membership file and the parameter files carry independent
/// `(uid, gid)` pairs. `None` leaves the kernel's default untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owners {
    /// Owner of the task-membership file
    pub tasks_uid: Option<libc::uid_t>,
    /// Group of the task-membership file
    pub tasks_gid: Option<libc::gid_t>,
    /// Owner of the directory and parameter files
    pub control_uid: Option<libc::uid_t>,
    /// Group of the directory and parameter files
    pub control_gid: Option<libc::gid_t>,
}

impl Owners {
    /// Create ownership with all four ids set
    #[must_use]
    pub const fn new(
        tasks_uid: libc::uid_t,
        tasks_gid: libc::gid_t,
        control_uid: libc::uid_t,
        control_gid: libc::gid_t,
    ) -> Self {
        Self {
            tasks_uid: Some(tasks_uid),
            tasks_gid: Some(tasks_gid),
            control_uid: Some(control_uid),
            control_gid: Some(control_gid),
        }
    }

    /// Whether any id is set
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.tasks_uid.is_some()
            || self.tasks_gid.is_some()
            || self.control_uid.is_some()
            || self.control_gid.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_name_normalization() {
        assert_eq!(GroupName::new("/a//b/").unwrap().as_str(), "a/b");
        assert!(GroupName::new("/").unwrap().is_root());
        assert!(GroupName::new("").unwrap().is_root());
        assert!(GroupName::new("a/../b").is_err());
        assert!(GroupName::new("./a").is_err());
        assert!(GroupName::new("a\0b").is_err());
    }

    #[test]
    fn test_group_name_parent() {
        let name = GroupName::new("students/charlie").unwrap();
        assert_eq!(name.parent().as_str(), "students");
        assert!(name.parent().parent().is_root());
        assert!(GroupName::root().parent().is_root());

        let ancestors: Vec<String> = name.ancestors().into_iter().map(String::from).collect();
        assert_eq!(ancestors, vec!["students/charlie", "students", ""]);
    }

    #[test]
    fn test_group_name_path() {
        let mount = Path::new("/sys/fs/cgroup/cpu");
        assert_eq!(GroupName::root().path_under(mount), mount);
        assert_eq!(
            GroupName::new("a/b").unwrap().path_under(mount),
            PathBuf::from("/sys/fs/cgroup/cpu/a/b")
        );
    }

    #[test]
    fn test_group_name_serde() {
        let name = GroupName::new("test/123").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"test/123\"");
        let back: GroupName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
        assert!(serde_json::from_str::<GroupName>("\"../x\"").is_err());
    }

    #[test]
    fn test_process_id() {
        let pid = ProcessId::from_raw(123);
        assert_eq!(pid.as_raw(), 123);
        assert_eq!(pid.resolve(), pid);
        assert_eq!(ProcessId::from_raw(0).resolve(), ProcessId::current());
        assert_eq!("42\n".parse::<ProcessId>().unwrap(), ProcessId::from_raw(42));
    }

    #[test]
    fn test_owners_default_unset() {
        assert!(!Owners::default().is_set());
        assert!(Owners::new(0, 0, 1000, 1000).is_set());
    }
}
