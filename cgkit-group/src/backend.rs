//! Control backend trait for pluggable implementations

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cgkit_core::ProcessId;
use libc::{gid_t, uid_t};

/// One entry of a group directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name
    pub name: String,
    /// Whether the entry is a child group
    pub is_dir: bool,
    /// Whether the owner may write the entry
    pub writable: bool,
}

/// Trait for access to the kernel-visible control surface
///
/// This allows for different implementations:
/// - [`KernelBackend`](crate::KernelBackend) - Production cgroupfs
/// - [`MockBackend`] - Testing without a mounted cgroupfs
///
/// # Thread Safety
/// All implementations must be `Send + Sync`; one backend is shared by
/// every user of a [`CgroupManager`](crate::CgroupManager).
pub trait ControlBackend: Send + Sync {
    /// Whether `path` is an existing directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Create one directory; the parent must exist
    ///
    /// # Errors
    /// `AlreadyExists` if the directory exists
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Remove one group directory
    ///
    /// # Errors
    /// `ResourceBusy` while tasks remain, `DirectoryNotEmpty` while child
    /// groups remain
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Read a whole file
    ///
    /// # Errors
    /// Returns the underlying I/O error
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Replace the contents of an existing file
    ///
    /// # Errors
    /// `NotFound` if the file does not exist; the file is never created
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Append one task id to a task-membership file
    ///
    /// # Errors
    /// Returns the underlying I/O error
    fn append_task(&self, path: &Path, pid: ProcessId) -> io::Result<()>;

    /// List the entries of a directory
    ///
    /// # Errors
    /// Returns the underlying I/O error
    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Change the owner of a file or directory; `None` keeps the current id
    ///
    /// # Errors
    /// Returns the underlying I/O error
    fn set_owner(&self, path: &Path, uid: Option<uid_t>, gid: Option<gid_t>) -> io::Result<()>;

    /// Owner of a file or directory
    ///
    /// # Errors
    /// Returns the underlying I/O error
    fn owner(&self, path: &Path) -> io::Result<(uid_t, gid_t)>;
}

/// Mock backend for testing (doesn't touch the filesystem)
///
/// Emulates the parts of cgroupfs the lifecycle engine relies on: new
/// group directories come with a task file and the hierarchy's parameter
/// files, writing a task id moves the task out of every other group of the
/// same hierarchy, and busy groups cannot be removed.
///
/// # Example
/// ```
/// use std::path::Path;
/// use cgkit_core::ProcessId;
/// use cgkit_group::{ControlBackend, MockBackend};
///
/// let backend = MockBackend::new()
///     .with_hierarchy("/cg/cpu", "tasks", &[("cpu.shares", "1024")]);
///
/// backend.create_dir(Path::new("/cg/cpu/app")).unwrap();
/// assert_eq!(backend.file("/cg/cpu/app/cpu.shares").as_deref(), Some("1024"));
///
/// backend.append_task(Path::new("/cg/cpu/app/tasks"), ProcessId::from_raw(42)).unwrap();
/// assert_eq!(backend.tasks("/cg/cpu/app"), vec![ProcessId::from_raw(42)]);
/// ```
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    dirs: BTreeMap<PathBuf, (uid_t, gid_t)>,
    files: BTreeMap<PathBuf, MockFile>,
    hierarchies: Vec<MockHierarchy>,
    call_count: usize,
}

#[derive(Debug, Clone)]
struct MockFile {
    contents: String,
    writable: bool,
    owner: (uid_t, gid_t),
}

impl MockFile {
    const fn new(contents: String, writable: bool) -> Self {
        Self {
            contents,
            writable,
            owner: (0, 0),
        }
    }
}

struct MockHierarchy {
    root: PathBuf,
    tasks_file: String,
    params: Vec<(String, String, bool)>,
}

fn error(kind: io::ErrorKind, path: &Path) -> io::Error {
    io::Error::new(kind, path.display().to_string())
}

impl MockState {
    fn hierarchy_of(&self, path: &Path) -> Option<&MockHierarchy> {
        self.hierarchies
            .iter()
            .filter(|h| path.starts_with(&h.root))
            .max_by_key(|h| h.root.components().count())
    }

    fn populate(&mut self, dir: &Path) {
        let Some(hierarchy) = self.hierarchy_of(dir) else {
            return;
        };

        let mut files = vec![(
            dir.join(&hierarchy.tasks_file),
            MockFile::new(String::new(), true),
        )];
        for (name, default, writable) in &hierarchy.params {
            files.push((dir.join(name), MockFile::new(default.clone(), *writable)));
        }

        self.files.extend(files);
    }

    fn is_tasks_file(&self, path: &Path) -> bool {
        match (self.hierarchy_of(path), path.file_name()) {
            (Some(h), Some(name)) => name == h.tasks_file.as_str(),
            _ => false,
        }
    }
}

fn parse_tasks(contents: &str) -> Vec<ProcessId> {
    contents
        .lines()
        .filter_map(|line| line.parse().ok())
        .collect()
}

impl MockBackend {
    /// Create a new, empty mock backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a hierarchy rooted at `root`
    ///
    /// Every group directory created under `root` (and the root itself)
    /// gets an empty `tasks_file` and one writable file per `params` entry
    /// holding its default.
    #[must_use]
    pub fn with_hierarchy(
        self,
        root: impl Into<PathBuf>,
        tasks_file: &str,
        params: &[(&str, &str)],
    ) -> Self {
        let root = root.into();
        {
            let mut state = self.lock();
            state.hierarchies.push(MockHierarchy {
                root: root.clone(),
                tasks_file: tasks_file.to_string(),
                params: params
                    .iter()
                    .map(|(name, value)| ((*name).to_string(), (*value).to_string(), true))
                    .collect(),
            });
            state.dirs.insert(root.clone(), (0, 0));
            state.populate(&root);
        }
        self
    }

    /// Add a read-only parameter file to every group of the hierarchy at `root`
    #[must_use]
    pub fn with_read_only_param(self, root: impl AsRef<Path>, name: &str, value: &str) -> Self {
        {
            let mut state = self.lock();
            let root = root.as_ref();
            if let Some(h) = state.hierarchies.iter_mut().find(|h| h.root == root) {
                h.params.push((name.to_string(), value.to_string(), false));
            }
            let dirs: Vec<PathBuf> = state
                .dirs
                .keys()
                .filter(|d| d.starts_with(root))
                .cloned()
                .collect();
            for dir in dirs {
                state
                    .files
                    .insert(dir.join(name), MockFile::new(value.to_string(), false));
            }
        }
        self
    }

    /// Add a plain file, e.g. a procfs table
    #[must_use]
    pub fn with_file(self, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.lock()
            .files
            .insert(path.into(), MockFile::new(contents.to_string(), true));
        self
    }

    /// Contents of a file, if it exists
    #[must_use]
    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.lock()
            .files
            .get(path.as_ref())
            .map(|f| f.contents.clone())
    }

    /// Overwrite a file, bypassing permission checks (for testing)
    pub fn set_file(&self, path: impl Into<PathBuf>, contents: &str) {
        let mut state = self.lock();
        let path = path.into();
        let writable = state.files.get(&path).is_none_or(|f| f.writable);
        state
            .files
            .insert(path, MockFile::new(contents.to_string(), writable));
    }

    /// Make a file read-only or writable (for testing)
    pub fn set_writable(&self, path: impl AsRef<Path>, writable: bool) {
        if let Some(file) = self.lock().files.get_mut(path.as_ref()) {
            file.writable = writable;
        }
    }

    /// Whether a directory exists
    #[must_use]
    pub fn has_dir(&self, path: impl AsRef<Path>) -> bool {
        self.lock().dirs.contains_key(path.as_ref())
    }

    /// Tasks in the group directory `dir`
    #[must_use]
    pub fn tasks(&self, dir: impl AsRef<Path>) -> Vec<ProcessId> {
        let state = self.lock();
        let dir = dir.as_ref();
        state
            .hierarchy_of(dir)
            .and_then(|h| state.files.get(&dir.join(&h.tasks_file)))
            .map(|f| parse_tasks(&f.contents))
            .unwrap_or_default()
    }

    /// Owner of a file or directory
    #[must_use]
    pub fn owner_of(&self, path: impl AsRef<Path>) -> Option<(uid_t, gid_t)> {
        let state = self.lock();
        let path = path.as_ref();
        state
            .files
            .get(path)
            .map(|f| f.owner)
            .or_else(|| state.dirs.get(path).copied())
    }

    /// Get the number of backend calls made (for testing)
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.lock().call_count
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend").finish_non_exhaustive()
    }
}

impl ControlBackend for MockBackend {
    fn is_dir(&self, path: &Path) -> bool {
        let mut state = self.lock();
        state.call_count += 1;
        state.dirs.contains_key(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.lock();
        state.call_count += 1;

        if state.dirs.contains_key(path) || state.files.contains_key(path) {
            return Err(error(io::ErrorKind::AlreadyExists, path));
        }
        match path.parent() {
            Some(parent) if state.dirs.contains_key(parent) => {}
            _ => return Err(error(io::ErrorKind::NotFound, path)),
        }

        state.dirs.insert(path.to_path_buf(), (0, 0));
        state.populate(path);

        tracing::debug!(path = %path.display(), "Mock: Created directory");
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.lock();
        state.call_count += 1;

        if !state.dirs.contains_key(path) {
            return Err(error(io::ErrorKind::NotFound, path));
        }
        if state.dirs.keys().any(|d| d != path && d.starts_with(path)) {
            return Err(error(io::ErrorKind::DirectoryNotEmpty, path));
        }

        let busy = state
            .hierarchy_of(path)
            .and_then(|h| state.files.get(&path.join(&h.tasks_file)))
            .is_some_and(|f| !parse_tasks(&f.contents).is_empty());
        if busy {
            return Err(error(io::ErrorKind::ResourceBusy, path));
        }

        state.files.retain(|file, _| file.parent() != Some(path));
        state.dirs.remove(path);

        tracing::debug!(path = %path.display(), "Mock: Removed directory");
        Ok(())
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let mut state = self.lock();
        state.call_count += 1;

        match state.files.get(path) {
            Some(file) => Ok(file.contents.clone()),
            None if state.dirs.contains_key(path) => {
                Err(error(io::ErrorKind::IsADirectory, path))
            }
            None => Err(error(io::ErrorKind::NotFound, path)),
        }
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        let mut state = self.lock();
        state.call_count += 1;

        let file = state
            .files
            .get_mut(path)
            .ok_or_else(|| error(io::ErrorKind::NotFound, path))?;
        if !file.writable {
            return Err(error(io::ErrorKind::PermissionDenied, path));
        }
        file.contents = contents.to_string();

        tracing::trace!(path = %path.display(), contents, "Mock: Wrote file");
        Ok(())
    }

    fn append_task(&self, path: &Path, pid: ProcessId) -> io::Result<()> {
        let mut state = self.lock();
        state.call_count += 1;

        match state.files.get(path) {
            None => return Err(error(io::ErrorKind::NotFound, path)),
            Some(file) if !file.writable => {
                return Err(error(io::ErrorKind::PermissionDenied, path));
            }
            Some(_) => {}
        }

        // A task belongs to exactly one group per hierarchy.
        if state.is_tasks_file(path) {
            let root = state.hierarchy_of(path).map(|h| h.root.clone());
            let siblings: Vec<PathBuf> = state
                .files
                .keys()
                .filter(|f| {
                    *f != path
                        && root.as_ref().is_some_and(|r| f.starts_with(r))
                        && f.file_name() == path.file_name()
                })
                .cloned()
                .collect();
            for sibling in siblings {
                if let Some(file) = state.files.get_mut(&sibling) {
                    file.contents = file
                        .contents
                        .lines()
                        .filter(|line| line.parse::<ProcessId>().ok() != Some(pid))
                        .map(|line| format!("{line}\n"))
                        .collect();
                }
            }
        }

        if let Some(file) = state.files.get_mut(path) {
            if !parse_tasks(&file.contents).contains(&pid) {
                file.contents.push_str(&format!("{pid}\n"));
            }
        }

        tracing::debug!(path = %path.display(), pid = pid.as_raw(), "Mock: Attached task");
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut state = self.lock();
        state.call_count += 1;

        if !state.dirs.contains_key(path) {
            return Err(error(io::ErrorKind::NotFound, path));
        }

        let name_of = |p: &Path| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };

        let mut entries: Vec<DirEntry> = state
            .files
            .iter()
            .filter(|(f, _)| f.parent() == Some(path))
            .map(|(f, file)| DirEntry {
                name: name_of(f),
                is_dir: false,
                writable: file.writable,
            })
            .collect();
        entries.extend(
            state
                .dirs
                .keys()
                .filter(|d| d.parent() == Some(path))
                .map(|d| DirEntry {
                    name: name_of(d),
                    is_dir: true,
                    writable: true,
                }),
        );
        Ok(entries)
    }

    fn set_owner(&self, path: &Path, uid: Option<uid_t>, gid: Option<gid_t>) -> io::Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.call_count += 1;

        let owner = if let Some(file) = state.files.get_mut(path) {
            &mut file.owner
        } else if let Some(owner) = state.dirs.get_mut(path) {
            owner
        } else {
            return Err(error(io::ErrorKind::NotFound, path));
        };

        if let Some(uid) = uid {
            owner.0 = uid;
        }
        if let Some(gid) = gid {
            owner.1 = gid;
        }
        Ok(())
    }

    fn owner(&self, path: &Path) -> io::Result<(uid_t, gid_t)> {
        let mut state = self.lock();
        state.call_count += 1;

        state
            .files
            .get(path)
            .map(|f| f.owner)
            .or_else(|| state.dirs.get(path).copied())
            .ok_or_else(|| error(io::ErrorKind::NotFound, path))
    }
}
