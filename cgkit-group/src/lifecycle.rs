//! Lifecycle engine: reconciles [`Group`] models with the control surface
//!
//! The engine keeps no state of its own besides the hierarchy table and the
//! backend. Operations are not serialized against each other; callers that
//! need a single writer per group must coordinate themselves.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cgkit_core::{Config, Error, GroupName, Owners, ProcessId, Result, Value, ValueKind};
use tracing::{debug, info, warn};

use crate::backend::ControlBackend;
use crate::group::{Group, Parameter};
use crate::hierarchy::{HierarchyKind, HierarchyTable, MountPoint};

/// Options for [`CgroupManager::create_with`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Do not apply the group's ownership
    pub ignore_ownership: bool,
    /// Fail with `GroupExists` if the group directory already exists
    pub exclusive: bool,
}

/// Outcome of a successful create
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateReport {
    /// Group directories created by this call
    pub created: Vec<PathBuf>,
    /// Group directories that already existed
    pub existing: Vec<PathBuf>,
}

impl CreateReport {
    /// Whether the group existed in every hierarchy before the call
    #[must_use]
    pub fn already_existed(&self) -> bool {
        self.created.is_empty() && !self.existing.is_empty()
    }
}

/// Controllers of one group that live on the same hierarchy
pub(crate) struct Slice<'a> {
    pub(crate) mount: &'a MountPoint,
    pub(crate) dir: PathBuf,
    pub(crate) controllers: Vec<String>,
}

impl Slice<'_> {
    pub(crate) fn tasks_file(&self) -> PathBuf {
        self.dir.join(self.mount.kind().tasks_file())
    }
}

/// Main lifecycle engine
///
/// This struct provides methods to:
/// - Create groups, optionally inheriting the parent's parameters
/// - Read back and modify parameters
/// - Delete groups, migrating member tasks on request
/// - Attach tasks (see the task placement methods)
#[derive(Clone)]
pub struct CgroupManager {
    pub(crate) table: Arc<HierarchyTable>,
    pub(crate) backend: Arc<dyn ControlBackend>,
    pub(crate) config: Config,
}

impl std::fmt::Debug for CgroupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CgroupManager")
            .field("table", &self.table)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

pub(crate) fn io_error(err: io::Error, operation: impl FnOnce() -> String) -> Error {
    match err.kind() {
        io::ErrorKind::PermissionDenied => Error::PermissionDenied {
            operation: operation(),
        },
        _ => Error::Io(err),
    }
}

/// Reject a model that names no hierarchy to act on
fn require_controllers(group: &Group) -> Result<()> {
    if group.controllers().is_empty() {
        return Err(Error::InvalidArgument {
            message: format!("Group {} has no controllers", group.name()),
        });
    }
    Ok(())
}

impl CgroupManager {
    /// Create an engine over an already discovered table
    #[must_use]
    pub fn new(table: Arc<HierarchyTable>, backend: Arc<dyn ControlBackend>) -> Self {
        Self {
            table,
            backend,
            config: Config::default(),
        }
    }

    /// Discover the hierarchies and create an engine
    ///
    /// # Errors
    /// Returns the errors of [`HierarchyTable::discover`]
    pub fn init(backend: Arc<dyn ControlBackend>, config: Config) -> Result<Self> {
        let table = HierarchyTable::discover(backend.as_ref(), &config)?;
        Ok(Self {
            table: Arc::new(table),
            backend,
            config,
        })
    }

    /// Use another configuration
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// The hierarchy table
    #[must_use]
    pub fn table(&self) -> &HierarchyTable {
        &self.table
    }

    /// The configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Group controllers by hierarchy, keeping first-seen order
    pub(crate) fn slices<'a, 'n>(
        &'a self,
        name: &GroupName,
        controllers: impl IntoIterator<Item = &'n str>,
    ) -> Result<Vec<Slice<'a>>> {
        let mut slices: Vec<Slice<'a>> = Vec::new();

        for controller in controllers {
            let mount = self.table.resolve(controller)?;
            match slices.iter_mut().find(|s| s.mount.index() == mount.index()) {
                Some(slice) => slice.controllers.push(controller.to_string()),
                None => slices.push(Slice {
                    mount,
                    dir: name.path_under(mount.path()),
                    controllers: vec![controller.to_string()],
                }),
            }
        }

        Ok(slices)
    }

    fn group_slices<'a>(&'a self, group: &Group) -> Result<Vec<Slice<'a>>> {
        require_controllers(group)?;
        self.slices(group.name(), group.controllers().iter().map(|c| c.name()))
    }

    /// Create a group on the control surface
    ///
    /// An existing group directory is not an error; it is reported in
    /// [`CreateReport::existing`].
    ///
    /// # Errors
    /// See [`CgroupManager::create_with`]
    pub fn create(&self, group: &Group, ignore_ownership: bool) -> Result<CreateReport> {
        self.create_with(
            group,
            CreateOptions {
                ignore_ownership,
                exclusive: false,
            },
        )
    }

    /// Create a group with explicit options
    ///
    /// For each hierarchy: create the missing directories, apply ownership
    /// unless ignored, then write every value in declaration order. A
    /// failed write aborts the call; hierarchies already handled keep their
    /// directories.
    ///
    /// # Errors
    /// - `InvalidArgument` if the group has no controllers
    /// - `SubsystemNotMounted` if a controller is not mounted
    /// - `GroupExists` if `exclusive` and the group exists in any hierarchy
    /// - `ControllerCreateFailed` if a directory cannot be created
    /// - `PermissionDenied`, `ValueNotExist` or `Io` for failed writes
    pub fn create_with(&self, group: &Group, options: CreateOptions) -> Result<CreateReport> {
        let slices = self.group_slices(group)?;

        if options.exclusive && slices.iter().any(|s| self.backend.is_dir(&s.dir)) {
            return Err(Error::GroupExists {
                name: group.name().to_string(),
            });
        }

        let mut report = CreateReport::default();
        for slice in &slices {
            if self.make_dirs(group.name(), slice)? {
                debug!(path = %slice.dir.display(), "Group directory already exists");
                report.existing.push(slice.dir.clone());
            } else {
                report.created.push(slice.dir.clone());
            }

            if !options.ignore_ownership && group.owners().is_set() {
                self.apply_owners(slice, group.owners())?;
            }

            for name in &slice.controllers {
                let Some(controller) = group.controller(name) else {
                    continue;
                };
                for param in controller.values() {
                    self.write_param(&slice.dir, param)?;
                }
            }
        }

        info!(
            group = %group.name(),
            created = report.created.len(),
            existing = report.existing.len(),
            "Group created"
        );
        Ok(report)
    }

    /// Create the group directory and any missing ancestors
    ///
    /// Returns whether the group directory already existed.
    fn make_dirs(&self, name: &GroupName, slice: &Slice<'_>) -> Result<bool> {
        if self.backend.is_dir(&slice.dir) {
            return Ok(true);
        }

        let mut current = slice.mount.path().to_path_buf();
        for component in name.as_str().split('/') {
            if slice.mount.kind() == HierarchyKind::Unified {
                self.enable_controllers(&current, &slice.controllers)?;
            }

            current.push(component);
            if self.backend.is_dir(&current) {
                continue;
            }

            debug!(path = %current.display(), "Creating group directory");
            match self.backend.create_dir(&current) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(source) => {
                    return Err(Error::ControllerCreateFailed {
                        controller: slice.controllers.join(","),
                        path: current,
                        source,
                    });
                }
            }
        }

        Ok(false)
    }

    /// Enable controllers for the children of `parent` on a unified hierarchy
    fn enable_controllers(&self, parent: &Path, controllers: &[String]) -> Result<()> {
        let control_file = parent.join("cgroup.subtree_control");

        let current = match self.backend.read_to_string(&control_file) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %control_file.display(), error = %e, "Control file unreadable, skipping controller setup");
                return Ok(());
            }
        };

        let enabled: Vec<&str> = current.split_whitespace().collect();
        let missing: Vec<&String> = controllers
            .iter()
            .filter(|c| !enabled.contains(&c.as_str()))
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        let to_enable = missing
            .iter()
            .map(|c| format!("+{c}"))
            .collect::<Vec<_>>()
            .join(" ");

        debug!(path = %parent.display(), controllers = %to_enable, "Enabling controllers");

        match self.backend.write(&control_file, &to_enable) {
            Ok(()) => Ok(()),
            // Controllers may be managed at a higher level.
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                debug!(path = %parent.display(), "Permission denied enabling controllers");
                Ok(())
            }
            Err(e) => Err(io_error(e, || {
                format!("enable controllers in {}", parent.display())
            })),
        }
    }

    fn apply_owners(&self, slice: &Slice<'_>, owners: Owners) -> Result<()> {
        let chown = |path: &Path, uid, gid| {
            self.backend
                .set_owner(path, uid, gid)
                .map_err(|e| io_error(e, || format!("chown {}", path.display())))
        };

        chown(&slice.dir, owners.control_uid, owners.control_gid)?;

        let entries = self
            .backend
            .list_dir(&slice.dir)
            .map_err(|e| io_error(e, || format!("list {}", slice.dir.display())))?;
        for entry in entries.iter().filter(|e| !e.is_dir) {
            chown(
                &slice.dir.join(&entry.name),
                owners.control_uid,
                owners.control_gid,
            )?;
        }

        chown(&slice.tasks_file(), owners.tasks_uid, owners.tasks_gid)?;

        debug!(path = %slice.dir.display(), ?owners, "Applied ownership");
        Ok(())
    }

    fn write_param(&self, dir: &Path, param: &Parameter) -> Result<()> {
        let path = dir.join(&param.name);
        let text = param.value.to_kernel_string();

        debug!(path = %path.display(), value = %text, "Writing parameter");

        self.backend.write(&path, &text).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::ValueNotExist {
                name: param.name.clone(),
            },
            _ => io_error(e, || format!("write {}", path.display())),
        })
    }

    fn read_param(&self, path: &Path, name: &str) -> Result<String> {
        self.backend.read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::ValueNotExist {
                name: name.to_string(),
            },
            _ => io_error(e, || format!("read {}", path.display())),
        })
    }

    /// Nearest existing ancestor directory of `name` on `mount`
    fn parent_dir(&self, name: &GroupName, mount: &MountPoint) -> Result<PathBuf> {
        name.ancestors()
            .into_iter()
            .skip(1)
            .map(|ancestor| ancestor.path_under(mount.path()))
            .find(|dir| self.backend.is_dir(dir))
            .ok_or_else(|| Error::GroupNotExist {
                name: name.parent().to_string(),
            })
    }

    /// Parameters of `controller` found in `dir`, as strings
    fn read_controller_params(&self, dir: &Path, controller: &str) -> Result<Vec<Parameter>> {
        let prefix = format!("{controller}.");
        let entries = self
            .backend
            .list_dir(dir)
            .map_err(|e| io_error(e, || format!("list {}", dir.display())))?;

        let mut params = Vec::new();
        for entry in entries
            .iter()
            .filter(|e| !e.is_dir && e.name.starts_with(&prefix))
        {
            match self.backend.read_to_string(&dir.join(&entry.name)) {
                Ok(text) => params.push(Parameter {
                    name: entry.name.clone(),
                    value: Value::parse_kernel(ValueKind::String, &entry.name, &text)?,
                }),
                Err(e) => {
                    debug!(file = %entry.name, error = %e, "Skipping unreadable parameter");
                }
            }
        }
        Ok(params)
    }

    /// Create a group that inherits its parent's parameters
    ///
    /// For each controller, the writable parameters of the nearest existing
    /// ancestor are copied into `group` as strings; values the caller
    /// already set take precedence. A group without controllers inherits
    /// every mounted controller. `group` is left holding the merged
    /// parameters, then created.
    ///
    /// # Errors
    /// `GroupNotExist` if no ancestor directory exists, plus the errors of
    /// [`CgroupManager::create`]
    pub fn create_from_parent(&self, group: &mut Group, ignore_ownership: bool) -> Result<CreateReport> {
        if group.controllers().is_empty() {
            let name = group.name().clone();
            for controller in self.table.controllers() {
                let mount = self.table.resolve(controller)?;
                if self.parent_dir(&name, mount).is_ok() {
                    group.add_controller(&self.table, controller)?;
                }
            }
        }

        let mut merged = Group::with_name(group.name().clone());
        merged.set_owners(group.owners());

        for controller in group.controllers() {
            let mount = self.table.resolve(controller.name())?;
            let parent = self.parent_dir(group.name(), mount)?;
            let writable: Vec<String> = self
                .backend
                .list_dir(&parent)
                .map_err(|e| io_error(e, || format!("list {}", parent.display())))?
                .into_iter()
                .filter(|e| e.writable)
                .map(|e| e.name)
                .collect();

            let target = merged.add_controller(&self.table, controller.name())?;
            for param in self.read_controller_params(&parent, controller.name())? {
                if writable.contains(&param.name) {
                    target.add_value(&param.name, param.value)?;
                }
            }

            for param in controller.values() {
                match target.values().iter().position(|p| p.name == param.name) {
                    Some(idx) => target.values_mut()[idx].value = param.value.clone(),
                    None => target.add_value(&param.name, param.value.clone())?,
                }
            }

            debug!(
                group = %group.name(),
                controller = controller.name(),
                parent = %parent.display(),
                values = target.len(),
                "Inherited parent parameters"
            );
        }

        *group = merged;
        self.create(group, ignore_ownership)
    }

    /// Refresh a group model from the control surface
    ///
    /// Every cached value is re-read and parsed with its own tag. A
    /// controller without values is filled with all of its readable
    /// parameters as strings. Ownership is refreshed from the first
    /// hierarchy.
    ///
    /// # Errors
    /// - `InvalidArgument` if the group has no controllers
    /// - `GroupNotExist` if a controller's group directory is missing
    /// - `ValueNotExist` if a cached parameter has no file
    /// - `InvalidArgument` if a file does not parse as the cached tag
    pub fn get(&self, group: &mut Group) -> Result<()> {
        require_controllers(group)?;
        let name = group.name().clone();
        let mut owner_source: Option<(PathBuf, PathBuf)> = None;

        for controller in group.controllers_mut() {
            let mount = self.table.resolve(controller.name())?;
            let dir = name.path_under(mount.path());

            if !self.backend.is_dir(&dir) {
                return Err(Error::GroupNotExist {
                    name: name.to_string(),
                });
            }

            if controller.is_empty() {
                for param in self.read_controller_params(&dir, controller.name())? {
                    controller.add_value(&param.name, param.value)?;
                }
            } else {
                for param in controller.values_mut() {
                    let text = self.read_param(&dir.join(&param.name), &param.name)?;
                    param.value = Value::parse_kernel(param.value.kind(), &param.name, &text)?;
                }
            }

            if owner_source.is_none() {
                let tasks = dir.join(mount.kind().tasks_file());
                owner_source = Some((dir, tasks));
            }
        }

        if let Some((dir, tasks)) = owner_source {
            let read_owner = |path: &Path| {
                self.backend
                    .owner(path)
                    .map_err(|e| io_error(e, || format!("stat {}", path.display())))
            };
            let (control_uid, control_gid) = read_owner(&dir)?;
            let (tasks_uid, tasks_gid) = read_owner(&tasks)?;
            group.set_owners(Owners::new(tasks_uid, tasks_gid, control_uid, control_gid));
        }

        debug!(group = %name, "Group refreshed");
        Ok(())
    }

    /// Write every value of the model to the control surface
    ///
    /// Writes are independent: a failure is logged and the remaining
    /// values are still attempted. Structure and ownership are untouched.
    ///
    /// # Errors
    /// Returns the last error encountered; call [`CgroupManager::get`] to
    /// learn the resulting state
    pub fn modify(&self, group: &Group) -> Result<()> {
        let mut last_error = None;

        for controller in group.controllers() {
            let mount = match self.table.resolve(controller.name()) {
                Ok(mount) => mount,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };
            let dir = group.name().path_under(mount.path());

            if !self.backend.is_dir(&dir) {
                last_error = Some(Error::GroupNotExist {
                    name: group.name().to_string(),
                });
                continue;
            }

            for param in controller.values() {
                if let Err(e) = self.write_param(&dir, param) {
                    warn!(group = %group.name(), param = %param.name, error = %e, "Failed to modify parameter");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => {
                info!(group = %group.name(), "Group modified");
                Ok(())
            }
        }
    }

    /// Remove a group from every hierarchy of its controllers
    ///
    /// With `ignore_task_migration` false a group that still has member
    /// tasks is left alone. With it true, members are first moved to the
    /// parent group. Every check runs before any task is moved.
    ///
    /// # Errors
    /// - `InvalidArgument` for the root group or a group without controllers
    /// - `GroupNotExist` if a group directory is missing
    /// - `NotEmpty` if tasks remain and migration is not allowed, or the
    ///   group has child groups
    pub fn delete(&self, group: &Group, ignore_task_migration: bool) -> Result<()> {
        if group.name().is_root() {
            return Err(Error::InvalidArgument {
                message: "The root group cannot be deleted".to_string(),
            });
        }

        let slices = self.group_slices(group)?;

        let mut members = Vec::with_capacity(slices.len());
        for slice in &slices {
            if !self.backend.is_dir(&slice.dir) {
                return Err(Error::GroupNotExist {
                    name: group.name().to_string(),
                });
            }
            let has_children = self
                .backend
                .list_dir(&slice.dir)
                .map_err(|e| io_error(e, || format!("list {}", slice.dir.display())))?
                .iter()
                .any(|e| e.is_dir);
            let tasks = self.read_tasks(&slice.tasks_file())?;
            if has_children || (!tasks.is_empty() && !ignore_task_migration) {
                return Err(Error::NotEmpty {
                    name: group.name().to_string(),
                });
            }
            members.push(tasks);
        }

        for (slice, tasks) in slices.iter().zip(members) {
            if !tasks.is_empty() {
                self.migrate_tasks(group.name(), slice, &tasks)?;
            }

            self.backend.remove_dir(&slice.dir).map_err(|e| match e.kind() {
                io::ErrorKind::ResourceBusy | io::ErrorKind::DirectoryNotEmpty => Error::NotEmpty {
                    name: group.name().to_string(),
                },
                io::ErrorKind::NotFound => Error::GroupNotExist {
                    name: group.name().to_string(),
                },
                _ => io_error(e, || format!("remove {}", slice.dir.display())),
            })?;
        }

        info!(group = %group.name(), "Group deleted");
        Ok(())
    }

    fn migrate_tasks(&self, name: &GroupName, slice: &Slice<'_>, tasks: &[ProcessId]) -> Result<()> {
        let parent_tasks = name
            .parent()
            .path_under(slice.mount.path())
            .join(slice.mount.kind().tasks_file());

        for pid in tasks {
            match self.backend.append_task(&parent_tasks, *pid) {
                Ok(()) => {}
                // The task exited meanwhile.
                Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {
                    debug!(pid = pid.as_raw(), "Task vanished during migration");
                }
                Err(e) => {
                    return Err(io_error(e, || {
                        format!("migrate task {pid} to {}", parent_tasks.display())
                    }));
                }
            }
        }

        debug!(from = %slice.dir.display(), tasks = tasks.len(), "Migrated tasks to parent");
        Ok(())
    }

    pub(crate) fn read_tasks(&self, path: &Path) -> Result<Vec<ProcessId>> {
        let contents = self
            .backend
            .read_to_string(path)
            .map_err(|e| io_error(e, || format!("read {}", path.display())))?;

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::parse)
            .collect()
    }
}
