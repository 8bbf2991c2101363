//! Task placement
//!
//! This module provides the methods that move tasks between groups and
//! report where a task currently lives.

use std::io;

use cgkit_core::{Error, GroupName, ProcessId, Result};
use tracing::{debug, info};

use crate::group::Group;
use crate::hierarchy::HierarchyKind;
use crate::lifecycle::{CgroupManager, io_error};

impl CgroupManager {
    /// Move a task into `group` in every hierarchy of its controllers
    ///
    /// `None` (or a raw id of zero) attaches the calling process. Writes
    /// are not atomic across hierarchies: on failure the task may already
    /// have moved in the hierarchies handled before.
    ///
    /// # Example
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use cgkit_group::{CgroupManager, Group, HierarchyKind, HierarchyTable, MockBackend, MountPoint};
    /// # use cgkit_core::ProcessId;
    /// # fn main() -> cgkit_core::Result<()> {
    /// let backend = MockBackend::new().with_hierarchy("/cg/cpu", "tasks", &[]);
    /// let table = HierarchyTable::new(vec![MountPoint::new("/cg/cpu", &["cpu"], HierarchyKind::V1)])?;
    /// let manager = CgroupManager::new(Arc::new(table), Arc::new(backend.clone()));
    ///
    /// let mut group = Group::new("batch")?;
    /// group.add_controller(manager.table(), "cpu")?;
    /// manager.create(&group, true)?;
    /// manager.attach_task(&group, Some(ProcessId::from_raw(4242)))?;
    ///
    /// assert_eq!(backend.tasks("/cg/cpu/batch"), vec![ProcessId::from_raw(4242)]);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// - `InvalidArgument` if the group has no controllers
    /// - `SubsystemNotMounted` if a controller is not mounted
    /// - `GroupNotExist` if the group directory is missing
    pub fn attach_task(&self, group: &Group, pid: Option<ProcessId>) -> Result<()> {
        let controllers: Vec<&str> = group.controllers().iter().map(|c| c.name()).collect();
        self.place_task(
            group.name(),
            pid.unwrap_or_else(ProcessId::current),
            &controllers,
        )
    }

    /// Move a task into the group at `path` for the listed controllers
    ///
    /// Controllers sharing a hierarchy are written once.
    ///
    /// # Errors
    /// Same as [`CgroupManager::attach_task`], plus `InvalidArgument` for a
    /// malformed path
    pub fn change_by_path(&self, path: &str, pid: ProcessId, controllers: &[&str]) -> Result<()> {
        let name = GroupName::new(path)?;
        self.place_task(&name, pid, controllers)
    }

    fn place_task(&self, name: &GroupName, pid: ProcessId, controllers: &[&str]) -> Result<()> {
        if controllers.is_empty() {
            return Err(Error::InvalidArgument {
                message: format!("No controllers to attach to group {name}"),
            });
        }

        let pid = pid.resolve();
        let slices = self.slices(name, controllers.iter().copied())?;

        for slice in &slices {
            if !self.backend.is_dir(&slice.dir) {
                return Err(Error::GroupNotExist {
                    name: name.to_string(),
                });
            }

            let tasks_file = slice.tasks_file();
            debug!(path = %tasks_file.display(), pid = pid.as_raw(), "Attaching task");

            self.backend
                .append_task(&tasks_file, pid)
                .map_err(|e| match e.kind() {
                    io::ErrorKind::NotFound => Error::GroupNotExist {
                        name: name.to_string(),
                    },
                    _ => io_error(e, || format!("attach {pid} to {}", tasks_file.display())),
                })?;
        }

        info!(group = %name, pid = pid.as_raw(), hierarchies = slices.len(), "Task attached");
        Ok(())
    }

    /// Tasks that are members of `group` in the hierarchy of `controller`
    ///
    /// # Errors
    /// `SubsystemNotMounted`, `GroupNotExist`, or a parse failure of the
    /// task file
    pub fn tasks(&self, group: &Group, controller: &str) -> Result<Vec<ProcessId>> {
        let mount = self.table.resolve(controller)?;
        let dir = group.name().path_under(mount.path());

        if !self.backend.is_dir(&dir) {
            return Err(Error::GroupNotExist {
                name: group.name().to_string(),
            });
        }

        self.read_tasks(&dir.join(mount.kind().tasks_file()))
    }

    /// Group a task currently belongs to in the hierarchy of `controller`
    ///
    /// Reads `<proc_root>/<pid>/cgroup`. On a unified hierarchy the entry
    /// with hierarchy id `0` is used.
    ///
    /// # Errors
    /// - `SubsystemNotMounted` if the controller is unknown or not listed
    /// - `Io` if the task does not exist
    pub fn current_group(&self, pid: ProcessId, controller: &str) -> Result<GroupName> {
        let mount = self.table.resolve(controller)?;
        let path = self.config.proc_cgroup_path(pid.resolve().as_raw());

        let contents = self
            .backend
            .read_to_string(&path)
            .map_err(|e| io_error(e, || format!("read {}", path.display())))?;

        for line in contents.lines() {
            let mut fields = line.splitn(3, ':');
            let (Some(id), Some(controllers), Some(group)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };

            let matches = match mount.kind() {
                HierarchyKind::Unified => id == "0" && controllers.is_empty(),
                HierarchyKind::V1 => controllers.split(',').any(|c| c == controller),
            };
            if matches {
                return GroupName::new(group);
            }
        }

        Err(Error::SubsystemNotMounted {
            controller: controller.to_string(),
        })
    }
}
