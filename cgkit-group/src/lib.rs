//! Control group hierarchies, group models and their lifecycle
//!
//! This crate discovers the mounted cgroup hierarchies, models groups as
//! plain values, and reconciles those models with the kernel through a
//! pluggable [`ControlBackend`].

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod backend;
pub mod group;
pub mod hierarchy;
pub mod kernel;
pub mod lifecycle;
mod tasks;

pub use backend::{ControlBackend, DirEntry, MockBackend};
pub use group::{Controller, Group, Parameter};
pub use hierarchy::{HierarchyKind, HierarchyTable, MountPoint};
pub use kernel::KernelBackend;
pub use lifecycle::{CgroupManager, CreateOptions, CreateReport};

// Re-export commonly used types
pub use cgkit_core::{Config, Error, GroupName, Owners, ProcessId, Result, Value, ValueKind};
