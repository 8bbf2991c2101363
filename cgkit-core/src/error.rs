//! Error types for cgkit

use std::path::PathBuf;

use thiserror::Error;

use crate::value::ValueKind;

/// cgkit error types
///
/// Every operation reports one of these kinds to its caller. `Io` and
/// `System` carry the underlying OS error; callers should inspect the
/// source when they see either of them.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error from the control surface or a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),

    /// No cgroup hierarchy is mounted
    #[error("No cgroup hierarchy is mounted")]
    NotMounted,

    /// The controller is not bound to any mounted hierarchy
    #[error("Controller {controller} is not mounted")]
    SubsystemNotMounted {
        /// Controller name
        controller: String,
    },

    /// The same controller shows up under two hierarchies
    #[error("Controller {controller} is mounted at both {} and {}", first.display(), second.display())]
    MultiplyMounted {
        /// Controller name
        controller: String,
        /// First mount path seen
        first: PathBuf,
        /// Conflicting mount path
        second: PathBuf,
    },

    /// The mount table could not be read or interpreted
    #[error("Mount table error: {message}")]
    MountFailed {
        /// Error message
        message: String,
    },

    /// The group has no directory on the control surface
    #[error("Group {name} does not exist")]
    GroupNotExist {
        /// Group name or path
        name: String,
    },

    /// The group was already created
    #[error("Group {name} already exists")]
    GroupExists {
        /// Group name
        name: String,
    },

    /// The group still has member tasks or child groups
    #[error("Group {name} is not empty, task migration required")]
    NotEmpty {
        /// Group name
        name: String,
    },

    /// An operation ran before the state it depends on was loaded
    #[error("Not initialized: {what}")]
    NotInitialized {
        /// What is missing
        what: String,
    },

    /// Permission denied
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },

    /// A bounded collection is full
    #[error("Too many {what} (max {max})")]
    CapacityExceeded {
        /// What overflowed
        what: &'static str,
        /// Configured maximum
        max: usize,
    },

    /// Controller already present in the group
    #[error("Controller {name} already exists")]
    ControllerExists {
        /// Controller name
        name: String,
    },

    /// Parameter already present in the controller
    #[error("Value {name} already exists")]
    ValueExists {
        /// Parameter name
        name: String,
    },

    /// Parameter not present
    #[error("Value {name} does not exist")]
    ValueNotExist {
        /// Parameter name
        name: String,
    },

    /// Parameter read or written with the wrong type
    #[error("Value {name} holds {found}, not {expected}")]
    TypeMismatch {
        /// Parameter name
        name: String,
        /// Type the caller asked for
        expected: ValueKind,
        /// Type actually stored
        found: ValueKind,
    },

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// Creating the group directory for a controller failed
    #[error("Failed to create {controller} group at {}: {source}", path.display())]
    ControllerCreateFailed {
        /// Controller name
        controller: String,
        /// Directory that could not be created
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Generic internal failure
    #[error("Operation failed: {message}")]
    Failed {
        /// Error message
        message: String,
    },

    /// Two groups differ by name or controller set
    #[error("Groups are not equal: {message}")]
    GroupNotEqual {
        /// What differs
        message: String,
    },

    /// Two controllers differ
    #[error("Controller {name} is not equal")]
    ControllerNotEqual {
        /// Controller name
        name: String,
    },

    /// The rules file could not be parsed
    #[error("{}:{line}: {message}", path.display())]
    ParseFailed {
        /// Rules file
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Error message
        message: String,
    },

    /// The rules file yielded no rules
    #[error("No rules found in {}", path.display())]
    NoRules {
        /// Rules file
        path: PathBuf,
    },
}

/// Result type alias for cgkit operations
pub type Result<T> = std::result::Result<T, Error>;
