//! In-memory model of a group and its controllers
//!
//! A [`Group`] is built in memory first and only touches the kernel through
//! the [`CgroupManager`](crate::CgroupManager).
//!
//! # Example
//! ```
//! use cgkit_group::{Group, HierarchyKind, HierarchyTable, MountPoint};
//!
//! # fn main() -> cgkit_core::Result<()> {
//! let table = HierarchyTable::new(vec![
//!     MountPoint::new("/sys/fs/cgroup/cpu", &["cpu"], HierarchyKind::V1),
//! ])?;
//!
//! let mut group = Group::new("students/charlie")?;
//! let cpu = group.add_controller(&table, "cpu")?;
//! cpu.add_value_uint64("cpu.shares", 512)?;
//! cpu.add_value_int64("cpu.cfs_quota_us", 50_000)?;
//!
//! assert_eq!(group.controller("cpu").unwrap().get_value_uint64("cpu.shares")?, 512);
//! # Ok(())
//! # }
//! ```

use cgkit_core::limits::{MAX_CONTROLLERS, MAX_VALUES};
use cgkit_core::{Error, GroupName, Owners, Result, Value, ValueKind};
use serde::{Deserialize, Serialize};

use crate::hierarchy::HierarchyTable;

/// One named parameter of a controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter file name, e.g. `cpu.shares`
    pub name: String,
    /// Typed value
    pub value: Value,
}

/// Parameters of one controller in one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    name: String,
    values: Vec<Parameter>,
}

impl Controller {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            values: Vec::new(),
        }
    }

    /// Controller name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters in declaration order
    #[must_use]
    pub fn values(&self) -> &[Parameter] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut Vec<Parameter> {
        &mut self.values
    }

    /// Number of parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the controller has no parameters
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a parameter
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Add a parameter
    ///
    /// # Errors
    /// - `ValueExists` if the parameter is already present
    /// - `CapacityExceeded` if the controller already holds `MAX_VALUES`
    pub fn add_value(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        if self.value(name).is_some() {
            return Err(Error::ValueExists {
                name: name.to_string(),
            });
        }
        if self.values.len() >= MAX_VALUES {
            return Err(Error::CapacityExceeded {
                what: "values",
                max: MAX_VALUES,
            });
        }
        if name.is_empty() || name.contains('/') {
            return Err(Error::InvalidArgument {
                message: format!("{name:?} is not a parameter name"),
            });
        }

        self.values.push(Parameter {
            name: name.to_string(),
            value: value.into(),
        });
        Ok(())
    }

    /// Add a string parameter
    ///
    /// # Errors
    /// See [`Controller::add_value`]
    pub fn add_value_string(&mut self, name: &str, value: &str) -> Result<()> {
        self.add_value(name, Value::String(value.to_string()))
    }

    /// Add a signed integer parameter
    ///
    /// # Errors
    /// See [`Controller::add_value`]
    pub fn add_value_int64(&mut self, name: &str, value: i64) -> Result<()> {
        self.add_value(name, Value::Int64(value))
    }

    /// Add an unsigned integer parameter
    ///
    /// # Errors
    /// See [`Controller::add_value`]
    pub fn add_value_uint64(&mut self, name: &str, value: u64) -> Result<()> {
        self.add_value(name, Value::UInt64(value))
    }

    /// Add a boolean parameter
    ///
    /// # Errors
    /// See [`Controller::add_value`]
    pub fn add_value_bool(&mut self, name: &str, value: bool) -> Result<()> {
        self.add_value(name, Value::Bool(value))
    }

    fn get(&self, name: &str) -> Result<&Value> {
        self.value(name).ok_or_else(|| Error::ValueNotExist {
            name: name.to_string(),
        })
    }

    fn mismatch(name: &str, expected: ValueKind, found: &Value) -> Error {
        Error::TypeMismatch {
            name: name.to_string(),
            expected,
            found: found.kind(),
        }
    }

    /// Read a string parameter
    ///
    /// # Errors
    /// `ValueNotExist` if absent, `TypeMismatch` if not a string
    pub fn get_value_string(&self, name: &str) -> Result<&str> {
        match self.get(name)? {
            Value::String(s) => Ok(s),
            other => Err(Self::mismatch(name, ValueKind::String, other)),
        }
    }

    /// Read a signed integer parameter
    ///
    /// # Errors
    /// `ValueNotExist` if absent, `TypeMismatch` if not an `int64`
    pub fn get_value_int64(&self, name: &str) -> Result<i64> {
        match self.get(name)? {
            Value::Int64(v) => Ok(*v),
            other => Err(Self::mismatch(name, ValueKind::Int64, other)),
        }
    }

    /// Read an unsigned integer parameter
    ///
    /// # Errors
    /// `ValueNotExist` if absent, `TypeMismatch` if not a `uint64`
    pub fn get_value_uint64(&self, name: &str) -> Result<u64> {
        match self.get(name)? {
            Value::UInt64(v) => Ok(*v),
            other => Err(Self::mismatch(name, ValueKind::UInt64, other)),
        }
    }

    /// Read a boolean parameter
    ///
    /// # Errors
    /// `ValueNotExist` if absent, `TypeMismatch` if not a `bool`
    pub fn get_value_bool(&self, name: &str) -> Result<bool> {
        match self.get(name)? {
            Value::Bool(v) => Ok(*v),
            other => Err(Self::mismatch(name, ValueKind::Bool, other)),
        }
    }

    /// Set a parameter, keeping its tag
    ///
    /// A missing parameter is added.
    ///
    /// # Errors
    /// `TypeMismatch` if the stored value has another tag, or the errors of
    /// [`Controller::add_value`] when adding
    pub fn set_value(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let Some(param) = self.values.iter_mut().find(|p| p.name == name) else {
            return self.add_value(name, value);
        };

        if param.value.kind() != value.kind() {
            return Err(Error::TypeMismatch {
                name: name.to_string(),
                expected: param.value.kind(),
                found: value.kind(),
            });
        }
        param.value = value;
        Ok(())
    }

    /// Set a string parameter
    ///
    /// # Errors
    /// See [`Controller::set_value`]
    pub fn set_value_string(&mut self, name: &str, value: &str) -> Result<()> {
        self.set_value(name, Value::String(value.to_string()))
    }

    /// Set a signed integer parameter
    ///
    /// # Errors
    /// See [`Controller::set_value`]
    pub fn set_value_int64(&mut self, name: &str, value: i64) -> Result<()> {
        self.set_value(name, Value::Int64(value))
    }

    /// Set an unsigned integer parameter
    ///
    /// # Errors
    /// See [`Controller::set_value`]
    pub fn set_value_uint64(&mut self, name: &str, value: u64) -> Result<()> {
        self.set_value(name, Value::UInt64(value))
    }

    /// Set a boolean parameter
    ///
    /// # Errors
    /// See [`Controller::set_value`]
    pub fn set_value_bool(&mut self, name: &str, value: bool) -> Result<()> {
        self.set_value(name, Value::Bool(value))
    }

    /// Compare two controllers
    ///
    /// Equal means same name and the same parameters with the same tagged
    /// values; declaration order does not matter.
    ///
    /// # Errors
    /// Returns `ControllerNotEqual` naming this controller when they differ
    pub fn compare(&self, other: &Self) -> Result<()> {
        let same = self.name == other.name
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .all(|p| other.value(&p.name) == Some(&p.value));

        if same {
            Ok(())
        } else {
            Err(Error::ControllerNotEqual {
                name: self.name.clone(),
            })
        }
    }
}

/// A named group with its controllers and ownership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    name: GroupName,
    controllers: Vec<Controller>,
    owners: Owners,
}

impl Group {
    /// Create an empty group
    ///
    /// # Errors
    /// Returns `InvalidArgument` if `name` is not a valid group name
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        Ok(Self::with_name(GroupName::new(name)?))
    }

    /// Create an empty group from a validated name
    #[must_use]
    pub fn with_name(name: GroupName) -> Self {
        Self {
            name,
            controllers: Vec::new(),
            owners: Owners::default(),
        }
    }

    /// Group name
    #[must_use]
    pub const fn name(&self) -> &GroupName {
        &self.name
    }

    /// Controllers in the order they were added
    #[must_use]
    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub(crate) fn controllers_mut(&mut self) -> &mut [Controller] {
        &mut self.controllers
    }

    /// Look up a controller
    #[must_use]
    pub fn controller(&self, name: &str) -> Option<&Controller> {
        self.controllers.iter().find(|c| c.name == name)
    }

    /// Look up a controller for modification
    pub fn controller_mut(&mut self, name: &str) -> Option<&mut Controller> {
        self.controllers.iter_mut().find(|c| c.name == name)
    }

    /// Add an empty controller
    ///
    /// # Errors
    /// - `SubsystemNotMounted` if `name` is not in `table`
    /// - `ControllerExists` if the group already has it
    /// - `CapacityExceeded` if the group already holds `MAX_CONTROLLERS`
    pub fn add_controller(&mut self, table: &HierarchyTable, name: &str) -> Result<&mut Controller> {
        table.resolve(name)?;

        if self.controller(name).is_some() {
            return Err(Error::ControllerExists {
                name: name.to_string(),
            });
        }
        if self.controllers.len() >= MAX_CONTROLLERS {
            return Err(Error::CapacityExceeded {
                what: "controllers",
                max: MAX_CONTROLLERS,
            });
        }

        self.controllers.push(Controller::new(name));
        let last = self.controllers.len() - 1;
        Ok(&mut self.controllers[last])
    }

    /// Drop every controller
    pub fn clear_controllers(&mut self) {
        self.controllers.clear();
    }

    /// Replace this group's controllers with a copy of `src`'s
    ///
    /// The name and ownership of this group are kept.
    pub fn copy_from(&mut self, src: &Self) {
        self.controllers.clone_from(&src.controllers);
    }

    /// Ownership of the group's files
    #[must_use]
    pub const fn owners(&self) -> Owners {
        self.owners
    }

    /// Set the ownership applied at creation
    pub const fn set_owners(&mut self, owners: Owners) {
        self.owners = owners;
    }

    /// Compare two groups
    ///
    /// # Errors
    /// - `GroupNotEqual` if the names or the controller sets differ
    /// - `ControllerNotEqual` naming the first controller whose values differ
    pub fn compare(&self, other: &Self) -> Result<()> {
        if self.name != other.name {
            return Err(Error::GroupNotEqual {
                message: format!("name {} differs from {}", self.name, other.name),
            });
        }

        let same_set = self.controllers.len() == other.controllers.len()
            && self
                .controllers
                .iter()
                .all(|c| other.controller(&c.name).is_some());
        if !same_set {
            return Err(Error::GroupNotEqual {
                message: format!("controller sets of {} differ", self.name),
            });
        }

        for controller in &self.controllers {
            if let Some(theirs) = other.controller(&controller.name) {
                controller.compare(theirs)?;
            }
        }
        Ok(())
    }
}
