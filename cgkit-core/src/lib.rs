//! cgkit core - Foundation types shared by the cgroup crates
//!
//! This crate provides the error taxonomy, the typed parameter [`Value`],
//! validated group names, ownership pairs, process ids, the capacity limits
//! and the library [`Config`].

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod limits;
pub mod types;
pub mod value;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{GroupName, Owners, ProcessId};
pub use value::{Value, ValueKind};
