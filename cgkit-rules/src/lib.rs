//! Rule-based classification of tasks into control groups
//!
//! Rules are read from a `cgrules.conf`-style file, one per line:
//!
//! ```text
//! # user      controllers   destination
//! alice       cpu,memory    users/alice
//! @staff      *             staff/%u
//! %           memory        staff/mem     # continues the rule above
//! *           cpu           default
//! ```
//!
//! The first rule whose user and group matchers both accept a task's ids
//! decides where it goes; rules written as `%` are applied along with the
//! rule before them. `%u`, `%U`, `%g`, `%G` and `%%` in a destination
//! expand to the task's user name, uid, group name, gid and `%`.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod classifier;
pub mod identity;
mod parser;
pub mod rule;

pub use cache::{CacheStatus, RuleCache};
pub use classifier::{Classification, ClassifyFlags, Classifier, Placement};
pub use identity::{IdentityResolver, StaticIdentities, SystemIdentities};
pub use rule::{ControllerSpec, IdMatcher, Rule, RuleSet};
