//! User and group name resolution

use std::collections::BTreeMap;

use libc::{gid_t, uid_t};
use nix::unistd::{Gid, Group, Uid, User};
use tracing::debug;

/// Trait for mapping between identity names and numeric ids
///
/// This allows for different implementations:
/// - [`SystemIdentities`] - The system user and group databases
/// - [`StaticIdentities`] - A fixed table, for testing
pub trait IdentityResolver: Send + Sync {
    /// Numeric id of a user name
    fn uid_of(&self, user: &str) -> Option<uid_t>;

    /// Numeric id of a group name
    fn gid_of(&self, group: &str) -> Option<gid_t>;

    /// Name of a user id
    fn user_name(&self, uid: uid_t) -> Option<String>;

    /// Name of a group id
    fn group_name(&self, gid: gid_t) -> Option<String>;
}

/// Resolver backed by the system databases (`getpwnam(3)` and friends)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentities;

impl IdentityResolver for SystemIdentities {
    fn uid_of(&self, user: &str) -> Option<uid_t> {
        User::from_name(user)
            .inspect_err(|e| debug!(user, error = %e, "User lookup failed"))
            .ok()
            .flatten()
            .map(|u| u.uid.as_raw())
    }

    fn gid_of(&self, group: &str) -> Option<gid_t> {
        Group::from_name(group)
            .inspect_err(|e| debug!(group, error = %e, "Group lookup failed"))
            .ok()
            .flatten()
            .map(|g| g.gid.as_raw())
    }

    fn user_name(&self, uid: uid_t) -> Option<String> {
        User::from_uid(Uid::from_raw(uid)).ok().flatten().map(|u| u.name)
    }

    fn group_name(&self, gid: gid_t) -> Option<String> {
        Group::from_gid(Gid::from_raw(gid)).ok().flatten().map(|g| g.name)
    }
}

/// Resolver over a fixed table of users and groups
///
/// # Example
/// ```
/// use cgkit_rules::{IdentityResolver, StaticIdentities};
///
/// let ids = StaticIdentities::new()
///     .with_user("alice", 1000)
///     .with_group("staff", 50);
///
/// assert_eq!(ids.uid_of("alice"), Some(1000));
/// assert_eq!(ids.group_name(50).as_deref(), Some("staff"));
/// assert_eq!(ids.uid_of("bob"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticIdentities {
    users: BTreeMap<String, uid_t>,
    groups: BTreeMap<String, gid_t>,
}

impl StaticIdentities {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user
    #[must_use]
    pub fn with_user(mut self, name: &str, uid: uid_t) -> Self {
        self.users.insert(name.to_string(), uid);
        self
    }

    /// Add a group
    #[must_use]
    pub fn with_group(mut self, name: &str, gid: gid_t) -> Self {
        self.groups.insert(name.to_string(), gid);
        self
    }
}

impl IdentityResolver for StaticIdentities {
    fn uid_of(&self, user: &str) -> Option<uid_t> {
        self.users.get(user).copied()
    }

    fn gid_of(&self, group: &str) -> Option<gid_t> {
        self.groups.get(group).copied()
    }

    fn user_name(&self, uid: uid_t) -> Option<String> {
        self.users
            .iter()
            .find(|&(_, id)| *id == uid)
            .map(|(name, _)| name.clone())
    }

    fn group_name(&self, gid: gid_t) -> Option<String> {
        self.groups
            .iter()
            .find(|&(_, id)| *id == gid)
            .map(|(name, _)| name.clone())
    }
}
