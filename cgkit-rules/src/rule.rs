//! Rule model: identity matchers, controller selections and rule sets

use std::fmt;
use std::path::{Path, PathBuf};

use cgkit_group::HierarchyTable;
use libc::{gid_t, uid_t};

use crate::identity::IdentityResolver;

/// Matcher for one identity axis (user id or group id)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMatcher<T> {
    /// Accepts exactly this id
    Id(T),
    /// Accepts any id
    Wildcard,
    /// Name that did not resolve; accepts nothing
    Invalid,
}

impl<T: PartialEq + Copy> IdMatcher<T> {
    /// Whether the matcher accepts `id`
    pub fn accepts(&self, id: T) -> bool {
        match self {
            Self::Id(expected) => *expected == id,
            Self::Wildcard => true,
            Self::Invalid => false,
        }
    }
}

impl<T: fmt::Display> fmt::Display for IdMatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Wildcard => f.write_str("*"),
            Self::Invalid => f.write_str("invalid"),
        }
    }
}

/// Controllers a rule places tasks under
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerSpec {
    /// Every mounted controller
    All,
    /// The listed controllers, in file order
    Named(Vec<String>),
}

impl ControllerSpec {
    /// Controller names this selection stands for under `table`
    #[must_use]
    pub fn resolve<'a>(&'a self, table: &'a HierarchyTable) -> Vec<&'a str> {
        match self {
            Self::All => table.controllers().collect(),
            Self::Named(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Display for ControllerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Named(names) => f.write_str(&names.join(",")),
        }
    }
}

/// One classification rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub(crate) uid: IdMatcher<uid_t>,
    pub(crate) gid: IdMatcher<gid_t>,
    pub(crate) user: String,
    pub(crate) controllers: ControllerSpec,
    pub(crate) destination: String,
    pub(crate) continuation: bool,
    pub(crate) line: usize,
}

impl Rule {
    /// User id matcher
    #[must_use]
    pub const fn uid(&self) -> IdMatcher<uid_t> {
        self.uid
    }

    /// Group id matcher
    #[must_use]
    pub const fn gid(&self) -> IdMatcher<gid_t> {
        self.gid
    }

    /// The user field as written in the file
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Controller selection
    #[must_use]
    pub const fn controllers(&self) -> &ControllerSpec {
        &self.controllers
    }

    /// Destination template
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Whether this rule continues the rule before it
    #[must_use]
    pub const fn is_continuation(&self) -> bool {
        self.continuation
    }

    /// Line of the rules file this rule came from (1-based)
    #[must_use]
    pub const fn line(&self) -> usize {
        self.line
    }

    /// Whether this rule is a head rule selecting `(uid, gid)`
    ///
    /// Continuation rules never match on their own.
    #[must_use]
    pub fn matches(&self, uid: uid_t, gid: gid_t) -> bool {
        !self.continuation && self.uid.accepts(uid) && self.gid.accepts(gid)
    }

    /// Expand the destination template for `(uid, gid)`
    ///
    /// `%u`/`%g` become the user/group name (the numeric id if the name is
    /// unknown), `%U`/`%G` the numeric ids and `%%` a literal `%`. Any other
    /// `%` sequence is kept as written.
    #[must_use]
    pub fn render_destination(&self, uid: uid_t, gid: gid_t, resolver: &dyn IdentityResolver) -> String {
        let mut out = String::with_capacity(self.destination.len());
        let mut chars = self.destination.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('u') => out.push_str(&resolver.user_name(uid).unwrap_or_else(|| uid.to_string())),
                Some('U') => out.push_str(&uid.to_string()),
                Some('g') => out.push_str(&resolver.group_name(gid).unwrap_or_else(|| gid.to_string())),
                Some('G') => out.push_str(&gid.to_string()),
                Some('%') => out.push('%'),
                _ => {
                    out.push('%');
                    continue;
                }
            }
            chars.next();
        }

        out
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.user, self.controllers, self.destination)
    }
}

/// Rules parsed from one file, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    path: PathBuf,
    rules: Vec<Rule>,
}

impl RuleSet {
    pub(crate) const fn new(path: PathBuf, rules: Vec<Rule>) -> Self {
        Self { path, rules }
    }

    /// File the rules were read from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All rules, continuations included
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set holds no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First head rule matching `(uid, gid)` followed by its continuations
    #[must_use]
    pub fn find(&self, uid: uid_t, gid: gid_t) -> Option<&[Rule]> {
        let start = self.rules.iter().position(|r| r.matches(uid, gid))?;
        let len = 1 + self.rules[start + 1..]
            .iter()
            .take_while(|r| r.continuation)
            .count();
        Some(&self.rules[start..start + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentities;

    fn rule(uid: IdMatcher<uid_t>, gid: IdMatcher<gid_t>, destination: &str, continuation: bool) -> Rule {
        Rule {
            uid,
            gid,
            user: "x".to_string(),
            controllers: ControllerSpec::All,
            destination: destination.to_string(),
            continuation,
            line: 1,
        }
    }

    #[test]
    fn test_matchers() {
        assert!(IdMatcher::Id(5).accepts(5));
        assert!(!IdMatcher::Id(5).accepts(6));
        assert!(IdMatcher::<u32>::Wildcard.accepts(0));
        assert!(!IdMatcher::<u32>::Invalid.accepts(0));
    }

    #[test]
    fn test_continuation_never_matches_alone() {
        let r = rule(IdMatcher::Wildcard, IdMatcher::Wildcard, "a", true);
        assert!(!r.matches(1, 1));
    }

    #[test]
    fn test_find_returns_continuations() {
        let set = RuleSet::new(
            PathBuf::from("rules"),
            vec![
                rule(IdMatcher::Id(7), IdMatcher::Wildcard, "seven", false),
                rule(IdMatcher::Id(7), IdMatcher::Wildcard, "seven-mem", true),
                rule(IdMatcher::Wildcard, IdMatcher::Wildcard, "rest", false),
                rule(IdMatcher::Wildcard, IdMatcher::Wildcard, "rest-mem", true),
                rule(IdMatcher::Wildcard, IdMatcher::Id(3), "never", false),
            ],
        );

        let found = set.find(7, 0).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].destination(), "seven-mem");

        let found = set.find(8, 3).unwrap();
        assert_eq!(found[0].destination(), "rest");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_render_destination() {
        let ids = StaticIdentities::new()
            .with_user("alice", 1000)
            .with_group("staff", 50);
        let r = rule(IdMatcher::Wildcard, IdMatcher::Wildcard, "users/%u/%g-%U-%G/100%%/%x", false);

        assert_eq!(
            r.render_destination(1000, 50, &ids),
            "users/alice/staff-1000-50/100%/%x"
        );
        // Unknown names fall back to the numeric id.
        assert_eq!(
            r.render_destination(2000, 60, &ids),
            "users/2000/60-2000-60/100%/%x"
        );
    }

    #[test]
    fn test_display() {
        let mut r = rule(IdMatcher::Id(1), IdMatcher::Wildcard, "dest", false);
        r.controllers = ControllerSpec::Named(vec!["cpu".to_string(), "memory".to_string()]);
        assert_eq!(r.to_string(), "x\tcpu,memory\tdest");
    }
}
