//! Rules file parser
//!
//! One rule per line: `<user> <controllers> <destination>`. See the crate
//! documentation for the grammar.

use std::path::{Path, PathBuf};

use cgkit_core::limits::{MAX_MNT_ELEMENTS, RULE_MAX_LINE};
use cgkit_core::{Error, Result};
use libc::{gid_t, uid_t};
use tracing::{debug, warn};

use crate::identity::IdentityResolver;
use crate::rule::{ControllerSpec, IdMatcher, Rule, RuleSet};

type Matchers = (IdMatcher<uid_t>, IdMatcher<gid_t>);

impl RuleSet {
    /// Parse a rules file
    ///
    /// # Errors
    /// `Io` if the file cannot be read, otherwise see [`RuleSet::parse_str`]
    pub fn parse_file(path: impl AsRef<Path>, resolver: &dyn IdentityResolver) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::parse_str(&text, path, resolver)
    }

    /// Parse rules from text; `path` is used for error reporting
    ///
    /// User and group names that do not resolve produce a rule that never
    /// matches.
    ///
    /// # Errors
    /// - `ParseFailed` naming the first malformed line
    /// - `NoRules` if no rule can ever match
    pub fn parse_str(text: &str, path: impl Into<PathBuf>, resolver: &dyn IdentityResolver) -> Result<Self> {
        let path = path.into();
        let mut rules: Vec<Rule> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let fail = |message: String| Error::ParseFailed {
                path: path.clone(),
                line,
                message,
            };

            if raw.len() > RULE_MAX_LINE {
                return Err(fail(format!("Line longer than {RULE_MAX_LINE} characters")));
            }

            let fields: Vec<&str> = raw
                .split_whitespace()
                .take_while(|f| !f.starts_with('#'))
                .collect();
            if fields.is_empty() {
                continue;
            }
            let &[user, controllers, destination] = fields.as_slice() else {
                return Err(fail(format!("Expected 3 fields, found {}", fields.len())));
            };

            let controllers = parse_controllers(controllers).map_err(fail)?;

            let (uid, gid) = if user == "%" {
                let head = rules
                    .last()
                    .ok_or_else(|| fail("Continuation without a preceding rule".to_string()))?;
                (head.uid, head.gid)
            } else {
                parse_user(user, resolver).map_err(fail)?
            };

            if uid == IdMatcher::Invalid || gid == IdMatcher::Invalid {
                warn!(path = %path.display(), line, user, "Unknown identity, rule will never match");
            }

            rules.push(Rule {
                uid,
                gid,
                user: user.to_string(),
                controllers,
                destination: destination.to_string(),
                continuation: user == "%",
                line,
            });
        }

        let usable = rules
            .iter()
            .any(|r| r.uid != IdMatcher::Invalid && r.gid != IdMatcher::Invalid);
        if !usable {
            return Err(Error::NoRules { path });
        }

        debug!(path = %path.display(), rules = rules.len(), "Parsed rules");
        Ok(Self::new(path, rules))
    }
}

/// Names as accepted by `useradd`: portable characters, optional trailing `$`
fn is_identity_name(name: &str) -> bool {
    let name = name.strip_suffix('$').unwrap_or(name);
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn parse_user(token: &str, resolver: &dyn IdentityResolver) -> std::result::Result<Matchers, String> {
    if token == "*" {
        return Ok((IdMatcher::Wildcard, IdMatcher::Wildcard));
    }

    if let Some(group) = token.strip_prefix('@') {
        if group == "*" {
            return Ok((IdMatcher::Wildcard, IdMatcher::Wildcard));
        }
        if !is_identity_name(group) {
            return Err(format!("Invalid group name {group:?}"));
        }
        let gid = group
            .parse::<gid_t>()
            .ok()
            .or_else(|| resolver.gid_of(group))
            .map_or(IdMatcher::Invalid, IdMatcher::Id);
        return Ok((IdMatcher::Wildcard, gid));
    }

    if !is_identity_name(token) {
        return Err(format!("Invalid user name {token:?}"));
    }
    let uid = token
        .parse::<uid_t>()
        .ok()
        .or_else(|| resolver.uid_of(token))
        .map_or(IdMatcher::Invalid, IdMatcher::Id);
    Ok((uid, IdMatcher::Wildcard))
}

fn parse_controllers(token: &str) -> std::result::Result<ControllerSpec, String> {
    if token == "*" {
        return Ok(ControllerSpec::All);
    }

    let names: Vec<String> = token.split(',').map(str::to_string).collect();
    if names.len() > MAX_MNT_ELEMENTS {
        return Err(format!("More than {MAX_MNT_ELEMENTS} controllers"));
    }
    for name in &names {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("Invalid controller {name:?}"));
        }
    }

    Ok(ControllerSpec::Named(names))
}
