//! Classification of tasks into groups by rule

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bitflags::bitflags;
use cgkit_core::{ProcessId, Result};
use cgkit_group::CgroupManager;
use libc::{gid_t, uid_t};
use tracing::{debug, info};

use crate::cache::RuleCache;
use crate::identity::IdentityResolver;
use crate::rule::RuleSet;

bitflags! {
    /// Options for [`Classifier::classify`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClassifyFlags: u32 {
        /// Match against the cached rules instead of re-reading the file
        const USE_CACHE = 1 << 0;
    }
}

/// One placement performed by a classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Group path after template expansion
    pub destination: String,
    /// Controllers the task was placed under
    pub controllers: Vec<String>,
}

/// Outcome of a matching classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Line of the matching rule
    pub line: usize,
    /// Placements of the matching rule and its continuations, in order
    pub placements: Vec<Placement>,
}

/// Rule engine front end
///
/// Owns nothing global: the cache is injected, so independent classifiers
/// can share one [`RuleCache`] or keep their own.
pub struct Classifier {
    manager: CgroupManager,
    cache: Arc<RuleCache>,
    resolver: Arc<dyn IdentityResolver>,
    rules_path: PathBuf,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("rules_path", &self.rules_path)
            .field("cache", &self.cache.status())
            .finish_non_exhaustive()
    }
}

impl Classifier {
    /// Create a classifier reading the rules file named by the manager's
    /// configuration
    #[must_use]
    pub fn new(
        manager: CgroupManager,
        cache: Arc<RuleCache>,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Self {
        let rules_path = manager.config().rules_path.clone();
        Self {
            manager,
            cache,
            resolver,
            rules_path,
        }
    }

    /// Read rules from another file
    #[must_use]
    pub fn with_rules_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.rules_path = path.into();
        self
    }

    /// The rules file
    #[must_use]
    pub fn rules_path(&self) -> &Path {
        &self.rules_path
    }

    /// The shared cache
    #[must_use]
    pub const fn cache(&self) -> &Arc<RuleCache> {
        &self.cache
    }

    /// Parse the rules file without touching the cache
    ///
    /// # Errors
    /// `Io`, `ParseFailed` or `NoRules`
    pub fn parse(&self) -> Result<RuleSet> {
        RuleSet::parse_file(&self.rules_path, self.resolver.as_ref())
    }

    /// Parse the rules file into the cache
    ///
    /// # Errors
    /// See [`Classifier::parse`]; the cache is untouched on error
    pub fn load_cache(&self) -> Result<()> {
        let count = self.parse_into_cache()?;
        info!(path = %self.rules_path.display(), rules = count, "Rules loaded");
        Ok(())
    }

    /// Re-parse the rules file and swap the result into the cache
    ///
    /// Classifications running concurrently keep the set they started with.
    ///
    /// # Errors
    /// See [`Classifier::parse`]; the previous rules stay cached on error
    pub fn reload_cache(&self) -> Result<()> {
        let count = self.parse_into_cache()?;
        info!(path = %self.rules_path.display(), rules = count, "Rules reloaded");
        Ok(())
    }

    /// Parse, then swap the result in; returns the number of rules
    fn parse_into_cache(&self) -> Result<usize> {
        let rules = self.parse()?;
        let count = rules.len();
        self.cache.replace(rules);
        Ok(count)
    }

    /// Mark the cached rules stale
    pub fn invalidate_cache(&self) {
        if self.cache.invalidate() {
            debug!("Rule cache invalidated");
        }
    }

    /// Place `pid` according to the first rule matching `(uid, gid)`
    ///
    /// The matching rule and its continuation rules are applied in order.
    /// No match is not an error.
    ///
    /// # Errors
    /// - `NotInitialized` with `USE_CACHE` if the cache is not loaded
    /// - parse errors without `USE_CACHE`
    /// - the errors of [`CgroupManager::change_by_path`]
    pub fn classify(
        &self,
        uid: uid_t,
        gid: gid_t,
        pid: ProcessId,
        flags: ClassifyFlags,
    ) -> Result<Option<Classification>> {
        let rules = if flags.contains(ClassifyFlags::USE_CACHE) {
            self.cache.snapshot()?
        } else {
            Arc::new(self.parse()?)
        };

        let Some(matched) = rules.find(uid, gid) else {
            debug!(uid, gid, pid = pid.as_raw(), "No rule matched");
            return Ok(None);
        };

        let mut placements = Vec::with_capacity(matched.len());
        for rule in matched {
            let destination = rule.render_destination(uid, gid, self.resolver.as_ref());
            let controllers = rule.controllers().resolve(self.manager.table());
            self.manager.change_by_path(&destination, pid, &controllers)?;
            placements.push(Placement {
                destination,
                controllers: controllers.iter().map(|c| (*c).to_string()).collect(),
            });
        }

        let line = matched[0].line();
        info!(uid, gid, pid = pid.as_raw(), line, "Task classified");
        Ok(Some(Classification { line, placements }))
    }

    /// [`Classifier::classify`] re-reading the rules file
    ///
    /// # Errors
    /// See [`Classifier::classify`]
    pub fn classify_default(&self, uid: uid_t, gid: gid_t, pid: ProcessId) -> Result<Option<Classification>> {
        self.classify(uid, gid, pid, ClassifyFlags::empty())
    }

    /// Print the cached rules, one block per rule
    ///
    /// # Errors
    /// `Io` if writing fails
    pub fn print_rules(&self, out: &mut impl Write) -> Result<()> {
        let rules = self.cache.rules();
        writeln!(out, "# {} ({:?})", rules.path().display(), self.cache.status())?;

        for rule in rules.rules() {
            writeln!(out, "Rule: {}", rule.user())?;
            writeln!(out, "  UID: {}", rule.uid())?;
            writeln!(out, "  GID: {}", rule.gid())?;
            writeln!(out, "  DEST: {}", rule.destination())?;
            writeln!(out, "  CONTROLLERS: {}", rule.controllers())?;
            writeln!(out)?;
        }
        Ok(())
    }
}
