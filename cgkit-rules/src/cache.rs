//! Shared, atomically replaceable rule cache

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cgkit_core::{Error, Result};

use crate::rule::RuleSet;

/// State of a [`RuleCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Never loaded
    Uninitialized,
    /// Holds the current rules
    Loaded,
    /// Holds rules that were explicitly invalidated
    Stale,
}

#[derive(Debug)]
struct CacheState {
    status: CacheStatus,
    rules: Arc<RuleSet>,
}

/// Rule set shared between classifying threads
///
/// The rule set is swapped as a whole: a reader either sees the set that
/// was current when it took its snapshot or the replacement, never a mix.
#[derive(Debug)]
pub struct RuleCache {
    state: RwLock<CacheState>,
}

impl Default for RuleCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleCache {
    /// Create an uninitialized cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState {
                status: CacheStatus::Uninitialized,
                rules: Arc::new(RuleSet::default()),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state
    #[must_use]
    pub fn status(&self) -> CacheStatus {
        self.read().status
    }

    /// The loaded rule set
    ///
    /// # Errors
    /// `NotInitialized` unless the cache is loaded
    pub fn snapshot(&self) -> Result<Arc<RuleSet>> {
        let state = self.read();
        match state.status {
            CacheStatus::Loaded => Ok(Arc::clone(&state.rules)),
            CacheStatus::Uninitialized | CacheStatus::Stale => Err(Error::NotInitialized {
                what: "rule cache".to_string(),
            }),
        }
    }

    /// Whatever rule set is held, loaded or not
    #[must_use]
    pub fn rules(&self) -> Arc<RuleSet> {
        Arc::clone(&self.read().rules)
    }

    /// Install a new rule set and mark the cache loaded
    pub fn replace(&self, rules: RuleSet) {
        let rules = Arc::new(rules);
        let mut state = self.write();
        state.rules = rules;
        state.status = CacheStatus::Loaded;
    }

    /// Mark a loaded cache stale; returns whether it was loaded
    pub fn invalidate(&self) -> bool {
        let mut state = self.write();
        if state.status == CacheStatus::Loaded {
            state.status = CacheStatus::Stale;
            true
        } else {
            false
        }
    }
}
