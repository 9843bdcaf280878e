//! Catch-handler tables.
//!
//! A [`CatchHandlers`] table maps guards (exception classes, or the catch-all) to targets. Blocks
//! store their table with successor *indices* as targets; [`crate::ir::IrCode::catch_handlers`]
//! resolves them to blocks. Guards are unique and a catch-all, if present, is last.

use std::fmt;

/// The guard of one catch handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CatchGuard {
    /// Catches instances of the named class
    Class(String),
    /// Catches everything
    CatchAll,
}

impl CatchGuard {
    /// Creates a class guard.
    #[must_use]
    pub fn class(name: impl Into<String>) -> Self {
        CatchGuard::Class(name.into())
    }

    /// Returns `true` for [`CatchGuard::CatchAll`].
    #[must_use]
    pub fn is_catch_all(&self) -> bool {
        matches!(self, CatchGuard::CatchAll)
    }
}

impl fmt::Display for CatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatchGuard::Class(name) => f.write_str(name),
            CatchGuard::CatchAll => f.write_str("*"),
        }
    }
}

/// An ordered guard-to-target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchHandlers<T> {
    guards: Vec<CatchGuard>,
    targets: Vec<T>,
}

impl<T> Default for CatchHandlers<T> {
    fn default() -> Self {
        Self {
            guards: Vec::new(),
            targets: Vec::new(),
        }
    }
}

impl<T: Copy + PartialEq> CatchHandlers<T> {
    /// Creates a table from parallel guard and target lists.
    ///
    /// # Panics
    ///
    /// Panics if the lists differ in length.
    #[must_use]
    pub fn new(guards: Vec<CatchGuard>, targets: Vec<T>) -> Self {
        assert_eq!(guards.len(), targets.len(), "guards and targets must be parallel");
        Self { guards, targets }
    }

    /// Returns `true` if the table has no handlers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Returns the number of handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Returns the guards in order.
    #[must_use]
    pub fn guards(&self) -> &[CatchGuard] {
        &self.guards
    }

    /// Returns the targets in order; a target may appear more than once.
    #[must_use]
    pub fn all_targets(&self) -> &[T] {
        &self.targets
    }

    /// Returns each distinct target once, in first-occurrence order.
    #[must_use]
    pub fn unique_targets(&self) -> Vec<T> {
        let mut result = Vec::with_capacity(self.targets.len());
        for &target in &self.targets {
            if !result.contains(&target) {
                result.push(target);
            }
        }
        result
    }

    /// Returns `true` if the last guard is the catch-all.
    #[must_use]
    pub fn has_catch_all(&self) -> bool {
        self.guards.last().is_some_and(CatchGuard::is_catch_all)
    }

    /// Returns `true` if the table contains `guard`.
    #[must_use]
    pub fn contains_guard(&self, guard: &CatchGuard) -> bool {
        self.guards.contains(guard)
    }

    /// Iterates over `(guard, target)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&CatchGuard, T)> + '_ {
        self.guards.iter().zip(self.targets.iter().copied())
    }

    /// Maps every target through `f`.
    pub fn map<U: Copy + PartialEq>(&self, f: impl FnMut(T) -> U) -> CatchHandlers<U> {
        CatchHandlers {
            guards: self.guards.clone(),
            targets: self.targets.iter().copied().map(f).collect(),
        }
    }

    pub(crate) fn targets_mut(&mut self) -> &mut Vec<T> {
        &mut self.targets
    }

    pub(crate) fn into_parts(self) -> (Vec<CatchGuard>, Vec<T>) {
        (self.guards, self.targets)
    }
}
