//! Source positions attached to instructions.
//!
//! A [`Position`] names a source line within a method and, for inlined code, the position of the
//! call site it was inlined into. Chains of callers are followed iteratively, so deeply nested
//! inlining does not recurse.

use std::fmt;

/// A source position, optionally nested inside the position of an inlining call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    /// Source line, `-1` for no position
    pub line: i32,
    /// Method the line belongs to
    pub method: Option<String>,
    /// Position of the call site this position was inlined into
    pub caller: Option<Box<Position>>,
    synthetic: bool,
}

impl Position {
    /// Creates a position for `line` in `method`.
    #[must_use]
    pub fn new(line: i32, method: impl Into<String>) -> Self {
        Self {
            line,
            method: Some(method.into()),
            caller: None,
            synthetic: false,
        }
    }

    /// The absent position.
    #[must_use]
    pub fn none() -> Self {
        Self {
            line: -1,
            method: None,
            caller: None,
            synthetic: false,
        }
    }

    /// An absent position deliberately given to compiler-synthesized instructions.
    ///
    /// Unlike [`Position::none`] it satisfies the position requirement of debug-info mode.
    #[must_use]
    pub fn synthetic_none() -> Self {
        Self {
            synthetic: true,
            ..Self::none()
        }
    }

    /// Returns `true` if this names an actual source line.
    #[must_use]
    pub fn is_some(&self) -> bool {
        self.line >= 0
    }

    /// Returns `true` for [`Position::none`] (but not [`Position::synthetic_none`]).
    #[must_use]
    pub fn is_none(&self) -> bool {
        !self.is_some() && !self.synthetic
    }

    /// Returns `true` for [`Position::synthetic_none`].
    #[must_use]
    pub fn is_synthetic_none(&self) -> bool {
        !self.is_some() && self.synthetic
    }

    /// Sets `caller` as the outermost caller of this position.
    ///
    /// The returned position keeps this position's inline chain and appends `caller` (and its own
    /// chain) at the end.
    #[must_use]
    pub fn with_outermost_caller(&self, caller: &Position) -> Position {
        let mut chain = Vec::new();
        let mut current = Some(self);
        while let Some(position) = current {
            chain.push(position);
            current = position.caller.as_deref();
        }

        let mut result = caller.clone();
        for position in chain.into_iter().rev() {
            result = Position {
                line: position.line,
                method: position.method.clone(),
                caller: Some(Box::new(result)),
                synthetic: position.synthetic,
            };
        }
        result
    }

    /// Returns the number of inlining levels above this position.
    #[must_use]
    pub fn inline_depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.caller.as_deref();
        while let Some(position) = current {
            depth += 1;
            current = position.caller.as_deref();
        }
        depth
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_some() {
            return f.write_str(if self.synthetic { "--" } else { "-" });
        }
        if let Some(method) = &self.method {
            write!(f, "{}:", method)?;
        }
        write!(f, "{}", self.line)?;
        if let Some(caller) = &self.caller {
            write!(f, " <- {}", caller)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_and_synthetic() {
        assert!(Position::none().is_none());
        assert!(!Position::none().is_some());
        assert!(Position::synthetic_none().is_synthetic_none());
        assert!(!Position::synthetic_none().is_none());
        assert!(Position::new(3, "m").is_some());
    }

    #[test]
    fn test_with_outermost_caller() {
        let call_site = Position::new(10, "outer");
        let inner = Position::new(2, "inner").with_outermost_caller(&Position::new(5, "middle"));

        let nested = inner.with_outermost_caller(&call_site);
        assert_eq!(nested.line, 2);
        assert_eq!(nested.inline_depth(), 2);
        let middle = nested.caller.as_deref().unwrap();
        assert_eq!(middle.method.as_deref(), Some("middle"));
        assert_eq!(middle.caller.as_deref(), Some(&call_site));
    }

    #[test]
    fn test_display() {
        let position = Position::new(2, "inner").with_outermost_caller(&Position::new(10, "outer"));
        assert_eq!(position.to_string(), "inner:2 <- outer:10");
        assert_eq!(Position::none().to_string(), "-");
    }
}
