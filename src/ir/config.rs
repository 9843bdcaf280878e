//! Per-unit IR configuration.
//!
//! [`IrOptions`] controls how strictly the graph is checked while it is mutated and how a few
//! traversals behave. The presets mirror the usual build profiles: [`IrOptions::debug`] for
//! compiling with debug information, [`IrOptions::release`] for fast production compiles and
//! [`IrOptions::testing`] for test suites that want every structural mutation verified.

/// Configuration for one [`crate::ir::IrCode`] instance.
///
/// # Examples
///
/// ```rust
/// use irscope::IrOptions;
///
/// let options = IrOptions::testing();
/// assert!(options.verify);
///
/// let release = IrOptions::release();
/// assert!(!release.verify && !release.debug);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrOptions {
    /// Debug-info mode: every instruction must carry a real position and debug locals are tracked
    pub debug: bool,

    /// Run the full consistency check after structural mutations (see
    /// [`crate::ir::IrCode::debug_check`])
    pub verify: bool,

    /// Move all catch-handler entry blocks to the end of the topological block order
    pub place_exceptional_blocks_last: bool,

    /// Whether all throwing instructions of the unit carry a position. Computed per unit and
    /// re-checked by the graph consistency check.
    pub all_throwing_instructions_have_positions: bool,
}

impl Default for IrOptions {
    fn default() -> Self {
        Self {
            debug: false,
            verify: cfg!(debug_assertions),
            place_exceptional_blocks_last: false,
            all_throwing_instructions_have_positions: true,
        }
    }
}

impl IrOptions {
    /// Creates options for compiling with debug information.
    #[must_use]
    pub fn debug() -> Self {
        Self {
            debug: true,
            verify: true,
            ..Self::default()
        }
    }

    /// Creates options for production compiles with verification disabled.
    #[must_use]
    pub fn release() -> Self {
        Self {
            debug: false,
            verify: false,
            ..Self::default()
        }
    }

    /// Creates options for tests: every structural mutation is verified.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            debug: false,
            verify: true,
            ..Self::default()
        }
    }

    /// Returns a copy with exceptional blocks placed last in the topological order.
    #[must_use]
    pub fn with_exceptional_blocks_last(mut self) -> Self {
        self.place_exceptional_blocks_last = true;
        self
    }
}
