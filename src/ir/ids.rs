//! Arena handles for values, instructions and blocks.
//!
//! Handles are plain indices into the arenas of one [`crate::ir::IrCode`]. They are only
//! meaningful for the unit that created them.

use std::fmt;

macro_rules! arena_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) usize);

        impl $name {
            /// Creates a handle from a raw arena index.
            #[must_use]
            pub const fn new(index: usize) -> Self {
                Self(index)
            }

            /// Returns the raw arena index.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0
            }

            pub(crate) const fn offset(self, by: usize) -> Self {
                Self(self.0 + by)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_handle!(
    /// Handle of a [`crate::ir::Value`] (including phis).
    ValueId,
    "v"
);

arena_handle!(
    /// Handle of an [`crate::ir::Instruction`].
    InstrId,
    "i"
);

arena_handle!(
    /// Handle of a [`crate::ir::BasicBlock`].
    BlockId,
    "B"
);
