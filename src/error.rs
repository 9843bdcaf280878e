use thiserror::Error;

use crate::ir::BlockId;

macro_rules! graph_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::InvalidGraph {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidGraph {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Bails out of the surrounding function with [`Error::InvalidGraph`] unless the condition holds.
macro_rules! ensure_graph {
    ($cond:expr, $($arg:tt)*) => {
        if !($cond) {
            return Err(graph_error!($($arg)*));
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two groups. Compilation errors describe malformed input to a single compiled
/// unit; the unit is abandoned while sibling units are unaffected. Consistency errors are produced
/// by the graph checks on [`crate::ir::IrCode`] and point at the check that failed.
///
/// Violations of graph invariants at a mutation site (removing an instruction whose value is still
/// used, linking the same edge twice, exhausting the marking-color pool) are not represented here:
/// they are bugs in the calling pass and panic.
///
/// # Error Categories
///
/// ## Compilation Errors
/// - [`Error::UndefinedValue`] - A value is read on a path where no definition reaches it
/// - [`Error::InvalidBlockStructure`] - Exceptional control flow has an impossible shape
///
/// ## Consistency Errors
/// - [`Error::InvalidGraph`] - A global consistency check failed
///
/// # Examples
///
/// ```rust
/// use irscope::{ir::IrCode, Error, IrOptions};
///
/// let code = IrCode::new(IrOptions::default());
/// match code.is_consistent_ssa() {
///     Ok(()) => println!("graph is consistent"),
///     Err(Error::InvalidGraph { message, file, line }) => {
///         eprintln!("inconsistent graph: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An SSA value was read before any definition reaches it along all paths.
    ///
    /// Raised when a phi has to be completed in a block without predecessors, when a phi receives
    /// an empty operand list, or when a phi collapses and every operand is the phi itself. This is
    /// typically caused by input bytecode that uses a register which is not defined on all
    /// control-flow paths leading to the use.
    #[error(
        "Undefined value encountered during compilation (phi {phi} in {block}). This is typically \
         caused by input that uses a register that is not defined on all control-flow paths \
         leading to the use."
    )]
    UndefinedValue {
        /// The number of the phi that could not be given a defining value
        phi: usize,
        /// The block owning the phi
        block: BlockId,
    },

    /// The exceptional control flow of the unit has an impossible shape.
    ///
    /// Raised for instance when a catch handler is reachable through a non-exceptional edge.
    #[error("Invalid block structure: {0}")]
    InvalidBlockStructure(String),

    /// A global consistency check of the graph failed.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violated property
    /// * `file` - Source file of the failing check
    /// * `line` - Source line of the failing check
    #[error("Inconsistent IR - {file}:{line}: {message}")]
    InvalidGraph {
        /// The message to be printed for the InvalidGraph error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
