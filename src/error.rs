use std::path::PathBuf;

use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! hook_error {
    ($policy:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        crate::Error::HookPolicy {
            policy: $policy.to_string(),
            message: format!($fmt $(, $arg)*),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure is fatal for the run that produced it: the dispatcher never skips a broken
/// unit, since inconsistent partial output would defeat incremental-build correctness.
///
/// # Error Categories
///
/// ## Class file parsing
/// - [`Error::Malformed`] - Corrupted or invalid class file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of a buffer
/// - [`Error::InvalidOpcode`] - Unknown or reserved opcode in a `Code` attribute
/// - [`Error::NotSupported`] - Valid input that this library cannot process
///
/// ## Code generation
/// - [`Error::UndefinedLabel`] - A label was referenced but never placed
/// - [`Error::DuplicateLabel`] - A label was placed twice
/// - [`Error::InvalidBranch`] - A branch offset does not fit its encoding
/// - [`Error::HookPolicy`] - A hook policy emitted invalid instrumentation
///
/// ## Output
/// - [`Error::InvalidDestination`] - The destination resolver produced an unusable location
/// - [`Error::DestinationConflict`] - Two units resolved to the same destination
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::Archive`] - Jar/zip container errors
///
/// ## Context
/// - [`Error::Unit`] - Wraps any error with the code unit it occurred in
/// - [`Error::Method`] - Wraps any error with the method it occurred in
///
/// # Examples
///
/// ```rust,no_run
/// use classweave::{ClassFile, Error};
///
/// match ClassFile::parse(&std::fs::read("Foo.class")?) {
///     Ok(class) => println!("{}", class.name()?),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed class: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok::<(), classweave::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The class file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected
    /// for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The code attribute contains an opcode that is reserved or unknown.
    #[error("Invalid opcode 0x{0:02X}")]
    InvalidOpcode(u8),

    /// The input is valid but uses a feature this library does not handle.
    #[error("Not supported - {0}")]
    NotSupported(String),

    /// A branch or table entry references a label that was never placed in the body.
    #[error("Undefined label L{0}")]
    UndefinedLabel(u32),

    /// A label was placed more than once in the same body.
    #[error("Duplicate label L{0}")]
    DuplicateLabel(u32),

    /// A branch offset does not fit the encoding of its instruction.
    #[error("Invalid branch - {0}")]
    InvalidBranch(String),

    /// A hook policy emitted instrumentation that would corrupt the method.
    ///
    /// This is raised at rewrite time and indicates a broken instrumentation chain,
    /// not a runtime condition of the instrumented program.
    #[error("Hook policy '{policy}' failed: {message}")]
    HookPolicy {
        /// Name of the policy that failed
        policy: String,
        /// What the policy did wrong
        message: String,
    },

    /// The destination resolver returned an unusable location.
    #[error("Invalid destination - {0}")]
    InvalidDestination(String),

    /// Two units of the same run resolved to the same destination path.
    #[error("Destination claimed twice in one run - {}", .0.display())]
    DestinationConflict(PathBuf),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the zip crate while reading or writing a jar.
    #[error("{0}")]
    Archive(#[from] zip::result::ZipError),

    /// An error raised while processing one code unit.
    #[error("{unit}: {source}")]
    Unit {
        /// Identity of the unit (entry name or file path)
        unit: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// An error raised while rewriting one method.
    #[error("{class}.{method}: {source}")]
    Method {
        /// Internal name of the declaring class
        class: String,
        /// Method name and descriptor
        method: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Attaches the identity of the code unit in which `self` occurred.
    ///
    /// Errors that already carry a unit are returned unchanged.
    #[must_use]
    pub fn in_unit(self, unit: impl Into<String>) -> Error {
        match self {
            Error::Unit { .. } => self,
            other => Error::Unit {
                unit: unit.into(),
                source: Box::new(other),
            },
        }
    }
}
