//! Error types for the global hoisting transformation

use thiserror::Error;

/// Errors raised by the IR host layer, the verifier, the pass framework and
/// the hoisting pipeline itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Transformation failures
    /// A relocated item is still referenced after rewriting
    ///
    /// **Triggered by:** a use site the rewriter does not know how to retarget
    /// **Severity:** always fatal; the unit is left untouched
    #[error("Internal consistency error: `{item}` still has {remaining_uses} reference(s) after rewriting")]
    InternalConsistency {
        /// Name of the item that could not be deleted
        item: String,
        /// Number of references left behind
        remaining_uses: usize,
    },

    /// The rewritten unit failed structural verification
    #[error("Verification failed: {}", .errors.join("; "))]
    VerificationFailed {
        /// Rendered verifier findings
        errors: Vec<String>,
    },

    /// The data layout facility could not size a type
    ///
    /// **Triggered by:** an opaque or recursive struct, a function or void type
    /// inside a hoisted global, or a unit without a data layout
    #[error("Layout query failed for type {ty}: {reason}")]
    LayoutQueryFailure {
        /// Rendered type that could not be sized
        ty: String,
        /// Why the query failed
        reason: String,
    },

    /// A symbol reserved for the hoisting ABI already exists in the unit
    #[error("Reserved symbol already defined: {name}")]
    ReservedSymbol {
        /// The conflicting symbol
        name: String,
    },

    // Host representation errors
    /// Two top-level items share a name
    #[error("Duplicate symbol: {name}")]
    DuplicateSymbol {
        /// The duplicated name
        name: String,
    },

    /// A named struct type was defined twice
    #[error("Duplicate type: %{name}")]
    DuplicateType {
        /// The duplicated type name
        name: String,
    },

    /// Malformed data layout description
    #[error("Invalid data layout '{text}': {reason}")]
    InvalidDataLayout {
        /// The offending layout string or component
        text: String,
        /// Parse failure description
        reason: String,
    },

    // Pass framework errors
    /// No pass is registered under the requested name
    #[error("Unknown pass: {name}")]
    UnknownPass {
        /// Requested pass name
        name: String,
    },

    /// The pass was given a parameter it does not recognise
    #[error("Pass {pass} does not accept option '{option}'")]
    UnrecognizedPassOption {
        /// Pass name
        pass: String,
        /// The rejected option
        option: String,
    },

    /// A pass with this name is already registered
    #[error("Pass already registered: {name}")]
    DuplicatePass {
        /// Pass name
        name: String,
    },

    /// Malformed pipeline description
    #[error("Pipeline parse error: {0}")]
    PipelineParse(String),

    /// ABI manifest (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The compilation step must stop
    Fatal,
    /// A configuration problem the driver can report and correct
    Configuration,
}

impl Error {
    /// Create a layout failure for the given type
    pub fn layout(ty: impl ToString, reason: impl Into<String>) -> Self {
        Error::LayoutQueryFailure {
            ty: ty.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a data layout parse error
    pub fn data_layout(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidDataLayout {
            text: text.into(),
            reason: reason.into(),
        }
    }

    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self {
            Error::UnknownPass { .. }
            | Error::UnrecognizedPassOption { .. }
            | Error::DuplicatePass { .. }
            | Error::PipelineParse(_)
            | Error::InvalidDataLayout { .. } => ErrorSeverity::Configuration,

            _ => ErrorSeverity::Fatal,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type for hoisting operations
pub type Result<T> = std::result::Result<T, Error>;
