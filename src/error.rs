use miette::Diagnostic;
use thiserror::Error;

/// Result type for decompiler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories surfaced by the structuring pipeline.
///
/// Fatal kinds abort the current method; recoverable kinds are attached to the
/// method output as diagnostics while a fallback construct is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidControlFlow,
    AmbiguousSwitchShape,
    UnresolvedGoto,
    UnreachableBlock,
    MetadataResolution,
    Decode,
    Config,
    Io,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether this kind aborts the method being decompiled
    pub fn is_fatal(self) -> bool {
        !matches!(
            self,
            ErrorKind::AmbiguousSwitchShape | ErrorKind::UnresolvedGoto | ErrorKind::UnreachableBlock
        )
    }
}

/// Custom error types for the CIL decompiler
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum Error {
    #[error("I/O error: {0}")]
    #[diagnostic(code(cil_dec::io_error))]
    Io(String),

    #[error("Invalid control flow at IL_{offset:04x}: {message}")]
    #[diagnostic(
        code(cil_dec::invalid_control_flow),
        help("the method body branches outside itself or into the middle of an instruction")
    )]
    InvalidControlFlow { offset: u32, message: String },

    #[error("Dispatch at IL_{offset:04x} is not a switch: {message}")]
    #[diagnostic(code(cil_dec::ambiguous_switch_shape))]
    AmbiguousSwitchShape { offset: u32, message: String },

    #[error("Jump to IL_{target:04x} could not be expressed as goto case")]
    #[diagnostic(code(cil_dec::unresolved_goto))]
    UnresolvedGoto { target: u32 },

    #[error("Block at IL_{offset:04x} is not reachable from any structured construct")]
    #[diagnostic(code(cil_dec::unreachable_block))]
    UnreachableBlock { offset: u32 },

    #[error("Metadata token 0x{token:08x} could not be resolved")]
    #[diagnostic(code(cil_dec::metadata_resolution))]
    MetadataResolution { token: u32 },

    #[error("Method body for method {method} is not available")]
    #[diagnostic(code(cil_dec::missing_method_body))]
    MissingMethodBody { method: u32 },

    #[error("Unknown opcode: 0x{opcode:02x} at IL_{offset:04x}")]
    #[diagnostic(code(cil_dec::unknown_opcode))]
    UnknownOpcode { opcode: u16, offset: u32 },

    #[error("Decode error at IL_{offset:04x}: {message}")]
    #[diagnostic(code(cil_dec::decode_error))]
    Decode { offset: u32, message: String },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(cil_dec::config_error))]
    Config { message: String },

    #[error("Decompilation cancelled")]
    #[diagnostic(code(cil_dec::cancelled))]
    Cancelled,

    #[error("Internal error: {message}")]
    #[diagnostic(code(cil_dec::internal_error))]
    Internal { message: String },
}

impl Error {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid control flow error
    pub fn invalid_flow(offset: u32, message: impl Into<String>) -> Self {
        Error::InvalidControlFlow {
            offset,
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(offset: u32, message: impl Into<String>) -> Self {
        Error::Decode {
            offset,
            message: message.into(),
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::InvalidControlFlow { .. } => ErrorKind::InvalidControlFlow,
            Error::AmbiguousSwitchShape { .. } => ErrorKind::AmbiguousSwitchShape,
            Error::UnresolvedGoto { .. } => ErrorKind::UnresolvedGoto,
            Error::UnreachableBlock { .. } => ErrorKind::UnreachableBlock,
            Error::MetadataResolution { .. } | Error::MissingMethodBody { .. } => {
                ErrorKind::MetadataResolution
            }
            Error::UnknownOpcode { .. } | Error::Decode { .. } => ErrorKind::Decode,
            Error::Config { .. } => ErrorKind::Config,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Internal { .. } => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Self {
        Error::Decode {
            offset: 0,
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_kinds_are_not_fatal() {
        assert!(!ErrorKind::UnresolvedGoto.is_fatal());
        assert!(!ErrorKind::UnreachableBlock.is_fatal());
        assert!(!ErrorKind::AmbiguousSwitchShape.is_fatal());
        assert!(ErrorKind::InvalidControlFlow.is_fatal());
        assert!(ErrorKind::MetadataResolution.is_fatal());
    }

    #[test]
    fn error_messages_use_il_offsets() {
        let err = Error::invalid_flow(0x1a, "branch target outside method body");
        assert_eq!(
            err.to_string(),
            "Invalid control flow at IL_001a: branch target outside method body"
        );
        assert_eq!(err.kind(), ErrorKind::InvalidControlFlow);
    }
}
