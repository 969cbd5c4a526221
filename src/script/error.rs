//! Error types for the QuartzScript engine

use std::fmt;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Errors that can occur while parsing or executing QuartzScript
#[derive(Debug, Clone)]
pub enum ScriptError {
    /// Syntax or lexical error during parsing
    Parse(String),

    /// Runtime error during execution
    Runtime(String),

    /// Operand type mismatch
    Type(String),

    /// Reference to a symbol absent from the symbol table
    UnknownSymbol(String),

    /// Reference to a function absent from the redefinition table and the library
    UnknownFunction(String),

    /// Reference to a macro no repository could resolve
    UnknownMacro(String),

    /// A symbol resolved to something that is not a macro
    NotAMacro(String),

    /// Redefined functions are disabled on this stack
    DisallowedRedefined(String),

    /// Operation budget exhausted
    OpCountExceeded { current: u64, max: u64 },

    /// Recursion budget exhausted
    RecursionExceeded(u64),

    /// Stack depth budget exhausted
    DepthExceeded(usize),

    /// Symbol table is full
    SymbolsExceeded(usize),

    /// Register index outside the register file
    RegisterOutOfRange { index: i64, max: usize },

    /// Operation on an empty stack
    EmptyStack,

    /// Stack level outside the visible window
    InvalidLevel,

    /// A required capability is not granted on this stack
    Capability(String),

    /// An error wrapped with source context (position window, section, macro name)
    Framed {
        message: String,
        cause: Box<ScriptError>,
    },

    /// Control flow: unwind one macro frame
    Return,

    /// Control flow: execution received a STOP signal
    Stop,

    /// Control flow: execution received a KILL signal, the signal sticks
    Kill,
}

impl ScriptError {
    /// True for the control-flow variants that must never be wrapped
    /// with source context.
    pub fn is_control(&self) -> bool {
        matches!(self, ScriptError::Return | ScriptError::Stop | ScriptError::Kill)
    }

    /// True for the asynchronous control signals (STOP/KILL) which
    /// propagate through every frame, including `Return` handlers.
    pub fn is_async_control(&self) -> bool {
        matches!(self, ScriptError::Stop | ScriptError::Kill)
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Parse(msg) => write!(f, "{}", msg),
            ScriptError::Runtime(msg) => write!(f, "{}", msg),
            ScriptError::Type(msg) => write!(f, "{}", msg),
            ScriptError::UnknownSymbol(name) => write!(f, "Unknown symbol '{}'", name),
            ScriptError::UnknownFunction(name) => write!(f, "Unknown function '{}'", name),
            ScriptError::UnknownMacro(name) => write!(f, "Unknown macro '{}'", name),
            ScriptError::NotAMacro(name) => write!(f, "'{}' is not a macro.", name),
            ScriptError::DisallowedRedefined(name) => {
                write!(f, "Disallowed redefined function '{}'.", name)
            }
            ScriptError::OpCountExceeded { current, max } => write!(
                f,
                "Operation count ({}) exceeded maximum of {}. Consider raising the limit.",
                current, max
            ),
            ScriptError::RecursionExceeded(level) => {
                write!(f, "Maximum recursion level reached ({})", level)
            }
            ScriptError::DepthExceeded(max) => {
                write!(f, "Stack depth would exceed set limit of {}. Consider raising the limit.", max)
            }
            ScriptError::SymbolsExceeded(max) => write!(
                f,
                "Symbol table has reached its maximum number of entries: {}",
                max
            ),
            ScriptError::RegisterOutOfRange { index, max } => write!(
                f,
                "Invalid register number {}, must be between 0 and {}",
                index,
                max.saturating_sub(1)
            ),
            ScriptError::EmptyStack => write!(f, "Empty stack."),
            ScriptError::InvalidLevel => write!(f, "Invalid level."),
            ScriptError::Capability(name) => write!(f, "Missing capability '{}'.", name),
            ScriptError::Framed { message, cause } => write!(f, "{} ({})", message, cause),
            ScriptError::Return => write!(f, "RETURN invoked outside of a macro."),
            ScriptError::Stop => write!(f, "Execution received STOP signal."),
            ScriptError::Kill => write!(f, "Execution received KILL signal."),
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScriptError::Framed { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_classification() {
        assert!(ScriptError::Return.is_control());
        assert!(ScriptError::Stop.is_control());
        assert!(ScriptError::Kill.is_control());
        assert!(!ScriptError::EmptyStack.is_control());

        assert!(!ScriptError::Return.is_async_control());
        assert!(ScriptError::Stop.is_async_control());
        assert!(ScriptError::Kill.is_async_control());
    }

    #[test]
    fn test_framed_display_chains_cause() {
        let err = ScriptError::Framed {
            message: "Exception at '=>FOO<=' in section [TOP]".to_string(),
            cause: Box::new(ScriptError::UnknownFunction("FOO".to_string())),
        };
        let text = err.to_string();
        assert!(text.contains("=>FOO<="));
        assert!(text.contains("Unknown function 'FOO'"));
    }
}
