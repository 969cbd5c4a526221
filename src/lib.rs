//! Quartz library
//!
//! This file exposes the public API of the Quartz script engine for use
//! as a library.

pub mod config;
pub mod metrics;
pub mod script;

// Re-export commonly used types
pub use config::{ConfigError, StackConfig};
pub use script::{
    FunctionLibrary, FunctionValue, Macro, MemoryStack, OpaqueObject, Result, ScriptError, Signal,
    StackFunction, Value,
};
