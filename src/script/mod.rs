//! QuartzScript execution engine
//!
//! QuartzScript is the stack-oriented, postfix scripting language of the
//! Quartz time-series analytics platform. This module hosts its execution
//! engine: the streaming parser, the value stack machine, macro
//! definition and invocation, and the resource governance layer
//! (operation, recursion, depth and symbol budgets, cooperative STOP/KILL
//! signals, audit tracing).

pub mod audit;
pub mod error;
pub mod functions;
pub mod library;
pub mod macros;
pub mod parser;
pub mod registry;
pub mod repository;
pub mod stack;
pub mod value;

pub use self::error::{Result, ScriptError};
pub use self::library::{FunctionLibrary, FunctionValue};
pub use self::macros::{IdentityFactory, Macro, StatementFactory, TracingFactory};
pub use self::stack::{MemoryStack, Signal, StackContext};
pub use self::value::{OpaqueObject, Value};

use std::any::Any;

// ── Source syntax constants ──────────────────────────────────────────

/// Opens a macro definition
pub const MACRO_START: &str = "<%";

/// Closes a macro definition
pub const MACRO_END: &str = "%>";

/// Opens a multiline string, alone on its line
pub const MULTILINE_START: &str = "<'";

/// Closes a multiline string, alone on its line
pub const MULTILINE_END: &str = "'>";

/// Opens a secure script block
pub const SECURE_SCRIPT_START: &str = "<S";

/// Closes a secure script block
pub const SECURE_SCRIPT_END: &str = "S>";

/// Opens a block comment
pub const COMMENT_START: &str = "/*";

/// Closes a block comment
pub const COMMENT_END: &str = "*/";

/// Section name before any SECTION statement ran
pub const TOP_LEVEL_SECTION: &str = "[TOP]";

// ── Attribute keys ───────────────────────────────────────────────────
//
// Writes to the `stack.*` limit keys are intercepted and mirrored to
// fast-access fields on the stack, see `MemoryStack::set_attribute`.

pub const ATTR_MAX_DEPTH: &str = "stack.maxdepth";
pub const ATTR_MAX_OPS: &str = "stack.maxops";
pub const ATTR_MAX_SYMBOLS: &str = "stack.maxsymbols";
pub const ATTR_MAX_RECURSION: &str = "stack.maxrecurse";
pub const ATTR_OPS: &str = "stack.ops";
pub const ATTR_SECTION_NAME: &str = "stack.section";
pub const ATTR_MACRO_NAME: &str = "stack.macro.name";
pub const ATTR_IN_SECURE_MACRO: &str = "stack.secure";
pub const ATTR_NAME: &str = "stack.name";
pub const ATTR_CREATION_TIME: &str = "stack.creation.time";
pub const ATTR_ALLOW_REDEFINED: &str = "stack.redefined.allow";
pub const ATTR_STATEMENT_FACTORY: &str = "stack.statement.factory";
pub const ATTR_PARSING_ERRORS: &str = "parser.errors";
pub const ATTR_LAST_ERROR_POS: &str = "stack.last.errorpos";
pub const ATTR_IMPORT_RULES: &str = "macro.import.rules";
pub const ATTR_PROGRESS: &str = "stack.progress";
pub const ATTR_CAPABILITIES: &str = "stack.capabilities";

// Limits consumed by individual functions; the engine initializes and
// exposes them but does not enforce them itself.
pub const ATTR_FETCH_LIMIT: &str = "limit.fetch";
pub const ATTR_GTS_LIMIT: &str = "limit.gts";
pub const ATTR_LOOP_MAXDURATION: &str = "limit.loop.duration";
pub const ATTR_MAX_BUCKETS: &str = "limit.buckets";
pub const ATTR_MAX_PIXELS: &str = "limit.pixels";
pub const ATTR_MAX_GEOCELLS: &str = "limit.geocells";
pub const ATTR_JSON_MAXSIZE: &str = "limit.json";
pub const ATTR_FETCH_COUNT: &str = "count.fetch";
pub const ATTR_GTS_COUNT: &str = "count.gts";

/// Counter index for the macro return depth
pub const COUNTER_RETURN_DEPTH: usize = 0;

/// Capability gating the stack registry report
pub const CAPABILITY_STACKPS: &str = "stackps";

// ── Collaborator traits ──────────────────────────────────────────────

/// A function applied against the stack. Functions are shared, immutable
/// and reentrant; all state lives on the stack.
pub trait StackFunction: Send + Sync {
    /// Declared name, used in error messages and telemetry
    fn name(&self) -> &str;

    /// Apply the function to the stack
    fn apply(&self, stack: &mut MemoryStack) -> Result<()>;
}

/// Handle on the time-series store, threaded through the stack for the
/// functions that need it. The engine never calls into it.
pub trait StoreClient: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Handle on the directory service, threaded through like [`StoreClient`].
pub trait DirectoryClient: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Sink notified between statements and per parsed line so external
/// schedulers can observe progress of long executions.
pub trait ProgressSink: Send + Sync {
    fn progress(&self);
}
