//! Macro objects and the statement wrapping hook
//!
//! A macro is an ordered sequence of statements collected by the parser.
//! Once closed it is shared behind an `Arc` and never mutated again,
//! except for its call metrics which are relaxed atomics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::error::Result;
use super::stack::MemoryStack;
use super::value::Value;
use super::StackFunction;

/// A compiled sequence of statements
pub struct Macro {
    /// Statements in execution order
    statements: Vec<Value>,

    /// Errors inside a secure macro do not disclose its body or position
    secure: bool,

    /// Optional name, included in error frames
    name: Option<String>,

    /// Number of completed invocations
    calls: AtomicU64,

    /// Cumulative execution time in nanoseconds
    time_nanos: AtomicU64,
}

impl Macro {
    pub fn new() -> Self {
        Macro {
            statements: Vec::new(),
            secure: false,
            name: None,
            calls: AtomicU64::new(0),
            time_nanos: AtomicU64::new(0),
        }
    }

    /// Append a statement
    pub fn add(&mut self, stmt: Value) {
        self.statements.push(stmt);
    }

    pub fn get(&self, i: usize) -> Option<&Value> {
        self.statements.get(i)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[Value] {
        &self.statements
    }

    pub fn set_secure(&mut self, secure: bool) {
        self.secure = secure;
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Update call metrics after an invocation. Relaxed ordering: the
    /// counters are advisory and carry no happens-before guarantee.
    pub fn record_call(&self, elapsed: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.time_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn time_nanos(&self) -> u64 {
        self.time_nanos.load(Ordering::Relaxed)
    }
}

impl Default for Macro {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Macro(name={:?}, secure={}, {} statements)",
            self.name, self.secure, self.statements.len()
        )
    }
}

// ── Statement wrapping ───────────────────────────────────────────────

/// Hook applied by the parser to every statement it emits. The default
/// is the identity; alternate factories attach position metadata.
pub trait StatementFactory: Send + Sync {
    fn wrap(&self, stmt: Value, line: i64, start: usize, end: usize) -> Value;
}

/// Factory that returns every statement unchanged
pub struct IdentityFactory;

impl StatementFactory for IdentityFactory {
    fn wrap(&self, stmt: Value, _line: i64, _start: usize, _end: usize) -> Value {
        stmt
    }
}

/// Factory that wraps stack functions so the position of the last
/// executed statement is recorded on the stack before each call. The
/// recorded position surfaces in macro error frames.
pub struct TracingFactory;

impl StatementFactory for TracingFactory {
    fn wrap(&self, stmt: Value, line: i64, start: usize, end: usize) -> Value {
        match stmt {
            Value::Function(inner) => Value::Function(Arc::new(TracedFunction {
                inner,
                line,
                start,
                end,
            })),
            other => other,
        }
    }
}

/// A stack function decorated with its source position
struct TracedFunction {
    inner: Arc<dyn StackFunction>,
    line: i64,
    start: usize,
    end: usize,
}

impl StackFunction for TracedFunction {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        stack.set_last_error_position(format!("{}:{}:{}", self.line, self.start, self.end));
        self.inner.apply(stack)
    }
}

/// A macro exposed as a stack function, used for redefined functions
pub struct MacroFunction {
    name: String,
    body: Arc<Macro>,
}

impl MacroFunction {
    pub fn wrap(name: impl Into<String>, body: Arc<Macro>) -> Arc<dyn StackFunction> {
        Arc::new(MacroFunction {
            name: name.into(),
            body,
        })
    }
}

impl StackFunction for MacroFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        stack.exec_macro(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macro_collects_statements_in_order() {
        let mut m = Macro::new();
        m.add(Value::Long(1));
        m.add(Value::Long(2));
        assert_eq!(m.len(), 2);
        assert_eq!(m.get(0), Some(&Value::Long(1)));
        assert_eq!(m.get(1), Some(&Value::Long(2)));
    }

    #[test]
    fn test_record_call_accumulates() {
        let m = Macro::new();
        m.record_call(Duration::from_nanos(100));
        m.record_call(Duration::from_nanos(50));
        assert_eq!(m.calls(), 2);
        assert_eq!(m.time_nanos(), 150);
    }

    #[test]
    fn test_identity_factory_is_identity() {
        let v = IdentityFactory.wrap(Value::Long(7), 1, 0, 1);
        assert_eq!(v, Value::Long(7));
    }
}
