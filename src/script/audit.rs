//! Audit statements
//!
//! In audit mode the parser demotes certain errors into statements that
//! are appended to the macro under construction and mirrored into the
//! parsing-errors attribute, instead of aborting the parse. An audit
//! statement is itself a stack function so an audited macro stays
//! executable: benign entries replay their effect, error entries raise
//! when reached.

use std::fmt;
use std::sync::Arc;

use super::error::{Result, ScriptError};
use super::stack::MemoryStack;
use super::value::Value;
use super::StackFunction;

/// What an audit statement stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    /// A resolved function call
    FunctionCall,

    /// A deferred variable load (`$name`)
    Load,

    /// A macro invocation (`@name`)
    Run,

    /// An immediate variable dereference (`!$name`)
    EarlyBinding,

    /// A statement that resolved to no known function
    Unknown,

    /// A parse error demoted to a statement
    Exception,

    /// A non-fatal parser warning, recorded in the error list only
    Warning,
}

/// A statement recorded by the parser in audit mode
pub struct AuditStatement {
    pub kind: AuditKind,

    /// Resolved payload for [`AuditKind::FunctionCall`]
    pub payload: Option<Value>,

    /// Statement text, symbol name or error message depending on kind
    pub text: String,

    /// 1-based source line, -1 when unknown
    pub line: i64,

    /// Column of the offending token
    pub start: usize,

    /// Column after the offending token, when known
    pub end: Option<usize>,
}

impl AuditStatement {
    pub fn new(
        kind: AuditKind,
        payload: Option<Value>,
        text: impl Into<String>,
        line: i64,
        start: usize,
        end: Option<usize>,
    ) -> Arc<Self> {
        Arc::new(AuditStatement {
            kind,
            payload,
            text: text.into(),
            line,
            start,
            end,
        })
    }

    fn position(&self) -> String {
        match self.end {
            Some(end) => format!("line {}, columns {}-{}", self.line, self.start, end),
            None => format!("line {}, column {}", self.line, self.start),
        }
    }
}

impl StackFunction for AuditStatement {
    fn name(&self) -> &str {
        &self.text
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        match self.kind {
            AuditKind::FunctionCall => match &self.payload {
                Some(Value::Function(f)) => f.clone().apply(stack),
                Some(other) => stack.push(other.clone()),
                None => Ok(()),
            },
            AuditKind::Load => {
                let value = stack
                    .load(&self.text)
                    .ok_or_else(|| ScriptError::UnknownSymbol(self.text.clone()))?;
                stack.push(value)
            }
            AuditKind::Run => stack.run(&self.text),
            AuditKind::EarlyBinding => Err(ScriptError::Parse(format!(
                "Early binding '{}' cannot be replayed ({})",
                self.text,
                self.position()
            ))),
            AuditKind::Unknown => Err(ScriptError::UnknownFunction(self.text.clone())),
            AuditKind::Exception => Err(ScriptError::Parse(format!(
                "{} ({})",
                self.text,
                self.position()
            ))),
            AuditKind::Warning => Ok(()),
        }
    }
}

impl fmt::Display for AuditStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {:?}: {}", self.position(), self.kind, self.text)
    }
}
