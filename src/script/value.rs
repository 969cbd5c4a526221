//! Value model for the QuartzScript stack
//!
//! Every element pushed on a stack is a `Value`. Integers and doubles are
//! distinct tags, there is no silent widening between them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::error::{Result, ScriptError};
use super::macros::Macro;
use super::StackFunction;

/// An opaque domain object threaded through the stack (aggregator,
/// context snapshot, ...). The engine only knows how to display and
/// downcast it.
pub trait OpaqueObject: Send + Sync {
    /// Short label used when rendering the value
    fn type_label(&self) -> &'static str;

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;
}

/// A value on the stack
#[derive(Clone)]
pub enum Value {
    /// 64-bit signed integer
    Long(i64),

    /// IEEE-754 double
    Double(f64),

    /// Boolean
    Boolean(bool),

    /// UTF-8 string
    String(String),

    /// Reference to a closed macro
    Macro(Arc<Macro>),

    /// Reference to a stack function
    Function(Arc<dyn StackFunction>),

    /// Opaque domain object
    Object(Arc<dyn OpaqueObject>),

    /// Absent value
    Null,
}

impl Value {
    /// Type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Long(_) => "LONG",
            Value::Double(_) => "DOUBLE",
            Value::Boolean(_) => "BOOLEAN",
            Value::String(_) => "STRING",
            Value::Macro(_) => "MACRO",
            Value::Function(_) => "FUNCTION",
            Value::Object(_) => "OBJECT",
            Value::Null => "NULL",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for LONG and DOUBLE
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    pub fn as_long(&self) -> Result<i64> {
        match self {
            Value::Long(n) => Ok(*n),
            _ => Err(ScriptError::Type(format!(
                "expected a LONG, got {}",
                self.type_name()
            ))),
        }
    }

    /// Numeric coercion used for counts read off the stack: LONG as is,
    /// DOUBLE truncated.
    pub fn as_count(&self) -> Result<i64> {
        match self {
            Value::Long(n) => Ok(*n),
            Value::Double(d) => Ok(*d as i64),
            _ => Err(ScriptError::Type(
                "Unexpected type, expecting a numerical value.".to_string(),
            )),
        }
    }

    pub fn as_double(&self) -> Result<f64> {
        match self {
            Value::Long(n) => Ok(*n as f64),
            Value::Double(d) => Ok(*d),
            _ => Err(ScriptError::Type(format!(
                "expected a numeric value, got {}",
                self.type_name()
            ))),
        }
    }

    pub fn as_string(&self) -> Result<&str> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(ScriptError::Type(format!(
                "expected a STRING, got {}",
                self.type_name()
            ))),
        }
    }

    pub fn as_boolean(&self) -> Result<bool> {
        match self {
            Value::Boolean(b) => Ok(*b),
            _ => Err(ScriptError::Type(format!(
                "expected a BOOLEAN, got {}",
                self.type_name()
            ))),
        }
    }

    pub fn as_macro(&self) -> Result<Arc<Macro>> {
        match self {
            Value::Macro(m) => Ok(m.clone()),
            _ => Err(ScriptError::Type(format!(
                "expected a MACRO, got {}",
                self.type_name()
            ))),
        }
    }

    /// Statement rendering used in macro error frames. A named function
    /// renders as its name, which reads better than a snapshot.
    pub fn statement_label(&self) -> String {
        match self {
            Value::Function(f) => f.name().to_string(),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Long(a), Value::Long(b)) => a == b,
            // Note: NaN != NaN here, this is plain f64 equality. The
            // engine's comparison functions have their own NaN rules.
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Macro(a), Value::Macro(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Long(n) => write!(f, "{}", n),
            Value::Double(d) => {
                if d.is_finite() && d.fract() == 0.0 {
                    write!(f, "{:.1}", d)
                } else {
                    write!(f, "{}", d)
                }
            }
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "'{}'", s),
            Value::Macro(m) => write!(f, "<% {} statements %>", m.len()),
            Value::Function(func) => write!(f, "{}", func.name()),
            Value::Object(o) => write!(f, "<{}>", o.type_label()),
            Value::Null => write!(f, "NULL"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Long(n) => write!(f, "Long({})", n),
            Value::Double(d) => write!(f, "Double({})", d),
            Value::Boolean(b) => write!(f, "Boolean({})", b),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Macro(m) => write!(f, "Macro({} statements)", m.len()),
            Value::Function(func) => write!(f, "Function({})", func.name()),
            Value::Object(o) => write!(f, "Object({})", o.type_label()),
            Value::Null => write!(f, "Null"),
        }
    }
}
