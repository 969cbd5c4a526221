//! Comparison operators
//!
//! Operands must be homogeneous: numeric with numeric or string with
//! string. NaN gets special treatment so that `NaN NaN ==`, `NaN NaN >=`
//! and `NaN NaN <=` hold while every other comparison involving NaN is
//! false (and `!=` with exactly one NaN is true).

use std::cmp::Ordering;

use crate::script::error::{Result, ScriptError};
use crate::script::stack::MemoryStack;
use crate::script::value::Value;
use crate::script::StackFunction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Outcome for an ordinary (non-NaN) ordering
    pub fn evaluate(self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
        }
    }

    /// Outcome when both operands are NaN: the reflexive relations hold
    fn evaluate_both_nan(self) -> bool {
        match self {
            CmpOp::Eq | CmpOp::Le | CmpOp::Ge => true,
            CmpOp::Ne | CmpOp::Lt | CmpOp::Gt => false,
        }
    }

    /// Outcome when exactly one operand is NaN
    fn evaluate_one_nan(self) -> bool {
        matches!(self, CmpOp::Ne)
    }
}

fn is_nan(value: &Value) -> bool {
    matches!(value, Value::Double(d) if d.is_nan())
}

/// Compare two values under the engine's rules. Fails unless the
/// operands are homogeneous numeric or string types; `name` is the
/// function reported in the error.
pub fn compare_values(name: &str, op: CmpOp, left: &Value, right: &Value) -> Result<bool> {
    // NaN cases come first: a NaN operand short-circuits even when the
    // other operand is not numeric.
    if is_nan(left) || is_nan(right) {
        return Ok(if is_nan(left) && is_nan(right) {
            op.evaluate_both_nan()
        } else {
            op.evaluate_one_nan()
        });
    }

    match (left, right) {
        (Value::Long(a), Value::Long(b)) => Ok(op.evaluate(a.cmp(b))),
        (a, b) if a.is_number() && b.is_number() => {
            let a = a.as_double()?;
            let b = b.as_double()?;
            // No NaN can reach this point
            Ok(op.evaluate(a.partial_cmp(&b).unwrap_or(Ordering::Equal)))
        }
        (Value::String(a), Value::String(b)) => Ok(op.evaluate(a.as_str().cmp(b.as_str()))),
        _ => Err(ScriptError::Type(format!(
            "{} can only operate on homogeneous numeric or string types.",
            name
        ))),
    }
}

/// A named comparison function
pub struct Compare {
    name: &'static str,
    op: CmpOp,
}

impl Compare {
    pub fn new(name: &'static str, op: CmpOp) -> Self {
        Compare { name, op }
    }
}

impl StackFunction for Compare {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        let right = stack.pop()?;
        let left = stack.pop()?;
        let result = compare_values(self.name, self.op, &left, &right)?;
        stack.push(Value::Boolean(result))
    }
}
