//! Arithmetic operators
//!
//! LONG with LONG stays LONG with two's-complement wrap-around; any
//! LONG/DOUBLE mix produces a DOUBLE. `+` also concatenates strings.

use crate::script::error::{Result, ScriptError};
use crate::script::stack::MemoryStack;
use crate::script::value::Value;
use crate::script::StackFunction;

#[derive(Debug, Clone, Copy)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A named arithmetic function
pub struct Arith {
    name: &'static str,
    op: ArithOp,
}

impl Arith {
    pub fn new(name: &'static str, op: ArithOp) -> Self {
        Arith { name, op }
    }

    fn apply_longs(&self, a: i64, b: i64) -> Result<i64> {
        match self.op {
            ArithOp::Add => Ok(a.wrapping_add(b)),
            ArithOp::Sub => Ok(a.wrapping_sub(b)),
            ArithOp::Mul => Ok(a.wrapping_mul(b)),
            ArithOp::Div => {
                if 0 == b {
                    Err(ScriptError::Runtime(format!("{} division by zero.", self.name)))
                } else {
                    Ok(a.wrapping_div(b))
                }
            }
        }
    }

    fn apply_doubles(&self, a: f64, b: f64) -> f64 {
        match self.op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
        }
    }
}

impl StackFunction for Arith {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        let right = stack.pop()?;
        let left = stack.pop()?;

        let result = match (&left, &right) {
            (Value::Long(a), Value::Long(b)) => Value::Long(self.apply_longs(*a, *b)?),
            (a, b) if a.is_number() && b.is_number() => {
                Value::Double(self.apply_doubles(a.as_double()?, b.as_double()?))
            }
            (Value::String(a), Value::String(b)) if matches!(self.op, ArithOp::Add) => {
                Value::String(format!("{}{}", a, b))
            }
            _ => {
                return Err(ScriptError::Type(format!(
                    "{} can only operate on numeric{} types.",
                    self.name,
                    if matches!(self.op, ArithOp::Add) {
                        " or string"
                    } else {
                        ""
                    }
                )))
            }
        };

        stack.push(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::script::library::FunctionLibrary;
    use std::sync::Arc;

    fn stack() -> MemoryStack {
        MemoryStack::new(
            None,
            None,
            &StackConfig::default(),
            Arc::new(FunctionLibrary::new()),
        )
    }

    fn binary(op: ArithOp, name: &'static str, a: Value, b: Value) -> Result<Value> {
        let mut s = stack();
        s.push(a).unwrap();
        s.push(b).unwrap();
        Arith::new(name, op).apply(&mut s)?;
        s.pop()
    }

    #[test]
    fn test_long_addition_stays_long() {
        assert_eq!(
            binary(ArithOp::Add, "+", Value::Long(1), Value::Long(2)).unwrap(),
            Value::Long(3)
        );
    }

    #[test]
    fn test_long_overflow_wraps() {
        assert_eq!(
            binary(ArithOp::Add, "+", Value::Long(i64::MAX), Value::Long(1)).unwrap(),
            Value::Long(i64::MIN)
        );
    }

    #[test]
    fn test_mixed_produces_double() {
        assert_eq!(
            binary(ArithOp::Mul, "*", Value::Long(2), Value::Double(1.5)).unwrap(),
            Value::Double(3.0)
        );
    }

    #[test]
    fn test_long_division_by_zero_fails() {
        assert!(binary(ArithOp::Div, "/", Value::Long(1), Value::Long(0)).is_err());
    }

    #[test]
    fn test_double_division_by_zero_is_infinite() {
        match binary(ArithOp::Div, "/", Value::Double(1.0), Value::Double(0.0)).unwrap() {
            Value::Double(d) => assert!(d.is_infinite()),
            other => panic!("expected a DOUBLE, got {:?}", other),
        }
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(
            binary(
                ArithOp::Add,
                "+",
                Value::String("foo".to_string()),
                Value::String("bar".to_string())
            )
            .unwrap(),
            Value::String("foobar".to_string())
        );
    }

    #[test]
    fn test_string_subtraction_fails() {
        assert!(binary(
            ArithOp::Sub,
            "-",
            Value::String("a".to_string()),
            Value::String("b".to_string())
        )
        .is_err());
    }
}
