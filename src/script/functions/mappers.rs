//! Mapper constructors
//!
//! `mapper.lt` and friends pop a typed threshold and push an opaque
//! first-match aggregator. The aggregator is consumed by the
//! time-series functions living outside this crate; the engine only
//! builds and threads it.

use std::any::Any;
use std::sync::Arc;

use crate::script::error::{Result, ScriptError};
use crate::script::functions::compare::{compare_values, CmpOp};
use crate::script::stack::MemoryStack;
use crate::script::value::{OpaqueObject, Value};
use crate::script::StackFunction;

/// Aggregator selecting the first value satisfying a comparison against
/// a fixed threshold
pub struct FirstMatch {
    name: String,
    op: CmpOp,
    threshold: Value,
}

impl FirstMatch {
    pub fn threshold(&self) -> &Value {
        &self.threshold
    }

    /// Whether `candidate` satisfies the aggregator's predicate
    pub fn matches(&self, candidate: &Value) -> Result<bool> {
        compare_values(&self.name, self.op, candidate, &self.threshold)
    }
}

impl OpaqueObject for FirstMatch {
    fn type_label(&self) -> &'static str {
        "aggregator"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A named mapper constructor
pub struct MapperCompare {
    name: &'static str,
    op: CmpOp,
}

impl MapperCompare {
    pub fn new(name: &'static str, op: CmpOp) -> Self {
        MapperCompare { name, op }
    }
}

impl StackFunction for MapperCompare {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        let threshold = stack.pop()?;
        match threshold {
            Value::Long(_) | Value::Double(_) | Value::String(_) => {
                stack.push(Value::Object(Arc::new(FirstMatch {
                    name: self.name.to_string(),
                    op: self.op,
                    threshold,
                })))
            }
            _ => Err(ScriptError::Type(format!(
                "{} expects a LONG, DOUBLE or STRING value on top of the stack.",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::script::library::FunctionLibrary;

    fn stack() -> MemoryStack {
        MemoryStack::new(
            None,
            None,
            &StackConfig::default(),
            Arc::new(FunctionLibrary::new()),
        )
    }

    #[test]
    fn test_mapper_builds_aggregator() {
        let mut s = stack();
        s.push(Value::Long(10)).unwrap();
        MapperCompare::new("mapper.lt", CmpOp::Lt).apply(&mut s).unwrap();

        let aggregator = match s.pop().unwrap() {
            Value::Object(object) => object,
            other => panic!("expected an aggregator, got {:?}", other),
        };
        assert_eq!(aggregator.type_label(), "aggregator");

        let first = aggregator
            .as_any()
            .downcast_ref::<FirstMatch>()
            .expect("aggregator should downcast");
        assert!(first.matches(&Value::Long(5)).unwrap());
        assert!(!first.matches(&Value::Long(15)).unwrap());
        assert_eq!(first.threshold(), &Value::Long(10));
    }

    #[test]
    fn test_mapper_accepts_string_threshold() {
        let mut s = stack();
        s.push(Value::String("m".to_string())).unwrap();
        MapperCompare::new("mapper.ge", CmpOp::Ge).apply(&mut s).unwrap();
        assert!(matches!(s.pop().unwrap(), Value::Object(_)));
    }

    #[test]
    fn test_mapper_rejects_boolean() {
        let mut s = stack();
        s.push(Value::Boolean(true)).unwrap();
        let err = MapperCompare::new("mapper.eq", CmpOp::Eq)
            .apply(&mut s)
            .unwrap_err();
        assert!(err.to_string().contains("mapper.eq"));
    }
}
