//! Function library
//!
//! Statement names that are neither literals nor variable or macro
//! references resolve against a `FunctionLibrary`. An entry is either a
//! stack function, applied against the stack, or a plain value pushed
//! as is (constants live in the library this way). The engine ships its
//! core function set; platform deployments extend the library with the
//! full catalog before handing it to a stack.

use std::collections::HashMap;
use std::sync::Arc;

use super::functions::arithmetic::{Arith, ArithOp};
use super::functions::compare::{CmpOp, Compare};
use super::functions::control::{Eval, MsgFail, Return, Run, Secure, StackPs};
use super::functions::mappers::MapperCompare;
use super::functions::stack_ops::{StackOp, StackOpKind};
use super::functions::store::{Def, Forget, Load, Restore, Save, Section, Store};
use super::value::Value;
use super::StackFunction;

/// What a library lookup returns
#[derive(Clone)]
pub enum FunctionValue {
    /// A function applied against the stack
    Stack(Arc<dyn StackFunction>),

    /// A plain value pushed onto the stack
    Value(Value),
}

/// Name → function registry
pub struct FunctionLibrary {
    functions: HashMap<String, FunctionValue>,
}

impl FunctionLibrary {
    /// An empty library
    pub fn new() -> Self {
        FunctionLibrary {
            functions: HashMap::new(),
        }
    }

    /// A library holding the engine's core function set
    pub fn with_core() -> Self {
        let mut library = FunctionLibrary::new();
        library.register_core();
        library
    }

    pub fn lookup(&self, name: &str) -> Option<FunctionValue> {
        self.functions.get(name).cloned()
    }

    pub fn register(&mut self, name: impl Into<String>, function: FunctionValue) {
        self.functions.insert(name.into(), function);
    }

    /// Register a stack function under its declared name
    pub fn register_stack(&mut self, function: Arc<dyn StackFunction>) {
        self.functions
            .insert(function.name().to_string(), FunctionValue::Stack(function));
    }

    /// Register a named constant
    pub fn register_value(&mut self, name: impl Into<String>, value: Value) {
        self.functions.insert(name.into(), FunctionValue::Value(value));
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn register_core(&mut self) {
        // Stack manipulation
        for (name, kind) in [
            ("DEPTH", StackOpKind::Depth),
            ("CLEAR", StackOpKind::Clear),
            ("RESET", StackOpKind::Reset),
            ("DROP", StackOpKind::Drop),
            ("DROPN", StackOpKind::DropN),
            ("DUP", StackOpKind::Dup),
            ("DUPN", StackOpKind::DupN),
            ("SWAP", StackOpKind::Swap),
            ("ROT", StackOpKind::Rot),
            ("ROLL", StackOpKind::Roll),
            ("ROLLD", StackOpKind::RollD),
            ("PICK", StackOpKind::Pick),
            ("HIDE", StackOpKind::Hide),
            ("SHOW", StackOpKind::Show),
        ] {
            self.register_stack(Arc::new(StackOp::new(name, kind)));
        }

        // Symbols, registers, contexts
        self.register_stack(Arc::new(Store::new("STORE")));
        self.register_stack(Arc::new(Load::new("LOAD")));
        self.register_stack(Arc::new(Forget::new("FORGET")));
        self.register_stack(Arc::new(Def::new("DEF")));
        self.register_stack(Arc::new(Section::new("SECTION")));
        self.register_stack(Arc::new(Save::new("SAVE")));
        self.register_stack(Arc::new(Restore::new("RESTORE")));

        // Macro control
        self.register_stack(Arc::new(Run::new("RUN")));
        self.register_stack(Arc::new(Eval::new("EVAL")));
        self.register_stack(Arc::new(Return::new("RETURN")));
        self.register_stack(Arc::new(MsgFail::new("MSGFAIL")));
        self.register_stack(Arc::new(Secure::new("SECURE")));
        self.register_stack(Arc::new(StackPs::new("STACKPS")));

        // Comparison
        for (name, op) in [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            ("<", CmpOp::Lt),
            ("<=", CmpOp::Le),
            (">", CmpOp::Gt),
            (">=", CmpOp::Ge),
        ] {
            self.register_stack(Arc::new(Compare::new(name, op)));
        }

        // Arithmetic
        for (name, op) in [
            ("+", ArithOp::Add),
            ("-", ArithOp::Sub),
            ("*", ArithOp::Mul),
            ("/", ArithOp::Div),
        ] {
            self.register_stack(Arc::new(Arith::new(name, op)));
        }

        // Mapper constructors
        for (name, op) in [
            ("mapper.eq", CmpOp::Eq),
            ("mapper.ne", CmpOp::Ne),
            ("mapper.lt", CmpOp::Lt),
            ("mapper.le", CmpOp::Le),
            ("mapper.gt", CmpOp::Gt),
            ("mapper.ge", CmpOp::Ge),
        ] {
            self.register_stack(Arc::new(MapperCompare::new(name, op)));
        }

        // Constants
        self.register_value("NaN", Value::Double(f64::NAN));
        self.register_value("PI", Value::Double(std::f64::consts::PI));
        self.register_value("E", Value::Double(std::f64::consts::E));
        self.register_value("MINLONG", Value::Long(i64::MIN));
        self.register_value("MAXLONG", Value::Long(i64::MAX));
        self.register_value("NULL", Value::Null);
    }
}

impl Default for FunctionLibrary {
    fn default() -> Self {
        Self::with_core()
    }
}
