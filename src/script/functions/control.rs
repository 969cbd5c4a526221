//! Macro and execution control functions

use std::sync::atomic::Ordering;

use crate::script::error::{Result, ScriptError};
use crate::script::registry;
use crate::script::stack::{Attribute, MemoryStack};
use crate::script::value::Value;
use crate::script::{
    StackFunction, ATTR_IN_SECURE_MACRO, CAPABILITY_STACKPS, COUNTER_RETURN_DEPTH,
};

/// RUN: pop a symbol and execute the macro it resolves to
pub struct Run {
    name: &'static str,
}

impl Run {
    pub fn new(name: &'static str) -> Self {
        Run { name }
    }
}

impl StackFunction for Run {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        let symbol = stack.pop()?.as_string()?.to_string();
        stack.run(&symbol)
    }
}

/// EVAL: execute a macro from the stack, or a string as script source
pub struct Eval {
    name: &'static str,
}

impl Eval {
    pub fn new(name: &'static str) -> Self {
        Eval { name }
    }
}

impl StackFunction for Eval {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        match stack.pop()? {
            Value::Macro(body) => stack.exec_macro(&body),
            Value::String(source) => stack.exec_all(&source),
            other => Err(ScriptError::Type(format!(
                "{} expects a MACRO or a STRING, got {}",
                self.name,
                other.type_name()
            ))),
        }
    }
}

/// RETURN: unwind the current macro frame
pub struct Return {
    name: &'static str,
}

impl Return {
    pub fn new(name: &'static str) -> Self {
        Return { name }
    }
}

impl StackFunction for Return {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        stack
            .counter(COUNTER_RETURN_DEPTH)?
            .store(1, Ordering::SeqCst);
        Err(ScriptError::Return)
    }
}

/// MSGFAIL: pop a message and fail with it, prefixed by the declared
/// name. Installed with the shadowed statement's name in redefinition
/// stubs, so `FOO` undefined fails with "FOO is undefined.".
pub struct MsgFail {
    name: String,
}

impl MsgFail {
    pub fn new(name: &'static str) -> Self {
        MsgFail {
            name: name.to_string(),
        }
    }

    /// A MSGFAIL reporting under another statement's name
    pub fn named(name: &str) -> Self {
        MsgFail {
            name: name.to_string(),
        }
    }
}

impl StackFunction for MsgFail {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        let message = match stack.pop()? {
            Value::String(message) => message,
            other => other.to_string(),
        };
        Err(ScriptError::Runtime(format!("{} {}", self.name, message)))
    }
}

/// SECURE: pop script text collected by a secure block and compile it
/// into a secure macro. The compilation runs on a substack in secure
/// mode, so errors inside the resulting macro never disclose its body.
pub struct Secure {
    name: &'static str,
}

impl Secure {
    pub fn new(name: &'static str) -> Self {
        Secure { name }
    }
}

impl StackFunction for Secure {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        let script = stack.pop()?.as_string()?.to_string();

        let mut sub = stack.substack();
        sub.set_attribute(ATTR_IN_SECURE_MACRO, Some(Attribute::Bool(true)))?;
        sub.macro_open()?;
        sub.exec_all(&script)?;
        sub.macro_close()?;
        let compiled = sub.pop()?.as_macro()?;

        stack.push(Value::Macro(compiled))
    }
}

/// STACKPS: render the registered stacks as a report. Requires the
/// stackps capability.
pub struct StackPs {
    name: &'static str,
}

impl StackPs {
    pub fn new(name: &'static str) -> Self {
        StackPs { name }
    }
}

impl StackFunction for StackPs {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        if stack.capability(CAPABILITY_STACKPS).is_none() {
            return Err(ScriptError::Capability(CAPABILITY_STACKPS.to_string()));
        }

        let mut report = String::new();
        for info in registry::stacks() {
            report.push_str(&format!(
                "{} {} ops={} started={}\n",
                info.uuid, info.name, info.current_ops, info.creation_time_ms
            ));
        }
        stack.push(Value::String(report))
    }
}
