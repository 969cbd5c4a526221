//! Symbol, register and context functions

use crate::script::error::{Result, ScriptError};
use crate::script::stack::{Attribute, MemoryStack};
use crate::script::value::Value;
use crate::script::{StackFunction, ATTR_SECTION_NAME};

/// STORE: `value key STORE` stores under a symbol name (STRING key) or
/// into a register (LONG key).
pub struct Store {
    name: &'static str,
}

impl Store {
    pub fn new(name: &'static str) -> Self {
        Store { name }
    }
}

impl StackFunction for Store {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        let key = stack.pop()?;
        let value = stack.pop()?;
        match key {
            Value::String(symbol) => stack.store(symbol, value),
            Value::Long(register) => stack.store_register(register, value),
            other => Err(ScriptError::Type(format!(
                "{} expects a STRING symbol or a LONG register, got {}",
                self.name,
                other.type_name()
            ))),
        }
    }
}

/// LOAD: push the value bound to a symbol (STRING key) or held in a
/// register (LONG key). An unknown symbol fails.
pub struct Load {
    name: &'static str,
}

impl Load {
    pub fn new(name: &'static str) -> Self {
        Load { name }
    }
}

impl StackFunction for Load {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        let key = stack.pop()?;
        match key {
            Value::String(symbol) => {
                let value = stack
                    .load(&symbol)
                    .ok_or(ScriptError::UnknownSymbol(symbol))?;
                stack.push(value)
            }
            Value::Long(register) => {
                let value = stack.load_register(register)?;
                stack.push(value)
            }
            other => Err(ScriptError::Type(format!(
                "{} expects a STRING symbol or a LONG register, got {}",
                self.name,
                other.type_name()
            ))),
        }
    }
}

/// FORGET: remove one symbol, or every symbol when given NULL
pub struct Forget {
    name: &'static str,
}

impl Forget {
    pub fn new(name: &'static str) -> Self {
        Forget { name }
    }
}

impl StackFunction for Forget {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        match stack.pop()? {
            Value::Null => {
                stack.forget(None);
                Ok(())
            }
            Value::String(symbol) => {
                stack.forget(Some(&symbol));
                Ok(())
            }
            other => Err(ScriptError::Type(format!(
                "{} expects a STRING symbol or NULL, got {}",
                self.name,
                other.type_name()
            ))),
        }
    }
}

/// DEF: `body 'name' DEF` (re)defines a function from a macro; a NULL
/// body clears the redefinition.
pub struct Def {
    name: &'static str,
}

impl Def {
    pub fn new(name: &'static str) -> Self {
        Def { name }
    }
}

impl StackFunction for Def {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        let defined = stack.pop()?.as_string()?.to_string();
        match stack.pop()? {
            Value::Macro(body) => {
                stack.define(&defined, Some(body));
                Ok(())
            }
            Value::Null => {
                stack.define(&defined, None);
                Ok(())
            }
            other => Err(ScriptError::Type(format!(
                "{} expects a MACRO or NULL, got {}",
                self.name,
                other.type_name()
            ))),
        }
    }
}

/// SECTION: tag the region of execution with a diagnostic label used in
/// error messages
pub struct Section {
    name: &'static str,
}

impl Section {
    pub fn new(name: &'static str) -> Self {
        Section { name }
    }
}

impl StackFunction for Section {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        let section = stack.pop()?.as_string()?.to_string();
        stack.set_attribute(ATTR_SECTION_NAME, Some(Attribute::Str(section)))?;
        Ok(())
    }
}

/// SAVE: push a snapshot of the symbol table, registers and
/// redefinitions
pub struct Save {
    name: &'static str,
}

impl Save {
    pub fn new(name: &'static str) -> Self {
        Save { name }
    }
}

impl StackFunction for Save {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        stack.save()
    }
}

/// RESTORE: pop a context snapshot and apply it
pub struct Restore {
    name: &'static str,
}

impl Restore {
    pub fn new(name: &'static str) -> Self {
        Restore { name }
    }
}

impl StackFunction for Restore {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        stack.restore()
    }
}
