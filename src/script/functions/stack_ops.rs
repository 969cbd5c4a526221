//! Stack manipulation functions

use crate::script::error::{Result, ScriptError};
use crate::script::stack::MemoryStack;
use crate::script::value::Value;
use crate::script::StackFunction;

#[derive(Debug, Clone, Copy)]
pub enum StackOpKind {
    Depth,
    Clear,
    Reset,
    Drop,
    DropN,
    Dup,
    DupN,
    Swap,
    Rot,
    Roll,
    RollD,
    Pick,
    Hide,
    Show,
}

/// A named stack manipulation function
pub struct StackOp {
    name: &'static str,
    kind: StackOpKind,
}

impl StackOp {
    pub fn new(name: &'static str, kind: StackOpKind) -> Self {
        StackOp { name, kind }
    }
}

impl StackFunction for StackOp {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut MemoryStack) -> Result<()> {
        match self.kind {
            StackOpKind::Depth => {
                let depth = stack.depth() as i64;
                stack.push(Value::Long(depth))
            }
            StackOpKind::Clear => {
                stack.clear();
                Ok(())
            }
            StackOpKind::Reset => {
                let depth = stack.pop()?.as_count()?;
                stack.reset(depth)
            }
            StackOpKind::Drop => stack.drop_top(),
            StackOpKind::DropN => stack.dropn(),
            StackOpKind::Dup => stack.dup(),
            StackOpKind::DupN => stack.dupn(),
            StackOpKind::Swap => stack.swap(),
            StackOpKind::Rot => stack.rot(),
            StackOpKind::Roll => stack.roll(),
            StackOpKind::RollD => stack.rolld(),
            StackOpKind::Pick => stack.pick(),
            // HIDE and SHOW take a count, or NULL for "all"
            StackOpKind::Hide => {
                let count = stack.pop()?;
                match count {
                    Value::Null => {
                        stack.hide_all();
                        Ok(())
                    }
                    Value::Long(n) => {
                        stack.hide(n);
                        Ok(())
                    }
                    other => Err(ScriptError::Type(format!(
                        "{} expects a LONG count or NULL, got {}",
                        self.name,
                        other.type_name()
                    ))),
                }
            }
            StackOpKind::Show => {
                let count = stack.pop()?;
                match count {
                    Value::Null => {
                        stack.show_all();
                        Ok(())
                    }
                    Value::Long(n) => {
                        stack.show(n);
                        Ok(())
                    }
                    other => Err(ScriptError::Type(format!(
                        "{} expects a LONG count or NULL, got {}",
                        self.name,
                        other.type_name()
                    ))),
                }
            }
        }
    }
}
